//! Event-sourced memory atom ledger

pub mod store;
pub mod types;

pub use store::AtomStore;
pub use types::*;
