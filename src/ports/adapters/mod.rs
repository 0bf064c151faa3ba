//! In-process backend adapters
//!
//! The fabric runs edge-native: each backing store is an embedded index
//! rather than a network service. Every adapter still goes through the
//! full port contract (timeouts, breaker accounting, capability
//! declarations) so a remote implementation can replace any of them
//! without touching the registry or the planner.

pub mod document;
pub mod entity;
pub mod graph;
pub mod vector;

pub use document::DocumentLedgerPort;
pub use entity::EntityMemoryPort;
pub use graph::GraphMemoryPort;
pub use vector::VectorStorePort;
