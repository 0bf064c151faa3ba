//! Pluggable backend adapters behind a circuit-breaker registry

pub mod adapters;
pub mod circuit;
pub mod port;
pub mod registry;

pub use adapters::{DocumentLedgerPort, EntityMemoryPort, GraphMemoryPort, VectorStorePort};
pub use circuit::{CircuitBreaker, CircuitState};
pub use port::{MemoryCapability, MemoryPort, PortOutcome, SearchHit};
pub use registry::{FanoutResult, PortHealth, PortRegistry};
