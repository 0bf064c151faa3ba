//! HTTP API handlers
//!
//! Each submodule covers one domain of the control-plane surface; the
//! router module stitches them together over the shared fabric state.

pub mod events;
pub mod governance;
pub mod health;
pub mod maintenance;
pub mod recall;
pub mod reflect;
pub mod router;

pub use router::{build_api_routes, build_public_routes, build_router, AppState};
