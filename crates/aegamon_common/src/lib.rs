//! Aegamon Common - Shared model for the Aega fleet monitor
//!
//! The serialized shape of `SystemState` is the wire contract: the daemon
//! pushes it over the WebSocket channel and serves it from `/api/state`,
//! and every viewer mirrors these types instead of re-declaring the JSON.

pub mod endpoint;
pub mod model;

pub use endpoint::*;
pub use model::*;
