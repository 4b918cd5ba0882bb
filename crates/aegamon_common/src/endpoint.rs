//! Static roster entries for the Linux analysis fleet.

use serde::{Deserialize, Serialize};

/// One analysis server in the fixed probe roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }
}
