//! Session number minted by the master daemon.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlates a client's three stream sockets with its session request.
///
/// Minted by the daemon on `createConn`, strictly increasing, never reused
/// within one daemon process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionNum(u64);

impl SessionNum {
    pub fn new(num: u64) -> Self {
        Self(num)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionNum {
    fn from(num: u64) -> Self {
        Self(num)
    }
}
