//! Transaction output identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::TxHash;

/// Identifies a single transaction output globally: the pair of the
/// producing transaction's hash and the output's index within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: TxHash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: TxHash, index: u32) -> Self {
        Self { hash, index }
    }

    /// The null outpoint referenced by generation (coinbase) inputs.
    pub fn null() -> Self {
        Self {
            hash: TxHash::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}
