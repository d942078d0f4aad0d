//! Block identity and metadata.

use serde::{Deserialize, Serialize};

use crate::hash::BlockHash;
use crate::time::Timestamp;

/// The position of a block in the chain: its hash and height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub hash: BlockHash,
    pub height: u32,
}

impl Block {
    pub fn new(hash: BlockHash, height: u32) -> Self {
        Self { hash, height }
    }
}

/// Block metadata recorded alongside the transactions mined in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block: Block,
    pub time: Timestamp,
    pub vote_bits: u16,
}
