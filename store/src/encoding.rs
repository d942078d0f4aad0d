//! Canonical big-endian packing of heights, amounts, outpoints, and the
//! composite record keys, plus the flag-byte bit layout shared by mined and
//! unmined credits.
//!
//! Big-endian is mandatory: cursor scans over integer-prefixed keys must
//! iterate in numeric order.

use stakewallet_types::tx::OP_NOP10;
use stakewallet_types::{Block, BlockHash, OutPoint, TxHash};

use crate::error::{short_key, Error, Result};

pub(crate) const HASH_SIZE: usize = 32;

/// Size of a canonical outpoint key.
pub const OUTPOINT_SIZE: usize = 36;

/// Size of a mined transaction record key.
pub const TX_RECORD_KEY_SIZE: usize = 68;

/// Size of a credit or debit key.
pub const CREDIT_KEY_SIZE: usize = 72;

// Flag byte bit layout. Bits 1..=5 are shared between mined and unmined
// credit values; bit 0 and the debit back-reference exist only on mined
// credits.
pub(crate) const FLAG_SPENT: u8 = 1 << 0;
pub(crate) const FLAG_CHANGE: u8 = 1 << 1;
pub(crate) const FLAG_COINBASE: u8 = 1 << 5;
pub(crate) const OPCODE_MASK: u8 = 0x07 << 2;

/// Bitmask for the account-exists bool packed into the script-type byte of
/// credit script locators.
pub(crate) const ACCOUNT_EXISTS_MASK: u8 = 0x80;

/// Script classification stored in the low 7 bits of the locator byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ScriptType {
    /// The locator was never recorded (legacy credit).
    Nonexisting = 0,
    Unspecified = 1,
    PubKeyHash = 2,
    PubKey = 3,
    PubKeyHashAlt = 4,
    PubKeyAlt = 5,
    ScriptHash = 6,
    StakePubKeyHash = 7,
    StakeScriptHash = 8,
}

impl ScriptType {
    pub(crate) fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Nonexisting,
            2 => Self::PubKeyHash,
            3 => Self::PubKey,
            4 => Self::PubKeyHashAlt,
            5 => Self::PubKeyAlt,
            6 => Self::ScriptHash,
            7 => Self::StakePubKeyHash,
            8 => Self::StakeScriptHash,
            _ => Self::Unspecified,
        }
    }
}

/// Pack a block height as 4 big-endian bytes.
pub fn pack_height(height: u32) -> [u8; 4] {
    height.to_be_bytes()
}

/// Pack an amount as 8 big-endian bytes.
pub fn pack_amount(amount: stakewallet_types::Amount) -> [u8; 8] {
    amount.to_atoms().to_be_bytes()
}

/// The canonical outpoint serialization: `tx_hash[32] ‖ index[4]`.
pub fn canonical_outpoint(hash: &TxHash, index: u32) -> [u8; OUTPOINT_SIZE] {
    let mut k = [0u8; OUTPOINT_SIZE];
    k[..32].copy_from_slice(hash.as_bytes());
    k[32..36].copy_from_slice(&index.to_be_bytes());
    k
}

/// Inverse of [`canonical_outpoint`].
pub fn read_canonical_outpoint(k: &[u8]) -> Result<OutPoint> {
    if k.len() < OUTPOINT_SIZE {
        return Err(Error::Data(format!(
            "short canonical outpoint (expected {} bytes, read {})",
            OUTPOINT_SIZE,
            k.len()
        )));
    }
    let hash = TxHash::new(read_hash32(k));
    let index = read_u32(&k[32..36]);
    Ok(OutPoint::new(hash, index))
}

/// Condense a raw stake opcode (`0xb9..=0xbd`) into bits 2..4 of the flag
/// byte. `OP_NOP10` condenses to zero, meaning "no stake opcode".
pub fn condense_opcode(op_code: u8) -> u8 {
    (op_code - OP_NOP10) << 2
}

/// Recover the raw stake opcode from a flag byte.
pub fn expand_opcode(flags: u8) -> u8 {
    ((flags & OPCODE_MASK) >> 2) + OP_NOP10
}

/// Copy the first 32 bytes of a slice into a fixed-width array. Callers
/// slice from fixed-size keys, so the length is guaranteed.
pub(crate) fn read_hash32(b: &[u8]) -> [u8; 32] {
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&b[..32]);
    arr
}

pub(crate) fn read_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

pub(crate) fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

pub(crate) fn read_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Advance a key prefix to the smallest byte string greater than every key
/// sharing the prefix. Used as the exclusive upper bound of prefix range
/// scans. Leaves the prefix empty if it consists solely of `0xff` bytes.
pub(crate) fn increment_prefix(prefix: &mut Vec<u8>) {
    while let Some(last) = prefix.last_mut() {
        if *last == 0xff {
            prefix.pop();
        } else {
            *last += 1;
            return;
        }
    }
}

/// Key of a mined transaction record: `tx_hash[32] ‖ height[4] ‖
/// block_hash[32]`. Also the shared 68-byte prefix of credit and debit keys
/// for the same transaction incidence.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TxRecordKey([u8; TX_RECORD_KEY_SIZE]);

impl TxRecordKey {
    pub fn new(tx_hash: &TxHash, block: &Block) -> Self {
        let mut k = [0u8; TX_RECORD_KEY_SIZE];
        k[..32].copy_from_slice(tx_hash.as_bytes());
        k[32..36].copy_from_slice(&block.height.to_be_bytes());
        k[36..68].copy_from_slice(block.hash.as_bytes());
        Self(k)
    }

    pub fn from_slice(k: &[u8]) -> Result<Self> {
        if k.len() < TX_RECORD_KEY_SIZE {
            return Err(short_key("t", "tx record key", TX_RECORD_KEY_SIZE, k.len()));
        }
        let mut arr = [0u8; TX_RECORD_KEY_SIZE];
        arr.copy_from_slice(&k[..TX_RECORD_KEY_SIZE]);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; TX_RECORD_KEY_SIZE] {
        &self.0
    }

    pub fn tx_hash(&self) -> TxHash {
        TxHash::new(read_hash32(&self.0[..32]))
    }

    pub fn height(&self) -> u32 {
        read_u32(&self.0[32..36])
    }

    pub fn block_hash(&self) -> BlockHash {
        BlockHash::new(read_hash32(&self.0[36..68]))
    }

    pub fn block(&self) -> Block {
        Block::new(self.block_hash(), self.height())
    }
}


impl std::fmt::Debug for TxRecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TxRecordKey({} @ {})", self.tx_hash(), self.height())
    }
}

/// Key of a credit record: the tx record key extended by the output index.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CreditKey([u8; CREDIT_KEY_SIZE]);

impl CreditKey {
    pub fn new(tx_hash: &TxHash, index: u32, block: &Block) -> Self {
        let mut k = [0u8; CREDIT_KEY_SIZE];
        k[..32].copy_from_slice(tx_hash.as_bytes());
        k[32..36].copy_from_slice(&block.height.to_be_bytes());
        k[36..68].copy_from_slice(block.hash.as_bytes());
        k[68..72].copy_from_slice(&index.to_be_bytes());
        Self(k)
    }

    pub fn from_slice(k: &[u8]) -> Result<Self> {
        if k.len() < CREDIT_KEY_SIZE {
            return Err(short_key("c", "credit key", CREDIT_KEY_SIZE, k.len()));
        }
        let mut arr = [0u8; CREDIT_KEY_SIZE];
        arr.copy_from_slice(&k[..CREDIT_KEY_SIZE]);
        Ok(Self(arr))
    }

    /// Rebuild the full credit key from an unspent-index entry: the
    /// outpoint key contributes hash and output index, the value the block
    /// position.
    pub fn compose(outpoint_key: &[u8], unspent_value: &[u8]) -> Result<Self> {
        if outpoint_key.len() < OUTPOINT_SIZE {
            return Err(short_key("u", "unspent key", OUTPOINT_SIZE, outpoint_key.len()));
        }
        if unspent_value.len() < OUTPOINT_SIZE {
            return Err(short_read_u(unspent_value.len()));
        }
        let mut k = [0u8; CREDIT_KEY_SIZE];
        k[..32].copy_from_slice(&outpoint_key[..32]);
        k[32..68].copy_from_slice(&unspent_value[..36]);
        k[68..72].copy_from_slice(&outpoint_key[32..36]);
        Ok(Self(k))
    }

    pub fn as_bytes(&self) -> &[u8; CREDIT_KEY_SIZE] {
        &self.0
    }

    pub fn tx_hash(&self) -> TxHash {
        TxHash::new(read_hash32(&self.0[..32]))
    }

    pub fn height(&self) -> u32 {
        read_u32(&self.0[32..36])
    }

    pub fn block_hash(&self) -> BlockHash {
        BlockHash::new(read_hash32(&self.0[36..68]))
    }

    pub fn block(&self) -> Block {
        Block::new(self.block_hash(), self.height())
    }

    pub fn index(&self) -> u32 {
        read_u32(&self.0[68..72])
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash(), self.index())
    }

    /// The 68-byte prefix shared with the transaction record.
    pub fn tx_record_key(&self) -> TxRecordKey {
        let mut arr = [0u8; TX_RECORD_KEY_SIZE];
        arr.copy_from_slice(&self.0[..TX_RECORD_KEY_SIZE]);
        TxRecordKey(arr)
    }

    /// The unspent-index value for this credit: `height[4] ‖ block_hash[32]`.
    pub fn unspent_value(&self) -> [u8; OUTPOINT_SIZE] {
        let mut v = [0u8; OUTPOINT_SIZE];
        v.copy_from_slice(&self.0[32..68]);
        v
    }
}

impl std::fmt::Debug for CreditKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CreditKey({}:{} @ {})",
            self.tx_hash(),
            self.index(),
            self.height()
        )
    }
}

fn short_read_u(actual: usize) -> Error {
    crate::error::short_read("u", "unspent value", OUTPOINT_SIZE, actual)
}

/// Key of a debit record: same layout as a credit key, but the trailing
/// 4 bytes are the spending transaction's *input* index. A distinct type
/// keeps the two from being interchanged.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DebitKey([u8; CREDIT_KEY_SIZE]);

impl DebitKey {
    pub fn new(tx_hash: &TxHash, index: u32, block: &Block) -> Self {
        let mut k = [0u8; CREDIT_KEY_SIZE];
        k[..32].copy_from_slice(tx_hash.as_bytes());
        k[32..36].copy_from_slice(&block.height.to_be_bytes());
        k[36..68].copy_from_slice(block.hash.as_bytes());
        k[68..72].copy_from_slice(&index.to_be_bytes());
        Self(k)
    }

    pub fn from_slice(k: &[u8]) -> Result<Self> {
        if k.len() < CREDIT_KEY_SIZE {
            return Err(short_key("d", "debit key", CREDIT_KEY_SIZE, k.len()));
        }
        let mut arr = [0u8; CREDIT_KEY_SIZE];
        arr.copy_from_slice(&k[..CREDIT_KEY_SIZE]);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; CREDIT_KEY_SIZE] {
        &self.0
    }

    pub fn tx_hash(&self) -> TxHash {
        TxHash::new(read_hash32(&self.0[..32]))
    }

    pub fn height(&self) -> u32 {
        read_u32(&self.0[32..36])
    }

    pub fn block_hash(&self) -> BlockHash {
        BlockHash::new(read_hash32(&self.0[36..68]))
    }

    pub fn index(&self) -> u32 {
        read_u32(&self.0[68..72])
    }

    pub fn tx_record_key(&self) -> TxRecordKey {
        let mut arr = [0u8; TX_RECORD_KEY_SIZE];
        arr.copy_from_slice(&self.0[..TX_RECORD_KEY_SIZE]);
        TxRecordKey(arr)
    }
}

impl std::fmt::Debug for DebitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DebitKey({}:{} @ {})",
            self.tx_hash(),
            self.index(),
            self.height()
        )
    }
}
