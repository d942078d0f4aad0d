//! Multisig output records (`ms` bucket) and the unspent-multisig set
//! (`mu` bucket).
//!
//! Each record denormalizes everything needed to spend a multisig output
//! into one 135-byte value keyed by the canonical outpoint:
//!
//! ```text
//! [0:20]    Script hash (20 bytes)
//! [20]      m (in m-of-n)
//! [21]      n (in m-of-n)
//! [22]      Flags: [0] spent, [1] stake tree
//! [23:55]   Block hash (32 bytes)
//! [55:59]   Block height (4 bytes)
//! [59:67]   Amount (8 bytes)
//! [67:99]   Spent-by hash (32 bytes)
//! [99:103]  Spent-by index (4 bytes)
//! [103:135] Transaction hash (32 bytes)
//! ```
//!
//! The `mu` bucket is the flat set of currently-unspent multisig outpoints,
//! keyed by outpoint with a single zero byte as value. An outpoint is a
//! member iff its record's spent flag is clear.

use heed::types::Bytes;
use heed::{RoIter, RoTxn, RwTxn};

use stakewallet_types::{Amount, Block, BlockHash, OutPoint, TxHash};

use crate::encoding::{
    canonical_outpoint, read_canonical_outpoint, read_hash32, read_u32, read_u64, OUTPOINT_SIZE,
};
use crate::env::WalletStore;
use crate::error::{Error, Result};
use crate::scripts::SCRIPT_HASH_SIZE;

/// Total size of a multisig output value in bytes.
pub const MULTISIG_VALUE_SIZE: usize = 135;

const MS_FLAG_SPENT: u8 = 1 << 0;
const MS_FLAG_STAKE_TREE: u8 = 1 << 1;

/// Which transaction tree the output lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tree {
    Regular,
    Stake,
}

/// A fully decoded multisig output record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisigOut {
    pub outpoint: OutPoint,
    pub script_hash: [u8; SCRIPT_HASH_SIZE],
    pub m: u8,
    pub n: u8,
    pub spent: bool,
    pub tree: Tree,
    pub block: Block,
    pub amount: Amount,
    pub spent_by: TxHash,
    pub spent_by_index: u32,
    pub tx_hash: TxHash,
}

/// Serialize a multisig output value.
pub fn value_multisig_out(out: &MultisigOut) -> [u8; MULTISIG_VALUE_SIZE] {
    let mut v = [0u8; MULTISIG_VALUE_SIZE];
    v[..20].copy_from_slice(&out.script_hash);
    v[20] = out.m;
    v[21] = out.n;
    if out.spent {
        v[22] |= MS_FLAG_SPENT;
    }
    if out.tree == Tree::Stake {
        v[22] |= MS_FLAG_STAKE_TREE;
    }
    v[23..55].copy_from_slice(out.block.hash.as_bytes());
    v[55..59].copy_from_slice(&out.block.height.to_be_bytes());
    v[59..67].copy_from_slice(&out.amount.to_atoms().to_be_bytes());
    v[67..99].copy_from_slice(out.spent_by.as_bytes());
    v[99..103].copy_from_slice(&out.spent_by_index.to_be_bytes());
    v[103..135].copy_from_slice(out.tx_hash.as_bytes());
    v
}

/// Decode a full multisig output record from its key and value.
pub fn fetch_multisig_out(k: &[u8], v: &[u8]) -> Result<MultisigOut> {
    if k.len() != OUTPOINT_SIZE {
        return Err(Error::Data(format!(
            "ms: wrong key size (expected {OUTPOINT_SIZE} bytes, read {})",
            k.len()
        )));
    }
    if v.len() != MULTISIG_VALUE_SIZE {
        return Err(Error::Data(format!(
            "ms: wrong value size (expected {MULTISIG_VALUE_SIZE} bytes, read {})",
            v.len()
        )));
    }

    let outpoint = read_canonical_outpoint(k)?;
    let mut script_hash = [0u8; SCRIPT_HASH_SIZE];
    script_hash.copy_from_slice(&v[..20]);

    Ok(MultisigOut {
        outpoint,
        script_hash,
        m: v[20],
        n: v[21],
        spent: v[22] & MS_FLAG_SPENT != 0,
        tree: if v[22] & MS_FLAG_STAKE_TREE != 0 {
            Tree::Stake
        } else {
            Tree::Regular
        },
        block: Block::new(BlockHash::new(read_hash32(&v[23..55])), read_u32(&v[55..59])),
        amount: Amount::new(read_u64(&v[59..67])),
        spent_by: TxHash::new(read_hash32(&v[67..99])),
        spent_by_index: read_u32(&v[99..103]),
        tx_hash: TxHash::new(read_hash32(&v[103..135])),
    })
}

pub fn fetch_multisig_out_script_hash(v: &[u8; MULTISIG_VALUE_SIZE]) -> [u8; SCRIPT_HASH_SIZE] {
    let mut sh = [0u8; SCRIPT_HASH_SIZE];
    sh.copy_from_slice(&v[..20]);
    sh
}

pub fn fetch_multisig_out_mn(v: &[u8; MULTISIG_VALUE_SIZE]) -> (u8, u8) {
    (v[20], v[21])
}

pub fn fetch_multisig_out_spent(v: &[u8; MULTISIG_VALUE_SIZE]) -> bool {
    v[22] & MS_FLAG_SPENT != 0
}

pub fn fetch_multisig_out_tree(v: &[u8; MULTISIG_VALUE_SIZE]) -> Tree {
    if v[22] & MS_FLAG_STAKE_TREE != 0 {
        Tree::Stake
    } else {
        Tree::Regular
    }
}

/// The spent flag together with the spender's hash and input index.
pub fn fetch_multisig_out_spent_verbose(
    v: &[u8; MULTISIG_VALUE_SIZE],
) -> (bool, TxHash, u32) {
    (
        v[22] & MS_FLAG_SPENT != 0,
        TxHash::new(read_hash32(&v[67..99])),
        read_u32(&v[99..103]),
    )
}

pub fn fetch_multisig_out_mined(v: &[u8; MULTISIG_VALUE_SIZE]) -> (BlockHash, u32) {
    (BlockHash::new(read_hash32(&v[23..55])), read_u32(&v[55..59]))
}

pub fn fetch_multisig_out_amount(v: &[u8; MULTISIG_VALUE_SIZE]) -> Amount {
    Amount::new(read_u64(&v[59..67]))
}

/// Mark the record spent by the given input. Only the spent flag and the
/// spent-by fields are touched; the tree bit survives.
pub fn set_multisig_out_spent(
    v: &mut [u8; MULTISIG_VALUE_SIZE],
    spend_hash: &TxHash,
    spend_index: u32,
) {
    v[22] |= MS_FLAG_SPENT;
    v[67..99].copy_from_slice(spend_hash.as_bytes());
    v[99..103].copy_from_slice(&spend_index.to_be_bytes());
}

/// Clear the spent flag. All 32 spent-by bytes are zeroed and the spent-by
/// index is set to the sentinel `0xFFFFFFFF`.
pub fn set_multisig_out_unspent(v: &mut [u8; MULTISIG_VALUE_SIZE]) {
    v[22] &= !MS_FLAG_SPENT;
    v[67..99].fill(0);
    v[99..103].copy_from_slice(&u32::MAX.to_be_bytes());
}

pub fn set_multisig_out_mined(
    v: &mut [u8; MULTISIG_VALUE_SIZE],
    block_hash: &BlockHash,
    block_height: u32,
) {
    v[23..55].copy_from_slice(block_hash.as_bytes());
    v[55..59].copy_from_slice(&block_height.to_be_bytes());
}

pub fn set_multisig_out_unmined(v: &mut [u8; MULTISIG_VALUE_SIZE]) {
    v[23..55].fill(0);
    v[55..59].copy_from_slice(&0u32.to_be_bytes());
}

impl WalletStore {
    pub fn put_multisig_out(&self, txn: &mut RwTxn, out: &MultisigOut) -> Result<()> {
        let k = canonical_outpoint(&out.outpoint.hash, out.outpoint.index);
        let v = value_multisig_out(out);
        self.put_multisig_out_raw_values(txn, &k, &v)
    }

    pub fn put_multisig_out_raw_values(&self, txn: &mut RwTxn, k: &[u8], v: &[u8]) -> Result<()> {
        self.multisig.put(txn, k, v)?;
        Ok(())
    }

    /// The raw 135-byte record for an outpoint, as a defensive copy.
    pub fn exists_multisig_out(
        &self,
        txn: &RoTxn,
        k: &[u8],
    ) -> Result<Option<[u8; MULTISIG_VALUE_SIZE]>> {
        match self.multisig.get(txn, k)? {
            Some(v) if v.len() == MULTISIG_VALUE_SIZE => {
                let mut arr = [0u8; MULTISIG_VALUE_SIZE];
                arr.copy_from_slice(v);
                Ok(Some(arr))
            }
            Some(v) => Err(Error::Data(format!(
                "ms: wrong value size (expected {MULTISIG_VALUE_SIZE} bytes, read {})",
                v.len()
            ))),
            None => Ok(None),
        }
    }

    pub fn delete_multisig_out(&self, txn: &mut RwTxn, k: &[u8]) -> Result<()> {
        self.multisig.delete(txn, k)?;
        Ok(())
    }

    /// Mark the record at `k` spent and drop the outpoint from the
    /// unspent-multisig set, in lockstep.
    pub fn spend_multisig_out(
        &self,
        txn: &mut RwTxn,
        k: &[u8],
        spend_hash: &TxHash,
        spend_index: u32,
    ) -> Result<()> {
        let mut v = self
            .exists_multisig_out(txn, k)?
            .ok_or_else(|| Error::Data("ms: missing multisig output to mark spent".to_string()))?;
        set_multisig_out_spent(&mut v, spend_hash, spend_index);
        self.put_multisig_out_raw_values(txn, k, &v)?;
        self.delete_multisig_out_unspent(txn, k)
    }

    /// Clear the spent flag of the record at `k` and restore the outpoint
    /// to the unspent-multisig set.
    pub fn unspend_multisig_out(&self, txn: &mut RwTxn, k: &[u8]) -> Result<()> {
        let mut v = self
            .exists_multisig_out(txn, k)?
            .ok_or_else(|| Error::Data("ms: missing multisig output to mark unspent".to_string()))?;
        set_multisig_out_unspent(&mut v);
        self.put_multisig_out_raw_values(txn, k, &v)?;
        self.put_multisig_out_unspent(txn, k)
    }

    /// Add an outpoint to the unspent-multisig set.
    pub fn put_multisig_out_unspent(&self, txn: &mut RwTxn, k: &[u8]) -> Result<()> {
        self.multisig_unspent.put(txn, k, &[0x00])?;
        Ok(())
    }

    pub fn delete_multisig_out_unspent(&self, txn: &mut RwTxn, k: &[u8]) -> Result<()> {
        self.multisig_unspent.delete(txn, k)?;
        Ok(())
    }

    pub fn exists_multisig_out_unspent(&self, txn: &RoTxn, k: &[u8]) -> Result<bool> {
        Ok(self.multisig_unspent.get(txn, k)?.is_some())
    }

    /// Iterate every multisig output record.
    pub fn multisig_outputs<'t>(&self, txn: &'t RoTxn) -> Result<MultisigIter<'t>> {
        Ok(MultisigIter {
            inner: self.multisig.iter(txn)?,
        })
    }

    /// Iterate the outpoints currently in the unspent-multisig set.
    pub fn multisig_unspent_outpoints<'t>(
        &self,
        txn: &'t RoTxn,
    ) -> Result<MultisigUnspentIter<'t>> {
        Ok(MultisigUnspentIter {
            inner: self.multisig_unspent.iter(txn)?,
        })
    }
}

/// Cursor over every multisig output record.
pub struct MultisigIter<'t> {
    inner: RoIter<'t, Bytes, Bytes>,
}

impl Iterator for MultisigIter<'_> {
    type Item = Result<MultisigOut>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => Some(fetch_multisig_out(k, v)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Cursor over the unspent-multisig outpoint set.
pub struct MultisigUnspentIter<'t> {
    inner: RoIter<'t, Bytes, Bytes>,
}

impl Iterator for MultisigUnspentIter<'_> {
    type Item = Result<OutPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, _)) => Some(read_canonical_outpoint(k)),
            Err(e) => Some(Err(e.into())),
        }
    }
}
