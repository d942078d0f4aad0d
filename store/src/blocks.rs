//! Block index records (`b` bucket).
//!
//! Records are keyed by the 4-byte big-endian height so that cursor scans
//! iterate in chain order. The value is serialized as:
//!
//! ```text
//! [0:32]  Block hash (32 bytes)
//! [32:40] Unix time (8 bytes)
//! [40:42] Vote bits (2 bytes)
//! [42:46] Number of transaction hashes (4 bytes)
//! [46:]   One 32-byte hash per relevant transaction mined in this block
//! ```

use std::ops::Bound;

use heed::types::Bytes;
use heed::{RoRange, RoRevRange, RoTxn, RwTxn};

use stakewallet_types::{Block, BlockHash, BlockMeta, Timestamp, TxHash};

use crate::encoding::{pack_height, read_hash32, read_u16, read_u32, read_u64, HASH_SIZE};
use crate::env::WalletStore;
use crate::error::{short_key, short_read, Error, Result};

/// Fixed-width header portion of a block record value.
const BLOCK_HEADER_SIZE: usize = 46;

/// A decoded block record: the block's identity plus the wallet-relevant
/// transactions mined in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub block: Block,
    pub time: Timestamp,
    pub vote_bits: u16,
    pub tx_hashes: Vec<TxHash>,
}

impl BlockRecord {
    pub fn meta(&self) -> BlockMeta {
        BlockMeta {
            block: self.block,
            time: self.time,
            vote_bits: self.vote_bits,
        }
    }
}

/// Serialize a block record holding a single transaction hash.
pub fn value_block_record(meta: &BlockMeta, tx_hash: &TxHash) -> Vec<u8> {
    let mut v = Vec::with_capacity(BLOCK_HEADER_SIZE + HASH_SIZE);
    v.extend_from_slice(meta.block.hash.as_bytes());
    v.extend_from_slice(&meta.time.as_secs().to_be_bytes());
    v.extend_from_slice(&meta.vote_bits.to_be_bytes());
    v.extend_from_slice(&1u32.to_be_bytes());
    v.extend_from_slice(tx_hash.as_bytes());
    v
}

/// Return a new block record value with `tx_hash` appended and the
/// transaction count incremented.
pub fn append_raw_block_record(v: &[u8], tx_hash: &TxHash) -> Result<Vec<u8>> {
    if v.len() < BLOCK_HEADER_SIZE {
        return Err(short_read(
            "b",
            "append block record",
            BLOCK_HEADER_SIZE,
            v.len(),
        ));
    }
    let mut newv = Vec::with_capacity(v.len() + HASH_SIZE);
    newv.extend_from_slice(v);
    newv.extend_from_slice(tx_hash.as_bytes());
    let n = read_u32(&newv[42..46]);
    newv[42..46].copy_from_slice(&(n + 1).to_be_bytes());
    Ok(newv)
}

/// Return a new block record value with one occurrence of `tx_hash` elided
/// and the transaction count decremented.
pub fn remove_raw_block_record(v: &[u8], tx_hash: &TxHash) -> Result<Vec<u8>> {
    if v.len() < BLOCK_HEADER_SIZE {
        return Err(short_read(
            "b",
            "remove block record",
            BLOCK_HEADER_SIZE,
            v.len(),
        ));
    }
    let mut newv = Vec::with_capacity(v.len().saturating_sub(HASH_SIZE));
    newv.extend_from_slice(&v[..BLOCK_HEADER_SIZE]);
    let mut removed = false;
    for chunk in v[BLOCK_HEADER_SIZE..].chunks_exact(HASH_SIZE) {
        if !removed && chunk == tx_hash.as_bytes() {
            removed = true;
            continue;
        }
        newv.extend_from_slice(chunk);
    }
    if removed {
        let n = read_u32(&newv[42..46]);
        newv[42..46].copy_from_slice(&n.saturating_sub(1).to_be_bytes());
    }
    Ok(newv)
}

/// Decode a block record from its key and value.
pub fn read_raw_block_record(k: &[u8], v: &[u8]) -> Result<BlockRecord> {
    if k.len() < 4 {
        return Err(short_key("b", "block record", 4, k.len()));
    }
    if v.len() < BLOCK_HEADER_SIZE {
        return Err(short_read("b", "block record", BLOCK_HEADER_SIZE, v.len()));
    }
    let num_transactions = read_u32(&v[42..46]) as usize;
    let expected = BLOCK_HEADER_SIZE + HASH_SIZE * num_transactions;
    if v.len() < expected {
        return Err(short_read("b", "block record hashes", expected, v.len()));
    }

    let height = read_u32(k);
    let hash = BlockHash::new(read_hash32(&v[..32]));
    let mut tx_hashes = Vec::with_capacity(num_transactions);
    let mut off = BLOCK_HEADER_SIZE;
    for _ in 0..num_transactions {
        tx_hashes.push(TxHash::new(read_hash32(&v[off..off + HASH_SIZE])));
        off += HASH_SIZE;
    }

    Ok(BlockRecord {
        block: Block::new(hash, height),
        time: Timestamp::new(read_u64(&v[32..40])),
        vote_bits: read_u16(&v[40..42]),
        tx_hashes,
    })
}

impl WalletStore {
    /// Record a block containing `tx_hash`, replacing any existing record
    /// at the same height.
    pub fn put_block_record(
        &self,
        txn: &mut RwTxn,
        meta: &BlockMeta,
        tx_hash: &TxHash,
    ) -> Result<()> {
        let k = pack_height(meta.block.height);
        let v = value_block_record(meta, tx_hash);
        self.put_raw_block_record(txn, &k, &v)
    }

    pub fn put_raw_block_record(&self, txn: &mut RwTxn, k: &[u8], v: &[u8]) -> Result<()> {
        self.blocks.put(txn, k, v)?;
        Ok(())
    }

    /// Append `tx_hash` to the block record at `height`.
    pub fn append_block_tx(&self, txn: &mut RwTxn, height: u32, tx_hash: &TxHash) -> Result<()> {
        let k = pack_height(height);
        let v = match self.blocks.get(txn, &k)? {
            Some(v) => v.to_vec(),
            None => return Err(short_read("b", "append block record", BLOCK_HEADER_SIZE, 0)),
        };
        let newv = append_raw_block_record(&v, tx_hash)?;
        self.blocks.put(txn, &k, &newv)?;
        Ok(())
    }

    /// Remove `tx_hash` from the block record at `height`.
    pub fn remove_block_tx(&self, txn: &mut RwTxn, height: u32, tx_hash: &TxHash) -> Result<()> {
        let k = pack_height(height);
        let v = match self.blocks.get(txn, &k)? {
            Some(v) => v.to_vec(),
            None => return Err(short_read("b", "remove block record", BLOCK_HEADER_SIZE, 0)),
        };
        let newv = remove_raw_block_record(&v, tx_hash)?;
        self.blocks.put(txn, &k, &newv)?;
        Ok(())
    }

    pub fn fetch_block_record(&self, txn: &RoTxn, height: u32) -> Result<BlockRecord> {
        let k = pack_height(height);
        let v = self.blocks.get(txn, &k)?.unwrap_or_default();
        read_raw_block_record(&k, v)
    }

    /// The raw block record value at `height`, if one exists.
    pub fn exists_block_record(&self, txn: &RoTxn, height: u32) -> Result<Option<Vec<u8>>> {
        let k = pack_height(height);
        Ok(self.blocks.get(txn, &k)?.map(|v| v.to_vec()))
    }

    pub fn delete_block_record(&self, txn: &mut RwTxn, height: u32) -> Result<()> {
        self.blocks.delete(txn, &pack_height(height))?;
        Ok(())
    }

    /// The recorded timestamp of the block at `height`.
    pub fn fetch_block_time(&self, txn: &RoTxn, height: u32) -> Result<Timestamp> {
        let k = pack_height(height);
        let v = self.blocks.get(txn, &k)?.unwrap_or_default();
        if v.len() < BLOCK_HEADER_SIZE {
            return Err(short_read("b", "block time", BLOCK_HEADER_SIZE, v.len()));
        }
        Ok(Timestamp::new(read_u64(&v[32..40])))
    }

    /// Probe heights `start, start + 1, …` until the first miss and return
    /// the last height that had a record.
    pub fn chain_height(&self, txn: &RoTxn, start: u32) -> Result<u32> {
        let mut last = None;
        let mut height = start;
        loop {
            if self.exists_block_record(txn, height)?.is_none() {
                break;
            }
            last = Some(height);
            height = match height.checked_add(1) {
                Some(h) => h,
                None => break,
            };
        }
        last.ok_or_else(|| {
            Error::Data(format!("no block records found probing from height {start}"))
        })
    }

    /// Iterate block records in ascending height order, starting at
    /// `height`.
    pub fn blocks_from<'t>(&self, txn: &'t RoTxn, height: u32) -> Result<BlockIter<'t>> {
        let lower = pack_height(height);
        let bounds = (Bound::Included(&lower[..]), Bound::Unbounded);
        Ok(BlockIter {
            inner: self.blocks.range(txn, &bounds)?,
        })
    }

    /// Iterate block records in descending height order, starting at the
    /// tallest recorded block.
    pub fn blocks_rev<'t>(&self, txn: &'t RoTxn) -> Result<RevBlockIter<'t>> {
        let upper = pack_height(u32::MAX);
        let bounds = (Bound::Unbounded, Bound::Included(&upper[..]));
        Ok(RevBlockIter {
            inner: self.blocks.rev_range(txn, &bounds)?,
        })
    }
}

/// Forward cursor over block records.
pub struct BlockIter<'t> {
    inner: RoRange<'t, Bytes, Bytes>,
}

impl Iterator for BlockIter<'_> {
    type Item = Result<BlockRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => Some(read_raw_block_record(k, v)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Reverse cursor over block records.
pub struct RevBlockIter<'t> {
    inner: RoRevRange<'t, Bytes, Bytes>,
}

impl Iterator for RevBlockIter<'_> {
    type Item = Result<BlockRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => Some(read_raw_block_record(k, v)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(height: u32) -> BlockMeta {
        BlockMeta {
            block: Block::new(BlockHash::new([height as u8; 32]), height),
            time: Timestamp::new(1_700_000_000 + height as u64),
            vote_bits: 1,
        }
    }

    #[test]
    fn block_record_roundtrip() {
        let m = meta(100);
        let hash = TxHash::new([0xcd; 32]);
        let v = value_block_record(&m, &hash);
        assert_eq!(v.len(), BLOCK_HEADER_SIZE + HASH_SIZE);

        let rec = read_raw_block_record(&pack_height(100), &v).expect("decode");
        assert_eq!(rec.block, m.block);
        assert_eq!(rec.time, m.time);
        assert_eq!(rec.vote_bits, 1);
        assert_eq!(rec.tx_hashes, vec![hash]);
    }

    #[test]
    fn append_then_remove_preserves_header() {
        let m = meta(5);
        let first = TxHash::new([1; 32]);
        let second = TxHash::new([2; 32]);

        let v = value_block_record(&m, &first);
        let appended = append_raw_block_record(&v, &second).expect("append");
        let rec = read_raw_block_record(&pack_height(5), &appended).expect("decode");
        assert_eq!(rec.tx_hashes, vec![first, second]);

        let removed = remove_raw_block_record(&appended, &first).expect("remove");
        let rec = read_raw_block_record(&pack_height(5), &removed).expect("decode");
        assert_eq!(rec.tx_hashes, vec![second]);
        assert_eq!(rec.block, m.block);
        assert_eq!(rec.time, m.time);
    }

    #[test]
    fn remove_absent_hash_is_noop() {
        let m = meta(5);
        let v = value_block_record(&m, &TxHash::new([1; 32]));
        let removed = remove_raw_block_record(&v, &TxHash::new([9; 32])).expect("remove");
        assert_eq!(removed, v);
    }

    #[test]
    fn short_value_is_data_error() {
        let err = read_raw_block_record(&pack_height(1), &[0u8; 45]);
        assert!(matches!(err, Err(Error::Data(_))));
    }

    #[test]
    fn count_mismatch_is_data_error() {
        let m = meta(8);
        let mut v = value_block_record(&m, &TxHash::new([3; 32]));
        // Claim two hashes while only one is present.
        v[42..46].copy_from_slice(&2u32.to_be_bytes());
        assert!(read_raw_block_record(&pack_height(8), &v).is_err());
    }
}
