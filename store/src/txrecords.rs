//! Mined transaction records (`t` bucket).
//!
//! Records are keyed `tx_hash[32] ‖ height[4] ‖ block_hash[32]`; the
//! leading hash makes "every mined incarnation of this transaction" a
//! prefix scan. The value is the 8-byte received time followed by the
//! serialized transaction. The stake kind is not stored; it is recomputed
//! from the serialized bytes on read.

use heed::{RoTxn, RwTxn};

use stakewallet_types::{Block, Timestamp, Transaction, TxHash, TxKind};

use crate::encoding::{read_u64, TxRecordKey};
use crate::env::{prefix_range, WalletStore};
use crate::error::{short_read, Error, Result};

/// A transaction tracked by the store, mined or not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRecord {
    pub hash: TxHash,
    pub received: Timestamp,
    pub tx: Transaction,
    pub kind: TxKind,
}

impl TxRecord {
    pub fn new(tx: Transaction, received: Timestamp) -> Self {
        let hash = tx.tx_hash();
        let kind = tx.kind();
        Self {
            hash,
            received,
            tx,
            kind,
        }
    }

    /// Build a record from caller-supplied serialized bytes.
    pub fn from_serialized(bytes: &[u8], received: Timestamp) -> Result<Self> {
        let tx = Transaction::deserialize(bytes)
            .map_err(|e| Error::Input(format!("failed to deserialize transaction: {e}")))?;
        Ok(Self::new(tx, received))
    }
}

/// Serialize a transaction record value: `received[8] ‖ serialized_tx`.
pub fn value_tx_record(rec: &TxRecord) -> Vec<u8> {
    let serialized = rec.tx.serialize();
    let mut v = Vec::with_capacity(8 + serialized.len());
    v.extend_from_slice(&rec.received.as_secs().to_be_bytes());
    v.extend_from_slice(&serialized);
    v
}

/// Decode a transaction record value, recomputing the stake kind.
pub fn read_raw_tx_record(tx_hash: &TxHash, v: &[u8]) -> Result<TxRecord> {
    if v.len() < 8 {
        return Err(short_read("t", "raw tx record", 8, v.len()));
    }
    let received = Timestamp::new(read_u64(&v[..8]));
    let tx = Transaction::deserialize(&v[8..]).map_err(|e| {
        Error::Data(format!("t: failed to deserialize transaction {tx_hash}: {e}"))
    })?;
    let kind = tx.kind();
    Ok(TxRecord {
        hash: *tx_hash,
        received,
        tx,
        kind,
    })
}

/// Extract the block position from a transaction record key.
pub fn read_raw_tx_record_block(k: &[u8]) -> Result<Block> {
    let key = TxRecordKey::from_slice(k)?;
    Ok(key.block())
}

/// The received time stored at the front of a record value.
pub fn fetch_raw_tx_record_received(v: &[u8]) -> Result<Timestamp> {
    if v.len() < 8 {
        return Err(short_read("t", "tx record received time", 8, v.len()));
    }
    Ok(Timestamp::new(read_u64(&v[..8])))
}

/// Recover the pk script of output `index` from a raw transaction record
/// value.
///
/// A zero `scr_loc` marks a legacy credit whose script location was never
/// stored; the whole transaction is deserialized to find the script. A
/// non-zero offset is measured from the start of the record value (it
/// already accounts for the received-time prefix) and is sliced directly.
pub fn fetch_raw_tx_record_pk_script(
    tx_hash: &TxHash,
    v: &[u8],
    index: u32,
    scr_loc: u32,
    scr_len: u32,
) -> Result<Vec<u8>> {
    if scr_loc == 0 {
        let rec = read_raw_tx_record(tx_hash, v)?;
        let output = rec.tx.outputs.get(index as usize).ok_or_else(|| {
            Error::Data("missing transaction output for credit index".to_string())
        })?;
        return Ok(output.pk_script.clone());
    }
    let start = scr_loc as usize;
    let end = start + scr_len as usize;
    if v.len() < end {
        return Err(short_read("t", "tx record pk script", end, v.len()));
    }
    Ok(v[start..end].to_vec())
}

impl WalletStore {
    pub fn put_tx_record(&self, txn: &mut RwTxn, rec: &TxRecord, block: &Block) -> Result<()> {
        let k = TxRecordKey::new(&rec.hash, block);
        let v = value_tx_record(rec);
        self.put_raw_tx_record(txn, &k, &v)
    }

    pub fn put_raw_tx_record(&self, txn: &mut RwTxn, k: &TxRecordKey, v: &[u8]) -> Result<()> {
        self.tx_records.put(txn, k.as_bytes(), v)?;
        Ok(())
    }

    pub fn fetch_tx_record(
        &self,
        txn: &RoTxn,
        tx_hash: &TxHash,
        block: &Block,
    ) -> Result<TxRecord> {
        let k = TxRecordKey::new(tx_hash, block);
        let v = self.tx_records.get(txn, k.as_bytes())?.unwrap_or_default();
        read_raw_tx_record(tx_hash, v)
    }

    pub fn exists_tx_record(
        &self,
        txn: &RoTxn,
        tx_hash: &TxHash,
        block: &Block,
    ) -> Result<Option<Vec<u8>>> {
        let k = TxRecordKey::new(tx_hash, block);
        self.exists_raw_tx_record(txn, &k)
    }

    pub fn exists_raw_tx_record(&self, txn: &RoTxn, k: &TxRecordKey) -> Result<Option<Vec<u8>>> {
        Ok(self.tx_records.get(txn, k.as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn delete_tx_record(&self, txn: &mut RwTxn, tx_hash: &TxHash, block: &Block) -> Result<()> {
        let k = TxRecordKey::new(tx_hash, block);
        self.tx_records.delete(txn, k.as_bytes())?;
        Ok(())
    }

    /// The newest mined incarnation of `tx_hash`: the record whose key is
    /// lexicographically greatest, which is the one in the tallest block
    /// because heights are big-endian. Returns `None` when the hash was
    /// never mined.
    pub fn latest_tx_record(
        &self,
        txn: &RoTxn,
        tx_hash: &TxHash,
    ) -> Result<Option<(TxRecordKey, Vec<u8>)>> {
        let mut last = None;
        for item in prefix_range(&self.tx_records, txn, tx_hash.as_bytes())? {
            let (k, v) = item?;
            last = Some((TxRecordKey::from_slice(k)?, v.to_vec()));
        }
        Ok(last)
    }
}
