//! Debit records (`d` bucket).
//!
//! A debit is a transaction input belonging to the wallet that spends one
//! of its credits. Keys share the layout of credit keys with the input
//! index in the trailing position. The 80-byte value is the debited amount
//! followed by the exact key of the consumed credit:
//!
//! ```text
//! [0:8]   Amount (8 bytes)
//! [8:80]  Consumed credit key (72 bytes)
//! ```

use heed::types::Bytes;
use heed::{RoIter, RoRange, RoTxn, RwTxn};

use stakewallet_types::{Amount, Block, TxHash};

use crate::encoding::{read_u32, read_u64, CreditKey, DebitKey, TxRecordKey, CREDIT_KEY_SIZE};
use crate::env::{prefix_range, WalletStore};
use crate::error::{short_key, short_read, Result};

/// Total size of a debit value in bytes.
pub const DEBIT_VALUE_SIZE: usize = 80;

/// A decoded debit as yielded by [`DebitIter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebitRecord {
    pub index: u32,
    pub amount: Amount,
}

/// Serialize a debit value.
pub fn value_debit(amount: Amount, cred_key: &CreditKey) -> [u8; DEBIT_VALUE_SIZE] {
    let mut v = [0u8; DEBIT_VALUE_SIZE];
    v[..8].copy_from_slice(&amount.to_atoms().to_be_bytes());
    v[8..80].copy_from_slice(cred_key.as_bytes());
    v
}

/// The consumed-credit key embedded in a debit value.
pub fn extract_raw_debit_credit_key(v: &[u8]) -> Result<CreditKey> {
    if v.len() < DEBIT_VALUE_SIZE {
        return Err(short_read("d", "debit credit key", DEBIT_VALUE_SIZE, v.len()));
    }
    CreditKey::from_slice(&v[8..80])
}

fn read_debit_record(k: &[u8], v: &[u8]) -> Result<DebitRecord> {
    if k.len() < CREDIT_KEY_SIZE {
        return Err(short_key("d", "debit iterator key", CREDIT_KEY_SIZE, k.len()));
    }
    if v.len() < DEBIT_VALUE_SIZE {
        return Err(short_read(
            "d",
            "debit iterator value",
            DEBIT_VALUE_SIZE,
            v.len(),
        ));
    }
    Ok(DebitRecord {
        index: read_u32(&k[68..72]),
        amount: Amount::new(read_u64(&v[..8])),
    })
}

impl WalletStore {
    /// Record a debit: input `index` of `tx_hash` mined in `block`,
    /// consuming the credit at `cred_key` for `amount`.
    pub fn put_debit(
        &self,
        txn: &mut RwTxn,
        tx_hash: &TxHash,
        index: u32,
        amount: Amount,
        block: &Block,
        cred_key: &CreditKey,
    ) -> Result<()> {
        let k = DebitKey::new(tx_hash, index, block);
        let v = value_debit(amount, cred_key);
        self.debits.put(txn, k.as_bytes(), &v)?;
        Ok(())
    }

    /// Look up a debit; when found, return its key and the consumed-credit
    /// key from its value.
    pub fn exists_debit(
        &self,
        txn: &RoTxn,
        tx_hash: &TxHash,
        index: u32,
        block: &Block,
    ) -> Result<Option<(DebitKey, CreditKey)>> {
        let k = DebitKey::new(tx_hash, index, block);
        let v = match self.debits.get(txn, k.as_bytes())? {
            Some(v) => v,
            None => return Ok(None),
        };
        let cred_key = extract_raw_debit_credit_key(v)?;
        Ok(Some((k, cred_key)))
    }

    pub fn delete_raw_debit(&self, txn: &mut RwTxn, k: &DebitKey) -> Result<()> {
        self.debits.delete(txn, k.as_bytes())?;
        Ok(())
    }

    /// Iterate the debits of one mined transaction in input order.
    pub fn debits_for_tx<'t>(
        &self,
        txn: &'t RoTxn,
        prefix: &TxRecordKey,
    ) -> Result<DebitIter<'t>> {
        Ok(DebitIter {
            inner: prefix_range(&self.debits, txn, prefix.as_bytes())?,
        })
    }

    /// Iterate every debit in the store, yielding the debit key, the
    /// debited amount, and the consumed-credit key.
    pub fn all_debits<'t>(&self, txn: &'t RoTxn) -> Result<AllDebitsIter<'t>> {
        Ok(AllDebitsIter {
            inner: self.debits.iter(txn)?,
        })
    }
}

/// Cursor over the entire debit bucket.
pub struct AllDebitsIter<'t> {
    inner: RoIter<'t, Bytes, Bytes>,
}

impl Iterator for AllDebitsIter<'_> {
    type Item = Result<(DebitKey, Amount, CreditKey)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => {
                let decode = || -> Result<(DebitKey, Amount, CreditKey)> {
                    let key = DebitKey::from_slice(k)?;
                    if v.len() < DEBIT_VALUE_SIZE {
                        return Err(short_read("d", "debit value", DEBIT_VALUE_SIZE, v.len()));
                    }
                    let amount = Amount::new(read_u64(&v[..8]));
                    let cred_key = extract_raw_debit_credit_key(v)?;
                    Ok((key, amount, cred_key))
                };
                Some(decode())
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Cursor over the debits of a single mined transaction.
pub struct DebitIter<'t> {
    inner: RoRange<'t, Bytes, Bytes>,
}

impl Iterator for DebitIter<'_> {
    type Item = Result<DebitRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => Some(read_debit_record(k, v)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakewallet_types::BlockHash;

    #[test]
    fn debit_value_embeds_credit_key() {
        let cred_key = CreditKey::new(
            &TxHash::new([1; 32]),
            4,
            &Block::new(BlockHash::new([2; 32]), 55),
        );
        let v = value_debit(Amount::new(42), &cred_key);
        assert_eq!(extract_raw_debit_credit_key(&v).expect("key"), cred_key);
        assert!(extract_raw_debit_credit_key(&v[..79]).is_err());
    }
}
