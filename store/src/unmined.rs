//! The unconfirmed mirror: unmined transactions (`m`), their credits
//! (`mc`), and the reverse index of outpoints they spend (`mi`).
//!
//! Unmined transaction values match mined transaction record values.
//! Unmined credits are keyed by canonical outpoint; the 22-byte value is
//! the mined credit value without the spent flag and debit back-reference:
//!
//! ```text
//! [0:8]   Amount (8 bytes)
//! [8]     Flags: [1] change, [2:5] condensed stake opcode, [5] coinbase
//! [9]     Script type, top bit = account recorded
//! [10:14] Script offset inside the tx record value
//! [14:18] Script length
//! [18:22] Account
//! ```
//!
//! Version 1 stores wrote 9-byte values (amount and flags only); those are
//! still readable and report "no script info", but are never written.
//!
//! The `mi` bucket maps every outpoint consumed by an unmined transaction,
//! mined or not, to the spender's hash. Presence of an entry is what marks
//! a mined credit as spent for balance purposes; the credit's own flag byte
//! is not rewritten on mempool changes.

use heed::types::Bytes;
use heed::{RoIter, RoRange, RoTxn, RwTxn};

use stakewallet_types::{Amount, OutPoint, TxHash};

use crate::encoding::{
    read_canonical_outpoint, read_hash32, read_u32, read_u64, ScriptType, ACCOUNT_EXISTS_MASK,
    FLAG_CHANGE, FLAG_COINBASE, OUTPOINT_SIZE,
};
use crate::env::{prefix_range, WalletStore};
use crate::error::{short_key, short_read, Error, Result};
use crate::txrecords::{read_raw_tx_record, TxRecord};

/// Size of an unmined credit key.
pub const UNMINED_CREDIT_KEY_SIZE: usize = OUTPOINT_SIZE;

/// Size of a version 1 (legacy) unmined credit value.
pub const UNMINED_VALUE_SIZE_LEGACY: usize = 9;

/// Size of a version 2 unmined credit value.
pub const UNMINED_VALUE_SIZE: usize = 22;

/// An unmined credit as yielded by [`UnminedCreditIter`]. Spentness is not
/// recorded here; check the unmined-inputs bucket for the outpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnminedCreditRecord {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub change: bool,
    pub op_code: u8,
    pub is_coinbase: bool,
}

/// Serialize an unmined credit value (version 2 form).
#[allow(clippy::too_many_arguments)]
pub fn value_unmined_credit(
    amount: Amount,
    change: bool,
    op_code: u8,
    is_coinbase: bool,
    script_type: ScriptType,
    scr_loc: u32,
    scr_len: u32,
    account: u32,
) -> [u8; UNMINED_VALUE_SIZE] {
    let mut v = [0u8; UNMINED_VALUE_SIZE];
    v[..8].copy_from_slice(&amount.to_atoms().to_be_bytes());
    v[8] = crate::encoding::condense_opcode(op_code);
    if change {
        v[8] |= FLAG_CHANGE;
    }
    if is_coinbase {
        v[8] |= FLAG_COINBASE;
    }

    v[9] = script_type as u8 | ACCOUNT_EXISTS_MASK;
    v[10..14].copy_from_slice(&scr_loc.to_be_bytes());
    v[14..18].copy_from_slice(&scr_len.to_be_bytes());
    v[18..22].copy_from_slice(&account.to_be_bytes());
    v
}

pub fn fetch_raw_unmined_credit_index(k: &[u8]) -> Result<u32> {
    if k.len() < UNMINED_CREDIT_KEY_SIZE {
        return Err(short_key(
            "mc",
            "unmined credit index",
            UNMINED_CREDIT_KEY_SIZE,
            k.len(),
        ));
    }
    Ok(read_u32(&k[32..36]))
}

pub fn fetch_raw_unmined_credit_amount(v: &[u8]) -> Result<Amount> {
    if v.len() < UNMINED_VALUE_SIZE_LEGACY {
        return Err(short_read(
            "mc",
            "unmined credit amount",
            UNMINED_VALUE_SIZE_LEGACY,
            v.len(),
        ));
    }
    Ok(Amount::new(read_u64(&v[..8])))
}

pub fn fetch_raw_unmined_credit_amount_change(v: &[u8]) -> Result<(Amount, bool)> {
    if v.len() < UNMINED_VALUE_SIZE_LEGACY {
        return Err(short_read(
            "mc",
            "unmined credit amount change",
            UNMINED_VALUE_SIZE_LEGACY,
            v.len(),
        ));
    }
    Ok((Amount::new(read_u64(&v[..8])), v[8] & FLAG_CHANGE != 0))
}

pub fn fetch_raw_unmined_credit_tag_opcode(v: &[u8]) -> Result<u8> {
    if v.len() < UNMINED_VALUE_SIZE_LEGACY {
        return Err(short_read(
            "mc",
            "unmined credit opcode",
            UNMINED_VALUE_SIZE_LEGACY,
            v.len(),
        ));
    }
    Ok(crate::encoding::expand_opcode(v[8]))
}

pub fn fetch_raw_unmined_credit_is_coinbase(v: &[u8]) -> Result<bool> {
    if v.len() < UNMINED_VALUE_SIZE_LEGACY {
        return Err(short_read(
            "mc",
            "unmined credit coinbase flag",
            UNMINED_VALUE_SIZE_LEGACY,
            v.len(),
        ));
    }
    Ok(v[8] & FLAG_COINBASE != 0)
}

/// Script classification, or [`ScriptType::Nonexisting`] for legacy values.
pub fn fetch_raw_unmined_credit_script_type(v: &[u8]) -> ScriptType {
    if v.len() < UNMINED_VALUE_SIZE {
        return ScriptType::Nonexisting;
    }
    ScriptType::from_byte(v[9] & !ACCOUNT_EXISTS_MASK)
}

pub fn fetch_raw_unmined_credit_script_offset(v: &[u8]) -> u32 {
    if v.len() < UNMINED_VALUE_SIZE {
        return 0;
    }
    read_u32(&v[10..14])
}

pub fn fetch_raw_unmined_credit_script_length(v: &[u8]) -> u32 {
    if v.len() < UNMINED_VALUE_SIZE {
        return 0;
    }
    read_u32(&v[14..18])
}

pub fn fetch_raw_unmined_credit_account(v: &[u8]) -> Result<u32> {
    if v.len() < UNMINED_VALUE_SIZE {
        return Err(short_read(
            "mc",
            "unmined credit account",
            UNMINED_VALUE_SIZE,
            v.len(),
        ));
    }
    if v[9] & ACCOUNT_EXISTS_MASK != ACCOUNT_EXISTS_MASK {
        return Err(Error::ValueNoExists("unmined credit account"));
    }
    Ok(read_u32(&v[18..22]))
}

/// The transaction hash keyed in the unmined bucket.
pub fn read_raw_unmined_hash(k: &[u8]) -> Result<TxHash> {
    if k.len() < 32 {
        return Err(short_key("m", "unmined record", 32, k.len()));
    }
    Ok(TxHash::new(read_hash32(k)))
}

fn read_unmined_credit_record(k: &[u8], v: &[u8]) -> Result<UnminedCreditRecord> {
    let outpoint = read_canonical_outpoint(k)?;
    let (amount, change) = fetch_raw_unmined_credit_amount_change(v)?;
    Ok(UnminedCreditRecord {
        outpoint,
        amount,
        change,
        op_code: crate::encoding::expand_opcode(v[8]),
        is_coinbase: v[8] & FLAG_COINBASE != 0,
    })
}

impl WalletStore {
    pub fn put_raw_unmined(&self, txn: &mut RwTxn, tx_hash: &TxHash, v: &[u8]) -> Result<()> {
        self.unmined.put(txn, tx_hash.as_bytes(), v)?;
        Ok(())
    }

    pub fn exists_raw_unmined(&self, txn: &RoTxn, tx_hash: &TxHash) -> Result<Option<Vec<u8>>> {
        Ok(self.unmined.get(txn, tx_hash.as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn delete_raw_unmined(&self, txn: &mut RwTxn, tx_hash: &TxHash) -> Result<()> {
        self.unmined.delete(txn, tx_hash.as_bytes())?;
        Ok(())
    }

    pub fn put_raw_unmined_credit(&self, txn: &mut RwTxn, k: &[u8], v: &[u8]) -> Result<()> {
        self.unmined_credits.put(txn, k, v)?;
        Ok(())
    }

    pub fn exists_raw_unmined_credit(&self, txn: &RoTxn, k: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.unmined_credits.get(txn, k)?.map(|v| v.to_vec()))
    }

    pub fn delete_raw_unmined_credit(&self, txn: &mut RwTxn, k: &[u8]) -> Result<()> {
        self.unmined_credits.delete(txn, k)?;
        Ok(())
    }

    /// Record that `outpoint` is consumed by the unmined transaction
    /// `spender`.
    pub fn put_raw_unmined_input(
        &self,
        txn: &mut RwTxn,
        outpoint_key: &[u8],
        spender: &TxHash,
    ) -> Result<()> {
        self.unmined_inputs
            .put(txn, outpoint_key, spender.as_bytes())?;
        Ok(())
    }

    /// The hash of the unmined transaction spending `outpoint_key`, if any.
    pub fn exists_raw_unmined_input(&self, txn: &RoTxn, outpoint_key: &[u8]) -> Result<Option<TxHash>> {
        match self.unmined_inputs.get(txn, outpoint_key)? {
            Some(v) if v.len() >= 32 => Ok(Some(TxHash::new(read_hash32(v)))),
            Some(v) => Err(short_read("mi", "unmined input", 32, v.len())),
            None => Ok(None),
        }
    }

    pub fn delete_raw_unmined_input(&self, txn: &mut RwTxn, outpoint_key: &[u8]) -> Result<()> {
        self.unmined_inputs.delete(txn, outpoint_key)?;
        Ok(())
    }

    /// Iterate every unmined transaction.
    pub fn unmined_txs<'t>(&self, txn: &'t RoTxn) -> Result<UnminedIter<'t>> {
        Ok(UnminedIter {
            inner: self.unmined.iter(txn)?,
        })
    }

    /// Iterate the unmined credits of one transaction in output order.
    pub fn unmined_credits_for_tx<'t>(
        &self,
        txn: &'t RoTxn,
        tx_hash: &TxHash,
    ) -> Result<UnminedCreditIter<'t>> {
        Ok(UnminedCreditIter {
            inner: prefix_range(&self.unmined_credits, txn, tx_hash.as_bytes())?,
        })
    }
}

/// Cursor over every unmined transaction.
pub struct UnminedIter<'t> {
    inner: RoIter<'t, Bytes, Bytes>,
}

impl Iterator for UnminedIter<'_> {
    type Item = Result<TxRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => {
                let decode = || -> Result<TxRecord> {
                    let hash = read_raw_unmined_hash(k)?;
                    read_raw_tx_record(&hash, v)
                };
                Some(decode())
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Cursor over the unmined credits of a single transaction.
pub struct UnminedCreditIter<'t> {
    inner: RoRange<'t, Bytes, Bytes>,
}

impl Iterator for UnminedCreditIter<'_> {
    type Item = Result<UnminedCreditRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => Some(read_unmined_credit_record(k, v)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakewallet_types::tx::{OP_NOP10, OP_SSGEN};

    #[test]
    fn unmined_credit_value_fields() {
        let v = value_unmined_credit(
            Amount::new(10_000_000),
            false,
            OP_SSGEN,
            true,
            ScriptType::StakePubKeyHash,
            14,
            25,
            0,
        );
        assert_eq!(v.len(), UNMINED_VALUE_SIZE);
        assert_eq!(
            fetch_raw_unmined_credit_amount(&v).expect("amount"),
            Amount::new(10_000_000)
        );
        let (_, change) = fetch_raw_unmined_credit_amount_change(&v).expect("change");
        assert!(!change);
        assert_eq!(
            fetch_raw_unmined_credit_tag_opcode(&v).expect("opcode"),
            OP_SSGEN
        );
        assert!(fetch_raw_unmined_credit_is_coinbase(&v).expect("coinbase"));
        assert_eq!(
            fetch_raw_unmined_credit_script_type(&v),
            ScriptType::StakePubKeyHash
        );
        assert_eq!(fetch_raw_unmined_credit_script_offset(&v), 14);
        assert_eq!(fetch_raw_unmined_credit_script_length(&v), 25);
        assert_eq!(fetch_raw_unmined_credit_account(&v).expect("account"), 0);
    }

    #[test]
    fn legacy_nine_byte_value_still_reads() {
        let mut v = [0u8; UNMINED_VALUE_SIZE_LEGACY];
        v[..8].copy_from_slice(&77u64.to_be_bytes());
        v[8] = FLAG_CHANGE;

        let (amount, change) = fetch_raw_unmined_credit_amount_change(&v).expect("read");
        assert_eq!(amount, Amount::new(77));
        assert!(change);
        assert_eq!(
            fetch_raw_unmined_credit_tag_opcode(&v).expect("opcode"),
            OP_NOP10
        );
        // Script info was never recorded in version 1.
        assert_eq!(
            fetch_raw_unmined_credit_script_type(&v),
            ScriptType::Nonexisting
        );
        assert_eq!(fetch_raw_unmined_credit_script_offset(&v), 0);
        assert_eq!(fetch_raw_unmined_credit_script_length(&v), 0);
        assert!(fetch_raw_unmined_credit_account(&v).is_err());
    }

    #[test]
    fn short_values_error() {
        assert!(fetch_raw_unmined_credit_amount(&[0u8; 8]).is_err());
        assert!(read_raw_unmined_hash(&[0u8; 31]).is_err());
        assert!(fetch_raw_unmined_credit_index(&[0u8; 35]).is_err());
    }
}
