//! Credit records (`c` bucket) and the unspent index (`u` bucket).
//!
//! A credit is a transaction output belonging to the wallet. Keys extend
//! the transaction record key with the output index, so all credits of one
//! mined transaction form a prefix range. The 94-byte value is:
//!
//! ```text
//! [0:8]   Amount (8 bytes)
//! [8]     Flags: [0] spent, [1] change, [2:5] condensed stake opcode,
//!         [5] coinbase
//! [9:81]  Debit key of the spender (valid only while the spent flag is
//!         set by a mined debit)
//! [81]    Script type, top bit = account recorded
//! [82:86] Script offset inside the tx record value
//! [86:90] Script length
//! [90:94] Account
//! ```
//!
//! The unspent index holds one entry per unspent mined credit, keyed by the
//! canonical outpoint. Its 36-byte value is only the block position; key
//! and value together compose the full credit key.

use heed::types::Bytes;
use heed::{RoIter, RoRange, RoTxn, RwTxn};

use stakewallet_types::{Amount, Block, BlockHash, OutPoint, TxHash};

use crate::encoding::{
    canonical_outpoint, read_canonical_outpoint, read_hash32, read_u32, read_u64, CreditKey,
    ScriptType, TxRecordKey, ACCOUNT_EXISTS_MASK, CREDIT_KEY_SIZE, FLAG_CHANGE, FLAG_COINBASE,
    FLAG_SPENT, OUTPOINT_SIZE,
};
use crate::env::{prefix_range, WalletStore};
use crate::error::{short_read, Error, Result};

/// Total size of a credit value in bytes.
pub const CREDIT_VALUE_SIZE: usize = 94;

/// A new credit to be recorded, always created unspent.
#[derive(Clone, Debug)]
pub struct Credit {
    pub outpoint: OutPoint,
    pub block: Block,
    pub amount: Amount,
    pub change: bool,
    pub op_code: u8,
    pub is_coinbase: bool,
}

/// Identifies one input of a mined transaction; stored as the spender
/// back-reference on spent credits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexedIncidence {
    pub tx_hash: TxHash,
    pub block: Block,
    pub index: u32,
}

/// A decoded credit as yielded by [`CreditIter`]. `spent` reflects only the
/// mined flag bit; a credit consumed by an unmined input still reads as
/// unspent here and must additionally be checked against the unmined-inputs
/// bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreditRecord {
    pub index: u32,
    pub amount: Amount,
    pub spent: bool,
    pub change: bool,
    pub op_code: u8,
    pub is_coinbase: bool,
}

/// Serialize the value for a new, unspent credit. Credits are only marked
/// spent later, in place, so there is no constructor for spent values.
pub fn value_unspent_credit(
    cred: &Credit,
    script_type: ScriptType,
    scr_loc: u32,
    scr_len: u32,
    account: u32,
) -> [u8; CREDIT_VALUE_SIZE] {
    let mut v = [0u8; CREDIT_VALUE_SIZE];
    v[..8].copy_from_slice(&cred.amount.to_atoms().to_be_bytes());
    v[8] = crate::encoding::condense_opcode(cred.op_code);
    if cred.change {
        v[8] |= FLAG_CHANGE;
    }
    if cred.is_coinbase {
        v[8] |= FLAG_COINBASE;
    }

    v[81] = script_type as u8 | ACCOUNT_EXISTS_MASK;
    v[82..86].copy_from_slice(&scr_loc.to_be_bytes());
    v[86..90].copy_from_slice(&scr_len.to_be_bytes());
    v[90..94].copy_from_slice(&account.to_be_bytes());
    v
}

pub fn fetch_raw_credit_amount(v: &[u8]) -> Result<Amount> {
    if v.len() < 9 {
        return Err(short_read("c", "raw credit amount", 9, v.len()));
    }
    Ok(Amount::new(read_u64(&v[..8])))
}

/// The amount of a credit and whether its mined spent flag is set.
pub fn fetch_raw_credit_amount_spent(v: &[u8]) -> Result<(Amount, bool)> {
    if v.len() < 9 {
        return Err(short_read("c", "raw credit amount spent", 9, v.len()));
    }
    Ok((Amount::new(read_u64(&v[..8])), v[8] & FLAG_SPENT != 0))
}

pub fn fetch_raw_credit_amount_change(v: &[u8]) -> Result<(Amount, bool)> {
    if v.len() < 9 {
        return Err(short_read("c", "raw credit amount change", 9, v.len()));
    }
    Ok((Amount::new(read_u64(&v[..8])), v[8] & FLAG_CHANGE != 0))
}

/// The raw stake opcode condensed into the flag byte.
pub fn fetch_raw_credit_tag_opcode(v: &[u8]) -> Result<u8> {
    if v.len() < 9 {
        return Err(short_read("c", "raw credit opcode", 9, v.len()));
    }
    Ok(crate::encoding::expand_opcode(v[8]))
}

pub fn fetch_raw_credit_is_coinbase(v: &[u8]) -> Result<bool> {
    if v.len() < 9 {
        return Err(short_read("c", "raw credit coinbase flag", 9, v.len()));
    }
    Ok(v[8] & FLAG_COINBASE != 0)
}

/// The spender back-reference of a spent credit, or `None` while the credit
/// is unspent (the field bytes are then undefined).
pub fn fetch_raw_credit_spender(v: &[u8]) -> Result<Option<IndexedIncidence>> {
    if v.len() < 81 {
        return Err(short_read("c", "raw credit spender", 81, v.len()));
    }
    if v[8] & FLAG_SPENT == 0 {
        return Ok(None);
    }
    Ok(Some(IndexedIncidence {
        tx_hash: TxHash::new(read_hash32(&v[9..41])),
        block: Block::new(BlockHash::new(read_hash32(&v[45..77])), read_u32(&v[41..45])),
        index: read_u32(&v[77..81]),
    }))
}

/// Script classification of the credit's pk script. Short (legacy) values
/// report [`ScriptType::Nonexisting`].
pub fn fetch_raw_credit_script_type(v: &[u8]) -> ScriptType {
    if v.len() < CREDIT_VALUE_SIZE {
        return ScriptType::Nonexisting;
    }
    ScriptType::from_byte(v[81] & !ACCOUNT_EXISTS_MASK)
}

/// Offset of the pk script inside the tx record value, or zero when the
/// script location was never stored.
pub fn fetch_raw_credit_script_offset(v: &[u8]) -> u32 {
    if v.len() < CREDIT_VALUE_SIZE {
        return 0;
    }
    read_u32(&v[82..86])
}

pub fn fetch_raw_credit_script_length(v: &[u8]) -> u32 {
    if v.len() < CREDIT_VALUE_SIZE {
        return 0;
    }
    read_u32(&v[86..90])
}

/// The account the credit was received on. `ValueNoExists` when the record
/// predates account tracking.
pub fn fetch_raw_credit_account(v: &[u8]) -> Result<u32> {
    if v.len() < CREDIT_VALUE_SIZE {
        return Err(short_read(
            "c",
            "raw credit account",
            CREDIT_VALUE_SIZE,
            v.len(),
        ));
    }
    if v[81] & ACCOUNT_EXISTS_MASK != ACCOUNT_EXISTS_MASK {
        return Err(Error::ValueNoExists("credit account"));
    }
    Ok(read_u32(&v[90..94]))
}

fn read_credit_record(k: &[u8], v: &[u8]) -> Result<CreditRecord> {
    if k.len() < CREDIT_KEY_SIZE {
        return Err(crate::error::short_key(
            "c",
            "credit iterator key",
            CREDIT_KEY_SIZE,
            k.len(),
        ));
    }
    let (amount, spent) = fetch_raw_credit_amount_spent(v)?;
    Ok(CreditRecord {
        index: read_u32(&k[68..72]),
        amount,
        spent,
        change: v[8] & FLAG_CHANGE != 0,
        op_code: crate::encoding::expand_opcode(v[8]),
        is_coinbase: v[8] & FLAG_COINBASE != 0,
    })
}

/// Serialize the unspent-index value: `height[4] ‖ block_hash[32]`.
pub fn value_unspent(block: &Block) -> [u8; OUTPOINT_SIZE] {
    let mut v = [0u8; OUTPOINT_SIZE];
    v[..4].copy_from_slice(&block.height.to_be_bytes());
    v[4..36].copy_from_slice(block.hash.as_bytes());
    v
}

/// Decode the block position from an unspent-index value.
pub fn read_unspent_block(v: &[u8]) -> Result<Block> {
    if v.len() < OUTPOINT_SIZE {
        return Err(short_read("u", "unspent value", OUTPOINT_SIZE, v.len()));
    }
    Ok(Block::new(
        BlockHash::new(read_hash32(&v[4..36])),
        read_u32(&v[..4]),
    ))
}

impl WalletStore {
    /// Record a new unspent credit. The caller adds the amount to the mined
    /// balance and inserts the matching unspent-index entry in the same
    /// transaction.
    pub fn put_unspent_credit(
        &self,
        txn: &mut RwTxn,
        cred: &Credit,
        script_type: ScriptType,
        scr_loc: u32,
        scr_len: u32,
        account: u32,
    ) -> Result<()> {
        let k = CreditKey::new(&cred.outpoint.hash, cred.outpoint.index, &cred.block);
        let v = value_unspent_credit(cred, script_type, scr_loc, scr_len, account);
        self.put_raw_credit(txn, &k, &v)
    }

    pub fn put_raw_credit(&self, txn: &mut RwTxn, k: &CreditKey, v: &[u8]) -> Result<()> {
        self.credits.put(txn, k.as_bytes(), v)?;
        Ok(())
    }

    /// Mark the credit at `k` as spent by the given mined input and return
    /// its amount. The caller subtracts the amount from the mined balance
    /// and deletes the matching unspent-index entry in the same
    /// transaction.
    pub fn spend_credit(
        &self,
        txn: &mut RwTxn,
        k: &CreditKey,
        spender: &IndexedIncidence,
    ) -> Result<Amount> {
        let old = self
            .credits
            .get(txn, k.as_bytes())?
            .ok_or_else(|| Error::Data("c: missing credit to mark spent".to_string()))?;
        if old.len() < 9 {
            return Err(short_read("c", "spend credit", 9, old.len()));
        }
        let mut v = [0u8; CREDIT_VALUE_SIZE];
        let n = old.len().min(CREDIT_VALUE_SIZE);
        v[..n].copy_from_slice(&old[..n]);

        v[8] |= FLAG_SPENT;
        v[9..41].copy_from_slice(spender.tx_hash.as_bytes());
        v[41..45].copy_from_slice(&spender.block.height.to_be_bytes());
        v[45..77].copy_from_slice(spender.block.hash.as_bytes());
        v[77..81].copy_from_slice(&spender.index.to_be_bytes());

        self.credits.put(txn, k.as_bytes(), &v)?;
        Ok(Amount::new(read_u64(&v[..8])))
    }

    /// Clear the spent flag of the credit at `k` and return its amount, or
    /// `None` if no credit exists there (not an error). The caller re-adds
    /// the amount to the mined balance and re-inserts the unspent-index
    /// entry.
    pub fn unspend_credit(&self, txn: &mut RwTxn, k: &CreditKey) -> Result<Option<Amount>> {
        let old = match self.credits.get(txn, k.as_bytes())? {
            Some(v) => v,
            None => return Ok(None),
        };
        if old.len() < 9 {
            return Err(short_read("c", "unspend credit", 9, old.len()));
        }
        let mut v = [0u8; CREDIT_VALUE_SIZE];
        let n = old.len().min(CREDIT_VALUE_SIZE);
        v[..n].copy_from_slice(&old[..n]);
        v[8] &= !FLAG_SPENT;

        self.credits.put(txn, k.as_bytes(), &v)?;
        Ok(Some(Amount::new(read_u64(&v[..8]))))
    }

    pub fn exists_credit(
        &self,
        txn: &RoTxn,
        tx_hash: &TxHash,
        index: u32,
        block: &Block,
    ) -> Result<Option<Vec<u8>>> {
        let k = CreditKey::new(tx_hash, index, block);
        self.exists_raw_credit(txn, &k)
    }

    pub fn exists_raw_credit(&self, txn: &RoTxn, k: &CreditKey) -> Result<Option<Vec<u8>>> {
        Ok(self.credits.get(txn, k.as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn delete_raw_credit(&self, txn: &mut RwTxn, k: &CreditKey) -> Result<()> {
        self.credits.delete(txn, k.as_bytes())?;
        Ok(())
    }

    /// Iterate the credits of one mined transaction in output order.
    pub fn credits_for_tx<'t>(
        &self,
        txn: &'t RoTxn,
        prefix: &TxRecordKey,
    ) -> Result<CreditIter<'t>> {
        Ok(CreditIter {
            inner: prefix_range(&self.credits, txn, prefix.as_bytes())?,
        })
    }

    /// Record an unspent-index entry for a credit mined in `block`.
    pub fn put_unspent(&self, txn: &mut RwTxn, outpoint: &OutPoint, block: &Block) -> Result<()> {
        let k = canonical_outpoint(&outpoint.hash, outpoint.index);
        let v = value_unspent(block);
        self.put_raw_unspent(txn, &k, &v)
    }

    pub fn put_raw_unspent(&self, txn: &mut RwTxn, k: &[u8], v: &[u8]) -> Result<()> {
        self.unspent.put(txn, k, v)?;
        Ok(())
    }

    /// Look up the unspent index for `outpoint`, composing the full credit
    /// key when an entry exists.
    pub fn exists_unspent(&self, txn: &RoTxn, outpoint: &OutPoint) -> Result<Option<CreditKey>> {
        let k = canonical_outpoint(&outpoint.hash, outpoint.index);
        self.exists_raw_unspent(txn, &k)
    }

    pub fn exists_raw_unspent(&self, txn: &RoTxn, k: &[u8]) -> Result<Option<CreditKey>> {
        if k.len() < OUTPOINT_SIZE {
            return Ok(None);
        }
        match self.unspent.get(txn, k)? {
            Some(v) if v.len() >= OUTPOINT_SIZE => Ok(Some(CreditKey::compose(k, v)?)),
            _ => Ok(None),
        }
    }

    pub fn delete_raw_unspent(&self, txn: &mut RwTxn, k: &[u8]) -> Result<()> {
        self.unspent.delete(txn, k)?;
        Ok(())
    }

    /// Iterate every unspent mined output.
    pub fn unspent_outputs<'t>(&self, txn: &'t RoTxn) -> Result<UnspentIter<'t>> {
        Ok(UnspentIter {
            inner: self.unspent.iter(txn)?,
        })
    }
}

/// Cursor over the credits of a single mined transaction.
pub struct CreditIter<'t> {
    inner: RoRange<'t, Bytes, Bytes>,
}

impl Iterator for CreditIter<'_> {
    type Item = Result<CreditRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => Some(read_credit_record(k, v)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Cursor over the entire unspent index.
pub struct UnspentIter<'t> {
    inner: RoIter<'t, Bytes, Bytes>,
}

impl Iterator for UnspentIter<'_> {
    type Item = Result<(OutPoint, Block)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((k, v)) => {
                let decode = || -> Result<(OutPoint, Block)> {
                    Ok((read_canonical_outpoint(k)?, read_unspent_block(v)?))
                };
                Some(decode())
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}
