//! Composed mutations that keep the balance, the unspent index, and the
//! unconfirmed mirror in lockstep.
//!
//! These are the only code paths that touch the mined balance. Every
//! operation here expects to run inside one [`WalletStore::update`]
//! transaction so that all affected buckets change atomically.

use heed::RwTxn;

use stakewallet_types::tx::stake_opcode;
use stakewallet_types::{Amount, BlockMeta, OutPoint, TxKind};

use crate::blocks::read_raw_block_record;
use crate::credits::{Credit, IndexedIncidence};
use crate::encoding::{canonical_outpoint, pack_height, CreditKey, ScriptType};
use crate::env::WalletStore;
use crate::error::{Error, Result};
use crate::txrecords::{value_tx_record, TxRecord};
use crate::unmined::value_unmined_credit;

/// Pick the stored script classification for an output script. Full script
/// analysis belongs to the address manager; the store only distinguishes
/// stake-tagged scripts.
fn classify_script(pk_script: &[u8]) -> ScriptType {
    if stake_opcode(pk_script) != stakewallet_types::tx::OP_NOP10 {
        ScriptType::StakePubKeyHash
    } else {
        ScriptType::Unspecified
    }
}

impl WalletStore {
    /// Record a mined transaction: its `t` record plus membership in the
    /// block record, creating or extending the latter as needed.
    pub fn insert_mined_tx(&self, txn: &mut RwTxn, rec: &TxRecord, meta: &BlockMeta) -> Result<()> {
        self.put_tx_record(txn, rec, &meta.block)?;

        match self.exists_block_record(txn, meta.block.height)? {
            Some(v) => {
                let block_rec = read_raw_block_record(&pack_height(meta.block.height), &v)?;
                if !block_rec.tx_hashes.contains(&rec.hash) {
                    self.append_block_tx(txn, meta.block.height, &rec.hash)?;
                }
                Ok(())
            }
            None => self.put_block_record(txn, meta, &rec.hash),
        }
    }

    /// Record output `index` of a mined transaction as a new unspent
    /// credit, updating the unspent index and the mined balance. Returns
    /// `false` without changes when the credit is already recorded.
    pub fn add_credit(
        &self,
        txn: &mut RwTxn,
        rec: &TxRecord,
        meta: &BlockMeta,
        index: u32,
        change: bool,
        account: u32,
    ) -> Result<bool> {
        let k = CreditKey::new(&rec.hash, index, &meta.block);
        if self.exists_raw_credit(txn, &k)?.is_some() {
            return Ok(false);
        }

        let output = rec
            .tx
            .outputs
            .get(index as usize)
            .ok_or_else(|| Error::Input(format!("credit index {index} out of range")))?;

        // The stored offset is measured inside the tx record value and so
        // includes the received-time prefix.
        let scr_loc = rec
            .tx
            .pk_script_offset(index)
            .map(|off| off + 8)
            .unwrap_or(0) as u32;
        let scr_len = output.pk_script.len() as u32;

        let cred = Credit {
            outpoint: OutPoint::new(rec.hash, index),
            block: meta.block,
            amount: output.amount,
            change,
            op_code: stake_opcode(&output.pk_script),
            is_coinbase: rec.kind == TxKind::Generation,
        };
        self.put_unspent_credit(
            txn,
            &cred,
            classify_script(&output.pk_script),
            scr_loc,
            scr_len,
            account,
        )?;
        self.put_unspent(txn, &cred.outpoint, &meta.block)?;

        let balance = self.fetch_mined_balance(txn)?;
        let balance = balance
            .checked_add(output.amount)
            .ok_or_else(|| Error::Data("mined balance overflow".to_string()))?;
        self.put_mined_balance(txn, balance)?;
        Ok(true)
    }

    /// Record input `input_index` of a mined transaction spending the
    /// credit at `cred_key`: the credit is marked spent with a
    /// back-reference to the new debit, the unspent-index entry is removed,
    /// and the amount leaves the mined balance. Returns the debited amount.
    pub fn add_debit(
        &self,
        txn: &mut RwTxn,
        rec: &TxRecord,
        meta: &BlockMeta,
        input_index: u32,
        cred_key: &CreditKey,
    ) -> Result<Amount> {
        let spender = IndexedIncidence {
            tx_hash: rec.hash,
            block: meta.block,
            index: input_index,
        };
        let amount = self.spend_credit(txn, cred_key, &spender)?;

        let outpoint_key = canonical_outpoint(&cred_key.tx_hash(), cred_key.index());
        self.delete_raw_unspent(txn, &outpoint_key)?;
        self.put_debit(txn, &rec.hash, input_index, amount, &meta.block, cred_key)?;

        let balance = self.fetch_mined_balance(txn)?;
        let balance = balance
            .checked_sub(amount)
            .ok_or_else(|| Error::Data("mined balance underflow".to_string()))?;
        self.put_mined_balance(txn, balance)?;
        Ok(amount)
    }

    /// Reverse a mined debit: delete the debit record, clear the credit's
    /// spent flag, and return the amount to the unspent index and balance.
    pub fn remove_debit(
        &self,
        txn: &mut RwTxn,
        rec: &TxRecord,
        meta: &BlockMeta,
        input_index: u32,
    ) -> Result<Option<Amount>> {
        let (debit_key, cred_key) =
            match self.exists_debit(txn, &rec.hash, input_index, &meta.block)? {
                Some(found) => found,
                None => return Ok(None),
            };
        self.delete_raw_debit(txn, &debit_key)?;

        let amount = match self.unspend_credit(txn, &cred_key)? {
            Some(amount) => amount,
            None => return Ok(None),
        };
        let outpoint_key = canonical_outpoint(&cred_key.tx_hash(), cred_key.index());
        self.put_raw_unspent(txn, &outpoint_key, &cred_key.unspent_value())?;

        let balance = self.fetch_mined_balance(txn)?;
        let balance = balance
            .checked_add(amount)
            .ok_or_else(|| Error::Data("mined balance overflow".to_string()))?;
        self.put_mined_balance(txn, balance)?;
        Ok(Some(amount))
    }

    /// Add a transaction to the unconfirmed mirror: its `m` record plus one
    /// `mi` entry per input. The mined balance does not change.
    pub fn insert_unmined_tx(&self, txn: &mut RwTxn, rec: &TxRecord) -> Result<()> {
        let v = value_tx_record(rec);
        self.put_raw_unmined(txn, &rec.hash, &v)?;
        for input in &rec.tx.inputs {
            let k = canonical_outpoint(&input.prev_hash, input.prev_index);
            self.put_raw_unmined_input(txn, &k, &rec.hash)?;
        }
        Ok(())
    }

    /// Record output `index` of an unmined transaction as an unconfirmed
    /// credit.
    pub fn add_unmined_credit(
        &self,
        txn: &mut RwTxn,
        rec: &TxRecord,
        index: u32,
        change: bool,
        account: u32,
    ) -> Result<()> {
        let output = rec
            .tx
            .outputs
            .get(index as usize)
            .ok_or_else(|| Error::Input(format!("credit index {index} out of range")))?;

        let scr_loc = rec
            .tx
            .pk_script_offset(index)
            .map(|off| off + 8)
            .unwrap_or(0) as u32;
        let v = value_unmined_credit(
            output.amount,
            change,
            stake_opcode(&output.pk_script),
            rec.kind == TxKind::Generation,
            classify_script(&output.pk_script),
            scr_loc,
            output.pk_script.len() as u32,
            account,
        );
        let k = canonical_outpoint(&rec.hash, index);
        self.put_raw_unmined_credit(txn, &k, &v)
    }

    /// Remove every trace of a transaction from the unconfirmed mirror: its
    /// `m` record, its `mc` credits, and the `mi` entries of its inputs.
    pub fn remove_unmined_tx(&self, txn: &mut RwTxn, rec: &TxRecord) -> Result<()> {
        for input in &rec.tx.inputs {
            let k = canonical_outpoint(&input.prev_hash, input.prev_index);
            self.delete_raw_unmined_input(txn, &k)?;
        }
        for index in 0..rec.tx.outputs.len() as u32 {
            let k = canonical_outpoint(&rec.hash, index);
            self.delete_raw_unmined_credit(txn, &k)?;
        }
        self.delete_raw_unmined(txn, &rec.hash)
    }

    /// Transition an unmined transaction into `meta`'s block: the mempool
    /// mirror entries disappear and the mined record and block membership
    /// appear, all in this transaction. Mined credits must be re-added by
    /// the caller through [`WalletStore::add_credit`].
    pub fn mine_unmined_tx(&self, txn: &mut RwTxn, rec: &TxRecord, meta: &BlockMeta) -> Result<()> {
        self.remove_unmined_tx(txn, rec)?;
        self.insert_mined_tx(txn, rec, meta)
    }
}
