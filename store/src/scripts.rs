//! Redeem script storage (`sc` bucket).
//!
//! Scripts are stored verbatim, keyed by their RIPEMD-160 hash. Re-putting
//! a script is idempotent: an identical key always carries identical bytes.

use heed::{RoTxn, RwTxn};
use ripemd::{Digest, Ripemd160};

use crate::env::WalletStore;
use crate::error::Result;

/// Size of a script-store key.
pub const SCRIPT_HASH_SIZE: usize = 20;

/// The database key for a script: RIPEMD-160 over the raw script bytes.
pub fn script_hash(script: &[u8]) -> [u8; SCRIPT_HASH_SIZE] {
    let mut hasher = Ripemd160::new();
    hasher.update(script);
    hasher.finalize().into()
}

impl WalletStore {
    pub fn put_script(&self, txn: &mut RwTxn, script: &[u8]) -> Result<()> {
        let k = script_hash(script);
        self.scripts.put(txn, &k, script)?;
        Ok(())
    }

    /// Fetch a script by hash. The returned bytes are a copy; engine views
    /// are only valid for the transaction lifetime and must not escape it.
    pub fn fetch_script(
        &self,
        txn: &RoTxn,
        hash: &[u8; SCRIPT_HASH_SIZE],
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.scripts.get(txn, hash)?.map(|v| v.to_vec()))
    }

    pub fn exists_script(&self, txn: &RoTxn, hash: &[u8; SCRIPT_HASH_SIZE]) -> Result<bool> {
        Ok(self.scripts.get(txn, hash)?.is_some())
    }

    pub fn delete_script(&self, txn: &mut RwTxn, hash: &[u8; SCRIPT_HASH_SIZE]) -> Result<()> {
        self.scripts.delete(txn, hash)?;
        Ok(())
    }
}
