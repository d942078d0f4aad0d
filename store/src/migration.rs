//! Schema upgrades.
//!
//! The stored version only moves forward. Each upgrade step runs in its own
//! write transaction and is idempotent, so a crash between steps resumes
//! cleanly on the next open.

use heed::types::Bytes;
use heed::{Env, RwTxn};

use crate::env::{DB_ROOT, LATEST_VERSION, ROOT_VERSION};
use crate::error::{Error, Result};

pub(crate) fn run_upgrades(env: &Env, from: u32) -> Result<()> {
    for version in from..LATEST_VERSION {
        tracing::info!(from = version, to = version + 1, "upgrading transaction store");
        let mut wtxn = env.write_txn()?;
        upgrade_step(&mut wtxn, version)?;

        let root = env
            .open_database::<Bytes, Bytes>(&wtxn, Some(DB_ROOT))?
            .ok_or(Error::NoExists)?;
        root.put(&mut wtxn, ROOT_VERSION, &(version + 1).to_be_bytes())?;
        wtxn.commit()?;
    }
    Ok(())
}

fn upgrade_step(_txn: &mut RwTxn, from: u32) -> Result<()> {
    match from {
        // Version 2 extended unmined credit values with the script locator.
        // Readers accept the short version 1 form, so no records need to be
        // rewritten.
        1 => Ok(()),
        v => Err(Error::Database(format!(
            "unknown schema upgrade from version {v}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_upgrade_is_error() {
        let mut dummy = heed::EnvOpenOptions::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let env = unsafe { dummy.max_dbs(1).map_size(1 << 20).open(dir.path()) }.expect("env");
        let mut wtxn = env.write_txn().expect("write txn");
        assert!(upgrade_step(&mut wtxn, 99).is_err());
        assert!(upgrade_step(&mut wtxn, 1).is_ok());
    }
}
