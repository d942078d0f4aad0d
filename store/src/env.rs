//! LMDB environment setup and store lifecycle.
//!
//! The store occupies one LMDB environment. The namespace root scalars
//! (`vers`, `date`, `bal`) live in the `root` database; the eleven record
//! buckets map to eleven further named databases. All mutations happen
//! inside a single write transaction obtained through [`WalletStore::update`]
//! and become visible atomically at commit.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoRange, RoTxn, RwTxn};

use stakewallet_types::{Amount, Timestamp};

use crate::encoding::increment_prefix;
use crate::error::{short_read, Error, Result};
use crate::migration;

/// The most recent store schema version.
pub const LATEST_VERSION: u32 = 2;

// Named databases inside the store's environment.
pub(crate) const DB_ROOT: &str = "root";
pub(crate) const DB_BLOCKS: &str = "b";
pub(crate) const DB_TX_RECORDS: &str = "t";
pub(crate) const DB_CREDITS: &str = "c";
pub(crate) const DB_UNSPENT: &str = "u";
pub(crate) const DB_DEBITS: &str = "d";
pub(crate) const DB_UNMINED: &str = "m";
pub(crate) const DB_UNMINED_CREDITS: &str = "mc";
pub(crate) const DB_UNMINED_INPUTS: &str = "mi";
pub(crate) const DB_SCRIPTS: &str = "sc";
pub(crate) const DB_MULTISIG: &str = "ms";
pub(crate) const DB_MULTISIG_UNSPENT: &str = "mu";

const ALL_DBS: &[&str] = &[
    DB_ROOT,
    DB_BLOCKS,
    DB_TX_RECORDS,
    DB_CREDITS,
    DB_UNSPENT,
    DB_DEBITS,
    DB_UNMINED,
    DB_UNMINED_CREDITS,
    DB_UNMINED_INPUTS,
    DB_SCRIPTS,
    DB_MULTISIG,
    DB_MULTISIG_UNSPENT,
];

// Root database keys.
pub(crate) const ROOT_VERSION: &[u8] = b"vers";
pub(crate) const ROOT_CREATE_DATE: &[u8] = b"date";
pub(crate) const ROOT_MINED_BALANCE: &[u8] = b"bal";

/// Environment tuning knobs.
pub struct StoreOptions {
    /// Maximum size of the LMDB memory map in bytes.
    pub map_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            map_size: 256 * 1024 * 1024,
        }
    }
}

/// The wallet's durable transaction store.
pub struct WalletStore {
    env: Arc<Env>,
    pub(crate) root: Database<Bytes, Bytes>,
    pub(crate) blocks: Database<Bytes, Bytes>,
    pub(crate) tx_records: Database<Bytes, Bytes>,
    pub(crate) credits: Database<Bytes, Bytes>,
    pub(crate) unspent: Database<Bytes, Bytes>,
    pub(crate) debits: Database<Bytes, Bytes>,
    pub(crate) unmined: Database<Bytes, Bytes>,
    pub(crate) unmined_credits: Database<Bytes, Bytes>,
    pub(crate) unmined_inputs: Database<Bytes, Bytes>,
    pub(crate) scripts: Database<Bytes, Bytes>,
    pub(crate) multisig: Database<Bytes, Bytes>,
    pub(crate) multisig_unspent: Database<Bytes, Bytes>,
}

fn open_env(path: &Path, options: &StoreOptions) -> Result<Env> {
    std::fs::create_dir_all(path).map_err(|e| {
        Error::Database(format!("failed to create {}: {e}", path.display()))
    })?;
    let env = unsafe {
        EnvOpenOptions::new()
            .max_dbs(ALL_DBS.len() as u32)
            .map_size(options.map_size)
            .open(path)?
    };
    Ok(env)
}

fn open_db(env: &Env, rtxn: &RoTxn, name: &str) -> Result<Database<Bytes, Bytes>> {
    env.open_database(rtxn, Some(name))?
        .ok_or_else(|| Error::Database(format!("missing database '{name}'")))
}

impl WalletStore {
    /// Create a new store at `path` with the latest schema version.
    ///
    /// The namespace must be completely empty; otherwise
    /// [`Error::AlreadyExists`] is returned. The version, creation date,
    /// zero balance, and every bucket are written in one transaction, so a
    /// failed creation leaves nothing behind.
    pub fn create(path: &Path, options: &StoreOptions) -> Result<Self> {
        let env = open_env(path, options)?;

        {
            let rtxn = env.read_txn()?;
            // The unnamed database lists every named database in the
            // environment; any entry means the namespace is occupied.
            if let Some(main) = env.open_database::<Bytes, Bytes>(&rtxn, None)? {
                if main.len(&rtxn)? != 0 {
                    return Err(Error::AlreadyExists);
                }
            }
        }

        let mut wtxn = env.write_txn()?;
        let root = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_ROOT))?;
        let blocks = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_BLOCKS))?;
        let tx_records = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_TX_RECORDS))?;
        let credits = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_CREDITS))?;
        let unspent = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_UNSPENT))?;
        let debits = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_DEBITS))?;
        let unmined = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_UNMINED))?;
        let unmined_credits =
            env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_UNMINED_CREDITS))?;
        let unmined_inputs =
            env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_UNMINED_INPUTS))?;
        let scripts = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_SCRIPTS))?;
        let multisig = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_MULTISIG))?;
        let multisig_unspent =
            env.create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_MULTISIG_UNSPENT))?;

        root.put(&mut wtxn, ROOT_VERSION, &LATEST_VERSION.to_be_bytes())?;
        root.put(
            &mut wtxn,
            ROOT_CREATE_DATE,
            &Timestamp::now().as_secs().to_be_bytes(),
        )?;
        root.put(&mut wtxn, ROOT_MINED_BALANCE, &0u64.to_be_bytes())?;
        wtxn.commit()?;

        tracing::info!(
            path = %path.display(),
            version = LATEST_VERSION,
            "created transaction store"
        );

        Ok(Self {
            env: Arc::new(env),
            root,
            blocks,
            tx_records,
            credits,
            unspent,
            debits,
            unmined,
            unmined_credits,
            unmined_inputs,
            scripts,
            multisig,
            multisig_unspent,
        })
    }

    /// Open an existing store at `path`, upgrading older schema versions.
    ///
    /// Returns [`Error::NoExists`] if no store was ever created here and
    /// [`Error::UnknownVersion`] if the store was written by newer software.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self> {
        let env = open_env(path, options)?;

        let version = {
            let rtxn = env.read_txn()?;
            let root = match env.open_database::<Bytes, Bytes>(&rtxn, Some(DB_ROOT))? {
                Some(db) => db,
                None => return Err(Error::NoExists),
            };
            match root.get(&rtxn, ROOT_VERSION)? {
                Some(v) if v.len() == 4 => u32::from_be_bytes([v[0], v[1], v[2], v[3]]),
                _ => return Err(Error::NoExists),
            }
        };

        if version > LATEST_VERSION {
            return Err(Error::UnknownVersion {
                version,
                latest: LATEST_VERSION,
            });
        }
        if version < LATEST_VERSION {
            migration::run_upgrades(&env, version)?;
        }

        let rtxn = env.read_txn()?;
        let root = open_db(&env, &rtxn, DB_ROOT)?;
        let blocks = open_db(&env, &rtxn, DB_BLOCKS)?;
        let tx_records = open_db(&env, &rtxn, DB_TX_RECORDS)?;
        let credits = open_db(&env, &rtxn, DB_CREDITS)?;
        let unspent = open_db(&env, &rtxn, DB_UNSPENT)?;
        let debits = open_db(&env, &rtxn, DB_DEBITS)?;
        let unmined = open_db(&env, &rtxn, DB_UNMINED)?;
        let unmined_credits = open_db(&env, &rtxn, DB_UNMINED_CREDITS)?;
        let unmined_inputs = open_db(&env, &rtxn, DB_UNMINED_INPUTS)?;
        let scripts = open_db(&env, &rtxn, DB_SCRIPTS)?;
        let multisig = open_db(&env, &rtxn, DB_MULTISIG)?;
        let multisig_unspent = open_db(&env, &rtxn, DB_MULTISIG_UNSPENT)?;
        drop(rtxn);

        tracing::debug!(path = %path.display(), version, "opened transaction store");

        Ok(Self {
            env: Arc::new(env),
            root,
            blocks,
            tx_records,
            credits,
            unspent,
            debits,
            unmined,
            unmined_credits,
            unmined_inputs,
            scripts,
            multisig,
            multisig_unspent,
        })
    }

    /// Run `f` inside a write transaction. The transaction commits when `f`
    /// returns `Ok` and aborts when it returns `Err`; the abort itself
    /// cannot fail, and a failed commit surfaces as [`Error::Database`].
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut RwTxn) -> Result<T>,
    {
        let mut wtxn = self.env.write_txn()?;
        let out = f(&mut wtxn)?;
        wtxn.commit()?;
        Ok(out)
    }

    /// Run `f` inside a read transaction. The view never blocks writers and
    /// never observes uncommitted writes.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&RoTxn) -> Result<T>,
    {
        let rtxn = self.env.read_txn()?;
        f(&rtxn)
    }

    /// The stored schema version.
    pub fn version(&self, txn: &RoTxn) -> Result<u32> {
        match self.root.get(txn, ROOT_VERSION)? {
            Some(v) if v.len() == 4 => Ok(u32::from_be_bytes([v[0], v[1], v[2], v[3]])),
            Some(v) => Err(short_read("root", "version", 4, v.len())),
            None => Err(Error::NoExists),
        }
    }

    /// The store's creation time.
    pub fn created_at(&self, txn: &RoTxn) -> Result<Timestamp> {
        match self.root.get(txn, ROOT_CREATE_DATE)? {
            Some(v) if v.len() == 8 => Ok(Timestamp::new(crate::encoding::read_u64(v))),
            Some(v) => Err(short_read("root", "creation date", 8, v.len())),
            None => Err(short_read("root", "creation date", 8, 0)),
        }
    }

    /// The running total of all unspent mined credit amounts.
    pub fn fetch_mined_balance(&self, txn: &RoTxn) -> Result<Amount> {
        match self.root.get(txn, ROOT_MINED_BALANCE)? {
            Some(v) if v.len() == 8 => Ok(Amount::new(crate::encoding::read_u64(v))),
            Some(v) => Err(short_read("root", "mined balance", 8, v.len())),
            None => Err(short_read("root", "mined balance", 8, 0)),
        }
    }

    /// Overwrite the mined balance. Only the credit-lifecycle operations
    /// may call this; any other mutation desynchronizes the balance.
    pub fn put_mined_balance(&self, txn: &mut RwTxn, amount: Amount) -> Result<()> {
        self.root
            .put(txn, ROOT_MINED_BALANCE, &amount.to_atoms().to_be_bytes())?;
        Ok(())
    }
}

/// Range-scan a database for every key sharing `prefix`, in key order.
pub(crate) fn prefix_range<'t>(
    db: &Database<Bytes, Bytes>,
    txn: &'t RoTxn,
    prefix: &[u8],
) -> Result<RoRange<'t, Bytes, Bytes>> {
    let mut upper = prefix.to_vec();
    increment_prefix(&mut upper);
    if upper.is_empty() {
        let bounds = (Bound::Included(prefix), Bound::Unbounded);
        Ok(db.range(txn, &bounds)?)
    } else {
        let bounds = (Bound::Included(prefix), Bound::Excluded(upper.as_slice()));
        Ok(db.range(txn, &bounds)?)
    }
}
