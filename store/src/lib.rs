//! Durable transaction store for a stake-voting cryptocurrency wallet.
//!
//! The store is the wallet's index of every transaction that concerns it:
//! outputs it receives (credits), inputs that spend them (debits), their
//! confirmation state, the blocks that mined them, and the running mined
//! balance. It answers the questions a wallet asks on every block — the
//! spendable balance, the usable outputs, the still-unconfirmed
//! transactions, and the relevant blocks in height order — with nothing but
//! ordered prefix scans over composite big-endian keys.
//!
//! Twelve LMDB databases back the store:
//!
//! | database | contents |
//! |----------|----------|
//! | `root`   | schema version, creation date, mined balance |
//! | `b`      | height → block hash, time, vote bits, relevant tx hashes |
//! | `t`      | (tx hash, height, block hash) → received time, serialized tx |
//! | `c`      | credit records, keyed by tx record key + output index |
//! | `u`      | unspent mined outpoints → block position |
//! | `d`      | debit records, keyed by tx record key + input index |
//! | `m`      | unmined tx hash → received time, serialized tx |
//! | `mc`     | unmined credits, keyed by outpoint |
//! | `mi`     | outpoints consumed by unmined txs → spender hash |
//! | `sc`     | script hash → redeem script |
//! | `ms`     | multisig outputs, keyed by outpoint |
//! | `mu`     | unspent multisig outpoint set |
//!
//! All mutations run inside a single write transaction through
//! [`WalletStore::update`] and commit atomically; reads through
//! [`WalletStore::view`] never observe partial updates.

pub mod blocks;
pub mod credits;
pub mod debits;
pub mod encoding;
pub mod env;
pub mod error;
mod migration;
pub mod multisig;
pub mod scripts;
pub mod txrecords;
pub mod unmined;
pub mod wallet;

pub use blocks::{BlockIter, BlockRecord, RevBlockIter};
pub use credits::{
    Credit, CreditIter, CreditRecord, IndexedIncidence, UnspentIter, CREDIT_VALUE_SIZE,
};
pub use debits::{AllDebitsIter, DebitIter, DebitRecord, DEBIT_VALUE_SIZE};
pub use encoding::{
    canonical_outpoint, condense_opcode, expand_opcode, pack_amount, pack_height,
    read_canonical_outpoint, CreditKey, DebitKey, ScriptType, TxRecordKey, CREDIT_KEY_SIZE,
    OUTPOINT_SIZE, TX_RECORD_KEY_SIZE,
};
pub use env::{StoreOptions, WalletStore, LATEST_VERSION};
pub use error::{Error, Result};
pub use multisig::{MultisigIter, MultisigOut, MultisigUnspentIter, Tree, MULTISIG_VALUE_SIZE};
pub use scripts::{script_hash, SCRIPT_HASH_SIZE};
pub use txrecords::TxRecord;
pub use unmined::{
    UnminedCreditIter, UnminedCreditRecord, UnminedIter, UNMINED_VALUE_SIZE,
    UNMINED_VALUE_SIZE_LEGACY,
};
