//! Core value types shared by the stakewallet transaction store.
//!
//! Hashes, amounts, and outpoints are opaque typed wrappers so that byte
//! slices of identical length cannot be confused for one another. The
//! transaction model in [`tx`] carries its own canonical wire codec; the
//! store persists those serialized bytes verbatim.

pub mod amount;
pub mod block;
pub mod hash;
pub mod outpoint;
pub mod time;
pub mod tx;

pub use amount::Amount;
pub use block::{Block, BlockMeta};
pub use hash::{BlockHash, TxHash};
pub use outpoint::OutPoint;
pub use time::Timestamp;
pub use tx::{CodecError, Transaction, TxIn, TxKind, TxOut};
