//! Canonical transaction model and wire codec.
//!
//! The store persists transactions as opaque serialized bytes; everything it
//! later needs (outputs, input outpoints, the stake kind) is recomputed by
//! deserializing. The codec is length-prefixed big-endian:
//!
//! ```text
//! version        u32
//! input count    u32
//!   per input:   prev hash (32) | prev index u32 | sig script (u32 len | bytes) | sequence u32
//! output count   u32
//!   per output:  amount u64 | pk script (u32 len | bytes)
//! lock time      u32
//! expiry         u32
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::Amount;
use crate::hash::TxHash;
use crate::outpoint::OutPoint;

/// Stake opcodes tagging the first output script of stake transactions.
/// `OP_NOP10` stands in for "no stake opcode".
pub const OP_NOP10: u8 = 0xb9;
pub const OP_SSTX: u8 = 0xba;
pub const OP_SSGEN: u8 = 0xbb;
pub const OP_SSRTX: u8 = 0xbc;
pub const OP_SSTXCHANGE: u8 = 0xbd;

/// Errors produced by the transaction codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("transaction truncated: need {need} more bytes at offset {offset}")]
    Truncated { offset: usize, need: usize },

    #[error("transaction has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// A transaction input spending a previous output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prev_hash: TxHash,
    pub prev_index: u32,
    pub sig_script: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn previous_outpoint(&self) -> OutPoint {
        OutPoint::new(self.prev_hash, self.prev_index)
    }

    /// Generation (coinbase) inputs reference the null outpoint.
    pub fn is_null_outpoint(&self) -> bool {
        self.previous_outpoint().is_null()
    }
}

/// A transaction output: an amount and the script that encumbers it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub amount: Amount,
    pub pk_script: Vec<u8>,
}

/// The stake kind of a transaction, recomputed from its outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Regular,
    Ticket,
    Vote,
    Revocation,
    Generation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

impl Transaction {
    /// Total length of the serialized transaction in bytes.
    pub fn serialized_len(&self) -> usize {
        let mut len = 4 + 4; // version + input count
        for input in &self.inputs {
            len += 32 + 4 + 4 + input.sig_script.len() + 4;
        }
        len += 4; // output count
        for output in &self.outputs {
            len += 8 + 4 + output.pk_script.len();
        }
        len + 4 + 4 // lock time + expiry
    }

    /// Serialize to the canonical wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.serialized_len());
        v.extend_from_slice(&self.version.to_be_bytes());
        v.extend_from_slice(&(self.inputs.len() as u32).to_be_bytes());
        for input in &self.inputs {
            v.extend_from_slice(input.prev_hash.as_bytes());
            v.extend_from_slice(&input.prev_index.to_be_bytes());
            v.extend_from_slice(&(input.sig_script.len() as u32).to_be_bytes());
            v.extend_from_slice(&input.sig_script);
            v.extend_from_slice(&input.sequence.to_be_bytes());
        }
        v.extend_from_slice(&(self.outputs.len() as u32).to_be_bytes());
        for output in &self.outputs {
            v.extend_from_slice(&output.amount.to_atoms().to_be_bytes());
            v.extend_from_slice(&(output.pk_script.len() as u32).to_be_bytes());
            v.extend_from_slice(&output.pk_script);
        }
        v.extend_from_slice(&self.lock_time.to_be_bytes());
        v.extend_from_slice(&self.expiry.to_be_bytes());
        v
    }

    /// Deserialize from the canonical wire format. Trailing bytes are an
    /// error; the codec round-trips exactly.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let version = r.read_u32()?;
        let input_count = r.read_u32()? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            let prev_hash = r.read_hash()?;
            let prev_index = r.read_u32()?;
            let script_len = r.read_u32()? as usize;
            let sig_script = r.read_bytes(script_len)?.to_vec();
            let sequence = r.read_u32()?;
            inputs.push(TxIn {
                prev_hash,
                prev_index,
                sig_script,
                sequence,
            });
        }
        let output_count = r.read_u32()? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            let amount = Amount::new(r.read_u64()?);
            let script_len = r.read_u32()? as usize;
            let pk_script = r.read_bytes(script_len)?.to_vec();
            outputs.push(TxOut { amount, pk_script });
        }
        let lock_time = r.read_u32()?;
        let expiry = r.read_u32()?;
        let remaining = r.remaining();
        if remaining != 0 {
            return Err(CodecError::TrailingBytes(remaining));
        }
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
            expiry,
        })
    }

    /// Hash of the serialized transaction.
    pub fn tx_hash(&self) -> TxHash {
        TxHash::from_tx_bytes(&self.serialize())
    }

    /// Byte offset of output `index`'s pk script within the serialized
    /// transaction, or `None` if the index is out of range.
    pub fn pk_script_offset(&self, index: u32) -> Option<usize> {
        let index = index as usize;
        if index >= self.outputs.len() {
            return None;
        }
        let mut off = 4 + 4;
        for input in &self.inputs {
            off += 32 + 4 + 4 + input.sig_script.len() + 4;
        }
        off += 4;
        for output in &self.outputs[..index] {
            off += 8 + 4 + output.pk_script.len();
        }
        Some(off + 8 + 4)
    }

    /// Classify the transaction by its outputs. Generation is identified by
    /// a sole null-outpoint input; stake kinds by the leading opcode of the
    /// first output script.
    pub fn kind(&self) -> TxKind {
        if self.inputs.len() == 1 && self.inputs[0].is_null_outpoint() {
            return TxKind::Generation;
        }
        match self.outputs.first().and_then(|o| o.pk_script.first()) {
            Some(&OP_SSTX) => TxKind::Ticket,
            Some(&OP_SSGEN) => TxKind::Vote,
            Some(&OP_SSRTX) => TxKind::Revocation,
            _ => TxKind::Regular,
        }
    }
}

/// The stake opcode of a pk script, or `OP_NOP10` for non-stake scripts.
pub fn stake_opcode(pk_script: &[u8]) -> u8 {
    match pk_script.first() {
        Some(&op) if (OP_SSTX..=OP_SSTXCHANGE).contains(&op) => op,
        _ => OP_NOP10,
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.offset,
                need: n - self.remaining(),
            });
        }
        let out = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_hash(&mut self) -> Result<TxHash, CodecError> {
        let b = self.read_bytes(32)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(b);
        Ok(TxHash::new(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prev_hash: TxHash::new([7u8; 32]),
                prev_index: 3,
                sig_script: vec![0xab, 0xcd],
                sequence: u32::MAX,
            }],
            outputs: vec![
                TxOut {
                    amount: Amount::new(50_000),
                    pk_script: vec![0x76, 0xa9, 0x14],
                },
                TxOut {
                    amount: Amount::new(1_000),
                    pk_script: vec![0x51],
                },
            ],
            lock_time: 0,
            expiry: 0,
        }
    }

    #[test]
    fn serialize_roundtrip() {
        let tx = sample_tx();
        let bytes = tx.serialize();
        assert_eq!(bytes.len(), tx.serialized_len());
        let decoded = Transaction::deserialize(&bytes).expect("deserialize");
        assert_eq!(decoded, tx);
    }

    #[test]
    fn deserialize_rejects_truncation() {
        let bytes = sample_tx().serialize();
        let err = Transaction::deserialize(&bytes[..bytes.len() - 1]);
        assert!(matches!(err, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn deserialize_rejects_trailing_bytes() {
        let mut bytes = sample_tx().serialize();
        bytes.push(0);
        let err = Transaction::deserialize(&bytes);
        assert!(matches!(err, Err(CodecError::TrailingBytes(1))));
    }

    #[test]
    fn pk_script_offset_points_at_script() {
        let tx = sample_tx();
        let bytes = tx.serialize();
        for index in 0..tx.outputs.len() as u32 {
            let off = tx.pk_script_offset(index).expect("offset");
            let script = &tx.outputs[index as usize].pk_script;
            assert_eq!(&bytes[off..off + script.len()], script.as_slice());
        }
        assert_eq!(tx.pk_script_offset(tx.outputs.len() as u32), None);
    }

    #[test]
    fn kind_classification() {
        let mut tx = sample_tx();
        assert_eq!(tx.kind(), TxKind::Regular);

        tx.outputs[0].pk_script[0] = OP_SSTX;
        assert_eq!(tx.kind(), TxKind::Ticket);
        tx.outputs[0].pk_script[0] = OP_SSGEN;
        assert_eq!(tx.kind(), TxKind::Vote);
        tx.outputs[0].pk_script[0] = OP_SSRTX;
        assert_eq!(tx.kind(), TxKind::Revocation);

        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxIn {
                prev_hash: TxHash::ZERO,
                prev_index: u32::MAX,
                sig_script: Vec::new(),
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                amount: Amount::new(5),
                pk_script: vec![0x51],
            }],
            lock_time: 0,
            expiry: 0,
        };
        assert_eq!(coinbase.kind(), TxKind::Generation);
    }

    #[test]
    fn stake_opcode_defaults_to_nop10() {
        assert_eq!(stake_opcode(&[0x76, 0xa9]), OP_NOP10);
        assert_eq!(stake_opcode(&[]), OP_NOP10);
        assert_eq!(stake_opcode(&[OP_SSGEN]), OP_SSGEN);
    }

    #[test]
    fn tx_hash_is_stable() {
        let a = sample_tx().tx_hash();
        let b = sample_tx().tx_hash();
        assert_eq!(a, b);

        let mut other = sample_tx();
        other.lock_time = 9;
        assert_ne!(a, other.tx_hash());
    }
}
