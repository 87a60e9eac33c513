//! A minimal bitcoin transaction model, providing just enough structure to
//! identify signing sessions by txid and to compute the taproot key-spend
//! sighash which cosigners commit to.

use crate::errors::SighashError;
use crate::tagged_hashes;

use sha2::{Digest as _, Sha256};

/// A transaction identifier: the double-SHA256 of the serialized
/// transaction. Displayed in the conventional reversed byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Txid(pub [u8; 32]);

impl std::fmt::Display for Txid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&base16ct::lower::encode_string(&reversed))
    }
}

/// A reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    #[allow(missing_docs)]
    pub txid: Txid,
    #[allow(missing_docs)]
    pub vout: u32,
}

/// A transaction input. Script sigs are always empty here; every input
/// this crate signs is a segwit v1 (taproot) spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxIn {
    #[allow(missing_docs)]
    pub previous_output: OutPoint,
    #[allow(missing_docs)]
    pub sequence: u32,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Output amount in satoshis.
    pub value: u64,
    #[allow(missing_docs)]
    pub script_pubkey: Vec<u8>,
}

/// An unsigned bitcoin transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    #[allow(missing_docs)]
    pub version: u32,
    #[allow(missing_docs)]
    pub lock_time: u32,
    #[allow(missing_docs)]
    pub input: Vec<TxIn>,
    #[allow(missing_docs)]
    pub output: Vec<TxOut>,
}

/// Builds the segwit v1 script pubkey `OP_1 <32-byte xonly key>` for a
/// taproot output key.
pub fn taproot_script_pubkey(output_key_xonly: [u8; 32]) -> Vec<u8> {
    let mut script = Vec::with_capacity(34);
    script.push(0x51); // OP_1
    script.push(32);
    script.extend_from_slice(&output_key_xonly);
    script
}

fn write_compact_size(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xFC => buf.push(n as u8),
        0xFD..=0xFFFF => {
            buf.push(0xFD);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            buf.push(0xFE);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xFF);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn write_tx_out(buf: &mut Vec<u8>, output: &TxOut) {
    buf.extend_from_slice(&output.value.to_le_bytes());
    write_compact_size(buf, output.script_pubkey.len() as u64);
    buf.extend_from_slice(&output.script_pubkey);
}

impl Transaction {
    /// Serializes the transaction without witness data, i.e. the encoding
    /// which the txid commits to.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());

        write_compact_size(&mut buf, self.input.len() as u64);
        for input in &self.input {
            buf.extend_from_slice(&input.previous_output.txid.0);
            buf.extend_from_slice(&input.previous_output.vout.to_le_bytes());
            write_compact_size(&mut buf, 0); // empty script sig
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_compact_size(&mut buf, self.output.len() as u64);
        for output in &self.output {
            write_tx_out(&mut buf, output);
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }

    /// Computes the transaction's txid: the double-SHA256 of its
    /// witness-stripped serialization.
    pub fn compute_txid(&self) -> Txid {
        let first = Sha256::digest(self.serialize());
        Txid(Sha256::digest(first).into())
    }

    /// Computes the [BIP341](https://github.com/bitcoin/bips/blob/master/bip-0341.mediawiki)
    /// signature hash for a taproot key-path spend of the given input, with
    /// the default sighash type (`SIGHASH_DEFAULT`) and no annex.
    ///
    /// `prevouts` must hold the spent output for every input of the
    /// transaction, in input order, since `SIGHASH_DEFAULT` commits to all
    /// spent amounts and script pubkeys.
    pub fn taproot_key_spend_sighash(
        &self,
        input_index: usize,
        prevouts: &[TxOut],
    ) -> Result<[u8; 32], SighashError> {
        if input_index >= self.input.len() {
            return Err(SighashError::InvalidInputIndex(input_index));
        }
        if prevouts.len() != self.input.len() {
            return Err(SighashError::MissingPrevout(prevouts.len()));
        }

        let sha_prevouts: [u8; 32] = {
            let mut h = Sha256::new();
            for input in &self.input {
                h.update(input.previous_output.txid.0);
                h.update(input.previous_output.vout.to_le_bytes());
            }
            h.finalize().into()
        };

        let sha_amounts: [u8; 32] = {
            let mut h = Sha256::new();
            for prevout in prevouts {
                h.update(prevout.value.to_le_bytes());
            }
            h.finalize().into()
        };

        let sha_scriptpubkeys: [u8; 32] = {
            let mut h = Sha256::new();
            for prevout in prevouts {
                let mut prefixed = Vec::with_capacity(prevout.script_pubkey.len() + 1);
                write_compact_size(&mut prefixed, prevout.script_pubkey.len() as u64);
                prefixed.extend_from_slice(&prevout.script_pubkey);
                h.update(&prefixed);
            }
            h.finalize().into()
        };

        let sha_sequences: [u8; 32] = {
            let mut h = Sha256::new();
            for input in &self.input {
                h.update(input.sequence.to_le_bytes());
            }
            h.finalize().into()
        };

        let sha_outputs: [u8; 32] = {
            let mut h = Sha256::new();
            let mut buf = Vec::new();
            for output in &self.output {
                write_tx_out(&mut buf, output);
            }
            h.update(&buf);
            h.finalize().into()
        };

        let sighash: [u8; 32] = tagged_hashes::TAPROOT_SIGHASH_TAG_HASHER
            .clone()
            .chain_update([0u8]) // sighash epoch
            .chain_update([0u8]) // hash_type: SIGHASH_DEFAULT
            .chain_update(self.version.to_le_bytes())
            .chain_update(self.lock_time.to_le_bytes())
            .chain_update(sha_prevouts)
            .chain_update(sha_amounts)
            .chain_update(sha_scriptpubkeys)
            .chain_update(sha_sequences)
            .chain_update(sha_outputs)
            .chain_update([0u8]) // spend_type: key path, no annex
            .chain_update((input_index as u32).to_le_bytes())
            .finalize()
            .into();

        Ok(sighash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_transaction() -> (Transaction, Vec<TxOut>) {
        let prevouts = vec![
            TxOut {
                value: 100_000,
                script_pubkey: taproot_script_pubkey([0x11; 32]),
            },
            TxOut {
                value: 250_000,
                script_pubkey: taproot_script_pubkey([0x22; 32]),
            },
        ];

        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![
                TxIn {
                    previous_output: OutPoint {
                        txid: Txid([0xAA; 32]),
                        vout: 0,
                    },
                    sequence: 0xFFFF_FFFD,
                },
                TxIn {
                    previous_output: OutPoint {
                        txid: Txid([0xBB; 32]),
                        vout: 3,
                    },
                    sequence: 0xFFFF_FFFD,
                },
            ],
            output: vec![TxOut {
                value: 340_000,
                script_pubkey: taproot_script_pubkey([0x33; 32]),
            }],
        };

        (tx, prevouts)
    }

    #[test]
    fn txid_is_deterministic() {
        let (tx, _) = test_transaction();
        assert_eq!(tx.compute_txid(), tx.compute_txid());

        let mut modified = tx.clone();
        modified.output[0].value += 1;
        assert_ne!(tx.compute_txid(), modified.compute_txid());
    }

    #[test]
    fn txid_displays_reversed() {
        let txid = Txid({
            let mut bytes = [0u8; 32];
            bytes[0] = 0x01;
            bytes
        });
        let displayed = txid.to_string();
        assert!(displayed.starts_with("00"));
        assert!(displayed.ends_with("01"));
    }

    #[test]
    fn sighash_commits_to_input_index() {
        let (tx, prevouts) = test_transaction();
        let sighash0 = tx.taproot_key_spend_sighash(0, &prevouts).unwrap();
        let sighash1 = tx.taproot_key_spend_sighash(1, &prevouts).unwrap();
        assert_ne!(sighash0, sighash1);
    }

    #[test]
    fn sighash_input_validation() {
        let (tx, prevouts) = test_transaction();
        assert_eq!(
            tx.taproot_key_spend_sighash(2, &prevouts),
            Err(SighashError::InvalidInputIndex(2)),
        );
        assert_eq!(
            tx.taproot_key_spend_sighash(0, &prevouts[..1]),
            Err(SighashError::MissingPrevout(1)),
        );
    }
}
