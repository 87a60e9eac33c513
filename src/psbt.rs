//! The musig-specific slice of a partially signed bitcoin transaction.
//!
//! Only the per-input fields the coordinator reads and writes are modeled:
//! the witness UTXO, the address-slot derivation pair, the three
//! [BIP373](https://github.com/bitcoin/bips/blob/master/bip-0373.mediawiki)
//! musig fields, and the final `tap_key_sig`. The field key/value byte
//! encodings are provided so round state survives a trip through any
//! standard PSBT serializer.

use crate::errors::DecodeError;
use crate::signature::CompactSignature;
use crate::transaction::{Transaction, TxOut};
use crate::{PartialSignature, PubNonce};

use secp::{MaybeScalar, Point};

use std::collections::BTreeMap;

/// Per-input PSBT key type for the participant set of an aggregate key.
pub const PSBT_IN_MUSIG2_PARTICIPANT_PUBKEYS: u8 = 0x1a;

/// Per-input PSBT key type for one participant's public nonce.
pub const PSBT_IN_MUSIG2_PUB_NONCE: u8 = 0x1b;

/// Per-input PSBT key type for one participant's partial signature.
pub const PSBT_IN_MUSIG2_PARTIAL_SIG: u8 = 0x1c;

/// The musig-relevant fields of one PSBT input.
///
/// Nonces and partial signatures are keyed by the
/// `(participant, aggregate key)` pair, as in BIP-373: the same
/// participant key may appear under several aggregate keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsbtInput {
    /// The output being spent. Required for sighash computation.
    pub witness_utxo: Option<TxOut>,

    /// The input's address slot: `(change, address_index)`, matching the
    /// policy template's derivation suffix.
    pub derivation: Option<(bool, u32)>,

    /// Participant sets, keyed by the plain (untweaked) aggregate key.
    pub musig_participants: BTreeMap<Point, Vec<Point>>,

    /// Round-1 public nonces, keyed by `(participant, aggregate key)`.
    pub musig_pub_nonces: BTreeMap<(Point, Point), PubNonce>,

    /// Round-2 partial signatures, keyed by `(participant, aggregate key)`.
    pub musig_partial_sigs: BTreeMap<(Point, Point), PartialSignature>,

    /// The final combined key-spend signature for this input.
    pub tap_key_sig: Option<CompactSignature>,
}

impl PsbtInput {
    /// Records the participant set of an aggregate key.
    pub fn record_participants(&mut self, aggregate_key: Point, participants: Vec<Point>) {
        self.musig_participants.insert(aggregate_key, participants);
    }

    /// Records a participant's round-1 public nonce.
    pub fn record_pub_nonce(&mut self, participant: Point, aggregate_key: Point, nonce: PubNonce) {
        self.musig_pub_nonces
            .insert((participant, aggregate_key), nonce);
    }

    /// Records a participant's round-2 partial signature.
    pub fn record_partial_sig(
        &mut self,
        participant: Point,
        aggregate_key: Point,
        partial_signature: PartialSignature,
    ) {
        self.musig_partial_sigs
            .insert((participant, aggregate_key), partial_signature);
    }

    /// Looks up a participant's recorded public nonce under the given
    /// aggregate key.
    pub fn pub_nonce(&self, participant: Point, aggregate_key: Point) -> Option<&PubNonce> {
        self.musig_pub_nonces.get(&(participant, aggregate_key))
    }

    /// True once every recorded participant of every recorded aggregate
    /// key has contributed a public nonce.
    pub fn round1_complete(&self) -> bool {
        self.musig_participants.iter().all(|(agg, participants)| {
            participants
                .iter()
                .all(|p| self.musig_pub_nonces.contains_key(&(*p, *agg)))
        })
    }

    /// Exports the input's musig fields as raw PSBT key/value pairs.
    pub fn musig_key_value_pairs(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut pairs = Vec::new();
        for (agg, participants) in &self.musig_participants {
            pairs.push((
                participant_pubkeys_key(agg),
                participant_pubkeys_value(participants),
            ));
        }
        for ((participant, agg), nonce) in &self.musig_pub_nonces {
            pairs.push((
                field_key(PSBT_IN_MUSIG2_PUB_NONCE, participant, agg),
                nonce.serialize().to_vec(),
            ));
        }
        for ((participant, agg), psig) in &self.musig_partial_sigs {
            pairs.push((
                field_key(PSBT_IN_MUSIG2_PARTIAL_SIG, participant, agg),
                psig.serialize().to_vec(),
            ));
        }
        pairs
    }

    /// Applies one raw PSBT key/value pair to this input, if it is one of
    /// the musig field types. Unknown key types are ignored and reported
    /// as `Ok(false)`.
    pub fn apply_musig_key_value_pair(
        &mut self,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, DecodeError<PsbtInput>> {
        let (&keytype, keydata) = match key.split_first() {
            Some(split) => split,
            None => return Err(DecodeError::bad_length(0)),
        };

        match keytype {
            PSBT_IN_MUSIG2_PARTICIPANT_PUBKEYS => {
                let aggregate_key = Point::from_slice(keydata)?;
                if value.is_empty() || value.len() % 33 != 0 {
                    return Err(DecodeError::bad_length(value.len()));
                }
                let participants = value
                    .chunks_exact(33)
                    .map(Point::from_slice)
                    .collect::<Result<Vec<Point>, _>>()?;
                self.record_participants(aggregate_key, participants);
            }

            PSBT_IN_MUSIG2_PUB_NONCE => {
                let (participant, aggregate_key) = split_field_keydata(keydata)?;
                let nonce = PubNonce::from_bytes(value).map_err(|e| e.convert())?;
                self.record_pub_nonce(participant, aggregate_key, nonce);
            }

            PSBT_IN_MUSIG2_PARTIAL_SIG => {
                let (participant, aggregate_key) = split_field_keydata(keydata)?;
                let psig = MaybeScalar::try_from(value)?;
                self.record_partial_sig(participant, aggregate_key, psig);
            }

            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// The key bytes of a participant-set field: the key type followed by the
/// 33-byte plain aggregate key.
pub fn participant_pubkeys_key(aggregate_key: &Point) -> Vec<u8> {
    let mut key = Vec::with_capacity(34);
    key.push(PSBT_IN_MUSIG2_PARTICIPANT_PUBKEYS);
    key.extend_from_slice(&aggregate_key.serialize());
    key
}

/// The value bytes of a participant-set field: concatenated 33-byte keys.
pub fn participant_pubkeys_value(participants: &[Point]) -> Vec<u8> {
    let mut value = Vec::with_capacity(participants.len() * 33);
    for participant in participants {
        value.extend_from_slice(&participant.serialize());
    }
    value
}

fn field_key(keytype: u8, participant: &Point, aggregate_key: &Point) -> Vec<u8> {
    let mut key = Vec::with_capacity(67);
    key.push(keytype);
    key.extend_from_slice(&participant.serialize());
    key.extend_from_slice(&aggregate_key.serialize());
    key
}

fn split_field_keydata(keydata: &[u8]) -> Result<(Point, Point), DecodeError<PsbtInput>> {
    if keydata.len() != 66 {
        return Err(DecodeError::bad_length(keydata.len()));
    }
    let participant = Point::from_slice(&keydata[..33])?;
    let aggregate_key = Point::from_slice(&keydata[33..])?;
    Ok((participant, aggregate_key))
}

/// A partially signed transaction: the unsigned transaction plus one
/// [`PsbtInput`] per transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psbt {
    #[allow(missing_docs)]
    pub unsigned_tx: Transaction,
    #[allow(missing_docs)]
    pub inputs: Vec<PsbtInput>,
}

impl Psbt {
    /// Wraps an unsigned transaction with one empty [`PsbtInput`] per
    /// transaction input.
    pub fn from_unsigned_tx(unsigned_tx: Transaction) -> Psbt {
        let inputs = vec![PsbtInput::default(); unsigned_tx.input.len()];
        Psbt {
            unsigned_tx,
            inputs,
        }
    }

    /// True once round 1 is complete for every input.
    pub fn round1_complete(&self) -> bool {
        self.inputs.iter().all(PsbtInput::round1_complete)
    }

    /// True once every input carries its final key-spend signature.
    pub fn fully_signed(&self) -> bool {
        self.inputs.iter().all(|input| input.tap_key_sig.is_some())
    }
}
