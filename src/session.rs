//! The two-round signing coordinator.
//!
//! [`NonceRound`] and [`SignatureRound`] are plain bookkeeping structures:
//! one slot per (input, participant), duplicate contributions refused,
//! results only extractable once every slot is filled. [`SigningSession`]
//! drives them against a set of [`Cosigner`] handles and a PSBT, enforcing
//! the lifecycle
//!
//! ```text
//! Round1Open -> Round1Complete -> Round2Open -> Round2Complete -> Finalized
//! ```
//!
//! with `Aborted` reachable from every non-terminal state. Per-input
//! failures are never partial: any cosigner or verification error aborts
//! the whole session, because a PSBT where some inputs finished round 2
//! and others did not cannot be safely resumed without risking nonce
//! reuse.

use crate::cosigner::{Cosigner, SignContext};
use crate::errors::{AggregationError, RoundError, SessionError, SighashError};
use crate::policy::ValidatedPolicy;
use crate::psbt::Psbt;
use crate::transaction::{Txid, TxOut};
use crate::{
    aggregate_partial_signatures, verify_partial, AggNonce, AggregateKey, LiftedSignature,
    PartialSignature, PubNonce,
};

use secp::Point;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

/// Where a [`SigningSession`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Round-1 nonces are being collected.
    Round1Open,

    /// Every input has a full set of nonces; round 2 may open.
    Round1Complete,

    /// Partial signatures are being collected.
    Round2Open,

    /// Every input has a full set of partial signatures.
    Round2Complete,

    /// Final signatures are embedded in the PSBT. Terminal.
    Finalized,

    /// The session failed or was cancelled. Terminal; the session's
    /// nonces must never be used again.
    Aborted,
}

impl SessionState {
    /// True for the two states no session ever leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finalized | SessionState::Aborted)
    }
}

struct NonceSlots {
    required: Vec<Point>,
    contributions: HashMap<Point, PubNonce>,
}

/// Round-1 bookkeeping: collects one public nonce per (input, required
/// participant) slot.
pub struct NonceRound {
    inputs: BTreeMap<usize, NonceSlots>,
}

impl NonceRound {
    /// Opens a round with one slot set per input. Each entry pairs a
    /// transaction input index with the participant keys required to
    /// contribute for it.
    pub fn open<I>(inputs: I) -> NonceRound
    where
        I: IntoIterator<Item = (usize, Vec<Point>)>,
    {
        NonceRound {
            inputs: inputs
                .into_iter()
                .map(|(input_index, required)| {
                    (
                        input_index,
                        NonceSlots {
                            required,
                            contributions: HashMap::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Accepts one participant's nonce for one input. A filled slot is
    /// never overwritten, even by an identical contribution.
    pub fn submit(
        &mut self,
        input_index: usize,
        participant: Point,
        nonce: PubNonce,
    ) -> Result<(), RoundError> {
        let slots = self
            .inputs
            .get_mut(&input_index)
            .ok_or(RoundError::UnknownInput(input_index))?;
        if !slots.required.contains(&participant) {
            return Err(RoundError::UnknownParticipant);
        }
        if slots.contributions.contains_key(&participant) {
            return Err(RoundError::DuplicateContribution { input_index });
        }
        slots.contributions.insert(participant, nonce);
        Ok(())
    }

    /// True once every slot of every input is filled.
    pub fn is_complete(&self) -> bool {
        self.inputs
            .values()
            .all(|slots| slots.contributions.len() == slots.required.len())
    }

    /// The recorded nonce for one (input, participant) slot.
    pub fn nonce(&self, input_index: usize, participant: Point) -> Option<&PubNonce> {
        self.inputs
            .get(&input_index)?
            .contributions
            .get(&participant)
    }

    /// Aggregates each input's nonces. Fails with
    /// [`RoundError::RoundIncomplete`] while any slot is empty.
    pub fn aggregate(&self) -> Result<BTreeMap<usize, AggNonce>, RoundError> {
        if !self.is_complete() {
            return Err(RoundError::RoundIncomplete);
        }
        Ok(self
            .inputs
            .iter()
            .map(|(&input_index, slots)| {
                (input_index, AggNonce::sum(slots.contributions.values()))
            })
            .collect())
    }
}

struct SignatureSlots {
    agg_key: AggregateKey,
    aggregated_nonce: AggNonce,
    sighash: [u8; 32],
    pubnonces: HashMap<Point, PubNonce>,
    contributions: HashMap<Point, PartialSignature>,
}

/// One input's worth of context for opening a [`SignatureRound`].
pub struct SignatureRoundInput {
    #[allow(missing_docs)]
    pub input_index: usize,

    /// The derived and tweaked aggregate key the input's signature must
    /// verify under.
    pub agg_key: AggregateKey,

    /// The aggregated round-1 nonce for this input.
    pub aggregated_nonce: AggNonce,

    /// The message being signed: the input's key-spend sighash.
    pub sighash: [u8; 32],

    /// Each required participant's round-1 public nonce, used to verify
    /// their partial signature on submission.
    pub pubnonces: HashMap<Point, PubNonce>,
}

/// Round-2 bookkeeping: collects and verifies one partial signature per
/// (input, participant) slot, then combines them into final signatures.
pub struct SignatureRound {
    inputs: BTreeMap<usize, SignatureSlots>,
}

impl SignatureRound {
    /// Opens a round from the output of a complete [`NonceRound`].
    pub fn open<I>(inputs: I) -> SignatureRound
    where
        I: IntoIterator<Item = SignatureRoundInput>,
    {
        SignatureRound {
            inputs: inputs
                .into_iter()
                .map(|input| {
                    (
                        input.input_index,
                        SignatureSlots {
                            agg_key: input.agg_key,
                            aggregated_nonce: input.aggregated_nonce,
                            sighash: input.sighash,
                            pubnonces: input.pubnonces,
                            contributions: HashMap::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Accepts one participant's partial signature for one input, after
    /// verifying it against the participant's round-1 nonce. Rejected
    /// contributions leave the slot empty.
    pub fn submit(
        &mut self,
        input_index: usize,
        participant: Point,
        partial_signature: PartialSignature,
    ) -> Result<(), RoundError> {
        let slots = self
            .inputs
            .get_mut(&input_index)
            .ok_or(RoundError::UnknownInput(input_index))?;
        let pubnonce = slots
            .pubnonces
            .get(&participant)
            .ok_or(RoundError::UnknownParticipant)?;
        if slots.contributions.contains_key(&participant) {
            return Err(RoundError::DuplicateContribution { input_index });
        }

        verify_partial(
            &slots.agg_key,
            partial_signature,
            &slots.aggregated_nonce,
            participant,
            pubnonce,
            slots.sighash,
        )
        .map_err(|_| RoundError::InvalidContribution { input_index })?;

        slots.contributions.insert(participant, partial_signature);
        Ok(())
    }

    /// True once every slot of every input is filled.
    pub fn is_complete(&self) -> bool {
        self.inputs
            .values()
            .all(|slots| slots.contributions.len() == slots.pubnonces.len())
    }

    /// Combines each input's partial signatures into a final signature,
    /// verifying each against the input's aggregate key.
    ///
    /// A verification failure here is fatal: at least one cosigner
    /// submitted a partial signature which passed individual verification
    /// but produced an invalid combination, which should be impossible for
    /// honest participants. The session must abort and never retry with
    /// the same nonces.
    pub fn combine(&self) -> Result<BTreeMap<usize, LiftedSignature>, AggregationError> {
        if !self.is_complete() {
            return Err(AggregationError::RoundIncomplete);
        }

        let mut signatures = BTreeMap::new();
        for (&input_index, slots) in &self.inputs {
            let signature: LiftedSignature = aggregate_partial_signatures(
                &slots.agg_key,
                &slots.aggregated_nonce,
                slots.contributions.values().copied(),
                slots.sighash,
            )
            .map_err(|_| AggregationError::InvalidCombinedSignature { input_index })?;
            signatures.insert(input_index, signature);
        }
        Ok(signatures)
    }
}

struct SessionInput {
    /// The derived and taproot-tweaked key signatures verify under.
    agg_key: AggregateKey,

    /// The derived but untweaked aggregate point, used to key the PSBT
    /// musig fields.
    plain_key: Point,

    sighash: [u8; 32],
    context: SignContext,
}

/// A signing session for one transaction: computes per-input keys and
/// sighashes up front, then drives both rounds across the cosigner set
/// and embeds the final signatures into the PSBT.
pub struct SigningSession {
    policy: ValidatedPolicy,
    cosigners: Vec<Arc<dyn Cosigner>>,
    txid: Txid,
    psbt: Psbt,
    state: SessionState,
    inputs: BTreeMap<usize, SessionInput>,
    nonce_round: NonceRound,
    signature_round: Option<SignatureRound>,
}

impl SigningSession {
    /// Builds a session over a PSBT. Every policy participant must have a
    /// matching cosigner handle (by fingerprint and pubkey); every PSBT
    /// input must carry a witness UTXO and its derivation pair.
    pub fn new(
        policy: ValidatedPolicy,
        cosigners: Vec<Arc<dyn Cosigner>>,
        psbt: Psbt,
    ) -> Result<SigningSession, SessionError> {
        // Match cosigner handles to participants, in participant order.
        let handles = policy
            .participants()
            .iter()
            .map(|key| {
                cosigners
                    .iter()
                    .find(|cosigner| {
                        cosigner.fingerprint() == key.fingerprint
                            && cosigner.pubkey() == key.pubkey
                    })
                    .cloned()
                    .ok_or(SessionError::MissingCosigner(key.fingerprint))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let txid = psbt.unsigned_tx.compute_txid();
        if psbt.inputs.len() != psbt.unsigned_tx.input.len() {
            return Err(SessionError::Sighash(SighashError::MissingPrevout(
                psbt.inputs.len(),
            )));
        }
        let prevouts = psbt
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                input
                    .witness_utxo
                    .clone()
                    .ok_or(SessionError::Sighash(SighashError::MissingPrevout(i)))
            })
            .collect::<Result<Vec<TxOut>, _>>()?;

        let mut psbt = psbt;
        let mut inputs = BTreeMap::new();
        for input_index in 0..psbt.unsigned_tx.input.len() {
            let (change, address_index) = psbt.inputs[input_index]
                .derivation
                .ok_or(SessionError::MissingDerivation(input_index))?;

            let derived = policy.derived_key(change, address_index)?;
            let plain_key: Point = derived.aggregated_pubkey();
            let agg_key = derived.with_taproot_tweak(None)?;
            let sighash = psbt
                .unsigned_tx
                .taproot_key_spend_sighash(input_index, &prevouts)?;

            psbt.inputs[input_index]
                .record_participants(plain_key, agg_key.pubkeys().to_vec());

            inputs.insert(
                input_index,
                SessionInput {
                    context: SignContext {
                        txid,
                        input_index,
                        aggregated_pubkey: agg_key.aggregated_pubkey(),
                    },
                    plain_key,
                    sighash,
                    agg_key,
                },
            );
        }

        let nonce_round = NonceRound::open(
            inputs
                .iter()
                .map(|(&input_index, input)| (input_index, input.agg_key.pubkeys().to_vec())),
        );

        debug!(%txid, inputs = inputs.len(), "opened signing session");
        Ok(SigningSession {
            policy,
            cosigners: handles,
            txid,
            psbt,
            state: SessionState::Round1Open,
            inputs,
            nonce_round,
            signature_round: None,
        })
    }

    /// The id of the transaction being signed.
    pub fn txid(&self) -> Txid {
        self.txid
    }

    #[allow(missing_docs)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session's PSBT in its current stage of completion.
    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    /// Collects a public nonce from every cosigner for every input.
    /// Advances `Round1Open -> Round1Complete`; any failure aborts.
    pub fn run_round1(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Round1Open {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                operation: "run round 1",
            });
        }

        match self.collect_nonces() {
            Ok(()) => {
                self.state = SessionState::Round1Complete;
                debug!(txid = %self.txid, "round 1 complete");
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn collect_nonces(&mut self) -> Result<(), SessionError> {
        for (&input_index, input) in &self.inputs {
            for (key, cosigner) in self.policy.participants().iter().zip(&self.cosigners) {
                let nonce = cosigner
                    .generate_nonce(&input.context, &input.agg_key)
                    .map_err(|e| SessionError::Cosigner(key.fingerprint, e))?;
                self.nonce_round
                    .submit(input_index, key.pubkey, nonce.clone())?;
                self.psbt.inputs[input_index].record_pub_nonce(
                    key.pubkey,
                    input.plain_key,
                    nonce,
                );
            }
        }
        Ok(())
    }

    /// Collects a partial signature from every cosigner for every input,
    /// verifying each on receipt. Advances
    /// `Round1Complete -> Round2Open -> Round2Complete`; any failure
    /// aborts.
    pub fn run_round2(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Round1Complete {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                operation: "run round 2",
            });
        }

        let aggregated_nonces = match self.nonce_round.aggregate() {
            Ok(nonces) => nonces,
            Err(e) => {
                self.abort();
                return Err(SessionError::Round(e));
            }
        };
        self.state = SessionState::Round2Open;

        match self.collect_partial_signatures(aggregated_nonces) {
            Ok(()) => {
                self.state = SessionState::Round2Complete;
                debug!(txid = %self.txid, "round 2 complete");
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn collect_partial_signatures(
        &mut self,
        aggregated_nonces: BTreeMap<usize, AggNonce>,
    ) -> Result<(), SessionError> {
        let mut round = SignatureRound::open(self.inputs.iter().map(|(&input_index, input)| {
            let pubnonces = self
                .policy
                .participants()
                .iter()
                .filter_map(|key| {
                    self.nonce_round
                        .nonce(input_index, key.pubkey)
                        .map(|nonce| (key.pubkey, nonce.clone()))
                })
                .collect();
            SignatureRoundInput {
                input_index,
                agg_key: input.agg_key.clone(),
                aggregated_nonce: aggregated_nonces[&input_index].clone(),
                sighash: input.sighash,
                pubnonces,
            }
        }));

        for (&input_index, input) in &self.inputs {
            let aggregated_nonce = &aggregated_nonces[&input_index];
            for (key, cosigner) in self.policy.participants().iter().zip(&self.cosigners) {
                let partial_signature = cosigner
                    .sign_partial(&input.context, &input.agg_key, aggregated_nonce, &input.sighash)
                    .map_err(|e| SessionError::Cosigner(key.fingerprint, e))?;
                round.submit(input_index, key.pubkey, partial_signature)?;
                self.psbt.inputs[input_index].record_partial_sig(
                    key.pubkey,
                    input.plain_key,
                    partial_signature,
                );
            }
        }

        self.signature_round = Some(round);
        Ok(())
    }

    /// Combines each input's partial signatures, embeds the final
    /// signatures as `tap_key_sig`, and returns the completed PSBT.
    /// Advances `Round2Complete -> Finalized`; a combination failure
    /// aborts.
    pub fn finalize_into_psbt(&mut self) -> Result<Psbt, SessionError> {
        let round = match (&self.state, &self.signature_round) {
            (SessionState::Round2Complete, Some(round)) => round,
            _ => {
                return Err(SessionError::InvalidTransition {
                    state: self.state,
                    operation: "finalize",
                });
            }
        };

        let signatures = match round.combine() {
            Ok(signatures) => signatures,
            Err(e) => {
                warn!(txid = %self.txid, error = %e, "discarding unusable combined signatures");
                self.abort();
                return Err(SessionError::Aggregation(e));
            }
        };

        for (input_index, signature) in signatures {
            self.psbt.inputs[input_index].tap_key_sig = Some(signature.compact());
        }
        self.state = SessionState::Finalized;
        debug!(txid = %self.txid, "session finalized");
        Ok(self.psbt.clone())
    }

    /// Aborts the session: cancels every unconsumed nonce reservation and
    /// moves to the terminal `Aborted` state. Consumed contexts cannot be
    /// cancelled and are simply abandoned. No-op on terminal sessions.
    pub fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        for input in self.inputs.values() {
            for (key, cosigner) in self.policy.participants().iter().zip(&self.cosigners) {
                if let Err(e) = cosigner.cancel(&input.context) {
                    debug!(
                        txid = %self.txid,
                        input_index = input.context.input_index,
                        fingerprint = %base16ct::lower::encode_string(&key.fingerprint),
                        error = %e,
                        "could not cancel nonce reservation"
                    );
                }
            }
        }
        warn!(txid = %self.txid, "signing session aborted");
        self.state = SessionState::Aborted;
    }
}

/// Active signing sessions, keyed by txid. Terminal sessions stay in the
/// table until their outcome is extracted with
/// [`take_finished`][Self::take_finished].
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<Txid, SigningSession>,
}

impl SessionTable {
    #[allow(missing_docs)]
    pub fn new() -> SessionTable {
        SessionTable::default()
    }

    /// Inserts a session, returning its txid key. An existing session for
    /// the same transaction is replaced.
    pub fn insert(&mut self, session: SigningSession) -> Txid {
        let txid = session.txid();
        self.sessions.insert(txid, session);
        txid
    }

    #[allow(missing_docs)]
    pub fn get(&self, txid: &Txid) -> Option<&SigningSession> {
        self.sessions.get(txid)
    }

    #[allow(missing_docs)]
    pub fn get_mut(&mut self, txid: &Txid) -> Option<&mut SigningSession> {
        self.sessions.get_mut(txid)
    }

    /// Removes and returns a session, but only once it has reached a
    /// terminal state.
    pub fn take_finished(&mut self, txid: &Txid) -> Option<SigningSession> {
        if self.sessions.get(txid)?.state().is_terminal() {
            self.sessions.remove(txid)
        } else {
            None
        }
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosigner::SoftwareCosigner;
    use crate::errors::CosignerError;
    use crate::policy::{ParticipantKey, WalletPolicy};
    use crate::transaction::{taproot_script_pubkey, OutPoint, Transaction, TxIn};
    use crate::{verify_single, SecNonceBuilder};

    use secp::Scalar;

    fn test_points(n: usize) -> Vec<Point> {
        (1..=n as u8)
            .map(|i| Scalar::try_from([i; 32]).unwrap().base_point_mul())
            .collect()
    }

    fn test_nonce(seed: u8) -> PubNonce {
        SecNonceBuilder::new([seed; 32]).build().public_nonce()
    }

    #[test]
    fn nonce_round_bookkeeping() {
        let points = test_points(2);
        let mut round = NonceRound::open([(0, points.clone()), (1, points.clone())]);
        assert!(!round.is_complete());
        assert_eq!(round.aggregate().unwrap_err(), RoundError::RoundIncomplete);

        round.submit(0, points[0], test_nonce(1)).unwrap();
        assert_eq!(
            round.submit(0, points[0], test_nonce(2)).unwrap_err(),
            RoundError::DuplicateContribution { input_index: 0 },
        );
        assert_eq!(
            round.submit(5, points[0], test_nonce(3)).unwrap_err(),
            RoundError::UnknownInput(5),
        );
        assert_eq!(
            round
                .submit(0, test_points(3)[2], test_nonce(4))
                .unwrap_err(),
            RoundError::UnknownParticipant,
        );

        round.submit(0, points[1], test_nonce(5)).unwrap();
        assert!(!round.is_complete());
        round.submit(1, points[0], test_nonce(6)).unwrap();
        round.submit(1, points[1], test_nonce(7)).unwrap();
        assert!(round.is_complete());

        let aggregated = round.aggregate().unwrap();
        assert_eq!(aggregated.len(), 2);
        assert_eq!(
            aggregated[&0],
            AggNonce::sum([round.nonce(0, points[0]).unwrap(), round.nonce(0, points[1]).unwrap()]),
        );
    }

    /// A pair of software cosigners with a signature round over one fake
    /// input, ready for submissions.
    fn signature_round_fixture() -> (
        SoftwareCosigner,
        SoftwareCosigner,
        AggregateKey,
        AggNonce,
        SignContext,
        [u8; 32],
        SignatureRound,
    ) {
        let alice = SoftwareCosigner::new(Scalar::try_from([0x11; 32]).unwrap(), [0xA1; 4]);
        let bob = SoftwareCosigner::new(Scalar::try_from([0x22; 32]).unwrap(), [0xB0; 4]);
        let agg_key = AggregateKey::new([alice.pubkey(), bob.pubkey()]).unwrap();
        let context = SignContext {
            txid: Txid([0xCC; 32]),
            input_index: 0,
            aggregated_pubkey: agg_key.aggregated_pubkey(),
        };
        let sighash = [0x5A; 32];

        let alice_nonce = alice.generate_nonce(&context, &agg_key).unwrap();
        let bob_nonce = bob.generate_nonce(&context, &agg_key).unwrap();
        let aggregated_nonce = AggNonce::sum([&alice_nonce, &bob_nonce]);

        let round = SignatureRound::open([SignatureRoundInput {
            input_index: 0,
            agg_key: agg_key.clone(),
            aggregated_nonce: aggregated_nonce.clone(),
            sighash,
            pubnonces: [
                (alice.pubkey(), alice_nonce),
                (bob.pubkey(), bob_nonce),
            ]
            .into_iter()
            .collect(),
        }]);

        (alice, bob, agg_key, aggregated_nonce, context, sighash, round)
    }

    #[test]
    fn signature_round_verifies_submissions() {
        let (alice, bob, agg_key, aggregated_nonce, context, sighash, mut round) =
            signature_round_fixture();

        // A garbage scalar is refused and leaves the slot open.
        assert_eq!(
            round
                .submit(0, alice.pubkey(), PartialSignature::Valid(Scalar::one()))
                .unwrap_err(),
            RoundError::InvalidContribution { input_index: 0 },
        );
        assert!(!round.is_complete());

        let alice_psig = alice
            .sign_partial(&context, &agg_key, &aggregated_nonce, &sighash)
            .unwrap();
        round.submit(0, alice.pubkey(), alice_psig).unwrap();
        assert!(!round.is_complete());
        assert_eq!(round.combine().unwrap_err(), AggregationError::RoundIncomplete);

        let bob_psig = bob
            .sign_partial(&context, &agg_key, &aggregated_nonce, &sighash)
            .unwrap();
        round.submit(0, bob.pubkey(), bob_psig).unwrap();
        assert!(round.is_complete());

        let signatures = round.combine().unwrap();
        verify_single(
            agg_key.aggregated_pubkey::<Point>(),
            signatures[&0],
            sighash,
        )
        .expect("combined signature should verify");
    }

    /// A 2-of-2 software wallet with a one-input spend, funded at the
    /// policy's (change=false, index=0) address slot.
    fn session_fixture() -> (ValidatedPolicy, Vec<Arc<dyn Cosigner>>, Psbt) {
        let alice = SoftwareCosigner::new(Scalar::try_from([0x11; 32]).unwrap(), [0xA1; 4]);
        let bob = SoftwareCosigner::new(Scalar::try_from([0x22; 32]).unwrap(), [0xB0; 4]);

        let policy = WalletPolicy {
            name: "unit wallet".to_string(),
            template: "tr(musig(@0,@1)/**)".to_string(),
            keys: vec![
                ParticipantKey {
                    pubkey: alice.pubkey(),
                    fingerprint: alice.fingerprint(),
                },
                ParticipantKey {
                    pubkey: bob.pubkey(),
                    fingerprint: bob.fingerprint(),
                },
            ],
        }
        .validate()
        .unwrap();

        let funding_script = policy.script_pubkey(false, 0).unwrap();
        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid([0xF0; 32]),
                    vout: 0,
                },
                sequence: 0xFFFF_FFFD,
            }],
            output: vec![TxOut {
                value: 90_000,
                script_pubkey: taproot_script_pubkey([0x99; 32]),
            }],
        };

        let mut psbt = Psbt::from_unsigned_tx(tx);
        psbt.inputs[0].witness_utxo = Some(TxOut {
            value: 100_000,
            script_pubkey: funding_script,
        });
        psbt.inputs[0].derivation = Some((false, 0));

        let cosigners: Vec<Arc<dyn Cosigner>> = vec![Arc::new(alice), Arc::new(bob)];
        (policy, cosigners, psbt)
    }

    #[test]
    fn session_happy_path() {
        let (policy, cosigners, psbt) = session_fixture();
        let mut session = SigningSession::new(policy.clone(), cosigners, psbt).unwrap();
        assert_eq!(session.state(), SessionState::Round1Open);

        session.run_round1().unwrap();
        assert_eq!(session.state(), SessionState::Round1Complete);
        assert!(session.psbt().round1_complete());

        session.run_round2().unwrap();
        assert_eq!(session.state(), SessionState::Round2Complete);

        let signed = session.finalize_into_psbt().unwrap();
        assert_eq!(session.state(), SessionState::Finalized);
        assert!(signed.fully_signed());

        // The embedded signature verifies against the input's output key.
        let output_key: Point = policy
            .derived_key(false, 0)
            .unwrap()
            .with_taproot_tweak(None)
            .unwrap()
            .aggregated_pubkey();
        let prevouts = vec![signed.inputs[0].witness_utxo.clone().unwrap()];
        let sighash = signed
            .unsigned_tx
            .taproot_key_spend_sighash(0, &prevouts)
            .unwrap();
        verify_single(output_key, signed.inputs[0].tap_key_sig.unwrap(), sighash)
            .expect("final signature should verify against the output key");
    }

    #[test]
    fn round2_requires_round1() {
        let (policy, cosigners, psbt) = session_fixture();
        let mut session = SigningSession::new(policy, cosigners, psbt).unwrap();

        assert_eq!(
            session.run_round2().unwrap_err(),
            SessionError::InvalidTransition {
                state: SessionState::Round1Open,
                operation: "run round 2",
            },
        );
        // An out-of-order call does not abort the session.
        assert_eq!(session.state(), SessionState::Round1Open);

        assert!(matches!(
            session.finalize_into_psbt().unwrap_err(),
            SessionError::InvalidTransition { .. },
        ));

        session.run_round1().unwrap();
        assert!(matches!(
            session.run_round1().unwrap_err(),
            SessionError::InvalidTransition { .. },
        ));
    }

    #[test]
    fn missing_cosigner_is_rejected_up_front() {
        let (policy, cosigners, psbt) = session_fixture();
        let missing_fingerprint = policy.participants()[1].fingerprint;
        let only_alice = vec![cosigners[0].clone()];

        assert_eq!(
            SigningSession::new(policy, only_alice, psbt).err().unwrap(),
            SessionError::MissingCosigner(missing_fingerprint),
        );
    }

    #[test]
    fn missing_input_metadata_is_rejected_up_front() {
        let (policy, cosigners, psbt) = session_fixture();

        let mut no_utxo = psbt.clone();
        no_utxo.inputs[0].witness_utxo = None;
        assert_eq!(
            SigningSession::new(policy.clone(), cosigners.clone(), no_utxo)
                .err()
                .unwrap(),
            SessionError::Sighash(SighashError::MissingPrevout(0)),
        );

        let mut no_derivation = psbt;
        no_derivation.inputs[0].derivation = None;
        assert_eq!(
            SigningSession::new(policy, cosigners, no_derivation)
                .err()
                .unwrap(),
            SessionError::MissingDerivation(0),
        );
    }

    #[test]
    fn mismatched_psbt_input_count_is_rejected_up_front() {
        let (policy, cosigners, psbt) = session_fixture();

        // A hand-built PSBT whose per-input list does not cover every
        // transaction input.
        let truncated = Psbt {
            unsigned_tx: psbt.unsigned_tx,
            inputs: Vec::new(),
        };
        assert_eq!(
            SigningSession::new(policy, cosigners, truncated)
                .err()
                .unwrap(),
            SessionError::Sighash(SighashError::MissingPrevout(0)),
        );
    }

    #[test]
    fn consumed_nonce_aborts_the_session() {
        let (policy, cosigners, psbt) = session_fixture();
        let mut session = SigningSession::new(policy.clone(), cosigners.clone(), psbt).unwrap();
        session.run_round1().unwrap();

        // Burn Alice's nonce behind the session's back.
        let context = SignContext {
            txid: session.txid(),
            input_index: 0,
            aggregated_pubkey: policy
                .derived_key(false, 0)
                .unwrap()
                .with_taproot_tweak(None)
                .unwrap()
                .aggregated_pubkey(),
        };
        let agg_key = policy
            .derived_key(false, 0)
            .unwrap()
            .with_taproot_tweak(None)
            .unwrap();
        let plain_key: Point = policy.derived_key(false, 0).unwrap().aggregated_pubkey();
        let burner_nonce = session.psbt().inputs[0]
            .pub_nonce(policy.participants()[0].pubkey, plain_key)
            .cloned()
            .unwrap();
        let aggnonce = AggNonce::sum([&burner_nonce]);
        cosigners[0]
            .sign_partial(&context, &agg_key, &aggnonce, &[0x77; 32])
            .unwrap();

        let err = session.run_round2().unwrap_err();
        assert_eq!(
            err,
            SessionError::Cosigner(
                policy.participants()[0].fingerprint,
                CosignerError::NonceAlreadyConsumed,
            ),
        );
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(!session.psbt().fully_signed());
    }

    #[test]
    fn session_table_releases_only_terminal_sessions() {
        let (policy, cosigners, psbt) = session_fixture();
        let session = SigningSession::new(policy, cosigners, psbt).unwrap();

        let mut table = SessionTable::new();
        let txid = table.insert(session);
        assert_eq!(table.len(), 1);
        assert!(table.take_finished(&txid).is_none());

        table.get_mut(&txid).unwrap().abort();
        assert_eq!(table.get(&txid).unwrap().state(), SessionState::Aborted);
        let finished = table.take_finished(&txid).unwrap();
        assert_eq!(finished.state(), SessionState::Aborted);
        assert!(table.is_empty());
    }
}
