//! Cosigner handles: the uniform interface the session layer uses to talk
//! to participants, whether their key lives in this process or on a
//! hardware device behind a transport.
//!
//! The central invariant lives here: a secret nonce is usable for exactly
//! one partial signature. Each cosigner keeps a per-context nonce store
//! and marks a context consumed the moment a partial-signature request is
//! issued, before any signature comes back. Once consumed, every further
//! request for that context fails with
//! [`CosignerError::NonceAlreadyConsumed`].

use crate::errors::CosignerError;
use crate::policy::ValidatedPolicy;
use crate::transaction::Txid;
use crate::{AggNonce, AggregateKey, PartialSignature, PubNonce, SecNonce, SecNonceBuilder};

use secp::{Point, Scalar};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

/// Identifies one nonce reservation: a specific input of a specific
/// transaction, signed under a specific aggregate key. Nonce state is
/// keyed by this triple and never shared across contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignContext {
    #[allow(missing_docs)]
    pub txid: Txid,
    #[allow(missing_docs)]
    pub input_index: usize,
    /// The tweaked aggregate key the input's signature must verify under.
    pub aggregated_pubkey: Point,
}

impl SignContext {
    /// Domain-separation bytes mixed into nonce generation, binding the
    /// secret nonce to this context.
    fn extra_input(&self) -> [u8; 36] {
        let mut bytes = [0u8; 36];
        bytes[..32].copy_from_slice(&self.txid.0);
        bytes[32..].copy_from_slice(&(self.input_index as u32).to_le_bytes());
        bytes
    }
}

/// A handle on one participant of a signing session.
///
/// Implementations must be safe to share across threads; a session may
/// fan out round-1 and round-2 requests concurrently.
pub trait Cosigner: Send + Sync {
    /// The 4-byte fingerprint identifying this cosigner in wallet
    /// policies and PSBT derivation fields.
    fn fingerprint(&self) -> [u8; 4];

    /// The participant's base public key.
    fn pubkey(&self) -> Point;

    /// Whether this cosigner must be shown a wallet policy before it will
    /// sign under it. True for hardware devices, which display the policy
    /// to a human operator.
    fn requires_registration(&self) -> bool;

    /// Presents a validated policy to the cosigner for approval.
    fn register_policy(&self, policy: &ValidatedPolicy) -> Result<(), CosignerError>;

    /// Reserves a secret nonce for `context` and returns its public half.
    ///
    /// Idempotent while the nonce is unconsumed: calling again with the
    /// same context returns the same [`PubNonce`], so round state can be
    /// rebuilt from a PSBT without burning the reservation. Fails with
    /// [`CosignerError::NonceAlreadyConsumed`] once a partial signature
    /// has been requested for the context.
    fn generate_nonce(
        &self,
        context: &SignContext,
        agg_key: &AggregateKey,
    ) -> Result<PubNonce, CosignerError>;

    /// Produces a partial signature on `sighash`, consuming the context's
    /// secret nonce. Succeeds at most once per context; the nonce is
    /// spent even if the request fails after being issued.
    fn sign_partial(
        &self,
        context: &SignContext,
        agg_key: &AggregateKey,
        aggregated_nonce: &AggNonce,
        sighash: &[u8; 32],
    ) -> Result<PartialSignature, CosignerError>;

    /// Releases an unconsumed nonce reservation. Cancelling a consumed
    /// context fails with [`CosignerError::NonceAlreadyConsumed`]; a
    /// session holding such a context must abort rather than retry.
    fn cancel(&self, context: &SignContext) -> Result<(), CosignerError>;
}

enum NonceSlot {
    Fresh(SecNonce),
    Consumed,
}

/// A cosigner whose secret key lives in this process.
pub struct SoftwareCosigner {
    seckey: Scalar,
    pubkey: Point,
    fingerprint: [u8; 4],
    nonces: Mutex<HashMap<SignContext, NonceSlot>>,
}

impl SoftwareCosigner {
    /// Creates a software cosigner from a secret key and the fingerprint
    /// it is known by in wallet policies.
    pub fn new(seckey: impl Into<Scalar>, fingerprint: [u8; 4]) -> Self {
        let seckey: Scalar = seckey.into();
        SoftwareCosigner {
            pubkey: seckey.base_point_mul(),
            seckey,
            fingerprint,
            nonces: Mutex::new(HashMap::new()),
        }
    }
}

impl Cosigner for SoftwareCosigner {
    fn fingerprint(&self) -> [u8; 4] {
        self.fingerprint
    }

    fn pubkey(&self) -> Point {
        self.pubkey
    }

    fn requires_registration(&self) -> bool {
        false
    }

    fn register_policy(&self, _policy: &ValidatedPolicy) -> Result<(), CosignerError> {
        Ok(())
    }

    fn generate_nonce(
        &self,
        context: &SignContext,
        agg_key: &AggregateKey,
    ) -> Result<PubNonce, CosignerError> {
        let mut nonces = self.nonces.lock().unwrap();
        match nonces.entry(*context) {
            Entry::Occupied(entry) => match entry.get() {
                NonceSlot::Fresh(secnonce) => Ok(secnonce.public_nonce()),
                NonceSlot::Consumed => Err(CosignerError::NonceAlreadyConsumed),
            },
            Entry::Vacant(entry) => {
                let secnonce = SecNonceBuilder::new(&mut rand::rng())
                    .with_seckey(self.seckey)
                    .with_aggregated_pubkey(agg_key.aggregated_pubkey::<Point>())
                    .with_extra_input(&context.extra_input())
                    .build();
                let pubnonce = secnonce.public_nonce();
                entry.insert(NonceSlot::Fresh(secnonce));
                debug!(
                    txid = %context.txid,
                    input_index = context.input_index,
                    "reserved signing nonce"
                );
                Ok(pubnonce)
            }
        }
    }

    fn sign_partial(
        &self,
        context: &SignContext,
        agg_key: &AggregateKey,
        aggregated_nonce: &AggNonce,
        sighash: &[u8; 32],
    ) -> Result<PartialSignature, CosignerError> {
        let mut nonces = self.nonces.lock().unwrap();
        let slot = nonces
            .get_mut(context)
            .ok_or(CosignerError::UnknownContext)?;

        // Mark the nonce consumed before signing with it, so a second
        // request can never observe it as fresh.
        let secnonce = match std::mem::replace(slot, NonceSlot::Consumed) {
            NonceSlot::Fresh(secnonce) => secnonce,
            NonceSlot::Consumed => {
                warn!(
                    txid = %context.txid,
                    input_index = context.input_index,
                    "refusing repeat partial-signature request"
                );
                return Err(CosignerError::NonceAlreadyConsumed);
            }
        };
        drop(nonces);

        let partial_signature =
            crate::sign_partial(agg_key, self.seckey, secnonce, aggregated_nonce, sighash)?;
        Ok(partial_signature)
    }

    fn cancel(&self, context: &SignContext) -> Result<(), CosignerError> {
        let mut nonces = self.nonces.lock().unwrap();
        match nonces.get(context) {
            None => Err(CosignerError::UnknownContext),
            Some(NonceSlot::Consumed) => Err(CosignerError::NonceAlreadyConsumed),
            Some(NonceSlot::Fresh(_)) => {
                nonces.remove(context);
                Ok(())
            }
        }
    }
}

/// A request forwarded to a hardware signing device.
#[derive(Debug, Clone)]
pub enum DeviceRequest {
    /// Display a wallet policy for operator approval and persist its id.
    RegisterPolicy(ValidatedPolicy),

    /// Reserve a secret nonce for the context and return its public half.
    PublicNonce {
        #[allow(missing_docs)]
        context: SignContext,
        #[allow(missing_docs)]
        aggregate_key: AggregateKey,
    },

    /// Consume the context's nonce and produce a partial signature.
    PartialSignature {
        #[allow(missing_docs)]
        context: SignContext,
        #[allow(missing_docs)]
        aggregate_key: AggregateKey,
        #[allow(missing_docs)]
        aggregated_nonce: AggNonce,
        #[allow(missing_docs)]
        sighash: [u8; 32],
        /// Whether the device should require fresh operator approval for
        /// this signature rather than relying on round-1 approval.
        require_approval: bool,
    },

    /// Release an unconsumed nonce reservation.
    Cancel {
        #[allow(missing_docs)]
        context: SignContext,
    },
}

/// A hardware device's answer to a [`DeviceRequest`].
#[derive(Debug, Clone)]
pub enum DeviceResponse {
    #[allow(missing_docs)]
    PolicyRegistered,
    #[allow(missing_docs)]
    PublicNonce(PubNonce),
    #[allow(missing_docs)]
    PartialSignature(PartialSignature),
    #[allow(missing_docs)]
    Cancelled,
}

/// The channel to a hardware signing device. Implementations perform one
/// synchronous request/response exchange; errors map to
/// [`CosignerError::Disconnected`] or [`CosignerError::Rejected`].
pub trait DeviceTransport: Send {
    #[allow(missing_docs)]
    fn exchange(&mut self, request: DeviceRequest) -> Result<DeviceResponse, CosignerError>;
}

enum ContextState {
    Reserved(PubNonce),
    Consumed,
}

/// A cosigner whose secret key lives on a hardware device reached through
/// a [`DeviceTransport`].
///
/// Device access is serialized through a mutex; the handle itself tracks
/// which contexts have had a signature requested, so a nonce can never be
/// requested twice from the device even if the device's own bookkeeping
/// were faulty.
pub struct HardwareCosigner<T> {
    transport: Mutex<T>,
    fingerprint: [u8; 4],
    pubkey: Point,
    require_approval_per_round: bool,
    contexts: Mutex<HashMap<SignContext, ContextState>>,
}

impl<T: DeviceTransport> HardwareCosigner<T> {
    /// Creates a handle on a hardware cosigner. The fingerprint and public
    /// key are the device's, learned out of band (typically at wallet
    /// setup time).
    pub fn new(transport: T, fingerprint: [u8; 4], pubkey: Point) -> Self {
        HardwareCosigner {
            transport: Mutex::new(transport),
            fingerprint,
            pubkey,
            require_approval_per_round: false,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Ask the device for fresh operator approval on every round-2
    /// request, instead of treating policy registration and round-1
    /// approval as covering the signature.
    pub fn require_approval_per_round(mut self, require: bool) -> Self {
        self.require_approval_per_round = require;
        self
    }

    /// Runs a closure with exclusive access to the underlying transport.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.transport.lock().unwrap())
    }

    fn exchange(&self, request: DeviceRequest) -> Result<DeviceResponse, CosignerError> {
        self.transport.lock().unwrap().exchange(request)
    }
}

impl<T: DeviceTransport> Cosigner for HardwareCosigner<T> {
    fn fingerprint(&self) -> [u8; 4] {
        self.fingerprint
    }

    fn pubkey(&self) -> Point {
        self.pubkey
    }

    fn requires_registration(&self) -> bool {
        true
    }

    fn register_policy(&self, policy: &ValidatedPolicy) -> Result<(), CosignerError> {
        match self.exchange(DeviceRequest::RegisterPolicy(policy.clone()))? {
            DeviceResponse::PolicyRegistered => Ok(()),
            _ => Err(CosignerError::Disconnected),
        }
    }

    fn generate_nonce(
        &self,
        context: &SignContext,
        agg_key: &AggregateKey,
    ) -> Result<PubNonce, CosignerError> {
        {
            let contexts = self.contexts.lock().unwrap();
            match contexts.get(context) {
                Some(ContextState::Reserved(pubnonce)) => return Ok(pubnonce.clone()),
                Some(ContextState::Consumed) => return Err(CosignerError::NonceAlreadyConsumed),
                None => {}
            }
        }

        let response = self.exchange(DeviceRequest::PublicNonce {
            context: *context,
            aggregate_key: agg_key.clone(),
        })?;
        let pubnonce = match response {
            DeviceResponse::PublicNonce(pubnonce) => pubnonce,
            _ => return Err(CosignerError::Disconnected),
        };

        self.contexts
            .lock()
            .unwrap()
            .insert(*context, ContextState::Reserved(pubnonce.clone()));
        debug!(
            txid = %context.txid,
            input_index = context.input_index,
            fingerprint = %base16ct::lower::encode_string(&self.fingerprint),
            "device reserved signing nonce"
        );
        Ok(pubnonce)
    }

    fn sign_partial(
        &self,
        context: &SignContext,
        agg_key: &AggregateKey,
        aggregated_nonce: &AggNonce,
        sighash: &[u8; 32],
    ) -> Result<PartialSignature, CosignerError> {
        {
            // Once a signature request has been issued, the device may
            // have signed even if we never saw the response. Flip the
            // context to consumed before transmitting.
            let mut contexts = self.contexts.lock().unwrap();
            let state = contexts
                .get_mut(context)
                .ok_or(CosignerError::UnknownContext)?;
            match std::mem::replace(state, ContextState::Consumed) {
                ContextState::Reserved(_) => {}
                ContextState::Consumed => {
                    warn!(
                        txid = %context.txid,
                        input_index = context.input_index,
                        fingerprint = %base16ct::lower::encode_string(&self.fingerprint),
                        "refusing repeat partial-signature request"
                    );
                    return Err(CosignerError::NonceAlreadyConsumed);
                }
            }
        }

        let response = self.exchange(DeviceRequest::PartialSignature {
            context: *context,
            aggregate_key: agg_key.clone(),
            aggregated_nonce: aggregated_nonce.clone(),
            sighash: *sighash,
            require_approval: self.require_approval_per_round,
        })?;
        match response {
            DeviceResponse::PartialSignature(partial_signature) => Ok(partial_signature),
            _ => Err(CosignerError::Disconnected),
        }
    }

    fn cancel(&self, context: &SignContext) -> Result<(), CosignerError> {
        {
            let contexts = self.contexts.lock().unwrap();
            match contexts.get(context) {
                None => return Err(CosignerError::UnknownContext),
                Some(ContextState::Consumed) => return Err(CosignerError::NonceAlreadyConsumed),
                Some(ContextState::Reserved(_)) => {}
            }
        }

        match self.exchange(DeviceRequest::Cancel { context: *context })? {
            DeviceResponse::Cancelled => {
                self.contexts.lock().unwrap().remove(context);
                Ok(())
            }
            _ => Err(CosignerError::Disconnected),
        }
    }
}
