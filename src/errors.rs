//! Error types for every stage of the coordination pipeline, from policy
//! validation through final signature aggregation.

use std::error::Error;
use std::fmt;

/// Returned when aggregating a collection of participant keys results
/// in the point at infinity.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct KeyAggError;
impl fmt::Display for KeyAggError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("computed an invalid aggregated key from a collection of participant keys")
    }
}
impl Error for KeyAggError {}
impl From<secp::errors::InfinityPointError> for KeyAggError {
    fn from(_: secp::errors::InfinityPointError) -> Self {
        KeyAggError
    }
}

/// Returned when tweaking an [`AggregateKey`][crate::AggregateKey] results in
/// the point at infinity, or if a taproot tweak input reduces to a hash which
/// exceeds the curve order (exceedingly unlikely).
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct TweakError;
impl fmt::Display for TweakError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("tweak value is invalid")
    }
}
impl Error for TweakError {}
impl From<secp::errors::InfinityPointError> for TweakError {
    fn from(_: secp::errors::InfinityPointError) -> Self {
        TweakError
    }
}

/// Returned when child-key derivation over an aggregate key fails.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DerivationError {
    /// A hardened derivation step was requested. Hardened steps cannot be
    /// computed from public material, so the aggregate-then-derive scheme
    /// only supports unhardened child indexes.
    HardenedUnsupported,

    /// The derivation produced an out-of-range tweak or an invalid child
    /// point. The chance of this occurring with honest inputs is negligible.
    InvalidTweak,
}
impl fmt::Display for DerivationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HardenedUnsupported => {
                f.write_str("hardened derivation is not possible on an aggregate public key")
            }
            Self::InvalidTweak => f.write_str("derivation produced an invalid tweak"),
        }
    }
}
impl Error for DerivationError {}
impl From<TweakError> for DerivationError {
    fn from(_: TweakError) -> Self {
        DerivationError::InvalidTweak
    }
}

/// Returned when a wallet policy fails validation against the supported
/// aggregate-then-derive subset of the policy grammar.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PolicyError {
    /// The descriptor template could not be parsed at all.
    MalformedTemplate(String),

    /// A `musig(...)` participant carries its own derivation steps, i.e.
    /// the `musig(@0/**,@1/**)` shape. Only whole keys may appear inside
    /// `musig(...)`, followed by a single derivation suffix on the
    /// aggregate.
    NestedDerivation,

    /// The same participant key appears more than once in one
    /// `musig(...)` expression.
    DuplicateParticipant,

    /// A `musig(...)` expression names fewer than two participants.
    NotEnoughParticipants,

    /// The template references a key index with no matching entry in the
    /// policy's key list.
    UnknownPlaceholder(usize),

    /// The participant keys could not be aggregated.
    KeyAgg(KeyAggError),
}
impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "invalid wallet policy: {}",
            match self {
                Self::MalformedTemplate(tmpl) => format!("cannot parse template {:?}", tmpl),
                Self::NestedDerivation =>
                    "musig participants must be whole keys without derivation".to_string(),
                Self::DuplicateParticipant =>
                    "duplicate participant key in musig expression".to_string(),
                Self::NotEnoughParticipants =>
                    "musig expressions need at least two participants".to_string(),
                Self::UnknownPlaceholder(i) => format!("key placeholder @{} has no key info", i),
                Self::KeyAgg(e) => e.to_string(),
            }
        )
    }
}
impl Error for PolicyError {}
impl From<KeyAggError> for PolicyError {
    fn from(e: KeyAggError) -> Self {
        PolicyError::KeyAgg(e)
    }
}

/// Returned when registering a validated policy with the cosigner set fails.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RegistrationError {
    /// A cosigner declined the policy. For a hardware cosigner this
    /// usually means the human operator rejected it on the device screen.
    /// Embeds the fingerprint of the declining cosigner.
    Rejected([u8; 4]),

    /// A cosigner could not be contacted. Embeds the fingerprint of the
    /// unreachable cosigner.
    Unreachable([u8; 4]),
}
impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (fpr, reason) = match self {
            Self::Rejected(fpr) => (fpr, "declined the policy"),
            Self::Unreachable(fpr) => (fpr, "could not be contacted"),
        };
        write!(
            f,
            "policy registration failed: cosigner {} {}",
            base16ct::lower::encode_string(fpr),
            reason
        )
    }
}
impl Error for RegistrationError {}

/// Returned when submitting a contribution to a signing round, or when
/// attempting to read results out of a round which is not ready.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RoundError {
    /// This participant has already contributed for this input. Repeat
    /// contributions are never overwritten, even if identical.
    DuplicateContribution {
        /// The transaction input index of the offending contribution.
        input_index: usize,
    },

    /// The contributing key is not a member of the input's aggregate key.
    UnknownParticipant,

    /// The contribution failed verification against the contributor's
    /// public nonce and is not accepted into the round.
    InvalidContribution {
        /// The transaction input index of the offending contribution.
        input_index: usize,
    },

    /// The given input index is not part of this round.
    UnknownInput(usize),

    /// The round is missing contributions and cannot be aggregated
    /// or advanced yet.
    RoundIncomplete,
}
impl fmt::Display for RoundError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DuplicateContribution { input_index } => write!(
                f,
                "participant already contributed for input {}",
                input_index
            ),
            Self::UnknownParticipant => {
                f.write_str("contributor is not a participant of the aggregate key")
            }
            Self::InvalidContribution { input_index } => write!(
                f,
                "contribution for input {} failed verification",
                input_index
            ),
            Self::UnknownInput(i) => write!(f, "input {} is not part of this round", i),
            Self::RoundIncomplete => f.write_str("round is missing contributions"),
        }
    }
}
impl Error for RoundError {}

/// Error returned when partial signing fails.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SigningError {
    /// The signing key is not a member of the aggregate key group.
    UnknownKey,

    /// We could not verify the signature we produced. This may indicate a
    /// malicious actor attempted to make us produce a signature which could
    /// reveal our secret key. The signing session should be aborted and
    /// retried with new nonces.
    SelfVerifyFail,
}
impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "failed to create signature: {}",
            match self {
                Self::UnknownKey => "signing key is not a member of the group",
                Self::SelfVerifyFail => "failed to verify our own signature; something is wrong",
            }
        )
    }
}
impl Error for SigningError {}

/// Error returned when verification fails.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum VerifyError {
    /// A public key was provided which is not a member of the signing
    /// group, so partial signature verification on it has no meaning.
    UnknownKey,

    /// The signature is not valid for the given key and message.
    BadSignature,
}
impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "failed to verify signature: {}",
            match self {
                Self::UnknownKey => "public key is not a member of the group",
                Self::BadSignature => "signature is invalid",
            }
        )
    }
}
impl Error for VerifyError {}

impl From<VerifyError> for SigningError {
    fn from(_: VerifyError) -> Self {
        SigningError::SelfVerifyFail
    }
}

/// Returned by [`Cosigner`][crate::Cosigner] operations.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CosignerError {
    /// The cosigner could not be contacted, or the connection dropped
    /// mid-exchange.
    Disconnected,

    /// The cosigner (for hardware, the human operator) refused the request.
    Rejected,

    /// The secret nonce for this context was already consumed by a previous
    /// partial-signature request. Producing a second partial signature with
    /// the same nonce would expose the cosigner's secret key, so this is
    /// never allowed.
    NonceAlreadyConsumed,

    /// No nonce was ever generated for this context.
    UnknownContext,

    /// The underlying partial-signing operation failed.
    Signing(SigningError),
}
impl fmt::Display for CosignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "cosigner operation failed: {}",
            match self {
                Self::Disconnected => "cosigner is unreachable".to_string(),
                Self::Rejected => "cosigner rejected the request".to_string(),
                Self::NonceAlreadyConsumed =>
                    "secret nonce for this context was already consumed".to_string(),
                Self::UnknownContext => "no nonce exists for this context".to_string(),
                Self::Signing(e) => e.to_string(),
            }
        )
    }
}
impl Error for CosignerError {}
impl From<SigningError> for CosignerError {
    fn from(e: SigningError) -> Self {
        CosignerError::Signing(e)
    }
}

/// Returned when combining partial signatures into a final signature fails.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AggregationError {
    /// The round is missing partial signatures.
    RoundIncomplete,

    /// The combined signature failed verification against the input's
    /// tweaked aggregate key. This indicates a faulty or malicious cosigner.
    /// The signature must never be embedded in a transaction, and the
    /// session must not be retried without fresh nonces.
    InvalidCombinedSignature {
        /// The transaction input whose signature failed to verify.
        input_index: usize,
    },
}
impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RoundIncomplete => f.write_str("cannot combine an incomplete signature round"),
            Self::InvalidCombinedSignature { input_index } => write!(
                f,
                "combined signature for input {} failed verification",
                input_index
            ),
        }
    }
}
impl Error for AggregationError {}

/// Returned when computing the taproot key-spend sighash for a PSBT input.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SighashError {
    /// The input index exceeds the transaction's input count.
    InvalidInputIndex(usize),

    /// An input is missing its witness UTXO, which is required to commit
    /// to all spent amounts and script pubkeys.
    MissingPrevout(usize),
}
impl fmt::Display for SighashError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidInputIndex(i) => write!(f, "invalid input index {}", i),
            Self::MissingPrevout(i) => write!(f, "missing witness utxo for input {}", i),
        }
    }
}
impl Error for SighashError {}

/// Returned by [`SigningSession`][crate::SigningSession] operations. Any of
/// these except an out-of-order call aborts the whole session; a PSBT with
/// mixed per-input completion is not safely finalizable.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SessionError {
    /// The requested operation is not valid in the session's current state,
    /// e.g. opening round 2 before round 1 has completed.
    InvalidTransition {
        /// The state the session was in when the operation was requested.
        state: crate::SessionState,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// No cosigner handle was supplied for a required participant key.
    /// Embeds the participant's fingerprint.
    MissingCosigner([u8; 4]),

    /// The PSBT input has no derivation information for the aggregate key.
    MissingDerivation(usize),

    /// Sighash computation failed for an input.
    Sighash(SighashError),

    /// Per-input key derivation failed.
    Derivation(DerivationError),

    /// Applying the taproot output tweak failed.
    Tweak(TweakError),

    /// A round operation failed.
    Round(RoundError),

    /// A cosigner failed or refused mid-session. Embeds the fingerprint
    /// of the failed cosigner.
    Cosigner([u8; 4], CosignerError),

    /// Combining partial signatures failed.
    Aggregation(AggregationError),
}
impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidTransition { state, operation } => {
                write!(f, "cannot {} in session state {:?}", operation, state)
            }
            Self::MissingCosigner(fpr) => write!(
                f,
                "no cosigner handle for participant fingerprint {}",
                base16ct::lower::encode_string(fpr)
            ),
            Self::MissingDerivation(i) => {
                write!(f, "psbt input {} has no derivation information", i)
            }
            Self::Sighash(e) => e.fmt(f),
            Self::Derivation(e) => e.fmt(f),
            Self::Tweak(e) => e.fmt(f),
            Self::Round(e) => e.fmt(f),
            Self::Cosigner(fpr, e) => write!(
                f,
                "cosigner {} failed: {}",
                base16ct::lower::encode_string(fpr),
                e
            ),
            Self::Aggregation(e) => e.fmt(f),
        }
    }
}
impl Error for SessionError {}

impl From<SighashError> for SessionError {
    fn from(e: SighashError) -> Self {
        SessionError::Sighash(e)
    }
}
impl From<DerivationError> for SessionError {
    fn from(e: DerivationError) -> Self {
        SessionError::Derivation(e)
    }
}
impl From<TweakError> for SessionError {
    fn from(e: TweakError) -> Self {
        SessionError::Tweak(e)
    }
}
impl From<RoundError> for SessionError {
    fn from(e: RoundError) -> Self {
        SessionError::Round(e)
    }
}
impl From<AggregationError> for SessionError {
    fn from(e: AggregationError) -> Self {
        SessionError::Aggregation(e)
    }
}

/// Enumerates the various reasons why binary or hex decoding could fail.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DecodeFailureReason {
    /// The hex string's format was incorrect, which could mean it either
    /// was the wrong length or held invalid characters.
    BadHexFormat(base16ct::Error),

    /// The byte slice we tried to deserialize had the wrong length.
    BadLength(usize),

    /// The bytes contained coordinates to a point that is not on the
    /// secp256k1 curve.
    InvalidPoint,

    /// The byte slice contained a representation of a scalar which is
    /// outside the required finite field's range.
    InvalidScalar,

    /// Custom error reason.
    Custom(String),
}

/// Returned when decoding a certain data structure of type `T` fails.
///
/// The type `T` only serves as a compile-time safety check; no data of
/// type `T` is actually owned by this error.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DecodeError<T> {
    /// The reason for the decoding failure.
    pub reason: DecodeFailureReason,
    phantom: std::marker::PhantomData<T>,
}

impl<T> DecodeError<T> {
    /// Construct a new decoding error for type `T` given a cause for
    /// the failure.
    pub fn new(reason: DecodeFailureReason) -> Self {
        DecodeError {
            reason,
            phantom: std::marker::PhantomData,
        }
    }

    /// Create a decoding error caused by an incorrect input byte
    /// slice length.
    pub fn bad_length(size: usize) -> Self {
        DecodeError::new(DecodeFailureReason::BadLength(size))
    }

    /// Create a custom decoding failure.
    pub fn custom(s: impl fmt::Display) -> Self {
        DecodeError::new(DecodeFailureReason::Custom(s.to_string()))
    }

    /// Converts the decoding error for one type into that of another type.
    pub fn convert<U>(self) -> DecodeError<U> {
        DecodeError::new(self.reason)
    }
}

impl<T> fmt::Display for DecodeError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DecodeFailureReason::*;

        write!(
            f,
            "error decoding {}: {}",
            std::any::type_name::<T>(),
            match &self.reason {
                BadHexFormat(e) => format!("hex decoding error: {}", e),
                BadLength(size) => format!("unexpected length {}", size),
                InvalidPoint => secp::errors::InvalidPointBytes.to_string(),
                InvalidScalar => secp::errors::InvalidScalarBytes.to_string(),
                Custom(s) => s.to_string(),
            }
        )
    }
}

impl<T> std::error::Error for DecodeError<T> where T: std::fmt::Debug {}

impl<T> From<secp::errors::InvalidPointBytes> for DecodeError<T> {
    fn from(_: secp::errors::InvalidPointBytes) -> Self {
        DecodeError::new(DecodeFailureReason::InvalidPoint)
    }
}

impl<T> From<secp::errors::InvalidScalarBytes> for DecodeError<T> {
    fn from(_: secp::errors::InvalidScalarBytes) -> Self {
        DecodeError::new(DecodeFailureReason::InvalidScalar)
    }
}

impl<T> From<base16ct::Error> for DecodeError<T> {
    fn from(e: base16ct::Error) -> Self {
        DecodeError::new(DecodeFailureReason::BadHexFormat(e))
    }
}
