//! Wallet policies for aggregate-then-derive multisignature wallets.
//!
//! A [`WalletPolicy`] pairs a descriptor template with the key information
//! for each `@i` placeholder. Only a restricted subset of the descriptor
//! grammar is supported: a taproot key-path spend of a single musig
//! expression, with one derivation suffix applied to the *aggregate* key:
//!
//! ```text
//! tr(musig(@0,@1)/**)
//! tr(musig(@0,@1,@2)/<0;1>/*)
//! ```
//!
//! The derive-then-aggregate shape `musig(@0/**,@1/**)` requires every
//! participant to re-run key aggregation for each address. Policies of that
//! shape are rejected with [`PolicyError::NestedDerivation`] and are never
//! supported.

use crate::errors::{DerivationError, PolicyError};
use crate::transaction::taproot_script_pubkey;
use crate::AggregateKey;

use secp::Point;

use sha2::{Digest as _, Sha256};

/// One entry in a policy's key information list, matched to a template
/// placeholder by position: `keys[i]` fills `@i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantKey {
    /// The participant's base public key. Signing always happens with the
    /// secret key behind this point; derivation applies to the aggregate.
    pub pubkey: Point,

    /// Identifies which cosigner holds the matching secret key.
    pub fingerprint: [u8; 4],
}

/// An unvalidated wallet policy: a name, a descriptor template with `@i`
/// placeholders, and the key list filling them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletPolicy {
    #[allow(missing_docs)]
    pub name: String,

    /// The descriptor template, e.g. `tr(musig(@0,@1)/**)`.
    pub template: String,

    /// Key information for each placeholder, indexed by placeholder number.
    pub keys: Vec<ParticipantKey>,
}

/// The derivation suffix applied to the aggregate key. The wildcard `/**`
/// is shorthand for `/<0;1>/*`: a change branch and an address index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DerivationSuffix {
    /// `/**`
    Wildcard,

    /// `/<a;b>/*` with explicit external and change branch indexes.
    Branches(u32, u32),
}

impl DerivationSuffix {
    fn path(&self, change: bool, address_index: u32) -> [u32; 2] {
        let (external, internal) = match *self {
            Self::Wildcard => (0, 1),
            Self::Branches(a, b) => (a, b),
        };
        [if change { internal } else { external }, address_index]
    }
}

/// A [`WalletPolicy`] which passed validation. Carries the aggregate key of
/// the musig participants and a deterministic policy id.
///
/// Obtained only through [`WalletPolicy::validate`], so holding a
/// `ValidatedPolicy` proves the template is in the supported subset.
#[derive(Debug, Clone)]
pub struct ValidatedPolicy {
    policy: WalletPolicy,
    participants: Vec<ParticipantKey>,
    suffix: DerivationSuffix,
    aggregate_key: AggregateKey,
    id: [u8; 32],
}

impl WalletPolicy {
    /// Validates the policy against the supported aggregate-then-derive
    /// grammar, aggregating the participant keys in the process.
    pub fn validate(&self) -> Result<ValidatedPolicy, PolicyError> {
        let malformed = || PolicyError::MalformedTemplate(self.template.clone());

        let inner = self
            .template
            .strip_prefix("tr(")
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(malformed)?;

        let keyexpr = inner.strip_prefix("musig(").ok_or_else(malformed)?;
        let close = keyexpr.find(')').ok_or_else(malformed)?;
        let (placeholder_list, suffix) = (&keyexpr[..close], &keyexpr[close + 1..]);

        let mut indexes = Vec::new();
        for placeholder in placeholder_list.split(',') {
            if placeholder.contains('/') {
                return Err(PolicyError::NestedDerivation);
            }
            let index: usize = placeholder
                .strip_prefix('@')
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(malformed)?;
            if indexes.contains(&index) {
                return Err(PolicyError::DuplicateParticipant);
            }
            indexes.push(index);
        }
        if indexes.len() < 2 {
            return Err(PolicyError::NotEnoughParticipants);
        }

        let suffix = parse_suffix(suffix).ok_or_else(malformed)?;

        let mut participants = Vec::with_capacity(indexes.len());
        for index in indexes {
            let key = *self
                .keys
                .get(index)
                .ok_or(PolicyError::UnknownPlaceholder(index))?;
            if participants
                .iter()
                .any(|existing: &ParticipantKey| existing.pubkey == key.pubkey)
            {
                return Err(PolicyError::DuplicateParticipant);
            }
            participants.push(key);
        }

        let aggregate_key = AggregateKey::new(participants.iter().map(|key| key.pubkey))?;

        Ok(ValidatedPolicy {
            id: self.id(),
            policy: self.clone(),
            participants,
            suffix,
            aggregate_key,
        })
    }

    /// A deterministic policy id: the SHA-256 of the name, template, and
    /// key list. Registration state is keyed by this id.
    pub fn id(&self) -> [u8; 32] {
        let mut hasher = Sha256::new()
            .chain_update(self.name.as_bytes())
            .chain_update([0u8])
            .chain_update(self.template.as_bytes())
            .chain_update([0u8]);
        for key in &self.keys {
            hasher.update(key.pubkey.serialize());
            hasher.update(key.fingerprint);
        }
        hasher.finalize().into()
    }
}

/// Parses `/**` or `/<a;b>/*`.
fn parse_suffix(suffix: &str) -> Option<DerivationSuffix> {
    if suffix == "/**" {
        return Some(DerivationSuffix::Wildcard);
    }
    let branches = suffix.strip_prefix("/<")?.strip_suffix(">/*")?;
    let (a, b) = branches.split_once(';')?;
    Some(DerivationSuffix::Branches(a.parse().ok()?, b.parse().ok()?))
}

impl ValidatedPolicy {
    /// The deterministic id of the underlying policy.
    pub fn id(&self) -> [u8; 32] {
        self.id
    }

    /// The policy's human-readable name.
    pub fn name(&self) -> &str {
        &self.policy.name
    }

    /// The original descriptor template.
    pub fn template(&self) -> &str {
        &self.policy.template
    }

    /// The musig participants, in the order the template lists them.
    pub fn participants(&self) -> &[ParticipantKey] {
        &self.participants
    }

    /// Looks up a participant by cosigner fingerprint.
    pub fn participant_by_fingerprint(&self, fingerprint: [u8; 4]) -> Option<&ParticipantKey> {
        self.participants
            .iter()
            .find(|key| key.fingerprint == fingerprint)
    }

    /// The base (underived, untweaked) aggregate key of the participants.
    pub fn aggregate_key(&self) -> &AggregateKey {
        &self.aggregate_key
    }

    /// Derives the aggregate key for an address slot, without the taproot
    /// output tweak. This is the key participants' partial signatures are
    /// coordinated under.
    pub fn derived_key(
        &self,
        change: bool,
        address_index: u32,
    ) -> Result<AggregateKey, DerivationError> {
        self.aggregate_key
            .clone()
            .derive_path(&self.suffix.path(change, address_index))
    }

    /// The script pubkey of an address slot: `OP_1 <xonly output key>`,
    /// where the output key is the derived aggregate key with the
    /// key-path-only taproot commitment.
    pub fn script_pubkey(
        &self,
        change: bool,
        address_index: u32,
    ) -> Result<Vec<u8>, DerivationError> {
        let output_key = self
            .derived_key(change, address_index)?
            .with_taproot_tweak(None)?;
        Ok(taproot_script_pubkey(
            output_key.aggregated_pubkey::<Point>().serialize_xonly(),
        ))
    }
}
