//! Tracks which cosigners have approved which wallet policies.
//!
//! Hardware cosigners will not sign under a policy their operator has not
//! seen and approved, so registration happens once per (policy, cosigner)
//! pair before any signing session opens. The registry keys approvals by
//! the policy's deterministic id, making repeat registration a no-op
//! rather than a second trip to the device screen.

use crate::cosigner::Cosigner;
use crate::errors::{CosignerError, RegistrationError};
use crate::policy::ValidatedPolicy;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

/// Registration state for wallet policies across a cosigner set.
#[derive(Default)]
pub struct PolicyRegistry {
    registered: HashSet<([u8; 32], [u8; 4])>,
}

impl PolicyRegistry {
    #[allow(missing_docs)]
    pub fn new() -> PolicyRegistry {
        PolicyRegistry::default()
    }

    /// Presents `policy` to every cosigner which requires registration and
    /// has not yet approved it. Stops at the first failure; cosigners
    /// already registered for this policy keep their approval.
    pub fn register(
        &mut self,
        policy: &ValidatedPolicy,
        cosigners: &[Arc<dyn Cosigner>],
    ) -> Result<(), RegistrationError> {
        let policy_id = policy.id();

        for cosigner in cosigners {
            let fingerprint = cosigner.fingerprint();
            if !cosigner.requires_registration()
                || self.registered.contains(&(policy_id, fingerprint))
            {
                continue;
            }

            cosigner
                .register_policy(policy)
                .map_err(|e| match e {
                    CosignerError::Rejected => RegistrationError::Rejected(fingerprint),
                    _ => RegistrationError::Unreachable(fingerprint),
                })?;

            self.registered.insert((policy_id, fingerprint));
            debug!(
                policy = policy.name(),
                fingerprint = %base16ct::lower::encode_string(&fingerprint),
                "cosigner registered wallet policy"
            );
        }
        Ok(())
    }

    /// True if the given cosigner has approved the given policy (or never
    /// needed to).
    pub fn is_registered(&self, policy: &ValidatedPolicy, cosigner: &dyn Cosigner) -> bool {
        !cosigner.requires_registration()
            || self
                .registered
                .contains(&(policy.id(), cosigner.fingerprint()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosigner::SignContext;
    use crate::errors::CosignerError;
    use crate::policy::{ParticipantKey, WalletPolicy};
    use crate::{AggNonce, AggregateKey, PartialSignature, PubNonce};

    use secp::{Point, Scalar};

    use std::sync::Mutex;

    /// Counts registration attempts and fails them on demand.
    struct RecordingCosigner {
        pubkey: Point,
        fingerprint: [u8; 4],
        register_calls: Mutex<usize>,
        failure: Mutex<Option<CosignerError>>,
    }

    impl RecordingCosigner {
        fn new(seckey_byte: u8, fingerprint: [u8; 4]) -> Self {
            RecordingCosigner {
                pubkey: Scalar::try_from([seckey_byte; 32])
                    .unwrap()
                    .base_point_mul(),
                fingerprint,
                register_calls: Mutex::new(0),
                failure: Mutex::new(None),
            }
        }

        fn calls(&self) -> usize {
            *self.register_calls.lock().unwrap()
        }
    }

    impl Cosigner for RecordingCosigner {
        fn fingerprint(&self) -> [u8; 4] {
            self.fingerprint
        }

        fn pubkey(&self) -> Point {
            self.pubkey
        }

        fn requires_registration(&self) -> bool {
            true
        }

        fn register_policy(&self, _policy: &ValidatedPolicy) -> Result<(), CosignerError> {
            *self.register_calls.lock().unwrap() += 1;
            match self.failure.lock().unwrap().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn generate_nonce(
            &self,
            _: &SignContext,
            _: &AggregateKey,
        ) -> Result<PubNonce, CosignerError> {
            unimplemented!("not used by registry tests")
        }

        fn sign_partial(
            &self,
            _: &SignContext,
            _: &AggregateKey,
            _: &AggNonce,
            _: &[u8; 32],
        ) -> Result<PartialSignature, CosignerError> {
            unimplemented!("not used by registry tests")
        }

        fn cancel(&self, _: &SignContext) -> Result<(), CosignerError> {
            unimplemented!("not used by registry tests")
        }
    }

    fn test_policy(keys: &[&RecordingCosigner]) -> ValidatedPolicy {
        WalletPolicy {
            name: "registry wallet".to_string(),
            template: "tr(musig(@0,@1)/**)".to_string(),
            keys: keys
                .iter()
                .map(|cosigner| ParticipantKey {
                    pubkey: cosigner.pubkey,
                    fingerprint: cosigner.fingerprint,
                })
                .collect(),
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn registration_is_idempotent_per_policy_and_cosigner() {
        let alice = Arc::new(RecordingCosigner::new(0x11, [0xA1; 4]));
        let bob = Arc::new(RecordingCosigner::new(0x22, [0xB0; 4]));
        let policy = test_policy(&[&alice, &bob]);
        let cosigners: Vec<Arc<dyn Cosigner>> = vec![alice.clone(), bob.clone()];

        let mut registry = PolicyRegistry::new();
        assert!(!registry.is_registered(&policy, alice.as_ref()));

        registry.register(&policy, &cosigners).unwrap();
        assert_eq!(alice.calls(), 1);
        assert_eq!(bob.calls(), 1);
        assert!(registry.is_registered(&policy, alice.as_ref()));

        // A second pass never goes back to the devices.
        registry.register(&policy, &cosigners).unwrap();
        assert_eq!(alice.calls(), 1);
        assert_eq!(bob.calls(), 1);

        // A different policy does.
        let other_policy = WalletPolicy {
            name: "other wallet".to_string(),
            template: "tr(musig(@0,@1)/**)".to_string(),
            keys: policy.participants().to_vec(),
        }
        .validate()
        .unwrap();
        registry.register(&other_policy, &cosigners).unwrap();
        assert_eq!(alice.calls(), 2);
    }

    #[test]
    fn rejection_and_disconnection_map_to_distinct_errors() {
        let alice = Arc::new(RecordingCosigner::new(0x11, [0xA1; 4]));
        let bob = Arc::new(RecordingCosigner::new(0x22, [0xB0; 4]));
        let policy = test_policy(&[&alice, &bob]);
        let cosigners: Vec<Arc<dyn Cosigner>> = vec![alice.clone(), bob.clone()];

        let mut registry = PolicyRegistry::new();

        *bob.failure.lock().unwrap() = Some(CosignerError::Rejected);
        assert_eq!(
            registry.register(&policy, &cosigners).unwrap_err(),
            RegistrationError::Rejected([0xB0; 4]),
        );
        // Alice's approval survives the failed attempt.
        assert!(registry.is_registered(&policy, alice.as_ref()));
        assert!(!registry.is_registered(&policy, bob.as_ref()));

        *bob.failure.lock().unwrap() = Some(CosignerError::Disconnected);
        assert_eq!(
            registry.register(&policy, &cosigners).unwrap_err(),
            RegistrationError::Unreachable([0xB0; 4]),
        );

        *bob.failure.lock().unwrap() = None;
        registry.register(&policy, &cosigners).unwrap();
        assert_eq!(alice.calls(), 1);
        assert!(registry.is_registered(&policy, bob.as_ref()));
    }

    #[test]
    fn software_cosigners_skip_registration() {
        let device = Arc::new(RecordingCosigner::new(0x11, [0xA1; 4]));
        let software = Arc::new(crate::cosigner::SoftwareCosigner::new(
            Scalar::try_from([0x22; 32]).unwrap(),
            [0xB0; 4],
        ));
        let policy = WalletPolicy {
            name: "mixed wallet".to_string(),
            template: "tr(musig(@0,@1)/**)".to_string(),
            keys: vec![
                ParticipantKey {
                    pubkey: device.pubkey(),
                    fingerprint: device.fingerprint(),
                },
                ParticipantKey {
                    pubkey: software.pubkey(),
                    fingerprint: software.fingerprint(),
                },
            ],
        }
        .validate()
        .unwrap();

        let cosigners: Vec<Arc<dyn Cosigner>> = vec![device.clone(), software.clone()];
        let mut registry = PolicyRegistry::new();
        registry.register(&policy, &cosigners).unwrap();

        assert_eq!(device.calls(), 1);
        assert!(registry.is_registered(&policy, software.as_ref()));
    }
}
