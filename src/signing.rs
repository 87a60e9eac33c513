use crate::errors::{SigningError, VerifyError};
use crate::{tagged_hashes, AggNonce, AggregateKey, PubNonce, SecNonce};

use secp::{MaybeScalar, Point, Scalar, G};

use sha2::Digest as _;

/// Partial signatures are just scalars in the range `[0, n)`.
///
/// See the documentation of [`secp::MaybeScalar`] for the
/// parsing, serializing, and conversion traits available
/// on this type.
pub type PartialSignature = MaybeScalar;

/// Computes the challenge hash `e` for for a signature. You probably don't need
/// to call this directly. Instead use [`sign_partial`].
pub fn compute_challenge_hash_tweak<S: From<MaybeScalar>>(
    final_nonce_xonly: &[u8; 32],
    aggregated_pubkey: &Point,
    message: impl AsRef<[u8]>,
) -> S {
    let hash: [u8; 32] = tagged_hashes::BIP0340_CHALLENGE_TAG_HASHER
        .clone()
        .chain_update(final_nonce_xonly)
        .chain_update(aggregated_pubkey.serialize_xonly())
        .chain_update(message.as_ref())
        .finalize()
        .into();

    S::from(MaybeScalar::reduce_from(&hash))
}

/// Compute a partial signature on a message.
///
/// The partial signature returned from this function is a potentially-zero
/// scalar value which can then be passed to other signers for verification
/// and aggregation.
///
/// The signer contributes with their base secret key even if `agg_key` has
/// been derived or tweaked; the accumulated tweaks are folded in during
/// signature aggregation.
///
/// Returns an error if the given secret key does not belong to this
/// `agg_key`. As an added safety, we also verify the partial signature
/// before returning it.
pub fn sign_partial<T: From<PartialSignature>>(
    agg_key: &AggregateKey,
    seckey: impl Into<Scalar>,
    secnonce: SecNonce,
    aggregated_nonce: &AggNonce,
    message: impl AsRef<[u8]>,
) -> Result<T, SigningError> {
    let seckey: Scalar = seckey.into();
    let pubkey = seckey.base_point_mul();

    // As a side-effect, looking up the cached key coefficient also confirms
    // the individual key is indeed part of the aggregated key.
    let key_coeff = agg_key
        .key_coefficient(&pubkey)
        .ok_or(SigningError::UnknownKey)?;

    let aggregated_pubkey = agg_key.pubkey;
    let pubnonce = secnonce.public_nonce();

    let b: MaybeScalar = aggregated_nonce.nonce_coefficient(aggregated_pubkey, &message);
    let final_nonce: Point = aggregated_nonce.final_nonce(b);

    // `d` is negated if only one of the parity accumulator OR the aggregated pubkey
    // has odd parity.
    let d = seckey.negate_if(aggregated_pubkey.parity() ^ agg_key.parity_acc);

    let nonce_x_bytes = final_nonce.serialize_xonly();
    let e: MaybeScalar = compute_challenge_hash_tweak(&nonce_x_bytes, &aggregated_pubkey, &message);

    // if has_even_Y(R):
    //   k = k1 + b*k2
    // else:
    //   k = (n-k1) + b(n-k2)
    //     = n - (k1 + b*k2)
    let secnonce_sum = (secnonce.k1 + b * secnonce.k2).negate_if(final_nonce.parity());

    // s = k + e*a*d
    let partial_signature = secnonce_sum + (e * key_coeff * d);

    verify_partial(
        agg_key,
        partial_signature,
        aggregated_nonce,
        pubkey,
        &pubnonce,
        &message,
    )?;

    Ok(T::from(partial_signature))
}

/// Verify a partial signature, usually from an untrusted co-signer.
///
/// If `verify_partial` succeeds for every signature in
/// a signing session, the resulting aggregated signature is guaranteed
/// to be valid.
///
/// Returns an error if the given public key doesn't belong to the
/// `agg_key`, or if the signature is invalid.
pub fn verify_partial(
    agg_key: &AggregateKey,
    partial_signature: impl Into<PartialSignature>,
    aggregated_nonce: &AggNonce,
    individual_pubkey: impl Into<Point>,
    individual_pubnonce: &PubNonce,
    message: impl AsRef<[u8]>,
) -> Result<(), VerifyError> {
    let partial_signature: MaybeScalar = partial_signature.into();

    // As a side-effect, looking up the cached effective key also confirms
    // the individual key is indeed part of the aggregated key.
    let effective_pubkey = agg_key
        .effective_pubkey(individual_pubkey.into())
        .ok_or(VerifyError::UnknownKey)?;

    let aggregated_pubkey = agg_key.pubkey;

    let b: MaybeScalar = aggregated_nonce.nonce_coefficient(aggregated_pubkey, &message);
    let final_nonce: Point = aggregated_nonce.final_nonce(b);

    let mut effective_nonce = individual_pubnonce.R1 + b * individual_pubnonce.R2;

    // Don't need constant time ops here as final_nonce is public.
    if final_nonce.has_odd_y() {
        effective_nonce = -effective_nonce;
    }

    let nonce_x_bytes = final_nonce.serialize_xonly();
    let e: MaybeScalar = compute_challenge_hash_tweak(&nonce_x_bytes, &aggregated_pubkey, &message);

    // s * G == R + (g * gacc * e * a * P)
    let challenge_parity = aggregated_pubkey.parity() ^ agg_key.parity_acc;
    let challenge_point = (e * effective_pubkey).negate_if(challenge_parity);

    if partial_signature * G != effective_nonce + challenge_point {
        return Err(VerifyError::BadSignature);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SecNonceBuilder;

    struct Signer {
        seckey: Scalar,
        pubkey: Point,
        secnonce: SecNonce,
    }

    fn test_signers() -> Vec<Signer> {
        [[0x11u8; 32], [0x22; 32], [0x33; 32]]
            .into_iter()
            .enumerate()
            .map(|(i, seckey_bytes)| {
                let seckey = Scalar::try_from(seckey_bytes).unwrap();
                let secnonce = SecNonceBuilder::new([0xA0 + i as u8; 32])
                    .with_seckey(seckey)
                    .build();
                Signer {
                    seckey,
                    pubkey: seckey.base_point_mul(),
                    secnonce,
                }
            })
            .collect()
    }

    #[test]
    fn partial_signatures_verify() {
        let signers = test_signers();
        let agg_key = AggregateKey::new(signers.iter().map(|s| s.pubkey)).unwrap();
        let aggnonce = AggNonce::sum(signers.iter().map(|s| s.secnonce.public_nonce()));
        let message = b"hello interwebz!";

        for signer in &signers {
            let partial_signature: PartialSignature = sign_partial(
                &agg_key,
                signer.seckey,
                signer.secnonce.clone(),
                &aggnonce,
                message,
            )
            .expect("failed to create partial signature");

            verify_partial(
                &agg_key,
                partial_signature,
                &aggnonce,
                signer.pubkey,
                &signer.secnonce.public_nonce(),
                message,
            )
            .expect("failed to verify valid partial signature");
        }
    }

    #[test]
    fn partial_signatures_verify_under_tweaked_key() {
        let signers = test_signers();
        let agg_key = AggregateKey::new(signers.iter().map(|s| s.pubkey))
            .unwrap()
            .derive_path(&[0, 4])
            .unwrap()
            .with_taproot_tweak(None)
            .unwrap();

        let aggnonce = AggNonce::sum(signers.iter().map(|s| s.secnonce.public_nonce()));
        let message = b"spend it all at once";

        for signer in &signers {
            // Base keys sign; the derivation and taproot tweaks ride along
            // in the aggregate key's accumulators.
            let partial_signature: PartialSignature = sign_partial(
                &agg_key,
                signer.seckey,
                signer.secnonce.clone(),
                &aggnonce,
                message,
            )
            .expect("failed to create partial signature under tweaked key");

            verify_partial(
                &agg_key,
                partial_signature,
                &aggnonce,
                signer.pubkey,
                &signer.secnonce.public_nonce(),
                message,
            )
            .expect("failed to verify partial signature under tweaked key");
        }
    }

    #[test]
    fn foreign_seckey_cannot_sign() {
        let signers = test_signers();
        let agg_key = AggregateKey::new(signers.iter().take(2).map(|s| s.pubkey)).unwrap();
        let aggnonce = AggNonce::sum(
            signers
                .iter()
                .take(2)
                .map(|s| s.secnonce.public_nonce()),
        );

        // Signer 2 is not a member of the two-key group.
        let outsider = &signers[2];
        assert_eq!(
            sign_partial::<PartialSignature>(
                &agg_key,
                outsider.seckey,
                outsider.secnonce.clone(),
                &aggnonce,
                b"message",
            ),
            Err(SigningError::UnknownKey),
        );
    }

    #[test]
    fn tampered_partial_signature_fails_verification() {
        let signers = test_signers();
        let agg_key = AggregateKey::new(signers.iter().map(|s| s.pubkey)).unwrap();
        let aggnonce = AggNonce::sum(signers.iter().map(|s| s.secnonce.public_nonce()));
        let message = b"tamper proof";

        let partial_signature: PartialSignature = sign_partial(
            &agg_key,
            signers[0].seckey,
            signers[0].secnonce.clone(),
            &aggnonce,
            message,
        )
        .unwrap();

        let tampered = partial_signature + MaybeScalar::Valid(Scalar::one());
        assert_eq!(
            verify_partial(
                &agg_key,
                tampered,
                &aggnonce,
                signers[0].pubkey,
                &signers[0].secnonce.public_nonce(),
                message,
            ),
            Err(VerifyError::BadSignature),
        );
    }
}
