use secp::{MaybeScalar, Point, G};

use crate::errors::VerifyError;
use crate::{compute_challenge_hash_tweak, AggNonce, AggregateKey, LiftedSignature, PartialSignature};

/// Aggregate a collection of partial signatures together into a final
/// signature on a given `message`, valid under the aggregated public
/// key in `agg_key`.
///
/// Participants sign with their base keys, so this is where any tweaks
/// accumulated by `agg_key` (derivation steps and taproot commitments)
/// are folded into the final signature scalar.
///
/// Returns an error if the resulting signature would not be valid. A
/// failure here means at least one cosigner contributed a bogus partial
/// signature; the result must never be broadcast, and the session which
/// produced it must not be retried with the same nonces.
pub fn aggregate_partial_signatures<S, T>(
    agg_key: &AggregateKey,
    aggregated_nonce: &AggNonce,
    partial_signatures: impl IntoIterator<Item = S>,
    message: impl AsRef<[u8]>,
) -> Result<T, VerifyError>
where
    S: Into<PartialSignature>,
    T: From<LiftedSignature>,
{
    let aggregated_pubkey = agg_key.pubkey;

    let b: MaybeScalar = aggregated_nonce.nonce_coefficient(aggregated_pubkey, &message);
    let final_nonce: Point = aggregated_nonce.final_nonce(b);
    let nonce_x_bytes = final_nonce.serialize_xonly();
    let e: MaybeScalar = compute_challenge_hash_tweak(&nonce_x_bytes, &aggregated_pubkey, &message);

    // s = s1 + s2 + ... + sn + (g * e * tacc)
    let aggregated_signature = partial_signatures
        .into_iter()
        .map(|sig| sig.into())
        .sum::<PartialSignature>()
        + (e * agg_key.tweak_acc).negate_if(aggregated_pubkey.parity());

    let effective_nonce = if final_nonce.has_even_y() {
        final_nonce
    } else {
        -final_nonce
    };

    // Ensure the signature will verify as valid.
    if aggregated_signature * G != effective_nonce + e * aggregated_pubkey.to_even_y() {
        return Err(VerifyError::BadSignature);
    }

    Ok(T::from(LiftedSignature::new(final_nonce, aggregated_signature)))
}
