use crate::errors::VerifyError;
use crate::{compute_challenge_hash_tweak, CompactSignature};

use secp::{MaybeScalar, Point, G};

use subtle::ConstantTimeEq as _;

/// Verifies a [BIP340-compatible](https://github.com/bitcoin/bips/blob/master/bip-0340.mediawiki)
/// Schnorr signature, which could be aggregated or from a single-signer.
///
/// The `signature` argument is parsed as a [`CompactSignature`]. You may pass any
/// type which converts fallibly to a [`CompactSignature`], including `&[u8]`, `[u8; 64]`,
/// `LiftedSignature`, and so on.
///
/// Returns an error if the signature is invalid.
pub fn verify_single<P, T>(
    pubkey: P,
    signature: T,
    message: impl AsRef<[u8]>,
) -> Result<(), VerifyError>
where
    Point: From<P>,
    CompactSignature: TryFrom<T>,
{
    use VerifyError::BadSignature;

    let pubkey = Point::from(pubkey).to_even_y(); // lift_x(x(P))
    let CompactSignature { rx, s } =
        CompactSignature::try_from(signature).map_err(|_| BadSignature)?;
    let e: MaybeScalar = compute_challenge_hash_tweak(&rx, &pubkey, message);

    // Instead of the usual sG = R + eD schnorr equation, we swap things around
    // slightly, thus avoiding the need to lift the x-only nonce.
    //
    // sG = R + eD
    // R = sG - eD
    let verification_point = (s * G - e * pubkey).not_inf().map_err(|_| BadSignature)?;
    if verification_point.has_odd_y() {
        return Err(BadSignature);
    }

    let valid = verification_point.serialize_xonly().ct_eq(&rx);
    if bool::from(valid) {
        Ok(())
    } else {
        Err(BadSignature)
    }
}
