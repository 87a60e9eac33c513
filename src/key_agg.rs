use secp::{MaybePoint, MaybeScalar, Point, Scalar, G};
use std::collections::HashMap;

use crate::errors::{DerivationError, KeyAggError, TweakError};
use crate::tagged_hashes;

use hmac::digest::FixedOutput as _;
use hmac::Mac as _;
use sha2::Digest as _;
use subtle::ConstantTimeEq as _;

/// The synthetic chain code shared by every aggregate key: `sha256(b"MuSig2MuSig2MuSig2")`.
///
/// Using a fixed, publicly known chain code means an aggregate extended key
/// carries no entropy beyond its participant set, so any party who knows the
/// participants can derive the same child keys.
pub const MUSIG_CHAIN_CODE: [u8; 32] = [
    0x86, 0x80, 0x87, 0xca, 0x02, 0xa6, 0xf9, 0x74, 0xc4, 0x59, 0x89, 0x24, 0xc3, 0x6b, 0x57, 0x76,
    0x2d, 0x32, 0xcb, 0x45, 0x71, 0x71, 0x67, 0xe3, 0x00, 0x62, 0x2c, 0x71, 0x67, 0xe3, 0x89, 0x65,
];

/// An aggregated, optionally tweaked and derived public key.
///
/// A set of participant pubkeys is aggregated into an `AggregateKey` with
/// which the whole cohort can cooperatively sign messages. The participant
/// set is sorted and deduplicated on construction, so any two parties who
/// agree on the set of participants compute the same aggregate key, no
/// matter what order they listed the keys in.
///
/// The key structure is always aggregate-then-derive: unhardened BIP32-style
/// child steps ([`derive_child`][Self::derive_child]) and taproot output
/// tweaks ([`with_taproot_tweak`][Self::with_taproot_tweak]) are applied to
/// the already-aggregated key. Participants keep signing with their base
/// secret keys; the accumulated tweaks are folded in during partial-signature
/// aggregation.
#[derive(Debug, Clone)]
pub struct AggregateKey {
    /// The aggregated pubkey point `Q`, with all tweaks applied.
    pub(crate) pubkey: Point,

    /// The component individual pubkeys, sorted by their compressed
    /// encodings and deduplicated.
    pub(crate) sorted_pubkeys: Vec<Point>,

    /// A map of pubkeys to their indexes in the
    /// [`sorted_pubkeys`][Self::sorted_pubkeys] field.
    pub(crate) pubkey_indexes: HashMap<Point, usize>,

    /// Cached key aggregation coefficients of individual pubkeys, in the
    /// same order as `sorted_pubkeys`.
    pub(crate) key_coefficients: Vec<MaybeScalar>,

    /// BIP32 chain code used for unhardened child derivation.
    pub(crate) chain_code: [u8; 32],

    pub(crate) parity_acc: subtle::Choice, // false means g=1, true means g=n-1
    pub(crate) tweak_acc: MaybeScalar,     // None means zero.
}

impl AggregateKey {
    /// Constructs an aggregate key for a given set of participant pubkeys.
    ///
    /// The pubkeys are sorted by their compressed encodings and deduplicated
    /// before aggregation, so the resulting key depends only on the set of
    /// distinct participants and not on presentation order.
    ///
    /// ```
    /// use secp::Point;
    /// use corral::AggregateKey;
    ///
    /// let alice: Point = "02F9308A019258C31049344F85F89D5229B531C845836F99B08601F113BCE036F9"
    ///     .parse()
    ///     .unwrap();
    /// let bob: Point = "03DFF1D77F2A671C5F36183726DB2341BE58FEAE1DA2DECED843240F7B502BA659"
    ///     .parse()
    ///     .unwrap();
    ///
    /// let agg = AggregateKey::new([alice, bob]).expect("error aggregating pubkeys");
    /// let agg_flipped = AggregateKey::new([bob, alice]).unwrap();
    /// assert_eq!(
    ///     agg.aggregated_pubkey::<Point>(),
    ///     agg_flipped.aggregated_pubkey::<Point>(),
    /// );
    /// ```
    ///
    /// The fresh aggregate key carries the fixed [`MUSIG_CHAIN_CODE`] so that
    /// unhardened child keys can be derived from public material alone.
    pub fn new<I, T>(pubkeys: I) -> Result<Self, KeyAggError>
    where
        I: IntoIterator<Item = T>,
        Point: From<T>,
    {
        let mut sorted_pubkeys: Vec<Point> = pubkeys.into_iter().map(Point::from).collect();
        assert!(!sorted_pubkeys.is_empty(), "received empty set of pubkeys");
        sorted_pubkeys.sort_by(|a, b| a.serialize().cmp(&b.serialize()));
        sorted_pubkeys.dedup();
        assert!(
            sorted_pubkeys.len() <= u32::MAX as usize,
            "max number of pubkeys is u32::MAX"
        );

        // After dedup, all keys are distinct, so `pk2` is simply the second
        // key. It is exempted from coefficient tweaking (see appendix B of
        // the musig2 paper). A singleton set has no second key and every
        // key gets the full coefficient `H_agg(L, X)`.
        let pk2: Option<&Point> = sorted_pubkeys.get(1);

        let pk_list_hash = hash_pubkeys(&sorted_pubkeys);

        let (tweaked_pubkeys, key_coefficients): (Vec<MaybePoint>, Vec<MaybeScalar>) =
            sorted_pubkeys
                .iter()
                .map(|&pubkey| {
                    let key_coeff =
                        compute_key_aggregation_coefficient(&pk_list_hash, &pubkey, pk2);
                    (pubkey * key_coeff, key_coeff)
                })
                .unzip();

        let aggregated_pubkey = MaybePoint::sum(tweaked_pubkeys).not_inf()?;

        let pubkey_indexes = HashMap::from_iter(
            sorted_pubkeys
                .iter()
                .copied()
                .enumerate()
                .map(|(i, pk)| (pk, i)),
        );

        Ok(AggregateKey {
            pubkey: aggregated_pubkey,
            sorted_pubkeys,
            pubkey_indexes,
            key_coefficients,
            chain_code: MUSIG_CHAIN_CODE,
            parity_acc: subtle::Choice::from(0),
            tweak_acc: MaybeScalar::Zero,
        })
    }

    /// Tweak the aggregate key with a plain scalar tweak value.
    ///
    /// 'Tweaking' is the practice of committing a key to an agreed-upon
    /// scalar value. Unhardened
    /// [BIP32 derivation](https://github.com/bitcoin/bips/blob/master/bip-0032.mediawiki)
    /// steps are plain tweaks; taproot commitments are x-only tweaks.
    ///
    /// Signatures created using the resulting tweaked key will be bound to
    /// this tweak value.
    ///
    /// Returns an error if the tweaked public key would be the point at
    /// infinity.
    pub fn with_plain_tweak<T>(self, tweak: T) -> Result<Self, TweakError>
    where
        Scalar: From<T>,
    {
        let tweak = Scalar::from(tweak);

        // Q' = Q + t*G
        let tweaked_pubkey = (self.pubkey + (tweak * G)).not_inf()?;

        // tacc' = t + tacc
        let new_tweak_acc = self.tweak_acc + tweak;

        Ok(AggregateKey {
            pubkey: tweaked_pubkey,
            tweak_acc: new_tweak_acc,
            ..self
        })
    }

    /// Tweak the even-parity (x-only) form of the aggregate key with a
    /// scalar tweak value. This is the tweak style used for taproot
    /// commitments. See [`AggregateKey::with_plain_tweak`].
    pub fn with_xonly_tweak<T>(self, tweak: T) -> Result<Self, TweakError>
    where
        Scalar: From<T>,
    {
        // if has_even_y(Q): g = 1  (Same as a plain tweak.)
        // else: g = n - 1
        if self.pubkey.has_even_y() {
            return self.with_plain_tweak(tweak);
        }

        let tweak = Scalar::from(tweak);

        // Q' = g*Q + t*G
        //
        // Negating the pubkey point Q is the same as multiplying it
        // by (n-1), but is much faster.
        let tweaked_pubkey = (tweak * G - self.pubkey).not_inf()?;

        // tacc' = g*tacc + t
        //
        // Negating the tweak accumulator is the same as multiplying it
        // by (n-1), but is much faster.
        let new_tweak_acc = tweak - self.tweak_acc;

        Ok(AggregateKey {
            pubkey: tweaked_pubkey,
            parity_acc: !self.parity_acc,
            tweak_acc: new_tweak_acc,
            ..self
        })
    }

    /// Commit the aggregate key to a taproot output, producing the key which
    /// appears x-only in the output's script pubkey.
    ///
    /// The tweak value `t` is computed as:
    ///
    /// ```notrust
    /// prefix = sha256(b"TapTweak")
    /// tweak_hash = sha256(
    ///     prefix,
    ///     prefix,
    ///     self.aggregated_pubkey().serialize_xonly(),
    ///     merkle_root
    /// )
    /// t = int(tweak_hash)
    /// ```
    ///
    /// For a key-spend-only output, `merkle_root` is `None` and the tweak
    /// hash commits to the x-only pubkey alone, per
    /// [BIP341](https://github.com/bitcoin/bips/blob/master/bip-0341.mediawiki).
    ///
    /// Note that the _current tweaked and derived aggregated pubkey_ is
    /// hashed, not the plain untweaked pubkey.
    pub fn with_taproot_tweak(self, merkle_root: Option<&[u8; 32]>) -> Result<Self, TweakError> {
        // t = int(H_taptweak(xbytes(P), k))
        let mut hasher = tagged_hashes::TAPROOT_TWEAK_TAG_HASHER
            .clone()
            .chain_update(self.pubkey.serialize_xonly());
        if let Some(merkle_root) = merkle_root {
            hasher.update(merkle_root);
        }
        let tweak_hash: [u8; 32] = hasher.finalize().into();

        let tweak = Scalar::try_from(tweak_hash).map_err(|_| TweakError)?;
        self.with_xonly_tweak(tweak)
    }

    /// Derives an unhardened BIP32 child of the aggregate key.
    ///
    /// The derivation tweak is computed from the aggregate extended key
    /// exactly as `CKDpub` would compute it:
    ///
    /// ```notrust
    /// I = HMAC-SHA512(chain_code, self.pubkey.serialize() || ser32(index))
    /// child = self + int(I[..32])*G
    /// child.chain_code = I[32..]
    /// ```
    ///
    /// Hardened indexes (`index >= 2^31`) cannot be derived from public
    /// material and return [`DerivationError::HardenedUnsupported`].
    pub fn derive_child(self, index: u32) -> Result<Self, DerivationError> {
        if index >= (1 << 31) {
            return Err(DerivationError::HardenedUnsupported);
        }

        let hmac_output: [u8; 64] = hmac::Hmac::<sha2::Sha512>::new_from_slice(&self.chain_code)
            .expect("hmac-sha512 accepts keys of any length")
            .chain_update(self.pubkey.serialize())
            .chain_update(index.to_be_bytes())
            .finalize_fixed()
            .into();

        let tweak = Scalar::from_slice(&hmac_output[..32])
            .map_err(|_| DerivationError::InvalidTweak)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&hmac_output[32..]);

        let child = self.with_plain_tweak(tweak)?;
        Ok(AggregateKey { chain_code, ..child })
    }

    /// Derives a sequence of unhardened child steps, left to right.
    pub fn derive_path(self, path: &[u32]) -> Result<Self, DerivationError> {
        path.iter().copied().try_fold(self, Self::derive_child)
    }

    /// Returns the aggregated public key, converted to a given type.
    ///
    /// If any tweaks or derivation steps have been applied, the pubkey
    /// returned by this method is the tweaked aggregate public key, not
    /// the plain aggregated key.
    pub fn aggregated_pubkey<T: From<Point>>(&self) -> T {
        T::from(self.pubkey)
    }

    /// Returns the aggregated pubkey without any tweaks.
    pub fn aggregated_pubkey_untweaked<T: From<Point>>(&self) -> T {
        let untweaked = (self.pubkey - self.tweak_acc * G).negate_if(self.parity_acc);
        T::from(untweaked.unwrap()) // Can never be infinity
    }

    /// Returns the sum of all tweaks applied so far to this `AggregateKey`.
    /// Returns `None` if the tweak sum is zero i.e. if no tweaks have been
    /// applied, or if the tweaks canceled each other out (by summing to zero).
    pub fn tweak_sum<T: From<Scalar>>(&self) -> Option<T> {
        self.tweak_acc.into_option().map(T::from)
    }

    /// Returns the chain code used for unhardened child derivation. This is
    /// [`MUSIG_CHAIN_CODE`] for a freshly aggregated key, and the `CKDpub`
    /// child chain code after derivation steps.
    pub fn chain_code(&self) -> [u8; 32] {
        self.chain_code
    }

    /// Returns a read-only reference to the sorted, deduplicated set of
    /// participant public keys which this `AggregateKey` was created with.
    pub fn pubkeys(&self) -> &[Point] {
        &self.sorted_pubkeys
    }

    /// Looks up the index of a given pubkey in the participant set.
    /// Returns `None` if the key is not a member of the group.
    pub fn pubkey_index<P>(&self, pubkey: P) -> Option<usize>
    where
        Point: From<P>,
    {
        self.pubkey_indexes.get(&Point::from(pubkey)).copied()
    }

    /// Finds the key coefficient for a given public key. Returns `None` if
    /// the given `pubkey` is not part of the aggregated key.
    ///
    /// Key coefficients are multiplicative tweaks applied to each public key
    /// in an aggregated MuSig key. They prevent rogue key attacks by ensuring
    /// that signers cannot effectively compute their public key as a function
    /// of the pubkeys of other signers.
    ///
    /// The key coefficient is computed by hashing the public key `X` with a
    /// hash of the sorted set of all public keys in the signing group,
    /// denoted `L`. `AggregateKey` caches these coefficients on
    /// instantiation.
    pub(crate) fn key_coefficient(&self, pubkey: &Point) -> Option<MaybeScalar> {
        let index = self.pubkey_index(*pubkey)?;
        Some(self.key_coefficients[index])
    }

    /// Returns a participant's pubkey multiplied by its key coefficient, i.e.
    /// the point which that participant actually contributes to the aggregate.
    /// Returns `None` if the given `pubkey` is not part of the aggregated key.
    pub(crate) fn effective_pubkey<P>(&self, pubkey: P) -> Option<MaybePoint>
    where
        Point: From<P>,
    {
        let pubkey = Point::from(pubkey);
        let coeff = self.key_coefficient(&pubkey)?;
        Some(coeff * pubkey)
    }
}

fn hash_pubkeys<P: std::borrow::Borrow<Point>>(sorted_pubkeys: &[P]) -> [u8; 32] {
    let mut h = tagged_hashes::KEYAGG_LIST_TAG_HASHER.clone();
    for pubkey in sorted_pubkeys {
        h.update(pubkey.borrow().serialize());
    }
    h.finalize().into()
}

fn compute_key_aggregation_coefficient(
    pk_list_hash: &[u8; 32],
    pubkey: &Point,
    pk2: Option<&Point>,
) -> MaybeScalar {
    if pk2.is_some_and(|pk2| pubkey == pk2) {
        return MaybeScalar::one();
    }

    let hash: [u8; 32] = tagged_hashes::KEYAGG_COEFF_TAG_HASHER
        .clone()
        .chain_update(pk_list_hash)
        .chain_update(pubkey.serialize())
        .finalize()
        .into();

    MaybeScalar::reduce_from(&hash)
}

impl PartialEq for AggregateKey {
    fn eq(&self, other: &Self) -> bool {
        self.sorted_pubkeys == other.sorted_pubkeys
            && bool::from(self.parity_acc.ct_eq(&other.parity_acc))
            && self.tweak_acc == other.tweak_acc
    }
}

impl Eq for AggregateKey {}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY_HEXES: [&str; 3] = [
        "03935F972DA013F80AE011890FA89B67A27B7BE6CCB24D3274D18B2D4067F261A9",
        "02F9308A019258C31049344F85F89D5229B531C845836F99B08601F113BCE036F9",
        "02DFF1D77F2A671C5F36183726DB2341BE58FEAE1DA2DECED843240F7B502BA659",
    ];

    fn test_pubkeys() -> Vec<Point> {
        PUBKEY_HEXES
            .into_iter()
            .map(|hex| hex.parse().unwrap())
            .collect()
    }

    #[test]
    fn aggregation_is_order_independent() {
        let pubkeys = test_pubkeys();

        let forward: Point = AggregateKey::new(pubkeys.clone())
            .unwrap()
            .aggregated_pubkey();
        let mut shuffled = pubkeys.clone();
        shuffled.reverse();
        let backward: Point = AggregateKey::new(shuffled).unwrap().aggregated_pubkey();

        assert_eq!(forward, backward);
    }

    #[test]
    fn aggregation_dedups_repeated_keys() {
        let pubkeys = test_pubkeys();

        let mut with_repeats = pubkeys.clone();
        with_repeats.push(pubkeys[0]);
        with_repeats.push(pubkeys[2]);

        let plain = AggregateKey::new(pubkeys).unwrap();
        let deduped = AggregateKey::new(with_repeats).unwrap();
        assert_eq!(plain, deduped);
        assert_eq!(deduped.pubkeys().len(), 3);
    }

    #[test]
    fn tweaks_accumulate_and_unwind() {
        let agg = AggregateKey::new(test_pubkeys()).unwrap();
        let base_pubkey: Point = agg.aggregated_pubkey();

        let tweaked = agg
            .with_xonly_tweak(
                "E8F791FF9225A2AF0102AFFF4A9A723D9612A682A25EBE79802B263CDFCD83BB"
                    .parse::<Scalar>()
                    .unwrap(),
            )
            .expect("error applying xonly tweak")
            .with_plain_tweak(
                "F52ECBC565B3D8BEA2DFD5B75A4F457E54369809322E4120831626F290FA87E0"
                    .parse::<Scalar>()
                    .unwrap(),
            )
            .expect("error applying plain tweak");

        assert_ne!(tweaked.aggregated_pubkey::<Point>(), base_pubkey);
        assert!(tweaked.tweak_sum::<Scalar>().is_some());
        assert_eq!(tweaked.aggregated_pubkey_untweaked::<Point>(), base_pubkey);
    }

    #[test]
    fn taproot_tweak_commits_to_xonly_key() {
        let agg = AggregateKey::new(test_pubkeys()).unwrap();

        let keyspend_only = agg.clone().with_taproot_tweak(None).unwrap();
        let with_script_root = agg.with_taproot_tweak(Some(&[0xAB; 32])).unwrap();

        assert_ne!(
            keyspend_only.aggregated_pubkey::<Point>(),
            with_script_root.aggregated_pubkey::<Point>(),
        );
    }

    #[test]
    fn hardened_derivation_is_rejected() {
        let agg = AggregateKey::new(test_pubkeys()).unwrap();
        assert_eq!(
            agg.derive_child(1 << 31),
            Err(DerivationError::HardenedUnsupported),
        );
    }

    #[test]
    fn unhardened_derivation_is_deterministic() {
        let agg = AggregateKey::new(test_pubkeys()).unwrap();

        let child_a = agg.clone().derive_path(&[0, 7]).unwrap();
        let child_b = agg.clone().derive_path(&[0, 7]).unwrap();
        let sibling = agg.clone().derive_path(&[0, 8]).unwrap();

        assert_eq!(child_a, child_b);
        assert_ne!(
            child_a.aggregated_pubkey::<Point>(),
            sibling.aggregated_pubkey::<Point>(),
        );
        assert_ne!(child_a.chain_code(), agg.chain_code());
        assert_eq!(
            child_a.aggregated_pubkey_untweaked::<Point>(),
            agg.aggregated_pubkey::<Point>(),
        );
    }

    #[test]
    fn musig_chain_code_constant() {
        let expected = <[u8; 32]>::from(sha2::Sha256::digest("MuSig2MuSig2MuSig2"));
        assert_eq!(MUSIG_CHAIN_CODE, expected);
    }
}
