#![doc = include_str!("../README.md")]
#![allow(non_snake_case)]
#![warn(missing_docs)]

#[macro_use]
mod binary_encoding;

mod bip340;
mod key_agg;
mod nonces;
mod sig_agg;
mod signature;
mod signing;

pub mod cosigner;
pub mod errors;
pub mod policy;
pub mod psbt;
pub mod registry;
pub mod session;
pub mod tagged_hashes;
pub mod transaction;

pub use binary_encoding::*;
pub use bip340::*;
pub use key_agg::*;
pub use nonces::*;
pub use sig_agg::*;
pub use signature::*;
pub use signing::*;

pub use cosigner::{
    Cosigner, DeviceRequest, DeviceResponse, DeviceTransport, HardwareCosigner, SignContext,
    SoftwareCosigner,
};
pub use policy::{ParticipantKey, ValidatedPolicy, WalletPolicy};
pub use registry::PolicyRegistry;
pub use session::{
    NonceRound, SessionState, SessionTable, SignatureRound, SignatureRoundInput, SigningSession,
};

/// Re-export of the inner types used to represent curve points and scalars.
pub use secp;

#[cfg(feature = "secp256k1")]
pub use secp256k1;
