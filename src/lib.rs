//! Two-party DKLs-style threshold ECDSA over secp256k1.
//!
//! The crate is organized in two layers. [`utilities`] contains the
//! cryptographic building blocks: a verified Simplest OT, a KOS-style
//! OT extension and the multiplicative-to-additive share conversion
//! built on top of them, together with hashing, commitments and a
//! Schnorr proof of discrete logarithm. [`protocols`] contains the
//! two-party protocols themselves (key generation, signing and key
//! refresh) and the message-driven iterator that sequences their
//! rounds.

pub mod protocols;
pub mod utilities;

// The following constants should not be changed!
// The OT extension and the multiplier are sized around them.

/// Computational security parameter `kappa`: the bitlength of a
/// secp256k1 scalar.
pub const RAW_SECURITY: usize = 256;
/// `RAW_SECURITY` divided by 8 (used for arrays of bytes).
pub const SECURITY: usize = 32;

/// Statistical security parameter. For this construction it is taken
/// equal to `kappa`, so the extended OT batch carries `2 * RAW_SECURITY`
/// masking slots on top of the `RAW_SECURITY` payload slots.
pub const STAT_SECURITY: usize = 256;
