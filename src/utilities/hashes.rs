//! Hash functions and byte conversions used throughout the protocols.
//!
//! Every subprotocol works with a different random oracle, so the hash
//! function takes a `salt` parameter next to the message. Salts are
//! derived from the session id of the protocol in question, usually with
//! a short tag and/or an index prepended.

use bitcoin_hashes::{sha256, Hash};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, EncodedPoint, FieldBytes, Scalar, U256};

use crate::SECURITY;

// We are using SHA-256, so the hash values have 256 bits.
pub type HashOutput = [u8; SECURITY];

/// Salted SHA-256: the digest of `salt || msg`.
#[must_use]
pub fn hash(msg: &[u8], salt: &[u8]) -> HashOutput {
    let concatenation = [salt, msg].concat();
    sha256::Hash::hash(&concatenation).to_byte_array()
}

/// Salted SHA-256 mapped into the scalar field: the 256-bit digest is
/// interpreted as a big-endian integer and reduced modulo the order of
/// the curve.
#[must_use]
pub fn hash_as_scalar(msg: &[u8], salt: &[u8]) -> Scalar {
    let digest = hash(msg, salt);
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(&digest))
}

// k256 does not convert Scalar and AffinePoint directly to bytes.
// We add the following for convenience.

/// Fixed 32-byte big-endian encoding of a scalar.
#[must_use]
pub fn scalar_to_bytes(scalar: &Scalar) -> Vec<u8> {
    scalar.to_bytes().to_vec()
}

/// Inverse of [`scalar_to_bytes`]. Rejects non-canonical encodings
/// (integers not smaller than the curve order).
#[must_use]
pub fn scalar_from_bytes(bytes: &[u8]) -> Option<Scalar> {
    if bytes.len() != SECURITY {
        return None;
    }
    Option::from(Scalar::from_repr(*FieldBytes::from_slice(bytes)))
}

/// Compressed SEC1 encoding of a point (33 bytes).
#[must_use]
pub fn point_to_bytes(point: &AffinePoint) -> Vec<u8> {
    point.to_encoded_point(true).as_bytes().to_vec()
}

/// Inverse of [`point_to_bytes`]. Rejects encodings that do not
/// describe a point on the curve.
#[must_use]
pub fn point_from_bytes(bytes: &[u8]) -> Option<AffinePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).ok()?;
    Option::from(AffinePoint::from_encoded_point(&encoded))
}
