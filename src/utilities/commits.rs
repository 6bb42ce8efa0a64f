//! Salted hash commitments.
//!
//! The sender first communicates the commitment alone. To decommit, he
//! sends the message together with the salt, and the receiver checks
//! that the pair reproduces the commitment.

use k256::AffinePoint;
use rand::{CryptoRng, RngCore};

use crate::utilities::hashes::{hash, point_to_bytes, HashOutput};
use crate::SECURITY;

/// Commits to a message under a random salt of `2 * RAW_SECURITY` bits.
#[must_use]
pub fn commit<R: RngCore + CryptoRng>(rng: &mut R, msg: &[u8]) -> (HashOutput, Vec<u8>) {
    let mut salt = vec![0u8; 2 * SECURITY];
    rng.fill_bytes(&mut salt);

    let commitment = hash(msg, &salt);

    (commitment, salt)
}

/// Checks a commitment against the revealed message and salt.
#[must_use]
pub fn verify_commitment(msg: &[u8], commitment: &HashOutput, salt: &[u8]) -> bool {
    let expected_commitment = hash(msg, salt);
    *commitment == expected_commitment
}

// During signing, parties commit to points on the elliptic curve.
// For convenience, we adapt the previous functions to this case.

#[must_use]
pub fn commit_point<R: RngCore + CryptoRng>(
    rng: &mut R,
    point: &AffinePoint,
) -> (HashOutput, Vec<u8>) {
    let point_as_bytes = point_to_bytes(point);
    commit(rng, &point_as_bytes)
}

#[must_use]
pub fn verify_commitment_point(point: &AffinePoint, commitment: &HashOutput, salt: &[u8]) -> bool {
    let point_as_bytes = point_to_bytes(point);
    verify_commitment(&point_as_bytes, commitment, salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_commit_decommit() {
        let mut rng = rand::thread_rng();
        let msg = rng.gen::<[u8; 32]>();
        let (commitment, salt) = commit(&mut rng, &msg);
        assert!(verify_commitment(&msg, &commitment, &salt));
    }

    #[test]
    fn test_commit_decommit_fail_msg() {
        let mut rng = rand::thread_rng();
        let msg = rng.gen::<[u8; 32]>();
        let (commitment, salt) = commit(&mut rng, &msg);
        let other_msg = rng.gen::<[u8; 32]>();
        assert!(!verify_commitment(&other_msg, &commitment, &salt));
    }

    #[test]
    fn test_commit_decommit_fail_salt() {
        let mut rng = rand::thread_rng();
        let msg = rng.gen::<[u8; 32]>();
        let (commitment, _) = commit(&mut rng, &msg);
        let mut other_salt = vec![0u8; 2 * SECURITY];
        rng.fill_bytes(&mut other_salt);
        assert!(!verify_commitment(&msg, &commitment, &other_salt));
    }
}
