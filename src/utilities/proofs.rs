//! Zero-knowledge proof of knowledge of a discrete logarithm.
//!
//! Schnorr's protocol with a Fiat-Shamir transform over the salted hash
//! from [`hashes`](super::hashes). It authenticates the key shares
//! during key generation and the sender's public key in the base
//! oblivious transfer.
//!
//! Key generation additionally needs a committed variant: the prover
//! first publishes a hash of the proof and only reveals it after the
//! counterparty has spoken. This is [`DLogProof::prove_commit`] /
//! [`DLogProof::decommit_verify`].

use k256::elliptic_curve::Field;
use k256::{AffinePoint, ProjectivePoint, Scalar};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::utilities::hashes::{hash, hash_as_scalar, point_to_bytes, scalar_to_bytes, HashOutput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DLogProof {
    pub point: AffinePoint,
    pub point_rand_commitment: AffinePoint,
    pub challenge_response: Scalar,
}

impl DLogProof {
    /// Proves knowledge of the discrete logarithm of `scalar * generator`.
    #[must_use]
    pub fn prove<R: RngCore + CryptoRng>(scalar: &Scalar, session_id: &[u8], rng: &mut R) -> DLogProof {
        let point = (ProjectivePoint::GENERATOR * scalar).to_affine();

        let scalar_rand_commitment = Scalar::random(&mut *rng);
        let point_rand_commitment =
            (ProjectivePoint::GENERATOR * scalar_rand_commitment).to_affine();

        let msg_for_challenge = [
            point_to_bytes(&point),
            point_to_bytes(&point_rand_commitment),
        ]
        .concat();
        let challenge = hash_as_scalar(&msg_for_challenge, session_id);

        let challenge_response = scalar_rand_commitment - (challenge * scalar);

        DLogProof {
            point,
            point_rand_commitment,
            challenge_response,
        }
    }

    /// Verifies a proof of discrete logarithm. The point to be verified
    /// is contained in the proof.
    #[must_use]
    pub fn verify(proof: &DLogProof, session_id: &[u8]) -> bool {
        // We recompute the challenge from the proof.
        let msg_for_challenge = [
            point_to_bytes(&proof.point),
            point_to_bytes(&proof.point_rand_commitment),
        ]
        .concat();
        let challenge = hash_as_scalar(&msg_for_challenge, session_id);

        // We cannot compute challenge_response ourselves, but we can
        // recompute point_rand_commitment in an alternative way, which
        // must agree with the value in the proof.
        let point_verifier = (ProjectivePoint::GENERATOR * proof.challenge_response)
            + (proof.point * challenge);

        point_verifier.to_affine() == proof.point_rand_commitment
    }

    /// Proof with a hash commitment over its revealing parts.
    ///
    /// The `challenge_response` entropy makes the commitment hiding, so
    /// no extra salt is needed.
    #[must_use]
    pub fn prove_commit<R: RngCore + CryptoRng>(
        scalar: &Scalar,
        session_id: &[u8],
        rng: &mut R,
    ) -> (DLogProof, HashOutput) {
        let proof = Self::prove(scalar, session_id, rng);

        let msg_for_commitment = [
            point_to_bytes(&proof.point_rand_commitment),
            scalar_to_bytes(&proof.challenge_response),
        ]
        .concat();
        let commitment = hash(&msg_for_commitment, session_id);

        (proof, commitment)
    }

    /// Verifies a revealed proof against its earlier commitment.
    #[must_use]
    pub fn decommit_verify(proof: &DLogProof, commitment: &HashOutput, session_id: &[u8]) -> bool {
        let msg_for_commitment = [
            point_to_bytes(&proof.point_rand_commitment),
            scalar_to_bytes(&proof.challenge_response),
        ]
        .concat();
        let expected_commitment = hash(&msg_for_commitment, session_id);

        (*commitment == expected_commitment) && Self::verify(proof, session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_dlog_proof() {
        let mut rng = rand::thread_rng();
        let scalar = Scalar::random(&mut rng);
        let session_id = rng.gen::<[u8; 32]>();
        let proof = DLogProof::prove(&scalar, &session_id, &mut rng);
        assert!(DLogProof::verify(&proof, &session_id));
    }

    #[test]
    fn test_dlog_proof_fail_proof() {
        let mut rng = rand::thread_rng();
        let scalar = Scalar::random(&mut rng);
        let session_id = rng.gen::<[u8; 32]>();
        let mut proof = DLogProof::prove(&scalar, &session_id, &mut rng);
        proof.challenge_response += Scalar::ONE;
        assert!(!DLogProof::verify(&proof, &session_id));
    }

    #[test]
    fn test_dlog_proof_fail_session() {
        let mut rng = rand::thread_rng();
        let scalar = Scalar::random(&mut rng);
        let session_id = rng.gen::<[u8; 32]>();
        let other_session_id = rng.gen::<[u8; 32]>();
        let proof = DLogProof::prove(&scalar, &session_id, &mut rng);
        assert!(!DLogProof::verify(&proof, &other_session_id));
    }

    #[test]
    fn test_dlog_proof_commit() {
        let mut rng = rand::thread_rng();
        let scalar = Scalar::random(&mut rng);
        let session_id = rng.gen::<[u8; 32]>();
        let (proof, commitment) = DLogProof::prove_commit(&scalar, &session_id, &mut rng);
        assert!(DLogProof::decommit_verify(&proof, &commitment, &session_id));
    }

    #[test]
    fn test_dlog_proof_commit_fail_commitment() {
        let mut rng = rand::thread_rng();
        let scalar = Scalar::random(&mut rng);
        let session_id = rng.gen::<[u8; 32]>();
        let (proof, mut commitment) = DLogProof::prove_commit(&scalar, &session_id, &mut rng);
        commitment[0] ^= 1;
        assert!(!DLogProof::decommit_verify(&proof, &commitment, &session_id));
    }
}
