//! Base oblivious transfer, used to seed the OT extension.
//!
//! This is the "verified Simplest OT" of DKLs18 (Protocol 7 in
//! <https://eprint.iacr.org/2018/499.pdf>), run as a random OT: the
//! sender ends up with a pair of pads per instance, the receiver with
//! the pad selected by his choice bit. A challenge/response/opening
//! exchange after the transfer lets each side detect a counterparty
//! that deviated from the protocol.
//!
//! All operations work on a whole batch of instances at once, since the
//! extension always consumes `kappa` parallel transfers. The instances
//! share one sender key pair; domain separation comes from the instance
//! index folded into the salt.

use k256::elliptic_curve::Field;
use k256::{AffinePoint, ProjectivePoint, Scalar};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::utilities::hashes::{hash, point_to_bytes, HashOutput};
use crate::utilities::ot::ErrorOT;
use crate::utilities::proofs::DLogProof;

// SENDER STRUCTS

/// Sender after initialization.
pub struct OTSender {
    sk: Scalar,
    pub pk: AffinePoint,
}

/// Sender's output: one pair of pads per instance.
#[derive(Clone)]
pub struct OTSenderOutput {
    pub pads0: Vec<HashOutput>,
    pub pads1: Vec<HashOutput>,
}

/// Hashes the sender keeps between the challenge and the opening.
///
/// `hash_pads` is transmitted to the receiver in the opening round; the
/// double hashes stay with the sender to check the responses.
pub struct OTSenderHashData {
    pub hash_pads0: Vec<HashOutput>,
    pub hash_pads1: Vec<HashOutput>,
    pub double_hash_pads0: Vec<HashOutput>,
}

/// The opening transmitted in the last sender round.
#[derive(Clone)]
pub struct OTSenderOpening {
    pub hash_pads0: Vec<HashOutput>,
    pub hash_pads1: Vec<HashOutput>,
}

// RECEIVER STRUCTS

/// Receiver after having checked the sender's public key proof.
pub struct OTReceiver {
    pub pk: AffinePoint,
}

/// Receiver's output: the choice bits and the corresponding pads.
#[derive(Clone)]
pub struct OTReceiverOutput {
    pub choice_bits: Vec<bool>,
    pub pads: Vec<HashOutput>,
}

/// Hashes the receiver keeps between his response and the final check.
pub struct OTReceiverHashData {
    pub hash_pads: Vec<HashOutput>,
    pub challenges: Vec<HashOutput>,
}

fn instance_salt(index: usize, session_id: &[u8]) -> Vec<u8> {
    [&index.to_be_bytes(), session_id].concat()
}

impl OTSender {
    /// Round 1 of the transfer: samples the key pair and proves
    /// knowledge of the secret key.
    ///
    /// The proof must be transmitted to the receiver.
    #[must_use]
    pub fn init<R: RngCore + CryptoRng>(session_id: &[u8], rng: &mut R) -> (OTSender, DLogProof) {
        let sk = Scalar::random(&mut *rng);
        let pk = (ProjectivePoint::GENERATOR * sk).to_affine();

        let proof = DLogProof::prove(&sk, session_id, rng);

        (OTSender { sk, pk }, proof)
    }

    /// Round 3 of the transfer: computes both pads for every instance
    /// and the challenges for the receiver.
    ///
    /// `encoded_choice_bits` is the batch of points sent by the
    /// receiver; the pads are his counterpart's output for the random
    /// OT. The challenges must be transmitted, the rest is kept.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the batch is empty.
    pub fn compute_pads(
        &self,
        session_id: &[u8],
        encoded_choice_bits: &[AffinePoint],
    ) -> Result<(OTSenderOutput, OTSenderHashData, Vec<HashOutput>), ErrorOT> {
        if encoded_choice_bits.is_empty() {
            return Err(ErrorOT::new("Base OT: empty batch of encoded choice bits!"));
        }

        let batch_size = encoded_choice_bits.len();

        let mut pads0: Vec<HashOutput> = Vec::with_capacity(batch_size);
        let mut pads1: Vec<HashOutput> = Vec::with_capacity(batch_size);
        let mut hash_pads0: Vec<HashOutput> = Vec::with_capacity(batch_size);
        let mut hash_pads1: Vec<HashOutput> = Vec::with_capacity(batch_size);
        let mut double_hash_pads0: Vec<HashOutput> = Vec::with_capacity(batch_size);
        let mut challenges: Vec<HashOutput> = Vec::with_capacity(batch_size);

        let shift = ProjectivePoint::from(self.pk) * self.sk;

        for (i, encoded) in encoded_choice_bits.iter().enumerate() {
            let salt = instance_salt(i, session_id);

            // If the receiver chose bit 0, he knows the discrete log of
            // point0 with respect to pk; if he chose 1, of point1.
            let point0 = *encoded * self.sk;
            let point1 = point0 - shift;

            let pad0 = hash(&point_to_bytes(&point0.to_affine()), &salt);
            let pad1 = hash(&point_to_bytes(&point1.to_affine()), &salt);

            let hash_pad0 = hash(&pad0, &salt);
            let hash_pad1 = hash(&pad1, &salt);

            let double_hash_pad0 = hash(&hash_pad0, &salt);
            let double_hash_pad1 = hash(&hash_pad1, &salt);

            // The challenge is the XOR of the two double hashes.
            let mut challenge = [0u8; 32];
            for j in 0..32 {
                challenge[j] = double_hash_pad0[j] ^ double_hash_pad1[j];
            }

            pads0.push(pad0);
            pads1.push(pad1);
            hash_pads0.push(hash_pad0);
            hash_pads1.push(hash_pad1);
            double_hash_pads0.push(double_hash_pad0);
            challenges.push(challenge);
        }

        let output = OTSenderOutput { pads0, pads1 };
        let hash_data = OTSenderHashData {
            hash_pads0,
            hash_pads1,
            double_hash_pads0,
        };

        Ok((output, hash_data, challenges))
    }

    /// Round 5 of the transfer: checks the receiver's responses and, if
    /// they are consistent, produces the opening for the last round.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the lengths disagree or if any response
    /// does not match the expected double hash, meaning the receiver
    /// cheated.
    pub fn verify_responses(
        &self,
        hash_data: &OTSenderHashData,
        responses: &[HashOutput],
    ) -> Result<OTSenderOpening, ErrorOT> {
        if responses.len() != hash_data.double_hash_pads0.len() {
            return Err(ErrorOT::new("Base OT: wrong number of responses!"));
        }

        for (i, response) in responses.iter().enumerate() {
            if *response != hash_data.double_hash_pads0[i] {
                return Err(ErrorOT::new(&format!(
                    "Receiver cheated in base OT: challenge verification failed at instance {i}!"
                )));
            }
        }

        Ok(OTSenderOpening {
            hash_pads0: hash_data.hash_pads0.clone(),
            hash_pads1: hash_data.hash_pads1.clone(),
        })
    }
}

impl Drop for OTSender {
    fn drop(&mut self) {
        self.sk.zeroize();
    }
}

impl OTReceiver {
    /// Checks the sender's proof of knowledge of his secret key. This
    /// already generates an instance of `OTReceiver`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the proof does not verify.
    pub fn init(session_id: &[u8], proof: &DLogProof) -> Result<OTReceiver, ErrorOT> {
        if !DLogProof::verify(proof, session_id) {
            return Err(ErrorOT::new(
                "Sender cheated in base OT: proof of discrete logarithm failed!",
            ));
        }

        Ok(OTReceiver { pk: proof.point })
    }

    /// Round 2 of the transfer: encodes the choice bits and computes
    /// the receiver's pads.
    ///
    /// The encoded points must be transmitted to the sender.
    #[must_use]
    pub fn transfer<R: RngCore + CryptoRng>(
        &self,
        session_id: &[u8],
        choice_bits: &[bool],
        rng: &mut R,
    ) -> (OTReceiverOutput, Vec<AffinePoint>) {
        let batch_size = choice_bits.len();

        let mut pads: Vec<HashOutput> = Vec::with_capacity(batch_size);
        let mut encoded: Vec<AffinePoint> = Vec::with_capacity(batch_size);

        let pk = ProjectivePoint::from(self.pk);

        for (i, choice_bit) in choice_bits.iter().enumerate() {
            let salt = instance_salt(i, session_id);

            let a = Scalar::random(&mut *rng);

            let choice0 = ProjectivePoint::GENERATOR * a;
            let encoded_choice_bit = if *choice_bit { choice0 + pk } else { choice0 };

            let point_pad = pk * a;
            let pad = hash(&point_to_bytes(&point_pad.to_affine()), &salt);

            pads.push(pad);
            encoded.push(encoded_choice_bit.to_affine());
        }

        let output = OTReceiverOutput {
            choice_bits: choice_bits.to_vec(),
            pads,
        };

        (output, encoded)
    }

    /// Round 4 of the transfer: computes the responses to the sender's
    /// challenges. The responses must be transmitted, the hash data is
    /// kept for the final check.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the number of challenges does not match
    /// the batch.
    pub fn respond(
        &self,
        session_id: &[u8],
        output: &OTReceiverOutput,
        challenges: &[HashOutput],
    ) -> Result<(OTReceiverHashData, Vec<HashOutput>), ErrorOT> {
        if challenges.len() != output.pads.len() {
            return Err(ErrorOT::new("Base OT: wrong number of challenges!"));
        }

        let batch_size = challenges.len();

        let mut hash_pads: Vec<HashOutput> = Vec::with_capacity(batch_size);
        let mut responses: Vec<HashOutput> = Vec::with_capacity(batch_size);

        for i in 0..batch_size {
            let salt = instance_salt(i, session_id);

            let hash_pad = hash(&output.pads[i], &salt);
            let double_hash_pad = hash(&hash_pad, &salt);

            let mut response = double_hash_pad;
            if output.choice_bits[i] {
                for j in 0..32 {
                    response[j] ^= challenges[i][j];
                }
            }

            hash_pads.push(hash_pad);
            responses.push(response);
        }

        let hash_data = OTReceiverHashData {
            hash_pads,
            challenges: challenges.to_vec(),
        };

        Ok((hash_data, responses))
    }

    /// Round 6 of the transfer: checks that the sender computed the
    /// pads and the challenges as prescribed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the opening is inconsistent with the pads
    /// received or with the challenges, meaning the sender cheated.
    pub fn verify_opening(
        &self,
        session_id: &[u8],
        output: &OTReceiverOutput,
        hash_data: &OTReceiverHashData,
        opening: &OTSenderOpening,
    ) -> Result<(), ErrorOT> {
        let batch_size = output.pads.len();
        if opening.hash_pads0.len() != batch_size || opening.hash_pads1.len() != batch_size {
            return Err(ErrorOT::new("Base OT: wrong opening size!"));
        }

        for i in 0..batch_size {
            let salt = instance_salt(i, session_id);

            let expected_hash_pad = if output.choice_bits[i] {
                &opening.hash_pads1[i]
            } else {
                &opening.hash_pads0[i]
            };

            if hash_data.hash_pads[i] != *expected_hash_pad {
                return Err(ErrorOT::new(&format!(
                    "Sender cheated in base OT: pad verification failed at instance {i}!"
                )));
            }

            let double_hash_pad0 = hash(&opening.hash_pads0[i], &salt);
            let double_hash_pad1 = hash(&opening.hash_pads1[i], &salt);

            let mut expected_challenge = [0u8; 32];
            for j in 0..32 {
                expected_challenge[j] = double_hash_pad0[j] ^ double_hash_pad1[j];
            }

            if hash_data.challenges[i] != expected_challenge {
                return Err(ErrorOT::new(&format!(
                    "Sender cheated in base OT: challenge reconstruction failed at instance {i}!"
                )));
            }
        }

        Ok(())
    }
}

impl Drop for OTSenderOutput {
    fn drop(&mut self) {
        self.pads0.zeroize();
        self.pads1.zeroize();
    }
}

impl Drop for OTReceiverOutput {
    fn drop(&mut self) {
        self.pads.zeroize();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::Rng;

    // Runs the whole protocol playing both sides, which of course
    // cannot be done in real applications.
    pub(crate) fn ideal_functionality(
        session_id: &[u8],
        choice_bits: &[bool],
    ) -> Result<(OTSenderOutput, OTReceiverOutput), ErrorOT> {
        let mut rng = rand::thread_rng();

        let (sender, proof) = OTSender::init(session_id, &mut rng);
        let receiver = OTReceiver::init(session_id, &proof)?;

        // Receiver transmits the encoded choice bits.
        let (receiver_output, encoded) = receiver.transfer(session_id, choice_bits, &mut rng);

        // Sender transmits the challenges.
        let (sender_output, sender_hash_data, challenges) =
            sender.compute_pads(session_id, &encoded)?;

        // Receiver transmits the responses.
        let (receiver_hash_data, responses) =
            receiver.respond(session_id, &receiver_output, &challenges)?;

        // Sender transmits the opening.
        let opening = sender.verify_responses(&sender_hash_data, &responses)?;

        receiver.verify_opening(session_id, &receiver_output, &receiver_hash_data, &opening)?;

        Ok((sender_output, receiver_output))
    }

    #[test]
    fn test_base_ot() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();

        let batch_size = 256;
        let mut choice_bits: Vec<bool> = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            choice_bits.push(rng.gen());
        }

        let (sender_output, receiver_output) = ideal_functionality(&session_id, &choice_bits)
            .map_err(|e| e.description)
            .unwrap();

        // Depending on the choice the receiver made, he must have
        // received one of the pads, and only that one.
        for i in 0..batch_size {
            if receiver_output.choice_bits[i] {
                assert_eq!(sender_output.pads1[i], receiver_output.pads[i]);
                assert_ne!(sender_output.pads0[i], receiver_output.pads[i]);
            } else {
                assert_eq!(sender_output.pads0[i], receiver_output.pads[i]);
                assert_ne!(sender_output.pads1[i], receiver_output.pads[i]);
            }
        }
    }

    #[test]
    fn test_base_ot_flipped_response() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();

        let (sender, proof) = OTSender::init(&session_id, &mut rng);
        let receiver = OTReceiver::init(&session_id, &proof).unwrap();

        let choice_bits: Vec<bool> = (0..256).map(|_| rng.gen()).collect();
        let (receiver_output, encoded) = receiver.transfer(&session_id, &choice_bits, &mut rng);
        let (_, sender_hash_data, challenges) =
            sender.compute_pads(&session_id, &encoded).unwrap();
        let (_, mut responses) = receiver
            .respond(&session_id, &receiver_output, &challenges)
            .unwrap();

        // A single flipped bit in a response must abort the transfer.
        responses[17][3] ^= 0x04;
        assert!(sender.verify_responses(&sender_hash_data, &responses).is_err());
    }
}
