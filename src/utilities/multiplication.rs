//! Multiplicative-to-additive share conversion.
//!
//! Two-party multiplication in the style of DKLs18 (Protocol 5 in
//! <https://eprint.iacr.org/2018/499.pdf>): a sender holding `alpha`
//! and a receiver holding `beta` end up with additive shares `a` and
//! `b` such that `a + b = alpha * beta` modulo the curve order, and
//! neither side learns anything about the other's input.
//!
//! The receiver drives the protocol. He encodes `beta` as the choice
//! vector of one OT-extension execution; the sender turns the
//! resulting pad pairs into his share and into the adjustment values
//! that let the receiver assemble the matching share.
//!
//! Both parties weight the extended instances with a public gadget
//! vector: powers of two on the `KAPPA` payload slots and
//! hash-derived scalars on the `2 * STAT_SECURITY` masking slots. The
//! masking slots carry random choice bits, and the payload slots the
//! bit decomposition of `beta` minus the masked contribution, so the
//! weighted choices sum to `beta` while the consistency check of the
//! extension only ever sees a statistically masked combination.

use k256::elliptic_curve::Field;
use k256::Scalar;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::utilities::hashes::hash_as_scalar;
use crate::utilities::ot::extension::{
    OTEDataToSender, OTEReceiver, OTESender, PRGOutput, BATCH_SIZE, KAPPA,
};

/// Represents an error during the multiplication protocol.
#[derive(Debug, Clone)]
pub struct ErrorMul {
    pub description: String,
}

impl ErrorMul {
    #[must_use]
    pub fn new(description: &str) -> ErrorMul {
        ErrorMul {
            description: String::from(description),
        }
    }
}

/// Sender's side of one multiplication session.
#[derive(Clone, Serialize, Deserialize)]
pub struct MulSender {
    pub ote_sender: OTESender,
    pub public_gadget: Vec<Scalar>,
    session_id: Vec<u8>,
}

/// Receiver's side of one multiplication session.
#[derive(Clone, Serialize, Deserialize)]
pub struct MulReceiver {
    pub ote_receiver: OTEReceiver,
    pub public_gadget: Vec<Scalar>,
    session_id: Vec<u8>,
}

/// Data the receiver keeps between his two rounds.
pub struct MulDataToKeepReceiver {
    pub choice_bits: Vec<bool>,
    pub extended_seeds: Vec<PRGOutput>,
}

impl Drop for MulDataToKeepReceiver {
    fn drop(&mut self) {
        self.extended_seeds.zeroize();
        for bit in &mut self.choice_bits {
            *bit = false;
        }
    }
}

/// Both parties compute the same gadget vector from the session id:
/// the weight of slot `j` is `2^j` for the payload slots and a
/// hash-derived scalar for the masking slots.
fn public_gadget(session_id: &[u8]) -> Vec<Scalar> {
    let salt = [b"multiplication gadget".as_slice(), session_id].concat();

    let mut gadget: Vec<Scalar> = Vec::with_capacity(BATCH_SIZE);
    let mut power = Scalar::ONE;
    for _ in 0..KAPPA {
        gadget.push(power);
        power = power.double();
    }
    for j in KAPPA..BATCH_SIZE {
        gadget.push(hash_as_scalar(&j.to_be_bytes(), &salt));
    }
    gadget
}

/// Bit decomposition of a scalar, least significant bit first.
fn scalar_bits(scalar: &Scalar) -> Vec<bool> {
    let bytes = scalar.to_bytes();
    (0..KAPPA)
        .map(|j| (bytes[31 - j / 8] >> (j % 8)) & 1 == 1)
        .collect()
}

impl MulSender {
    /// Binds a cached extension sender state to one multiplication
    /// session.
    #[must_use]
    pub fn new(ote_sender: OTESender, session_id: &[u8]) -> MulSender {
        MulSender {
            ote_sender,
            public_gadget: public_gadget(session_id),
            session_id: session_id.to_vec(),
        }
    }

    /// Sender's only round, sitting between the receiver's two.
    ///
    /// Completes the OT extension with the receiver's data, derives
    /// the sender's additive share and the adjustment values to
    /// transmit.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the extension's consistency check fails.
    /// This is fatal: the session must not be retried on the same
    /// transcript.
    pub fn round2_multiply(
        &self,
        alpha: &Scalar,
        data: &OTEDataToSender,
    ) -> Result<(Scalar, Vec<Scalar>), ErrorMul> {
        let (v0, v1) = self.ote_sender.run(&self.session_id, data).map_err(|e| {
            ErrorMul::new(&format!(
                "OTE error during multiplication: {:?}",
                e.description
            ))
        })?;

        let mut share = Scalar::ZERO;
        let mut adjustments: Vec<Scalar> = Vec::with_capacity(BATCH_SIZE);
        for j in 0..BATCH_SIZE {
            share -= self.public_gadget[j] * v0[j];
            adjustments.push(self.public_gadget[j] * (v0[j] - v1[j] + alpha));
        }

        Ok((share, adjustments))
    }
}

impl MulReceiver {
    /// Binds a cached extension receiver state to one multiplication
    /// session.
    #[must_use]
    pub fn new(ote_receiver: OTEReceiver, session_id: &[u8]) -> MulReceiver {
        MulReceiver {
            ote_receiver,
            public_gadget: public_gadget(session_id),
            session_id: session_id.to_vec(),
        }
    }

    /// Receiver's first round: encodes `beta` into the choice vector
    /// and starts the OT extension.
    ///
    /// The first output is kept for
    /// [`round3_multiply`](Self::round3_multiply), the second is
    /// transmitted to the sender.
    #[must_use]
    pub fn round1_initialize<R: RngCore + CryptoRng>(
        &self,
        beta: &Scalar,
        rng: &mut R,
    ) -> (MulDataToKeepReceiver, OTEDataToSender) {
        let mut choice_bits = vec![false; BATCH_SIZE];

        // Random masking slots first; the payload slots then absorb
        // their weighted contribution so the whole vector still
        // encodes beta.
        let mut masked_beta = *beta;
        for j in KAPPA..BATCH_SIZE {
            if rng.gen::<bool>() {
                choice_bits[j] = true;
                masked_beta -= self.public_gadget[j];
            }
        }
        choice_bits[0..KAPPA].copy_from_slice(&scalar_bits(&masked_beta));

        let (extended_seeds, data_to_sender) =
            self.ote_receiver
                .run_phase1(&self.session_id, &choice_bits, rng);

        let data_to_keep = MulDataToKeepReceiver {
            choice_bits,
            extended_seeds,
        };

        (data_to_keep, data_to_sender)
    }

    /// Receiver's second round: assembles his additive share from the
    /// extension pads and the sender's adjustment values.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the adjustment vector has the wrong
    /// length.
    pub fn round3_multiply(
        &self,
        data_kept: &MulDataToKeepReceiver,
        adjustments: &[Scalar],
    ) -> Result<Scalar, ErrorMul> {
        if adjustments.len() != BATCH_SIZE {
            return Err(ErrorMul::new(
                "Multiplication: wrong number of adjustment values!",
            ));
        }

        let v = self
            .ote_receiver
            .run_phase2(&self.session_id, &data_kept.extended_seeds);

        let mut share = Scalar::ZERO;
        for j in 0..BATCH_SIZE {
            let pad = self.public_gadget[j] * v[j];
            if data_kept.choice_bits[j] {
                share += adjustments[j] + pad;
            } else {
                share += pad;
            }
        }

        Ok(share)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utilities::ot::extension::tests::mock_extension_pair;
    use rand::Rng;

    /// A matching sender/receiver pair over mock base-OT material.
    pub(crate) fn mock_multiplication_pair<R: RngCore + CryptoRng + Rng>(
        session_id: &[u8],
        rng: &mut R,
    ) -> (MulSender, MulReceiver) {
        let (ote_sender, ote_receiver) = mock_extension_pair(rng);
        (
            MulSender::new(ote_sender, session_id),
            MulReceiver::new(ote_receiver, session_id),
        )
    }

    fn run_multiplication(
        sender: &MulSender,
        receiver: &MulReceiver,
        alpha: &Scalar,
        beta: &Scalar,
    ) -> (Scalar, Scalar) {
        let mut rng = rand::thread_rng();

        // Receiver keeps data_to_keep and transmits data_to_sender.
        let (data_to_keep, data_to_sender) = receiver.round1_initialize(beta, &mut rng);

        // Sender transmits the adjustment values.
        let (sender_share, adjustments) = sender
            .round2_multiply(alpha, &data_to_sender)
            .map_err(|e| e.description)
            .unwrap();

        let receiver_share = receiver
            .round3_multiply(&data_to_keep, &adjustments)
            .map_err(|e| e.description)
            .unwrap();

        (sender_share, receiver_share)
    }

    #[test]
    fn test_multiplication_random_inputs() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();
        let (sender, receiver) = mock_multiplication_pair(&session_id, &mut rng);

        for _ in 0..8 {
            let alpha = Scalar::random(&mut rng);
            let beta = Scalar::random(&mut rng);

            let (a, b) = run_multiplication(&sender, &receiver, &alpha, &beta);
            assert_eq!(a + b, alpha * beta);
        }
    }

    #[test]
    fn test_multiplication_small_scenario() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();
        let (sender, receiver) = mock_multiplication_pair(&session_id, &mut rng);

        let (a, b) = run_multiplication(&sender, &receiver, &Scalar::from(2u64), &Scalar::from(3u64));
        assert_eq!(a + b, Scalar::from(6u64));
    }

    #[test]
    fn test_multiplication_wraparound_scenario() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();
        let (sender, receiver) = mock_multiplication_pair(&session_id, &mut rng);

        // alpha = q - 1, beta = 2, so the product is q - 2.
        let alpha = -Scalar::ONE;
        let (a, b) = run_multiplication(&sender, &receiver, &alpha, &Scalar::from(2u64));
        assert_eq!(a + b, -Scalar::from(2u64));
    }

    #[test]
    fn test_multiplication_repeated() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();
        let (sender, receiver) = mock_multiplication_pair(&session_id, &mut rng);

        for _ in 0..250 {
            let alpha = Scalar::random(&mut rng);
            let beta = Scalar::random(&mut rng);

            let (a, b) = run_multiplication(&sender, &receiver, &alpha, &beta);
            assert_eq!(a + b, alpha * beta);
        }
    }

    #[test]
    fn test_multiplication_sender_share_is_rerandomized() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();
        let (sender, receiver) = mock_multiplication_pair(&session_id, &mut rng);

        // Same inputs, fresh executions: the shares must differ (they
        // are uniformly random under the pad hashes).
        let alpha = Scalar::from(7u64);
        let beta = Scalar::from(11u64);

        let (a_first, b_first) = run_multiplication(&sender, &receiver, &alpha, &beta);
        let (a_second, b_second) = run_multiplication(&sender, &receiver, &alpha, &beta);

        assert_eq!(a_first + b_first, a_second + b_second);
        assert_ne!(a_first, a_second);
        assert_ne!(b_first, b_second);
    }

    #[test]
    fn test_multiplication_tampered_extension_data() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();
        let (sender, receiver) = mock_multiplication_pair(&session_id, &mut rng);

        let beta = Scalar::random(&mut rng);
        let (_, mut data_to_sender) = receiver.round1_initialize(&beta, &mut rng);
        data_to_sender.u[42][0] ^= 0x01;

        let alpha = Scalar::random(&mut rng);
        assert!(sender.round2_multiply(&alpha, &data_to_sender).is_err());
    }

    #[test]
    fn test_multiplication_truncated_adjustments() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();
        let (sender, receiver) = mock_multiplication_pair(&session_id, &mut rng);

        let alpha = Scalar::random(&mut rng);
        let beta = Scalar::random(&mut rng);

        let (data_to_keep, data_to_sender) = receiver.round1_initialize(&beta, &mut rng);
        let (_, mut adjustments) = sender.round2_multiply(&alpha, &data_to_sender).unwrap();
        adjustments.pop();

        assert!(receiver
            .round3_multiply(&data_to_keep, &adjustments)
            .is_err());
    }
}
