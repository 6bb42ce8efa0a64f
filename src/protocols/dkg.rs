//! Distributed key generation.
//!
//! Ten alternating rounds, Bob speaking on the odd ones and Alice on
//! the even ones. The first four rounds run a mutual commit/reveal of
//! random seeds and Schnorr proofs over the secret key shares; the
//! joint public key is **multiplicative**, `Q = sk_A * sk_B * g`.
//! Rounds 5 through 10 run the verified base OT that seeds the OT
//! extension: Bob plays the base-OT sender, so Alice ends up with the
//! extension *sender* state and Bob with the extension *receiver*
//! state, which is exactly the orientation the signing multiplier
//! needs.
//!
//! The output of either side is a [`AliceDkgResult`] /
//! [`BobDkgResult`]: the secret share, the joint public key, the
//! cached extension seed and the session id binding every later
//! multiplication to this key generation.

use k256::elliptic_curve::Field;
use k256::{AffinePoint, Scalar};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;
use zeroize::Zeroize;

use crate::protocols::iterator::ProtocolParty;
use crate::protocols::serialization::{Decoder, Encoder};
use crate::protocols::{ProtocolError, ProtocolId};
use crate::utilities::commits;
use crate::utilities::hashes::{hash, HashOutput};
use crate::utilities::ot::base::{
    OTReceiver, OTReceiverHashData, OTReceiverOutput, OTSender, OTSenderHashData,
    OTSenderOpening, OTSenderOutput,
};
use crate::utilities::ot::extension::{OTEReceiver, OTESender, KAPPA};
use crate::utilities::proofs::DLogProof;

/// Random 32-byte seed contributed by each party.
pub type Seed = [u8; 32];

const SEED_COMMIT_TAG: &[u8] = b"dkg seed commitment";
const ALICE_PROOF_TAG: &[u8] = b"dkg alice share proof";
const BOB_PROOF_TAG: &[u8] = b"dkg bob share proof";
const SESSION_ID_TAG: &[u8] = b"dkg session id";
const BASE_OT_TAG: &[u8] = b"dkg base ot";

/// Session id binding both seeds.
fn derive_session_id(seed_a: &Seed, seed_b: &Seed) -> HashOutput {
    hash(&[&seed_a[..], &seed_b[..]].concat(), SESSION_ID_TAG)
}

fn base_ot_session_id(session_id: &HashOutput) -> Vec<u8> {
    [BASE_OT_TAG, &session_id[..]].concat()
}

// RESULTS

/// Alice's long-lived output of a key generation (or refresh).
#[derive(Clone, Serialize, Deserialize)]
pub struct AliceDkgResult {
    pub share: Scalar,
    pub public_key: AffinePoint,
    pub ote_sender: OTESender,
    pub session_id: HashOutput,
}

/// Bob's long-lived output of a key generation (or refresh).
#[derive(Clone, Serialize, Deserialize)]
pub struct BobDkgResult {
    pub share: Scalar,
    pub public_key: AffinePoint,
    pub ote_receiver: OTEReceiver,
    pub session_id: HashOutput,
}

impl Drop for AliceDkgResult {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

impl Drop for BobDkgResult {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

impl AliceDkgResult {
    /// Version-tagged persistence blob; the input format of
    /// `new_alice_sign` and `new_alice_refresh`.
    #[must_use]
    pub fn to_bytes(&self, version: u32) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_u32(version);
        encoder.put_scalar(&self.share);
        encoder.put_point(&self.public_key);
        encoder.put_bits(&self.ote_sender.correlation);
        encoder.put_bytes32_vec(&self.ote_sender.seeds);
        encoder.put_bytes32(&self.session_id);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` if the blob is malformed or was produced
    /// under a different version.
    pub fn from_bytes(bytes: &[u8], version: u32) -> Result<AliceDkgResult, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let blob_version = decoder.take_u32()?;
        if blob_version != version {
            return Err(ProtocolError::Decode(format!(
                "key share blob has version {blob_version}, expected {version}"
            )));
        }
        let share = decoder.take_scalar()?;
        let public_key = decoder.take_point()?;
        let correlation = decoder.take_bits()?;
        let seeds = decoder.take_bytes32_vec()?;
        let session_id = decoder.take_bytes32()?;
        decoder.finish()?;

        if correlation.len() != KAPPA || seeds.len() != KAPPA {
            return Err(ProtocolError::Decode(String::from(
                "cached extension seed has wrong width",
            )));
        }

        Ok(AliceDkgResult {
            share,
            public_key,
            ote_sender: OTESender { correlation, seeds },
            session_id,
        })
    }
}

impl BobDkgResult {
    /// Version-tagged persistence blob; the input format of
    /// `new_bob_sign` and `new_bob_refresh`.
    #[must_use]
    pub fn to_bytes(&self, version: u32) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_u32(version);
        encoder.put_scalar(&self.share);
        encoder.put_point(&self.public_key);
        encoder.put_bytes32_vec(&self.ote_receiver.seeds0);
        encoder.put_bytes32_vec(&self.ote_receiver.seeds1);
        encoder.put_bytes32(&self.session_id);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` if the blob is malformed or was produced
    /// under a different version.
    pub fn from_bytes(bytes: &[u8], version: u32) -> Result<BobDkgResult, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let blob_version = decoder.take_u32()?;
        if blob_version != version {
            return Err(ProtocolError::Decode(format!(
                "key share blob has version {blob_version}, expected {version}"
            )));
        }
        let share = decoder.take_scalar()?;
        let public_key = decoder.take_point()?;
        let seeds0 = decoder.take_bytes32_vec()?;
        let seeds1 = decoder.take_bytes32_vec()?;
        let session_id = decoder.take_bytes32()?;
        decoder.finish()?;

        if seeds0.len() != KAPPA || seeds1.len() != KAPPA {
            return Err(ProtocolError::Decode(String::from(
                "cached extension seed has wrong width",
            )));
        }

        Ok(BobDkgResult {
            share,
            public_key,
            ote_receiver: OTEReceiver { seeds0, seeds1 },
            session_id,
        })
    }
}

// MESSAGES

/// Round 1, Bob: commitment to his seed.
pub struct DkgMsg1 {
    pub seed_commitment: HashOutput,
}

/// Round 2, Alice: her seed in the clear, her share proof committed.
pub struct DkgMsg2 {
    pub seed: Seed,
    pub proof_commitment: HashOutput,
}

/// Round 3, Bob: seed opening and his share proof.
pub struct DkgMsg3 {
    pub seed: Seed,
    pub seed_salt: Vec<u8>,
    pub proof: DLogProof,
}

/// Round 4, Alice: her revealed share proof.
pub struct DkgMsg4 {
    pub proof: DLogProof,
}

/// Round 5, Bob: base-OT public key with proof of its discrete log.
pub struct DkgMsg5 {
    pub ot_proof: DLogProof,
}

/// Round 6, Alice: encoded base-OT choice bits.
pub struct DkgMsg6 {
    pub encoded_choice_bits: Vec<AffinePoint>,
}

/// Round 7, Bob: base-OT challenges.
pub struct DkgMsg7 {
    pub challenges: Vec<HashOutput>,
}

/// Round 8, Alice: base-OT responses.
pub struct DkgMsg8 {
    pub responses: Vec<HashOutput>,
}

/// Round 9, Bob: base-OT opening.
pub struct DkgMsg9 {
    pub opening: OTSenderOpening,
}

impl DkgMsg1 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32(&self.seed_commitment);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg1, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg1 {
            seed_commitment: decoder.take_bytes32()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl DkgMsg2 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32(&self.seed);
        encoder.put_bytes32(&self.proof_commitment);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg2, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg2 {
            seed: decoder.take_bytes32()?,
            proof_commitment: decoder.take_bytes32()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl DkgMsg3 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32(&self.seed);
        encoder.put_bytes(&self.seed_salt);
        encoder.put_dlog_proof(&self.proof);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg3, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg3 {
            seed: decoder.take_bytes32()?,
            seed_salt: decoder.take_bytes()?,
            proof: decoder.take_dlog_proof()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl DkgMsg4 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_dlog_proof(&self.proof);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg4, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg4 {
            proof: decoder.take_dlog_proof()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl DkgMsg5 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_dlog_proof(&self.ot_proof);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg5, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg5 {
            ot_proof: decoder.take_dlog_proof()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl DkgMsg6 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_point_vec(&self.encoded_choice_bits);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg6, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg6 {
            encoded_choice_bits: decoder.take_point_vec()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl DkgMsg7 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32_vec(&self.challenges);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg7, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg7 {
            challenges: decoder.take_bytes32_vec()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl DkgMsg8 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32_vec(&self.responses);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg8, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg8 {
            responses: decoder.take_bytes32_vec()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl DkgMsg9 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_ot_opening(&self.opening);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<DkgMsg9, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = DkgMsg9 {
            opening: decoder.take_ot_opening()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

// ALICE

enum AliceState {
    Round2,
    Round4 {
        seed_commitment: HashOutput,
        seed: Seed,
        share: Scalar,
        proof: DLogProof,
    },
    Round6 {
        share: Scalar,
        session_id: HashOutput,
        public_key: AffinePoint,
    },
    Round8 {
        share: Scalar,
        session_id: HashOutput,
        public_key: AffinePoint,
        ot_receiver: OTReceiver,
        ot_output: OTReceiverOutput,
    },
    Round10 {
        share: Scalar,
        session_id: HashOutput,
        public_key: AffinePoint,
        ot_receiver: OTReceiver,
        ot_output: OTReceiverOutput,
        ot_hash_data: OTReceiverHashData,
    },
    Complete(AliceDkgResult),
    Failed,
}

/// Alice's side of the key generation.
pub struct Alice<R: RngCore + CryptoRng> {
    rng: R,
    state: AliceState,
}

impl<R: RngCore + CryptoRng> Alice<R> {
    #[must_use]
    pub fn new(rng: R) -> Alice<R> {
        Alice {
            rng,
            state: AliceState::Round2,
        }
    }

    /// Round 2: stores Bob's seed commitment, samples her seed and her
    /// key share, and commits to the Schnorr proof over the share.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order.
    pub fn round2_commit_to_proof(&mut self, msg1: &DkgMsg1) -> Result<DkgMsg2, ProtocolError> {
        match std::mem::replace(&mut self.state, AliceState::Failed) {
            AliceState::Round2 => {}
            _ => return Err(ProtocolError::State(String::from("dkg round 2 out of order"))),
        }

        let mut seed = [0u8; 32];
        self.rng.fill_bytes(&mut seed);

        let share = Scalar::random(&mut self.rng);

        // The proof is bound to Alice's fresh seed; its commitment
        // keeps it sealed until Bob has spoken his own proof.
        let proof_salt = [ALICE_PROOF_TAG, &seed[..]].concat();
        let (proof, proof_commitment) =
            DLogProof::prove_commit(&share, &proof_salt, &mut self.rng);

        self.state = AliceState::Round4 {
            seed_commitment: msg1.seed_commitment,
            seed,
            share,
            proof,
        };

        Ok(DkgMsg2 {
            seed,
            proof_commitment,
        })
    }

    /// Round 4: checks Bob's seed opening and share proof, derives the
    /// session id and the joint public key, and reveals her own proof.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if any verification
    /// fails; failures are fatal.
    pub fn round4_verify_and_reveal(&mut self, msg3: &DkgMsg3) -> Result<DkgMsg4, ProtocolError> {
        let (seed_commitment, seed, share, proof) =
            match std::mem::replace(&mut self.state, AliceState::Failed) {
                AliceState::Round4 {
                    seed_commitment,
                    seed,
                    share,
                    proof,
                } => (seed_commitment, seed, share, proof),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "dkg round 4 out of order",
                    )))
                }
            };

        let seed_msg = [SEED_COMMIT_TAG, &msg3.seed[..]].concat();
        if !commits::verify_commitment(&seed_msg, &seed_commitment, &msg3.seed_salt) {
            error!("seed opening does not match round-1 commitment");
            return Err(ProtocolError::Verification(String::from(
                "bob's seed opening does not match his commitment",
            )));
        }

        let session_id = derive_session_id(&seed, &msg3.seed);

        let bob_proof_salt = [BOB_PROOF_TAG, &session_id[..]].concat();
        if !DLogProof::verify(&msg3.proof, &bob_proof_salt) {
            error!("bob's key share proof failed");
            return Err(ProtocolError::Verification(String::from(
                "bob's key share proof failed",
            )));
        }
        if msg3.proof.point == AffinePoint::IDENTITY {
            return Err(ProtocolError::Arithmetic(String::from(
                "bob's public share is the identity",
            )));
        }

        // Multiplicative joint key: Q = sk_A * (sk_B * g).
        let public_key = (msg3.proof.point * share).to_affine();

        self.state = AliceState::Round6 {
            share,
            session_id,
            public_key,
        };

        Ok(DkgMsg4 { proof })
    }

    /// Round 6: verifies the base-OT public key proof and plays the
    /// base-OT receiver with fresh random choice bits.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if the proof fails.
    pub fn round6_ot_choose(&mut self, msg5: &DkgMsg5) -> Result<DkgMsg6, ProtocolError> {
        let (share, session_id, public_key) =
            match std::mem::replace(&mut self.state, AliceState::Failed) {
                AliceState::Round6 {
                    share,
                    session_id,
                    public_key,
                } => (share, session_id, public_key),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "dkg round 6 out of order",
                    )))
                }
            };

        let ot_sid = base_ot_session_id(&session_id);
        let ot_receiver = OTReceiver::init(&ot_sid, &msg5.ot_proof).map_err(|e| {
            error!("base OT public key proof failed");
            ProtocolError::Verification(e.description)
        })?;

        let choice_bits: Vec<bool> = (0..KAPPA).map(|_| self.rng.gen()).collect();
        let (ot_output, encoded_choice_bits) =
            ot_receiver.transfer(&ot_sid, &choice_bits, &mut self.rng);

        self.state = AliceState::Round8 {
            share,
            session_id,
            public_key,
            ot_receiver,
            ot_output,
        };

        Ok(DkgMsg6 {
            encoded_choice_bits,
        })
    }

    /// Round 8: answers the base-OT challenges.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or on a malformed
    /// challenge batch.
    pub fn round8_ot_respond(&mut self, msg7: &DkgMsg7) -> Result<DkgMsg8, ProtocolError> {
        let (share, session_id, public_key, ot_receiver, ot_output) =
            match std::mem::replace(&mut self.state, AliceState::Failed) {
                AliceState::Round8 {
                    share,
                    session_id,
                    public_key,
                    ot_receiver,
                    ot_output,
                } => (share, session_id, public_key, ot_receiver, ot_output),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "dkg round 8 out of order",
                    )))
                }
            };

        let ot_sid = base_ot_session_id(&session_id);
        let (ot_hash_data, responses) =
            ot_receiver.respond(&ot_sid, &ot_output, &msg7.challenges)?;

        self.state = AliceState::Round10 {
            share,
            session_id,
            public_key,
            ot_receiver,
            ot_output,
            ot_hash_data,
        };

        Ok(DkgMsg8 { responses })
    }

    /// Round 10: verifies the base-OT opening and assembles the
    /// result. Produces no outbound message.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if the opening does
    /// not verify; failures are fatal.
    pub fn round10_ot_verify(&mut self, msg9: &DkgMsg9) -> Result<(), ProtocolError> {
        let (share, session_id, public_key, ot_receiver, ot_output, ot_hash_data) =
            match std::mem::replace(&mut self.state, AliceState::Failed) {
                AliceState::Round10 {
                    share,
                    session_id,
                    public_key,
                    ot_receiver,
                    ot_output,
                    ot_hash_data,
                } => (
                    share,
                    session_id,
                    public_key,
                    ot_receiver,
                    ot_output,
                    ot_hash_data,
                ),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "dkg round 10 out of order",
                    )))
                }
            };

        let ot_sid = base_ot_session_id(&session_id);
        ot_receiver
            .verify_opening(&ot_sid, &ot_output, &ot_hash_data, &msg9.opening)
            .map_err(|e| {
                error!("base OT opening failed verification");
                ProtocolError::Verification(e.description)
            })?;

        let ote_sender = OTESender::from_base(&ot_output)?;

        self.state = AliceState::Complete(AliceDkgResult {
            share,
            public_key,
            ote_sender,
            session_id,
        });

        Ok(())
    }

    /// The result, available once round 10 has been executed.
    ///
    /// # Errors
    ///
    /// Will return `Err` before completion.
    pub fn output(&self) -> Result<&AliceDkgResult, ProtocolError> {
        match &self.state {
            AliceState::Complete(result) => Ok(result),
            _ => Err(ProtocolError::NotComplete),
        }
    }
}

// BOB

enum BobState {
    Round1,
    Round3 {
        seed: Seed,
        seed_salt: Vec<u8>,
    },
    Round5 {
        share: Scalar,
        session_id: HashOutput,
        alice_seed: Seed,
        proof_commitment: HashOutput,
    },
    Round7 {
        share: Scalar,
        session_id: HashOutput,
        public_key: AffinePoint,
        ot_sender: OTSender,
    },
    Round9 {
        share: Scalar,
        session_id: HashOutput,
        public_key: AffinePoint,
        ot_sender: OTSender,
        ot_output: OTSenderOutput,
        ot_hash_data: OTSenderHashData,
    },
    Complete(BobDkgResult),
    Failed,
}

/// Bob's side of the key generation. He speaks first.
pub struct Bob<R: RngCore + CryptoRng> {
    rng: R,
    state: BobState,
}

impl<R: RngCore + CryptoRng> Bob<R> {
    #[must_use]
    pub fn new(rng: R) -> Bob<R> {
        Bob {
            rng,
            state: BobState::Round1,
        }
    }

    /// Round 1: samples his seed and sends only a commitment to it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order.
    pub fn round1_commit_seed(&mut self) -> Result<DkgMsg1, ProtocolError> {
        match std::mem::replace(&mut self.state, BobState::Failed) {
            BobState::Round1 => {}
            _ => return Err(ProtocolError::State(String::from("dkg round 1 out of order"))),
        }

        let mut seed = [0u8; 32];
        self.rng.fill_bytes(&mut seed);

        let seed_msg = [SEED_COMMIT_TAG, &seed[..]].concat();
        let (seed_commitment, seed_salt) = commits::commit(&mut self.rng, &seed_msg);

        self.state = BobState::Round3 { seed, seed_salt };

        Ok(DkgMsg1 { seed_commitment })
    }

    /// Round 3: stores Alice's seed and proof commitment, samples his
    /// key share, opens his seed and proves his share under the now
    /// fixed session id.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order.
    pub fn round3_prove(&mut self, msg2: &DkgMsg2) -> Result<DkgMsg3, ProtocolError> {
        let (seed, seed_salt) = match std::mem::replace(&mut self.state, BobState::Failed) {
            BobState::Round3 { seed, seed_salt } => (seed, seed_salt),
            _ => return Err(ProtocolError::State(String::from("dkg round 3 out of order"))),
        };

        let session_id = derive_session_id(&msg2.seed, &seed);

        let share = Scalar::random(&mut self.rng);
        let proof_salt = [BOB_PROOF_TAG, &session_id[..]].concat();
        let proof = DLogProof::prove(&share, &proof_salt, &mut self.rng);

        self.state = BobState::Round5 {
            share,
            session_id,
            alice_seed: msg2.seed,
            proof_commitment: msg2.proof_commitment,
        };

        Ok(DkgMsg3 {
            seed,
            seed_salt,
            proof,
        })
    }

    /// Round 5: decommit-verifies Alice's share proof, fixes the joint
    /// public key and starts the base OT in the sender role.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if the proof does
    /// not open the round-2 commitment; failures are fatal.
    pub fn round5_verify_and_start_ot(&mut self, msg4: &DkgMsg4) -> Result<DkgMsg5, ProtocolError> {
        let (share, session_id, alice_seed, proof_commitment) =
            match std::mem::replace(&mut self.state, BobState::Failed) {
                BobState::Round5 {
                    share,
                    session_id,
                    alice_seed,
                    proof_commitment,
                } => (share, session_id, alice_seed, proof_commitment),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "dkg round 5 out of order",
                    )))
                }
            };

        let alice_proof_salt = [ALICE_PROOF_TAG, &alice_seed[..]].concat();
        if !DLogProof::decommit_verify(&msg4.proof, &proof_commitment, &alice_proof_salt) {
            error!("alice's key share proof failed to open her commitment");
            return Err(ProtocolError::Verification(String::from(
                "alice's key share proof does not open her commitment",
            )));
        }
        if msg4.proof.point == AffinePoint::IDENTITY {
            return Err(ProtocolError::Arithmetic(String::from(
                "alice's public share is the identity",
            )));
        }

        // Multiplicative joint key: Q = sk_B * (sk_A * g).
        let public_key = (msg4.proof.point * share).to_affine();

        let ot_sid = base_ot_session_id(&session_id);
        let (ot_sender, ot_proof) = OTSender::init(&ot_sid, &mut self.rng);

        self.state = BobState::Round7 {
            share,
            session_id,
            public_key,
            ot_sender,
        };

        Ok(DkgMsg5 { ot_proof })
    }

    /// Round 7: computes the base-OT pads from Alice's encoded choice
    /// bits and sends the challenges.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if the batch is
    /// malformed.
    pub fn round7_ot_challenge(&mut self, msg6: &DkgMsg6) -> Result<DkgMsg7, ProtocolError> {
        let (share, session_id, public_key, ot_sender) =
            match std::mem::replace(&mut self.state, BobState::Failed) {
                BobState::Round7 {
                    share,
                    session_id,
                    public_key,
                    ot_sender,
                } => (share, session_id, public_key, ot_sender),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "dkg round 7 out of order",
                    )))
                }
            };

        if msg6.encoded_choice_bits.len() != KAPPA {
            return Err(ProtocolError::Decode(String::from(
                "base OT batch is not KAPPA wide",
            )));
        }

        let ot_sid = base_ot_session_id(&session_id);
        let (ot_output, ot_hash_data, challenges) =
            ot_sender.compute_pads(&ot_sid, &msg6.encoded_choice_bits)?;

        self.state = BobState::Round9 {
            share,
            session_id,
            public_key,
            ot_sender,
            ot_output,
            ot_hash_data,
        };

        Ok(DkgMsg7 { challenges })
    }

    /// Round 9: checks Alice's responses, opens the pad hashes and
    /// assembles his result.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if a response does
    /// not match; failures are fatal.
    pub fn round9_ot_open(&mut self, msg8: &DkgMsg8) -> Result<DkgMsg9, ProtocolError> {
        let (share, session_id, public_key, ot_sender, ot_output, ot_hash_data) =
            match std::mem::replace(&mut self.state, BobState::Failed) {
                BobState::Round9 {
                    share,
                    session_id,
                    public_key,
                    ot_sender,
                    ot_output,
                    ot_hash_data,
                } => (
                    share,
                    session_id,
                    public_key,
                    ot_sender,
                    ot_output,
                    ot_hash_data,
                ),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "dkg round 9 out of order",
                    )))
                }
            };

        let opening = ot_sender
            .verify_responses(&ot_hash_data, &msg8.responses)
            .map_err(|e| {
                error!("base OT response verification failed");
                ProtocolError::Verification(e.description)
            })?;

        let ote_receiver = OTEReceiver::from_base(&ot_output)?;

        self.state = BobState::Complete(BobDkgResult {
            share,
            public_key,
            ote_receiver,
            session_id,
        });

        Ok(DkgMsg9 { opening })
    }

    /// The result, available once round 9 has been executed.
    ///
    /// # Errors
    ///
    /// Will return `Err` before completion.
    pub fn output(&self) -> Result<&BobDkgResult, ProtocolError> {
        match &self.state {
            BobState::Complete(result) => Ok(result),
            _ => Err(ProtocolError::NotComplete),
        }
    }
}

// PROTOCOL ITERATOR GLUE

impl<R: RngCore + CryptoRng> ProtocolParty for Alice<R> {
    const PROTOCOL: ProtocolId = ProtocolId::Dkg;
    const STEP_COUNT: u32 = 5;
    const SPEAKS_FIRST: bool = false;

    fn run_step(
        &mut self,
        step: u32,
        payload: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let payload = payload.ok_or_else(|| {
            ProtocolError::Decode(String::from("dkg alice expects an inbound message"))
        })?;
        match step {
            0 => Ok(Some(self.round2_commit_to_proof(&DkgMsg1::decode(payload)?)?.encode())),
            1 => Ok(Some(self.round4_verify_and_reveal(&DkgMsg3::decode(payload)?)?.encode())),
            2 => Ok(Some(self.round6_ot_choose(&DkgMsg5::decode(payload)?)?.encode())),
            3 => Ok(Some(self.round8_ot_respond(&DkgMsg7::decode(payload)?)?.encode())),
            4 => {
                self.round10_ot_verify(&DkgMsg9::decode(payload)?)?;
                Ok(None)
            }
            _ => Err(ProtocolError::State(format!("dkg alice has no step {step}"))),
        }
    }

    fn result_payload(&self, version: u32) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.output()?.to_bytes(version))
    }
}

impl<R: RngCore + CryptoRng> ProtocolParty for Bob<R> {
    const PROTOCOL: ProtocolId = ProtocolId::Dkg;
    const STEP_COUNT: u32 = 5;
    const SPEAKS_FIRST: bool = true;

    fn run_step(
        &mut self,
        step: u32,
        payload: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        match step {
            // Bob speaks first: his opening step ignores its input.
            0 => Ok(Some(self.round1_commit_seed()?.encode())),
            _ => {
                let payload = payload.ok_or_else(|| {
                    ProtocolError::Decode(String::from("dkg bob expects an inbound message"))
                })?;
                match step {
                    1 => Ok(Some(self.round3_prove(&DkgMsg2::decode(payload)?)?.encode())),
                    2 => Ok(Some(
                        self.round5_verify_and_start_ot(&DkgMsg4::decode(payload)?)?.encode(),
                    )),
                    3 => Ok(Some(self.round7_ot_challenge(&DkgMsg6::decode(payload)?)?.encode())),
                    4 => Ok(Some(self.round9_ot_open(&DkgMsg8::decode(payload)?)?.encode())),
                    _ => Err(ProtocolError::State(format!("dkg bob has no step {step}"))),
                }
            }
        }
    }

    fn result_payload(&self, version: u32) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.output()?.to_bytes(version))
    }
}
