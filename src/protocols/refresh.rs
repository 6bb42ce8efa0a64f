//! Key refresh.
//!
//! Seven rounds that re-randomize the multiplicative split of the
//! secret key while preserving the joint public key, and replace the
//! cached OT-extension seeds with the output of a fresh base OT.
//!
//! The re-split rides on one multiplier session over the *old* cached
//! seeds: Alice picks a fresh share `sk_A'` and plays the sender with
//! `tau = sk_A / sk_A'`; Bob plays the receiver with his current
//! share, so the additive shares satisfy `a + b = tau * sk_B = sk_B'`.
//! Alice hands her share `a` over together with her new public share,
//! which lets Bob both assemble `sk_B'` and check
//! `sk_B' * (sk_A' * g) == Q` before accepting. Rounds 2 through 7
//! carry the fresh base OT alongside, with the roles of the original
//! key generation (Bob sends, Alice chooses), so the refreshed results
//! are drop-in inputs for later signing sessions.

use k256::elliptic_curve::Field;
use k256::{AffinePoint, ProjectivePoint, Scalar};
use rand::{CryptoRng, Rng, RngCore};
use tracing::error;

use crate::protocols::dkg::{AliceDkgResult, BobDkgResult, Seed};
use crate::protocols::iterator::ProtocolParty;
use crate::protocols::serialization::{Decoder, Encoder};
use crate::protocols::{ProtocolError, ProtocolId};
use crate::utilities::hashes::{hash, point_to_bytes, HashOutput};
use crate::utilities::ot::base::{
    OTReceiver, OTReceiverHashData, OTReceiverOutput, OTSender, OTSenderHashData,
    OTSenderOpening, OTSenderOutput,
};
use crate::utilities::ot::extension::{OTEDataToSender, OTEReceiver, OTESender, KAPPA};
use crate::utilities::multiplication::{MulDataToKeepReceiver, MulReceiver, MulSender};
use crate::utilities::proofs::DLogProof;

const SESSION_ID_TAG: &[u8] = b"refresh session id";
const MUL_TAG: &[u8] = b"refresh mul";
const BASE_OT_TAG: &[u8] = b"refresh base ot";

/// Session id binding both refresh seeds and the key being refreshed.
fn derive_session_id(seed_a: &Seed, seed_b: &Seed, public_key: &AffinePoint) -> HashOutput {
    let msg = [
        &seed_a[..],
        &seed_b[..],
        &point_to_bytes(public_key)[..],
    ]
    .concat();
    hash(&msg, SESSION_ID_TAG)
}

fn mul_session_id(session_id: &HashOutput) -> Vec<u8> {
    [MUL_TAG, &session_id[..]].concat()
}

fn base_ot_session_id(session_id: &HashOutput) -> Vec<u8> {
    [BASE_OT_TAG, &session_id[..]].concat()
}

// MESSAGES

/// Round 1, Alice: her refresh seed.
pub struct RefreshMsg1 {
    pub seed: Seed,
}

/// Round 2, Bob: his seed, the multiplier's first round over the old
/// extension seeds, and the fresh base-OT public key proof.
pub struct RefreshMsg2 {
    pub seed: Seed,
    pub mul_data: OTEDataToSender,
    pub ot_proof: DLogProof,
}

/// Round 3, Alice: the multiplier adjustments, her additive share of
/// Bob's new key share, her new public share, and her base-OT choice
/// encodings.
pub struct RefreshMsg3 {
    pub mul_adjustments: Vec<Scalar>,
    pub share_adjust: Scalar,
    pub new_public_share: AffinePoint,
    pub encoded_choice_bits: Vec<AffinePoint>,
}

/// Round 4, Bob: base-OT challenges.
pub struct RefreshMsg4 {
    pub challenges: Vec<HashOutput>,
}

/// Round 5, Alice: base-OT responses.
pub struct RefreshMsg5 {
    pub responses: Vec<HashOutput>,
}

/// Round 6, Bob: base-OT opening.
pub struct RefreshMsg6 {
    pub opening: OTSenderOpening,
}

impl RefreshMsg1 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32(&self.seed);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<RefreshMsg1, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = RefreshMsg1 {
            seed: decoder.take_bytes32()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl RefreshMsg2 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32(&self.seed);
        encoder.put_ote_data(&self.mul_data);
        encoder.put_dlog_proof(&self.ot_proof);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<RefreshMsg2, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = RefreshMsg2 {
            seed: decoder.take_bytes32()?,
            mul_data: decoder.take_ote_data()?,
            ot_proof: decoder.take_dlog_proof()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl RefreshMsg3 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_scalar_vec(&self.mul_adjustments);
        encoder.put_scalar(&self.share_adjust);
        encoder.put_point(&self.new_public_share);
        encoder.put_point_vec(&self.encoded_choice_bits);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<RefreshMsg3, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = RefreshMsg3 {
            mul_adjustments: decoder.take_scalar_vec()?,
            share_adjust: decoder.take_scalar()?,
            new_public_share: decoder.take_point()?,
            encoded_choice_bits: decoder.take_point_vec()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl RefreshMsg4 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32_vec(&self.challenges);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<RefreshMsg4, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = RefreshMsg4 {
            challenges: decoder.take_bytes32_vec()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl RefreshMsg5 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32_vec(&self.responses);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<RefreshMsg5, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = RefreshMsg5 {
            responses: decoder.take_bytes32_vec()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl RefreshMsg6 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_ot_opening(&self.opening);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<RefreshMsg6, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = RefreshMsg6 {
            opening: decoder.take_ot_opening()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

// ALICE

enum AliceState {
    Round1,
    Round3 {
        seed: Seed,
    },
    Round5 {
        new_share: Scalar,
        session_id: HashOutput,
        ot_receiver: OTReceiver,
        ot_output: OTReceiverOutput,
    },
    Round7 {
        new_share: Scalar,
        session_id: HashOutput,
        ot_receiver: OTReceiver,
        ot_output: OTReceiverOutput,
        ot_hash_data: OTReceiverHashData,
    },
    Complete(AliceDkgResult),
    Failed,
}

/// Alice's side of a refresh. She speaks first.
pub struct Alice<R: RngCore + CryptoRng> {
    rng: R,
    keys: AliceDkgResult,
    state: AliceState,
}

impl<R: RngCore + CryptoRng> Alice<R> {
    /// Sets up a refresh session over Alice's current key material.
    #[must_use]
    pub fn new(rng: R, keys: AliceDkgResult) -> Alice<R> {
        Alice {
            rng,
            keys,
            state: AliceState::Round1,
        }
    }

    /// Round 1: emits her refresh seed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order.
    pub fn round1_generate_seed(&mut self) -> Result<RefreshMsg1, ProtocolError> {
        match std::mem::replace(&mut self.state, AliceState::Failed) {
            AliceState::Round1 => {}
            _ => {
                return Err(ProtocolError::State(String::from(
                    "refresh round 1 out of order",
                )))
            }
        }

        let mut seed = [0u8; 32];
        self.rng.fill_bytes(&mut seed);

        self.state = AliceState::Round3 { seed };

        Ok(RefreshMsg1 { seed })
    }

    /// Round 3: picks her fresh share, runs the multiplier sender with
    /// the compensation factor, and starts the fresh base OT as
    /// receiver.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order, if the multiplier
    /// consistency check fails, or if the base-OT proof fails;
    /// failures are fatal.
    pub fn round3_resplit_key(&mut self, msg2: &RefreshMsg2) -> Result<RefreshMsg3, ProtocolError> {
        let seed = match std::mem::replace(&mut self.state, AliceState::Failed) {
            AliceState::Round3 { seed } => seed,
            _ => {
                return Err(ProtocolError::State(String::from(
                    "refresh round 3 out of order",
                )))
            }
        };

        let session_id = derive_session_id(&seed, &msg2.seed, &self.keys.public_key);

        // Fresh share and the factor that keeps the product intact:
        // tau * sk_B = (sk_A / sk_A') * sk_B = sk_B'.
        let new_share = Scalar::random(&mut self.rng);
        let new_share_inverse = Option::<Scalar>::from(new_share.invert())
            .ok_or_else(|| ProtocolError::Arithmetic(String::from("fresh share is zero")))?;
        let tau = self.keys.share * new_share_inverse;

        let mul_sender = MulSender::new(self.keys.ote_sender.clone(), &mul_session_id(&session_id));
        let (share_adjust, mul_adjustments) =
            mul_sender.round2_multiply(&tau, &msg2.mul_data).map_err(|e| {
                error!("multiplier consistency check failed in refresh");
                ProtocolError::Verification(e.description)
            })?;

        let new_public_share = (ProjectivePoint::GENERATOR * new_share).to_affine();

        // Fresh base OT, same orientation as in the key generation.
        let ot_sid = base_ot_session_id(&session_id);
        let ot_receiver = OTReceiver::init(&ot_sid, &msg2.ot_proof).map_err(|e| {
            error!("base OT public key proof failed in refresh");
            ProtocolError::Verification(e.description)
        })?;

        let choice_bits: Vec<bool> = (0..KAPPA).map(|_| self.rng.gen()).collect();
        let (ot_output, encoded_choice_bits) =
            ot_receiver.transfer(&ot_sid, &choice_bits, &mut self.rng);

        self.state = AliceState::Round5 {
            new_share,
            session_id,
            ot_receiver,
            ot_output,
        };

        Ok(RefreshMsg3 {
            mul_adjustments,
            share_adjust,
            new_public_share,
            encoded_choice_bits,
        })
    }

    /// Round 5: answers the base-OT challenges.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or on a malformed
    /// challenge batch.
    pub fn round5_ot_respond(&mut self, msg4: &RefreshMsg4) -> Result<RefreshMsg5, ProtocolError> {
        let (new_share, session_id, ot_receiver, ot_output) =
            match std::mem::replace(&mut self.state, AliceState::Failed) {
                AliceState::Round5 {
                    new_share,
                    session_id,
                    ot_receiver,
                    ot_output,
                } => (new_share, session_id, ot_receiver, ot_output),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "refresh round 5 out of order",
                    )))
                }
            };

        let ot_sid = base_ot_session_id(&session_id);
        let (ot_hash_data, responses) =
            ot_receiver.respond(&ot_sid, &ot_output, &msg4.challenges)?;

        self.state = AliceState::Round7 {
            new_share,
            session_id,
            ot_receiver,
            ot_output,
            ot_hash_data,
        };

        Ok(RefreshMsg5 { responses })
    }

    /// Round 7: verifies the base-OT opening and closes the refreshed
    /// key material. Produces no outbound message.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if the opening does
    /// not verify; failures are fatal.
    pub fn round7_ot_verify(&mut self, msg6: &RefreshMsg6) -> Result<(), ProtocolError> {
        let (new_share, session_id, ot_receiver, ot_output, ot_hash_data) =
            match std::mem::replace(&mut self.state, AliceState::Failed) {
                AliceState::Round7 {
                    new_share,
                    session_id,
                    ot_receiver,
                    ot_output,
                    ot_hash_data,
                } => (new_share, session_id, ot_receiver, ot_output, ot_hash_data),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "refresh round 7 out of order",
                    )))
                }
            };

        let ot_sid = base_ot_session_id(&session_id);
        ot_receiver
            .verify_opening(&ot_sid, &ot_output, &ot_hash_data, &msg6.opening)
            .map_err(|e| {
                error!("base OT opening failed verification in refresh");
                ProtocolError::Verification(e.description)
            })?;

        let ote_sender = OTESender::from_base(&ot_output)?;

        self.state = AliceState::Complete(AliceDkgResult {
            share: new_share,
            public_key: self.keys.public_key,
            ote_sender,
            session_id,
        });

        Ok(())
    }

    /// The refreshed key material, available once round 7 has been
    /// executed.
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
    Round2,
    Round4 {
        session_id: HashOutput,
        mul_receiver: MulReceiver,
        mul_kept: MulDataToKeepReceiver,
        ot_sender: OTSender,
    },
    Round6 {
        new_share: Scalar,
        session_id: HashOutput,
        ot_sender: OTSender,
        ot_output: OTSenderOutput,
        ot_hash_data: OTSenderHashData,
    },
    Complete(BobDkgResult),
    Failed,
}

/// Bob's side of a refresh.
pub struct Bob<R: RngCore + CryptoRng> {
    rng: R,
    keys: BobDkgResult,
    state: BobState,
}

impl<R: RngCore + CryptoRng> Bob<R> {
    /// Sets up a refresh session over Bob's current key material.
    #[must_use]
    pub fn new(rng: R, keys: BobDkgResult) -> Bob<R> {
        Bob {
            rng,
            keys,
            state: BobState::Round2,
        }
    }

    /// Round 2: produces his seed, opens the multiplier as receiver
    /// with his current share over the old extension seeds, and starts
    /// the fresh base OT as sender.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order.
    pub fn round2_start_resplit(&mut self, msg1: &RefreshMsg1) -> Result<RefreshMsg2, ProtocolError> {
        match std::mem::replace(&mut self.state, BobState::Failed) {
            BobState::Round2 => {}
            _ => {
                return Err(ProtocolError::State(String::from(
                    "refresh round 2 out of order",
                )))
            }
        }

        let mut seed = [0u8; 32];
        self.rng.fill_bytes(&mut seed);

        let session_id = derive_session_id(&msg1.seed, &seed, &self.keys.public_key);

        let mul_receiver =
            MulReceiver::new(self.keys.ote_receiver.clone(), &mul_session_id(&session_id));
        let (mul_kept, mul_data) = mul_receiver.round1_initialize(&self.keys.share, &mut self.rng);

        let ot_sid = base_ot_session_id(&session_id);
        let (ot_sender, ot_proof) = OTSender::init(&ot_sid, &mut self.rng);

        self.state = BobState::Round4 {
            session_id,
            mul_receiver,
            mul_kept,
            ot_sender,
        };

        Ok(RefreshMsg2 {
            seed,
            mul_data,
            ot_proof,
        })
    }

    /// Round 4: assembles his new share, checks it against the
    /// preserved public key, and sends the base-OT challenges.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if the re-split
    /// does not reproduce the joint public key; failures are fatal.
    pub fn round4_assemble_share(&mut self, msg3: &RefreshMsg3) -> Result<RefreshMsg4, ProtocolError> {
        let (session_id, mul_receiver, mul_kept, ot_sender) =
            match std::mem::replace(&mut self.state, BobState::Failed) {
                BobState::Round4 {
                    session_id,
                    mul_receiver,
                    mul_kept,
                    ot_sender,
                } => (session_id, mul_receiver, mul_kept, ot_sender),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "refresh round 4 out of order",
                    )))
                }
            };

        if msg3.new_public_share == AffinePoint::IDENTITY {
            return Err(ProtocolError::Arithmetic(String::from(
                "alice's new public share is the identity",
            )));
        }

        let mul_share = mul_receiver.round3_multiply(&mul_kept, &msg3.mul_adjustments)?;
        let new_share = msg3.share_adjust + mul_share;

        // The re-split must preserve the joint public key: this is the
        // receiver-side consistency check of the multiplication.
        let expected = ProjectivePoint::from(msg3.new_public_share) * new_share;
        if expected.to_affine() != self.keys.public_key {
            error!("refreshed shares do not reproduce the joint public key");
            return Err(ProtocolError::Verification(String::from(
                "refreshed shares do not reproduce the joint public key",
            )));
        }

        if msg3.encoded_choice_bits.len() != KAPPA {
            return Err(ProtocolError::Decode(String::from(
                "base OT batch is not KAPPA wide",
            )));
        }

        let ot_sid = base_ot_session_id(&session_id);
        let (ot_output, ot_hash_data, challenges) =
            ot_sender.compute_pads(&ot_sid, &msg3.encoded_choice_bits)?;

        self.state = BobState::Round6 {
            new_share,
            session_id,
            ot_sender,
            ot_output,
            ot_hash_data,
        };

        Ok(RefreshMsg4 { challenges })
    }

    /// Round 6: checks Alice's responses, opens the pad hashes and
    /// closes his refreshed key material.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or if a response does
    /// not match; failures are fatal.
    pub fn round6_ot_open(&mut self, msg5: &RefreshMsg5) -> Result<RefreshMsg6, ProtocolError> {
        let (new_share, session_id, ot_sender, ot_output, ot_hash_data) =
            match std::mem::replace(&mut self.state, BobState::Failed) {
                BobState::Round6 {
                    new_share,
                    session_id,
                    ot_sender,
                    ot_output,
                    ot_hash_data,
                } => (new_share, session_id, ot_sender, ot_output, ot_hash_data),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "refresh round 6 out of order",
                    )))
                }
            };

        let opening = ot_sender
            .verify_responses(&ot_hash_data, &msg5.responses)
            .map_err(|e| {
                error!("base OT response verification failed in refresh");
                ProtocolError::Verification(e.description)
            })?;

        let ote_receiver = OTEReceiver::from_base(&ot_output)?;

        self.state = BobState::Complete(BobDkgResult {
            share: new_share,
            public_key: self.keys.public_key,
            ote_receiver,
            session_id,
        });

        Ok(RefreshMsg6 { opening })
    }

    /// The refreshed key material, available once round 6 has been
    /// executed.
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
    const PROTOCOL: ProtocolId = ProtocolId::Refresh;
    const STEP_COUNT: u32 = 4;
    const SPEAKS_FIRST: bool = true;

    fn run_step(
        &mut self,
        step: u32,
        payload: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        match step {
            0 => Ok(Some(self.round1_generate_seed()?.encode())),
            _ => {
                let payload = payload.ok_or_else(|| {
                    ProtocolError::Decode(String::from("refresh alice expects an inbound message"))
                })?;
                match step {
                    1 => Ok(Some(
                        self.round3_resplit_key(&RefreshMsg2::decode(payload)?)?.encode(),
                    )),
                    2 => Ok(Some(
                        self.round5_ot_respond(&RefreshMsg4::decode(payload)?)?.encode(),
                    )),
                    3 => {
                        self.round7_ot_verify(&RefreshMsg6::decode(payload)?)?;
                        Ok(None)
                    }
                    _ => Err(ProtocolError::State(format!(
                        "refresh alice has no step {step}"
                    ))),
                }
            }
        }
    }

    fn result_payload(&self, version: u32) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.output()?.to_bytes(version))
    }
}

impl<R: RngCore + CryptoRng> ProtocolParty for Bob<R> {
    const PROTOCOL: ProtocolId = ProtocolId::Refresh;
    const STEP_COUNT: u32 = 3;
    const SPEAKS_FIRST: bool = false;

    fn run_step(
        &mut self,
        step: u32,
        payload: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let payload = payload.ok_or_else(|| {
            ProtocolError::Decode(String::from("refresh bob expects an inbound message"))
        })?;
        match step {
            0 => Ok(Some(
                self.round2_start_resplit(&RefreshMsg1::decode(payload)?)?.encode(),
            )),
            1 => Ok(Some(
                self.round4_assemble_share(&RefreshMsg3::decode(payload)?)?.encode(),
            )),
            2 => Ok(Some(self.round6_ot_open(&RefreshMsg5::decode(payload)?)?.encode())),
            _ => Err(ProtocolError::State(format!("refresh bob has no step {step}"))),
        }
    }

    fn result_payload(&self, version: u32) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.output()?.to_bytes(version))
    }
}
