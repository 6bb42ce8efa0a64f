//! Two-party ECDSA signing.
//!
//! Four rounds over a key generated by [`dkg`](super::dkg). With the
//! multiplicative key `Q = sk_A * sk_B * g` and the joint nonce
//! `k = k_A * k_B`, the signature scalar decomposes as
//!
//! ```text
//! s = k^-1 * (m + r * sk)
//!   = m * (k_A^-1 * k_B^-1) + r * (sk_A * k_A^-1) * (sk_B * k_B^-1)
//! ```
//!
//! so two multiplier sessions (one over the inverted nonce shares, one
//! over the key shares divided by the nonce shares) give each party an
//! additive share of `s`. Alice folds the message hash in and sends
//! her partial value; only Bob assembles the full signature, and he
//! must verify it against `Q` before accepting it. Alice's result is
//! defined to fail.
//!
//! The nonce is protected by commit/reveal: Alice commits to her nonce
//! point before Bob shows his, so neither side can steer `R`.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature as EcdsaSignature, VerifyingKey};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::point::AffineCoordinates;
use k256::elliptic_curve::Field;
use k256::{AffinePoint, FieldBytes, ProjectivePoint, Scalar, U256};
use rand::{CryptoRng, RngCore};
use tracing::error;

use crate::protocols::dkg::{AliceDkgResult, BobDkgResult};
use crate::protocols::iterator::ProtocolParty;
use crate::protocols::serialization::{Decoder, Encoder};
use crate::protocols::{ProtocolError, ProtocolId};
use crate::utilities::commits;
use crate::utilities::hashes::{hash, HashOutput};
use crate::utilities::multiplication::{MulDataToKeepReceiver, MulReceiver, MulSender};
use crate::utilities::ot::extension::OTEDataToSender;

const SIGN_SESSION_TAG: &[u8] = b"sign session id";
const MUL_NONCE_TAG: &[u8] = b"sign mul nonce";
const MUL_KEY_TAG: &[u8] = b"sign mul key";

/// An assembled ECDSA signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub r: Scalar,
    pub s: Scalar,
}

impl Signature {
    /// Version-tagged blob: the terminal artifact of Bob's signing
    /// session.
    #[must_use]
    pub fn to_bytes(&self, version: u32) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_u32(version);
        encoder.put_scalar(&self.r);
        encoder.put_scalar(&self.s);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` if the blob is malformed or has the wrong
    /// version.
    pub fn from_bytes(bytes: &[u8], version: u32) -> Result<Signature, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let blob_version = decoder.take_u32()?;
        if blob_version != version {
            return Err(ProtocolError::Decode(format!(
                "signature blob has version {blob_version}, expected {version}"
            )));
        }
        let signature = Signature {
            r: decoder.take_scalar()?,
            s: decoder.take_scalar()?,
        };
        decoder.finish()?;
        Ok(signature)
    }
}

fn scalar_from_digest(digest: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(digest))
}

fn x_coordinate(point: &AffinePoint) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&point.x())
}

fn invert_scalar(scalar: &Scalar, what: &str) -> Result<Scalar, ProtocolError> {
    Option::<Scalar>::from(scalar.invert())
        .ok_or_else(|| ProtocolError::Arithmetic(format!("{what} is zero")))
}

fn derive_sign_session_id(
    dkg_session_id: &HashOutput,
    commitment: &HashOutput,
    digest: &[u8; 32],
) -> HashOutput {
    let salt = [SIGN_SESSION_TAG, &dkg_session_id[..]].concat();
    hash(&[&commitment[..], &digest[..]].concat(), &salt)
}

// MESSAGES

/// Round 1, Alice: commitment to her nonce point.
pub struct SignMsg1 {
    pub commitment: HashOutput,
}

/// Round 2, Bob: his nonce point plus the first round of both
/// multiplier sessions.
pub struct SignMsg2 {
    pub nonce_point: AffinePoint,
    pub mul_nonce_data: OTEDataToSender,
    pub mul_key_data: OTEDataToSender,
}

/// Round 3, Alice: nonce decommitment, both multiplier adjustments and
/// her partial signature.
pub struct SignMsg3 {
    pub nonce_point: AffinePoint,
    pub salt: Vec<u8>,
    pub mul_nonce_adjustments: Vec<Scalar>,
    pub mul_key_adjustments: Vec<Scalar>,
    pub partial_signature: Scalar,
}

impl SignMsg1 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_bytes32(&self.commitment);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<SignMsg1, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = SignMsg1 {
            commitment: decoder.take_bytes32()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl SignMsg2 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_point(&self.nonce_point);
        encoder.put_ote_data(&self.mul_nonce_data);
        encoder.put_ote_data(&self.mul_key_data);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<SignMsg2, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = SignMsg2 {
            nonce_point: decoder.take_point()?,
            mul_nonce_data: decoder.take_ote_data()?,
            mul_key_data: decoder.take_ote_data()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl SignMsg3 {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_point(&self.nonce_point);
        encoder.put_bytes(&self.salt);
        encoder.put_scalar_vec(&self.mul_nonce_adjustments);
        encoder.put_scalar_vec(&self.mul_key_adjustments);
        encoder.put_scalar(&self.partial_signature);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` on malformed payloads.
    pub fn decode(bytes: &[u8]) -> Result<SignMsg3, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let message = SignMsg3 {
            nonce_point: decoder.take_point()?,
            salt: decoder.take_bytes()?,
            mul_nonce_adjustments: decoder.take_scalar_vec()?,
            mul_key_adjustments: decoder.take_scalar_vec()?,
            partial_signature: decoder.take_scalar()?,
        };
        decoder.finish()?;
        Ok(message)
    }
}

// ALICE

enum AliceState {
    Round1,
    Round3 {
        nonce: Scalar,
        nonce_point: AffinePoint,
        salt: Vec<u8>,
        commitment: HashOutput,
    },
    Complete,
    Failed,
}

/// Alice's side of a signing session. She speaks first.
pub struct Alice<R: RngCore + CryptoRng> {
    rng: R,
    digest: [u8; 32],
    keys: AliceDkgResult,
    state: AliceState,
}

impl<R: RngCore + CryptoRng> Alice<R> {
    /// Sets up a signing session over a DKG output and a 32-byte
    /// message digest.
    #[must_use]
    pub fn new(rng: R, keys: AliceDkgResult, digest: [u8; 32]) -> Alice<R> {
        Alice {
            rng,
            digest,
            keys,
            state: AliceState::Round1,
        }
    }

    /// Round 1: samples her nonce share and commits to its public
    /// point.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order.
    pub fn round1_commit_nonce(&mut self) -> Result<SignMsg1, ProtocolError> {
        match std::mem::replace(&mut self.state, AliceState::Failed) {
            AliceState::Round1 => {}
            _ => {
                return Err(ProtocolError::State(String::from(
                    "sign round 1 out of order",
                )))
            }
        }

        let nonce = Scalar::random(&mut self.rng);
        let nonce_point = (ProjectivePoint::GENERATOR * nonce).to_affine();
        let (commitment, salt) = commits::commit_point(&mut self.rng, &nonce_point);

        self.state = AliceState::Round3 {
            nonce,
            nonce_point,
            salt,
            commitment,
        };

        Ok(SignMsg1 { commitment })
    }

    /// Round 3: runs the sender side of both multiplier sessions, with
    /// the message hash folded into her partial signature, and
    /// decommits her nonce point.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order, on degenerate nonce
    /// values, or if a multiplier consistency check fails; failures
    /// are fatal.
    pub fn round3_partial_sign(&mut self, msg2: &SignMsg2) -> Result<SignMsg3, ProtocolError> {
        let (nonce, nonce_point, salt, commitment) =
            match std::mem::replace(&mut self.state, AliceState::Failed) {
                AliceState::Round3 {
                    nonce,
                    nonce_point,
                    salt,
                    commitment,
                } => (nonce, nonce_point, salt, commitment),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "sign round 3 out of order",
                    )))
                }
            };

        if msg2.nonce_point == AffinePoint::IDENTITY {
            return Err(ProtocolError::Arithmetic(String::from(
                "bob's nonce point is the identity",
            )));
        }

        let sign_sid = derive_sign_session_id(&self.keys.session_id, &commitment, &self.digest);

        // Alice is the multiplier sender in both sessions.
        let nonce_inverse = invert_scalar(&nonce, "nonce share")?;
        let alpha_nonce = nonce_inverse;
        let alpha_key = self.keys.share * nonce_inverse;

        let mul_nonce = MulSender::new(
            self.keys.ote_sender.clone(),
            &[MUL_NONCE_TAG, &sign_sid[..]].concat(),
        );
        let mul_key = MulSender::new(
            self.keys.ote_sender.clone(),
            &[MUL_KEY_TAG, &sign_sid[..]].concat(),
        );

        let (share_nonce, mul_nonce_adjustments) = mul_nonce
            .round2_multiply(&alpha_nonce, &msg2.mul_nonce_data)
            .map_err(|e| {
                error!("multiplier consistency check failed in signing");
                ProtocolError::Verification(e.description)
            })?;
        let (share_key, mul_key_adjustments) = mul_key
            .round2_multiply(&alpha_key, &msg2.mul_key_data)
            .map_err(|e| {
                error!("multiplier consistency check failed in signing");
                ProtocolError::Verification(e.description)
            })?;

        // R = k_A * (k_B * g); only the x coordinate matters.
        let r = x_coordinate(&(msg2.nonce_point * nonce).to_affine());
        if bool::from(r.is_zero()) {
            return Err(ProtocolError::Arithmetic(String::from(
                "signature r value is zero",
            )));
        }

        let m = scalar_from_digest(&self.digest);
        let partial_signature = m * share_nonce + r * share_key;

        self.state = AliceState::Complete;

        Ok(SignMsg3 {
            nonce_point,
            salt,
            mul_nonce_adjustments,
            mul_key_adjustments,
            partial_signature,
        })
    }
}

// BOB

enum BobState {
    Round2,
    Round4 {
        nonce: Scalar,
        commitment: HashOutput,
        mul_nonce: MulReceiver,
        mul_key: MulReceiver,
        kept_nonce: MulDataToKeepReceiver,
        kept_key: MulDataToKeepReceiver,
    },
    Complete(Signature),
    Failed,
}

/// Bob's side of a signing session. Only he obtains the signature.
pub struct Bob<R: RngCore + CryptoRng> {
    rng: R,
    digest: [u8; 32],
    keys: BobDkgResult,
    state: BobState,
}

impl<R: RngCore + CryptoRng> Bob<R> {
    /// Sets up a signing session over a DKG output and a 32-byte
    /// message digest.
    #[must_use]
    pub fn new(rng: R, keys: BobDkgResult, digest: [u8; 32]) -> Bob<R> {
        Bob {
            rng,
            digest,
            keys,
            state: BobState::Round2,
        }
    }

    /// Round 2: samples his nonce share and opens both multiplier
    /// sessions as receiver, with his inverted nonce share and his
    /// masked key share as inputs.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order or on a degenerate
    /// nonce.
    pub fn round2_initialize(&mut self, msg1: &SignMsg1) -> Result<SignMsg2, ProtocolError> {
        match std::mem::replace(&mut self.state, BobState::Failed) {
            BobState::Round2 => {}
            _ => {
                return Err(ProtocolError::State(String::from(
                    "sign round 2 out of order",
                )))
            }
        }

        let sign_sid =
            derive_sign_session_id(&self.keys.session_id, &msg1.commitment, &self.digest);

        let nonce = Scalar::random(&mut self.rng);
        let nonce_point = (ProjectivePoint::GENERATOR * nonce).to_affine();

        let nonce_inverse = invert_scalar(&nonce, "nonce share")?;
        let beta_nonce = nonce_inverse;
        let beta_key = self.keys.share * nonce_inverse;

        let mul_nonce = MulReceiver::new(
            self.keys.ote_receiver.clone(),
            &[MUL_NONCE_TAG, &sign_sid[..]].concat(),
        );
        let mul_key = MulReceiver::new(
            self.keys.ote_receiver.clone(),
            &[MUL_KEY_TAG, &sign_sid[..]].concat(),
        );

        let (kept_nonce, mul_nonce_data) = mul_nonce.round1_initialize(&beta_nonce, &mut self.rng);
        let (kept_key, mul_key_data) = mul_key.round1_initialize(&beta_key, &mut self.rng);

        self.state = BobState::Round4 {
            nonce,
            commitment: msg1.commitment,
            mul_nonce,
            mul_key,
            kept_nonce,
            kept_key,
        };

        Ok(SignMsg2 {
            nonce_point,
            mul_nonce_data,
            mul_key_data,
        })
    }

    /// Round 4: checks the nonce decommitment, finishes both
    /// multipliers, assembles `(r, s)` and verifies it against the
    /// joint public key before accepting. Produces no outbound
    /// message.
    ///
    /// # Errors
    ///
    /// Will return `Err` if called out of order, on any verification
    /// failure, or on degenerate signature values; failures are fatal.
    pub fn round4_finalize(&mut self, msg3: &SignMsg3) -> Result<(), ProtocolError> {
        let (nonce, commitment, mul_nonce, mul_key, kept_nonce, kept_key) =
            match std::mem::replace(&mut self.state, BobState::Failed) {
                BobState::Round4 {
                    nonce,
                    commitment,
                    mul_nonce,
                    mul_key,
                    kept_nonce,
                    kept_key,
                } => (nonce, commitment, mul_nonce, mul_key, kept_nonce, kept_key),
                _ => {
                    return Err(ProtocolError::State(String::from(
                        "sign round 4 out of order",
                    )))
                }
            };

        if !commits::verify_commitment_point(&msg3.nonce_point, &commitment, &msg3.salt) {
            error!("alice's nonce decommitment failed");
            return Err(ProtocolError::Verification(String::from(
                "alice's nonce point does not match her commitment",
            )));
        }
        if msg3.nonce_point == AffinePoint::IDENTITY {
            return Err(ProtocolError::Arithmetic(String::from(
                "alice's nonce point is the identity",
            )));
        }

        let share_nonce = mul_nonce.round3_multiply(&kept_nonce, &msg3.mul_nonce_adjustments)?;
        let share_key = mul_key.round3_multiply(&kept_key, &msg3.mul_key_adjustments)?;

        // R = k_B * (k_A * g); both parties computed the same point.
        let r = x_coordinate(&(msg3.nonce_point * nonce).to_affine());
        if bool::from(r.is_zero()) {
            return Err(ProtocolError::Arithmetic(String::from(
                "signature r value is zero",
            )));
        }

        let m = scalar_from_digest(&self.digest);
        let s = msg3.partial_signature + m * share_nonce + r * share_key;
        if bool::from(s.is_zero()) {
            return Err(ProtocolError::Arithmetic(String::from(
                "signature s value is zero",
            )));
        }

        // The final check doubles as the malicious-security gate: any
        // deviation in the multipliers or the partial signature makes
        // it fail.
        let verifying_key = VerifyingKey::from_affine(self.keys.public_key).map_err(|_| {
            ProtocolError::Arithmetic(String::from("joint public key is not a verifying key"))
        })?;
        let signature = EcdsaSignature::from_scalars(r.to_bytes(), s.to_bytes())
            .map_err(|_| ProtocolError::Arithmetic(String::from("signature scalars rejected")))?;
        verifying_key
            .verify_prehash(&self.digest, &signature)
            .map_err(|_| {
                error!("assembled signature failed verification");
                ProtocolError::Verification(String::from(
                    "assembled signature does not verify against the joint public key",
                ))
            })?;

        self.state = BobState::Complete(Signature { r, s });

        Ok(())
    }

    /// The signature, available once round 4 has been executed.
    ///
    /// # Errors
    ///
    /// Will return `Err` before completion.
    pub fn signature(&self) -> Result<&Signature, ProtocolError> {
        match &self.state {
            BobState::Complete(signature) => Ok(signature),
            _ => Err(ProtocolError::NotComplete),
        }
    }
}

// PROTOCOL ITERATOR GLUE

impl<R: RngCore + CryptoRng> ProtocolParty for Alice<R> {
    const PROTOCOL: ProtocolId = ProtocolId::Sign;
    const STEP_COUNT: u32 = 2;
    const SPEAKS_FIRST: bool = true;

    fn run_step(
        &mut self,
        step: u32,
        payload: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        match step {
            0 => Ok(Some(self.round1_commit_nonce()?.encode())),
            1 => {
                let payload = payload.ok_or_else(|| {
                    ProtocolError::Decode(String::from("sign alice expects an inbound message"))
                })?;
                Ok(Some(
                    self.round3_partial_sign(&SignMsg2::decode(payload)?)?.encode(),
                ))
            }
            _ => Err(ProtocolError::State(format!("sign alice has no step {step}"))),
        }
    }

    fn result_payload(&self, _version: u32) -> Result<Vec<u8>, ProtocolError> {
        // Only Bob computes a signature in this protocol.
        Err(ProtocolError::State(String::from(
            "alice does not produce a signature",
        )))
    }
}

impl<R: RngCore + CryptoRng> ProtocolParty for Bob<R> {
    const PROTOCOL: ProtocolId = ProtocolId::Sign;
    const STEP_COUNT: u32 = 2;
    const SPEAKS_FIRST: bool = false;

    fn run_step(
        &mut self,
        step: u32,
        payload: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let payload = payload.ok_or_else(|| {
            ProtocolError::Decode(String::from("sign bob expects an inbound message"))
        })?;
        match step {
            0 => Ok(Some(self.round2_initialize(&SignMsg1::decode(payload)?)?.encode())),
            1 => {
                self.round4_finalize(&SignMsg3::decode(payload)?)?;
                Ok(None)
            }
            _ => Err(ProtocolError::State(format!("sign bob has no step {step}"))),
        }
    }

    fn result_payload(&self, version: u32) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.signature()?.to_bytes(version))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocols::dkg::tests::run_dkg;
    use bitcoin_hashes::{sha256, Hash};

    /// Runs the four rounds at the typed level, playing both parties.
    pub(crate) fn run_sign(
        alice_keys: AliceDkgResult,
        bob_keys: BobDkgResult,
        digest: [u8; 32],
    ) -> Result<Signature, ProtocolError> {
        let mut alice = Alice::new(rand::thread_rng(), alice_keys, digest);
        let mut bob = Bob::new(rand::thread_rng(), bob_keys, digest);

        let msg1 = alice.round1_commit_nonce()?;
        let msg2 = bob.round2_initialize(&msg1)?;
        let msg3 = alice.round3_partial_sign(&msg2)?;
        bob.round4_finalize(&msg3)?;

        Ok(bob.signature()?.clone())
    }

    #[test]
    fn test_sign_end_to_end() {
        let (alice_keys, bob_keys) = run_dkg(rand::thread_rng(), rand::thread_rng()).unwrap();
        let public_key = bob_keys.public_key;

        let digest = sha256::Hash::hash(b"hello").to_byte_array();
        let signature = run_sign(alice_keys, bob_keys, digest).unwrap();

        // Independent re-verification under standard ECDSA.
        let verifying_key = VerifyingKey::from_affine(public_key).unwrap();
        let ecdsa_signature =
            EcdsaSignature::from_scalars(signature.r.to_bytes(), signature.s.to_bytes()).unwrap();
        verifying_key
            .verify_prehash(&digest, &ecdsa_signature)
            .unwrap();
    }

    #[test]
    fn test_sign_fresh_nonce_per_session() {
        let (alice_keys, bob_keys) = run_dkg(rand::thread_rng(), rand::thread_rng()).unwrap();
        let digest = sha256::Hash::hash(b"hello").to_byte_array();

        let first = run_sign(alice_keys.clone(), bob_keys.clone(), digest).unwrap();
        let second = run_sign(alice_keys, bob_keys, digest).unwrap();

        assert_ne!(first.r, second.r);
    }

    #[test]
    fn test_sign_tampered_consistency_payload() {
        let (alice_keys, bob_keys) = run_dkg(rand::thread_rng(), rand::thread_rng()).unwrap();
        let digest = sha256::Hash::hash(b"hello").to_byte_array();

        let mut alice = Alice::new(rand::thread_rng(), alice_keys, digest);
        let mut bob = Bob::new(rand::thread_rng(), bob_keys, digest);

        let msg1 = alice.round1_commit_nonce().unwrap();
        let mut msg2 = bob.round2_initialize(&msg1).unwrap();

        // One flipped bit in the extension consistency payload must
        // surface as a fatal verification error on Alice's side.
        msg2.mul_nonce_data.verify_t[7] ^= 0x01;
        assert!(matches!(
            alice.round3_partial_sign(&msg2),
            Err(ProtocolError::Verification(_))
        ));

        // And the session stays dead afterwards.
        msg2.mul_nonce_data.verify_t[7] ^= 0x01;
        assert!(matches!(
            alice.round3_partial_sign(&msg2),
            Err(ProtocolError::State(_))
        ));
    }

    #[test]
    fn test_sign_tampered_nonce_decommitment() {
        let (alice_keys, bob_keys) = run_dkg(rand::thread_rng(), rand::thread_rng()).unwrap();
        let digest = sha256::Hash::hash(b"hello").to_byte_array();

        let mut alice = Alice::new(rand::thread_rng(), alice_keys, digest);
        let mut bob = Bob::new(rand::thread_rng(), bob_keys, digest);

        let msg1 = alice.round1_commit_nonce().unwrap();
        let msg2 = bob.round2_initialize(&msg1).unwrap();
        let mut msg3 = alice.round3_partial_sign(&msg2).unwrap();

        msg3.salt[0] ^= 0xff;
        assert!(matches!(
            bob.round4_finalize(&msg3),
            Err(ProtocolError::Verification(_))
        ));
    }

    #[test]
    fn test_sign_tampered_partial_signature() {
        let (alice_keys, bob_keys) = run_dkg(rand::thread_rng(), rand::thread_rng()).unwrap();
        let digest = sha256::Hash::hash(b"hello").to_byte_array();

        let mut alice = Alice::new(rand::thread_rng(), alice_keys, digest);
        let mut bob = Bob::new(rand::thread_rng(), bob_keys, digest);

        let msg1 = alice.round1_commit_nonce().unwrap();
        let msg2 = bob.round2_initialize(&msg1).unwrap();
        let mut msg3 = alice.round3_partial_sign(&msg2).unwrap();

        // A wrong partial signature survives until the final check,
        // which must reject it.
        msg3.partial_signature += Scalar::ONE;
        assert!(matches!(
            bob.round4_finalize(&msg3),
            Err(ProtocolError::Verification(_))
        ));
        assert!(bob.signature().is_err());
    }

    #[test]
    fn test_sign_message_roundtrip() {
        let (alice_keys, bob_keys) = run_dkg(rand::thread_rng(), rand::thread_rng()).unwrap();
        let digest = sha256::Hash::hash(b"hello").to_byte_array();

        let mut alice = Alice::new(rand::thread_rng(), alice_keys, digest);
        let mut bob = Bob::new(rand::thread_rng(), bob_keys, digest);

        let msg1 = alice.round1_commit_nonce().unwrap();
        let msg1_decoded = SignMsg1::decode(&msg1.encode()).unwrap();
        assert_eq!(msg1_decoded.commitment, msg1.commitment);

        let msg2 = bob.round2_initialize(&msg1).unwrap();
        let msg2_decoded = SignMsg2::decode(&msg2.encode()).unwrap();
        assert_eq!(msg2_decoded.nonce_point, msg2.nonce_point);
        assert_eq!(msg2_decoded.mul_nonce_data.u, msg2.mul_nonce_data.u);
        assert_eq!(msg2_decoded.mul_nonce_data.chi_salt, msg2.mul_nonce_data.chi_salt);
        assert_eq!(msg2_decoded.mul_key_data.verify_x, msg2.mul_key_data.verify_x);
        assert_eq!(msg2_decoded.mul_key_data.verify_t, msg2.mul_key_data.verify_t);

        let msg3 = alice.round3_partial_sign(&msg2).unwrap();
        let msg3_decoded = SignMsg3::decode(&msg3.encode()).unwrap();
        assert_eq!(msg3_decoded.nonce_point, msg3.nonce_point);
        assert_eq!(msg3_decoded.salt, msg3.salt);
        assert_eq!(msg3_decoded.mul_nonce_adjustments, msg3.mul_nonce_adjustments);
        assert_eq!(msg3_decoded.mul_key_adjustments, msg3.mul_key_adjustments);
        assert_eq!(msg3_decoded.partial_signature, msg3.partial_signature);

        // The signature blob round-trips as well.
        bob.round4_finalize(&msg3).unwrap();
        let signature = bob.signature().unwrap().clone();
        let blob = signature.to_bytes(1);
        assert_eq!(Signature::from_bytes(&blob, 1).unwrap(), signature);
        assert!(Signature::from_bytes(&blob, 2).is_err());
    }
}
