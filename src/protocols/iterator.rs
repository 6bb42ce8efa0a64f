//! Uniform step-driver over the three protocols.
//!
//! Every party implements [`ProtocolParty`]; [`Protocol`] wraps one
//! party and turns it into a message-in/message-out iterator: each
//! [`Protocol::next`] call consumes the inbound envelope, advances
//! exactly one step and returns the outbound envelope (or none, for a
//! terminal verification step) together with a completion flag.
//!
//! Global round numbers alternate between the parties starting from
//! the initiator, which is the only side whose first step takes no
//! inbound message. The iterator checks the protocol id, the version
//! and the round number of every inbound envelope; a mismatch, like
//! any step failure, is fatal and leaves the iterator in a terminal
//! poisoned state that refuses all further calls.

use rand::{CryptoRng, RngCore};
use tracing::error;

use crate::protocols::dkg::{self, AliceDkgResult, BobDkgResult};
use crate::protocols::refresh;
use crate::protocols::signing;
use crate::protocols::{ProtocolError, ProtocolId, ProtocolMessage};

/// One side of one protocol, as driven by [`Protocol`].
pub trait ProtocolParty {
    /// Which protocol the party belongs to.
    const PROTOCOL: ProtocolId;
    /// How many steps this side executes.
    const STEP_COUNT: u32;
    /// Whether this side sends the first message of the session.
    const SPEAKS_FIRST: bool;

    /// Executes one step: decodes the payload, runs the round, encodes
    /// the answer. `None` output means the step is a terminal
    /// verification with nothing to send.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the session.
    fn run_step(
        &mut self,
        step: u32,
        payload: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, ProtocolError>;

    /// Encodes the terminal artifact once the party has completed.
    ///
    /// # Errors
    ///
    /// Will return `Err` before completion, or always for parties that
    /// produce no artifact (Alice in signing).
    fn result_payload(&self, version: u32) -> Result<Vec<u8>, ProtocolError>;
}

enum IteratorState {
    Running { step: u32 },
    Complete,
    Poisoned,
}

/// Message-driven iterator around one protocol party.
pub struct Protocol<P: ProtocolParty> {
    party: P,
    version: u32,
    state: IteratorState,
}

impl<P: ProtocolParty> Protocol<P> {
    #[must_use]
    pub fn new(party: P, version: u32) -> Protocol<P> {
        Protocol {
            party,
            version,
            state: IteratorState::Running { step: 0 },
        }
    }

    /// The round number this party expects to receive before its given
    /// step, if any.
    fn inbound_round(step: u32) -> Option<u32> {
        if P::SPEAKS_FIRST {
            // The initiator's first step ignores its input.
            if step == 0 {
                None
            } else {
                Some(2 * step)
            }
        } else {
            Some(2 * step + 1)
        }
    }

    /// The round number carried by the message this party emits at its
    /// given step.
    fn outbound_round(step: u32) -> u32 {
        if P::SPEAKS_FIRST {
            2 * step + 1
        } else {
            2 * step + 2
        }
    }

    /// Consumes the inbound message, advances one step, and returns
    /// the outbound message (if the step produces one) and a flag
    /// telling whether the party is done.
    ///
    /// # Errors
    ///
    /// Will return `Err` on any envelope mismatch (wrong protocol,
    /// version or round), on any step failure, and on every call after
    /// completion or after a previous failure. All errors except the
    /// post-completion ones poison the iterator.
    pub fn next(
        &mut self,
        input: Option<ProtocolMessage>,
    ) -> Result<(Option<ProtocolMessage>, bool), ProtocolError> {
        let step = match self.state {
            IteratorState::Running { step } => step,
            IteratorState::Complete => {
                return Err(ProtocolError::State(String::from(
                    "protocol already complete",
                )))
            }
            IteratorState::Poisoned => {
                return Err(ProtocolError::State(String::from(
                    "protocol poisoned by an earlier error",
                )))
            }
        };

        match self.advance(step, input) {
            Ok(output) => {
                self.state = if step + 1 == P::STEP_COUNT {
                    IteratorState::Complete
                } else {
                    IteratorState::Running { step: step + 1 }
                };
                let done = matches!(self.state, IteratorState::Complete);

                let outbound = output.map(|payload| ProtocolMessage {
                    protocol: P::PROTOCOL,
                    round: Self::outbound_round(step),
                    version: self.version,
                    payload,
                });

                Ok((outbound, done))
            }
            Err(e) => {
                error!("protocol step failed, poisoning the session: {e}");
                self.state = IteratorState::Poisoned;
                Err(e)
            }
        }
    }

    fn advance(
        &mut self,
        step: u32,
        input: Option<ProtocolMessage>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let payload = match Self::inbound_round(step) {
            None => None,
            Some(expected_round) => {
                let message = input.ok_or_else(|| {
                    ProtocolError::Decode(String::from("expected an inbound message"))
                })?;
                if message.protocol != P::PROTOCOL {
                    return Err(ProtocolError::Decode(String::from(
                        "message belongs to another protocol",
                    )));
                }
                if message.version != self.version {
                    return Err(ProtocolError::Decode(format!(
                        "message version {} does not match configured version {}",
                        message.version, self.version
                    )));
                }
                if message.round != expected_round {
                    return Err(ProtocolError::State(format!(
                        "message for round {} presented at round {}",
                        message.round, expected_round
                    )));
                }
                Some(message.payload)
            }
        };

        self.party.run_step(step, payload.as_deref())
    }

    /// The terminal artifact: a key-share blob for DKG and refresh, a
    /// signature blob for Bob-sign.
    ///
    /// # Errors
    ///
    /// Will return `Err` while the protocol is still running or after
    /// a fatal error.
    pub fn result(&self) -> Result<Vec<u8>, ProtocolError> {
        match self.state {
            IteratorState::Running { .. } => Err(ProtocolError::NotComplete),
            IteratorState::Poisoned => Err(ProtocolError::State(String::from(
                "protocol poisoned by an earlier error",
            ))),
            IteratorState::Complete => self.party.result_payload(self.version),
        }
    }
}

// CONSTRUCTORS
// One per party and protocol, mirroring the persistence blobs: the
// DKG constructors start from scratch, the signing and refresh ones
// take the key-share blob produced by an earlier DKG or refresh.

/// Creates a new protocol that can compute a DKG as Alice.
pub fn new_alice_dkg<R: RngCore + CryptoRng>(rng: R, version: u32) -> Protocol<dkg::Alice<R>> {
    Protocol::new(dkg::Alice::new(rng), version)
}

/// Creates a new protocol that can compute a DKG as Bob.
pub fn new_bob_dkg<R: RngCore + CryptoRng>(rng: R, version: u32) -> Protocol<dkg::Bob<R>> {
    Protocol::new(dkg::Bob::new(rng), version)
}

/// Creates a new protocol that can sign a 32-byte digest as Alice.
///
/// `keyshare` is the blob produced by an Alice DKG or refresh at the
/// same version.
///
/// # Errors
///
/// Will return `Err` if the blob does not decode at this version.
pub fn new_alice_sign<R: RngCore + CryptoRng>(
    rng: R,
    version: u32,
    digest: [u8; 32],
    keyshare: &[u8],
) -> Result<Protocol<signing::Alice<R>>, ProtocolError> {
    let keys = AliceDkgResult::from_bytes(keyshare, version)?;
    Ok(Protocol::new(signing::Alice::new(rng, keys, digest), version))
}

/// Creates a new protocol that can sign a 32-byte digest as Bob.
///
/// `keyshare` is the blob produced by a Bob DKG or refresh at the
/// same version.
///
/// # Errors
///
/// Will return `Err` if the blob does not decode at this version.
pub fn new_bob_sign<R: RngCore + CryptoRng>(
    rng: R,
    version: u32,
    digest: [u8; 32],
    keyshare: &[u8],
) -> Result<Protocol<signing::Bob<R>>, ProtocolError> {
    let keys = BobDkgResult::from_bytes(keyshare, version)?;
    Ok(Protocol::new(signing::Bob::new(rng, keys, digest), version))
}

/// Creates a new protocol that can refresh Alice's key material.
///
/// # Errors
///
/// Will return `Err` if the blob does not decode at this version.
pub fn new_alice_refresh<R: RngCore + CryptoRng>(
    rng: R,
    version: u32,
    keyshare: &[u8],
) -> Result<Protocol<refresh::Alice<R>>, ProtocolError> {
    let keys = AliceDkgResult::from_bytes(keyshare, version)?;
    Ok(Protocol::new(refresh::Alice::new(rng, keys), version))
}

/// Creates a new protocol that can refresh Bob's key material.
///
/// # Errors
///
/// Will return `Err` if the blob does not decode at this version.
pub fn new_bob_refresh<R: RngCore + CryptoRng>(
    rng: R,
    version: u32,
    keyshare: &[u8],
) -> Result<Protocol<refresh::Bob<R>>, ProtocolError> {
    let keys = BobDkgResult::from_bytes(keyshare, version)?;
    Ok(Protocol::new(refresh::Bob::new(rng, keys), version))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocols::PROTOCOL_VERSION;
    use bitcoin_hashes::{sha256, Hash};
    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    use k256::ecdsa::{Signature as EcdsaSignature, VerifyingKey};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    /// Drives two iterators against each other until the exchange
    /// ends: the initiator opens with an empty input, after which
    /// every outbound message is fed to the other side.
    pub(crate) fn run_to_completion<A, B>(
        initiator: &mut Protocol<A>,
        responder: &mut Protocol<B>,
    ) -> Result<(), ProtocolError>
    where
        A: ProtocolParty,
        B: ProtocolParty,
    {
        let (mut outbound, _) = initiator.next(None)?;
        let mut initiator_turn = false;
        while let Some(message) = outbound {
            let (next_outbound, _) = if initiator_turn {
                initiator.next(Some(message))?
            } else {
                responder.next(Some(message))?
            };
            outbound = next_outbound;
            initiator_turn = !initiator_turn;
        }
        Ok(())
    }

    fn dkg_over_the_wire(
        alice_seed: u64,
        bob_seed: u64,
    ) -> (Vec<u8>, Vec<u8>) {
        let mut alice = new_alice_dkg(ChaCha20Rng::seed_from_u64(alice_seed), PROTOCOL_VERSION);
        let mut bob = new_bob_dkg(ChaCha20Rng::seed_from_u64(bob_seed), PROTOCOL_VERSION);

        run_to_completion(&mut bob, &mut alice).unwrap();

        (alice.result().unwrap(), bob.result().unwrap())
    }

    #[test]
    fn test_dkg_sign_refresh_over_the_wire() {
        let (alice_blob, bob_blob) = dkg_over_the_wire(11, 22);

        let alice_keys = AliceDkgResult::from_bytes(&alice_blob, PROTOCOL_VERSION).unwrap();
        let bob_keys = BobDkgResult::from_bytes(&bob_blob, PROTOCOL_VERSION).unwrap();
        assert_eq!(alice_keys.public_key, bob_keys.public_key);

        let digest = sha256::Hash::hash(b"hello").to_byte_array();

        // Sign with the fresh shares.
        let mut alice_sign = new_alice_sign(
            ChaCha20Rng::seed_from_u64(33),
            PROTOCOL_VERSION,
            digest,
            &alice_blob,
        )
        .unwrap();
        let mut bob_sign = new_bob_sign(
            ChaCha20Rng::seed_from_u64(44),
            PROTOCOL_VERSION,
            digest,
            &bob_blob,
        )
        .unwrap();
        run_to_completion(&mut alice_sign, &mut bob_sign).unwrap();

        // Only Bob carries a signature.
        assert!(matches!(
            alice_sign.result(),
            Err(ProtocolError::State(_))
        ));
        let signature_blob = bob_sign.result().unwrap();
        let signature =
            signing::Signature::from_bytes(&signature_blob, PROTOCOL_VERSION).unwrap();

        let verifying_key = VerifyingKey::from_affine(alice_keys.public_key).unwrap();
        let ecdsa_signature =
            EcdsaSignature::from_scalars(signature.r.to_bytes(), signature.s.to_bytes()).unwrap();
        verifying_key
            .verify_prehash(&digest, &ecdsa_signature)
            .unwrap();

        // Refresh and sign again: Q is preserved, the old verifying
        // key still accepts the new signature.
        let mut alice_refresh = new_alice_refresh(
            ChaCha20Rng::seed_from_u64(55),
            PROTOCOL_VERSION,
            &alice_blob,
        )
        .unwrap();
        let mut bob_refresh =
            new_bob_refresh(ChaCha20Rng::seed_from_u64(66), PROTOCOL_VERSION, &bob_blob).unwrap();
        run_to_completion(&mut alice_refresh, &mut bob_refresh).unwrap();

        let new_alice_blob = alice_refresh.result().unwrap();
        let new_bob_blob = bob_refresh.result().unwrap();

        let new_alice_keys =
            AliceDkgResult::from_bytes(&new_alice_blob, PROTOCOL_VERSION).unwrap();
        assert_eq!(new_alice_keys.public_key, alice_keys.public_key);
        assert_ne!(new_alice_keys.share, alice_keys.share);

        let mut alice_sign2 = new_alice_sign(
            ChaCha20Rng::seed_from_u64(77),
            PROTOCOL_VERSION,
            digest,
            &new_alice_blob,
        )
        .unwrap();
        let mut bob_sign2 = new_bob_sign(
            ChaCha20Rng::seed_from_u64(88),
            PROTOCOL_VERSION,
            digest,
            &new_bob_blob,
        )
        .unwrap();
        run_to_completion(&mut alice_sign2, &mut bob_sign2).unwrap();

        let signature2 =
            signing::Signature::from_bytes(&bob_sign2.result().unwrap(), PROTOCOL_VERSION)
                .unwrap();
        let ecdsa_signature2 =
            EcdsaSignature::from_scalars(signature2.r.to_bytes(), signature2.s.to_bytes())
                .unwrap();
        verifying_key
            .verify_prehash(&digest, &ecdsa_signature2)
            .unwrap();
    }

    #[test]
    fn test_dkg_deterministic_under_fixed_rng() {
        // Same seeds, same transcript, same key.
        let (alice_first, _) = dkg_over_the_wire(7, 13);
        let (alice_second, _) = dkg_over_the_wire(7, 13);
        assert_eq!(alice_first, alice_second);

        // Different seeds, different key.
        let (alice_third, _) = dkg_over_the_wire(7, 14);
        assert_ne!(alice_first, alice_third);
    }

    #[test]
    fn test_envelope_fields_and_roundtrip() {
        let mut bob = new_bob_dkg(rand::thread_rng(), PROTOCOL_VERSION);
        let (message, done) = bob.next(None).unwrap();
        let message = message.unwrap();

        assert!(!done);
        assert_eq!(message.protocol, ProtocolId::Dkg);
        assert_eq!(message.round, 1);
        assert_eq!(message.version, PROTOCOL_VERSION);

        let restored = ProtocolMessage::from_bytes(&message.to_bytes()).unwrap();
        assert_eq!(restored.protocol, message.protocol);
        assert_eq!(restored.round, message.round);
        assert_eq!(restored.version, message.version);
        assert_eq!(restored.payload, message.payload);
    }

    #[test]
    fn test_out_of_order_message_poisons() {
        let mut alice = new_alice_dkg(rand::thread_rng(), PROTOCOL_VERSION);
        let mut bob = new_bob_dkg(rand::thread_rng(), PROTOCOL_VERSION);

        let (msg1, _) = bob.next(None).unwrap();
        let msg1 = msg1.unwrap();
        let (msg2, _) = alice.next(Some(msg1.clone())).unwrap();
        let (msg3, _) = bob.next(msg2).unwrap();

        // Replaying round 1 where round 3 is due is a state error...
        assert!(matches!(
            alice.next(Some(msg1)),
            Err(ProtocolError::State(_))
        ));

        // ...and the correct message no longer helps: the iterator is
        // poisoned for good.
        assert!(matches!(
            alice.next(msg3),
            Err(ProtocolError::State(_))
        ));
        assert!(matches!(alice.result(), Err(ProtocolError::State(_))));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut alice = new_alice_dkg(rand::thread_rng(), PROTOCOL_VERSION);
        let mut bob = new_bob_dkg(rand::thread_rng(), 2);

        let (msg1, _) = bob.next(None).unwrap();
        assert!(matches!(
            alice.next(msg1),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_wrong_protocol_rejected() {
        let (alice_blob, _) = dkg_over_the_wire(1, 2);
        let digest = [7u8; 32];

        let mut alice_sign = new_alice_sign(
            rand::thread_rng(),
            PROTOCOL_VERSION,
            digest,
            &alice_blob,
        )
        .unwrap();
        let (mut msg1, _) = alice_sign.next(None).unwrap();

        // Relabel the signing message as a DKG one.
        let mut alice_dkg = new_alice_dkg(rand::thread_rng(), PROTOCOL_VERSION);
        msg1.as_mut().unwrap().round = 1;
        assert!(matches!(
            alice_dkg.next(msg1),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_result_before_completion() {
        let mut bob = new_bob_dkg(rand::thread_rng(), PROTOCOL_VERSION);
        assert!(matches!(bob.result(), Err(ProtocolError::NotComplete)));

        bob.next(None).unwrap();
        assert!(matches!(bob.result(), Err(ProtocolError::NotComplete)));
    }

    #[test]
    fn test_next_after_completion_rejected() {
        let mut alice = new_alice_dkg(rand::thread_rng(), PROTOCOL_VERSION);
        let mut bob = new_bob_dkg(rand::thread_rng(), PROTOCOL_VERSION);
        run_to_completion(&mut bob, &mut alice).unwrap();

        assert!(matches!(bob.next(None), Err(ProtocolError::State(_))));
        // Completion is not poisoning: the result stays available.
        assert!(bob.result().is_ok());
    }

    #[test]
    fn test_keyshare_blob_version_checked_at_setup() {
        let (alice_blob, _) = dkg_over_the_wire(3, 4);
        let digest = [1u8; 32];

        assert!(matches!(
            new_alice_sign(rand::thread_rng(), 2, digest, &alice_blob),
            Err(ProtocolError::Decode(_))
        ));
    }
}
