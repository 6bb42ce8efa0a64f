//! Two-party protocols: key generation, signing and key refresh,
//! together with the message-driven iterator that sequences them.
//!
//! A party object is single-threaded and stateful. The caller feeds it
//! one inbound message blob at a time through
//! [`iterator::Protocol::next`] and forwards the outbound blob to the
//! counterparty; network transport is entirely the caller's
//! responsibility. Any fatal error poisons the party: the only remedy
//! is to discard the session and start a new one.

use thiserror::Error;

use crate::protocols::serialization::{Decoder, Encoder};

pub mod dkg;
pub mod iterator;
pub mod refresh;
pub mod serialization;
pub mod signing;

/// Version of the message format spoken by this implementation.
///
/// Versions are negotiated out of band; a party configured at some
/// version rejects messages of any other version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Identifies which protocol a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolId {
    Dkg,
    Sign,
    Refresh,
}

impl ProtocolId {
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            ProtocolId::Dkg => 1,
            ProtocolId::Sign => 2,
            ProtocolId::Refresh => 3,
        }
    }

    #[must_use]
    pub fn from_tag(tag: u8) -> Option<ProtocolId> {
        match tag {
            1 => Some(ProtocolId::Dkg),
            2 => Some(ProtocolId::Sign),
            3 => Some(ProtocolId::Refresh),
            _ => None,
        }
    }
}

/// Errors crossing the protocol boundary.
///
/// Verification failures are fatal: retrying a failed step on the same
/// transcript is forbidden, since a retry oracle can leak secret
/// material. The party object refuses all further calls after any
/// fatal error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The object was not set up through one of its constructors.
    #[error("protocol object not initialized")]
    NotInitialized,
    /// `result` was called before the protocol completed.
    #[error("protocol not complete")]
    NotComplete,
    /// Bad construction parameters.
    #[error("setup error: {0}")]
    Setup(String),
    /// Malformed inbound message, wrong version or undecodable blob.
    #[error("decode error: {0}")]
    Decode(String),
    /// A cryptographic check failed; the counterparty deviated from
    /// the protocol.
    #[error("verification error: {0}")]
    Verification(String),
    /// Degenerate values where the protocol forbids them (point at
    /// infinity, zero scalar).
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    /// A call that does not fit the party's current state: step out of
    /// order, `next` after completion, poisoned object.
    #[error("state error: {0}")]
    State(String),
}

impl From<crate::utilities::ot::ErrorOT> for ProtocolError {
    fn from(error: crate::utilities::ot::ErrorOT) -> ProtocolError {
        ProtocolError::Verification(error.description)
    }
}

impl From<crate::utilities::multiplication::ErrorMul> for ProtocolError {
    fn from(error: crate::utilities::multiplication::ErrorMul) -> ProtocolError {
        ProtocolError::Verification(error.description)
    }
}

/// The envelope around every inter-round payload.
#[derive(Debug, Clone)]
pub struct ProtocolMessage {
    pub protocol: ProtocolId,
    pub round: u32,
    pub version: u32,
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_u8(self.protocol.tag());
        encoder.put_u32(self.round);
        encoder.put_u32(self.version);
        encoder.put_bytes(&self.payload);
        encoder.into_bytes()
    }

    /// # Errors
    ///
    /// Will return `Err` if the envelope is malformed or carries an
    /// unknown protocol tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<ProtocolMessage, ProtocolError> {
        let mut decoder = Decoder::new(bytes);
        let tag = decoder.take_u8()?;
        let protocol = ProtocolId::from_tag(tag)
            .ok_or_else(|| ProtocolError::Decode(format!("unknown protocol tag {tag}")))?;
        let round = decoder.take_u32()?;
        let version = decoder.take_u32()?;
        let payload = decoder.take_bytes()?;
        decoder.finish()?;

        Ok(ProtocolMessage {
            protocol,
            round,
            version,
            payload,
        })
    }
}
