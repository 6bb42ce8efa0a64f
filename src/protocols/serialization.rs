//! Deterministic encoding of inter-round payloads.
//!
//! Every payload is a fixed concatenation of fields: curve points in
//! compressed SEC1 form (33 bytes), scalars as 32-byte big-endian
//! integers, bit vectors byte-packed behind an explicit bit count, and
//! variable-length byte strings and sequences behind a `u32`
//! big-endian length prefix. Decoding is strict: trailing bytes,
//! non-canonical scalars and off-curve points are rejected, so
//! `decode(encode(x)) == x` and nothing else parses.

use k256::{AffinePoint, Scalar};

use crate::protocols::ProtocolError;
use crate::utilities::hashes::{point_from_bytes, point_to_bytes, scalar_from_bytes, HashOutput};
use crate::utilities::ot::base::OTSenderOpening;
use crate::utilities::ot::extension::{OTEDataToSender, PRGOutput, BATCH_SIZE, KAPPA};
use crate::utilities::proofs::DLogProof;

const POINT_LENGTH: usize = 33;

/// Builds a payload field by field.
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    #[must_use]
    pub fn new() -> Encoder {
        Encoder { buffer: Vec::new() }
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Length-prefixed byte string.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(u32::try_from(bytes.len()).expect("payload field exceeds u32 range"));
        self.buffer.extend_from_slice(bytes);
    }

    /// Fixed 32-byte field (hashes, seeds, field elements).
    pub fn put_bytes32(&mut self, bytes: &HashOutput) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn put_scalar(&mut self, scalar: &Scalar) {
        self.buffer.extend_from_slice(&scalar.to_bytes());
    }

    pub fn put_point(&mut self, point: &AffinePoint) {
        self.buffer.extend_from_slice(&point_to_bytes(point));
    }

    /// Bit vector: explicit bit count, then little-endian byte
    /// packing.
    pub fn put_bits(&mut self, bits: &[bool]) {
        self.put_u32(u32::try_from(bits.len()).expect("bit vector exceeds u32 range"));
        let mut packed = vec![0u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            packed[i / 8] |= u8::from(*bit) << (i % 8);
        }
        self.buffer.extend_from_slice(&packed);
    }

    pub fn put_scalar_vec(&mut self, scalars: &[Scalar]) {
        self.put_u32(u32::try_from(scalars.len()).expect("sequence exceeds u32 range"));
        for scalar in scalars {
            self.put_scalar(scalar);
        }
    }

    pub fn put_point_vec(&mut self, points: &[AffinePoint]) {
        self.put_u32(u32::try_from(points.len()).expect("sequence exceeds u32 range"));
        for point in points {
            self.put_point(point);
        }
    }

    pub fn put_bytes32_vec(&mut self, items: &[HashOutput]) {
        self.put_u32(u32::try_from(items.len()).expect("sequence exceeds u32 range"));
        for item in items {
            self.put_bytes32(item);
        }
    }

    pub fn put_prg_vec(&mut self, rows: &[PRGOutput]) {
        self.put_u32(u32::try_from(rows.len()).expect("sequence exceeds u32 range"));
        for row in rows {
            self.buffer.extend_from_slice(row);
        }
    }

    pub fn put_dlog_proof(&mut self, proof: &DLogProof) {
        self.put_point(&proof.point);
        self.put_point(&proof.point_rand_commitment);
        self.put_scalar(&proof.challenge_response);
    }

    pub fn put_ote_data(&mut self, data: &OTEDataToSender) {
        self.put_prg_vec(&data.u);
        self.put_bytes32(&data.chi_salt);
        self.put_bytes32(&data.verify_x);
        self.put_bytes32(&data.verify_t);
    }

    pub fn put_ot_opening(&mut self, opening: &OTSenderOpening) {
        self.put_bytes32_vec(&opening.hash_pads0);
        self.put_bytes32_vec(&opening.hash_pads1);
    }
}

/// Strict field-by-field reader for [`Encoder`] output.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Decoder<'a> {
        Decoder { bytes, offset: 0 }
    }

    fn take_raw(&mut self, length: usize) -> Result<&'a [u8], ProtocolError> {
        if self.bytes.len() - self.offset < length {
            return Err(ProtocolError::Decode(String::from(
                "message payload is truncated",
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + length];
        self.offset += length;
        Ok(slice)
    }

    /// Reads a sequence count and checks it against the space its
    /// items would occupy, so corrupt prefixes cannot trigger huge
    /// allocations.
    fn take_count(&mut self, item_length: usize) -> Result<usize, ProtocolError> {
        let count = self.take_u32()? as usize;
        let needed = count.checked_mul(item_length).ok_or_else(|| {
            ProtocolError::Decode(String::from("sequence length prefix exceeds payload"))
        })?;
        if self.bytes.len() - self.offset < needed {
            return Err(ProtocolError::Decode(String::from(
                "sequence length prefix exceeds payload",
            )));
        }
        Ok(count)
    }

    pub fn take_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_raw(1)?[0])
    }

    pub fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        let raw = self.take_raw(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn take_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let length = self.take_count(1)?;
        Ok(self.take_raw(length)?.to_vec())
    }

    pub fn take_bytes32(&mut self) -> Result<HashOutput, ProtocolError> {
        let raw = self.take_raw(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(raw);
        Ok(out)
    }

    pub fn take_scalar(&mut self) -> Result<Scalar, ProtocolError> {
        let raw = self.take_raw(32)?;
        scalar_from_bytes(raw)
            .ok_or_else(|| ProtocolError::Decode(String::from("non-canonical scalar encoding")))
    }

    pub fn take_point(&mut self) -> Result<AffinePoint, ProtocolError> {
        let raw = self.take_raw(POINT_LENGTH)?;
        point_from_bytes(raw)
            .ok_or_else(|| ProtocolError::Decode(String::from("invalid curve point encoding")))
    }

    pub fn take_bits(&mut self) -> Result<Vec<bool>, ProtocolError> {
        let count = self.take_u32()? as usize;
        let packed = self.take_raw(count.div_ceil(8))?;
        let mut bits = Vec::with_capacity(count);
        for i in 0..count {
            bits.push((packed[i / 8] >> (i % 8)) & 1 == 1);
        }
        Ok(bits)
    }

    pub fn take_scalar_vec(&mut self) -> Result<Vec<Scalar>, ProtocolError> {
        let count = self.take_count(32)?;
        let mut scalars = Vec::with_capacity(count);
        for _ in 0..count {
            scalars.push(self.take_scalar()?);
        }
        Ok(scalars)
    }

    pub fn take_point_vec(&mut self) -> Result<Vec<AffinePoint>, ProtocolError> {
        let count = self.take_count(POINT_LENGTH)?;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            points.push(self.take_point()?);
        }
        Ok(points)
    }

    pub fn take_bytes32_vec(&mut self) -> Result<Vec<HashOutput>, ProtocolError> {
        let count = self.take_count(32)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.take_bytes32()?);
        }
        Ok(items)
    }

    pub fn take_prg_vec(&mut self) -> Result<Vec<PRGOutput>, ProtocolError> {
        let count = self.take_count(BATCH_SIZE / 8)?;
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = self.take_raw(BATCH_SIZE / 8)?;
            let mut row = [0u8; BATCH_SIZE / 8];
            row.copy_from_slice(raw);
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn take_dlog_proof(&mut self) -> Result<DLogProof, ProtocolError> {
        Ok(DLogProof {
            point: self.take_point()?,
            point_rand_commitment: self.take_point()?,
            challenge_response: self.take_scalar()?,
        })
    }

    pub fn take_ote_data(&mut self) -> Result<OTEDataToSender, ProtocolError> {
        let u = self.take_prg_vec()?;
        if u.len() != KAPPA {
            return Err(ProtocolError::Decode(String::from(
                "correction matrix has wrong height",
            )));
        }
        Ok(OTEDataToSender {
            u,
            chi_salt: self.take_bytes32()?,
            verify_x: self.take_bytes32()?,
            verify_t: self.take_bytes32()?,
        })
    }

    pub fn take_ot_opening(&mut self) -> Result<OTSenderOpening, ProtocolError> {
        Ok(OTSenderOpening {
            hash_pads0: self.take_bytes32_vec()?,
            hash_pads1: self.take_bytes32_vec()?,
        })
    }

    /// Must be called after the last field: trailing bytes are a
    /// decode error.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.offset != self.bytes.len() {
            return Err(ProtocolError::Decode(String::from(
                "trailing bytes after message payload",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::elliptic_curve::Field;
    use k256::ProjectivePoint;
    use rand::Rng;

    #[test]
    fn test_primitive_roundtrip() {
        let mut rng = rand::thread_rng();
        let scalar = Scalar::random(&mut rng);
        let point = (ProjectivePoint::GENERATOR * Scalar::random(&mut rng)).to_affine();
        let hash = rng.gen::<[u8; 32]>();
        let bits: Vec<bool> = (0..777).map(|_| rng.gen()).collect();
        let blob: Vec<u8> = (0..100).map(|_| rng.gen()).collect();

        let mut encoder = Encoder::new();
        encoder.put_u8(7);
        encoder.put_u32(0xdead_beef);
        encoder.put_scalar(&scalar);
        encoder.put_point(&point);
        encoder.put_bytes32(&hash);
        encoder.put_bits(&bits);
        encoder.put_bytes(&blob);
        let bytes = encoder.into_bytes();

        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.take_u8().unwrap(), 7);
        assert_eq!(decoder.take_u32().unwrap(), 0xdead_beef);
        assert_eq!(decoder.take_scalar().unwrap(), scalar);
        assert_eq!(decoder.take_point().unwrap(), point);
        assert_eq!(decoder.take_bytes32().unwrap(), hash);
        assert_eq!(decoder.take_bits().unwrap(), bits);
        assert_eq!(decoder.take_bytes().unwrap(), blob);
        decoder.finish().unwrap();
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoder = Encoder::new();
        encoder.put_u32(1);
        let mut bytes = encoder.into_bytes();
        bytes.push(0);

        let mut decoder = Decoder::new(&bytes);
        decoder.take_u32().unwrap();
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn test_truncation_rejected() {
        let mut encoder = Encoder::new();
        encoder.put_bytes(&[1, 2, 3]);
        let bytes = encoder.into_bytes();

        let mut decoder = Decoder::new(&bytes[0..bytes.len() - 1]);
        assert!(decoder.take_bytes().is_err());
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut encoder = Encoder::new();
        encoder.put_u32(u32::MAX);
        let bytes = encoder.into_bytes();

        let mut decoder = Decoder::new(&bytes);
        assert!(decoder.take_scalar_vec().is_err());
    }

    #[test]
    fn test_vector_roundtrip() {
        let mut rng = rand::thread_rng();
        let scalars: Vec<Scalar> = (0..9).map(|_| Scalar::random(&mut rng)).collect();
        let points: Vec<AffinePoint> = (0..5)
            .map(|_| (ProjectivePoint::GENERATOR * Scalar::random(&mut rng)).to_affine())
            .collect();
        let hashes: Vec<[u8; 32]> = (0..4).map(|_| rng.gen()).collect();

        let mut encoder = Encoder::new();
        encoder.put_scalar_vec(&scalars);
        encoder.put_point_vec(&points);
        encoder.put_bytes32_vec(&hashes);
        let bytes = encoder.into_bytes();

        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.take_scalar_vec().unwrap(), scalars);
        assert_eq!(decoder.take_point_vec().unwrap(), points);
        assert_eq!(decoder.take_bytes32_vec().unwrap(), hashes);
        decoder.finish().unwrap();
    }
}
