//! Oblivious transfer extension.
//!
//! Amplifies the `KAPPA` base OTs from [`base`](super::base) into
//! `BATCH_SIZE` correlated OTs, following the KOS protocol
//! (<https://eprint.iacr.org/2015/546.pdf>) with the consistency check
//! done as a random linear combination over GF(2^256). The random
//! values for the check come from a Fiat-Shamir hash of the receiver's
//! correction matrix together with a fresh salt chosen by the receiver,
//! so no extra round is spent on them.
//!
//! The roles are reversed with respect to the base OT: the extension
//! sender seeds itself with a base *receiver* output (its choice bits
//! become the correlation `Delta`), and the extension receiver with a
//! base *sender* output.
//!
//! After the extension, each row is hashed into a scalar, giving the
//! sender a pair of pads per row and the receiver the pad selected by
//! his choice bit. The multiplication protocol consumes these pads.

use k256::Scalar;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::utilities::hashes::{hash, hash_as_scalar, HashOutput};
use crate::utilities::ot::base::{OTReceiverOutput, OTSenderOutput};
use crate::utilities::ot::ErrorOT;
use crate::{RAW_SECURITY, STAT_SECURITY};

// You should not change these numbers!
// If you do, some parts of the code must be changed.

/// Number of base OTs feeding the extension.
pub const KAPPA: usize = RAW_SECURITY;
/// Number of extended OTs per invocation: `KAPPA` payload slots plus
/// `2 * STAT_SECURITY` masking slots. Must be divisible by 8.
pub const BATCH_SIZE: usize = RAW_SECURITY + 2 * STAT_SECURITY;

/// A row of the (bit-packed) `KAPPA` x `BATCH_SIZE` matrix.
pub type PRGOutput = [u8; BATCH_SIZE / 8];
/// A row of the transposed matrix, also read as an element of
/// GF(2^256).
pub type FieldElement = [u8; KAPPA / 8];

/// Extension sender state, cached between protocol executions.
///
/// Comes from a base OT run in the receiver role: `correlation` is the
/// choice-bit vector `Delta`, `seeds` the pads received.
#[derive(Clone, Serialize, Deserialize)]
pub struct OTESender {
    pub correlation: Vec<bool>,
    pub seeds: Vec<HashOutput>,
}

/// Extension receiver state, cached between protocol executions.
///
/// Comes from a base OT run in the sender role: both pads of every
/// instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct OTEReceiver {
    pub seeds0: Vec<HashOutput>,
    pub seeds1: Vec<HashOutput>,
}

/// Everything the receiver transmits for one extension: the correction
/// matrix `u` and the consistency-check payload.
#[derive(Clone)]
pub struct OTEDataToSender {
    pub u: Vec<PRGOutput>,
    pub chi_salt: HashOutput,
    pub verify_x: FieldElement,
    pub verify_t: FieldElement,
}

impl OTESender {
    /// Wraps a finished base OT (receiver side) as extension sender
    /// state.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the base OT did not run `KAPPA` instances.
    pub fn from_base(base: &OTReceiverOutput) -> Result<OTESender, ErrorOT> {
        if base.choice_bits.len() != KAPPA || base.pads.len() != KAPPA {
            return Err(ErrorOT::new("OTE: base OT batch is not KAPPA wide!"));
        }
        Ok(OTESender {
            correlation: base.choice_bits.clone(),
            seeds: base.pads.clone(),
        })
    }

    /// Runs the sender's (single) phase of the extension.
    ///
    /// Input: the data transmitted by the receiver.
    /// Output: the pair of pads for every extended instance. The
    /// receiver knows exactly one pad per row, according to his choice
    /// bit, and the sender cannot tell which.
    ///
    /// # Errors
    ///
    /// Will return `Err` on malformed input or if the consistency
    /// check fails, in which case the receiver cheated and the whole
    /// session must be discarded.
    pub fn run(
        &self,
        session_id: &[u8],
        data: &OTEDataToSender,
    ) -> Result<(Vec<Scalar>, Vec<Scalar>), ErrorOT> {
        if data.u.len() != KAPPA {
            return Err(ErrorOT::new("OTE: correction matrix is not KAPPA wide!"));
        }
        if self.correlation.len() != KAPPA || self.seeds.len() != KAPPA {
            return Err(ErrorOT::new("OTE: sender state is not KAPPA wide!"));
        }

        // EXTEND

        // Each base seed is expanded to a row; the correction matrix
        // then aligns the rows with the receiver's: column-wise,
        // q[i][j] = t0[i][j] xor (w_j and Delta_i).
        let mut q: Vec<PRGOutput> = Vec::with_capacity(KAPPA);
        for i in 0..KAPPA {
            let row = expand_seed(&self.seeds[i], i, session_id);
            let mut q_i = [0u8; BATCH_SIZE / 8];
            for j in 0..BATCH_SIZE / 8 {
                q_i[j] = (u8::from(self.correlation[i]) * data.u[i][j]) ^ row[j];
            }
            q.push(q_i);
        }

        let transposed_q = transpose(&q);

        // CONSISTENCY CHECK

        // The random linear combination over the rows of the transposed
        // matrix must agree with the values claimed by the receiver:
        // sum_j chi_j * q_j == t + x * Delta in GF(2^256).
        let chi = chi_values(&data.u, &data.chi_salt, session_id);

        let mut lhs = [0u8; KAPPA / 8];
        for j in 0..BATCH_SIZE {
            xor_into(&mut lhs, &field_mul(&chi[j], &transposed_q[j]));
        }

        let packed_correlation = pack_bits(&self.correlation);
        let mut rhs = data.verify_t;
        xor_into(&mut rhs, &field_mul(&data.verify_x, &packed_correlation));

        if lhs != rhs {
            return Err(ErrorOT::new(
                "Receiver cheated in OTE: consistency check failed!",
            ));
        }

        // RANDOMIZE

        // Each row yields the pad pair. The pad for choice bit 1 hides
        // the correlation behind the hash.
        let mut v0: Vec<Scalar> = Vec::with_capacity(BATCH_SIZE);
        let mut v1: Vec<Scalar> = Vec::with_capacity(BATCH_SIZE);
        for j in 0..BATCH_SIZE {
            let salt = [&j.to_be_bytes(), session_id].concat();

            let mut shifted = transposed_q[j];
            xor_into(&mut shifted, &packed_correlation);

            v0.push(hash_as_scalar(&transposed_q[j], &salt));
            v1.push(hash_as_scalar(&shifted, &salt));
        }

        Ok((v0, v1))
    }
}

impl Drop for OTESender {
    fn drop(&mut self) {
        self.seeds.zeroize();
        for bit in &mut self.correlation {
            *bit = false;
        }
    }
}

impl OTEReceiver {
    /// Wraps a finished base OT (sender side) as extension receiver
    /// state.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the base OT did not run `KAPPA` instances.
    pub fn from_base(base: &OTSenderOutput) -> Result<OTEReceiver, ErrorOT> {
        if base.pads0.len() != KAPPA || base.pads1.len() != KAPPA {
            return Err(ErrorOT::new("OTE: base OT batch is not KAPPA wide!"));
        }
        Ok(OTEReceiver {
            seeds0: base.pads0.clone(),
            seeds1: base.pads1.clone(),
        })
    }

    /// Runs the first phase of the extension with the given choice
    /// bits (one per extended instance).
    ///
    /// Output: the expanded `t0` matrix, which must be kept for
    /// [`run_phase2`](Self::run_phase2), and the data to transmit to
    /// the sender.
    ///
    /// # Panics
    ///
    /// Will panic if `choice_bits` is not `BATCH_SIZE` long; callers
    /// always pass the fixed-size decomposition from the multiplier.
    #[must_use]
    pub fn run_phase1<R: RngCore + CryptoRng>(
        &self,
        session_id: &[u8],
        choice_bits: &[bool],
        rng: &mut R,
    ) -> (Vec<PRGOutput>, OTEDataToSender) {
        assert!(
            choice_bits.len() == BATCH_SIZE,
            "OTE: choice vector must be BATCH_SIZE long!"
        );
        assert!(
            self.seeds0.len() == KAPPA && self.seeds1.len() == KAPPA,
            "OTE: receiver state must be KAPPA wide!"
        );

        let packed_choice_bits = pack_bits(choice_bits);

        // EXTEND

        let mut t0: Vec<PRGOutput> = Vec::with_capacity(KAPPA);
        let mut u: Vec<PRGOutput> = Vec::with_capacity(KAPPA);
        for i in 0..KAPPA {
            let row0 = expand_seed(&self.seeds0[i], i, session_id);
            let row1 = expand_seed(&self.seeds1[i], i, session_id);

            // The correction row: t0 xor t1 xor w.
            let mut u_i = [0u8; BATCH_SIZE / 8];
            for j in 0..BATCH_SIZE / 8 {
                u_i[j] = row0[j] ^ row1[j] ^ packed_choice_bits[j];
            }

            t0.push(row0);
            u.push(u_i);
        }

        // CONSISTENCY CHECK

        // x = sum over the chosen rows of chi_j, and
        // t = sum_j chi_j * t0_j, both in GF(2^256).
        let mut chi_salt = [0u8; 32];
        rng.fill_bytes(&mut chi_salt);
        let chi = chi_values(&u, &chi_salt, session_id);

        let transposed_t0 = transpose(&t0);

        let mut verify_x = [0u8; KAPPA / 8];
        let mut verify_t = [0u8; KAPPA / 8];
        for j in 0..BATCH_SIZE {
            if choice_bits[j] {
                xor_into(&mut verify_x, &chi[j]);
            }
            xor_into(&mut verify_t, &field_mul(&chi[j], &transposed_t0[j]));
        }

        let data_to_sender = OTEDataToSender {
            u,
            chi_salt,
            verify_x,
            verify_t,
        };

        (t0, data_to_sender)
    }

    /// Runs the second phase of the extension: hashes the kept matrix
    /// into the receiver's pads. The pad at row `j` equals the
    /// sender's pad for the receiver's choice bit at `j`.
    #[must_use]
    pub fn run_phase2(&self, session_id: &[u8], extended_seeds: &[PRGOutput]) -> Vec<Scalar> {
        let transposed_t0 = transpose(extended_seeds);

        let mut v: Vec<Scalar> = Vec::with_capacity(BATCH_SIZE);
        for j in 0..BATCH_SIZE {
            let salt = [&j.to_be_bytes(), session_id].concat();
            v.push(hash_as_scalar(&transposed_t0[j], &salt));
        }

        v
    }
}

impl Drop for OTEReceiver {
    fn drop(&mut self) {
        self.seeds0.zeroize();
        self.seeds1.zeroize();
    }
}

// EXTRA FUNCTIONS

/// Expands a base-OT seed into a `BATCH_SIZE`-bit row by hashing it in
/// counter mode. The base index and the session id go into the salt,
/// so every extension execution draws from a fresh random oracle.
fn expand_seed(seed: &HashOutput, index: usize, session_id: &[u8]) -> PRGOutput {
    let mut prg: Vec<u8> = Vec::with_capacity(BATCH_SIZE / 8);

    let mut count = 0usize;
    while prg.len() < BATCH_SIZE / 8 {
        let salt = [&index.to_be_bytes(), &count.to_be_bytes(), session_id].concat();
        count += 1;

        prg.extend_from_slice(&hash(seed, &salt));
    }

    let mut row = [0u8; BATCH_SIZE / 8];
    row.copy_from_slice(&prg[0..BATCH_SIZE / 8]);
    row
}

/// Derives the `BATCH_SIZE` check values in GF(2^256) from the
/// correction matrix and the receiver's salt.
fn chi_values(u: &[PRGOutput], chi_salt: &[u8], session_id: &[u8]) -> Vec<FieldElement> {
    // The matrix is compressed to a digest first so that each of the
    // BATCH_SIZE derivations hashes a short message.
    let u_digest = hash(&u.concat(), session_id);
    let msg = [&u_digest[..], chi_salt].concat();

    let mut chi: Vec<FieldElement> = Vec::with_capacity(BATCH_SIZE);
    for j in 0..BATCH_SIZE {
        let salt = [&j.to_be_bytes(), session_id].concat();
        chi.push(hash(&msg, &salt));
    }
    chi
}

/// Packs a bit vector into bytes. Bits are taken in little-endian
/// order within each byte: the row [1110000010100000] corresponds to
/// the bytes [7, 5].
fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; bits.len() / 8];
    for (j, bit) in bits.iter().enumerate() {
        packed[j / 8] |= u8::from(*bit) << (j % 8);
    }
    packed
}

/// In-place XOR of two GF(2^256) elements.
fn xor_into(acc: &mut FieldElement, other: &[u8]) {
    for k in 0..KAPPA / 8 {
        acc[k] ^= other[k];
    }
}

/// Transposes the bit-packed `KAPPA` x `BATCH_SIZE` matrix into a
/// `BATCH_SIZE` x `KAPPA` one. Rows are packed as in [`pack_bits`].
#[must_use]
pub fn transpose(input: &[PRGOutput]) -> Vec<FieldElement> {
    let mut output: Vec<FieldElement> = vec![[0u8; KAPPA / 8]; BATCH_SIZE];

    for row_byte in 0..KAPPA / 8 {
        for row_bit_within_byte in 0..8 {
            for column_byte in 0..BATCH_SIZE / 8 {
                for column_bit_within_byte in 0..8 {
                    let row_bit = (row_byte << 3) + row_bit_within_byte;
                    let column_bit = (column_byte << 3) + column_bit_within_byte;

                    let entry = (input[row_bit][column_byte] >> column_bit_within_byte) & 0x01;

                    // Entry (row_bit, column_bit) of the input becomes
                    // entry (column_bit, row_bit) of the output.
                    output[column_bit][row_byte] |= entry << row_bit_within_byte;
                }
            }
        }
    }

    output
}

/// Multiplication in the finite field of order 2^256.
///
/// Right-to-left comb method for polynomial multiplication (Algorithm
/// 2.34 in Hankerson, Menezes and Vanstone, Guide to Elliptic Curve
/// Cryptography), followed by reduction modulo the irreducible
/// polynomial `f(X) = X^256 + X^10 + X^5 + X^2 + 1`.
///
/// # Panics
///
/// Will panic if an operand is not 32 bytes long.
#[must_use]
pub fn field_mul(left: &[u8], right: &[u8]) -> FieldElement {
    // Constants W and t from Section 2.3 in the book.
    const W: usize = 64;
    const T: usize = 4;

    assert!(
        left.len() == KAPPA / 8 && right.len() == KAPPA / 8,
        "Binary field multiplication: operands don't have the correct length!"
    );

    let mut a = [0u64; T];
    let mut b = [0u64; T + 1]; // b has extra space because it will be shifted.
    let mut c = [0u64; 2 * T];

    // Conversion of [u8; 32] to [u64; 4], little-endian.
    for i in 0..KAPPA / 8 {
        a[i >> 3] |= u64::from(left[i]) << ((i & 0x07) << 3);
        b[i >> 3] |= u64::from(right[i]) << ((i & 0x07) << 3);
    }

    for k in 0..W {
        for j in 0..T {
            // If the k-th bit of a[j] is 1, we add b to c (with the
            // correct shift).
            if (a[j] >> k) & 1 == 1 {
                for i in 0..=T {
                    c[j + i] ^= b[i];
                }
            }
        }

        // Shift b one digit to the left (not needed after the last
        // iteration).
        if k != W - 1 {
            for i in (1..=T).rev() {
                b[i] = b[i] << 1 | b[i - 1] >> 63;
            }
            b[0] <<= 1;
        }
    }

    // c is now the plain product of the two polynomials. Reduce it
    // modulo f(X). Since 256 = 4 * 64, block i (for i >= 4) folds
    // entirely onto blocks i - 4 and i - 3 with the shifts given by
    // the monomials X^10, X^5, X^2 and 1.
    for i in (T..2 * T).rev() {
        let t = c[i];

        c[i - 4] ^= (t << 10) ^ (t << 5) ^ (t << 2) ^ t;
        c[i - 3] ^= (t >> 54) ^ (t >> 59) ^ (t >> 62);

        c[i] = 0;
    }

    // Conversion back to bytes.
    let mut result = [0u8; KAPPA / 8];
    for i in 0..KAPPA / 8 {
        result[i] = (c[i >> 3] >> ((i & 0x07) << 3)) as u8;
    }

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::Rng;

    /// Builds a matching pair of extension states directly from random
    /// seed material, skipping the base OT.
    pub(crate) fn mock_extension_pair<R: RngCore + CryptoRng + Rng>(
        rng: &mut R,
    ) -> (OTESender, OTEReceiver) {
        let mut correlation: Vec<bool> = Vec::with_capacity(KAPPA);
        let mut seeds: Vec<HashOutput> = Vec::with_capacity(KAPPA);
        let mut seeds0: Vec<HashOutput> = Vec::with_capacity(KAPPA);
        let mut seeds1: Vec<HashOutput> = Vec::with_capacity(KAPPA);

        for _ in 0..KAPPA {
            let delta: bool = rng.gen();
            let pad0 = rng.gen::<[u8; 32]>();
            let pad1 = rng.gen::<[u8; 32]>();

            correlation.push(delta);
            seeds.push(if delta { pad1 } else { pad0 });
            seeds0.push(pad0);
            seeds1.push(pad1);
        }

        (
            OTESender { correlation, seeds },
            OTEReceiver { seeds0, seeds1 },
        )
    }

    fn random_choice_bits<R: Rng>(rng: &mut R) -> Vec<bool> {
        (0..BATCH_SIZE).map(|_| rng.gen()).collect()
    }

    #[test]
    fn test_field_mul_identity() {
        let mut rng = rand::thread_rng();
        let x = rng.gen::<FieldElement>();

        let mut one = [0u8; KAPPA / 8];
        one[0] = 1;

        assert_eq!(field_mul(&x, &one), x);
        assert_eq!(field_mul(&one, &x), x);
    }

    #[test]
    fn test_field_mul_commutes() {
        let mut rng = rand::thread_rng();
        let x = rng.gen::<FieldElement>();
        let y = rng.gen::<FieldElement>();

        assert_eq!(field_mul(&x, &y), field_mul(&y, &x));
    }

    #[test]
    fn test_field_mul_frobenius() {
        let mut rng = rand::thread_rng();
        let initial = rng.gen::<FieldElement>();

        // Raising an element to the power 2^256 must not change it.
        let mut result = initial;
        for _ in 0..KAPPA {
            result = field_mul(&result, &result);
        }

        assert_eq!(initial, result);
    }

    #[test]
    fn test_transpose() {
        let mut rng = rand::thread_rng();
        let mut input: Vec<PRGOutput> = Vec::with_capacity(KAPPA);
        for _ in 0..KAPPA {
            let mut row = [0u8; BATCH_SIZE / 8];
            rng.fill_bytes(&mut row);
            input.push(row);
        }

        let output = transpose(&input);

        for _ in 0..1000 {
            let i = rng.gen_range(0..KAPPA);
            let j = rng.gen_range(0..BATCH_SIZE);
            let in_bit = (input[i][j / 8] >> (j % 8)) & 1;
            let out_bit = (output[j][i / 8] >> (i % 8)) & 1;
            assert_eq!(in_bit, out_bit);
        }
    }

    #[test]
    fn test_extension_correlation() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();

        let (ote_sender, ote_receiver) = mock_extension_pair(&mut rng);
        let choice_bits = random_choice_bits(&mut rng);

        let (extended_seeds, data_to_sender) =
            ote_receiver.run_phase1(&session_id, &choice_bits, &mut rng);

        let (v0, v1) = ote_sender
            .run(&session_id, &data_to_sender)
            .map_err(|e| e.description)
            .unwrap();

        let v = ote_receiver.run_phase2(&session_id, &extended_seeds);

        // The receiver's pad must be the sender's pad for his choice
        // bit, and must differ from the other one.
        for j in 0..BATCH_SIZE {
            if choice_bits[j] {
                assert_eq!(v[j], v1[j]);
                assert_ne!(v[j], v0[j]);
            } else {
                assert_eq!(v[j], v0[j]);
                assert_ne!(v[j], v1[j]);
            }
        }
    }

    #[test]
    fn test_extension_flipped_u_bit() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();

        let (ote_sender, ote_receiver) = mock_extension_pair(&mut rng);
        let choice_bits = random_choice_bits(&mut rng);

        let (_, mut data_to_sender) =
            ote_receiver.run_phase1(&session_id, &choice_bits, &mut rng);
        data_to_sender.u[100][5] ^= 0x20;

        assert!(ote_sender.run(&session_id, &data_to_sender).is_err());
    }

    #[test]
    fn test_extension_flipped_chi_salt() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();

        let (ote_sender, ote_receiver) = mock_extension_pair(&mut rng);
        let choice_bits = random_choice_bits(&mut rng);

        let (_, mut data_to_sender) =
            ote_receiver.run_phase1(&session_id, &choice_bits, &mut rng);
        data_to_sender.chi_salt[0] ^= 0x01;

        assert!(ote_sender.run(&session_id, &data_to_sender).is_err());
    }

    #[test]
    fn test_extension_flipped_check_values() {
        let mut rng = rand::thread_rng();
        let session_id = rng.gen::<[u8; 32]>();

        let (ote_sender, ote_receiver) = mock_extension_pair(&mut rng);
        let choice_bits = random_choice_bits(&mut rng);

        let (_, data_to_sender) = ote_receiver.run_phase1(&session_id, &choice_bits, &mut rng);

        let mut flipped_x = data_to_sender.clone();
        flipped_x.verify_x[31] ^= 0x80;
        assert!(ote_sender.run(&session_id, &flipped_x).is_err());

        let mut flipped_t = data_to_sender.clone();
        flipped_t.verify_t[0] ^= 0x01;
        assert!(ote_sender.run(&session_id, &flipped_t).is_err());
    }
}
