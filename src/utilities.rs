//! Cryptographic building blocks used by `protocols`.

pub mod commits;
pub mod hashes;
pub mod multiplication;
pub mod ot;
pub mod proofs;
