//! Crate root: public surface, core aliases, and system-wide invariants
//!
//! This crate is a batch proof-of-liabilities system: a custodian commits
//! publicly to the total it owes its account holders, and any single holder
//! can verify their own balance is inside that total without anyone else
//! learning it.
//!
//! ## Invariants
//!
//! - **Field & proof system.** All arithmetic is over the BN254 scalar
//!   field (`F` in this crate); proofs are Groth16 with compressed arkworks
//!   serialization. We **forbid unsafe** throughout the crate.
//!
//! - **One hash.** Every commitment is MiMC over `F`: account hashes,
//!   Merkle nodes, and the root-with-sum binding hash all share the round
//!   schedule in [`mimc`], and the circuit gadget mirrors the host hasher
//!   block for block.
//!
//! - **Fixed shape.** Trees have depth 10 and exactly 1024 leaf slots,
//!   zero-padded; balance vectors have exactly one entry per symbol in
//!   [`balance::ASSET_SYMBOLS`]. Anything else is a structured error, never
//!   silent repair.
//!
//! - **Stripping discipline.** Asset sums and node grids leave the
//!   custodian only at the top level (the published total); every non-top
//!   artifact is stripped before it reaches the public directory.
//!
//! The aggregation is three layers of the *same* relation: batches of
//! secret accounts become bottom proofs, each `(root, sum)` pair becomes an
//! account of the layer above, and one top proof carries the published
//! total. Middle and top proofs do not verify lower proofs in-circuit;
//! soundness comes from the verifier checking all three proofs plus the
//! merkle-path chain end to end.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// On-disk artifacts: JSON codec, base64/base-36 scalar codecs, layout.
pub mod artifacts;
/// Asset registry and balance algebra.
pub mod balance;
/// The Groth16 liability relation and its in-circuit MiMC gadget.
pub mod circuit;
/// Synthetic test-data generation.
pub mod generator;
/// Depth-10 MiMC Merkle commitment.
pub mod merkle;
/// Field encoding and MiMC hashing.
pub mod mimc;
/// Batch prover, partial-proof cache, three-level aggregation.
pub mod prover;
/// Verification primitives and the user/full orchestrators.
pub mod verifier;

/// Scalar field used across the crate.
pub type F = ark_bn254::Fr;

/// Canonical byte width of a field element; every hash and encoded amount
/// is exactly this long.
pub const MOD_BYTES: usize = 32;

/// A canonical big-endian field-element encoding: Merkle nodes, account
/// hashes, and binding hashes.
pub type Hash = [u8; MOD_BYTES];

pub use crate::balance::{Account, Balance, BalanceError, ASSET_SYMBOLS};
pub use crate::circuit::LiabilitiesCircuit;
pub use crate::merkle::{MerkleError, MAX_LEAVES, TREE_DEPTH};
pub use crate::prover::{CompletedProof, ProofBatch, ProverError};
pub use crate::verifier::{UserProofBundle, VerifyError};
