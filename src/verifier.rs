//! Verification primitives and orchestrators
//!
//! Four primitives carry the cryptographic weight: Groth16 verification of
//! a single proof ([`verify_zk`]), sibling-path verification
//! (`merkle::verify_path`), full-grid rebuild verification
//! (`merkle::verify_build`), and the top-level binding of the published sum
//! ([`verify_top_asset_sum`]).
//!
//! Two orchestrators compose them. [`verify_user`] is what an account
//! holder runs against their bundle: it checks all three proofs in the
//! chain and walks the merkle-path links from their own account hash up to
//! the published total. [`verify_full`] is the custodian-side integrity
//! check over an entire proving run, including positional re-hashing of
//! every secret account against the committed leaf rows.
//!
//! The first failure anywhere is fatal; there is no partial-success
//! verification, and no verifier branch ever mutates a proof.

use std::path::Path;

use ark_bn254::Bn254;
use ark_groth16::{Groth16, Proof, VerifyingKey};
use ark_snark::SNARK;
use tracing::{debug, info, info_span};

use crate::artifacts::{self, FileError, Layout};
use crate::balance::{Account, BalanceError};
use crate::merkle::{self, MerkleError, MAX_LEAVES, TREE_DEPTH};
use crate::mimc::{field_from_bytes, hash_account};
use crate::prover::CompletedProof;
use crate::Hash;

/// Failures surfaced by verification. `ProofInvalid` covers every way a
/// zero-knowledge proof artifact can be bad (decode, deserialize, pairing
/// rejection); the rest are structural failures of the commitment chain.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The zero-knowledge proof failed to decode or verify.
    #[error("zero-knowledge proof rejected: {0}")]
    ProofInvalid(String),
    /// The published sum does not bind to the committed root.
    #[error("published asset sum does not match the committed root-with-sum hash")]
    AssetSumMismatch,
    /// A required input element is absent.
    #[error("required artifact is absent: {0}")]
    MissingArtifact(&'static str),
    /// A merkle reconstruction or shape check failed.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// A balance-level invariant was violated while re-hashing.
    #[error(transparent)]
    Balance(#[from] BalanceError),
    /// An artifact could not be read from disk.
    #[error(transparent)]
    File(#[from] FileError),
}

fn invalid(err: impl std::fmt::Display) -> VerifyError {
    VerifyError::ProofInvalid(err.to_string())
}

/// Everything an account holder needs to verify their own inclusion: their
/// account, their leaf path into the bottom tree, and the three-proof
/// chain (bottom and middle stripped but carrying their upward paths; top
/// carrying the published asset sum).
#[derive(Clone, Debug)]
pub struct UserProofBundle {
    /// The holder's own account.
    pub account: Account,
    /// Sibling path of the account hash into the bottom tree.
    pub user_merkle_path: Vec<Hash>,
    /// Leaf position of the account hash in the bottom tree.
    pub user_merkle_position: usize,
    /// Bottom proof, stripped, carrying its upward path.
    pub bottom: CompletedProof,
    /// Middle proof, stripped, carrying its upward path.
    pub middle: CompletedProof,
    /// Top proof, carrying the published asset sum.
    pub top: CompletedProof,
}

/// Verify one Groth16 proof against its own committed public inputs.
///
/// The public witness is rebuilt from `(merkle_root, root_sum_hash)` alone,
/// so a passing check certifies the batch relation about those two values
/// without revealing the batch.
pub fn verify_zk(proof: &CompletedProof) -> Result<(), VerifyError> {
    let zk_proof: Proof<Bn254> = artifacts::from_base64(&proof.proof).map_err(invalid)?;
    let vk: VerifyingKey<Bn254> =
        artifacts::from_base64(&proof.verifying_key).map_err(invalid)?;
    let public_inputs = [
        field_from_bytes(&proof.merkle_root),
        field_from_bytes(&proof.root_sum_hash),
    ];
    match Groth16::<Bn254>::verify(&vk, &public_inputs, &zk_proof) {
        Ok(true) => Ok(()),
        Ok(false) => Err(VerifyError::ProofInvalid(
            "pairing check rejected the proof".into(),
        )),
        Err(err) => Err(invalid(err)),
    }
}

/// Check that the published top-level sum is exactly the sum bound into the
/// top commitment. This is the only place the public aggregate touches the
/// cryptography.
pub fn verify_top_asset_sum(top: &CompletedProof) -> Result<(), VerifyError> {
    let asset_sum = top
        .asset_sum
        .as_ref()
        .ok_or(VerifyError::MissingArtifact("top-level asset sum"))?;
    let expected = hash_account(&Account::new(top.merkle_root.to_vec(), asset_sum.clone()))?;
    if expected != top.root_sum_hash {
        return Err(VerifyError::AssetSumMismatch);
    }
    Ok(())
}

fn upward_link(
    lower: &CompletedProof,
    upper_root: &Hash,
    what: &'static str,
) -> Result<(), VerifyError> {
    let path = lower
        .merkle_path
        .as_ref()
        .ok_or(VerifyError::MissingArtifact(what))?;
    let position = lower
        .merkle_position
        .ok_or(VerifyError::MissingArtifact(what))?;
    merkle::verify_path(&lower.root_sum_hash, position, path, upper_root)?;
    Ok(())
}

/// The per-holder verification. Establishes, in order: the account is in
/// the bottom commitment, the bottom commitment-plus-sum is in the middle
/// commitment, the middle is in the top, every layer's relation holds, and
/// the published total is the sum committed at the top.
pub fn verify_user(bundle: &UserProofBundle) -> Result<(), VerifyError> {
    let span = info_span!("verify_user");
    let _enter = span.enter();

    let account_hash = hash_account(&bundle.account)?;
    verify_zk(&bundle.bottom)?;
    verify_zk(&bundle.middle)?;
    verify_zk(&bundle.top)?;
    debug!("proof chain verified");

    merkle::verify_path(
        &account_hash,
        bundle.user_merkle_position,
        &bundle.user_merkle_path,
        &bundle.bottom.merkle_root,
    )?;
    upward_link(&bundle.bottom, &bundle.middle.merkle_root, "bottom merkle path")?;
    upward_link(&bundle.middle, &bundle.top.merkle_root, "middle merkle path")?;
    verify_top_asset_sum(&bundle.top)?;
    info!("user inclusion verified");
    Ok(())
}

/// Custodian-side integrity check over a whole proving run.
///
/// Requires the unstripped artifacts: every bottom grid is rebuilt and
/// checked against its root, every secret account is re-hashed and compared
/// positionally against the committed leaf row, and both layers of upward
/// paths plus all proofs and the top sum binding are verified.
pub fn verify_full(
    bottoms: &[CompletedProof],
    middles: &[CompletedProof],
    top: &CompletedProof,
    account_batches: &[Vec<Account>],
) -> Result<(), VerifyError> {
    let span = info_span!("verify_full", bottoms = bottoms.len());
    let _enter = span.enter();

    if account_batches.len() != bottoms.len() {
        return Err(VerifyError::MissingArtifact(
            "one secret account batch per bottom proof",
        ));
    }
    let expected_middles = (bottoms.len() + MAX_LEAVES - 1) / MAX_LEAVES;
    if middles.len() != expected_middles {
        return Err(VerifyError::MissingArtifact(
            "one middle proof per 1024 bottom proofs",
        ));
    }

    for (i, bottom) in bottoms.iter().enumerate() {
        let grid = bottom
            .merkle_nodes
            .as_ref()
            .ok_or(VerifyError::MissingArtifact("bottom-proof node grid"))?;
        merkle::verify_build(grid, &bottom.merkle_root)?;
        verify_zk(bottom)?;
        upward_link(bottom, &middles[i / MAX_LEAVES].merkle_root, "bottom merkle path")?;

        // The committed leaf row must be the batch, in batch order.
        for (j, account) in account_batches[i].iter().enumerate() {
            if hash_account(account)? != grid[TREE_DEPTH][j] {
                tracing::error!(batch = i, position = j, "account is not the committed leaf");
                return Err(VerifyError::Merkle(MerkleError::RootMismatch));
            }
        }
        debug!(batch = i, "bottom layer verified");
    }

    for middle in middles {
        verify_zk(middle)?;
        upward_link(middle, &top.merkle_root, "middle merkle path")?;
    }
    verify_zk(top)?;
    verify_top_asset_sum(top)?;
    info!("full verification passed");
    Ok(())
}

/// Read a proving run back from disk and run [`verify_full`] over it.
/// Mirrors the artifact layout the prover writes: full proofs from the
/// secret directory, account batches from the secret data files.
pub fn verify_full_run(batch_count: usize, out_dir: &Path) -> Result<(), VerifyError> {
    let layout = Layout::new(out_dir);
    let batches = artifacts::read_proof_batches(&layout, batch_count)?;
    let account_batches: Vec<Vec<Account>> =
        batches.into_iter().map(|b| b.accounts).collect();

    let mut bottoms = Vec::with_capacity(batch_count);
    for i in 0..batch_count {
        bottoms.push(artifacts::read_completed_proof(&layout.full_bottom(i))?);
    }
    let middle_count = (batch_count + MAX_LEAVES - 1) / MAX_LEAVES;
    let mut middles = Vec::with_capacity(middle_count);
    for i in 0..middle_count {
        middles.push(artifacts::read_completed_proof(&layout.full_middle(i))?);
    }
    let top = artifacts::read_completed_proof(&layout.full_top())?;

    verify_full(&bottoms, &middles, &top, &account_batches)
}

/// Read a user bundle from disk and run [`verify_user`] over it.
pub fn verify_user_bundle_file(path: &Path) -> Result<(), VerifyError> {
    let bundle = artifacts::read_user_bundle(path)?;
    verify_user(&bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::Balance;
    use crate::prover::{generate_proof, ProofBatch};
    use num_bigint::BigInt;

    fn proven_batch() -> (Vec<Account>, CompletedProof) {
        let accounts = vec![
            Account::new(
                vec![0x01],
                Balance::padded([BigInt::from(100), BigInt::from(200)]),
            ),
            Account::new(
                vec![0x02],
                Balance::padded([BigInt::from(150), BigInt::from(250)]),
            ),
        ];
        let asset_sum = Balance::sum_of(&accounts).unwrap();
        let proof = generate_proof(&ProofBatch {
            accounts: accounts.clone(),
            asset_sum: Some(asset_sum),
            merkle_root: None,
            root_sum_hash: None,
        })
        .unwrap();
        (accounts, proof)
    }

    #[test]
    fn honest_proof_passes_zk_verification() {
        let (_, proof) = proven_batch();
        verify_zk(&proof).unwrap();
    }

    #[test]
    fn garbled_proof_is_invalid() {
        let (_, mut proof) = proven_batch();
        proof.proof = "not base64!".into();
        assert!(matches!(verify_zk(&proof), Err(VerifyError::ProofInvalid(_))));

        let (_, mut proof) = proven_batch();
        // Valid encoding, wrong public input.
        proof.merkle_root[0] ^= 0x01;
        assert!(matches!(verify_zk(&proof), Err(VerifyError::ProofInvalid(_))));
    }

    #[test]
    fn top_sum_binding() {
        let (_, proof) = proven_batch();
        verify_top_asset_sum(&proof).unwrap();

        let mut missing = proof.clone();
        missing.asset_sum = None;
        assert!(matches!(
            verify_top_asset_sum(&missing),
            Err(VerifyError::MissingArtifact(_))
        ));

        let mut forged = proof.clone();
        forged.asset_sum = Some(Balance::padded([BigInt::from(251), BigInt::from(450)]));
        assert!(matches!(
            verify_top_asset_sum(&forged),
            Err(VerifyError::AssetSumMismatch)
        ));
    }

    #[test]
    fn missing_path_is_reported_as_missing() {
        let (_, proof) = proven_batch();
        // Fresh proofs have no path; the upward link must say so rather
        // than fabricate one.
        assert!(matches!(
            upward_link(&proof, &proof.merkle_root, "bottom merkle path"),
            Err(VerifyError::MissingArtifact("bottom merkle path"))
        ));
    }
}
