//! Batch prover and three-level aggregation
//!
//! A bottom proof commits to one batch of up to 1024 secret accounts. Every
//! 1024 bottom proofs are lifted into a middle proof by treating each
//! `(merkle_root, asset_sum)` pair as a synthetic account, and the middle
//! proofs are lifted once more into the single top proof that carries the
//! published total. The lifting re-commits to the lower layer's roots and
//! sums; soundness comes from the verifier checking all three proofs plus
//! the merkle-path chain end to end, not from in-circuit verification of
//! the lower proofs.
//!
//! Groth16 key generation is the dominant cost, so compiled circuits are
//! cached process-wide per slot count and set up at most once; batches of
//! the same size then prove in parallel against the shared keys.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use ark_bn254::Bn254;
use ark_groth16::{Groth16, ProvingKey, VerifyingKey};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystem, SynthesisError};
use ark_snark::SNARK;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use tracing::{info, info_span};

use crate::artifacts::{self, FileError, Layout};
use crate::balance::{Account, Balance, BalanceError};
use crate::circuit::LiabilitiesCircuit;
use crate::merkle::{self, MerkleError, MAX_LEAVES, TREE_DEPTH};
use crate::mimc::hash_account;
use crate::{Hash, F};

/// Failures on the proving path. All of these indicate misuse or corrupt
/// input rather than an adversarial artifact, and callers treat them as
/// fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    /// A required asset sum is absent from a batch or a lower-level proof.
    #[error("required asset sum is absent")]
    MissingAssetSum,
    /// Some other required input element is absent.
    #[error("required artifact is absent: {0}")]
    MissingArtifact(&'static str),
    /// The declared sum (or declared root-with-sum hash) disagrees with the
    /// value recomputed from the underlying data.
    #[error("declared asset sum does not match the recomputed commitment")]
    AssetSumMismatch,
    /// A balance-level invariant was violated.
    #[error(transparent)]
    Balance(#[from] BalanceError),
    /// A merkle-level invariant was violated.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// The R1CS front end or Groth16 backend rejected the circuit.
    #[error("constraint synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
    /// An artifact could not be read, written, or encoded.
    #[error(transparent)]
    File(#[from] FileError),
}

/// The reusable per-size proving artifact: Groth16 key pair plus the
/// synthesized constraint count of the compiled relation.
pub struct PartialProof {
    /// Groth16 proving key.
    pub pk: ProvingKey<Bn254>,
    /// Groth16 verifying key.
    pub vk: VerifyingKey<Bn254>,
    /// Constraint count of the synthesized relation.
    pub constraints: usize,
}

/// Secret prover input for one batch. Root and binding hash are recomputed
/// when absent; the asset sum must be declared so the prover can cross-check
/// it against the accounts.
#[derive(Clone, Debug)]
pub struct ProofBatch {
    /// The batch, in committed order.
    pub accounts: Vec<Account>,
    /// Declared per-asset sum of the batch.
    pub asset_sum: Option<Balance>,
    /// Precomputed tree root, if the producer supplied one.
    pub merkle_root: Option<Hash>,
    /// Precomputed binding hash, if the producer supplied one.
    pub root_sum_hash: Option<Hash>,
}

/// A generated proof and its public commitment.
///
/// Lifecycle is one-way: [`generate_proof`] produces it with the node grid
/// and asset sum populated, [`CompletedProof::attach_path`] adds the upward
/// path once the enclosing layer exists, and
/// [`CompletedProof::strip_for_publication`] produces the artifact that may
/// leave the custodian. Verification never mutates a proof.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedProof {
    /// Base64 of the compressed Groth16 proof.
    pub proof: String,
    /// Base64 of the compressed Groth16 verifying key.
    pub verifying_key: String,
    /// Root of this proof's account-hash tree.
    pub merkle_root: Hash,
    /// Account-hash of `(merkle_root, asset_sum)`.
    pub root_sum_hash: Hash,
    /// Sibling path into the enclosing layer's tree; absent on the top
    /// proof and before the enclosing proof exists.
    pub merkle_path: Option<Vec<Hash>>,
    /// Leaf position of the binding hash in the enclosing tree.
    pub merkle_position: Option<usize>,
    /// Full node grid of this proof's own tree; custodian-only.
    pub merkle_nodes: Option<Vec<Vec<Hash>>>,
    /// Per-asset sum; published only at the top level.
    pub asset_sum: Option<Balance>,
}

impl CompletedProof {
    /// Record where this proof's binding hash sits in the enclosing tree.
    pub fn attach_path(&mut self, path: Vec<Hash>, position: usize) {
        self.merkle_path = Some(path);
        self.merkle_position = Some(position);
    }

    /// The public rendition: node grid always dropped, asset sum dropped
    /// unless this is the top proof. Publishing a non-top sum would leak
    /// per-1024-account aggregates.
    pub fn strip_for_publication(&self, keep_asset_sum: bool) -> CompletedProof {
        CompletedProof {
            merkle_nodes: None,
            asset_sum: if keep_asset_sum {
                self.asset_sum.clone()
            } else {
                None
            },
            ..self.clone()
        }
    }

    /// The account this proof becomes in the next layer up: the root as the
    /// user id, the asset sum as the balance.
    pub fn to_synthetic_account(&self) -> Result<Account, ProverError> {
        let sum = self.asset_sum.as_ref().ok_or(ProverError::MissingAssetSum)?;
        Ok(Account::new(self.merkle_root.to_vec(), sum.clone()))
    }
}

/// Process-wide cache of compiled circuits, keyed strictly by slot count.
/// First touch compiles under the lock, so each size is set up exactly once
/// even when batches prove in parallel.
static PARTIAL_PROOFS: Lazy<Mutex<HashMap<usize, Arc<PartialProof>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Fetch (or build) the proving artifact for a circuit with `slots` wired
/// account slots.
pub fn partial_proof_for(slots: usize) -> Result<Arc<PartialProof>, ProverError> {
    let mut cache = PARTIAL_PROOFS
        .lock()
        .expect("partial-proof cache lock poisoned");
    if let Some(partial) = cache.get(&slots) {
        return Ok(Arc::clone(partial));
    }

    let span = info_span!("circuit_setup", slots);
    let _enter = span.enter();
    let cs = ConstraintSystem::<F>::new_ref();
    LiabilitiesCircuit::blank(slots).generate_constraints(cs.clone())?;
    let constraints = cs.num_constraints();
    info!(constraints, "compiled liability circuit");

    let mut rng = rand::thread_rng();
    let (pk, vk) = Groth16::<Bn254>::circuit_specific_setup(
        LiabilitiesCircuit::blank(slots),
        &mut rng,
    )?;
    let partial = Arc::new(PartialProof {
        pk,
        vk,
        constraints,
    });
    cache.insert(slots, Arc::clone(&partial));
    Ok(partial)
}

/// Prove a single batch.
///
/// Cross-checks the declared asset sum against the accounts, fills in the
/// root and binding hash when absent, and returns the proof with its node
/// grid and asset sum still attached (the caller strips before publishing).
pub fn generate_proof(batch: &ProofBatch) -> Result<CompletedProof, ProverError> {
    let asset_sum = batch
        .asset_sum
        .as_ref()
        .ok_or(ProverError::MissingAssetSum)?;
    let recomputed = Balance::sum_of(&batch.accounts)?;
    if !recomputed.checked_eq(asset_sum)? {
        return Err(ProverError::AssetSumMismatch);
    }

    let leaves = crate::mimc::hash_accounts(&batch.accounts)?;
    let nodes = merkle::build_nodes(&leaves)?;
    let merkle_root = batch.merkle_root.unwrap_or(nodes[0][0]);
    let root_sum_hash = match batch.root_sum_hash {
        Some(hash) => hash,
        None => hash_account(&Account::new(merkle_root.to_vec(), asset_sum.clone()))?,
    };

    let partial = partial_proof_for(batch.accounts.len())?;
    let circuit =
        LiabilitiesCircuit::from_batch(&batch.accounts, asset_sum, &merkle_root, &root_sum_hash)?;

    let span = info_span!("prove_batch", accounts = batch.accounts.len());
    let _enter = span.enter();
    let mut rng = rand::thread_rng();
    let proof = Groth16::<Bn254>::prove(&partial.pk, circuit, &mut rng)?;

    Ok(CompletedProof {
        proof: artifacts::to_base64(&proof)?,
        verifying_key: artifacts::to_base64(&partial.vk)?,
        merkle_root,
        root_sum_hash,
        merkle_path: None,
        merkle_position: None,
        merkle_nodes: Some(nodes),
        asset_sum: Some(asset_sum.clone()),
    })
}

/// Prove a slice of batches in parallel, preserving batch order.
pub fn generate_proofs(batches: &[ProofBatch]) -> Result<Vec<CompletedProof>, ProverError> {
    batches.par_iter().map(generate_proof).collect()
}

/// Lift one layer: re-commit to the `(root, sum)` pairs of up to 1024 lower
/// proofs as a synthetic batch. Each lower proof's binding hash is
/// re-derived first; a mismatch means the lower artifact does not commit to
/// the sum it claims.
pub fn generate_next_level_proof(lower: &[CompletedProof]) -> Result<CompletedProof, ProverError> {
    let mut accounts = Vec::with_capacity(lower.len());
    for proof in lower {
        let account = proof.to_synthetic_account()?;
        if hash_account(&account)? != proof.root_sum_hash {
            return Err(ProverError::AssetSumMismatch);
        }
        accounts.push(account);
    }
    let asset_sum = Balance::sum_of(&accounts)?;
    generate_proof(&ProofBatch {
        accounts,
        asset_sum: Some(asset_sum),
        merkle_root: None,
        root_sum_hash: None,
    })
}

/// Run the full aggregation over `batch_count` secret batches under
/// `out_dir`, persist the stripped public artifacts and the custodian-only
/// full artifacts, and return the in-memory (unstripped) chain.
pub fn prove(
    batch_count: usize,
    out_dir: &Path,
) -> Result<(Vec<CompletedProof>, CompletedProof), ProverError> {
    let layout = Layout::new(out_dir);
    layout.ensure_dirs()?;
    let batches = artifacts::read_proof_batches(&layout, batch_count)?;

    let span = info_span!("prove_run", batch_count);
    let _enter = span.enter();

    let mut bottoms = generate_proofs(&batches)?;
    info!(count = bottoms.len(), "generated bottom proofs");

    let mut middles = bottoms
        .chunks(MAX_LEAVES)
        .map(generate_next_level_proof)
        .collect::<Result<Vec<_>, _>>()?;
    info!(count = middles.len(), "generated middle proofs");

    let top = generate_next_level_proof(&middles)?;
    info!("generated top proof");

    // Paths live in the parent's tree, so they can only be attached now.
    for (i, bottom) in bottoms.iter_mut().enumerate() {
        let grid = middles[i / MAX_LEAVES]
            .merkle_nodes
            .as_ref()
            .expect("freshly generated proofs carry node grids");
        bottom.attach_path(merkle::path(i % MAX_LEAVES, grid)?, i % MAX_LEAVES);
    }
    let top_grid = top
        .merkle_nodes
        .as_ref()
        .expect("freshly generated proofs carry node grids");
    for (i, middle) in middles.iter_mut().enumerate() {
        let path = merkle::path(i, top_grid)?;
        middle.attach_path(path, i);
    }

    for (i, bottom) in bottoms.iter().enumerate() {
        artifacts::write_completed_proof(&layout.full_bottom(i), bottom)?;
        artifacts::write_completed_proof(
            &layout.public_bottom(i),
            &bottom.strip_for_publication(false),
        )?;
    }
    for (i, middle) in middles.iter().enumerate() {
        artifacts::write_completed_proof(&layout.full_middle(i), middle)?;
        artifacts::write_completed_proof(
            &layout.public_middle(i),
            &middle.strip_for_publication(false),
        )?;
    }
    artifacts::write_completed_proof(&layout.full_top(), &top)?;
    artifacts::write_completed_proof(&layout.public_top(), &top.strip_for_publication(true))?;

    // A ready-made bundle for the first account, so the user flow can be
    // exercised straight after a proving run.
    if let Some(first_batch) = batches.first() {
        if let Some(account) = first_batch.accounts.first() {
            let bundle = build_user_bundle(account.clone(), 0, &bottoms[0], &middles[0], &top)?;
            artifacts::write_user_bundle(&layout.user_bundle(), &bundle)?;
        }
    }

    Ok((bottoms, top))
}

/// Assemble the per-holder verification bundle for `account` at leaf
/// `position` of `bottom`'s tree. The chain proofs are stripped to their
/// public renditions; the holder's own path is cut from the bottom grid.
pub fn build_user_bundle(
    account: Account,
    position: usize,
    bottom: &CompletedProof,
    middle: &CompletedProof,
    top: &CompletedProof,
) -> Result<crate::verifier::UserProofBundle, ProverError> {
    let grid = bottom
        .merkle_nodes
        .as_ref()
        .ok_or(ProverError::MissingArtifact("bottom-proof node grid"))?;
    let user_merkle_path = merkle::path(position, grid)?;
    // The holder's leaf must actually sit where the bundle claims.
    if grid[TREE_DEPTH][position] != hash_account(&account)? {
        return Err(ProverError::Merkle(MerkleError::RootMismatch));
    }
    Ok(crate::verifier::UserProofBundle {
        account,
        user_merkle_path,
        user_merkle_position: position,
        bottom: bottom.strip_for_publication(false),
        middle: middle.strip_for_publication(false),
        top: top.strip_for_publication(true),
    })
}
