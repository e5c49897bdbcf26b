//! Synthetic test-data generator
//!
//! Produces development batches with the same shape as real custodian
//! exports: random 16-byte user ids and uniform balances below 10,500 per
//! asset. Batch `i` is seeded with `i + 11`, so repeated runs produce
//! identical files and the proving pipeline stays reproducible end to end.

use num_bigint::BigInt;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::info;

use crate::artifacts::{self, FileError, Layout};
use crate::balance::{asset_count, Account, Balance, BalanceError};
use crate::merkle::{self, MerkleError};
use crate::mimc::{hash_account, hash_accounts};
use crate::prover::ProofBatch;
use crate::Hash;

/// Maximum generated per-asset amount (exclusive).
const MAX_AMOUNT: u64 = 10_500;

/// Length of generated user ids, in bytes.
const USER_ID_BYTES: usize = 16;

/// Failures while producing synthetic batches.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// A balance-level invariant was violated.
    #[error(transparent)]
    Balance(#[from] BalanceError),
    /// The requested batch does not fit the tree.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// A data file could not be written.
    #[error(transparent)]
    File(#[from] FileError),
}

/// Generate `count` accounts from the given seed, together with their sum,
/// root, and root-with-sum binding hash.
pub fn generate_test_accounts(
    count: usize,
    seed: u64,
) -> Result<(Vec<Account>, Balance, Hash, Hash), GeneratorError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut accounts = Vec::with_capacity(count);
    for _ in 0..count {
        let mut user_id = vec![0u8; USER_ID_BYTES];
        rng.fill_bytes(&mut user_id);
        let balance = Balance::from_entries(
            (0..asset_count())
                .map(|_| BigInt::from(rng.gen_range(0..MAX_AMOUNT)))
                .collect(),
        );
        accounts.push(Account::new(user_id, balance));
    }
    let asset_sum = Balance::sum_of(&accounts)?;
    let merkle_root = merkle::root(&hash_accounts(&accounts)?)?;
    let root_sum_hash = hash_account(&Account::new(merkle_root.to_vec(), asset_sum.clone()))?;
    Ok((accounts, asset_sum, merkle_root, root_sum_hash))
}

/// Write `batch_count` secret batch files of `count_per_batch` accounts
/// each, plus a sample account for exercising the user-verification flow.
pub fn generate_data(
    batch_count: usize,
    count_per_batch: usize,
    layout: &Layout,
) -> Result<(), GeneratorError> {
    layout.ensure_dirs()?;
    let mut sample: Option<Account> = None;
    for i in 0..batch_count {
        let (accounts, asset_sum, merkle_root, root_sum_hash) =
            generate_test_accounts(count_per_batch, i as u64 + 11)?;
        sample = accounts.first().cloned();
        let batch = ProofBatch {
            accounts,
            asset_sum: Some(asset_sum),
            merkle_root: Some(merkle_root),
            root_sum_hash: Some(root_sum_hash),
        };
        artifacts::write_proof_batch(&layout.secret_batch(i), &batch)?;
    }
    if let Some(account) = sample {
        artifacts::write_account(&layout.sample_account(), &account)?;
    }
    info!(batch_count, count_per_batch, "generated test data");
    Ok(())
}
