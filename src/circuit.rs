//! The liability relation as an arithmetic circuit
//!
//! One Groth16 relation covers every layer of the aggregation. Private
//! inputs are the batch's accounts and the claimed asset sum; public inputs
//! are the Merkle root and the root-with-sum binding hash. The relation
//! asserts, jointly:
//!
//! 1. every balance component fits in [`BALANCE_BITS`] bits,
//! 2. the components sum to the claimed asset sum,
//! 3. the account hashes, zero-padded to the full leaf row, hash up to the
//!    public Merkle root,
//! 4. the binding hash equals the account-hash of `(root, asset_sum)`.
//!
//! The in-circuit MiMC gadget mirrors `mimc` block for block; both sides
//! share one round schedule. Padding leaves are circuit constants, so the
//! constraint shape depends only on the number of wired account slots.
//!
//! Balance width and account count are validated by the prover before
//! synthesis begins; the `debug_assert!`s here are defence in depth against
//! in-crate misuse, not part of the proof relation. Neither check needs to
//! be a constraint: a custodian mis-sizing its own witness can only inflate
//! the liability sum it is trying to minimize.

use ark_ff::Zero;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::*;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

use crate::balance::{asset_count, Account, Balance, BalanceError};
use crate::merkle::{MAX_LEAVES, TREE_DEPTH};
use crate::mimc::{encode_balance_entry, field_from_bytes, round_constants};
use crate::{Hash, F, MOD_BYTES};

/// Upper bound, in bits, on a single balance component. Wide enough for any
/// denomination in use; narrow enough that 2^10 of them cannot wrap the
/// field.
pub const BALANCE_BITS: usize = 128;

/// An account lowered to field elements, ready for witness allocation.
#[derive(Clone, Debug)]
pub struct CircuitAccount {
    /// The user id as a single field element.
    pub user_id: F,
    /// Amounts as field elements, in asset order.
    pub balance: Vec<F>,
}

/// Witness and instance for one batch proof.
#[derive(Clone, Debug)]
pub struct LiabilitiesCircuit {
    /// Private: the batch, one wired slot per account.
    pub accounts: Vec<CircuitAccount>,
    /// Private: the claimed per-asset sum of the batch.
    pub asset_sum: Vec<F>,
    /// Public: root of the account-hash tree.
    pub merkle_root: F,
    /// Public: account-hash of `(merkle_root, asset_sum)`.
    pub root_sum_hash: F,
}

impl LiabilitiesCircuit {
    /// All-zero circuit of the given slot count, used to synthesize the
    /// constraint shape during key generation.
    pub fn blank(slots: usize) -> Self {
        LiabilitiesCircuit {
            accounts: vec![
                CircuitAccount {
                    user_id: F::zero(),
                    balance: vec![F::zero(); asset_count()],
                };
                slots
            ],
            asset_sum: vec![F::zero(); asset_count()],
            merkle_root: F::zero(),
            root_sum_hash: F::zero(),
        }
    }

    /// Lower a host batch into circuit form. Surfaces the balance-level
    /// failures (negative amount, oversized amount or user id, wrong width)
    /// before any constraint is synthesized.
    pub fn from_batch(
        accounts: &[Account],
        asset_sum: &Balance,
        merkle_root: &Hash,
        root_sum_hash: &Hash,
    ) -> Result<Self, BalanceError> {
        let accounts = accounts
            .iter()
            .map(lower_account)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LiabilitiesCircuit {
            accounts,
            asset_sum: lower_balance(asset_sum)?,
            merkle_root: field_from_bytes(merkle_root),
            root_sum_hash: field_from_bytes(root_sum_hash),
        })
    }
}

fn lower_account(account: &Account) -> Result<CircuitAccount, BalanceError> {
    if account.user_id.len() > MOD_BYTES {
        return Err(BalanceError::OverflowingValue);
    }
    Ok(CircuitAccount {
        user_id: field_from_bytes(&account.user_id),
        balance: lower_balance(&account.balance)?,
    })
}

fn lower_balance(balance: &Balance) -> Result<Vec<F>, BalanceError> {
    balance.check_width()?;
    balance
        .entries()
        .iter()
        .map(|entry| Ok(field_from_bytes(&encode_balance_entry(entry)?)))
        .collect()
}

impl ConstraintSynthesizer<F> for LiabilitiesCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<F>) -> Result<(), SynthesisError> {
        debug_assert!(
            self.accounts.len() <= MAX_LEAVES,
            "account count exceeds the leaf capacity"
        );
        debug_assert!(
            self.asset_sum.len() == asset_count()
                && self.accounts.iter().all(|a| a.balance.len() == asset_count()),
            "balance width does not match the asset list"
        );

        // Instance allocation order is the verifier's contract: root first,
        // then the binding hash.
        let merkle_root = FpVar::new_input(cs.clone(), || Ok(self.merkle_root))?;
        let root_sum_hash = FpVar::new_input(cs.clone(), || Ok(self.root_sum_hash))?;

        let mut running = vec![FpVar::<F>::zero(); asset_count()];
        let mut leaves = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            let user_id = FpVar::new_witness(cs.clone(), || Ok(account.user_id))?;
            let mut balance = Vec::with_capacity(account.balance.len());
            for amount in &account.balance {
                let amount = FpVar::new_witness(cs.clone(), || Ok(*amount))?;
                enforce_within_range(&amount)?;
                balance.push(amount);
            }
            for (acc, amount) in running.iter_mut().zip(&balance) {
                *acc = &*acc + amount;
            }
            let balance_hash = mimc_sum(&balance)?;
            leaves.push(mimc_sum(&[user_id, balance_hash])?);
        }

        let asset_sum = self
            .asset_sum
            .iter()
            .map(|v| FpVar::new_witness(cs.clone(), || Ok(*v)))
            .collect::<Result<Vec<_>, _>>()?;
        for (acc, claimed) in running.iter().zip(&asset_sum) {
            acc.enforce_equal(claimed)?;
        }

        let root = tree_root(leaves)?;
        root.enforce_equal(&merkle_root)?;

        let sum_hash = mimc_sum(&asset_sum)?;
        let binding = mimc_sum(&[merkle_root, sum_hash])?;
        binding.enforce_equal(&root_sum_hash)?;

        Ok(())
    }
}

/// Fold the padded leaf row up to the root. Padding is constant zero, so
/// subtrees of padding fold away at synthesis time.
fn tree_root(mut nodes: Vec<FpVar<F>>) -> Result<FpVar<F>, SynthesisError> {
    nodes.resize(MAX_LEAVES, FpVar::constant(F::zero()));
    for _ in 0..TREE_DEPTH {
        let mut above = Vec::with_capacity(nodes.len() / 2);
        for pair in nodes.chunks(2) {
            above.push(mimc_sum(pair)?);
        }
        nodes = above;
    }
    Ok(nodes.pop().expect("root level is non-empty"))
}

/// Range check: the canonical bit decomposition must be zero above
/// [`BALANCE_BITS`].
fn enforce_within_range(value: &FpVar<F>) -> Result<(), SynthesisError> {
    let bits = value.to_bits_le()?;
    for bit in bits.iter().skip(BALANCE_BITS) {
        bit.enforce_equal(&Boolean::constant(false))?;
    }
    Ok(())
}

/// In-circuit mirror of `mimc::MimcHasher::sum` over already-allocated
/// blocks.
fn mimc_sum(blocks: &[FpVar<F>]) -> Result<FpVar<F>, SynthesisError> {
    let mut h = FpVar::<F>::zero();
    for m in blocks {
        let e = mimc_encrypt(&h, m)?;
        h = &h + &e + m;
    }
    Ok(h)
}

/// In-circuit mirror of the MiMC block cipher `E_h(m)`.
fn mimc_encrypt(h: &FpVar<F>, m: &FpVar<F>) -> Result<FpVar<F>, SynthesisError> {
    let mut x = m.clone();
    for c in round_constants() {
        let t = &x + h + FpVar::constant(*c);
        let t2 = t.square()?;
        x = &t2.square()? * &t;
    }
    Ok(&x + h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mimc::{hash_account, hash_accounts};
    use crate::{merkle, mimc};
    use ark_relations::r1cs::ConstraintSystem;
    use num_bigint::BigInt;

    fn test_batch() -> (Vec<Account>, Balance, Hash, Hash) {
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
        let root = merkle::root(&hash_accounts(&accounts).unwrap()).unwrap();
        let binding = hash_account(&Account::new(root.to_vec(), asset_sum.clone())).unwrap();
        (accounts, asset_sum, root, binding)
    }

    fn satisfied(circuit: LiabilitiesCircuit) -> bool {
        let cs = ConstraintSystem::<F>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();
        cs.is_satisfied().unwrap()
    }

    #[test]
    fn honest_witness_satisfies() {
        let (accounts, asset_sum, root, binding) = test_batch();
        let circuit =
            LiabilitiesCircuit::from_batch(&accounts, &asset_sum, &root, &binding).unwrap();
        assert!(satisfied(circuit));
    }

    #[test]
    fn circuit_tree_matches_host_tree() {
        // The public root the host computes is the only root the circuit
        // accepts; anything else must leave the system unsatisfied.
        let (accounts, asset_sum, root, _) = test_batch();
        let wrong_root = mimc::field_to_bytes(F::from(42u64));
        let binding =
            hash_account(&Account::new(wrong_root.to_vec(), asset_sum.clone())).unwrap();
        let circuit =
            LiabilitiesCircuit::from_batch(&accounts, &asset_sum, &wrong_root, &binding).unwrap();
        assert!(!satisfied(circuit));
        let binding = hash_account(&Account::new(root.to_vec(), asset_sum.clone())).unwrap();
        let circuit =
            LiabilitiesCircuit::from_batch(&accounts, &asset_sum, &root, &binding).unwrap();
        assert!(satisfied(circuit));
    }

    #[test]
    fn wrong_sum_is_unsatisfied() {
        let (accounts, asset_sum, root, _) = test_batch();
        let inflated = asset_sum
            .checked_add(&Balance::padded([BigInt::from(1)]))
            .unwrap();
        let binding = hash_account(&Account::new(root.to_vec(), inflated.clone())).unwrap();
        let circuit =
            LiabilitiesCircuit::from_batch(&accounts, &inflated, &root, &binding).unwrap();
        assert!(!satisfied(circuit));
    }

    #[test]
    fn wrong_binding_hash_is_unsatisfied() {
        let (accounts, asset_sum, root, _) = test_batch();
        let bogus = mimc::field_to_bytes(F::from(7u64));
        let circuit =
            LiabilitiesCircuit::from_batch(&accounts, &asset_sum, &root, &bogus).unwrap();
        assert!(!satisfied(circuit));
    }

    #[test]
    fn range_check_boundary() {
        let max: BigInt = (BigInt::from(1) << BALANCE_BITS) - 1;
        let accounts = vec![Account::new(vec![0x01], Balance::padded([max.clone()]))];
        let asset_sum = Balance::sum_of(&accounts).unwrap();
        let root = merkle::root(&hash_accounts(&accounts).unwrap()).unwrap();
        let binding = hash_account(&Account::new(root.to_vec(), asset_sum.clone())).unwrap();
        let circuit =
            LiabilitiesCircuit::from_batch(&accounts, &asset_sum, &root, &binding).unwrap();
        assert!(satisfied(circuit));

        // 2^128 itself must fail the range check even with a consistent
        // root and sum.
        let over = BigInt::from(1) << BALANCE_BITS;
        let accounts = vec![Account::new(vec![0x01], Balance::padded([over]))];
        let asset_sum = {
            // Bypass sum_of's host checks; the circuit must still reject.
            Balance::from_entries(accounts[0].balance.entries().to_vec())
        };
        let root = merkle::root(&hash_accounts(&accounts).unwrap()).unwrap();
        let binding = hash_account(&Account::new(root.to_vec(), asset_sum.clone())).unwrap();
        let circuit =
            LiabilitiesCircuit::from_batch(&accounts, &asset_sum, &root, &binding).unwrap();
        assert!(!satisfied(circuit));
    }

    #[test]
    fn blank_circuit_has_the_same_shape() {
        let (accounts, asset_sum, root, binding) = test_batch();
        let circuit =
            LiabilitiesCircuit::from_batch(&accounts, &asset_sum, &root, &binding).unwrap();
        let cs_real = ConstraintSystem::<F>::new_ref();
        circuit.generate_constraints(cs_real.clone()).unwrap();

        let cs_blank = ConstraintSystem::<F>::new_ref();
        LiabilitiesCircuit::blank(accounts.len())
            .generate_constraints(cs_blank.clone())
            .unwrap();

        assert_eq!(cs_real.num_constraints(), cs_blank.num_constraints());
        assert_eq!(cs_real.num_instance_variables(), cs_blank.num_instance_variables());
        assert_eq!(cs_real.num_witness_variables(), cs_blank.num_witness_variables());
    }

    #[test]
    fn lowering_rejects_bad_input() {
        let negative = vec![Account::new(
            vec![0x01],
            Balance::padded([BigInt::from(-1)]),
        )];
        let sum = Balance::zero();
        assert!(matches!(
            LiabilitiesCircuit::from_batch(&negative, &sum, &[0u8; 32], &[0u8; 32]),
            Err(BalanceError::NegativeValue)
        ));

        let short = vec![Account::new(
            vec![0x01],
            Balance::from_entries(vec![BigInt::from(1)]),
        )];
        assert!(matches!(
            LiabilitiesCircuit::from_batch(&short, &sum, &[0u8; 32], &[0u8; 32]),
            Err(BalanceError::LengthMismatch { .. })
        ));
    }
}
