//! Field encoding and MiMC hashing over the BN254 scalar field
//!
//! Every hash in the commitment scheme is MiMC over `Fr`: exponent-5 rounds
//! with Miyaguchi–Preneel chaining between absorbed blocks. MiMC is the
//! cheapest hash to express as arithmetic constraints, which is what makes
//! the in-circuit Merkle tree affordable; the price is that every absorbed
//! value must be a canonical field element, so the whole pipeline speaks
//! 32-byte big-endian field encodings.
//!
//! The host hasher here and the circuit gadget in `circuit` share one round
//! schedule ([`round_constants`]) and must stay block-for-block identical:
//! a leaf hashed on the host has to equal the same leaf hashed inside the
//! proof relation.

use ark_ff::{BigInteger, Field, PrimeField, Zero};
use num_bigint::{BigInt, Sign};
use once_cell::sync::Lazy;
use std::io::Read;

use crate::balance::{Account, Balance, BalanceError};
use crate::{Hash, F, MOD_BYTES};

/// Number of MiMC rounds per absorbed block.
const MIMC_ROUNDS: usize = 110;

/// Domain tag the round schedule is derived from. Changing it changes every
/// commitment ever produced by this crate.
const MIMC_SEED: &str = "solvency.mimc.bn254.v1";

/// The shared round schedule: `MIMC_ROUNDS` field elements squeezed from a
/// BLAKE3 XOF over [`MIMC_SEED`], 64 uniform bytes per constant reduced into
/// the field.
pub fn round_constants() -> &'static [F] {
    static CONSTANTS: Lazy<Vec<F>> = Lazy::new(|| {
        let mut hasher = blake3::Hasher::new();
        hasher.update(MIMC_SEED.as_bytes());
        let mut xof = hasher.finalize_xof();
        let mut buf = [0u8; 64];
        (0..MIMC_ROUNDS)
            .map(|_| {
                let _ = xof.read(&mut buf);
                F::from_le_bytes_mod_order(&buf)
            })
            .collect()
    });
    &CONSTANTS
}

/// Encode a non-negative integer as the canonical `MOD_BYTES` big-endian
/// field encoding: the magnitude bytes left-padded with zeros.
///
/// Negative amounts and amounts wider than the field byte width are
/// rejected; both would otherwise smuggle a value the circuit's range check
/// could never have admitted.
pub fn encode_balance_entry(value: &BigInt) -> Result<Hash, BalanceError> {
    if value.sign() == Sign::Minus {
        return Err(BalanceError::NegativeValue);
    }
    let bytes = value.magnitude().to_bytes_be();
    if bytes.len() > MOD_BYTES {
        return Err(BalanceError::OverflowingValue);
    }
    let mut out = [0u8; MOD_BYTES];
    out[MOD_BYTES - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Canonical big-endian encoding of a field element.
#[inline]
pub fn field_to_bytes(f: F) -> Hash {
    let repr = f.into_bigint().to_bytes_be();
    let mut out = [0u8; MOD_BYTES];
    out.copy_from_slice(&repr);
    out
}

/// Interpret big-endian bytes as a field element, reducing mod r.
#[inline]
pub fn field_from_bytes(bytes: &[u8]) -> F {
    F::from_be_bytes_mod_order(bytes)
}

/// One MiMC block cipher call: `E_h(m)` with the running chain value `h` as
/// the key. Rounds compute `x ← (x + h + c_i)^5`; the key is folded in once
/// more at the end.
pub(crate) fn encrypt(h: F, m: F) -> F {
    let mut x = m;
    for c in round_constants() {
        let t = x + h + c;
        x = t.square().square() * t;
    }
    x + h
}

/// Streaming MiMC hasher with `reset`/`write`/`sum` semantics.
///
/// Blocks are chained Miyaguchi–Preneel style:
/// `h ← h + E_h(m) + m` for each absorbed block `m`, starting from zero.
#[derive(Clone, Debug, Default)]
pub struct MimcHasher {
    blocks: Vec<F>,
}

impl MimcHasher {
    /// A hasher with no absorbed blocks.
    pub fn new() -> Self {
        MimcHasher { blocks: Vec::new() }
    }

    /// Drop all absorbed blocks, returning to the fresh state.
    pub fn reset(&mut self) {
        self.blocks.clear();
    }

    /// Absorb a single field element.
    pub fn write_field(&mut self, block: F) {
        self.blocks.push(block);
    }

    /// Absorb a byte string as big-endian field blocks of `MOD_BYTES` each.
    /// A trailing short chunk is interpreted big-endian as-is, which is how
    /// short user ids enter the account hash.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(MOD_BYTES) {
            self.blocks.push(field_from_bytes(chunk));
        }
    }

    /// Chain every absorbed block and return the canonical encoding of the
    /// final state. Does not consume the absorbed blocks; callers that want
    /// a fresh hash call [`MimcHasher::reset`].
    pub fn sum(&self) -> Hash {
        let mut h = F::zero();
        for m in &self.blocks {
            h = h + encrypt(h, *m) + m;
        }
        field_to_bytes(h)
    }
}

/// Hash of an internal Merkle node from its two children.
pub fn hash_nodes(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = MimcHasher::new();
    hasher.write_bytes(left);
    hasher.write_bytes(right);
    hasher.sum()
}

/// Hash of a balance vector: each amount encoded and absorbed in asset
/// order.
pub fn hash_balance(balance: &Balance) -> Result<Hash, BalanceError> {
    balance.check_width()?;
    let mut hasher = MimcHasher::new();
    for entry in balance.entries() {
        let encoded = encode_balance_entry(entry)?;
        hasher.write_bytes(&encoded);
    }
    Ok(hasher.sum())
}

/// Hash of an account: the user id followed by the balance hash.
///
/// The user id must fit in one field block so the host hash matches the
/// circuit, where the id is a single witness element.
pub fn hash_account(account: &Account) -> Result<Hash, BalanceError> {
    if account.user_id.len() > MOD_BYTES {
        return Err(BalanceError::OverflowingValue);
    }
    let balance_hash = hash_balance(&account.balance)?;
    let mut hasher = MimcHasher::new();
    hasher.write_bytes(&account.user_id);
    hasher.write_bytes(&balance_hash);
    Ok(hasher.sum())
}

/// Leaf hashes for a batch of accounts, in batch order.
pub fn hash_accounts(accounts: &[Account]) -> Result<Vec<Hash>, BalanceError> {
    accounts.iter().map(hash_account).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn account(id: &[u8], prefix: &[i64]) -> Account {
        Account::new(
            id.to_vec(),
            Balance::padded(prefix.iter().map(|v| BigInt::from(*v))),
        )
    }

    #[test]
    fn encode_pads_to_field_width() {
        let encoded = encode_balance_entry(&BigInt::from(123456)).unwrap();
        let mut expected = [0u8; MOD_BYTES];
        expected[29..].copy_from_slice(&[0x01, 0xe2, 0x40]);
        assert_eq!(encoded, expected);
        assert_eq!(encode_balance_entry(&BigInt::from(0)).unwrap(), [0u8; 32]);
    }

    #[test]
    fn encode_rejects_negative_and_oversized() {
        assert!(matches!(
            encode_balance_entry(&BigInt::from(-5)),
            Err(BalanceError::NegativeValue)
        ));
        let wide = BigInt::from(1u8) << 256;
        assert!(matches!(
            encode_balance_entry(&wide),
            Err(BalanceError::OverflowingValue)
        ));
    }

    #[test]
    fn round_constants_are_stable_and_distinct() {
        let a = round_constants();
        let b = round_constants();
        assert_eq!(a.len(), MIMC_ROUNDS);
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
    }

    #[test]
    fn hash_is_deterministic() {
        let acct = account(&[1, 2], &[1_000_000_000, 11_111]);
        assert_eq!(hash_account(&acct).unwrap(), hash_account(&acct).unwrap());
    }

    #[test]
    fn hash_depends_on_every_input() {
        let base = account(&[1, 2], &[100, 200]);
        let id_flip = account(&[1, 3], &[100, 200]);
        let bal_flip = account(&[1, 2], &[101, 200]);
        let far_flip = {
            let mut entries: Vec<BigInt> = base.balance.entries().to_vec();
            *entries.last_mut().unwrap() = BigInt::from(1);
            Account::new(base.user_id.clone(), Balance::from_entries(entries))
        };
        let h = hash_account(&base).unwrap();
        assert_ne!(h, hash_account(&id_flip).unwrap());
        assert_ne!(h, hash_account(&bal_flip).unwrap());
        assert_ne!(h, hash_account(&far_flip).unwrap());
    }

    #[test]
    fn node_hash_is_order_sensitive() {
        let left = [1u8; 32];
        let right = [2u8; 32];
        assert_ne!(hash_nodes(&left, &right), hash_nodes(&right, &left));
    }

    #[test]
    fn reset_restores_fresh_state() {
        let mut hasher = MimcHasher::new();
        hasher.write_bytes(&[7u8; 32]);
        let first = hasher.sum();
        hasher.reset();
        hasher.write_bytes(&[7u8; 32]);
        assert_eq!(first, hasher.sum());
    }

    #[test]
    fn host_hash_round_trips_through_field() {
        // sum() must emit the canonical encoding of a real field element.
        let acct = account(&[9], &[42]);
        let h = hash_account(&acct).unwrap();
        assert_eq!(field_to_bytes(field_from_bytes(&h)), h);
    }

    #[test]
    fn oversized_user_id_is_rejected() {
        let acct = Account::new(vec![0xff; MOD_BYTES + 1], Balance::zero());
        assert!(matches!(
            hash_account(&acct),
            Err(BalanceError::OverflowingValue)
        ));
    }
}
