//! Asset registry and balance algebra
//!
//! A [`Balance`] is a fixed-width vector of per-asset integer amounts, one
//! entry per symbol in [`ASSET_SYMBOLS`]. The width is a build-time constant:
//! every array of amounts in this crate is interpreted positionally against
//! that list, and every operation here rejects vectors of any other length.
//!
//! Amounts are arbitrary-precision signed integers. Negative amounts are
//! representable (they can arrive from hostile or corrupt input files) but
//! are rejected at the two choke points where they would otherwise enter a
//! commitment: summation ([`Balance::sum_of`]) and field encoding
//! (`mimc::encode_balance_entry`).

use num_bigint::{BigInt, Sign};

/// Asset symbols, in committed order. Index `i` of every balance vector is
/// denominated in `ASSET_SYMBOLS[i]`.
pub const ASSET_SYMBOLS: [&str; 40] = [
    "ALGO", "ARBETH", "AVAXC", "AVAXP", "BTC", "BCH", "ADA", "CSPR", "TIA", "COREUM", "ATOM",
    "DASH", "DOGE", "EOS", "ETH", "ETC", "HBAR", "LTC", "NEAR", "OSMO", "DOT", "POLYGON", "SEI",
    "SOL", "STX", "XLM", "SUI", "TRX", "XRP", "ZEC", "ZETA", "BLD", "BSC", "TON", "COREDAO",
    "BERA", "TAO", "APT", "XDC", "WEMIX",
];

/// Number of assets a well-formed balance vector carries.
#[inline]
pub fn asset_count() -> usize {
    ASSET_SYMBOLS.len()
}

/// Balance-level invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    /// A negative amount reached a point where only non-negative liabilities
    /// are meaningful.
    #[error("negative value cannot enter the liability commitment")]
    NegativeValue,
    /// An amount does not fit into the field's canonical byte width.
    #[error("value exceeds the scalar-field byte width")]
    OverflowingValue,
    /// A balance vector of the wrong width was supplied.
    #[error("balance has {got} entries, expected {expected}")]
    LengthMismatch {
        /// Number of entries actually supplied.
        got: usize,
        /// Number of entries required.
        expected: usize,
    },
}

/// Per-asset amounts, positionally aligned with [`ASSET_SYMBOLS`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balance(Vec<BigInt>);

impl Balance {
    /// The all-zero balance of full width.
    pub fn zero() -> Self {
        Balance(vec![BigInt::from(0u8); asset_count()])
    }

    /// Wrap a raw entry vector without padding. The width is validated by
    /// the first operation that touches the balance, not here, so that
    /// malformed on-disk data surfaces as [`BalanceError::LengthMismatch`]
    /// rather than being silently repaired.
    pub fn from_entries(entries: Vec<BigInt>) -> Self {
        Balance(entries)
    }

    /// Build a full-width balance from a prefix of amounts, zero-filling the
    /// remaining assets.
    pub fn padded<I>(prefix: I) -> Self
    where
        I: IntoIterator<Item = BigInt>,
    {
        let mut entries: Vec<BigInt> = prefix.into_iter().collect();
        assert!(
            entries.len() <= asset_count(),
            "balance prefix longer than the asset list"
        );
        entries.resize(asset_count(), BigInt::from(0u8));
        Balance(entries)
    }

    /// The underlying amounts.
    #[inline]
    pub fn entries(&self) -> &[BigInt] {
        &self.0
    }

    /// Number of entries actually carried (not necessarily the asset-list
    /// width; see [`Balance::check_width`]).
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector carries no entries at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject any width other than the asset-list width.
    pub fn check_width(&self) -> Result<(), BalanceError> {
        if self.0.len() != asset_count() {
            return Err(BalanceError::LengthMismatch {
                got: self.0.len(),
                expected: asset_count(),
            });
        }
        Ok(())
    }

    /// Positional sum of two balances. Plain integer addition; range limits
    /// are the circuit's concern.
    pub fn checked_add(&self, other: &Balance) -> Result<Balance, BalanceError> {
        self.check_width()?;
        other.check_width()?;
        Ok(Balance(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| a + b)
                .collect(),
        ))
    }

    /// Positional equality. A width mismatch is an error, not `false`: the
    /// caller is comparing values that were supposed to share the registry.
    pub fn checked_eq(&self, other: &Balance) -> Result<bool, BalanceError> {
        self.check_width()?;
        other.check_width()?;
        Ok(self.0 == other.0)
    }

    /// Left fold of [`Balance::checked_add`] over a batch, starting from
    /// zero. Any negative amount anywhere in the batch is fatal: it would
    /// deflate the committed liability sum.
    pub fn sum_of(accounts: &[Account]) -> Result<Balance, BalanceError> {
        let mut total = Balance::zero();
        for account in accounts {
            account.balance.check_width()?;
            for entry in account.balance.entries() {
                if entry.sign() == Sign::Minus {
                    return Err(BalanceError::NegativeValue);
                }
            }
            total = total.checked_add(&account.balance)?;
        }
        Ok(total)
    }
}

/// One account holder's row: an opaque user id (big-endian bytes of a
/// base-36 integer, at most the field byte width) and their balance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Big-endian bytes of the holder's identifier.
    pub user_id: Vec<u8>,
    /// The holder's per-asset amounts.
    pub balance: Balance,
}

impl Account {
    /// Pair a user id with its balance.
    pub fn new(user_id: Vec<u8>, balance: Balance) -> Self {
        Account { user_id, balance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn big(v: i64) -> BigInt {
        BigInt::from(v)
    }

    #[test]
    fn padded_fills_to_asset_width() {
        let b = Balance::padded([big(7), big(9)]);
        assert_eq!(b.len(), asset_count());
        assert_eq!(b.entries()[0], big(7));
        assert_eq!(b.entries()[1], big(9));
        assert!(b.entries()[2..].iter().all(|e| e == &big(0)));
    }

    #[test]
    fn add_is_positional() {
        let a = Balance::padded([big(100), big(200)]);
        let b = Balance::padded([big(150), big(250)]);
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum.entries()[0], big(250));
        assert_eq!(sum.entries()[1], big(450));
    }

    #[test]
    fn width_mismatch_is_an_error() {
        let short = Balance::from_entries(vec![big(1); 3]);
        let full = Balance::zero();
        assert!(matches!(
            short.checked_add(&full),
            Err(BalanceError::LengthMismatch { got: 3, .. })
        ));
        assert!(matches!(
            full.checked_eq(&short),
            Err(BalanceError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn sum_of_folds_batch() {
        let accounts = vec![
            Account::new(vec![1], Balance::padded([big(100), big(200)])),
            Account::new(vec![2], Balance::padded([big(150), big(250)])),
        ];
        let sum = Balance::sum_of(&accounts).unwrap();
        assert!(sum
            .checked_eq(&Balance::padded([big(250), big(450)]))
            .unwrap());
    }

    #[test]
    fn sum_of_rejects_negative_amounts() {
        let accounts = vec![Account::new(vec![1], Balance::padded([big(-5)]))];
        assert!(matches!(
            Balance::sum_of(&accounts),
            Err(BalanceError::NegativeValue)
        ));
    }

    #[test]
    fn sum_of_empty_batch_is_zero() {
        let sum = Balance::sum_of(&[]).unwrap();
        assert!(sum.checked_eq(&Balance::zero()).unwrap());
    }
}
