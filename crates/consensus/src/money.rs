//! Monetary constants and range checks.

/// Number of base units in one coin.
pub const COIN: i64 = 100_000_000;
/// Total monetary supply cap, in base units.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Whether an amount is a valid consensus money value.
pub fn money_range(value: i64) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_range_bounds() {
        assert!(money_range(0));
        assert!(money_range(MAX_MONEY));
        assert!(!money_range(-1));
        assert!(!money_range(MAX_MONEY + 1));
    }
}
