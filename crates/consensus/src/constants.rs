//! Consensus-wide constants shared across validation.

/// Number of blocks before a sidechain creation or forward transfer amount
/// becomes part of the sidechain balance (network rule).
pub const SC_COIN_MATURITY: i32 = 2;
/// The minimum allowed withdrawal epoch length for a new sidechain (network rule).
pub const SC_MIN_WITHDRAWAL_EPOCH_LENGTH: i32 = 2;
/// The maximum allowed withdrawal epoch length for a new sidechain (network rule).
pub const SC_MAX_WITHDRAWAL_EPOCH_LENGTH: i32 = 4032;
/// Divisor applied to the epoch length to size the certificate submission window.
pub const SC_SUBMISSION_WINDOW_DIVISOR: i32 = 5;
/// Lower bound on the certificate submission window length, in blocks.
pub const SC_MIN_SUBMISSION_WINDOW_LENGTH: i32 = 2;

/// Sentinel for "no certificate epoch referenced yet".
pub const EPOCH_NULL: i32 = -1;
/// Sentinel quality for "no certificate accepted yet".
pub const QUALITY_NULL: i64 = -1;

/// Submission window length for a given withdrawal epoch length.
pub fn submission_window_length(epoch_length: i32) -> i32 {
    (epoch_length / SC_SUBMISSION_WINDOW_DIVISOR).max(SC_MIN_SUBMISSION_WINDOW_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_window_has_floor() {
        assert_eq!(submission_window_length(2), 2);
        assert_eq!(submission_window_length(10), 2);
        assert_eq!(submission_window_length(100), 20);
        assert_eq!(submission_window_length(SC_MAX_WITHDRAWAL_EPOCH_LENGTH), 806);
    }
}
