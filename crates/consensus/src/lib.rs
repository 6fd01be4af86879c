//! Consensus parameters shared across the node: chain constants, monetary
//! bounds, and the fork activation schedule.

pub mod constants;
pub mod money;
pub mod upgrades;

pub use constants::{
    submission_window_length, EPOCH_NULL, QUALITY_NULL, SC_COIN_MATURITY,
    SC_MAX_WITHDRAWAL_EPOCH_LENGTH, SC_MIN_SUBMISSION_WINDOW_LENGTH,
    SC_MIN_WITHDRAWAL_EPOCH_LENGTH, SC_SUBMISSION_WINDOW_DIVISOR,
};
pub use money::{money_range, COIN, MAX_MONEY};
pub use upgrades::{ForkRules, ForkSchedule};

/// 32-byte hash, stored in the byte order it travels on the wire.
pub type Hash256 = [u8; 32];

/// Lowercase hex rendering, mainly for log lines.
pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_rendering() {
        let mut hash = [0u8; 32];
        hash[0] = 0xab;
        hash[31] = 0x01;
        let hex = hash256_to_hex(&hash);
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab"));
        assert!(hex.ends_with("01"));
    }
}
