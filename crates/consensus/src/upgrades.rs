//! Fork activation as an ordered table of `(activation_height, ruleset)` rows.
//!
//! Each row describes the full ruleset in force from its activation height up to
//! the next row. Lookups walk the table instead of dispatching through a chain
//! of overriding fork objects.

/// The ruleset in force for a height range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ForkRules {
    /// Sidechain creations, transfers and certificates are accepted.
    pub sidechains_active: bool,
    /// Ceased sidechain withdrawals are accepted.
    pub ceased_withdrawals_active: bool,
    /// Highest sidechain creation version accepted.
    pub max_sidechain_version: u8,
}

/// Ordered fork table; rows are sorted by activation height, first row at 0.
#[derive(Clone, Debug)]
pub struct ForkSchedule {
    rows: Vec<(i32, ForkRules)>,
}

impl ForkSchedule {
    /// Build a schedule from `(activation_height, ruleset)` rows.
    ///
    /// Rows must start at height 0 and be strictly ordered by height.
    pub fn new(rows: Vec<(i32, ForkRules)>) -> Self {
        assert!(
            rows.first().is_some_and(|(height, _)| *height == 0),
            "fork schedule must cover height 0"
        );
        assert!(
            rows.windows(2).all(|pair| pair[0].0 < pair[1].0),
            "fork schedule rows must be strictly ordered by height"
        );
        Self { rows }
    }

    pub fn mainnet() -> Self {
        Self::new(vec![
            (
                0,
                ForkRules {
                    sidechains_active: false,
                    ceased_withdrawals_active: false,
                    max_sidechain_version: 0,
                },
            ),
            (
                1_047_624,
                ForkRules {
                    sidechains_active: true,
                    ceased_withdrawals_active: true,
                    max_sidechain_version: 0,
                },
            ),
            (
                1_363_115,
                ForkRules {
                    sidechains_active: true,
                    ceased_withdrawals_active: true,
                    max_sidechain_version: 2,
                },
            ),
        ])
    }

    /// Single-row schedule with everything active, for tests and tools.
    pub fn all_active() -> Self {
        Self::new(vec![(
            0,
            ForkRules {
                sidechains_active: true,
                ceased_withdrawals_active: true,
                max_sidechain_version: 2,
            },
        )])
    }

    /// The ruleset in force at `height`.
    pub fn rules_at(&self, height: i32) -> &ForkRules {
        let index = self
            .rows
            .partition_point(|(activation, _)| *activation <= height);
        &self.rows[index.saturating_sub(1)].1
    }

    pub fn sidechains_active(&self, height: i32) -> bool {
        self.rules_at(height).sidechains_active
    }

    pub fn ceased_withdrawals_active(&self, height: i32) -> bool {
        self.rules_at(height).ceased_withdrawals_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_follow_activation_heights() {
        let schedule = ForkSchedule::mainnet();
        assert!(!schedule.sidechains_active(0));
        assert!(!schedule.sidechains_active(1_047_623));
        assert!(schedule.sidechains_active(1_047_624));
        assert_eq!(schedule.rules_at(1_363_114).max_sidechain_version, 0);
        assert_eq!(schedule.rules_at(1_363_115).max_sidechain_version, 2);
        assert_eq!(schedule.rules_at(i32::MAX).max_sidechain_version, 2);
    }

    #[test]
    #[should_panic(expected = "must cover height 0")]
    fn schedule_requires_genesis_row() {
        ForkSchedule::new(vec![(
            10,
            ForkRules {
                sidechains_active: true,
                ceased_withdrawals_active: true,
                max_sidechain_version: 0,
            },
        )]);
    }
}
