//! Weight Target Calculator
//!
//! Equal-weight targets over a set of scaled (18 decimal) vault balances.
//! Everything here is pure and recomputed whenever the asset set or the
//! balances change.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use musd_common::{
    check,
    constants::precision::BPS_DENOMINATOR,
    errors::{MusdError, MusdResult},
    math::{checked_sum, mul_div, to_signed},
};

/// Equal-weight target and the signed distance of each balance from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct WeightTargets {
    /// sum(balances) / N
    pub target: u128,
    /// target - balance, per asset in input order
    pub diffs: Vec<i128>,
}

impl WeightTargets {
    /// Indices of assets holding more than the target
    pub fn overweight(&self) -> Vec<usize> {
        self.diffs.iter().enumerate().filter(|(_, d)| **d < 0).map(|(i, _)| i).collect()
    }

    /// Indices of assets holding less than the target
    pub fn underweight(&self) -> Vec<usize> {
        self.diffs.iter().enumerate().filter(|(_, d)| **d > 0).map(|(i, _)| i).collect()
    }
}

/// sum(balances) / N, rounding down
pub fn equal_weight_target(balances: &[u128]) -> MusdResult<u128> {
    check!(!balances.is_empty(), MusdError::InvalidInput { param: "balances", reason: "empty basket" });
    Ok(checked_sum(balances)? / balances.len() as u128)
}

/// target - balance for every asset
pub fn target_distances(balances: &[u128], target: u128) -> MusdResult<Vec<i128>> {
    let target = to_signed(target)?;
    balances
        .iter()
        .map(|&b| target.checked_sub(to_signed(b)?).ok_or(MusdError::Overflow))
        .collect()
}

/// Target and per-asset distances in one pass
pub fn compute_targets(balances: &[u128]) -> MusdResult<WeightTargets> {
    let target = equal_weight_target(balances)?;
    Ok(WeightTargets { target, diffs: target_distances(balances, target)? })
}

/// Weight of each asset in bps of the total, rounding down
pub fn weights_bps(balances: &[u128]) -> MusdResult<Vec<u128>> {
    let total = checked_sum(balances)?;
    check!(total > 0, MusdError::InvalidInput { param: "balances", reason: "zero total" });
    balances.iter().map(|&b| mul_div(b, BPS_DENOMINATOR, total)).collect()
}

/// Turn two overweight amounts into a bps split summing to exactly 10000.
/// The rounding remainder goes to the second share.
pub fn overweight_splits(first: u128, second: u128) -> MusdResult<[u16; 2]> {
    let total = first.checked_add(second).ok_or(MusdError::Overflow)?;
    check!(total > 0, MusdError::InvalidInput { param: "overweight", reason: "zero total" });

    let first_bps = mul_div(first, BPS_DENOMINATOR, total)? as u16;
    Ok([first_bps, BPS_DENOMINATOR as u16 - first_bps])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ONE: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn test_four_full_one_empty() {
        let balances = [25 * ONE, 25 * ONE, 25 * ONE, 25 * ONE, 0];
        let targets = compute_targets(&balances).unwrap();

        assert_eq!(targets.target, 20 * ONE);
        assert_eq!(targets.diffs[0], -5 * ONE as i128);
        assert_eq!(targets.diffs[4], 20 * ONE as i128);
        assert_eq!(targets.overweight(), vec![0, 1, 2, 3]);
        assert_eq!(targets.underweight(), vec![4]);
    }

    #[test]
    fn test_empty_basket_rejected() {
        assert!(matches!(compute_targets(&[]), Err(MusdError::InvalidInput { .. })));
        assert!(matches!(weights_bps(&[0, 0]), Err(MusdError::InvalidInput { .. })));
    }

    #[test]
    fn test_weights_bps() {
        // 0%, 0.42%, 44.94%, 54.63% style basket
        let balances = [0, 42 * ONE, 4_494 * ONE, 5_464 * ONE];
        let weights = weights_bps(&balances).unwrap();
        assert_eq!(weights, vec![0, 42, 4_494, 5_464]);
    }

    #[test]
    fn test_overweight_splits() {
        assert_eq!(overweight_splits(700, 300).unwrap(), [7_000, 3_000]);
        assert_eq!(overweight_splits(1, 2).unwrap(), [3_333, 6_667]);
        assert_eq!(overweight_splits(0, 5).unwrap(), [0, 10_000]);
        assert!(overweight_splits(0, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_splits_always_sum_to_10000(a in 0u128..1_000_000_000 * ONE, b in 1u128..1_000_000_000 * ONE) {
            let [x, y] = overweight_splits(a, b).unwrap();
            prop_assert_eq!(u32::from(x) + u32::from(y), 10_000);
        }

        #[test]
        fn prop_distances_sum_near_zero(balances in proptest::collection::vec(0u128..1_000_000_000 * ONE, 1..10)) {
            let targets = compute_targets(&balances).unwrap();
            let sum: i128 = targets.diffs.iter().sum();
            // Only the rounding of the target is left over
            prop_assert!(sum <= 0);
            prop_assert!(-sum < balances.len() as i128);
        }
    }
}
