//! Deterministic rollout bucketing.
//!
//! The bucketing scheme is a compatibility contract: the first four bytes of the
//! md5 digest of `flag key + salt + bucketing attribute value` are read as a
//! little-endian signed 32-bit integer `m`, and `abs(m / i32::MIN)` maps the user
//! into the `0..10_000` bucket space. The flag key salts the hash, so the same
//! user buckets independently per flag.

use crate::model::flag::WeightedVariation;

pub(crate) const BUCKETS: u32 = 10_000;

pub(crate) fn ratio(key: &str) -> f64 {
    let digest = md5::compute(key.as_bytes());
    let magic = i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (magic as f64 / i32::MIN as f64).abs()
}

pub(crate) fn bucket(key: &str) -> u32 {
    ((ratio(key) * BUCKETS as f64) as u32).min(BUCKETS - 1)
}

/// Selects the variation whose cumulative weight range contains `bucket`.
/// Weights are normalized proportionally; returns the variation index and its
/// normalized weight fraction, or `None` when the weights do not sum to a
/// positive value.
pub(crate) fn select_weighted(
    variations: &[WeightedVariation],
    bucket: u32,
) -> Option<(usize, f64)> {
    let total: f64 = variations.iter().map(|wv| wv.weight.max(0.0)).sum();
    if total <= 0.0 {
        return None;
    }
    let mut cumulative = 0.0;
    for wv in variations {
        let weight = wv.weight.max(0.0);
        cumulative += weight;
        let limit = (cumulative / total * BUCKETS as f64).round() as u32;
        if bucket < limit {
            return Some((wv.variation, weight / total));
        }
    }
    variations
        .last()
        .map(|wv| (wv.variation, wv.weight.max(0.0) / total))
}

#[cfg(test)]
mod bucketing_tests {
    use super::{bucket, select_weighted, BUCKETS};
    use crate::model::flag::WeightedVariation;

    #[test]
    fn bucketing_is_deterministic_and_bounded() {
        for i in 0..1000 {
            let key = format!("discount-u{i}");
            let first = bucket(&key);
            assert_eq!(first, bucket(&key));
            assert!(first < BUCKETS);
        }
    }

    #[test]
    fn buckets_are_independent_per_flag() {
        let mut diverged = 0;
        for i in 0..1000 {
            if bucket(&format!("flag-a-u{i}")) != bucket(&format!("flag-b-u{i}")) {
                diverged += 1;
            }
        }
        assert!(diverged > 900);
    }

    #[test]
    fn even_split_is_roughly_balanced() {
        let distribution = vec![
            WeightedVariation { variation: 0, weight: 50.0 },
            WeightedVariation { variation: 1, weight: 50.0 },
        ];
        let mut first = 0;
        let total = 10_000;
        for i in 0..total {
            let (variation, fraction) = select_weighted(&distribution, bucket(&format!("discount-u{i}"))).unwrap();
            assert_eq!(fraction, 0.5);
            if variation == 0 {
                first += 1;
            }
        }
        // tolerance band per the distribution contract
        assert!(first > total * 45 / 100, "unbalanced split: {first}/{total}");
        assert!(first < total * 55 / 100, "unbalanced split: {first}/{total}");
    }

    #[test]
    fn weights_are_normalized() {
        let distribution = vec![
            WeightedVariation { variation: 0, weight: 1.0 },
            WeightedVariation { variation: 1, weight: 3.0 },
        ];
        let mut second = 0;
        for i in 0..10_000 {
            let (variation, _) = select_weighted(&distribution, bucket(&format!("ratio-u{i}"))).unwrap();
            if variation == 1 {
                second += 1;
            }
        }
        assert!(second > 7_000, "expected ~75% share, got {second}");
        assert!(second < 8_000, "expected ~75% share, got {second}");
    }

    #[test]
    fn degenerate_weights_select_nothing() {
        assert!(select_weighted(&[], 0).is_none());
        let zeroed = vec![WeightedVariation { variation: 0, weight: 0.0 }];
        assert!(select_weighted(&zeroed, 0).is_none());
    }
}
