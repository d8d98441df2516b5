use shared::ConfidenceLevel;

pub const HIGH_CONFIDENCE_ABOVE: f64 = 0.8;
pub const MEDIUM_CONFIDENCE_ABOVE: f64 = 0.5;

/// Buckets a confidence score into a coarse level.
///
/// `score` must already lie in `[0.0, 1.0]`; callers validate backend output before
/// classifying, so anything else is a bug and is asserted in debug builds.
pub fn classify(score: f64) -> ConfidenceLevel {
    debug_assert!(
        (0.0..=1.0).contains(&score),
        "confidence score {} outside [0, 1]",
        score
    );
    if score > HIGH_CONFIDENCE_ABOVE {
        ConfidenceLevel::High
    } else if score > MEDIUM_CONFIDENCE_ABOVE {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries() {
        assert_eq!(classify(0.8), ConfidenceLevel::Medium);
        assert_eq!(classify(0.81), ConfidenceLevel::High);
        assert_eq!(classify(0.5), ConfidenceLevel::Low);
        assert_eq!(classify(0.51), ConfidenceLevel::Medium);
        assert_eq!(classify(0.0), ConfidenceLevel::Low);
        assert_eq!(classify(1.0), ConfidenceLevel::High);
    }

    #[test]
    fn monotonic_with_three_contiguous_ranges() {
        let levels: Vec<ConfidenceLevel> = (0..=1000).map(|i| classify(i as f64 / 1000.0)).collect();
        assert!(levels.windows(2).all(|w| w[0] <= w[1]));

        let mut distinct = levels.clone();
        distinct.dedup();
        assert_eq!(
            distinct,
            vec![ConfidenceLevel::Low, ConfidenceLevel::Medium, ConfidenceLevel::High]
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "outside [0, 1]")]
    fn out_of_range_score_is_a_contract_violation() {
        classify(1.2);
    }
}
