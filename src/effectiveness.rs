use serde::Serialize;

/// Attendance effectiveness as a percentage. Division is guarded: a point
/// that expects nobody reports 0% no matter how many showed up.
pub fn percentage(observed: u32, expected: u32) -> f64 {
    if expected > 0 {
        observed as f64 / expected as f64 * 100.0
    } else {
        0.0
    }
}

/// Aggregate effectiveness over a set of points. Sum-then-divide, so a point
/// expecting 10 people does not weigh as much as one expecting 1000.
pub fn aggregate(points: impl IntoIterator<Item = (u32, u32)>) -> f64 {
    let mut total_observed: u64 = 0;
    let mut total_expected: u64 = 0;
    for (observed, expected) in points {
        total_observed += observed as u64;
        total_expected += expected as u64;
    }
    if total_expected > 0 {
        total_observed as f64 / total_expected as f64 * 100.0
    } else {
        0.0
    }
}

/// Discretized effectiveness band used for marker and chart coloring.
/// `Unknown` is the never-populated state and is rendered distinctly from
/// `Critical` even though both can show 0%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    High,
    Medium,
    Low,
    Critical,
    Unknown,
}

/// Tier boundaries are inclusive at the lower end: 75.0 is High, 50.0 is
/// Medium, 25.0 is Low.
pub fn severity_tier(percentage: f64, has_any_data: bool) -> SeverityTier {
    if !has_any_data {
        SeverityTier::Unknown
    } else if percentage >= 75.0 {
        SeverityTier::High
    } else if percentage >= 50.0 {
        SeverityTier::Medium
    } else if percentage >= 25.0 {
        SeverityTier::Low
    } else {
        SeverityTier::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_guarded_against_zero_expected() {
        assert_eq!(percentage(10, 0), 0.0);
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(3, 4), 75.0);
        assert_eq!(percentage(150, 100), 150.0);
    }

    #[test]
    fn aggregate_is_sum_then_divide_not_mean_of_percentages() {
        // Per-point mean would be 50%; the aggregate must weigh by expected.
        let pts = vec![(10u32, 10u32), (0u32, 1000u32)];
        let agg = aggregate(pts);
        assert!((agg - 10.0 / 1010.0 * 100.0).abs() < 1e-9);

        // Equal weights: mean and aggregate coincide.
        let pts = vec![(10u32, 100u32), (90u32, 100u32)];
        assert_eq!(aggregate(pts), 50.0);
    }

    #[test]
    fn aggregate_of_empty_or_zero_expected_is_zero() {
        assert_eq!(aggregate(Vec::<(u32, u32)>::new()), 0.0);
        assert_eq!(aggregate(vec![(5, 0), (3, 0)]), 0.0);
    }

    #[test]
    fn tier_boundaries_are_inclusive_at_the_lower_end() {
        assert_eq!(severity_tier(75.0, true), SeverityTier::High);
        assert_eq!(severity_tier(74.9, true), SeverityTier::Medium);
        assert_eq!(severity_tier(50.0, true), SeverityTier::Medium);
        assert_eq!(severity_tier(49.9, true), SeverityTier::Low);
        assert_eq!(severity_tier(25.0, true), SeverityTier::Low);
        assert_eq!(severity_tier(24.9, true), SeverityTier::Critical);
        assert_eq!(severity_tier(0.0, true), SeverityTier::Critical);
    }

    #[test]
    fn never_populated_point_is_unknown_not_critical() {
        assert_eq!(severity_tier(percentage(0, 0), false), SeverityTier::Unknown);
        // Once either counter has been touched the point leaves Unknown.
        assert_eq!(severity_tier(percentage(0, 5), true), SeverityTier::Critical);
    }
}
