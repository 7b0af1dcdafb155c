/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `part / total`, or 0.0 when `total` is zero.
pub fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Rounds to one decimal place, ties to even.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), 3.0);
    }

    #[test]
    fn test_ratio_with_zero_total() {
        assert_eq!(ratio(3, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(72.3456), 72.3);
        assert_eq!(round1(72.36), 72.4);
        assert_eq!(round1(0.25), 0.2);
        assert_eq!(round1(-3.04), -3.0);
        assert_eq!(round1(100.0), 100.0);
    }
}
