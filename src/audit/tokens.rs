//! Character-count token estimate.
//!
//! Not a tokenizer: a deterministic proxy that divides the number of
//! characters (Unicode scalar values, not bytes) of the trimmed text by a
//! fixed ratio and truncates.

/// Characters per token used by the default estimator.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimate(&self, text: &str) -> usize {
        let chars = text.trim().chars().count();
        (chars as f64 / self.chars_per_token) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        let estimator = TokenEstimator::new();
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("   \n\t"), 0);
    }

    #[test]
    fn test_truncates_toward_zero() {
        let estimator = TokenEstimator::new();
        assert_eq!(estimator.estimate("abc"), 0);
        assert_eq!(estimator.estimate("abcd"), 1);
        assert_eq!(estimator.estimate("0123456789"), 2);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let estimator = TokenEstimator::new();
        // 8 characters, 24 bytes
        assert_eq!(estimator.estimate("日本語のテキスト"), 2);
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let estimator = TokenEstimator::new();
        assert_eq!(estimator.estimate("  abcdefgh  "), estimator.estimate("abcdefgh"));
    }

    #[test]
    fn test_deterministic_and_monotonic() {
        let estimator = TokenEstimator::new();
        let text = "Search OpenStreetMap for places near a coordinate";
        let first = estimator.estimate(text);
        for _ in 0..10 {
            assert_eq!(estimator.estimate(text), first);
        }
        let mut previous = 0;
        for n in 0..64 {
            let current = estimator.estimate(&"x".repeat(n));
            assert!(current >= previous);
            previous = current;
        }
    }
}
