//! Hashed bag-of-terms sparse embedding.
//!
//! Tokens are lowercased with punctuation stripped; letters of any script
//! are kept, so Hangul and CJK terms survive. Single-character and purely
//! numeric tokens are dropped. The `top_n` most frequent tokens get weight
//! `1 + ln(tf)` and are hashed into a fixed bucket space. Colliding tokens
//! share a bucket and their weights add up.

use std::collections::HashMap;
use tenantrag_core::{stable_u32, SparseVector};

/// Default number of buckets (2^18).
pub const DEFAULT_BUCKETS: u32 = 1 << 18;

/// Sparse encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseEncoder {
    /// Most frequent tokens kept per text
    pub top_n: usize,

    /// Bucket space size
    pub buckets: u32,
}

impl Default for SparseEncoder {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Split `text` into normalised tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalised: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();

    normalised
        .split_whitespace()
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !t.chars().all(char::is_numeric))
        .map(str::to_string)
        .collect()
}

impl SparseEncoder {
    /// Encoder keeping `top_n` tokens per text.
    pub fn new(top_n: usize) -> Self {
        Self {
            top_n,
            buckets: DEFAULT_BUCKETS,
        }
    }

    /// Bucket index of `token`.
    pub fn bucket(&self, token: &str) -> u32 {
        stable_u32(token) % self.buckets.max(1)
    }

    /// Encode `text`. Empty or all-filtered text yields an empty vector.
    pub fn encode(&self, text: &str) -> SparseVector {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_default() += 1;
        }

        let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.top_n);

        SparseVector::new(
            ranked
                .into_iter()
                .map(|(token, tf)| (self.bucket(&token), 1.0 + (tf as f32).ln()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantrag_core::sparse_dot;

    #[test]
    fn test_tokenize_rules() {
        let tokens = tokenize("Hello, WORLD! a 2024 수수료 환수 x1 42kg");
        assert_eq!(tokens, vec!["hello", "world", "수수료", "환수", "x1", "42kg"]);
    }

    #[test]
    fn test_encode_log_weights() {
        let enc = SparseEncoder::default();
        let v = enc.encode("commission commission commission bonus");
        assert_eq!(v.indices.len(), 2);

        let commission = enc.bucket("commission");
        let pos = v.indices.iter().position(|i| *i == commission).unwrap();
        assert!((v.values[pos] - (1.0 + 3f32.ln())).abs() < 1e-6);
    }

    #[test]
    fn test_encode_is_deterministic_and_sorted() {
        let enc = SparseEncoder::default();
        let a = enc.encode("정착지원금 지급 기준 지급");
        let b = enc.encode("정착지원금 지급 기준 지급");
        assert_eq!(a, b);
        assert!(a.indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_top_n_keeps_most_frequent() {
        let enc = SparseEncoder::new(1);
        let v = enc.encode("alpha beta beta");
        assert_eq!(v.indices, vec![enc.bucket("beta")]);
    }

    #[test]
    fn test_collisions_degrade_gracefully() {
        let enc = SparseEncoder {
            top_n: 100,
            buckets: 1,
        };
        let v = enc.encode("alpha beta");
        assert_eq!(v.indices, vec![0]);
        assert!((v.values[0] - 2.0).abs() < 1e-6);
        assert!(sparse_dot(&v, &enc.encode("gamma")) > 0.0);
    }

    #[test]
    fn test_empty_text() {
        let enc = SparseEncoder::default();
        assert!(enc.encode("").is_empty());
        assert!(enc.encode("! 1 2 3 ?").is_empty());
    }
}
