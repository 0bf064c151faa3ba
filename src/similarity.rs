//! Text similarity primitives for linking and in-process vector search
//!
//! Embeddings here are deterministic hash projections of token streams.
//! The fabric treats real embedding models as an upstream concern; the
//! hash projection keeps search self-contained and fully offline while
//! preserving cosine geometry for overlapping vocabulary.

use ordered_float::OrderedFloat;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Dimension of the hash-projected embedding space
pub const EMBEDDING_DIM: usize = 256;

/// Project text into a normalized hash embedding
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut embedding = vec![0.0f32; EMBEDDING_DIM];

    for token in tokenize(text) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();

        // Spread each token over a handful of buckets with signed weights
        for probe in 0..4u64 {
            let mixed = h.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(probe as u32 * 16);
            let index = (mixed % EMBEDDING_DIM as u64) as usize;
            let sign = if (mixed >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            embedding[index] += sign;
        }
    }

    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut embedding {
            *val /= norm;
        }
    }

    embedding
}

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Normalized similarity between two texts in [0, 1]
///
/// Blends embedding cosine with token-set overlap so short paraphrases
/// score high while unrelated sentences with shared stopwords do not.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    let tokens_a: Vec<String> = tokenize(a).collect();
    let tokens_b: Vec<String> = tokenize(b).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let set_a: std::collections::HashSet<&str> =
        tokens_a.iter().map(|s| s.as_str()).collect();
    let set_b: std::collections::HashSet<&str> =
        tokens_b.iter().map(|s| s.as_str()).collect();
    let intersection = set_a.intersection(&set_b).count() as f32;
    let union = set_a.union(&set_b).count() as f32;
    let jaccard = if union > 0.0 { intersection / union } else { 0.0 };

    let cosine = cosine_similarity(&hash_embedding(a), &hash_embedding(b)).max(0.0);

    (0.5 * cosine + 0.5 * jaccard).clamp(0.0, 1.0)
}

/// Find top-k most similar vectors
pub fn top_k_similar<T>(query: &[f32], candidates: &[(Vec<f32>, T)], k: usize) -> Vec<(f32, T)>
where
    T: Clone,
{
    let mut scored: Vec<(OrderedFloat<f32>, T)> = candidates
        .iter()
        .map(|(vec, item)| {
            let score = cosine_similarity(query, vec);
            (OrderedFloat(score), item.clone())
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .take(k)
        .map(|(score, item)| (score.0, item))
        .collect()
}

/// Lowercased alphanumeric tokens
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_hash_embedding_is_normalized() {
        let emb = hash_embedding("the quick brown fox");
        assert_eq!(emb.len(), EMBEDDING_DIM);
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_identical_text_scores_one() {
        let s = text_similarity("I love hiking in the mountains", "I love hiking in the mountains");
        assert!(s > 0.99);
    }

    #[test]
    fn test_unrelated_text_scores_low() {
        let s = text_similarity(
            "the deployment pipeline failed on stage three",
            "my cat enjoys sleeping near the window",
        );
        assert!(s < 0.3);
    }

    #[test]
    fn test_paraphrase_beats_unrelated() {
        let para = text_similarity("I got a new job offer", "I just got the job offer");
        let unrelated = text_similarity("I got a new job offer", "dinner was pasta tonight");
        assert!(para > unrelated);
    }

    #[test]
    fn test_top_k_orders_by_score() {
        let query = hash_embedding("rust memory system");
        let candidates = vec![
            (hash_embedding("rust memory system"), "exact"),
            (hash_embedding("cooking pasta recipes"), "far"),
            (hash_embedding("memory system in rust"), "near"),
        ];
        let top = top_k_similar(&query, &candidates, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].1, "exact");
    }
}
