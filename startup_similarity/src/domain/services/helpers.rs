use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::entities::index_entry::ScoredEntry;

const EPSILON: f32 = 1e-6;

/// Splits a text into lowercase alphanumeric words.
///
/// Punctuation, symbols and whitespace are separators, so "B2B-SaaS!" gives `["b2b", "saas"]`.
pub fn tokenize(content: &str) -> Vec<String> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid token regex"));
    RE.find_iter(&content.to_lowercase())
        .map(|token| token.as_str().to_string())
        .collect()
}

/// Replaces non-breaking spaces and drops a leading byte order mark, then trims
pub fn clean_text(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

/// Scales `vector` to unit length. Near-zero vectors are left untouched.
pub fn normalize_vector(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > EPSILON {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Cosine of the angle between `a` and `b`, clamped to [-1, 1].
///
/// Returns `None` on a length mismatch, and 0 when one of the vectors is (near) zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let (dot, mag_a, mag_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, mag_a, mag_b), (x, y)| {
            (dot + x * y, mag_a + x * x, mag_b + y * y)
        });

    let denominator = (mag_a * mag_b).sqrt();
    if denominator < EPSILON {
        Some(0.0)
    } else {
        Some((dot / denominator).clamp(-1.0, 1.0))
    }
}

/// Orders hits by descending score, equal scores by ascending id, and keeps the first `top_k`
pub fn rank_scored_entries(mut entries: Vec<ScoredEntry>, top_k: usize) -> Vec<ScoredEntry> {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    entries.truncate(top_k);
    entries
}
