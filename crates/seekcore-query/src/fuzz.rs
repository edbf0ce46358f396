//! Edit-distance based partial matching.

pub const MAX_SCORE: u32 = 100;

/// Best similarity (0..=100) between the shorter string and any equal-length window of
/// the longer one. A plain substring hit scores 100.
pub fn partial_ratio(needle: &str, haystack: &str) -> u32 {
    if needle.is_empty() || haystack.is_empty() {
        return if needle.is_empty() && haystack.is_empty() {
            MAX_SCORE
        } else {
            0
        };
    }
    if haystack.contains(needle) || needle.contains(haystack) {
        return MAX_SCORE;
    }

    let a: Vec<char> = needle.chars().collect();
    let b: Vec<char> = haystack.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    let mut best = 0;
    for window in long.windows(short.len()) {
        best = best.max(ratio(&short, window));
        if best == MAX_SCORE {
            break;
        }
    }
    best
}

/// Normalized indel similarity: `100 * 2 * lcs / (|a| + |b|)`, rounded.
pub fn ratio(a: &[char], b: &[char]) -> u32 {
    let total = a.len() + b.len();
    if total == 0 {
        return MAX_SCORE;
    }
    let lcs = lcs_len(a, b);
    let score = (200.0 * lcs as f64 / total as f64).round() as u32;
    score.min(MAX_SCORE)
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
