//! Word-alignment similarity between normalized texts.
//!
//! `MinHash` estimates shingle overlap, which drops about as fast for a page
//! with a misread letter in every few words as for a form letter with a
//! different name, address and subject. Candidates found through the band
//! index are therefore verified here, on the stored normalized text.
//!
//! Both texts are split into words and diffed. Matching words count as
//! aligned. A short replaced span also counts as aligned when it reads as a
//! misrecognition of the other side, judged by normalized edit similarity.
//! The score is the Jaccard overlap of aligned characters:
//!
//! ```text
//! aligned / (chars(a) + chars(b) - aligned)
//! ```
//!
//! Word characters are counted without separators.

use similar::{Algorithm, DiffTag, capture_diff_slices};
use std::ops::Range;

/// Edit similarity at which a replaced span counts as a misreading.
pub const MISREAD_SIMILARITY: f64 = 0.6;

/// Longest replaced span, in words per side, that can count as a misreading.
pub const MAX_MISREAD_SPAN: usize = 8;

/// Aligned-character Jaccard similarity of two normalized texts, in `[0, 1]`.
///
/// Symmetric. Two empty texts score 1.0; an empty text against a non-empty
/// one scores 0.0.
///
/// # Example
///
/// ```rust
/// use docanon::services::deduplication::aligned_similarity;
///
/// let clean = "the committee approved the revised budget";
/// let scanned = "tbe cornmittee approved the revlsed budget";
/// let edited = "the council rejected the revised budget";
///
/// assert!(aligned_similarity(clean, scanned) > 0.95);
/// assert!(aligned_similarity(clean, edited) < 0.75);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aligned_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = if a <= b { (a, b) } else { (b, a) };
    let old: Vec<&str> = a.split_whitespace().collect();
    let new: Vec<&str> = b.split_whitespace().collect();
    match (old.is_empty(), new.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        (false, false) => {},
    }

    let mut aligned = 0;
    let mut pending: Option<(Range<usize>, Range<usize>)> = None;
    for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            if let Some((o, n)) = pending.take() {
                aligned += misread_credit(&old[o], &new[n]);
            }
            aligned += char_count(&old[old_range]);
            continue;
        }
        // adjacent deletes and inserts form one replaced span
        pending = Some(match pending {
            Some((o, n)) => (
                o.start.min(old_range.start)..o.end.max(old_range.end),
                n.start.min(new_range.start)..n.end.max(new_range.end),
            ),
            None => (old_range, new_range),
        });
    }
    if let Some((o, n)) = pending {
        aligned += misread_credit(&old[o], &new[n]);
    }

    let union = char_count(&old) + char_count(&new) - aligned;
    aligned as f64 / union as f64
}

/// Upper bound of [`aligned_similarity`] from lengths alone.
///
/// Lets callers skip the diff for pairs that cannot reach a threshold.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn similarity_bound(a: &str, b: &str) -> f64 {
    let count = |text: &str| text.chars().filter(|c| !c.is_whitespace()).count();
    let (x, y) = (count(a), count(b));
    if x.max(y) == 0 {
        return 1.0;
    }
    x.min(y) as f64 / x.max(y) as f64
}

/// Characters credited to a replaced span: the shorter side when the span
/// is short and reads as a misrecognition of the other, else nothing.
fn misread_credit(old: &[&str], new: &[&str]) -> usize {
    if old.is_empty()
        || new.is_empty()
        || old.len() > MAX_MISREAD_SPAN
        || new.len() > MAX_MISREAD_SPAN
    {
        return 0;
    }
    let similarity = strsim::normalized_levenshtein(&old.join(" "), &new.join(" "));
    if similarity >= MISREAD_SIMILARITY {
        char_count(old).min(char_count(new))
    } else {
        0
    }
}

fn char_count(words: &[&str]) -> usize {
    words.iter().map(|w| w.chars().count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const LETTER_A: &str = "dear ms whitfield this office received your request of march 2 2023 \
        for records concerning dredging contracts for the harbor your request has been placed \
        in the complex processing track sincerely foia officer";
    const LETTER_B: &str = "dear mr okafor this office received your request of march 9 2023 \
        for records concerning water permits for the county your request has been placed \
        in the complex processing track sincerely foia officer";

    #[test_case("", "", 1.0; "both empty")]
    #[test_case("", "memo", 0.0; "one empty")]
    #[test_case("travel memo", "travel memo", 1.0; "identical")]
    fn test_edge_cases(a: &str, b: &str, expected: f64) {
        assert!((aligned_similarity(a, b) - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_symmetric() {
        let scanned = "dear ms whitfie1d this offlce recieved your request";
        assert!(
            (aligned_similarity(LETTER_A, scanned) - aligned_similarity(scanned, LETTER_A)).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn test_misread_letters_cost_little() {
        let scanned = LETTER_A
            .replace("whitfield", "whitfie1d")
            .replace("received", "recieved")
            .replace("complex", "cornplex")
            .replace("processing", "proc essing");
        assert!(aligned_similarity(LETTER_A, &scanned) > 0.97);
    }

    #[test]
    fn test_replaced_details_count_fully() {
        let score = aligned_similarity(LETTER_A, LETTER_B);
        assert!(score < 0.8, "template letters scored {score}");
    }

    #[test]
    fn test_misread_credit() {
        assert_eq!(
            misread_credit(&["a"; MAX_MISREAD_SPAN + 1], &["a"; MAX_MISREAD_SPAN + 1]),
            0
        );
        assert_eq!(misread_credit(&["records"], &["recordz"]), 7);
        assert_eq!(misread_credit(&["harbor"], &["county"]), 0);
    }

    #[test]
    fn test_similarity_bound_is_an_upper_bound() {
        let short = "dear ms whitfield";
        assert!(similarity_bound(short, LETTER_A) >= aligned_similarity(short, LETTER_A));
        assert!((similarity_bound("", "") - 1.0).abs() < f64::EPSILON);
        assert!(similarity_bound("abc", "abcdef") <= 0.5);
    }
}
