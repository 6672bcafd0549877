// src/vision/fuzzy.rs
// module: vision | role: fuzzy text similarity
// summary: Ratcliff-Obershelp similarity (the same algorithm behind Python's
// `difflib.SequenceMatcher.ratio`), used to score OCR candidates against a
// target label (SPEC_FULL.md §4.2 Texted path). Grounded on
// original_source/backend/tools/texted_icon_detection.py, which scores OCR
// candidates with `difflib.SequenceMatcher(None, a, b).ratio()`; no crate in
// the reference stack implements this, so it is owned directly.

/// Ratio in `[0.0, 1.0]`: `2 * M / T` where `M` is the total length of all
/// matching blocks found by the Ratcliff-Obershelp algorithm and `T` is the
/// combined length of both strings.
pub fn ratcliff_obershelp_similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    let total = a_chars.len() + b_chars.len();
    if total == 0 {
        return 1.0;
    }

    let matches = matching_length(&a_chars, &b_chars);
    (2.0 * matches as f64) / total as f64
}

fn matching_length(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (i, j, size) = longest_match(a, b);
    if size == 0 {
        return 0;
    }

    matching_length(&a[..i], &b[..j]) + size + matching_length(&a[i + size..], &b[j + size..])
}

/// Finds the longest common contiguous substring's start indices and length.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0usize, 0usize, 0usize);

    // `prev[j]` = length of the matching run ending at `b[j-1]` for the
    // previous row of `a`. Standard O(len(a)*len(b)) DP, adequate for the
    // short strings (icon labels) this is scoring.
    let mut prev = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        let mut curr = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                let run = prev[j] + 1;
                curr[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        prev = curr;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert!((ratcliff_obershelp_similarity("settings", "settings") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn completely_different_strings_score_low() {
        assert!(ratcliff_obershelp_similarity("settings", "zzzzzzzz") < 0.2);
    }

    #[test]
    fn near_miss_ocr_text_scores_above_threshold() {
        // "Settngs" is a plausible OCR misread of "Settings".
        let score = ratcliff_obershelp_similarity("settings", "settngs");
        assert!(score >= 0.85, "score was {score}");
    }

    #[test]
    fn empty_strings_are_identical() {
        assert_eq!(ratcliff_obershelp_similarity("", ""), 1.0);
    }
}
