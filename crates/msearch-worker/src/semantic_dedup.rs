//! Semantic-duplicate detection for consecutive video scene descriptions.
//!
//! The original compares descriptions with `fuzz.token_set_ratio` (a
//! difflib-`SequenceMatcher` ratio over token sets). This crate has no
//! difflib equivalent in the pack's dependency stack, so the ratio is
//! approximated with normalized Levenshtein similarity over the same
//! token-set construction — close enough for the >85 threshold's purpose
//! (catching near-identical "static shot" scene runs), not a byte-exact
//! port of `fuzzywuzzy`'s algorithm.

use std::collections::BTreeSet;

pub const SEMANTIC_DEDUP_RATIO: u8 = 85;

fn tokens(s: &str) -> BTreeSet<String> {
    s.split_whitespace().map(|w| w.to_lowercase()).collect()
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(" ")
}

fn levenshtein_ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    let distance = strsim::levenshtein(a, b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100;
    }
    (((1.0 - distance as f64 / max_len as f64) * 100.0).max(0.0)) as u8
}

/// Token-set ratio between two descriptions, 0-100.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let t0 = tokens(a);
    let t1 = tokens(b);
    let intersection: BTreeSet<String> = t0.intersection(&t1).cloned().collect();
    let diff_0: BTreeSet<String> = t0.difference(&t1).cloned().collect();
    let diff_1: BTreeSet<String> = t1.difference(&t0).cloned().collect();

    let sorted_sect = join(&intersection);
    let combined_0: BTreeSet<String> = intersection.union(&diff_0).cloned().collect();
    let combined_1: BTreeSet<String> = intersection.union(&diff_1).cloned().collect();
    let combined_0 = join(&combined_0);
    let combined_1 = join(&combined_1);

    levenshtein_ratio(&sorted_sect, &combined_0)
        .max(levenshtein_ratio(&sorted_sect, &combined_1))
        .max(levenshtein_ratio(&combined_0, &combined_1))
}

/// Whether `current` should be flagged `semantic_duplicate` against the
/// last scene description actually written.
pub fn is_semantic_duplicate(last_written: Option<&str>, current: &str) -> bool {
    match last_written {
        Some(last) if !last.is_empty() && !current.is_empty() => {
            token_set_ratio(last, current) > SEMANTIC_DEDUP_RATIO
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_descriptions_are_duplicates() {
        assert!(is_semantic_duplicate(Some("a red car on a street"), "a red car on a street"));
    }

    #[test]
    fn unrelated_descriptions_are_not_duplicates() {
        assert!(!is_semantic_duplicate(Some("a red car on a street"), "a cat sleeping on a sofa"));
    }

    #[test]
    fn no_prior_description_is_never_a_duplicate() {
        assert!(!is_semantic_duplicate(None, "a red car on a street"));
    }

    #[test]
    fn token_set_ratio_ignores_word_order() {
        let ratio = token_set_ratio("red car street", "street car red");
        assert_eq!(ratio, 100);
    }
}
