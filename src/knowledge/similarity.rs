//! Token-set similarity used for knowledge consistency.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

/// Lowercased, NFKC-normalized whitespace tokens of `text`.
///
/// Punctuation glued to a word stays part of the token.
pub fn token_set(text: &str) -> HashSet<String> {
    text.nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Jaccard index `|a ∩ b| / |a ∪ b|`; 0.0 if either side is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_is_one() {
        let a = token_set("Solid state batteries improve range");
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn disjoint_text_is_zero() {
        let a = token_set("alpha beta");
        let b = token_set("gamma delta");
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn partial_overlap() {
        let a = token_set("the market grows fast");
        let b = token_set("The market shrinks");
        // {the, market} / {the, market, grows, fast, shrinks}
        assert!((jaccard(&a, &b) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn order_independent_and_symmetric() {
        let a = token_set("one two three");
        let b = token_set("three one four");
        assert_eq!(jaccard(&a, &b), jaccard(&b, &a));
        assert_eq!(token_set("b a"), token_set("a b"));
    }

    #[test]
    fn empty_side_is_zero() {
        let a = token_set("");
        let b = token_set("word");
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn compatibility_forms_normalize() {
        // Fullwidth letters fold to ASCII under NFKC.
        assert_eq!(token_set("ＡＢＣ"), token_set("abc"));
    }
}
