//! Text canonicalization for trigger comparison.

use unicode_normalization::UnicodeNormalization;

/// Trim and compose: NFKC folds decomposed accents and full-width forms.
pub fn normalize(input: Option<&str>) -> String {
    let Some(text) = input else {
        return String::new();
    };
    let composed: String = text.nfkc().collect();
    composed.trim().to_string()
}

const CANONICAL_ROUNDS: usize = 4;

/// Case-insensitive canonical form used for all rule comparisons.
pub fn canonical(input: Option<&str>) -> String {
    let mut current = normalize(input);
    // Lowercasing can emit sequences NFKC folds again, so settle on a fixpoint.
    for _ in 0..CANONICAL_ROUNDS {
        let next = normalize(Some(&current.to_lowercase()));
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Canonical social handle: leading `@` dropped.
pub fn canonical_handle(input: Option<&str>) -> String {
    let handle = canonical(input);
    handle.trim_start_matches('@').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "  Café Line ",
        "Cafe\u{301} Line",
        "ＰＲＯＭＯ２０２６",
        "\u{3000}sale\u{3000}",
        "İstanbul",
        "ß and ẞ",
        "ﬁne print",
        "",
        "   ",
        "Ωmega \u{2126}",
    ];

    #[test]
    fn test_idempotent() {
        for sample in SAMPLES {
            let once = normalize(Some(sample));
            assert_eq!(normalize(Some(&once)), once, "normalize: {sample:?}");

            let once = canonical(Some(sample));
            assert_eq!(canonical(Some(&once)), once, "canonical: {sample:?}");
        }
    }

    #[test]
    fn test_composed_and_decomposed_collapse() {
        assert_eq!(
            canonical(Some("Cafe\u{301}")),
            canonical(Some("Caf\u{e9}"))
        );
    }

    #[test]
    fn test_full_width_collapse() {
        assert_eq!(canonical(Some("ＰＲＯＭＯ")), "promo");
        assert_eq!(normalize(Some("\u{3000}sale\u{3000}")), "sale");
    }

    #[test]
    fn test_none_is_empty() {
        assert_eq!(normalize(None), "");
        assert_eq!(canonical(None), "");
    }

    #[test]
    fn test_handle() {
        assert_eq!(canonical_handle(Some(" @Ana_K ")), "ana_k");
        assert_eq!(canonical_handle(Some("ana_k")), "ana_k");
    }
}
