//! User-agent normalisation (spec.md §4.7, §9; ckpool's `ua_utils.c`).
//!
//! The normalised token is the prefix of a miner's reported UA up to the
//! first `/` or `(`, with leading/trailing whitespace trimmed and internal
//! case/spacing preserved. An empty result becomes the literal `"Other"`.

/// Normalise a raw user-agent string into its stable short token.
pub fn normalize_ua(raw: &str) -> String {
    let trimmed = raw.trim();
    let cut = trimmed
        .find(['/', '('])
        .map(|idx| &trimmed[..idx])
        .unwrap_or(trimmed);
    // The cut may itself carry trailing whitespace if the raw string had
    // e.g. "cgminer (foo)" with a space before the parenthesis.
    let cut = cut.trim_end();
    if cut.is_empty() {
        "Other".to_string()
    } else {
        cut.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuts_at_slash() {
        assert_eq!(normalize_ua("cgminer/4.10.0"), "cgminer");
    }

    #[test]
    fn cuts_at_paren() {
        assert_eq!(normalize_ua("cgminer (experimental)"), "cgminer");
    }

    #[test]
    fn preserves_internal_case_and_spaces() {
        assert_eq!(normalize_ua("  Braiins OS  /1.2 "), "Braiins OS");
    }

    #[test]
    fn whitespace_only_becomes_other() {
        assert_eq!(normalize_ua("   "), "Other");
        assert_eq!(normalize_ua(""), "Other");
    }

    #[test]
    fn no_delimiter_is_returned_trimmed() {
        assert_eq!(normalize_ua(" bosminer "), "bosminer");
    }
}
