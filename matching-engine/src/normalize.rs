use unicode_normalization::UnicodeNormalization;

/// Reduces text to the canonical form used for both index keys and queries.
///
/// Compatibility-folds (NFKC), lower-cases, drops every character that is neither
/// alphanumeric, `_` nor whitespace, collapses whitespace runs to one space and trims.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .nfkc()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    let mut normalized = String::with_capacity(stripped.len());
    for word in stripped.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(word);
    }
    normalized
}

/// Splits already-normalized text into its words.
pub fn tokenize(normalized: &str) -> Vec<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_punctuation() {
        assert_eq!(
            normalize("How do I reset my password?"),
            "how do i reset my password"
        );
        assert_eq!(normalize("Don't   PANIC!!"), "dont panic");
    }

    #[test]
    fn collapses_and_trims_whitespace() {
        assert_eq!(normalize("  many \t\n spaces   here "), "many spaces here");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" ?! ... "), "");
    }

    #[test]
    fn punctuation_between_words_does_not_split_them() {
        assert_eq!(normalize("e-mail"), "email");
        assert_eq!(normalize("{{support_contact}}"), "support_contact");
    }

    #[test]
    fn folds_compatibility_forms() {
        assert_eq!(normalize("ＰＡＳＳＷＯＲＤ"), "password");
        assert_eq!(normalize("Ünïcode Wörds"), "ünïcode wörds");
    }

    #[test]
    fn is_idempotent() {
        let once = normalize("Where can I find my Invoices?");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn tokenize_splits_on_single_spaces() {
        assert_eq!(tokenize("my password is"), vec!["my", "password", "is"]);
        assert!(tokenize("").is_empty());
    }
}
