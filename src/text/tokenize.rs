//! Shared tokenizer — used identically by the indexer and the query
//! planner so that query tokens always match indexed tokens (spec I4).

/// Lowercase, split on any non-ASCII-alphanumeric character, discard empty
/// tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_lowercases() {
        assert_eq!(
            tokenize("Hello, World! rust-lang.org"),
            vec!["hello", "world", "rust", "lang", "org"]
        );
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("   ...   ").is_empty());
    }

    proptest::proptest! {
        #[test]
        fn never_panics_on_arbitrary_input(s in ".*") {
            let _ = tokenize(&s);
        }
    }
}
