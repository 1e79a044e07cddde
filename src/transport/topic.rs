//! Topic routing keys and binding patterns.
//!
//! Routing keys are dot-delimited words (`orders.eu.created`). Binding
//! patterns follow the topic-exchange convention: `*` matches exactly one
//! word and `#` matches zero or more words.

pub const SEPARATOR: char = '.';
pub const WILDCARD_ONE: &str = "*";
pub const WILDCARD_ANY: &str = "#";

/// Join a prefix and a short topic into a fully-qualified routing key.
/// An empty prefix leaves the topic untouched.
pub fn qualify(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{prefix}{SEPARATOR}{topic}")
    }
}

/// Whether `routing_key` is selected by the binding `pattern`.
pub fn matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(SEPARATOR).collect();
    let key: Vec<&str> = routing_key.split(SEPARATOR).collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&WILDCARD_ANY, rest)) => {
            // `#` may swallow any number of words, including none
            (0..=key.len()).any(|skip| matches_words(rest, &key[skip..]))
        }
        Some((&word, rest)) => match key.split_first() {
            Some((&first, key_rest)) if word == WILDCARD_ONE || word == first => {
                matches_words(rest, key_rest)
            }
            _ => false,
        },
    }
}
