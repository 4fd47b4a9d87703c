//! Quoting for command lines that pass through a remote shell.

const META: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '$', '`', '\\', '"', '\'', ' ', '\t', '\n', '*', '?',
    '[', ']', '#', '~', '=', '%', '{', '}', '!',
];

/// `true` if the shell would interpret some character of `word`.
pub fn has_meta(word: &str) -> bool {
    word.is_empty() || word.contains(META)
}

/// Quotes `word` so a POSIX shell passes it through verbatim.
pub fn quote(word: &str) -> String {
    if !has_meta(word) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Quotes every word and joins them with spaces.
pub fn join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
