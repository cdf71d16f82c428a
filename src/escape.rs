//! Sentinel escaping for text blocks
//!
//! A line starting with the delimiter `-- ` opens a new block in the
//! carrier, so text content must never contain one. Escaping works line by
//! line, quoting style:
//!
//! ```text
//! -- name --      ->  >-- name --
//! >-- name --     ->  >>-- name --
//! >>-- x          ->  >>>-- x
//! ```
//!
//! A line is *quotable* when it is zero or more `>` followed by `-- `.
//! Escaping adds one `>` to every quotable line, so escaped text never has a
//! line starting with `-- `. Unescaping removes one `>` from every line that
//! is one or more `>` followed by `-- `. The two maps are exact inverses:
//! after escaping, every such line came from a quotable line and nothing
//! else starts with `>`+`-- `.

use std::borrow::Cow;

use crate::archive::MARKER_PREFIX;

const QUOTE: u8 = b'>';

/// Escaped text plus the reversal directive for the entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escaped<'a> {
    pub text: Cow<'a, str>,
    /// Set when the text was rewritten; the decoder must unescape it
    pub escaped: bool,
}

/// Whether any line of `text` starts with the delimiter
pub fn contains_delimiter(text: &str) -> bool {
    text.split('\n').any(|line| line.starts_with(MARKER_PREFIX))
}

/// Escape `text` only if it contains a delimiter line
pub fn escape_if_needed(text: &str) -> Escaped<'_> {
    if contains_delimiter(text) {
        Escaped {
            text: Cow::Owned(escape(text)),
            escaped: true,
        }
    } else {
        Escaped {
            text: Cow::Borrowed(text),
            escaped: false,
        }
    }
}

/// Quote every quotable line. Total: always produces delimiter-free text.
pub fn escape(text: &str) -> String {
    map_lines(text, |line, out| {
        if quote_depth(line).is_some() {
            out.push('>');
        }
        out.push_str(line);
    })
}

/// Inverse of [`escape`]
pub fn unescape(text: &str) -> String {
    map_lines(text, |line, out| match quote_depth(line) {
        Some(depth) if depth > 0 => out.push_str(&line[1..]),
        _ => out.push_str(line),
    })
}

/// Number of leading `>` if the line is `>`* followed by the delimiter
fn quote_depth(line: &str) -> Option<usize> {
    let depth = line.bytes().take_while(|&b| b == QUOTE).count();
    line[depth..].starts_with(MARKER_PREFIX).then_some(depth)
}

/// Apply `f` to every line, keeping line terminators byte-exact
fn map_lines(text: &str, mut f: impl FnMut(&str, &mut String)) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        f(line, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_text_is_borrowed() {
        let result = escape_if_needed("intro\n-- marker --\n");
        assert!(result.escaped);

        let result = escape_if_needed("a -- b --\n  -- indented\n");
        assert!(!result.escaped);
        assert!(matches!(result.text, Cow::Borrowed(_)));
    }

    #[test]
    fn test_escape_delimiter_lines() {
        let text = "-- file1.txt --\nSome content\n-- file2.txt --\n";
        let escaped = escape(text);
        assert_eq!(escaped, ">-- file1.txt --\nSome content\n>-- file2.txt --\n");
        assert!(!contains_delimiter(&escaped));
        assert_eq!(unescape(&escaped), text);
    }

    #[test]
    fn test_placeholder_literal_in_original_is_preserved() {
        // Content that already looks escaped must survive the round trip
        let text = ">-- quoted --\n-- real --\n>>-- deeper\n>not a marker\n";
        let escaped = escape(text);
        assert_eq!(escaped, ">>-- quoted --\n>-- real --\n>>>-- deeper\n>not a marker\n");
        assert_eq!(unescape(&escaped), text);
    }

    #[test]
    fn test_crlf_and_no_trailing_newline() {
        let text = "-- a --\r\nbody\r\n-- b --";
        let escaped = escape(text);
        assert_eq!(escaped, ">-- a --\r\nbody\r\n>-- b --");
        assert_eq!(unescape(&escaped), text);
    }

    #[test]
    fn test_bare_delimiter_without_space_is_not_quotable() {
        assert!(!contains_delimiter("--\n---\n--x"));
        assert_eq!(escape("--\n>--"), "--\n>--");
    }

    fn text_with_markers() -> impl Strategy<Value = String> {
        let line = prop_oneof![
            Just("-- ".to_string()),
            Just("-- name --".to_string()),
            Just(">-- ".to_string()),
            Just(">>-- x --".to_string()),
            Just(">".to_string()),
            Just("".to_string()),
            Just("\r".to_string()),
            "[ -~]{0,12}",
        ];
        prop::collection::vec(line, 0..12).prop_map(|lines| lines.join("\n"))
    }

    proptest! {
        #[test]
        fn prop_escape_is_delimiter_free_and_invertible(text in text_with_markers()) {
            let escaped = escape(&text);
            prop_assert!(!contains_delimiter(&escaped));
            prop_assert_eq!(unescape(&escaped), text);
        }

        #[test]
        fn prop_escape_if_needed_round_trips(text in "\\PC{0,64}") {
            let result = escape_if_needed(&text);
            prop_assert!(!contains_delimiter(&result.text));
            let restored = if result.escaped { unescape(&result.text) } else { result.text.to_string() };
            prop_assert_eq!(restored, text);
        }
    }
}
