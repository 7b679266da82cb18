//! Language-agnostic token boundary scan shared by completion and inspection.

/// Span of the token under (or immediately before) a cursor, in char offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub cursor: usize,
    pub start: usize,
    pub end: usize,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | ',' | '+' | '-' | '*' | '/' | '.')
}

impl TokenSpan {
    /// Scan `text` forward through delimiters; the token ends at the first
    /// delimiter (or end of text) at or after `cursor`.
    pub fn scan(text: &str, cursor: usize) -> Self {
        let len = text.chars().count();
        let cursor = cursor.min(len);
        let mut start = 0;
        let mut end = len;
        for (idx, c) in text.chars().enumerate() {
            if !is_delimiter(c) {
                continue;
            }
            if idx >= cursor {
                end = idx;
                break;
            }
            start = idx + 1;
        }
        Self { cursor, start, end }
    }

    /// Text between the token start and the cursor.
    pub fn prefix<'a>(&self, text: &'a str) -> &'a str {
        char_slice(text, self.start, self.cursor)
    }

    /// The whole token.
    pub fn token<'a>(&self, text: &'a str) -> &'a str {
        char_slice(text, self.start, self.end)
    }
}

fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let byte = |n: usize| {
        text.char_indices()
            .nth(n)
            .map(|(i, _)| i)
            .unwrap_or(text.len())
    };
    let (from, to) = (byte(start), byte(end.max(start)));
    &text[from..to]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_access_completes_after_dot() {
        let span = TokenSpan::scan("foo.ba", 6);
        assert_eq!((span.start, span.end), (4, 6));
        assert_eq!(span.prefix("foo.ba"), "ba");
    }

    #[test]
    fn cursor_inside_token_spans_whole_token() {
        let text = "map (filter xs) ys";
        let span = TokenSpan::scan(text, 7);
        assert_eq!((span.start, span.end), (5, 11));
        assert_eq!(span.token(text), "filter");
        assert_eq!(span.prefix(text), "fi");
    }

    #[test]
    fn first_token_starts_at_zero() {
        let span = TokenSpan::scan("print", 3);
        assert_eq!((span.start, span.end), (0, 5));
    }

    #[test]
    fn cursor_right_after_delimiter_gives_empty_prefix() {
        let text = "a + ";
        let span = TokenSpan::scan(text, 4);
        assert_eq!((span.start, span.end), (4, 4));
        assert_eq!(span.prefix(text), "");
    }

    #[test]
    fn offsets_count_chars_not_bytes() {
        let text = "λx.fö";
        let span = TokenSpan::scan(text, 5);
        assert_eq!((span.start, span.end), (3, 5));
        assert_eq!(span.token(text), "fö");
    }

    #[test]
    fn cursor_past_end_is_clamped() {
        let span = TokenSpan::scan("abc", 99);
        assert_eq!(span, TokenSpan { cursor: 3, start: 0, end: 3 });
    }
}
