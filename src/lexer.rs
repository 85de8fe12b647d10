//! A module implementing lexical analysis (tokenization) of shell command lines.
//!
//! The language has a single quote character (`"`) and a single escape
//! character (`^`). Quoting only switches off word splitting; the escape
//! switches off the special meaning of the character that follows it.

use crate::error::ShellError;

/// The escape character.
pub const ESCAPE: char = '^';
/// The quote character.
pub const QUOTE: char = '"';

fn is_delimiter(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\r' | '\n')
}

/// Characters whose meaning `^` can switch off.
pub(crate) fn is_escapable(ch: char) -> bool {
    matches!(ch, '"' | ' ' | '\t' | '|' | '%' | '^' | '<' | '>' | '#')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    strip_quotes: bool,
    buffer: String,
}

impl LexingFSM {
    fn new(line: &str, strip_quotes: bool) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            strip_quotes,
            buffer: String::new(),
        }
    }

    fn make_tokens(&mut self) -> Result<Vec<String>, ShellError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingQuote => self.handle_quote(ch),
            }
        }

        match self.state {
            LexingState::ReadingQuote => {
                return Err(ShellError::NotFound(format!(
                    "closing quote in '{}'",
                    self.input.iter().collect::<String>()
                )));
            }
            LexingState::ReadingWord => out.push(std::mem::take(&mut self.buffer)),
            LexingState::Start => {}
        }

        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_start(&mut self, ch: char) {
        if !is_delimiter(ch) {
            self.state = LexingState::ReadingWord;
            self.handle_word(ch, &mut Vec::new());
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<String>) {
        match ch {
            c if is_delimiter(c) => {
                out.push(std::mem::take(&mut self.buffer));
                self.state = LexingState::Start;
            }
            ESCAPE => self.handle_escape(),
            QUOTE => {
                if !self.strip_quotes {
                    self.buffer.push(QUOTE);
                }
                self.state = LexingState::ReadingQuote;
            }
            c => self.buffer.push(c),
        }
    }

    fn handle_quote(&mut self, ch: char) {
        match ch {
            ESCAPE => self.handle_escape(),
            QUOTE => {
                if !self.strip_quotes {
                    self.buffer.push(QUOTE);
                }
                self.state = LexingState::ReadingWord;
            }
            c => self.buffer.push(c),
        }
    }

    fn handle_escape(&mut self) {
        match self.peek_char() {
            Some(next) if is_escapable(next) => {
                self.read_char();
                self.buffer.push(next);
            }
            _ => self.buffer.push(ESCAPE),
        }
    }
}

/// Split a normalized line into argv-style tokens.
///
/// With `strip_quotes` the quotation marks are removed from token text (the
/// interactive form); without it they are kept so the tokens can be emitted
/// into another command line unchanged. An unterminated quote is `NotFound`.
pub fn tokenize(line: &str, strip_quotes: bool) -> Result<Vec<String>, ShellError> {
    LexingFSM::new(line, strip_quotes).make_tokens()
}

/// Walk `line`, calling `visit` with the byte offset of every character that
/// is neither escaped nor inside quotes. Stops early when `visit` returns true.
fn scan_unquoted(line: &str, mut visit: impl FnMut(usize, char) -> bool) -> Option<usize> {
    let mut quoted = false;
    let mut chars = line.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            ESCAPE => {
                if chars.peek().is_some_and(|&(_, next)| is_escapable(next)) {
                    chars.next();
                }
            }
            QUOTE => quoted = !quoted,
            c if !quoted && visit(idx, c) => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Byte offset of the first unquoted, unescaped `target`.
pub fn find_unescaped(line: &str, target: char) -> Option<usize> {
    scan_unquoted(line, |_, c| c == target)
}

/// Remove a trailing `#` comment and surrounding whitespace.
pub fn normalize(line: &str) -> String {
    let line = match find_unescaped(line, '#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    line.trim().to_string()
}

/// Raw whitespace-separated words, quotes and escapes left in place.
pub fn split_words(line: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start: Option<usize> = None;
    let mut quoted = false;
    let mut chars = line.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if start.is_none() && !is_delimiter(ch) {
            start = Some(idx);
        }
        match ch {
            ESCAPE => {
                if chars.peek().is_some_and(|&(_, next)| is_escapable(next)) {
                    chars.next();
                }
            }
            QUOTE => quoted = !quoted,
            c if is_delimiter(c) && !quoted => {
                if let Some(s) = start.take() {
                    words.push(&line[s..idx]);
                }
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push(&line[s..]);
    }
    words
}

/// First raw word of `line` and the text after it (leading whitespace kept).
pub fn split_first_word(line: &str) -> (&str, &str) {
    let trimmed = line.trim_start();
    let offset = line.len() - trimmed.len();
    let end = scan_unquoted(trimmed, |_, c| is_delimiter(c)).unwrap_or(trimmed.len());
    (&line[offset..offset + end], &trimmed[end..])
}

/// Drop the quotation marks of a raw token.
pub fn strip_quotes(token: &str) -> String {
    token.chars().filter(|&c| c != QUOTE).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(line: &str) -> Vec<String> {
        tokenize(line, true).unwrap()
    }

    #[test]
    fn test_simple_words_and_collapsed_delimiters() {
        assert_eq!(toks("echo   a  b"), vec!["echo", "a", "b"]);
        assert!(toks("   ").is_empty());
    }

    #[test]
    fn test_quotes_keep_spaces_and_are_stripped_on_request() {
        assert_eq!(toks("echo \"a b\" c"), vec!["echo", "a b", "c"]);
        assert_eq!(
            tokenize("echo \"a b\" c", false).unwrap(),
            vec!["echo", "\"a b\"", "c"]
        );
    }

    #[test]
    fn test_quoted_empty_string_is_a_token() {
        assert_eq!(toks("cmd \"\" x"), vec!["cmd", "", "x"]);
    }

    #[test]
    fn test_unterminated_quote_is_not_found() {
        assert!(matches!(
            tokenize("echo \"abc", true),
            Err(ShellError::NotFound(_))
        ));
    }

    #[test]
    fn test_escape_removes_meaning_and_itself() {
        assert_eq!(toks("echo a^ b"), vec!["echo", "a b"]);
        assert_eq!(toks("echo ^\"x^\""), vec!["echo", "\"x\""]);
        assert_eq!(toks("echo 50^%"), vec!["echo", "50%"]);
        assert_eq!(toks("echo ^^"), vec!["echo", "^"]);
        assert_eq!(toks("echo a^|b"), vec!["echo", "a|b"]);
    }

    #[test]
    fn test_escape_before_ordinary_char_is_literal() {
        assert_eq!(toks("echo ^a"), vec!["echo", "^a"]);
        assert_eq!(toks("echo x^"), vec!["echo", "x^"]);
    }

    #[test]
    fn test_escaped_literal_at_every_position() {
        let specials = ['"', ' ', '|', '%', '^', '<', '>', '#'];
        for ch in specials {
            let line = format!("^{ch}a b^{ch} c^{ch}d");
            let tokens = toks(&line);
            assert_eq!(
                tokens,
                vec![format!("{ch}a"), format!("b{ch}"), format!("c{ch}d")],
                "escaped {ch:?}"
            );
        }
    }

    #[test]
    fn test_tokenize_is_idempotent_on_rejoined_output() {
        let lines = [
            "echo hello world",
            "set -v name \"quoted value\" tail",
            "  if  exist  fs0:\\efi\\boot  then ",
            "cmd \"\" \"a\"b\"c\" x",
        ];
        for line in lines {
            let first = tokenize(line.trim(), false).unwrap();
            let again = tokenize(&first.join(" "), false).unwrap();
            assert_eq!(first, again, "line {line:?}");
        }
    }

    #[test]
    fn test_normalize_strips_comment_outside_quotes() {
        assert_eq!(normalize("  echo hi # trailing"), "echo hi");
        assert_eq!(normalize("echo \"#not\" ^# x # c"), "echo \"#not\" ^# x");
        assert_eq!(normalize("# only a comment"), "");
    }

    #[test]
    fn test_find_unescaped_skips_quotes_and_escapes() {
        assert_eq!(find_unescaped("a \"|\" ^| b | c", '|'), Some(11));
        assert_eq!(find_unescaped("a \"|\"", '|'), None);
    }

    #[test]
    fn test_split_words_keeps_raw_text() {
        assert_eq!(
            split_words("echo \"a b\"  > out.txt ^ x"),
            vec!["echo", "\"a b\"", ">", "out.txt", "^ x"]
        );
    }

    #[test]
    fn test_split_first_word() {
        assert_eq!(split_first_word("  ls -b x"), ("ls", " -b x"));
        assert_eq!(split_first_word("\"a b\""), ("\"a b\"", ""));
    }
}
