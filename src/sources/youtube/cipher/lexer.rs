//! A tokenizer for the small, minified JavaScript fragments the deriver
//! inspects. It knows identifiers, numbers, string literals and comments;
//! everything else is single-character punctuation.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Number(String),
    /// Unescaped string literal contents.
    Str(String),
    Punct(char),
}

impl Token {
    pub fn is_punct(&self, c: char) -> bool {
        matches!(self, Self::Punct(p) if *p == c)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(self, Self::Ident(i) if i == name)
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Self::Ident(i) => Some(i),
            _ => None,
        }
    }

    /// Identifiers, keywords and numbers need a separator between them.
    fn is_word(&self) -> bool {
        matches!(self, Self::Ident(_) | Self::Number(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) | Self::Number(s) => f.write_str(s),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Punct(c) => write!(f, "{}", c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub offset: usize,
    pub message: &'static str,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn at(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        let bytes = self.src.as_bytes();
        loop {
            match (bytes.get(self.pos), bytes.get(self.pos + 1)) {
                (Some(b), _) if b.is_ascii_whitespace() => self.pos += 1,
                (Some(b'/'), Some(b'/')) => {
                    self.pos = self.src[self.pos..]
                        .find('\n')
                        .map_or(bytes.len(), |n| self.pos + n);
                }
                (Some(b'/'), Some(b'*')) => {
                    let end = self.src[self.pos + 2..].find("*/").ok_or(LexError {
                        offset: self.pos,
                        message: "unterminated comment",
                    })?;
                    self.pos += end + 4;
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, LexError> {
        let start = self.pos;
        let mut value = String::new();
        let mut chars = self.src[start + 1..].char_indices();

        while let Some((i, c)) = chars.next() {
            match c {
                c if c == quote => {
                    self.pos = start + 1 + i + c.len_utf8();
                    return Ok(Token::Str(value));
                }
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        'x' | 'u' => {
                            let width = if escaped == 'x' { 2 } else { 4 };
                            let digits: String = chars.by_ref().take(width).map(|(_, d)| d).collect();
                            let decoded = u32::from_str_radix(&digits, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or(LexError {
                                    offset: start + 1 + i,
                                    message: "bad escape sequence",
                                })?;
                            value.push(decoded);
                        }
                        other => value.push(other),
                    }
                }
                '\n' if quote != '`' => break,
                c => value.push(c),
            }
        }

        Err(LexError {
            offset: start,
            message: "unterminated string literal",
        })
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_part(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

impl Iterator for Lexer<'_> {
    type Item = Result<Spanned, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.skip_trivia() {
            self.pos = self.src.len();
            return Some(Err(e));
        }

        let bytes = self.src.as_bytes();
        let start = self.pos;
        let b = *bytes.get(start)?;

        let token = match b {
            b'"' | b'\'' | b'`' => match self.read_string(b as char) {
                Ok(token) => token,
                Err(e) => {
                    self.pos = self.src.len();
                    return Some(Err(e));
                }
            },
            b'0'..=b'9' => {
                while bytes
                    .get(self.pos)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'.' || *c == b'_')
                {
                    self.pos += 1;
                }
                Token::Number(self.src[start..self.pos].to_string())
            }
            b if is_ident_start(b) => {
                while bytes.get(self.pos).is_some_and(|c| is_ident_part(*c)) {
                    self.pos += 1;
                }
                Token::Ident(self.src[start..self.pos].to_string())
            }
            b => {
                self.pos += 1;
                Token::Punct(b as char)
            }
        };

        Some(Ok(Spanned {
            token,
            start,
            end: self.pos,
        }))
    }
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(src).map(|t| t.map(|s| s.token)).collect()
}

/// Given the offset of an opening `{`, returns the offset just past its
/// matching `}`. Braces inside strings and comments are ignored.
pub fn block_end(src: &str, open: usize) -> Result<usize, LexError> {
    let mut depth = 0usize;
    for spanned in Lexer::at(src, open) {
        let spanned = spanned?;
        match spanned.token {
            Token::Punct('{') => depth += 1,
            Token::Punct('}') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(spanned.end);
                }
            }
            _ if depth == 0 => {
                return Err(LexError {
                    offset: spanned.start,
                    message: "expected '{'",
                });
            }
            _ => {}
        }
    }

    Err(LexError {
        offset: open,
        message: "unbalanced braces",
    })
}

/// Splits a token list on `sep` at nesting depth zero. Empty pieces are
/// dropped.
pub fn split_top_level(tokens: &[Token], sep: char) -> Vec<&[Token]> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Punct('(' | '[' | '{') => depth += 1,
            Token::Punct(')' | ']' | '}') => depth -= 1,
            Token::Punct(c) if *c == sep && depth == 0 => {
                if i > start {
                    pieces.push(&tokens[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() {
        pieces.push(&tokens[start..]);
    }
    pieces
}

/// Index just past the bracket group that opens at `open`.
pub fn group_end(tokens: &[Token], open: usize) -> Option<usize> {
    let (opening, closing) = match tokens.get(open)? {
        Token::Punct('(') => ('(', ')'),
        Token::Punct('[') => ('[', ']'),
        Token::Punct('{') => ('{', '}'),
        _ => return None,
    };

    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct(opening) {
            depth += 1;
        } else if token.is_punct(closing) {
            depth -= 1;
            if depth == 0 {
                return Some(i + 1);
            }
        }
    }
    None
}

/// Joins tokens back into source text with the minimum whitespace needed to
/// keep words apart.
pub fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev_word = false;
    for token in tokens {
        if prev_word && token.is_word() {
            out.push(' ');
        }
        out.push_str(&token.to_string());
        prev_word = token.is_word();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_minified_code() {
        let tokens = tokenize(r#"a=a.split("");Xy$.q1(a, 42)"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Punct('='),
                Token::Ident("a".into()),
                Token::Punct('.'),
                Token::Ident("split".into()),
                Token::Punct('('),
                Token::Str(String::new()),
                Token::Punct(')'),
                Token::Punct(';'),
                Token::Ident("Xy$".into()),
                Token::Punct('.'),
                Token::Ident("q1".into()),
                Token::Punct('('),
                Token::Ident("a".into()),
                Token::Punct(','),
                Token::Number("42".into()),
                Token::Punct(')'),
            ]
        );
    }

    #[test]
    fn skips_comments_and_unescapes_strings() {
        let tokens = tokenize("/* x */ b // tail\n'it\\'s' \"\\x41\\u0042\"").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("b".into()),
                Token::Str("it's".into()),
                Token::Str("AB".into()),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("a='abc").is_err());
        assert!(tokenize("/* open").is_err());
    }

    #[test]
    fn block_end_ignores_braces_in_strings() {
        let src = r#"x={a:"}",b:function(c){return "{"}};rest"#;
        let open = src.find('{').unwrap();
        let end = block_end(src, open).unwrap();
        assert_eq!(&src[end..], ";rest");
    }

    #[test]
    fn render_keeps_words_apart() {
        let tokens = tokenize("var   c = a [ 0 ] ; return a").unwrap();
        assert_eq!(render(&tokens), "var c=a[0];return a");
    }

    #[test]
    fn split_respects_nesting() {
        let tokens = tokenize("a(1,2),b[3,4],c").unwrap();
        assert_eq!(split_top_level(&tokens, ',').len(), 3);
    }
}
