// ABOUTME: Tokenizer for the rule grammar using nom combinators

use crate::errors::{Position, SyntaxError};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, one_of},
    combinator::{opt, recognize},
    IResult, Parser,
};

/// The kinds of token the grammar is made of. Literal tokens carry their raw
/// text; parsing into values happens while the AST is being built so that
/// grammar errors surface before value errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // literals
    Float(String),
    String(String),
    Bytes(String),
    Datetime(String),
    Timedelta(String),
    /// An identifier, retaining a leading `$` when present.
    Symbol(String),
    // reserved words
    And,
    Or,
    Not,
    In,
    If,
    For,
    True,
    False,
    Null,
    Inf,
    Nan,
    // operators
    Add,
    Sub,
    Mul,
    Pow,
    TrueDiv,
    FloorDiv,
    Mod,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseShiftLeft,
    BitwiseShiftRight,
    Eq,
    Ne,
    EqFuzzyMatch,
    EqFuzzySearch,
    NeFuzzyMatch,
    NeFuzzySearch,
    Lt,
    Le,
    Gt,
    Ge,
    Attribute,
    AttributeSafe,
    Question,
    Colon,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    LeftBracketSafe,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comment(String),
}

impl TokenKind {
    /// A short rendering of the token used in syntax diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Float(raw)
            | TokenKind::Symbol(raw)
            | TokenKind::Datetime(raw)
            | TokenKind::Timedelta(raw)
            | TokenKind::Bytes(raw)
            | TokenKind::String(raw) => format!("{raw:?}"),
            TokenKind::Comment(_) => "comment".to_string(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

const RESERVED_FOR_FUTURE: &[&str] = &["elif", "else", "while"];

fn reserved_word(name: &str) -> Option<TokenKind> {
    match name {
        "and" => Some(TokenKind::And),
        "or" => Some(TokenKind::Or),
        "not" => Some(TokenKind::Not),
        "in" => Some(TokenKind::In),
        "if" => Some(TokenKind::If),
        "for" => Some(TokenKind::For),
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        "null" => Some(TokenKind::Null),
        "inf" => Some(TokenKind::Inf),
        "nan" => Some(TokenKind::Nan),
        _ => None,
    }
}

fn is_symbol_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize((
        one_of("eE"),
        opt(one_of("+-")),
        take_while1(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)
}

fn lex_float(input: &str) -> IResult<&str, &str> {
    alt((
        recognize((tag("0b"), take_while1(|c: char| c == '0' || c == '1'))),
        recognize((tag("0o"), take_while1(|c: char| ('0'..='7').contains(&c)))),
        recognize((tag("0x"), take_while1(|c: char| c.is_ascii_hexdigit()))),
        recognize((
            take_while1(|c: char| c.is_ascii_digit()),
            opt((char('.'), take_while(|c: char| c.is_ascii_digit()))),
            opt(exponent),
        )),
        recognize((
            char('.'),
            take_while1(|c: char| c.is_ascii_digit()),
            opt(exponent),
        )),
    ))
    .parse(input)
}

fn lex_symbol(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(char('$')),
        take_while1(is_symbol_start),
        take_while(is_symbol_char),
    ))
    .parse(input)
}

/// Expand backslash escape sequences in a quoted literal body. Unknown
/// escapes are kept verbatim.
pub(crate) fn unescape(raw: &str) -> Result<String, ()> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('x') => {
                let hi = chars.next().ok_or(())?;
                let lo = chars.next().ok_or(())?;
                let code = u32::from_str_radix(&format!("{hi}{lo}"), 16).map_err(|_| ())?;
                out.push(char::from_u32(code).ok_or(())?);
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return Err(()),
        }
    }
    Ok(out)
}

/// The lexer walks the rule text and produces a flat token stream, tracking
/// line and column for diagnostics.
pub struct Lexer<'a> {
    text: &'a str,
    offset: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Lexer {
            text,
            offset: 0,
            line: 1,
            column: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.offset..]
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    /// The character immediately before the cursor in the raw text. Safe
    /// attribute/index operators are only recognised when this is not
    /// whitespace, which keeps `a &[0]` parsing as a bitwise AND.
    fn preceded_by_nonspace(&self) -> bool {
        self.text[..self.offset]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_whitespace())
    }

    fn advance(&mut self, consumed: usize) {
        for c in self.text[self.offset..self.offset + consumed].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += c.len_utf8();
            }
        }
        self.offset += consumed;
    }

    fn illegal_character(&self, c: char) -> SyntaxError {
        SyntaxError::rule(format!("illegal character {c:?}"), Some(self.position()))
    }

    /// Consume a quoted literal body after the opening quote, returning the
    /// raw inner text. Escaped characters are passed through; the literal
    /// may not contain a bare newline.
    fn quoted_body(&mut self, quote: char) -> Result<String, SyntaxError> {
        let mut body = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    body.push(c);
                    match chars.next() {
                        Some((_, escaped)) if escaped != '\n' => body.push(escaped),
                        _ => break,
                    }
                }
                '\n' => break,
                _ if c == quote => {
                    self.advance(i + c.len_utf8());
                    return Ok(body);
                }
                _ => body.push(c),
            }
        }
        Err(SyntaxError::rule(
            "unterminated string literal",
            Some(self.position()),
        ))
    }

    fn next_token(&mut self) -> Result<Option<Token>, SyntaxError> {
        loop {
            match self.rest().chars().next() {
                Some(c) if c == ' ' || c == '\t' || c == '\n' => self.advance(c.len_utf8()),
                Some(_) => break,
                None => return Ok(None),
            }
        }
        let position = self.position();
        let rest = self.rest();
        let mut chars = rest.chars();
        let current = chars.next().expect("the loop above found a character");
        let next = chars.next();

        // comments run to the end of the line
        if current == '#' {
            let end = rest.find('\n').unwrap_or(rest.len());
            let comment = rest[1..end].to_string();
            self.advance(end);
            return Ok(Some(Token {
                kind: TokenKind::Comment(comment),
                position,
            }));
        }

        // prefixed and bare quoted literals
        if let Some(quote @ ('\'' | '"')) = next {
            if let Some(kind) = match current {
                's' => Some("string"),
                'b' => Some("bytes"),
                'd' => Some("datetime"),
                't' => Some("timedelta"),
                _ => None,
            } {
                self.advance(2);
                let body = self.quoted_body(quote)?;
                let kind = match kind {
                    "string" => TokenKind::String(body),
                    "bytes" => TokenKind::Bytes(body),
                    "datetime" => TokenKind::Datetime(body),
                    _ => TokenKind::Timedelta(body),
                };
                return Ok(Some(Token { kind, position }));
            }
        }
        if current == '\'' || current == '"' {
            self.advance(1);
            let body = self.quoted_body(current)?;
            return Ok(Some(Token {
                kind: TokenKind::String(body),
                position,
            }));
        }

        // numbers, including the leading-dot form
        let numeric_start = current.is_ascii_digit()
            || (current == '.' && next.is_some_and(|c| c.is_ascii_digit()));
        if numeric_start {
            if let Ok((_, raw)) = lex_float(rest) {
                let kind = TokenKind::Float(raw.to_string());
                self.advance(raw.len());
                return Ok(Some(Token { kind, position }));
            }
        }

        // symbols and reserved words
        if is_symbol_start(current) || (current == '$' && next.is_some_and(is_symbol_start)) {
            let (_, name) = lex_symbol(rest).map_err(|_| self.illegal_character(current))?;
            if RESERVED_FOR_FUTURE.contains(&name) {
                return Err(SyntaxError::rule(
                    format!("the {name} keyword is reserved for future use"),
                    Some(position),
                ));
            }
            let kind = reserved_word(name).unwrap_or_else(|| TokenKind::Symbol(name.to_string()));
            self.advance(name.len());
            return Ok(Some(Token { kind, position }));
        }

        // multi-character operators before their single-character prefixes
        let preceded = self.preceded_by_nonspace();
        let (kind, length) = match (current, next) {
            ('&', Some('.')) if preceded && rest.chars().nth(2).is_some_and(is_symbol_start) => {
                (TokenKind::AttributeSafe, 2)
            }
            ('&', Some('[')) if preceded => (TokenKind::LeftBracketSafe, 2),
            ('&', _) => (TokenKind::BitwiseAnd, 1),
            ('.', _) if preceded && next.is_some_and(is_symbol_start) => {
                (TokenKind::Attribute, 1)
            }
            ('*', Some('*')) => (TokenKind::Pow, 2),
            ('*', _) => (TokenKind::Mul, 1),
            ('/', Some('/')) => (TokenKind::FloorDiv, 2),
            ('/', _) => (TokenKind::TrueDiv, 1),
            ('<', Some('=')) => (TokenKind::Le, 2),
            ('<', Some('<')) => (TokenKind::BitwiseShiftLeft, 2),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', Some('=')) => (TokenKind::Ge, 2),
            ('>', Some('>')) => (TokenKind::BitwiseShiftRight, 2),
            ('>', _) => (TokenKind::Gt, 1),
            ('=', Some('=')) => (TokenKind::Eq, 2),
            ('=', Some('~')) if rest.chars().nth(2) == Some('~') => {
                (TokenKind::EqFuzzySearch, 3)
            }
            ('=', Some('~')) => (TokenKind::EqFuzzyMatch, 2),
            ('!', Some('=')) => (TokenKind::Ne, 2),
            ('!', Some('~')) if rest.chars().nth(2) == Some('~') => {
                (TokenKind::NeFuzzySearch, 3)
            }
            ('!', Some('~')) => (TokenKind::NeFuzzyMatch, 2),
            ('+', _) => (TokenKind::Add, 1),
            ('-', _) => (TokenKind::Sub, 1),
            ('%', _) => (TokenKind::Mod, 1),
            ('|', _) => (TokenKind::BitwiseOr, 1),
            ('^', _) => (TokenKind::BitwiseXor, 1),
            ('?', _) => (TokenKind::Question, 1),
            (':', _) => (TokenKind::Colon, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('(', _) => (TokenKind::LeftParen, 1),
            (')', _) => (TokenKind::RightParen, 1),
            ('[', _) => (TokenKind::LeftBracket, 1),
            (']', _) => (TokenKind::RightBracket, 1),
            ('{', _) => (TokenKind::LeftBrace, 1),
            ('}', _) => (TokenKind::RightBrace, 1),
            _ => return Err(self.illegal_character(current)),
        };
        self.advance(length);
        Ok(Some(Token { kind, position }))
    }

    /// Tokenize the whole input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        Lexer::new(text)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            kinds("1 + 2 * 3"),
            vec![
                TokenKind::Float("1".into()),
                TokenKind::Add,
                TokenKind::Float("2".into()),
                TokenKind::Mul,
                TokenKind::Float("3".into()),
            ]
        );
    }

    #[test]
    fn test_multi_character_operators() {
        assert_eq!(kinds("**"), vec![TokenKind::Pow]);
        assert_eq!(kinds("//"), vec![TokenKind::FloorDiv]);
        assert_eq!(kinds("1 << 2"), vec![
            TokenKind::Float("1".into()),
            TokenKind::BitwiseShiftLeft,
            TokenKind::Float("2".into()),
        ]);
        assert_eq!(kinds("a =~~ b"), vec![
            TokenKind::Symbol("a".into()),
            TokenKind::EqFuzzySearch,
            TokenKind::Symbol("b".into()),
        ]);
        assert_eq!(kinds("a !~ b")[1], TokenKind::NeFuzzyMatch);
    }

    #[test]
    fn test_prefixed_literals() {
        assert_eq!(kinds("d'2019-09-23'"), vec![TokenKind::Datetime("2019-09-23".into())]);
        assert_eq!(kinds("t'P1D'"), vec![TokenKind::Timedelta("P1D".into())]);
        assert_eq!(kinds("b'ab'"), vec![TokenKind::Bytes("ab".into())]);
        assert_eq!(kinds("s\"hi\""), vec![TokenKind::String("hi".into())]);
        assert_eq!(kinds("'hi'"), vec![TokenKind::String("hi".into())]);
    }

    #[test]
    fn test_prefix_letter_without_quote_is_a_symbol() {
        assert_eq!(kinds("data"), vec![TokenKind::Symbol("data".into())]);
        assert_eq!(kinds("t"), vec![TokenKind::Symbol("t".into())]);
    }

    #[test]
    fn test_reserved_words() {
        assert_eq!(
            kinds("true and not false or null"),
            vec![
                TokenKind::True,
                TokenKind::And,
                TokenKind::Not,
                TokenKind::False,
                TokenKind::Or,
                TokenKind::Null,
            ]
        );
        assert_eq!(kinds("inf nan"), vec![TokenKind::Inf, TokenKind::Nan]);
    }

    #[test]
    fn test_reserved_for_future_words_reject() {
        for word in ["elif", "else", "while"] {
            let err = Lexer::new(word).tokenize().unwrap_err();
            assert!(err.to_string().contains("reserved for future use"));
        }
    }

    #[test]
    fn test_builtin_scope_sigil() {
        assert_eq!(kinds("$now"), vec![TokenKind::Symbol("$now".into())]);
    }

    #[test]
    fn test_attribute_versus_float_disambiguation() {
        assert_eq!(kinds("3.14"), vec![TokenKind::Float("3.14".into())]);
        assert_eq!(
            kinds("x.y"),
            vec![
                TokenKind::Symbol("x".into()),
                TokenKind::Attribute,
                TokenKind::Symbol("y".into()),
            ]
        );
        assert_eq!(kinds(".5"), vec![TokenKind::Float(".5".into())]);
    }

    #[test]
    fn test_safe_operators_require_adjacency() {
        assert_eq!(
            kinds("x&.y"),
            vec![
                TokenKind::Symbol("x".into()),
                TokenKind::AttributeSafe,
                TokenKind::Symbol("y".into()),
            ]
        );
        assert_eq!(kinds("x&[0]")[1], TokenKind::LeftBracketSafe);
        // with a space the ampersand is a bitwise AND
        assert_eq!(kinds("x & [0]")[1], TokenKind::BitwiseAnd);
    }

    #[test]
    fn test_comment_token_is_retained() {
        let tokens = kinds("true # a comment");
        assert_eq!(tokens[0], TokenKind::True);
        assert_eq!(tokens[1], TokenKind::Comment(" a comment".into()));
    }

    #[test]
    fn test_illegal_character_carries_position() {
        let err = Lexer::new("a @ b").tokenize().unwrap_err();
        assert_eq!(err.to_string(), "syntax error (illegal character '@') at: line 1:2");
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Lexer::new("'abc").tokenize().is_err());
    }

    #[test]
    fn test_line_tracking() {
        let tokens = Lexer::new("true\n  false").tokenize().unwrap();
        assert_eq!(tokens[1].position, Position { line: 2, column: 2 });
    }
}
