//! S-expression parsing for KiCad file formats.
//!
//! The grammar is recursive, not line-oriented, so the parser tracks nesting
//! depth character by character and produces an explicit tree ([`Sexpr`])
//! instead of scraping the text with patterns. Quoted and unquoted atoms are
//! kept distinct so a re-emitted document preserves the original atom kinds.

mod writer;

pub use writer::{Arg, SexpWriter};

use std::fmt;

/// A node in the parsed S-expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    /// An unquoted identifier, keyword or numeric literal.
    Symbol(String),
    /// A quoted string.
    String(String),
    /// A parenthesized list of nodes.
    List(Vec<Sexpr>),
}

impl Sexpr {
    pub fn symbol(s: impl Into<String>) -> Self {
        Sexpr::Symbol(s.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Sexpr::String(s.into())
    }

    pub fn list(items: Vec<Sexpr>) -> Self {
        Sexpr::List(items)
    }

    /// Atom text, whether the atom was quoted or not.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Sexpr::Symbol(s) | Sexpr::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexpr]> {
        match self {
            Sexpr::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Sexpr>> {
        match self {
            Sexpr::List(items) => Some(items),
            _ => None,
        }
    }

    /// Head symbol of a list node, e.g. `pin` for `(pin passive line ...)`.
    pub fn head(&self) -> Option<&str> {
        match self {
            Sexpr::List(items) => match items.first() {
                Some(Sexpr::Symbol(s)) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// Atom at `index` inside a list node.
    pub fn atom_at(&self, index: usize) -> Option<&str> {
        self.as_list().and_then(|items| items.get(index)).and_then(|i| i.as_atom())
    }

    /// First child list whose head symbol is `name`.
    pub fn child(&self, name: &str) -> Option<&Sexpr> {
        self.as_list()?.iter().find(|item| item.head() == Some(name))
    }
}

/// Errors produced while parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedEof,
    UnexpectedChar(char, char),
    UnclosedList,
    UnterminatedString,
    EmptyAtom,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedEof => write!(f, "unexpected end of input"),
            ParseError::UnexpectedChar(found, expected) => {
                write!(f, "expected '{expected}', found '{found}'")
            }
            ParseError::UnclosedList => write!(f, "unclosed list"),
            ParseError::UnterminatedString => write!(f, "unterminated string"),
            ParseError::EmptyAtom => write!(f, "empty atom"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a single S-expression from the input.
pub fn parse(input: &str) -> Result<Sexpr, ParseError> {
    log::trace!("parsing S-expression from {} bytes", input.len());
    Parser::new(input).parse_one()
}

/// Parse every S-expression in the input.
pub fn parse_all(input: &str) -> Result<Vec<Sexpr>, ParseError> {
    Parser::new(input).parse_many()
}

struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            input,
            chars: input.char_indices().peekable(),
            pos: 0,
        }
    }

    fn parse_one(&mut self) -> Result<Sexpr, ParseError> {
        self.skip_trivia();
        match self.peek() {
            None => Err(ParseError::UnexpectedEof),
            Some('(') => self.parse_list(),
            Some(_) => self.parse_atom(),
        }
    }

    fn parse_many(&mut self) -> Result<Vec<Sexpr>, ParseError> {
        let mut results = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek().is_none() {
                break;
            }
            results.push(self.parse_one()?);
        }
        Ok(results)
    }

    fn parse_list(&mut self) -> Result<Sexpr, ParseError> {
        self.expect('(')?;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(ParseError::UnclosedList),
                Some(')') => {
                    self.bump();
                    break;
                }
                Some(_) => items.push(self.parse_one()?),
            }
        }
        Ok(Sexpr::List(items))
    }

    fn parse_atom(&mut self) -> Result<Sexpr, ParseError> {
        if self.peek() == Some('"') {
            return self.parse_quoted();
        }
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ch == '(' || ch == ')' {
                break;
            }
            self.bump();
        }
        if self.pos == start {
            return Err(ParseError::EmptyAtom);
        }
        Ok(Sexpr::Symbol(self.input[start..self.pos].to_string()))
    }

    fn parse_quoted(&mut self) -> Result<Sexpr, ParseError> {
        self.expect('"')?;
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(ParseError::UnterminatedString),
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    match self.peek() {
                        Some('n') => text.push('\n'),
                        Some('r') => text.push('\r'),
                        Some('t') => text.push('\t'),
                        Some('\\') => text.push('\\'),
                        Some('"') => text.push('"'),
                        Some(other) => text.push(other),
                        None => return Err(ParseError::UnterminatedString),
                    }
                    self.bump();
                }
                Some(ch) => {
                    text.push(ch);
                    self.bump();
                }
            }
        }
        Ok(Sexpr::String(text))
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == ';' {
                // Line comment
                while let Some(ch) = self.peek() {
                    self.bump();
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn bump(&mut self) {
        if let Some((pos, ch)) = self.chars.next() {
            self.pos = pos + ch.len_utf8();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        match self.peek() {
            Some(ch) if ch == expected => {
                self.bump();
                Ok(())
            }
            Some(ch) => Err(ParseError::UnexpectedChar(ch, expected)),
            None => Err(ParseError::UnexpectedEof),
        }
    }
}

pub(crate) fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(ch),
        }
    }
    result
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut w = SexpWriter::new();
        w.tree(self);
        write!(f, "{}", w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_atoms() {
        assert_eq!(parse("hello").unwrap(), Sexpr::symbol("hello"));
        assert_eq!(parse("2.54").unwrap(), Sexpr::symbol("2.54"));
        assert_eq!(parse("power_in").unwrap(), Sexpr::symbol("power_in"));
    }

    #[test]
    fn parses_strings_with_escapes() {
        assert_eq!(
            parse("\"net name\"").unwrap(),
            Sexpr::string("net name")
        );
        assert_eq!(
            parse("\"say \\\"hi\\\"\"").unwrap(),
            Sexpr::string("say \"hi\"")
        );
        assert_eq!(parse("\"a\\nb\"").unwrap(), Sexpr::string("a\nb"));
    }

    #[test]
    fn parses_lists() {
        assert_eq!(parse("()").unwrap(), Sexpr::List(vec![]));
        assert_eq!(
            parse("(at 10 20 0)").unwrap(),
            Sexpr::list(vec![
                Sexpr::symbol("at"),
                Sexpr::symbol("10"),
                Sexpr::symbol("20"),
                Sexpr::symbol("0"),
            ])
        );
    }

    #[test]
    fn parses_nested_pin() {
        let input = r#"(pin passive line (at 0 -2.54 90) (length 2.54) (name "GND") (number "2"))"#;
        let pin = parse(input).unwrap();
        assert_eq!(pin.head(), Some("pin"));
        assert_eq!(pin.atom_at(1), Some("passive"));
        let name = pin.child("name").unwrap();
        assert_eq!(name.atom_at(1), Some("GND"));
        // Pin numbers must stay quoted strings, not symbols
        let number = pin.child("number").unwrap();
        assert_eq!(
            number.as_list().unwrap()[1],
            Sexpr::string("2")
        );
    }

    #[test]
    fn skips_comments() {
        let input = "; header comment\n(symbol ; inline\n  \"R_0402\")";
        let parsed = parse(input).unwrap();
        assert_eq!(
            parsed,
            Sexpr::list(vec![Sexpr::symbol("symbol"), Sexpr::string("R_0402")])
        );
    }

    #[test]
    fn parse_many_reads_sibling_forms() {
        let forms = parse_all("(a 1) (b 2)").unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[1].head(), Some("b"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse("(unclosed"), Err(ParseError::UnclosedList));
        assert_eq!(parse("\"open"), Err(ParseError::UnterminatedString));
        assert_eq!(parse(""), Err(ParseError::UnexpectedEof));
    }

    #[test]
    fn utf8_atoms_survive() {
        let parsed = parse(r#"(value "résistance" "10kΩ")"#).unwrap();
        let items = parsed.as_list().unwrap();
        assert_eq!(items[1], Sexpr::string("résistance"));
        assert_eq!(items[2], Sexpr::string("10kΩ"));
    }

    #[test]
    fn display_round_trips() {
        let inputs = [
            "(simple list)",
            "(nested (list with) (multiple levels))",
            r#"(with "quoted string" and atoms)"#,
            r#"(pin passive line (at 0 0 0) (length 2.54) (name "1") (number "1"))"#,
        ];
        for input in inputs {
            let parsed = parse(input).unwrap();
            let reparsed = parse(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed, "round trip failed for: {input}");
        }
    }
}
