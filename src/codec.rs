//! Textual key/value encoding of command fields.
//!
//! A field is written as a self-delimited token, `<name=value>`.
//! The control characters `\`, `<`, `>` and `=` are escaped with a backslash,
//! and line breaks become `\n` / `\r` so that one record always fits on one line.
//!
//! ```txt
//! <element=class#3><property=name><old=Foo><new=Bar \<\<interface\>\>>
//! ```
//!
//! Fields are looked up by name, never by position, so records written by an older
//! version stay readable after fields are appended.
//!
//! Values are opaque to the codec. Callers pre-serialize them (a position becomes
//! `"x,y"`) and parse them back with [`Record::parse_field`].
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

const TOKEN_BEGIN: char = '<';
const TOKEN_END: char = '>';
const TOKEN_ASSIGN: char = '=';
const TOKEN_ESCAPE: char = '\\';

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("invalid value `{value}` for field `{field}`: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            TOKEN_ESCAPE | TOKEN_BEGIN | TOKEN_END | TOKEN_ASSIGN => {
                out.push(TOKEN_ESCAPE);
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
}

/// Writes one `<name=value>` token to `out`.
pub fn write_token(out: &mut String, name: &str, value: &str) {
    out.push(TOKEN_BEGIN);
    escape_into(out, name);
    out.push(TOKEN_ASSIGN);
    escape_into(out, value);
    out.push(TOKEN_END);
}

/// Concatenates `(name, value)` pairs as tokens.
pub fn encode<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (name, value) in fields {
        write_token(&mut out, name, value);
    }
    out
}

/// Extracts the value of field `name` from encoded `text`.
pub fn decode(text: &str, name: &str) -> Result<String, CodecError> {
    Record::parse(text)?.require(name).map(str::to_string)
}

/// One lexical item of an encoded line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// A bare keyword outside any token, e.g. `GROUP` or `MODIFY`.
    Word(String),
    Field(String, String),
}

/// Splits a line into bare words and `<name=value>` fields.
pub fn tokenize_line(line: &str) -> Result<Vec<Token>, CodecError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars();
    let mut word = String::new();

    while let Some(c) = chars.next() {
        match c {
            TOKEN_BEGIN => {
                if !word.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                }
                tokens.push(read_field(&mut chars)?);
            }
            TOKEN_END => {
                return Err(CodecError::Malformed(format!(
                    "unexpected `{}` outside a token",
                    TOKEN_END
                )))
            }
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }

    Ok(tokens)
}

fn read_field<I>(chars: &mut I) -> Result<Token, CodecError>
where
    I: Iterator<Item = char>,
{
    let mut name = String::new();
    let mut value = String::new();
    let mut in_value = false;

    loop {
        let c = chars
            .next()
            .ok_or_else(|| CodecError::Malformed("unterminated token".to_string()))?;
        let target = if in_value { &mut value } else { &mut name };
        match c {
            TOKEN_ESCAPE => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| CodecError::Malformed("dangling escape".to_string()))?;
                match escaped {
                    'n' => target.push('\n'),
                    'r' => target.push('\r'),
                    other => target.push(other),
                }
            }
            TOKEN_ASSIGN if !in_value => in_value = true,
            TOKEN_END => break,
            TOKEN_BEGIN => {
                return Err(CodecError::Malformed(format!(
                    "unescaped `{}` inside a token",
                    TOKEN_BEGIN
                )))
            }
            c => target.push(c),
        }
    }

    if !in_value {
        return Err(CodecError::Malformed(format!(
            "token `{}` has no `{}`",
            name, TOKEN_ASSIGN
        )));
    }
    Ok(Token::Field(name, value))
}

/// An ordered list of named text fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Builder-style [`push`](Record::push).
    pub fn with(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.push(name, value.to_string());
        self
    }

    /// First value of field `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&str, CodecError> {
        self.get(name)
            .ok_or_else(|| CodecError::MissingField(name.to_string()))
    }

    /// Parses a required field with [`FromStr`].
    pub fn parse_field<T>(&self, name: &str) -> Result<T, CodecError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.require(name)?;
        value.parse().map_err(|e: T::Err| CodecError::InvalidValue {
            field: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
    }

    /// Fields whose name starts with `prefix`, with the prefix stripped.
    pub fn fields_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.fields
            .iter()
            .filter_map(move |(n, v)| n.strip_prefix(prefix).map(|n| (n, v.as_str())))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn encode(&self) -> String {
        encode(self.iter())
    }

    /// Parses a text made of fields only.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let mut record = Record::new();
        for token in tokenize_line(text)? {
            match token {
                Token::Field(name, value) => record.push(name, value),
                Token::Word(word) => {
                    return Err(CodecError::Malformed(format!(
                        "unexpected word `{}` in field list",
                        word
                    )))
                }
            }
        }
        Ok(record)
    }
}

impl FromIterator<(String, String)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_plain() {
        let text = encode([("element", "class#1"), ("property", "name")]);

        assert_eq!("<element=class#1><property=name>", text);
    }

    #[test]
    fn escapes_control_characters() {
        let value = "<<interface>> a=b \\ end";
        let text = encode([("stereotype", value)]);

        assert_eq!(
            "<stereotype=\\<\\<interface\\>\\> a\\=b \\\\ end>",
            text
        );
        assert_eq!(value, decode(&text, "stereotype").unwrap());
    }

    #[test]
    fn newlines_stay_on_one_line() {
        let note = "first line\nsecond line\r\n";
        let text = encode([("text", note)]);

        assert!(!text.contains('\n'));
        assert_eq!(note, decode(&text, "text").unwrap());
    }

    #[test]
    fn lookup_by_name_ignores_order_and_unknown_fields() {
        let text = "<future=whatever><new=2><old=1>";

        assert_eq!("1", decode(text, "old").unwrap());
        assert_eq!("2", decode(text, "new").unwrap());
    }

    #[test]
    fn missing_field() {
        assert_eq!(
            Err(CodecError::MissingField("old".to_string())),
            decode("<new=2>", "old")
        );
    }

    #[test]
    fn malformed_tokens() {
        assert!(matches!(
            Record::parse("<name=unterminated"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            Record::parse("<novalue>"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            Record::parse("<a=<b=c>>"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(Record::parse("stray>"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn empty_value() {
        let record = Record::parse("<name=>").unwrap();

        assert_eq!(Some(""), record.get("name"));
    }

    #[test]
    fn tokenize_words_and_fields() {
        let tokens = tokenize_line("GROUP <label=Add class> <count=1> CREATE<element=class#1>").unwrap();

        assert_eq!(
            vec![
                Token::Word("GROUP".to_string()),
                Token::Field("label".to_string(), "Add class".to_string()),
                Token::Field("count".to_string(), "1".to_string()),
                Token::Word("CREATE".to_string()),
                Token::Field("element".to_string(), "class#1".to_string()),
            ],
            tokens
        );
    }

    #[test]
    fn prefixed_fields() {
        let record = Record::new()
            .with("element", "link#4")
            .with("arg.name", "uses")
            .with("link.source", "class#1")
            .with("link.destination", "class#2");

        let links: Vec<_> = record.fields_with_prefix("link.").collect();

        assert_eq!(vec![("source", "class#1"), ("destination", "class#2")], links);
    }

    #[test]
    fn parse_field_reports_invalid_value() {
        let record = Record::new().with("count", "two");

        assert!(matches!(
            record.parse_field::<usize>("count"),
            Err(CodecError::InvalidValue { .. })
        ));
        assert_eq!(
            3,
            Record::new().with("count", 3).parse_field::<usize>("count").unwrap()
        );
    }
}
