//! Lexer for splitting fragments into text and math tokens.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{alpha1, char},
    combinator::{map, verify},
    sequence::{delimited, preceded},
    IResult,
};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    Text(&'a str),
    InlineMath(&'a str),
    DisplayMath(&'a str),
}

/// Parse display math (`$$...$$` or `\[...\]`).
pub fn display_math(input: &str) -> IResult<&str, Token> {
    map(
        alt((
            delimited(tag("$$"), take_until("$$"), tag("$$")),
            delimited(tag("\\["), take_until("\\]"), tag("\\]")),
        )),
        Token::DisplayMath,
    )(input)
}

/// Parse inline math (`$...$` or `\(...\)`).
pub fn inline_math(input: &str) -> IResult<&str, Token> {
    map(
        alt((
            delimited(
                char('$'),
                verify(take_until_unescaped_dollar, |s: &str| !s.trim().is_empty()),
                char('$'),
            ),
            delimited(tag("\\("), take_until("\\)"), tag("\\)")),
        )),
        Token::InlineMath,
    )(input)
}

/// Parse a backslash command token, returning its name.
pub fn command(input: &str) -> IResult<&str, &str> {
    preceded(char('\\'), alpha1)(input)
}

fn take_until_unescaped_dollar(input: &str) -> IResult<&str, &str> {
    let bytes = input.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' => idx += 2,
            b'$' => return Ok((&input[idx..], &input[..idx])),
            _ => idx += 1,
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::TakeUntil,
    )))
}

/// Split input into text and math tokens.
///
/// An opening delimiter without a matching close is kept as text.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut remaining = input;
    let mut text_start = input;
    let mut text_len = 0;

    while !remaining.is_empty() {
        let parsed = if remaining.starts_with("$$") || remaining.starts_with("\\[") {
            display_math(remaining).ok()
        } else if remaining.starts_with('$') || remaining.starts_with("\\(") {
            inline_math(remaining).ok()
        } else {
            None
        };

        if let Some((rest, token)) = parsed {
            if text_len > 0 {
                tokens.push(Token::Text(&text_start[..text_len]));
            }
            tokens.push(token);
            remaining = rest;
            text_start = rest;
            text_len = 0;
            continue;
        }

        // Escaped characters travel with their backslash
        let step = if remaining.starts_with('\\') && remaining.len() > 1 {
            1 + remaining[1..].chars().next().map(char::len_utf8).unwrap_or(0)
        } else {
            remaining.chars().next().map(char::len_utf8).unwrap_or(1)
        };
        text_len += step;
        remaining = &remaining[step..];
    }

    if text_len > 0 {
        tokens.push(Token::Text(&text_start[..text_len]));
    }

    tokens
}

/// All backslash command names in the input, in order of appearance.
pub fn commands(input: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut remaining = input;

    while let Some(pos) = remaining.find('\\') {
        let candidate = &remaining[pos..];
        match command(candidate) {
            Ok((rest, name)) => {
                names.push(name);
                remaining = rest;
            }
            Err(_) => {
                // Skip the backslash and whatever single character it escapes
                let skip = candidate[1..].chars().next().map(char::len_utf8).unwrap_or(0);
                remaining = &candidate[1 + skip..];
            }
        }
    }

    names
}
