//! Content analysis: classify fragments before a backend is chosen.

mod lexer;
pub mod normalize;

pub use lexer::{commands, tokenize, Token};
pub use normalize::{balance_braces, collapse_escapes, normalize, strip_unsupported};

use crate::fragment::{ComplexityTier, ContentAnalysis};

/// Letters that only appear in natural-language (Turkish) text.
const DIACRITICS: &[char] = &['ç', 'ğ', 'ı', 'ö', 'ş', 'ü', 'Ç', 'Ğ', 'İ', 'Ö', 'Ş', 'Ü'];

/// Common connective words of the tutoring languages.
const CONNECTIVES: &[&str] = &[
    // Turkish
    "ve", "veya", "ile", "için", "bu", "şu", "bir", "olur", "olarak", "ise", "eğer", "değil",
    "adım", "adımda", "burada", "sonra", "önce", "yani", "çünkü", "böylece", "buna", "göre",
    "elde", "ederiz", "bulunur", "olduğundan", "sonuç",
    // English
    "the", "and", "then", "where", "let", "is", "are", "we", "so", "therefore", "thus", "step",
    "since", "because", "which", "gives", "get", "into", "from", "with",
];

/// Commands counted as "advanced" constructs.
const ADVANCED_COMMANDS: &[&str] = &[
    "begin", "sum", "int", "iint", "iiint", "oint", "prod", "lim", "overset", "underset",
    "overbrace", "underbrace", "overline", "underline", "stackrel",
];

const FRACTION_COMMANDS: &[&str] = &["frac", "dfrac", "tfrac", "cfrac"];

/// Analyze a fragment's raw text.
///
/// Pure and total: empty or whitespace-only input yields the default
/// plain-text, simple analysis.
pub fn analyze(text: &str) -> ContentAnalysis {
    if text.trim().is_empty() {
        return ContentAnalysis::default();
    }

    let text = collapse_escapes(text);
    let tokens = tokenize(&text);

    let delimited = tokens
        .iter()
        .filter(|t| !matches!(t, Token::Text(_)))
        .count();
    let command_names = commands(&text);

    let prose: String = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Text(s) => Some(*s),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ");
    let (has_diacritics, connective_hits) = natural_language_signals(&prose);

    let has_natural_language = has_diacritics || connective_hits > 0;
    let has_math_markup = delimited > 0 || !command_names.is_empty();

    let hits = command_names
        .iter()
        .filter(|name| ADVANCED_COMMANDS.contains(*name))
        .count()
        + nested_fractions(&text);

    let strength = delimited as f32
        + 0.5 * command_names.len() as f32
        + if has_diacritics { 1.0 } else { 0.0 }
        + 0.5 * connective_hits as f32;
    let confidence = (strength / (strength + 1.0)).clamp(0.0, 1.0);

    ContentAnalysis {
        has_natural_language,
        has_math_markup,
        is_mixed: has_natural_language && has_math_markup,
        complexity: ComplexityTier::from_hits(hits),
        confidence,
    }
}

fn natural_language_signals(prose: &str) -> (bool, usize) {
    let has_diacritics = prose.chars().any(|c| DIACRITICS.contains(&c));

    // Words attached to a backslash are command names, not prose
    let connective_hits = prose
        .split(|c: char| !c.is_alphabetic() && c != '\\')
        .filter(|word| !word.starts_with('\\'))
        .map(|word| word.to_lowercase())
        .filter(|word| CONNECTIVES.contains(&word.as_str()))
        .count();

    (has_diacritics, connective_hits)
}

/// Count fractions that start inside another fraction's arguments.
fn nested_fractions(text: &str) -> usize {
    // (brace depth at the fraction, argument groups still open)
    let mut open: Vec<(usize, u8)> = Vec::new();
    let mut depth = 0usize;
    let mut nested = 0;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        match c {
            '\\' => {
                if let Ok((after, name)) = lexer::command(rest) {
                    if FRACTION_COMMANDS.contains(&name) {
                        if !open.is_empty() {
                            nested += 1;
                        }
                        if after.trim_start().starts_with('{') {
                            open.push((depth, 2));
                        }
                    }
                    rest = after;
                    continue;
                }
                // Escaped character: skip both
                let skip = rest[1..].chars().next().map(char::len_utf8).unwrap_or(0);
                rest = &rest[1 + skip..];
                continue;
            }
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if let Some(top) = open.last_mut() {
                    if top.0 == depth {
                        top.1 -= 1;
                        if top.1 == 0 {
                            open.pop();
                        }
                    }
                }
            }
            _ => {}
        }
        rest = &rest[c.len_utf8()..];
    }

    nested
}
