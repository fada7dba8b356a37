//! Plain-text backend: the last resort that always renders.

use async_trait::async_trait;

use super::{ensure_attached, escape_html, Backend, BackendKind};
use crate::analyze::commands;
use crate::error::BackendError;
use crate::fragment::{ContentAnalysis, ContentFragment, NormalizedFragment, Segment};
use crate::surface::Surface;

/// Renderer that writes escaped text, approximating math with Unicode.
#[derive(Debug, Default)]
pub struct PlainTextBackend;

impl PlainTextBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for PlainTextBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PlainText
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports(&self, _fragment: &ContentFragment, _analysis: &ContentAnalysis) -> bool {
        true
    }

    async fn render(
        &self,
        content: &NormalizedFragment,
        target: &mut Surface,
    ) -> Result<(), BackendError> {
        ensure_attached(target)?;

        let mut body = String::new();
        for segment in &content.segments {
            match segment {
                Segment::Text(text) if commands(text).is_empty() => {
                    body.push_str(&escape_html(text));
                }
                Segment::Text(text) => body.push_str(&escape_html(&to_unicode(text))),
                Segment::Math { latex, .. } => body.push_str(&escape_html(&to_unicode(latex))),
            }
        }

        let markup = if content.display_mode {
            format!(r#"<div class="math-plain display">{}</div>"#, body)
        } else {
            format!(r#"<span class="math-plain">{}</span>"#, body)
        };
        target.replace_markup(markup);
        Ok(())
    }

    async fn reinitialize(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Command → Unicode replacements.
#[rustfmt::skip]
const SYMBOLS: &[(&str, &str)] = &[
    ("alpha", "α"), ("beta", "β"), ("gamma", "γ"), ("delta", "δ"), ("epsilon", "ε"),
    ("varepsilon", "ε"), ("theta", "θ"), ("lambda", "λ"), ("mu", "μ"), ("pi", "π"),
    ("rho", "ρ"), ("sigma", "σ"), ("tau", "τ"), ("phi", "φ"), ("varphi", "φ"), ("omega", "ω"),
    ("Gamma", "Γ"), ("Delta", "Δ"), ("Theta", "Θ"), ("Lambda", "Λ"), ("Pi", "Π"),
    ("Sigma", "Σ"), ("Phi", "Φ"), ("Omega", "Ω"), ("times", "×"), ("cdot", "·"), ("div", "÷"),
    ("pm", "±"), ("mp", "∓"), ("le", "≤"), ("leq", "≤"), ("ge", "≥"), ("geq", "≥"),
    ("ne", "≠"), ("neq", "≠"), ("approx", "≈"), ("equiv", "≡"), ("infty", "∞"), ("int", "∫"),
    ("oint", "∮"), ("sum", "∑"), ("prod", "∏"), ("partial", "∂"), ("nabla", "∇"),
    ("forall", "∀"), ("exists", "∃"), ("in", "∈"), ("notin", "∉"), ("subset", "⊂"),
    ("subseteq", "⊆"), ("cup", "∪"), ("cap", "∩"), ("emptyset", "∅"), ("to", "→"),
    ("rightarrow", "→"), ("Rightarrow", "⇒"), ("leftarrow", "←"), ("Leftrightarrow", "⇔"),
    ("cdots", "⋯"), ("ldots", "…"), ("dots", "…"), ("circ", "∘"), ("degree", "°"),
    ("angle", "∠"), ("quad", " "), ("qquad", "  "), ("lim", "lim"), ("sin", "sin"),
    ("cos", "cos"), ("tan", "tan"), ("log", "log"), ("ln", "ln"), ("exp", "exp"),
];

/// Commands whose argument is kept and the command itself dropped.
const TRANSPARENT: &[&str] = &[
    "text", "mathrm", "mathbf", "mathit", "mathbb", "textbf", "operatorname", "boxed",
    "displaystyle", "left", "right", "overline", "underline", "vec", "hat", "bar",
];

/// Approximate LaTeX with Unicode text.
pub(crate) fn to_unicode(latex: &str) -> String {
    let mut out = String::with_capacity(latex.len());
    let mut rest = latex;

    while let Some(c) = rest.chars().next() {
        match c {
            '\\' => {
                let name_len = rest[1..]
                    .find(|c: char| !c.is_ascii_alphabetic())
                    .unwrap_or(rest.len() - 1);
                if name_len == 0 {
                    // Escaped punctuation or a line break
                    let next = rest[1..].chars().next();
                    match next {
                        Some('\\') => out.push_str("; "),
                        Some(',') | Some(';') | Some(' ') => out.push(' '),
                        Some(other) => out.push(other),
                        None => {}
                    }
                    rest = &rest[1 + next.map(char::len_utf8).unwrap_or(0)..];
                    continue;
                }

                let name = &rest[1..1 + name_len];
                rest = &rest[1 + name_len..];
                match name {
                    "frac" | "dfrac" | "tfrac" => {
                        let (num, after) = argument(rest);
                        let (den, after) = argument(after);
                        let num = parenthesize(&to_unicode(num));
                        let den = parenthesize(&to_unicode(den));
                        out.push_str(&format!("{}/{}", num, den));
                        rest = after;
                    }
                    "sqrt" => {
                        let (arg, after) = argument(rest);
                        out.push('√');
                        out.push_str(&parenthesize(&to_unicode(arg)));
                        rest = after;
                    }
                    "begin" | "end" => {
                        let (_, after) = argument(rest);
                        rest = after;
                    }
                    _ if TRANSPARENT.contains(&name) => {}
                    _ => match SYMBOLS.iter().find(|(cmd, _)| *cmd == name) {
                        Some((_, symbol)) => out.push_str(symbol),
                        None => out.push_str(name),
                    },
                }
            }
            '^' | '_' => {
                let (arg, after) = argument(&rest[1..]);
                let converted = to_unicode(arg);
                let table = if c == '^' { superscript } else { subscript };
                match converted.chars().map(table).collect::<Option<String>>() {
                    Some(small) if !small.is_empty() => out.push_str(&small),
                    _ => {
                        out.push(c);
                        out.push_str(&parenthesize(&converted));
                    }
                }
                rest = after;
            }
            '{' | '}' => rest = &rest[1..],
            '&' => {
                out.push(' ');
                rest = &rest[1..];
            }
            _ => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    out
}

/// A `{group}` or a single character argument.
fn argument(input: &str) -> (&str, &str) {
    let trimmed = input.trim_start();
    let Some(first) = trimmed.chars().next() else {
        return ("", trimmed);
    };

    if first != '{' {
        let len = first.len_utf8();
        return (&trimmed[..len], &trimmed[len..]);
    }

    let mut depth = 0usize;
    for (idx, c) in trimmed.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return (&trimmed[1..idx], &trimmed[idx + 1..]);
                }
            }
            _ => {}
        }
    }
    (&trimmed[1..], "")
}

fn parenthesize(s: &str) -> String {
    if s.chars().count() <= 1 || s.chars().all(|c| c.is_alphanumeric()) {
        s.to_string()
    } else {
        format!("({})", s)
    }
}

fn superscript(c: char) -> Option<char> {
    Some(match c {
        '0' => '⁰', '1' => '¹', '2' => '²', '3' => '³', '4' => '⁴',
        '5' => '⁵', '6' => '⁶', '7' => '⁷', '8' => '⁸', '9' => '⁹',
        '+' => '⁺', '-' => '⁻', '=' => '⁼', '(' => '⁽', ')' => '⁾',
        'n' => 'ⁿ', 'i' => 'ⁱ', 'x' => 'ˣ', 'y' => 'ʸ',
        _ => return None,
    })
}

fn subscript(c: char) -> Option<char> {
    Some(match c {
        '0' => '₀', '1' => '₁', '2' => '₂', '3' => '₃', '4' => '₄',
        '5' => '₅', '6' => '₆', '7' => '₇', '8' => '₈', '9' => '₉',
        '+' => '₊', '-' => '₋', '=' => '₌', '(' => '₍', ')' => '₎',
        'a' => 'ₐ', 'e' => 'ₑ', 'i' => 'ᵢ', 'n' => 'ₙ', 'x' => 'ₓ',
        _ => return None,
    })
}
