//! Canonicalization of fragments before cache keying and backend calls,
//! plus the content rewrites used by recovery.

use super::lexer::{command, commands, tokenize, Token};
use crate::fragment::{key_text_of, ContentFragment, NormalizedFragment, Segment};

/// Command names that a doubled backslash is allowed to collapse into.
const KNOWN_COMMANDS: &[&str] = &[
    "frac", "dfrac", "tfrac", "sqrt", "cdot", "cdots", "ldots", "dots", "times", "div", "pm",
    "mp", "le", "leq", "ge", "geq", "neq", "ne", "approx", "equiv", "infty", "int", "iint",
    "oint", "sum", "prod", "lim", "sin", "cos", "tan", "cot", "sec", "csc", "arcsin", "arccos",
    "arctan", "log", "ln", "exp", "alpha", "beta", "gamma", "delta", "epsilon", "varepsilon",
    "theta", "lambda", "mu", "pi", "rho", "sigma", "tau", "phi", "varphi", "omega", "Gamma",
    "Delta", "Theta", "Lambda", "Pi", "Sigma", "Phi", "Omega", "begin", "end", "left", "right",
    "text", "mathrm", "mathbf", "mathbb", "overline", "underline", "overset", "underset",
    "vec", "hat", "bar", "quad", "qquad", "rightarrow", "Rightarrow", "leftarrow",
    "Leftrightarrow", "to", "in", "notin", "subset", "subseteq", "cup", "cap", "forall",
    "exists", "partial", "nabla", "circ", "angle", "binom", "displaystyle", "boxed",
];

/// Environments every math backend handles.
const MATRIX_ENVS: &[&str] = &["matrix", "pmatrix", "bmatrix", "vmatrix", "Vmatrix"];

/// Normalize a fragment into canonical segments.
pub fn normalize(fragment: &ContentFragment) -> NormalizedFragment {
    let collapsed = collapse_escapes(&fragment.raw_text);
    let text = collapsed.trim();

    let mut segments = Vec::new();
    let mut has_delimiters = false;

    for token in tokenize(text) {
        match token {
            Token::Text(raw) => {
                let repaired = repair_text(raw);
                if !repaired.is_empty() {
                    segments.push(Segment::Text(repaired));
                }
            }
            Token::InlineMath(latex) | Token::DisplayMath(latex) => {
                has_delimiters = true;
                let latex = latex.trim();
                if latex.is_empty() {
                    continue;
                }
                segments.push(Segment::Math {
                    latex: latex.to_string(),
                    display: matches!(token, Token::DisplayMath(_)),
                });
            }
        }
    }

    // Bare LaTeX without delimiters is still math
    if !has_delimiters && !commands(text).is_empty() {
        segments = vec![Segment::Math {
            latex: text.to_string(),
            display: fragment.display_mode,
        }];
    }

    let mut display_mode = fragment.display_mode;
    if let [Segment::Math { display, .. }] = segments.as_mut_slice() {
        display_mode |= *display;
        *display = display_mode;
    }

    NormalizedFragment {
        key_text: key_text_of(&segments),
        display_mode,
        segments,
    }
}

/// Collapse redundant escaping introduced by JSON transport.
///
/// Quadrupled backslashes become a LaTeX line break (`\\`); a doubled
/// backslash in front of a known command name or a math delimiter becomes a
/// single one. Other doubled backslashes are real line breaks and stay.
pub fn collapse_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let run = rest[pos..].bytes().take_while(|b| *b == b'\\').count();
        let after = &rest[pos + run..];

        let mut keep = if run >= 4 { run / 2 } else { run };
        if keep == 2 && escapes_command(after) {
            keep = 1;
        }
        for _ in 0..keep {
            out.push('\\');
        }
        rest = after;
    }

    out.push_str(rest);
    out
}

fn escapes_command(after: &str) -> bool {
    if after.starts_with(|c: char| matches!(c, '(' | ')' | '[' | ']')) {
        return true;
    }
    let end = after
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(after.len());
    end > 0 && KNOWN_COMMANDS.contains(&&after[..end])
}

/// Drop unmatched `$` signs and unescape literal ones.
fn repair_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'$') => {
                out.push('$');
                chars.next();
            }
            '$' => {}
            _ => out.push(c),
        }
    }

    out
}

/// Repair unbalanced groups in LaTeX.
///
/// Stray `}` are dropped, missing `}` appended, unpaired `\left`/`\right`
/// completed with null delimiters and unterminated environments closed.
pub fn balance_braces(latex: &str) -> String {
    let mut out = String::with_capacity(latex.len() + 8);
    let mut depth = 0usize;
    let mut chars = latex.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '{' => {
                depth += 1;
                out.push(c);
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    for _ in 0..depth {
        out.push('}');
    }

    let names = commands(&out);
    let lefts = names.iter().filter(|n| **n == "left").count();
    let rights = names.iter().filter(|n| **n == "right").count();
    if lefts > rights {
        for _ in 0..lefts - rights {
            out.push_str(" \\right.");
        }
    } else if rights > lefts {
        out = format!("{}{}", "\\left. ".repeat(rights - lefts), out);
    }

    for env in unclosed_environments(&out).into_iter().rev() {
        out.push_str(&format!("\\end{{{}}}", env));
    }

    out
}

fn unclosed_environments(latex: &str) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    let mut rest = latex;

    while let Some(pos) = rest.find('\\') {
        let here = &rest[pos..];
        match command(here) {
            Ok((after, name)) if name == "begin" || name == "end" => {
                if let Some((env, tail)) = group(after) {
                    if name == "begin" {
                        stack.push(env.to_string());
                    } else if stack.last().map(String::as_str) == Some(env) {
                        stack.pop();
                    }
                    rest = tail;
                } else {
                    rest = after;
                }
            }
            Ok((after, _)) => rest = after,
            Err(_) => rest = &here[1..],
        }
    }

    stack
}

/// Split a leading `{...}` group into its contents and the remainder.
fn group(input: &str) -> Option<(&str, &str)> {
    let trimmed = input.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut escaped = false;
    for (idx, c) in trimmed.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&trimmed[1..idx], &trimmed[idx + 1..]));
                }
            }
            _ => {}
        }
    }

    None
}

/// Remove commands that commonly trip backends and flatten exotic
/// environments to a comma-separated line.
pub fn strip_unsupported(latex: &str) -> String {
    let mut out = String::with_capacity(latex.len());
    let mut rest = latex;

    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let here = &rest[pos..];

        let (after, name) = match command(here) {
            Ok(parsed) => parsed,
            Err(_) => {
                let len = 1 + here[1..].chars().next().map(char::len_utf8).unwrap_or(0);
                out.push_str(&here[..len]);
                rest = &here[len..];
                continue;
            }
        };
        let token = &here[..here.len() - after.len()];

        match name {
            "displaystyle" | "textstyle" | "scriptstyle" | "limits" | "nolimits" => rest = after,
            "left" | "right" => rest = after.strip_prefix('.').unwrap_or(after),
            "color" => rest = group(after).map(|(_, tail)| tail).unwrap_or(after),
            // Keep the coloured body, drop the colour
            "textcolor" => rest = group(after).map(|(_, tail)| tail).unwrap_or(after),
            "text" | "mbox" | "textbf" | "textit" | "textrm" | "operatorname" => {
                out.push_str("\\mathrm");
                rest = after;
            }
            "begin" => match group(after) {
                Some((env, tail)) if !MATRIX_ENVS.contains(&env) => {
                    let closing = format!("\\end{{{}}}", env);
                    let (mut body, tail) = match tail.find(&closing) {
                        Some(idx) => (&tail[..idx], &tail[idx + closing.len()..]),
                        None => (tail, ""),
                    };
                    if env == "array" {
                        body = group(body).map(|(_, b)| b).unwrap_or(body);
                    }
                    out.push_str(&flatten_rows(&strip_unsupported(body)));
                    rest = tail;
                }
                _ => {
                    out.push_str(token);
                    rest = after;
                }
            },
            _ => {
                out.push_str(token);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out.trim().to_string()
}

fn flatten_rows(body: &str) -> String {
    body.trim()
        .trim_end_matches("\\\\")
        .replace("\\\\", ",\\; ")
        .replace('&', " ")
        .trim()
        .to_string()
}
