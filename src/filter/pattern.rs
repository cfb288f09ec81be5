//! Test-name patterns in shell-glob syntax.
//!
//! Patterns accept `*`, `?`, character classes negated with `^`, and
//! backslash escapes. They are rewritten into the dialect of the `glob`
//! crate, which negates with `!` and has no escape character.

use std::iter::Peekable;
use std::str::Chars;

use glob::Pattern;

enum ClassItem {
    Single(char),
    Range(char, char),
}

/// Compiles `pattern` for matching test names.
///
/// # Errors
///
/// Returns a description of the problem for malformed patterns.
pub(crate) fn compile(pattern: &str) -> Result<Pattern, String> {
    let translated = translate(pattern)?;
    Pattern::new(&translated).map_err(|err| err.to_string())
}

fn translate(pattern: &str) -> Result<String, String> {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| String::from("trailing backslash"))?;
                push_literal(&mut out, escaped);
            }
            '[' => translate_class(&mut chars, &mut out)?,
            other => out.push(other),
        }
    }
    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if matches!(c, '*' | '?' | '[' | ']') {
        out.push('[');
        out.push(c);
        out.push(']');
    } else {
        out.push(c);
    }
}

fn class_char(first: char, chars: &mut Peekable<Chars<'_>>) -> Result<char, String> {
    match first {
        '\\' => chars
            .next()
            .ok_or_else(|| String::from("unterminated character class")),
        '-' | ']' => Err(format!("unescaped '{first}' in character class")),
        other => Ok(other),
    }
}

fn translate_class(chars: &mut Peekable<Chars<'_>>, out: &mut String) -> Result<(), String> {
    let negated = chars.next_if_eq(&'^').is_some();
    let mut items = Vec::new();
    loop {
        let c = chars
            .next()
            .ok_or_else(|| String::from("unterminated character class"))?;
        if c == ']' {
            if items.is_empty() {
                return Err(String::from("empty character class"));
            }
            break;
        }
        let lo = class_char(c, chars)?;
        if chars.next_if_eq(&'-').is_some() {
            let raw = chars
                .next()
                .ok_or_else(|| String::from("unterminated character class"))?;
            items.push(ClassItem::Range(lo, class_char(raw, chars)?));
        } else {
            items.push(ClassItem::Single(lo));
        }
    }

    if !negated && let [ClassItem::Single(only)] = items.as_slice() {
        push_literal(out, *only);
        return Ok(());
    }

    // `]` is only literal first, `!` only literal after the first member,
    // and `-` only literal last.
    let rank = |item: &ClassItem| match item {
        ClassItem::Single(']') => 0,
        ClassItem::Single('!') => 2,
        ClassItem::Single('-') => 3,
        _ => 1,
    };
    items.sort_by_key(rank);
    out.push('[');
    if negated {
        out.push('!');
    }
    for item in items {
        match item {
            ClassItem::Single(c) => out.push(c),
            ClassItem::Range(lo, hi) => {
                out.push(lo);
                out.push('-');
                out.push(hi);
            }
        }
    }
    out.push(']');
    Ok(())
}
