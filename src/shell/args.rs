//! Command line splitting and variable expansion

use std::collections::BTreeMap;

/// Split a command line on blanks, honoring `'...'` and `"..."`.
///
/// A quote of the other kind inside a quoted run is kept literally. An
/// unterminated quote runs to the end of the line.
pub fn parse_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    // Distinguishes `""` (an empty argument) from no argument at all
    let mut quoted = false;

    for ch in input.chars() {
        match (ch, quote) {
            ('"' | '\'', None) => {
                quote = Some(ch);
                quoted = true;
            }
            (c, Some(q)) if c == q => quote = None,
            (' ' | '\t', None) => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            (c, _) => current.push(c),
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }
    args
}

/// Quote `arg` so that [`parse_args`] reads it back as one argument.
pub fn quote(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if !arg.contains(char::is_whitespace) && !arg.contains(['"', '\'']) {
        return arg.to_string();
    }
    if arg.contains('"') {
        format!("'{}'", arg)
    } else {
        format!("\"{}\"", arg)
    }
}

/// Replace `$NAME` and `${NAME}` with values from `overrides`, then from
/// the process environment. Unknown or empty variables are left as written.
pub fn expand_vars(input: &str, overrides: &BTreeMap<String, String>) -> String {
    expand_with(input, |name| {
        overrides
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok().filter(|v| !v.is_empty()))
    })
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(inner) = after.strip_prefix('{') {
            match inner.find('}') {
                Some(end) if is_name(&inner[..end]) => (&inner[..end], end + 2),
                _ => ("", 0),
            }
        } else {
            let len = name_len(after);
            (&after[..len], len)
        };

        match (consumed, lookup(name)) {
            (0, _) => {
                out.push('$');
                rest = after;
            }
            (_, Some(value)) => {
                out.push_str(&value);
                rest = &after[consumed..];
            }
            (_, None) => {
                out.push('$');
                out.push_str(&after[..consumed]);
                rest = &after[consumed..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn name_len(s: &str) -> usize {
    let mut len = 0;
    for (i, ch) in s.char_indices() {
        let ok = if i == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_'
        };
        if !ok {
            break;
        }
        len = i + ch.len_utf8();
    }
    len
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && name_len(s) == s.len()
}
