//! Quote- and bracket-aware scanning of action argument lists.

use tabflow_core_types::ArgValue;

use super::signature::ParamType;

const QUOTES: [char; 3] = ['"', '\'', '`'];

fn closer(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        _ => None,
    }
}

/// Walks `input` and calls `visit` for every character outside string
/// literals together with the current bracket depth.
fn scan(input: &str, mut visit: impl FnMut(usize, char, usize) -> bool) -> Result<(), String> {
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }

        if QUOTES.contains(&ch) {
            quote = Some(ch);
            continue;
        }
        if let Some(close) = closer(ch) {
            stack.push(close);
        } else if matches!(ch, ')' | ']' | '}') {
            match stack.pop() {
                Some(expected) if expected == ch => {}
                Some(expected) => return Err(format!("expected `{expected}` but found `{ch}`")),
                None => return Err(format!("unbalanced `{ch}`")),
            }
        }
        if !visit(idx, ch, stack.len()) {
            return Ok(());
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    if let Some(expected) = stack.last() {
        return Err(format!("missing closing `{expected}`"));
    }
    Ok(())
}

/// Splits `(body)rest` into `body` and `rest`. `input` must start with `(`.
pub(crate) fn enclosed(input: &str) -> Result<(&str, &str), String> {
    let mut end = None;
    scan(input, |idx, ch, depth| {
        if depth == 0 && ch == ')' {
            end = Some(idx);
            return false;
        }
        true
    })?;
    match end {
        Some(idx) => Ok((&input[1..idx], &input[idx + 1..])),
        None => Err("missing closing `)`".to_string()),
    }
}

/// Splits a comma separated list at top-level commas.
pub(crate) fn split_arguments(body: &str) -> Result<Vec<&str>, String> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut cuts = Vec::new();
    scan(body, |idx, ch, depth| {
        if depth == 0 && ch == ',' {
            cuts.push(idx);
        }
        true
    })?;

    let mut args = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(body.len())) {
        let arg = body[start..cut].trim();
        if arg.is_empty() {
            return Err("empty argument".to_string());
        }
        args.push(arg);
        start = cut + 1;
    }
    Ok(args)
}

/// Decodes a single quoted string literal with backslash escapes.
pub(crate) fn string_literal(raw: &str) -> Option<String> {
    let open = raw.chars().next()?;
    if !QUOTES.contains(&open) || raw.len() < 2 || !raw.ends_with(open) {
        return None;
    }
    let inner = &raw[1..raw.len() - 1];

    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            out.push(match ch {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == open {
            return None;
        } else {
            out.push(ch);
        }
    }
    if escaped {
        return None;
    }
    Some(out)
}

pub(crate) fn literal(raw: &str, ty: ParamType) -> Option<ArgValue> {
    match ty {
        ParamType::Number => raw
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(ArgValue::Number),
        ParamType::String => string_literal(raw).map(ArgValue::String),
        ParamType::Boolean => {
            if raw.eq_ignore_ascii_case("true") {
                Some(ArgValue::Bool(true))
            } else if raw.eq_ignore_ascii_case("false") {
                Some(ArgValue::Bool(false))
            } else {
                None
            }
        }
        ParamType::StringArray => {
            let inner = raw.strip_prefix('[')?.strip_suffix(']')?;
            split_arguments(inner)
                .ok()?
                .into_iter()
                .map(string_literal)
                .collect::<Option<Vec<_>>>()
                .map(ArgValue::StringList)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commas_inside_quotes_and_brackets_do_not_split() {
        let args = split_arguments(r#"3, "a, b", ["x", "y,z"]"#).unwrap();
        assert_eq!(args, vec!["3", r#""a, b""#, r#"["x", "y,z"]"#]);
    }

    #[test]
    fn enclosed_ignores_parens_in_strings() {
        let (body, rest) = enclosed(r#"(5, "smile :)")"#).unwrap();
        assert_eq!(body, r#"5, "smile :)""#);
        assert_eq!(rest, "");
    }

    #[test]
    fn unbalanced_input_is_rejected() {
        assert!(enclosed("(5").is_err());
        assert!(enclosed(r#"("abc)"#).is_err());
        assert!(split_arguments("1,").is_err());
        assert!(split_arguments("[1)").is_err());
    }

    #[test]
    fn string_literals_unescape() {
        assert_eq!(string_literal(r#""say \"hi\"""#).as_deref(), Some(r#"say "hi""#));
        assert_eq!(string_literal("'it\\'s'").as_deref(), Some("it's"));
        assert_eq!(string_literal("`tick`").as_deref(), Some("tick"));
        assert_eq!(string_literal("bare"), None);
        assert_eq!(string_literal(r#""a" "b""#), None);
    }

    #[test]
    fn literal_types_are_strict() {
        assert_eq!(literal("12", ParamType::Number), Some(ArgValue::Number(12.0)));
        assert_eq!(literal("\"12\"", ParamType::Number), None);
        assert_eq!(literal("TRUE", ParamType::Boolean), Some(ArgValue::Bool(true)));
        assert_eq!(
            literal(r#"["a", 'b']"#, ParamType::StringArray),
            Some(ArgValue::StringList(vec!["a".into(), "b".into()]))
        );
        assert_eq!(literal("[1]", ParamType::StringArray), None);
        assert_eq!(literal("inf", ParamType::Number), None);
    }
}
