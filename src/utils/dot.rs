//! DOT format helpers for rendering block graphs with Graphviz.

/// Escapes a string so it can be embedded in a quoted DOT record label.
///
/// Quotes, backslashes and the record separators `<`, `>`, `{`, `}` and `|` are
/// backslash-escaped, newlines become left-aligned line breaks (`\l`) and carriage
/// returns are dropped.
///
/// # Examples
///
/// ```rust
/// use dexscope::utils::escape_label;
///
/// assert_eq!(escape_label("invoke<init>"), "invoke\\<init\\>");
/// ```
#[must_use]
pub fn escape_label(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '\\' | '"' | '<' | '>' | '{' | '}' | '|' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\l"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_label_plain() {
        assert_eq!(escape_label("r0 = const 5"), "r0 = const 5");
    }

    #[test]
    fn test_escape_label_specials() {
        assert_eq!(escape_label("\"a\"|b"), "\\\"a\\\"\\|b");
        assert_eq!(escape_label("{x}"), "\\{x\\}");
        assert_eq!(escape_label("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_escape_label_lines() {
        assert_eq!(escape_label("a\r\nb"), "a\\lb");
    }
}
