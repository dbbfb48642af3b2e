//! Glob patterns (`user:*`, `order:?`, `item:[ab]*`) compiled to anchored regexes,
//! with the same semantics as Redis `SCAN MATCH`.

use regex::Regex;

/// Compile a store-style glob into an anchored [`Regex`]
///
/// Returns `None` for patterns that do not compile (e.g. an unterminated
/// character class), which callers treat as "matches nothing".
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') || chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                if !closed {
                    return None;
                }
                out.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, key: &str) -> bool {
        glob_to_regex(pattern).is_some_and(|re| re.is_match(key))
    }

    #[test]
    fn star_matches_suffixes() {
        assert!(matches("user:*", "user:1"));
        assert!(matches("user:*", "user:1:v:3"));
        assert!(!matches("user:*", "order:1"));
        assert!(!matches("user:*", "xuser:1"));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(matches("order:?", "order:7"));
        assert!(!matches("order:?", "order:77"));
        assert!(matches("item:[ab]", "item:a"));
        assert!(!matches("item:[^ab]", "item:a"));
        assert!(matches("item:[!ab]", "item:c"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(matches("price.$(1)", "price.$(1)"));
        assert!(!matches("a.c", "abc"));
        assert!(matches(r"literal\*", "literal*"));
    }

    #[test]
    fn unterminated_class_is_rejected() {
        assert!(glob_to_regex("bad:[abc").is_none());
    }
}
