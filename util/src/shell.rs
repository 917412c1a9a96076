//! Quoting helpers for the two generated-script dialects.

/// Characters that can appear unquoted in a POSIX shell word.
fn is_safe_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-' | '_')
}

/// Quote `s` as a single POSIX shell word.
/// Safe strings pass through unchanged; everything else is single-quoted,
/// with embedded single quotes spliced out as `'"'"'`.
pub fn quote_bash(s: &str) -> String {
    if s.is_empty() {
        return "''".to_owned();
    }
    if s.chars().all(is_safe_word_char) {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Escape `s` for interpolation into a double-quoted PowerShell string.
pub fn escape_pwsh(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '`' => out.push_str("``"),
            '"' => out.push_str("`\""),
            '$' => out.push_str("`$"),
            _ => out.push(c),
        }
    }
    out
}

/// Quote `s` as a double-quoted PowerShell string literal.
pub fn quote_pwsh(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    out.push_str(&escape_pwsh(s));
    out.push('"');
    out
}
