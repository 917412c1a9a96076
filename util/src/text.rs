//! Text helpers for assembling generated scripts.

/// Split `s` into chunks of at most `width` bytes, shrinking a chunk when
/// `width` would land inside a multi-byte character.
pub fn slice_string(s: &str, width: usize) -> Vec<&str> {
    debug_assert!(width > 0);
    let mut out = Vec::with_capacity(s.len() / width + 1);
    let mut rest = s;
    while rest.len() > width {
        let mut at = width;
        while !rest.is_char_boundary(at) {
            at -= 1;
        }
        let (head, tail) = rest.split_at(at);
        out.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

/// Join non-empty script fragments with `glue`; empty fragments are skipped
/// entirely so they contribute neither text nor separators.
pub fn join_scripts<'a, I>(scripts: I, glue: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for s in scripts {
        if s.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str(glue);
        }
        out.push_str(s);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_slice_string_even() {
        assert_eq!(slice_string("abcdef", 2), vec!["ab", "cd", "ef"]);
    }
    #[test]
    fn test_slice_string_remainder() {
        assert_eq!(slice_string("abcde", 2), vec!["ab", "cd", "e"]);
    }
    #[test]
    fn test_slice_string_short() {
        assert_eq!(slice_string("ab", 76), vec!["ab"]);
    }
    #[test]
    fn test_slice_string_empty() {
        assert!(slice_string("", 4).is_empty());
    }
    #[test]
    fn test_slice_string_multibyte() {
        // 'é' is two bytes; chunks must not split it.
        let chunks = slice_string("aéb", 2);
        assert_eq!(chunks, vec!["a", "é", "b"]);
    }
    #[test]
    fn test_join_scripts() {
        let joined = join_scripts(["a", "", "b"], "|");
        assert_eq!(joined, "a|b");
    }
    #[test]
    fn test_join_scripts_all_empty() {
        let joined = join_scripts(["", ""], "|");
        assert_eq!(joined, "");
    }
}
