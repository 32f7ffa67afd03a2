/// Quote a string so POSIX shells treat it as exactly one word.
///
/// Wraps the value in single quotes and rewrites every embedded `'` as
/// `'"'"'` (close quote, quoted quote, reopen quote). The result is a
/// single argv element regardless of whitespace or metacharacters.
pub fn shell_single_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Bound a string to under `max_length` bytes. The cut point is floored
/// to a char boundary: the input may be arbitrary text (job failure
/// messages, user-authored specs), never assume ASCII.
pub fn cut(mut str: String, max_length: usize) -> String {
    if str.len() <= max_length {
        return str;
    }
    let mut end = max_length - 1;
    while !str.is_char_boundary(end) {
        end -= 1;
    }
    str.truncate(end);
    str
}

/// Lowercase a work-item id into a DNS-1123 compatible name fragment.
/// Anything outside `[a-z0-9-]` becomes `-`; leading/trailing dashes are
/// trimmed.
pub fn to_label_safe(value: &str) -> String {
    let mut out: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    while out.starts_with('-') {
        out.remove(0);
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_plain_values_is_transparent() {
        assert_eq!(shell_single_quote("upstream"), "'upstream'");
        assert_eq!(
            shell_single_quote("https://github.com/org/repo.git"),
            "'https://github.com/org/repo.git'"
        );
    }

    #[test]
    fn quoting_defuses_metacharacters() {
        assert_eq!(shell_single_quote("a; rm -rf /"), "'a; rm -rf /'");
        assert_eq!(shell_single_quote("$(whoami)"), "'$(whoami)'");
        assert_eq!(shell_single_quote("a b"), "'a b'");
    }

    #[test]
    fn quoting_escapes_embedded_single_quotes() {
        // A single quote is never left inside the quoted region.
        assert_eq!(shell_single_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_single_quote("'"), "''\"'\"''");
    }

    #[test]
    fn cut_truncates_long_strings() {
        assert_eq!(cut("hello".to_string(), 10), "hello");
        assert_eq!(cut("hello".to_string(), 3), "he");
    }

    #[test]
    fn cut_respects_char_boundaries() {
        // four chars, twelve bytes; the cut at byte 9 lands on a boundary
        assert_eq!(cut("日本語文".to_string(), 10), "日本語");
        // byte 3 is the end of `é`, so the two-char prefix survives whole
        assert_eq!(cut("héllo".to_string(), 4), "hé");
        // byte 3 lands inside `日` and floors to byte 2
        assert_eq!(cut("ab日本".to_string(), 4), "ab");
    }

    #[test]
    fn label_safe_lowers_and_strips() {
        assert_eq!(to_label_safe("PROJ-123"), "proj-123");
        assert_eq!(to_label_safe("42"), "42");
        assert_eq!(to_label_safe("-abc_"), "abc");
    }
}
