/// Largest index `<= max` that lands on a UTF-8 character boundary of `s`.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Truncate `s` to at most `max_bytes` without splitting a character.
pub(crate) fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    &s[..floor_char_boundary(s, max_bytes)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_at_or_past_end_is_len() {
        assert_eq!(floor_char_boundary("abc", 3), 3);
        assert_eq!(floor_char_boundary("abc", 10), 3);
    }

    #[test]
    fn boundary_backs_off_inside_multibyte_char() {
        let s = "a退款"; // 'a' = 1 byte, each CJK char = 3 bytes
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 1);
        assert_eq!(floor_char_boundary(s, 4), 4);
    }

    #[test]
    fn truncate_never_splits_characters() {
        let s = "退款问题";
        let t = truncate_to_boundary(s, 7);
        assert_eq!(t, "退款");
        assert!(s.starts_with(t));
    }

    #[test]
    fn truncate_short_string_is_identity() {
        assert_eq!(truncate_to_boundary("hello", 100), "hello");
    }
}
