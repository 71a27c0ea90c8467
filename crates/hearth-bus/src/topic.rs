/// Match a concrete topic against a subscription filter.
///
/// `+` matches exactly one segment; a trailing `#` matches any number of
/// remaining segments, including none (so `home/#` matches `home` itself).
/// Without wildcards the segment counts must line up exactly.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return filter_parts.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) => {
                if f != t {
                    return false;
                }
            }
            (Some(_), None) => return false,
            (None, Some(_)) => return false,
            (None, None) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::topic_matches;

    #[test]
    fn exact_match() {
        assert!(topic_matches("home/office/status", "home/office/status"));
        assert!(!topic_matches("home/office/status", "home/office/state"));
        assert!(!topic_matches("home/office", "home/office/status"));
        assert!(!topic_matches("home/office/status", "home/office"));
    }

    #[test]
    fn plus_matches_exactly_one_segment() {
        assert!(topic_matches("home/+/status", "home/office/status"));
        assert!(topic_matches("home/+/status", "home/kitchen/status"));
        assert!(!topic_matches("home/+/status", "home/status"));
        assert!(!topic_matches("home/+/status", "home/office/kitchen/status"));
    }

    #[test]
    fn multiple_plus_wildcards() {
        assert!(topic_matches("home/+/+", "home/office/status"));
        assert!(!topic_matches("home/+/+", "home/office"));
        assert!(!topic_matches("home/+/+", "home/office/sensor/temp"));
    }

    #[test]
    fn trailing_hash_matches_any_depth() {
        assert!(topic_matches("home/#", "home/office/status"));
        assert!(topic_matches("home/#", "home/office/sensor/temp"));
        // The hash also matches the parent level itself.
        assert!(topic_matches("home/#", "home"));
        assert!(!topic_matches("home/#", "work/office"));
    }

    #[test]
    fn bare_hash_matches_everything() {
        assert!(topic_matches("#", "home"));
        assert!(topic_matches("#", "home/office/status"));
    }
}
