//! Topic name / topic filter matching.

/// Check whether a topic name matches a subscription filter.
///
/// `+` matches exactly one level, `#` matches the remaining levels
/// (including the parent level itself, so `a/#` matches `a`). Topics
/// starting with `$` are not matched by filters starting with a wildcard
/// (MQTT-4.7.2-1).
pub fn matches(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
