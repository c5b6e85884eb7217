//! MQTT topic filter matching

/// Check whether `topic` is matched by the subscription `filter`.
///
/// `+` matches exactly one level, `#` matches the remaining levels (including
/// the parent level itself). Topics starting with `$` are never matched by a
/// wildcard in the first level.
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("sensors/temp", "sensors/temp"));
        assert!(!matches("sensors/temp", "sensors/humidity"));
        assert!(!matches("sensors/temp", "sensors/temp/room1"));
        assert!(!matches("sensors/temp/room1", "sensors/temp"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("sensors/+/room1", "sensors/temp/room1"));
        assert!(matches("+", "sensors"));
        assert!(matches("sensors/+", "sensors/"));
        assert!(!matches("sensors/+", "sensors/temp/room1"));
        assert!(!matches("+", "sensors/temp"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("#", "sensors/temp/room1"));
        assert!(matches("sensors/#", "sensors/temp/room1"));
        assert!(matches("sensors/#", "sensors"));
        assert!(!matches("sensors/#", "actuators/valve"));
        assert!(!matches("sensors/#/room1", "sensors/temp/room1"));
    }

    #[test]
    fn test_system_topics_hidden_from_leading_wildcards() {
        assert!(!matches("#", "$SYS/broker/uptime"));
        assert!(!matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_leading_slash_is_a_level() {
        assert!(matches("/control/+/input", "/control/agent/input"));
        assert!(!matches("control/+/input", "/control/agent/input"));
    }
}
