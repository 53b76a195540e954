pub const TOPIC_PREFIX: &str = "heatzone";

/// Where a zone's sensor publishes decimal Celsius readings.
pub fn temperature_topic(zone: &str) -> String {
    format!("{TOPIC_PREFIX}/{zone}/temperature")
}

pub fn state_topic(zone: &str) -> String {
    format!("{TOPIC_PREFIX}/{zone}/state")
}

/// The zone a temperature topic belongs to.
pub fn zone_of_temperature_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TOPIC_PREFIX)?
        .strip_prefix('/')?
        .strip_suffix("/temperature")
        .filter(|zone| !zone.is_empty() && !zone.contains('/'))
}
