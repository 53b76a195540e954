use std::time::Duration;

use anyhow::Context;
use heatzone_common::{config::is_valid_zone_id, temperature_topic, Temperature};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, info, warn};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let zones = parse_zones(&std::env::var("HEATZONE_ZONES").unwrap_or_else(|_| "main".to_string()));
    anyhow::ensure!(!zones.is_empty(), "HEATZONE_ZONES names no valid zone");

    let mut mqtt_options = MqttOptions::new("heatzone-sensor", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!(zones = ?zones, "sensor publisher started");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        // Stand-in for real probes; each zone drifts on its own phase.
        for (index, zone) in zones.iter().enumerate() {
            let reading = simulated_reading(tick, index);
            debug!(zone = %zone, %reading, "publishing reading");
            mqtt.publish(temperature_topic(zone), QoS::AtLeastOnce, false, payload(reading))
                .await
                .with_context(|| format!("failed to publish temperature for zone {zone}"))?;
        }
    }
}

fn parse_zones(raw: &str) -> Vec<String> {
    let mut zones: Vec<String> = Vec::new();
    for zone in raw.split(',').map(str::trim) {
        if !is_valid_zone_id(zone) {
            if !zone.is_empty() {
                warn!(zone, "skipping invalid zone id");
            }
            continue;
        }
        if !zones.iter().any(|known| known == zone) {
            zones.push(zone.to_string());
        }
    }
    zones
}

/// Walks 17.0°C to 19.8°C and back in 0.4°C steps.
fn simulated_reading(tick: u64, zone_index: usize) -> Temperature {
    let step = (tick + zone_index as u64 * 3) % 14;
    let offset = if step < 7 { step } else { 14 - step };
    Temperature::from_millis(17_000 + offset as i32 * 400)
}

/// Decimal Celsius, the form the controller parses.
fn payload(reading: Temperature) -> String {
    format!("{:.3}", reading.celsius())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn zone_list_is_cleaned_up() {
        assert_eq!(
            parse_zones(" living-room, ,bathroom,../x,living-room"),
            vec!["living-room".to_string(), "bathroom".to_string()]
        );
        assert!(parse_zones("").is_empty());
    }

    #[test]
    fn readings_oscillate_within_the_band() {
        let readings: Vec<i32> = (0..14).map(|tick| simulated_reading(tick, 0).millis()).collect();
        assert_eq!(readings[0], 17_000);
        assert_eq!(readings[7], 19_800);
        assert_eq!(readings[13], 17_400);
        assert!(readings.iter().all(|r| (17_000..=19_800).contains(r)));

        assert_ne!(simulated_reading(0, 0), simulated_reading(0, 1));
    }

    #[test]
    fn payload_parses_back() {
        let reading = Temperature::from_millis(18_600);
        assert_eq!(payload(reading), "18.600");
        assert_eq!(payload(reading).parse::<Temperature>(), Ok(reading));
    }
}
