//! Hardware gateways built from configuration.

use anyhow::Result;
use sonance_core::{GatewayError, PowerGateway, SinkId};
use sonance_hw::hub::CONTROL_TIMEOUT;
use sonance_hw::{AlsaMixer, HubPower};
use tracing::{info, warn};

use crate::config::Config;

/// Power control, or none when no switchable hub is configured.
#[derive(Debug)]
pub enum PowerControl {
    Hub(HubPower),
    Disabled,
}

impl PowerGateway for PowerControl {
    async fn set_power(&self, sink: &SinkId, on: bool) -> Result<(), GatewayError> {
        match self {
            Self::Hub(hub) => hub.set_power(sink, on).await,
            Self::Disabled => Err(GatewayError::DeviceNotFound("power control is disabled".to_string())),
        }
    }
}

/// Mixer gateway for the configured cards.
#[must_use]
pub fn mixer(config: &Config) -> AlsaMixer {
    AlsaMixer::new(config.alsa.control.clone())
        .with_allowed_cards(config.alsa.cards.clone())
        .with_default_sink(config.alsa.default_sink.clone().map(SinkId::new))
}

/// Power gateway for the configured hub.
///
/// # Errors
/// Returns an error if the hub USB ids cannot be parsed.
pub fn power(config: &Config) -> Result<PowerControl> {
    if !config.power.enabled {
        return Ok(PowerControl::Disabled);
    }

    let (vendor_id, product_id) = config.power.usb_ids()?;
    let hub = config
        .power
        .ports
        .iter()
        .fold(HubPower::new(vendor_id, product_id, config.power.port), |hub, (sink, port)| {
            hub.with_port(SinkId::new(sink.clone()), *port)
        });
    if config.engine.dispatcher().gateway_timeout <= CONTROL_TIMEOUT {
        warn!(
            gateway_timeout_ms = config.engine.gateway_timeout_ms,
            control_timeout_ms = CONTROL_TIMEOUT.as_millis(),
            "Gateway timeout does not cover a USB transfer; a timed-out power switch may still complete"
        );
    }
    info!(vendor_id = %format!("{vendor_id:04x}"), product_id = %format!("{product_id:04x}"), "Hub power enabled");
    Ok(PowerControl::Hub(hub))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn test_disabled_power_reports_device_not_found() {
        let power = power(&Config::default()).unwrap();
        assert_matches!(power, PowerControl::Disabled);
        assert_matches!(power.set_power(&"A".into(), true).await, Err(GatewayError::DeviceNotFound(_)));
    }

    #[test]
    fn test_power_port_map() {
        let config: Config = toml::from_str(
            r#"
            [power]
            enabled = true
            port = 1
            ports = { DAC = 3 }
            "#,
        )
        .unwrap();
        let PowerControl::Hub(hub) = power(&config).unwrap() else {
            panic!("expected a hub");
        };
        assert_eq!(hub.port_for(&"DAC".into()), 3);
        assert_eq!(hub.port_for(&"PCH".into()), 1);
    }
}
