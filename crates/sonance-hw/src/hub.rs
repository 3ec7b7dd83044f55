//! USB hub port power switching.
//!
//! Hubs with per-port power switching accept the standard hub class
//! `SET_FEATURE` / `CLEAR_FEATURE` requests with the `PORT_POWER` selector.
//! A DAC plugged into such a port can be turned on and off from here.

use std::collections::HashMap;
use std::time::Duration;

use rusb::{Direction, Recipient, RequestType};
use sonance_core::{GatewayError, PowerGateway, SinkId};
use tracing::{debug, info};

use crate::error::{HwError, HwResult};

const CLEAR_FEATURE: u8 = 0x01;
const SET_FEATURE: u8 = 0x03;
const PORT_POWER: u16 = 8;

/// Limit for one control transfer. Keep the gateway timeout above this.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Power gateway for a port-switching USB hub.
#[derive(Debug, Clone)]
pub struct HubPower {
    vendor_id: u16,
    product_id: u16,
    default_port: u8,
    ports: HashMap<SinkId, u8>,
}

impl HubPower {
    /// Create a gateway for the hub with the given USB ids.
    ///
    /// Sinks without an explicit port use `default_port`.
    #[must_use]
    pub fn new(vendor_id: u16, product_id: u16, default_port: u8) -> Self {
        Self { vendor_id, product_id, default_port, ports: HashMap::new() }
    }

    /// Map a sink to a hub port.
    #[must_use]
    pub fn with_port(mut self, sink: SinkId, port: u8) -> Self {
        self.ports.insert(sink, port);
        self
    }

    /// Hub port feeding `sink`.
    #[must_use]
    pub fn port_for(&self, sink: &SinkId) -> u8 {
        self.ports.get(sink).copied().unwrap_or(self.default_port)
    }

    fn switch(vendor_id: u16, product_id: u16, port: u8, on: bool) -> HwResult<()> {
        let devices = rusb::devices()?;
        let device = devices
            .iter()
            .find(|device| {
                device
                    .device_descriptor()
                    .is_ok_and(|desc| desc.vendor_id() == vendor_id && desc.product_id() == product_id)
            })
            .ok_or_else(|| HwError::DeviceNotFound(format!("USB hub {vendor_id:04x}:{product_id:04x}")))?;

        let handle = device.open().map_err(|e| match e {
            rusb::Error::Access => HwError::PermissionDenied,
            other => HwError::UsbError(other),
        })?;

        handle.write_control(
            port_request_type(),
            if on { SET_FEATURE } else { CLEAR_FEATURE },
            PORT_POWER,
            u16::from(port),
            &[],
            CONTROL_TIMEOUT,
        )?;

        debug!(bus = device.bus_number(), address = device.address(), port, on, "Hub port feature written");
        Ok(())
    }
}

/// Host-to-device, class request, addressed to a port ("other").
fn port_request_type() -> u8 {
    rusb::request_type(Direction::Out, RequestType::Class, Recipient::Other)
}

impl PowerGateway for HubPower {
    async fn set_power(&self, sink: &SinkId, on: bool) -> Result<(), GatewayError> {
        let port = self.port_for(sink);
        let (vendor_id, product_id) = (self.vendor_id, self.product_id);

        // Dropping this future does not stop a transfer already running on the
        // blocking pool; CONTROL_TIMEOUT bounds it instead
        tokio::task::spawn_blocking(move || Self::switch(vendor_id, product_id, port, on))
            .await
            .map_err(|e| GatewayError::Device(format!("USB task failed: {e}")))??;

        info!(%sink, port, on, "Hub port power switched");
        Ok(())
    }
}
