use std::collections::BTreeSet;

use crate::OpusError;

/// The fixed shape of an OPUS model. Models differ in the number of output
/// (power) ports, audio ports and which ports are HDMI ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusCapabilities {
    power_port_count: u8,
    audio_port_count: u8,
    hdmi_ports: BTreeSet<u8>,
}

impl OpusCapabilities {
    pub fn new<I>(
        power_port_count: u8,
        audio_port_count: u8,
        hdmi_ports: I,
    ) -> Result<Self, OpusError>
    where
        I: IntoIterator<Item = u8>,
    {
        if power_port_count < 1 {
            return Err(OpusError::InvalidCapabilities(
                "power port count must be greater than 0".to_string(),
            ));
        }
        if audio_port_count < 1 {
            return Err(OpusError::InvalidCapabilities(
                "audio port count must be greater than 0".to_string(),
            ));
        }
        let hdmi_ports: BTreeSet<u8> = hdmi_ports.into_iter().collect();
        if hdmi_ports.is_empty() {
            return Err(OpusError::InvalidCapabilities(
                "hdmi ports cannot be empty".to_string(),
            ));
        }
        if hdmi_ports.contains(&0) {
            return Err(OpusError::InvalidCapabilities(
                "hdmi ports must be positive".to_string(),
            ));
        }

        Ok(Self {
            power_port_count,
            audio_port_count,
            hdmi_ports,
        })
    }

    pub fn power_port_count(&self) -> u8 {
        self.power_port_count
    }

    pub fn audio_port_count(&self) -> u8 {
        self.audio_port_count
    }

    pub fn hdmi_ports(&self) -> &BTreeSet<u8> {
        &self.hdmi_ports
    }

    pub fn is_output_port(&self, port: i64) -> bool {
        port >= 1 && port <= i64::from(self.power_port_count)
    }

    pub fn is_audio_port(&self, port: i64) -> bool {
        port >= 1 && port <= i64::from(self.audio_port_count)
    }

    pub fn is_hdmi_port(&self, port: i64) -> bool {
        u8::try_from(port)
            .map(|p| self.hdmi_ports.contains(&p))
            .unwrap_or(false)
    }
}
