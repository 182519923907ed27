//! # Adapter Configuration
//!
//! Values the driver programs into the adapter at initialisation and after
//! every bus reset, plus the overrides accepted from the host's argument
//! string. Parsing the string is the host's job; the setters here only
//! range-check the numbers it produces.

use crate::error::ConfigError;
use aha154x_hal::command::params;

/// Accepted bus-on time overrides, in microseconds
pub const BUS_ON_TIME_RANGE: (u32, u32) = (2, 15);

/// Accepted maximum-CDB-length overrides
pub const MAX_CDB_LENGTH_RANGE: (u32, u32) = (6, 20);

/// Per-adapter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    bus_on_time: u8,
    bus_off_time: u8,
    transfer_speed: Option<u8>,
    selection_timeout_ms: u16,
    max_cdb_length: Option<u8>,
    scam: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            bus_on_time: params::DEFAULT_BUS_ON_TIME,
            bus_off_time: params::DEFAULT_BUS_OFF_TIME,
            transfer_speed: Some(params::DMA_SPEED_5_MBS),
            selection_timeout_ms: 500,
            max_cdb_length: None,
            scam: false,
        }
    }
}

impl AdapterConfig {
    /// Bus-on time programmed into the adapter
    pub const fn bus_on_time(&self) -> u8 {
        self.bus_on_time
    }

    /// Bus-off time programmed into the adapter
    pub const fn bus_off_time(&self) -> u8 {
        self.bus_off_time
    }

    /// Forced DMA transfer speed, `None` to keep the jumper setting
    pub const fn transfer_speed(&self) -> Option<u8> {
        self.transfer_speed
    }

    /// Selection timeout in milliseconds
    pub const fn selection_timeout_ms(&self) -> u16 {
        self.selection_timeout_ms
    }

    /// Maximum CDB length override, `None` to derive from the board
    pub const fn max_cdb_length(&self) -> Option<u8> {
        self.max_cdb_length
    }

    /// Whether SCAM may be issued when the adapter supports it
    pub const fn scam(&self) -> bool {
        self.scam
    }

    /// Override the bus-on time (`BUSONTIME`)
    pub fn set_bus_on_time(&mut self, value: u32) -> Result<(), ConfigError> {
        self.bus_on_time = checked("bus_on_time", value, BUS_ON_TIME_RANGE)?;
        Ok(())
    }

    /// Override the maximum CDB length (`MAXCDBLENGTH`)
    pub fn set_max_cdb_length(&mut self, value: u32) -> Result<(), ConfigError> {
        self.max_cdb_length = Some(checked("max_cdb_length", value, MAX_CDB_LENGTH_RANGE)?);
        Ok(())
    }

    /// Set the bus-off time
    pub fn set_bus_off_time(&mut self, value: u8) {
        self.bus_off_time = value;
    }

    /// Force a DMA transfer speed, or leave the jumper setting with `None`
    pub fn set_transfer_speed(&mut self, speed: Option<u8>) {
        self.transfer_speed = speed;
    }

    /// Set the selection timeout
    pub fn set_selection_timeout_ms(&mut self, ms: u16) {
        self.selection_timeout_ms = ms;
    }

    /// Allow SCAM
    pub fn set_scam(&mut self, enabled: bool) {
        self.scam = enabled;
    }

    /// Parameter bytes for set-selection-timeout
    pub const fn selection_timeout_bytes(&self) -> [u8; 4] {
        let [hi, lo] = self.selection_timeout_ms.to_be_bytes();
        [params::SELECTION_TIMEOUT_ENABLE, 0x00, hi, lo]
    }
}

fn checked(name: &'static str, value: u32, (min, max): (u32, u32)) -> Result<u8, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value as u8)
    } else {
        log::warn!("ignoring {} = {}, accepted range is {}..={}", name, value, min, max);
        Err(ConfigError::OutOfRange { name, value, min, max })
    }
}
