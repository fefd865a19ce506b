//! Configuration of the transceiver.
use embassy_time::Duration;

use crate::{
    error::{TrxError, TrxResult},
    hal::{CcaControl, CcaMode},
};

/// The lowest channel in the 2.4 GHz band.
pub const MIN_CHANNEL: u8 = 11;
/// The highest channel in the 2.4 GHz band.
pub const MAX_CHANNEL: u8 = 26;

/// Get the center frequency in MHz of a channel.
pub const fn channel_to_frequency(channel: u8) -> TrxResult<u16> {
    if channel < MIN_CHANNEL || channel > MAX_CHANNEL {
        return Err(TrxError::InvalidChannel);
    }
    Ok(2405 + 5 * (channel - MIN_CHANNEL) as u16)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Parameters of the clear channel assessment.
pub struct CcaConfig {
    pub mode: CcaMode,
    /// Energy threshold, in units of the ED sample.
    pub ed_threshold: u8,
    /// Correlator threshold for carrier sense.
    pub corr_threshold: u8,
    /// Number of correlator peaks before the channel is reported busy.
    pub corr_limit: u8,
}
impl CcaConfig {
    /// The value of the CCA control register for this configuration.
    pub fn control(&self) -> CcaControl {
        CcaControl::new()
            .with_mode(self.mode.into_bits())
            .with_ed_threshold(self.ed_threshold)
            .with_corr_threshold(self.corr_threshold)
            .with_corr_count(self.corr_limit)
    }
}
impl Default for CcaConfig {
    fn default() -> Self {
        Self {
            mode: CcaMode::EnergyDetection,
            ed_threshold: 0x2d,
            corr_threshold: 0x2d,
            corr_limit: 0x02,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Configuration of the transceiver.
///
/// Changes take effect with the next operation.
pub struct TrxConfig {
    pub channel: u8,
    pub cca: CcaConfig,
    /// Transmit power in dBm.
    pub tx_power: i8,
    /// Time the radio needs from RXEN to RXREADY.
    pub rx_ramp_up: Duration,
    /// Time the radio needs from TXEN to TXREADY.
    pub tx_ramp_up: Duration,
    /// Time between the START task and the first symbol on air.
    pub tx_start_latency: Duration,
    /// How many times the radio state is polled while waiting for a ramp-down.
    pub max_ramp_down_cycles: u32,
}
impl Default for TrxConfig {
    fn default() -> Self {
        Self {
            channel: MIN_CHANNEL,
            cca: CcaConfig::default(),
            tx_power: 0,
            rx_ramp_up: Duration::from_micros(40),
            tx_ramp_up: Duration::from_micros(40),
            tx_start_latency: Duration::from_micros(2),
            max_ramp_down_cycles: 1000,
        }
    }
}
impl TrxConfig {
    /// Time from the start of the ramp-up to the first symbol on air, in µs.
    pub(crate) fn tx_lead_time_us(&self) -> u32 {
        (self.tx_ramp_up + self.tx_start_latency).as_micros() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_frequencies() {
        assert_eq!(channel_to_frequency(11), Ok(2405));
        assert_eq!(channel_to_frequency(26), Ok(2480));
        assert_eq!(channel_to_frequency(10), Err(TrxError::InvalidChannel));
        assert_eq!(channel_to_frequency(27), Err(TrxError::InvalidChannel));
    }

    #[test]
    fn cca_control_register() {
        let config = CcaConfig {
            mode: CcaMode::CarrierOrEnergyDetection,
            ed_threshold: 0x10,
            corr_threshold: 0x20,
            corr_limit: 3,
        };
        let control = config.control();
        assert_eq!(control.mode(), 3);
        assert_eq!(control.ed_threshold(), 0x10);
        assert_eq!(control.corr_threshold(), 0x20);
        assert_eq!(control.corr_count(), 3);
    }

    #[test]
    fn default_lead_time() {
        assert_eq!(TrxConfig::default().tx_lead_time_us(), 42);
    }

    #[test]
    fn timings_take_part_in_equality() {
        let config = TrxConfig::default();
        let mut slower = config;
        slower.tx_ramp_up = Duration::from_micros(130);
        assert_eq!(config, TrxConfig::default());
        assert_ne!(config, slower);
        assert_eq!(slower.tx_lead_time_us(), 132);
    }
}
