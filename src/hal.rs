//! Hardware access traits.
//!
//! The transceiver never touches registers directly. Everything it needs from the radio, the
//! timer, the interconnect fabric and the front-end is expressed through the traits in this
//! module, which are implemented by the board support layer. The register-shaped types
//! ([Shorts], [RadioInterrupts], [CcaControl]) mirror what the hardware keeps, so that an
//! implementation can write them out with a single store.
use bitfield_struct::bitfield;
use macro_bits::serializable_enum;

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// The value of the radio's STATE register.
    pub enum RadioState: u8 {
        #[default]
        Disabled => 0,
        RxRu => 1,
        RxIdle => 2,
        Rx => 3,
        RxDisable => 4,
        TxRu => 9,
        TxIdle => 10,
        Tx => 11,
        TxDisable => 12
    }
}
impl RadioState {
    /// Check if the radio is on its way to, or already in, the disabled state.
    pub fn is_ramping_down(&self) -> bool {
        matches!(
            self,
            RadioState::Disabled | RadioState::RxDisable | RadioState::TxDisable
        )
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// The mode used for clear channel assessment.
    pub enum CcaMode: u8 {
        #[default]
        EnergyDetection => 0,
        Carrier => 1,
        CarrierAndEnergyDetection => 2,
        CarrierOrEnergyDetection => 3
    }
}

/// Tasks of the radio peripheral.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioTask {
    TxEn,
    RxEn,
    Start,
    Stop,
    Disable,
    RssiStart,
    RssiStop,
    BcStart,
    BcStop,
    EdStart,
    EdStop,
    CcaStart,
    CcaStop,
}

/// Events of the radio peripheral.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    RxReady,
    TxReady,
    /// The SHR was sent or received.
    Address,
    End,
    PhyEnd,
    Disabled,
    BcMatch,
    CrcOk,
    CrcError,
    CcaIdle,
    CcaBusy,
    CcaStopped,
    EdEnd,
}
impl RadioEvent {
    pub const ALL: [RadioEvent; 13] = [
        RadioEvent::RxReady,
        RadioEvent::TxReady,
        RadioEvent::Address,
        RadioEvent::End,
        RadioEvent::PhyEnd,
        RadioEvent::Disabled,
        RadioEvent::BcMatch,
        RadioEvent::CrcOk,
        RadioEvent::CrcError,
        RadioEvent::CcaIdle,
        RadioEvent::CcaBusy,
        RadioEvent::CcaStopped,
        RadioEvent::EdEnd,
    ];
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
/// Mirror of the radio's SHORTS register.
pub struct Shorts {
    pub end_disable: bool,
    pub end_start: bool,
    pub disabled_txen: bool,
    pub disabled_rxen: bool,
    pub address_rssistart: bool,
    pub address_bcstart: bool,
    pub rxready_start: bool,
    pub txready_start: bool,
    pub rxready_ccastart: bool,
    pub rxready_edstart: bool,
    pub ccaidle_txen: bool,
    pub ccaidle_stop: bool,
    pub ccabusy_disable: bool,
    pub edend_disable: bool,
    pub phyend_disable: bool,
    pub phyend_start: bool,
    #[bits(16)]
    __: u16,
}
impl Shorts {
    pub const NONE: Self = Self::new();
    pub const fn union(self, other: Self) -> Self {
        Self::from_bits(self.into_bits() | other.into_bits())
    }
    pub const fn is_empty(&self) -> bool {
        self.into_bits() == 0
    }
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
/// Mirror of the radio's interrupt enable register.
pub struct RadioInterrupts {
    pub rxready: bool,
    pub txready: bool,
    pub address: bool,
    pub end: bool,
    pub phyend: bool,
    pub disabled: bool,
    pub bcmatch: bool,
    pub crcok: bool,
    pub crcerror: bool,
    pub ccaidle: bool,
    pub ccabusy: bool,
    pub ccastopped: bool,
    pub edend: bool,
    #[bits(19)]
    __: u32,
}
impl RadioInterrupts {
    pub const NONE: Self = Self::new();
    pub const ALL: Self = Self::from_bits((1 << 13) - 1);

    /// The interrupt raised by `event`.
    pub const fn of(event: RadioEvent) -> Self {
        Self::from_bits(1 << event as u32)
    }
    pub const fn union(self, other: Self) -> Self {
        Self::from_bits(self.into_bits() | other.into_bits())
    }
    pub const fn contains(&self, event: RadioEvent) -> bool {
        self.into_bits() & Self::of(event).into_bits() != 0
    }
    pub const fn is_empty(&self) -> bool {
        self.into_bits() == 0
    }
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
/// Mirror of the CCA control register.
pub struct CcaControl {
    #[bits(3)]
    pub mode: u8,
    #[bits(5)]
    __: u8,
    pub ed_threshold: u8,
    pub corr_threshold: u8,
    pub corr_count: u8,
}

/// Tasks of the timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerTask {
    Start,
    Stop,
    Clear,
    /// Stop and clear.
    Shutdown,
    /// Copy the current counter value into the compare register of that channel.
    Capture(u8),
}

/// An event, which can be routed through the interconnect fabric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HwEvent {
    Radio(RadioEvent),
    TimerCompare(u8),
    /// The software trigger, used for software initiated ramp-up.
    Software,
    /// An event raised by another protocol on the published ramp-up channel.
    External,
    /// The event counter reached its limit.
    CountReached,
}

/// A task, which can be triggered through the interconnect fabric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HwTask {
    Radio(RadioTask),
    Timer(TimerTask),
    /// Increment the event counter.
    Count,
    /// Disable an interconnect channel, without clearing its endpoints.
    DisableChannel(Channel),
}

/// An interconnect channel.
pub type Channel = u8;

/// The radio peripheral.
pub trait Radio {
    /// Return all registers to their power-on defaults. This also disables the radio.
    fn reset(&mut self);
    /// Apply chip specific workarounds after a reset.
    fn apply_errata(&mut self) {}
    /// Configure mode, packet layout and CRC for IEEE 802.15.4.
    fn configure_ieee802154(&mut self);
    fn task(&mut self, task: RadioTask);
    fn event_check(&self, event: RadioEvent) -> bool;
    fn event_clear(&mut self, event: RadioEvent);
    fn shorts(&self) -> Shorts;
    fn set_shorts(&mut self, shorts: Shorts);
    fn int_mask(&self) -> RadioInterrupts;
    fn int_enable(&mut self, mask: RadioInterrupts);
    fn int_disable(&mut self, mask: RadioInterrupts);
    fn state(&self) -> RadioState;
    /// Set the address used by the radio's DMA for the next frame.
    fn set_packet_ptr(&mut self, ptr: *const u8);
    /// Set the bit counter compare value.
    fn set_bcc(&mut self, bits: u32);
    fn bcc(&self) -> u32;
    fn set_tx_power(&mut self, dbm: i8);
    fn set_frequency(&mut self, mhz: u16);
    fn set_cca_control(&mut self, control: CcaControl);
    /// Set the number of iterations for energy detection.
    fn set_ed_count(&mut self, count: u32);
    fn ed_sample(&self) -> u8;
    /// The magnitude of the last RSSI sample, in -dBm.
    fn rssi_sample(&self) -> u8;
}

/// A 1 MHz, 32 bit timer.
pub trait Timer {
    /// Set up the timer for microsecond resolution in 32 bit mode.
    fn configure(&mut self);
    fn task(&mut self, task: TimerTask);
    fn cc(&self, channel: u8) -> u32;
    fn set_cc(&mut self, channel: u8, value: u32);
}

/// A timer in counter mode, incremented by [HwTask::Count].
pub trait EventCounter {
    /// Clear the count and raise [HwEvent::CountReached], once it reaches `limit`.
    fn arm(&mut self, limit: u32);
    /// Stop counting and clear the count.
    fn disarm(&mut self);
    /// The number of events counted since [Self::arm].
    fn count(&mut self) -> u32;
}

/// The peripheral interconnect fabric.
///
/// A channel connects one event to a task and optionally a second, forked task.
pub trait Interconnect {
    fn connect(&mut self, channel: Channel, event: HwEvent, task: HwTask);
    fn fork(&mut self, channel: Channel, task: HwTask);
    fn fork_clear(&mut self, channel: Channel);
    /// Disable the channel and clear all of its endpoints.
    fn disconnect(&mut self, channel: Channel);
    fn enable(&mut self, channel: Channel);
    fn disable(&mut self, channel: Channel);
    fn is_enabled(&self, channel: Channel) -> bool;
    /// Raise [HwEvent::Software].
    fn trigger_software(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FemError {
    /// No front-end module is attached.
    NotPresent,
    /// The requested timing can't be met.
    InvalidTiming,
}

/// The front-end module (PA/LNA).
pub trait FrontEnd {
    /// Activate the power amplifier, when `activate_on` occurs.
    fn pa_configure(&mut self, activate_on: HwEvent) -> Result<(), FemError>;
    fn pa_clear(&mut self);
    /// Activate the low noise amplifier, when `activate_on` occurs.
    fn lna_configure(&mut self, activate_on: HwEvent) -> Result<(), FemError>;
    fn lna_clear(&mut self);
    /// Time in µs the PA needs to be activated before the radio is ready.
    fn pa_time_gap(&self) -> u32;
    /// Time in µs the LNA needs to be activated before the radio is ready.
    fn lna_time_gap(&self) -> u32;
    fn deactivate_now(&mut self);
    /// Deactivate the amplifiers in hardware, whenever `event` occurs.
    fn abort_set(&mut self, event: HwEvent) -> Result<(), FemError>;
    fn abort_clear(&mut self);
}

/// A board without a front-end module.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFrontEnd;
impl FrontEnd for NoFrontEnd {
    fn pa_configure(&mut self, _activate_on: HwEvent) -> Result<(), FemError> {
        Err(FemError::NotPresent)
    }
    fn pa_clear(&mut self) {}
    fn lna_configure(&mut self, _activate_on: HwEvent) -> Result<(), FemError> {
        Err(FemError::NotPresent)
    }
    fn lna_clear(&mut self) {}
    fn pa_time_gap(&self) -> u32 {
        0
    }
    fn lna_time_gap(&self) -> u32 {
        0
    }
    fn deactivate_now(&mut self) {}
    fn abort_set(&mut self, _event: HwEvent) -> Result<(), FemError> {
        Err(FemError::NotPresent)
    }
    fn abort_clear(&mut self) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Antenna {
    #[default]
    Antenna1,
    Antenna2,
}

/// Antenna diversity.
///
/// The selection algorithm lives behind this trait, the transceiver only reports what happens
/// on air.
pub trait AntennaDiversity {
    fn current(&self) -> Antenna;
    /// Let the algorithm pick the antenna for the next listening window.
    fn update(&mut self);
    fn rx_started(&mut self) {}
    fn rx_aborted(&mut self) {}
    fn frame_detected(&mut self) {}
}

/// A board with a single antenna.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleAntenna;
impl AntennaDiversity for SingleAntenna {
    fn current(&self) -> Antenna {
        Antenna::Antenna1
    }
    fn update(&mut self) {}
}

/// The AES-CCM* engine for outgoing frames.
#[cfg(feature = "frame-security")]
pub trait FrameSecurity {
    /// Prepare the transform of the frame at `frame`.
    ///
    /// Returns `false`, if the frame doesn't need to be secured.
    fn prepare(&mut self, frame: *const u8) -> bool;
    /// Start the prepared transform. It runs alongside the radio's DMA.
    fn start(&mut self);
    fn abort(&mut self);
}

/// All the peripherals owned by the transceiver.
pub trait Hardware {
    type Radio: Radio;
    type Timer: Timer;
    type Counter: EventCounter;
    type Fabric: Interconnect;
    type FrontEnd: FrontEnd;
    type Antenna: AntennaDiversity;
    #[cfg(feature = "frame-security")]
    type Security: FrameSecurity;

    fn radio(&mut self) -> &mut Self::Radio;
    fn timer(&mut self) -> &mut Self::Timer;
    fn counter(&mut self) -> &mut Self::Counter;
    fn fabric(&mut self) -> &mut Self::Fabric;
    fn front_end(&mut self) -> &mut Self::FrontEnd;
    fn antenna(&mut self) -> &mut Self::Antenna;
    #[cfg(feature = "frame-security")]
    fn security(&mut self) -> &mut Self::Security;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_bits_follow_event_order() {
        for event in RadioEvent::ALL {
            let mask = RadioInterrupts::of(event);
            assert!(mask.contains(event));
            assert!(RadioInterrupts::ALL.contains(event));
        }
        assert!(RadioInterrupts::of(RadioEvent::CrcOk).crcok());
        assert!(RadioInterrupts::of(RadioEvent::EdEnd).edend());
        assert!(RadioInterrupts::of(RadioEvent::Address).address());
        assert!(!RadioInterrupts::of(RadioEvent::Address).crcok());
    }

    #[test]
    fn shorts_union() {
        let rx = Shorts::new().with_end_disable(true);
        let start = Shorts::new().with_rxready_start(true);
        let both = rx.union(start);
        assert!(both.end_disable() && both.rxready_start());
        assert!(!both.txready_start());
        assert!(Shorts::NONE.is_empty());
        assert!(!both.is_empty());
    }

    #[test]
    fn radio_state_ramp_down() {
        assert!(RadioState::TxDisable.is_ramping_down());
        assert!(RadioState::Disabled.is_ramping_down());
        assert!(!RadioState::RxIdle.is_ramping_down());
        assert_eq!(RadioState::Tx.into_bits(), 11);
        assert_eq!(CcaMode::Carrier.into_bits(), 1);
    }
}
