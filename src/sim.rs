//! Simulated peripherals.
//!
//! [SimPeripherals] implements every hardware trait on one struct, so that the transceiver can be
//! driven on a host. Time only advances through [SimPeripherals::advance], in steps of one
//! microsecond, and the radio behaves as its register model describes: shorts fire first, then
//! the interconnect links, then the front-end lines. Nothing in here raises an interrupt by
//! itself, the caller invokes [Transceiver::irq_handler](crate::Transceiver::irq_handler), once
//! [SimPeripherals::irq_pending] reports an event.
use core::ptr;

use crate::{
    frame::{FRAME_BUFFER_SIZE, MAX_PSDU_SIZE},
    hal::{
        Antenna, AntennaDiversity, CcaControl, Channel, EventCounter, FemError, FrontEnd, Hardware,
        HwEvent, HwTask, Interconnect, Radio, RadioEvent, RadioInterrupts, RadioState, RadioTask,
        Shorts, Timer, TimerTask,
    },
};

const CHANNEL_COUNT: usize = 8;
const TASK_COUNT: usize = 13;

#[derive(Clone, Copy, Default)]
struct SimChannel {
    event: Option<HwEvent>,
    task: Option<HwTask>,
    fork: Option<HwTask>,
    enabled: bool,
}

/// A register level model of the radio, its timer, the interconnect and a front-end module.
pub struct SimPeripherals {
    now: u32,

    // Radio
    state: RadioState,
    shorts: Shorts,
    int_mask: RadioInterrupts,
    events: u32,
    packet_ptr: *const u8,
    bcc: u32,
    tx_power: i8,
    frequency: u16,
    cca_control: CcaControl,
    ed_count: u32,
    ed_level: u8,
    rssi: u8,
    rssi_running: bool,
    cca_running: bool,
    ed_running: bool,
    ready_at: Option<u32>,
    task_counts: [u32; TASK_COUNT],
    stuck_disabling: bool,
    tx_started_at: Option<u32>,
    rx_end_at: Option<u32>,
    last_tx: [u8; FRAME_BUFFER_SIZE],

    /// Time from an enable task to the radio being ready.
    pub ramp_up_us: u32,
    /// Time from the START task to the first symbol on air.
    pub tx_start_latency_us: u32,

    // Timer
    timer_running: bool,
    counter: u32,
    cc: [u32; 4],

    // Event counter
    count: u32,
    count_limit: Option<u32>,

    // Interconnect
    channels: [SimChannel; CHANNEL_COUNT],

    // Front-end
    fem_present: bool,
    pa_on: Option<HwEvent>,
    lna_on: Option<HwEvent>,
    fem_abort_on: Option<HwEvent>,
    fem_active: bool,
    fem_activations: u32,
    /// PA lead time in µs.
    pub pa_gap_us: u32,
    /// LNA lead time in µs.
    pub lna_gap_us: u32,

    // Antenna
    antenna: Antenna,
    antenna_updates: u32,
    antenna_frames: u32,
    antenna_aborts: u32,

    // Security
    #[cfg(feature = "frame-security")]
    secure_frames: bool,
    #[cfg(feature = "frame-security")]
    security_counts: [u32; 3],
}
impl Default for SimPeripherals {
    fn default() -> Self {
        Self::new()
    }
}
impl SimPeripherals {
    pub const fn new() -> Self {
        Self {
            now: 0,
            state: RadioState::Disabled,
            shorts: Shorts::new(),
            int_mask: RadioInterrupts::new(),
            events: 0,
            packet_ptr: ptr::null(),
            bcc: 0,
            tx_power: 0,
            frequency: 0,
            cca_control: CcaControl::new(),
            ed_count: 0,
            ed_level: 0,
            rssi: 0,
            rssi_running: false,
            cca_running: false,
            ed_running: false,
            ready_at: None,
            task_counts: [0; TASK_COUNT],
            stuck_disabling: false,
            tx_started_at: None,
            rx_end_at: None,
            last_tx: [0; FRAME_BUFFER_SIZE],
            ramp_up_us: 40,
            tx_start_latency_us: 2,
            timer_running: false,
            counter: 0,
            cc: [0; 4],
            count: 0,
            count_limit: None,
            channels: [SimChannel {
                event: None,
                task: None,
                fork: None,
                enabled: false,
            }; CHANNEL_COUNT],
            fem_present: true,
            pa_on: None,
            lna_on: None,
            fem_abort_on: None,
            fem_active: false,
            fem_activations: 0,
            pa_gap_us: 13,
            lna_gap_us: 10,
            antenna: Antenna::Antenna1,
            antenna_updates: 0,
            antenna_frames: 0,
            antenna_aborts: 0,
            #[cfg(feature = "frame-security")]
            secure_frames: false,
            #[cfg(feature = "frame-security")]
            security_counts: [0; 3],
        }
    }

    // Stimuli

    /// Let `us` microseconds pass.
    pub fn advance(&mut self, us: u32) {
        for _ in 0..us {
            self.now += 1;
            if self.timer_running {
                self.counter = self.counter.wrapping_add(1);
                for channel in 0..self.cc.len() {
                    if self.cc[channel] == self.counter {
                        self.hw_event(HwEvent::TimerCompare(channel as u8));
                    }
                }
            }
            if self.ready_at == Some(self.now) {
                self.ready_at = None;
                match self.state {
                    RadioState::RxRu => {
                        self.state = RadioState::RxIdle;
                        self.raise(RadioEvent::RxReady);
                    }
                    RadioState::TxRu => {
                        self.state = RadioState::TxIdle;
                        self.raise(RadioEvent::TxReady);
                    }
                    _ => {}
                }
            }
        }
    }
    /// Raise the event on the published ramp-up channel, as another protocol would.
    pub fn trigger_external(&mut self) {
        self.hw_event(HwEvent::External);
    }
    /// A SHR was received or sent.
    pub fn frame_started(&mut self) {
        if matches!(self.state, RadioState::Rx | RadioState::Tx) {
            self.raise(RadioEvent::Address);
        }
    }
    /// The bit counter reached the compare value.
    pub fn bit_count_reached(&mut self) {
        if self.state == RadioState::Rx {
            self.raise(RadioEvent::BcMatch);
        }
    }
    /// A frame with `psdu` finished arriving. It's written through the packet pointer, like the
    /// radio's DMA would do it.
    pub fn frame_end(&mut self, psdu: &[u8], crc_ok: bool) {
        if self.state != RadioState::Rx {
            return;
        }
        let len = psdu.len().min(MAX_PSDU_SIZE);
        if !self.packet_ptr.is_null() {
            // SAFETY: The packet pointer was set from a buffer of FRAME_BUFFER_SIZE bytes owned
            // by the transceiver for the duration of the reception.
            unsafe {
                let dst = self.packet_ptr as *mut u8;
                dst.write(len as u8);
                ptr::copy_nonoverlapping(psdu.as_ptr(), dst.add(1), len);
            }
        }
        self.rx_end_at = Some(self.now);
        self.raise(if crc_ok {
            RadioEvent::CrcOk
        } else {
            RadioEvent::CrcError
        });
        self.raise(RadioEvent::End);
    }
    /// A full reception: SHR, then the frame after its airtime.
    pub fn receive(&mut self, psdu: &[u8], crc_ok: bool) {
        self.frame_started();
        self.advance(32 * (psdu.len() as u32 + 1));
        self.frame_end(psdu, crc_ok);
    }
    /// The last symbol of the frame being sent went out.
    pub fn transmission_end(&mut self) {
        if self.state == RadioState::Tx {
            self.raise(RadioEvent::End);
            self.raise(RadioEvent::PhyEnd);
        }
    }
    /// A full transmission of the frame the radio is sending.
    pub fn transmit(&mut self) {
        self.frame_started();
        let len = self.last_tx[0] as u32 & 0x7f;
        self.advance(32 * (len + 1));
        self.transmission_end();
    }
    /// Report the result of a running CCA.
    pub fn cca_complete(&mut self, busy: bool) {
        if !self.cca_running {
            return;
        }
        self.cca_running = false;
        self.raise(if busy {
            RadioEvent::CcaBusy
        } else {
            RadioEvent::CcaIdle
        });
    }
    /// Report the result of a running energy detection.
    pub fn ed_complete(&mut self, level: u8) {
        if !self.ed_running {
            return;
        }
        self.ed_running = false;
        self.ed_level = level;
        self.raise(RadioEvent::EdEnd);
    }
    pub fn set_rssi(&mut self, rssi: u8) {
        self.rssi = rssi;
    }
    /// Keep the radio in its disabling state after a DISABLE task.
    pub fn set_stuck_disabling(&mut self, stuck: bool) {
        self.stuck_disabling = stuck;
    }
    pub fn set_fem_present(&mut self, present: bool) {
        self.fem_present = present;
    }
    pub fn set_antenna(&mut self, antenna: Antenna) {
        self.antenna = antenna;
    }
    #[cfg(feature = "frame-security")]
    pub fn set_secure_frames(&mut self, secure: bool) {
        self.secure_frames = secure;
    }

    // Observations

    pub fn now(&self) -> u32 {
        self.now
    }
    /// Check if any enabled interrupt has its event set.
    pub fn irq_pending(&self) -> bool {
        self.events & self.int_mask.into_bits() != 0
    }
    pub fn task_count(&self, task: RadioTask) -> u32 {
        self.task_counts[task as usize]
    }
    /// The time the first symbol of the last transmission went on air.
    pub fn tx_started_at(&self) -> Option<u32> {
        self.tx_started_at
    }
    /// The time the last reception ended.
    pub fn rx_end_at(&self) -> Option<u32> {
        self.rx_end_at
    }
    /// The PHR and PSDU of the last transmission.
    pub fn last_tx(&self) -> &[u8] {
        let len = (self.last_tx[0] as usize & 0x7f).min(MAX_PSDU_SIZE);
        &self.last_tx[..len + 1]
    }
    pub fn enabled_channels(&self) -> usize {
        self.channels.iter().filter(|channel| channel.enabled).count()
    }
    pub fn timer_running(&self) -> bool {
        self.timer_running
    }
    pub fn timer_counter(&self) -> u32 {
        self.counter
    }
    pub fn counter_armed(&self) -> bool {
        self.count_limit.is_some()
    }
    pub fn fem_active(&self) -> bool {
        self.fem_active
    }
    /// Check if the PA or the LNA is set up to activate.
    pub fn fem_configured(&self) -> bool {
        self.pa_on.is_some() || self.lna_on.is_some()
    }
    pub fn fem_abort_armed(&self) -> bool {
        self.fem_abort_on.is_some()
    }
    pub fn fem_activations(&self) -> u32 {
        self.fem_activations
    }
    pub fn frequency(&self) -> u16 {
        self.frequency
    }
    pub fn tx_power(&self) -> i8 {
        self.tx_power
    }
    pub fn cca_control(&self) -> CcaControl {
        self.cca_control
    }
    pub fn ed_count(&self) -> u32 {
        self.ed_count
    }
    pub fn rssi_running(&self) -> bool {
        self.rssi_running
    }
    pub fn antenna_updates(&self) -> u32 {
        self.antenna_updates
    }
    pub fn antenna_frames(&self) -> u32 {
        self.antenna_frames
    }
    pub fn antenna_aborts(&self) -> u32 {
        self.antenna_aborts
    }
    /// How often the transform was prepared, started and aborted.
    #[cfg(feature = "frame-security")]
    pub fn security_counts(&self) -> [u32; 3] {
        self.security_counts
    }

    // Model

    fn raise(&mut self, event: RadioEvent) {
        self.events |= RadioInterrupts::of(event).into_bits();
        let shorts = self.shorts;
        const NOTHING: (bool, RadioTask) = (false, RadioTask::Stop);
        let short_tasks: [(bool, RadioTask); 3] = match event {
            RadioEvent::End => [
                (shorts.end_disable(), RadioTask::Disable),
                (shorts.end_start(), RadioTask::Start),
                NOTHING,
            ],
            RadioEvent::Disabled => [
                (shorts.disabled_txen(), RadioTask::TxEn),
                (shorts.disabled_rxen(), RadioTask::RxEn),
                NOTHING,
            ],
            RadioEvent::Address => [
                (shorts.address_rssistart(), RadioTask::RssiStart),
                (shorts.address_bcstart(), RadioTask::BcStart),
                NOTHING,
            ],
            RadioEvent::RxReady => [
                (shorts.rxready_start(), RadioTask::Start),
                (shorts.rxready_ccastart(), RadioTask::CcaStart),
                (shorts.rxready_edstart(), RadioTask::EdStart),
            ],
            RadioEvent::TxReady => [(shorts.txready_start(), RadioTask::Start), NOTHING, NOTHING],
            RadioEvent::CcaIdle => [
                (shorts.ccaidle_stop(), RadioTask::Stop),
                (shorts.ccaidle_txen(), RadioTask::TxEn),
                NOTHING,
            ],
            RadioEvent::CcaBusy => [
                (shorts.ccabusy_disable(), RadioTask::Disable),
                NOTHING,
                NOTHING,
            ],
            RadioEvent::EdEnd => [(shorts.edend_disable(), RadioTask::Disable), NOTHING, NOTHING],
            RadioEvent::PhyEnd => [
                (shorts.phyend_disable(), RadioTask::Disable),
                (shorts.phyend_start(), RadioTask::Start),
                NOTHING,
            ],
            _ => [NOTHING; 3],
        };
        for (enabled, task) in short_tasks {
            if enabled {
                self.radio_task(task);
            }
        }
        self.hw_event(HwEvent::Radio(event));
    }
    fn hw_event(&mut self, event: HwEvent) {
        for index in 0..CHANNEL_COUNT {
            let channel = self.channels[index];
            if !channel.enabled || channel.event != Some(event) {
                continue;
            }
            if let Some(task) = channel.task {
                self.run_task(task);
            }
            if let Some(task) = channel.fork {
                self.run_task(task);
            }
        }
        if self.pa_on == Some(event) || self.lna_on == Some(event) {
            self.fem_active = true;
            self.fem_activations += 1;
        }
        if self.fem_abort_on == Some(event) {
            self.fem_active = false;
        }
    }
    fn run_task(&mut self, task: HwTask) {
        match task {
            HwTask::Radio(task) => self.radio_task(task),
            HwTask::Timer(task) => self.timer_task(task),
            HwTask::Count => {
                // The counter only runs while armed.
                if let Some(limit) = self.count_limit {
                    self.count += 1;
                    if self.count == limit {
                        self.hw_event(HwEvent::CountReached);
                    }
                }
            }
            HwTask::DisableChannel(channel) => self.channels[channel as usize].enabled = false,
        }
    }
    fn radio_task(&mut self, task: RadioTask) {
        self.task_counts[task as usize] += 1;
        match task {
            RadioTask::TxEn => {
                if matches!(
                    self.state,
                    RadioState::Disabled | RadioState::RxIdle | RadioState::Rx
                ) {
                    self.cca_running = false;
                    self.ed_running = false;
                    self.state = RadioState::TxRu;
                    self.ready_at = Some(self.now + self.ramp_up_us);
                }
            }
            RadioTask::RxEn => {
                if self.state == RadioState::Disabled {
                    self.state = RadioState::RxRu;
                    self.ready_at = Some(self.now + self.ramp_up_us);
                }
            }
            RadioTask::Start => match self.state {
                RadioState::RxIdle => self.state = RadioState::Rx,
                RadioState::TxIdle => {
                    self.state = RadioState::Tx;
                    self.tx_started_at = Some(self.now + self.tx_start_latency_us);
                    if !self.packet_ptr.is_null() {
                        // SAFETY: The packet pointer was set from a buffer of FRAME_BUFFER_SIZE
                        // bytes owned by the transceiver for the duration of the transmission.
                        unsafe {
                            ptr::copy_nonoverlapping(
                                self.packet_ptr,
                                self.last_tx.as_mut_ptr(),
                                FRAME_BUFFER_SIZE,
                            );
                        }
                    }
                }
                RadioState::Tx => {
                    self.tx_started_at = Some(self.now + self.tx_start_latency_us);
                }
                _ => {}
            },
            RadioTask::Stop => {
                self.cca_running = false;
                self.ed_running = false;
                self.state = match self.state {
                    RadioState::Rx => RadioState::RxIdle,
                    RadioState::Tx => RadioState::TxIdle,
                    state => state,
                };
            }
            RadioTask::Disable => {
                self.ready_at = None;
                self.cca_running = false;
                self.ed_running = false;
                self.rssi_running = false;
                if self.stuck_disabling && self.state != RadioState::Disabled {
                    self.state = match self.state {
                        RadioState::TxRu | RadioState::TxIdle | RadioState::Tx => {
                            RadioState::TxDisable
                        }
                        _ => RadioState::RxDisable,
                    };
                } else if !self.stuck_disabling {
                    self.state = RadioState::Disabled;
                    self.raise(RadioEvent::Disabled);
                }
            }
            RadioTask::RssiStart => self.rssi_running = true,
            RadioTask::RssiStop => self.rssi_running = false,
            RadioTask::BcStart | RadioTask::BcStop => {}
            RadioTask::EdStart => {
                if matches!(self.state, RadioState::RxIdle | RadioState::Rx) {
                    self.ed_running = true;
                }
            }
            RadioTask::EdStop => self.ed_running = false,
            RadioTask::CcaStart => {
                if matches!(self.state, RadioState::RxIdle | RadioState::Rx) {
                    self.cca_running = true;
                }
            }
            RadioTask::CcaStop => {
                if self.cca_running {
                    self.cca_running = false;
                    self.raise(RadioEvent::CcaStopped);
                }
            }
        }
    }
    fn timer_task(&mut self, task: TimerTask) {
        match task {
            TimerTask::Start => self.timer_running = true,
            TimerTask::Stop => self.timer_running = false,
            TimerTask::Clear => self.counter = 0,
            TimerTask::Shutdown => {
                self.timer_running = false;
                self.counter = 0;
            }
            TimerTask::Capture(channel) => self.cc[channel as usize] = self.counter,
        }
    }
}

impl Radio for SimPeripherals {
    fn reset(&mut self) {
        self.state = RadioState::Disabled;
        self.shorts = Shorts::NONE;
        self.int_mask = RadioInterrupts::NONE;
        self.events = 0;
        self.packet_ptr = ptr::null();
        self.bcc = 0;
        self.ready_at = None;
        self.cca_running = false;
        self.ed_running = false;
        self.rssi_running = false;
    }
    fn configure_ieee802154(&mut self) {}
    fn task(&mut self, task: RadioTask) {
        self.radio_task(task);
    }
    fn event_check(&self, event: RadioEvent) -> bool {
        self.events & RadioInterrupts::of(event).into_bits() != 0
    }
    fn event_clear(&mut self, event: RadioEvent) {
        self.events &= !RadioInterrupts::of(event).into_bits();
    }
    fn shorts(&self) -> Shorts {
        self.shorts
    }
    fn set_shorts(&mut self, shorts: Shorts) {
        self.shorts = shorts;
    }
    fn int_mask(&self) -> RadioInterrupts {
        self.int_mask
    }
    fn int_enable(&mut self, mask: RadioInterrupts) {
        self.int_mask = self.int_mask.union(mask);
    }
    fn int_disable(&mut self, mask: RadioInterrupts) {
        self.int_mask = RadioInterrupts::from_bits(self.int_mask.into_bits() & !mask.into_bits());
    }
    fn state(&self) -> RadioState {
        self.state
    }
    fn set_packet_ptr(&mut self, ptr: *const u8) {
        self.packet_ptr = ptr;
    }
    fn set_bcc(&mut self, bits: u32) {
        self.bcc = bits;
    }
    fn bcc(&self) -> u32 {
        self.bcc
    }
    fn set_tx_power(&mut self, dbm: i8) {
        self.tx_power = dbm;
    }
    fn set_frequency(&mut self, mhz: u16) {
        self.frequency = mhz;
    }
    fn set_cca_control(&mut self, control: CcaControl) {
        self.cca_control = control;
    }
    fn set_ed_count(&mut self, count: u32) {
        self.ed_count = count;
    }
    fn ed_sample(&self) -> u8 {
        self.ed_level
    }
    fn rssi_sample(&self) -> u8 {
        self.rssi
    }
}

impl Timer for SimPeripherals {
    fn configure(&mut self) {
        self.timer_task(TimerTask::Shutdown);
    }
    fn task(&mut self, task: TimerTask) {
        self.timer_task(task);
    }
    fn cc(&self, channel: u8) -> u32 {
        self.cc[channel as usize]
    }
    fn set_cc(&mut self, channel: u8, value: u32) {
        self.cc[channel as usize] = value;
    }
}

impl EventCounter for SimPeripherals {
    fn arm(&mut self, limit: u32) {
        self.count = 0;
        self.count_limit = Some(limit);
    }
    fn disarm(&mut self) {
        self.count = 0;
        self.count_limit = None;
    }
    fn count(&mut self) -> u32 {
        self.count
    }
}

impl Interconnect for SimPeripherals {
    fn connect(&mut self, channel: Channel, event: HwEvent, task: HwTask) {
        let channel = &mut self.channels[channel as usize];
        channel.event = Some(event);
        channel.task = Some(task);
    }
    fn fork(&mut self, channel: Channel, task: HwTask) {
        self.channels[channel as usize].fork = Some(task);
    }
    fn fork_clear(&mut self, channel: Channel) {
        self.channels[channel as usize].fork = None;
    }
    fn disconnect(&mut self, channel: Channel) {
        self.channels[channel as usize] = SimChannel::default();
    }
    fn enable(&mut self, channel: Channel) {
        self.channels[channel as usize].enabled = true;
    }
    fn disable(&mut self, channel: Channel) {
        self.channels[channel as usize].enabled = false;
    }
    fn is_enabled(&self, channel: Channel) -> bool {
        self.channels[channel as usize].enabled
    }
    fn trigger_software(&mut self) {
        self.hw_event(HwEvent::Software);
    }
}

impl FrontEnd for SimPeripherals {
    fn pa_configure(&mut self, activate_on: HwEvent) -> Result<(), FemError> {
        if !self.fem_present {
            return Err(FemError::NotPresent);
        }
        self.pa_on = Some(activate_on);
        Ok(())
    }
    fn pa_clear(&mut self) {
        self.pa_on = None;
    }
    fn lna_configure(&mut self, activate_on: HwEvent) -> Result<(), FemError> {
        if !self.fem_present {
            return Err(FemError::NotPresent);
        }
        self.lna_on = Some(activate_on);
        Ok(())
    }
    fn lna_clear(&mut self) {
        self.lna_on = None;
    }
    fn pa_time_gap(&self) -> u32 {
        if self.fem_present {
            self.pa_gap_us
        } else {
            0
        }
    }
    fn lna_time_gap(&self) -> u32 {
        if self.fem_present {
            self.lna_gap_us
        } else {
            0
        }
    }
    fn deactivate_now(&mut self) {
        self.fem_active = false;
    }
    fn abort_set(&mut self, event: HwEvent) -> Result<(), FemError> {
        if !self.fem_present {
            return Err(FemError::NotPresent);
        }
        self.fem_abort_on = Some(event);
        Ok(())
    }
    fn abort_clear(&mut self) {
        self.fem_abort_on = None;
    }
}

impl AntennaDiversity for SimPeripherals {
    fn current(&self) -> Antenna {
        self.antenna
    }
    fn update(&mut self) {
        self.antenna_updates += 1;
    }
    fn rx_aborted(&mut self) {
        self.antenna_aborts += 1;
    }
    fn frame_detected(&mut self) {
        self.antenna_frames += 1;
    }
}

#[cfg(feature = "frame-security")]
impl crate::hal::FrameSecurity for SimPeripherals {
    fn prepare(&mut self, _frame: *const u8) -> bool {
        self.security_counts[0] += 1;
        self.secure_frames
    }
    fn start(&mut self) {
        self.security_counts[1] += 1;
    }
    fn abort(&mut self) {
        self.security_counts[2] += 1;
    }
}

impl Hardware for SimPeripherals {
    type Radio = Self;
    type Timer = Self;
    type Counter = Self;
    type Fabric = Self;
    type FrontEnd = Self;
    type Antenna = Self;
    #[cfg(feature = "frame-security")]
    type Security = Self;

    fn radio(&mut self) -> &mut Self {
        self
    }
    fn timer(&mut self) -> &mut Self {
        self
    }
    fn counter(&mut self) -> &mut Self {
        self
    }
    fn fabric(&mut self) -> &mut Self {
        self
    }
    fn front_end(&mut self) -> &mut Self {
        self
    }
    fn antenna(&mut self) -> &mut Self {
        self
    }
    #[cfg(feature = "frame-security")]
    fn security(&mut self) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_up_and_shorts() {
        let mut sim = SimPeripherals::new();
        sim.set_shorts(Shorts::new().with_rxready_start(true));
        sim.radio_task(RadioTask::RxEn);
        assert_eq!(sim.state, RadioState::RxRu);
        sim.advance(39);
        assert_eq!(sim.state, RadioState::RxRu);
        sim.advance(1);
        assert_eq!(sim.state, RadioState::Rx);
        assert!(sim.event_check(RadioEvent::RxReady));
    }

    #[test]
    fn timer_compare_fires_once() {
        let mut sim = SimPeripherals::new();
        sim.connect(
            0,
            HwEvent::TimerCompare(1),
            HwTask::Radio(RadioTask::TxEn),
        );
        Interconnect::enable(&mut sim, 0);
        sim.set_cc(1, 5);
        sim.timer_task(TimerTask::Start);
        sim.advance(4);
        assert_eq!(sim.task_count(RadioTask::TxEn), 0);
        sim.advance(1);
        assert_eq!(sim.task_count(RadioTask::TxEn), 1);
        sim.advance(10);
        assert_eq!(sim.task_count(RadioTask::TxEn), 1);
    }

    #[test]
    fn disable_raises_disabled_and_aborts_fem() {
        let mut sim = SimPeripherals::new();
        sim.abort_set(HwEvent::Radio(RadioEvent::Disabled)).unwrap();
        sim.lna_configure(HwEvent::Software).unwrap();
        sim.trigger_software();
        assert!(sim.fem_active());
        sim.radio_task(RadioTask::Disable);
        assert!(sim.event_check(RadioEvent::Disabled));
        assert!(!sim.fem_active());
    }

    #[test]
    fn stuck_radio_stays_disabling() {
        let mut sim = SimPeripherals::new();
        sim.set_stuck_disabling(true);
        sim.radio_task(RadioTask::TxEn);
        sim.radio_task(RadioTask::Disable);
        assert_eq!(sim.state(), RadioState::TxDisable);
        assert!(!sim.event_check(RadioEvent::Disabled));
    }
}
