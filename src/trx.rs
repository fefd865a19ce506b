//! The transceiver state machine.
//!
//! ## States
//! The [Transceiver] is always in exactly one [TrxState]. Operations are requested from one of
//! the terminal states ([Idle](TrxState::Idle), [Finished](TrxState::Finished) and for some
//! operations [ReceiveFrameFinished](TrxState::ReceiveFrameFinished)), everything else happens in
//! the radio interrupt, where [Transceiver::irq_handler] advances the state and reports to the
//! layer above through [TrxCallouts].
//!
//! ## Teardown
//! Every active state has one path to [Finished](TrxState::Finished), when its operation
//! completes, and one forced path through [Transceiver::abort]. Both run the same teardown, which
//! removes all shorts, interrupts, links and front-end configuration and disables the radio. The
//! front-end itself is switched off by the standing link from the radio's DISABLED event, which
//! is set up in [Transceiver::enable].
//!
//! ## Turnaround
//! While receiving, the end of the frame restarts the timer in hardware. When a frame passes the
//! CRC, the timer keeps running into [ReceiveFrameFinished](TrxState::ReceiveFrameFinished), so
//! that [Transceiver::transmit_ack] can place the ramp-up of the ACK relative to the end of the
//! received frame.
use bitfield_struct::bitfield;

use crate::{
    config::{channel_to_frequency, CcaConfig, TrxConfig},
    error::TrxResult,
    frame::{FrameBuffer, Notifications, RampUpTrigger},
    hal::{
        Antenna, AntennaDiversity, Channel, EventCounter, FrontEnd, Hardware, HwEvent, Radio,
        RadioEvent, RadioInterrupts, RadioState, RadioTask, Shorts, Timer, TimerTask,
    },
    ppi::{Binder, ACK_COMPARE, CAPTURE, FEM_COMPARE},
};
#[cfg(feature = "frame-security")]
use crate::hal::FrameSecurity;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The state of the transceiver.
pub enum TrxState {
    #[default]
    Disabled,
    Idle,
    GoingIdle,
    ReceiveFrame,
    ReceiveFrameFinished,
    ReceiveAck,
    TransmitFrame,
    TransmitAck,
    StandaloneCca,
    ContinuousCarrier,
    ModulatedCarrier,
    EnergyDetection,
    Finished,
}
impl TrxState {
    /// Check if the radio may be doing something in this state.
    pub const fn is_active(&self) -> bool {
        !matches!(
            self,
            TrxState::Disabled | TrxState::Idle | TrxState::Finished
        )
    }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
struct TrxFlags {
    psdu_being_received: bool,
    missing_receive_buffer: bool,
    rssi_started: bool,
    /// A frame transform is running alongside the transmission.
    ccm_active: bool,
    #[bits(4)]
    __: u8,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Amplifier {
    Lna,
    Pa,
}

const SHORTS_RX: Shorts = Shorts::new()
    .with_address_rssistart(true)
    .with_address_bcstart(true)
    .with_end_disable(true);
const SHORTS_RX_ACK: Shorts = Shorts::new()
    .with_address_rssistart(true)
    .with_end_disable(true);
const SHORTS_TX: Shorts = Shorts::new()
    .with_txready_start(true)
    .with_phyend_disable(true);
const SHORTS_CCA_TX: Shorts = Shorts::new()
    .with_rxready_ccastart(true)
    .with_ccaidle_stop(true)
    .with_ccaidle_txen(true)
    .with_txready_start(true)
    .with_phyend_disable(true);
const SHORTS_MODULATED_CARRIER: Shorts = Shorts::new()
    .with_txready_start(true)
    .with_phyend_start(true);

const INT_RX: RadioInterrupts = RadioInterrupts::of(RadioEvent::Address)
    .union(RadioInterrupts::of(RadioEvent::BcMatch))
    .union(RadioInterrupts::of(RadioEvent::CrcOk))
    .union(RadioInterrupts::of(RadioEvent::CrcError));
const INT_RX_ACK: RadioInterrupts = RadioInterrupts::of(RadioEvent::Address)
    .union(RadioInterrupts::of(RadioEvent::CrcOk))
    .union(RadioInterrupts::of(RadioEvent::CrcError));
const INT_CCA: RadioInterrupts = RadioInterrupts::of(RadioEvent::CcaIdle)
    .union(RadioInterrupts::of(RadioEvent::CcaBusy));

/// Callouts from the transceiver to the layer above.
///
/// They are invoked from [Transceiver::irq_handler] with the transceiver borrowed mutably, so
/// the next operation can be requested right from the callout. Buffers are handed back through
/// the callout completing the operation they were lent for.
pub trait TrxCallouts<H: Hardware> {
    /// The SHR of a frame was received. Only called when requested.
    fn receive_frame_started(&mut self, _trx: &mut Transceiver<H>) {}
    /// The bit counter reached `bcc` bytes.
    ///
    /// Return a larger value to be called again at that byte, otherwise the rest of the frame is
    /// received without further inspection.
    fn receive_frame_bcmatched(&mut self, trx: &mut Transceiver<H>, bcc: u8) -> u8;
    /// A frame passed the CRC. The transceiver is in
    /// [ReceiveFrameFinished](TrxState::ReceiveFrameFinished) with the turnaround timer running.
    fn receive_frame_received(&mut self, trx: &mut Transceiver<H>, frame: FrameBuffer);
    /// A frame failed the CRC. The receive buffer is kept for the next reception.
    fn receive_frame_crcerror(&mut self, trx: &mut Transceiver<H>);
    fn receive_ack_started(&mut self, _trx: &mut Transceiver<H>) {}
    fn receive_ack_received(&mut self, trx: &mut Transceiver<H>, ack: FrameBuffer);
    fn receive_ack_crcerror(&mut self, trx: &mut Transceiver<H>);
    /// The SHR of the frame went on air. Only called when requested.
    fn transmit_frame_started(&mut self, _trx: &mut Transceiver<H>) {}
    /// The CCA found the channel idle and the transmission starts. Only called when requested.
    fn transmit_frame_ccaidle(&mut self, _trx: &mut Transceiver<H>) {}
    /// The last CCA attempt found the channel busy.
    fn transmit_frame_ccabusy(&mut self, trx: &mut Transceiver<H>, frame: FrameBuffer);
    fn transmit_frame_transmitted(&mut self, trx: &mut Transceiver<H>, frame: FrameBuffer);
    fn transmit_ack_started(&mut self, _trx: &mut Transceiver<H>) {}
    fn transmit_ack_transmitted(&mut self, trx: &mut Transceiver<H>, ack: FrameBuffer);
    fn standalone_cca_finished(&mut self, trx: &mut Transceiver<H>, channel_was_idle: bool);
    fn energy_detection_finished(&mut self, trx: &mut Transceiver<H>, ed_sample: u8);
    fn go_idle_finished(&mut self, trx: &mut Transceiver<H>);
}

/// The transceiver.
///
/// It owns the radio, the timer and the interconnect fabric for its entire lifetime.
pub struct Transceiver<H: Hardware> {
    hw: H,
    state: TrxState,
    config: TrxConfig,
    binder: Binder,
    flags: TrxFlags,
    rx_buffer: Option<FrameBuffer>,
    tx_buffer: Option<FrameBuffer>,
    /// Byte count compare of the current reception.
    bcc: u8,
    notifications: Notifications,
    ack_tx_power: i8,
    cca_attempts: u8,
    last_rx_antenna: Antenna,
}
impl<H: Hardware> Transceiver<H> {
    /// Take ownership of the hardware. The transceiver starts out disabled.
    pub fn new(hw: H, config: TrxConfig) -> TrxResult<Self> {
        channel_to_frequency(config.channel)?;
        Ok(Self {
            hw,
            state: TrxState::Disabled,
            config,
            binder: Binder::new(),
            flags: TrxFlags::new(),
            rx_buffer: None,
            tx_buffer: None,
            bcc: 0,
            notifications: Notifications::NONE,
            ack_tx_power: 0,
            cca_attempts: 0,
            last_rx_antenna: Antenna::Antenna1,
        })
    }

    // Accessors

    pub fn state(&self) -> TrxState {
        self.state
    }
    pub fn config(&self) -> &TrxConfig {
        &self.config
    }
    /// Direct access to the hardware.
    ///
    /// Don't change the configuration of the radio, the timer or the fabric through this while
    /// the transceiver is enabled.
    pub fn hardware(&mut self) -> &mut H {
        &mut self.hw
    }
    /// Check if a PSDU is currently being received.
    pub fn psdu_is_being_received(&self) -> bool {
        self.flags.psdu_being_received()
    }
    /// Check if the current reception stalled, because no receive buffer was available.
    pub fn receive_buffer_is_missing(&self) -> bool {
        self.flags.missing_receive_buffer()
    }
    pub fn current_antenna(&mut self) -> Antenna {
        self.hw.antenna().current()
    }
    /// The antenna, on which the last frame was received.
    pub fn last_rx_antenna(&self) -> Antenna {
        self.last_rx_antenna
    }
    /// The interconnect channel, which triggers a hardware ramp-up.
    pub fn ramp_up_channel(&self) -> Channel {
        self.binder.ramp_up_channel()
    }

    // Configuration

    /// Set the channel. It takes effect with the next ramp-up.
    pub fn set_channel(&mut self, channel: u8) -> TrxResult<()> {
        let mhz = channel_to_frequency(channel)?;
        self.config.channel = channel;
        if self.state != TrxState::Disabled {
            self.hw.radio().set_frequency(mhz);
        }
        debug!("Channel set to {}.", channel);
        Ok(())
    }
    pub fn set_cca_config(&mut self, cca: CcaConfig) {
        self.config.cca = cca;
        if self.state != TrxState::Disabled {
            self.hw.radio().set_cca_control(cca.control());
        }
    }
    /// Set the transmit power for operations not carrying their own.
    pub fn set_tx_power(&mut self, dbm: i8) {
        self.config.tx_power = dbm;
    }
    pub fn set_max_ramp_down_cycles(&mut self, cycles: u32) {
        self.config.max_ramp_down_cycles = cycles;
    }

    // Buffers

    /// Lend a buffer for receiving frames.
    ///
    /// If a reception stalled waiting for it, it resumes right away and `Ok(true)` is returned.
    /// A buffer is handed back, if the transceiver already holds one.
    pub fn receive_buffer_set(&mut self, buffer: FrameBuffer) -> Result<bool, FrameBuffer> {
        if self.rx_buffer.is_some() {
            return Err(buffer);
        }
        let ptr = buffer.as_mut_ptr() as *const u8;
        self.rx_buffer = Some(buffer);
        if !self.flags.missing_receive_buffer()
            || !matches!(self.state, TrxState::ReceiveFrame | TrxState::ReceiveAck)
        {
            return Ok(false);
        }
        self.flags.set_missing_receive_buffer(false);
        let radio = self.hw.radio();
        radio.set_packet_ptr(ptr);
        radio.set_shorts(radio.shorts().with_rxready_start(true));
        // The ramp-up may have completed before the short was in place.
        if radio.state() == RadioState::RxIdle {
            radio.task(RadioTask::Start);
        }
        debug!("Receive buffer supplied, resuming reception.");
        Ok(true)
    }
    /// Take back the receive buffer. It's kept while the radio may be writing to it.
    pub fn take_receive_buffer(&mut self) -> Option<FrameBuffer> {
        if matches!(self.state, TrxState::ReceiveFrame | TrxState::ReceiveAck) {
            return None;
        }
        self.rx_buffer.take()
    }

    // Lifecycle

    /// Bring the radio into a known state and go idle.
    ///
    /// The caller must own the radio and have its clock running.
    pub fn enable(&mut self) {
        assert!(
            self.state == TrxState::Disabled,
            "Transceiver enabled twice."
        );
        let mhz = match channel_to_frequency(self.config.channel) {
            Ok(mhz) => mhz,
            Err(_) => unreachable!(),
        };
        let radio = self.hw.radio();
        radio.reset();
        radio.apply_errata();
        radio.configure_ieee802154();
        radio.set_frequency(mhz);
        radio.set_cca_control(self.config.cca.control());
        radio.set_tx_power(self.config.tx_power);

        let timer = self.hw.timer();
        timer.configure();
        timer.task(TimerTask::Shutdown);
        self.hw.counter().disarm();

        if let Err(err) = self.binder.connect_fem_abort(self.hw.front_end()) {
            debug!("Front-end abort not connected: {:?}", err);
        }
        self.flags = TrxFlags::new();
        self.set_state(TrxState::Idle);
        info!("Transceiver enabled on channel {}.", self.config.channel);
    }
    /// Stop everything immediately, without any callout.
    ///
    /// The buffer of an ongoing transmission is returned.
    pub fn disable(&mut self) -> Option<FrameBuffer> {
        if self.state == TrxState::Disabled {
            return None;
        }
        self.binder.clear_all(self.hw.fabric());
        self.binder.clear_fem_abort(self.hw.front_end());
        let front_end = self.hw.front_end();
        front_end.pa_clear();
        front_end.lna_clear();
        front_end.deactivate_now();
        self.hw.timer().task(TimerTask::Shutdown);
        self.hw.counter().disarm();
        self.abort_security();
        self.hw.radio().reset();
        self.flags = TrxFlags::new();
        self.set_state(TrxState::Disabled);
        info!("Transceiver disabled.");
        self.tx_buffer.take()
    }
    /// Return to idle, after an operation finished.
    ///
    /// Returns `true`, if [TrxCallouts::go_idle_finished] will follow, and `false` if the
    /// transceiver is idle already. Calling this again, while the transition is in progress, does
    /// nothing and returns `true`.
    pub fn go_idle(&mut self) -> bool {
        match self.state {
            TrxState::Idle => false,
            TrxState::GoingIdle => true,
            TrxState::Finished | TrxState::ReceiveFrameFinished => {
                if self.state == TrxState::ReceiveFrameFinished {
                    self.hw.timer().task(TimerTask::Shutdown);
                }
                self.set_state(TrxState::GoingIdle);
                let radio = self.hw.radio();
                radio.event_clear(RadioEvent::Disabled);
                radio.int_enable(RadioInterrupts::of(RadioEvent::Disabled));
                radio.task(RadioTask::Disable);
                true
            }
            state => panic!("Can't go idle from {:?}.", state),
        }
    }
    /// Stop the current operation and move to [Finished](TrxState::Finished).
    ///
    /// No callout of the aborted operation follows. The buffer of an aborted transmission is
    /// returned, the receive buffer stays with the transceiver. Does nothing when disabled, idle
    /// or finished.
    pub fn abort(&mut self) -> Option<FrameBuffer> {
        if !self.state.is_active() {
            return None;
        }
        debug!("Aborting {:?}.", self.state);
        self.teardown(false);
        self.set_state(TrxState::Finished);
        self.tx_buffer.take()
    }

    // Operations

    /// Start listening for a frame.
    ///
    /// `bcc` is the number of bytes, after which [TrxCallouts::receive_frame_bcmatched] is
    /// called. `ack_tx_power` is used by a following [Self::transmit_ack].
    pub fn receive_frame(
        &mut self,
        bcc: u8,
        trigger: RampUpTrigger,
        notifications: Notifications,
        ack_tx_power: i8,
    ) {
        if self.state == TrxState::ReceiveFrameFinished {
            self.hw.timer().task(TimerTask::Shutdown);
            self.set_state(TrxState::Finished);
        }
        self.leave_terminal_state();
        self.bcc = bcc;
        self.notifications = notifications;
        self.ack_tx_power = ack_tx_power;

        let antenna = self.hw.antenna();
        antenna.update();
        antenna.rx_started();

        let shorts = self.attach_receive_buffer(SHORTS_RX);
        let radio = self.hw.radio();
        radio.set_bcc(bcc as u32 * 8);
        radio.set_shorts(shorts);
        radio.int_enable(INT_RX);
        self.binder.connect_frame_end_timer(self.hw.fabric());

        self.set_state(TrxState::ReceiveFrame);
        self.arm_ramp_up(RadioTask::RxEn, trigger, Amplifier::Lna);
    }
    /// Listen for the ACK of the frame just transmitted.
    pub fn receive_ack(&mut self) {
        assert!(
            self.state == TrxState::Finished,
            "ACK reception requested in {:?}.",
            self.state
        );
        self.leave_terminal_state();
        let shorts = self.attach_receive_buffer(SHORTS_RX_ACK);
        let radio = self.hw.radio();
        radio.set_shorts(shorts);
        radio.int_enable(INT_RX_ACK);

        self.set_state(TrxState::ReceiveAck);
        self.arm_ramp_up(RadioTask::RxEn, RampUpTrigger::Software, Amplifier::Lna);
    }
    /// Transmit the ACK for the frame just received.
    ///
    /// The first symbol goes on air `delay_us` after the end of the received frame. If that
    /// can't be met anymore, nothing is armed, the timer is stopped and the ACK is handed back.
    pub fn transmit_ack(&mut self, ack: FrameBuffer, delay_us: u32) -> Result<(), FrameBuffer> {
        assert!(
            self.state == TrxState::ReceiveFrameFinished,
            "ACK transmission requested in {:?}.",
            self.state
        );
        let Some(ramp_at) = delay_us.checked_sub(self.config.tx_lead_time_us()) else {
            debug!("ACK delay of {}us is too short.", delay_us);
            self.hw.timer().task(TimerTask::Shutdown);
            return Err(ack);
        };
        let now = self.timer_now();
        if now >= ramp_at {
            debug!("ACK deadline missed at {}us after the frame.", now);
            self.hw.timer().task(TimerTask::Shutdown);
            return Err(ack);
        }
        self.clear_events();
        let ptr = ack.as_ptr();
        let radio = self.hw.radio();
        radio.set_packet_ptr(ptr);
        radio.set_tx_power(self.ack_tx_power);
        radio.set_shorts(SHORTS_TX);
        radio.int_enable(
            RadioInterrupts::of(RadioEvent::Address).union(RadioInterrupts::of(RadioEvent::PhyEnd)),
        );
        self.prepare_security(ptr);

        let tx_ramp_up = self.config.tx_ramp_up.as_micros() as u32;
        let pa_at = (ramp_at + tx_ramp_up).saturating_sub(self.hw.front_end().pa_time_gap());
        let timer = self.hw.timer();
        timer.set_cc(ACK_COMPARE, ramp_at);
        timer.set_cc(FEM_COMPARE, pa_at.max(1));
        if self
            .hw
            .front_end()
            .pa_configure(HwEvent::TimerCompare(FEM_COMPARE))
            .is_err()
        {
            trace!("ACK sent without PA.");
        }
        self.binder.connect_ack_transmit(self.hw.fabric());

        // The compare may have passed, while the link was set up.
        if self.timer_now() >= ramp_at && self.hw.radio().state() != RadioState::TxRu {
            debug!("ACK deadline passed while arming.");
            self.binder.clear_ack_transmit(self.hw.fabric());
            self.hw.front_end().pa_clear();
            let radio = self.hw.radio();
            radio.set_shorts(Shorts::NONE);
            radio.int_disable(RadioInterrupts::ALL);
            self.hw.timer().task(TimerTask::Shutdown);
            self.abort_security();
            return Err(ack);
        }
        self.tx_buffer = Some(ack);
        self.start_security();
        self.set_state(TrxState::TransmitAck);
        Ok(())
    }
    /// Transmit a frame.
    ///
    /// With `cca_attempts` set to zero, the frame is sent right after the ramp-up. Otherwise up
    /// to that many CCAs run back to back in hardware and the frame goes out after the first one
    /// reporting an idle channel.
    pub fn transmit_frame(
        &mut self,
        frame: FrameBuffer,
        trigger: RampUpTrigger,
        cca_attempts: u8,
        tx_power: i8,
        notifications: Notifications,
    ) {
        self.leave_terminal_state();
        self.notifications = notifications;
        self.cca_attempts = cca_attempts;
        let ptr = frame.as_ptr();
        self.tx_buffer = Some(frame);

        let mut interrupts = RadioInterrupts::of(RadioEvent::PhyEnd);
        if notifications.frame_started() {
            interrupts = interrupts.union(RadioInterrupts::of(RadioEvent::Address));
        }
        let radio = self.hw.radio();
        radio.set_packet_ptr(ptr);
        radio.set_tx_power(tx_power);
        self.prepare_security(ptr);
        self.set_state(TrxState::TransmitFrame);

        if cca_attempts == 0 {
            let radio = self.hw.radio();
            radio.set_shorts(SHORTS_TX);
            radio.int_enable(interrupts);
            self.arm_ramp_up(RadioTask::TxEn, trigger, Amplifier::Pa);
        } else {
            let radio = self.hw.radio();
            radio.set_cca_control(self.config.cca.control());
            radio.set_shorts(SHORTS_CCA_TX.with_ccabusy_disable(cca_attempts == 1));
            radio.int_enable(interrupts.union(INT_CCA));
            if cca_attempts >= 2 {
                // Every busy result but the last one restarts the CCA.
                self.hw.counter().arm(cca_attempts as u32 - 1);
                self.binder.connect_cca_retry(self.hw.fabric());
            }
            if self
                .hw
                .front_end()
                .pa_configure(HwEvent::Radio(RadioEvent::CcaIdle))
                .is_err()
            {
                trace!("Transmitting without PA.");
            }
            self.arm_ramp_up(RadioTask::RxEn, trigger, Amplifier::Lna);
        }
        self.start_security();
    }
    /// Assess the channel once.
    pub fn standalone_cca(&mut self) {
        self.leave_terminal_state();
        let radio = self.hw.radio();
        radio.set_cca_control(self.config.cca.control());
        radio.set_shorts(Shorts::new().with_rxready_ccastart(true));
        radio.int_enable(INT_CCA);
        self.set_state(TrxState::StandaloneCca);
        self.arm_ramp_up(RadioTask::RxEn, RampUpTrigger::Software, Amplifier::Lna);
    }
    /// Measure the energy on the channel over `count` iterations.
    pub fn energy_detection(&mut self, count: u32) {
        self.leave_terminal_state();
        let radio = self.hw.radio();
        radio.set_ed_count(count);
        radio.set_shorts(Shorts::new().with_rxready_edstart(true));
        radio.int_enable(RadioInterrupts::of(RadioEvent::EdEnd));
        self.set_state(TrxState::EnergyDetection);
        self.arm_ramp_up(RadioTask::RxEn, RampUpTrigger::Software, Amplifier::Lna);
    }
    /// Emit an unmodulated carrier, until aborted.
    pub fn continuous_carrier(&mut self) {
        self.leave_terminal_state();
        let radio = self.hw.radio();
        radio.set_tx_power(self.config.tx_power);
        radio.set_shorts(Shorts::NONE);
        self.set_state(TrxState::ContinuousCarrier);
        self.arm_ramp_up(RadioTask::TxEn, RampUpTrigger::Software, Amplifier::Pa);
    }
    /// Send `frame` back to back, until aborted.
    pub fn modulated_carrier(&mut self, frame: FrameBuffer) {
        self.leave_terminal_state();
        let ptr = frame.as_ptr();
        self.tx_buffer = Some(frame);
        let radio = self.hw.radio();
        radio.set_tx_power(self.config.tx_power);
        radio.set_packet_ptr(ptr);
        radio.set_shorts(SHORTS_MODULATED_CARRIER);
        self.set_state(TrxState::ModulatedCarrier);
        self.arm_ramp_up(RadioTask::TxEn, RampUpTrigger::Software, Amplifier::Pa);
    }
    /// Start sampling the RSSI. Returns `false`, if the radio isn't listening.
    pub fn rssi_measure(&mut self) -> bool {
        let listening = matches!(self.state, TrxState::ReceiveFrame | TrxState::ReceiveAck)
            && matches!(
                self.hw.radio().state(),
                RadioState::RxIdle | RadioState::Rx
            );
        if listening {
            self.hw.radio().task(RadioTask::RssiStart);
            self.flags.set_rssi_started(true);
        }
        listening
    }
    /// The last RSSI sample in dBm.
    pub fn rssi_last_sample(&mut self) -> i8 {
        -(self.hw.radio().rssi_sample().min(127) as i8)
    }

    // Interrupt handling

    /// Handle the radio interrupt.
    ///
    /// Events are only handled while their interrupt is enabled, so that an operation requested
    /// from a callout never sees events of the previous one.
    pub fn irq_handler<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        if self.take_event(RadioEvent::Address) {
            self.on_address(callouts);
        }
        if self.take_event(RadioEvent::BcMatch) {
            self.on_bcmatch(callouts);
        }
        if self.take_event(RadioEvent::CrcError) {
            self.on_crcerror(callouts);
        }
        if self.take_event(RadioEvent::CrcOk) {
            self.on_crcok(callouts);
        }
        if self.take_event(RadioEvent::PhyEnd) {
            self.on_phyend(callouts);
        }
        if self.take_event(RadioEvent::Disabled) {
            self.on_disabled(callouts);
        }
        if self.take_event(RadioEvent::CcaIdle) {
            self.on_ccaidle(callouts);
        }
        if self.take_event(RadioEvent::CcaBusy) {
            self.on_ccabusy(callouts);
        }
        if self.take_event(RadioEvent::EdEnd) {
            self.on_edend(callouts);
        }
    }
    fn take_event(&mut self, event: RadioEvent) -> bool {
        let radio = self.hw.radio();
        if radio.int_mask().contains(event) && radio.event_check(event) {
            radio.event_clear(event);
            true
        } else {
            false
        }
    }
    fn on_address<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        match self.state {
            TrxState::ReceiveFrame => {
                self.flags.set_psdu_being_received(true);
                self.hw.antenna().frame_detected();
                if self.notifications.frame_started() {
                    callouts.receive_frame_started(self);
                }
            }
            TrxState::ReceiveAck => {
                self.flags.set_psdu_being_received(true);
                callouts.receive_ack_started(self);
            }
            TrxState::TransmitFrame => callouts.transmit_frame_started(self),
            TrxState::TransmitAck => callouts.transmit_ack_started(self),
            state => unreachable!("ADDRESS in {:?}", state),
        }
    }
    fn on_bcmatch<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        assert!(self.state == TrxState::ReceiveFrame);
        self.flags.set_psdu_being_received(true);
        let next = callouts.receive_frame_bcmatched(self, self.bcc);
        if self.state == TrxState::ReceiveFrame && next > self.bcc {
            trace!("Byte count compare moved to {}.", next);
            self.bcc = next;
            self.hw.radio().set_bcc(next as u32 * 8);
        }
    }
    fn on_crcerror<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        self.flags.set_psdu_being_received(false);
        match self.state {
            TrxState::ReceiveFrame => {
                self.teardown(false);
                self.set_state(TrxState::Finished);
                callouts.receive_frame_crcerror(self);
            }
            TrxState::ReceiveAck => {
                self.teardown(false);
                self.set_state(TrxState::Finished);
                callouts.receive_ack_crcerror(self);
            }
            state => unreachable!("CRCERROR in {:?}", state),
        }
    }
    fn on_crcok<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        self.flags.set_psdu_being_received(false);
        match self.state {
            TrxState::ReceiveFrame => {
                self.last_rx_antenna = self.hw.antenna().current();
                self.teardown(true);
                self.set_state(TrxState::ReceiveFrameFinished);
                match self.rx_buffer.take() {
                    Some(frame) => callouts.receive_frame_received(self, frame),
                    None => error!("Frame received without a buffer."),
                }
            }
            TrxState::ReceiveAck => {
                self.teardown(false);
                self.set_state(TrxState::Finished);
                match self.rx_buffer.take() {
                    Some(ack) => callouts.receive_ack_received(self, ack),
                    None => error!("ACK received without a buffer."),
                }
            }
            state => unreachable!("CRCOK in {:?}", state),
        }
    }
    fn on_phyend<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        let state = self.state;
        self.teardown(false);
        self.set_state(TrxState::Finished);
        let Some(frame) = self.tx_buffer.take() else {
            error!("Transmission ended without a buffer.");
            return;
        };
        match state {
            TrxState::TransmitFrame => callouts.transmit_frame_transmitted(self, frame),
            TrxState::TransmitAck => callouts.transmit_ack_transmitted(self, frame),
            state => unreachable!("PHYEND in {:?}", state),
        }
    }
    fn on_disabled<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        assert!(self.state == TrxState::GoingIdle);
        self.hw
            .radio()
            .int_disable(RadioInterrupts::of(RadioEvent::Disabled));
        self.set_state(TrxState::Idle);
        callouts.go_idle_finished(self);
    }
    fn on_ccaidle<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        match self.state {
            TrxState::TransmitFrame => {
                // The radio is on its way to TX, no more retries.
                self.binder.clear_cca_retry(self.hw.fabric());
                self.hw.counter().disarm();
                self.hw
                    .radio()
                    .int_disable(RadioInterrupts::of(RadioEvent::CcaBusy));
                if self.notifications.cca_idle() {
                    callouts.transmit_frame_ccaidle(self);
                }
            }
            TrxState::StandaloneCca => {
                self.teardown(false);
                self.set_state(TrxState::Finished);
                callouts.standalone_cca_finished(self, true);
            }
            state => unreachable!("CCAIDLE in {:?}", state),
        }
    }
    fn on_ccabusy<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        match self.state {
            TrxState::TransmitFrame => {}
            TrxState::StandaloneCca => {
                self.teardown(false);
                self.set_state(TrxState::Finished);
                callouts.standalone_cca_finished(self, false);
                return;
            }
            state => unreachable!("CCABUSY in {:?}", state),
        }
        // Busy results arriving faster than the interrupt is serviced share one event, so they
        // are read from the counter instead of being counted here.
        let busy = if self.cca_attempts > 1 {
            self.hw.counter().count()
        } else {
            1
        };
        if busy >= self.cca_attempts as u32 {
            self.finish_channel_busy(callouts);
        } else {
            trace!(
                "Channel busy, {} of {} attempts used.",
                busy,
                self.cca_attempts
            );
        }
    }
    fn finish_channel_busy<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        self.teardown(false);
        self.set_state(TrxState::Finished);
        match self.tx_buffer.take() {
            Some(frame) => callouts.transmit_frame_ccabusy(self, frame),
            None => error!("Channel busy without a buffer."),
        }
    }
    fn on_edend<C: TrxCallouts<H>>(&mut self, callouts: &mut C) {
        assert!(self.state == TrxState::EnergyDetection);
        let sample = self.hw.radio().ed_sample();
        self.teardown(false);
        self.set_state(TrxState::Finished);
        callouts.energy_detection_finished(self, sample);
    }

    // Internals

    fn set_state(&mut self, state: TrxState) {
        trace!("TRX {:?} -> {:?}", self.state, state);
        self.state = state;
    }
    /// Prepare leaving a terminal state for a new operation.
    fn leave_terminal_state(&mut self) {
        match self.state {
            TrxState::Idle => {}
            TrxState::Finished => self.wait_for_ramp_down(),
            state => panic!("Operation requested in {:?}.", state),
        }
        self.clear_events();
    }
    /// Poll the radio, until it's disabled.
    ///
    /// # Panics
    /// If the radio doesn't get there within the configured number of cycles.
    fn wait_for_ramp_down(&mut self) {
        let cycles = self.config.max_ramp_down_cycles.max(1);
        let radio = self.hw.radio();
        for _ in 0..cycles {
            if radio.state() == RadioState::Disabled {
                return;
            }
            core::hint::spin_loop();
        }
        panic!("Radio didn't ramp down within {} cycles.", cycles);
    }
    fn clear_events(&mut self) {
        let radio = self.hw.radio();
        for event in RadioEvent::ALL {
            radio.event_clear(event);
        }
    }
    /// Read the timer.
    fn timer_now(&mut self) -> u32 {
        let timer = self.hw.timer();
        timer.task(TimerTask::Capture(CAPTURE));
        timer.cc(CAPTURE)
    }
    /// Point the radio at the receive buffer, or note that there is none.
    fn attach_receive_buffer(&mut self, shorts: Shorts) -> Shorts {
        match self.rx_buffer.as_mut() {
            Some(buffer) => {
                let ptr = buffer.as_mut_ptr() as *const u8;
                self.hw.radio().set_packet_ptr(ptr);
                self.flags.set_missing_receive_buffer(false);
                shorts.with_rxready_start(true)
            }
            None => {
                debug!("No receive buffer, the reception will stall after the ramp-up.");
                self.flags.set_missing_receive_buffer(true);
                shorts
            }
        }
    }
    /// Set up the ramp-up with `task` and activation of the amplifier shortly before the radio
    /// is ready.
    fn arm_ramp_up(&mut self, task: RadioTask, trigger: RampUpTrigger, amplifier: Amplifier) {
        let ramp_up = match task {
            RadioTask::TxEn => self.config.tx_ramp_up,
            _ => self.config.rx_ramp_up,
        }
        .as_micros() as u32;
        let front_end = self.hw.front_end();
        let gap = match amplifier {
            Amplifier::Lna => front_end.lna_time_gap(),
            Amplifier::Pa => front_end.pa_time_gap(),
        };
        let timer = self.hw.timer();
        timer.task(TimerTask::Shutdown);
        timer.set_cc(FEM_COMPARE, ramp_up.saturating_sub(gap).max(1));

        let activate_on = HwEvent::TimerCompare(FEM_COMPARE);
        let front_end = self.hw.front_end();
        let fem = match amplifier {
            Amplifier::Lna => front_end.lna_configure(activate_on),
            Amplifier::Pa => front_end.pa_configure(activate_on),
        };
        self.binder.connect_ramp_up(self.hw.fabric(), task, trigger);
        if fem.is_ok() {
            self.binder.connect_fem_timing(self.hw.fabric());
        }
        if trigger == RampUpTrigger::Software {
            self.binder.trigger_ramp_up(self.hw.fabric());
        }
    }
    /// Undo everything the current state set up and disable the radio.
    ///
    /// With `keep_timer`, the timer keeps running for the turnaround.
    fn teardown(&mut self, keep_timer: bool) {
        let state = self.state;
        let aborted_frame = self.flags.psdu_being_received();

        self.binder.clear_all(self.hw.fabric());
        let front_end = self.hw.front_end();
        front_end.lna_clear();
        front_end.pa_clear();
        if !keep_timer {
            self.hw.timer().task(TimerTask::Shutdown);
        }
        self.hw.counter().disarm();

        let radio = self.hw.radio();
        radio.set_shorts(Shorts::NONE);
        radio.int_disable(RadioInterrupts::ALL);
        match state {
            TrxState::ReceiveFrame | TrxState::ReceiveAck => {
                radio.task(RadioTask::BcStop);
                if self.flags.rssi_started() {
                    radio.task(RadioTask::RssiStop);
                }
            }
            TrxState::TransmitFrame | TrxState::StandaloneCca => radio.task(RadioTask::CcaStop),
            TrxState::EnergyDetection => radio.task(RadioTask::EdStop),
            _ => {}
        }
        radio.task(RadioTask::Disable);
        self.abort_security();

        if state == TrxState::ReceiveFrame && aborted_frame {
            self.hw.antenna().rx_aborted();
        }
        self.flags = TrxFlags::new();
    }

    #[cfg(feature = "frame-security")]
    fn prepare_security(&mut self, frame: *const u8) {
        let secured = self.hw.security().prepare(frame);
        self.flags.set_ccm_active(secured);
    }
    #[cfg(feature = "frame-security")]
    fn start_security(&mut self) {
        if self.flags.ccm_active() {
            self.hw.security().start();
        }
    }
    #[cfg(feature = "frame-security")]
    fn abort_security(&mut self) {
        if self.flags.ccm_active() {
            self.hw.security().abort();
            self.flags.set_ccm_active(false);
        }
    }
    #[cfg(not(feature = "frame-security"))]
    fn prepare_security(&mut self, _frame: *const u8) {}
    #[cfg(not(feature = "frame-security"))]
    fn start_security(&mut self) {}
    #[cfg(not(feature = "frame-security"))]
    fn abort_security(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::FRAME_BUFFER_SIZE, sim::SimPeripherals};

    struct Quiet;
    impl TrxCallouts<SimPeripherals> for Quiet {
        fn receive_frame_bcmatched(&mut self, _: &mut Transceiver<SimPeripherals>, bcc: u8) -> u8 {
            bcc
        }
        fn receive_frame_received(&mut self, _: &mut Transceiver<SimPeripherals>, _: FrameBuffer) {}
        fn receive_frame_crcerror(&mut self, _: &mut Transceiver<SimPeripherals>) {}
        fn receive_ack_received(&mut self, _: &mut Transceiver<SimPeripherals>, _: FrameBuffer) {}
        fn receive_ack_crcerror(&mut self, _: &mut Transceiver<SimPeripherals>) {}
        fn transmit_frame_ccabusy(&mut self, _: &mut Transceiver<SimPeripherals>, _: FrameBuffer) {}
        fn transmit_frame_transmitted(
            &mut self,
            _: &mut Transceiver<SimPeripherals>,
            _: FrameBuffer,
        ) {
        }
        fn transmit_ack_transmitted(&mut self, _: &mut Transceiver<SimPeripherals>, _: FrameBuffer) {
        }
        fn standalone_cca_finished(&mut self, _: &mut Transceiver<SimPeripherals>, _: bool) {}
        fn energy_detection_finished(&mut self, _: &mut Transceiver<SimPeripherals>, _: u8) {}
        fn go_idle_finished(&mut self, _: &mut Transceiver<SimPeripherals>) {}
    }

    fn buffer() -> FrameBuffer {
        Box::leak(Box::new([0u8; FRAME_BUFFER_SIZE]))
    }
    fn enabled() -> Transceiver<SimPeripherals> {
        let mut trx = Transceiver::new(SimPeripherals::new(), TrxConfig::default()).unwrap();
        trx.enable();
        trx
    }

    #[test]
    fn enable_applies_configuration() {
        let config = TrxConfig {
            channel: 20,
            tx_power: 4,
            ..Default::default()
        };
        let mut trx = Transceiver::new(SimPeripherals::new(), config).unwrap();
        trx.enable();
        assert_eq!(trx.state(), TrxState::Idle);
        assert_eq!(trx.hardware().frequency(), 2450);
        assert_eq!(trx.hardware().tx_power(), 4);
        assert!(trx.hardware().fem_abort_armed());
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let config = TrxConfig {
            channel: 5,
            ..Default::default()
        };
        assert!(Transceiver::new(SimPeripherals::new(), config).is_err());
        let mut trx = enabled();
        assert!(trx.set_channel(27).is_err());
        assert_eq!(trx.config().channel, 11);
        trx.set_channel(26).unwrap();
        assert_eq!(trx.hardware().frequency(), 2480);
    }

    #[test]
    fn ramp_up_activates_lna_before_ready() {
        let mut trx = enabled();
        trx.receive_buffer_set(buffer()).unwrap();
        trx.receive_frame(3, RampUpTrigger::Software, Notifications::NONE, 0);
        assert_eq!(trx.hardware().task_count(RadioTask::RxEn), 1);
        trx.hardware().advance(29);
        assert!(!trx.hardware().fem_active());
        trx.hardware().advance(1);
        assert!(trx.hardware().fem_active());
        trx.hardware().advance(10);
        assert_eq!(trx.hardware().state(), RadioState::Rx);
        assert!(!trx.hardware().irq_pending());
        trx.irq_handler(&mut Quiet);
    }

    #[test]
    fn bcmatch_keeps_threshold_when_callout_returns_same() {
        let mut trx = enabled();
        trx.receive_buffer_set(buffer()).unwrap();
        trx.receive_frame(3, RampUpTrigger::Software, Notifications::NONE, 0);
        trx.hardware().advance(40);
        trx.hardware().frame_started();
        trx.hardware().bit_count_reached();
        trx.irq_handler(&mut Quiet);
        assert!(trx.psdu_is_being_received());
        assert_eq!(trx.hardware().bcc(), 24);
    }
}
