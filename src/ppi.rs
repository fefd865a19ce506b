//! Hardware wiring between the radio, the timer and the front-end.
//!
//! All of the latency critical sequencing is done by connecting peripheral events to tasks, so
//! that the hardware runs it autonomously. The [Binder] owns the channel plan and keeps track of
//! which links are currently live, so that the transceiver can tear down exactly what a state
//! set up.
use bitfield_struct::bitfield;

use crate::{
    frame::RampUpTrigger,
    hal::{Channel, FemError, FrontEnd, HwEvent, HwTask, Interconnect, RadioEvent, RadioTask, TimerTask},
};

/// The channel starting the ramp-up. It's published, so that other protocols can trigger it.
pub const RAMP_UP_CHANNEL: Channel = 0;
/// Restarts the turnaround timer at the end of a received frame.
pub const FRAME_END_CHANNEL: Channel = 1;
/// Starts the ramp-up of the ACK transmission on a timer compare.
pub const ACK_TX_CHANNEL: Channel = 2;
/// Retriggers the CCA, while it reports a busy channel.
pub const CCA_RETRY_CHANNEL: Channel = 3;
/// Counts the busy results of the CCA.
pub const CCA_COUNT_CHANNEL: Channel = 4;
/// Cuts [CCA_RETRY_CHANNEL], once the counter reached the last attempt.
pub const CCA_LIMIT_CHANNEL: Channel = 5;

/// Compare channel activating the front-end during a ramp-up.
pub const FEM_COMPARE: u8 = 0;
/// Compare channel starting the ramp-up of an ACK.
pub const ACK_COMPARE: u8 = 1;
/// Channel used to read the timer.
pub const CAPTURE: u8 = 2;

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
/// The links currently set up.
pub struct Connections {
    pub ramp_up: bool,
    pub fem_timing: bool,
    pub frame_end: bool,
    pub ack_transmit: bool,
    pub cca_retry: bool,
    pub fem_abort: bool,
    #[bits(2)]
    __: u8,
}

/// Sets up and tears down the links on the interconnect fabric.
#[derive(Debug, Default)]
pub struct Binder {
    connected: Connections,
}
impl Binder {
    pub const fn new() -> Self {
        Self {
            connected: Connections::new(),
        }
    }
    /// The links currently set up.
    pub fn connections(&self) -> Connections {
        self.connected
    }
    /// Connect the ramp-up trigger to `task`.
    ///
    /// With [RampUpTrigger::Hardware] the source is the external event on [RAMP_UP_CHANNEL],
    /// otherwise it's the software trigger.
    pub fn connect_ramp_up<F: Interconnect>(
        &mut self,
        fabric: &mut F,
        task: RadioTask,
        trigger: RampUpTrigger,
    ) {
        let source = match trigger {
            RampUpTrigger::Software => HwEvent::Software,
            RampUpTrigger::Hardware => HwEvent::External,
        };
        fabric.connect(RAMP_UP_CHANNEL, source, HwTask::Radio(task));
        fabric.enable(RAMP_UP_CHANNEL);
        self.connected.set_ramp_up(true);
        trace!("Ramp-up of {:?} connected to {:?}.", task, source);
    }
    pub fn clear_ramp_up<F: Interconnect>(&mut self, fabric: &mut F) {
        if self.connected.ramp_up() {
            fabric.disconnect(RAMP_UP_CHANNEL);
        }
        self.connected.set_ramp_up(false);
        self.connected.set_fem_timing(false);
    }
    /// Fire the software ramp-up trigger.
    pub fn trigger_ramp_up<F: Interconnect>(&mut self, fabric: &mut F) {
        debug_assert!(self.connected.ramp_up());
        fabric.trigger_software();
    }
    /// Start the timer together with the ramp-up, so that a compare can activate the front-end.
    pub fn connect_fem_timing<F: Interconnect>(&mut self, fabric: &mut F) {
        debug_assert!(self.connected.ramp_up());
        fabric.fork(RAMP_UP_CHANNEL, HwTask::Timer(TimerTask::Start));
        self.connected.set_fem_timing(true);
    }
    pub fn clear_fem_timing<F: Interconnect>(&mut self, fabric: &mut F) {
        if self.connected.fem_timing() {
            fabric.fork_clear(RAMP_UP_CHANNEL);
        }
        self.connected.set_fem_timing(false);
    }
    /// Restart the timer from zero at the end of every received frame.
    pub fn connect_frame_end_timer<F: Interconnect>(&mut self, fabric: &mut F) {
        fabric.connect(
            FRAME_END_CHANNEL,
            HwEvent::Radio(RadioEvent::End),
            HwTask::Timer(TimerTask::Clear),
        );
        fabric.fork(FRAME_END_CHANNEL, HwTask::Timer(TimerTask::Start));
        fabric.enable(FRAME_END_CHANNEL);
        self.connected.set_frame_end(true);
    }
    pub fn clear_frame_end_timer<F: Interconnect>(&mut self, fabric: &mut F) {
        if self.connected.frame_end() {
            fabric.disconnect(FRAME_END_CHANNEL);
        }
        self.connected.set_frame_end(false);
    }
    /// Ramp up for transmission, when the timer hits [ACK_COMPARE].
    pub fn connect_ack_transmit<F: Interconnect>(&mut self, fabric: &mut F) {
        fabric.connect(
            ACK_TX_CHANNEL,
            HwEvent::TimerCompare(ACK_COMPARE),
            HwTask::Radio(RadioTask::TxEn),
        );
        fabric.enable(ACK_TX_CHANNEL);
        self.connected.set_ack_transmit(true);
    }
    pub fn clear_ack_transmit<F: Interconnect>(&mut self, fabric: &mut F) {
        if self.connected.ack_transmit() {
            fabric.disconnect(ACK_TX_CHANNEL);
        }
        self.connected.set_ack_transmit(false);
    }
    /// Restart the CCA every time it reports a busy channel, until the event counter reaches its
    /// limit.
    ///
    /// Every busy result is counted, so the counter has to be armed with one less than the
    /// number of attempts. The retry link is cut by the counter itself, which keeps the number
    /// of CCAs bounded no matter how late the interrupt is serviced.
    pub fn connect_cca_retry<F: Interconnect>(&mut self, fabric: &mut F) {
        fabric.connect(
            CCA_RETRY_CHANNEL,
            HwEvent::Radio(RadioEvent::CcaBusy),
            HwTask::Radio(RadioTask::CcaStart),
        );
        fabric.connect(
            CCA_COUNT_CHANNEL,
            HwEvent::Radio(RadioEvent::CcaBusy),
            HwTask::Count,
        );
        fabric.connect(
            CCA_LIMIT_CHANNEL,
            HwEvent::CountReached,
            HwTask::DisableChannel(CCA_RETRY_CHANNEL),
        );
        fabric.enable(CCA_RETRY_CHANNEL);
        fabric.enable(CCA_COUNT_CHANNEL);
        fabric.enable(CCA_LIMIT_CHANNEL);
        self.connected.set_cca_retry(true);
    }
    pub fn clear_cca_retry<F: Interconnect>(&mut self, fabric: &mut F) {
        if self.connected.cca_retry() {
            fabric.disconnect(CCA_RETRY_CHANNEL);
            fabric.disconnect(CCA_COUNT_CHANNEL);
            fabric.disconnect(CCA_LIMIT_CHANNEL);
        }
        self.connected.set_cca_retry(false);
    }
    /// Deactivate the front-end in hardware, as soon as the radio reports being disabled.
    ///
    /// This link stays up for as long as the transceiver is enabled.
    pub fn connect_fem_abort<M: FrontEnd>(&mut self, front_end: &mut M) -> Result<(), FemError> {
        front_end.abort_set(HwEvent::Radio(RadioEvent::Disabled))?;
        self.connected.set_fem_abort(true);
        Ok(())
    }
    pub fn clear_fem_abort<M: FrontEnd>(&mut self, front_end: &mut M) {
        if self.connected.fem_abort() {
            front_end.abort_clear();
        }
        self.connected.set_fem_abort(false);
    }
    /// Tear down every link except the front-end abort.
    pub fn clear_all<F: Interconnect>(&mut self, fabric: &mut F) {
        self.clear_ramp_up(fabric);
        self.clear_frame_end_timer(fabric);
        self.clear_ack_transmit(fabric);
        self.clear_cca_retry(fabric);
    }
    /// The channel, on which an external event starts a hardware triggered ramp-up.
    pub const fn ramp_up_channel(&self) -> Channel {
        RAMP_UP_CHANNEL
    }
}
