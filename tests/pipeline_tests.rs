use core::cell::RefCell;

use embassy_futures::{block_on, poll_once};
use embassy_sync::blocking_mutex::Mutex;
use ieee802154_trx::{
    hal::{Radio, RadioState},
    sim::SimPeripherals,
    CcaError, EnergyDetectionError, FrameBuffer, NotificationHandler, NotificationPipeline,
    Notifications, PoolId, RampUpTrigger, ReceiveError, SharedTransceiver, SoftwareInterrupt,
    SwiSignal, Transceiver, TransmitError, TrxCallouts, TrxConfig, FRAME_BUFFER_SIZE,
    PRIMARY_POOL_SIZE, SECONDARY_POOL_SIZE,
};

fn buffer() -> FrameBuffer {
    Box::leak(Box::new([0; FRAME_BUFFER_SIZE]))
}
fn tagged(tag: u8) -> FrameBuffer {
    let frame = buffer();
    frame[0] = 1;
    frame[1] = tag;
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivered {
    Received { tag: u8, power: i8, lqi: u8 },
    ReceiveFailed { error: ReceiveError, id: u32 },
    Transmitted { tag: u8, ack: Option<u8> },
    TransmitFailed { tag: u8, error: TransmitError },
    EnergyDetected(i8),
    EnergyDetectionFailed(EnergyDetectionError),
    CcaDone(bool),
    CcaFailed(CcaError),
}

#[derive(Default)]
struct Collector(Vec<Delivered>);
impl NotificationHandler for Collector {
    fn received(&mut self, frame: FrameBuffer, power: i8, lqi: u8) {
        self.0.push(Delivered::Received {
            tag: frame[1],
            power,
            lqi,
        });
    }
    fn receive_failed(&mut self, error: ReceiveError, id: u32) {
        self.0.push(Delivered::ReceiveFailed { error, id });
    }
    fn transmitted(&mut self, frame: FrameBuffer, ack: Option<FrameBuffer>, _power: i8, _lqi: u8) {
        self.0.push(Delivered::Transmitted {
            tag: frame[1],
            ack: ack.map(|ack| ack[1]),
        });
    }
    fn transmit_failed(&mut self, frame: FrameBuffer, error: TransmitError) {
        self.0.push(Delivered::TransmitFailed {
            tag: frame[1],
            error,
        });
    }
    fn energy_detected(&mut self, result: i8) {
        self.0.push(Delivered::EnergyDetected(result));
    }
    fn energy_detection_failed(&mut self, error: EnergyDetectionError) {
        self.0.push(Delivered::EnergyDetectionFailed(error));
    }
    fn cca_done(&mut self, channel_free: bool) {
        self.0.push(Delivered::CcaDone(channel_free));
    }
    fn cca_failed(&mut self, error: CcaError) {
        self.0.push(Delivered::CcaFailed(error));
    }
}

#[derive(Default)]
struct NoSwi;
impl SoftwareInterrupt for NoSwi {
    fn pend(&self) {}
}

#[test]
fn every_kind_is_delivered_in_order() {
    let pipeline = NotificationPipeline::new(NoSwi);
    pipeline.notify_received(tagged(1), -40, 200);
    pipeline.notify_transmitted(tagged(2), Some(tagged(3)), -50, 180);
    pipeline.notify_receive_failed(ReceiveError::Overlapped, 9, true);
    pipeline.notify_transmit_failed(tagged(4), TransmitError::NoAck);
    pipeline.notify_energy_detected(-90);
    pipeline.notify_energy_detection_failed(EnergyDetectionError::TimeslotEnded);
    pipeline.notify_cca(false);
    pipeline.notify_cca_failed(CcaError::Aborted);
    pipeline.notify_transmitted(tagged(5), None, 0, 0);
    assert_eq!(pipeline.pending(), 9);

    let mut collector = Collector::default();
    assert_eq!(pipeline.process(&mut collector), 9);
    assert_eq!(
        collector.0,
        [
            Delivered::Received {
                tag: 1,
                power: -40,
                lqi: 200
            },
            Delivered::Transmitted {
                tag: 2,
                ack: Some(3)
            },
            Delivered::ReceiveFailed {
                error: ReceiveError::Overlapped,
                id: 9
            },
            Delivered::TransmitFailed {
                tag: 4,
                error: TransmitError::NoAck
            },
            Delivered::EnergyDetected(-90),
            Delivered::EnergyDetectionFailed(EnergyDetectionError::TimeslotEnded),
            Delivered::CcaDone(false),
            Delivered::CcaFailed(CcaError::Aborted),
            Delivered::Transmitted { tag: 5, ack: None },
        ]
    );
    assert_eq!(pipeline.process(&mut collector), 0);
}

#[test]
fn interleaved_pushes_and_drains_keep_order() {
    let pipeline = NotificationPipeline::new(NoSwi);
    let mut collector = Collector::default();
    let mut expected = Vec::new();
    let mut seed = 0x2545_f491_u32;
    let mut id = 0;
    for _ in 0..200 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        let burst = (seed >> 16) as usize % (PRIMARY_POOL_SIZE + SECONDARY_POOL_SIZE + 4);
        for _ in 0..burst {
            let droppable = id % 3 == 0;
            if !droppable && pipeline.free_slots(PoolId::Primary) == 0 {
                continue;
            }
            if pipeline.notify_receive_failed(ReceiveError::InvalidFrame, id, droppable) {
                expected.push(Delivered::ReceiveFailed {
                    error: ReceiveError::InvalidFrame,
                    id,
                });
            }
            id += 1;
        }
        pipeline.process(&mut collector);
    }
    assert_eq!(collector.0, expected);
    assert!(expected.len() > 1000);
}

#[test]
fn secondary_pool_is_independent_of_primary() {
    let pipeline = NotificationPipeline::new(NoSwi);
    for tag in 0..PRIMARY_POOL_SIZE as u8 {
        pipeline.notify_received(tagged(tag), 0, 0);
    }
    assert_eq!(pipeline.free_slots(PoolId::Primary), 0);
    for id in 0..SECONDARY_POOL_SIZE as u32 {
        assert!(pipeline.notify_receive_failed(ReceiveError::Aborted, id, true));
    }
    assert!(!pipeline.notify_receive_failed(ReceiveError::Aborted, 99, true));
    assert_eq!(pipeline.pending(), PRIMARY_POOL_SIZE + SECONDARY_POOL_SIZE);

    let mut collector = Collector::default();
    pipeline.process(&mut collector);
    assert_eq!(collector.0.len(), PRIMARY_POOL_SIZE + SECONDARY_POOL_SIZE);
    assert_eq!(pipeline.free_slots(PoolId::Primary), PRIMARY_POOL_SIZE);
    assert_eq!(pipeline.free_slots(PoolId::Secondary), SECONDARY_POOL_SIZE);
}

#[test]
#[should_panic(expected = "No notification slot left.")]
fn required_notification_without_slot_is_fatal() {
    let pipeline = NotificationPipeline::new(NoSwi);
    for tag in 0..PRIMARY_POOL_SIZE as u8 {
        pipeline.notify_received(tagged(tag), 0, 0);
    }
    pipeline.notify_receive_failed(ReceiveError::Aborted, 0, false);
}

/// Queues another droppable notification from within the handler.
struct Requeue<'a> {
    pipeline: &'a NotificationPipeline<NoSwi>,
    ids: Vec<u32>,
    pushed: Vec<bool>,
}
impl NotificationHandler for Requeue<'_> {
    fn received(&mut self, _frame: FrameBuffer, _power: i8, _lqi: u8) {}
    fn receive_failed(&mut self, error: ReceiveError, id: u32) {
        self.ids.push(id);
        if id < 100 {
            self.pushed
                .push(self.pipeline.notify_receive_failed(error, id + 100, true));
        }
    }
    fn transmitted(&mut self, _frame: FrameBuffer, _ack: Option<FrameBuffer>, _power: i8, _lqi: u8) {
    }
    fn transmit_failed(&mut self, _frame: FrameBuffer, _error: TransmitError) {}
    fn energy_detected(&mut self, _result: i8) {}
    fn energy_detection_failed(&mut self, _error: EnergyDetectionError) {}
    fn cca_done(&mut self, _channel_free: bool) {}
    fn cca_failed(&mut self, _error: CcaError) {}
}

#[test]
fn slot_is_released_after_handler_returns() {
    let pipeline = NotificationPipeline::new(NoSwi);
    for id in 0..SECONDARY_POOL_SIZE as u32 {
        pipeline.notify_receive_failed(ReceiveError::InvalidChecksum, id, true);
    }
    let mut handler = Requeue {
        pipeline: &pipeline,
        ids: Vec::new(),
        pushed: Vec::new(),
    };
    assert_eq!(pipeline.process(&mut handler), 7);
    // The first callout still holds its own slot, the later ones reuse the released ones.
    assert_eq!(handler.pushed, [false, true, true, true]);
    assert_eq!(handler.ids, [0, 1, 2, 3, 101, 102, 103]);
    assert_eq!(pipeline.free_slots(PoolId::Secondary), SECONDARY_POOL_SIZE);
}

#[test]
fn signal_wakes_consumer() {
    let signal = SwiSignal::new();
    let pipeline = NotificationPipeline::new(&signal);
    assert!(poll_once(pipeline.swi().wait()).is_pending());
    pipeline.notify_cca(true);
    pipeline.notify_energy_detected(-70);
    block_on(pipeline.swi().wait());
    let mut collector = Collector::default();
    assert_eq!(pipeline.process(&mut collector), 2);
    assert!(!signal.is_pending());
}

/// Hands the results of the radio interrupt to the pipeline and keeps listening.
struct Forwarder<'a> {
    pipeline: &'a NotificationPipeline<&'a SwiSignal>,
}
impl TrxCallouts<SimPeripherals> for Forwarder<'_> {
    fn receive_frame_bcmatched(&mut self, _trx: &mut Transceiver<SimPeripherals>, bcc: u8) -> u8 {
        bcc
    }
    fn receive_frame_received(&mut self, trx: &mut Transceiver<SimPeripherals>, frame: FrameBuffer) {
        self.pipeline
            .notify_received(frame, trx.rssi_last_sample(), 0xff);
        trx.receive_frame(3, RampUpTrigger::Software, Notifications::NONE, 0);
    }
    fn receive_frame_crcerror(&mut self, trx: &mut Transceiver<SimPeripherals>) {
        self.pipeline
            .notify_receive_failed(ReceiveError::InvalidChecksum, 0, true);
        trx.receive_frame(3, RampUpTrigger::Software, Notifications::NONE, 0);
    }
    fn receive_ack_received(&mut self, _trx: &mut Transceiver<SimPeripherals>, _ack: FrameBuffer) {}
    fn receive_ack_crcerror(&mut self, _trx: &mut Transceiver<SimPeripherals>) {}
    fn transmit_frame_ccabusy(
        &mut self,
        _trx: &mut Transceiver<SimPeripherals>,
        frame: FrameBuffer,
    ) {
        self.pipeline
            .notify_transmit_failed(frame, TransmitError::BusyChannel);
    }
    fn transmit_frame_transmitted(
        &mut self,
        _trx: &mut Transceiver<SimPeripherals>,
        frame: FrameBuffer,
    ) {
        self.pipeline.notify_transmitted(frame, None, 0, 0);
    }
    fn transmit_ack_transmitted(&mut self, _trx: &mut Transceiver<SimPeripherals>, _ack: FrameBuffer) {
    }
    fn standalone_cca_finished(&mut self, _trx: &mut Transceiver<SimPeripherals>, idle: bool) {
        self.pipeline.notify_cca(idle);
    }
    fn energy_detection_finished(&mut self, _trx: &mut Transceiver<SimPeripherals>, sample: u8) {
        self.pipeline.notify_energy_detected(sample as i8);
    }
    fn go_idle_finished(&mut self, _trx: &mut Transceiver<SimPeripherals>) {}
}

/// Returns every received buffer to the shared transceiver.
struct App<'a> {
    trx: &'a SharedTransceiver<SimPeripherals>,
    collector: Collector,
    resumed: usize,
}
impl NotificationHandler for App<'_> {
    fn received(&mut self, frame: FrameBuffer, power: i8, lqi: u8) {
        self.collector.0.push(Delivered::Received {
            tag: frame[1],
            power,
            lqi,
        });
        let resumed = self
            .trx
            .lock(|trx| trx.borrow_mut().receive_buffer_set(frame));
        if matches!(resumed, Ok(true)) {
            self.resumed += 1;
        }
    }
    fn receive_failed(&mut self, error: ReceiveError, id: u32) {
        self.collector.receive_failed(error, id);
    }
    fn transmitted(&mut self, frame: FrameBuffer, ack: Option<FrameBuffer>, power: i8, lqi: u8) {
        self.collector.transmitted(frame, ack, power, lqi);
    }
    fn transmit_failed(&mut self, frame: FrameBuffer, error: TransmitError) {
        self.collector.transmit_failed(frame, error);
    }
    fn energy_detected(&mut self, result: i8) {
        self.collector.energy_detected(result);
    }
    fn energy_detection_failed(&mut self, error: EnergyDetectionError) {
        self.collector.energy_detection_failed(error);
    }
    fn cca_done(&mut self, channel_free: bool) {
        self.collector.cca_done(channel_free);
    }
    fn cca_failed(&mut self, error: CcaError) {
        self.collector.cca_failed(error);
    }
}

#[test]
fn received_frames_flow_back_as_buffers() {
    let signal = SwiSignal::new();
    let pipeline = NotificationPipeline::new(&signal);
    let mut forwarder = Forwarder {
        pipeline: &pipeline,
    };

    let mut trx = Transceiver::new(SimPeripherals::new(), TrxConfig::default()).unwrap();
    trx.enable();
    trx.receive_buffer_set(buffer()).unwrap();
    trx.receive_frame(3, RampUpTrigger::Software, Notifications::NONE, 0);
    let trx: SharedTransceiver<SimPeripherals> = Mutex::new(RefCell::new(trx));
    let mut app = App {
        trx: &trx,
        collector: Collector::default(),
        resumed: 0,
    };

    for tag in 0..4u8 {
        trx.lock(|trx| {
            let mut trx = trx.borrow_mut();
            trx.hardware().set_rssi(55);
            trx.hardware().advance(40);
            trx.hardware().receive(&[tag, 0x00, 0x11, 0x22], true);
            trx.irq_handler(&mut forwarder);
            // Listening again, but without a buffer to receive into.
            trx.hardware().advance(40);
            assert!(trx.receive_buffer_is_missing());
            assert_eq!(trx.hardware().state(), RadioState::RxIdle);
        });
        assert!(signal.is_pending());
        block_on(signal.wait());
        assert_eq!(pipeline.process(&mut app), 1);
        trx.lock(|trx| {
            let mut trx = trx.borrow_mut();
            assert!(!trx.receive_buffer_is_missing());
            assert_eq!(trx.hardware().state(), RadioState::Rx);
            // Leave the radio ramping up again for the next round.
            trx.abort();
            trx.receive_frame(3, RampUpTrigger::Software, Notifications::NONE, 0);
        });
    }
    assert_eq!(app.resumed, 4);
    let expected: Vec<_> = (0..4u8)
        .map(|tag| Delivered::Received {
            tag,
            power: -55,
            lqi: 0xff,
        })
        .collect();
    assert_eq!(app.collector.0, expected);
}

#[test]
fn measurements_are_delivered() {
    let signal = SwiSignal::new();
    let pipeline = NotificationPipeline::new(&signal);
    let mut forwarder = Forwarder {
        pipeline: &pipeline,
    };
    let mut trx = Transceiver::new(SimPeripherals::new(), TrxConfig::default()).unwrap();
    trx.enable();

    trx.standalone_cca();
    trx.hardware().advance(40);
    trx.hardware().cca_complete(true);
    trx.irq_handler(&mut forwarder);

    trx.energy_detection(4);
    trx.hardware().advance(40);
    trx.hardware().ed_complete(30);
    trx.irq_handler(&mut forwarder);

    trx.transmit_frame(
        tagged(7),
        RampUpTrigger::Software,
        1,
        0,
        Notifications::NONE,
    );
    trx.hardware().advance(40);
    trx.hardware().cca_complete(true);
    trx.irq_handler(&mut forwarder);

    let mut collector = Collector::default();
    block_on(signal.wait());
    assert_eq!(pipeline.process(&mut collector), 3);
    assert_eq!(
        collector.0,
        [
            Delivered::CcaDone(false),
            Delivered::EnergyDetected(30),
            Delivered::TransmitFailed {
                tag: 7,
                error: TransmitError::BusyChannel
            },
        ]
    );
}
