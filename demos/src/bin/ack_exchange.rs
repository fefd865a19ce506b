//! Receives a few frames on the simulated radio, acknowledges each of them within the turnaround
//! time and hands them to the application through the notification pipeline.
use core::cell::RefCell;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::Mutex;
use ieee802154_trx::{
    psdu_length, sim::SimPeripherals, CcaError, EnergyDetectionError, FrameBuffer,
    NotificationHandler, NotificationPipeline, Notifications, RampUpTrigger, ReceiveError,
    SharedTransceiver, SwiSignal, Transceiver, TransmitError, TrxCallouts, TrxConfig,
    FRAME_BUFFER_SIZE,
};
use log::{info, warn};

macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

/// Turnaround from the end of a frame to the first symbol of its ACK.
const ACK_DELAY_US: u32 = 192;
/// Frame control and sequence number.
const HEADER_BCC: u8 = 3;

static PIPELINE: NotificationPipeline<SwiSignal> = NotificationPipeline::new(SwiSignal::new());

fn listen(trx: &mut Transceiver<SimPeripherals>) {
    trx.receive_frame(HEADER_BCC, RampUpTrigger::Software, Notifications::NONE, 0);
}

/// The MAC layer, running in the radio interrupt.
struct Mac {
    ack: Option<FrameBuffer>,
    acked: Option<FrameBuffer>,
}
impl TrxCallouts<SimPeripherals> for Mac {
    fn receive_frame_bcmatched(&mut self, _trx: &mut Transceiver<SimPeripherals>, bcc: u8) -> u8 {
        bcc
    }
    fn receive_frame_received(&mut self, trx: &mut Transceiver<SimPeripherals>, frame: FrameBuffer) {
        let Some(ack) = self.ack.take() else {
            warn!("No ACK buffer available.");
            PIPELINE.notify_received(frame, trx.rssi_last_sample(), 0xff);
            listen(trx);
            return;
        };
        ack[..4].copy_from_slice(&[5, 0x02, 0x00, frame[3]]);
        match trx.transmit_ack(ack, ACK_DELAY_US) {
            Ok(()) => self.acked = Some(frame),
            Err(ack) => {
                warn!("Missed the ACK deadline.");
                self.ack = Some(ack);
                PIPELINE.notify_received(frame, trx.rssi_last_sample(), 0xff);
                listen(trx);
            }
        }
    }
    fn receive_frame_crcerror(&mut self, trx: &mut Transceiver<SimPeripherals>) {
        PIPELINE.notify_receive_failed(ReceiveError::InvalidChecksum, 0, true);
        listen(trx);
    }
    fn receive_ack_received(&mut self, trx: &mut Transceiver<SimPeripherals>, ack: FrameBuffer) {
        let _ = trx.receive_buffer_set(ack);
    }
    fn receive_ack_crcerror(&mut self, _trx: &mut Transceiver<SimPeripherals>) {}
    fn transmit_frame_ccabusy(
        &mut self,
        _trx: &mut Transceiver<SimPeripherals>,
        frame: FrameBuffer,
    ) {
        PIPELINE.notify_transmit_failed(frame, TransmitError::BusyChannel);
    }
    fn transmit_frame_transmitted(
        &mut self,
        _trx: &mut Transceiver<SimPeripherals>,
        frame: FrameBuffer,
    ) {
        PIPELINE.notify_transmitted(frame, None, 0, 0);
    }
    fn transmit_ack_transmitted(
        &mut self,
        trx: &mut Transceiver<SimPeripherals>,
        ack: FrameBuffer,
    ) {
        self.ack = Some(ack);
        let hw = trx.hardware();
        if let (Some(end), Some(start)) = (hw.rx_end_at(), hw.tx_started_at()) {
            info!("ACK went on air {}us after the frame.", start - end);
        }
        if let Some(frame) = self.acked.take() {
            PIPELINE.notify_received(frame, trx.rssi_last_sample(), 0xff);
        }
        listen(trx);
    }
    fn standalone_cca_finished(&mut self, _trx: &mut Transceiver<SimPeripherals>, idle: bool) {
        PIPELINE.notify_cca(idle);
    }
    fn energy_detection_finished(&mut self, _trx: &mut Transceiver<SimPeripherals>, sample: u8) {
        PIPELINE.notify_energy_detected(sample as i8);
    }
    fn go_idle_finished(&mut self, _trx: &mut Transceiver<SimPeripherals>) {
        info!("Radio is idle.");
    }
}

/// The application, running in the software interrupt.
struct App {
    trx: &'static SharedTransceiver<SimPeripherals>,
    frames: usize,
}
impl NotificationHandler for App {
    fn received(&mut self, frame: FrameBuffer, power: i8, lqi: u8) {
        let len = psdu_length(frame);
        info!(
            "Received {:02x?} at {} dBm, LQI {}.",
            &frame[1..=len],
            power,
            lqi
        );
        self.frames += 1;
        self.trx.lock(|trx| match trx.borrow_mut().receive_buffer_set(frame) {
            Ok(true) => info!("Reception resumed."),
            Ok(false) => {}
            Err(_) => warn!("The transceiver already holds a buffer."),
        });
    }
    fn receive_failed(&mut self, error: ReceiveError, _id: u32) {
        warn!("Reception failed: {error:?}");
    }
    fn transmitted(&mut self, _frame: FrameBuffer, _ack: Option<FrameBuffer>, _power: i8, _lqi: u8) {
    }
    fn transmit_failed(&mut self, _frame: FrameBuffer, error: TransmitError) {
        warn!("Transmission failed: {error:?}");
    }
    fn energy_detected(&mut self, result: i8) {
        info!("Energy detected: {result}");
    }
    fn energy_detection_failed(&mut self, error: EnergyDetectionError) {
        warn!("Energy detection failed: {error:?}");
    }
    fn cca_done(&mut self, channel_free: bool) {
        info!("Channel free: {channel_free}");
    }
    fn cca_failed(&mut self, error: CcaError) {
        warn!("CCA failed: {error:?}");
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let trx = Transceiver::new(SimPeripherals::new(), TrxConfig::default()).unwrap();
    let trx = mk_static!(
        SharedTransceiver<SimPeripherals>,
        Mutex::new(RefCell::new(trx))
    );
    let rx_buffer = mk_static!([u8; FRAME_BUFFER_SIZE], [0; FRAME_BUFFER_SIZE]);
    let ack_buffer = mk_static!([u8; FRAME_BUFFER_SIZE], [0; FRAME_BUFFER_SIZE]);
    let mut mac = Mac {
        ack: Some(ack_buffer),
        acked: None,
    };
    let mut app = App { trx, frames: 0 };

    trx.lock(|trx| {
        let mut trx = trx.borrow_mut();
        trx.enable();
        let _ = trx.receive_buffer_set(rx_buffer);
        listen(&mut trx);
    });

    for sequence_number in 0..3u8 {
        let psdu = [
            0x61,
            0x88,
            sequence_number,
            0xcd,
            0xab,
            0xff,
            0xff,
            0x34,
            0x12,
            0xde,
            0xad,
        ];
        trx.lock(|trx| {
            let mut trx = trx.borrow_mut();
            trx.hardware().advance(100);
            trx.hardware().receive(&psdu, true);
            trx.irq_handler(&mut mac);
            trx.hardware().advance(ACK_DELAY_US);
            trx.hardware().transmit();
            trx.irq_handler(&mut mac);
        });
        block_on(PIPELINE.swi().wait());
        PIPELINE.process(&mut app);
    }
    info!("{} frames received and acknowledged.", app.frames);
}
