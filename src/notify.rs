//! Deferred delivery of notifications.
//!
//! Notifications are produced in the radio interrupt and delivered to the application from a
//! lower priority software interrupt. Each one lives in a slot claimed from one of two fixed
//! pools:
//! - The primary pool has room for every notification that must not be lost, one per receive
//!   buffer and one for the operation in progress. Running out of it is fatal.
//! - The secondary pool holds notifications that may be dropped under load, like spurious
//!   reception failures.
//!
//! Claimed slots are pushed onto a FIFO, which [NotificationPipeline::process] drains in order.
//! A slot is only released after the handler returned.
use core::{
    cell::{Cell, UnsafeCell},
    mem::MaybeUninit,
};

use embassy_sync::blocking_mutex::{self, raw::CriticalSectionRawMutex};
use portable_atomic::{fence, AtomicBool, AtomicUsize, Ordering};

use crate::{
    error::{CcaError, EnergyDetectionError, ReceiveError, TransmitError},
    frame::FrameBuffer,
};

/// The number of receive buffers the layer above may hand out at once.
pub const RX_BUFFERS: usize = 16;
pub const PRIMARY_POOL_SIZE: usize = RX_BUFFERS + 1;
pub const SECONDARY_POOL_SIZE: usize = 4;
/// One more than there are slots, so a full queue can be told apart from an empty one.
pub const QUEUE_SIZE: usize = PRIMARY_POOL_SIZE + SECONDARY_POOL_SIZE + 1;

/// A notification waiting for delivery.
pub enum Notification {
    Received {
        frame: FrameBuffer,
        power: i8,
        lqi: u8,
    },
    ReceiveFailed {
        error: ReceiveError,
        id: u32,
    },
    Transmitted {
        frame: FrameBuffer,
        ack: Option<FrameBuffer>,
        power: i8,
        lqi: u8,
    },
    TransmitFailed {
        frame: FrameBuffer,
        error: TransmitError,
    },
    EnergyDetected {
        result: i8,
    },
    EnergyDetectionFailed {
        error: EnergyDetectionError,
    },
    CcaDone {
        channel_free: bool,
    },
    CcaFailed {
        error: CcaError,
    },
}

/// Receives the notifications, when the queue is drained.
pub trait NotificationHandler {
    fn received(&mut self, frame: FrameBuffer, power: i8, lqi: u8);
    fn receive_failed(&mut self, error: ReceiveError, id: u32);
    fn transmitted(&mut self, frame: FrameBuffer, ack: Option<FrameBuffer>, power: i8, lqi: u8);
    fn transmit_failed(&mut self, frame: FrameBuffer, error: TransmitError);
    fn energy_detected(&mut self, result: i8);
    fn energy_detection_failed(&mut self, error: EnergyDetectionError);
    fn cca_done(&mut self, channel_free: bool);
    fn cca_failed(&mut self, error: CcaError);
}

/// The interrupt, in which the queue is drained.
pub trait SoftwareInterrupt {
    /// Request the interrupt. It must not run nested in the caller.
    fn pend(&self);
}
impl<T: SoftwareInterrupt + ?Sized> SoftwareInterrupt for &T {
    fn pend(&self) {
        (**self).pend()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PoolId {
    Primary,
    Secondary,
}

struct Slot {
    taken: AtomicBool,
    payload: UnsafeCell<MaybeUninit<Notification>>,
}
impl Slot {
    const fn new() -> Self {
        Self {
            taken: AtomicBool::new(false),
            payload: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: Slot = Slot::new();

struct Pool<const N: usize> {
    slots: [Slot; N],
}
impl<const N: usize> Pool<N> {
    const fn new() -> Self {
        Self {
            slots: [EMPTY_SLOT; N],
        }
    }
    /// Claim a free slot.
    ///
    /// A slot, which was taken in the meantime, is skipped.
    fn claim(&self) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .taken
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // The payload must not be written, before the claim is visible.
                fence(Ordering::SeqCst);
                return Some(index);
            }
        }
        None
    }
    fn free_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.taken.load(Ordering::Relaxed))
            .count()
    }
}

#[derive(Clone, Copy)]
struct Entry {
    pool: PoolId,
    index: u8,
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_ENTRY: UnsafeCell<Entry> = UnsafeCell::new(Entry {
    pool: PoolId::Primary,
    index: 0,
});

/// The notification pipeline.
///
/// Producers may call the `notify_*` functions from any priority, the consumer calls
/// [process](Self::process) from the software interrupt.
pub struct NotificationPipeline<S: SoftwareInterrupt> {
    primary: Pool<PRIMARY_POOL_SIZE>,
    secondary: Pool<SECONDARY_POOL_SIZE>,
    entries: [UnsafeCell<Entry>; QUEUE_SIZE],
    /// Written by producers inside the critical section.
    head: blocking_mutex::Mutex<CriticalSectionRawMutex, Cell<usize>>,
    /// Only written by the consumer.
    tail: AtomicUsize,
    swi: S,
}
// SAFETY: Slots are only accessed by whoever claimed them, entries are written under the
// critical section before the head moves past them and only read by the single consumer.
unsafe impl<S: SoftwareInterrupt + Sync> Sync for NotificationPipeline<S> {}

impl<S: SoftwareInterrupt> NotificationPipeline<S> {
    pub const fn new(swi: S) -> Self {
        Self {
            primary: Pool::new(),
            secondary: Pool::new(),
            entries: [EMPTY_ENTRY; QUEUE_SIZE],
            head: blocking_mutex::Mutex::new(Cell::new(0)),
            tail: AtomicUsize::new(0),
            swi,
        }
    }
    pub fn swi(&self) -> &S {
        &self.swi
    }
    /// The number of notifications waiting for delivery.
    pub fn pending(&self) -> usize {
        let head = self.head.lock(Cell::get);
        let tail = self.tail.load(Ordering::Acquire);
        (head + QUEUE_SIZE - tail) % QUEUE_SIZE
    }
    /// The number of free slots in a pool.
    pub fn free_slots(&self, pool: PoolId) -> usize {
        match pool {
            PoolId::Primary => self.primary.free_slots(),
            PoolId::Secondary => self.secondary.free_slots(),
        }
    }

    fn slot(&self, pool: PoolId, index: usize) -> &Slot {
        match pool {
            PoolId::Primary => &self.primary.slots[index],
            PoolId::Secondary => &self.secondary.slots[index],
        }
    }
    /// Queue `notification` in a slot from `pool` and pend the software interrupt.
    ///
    /// Returns `false` without side effects, if the pool is exhausted.
    fn push(&self, pool: PoolId, notification: Notification) -> bool {
        let claimed = match pool {
            PoolId::Primary => self.primary.claim(),
            PoolId::Secondary => self.secondary.claim(),
        };
        let Some(index) = claimed else {
            return false;
        };
        let slot = self.slot(pool, index);
        // SAFETY: The slot was claimed above and isn't queued yet, nobody else accesses it.
        unsafe {
            (*slot.payload.get()).write(notification);
        }
        self.head.lock(|head| {
            let position = head.get();
            let next = (position + 1) % QUEUE_SIZE;
            assert!(
                next != self.tail.load(Ordering::Acquire),
                "Notification queue overflow."
            );
            // SAFETY: The entry at head is outside of the consumer's range and producers are
            // serialized by the critical section.
            unsafe {
                *self.entries[position].get() = Entry {
                    pool,
                    index: index as u8,
                };
            }
            head.set(next);
        });
        self.swi.pend();
        true
    }
    fn push_required(&self, notification: Notification) -> bool {
        let pushed = self.push(PoolId::Primary, notification);
        assert!(pushed, "No notification slot left.");
        pushed
    }

    /// A frame was received.
    pub fn notify_received(&self, frame: FrameBuffer, power: i8, lqi: u8) -> bool {
        self.push_required(Notification::Received { frame, power, lqi })
    }
    /// A reception failed.
    ///
    /// With `allow_drop`, the notification may be discarded, which is reported by returning
    /// `false`.
    pub fn notify_receive_failed(&self, error: ReceiveError, id: u32, allow_drop: bool) -> bool {
        let notification = Notification::ReceiveFailed { error, id };
        if allow_drop {
            let pushed = self.push(PoolId::Secondary, notification);
            if !pushed {
                trace!("Dropped receive failure {:?}.", error);
            }
            pushed
        } else {
            self.push_required(notification)
        }
    }
    pub fn notify_transmitted(
        &self,
        frame: FrameBuffer,
        ack: Option<FrameBuffer>,
        power: i8,
        lqi: u8,
    ) -> bool {
        self.push_required(Notification::Transmitted {
            frame,
            ack,
            power,
            lqi,
        })
    }
    pub fn notify_transmit_failed(&self, frame: FrameBuffer, error: TransmitError) -> bool {
        self.push_required(Notification::TransmitFailed { frame, error })
    }
    pub fn notify_energy_detected(&self, result: i8) -> bool {
        self.push_required(Notification::EnergyDetected { result })
    }
    pub fn notify_energy_detection_failed(&self, error: EnergyDetectionError) -> bool {
        self.push_required(Notification::EnergyDetectionFailed { error })
    }
    pub fn notify_cca(&self, channel_free: bool) -> bool {
        self.push_required(Notification::CcaDone { channel_free })
    }
    pub fn notify_cca_failed(&self, error: CcaError) -> bool {
        self.push_required(Notification::CcaFailed { error })
    }

    /// Deliver all queued notifications to `handler`, oldest first.
    ///
    /// Returns the number of notifications delivered. Must only be called from one context.
    pub fn process<H: NotificationHandler>(&self, handler: &mut H) -> usize {
        let mut delivered = 0;
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            if tail == self.head.lock(Cell::get) {
                break;
            }
            // SAFETY: The entry is between tail and head, so it was written completely and
            // won't be touched by producers until the tail moves on.
            let entry = unsafe { *self.entries[tail].get() };
            let slot = self.slot(entry.pool, entry.index as usize);
            // SAFETY: Queued slots are initialized and only read once, here.
            let notification = unsafe { (*slot.payload.get()).assume_init_read() };
            match notification {
                Notification::Received { frame, power, lqi } => {
                    handler.received(frame, power, lqi)
                }
                Notification::ReceiveFailed { error, id } => handler.receive_failed(error, id),
                Notification::Transmitted {
                    frame,
                    ack,
                    power,
                    lqi,
                } => handler.transmitted(frame, ack, power, lqi),
                Notification::TransmitFailed { frame, error } => {
                    handler.transmit_failed(frame, error)
                }
                Notification::EnergyDetected { result } => handler.energy_detected(result),
                Notification::EnergyDetectionFailed { error } => {
                    handler.energy_detection_failed(error)
                }
                Notification::CcaDone { channel_free } => handler.cca_done(channel_free),
                Notification::CcaFailed { error } => handler.cca_failed(error),
            }
            // The queue entry goes first, so the queue never holds more entries than slots.
            self.tail.store((tail + 1) % QUEUE_SIZE, Ordering::Release);
            slot.taken.store(false, Ordering::Release);
            delivered += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_atomic::AtomicU32;

    #[derive(Default)]
    struct CountingSwi(AtomicU32);
    impl SoftwareInterrupt for CountingSwi {
        fn pend(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[derive(Default)]
    struct Log(std::vec::Vec<u32>);
    impl NotificationHandler for Log {
        fn received(&mut self, _frame: FrameBuffer, _power: i8, _lqi: u8) {
            self.0.push(100);
        }
        fn receive_failed(&mut self, _error: ReceiveError, id: u32) {
            self.0.push(id);
        }
        fn transmitted(
            &mut self,
            _frame: FrameBuffer,
            _ack: Option<FrameBuffer>,
            _power: i8,
            _lqi: u8,
        ) {
            self.0.push(200);
        }
        fn transmit_failed(&mut self, _frame: FrameBuffer, _error: TransmitError) {
            self.0.push(300);
        }
        fn energy_detected(&mut self, _result: i8) {
            self.0.push(400);
        }
        fn energy_detection_failed(&mut self, _error: EnergyDetectionError) {
            self.0.push(500);
        }
        fn cca_done(&mut self, channel_free: bool) {
            self.0.push(600 + channel_free as u32);
        }
        fn cca_failed(&mut self, _error: CcaError) {
            self.0.push(700);
        }
    }

    #[test]
    fn delivers_in_push_order() {
        let pipeline = NotificationPipeline::new(CountingSwi::default());
        pipeline.notify_cca(true);
        pipeline.notify_receive_failed(ReceiveError::InvalidChecksum, 7, true);
        pipeline.notify_energy_detected(-80);
        assert_eq!(pipeline.pending(), 3);
        assert_eq!(pipeline.swi().0.load(Ordering::Relaxed), 3);

        let mut log = Log::default();
        assert_eq!(pipeline.process(&mut log), 3);
        assert_eq!(log.0, [601, 7, 400]);
        assert_eq!(pipeline.pending(), 0);
        assert_eq!(pipeline.free_slots(PoolId::Primary), PRIMARY_POOL_SIZE);
        assert_eq!(pipeline.free_slots(PoolId::Secondary), SECONDARY_POOL_SIZE);
    }

    #[test]
    fn queue_wraps_around() {
        let pipeline = NotificationPipeline::new(CountingSwi::default());
        let mut log = Log::default();
        for round in 0..3 * QUEUE_SIZE as u32 {
            pipeline.notify_receive_failed(ReceiveError::Overlapped, round, false);
            if round % 3 == 2 {
                pipeline.process(&mut log);
            }
        }
        pipeline.process(&mut log);
        let expected: std::vec::Vec<u32> = (0..3 * QUEUE_SIZE as u32).collect();
        assert_eq!(log.0, expected);
    }

    #[test]
    fn secondary_exhaustion_is_absorbed() {
        let pipeline = NotificationPipeline::new(CountingSwi::default());
        for id in 0..SECONDARY_POOL_SIZE as u32 {
            assert!(pipeline.notify_receive_failed(ReceiveError::InvalidFrame, id, true));
        }
        assert!(!pipeline.notify_receive_failed(ReceiveError::InvalidFrame, 99, true));
        assert_eq!(pipeline.pending(), SECONDARY_POOL_SIZE);
        assert_eq!(pipeline.free_slots(PoolId::Primary), PRIMARY_POOL_SIZE);

        let mut log = Log::default();
        pipeline.process(&mut log);
        assert_eq!(log.0, [0, 1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "No notification slot left.")]
    fn primary_exhaustion_is_fatal() {
        let pipeline = NotificationPipeline::new(CountingSwi::default());
        for _ in 0..=PRIMARY_POOL_SIZE {
            pipeline.notify_cca(false);
        }
    }
}
