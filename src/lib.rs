//! # `ieee802154-trx`
//! This is a driver core for IEEE 802.15.4 radio peripherals. It sequences the radio, a timer, the
//! peripheral interconnect and an optional front-end module through ramp-up, operation and
//! ramp-down, and delivers the results to the layer above.
//! ## Hardware overview
//! The radio is half-duplex and has to be ramped up for every reception or transmission. Most of
//! the timing critical work is done in hardware:
//! - Shorts inside the radio connect its own events to its own tasks, so that for example the end
//!   of a transmission disables the radio.
//! - The interconnect fabric connects events of one peripheral to tasks of another. A timer
//!   compare can ramp up the radio, or the end of a received frame can restart the timer.
//! - The front-end module activates its amplifiers on an event and is deactivated by a standing
//!   link from the radio's DISABLED event.
//!
//! All of this is accessed through the traits in [hal], which a board support layer implements.
//!
//! ### Transceiver
//! The [Transceiver] is the state machine driving the hardware. Operations like
//! [Transceiver::receive_frame] or [Transceiver::transmit_frame] configure the hardware and
//! return right away. Everything after that happens in [Transceiver::irq_handler], which is
//! called from the radio interrupt and reports through [TrxCallouts].
//!
//! ### Notifications
//! The callouts run at radio interrupt priority. Results for the application are queued in a
//! [NotificationPipeline] and delivered from a software interrupt with lower priority. For async
//! consumers, [SwiSignal] can serve as that software interrupt.
//!
//! ## Testing
//! With the `sim` feature, [sim::SimPeripherals] models all of the hardware, so that the whole
//! driver can run on a host.

#![cfg_attr(not(test), no_std)]
#![allow(unexpected_cfgs)]
pub(crate) mod fmt;

mod config;
mod error;
mod frame;
pub mod hal;
mod notify;
pub mod ppi;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod sync;
mod trx;

use core::cell::RefCell;

pub use config::*;
pub use error::*;
pub use frame::*;
pub use notify::*;
pub use sync::SwiSignal;
pub use trx::*;

use embassy_sync::blocking_mutex;

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        pub type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    } else {
        pub type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
    }
}

/// A transceiver shared between the application and the radio interrupt.
pub type SharedTransceiver<H> = blocking_mutex::Mutex<DefaultRawMutex, RefCell<Transceiver<H>>>;
