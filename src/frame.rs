//! Frame buffers and per-operation parameters.
use bitfield_struct::bitfield;

/// The maximum length of a PSDU.
pub const MAX_PSDU_SIZE: usize = 127;
/// The length of the PHY header, which only carries the PSDU length.
pub const PHR_SIZE: usize = 1;
/// The size of a buffer, which can hold any frame including its PHR.
pub const FRAME_BUFFER_SIZE: usize = PHR_SIZE + MAX_PSDU_SIZE;

/// A buffer holding one frame, PHR first.
///
/// Ownership is handed to the transceiver for the duration of an operation, since the radio's DMA
/// reads or writes it autonomously. It is returned through the completion callout of the
/// operation, or by [abort](crate::Transceiver::abort) and
/// [disable](crate::Transceiver::disable).
pub type FrameBuffer = &'static mut [u8; FRAME_BUFFER_SIZE];

/// The PSDU length carried in the PHR of `frame`.
pub fn psdu_length(frame: &[u8; FRAME_BUFFER_SIZE]) -> usize {
    (frame[0] as usize & 0x7f).min(MAX_PSDU_SIZE)
}

/// How the ramp-up of the radio is triggered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RampUpTrigger {
    /// The transceiver triggers the ramp-up itself, right after arming.
    #[default]
    Software,
    /// The ramp-up is armed, but only starts once another protocol raises the event on the
    /// published ramp-up channel.
    Hardware,
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
/// Optional callouts requested for an operation.
pub struct Notifications {
    /// Report the start of a frame (SHR received or sent).
    pub frame_started: bool,
    /// Report an idle channel before a transmission with CCA.
    pub cca_idle: bool,
    #[bits(6)]
    __: u8,
}
impl Notifications {
    pub const NONE: Self = Self::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psdu_length_ignores_reserved_bit() {
        let mut frame = [0u8; FRAME_BUFFER_SIZE];
        frame[0] = 0x85;
        assert_eq!(psdu_length(&frame), 5);
        frame[0] = 0x7f;
        assert_eq!(psdu_length(&frame), MAX_PSDU_SIZE);
    }
}
