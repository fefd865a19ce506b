//! Error types.

/// Errors returned by the configuration interface of the transceiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrxError {
    /// Only channels 11 to 26 exist in the 2.4 GHz band.
    InvalidChannel,
}

pub type TrxResult<T> = Result<T, TrxError>;

/// Why a reception failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveError {
    InvalidFrame,
    InvalidLength,
    InvalidChecksum,
    DelayedTimeout,
    Overlapped,
    Aborted,
    TimeslotEnded,
}

/// Why a transmission failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    BusyChannel,
    InvalidAck,
    NoMemory,
    NoAck,
    Aborted,
    TimeslotEnded,
    TimeslotDenied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnergyDetectionError {
    Aborted,
    TimeslotEnded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcaError {
    Aborted,
    TimeslotEnded,
}
