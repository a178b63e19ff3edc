//! Host-side driver library for Studer-family SCOM power-conversion devices
//! (inverter-chargers, MPPT controllers, battery monitors) connected over a
//! serial bus speaking the SCOM binary request/response protocol.

/// Wire-frame codec: encode/decode SCOM frames on a byte buffer.
pub mod frame;

/// Property read/write request building and response value extraction.
pub mod property;

/// Serial transport owning one port, serialising exchanges.
pub mod transport;

/// Device model: parameter/user-info tables, typed accessors, shadow store.
pub mod device;

/// Concrete device kinds (xtender, vario_power, bsp, rcc) as data tables.
pub mod devices;

/// Per-device "last-written-value" cache for non-persisted writes.
pub mod shadow;

/// Process-wide discovery loop, subscriber fan-out, health monitor.
pub mod manager;

/// Configuration loading for [`manager::DeviceManager`].
pub mod config;

#[macro_use]
extern crate derive_more;

use std::error::Error;

pub use device::Device;
pub use frame::Frame;
pub use manager::DeviceManager;

/// Failure to open the underlying serial port.
#[derive(Debug, Display)]
#[display(fmt = "failed to open transport {}: {}", port, source)]
pub struct TransportOpenError {
    pub port: String,
    pub source: std::io::Error,
}

impl Error for TransportOpenError {}

/// The transport's exchange mutex could not be acquired within its timeout.
#[derive(Debug, Display)]
#[display(fmt = "transport busy: lock not acquired within {:?}", timeout)]
pub struct TransportBusy {
    pub timeout: std::time::Duration,
}

impl Error for TransportBusy {}

/// A SCOM frame failed checksum or length validation on the wire.
#[derive(Debug, Display)]
pub enum FrameInvalid {
    /// `data_length` would make the frame shorter than the fixed header+trailer.
    #[display(fmt = "data_length {} too small", data_length)]
    DataLengthTooSmall { data_length: u16 },

    /// Header checksum did not match.
    #[display(
        fmt = "header checksum mismatch: expected {:02x?}, actual {:02x?}",
        expected,
        actual
    )]
    HeaderChecksumMismatch { expected: [u8; 2], actual: [u8; 2] },

    /// Data checksum did not match.
    #[display(
        fmt = "data checksum mismatch: expected {:02x?}, actual {:02x?}",
        expected,
        actual
    )]
    DataChecksumMismatch { expected: [u8; 2], actual: [u8; 2] },
}

impl Error for FrameInvalid {}

/// Error reading a parameter or user-info object from a device.
#[derive(Debug, Display)]
pub enum ReadError {
    /// The request frame itself could not be built.
    InvalidRequest(FrameInvalid),

    /// No response arrived before the transport's RX timeout.
    Timeout,

    /// The response's data-error flag was set.
    DeviceError,

    /// `short_enum` was decoded with a length the protocol never documents.
    #[display(fmt = "unsupported short_enum length {}", len)]
    UnsupportedShortEnumLength { len: usize },

    /// Underlying transport failure.
    Transport(TransportBusy),
}

impl Error for ReadError {}

impl From<FrameInvalid> for ReadError {
    fn from(value: FrameInvalid) -> Self {
        Self::InvalidRequest(value)
    }
}

impl From<TransportBusy> for ReadError {
    fn from(value: TransportBusy) -> Self {
        Self::Transport(value)
    }
}

/// Error writing a parameter to a device.
#[derive(Debug, Display)]
pub enum WriteError {
    /// The request frame itself could not be built, e.g. value/format mismatch.
    InvalidRequest(FrameInvalid),

    /// No response arrived before the transport's RX timeout.
    Timeout,

    /// The response's data-error flag was set.
    DeviceError,

    /// Underlying transport failure.
    Transport(TransportBusy),

    /// Caller-supplied value bytes did not match the size the format requires.
    ValueSizeMismatch(ValueSizeMismatch),
}

impl Error for WriteError {}

impl From<FrameInvalid> for WriteError {
    fn from(value: FrameInvalid) -> Self {
        Self::InvalidRequest(value)
    }
}

impl From<TransportBusy> for WriteError {
    fn from(value: TransportBusy) -> Self {
        Self::Transport(value)
    }
}

impl From<ValueSizeMismatch> for WriteError {
    fn from(value: ValueSizeMismatch) -> Self {
        Self::ValueSizeMismatch(value)
    }
}

/// A value's encoded length did not match the declared format's byte count.
#[derive(Debug, Display)]
#[display(fmt = "value size mismatch: format {} expects {} bytes, got {}", format, expected, actual)]
pub struct ValueSizeMismatch {
    pub format: &'static str,
    pub expected: usize,
    pub actual: usize,
}

impl Error for ValueSizeMismatch {}

/// A caller-supplied buffer could not hold the requested frame.
#[derive(Debug, Display)]
#[display(fmt = "buffer too small: need {}, have {}", needed, actual)]
pub struct BufferTooSmall {
    pub needed: usize,
    pub actual: usize,
}

impl Error for BufferTooSmall {}
