//! Populates a frame's data section as a "read object" / "write object"
//! request, and reads back the value from a response.
//!
//! The data section layout (after the 14-byte header) is fixed:
//!
//! ```text
//! offset 0   size 1   service flags (request side: always 0)
//! offset 1   size 1   reserved
//! offset 2   size 2   object_type
//! offset 4   size 4   object_id
//! offset 8   size 2   property_id
//! offset 10  size var value (write only)
//! ```

use crate::frame::Frame;
use crate::ValueSizeMismatch;

/// Object types recognised by the protocol.
pub mod object_type {
    pub const READ_USER_INFO: u16 = 1;
    pub const PARAMETER: u16 = 2;
    pub const MESSAGE: u16 = 3;
    pub const CUSTOM_DATALOG: u16 = 5;
    pub const DATALOG_TX: u16 = 0x0101;
}

/// Property ids recognised by the protocol.
pub mod property_id {
    pub const READ: u16 = 0x01;
    pub const VALUE_QSP: u16 = 0x05;
    pub const MIN_QSP: u16 = 0x06;
    pub const MAX_QSP: u16 = 0x07;
    pub const LEVEL_QSP: u16 = 0x08;
    pub const UNSAVED_VALUE_QSP: u16 = 0x0D;
    /// Synthetic: only meaningful to the shadow store, never sent on the wire.
    pub const LAST: u16 = 0xEE;
}

/// Value encoding used by a parameter or user-info object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// IEEE-754 binary32, little-endian. 4 bytes.
    Float,
    /// Unsigned 32-bit, little-endian. 4 bytes.
    Int32,
    /// Conceptually a "do it now" edge trigger, written as a 4-byte integer.
    /// Any non-zero value is accepted and treated as "fire".
    Signal,
    /// Unsigned 16-bit, little-endian. 2 bytes.
    Enum,
    /// Carries either a 1-byte or a 4-byte value depending on device family;
    /// see [`crate::device::Device::decode`] for the guarded decode path.
    ShortEnum,
    /// Unsigned 8-bit. 1 byte.
    Byte,
    /// Unsigned 8-bit, 0 or 1. 1 byte.
    Bool,
}

impl Format {
    /// Byte size on the wire for this format.
    pub fn size(self) -> usize {
        match self {
            Format::Float | Format::Int32 | Format::Signal => 4,
            Format::Enum => 2,
            Format::ShortEnum => 4,
            Format::Byte | Format::Bool => 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Format::Float => "float",
            Format::Int32 => "int32",
            Format::Signal => "signal",
            Format::Enum => "enum",
            Format::ShortEnum => "short_enum",
            Format::Byte => "byte",
            Format::Bool => "bool",
        }
    }
}

const REQUEST_HEADER_LEN: u16 = 10;

/// Fills `frame`'s data section as a 10-byte read request and recomputes the
/// data checksum.
pub fn set_object_read(frame: &mut Frame, object_type: u16, object_id: u32, property_id: u16) {
    frame.resize_data(REQUEST_HEADER_LEN);
    write_request_header(frame, object_type, object_id, property_id);
    frame.finalize_data_checksum();
}

/// Fills `frame`'s data section as a write request carrying `value_bytes`,
/// and recomputes the data checksum. Fails with [`ValueSizeMismatch`] if
/// `value_bytes.len()` does not match `format`'s declared size.
pub fn set_object_write(
    frame: &mut Frame,
    object_type: u16,
    object_id: u32,
    property_id: u16,
    value_bytes: &[u8],
    format: Format,
) -> Result<(), ValueSizeMismatch> {
    if value_bytes.len() != format.size() {
        return Err(ValueSizeMismatch {
            format: format.name(),
            expected: format.size(),
            actual: value_bytes.len(),
        });
    }

    let data_length = REQUEST_HEADER_LEN + value_bytes.len() as u16;
    frame.resize_data(data_length);
    write_request_header(frame, object_type, object_id, property_id);
    frame.data_section_mut()[10..].copy_from_slice(value_bytes);
    frame.finalize_data_checksum();
    Ok(())
}

fn write_request_header(frame: &mut Frame, object_type: u16, object_id: u32, property_id: u16) {
    let data = frame.data_section_mut();
    data[0] = 0; // service flags: unused on the request side
    data[1] = 0; // reserved
    data[2..4].copy_from_slice(&object_type.to_le_bytes());
    data[4..8].copy_from_slice(&object_id.to_le_bytes());
    data[8..10].copy_from_slice(&property_id.to_le_bytes());
}

/// Returns the value bytes carried by a response frame's data section.
pub fn extract_value(response_frame: &Frame) -> Result<&[u8], crate::FrameInvalid> {
    let value_size = response_frame.response_value_size()?;
    let data = response_frame.data_section();
    Ok(&data[10..10 + value_size as usize])
}
