//! Parameter/user-info tables and typed read/write accessors shared by every
//! device kind.
//!
//! A [`Device`] pairs a [`DeviceKind`] and bus address with the two static
//! tables that describe what object ids exist on it (see
//! [`crate::devices`]), a [`ShadowStore`] for values that cannot be read
//! back, and the [`SerialTransport`] it shares with every other device on
//! the same bus.

use std::sync::Arc;
use std::time::Duration;

use crate::property::{self, object_type, property_id, Format};
use crate::shadow::ShadowStore;
use crate::transport::SerialTransport;
use crate::{Frame, ReadError, WriteError};

/// Default time to wait for a response before giving up on an exchange.
/// `variopower.py`'s `search_devices` uses the same 0.5 s figure for probes.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Address the host itself presents on the bus.
pub const HOST_SRC_ADDR: u32 = 1;

/// Which family of device this is. Drives which static tables apply and
/// which object id is probed during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Xtender,
    VarioPower,
    Rcc,
    Bsp,
}

impl DeviceKind {
    /// Canonical (underscore) spelling, e.g. for config files and logs.
    pub fn canonical_name(self) -> &'static str {
        match self {
            DeviceKind::Xtender => "xtender",
            DeviceKind::VarioPower => "vario_power",
            DeviceKind::Rcc => "rcc",
            DeviceKind::Bsp => "bsp",
        }
    }

    /// Parses a kind name, accepting both the canonical underscore spelling
    /// and the hyphenated spelling some external configs still use
    /// (kept for back-compat).
    pub fn parse(name: &str) -> Option<DeviceKind> {
        match name {
            "xtender" => Some(DeviceKind::Xtender),
            "vario_power" | "vario-power" => Some(DeviceKind::VarioPower),
            "rcc" => Some(DeviceKind::Rcc),
            "bsp" => Some(DeviceKind::Bsp),
            _ => None,
        }
    }
}

/// A single addressable parameter or user-info object.
#[derive(Debug, Clone, Copy)]
pub struct ParamInfo {
    pub name: &'static str,
    pub object_id: u32,
    pub format: Format,
}

/// A static, name-indexed table of [`ParamInfo`] entries.
pub type ParamInfoTable = &'static [ParamInfo];

fn lookup<'a>(table: ParamInfoTable, name: &str) -> Option<&'a ParamInfo> {
    table.iter().find(|p| p.name == name)
}

/// One device on the bus: a kind, a bus address, and the tables/transport/
/// shadow store it needs to serve typed reads and writes.
pub struct Device {
    kind: DeviceKind,
    bus_address: u32,
    params: ParamInfoTable,
    user_info: ParamInfoTable,
    transport: Arc<SerialTransport>,
    shadow: ShadowStore,
}

impl Device {
    pub fn new(
        kind: DeviceKind,
        bus_address: u32,
        params: ParamInfoTable,
        user_info: ParamInfoTable,
        transport: Arc<SerialTransport>,
    ) -> Self {
        Device {
            kind,
            bus_address,
            params,
            user_info,
            transport,
            shadow: ShadowStore::new(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn bus_address(&self) -> u32 {
        self.bus_address
    }

    fn exchange(&self, frame: &Frame) -> Result<Frame, ReadError> {
        match self.transport.write_frame(frame, DEFAULT_RESPONSE_TIMEOUT)? {
            Some(response) => {
                if response.is_data_error_flag_set() {
                    return Err(ReadError::DeviceError);
                }
                Ok(response)
            }
            None => Err(ReadError::Timeout),
        }
    }

    /// Reads a parameter (object type `PARAMETER`) by name with the given
    /// property id.
    ///
    /// [`property_id::LAST`] and [`property_id::UNSAVED_VALUE_QSP`] are
    /// never sent on the wire: both are served from the shadow store first,
    /// falling back to a live [`property_id::VALUE_QSP`] read (without
    /// caching the fallback) only on a shadow miss. Every other property id
    /// — [`property_id::VALUE_QSP`], `MIN_QSP`, `MAX_QSP`, `LEVEL_QSP` —
    /// always goes straight to the bus.
    pub fn read_parameter(&self, name: &str, property: u16) -> Result<Vec<u8>, ReadError> {
        let info = lookup(self.params, name).ok_or(ReadError::DeviceError)?;
        if property == property_id::LAST || property == property_id::UNSAVED_VALUE_QSP {
            if let Some(cached) = self.shadow.get(name) {
                return Ok(cached);
            }
            return self.read_object(object_type::PARAMETER, info.object_id, property_id::VALUE_QSP);
        }
        self.read_object(object_type::PARAMETER, info.object_id, property)
    }

    /// Writes a parameter by name. `property` is typically
    /// [`property_id::UNSAVED_VALUE_QSP`] (RAM only, shadowed locally since
    /// it cannot be read back) or [`property_id::VALUE_QSP`] (persisted).
    pub fn write_parameter(&self, name: &str, value: &[u8], property: u16) -> Result<(), WriteError> {
        let info = lookup(self.params, name).ok_or(WriteError::DeviceError)?;
        let mut frame = Frame::init_request(64, HOST_SRC_ADDR, self.bus_address, 0)
            .map_err(|_| WriteError::DeviceError)?;
        property::set_object_write(
            &mut frame,
            object_type::PARAMETER,
            info.object_id,
            property,
            value,
            info.format,
        )?;

        let response = self.exchange(&frame).map_err(|e| match e {
            ReadError::Timeout => WriteError::Timeout,
            ReadError::DeviceError => WriteError::DeviceError,
            ReadError::InvalidRequest(e) => WriteError::InvalidRequest(e),
            ReadError::Transport(e) => WriteError::Transport(e),
            ReadError::UnsupportedShortEnumLength { .. } => WriteError::DeviceError,
        })?;
        let _ = response;

        if property == property_id::UNSAVED_VALUE_QSP {
            self.shadow.save(name, value.to_vec());
        }
        Ok(())
    }

    /// Reads a user-info (read-only telemetry) object by name.
    pub fn read_user_info(&self, name: &str) -> Result<Vec<u8>, ReadError> {
        let info = lookup(self.user_info, name).ok_or(ReadError::DeviceError)?;
        self.read_object(object_type::READ_USER_INFO, info.object_id, property_id::READ)
    }

    /// Reads a value the caller believes was last set through
    /// [`Self::write_parameter`] with `UNSAVED_VALUE_QSP`, served from the
    /// shadow store with a `VALUE_QSP` fallback on miss. Mirrors
    /// `ParamProxyContainer.read`'s "don't cache the fallback" behaviour.
    /// Equivalent to `read_parameter(name, property_id::LAST)`.
    pub fn read_shadowed_parameter(&self, name: &str) -> Result<Vec<u8>, ReadError> {
        self.read_parameter(name, property_id::LAST)
    }

    /// Table-driven read: looks up `name`'s format and decodes the raw
    /// bytes [`Self::read_parameter`] returns into a [`DecodedValue`].
    pub fn read_param_by_name(&self, name: &str, property: u16) -> Result<DecodedValue, ReadError> {
        let info = lookup(self.params, name).ok_or(ReadError::DeviceError)?;
        let bytes = self.read_parameter(name, property)?;
        Self::decode(&bytes, info.format)
    }

    /// Table-driven write: encodes `value` per `name`'s declared format and
    /// writes it, defaulting to [`property_id::UNSAVED_VALUE_QSP`] (RAM
    /// only, shadowed locally).
    pub fn write_param_by_name(&self, name: &str, value: &[u8], property: u16) -> Result<(), WriteError> {
        self.write_parameter(name, value, property)
    }

    /// Reads a raw object by numeric id, bypassing the name tables. Used by
    /// discovery to probe for presence before a [`Device`] is even known to
    /// be worth constructing in full.
    pub(crate) fn read_object(&self, object_type: u16, object_id: u32, property: u16) -> Result<Vec<u8>, ReadError> {
        let mut frame = Frame::init_request(64, HOST_SRC_ADDR, self.bus_address, 0)
            .map_err(|_| ReadError::DeviceError)?;
        property::set_object_read(&mut frame, object_type, object_id, property);
        let response = self.exchange(&frame)?;
        Ok(property::extract_value(&response)?.to_vec())
    }

    /// Decodes `bytes` per `format`, the single place every typed accessor
    /// routes through.
    ///
    /// `short_enum` values are read back from the bus as a fixed 4-byte
    /// field (matching every other non-`byte`/`bool` format); this decodes
    /// the enum discriminant from the low 2 bytes of that field and treats
    /// the upper 2 bytes as padding. Any other length is rejected rather
    /// than silently truncated or zero-extended.
    pub fn decode(bytes: &[u8], format: Format) -> Result<DecodedValue, ReadError> {
        match format {
            Format::Float => Ok(DecodedValue::Float(f32::from_le_bytes(
                bytes.try_into().map_err(|_| ReadError::UnsupportedShortEnumLength { len: bytes.len() })?,
            ))),
            Format::Int32 | Format::Signal => Ok(DecodedValue::Int32(u32::from_le_bytes(
                bytes.try_into().map_err(|_| ReadError::UnsupportedShortEnumLength { len: bytes.len() })?,
            ))),
            Format::Enum => Ok(DecodedValue::Enum(u16::from_le_bytes(
                bytes.try_into().map_err(|_| ReadError::UnsupportedShortEnumLength { len: bytes.len() })?,
            ))),
            Format::ShortEnum => {
                if bytes.len() != 4 {
                    return Err(ReadError::UnsupportedShortEnumLength { len: bytes.len() });
                }
                Ok(DecodedValue::Enum(u16::from_le_bytes([bytes[0], bytes[1]])))
            }
            Format::Byte => Ok(DecodedValue::Byte(*bytes.first().ok_or(ReadError::UnsupportedShortEnumLength { len: 0 })?)),
            Format::Bool => Ok(DecodedValue::Bool(*bytes.first().ok_or(ReadError::UnsupportedShortEnumLength { len: 0 })? != 0)),
        }
    }

    /// Reads `soft_version_msb`/`soft_version_lsb` user-info objects and
    /// decodes `{major, minor, patch}` the same way across every device
    /// family: both objects are wired as `float`, read back and truncated
    /// to an integer, then `major = msb >> 8`, `minor = lsb >> 8`, `patch =
    /// lsb & 0xFF`. Returns `(0, 0, 0)` if either read fails.
    pub fn software_version(&self) -> (u8, u8, u8) {
        let read_int = |name: &str| -> Option<u32> {
            let bytes = self.read_user_info(name).ok()?;
            let raw: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
            Some(f32::from_le_bytes(raw) as u32)
        };
        match (read_int("soft_version_msb"), read_int("soft_version_lsb")) {
            (Some(msb), Some(lsb)) => (
                (msb >> 8) as u8,
                (lsb >> 8) as u8,
                (lsb & 0xFF) as u8,
            ),
            _ => (0, 0, 0),
        }
    }
}

/// A parameter/user-info value decoded per its declared [`Format`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodedValue {
    Float(f32),
    Int32(u32),
    Enum(u16),
    Byte(u8),
    Bool(bool),
}
