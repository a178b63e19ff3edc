//! Static parameter/user-info tables for each scannable device kind.
//!
//! Object ids and formats are grounded on the per-kind tables published by
//! `xtender.py`, `variopower.py`, and `bsp.py`; `rcc` has no surviving
//! source file in the retained reference material, so only the user-info
//! objects needed for discovery and version reporting are populated for it.

use crate::device::{DeviceKind, ParamInfo, ParamInfoTable};
use crate::property::Format;

/// Object id probed during bus discovery to decide whether a kind is
/// present at a given address, and the address range scanned for it.
pub struct ProbeSpec {
    pub kind: DeviceKind,
    pub probe_object_id: u32,
    pub address_range: std::ops::RangeInclusive<u32>,
}

pub const PROBE_SPECS: &[ProbeSpec] = &[
    ProbeSpec { kind: DeviceKind::Xtender, probe_object_id: 3000, address_range: 101..=110 },
    ProbeSpec { kind: DeviceKind::VarioPower, probe_object_id: 15000, address_range: 701..=705 },
    ProbeSpec { kind: DeviceKind::Rcc, probe_object_id: 5000, address_range: 501..=501 },
    ProbeSpec { kind: DeviceKind::Bsp, probe_object_id: 7002, address_range: 601..=615 },
];

pub fn probe_spec(kind: DeviceKind) -> &'static ProbeSpec {
    PROBE_SPECS.iter().find(|s| s.kind == kind).expect("every DeviceKind has a ProbeSpec")
}

pub fn param_table(kind: DeviceKind) -> ParamInfoTable {
    match kind {
        DeviceKind::Xtender => xtender::PARAMS,
        DeviceKind::VarioPower => vario_power::PARAMS,
        DeviceKind::Rcc => rcc::PARAMS,
        DeviceKind::Bsp => bsp::PARAMS,
    }
}

pub fn user_info_table(kind: DeviceKind) -> ParamInfoTable {
    match kind {
        DeviceKind::Xtender => xtender::USER_INFO,
        DeviceKind::VarioPower => vario_power::USER_INFO,
        DeviceKind::Rcc => rcc::USER_INFO,
        DeviceKind::Bsp => bsp::USER_INFO,
    }
}

/// Xtender inverter-charger. Object ids from `xtender.py`'s
/// `paramInfoTable`/`userInfoTable`.
pub mod xtender {
    use super::*;

    pub const PARAMS: ParamInfoTable = &[
        ParamInfo { name: "power_on_xtender", object_id: 1576, format: Format::Bool },
        ParamInfo { name: "power_on_all_xtenders", object_id: 1415, format: Format::Signal },
        ParamInfo { name: "reset_all_inverters", object_id: 1468, format: Format::Signal },
        ParamInfo { name: "maximum_current_of_ac_source", object_id: 1107, format: Format::Float },
        ParamInfo { name: "floating_voltage", object_id: 1140, format: Format::Float },
    ];

    pub const USER_INFO: ParamInfoTable = &[
        ParamInfo { name: "battery_voltage", object_id: 3000, format: Format::Float },
        ParamInfo { name: "battery_charge_current", object_id: 3005, format: Format::Float },
        ParamInfo { name: "state_of_charge", object_id: 3007, format: Format::Float },
        ParamInfo { name: "soft_version_msb", object_id: 3130, format: Format::Float },
        ParamInfo { name: "soft_version_lsb", object_id: 3131, format: Format::Float },
    ];
}

/// VarioTrack/VarioString MPPT solar charge controller family, marketed as
/// "vario_power" here since the original splits it by wiring variant while
/// sharing one object map. Object ids from `variopower.py`.
pub mod vario_power {
    use super::*;

    pub const PARAMS: ParamInfoTable = &[
        ParamInfo { name: "battery_maximum_voltage", object_id: 14002, format: Format::Float },
        ParamInfo { name: "battery_minimum_voltage", object_id: 14003, format: Format::Float },
        ParamInfo { name: "grid_maximum_current", object_id: 14065, format: Format::Float },
    ];

    pub const USER_INFO: ParamInfoTable = &[
        ParamInfo { name: "battery_voltage", object_id: 15000, format: Format::Float },
        ParamInfo { name: "operating_mode", object_id: 15013, format: Format::Enum },
        ParamInfo { name: "soft_version_msb", object_id: 15077, format: Format::Float },
        ParamInfo { name: "soft_version_lsb", object_id: 15078, format: Format::Float },
    ];
}

/// Remote control/console unit. No parameter or user-info source file
/// survives in the reference material beyond its probe object id, so only
/// the objects needed to confirm presence are listed.
pub mod rcc {
    use super::*;

    pub const PARAMS: ParamInfoTable = &[];

    pub const USER_INFO: ParamInfoTable = &[ParamInfo { name: "firmware_version", object_id: 5000, format: Format::Int32 }];
}

/// Battery status processor. Object ids from `bsp.py`.
pub mod bsp {
    use super::*;

    pub const PARAMS: ParamInfoTable = &[
        ParamInfo { name: "voltage_of_the_system", object_id: 6057, format: Format::Enum },
        ParamInfo { name: "nominal_capacity", object_id: 6001, format: Format::Float },
    ];

    pub const USER_INFO: ParamInfoTable = &[
        ParamInfo { name: "battery_voltage", object_id: 7000, format: Format::Float },
        ParamInfo { name: "state_of_charge", object_id: 7002, format: Format::Float },
        ParamInfo { name: "soft_version_msb", object_id: 7037, format: Format::Float },
        ParamInfo { name: "soft_version_lsb", object_id: 7038, format: Format::Float },
    ];
}

/// Maps an enum value from `bsp.py`'s `systemVoltageToStringTable`. The
/// value is a bitmask, not a sequential index (`2 = 12V`, `4 = 24V`,
/// `8 = 48V`), matching the device's own encoding.
pub fn bsp_system_voltage_to_string(value: u16) -> Option<&'static str> {
    match value {
        0 => Some("Invalid"),
        1 => Some("Automatic"),
        2 => Some("12V"),
        4 => Some("24V"),
        8 => Some("48V"),
        _ => None,
    }
}

/// Maps an enum value from `xtender.py`'s `opModeToStringTable`.
pub fn xtender_op_mode_to_string(value: u16) -> Option<&'static str> {
    match value {
        0 => Some("Invalid"),
        1 => Some("Inverter"),
        2 => Some("Charger"),
        3 => Some("Boost"),
        4 => Some("Injection"),
        _ => None,
    }
}

/// Maps an enum value from `variopower.py`'s `opModeToStringTable` (distinct
/// numbering from the Xtender table above).
pub fn vario_power_op_mode_to_string(value: u16) -> Option<&'static str> {
    match value {
        0 => Some("night"),
        1 => Some("security"),
        2 => Some("off"),
        3 => Some("charge"),
        4 => Some("lim_u_bat"),
        5 => Some("lim_i_bat"),
        6 => Some("lim_p"),
        7 => Some("lim_i_pv"),
        8 => Some("lim_t"),
        9 => Some("---"),
        10 => Some("lim_i_bsp"),
        11 => Some("lim_u_pv"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_probe_spec() {
        for kind in [DeviceKind::Xtender, DeviceKind::VarioPower, DeviceKind::Rcc, DeviceKind::Bsp] {
            assert_eq!(probe_spec(kind).kind, kind);
        }
    }

    #[test]
    fn xtender_battery_voltage_is_float_at_documented_object_id() {
        let entry = xtender::USER_INFO.iter().find(|p| p.name == "battery_voltage").unwrap();
        assert_eq!(entry.object_id, 3000);
        assert_eq!(entry.format, Format::Float);
    }

    #[test]
    fn xtender_op_mode_matches_documented_table() {
        assert_eq!(xtender_op_mode_to_string(0), Some("Invalid"));
        assert_eq!(xtender_op_mode_to_string(2), Some("Charger"));
        assert_eq!(xtender_op_mode_to_string(4), Some("Injection"));
        assert_eq!(xtender_op_mode_to_string(5), None);
    }

    #[test]
    fn bsp_system_voltage_is_a_bitmask_not_a_sequential_enum() {
        assert_eq!(bsp_system_voltage_to_string(0), Some("Invalid"));
        assert_eq!(bsp_system_voltage_to_string(1), Some("Automatic"));
        assert_eq!(bsp_system_voltage_to_string(2), Some("12V"));
        assert_eq!(bsp_system_voltage_to_string(4), Some("24V"));
        assert_eq!(bsp_system_voltage_to_string(8), Some("48V"));
        assert_eq!(bsp_system_voltage_to_string(3), None);
    }

    #[test]
    fn op_mode_tables_diverge_between_xtender_and_vario_power() {
        assert_eq!(xtender_op_mode_to_string(2), Some("Charger"));
        assert_eq!(vario_power_op_mode_to_string(2), Some("off"));
    }
}
