//! Instrument parameters and the `SP` data string.
//!
//! The tester exposes a fixed table of numbered parameters. Each entry has
//! a stable name, a wire id and a [`ParamKind`] describing which values it
//! accepts. Values arrive loosely typed (as strings from settings or the
//! workflow) and are validated against the table before anything is sent;
//! a [`ParameterSet`] therefore only ever holds legal codes.

use std::fmt;

use glp2_core::{Error, Result};

/// Value domain of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Integer within an inclusive range.
    Range { min: u32, max: u32 },
    /// Enumeration addressed by name (the numeric code is accepted too).
    Names(&'static [(&'static str, u32)]),
    /// Enumeration addressed by numeric code.
    Codes(&'static [u32]),
    /// Boolean: `0`, `1`, `true` or `false`.
    Flag,
}

/// One entry of the parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub name: &'static str,
    pub id: u8,
    pub kind: ParamKind,
}

impl Parameter {
    /// Look a parameter up by name (case-insensitive).
    pub fn by_name(name: &str) -> Option<&'static Parameter> {
        PARAMETERS
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Validate `value` and return the numeric code to send.
    pub fn validate(&self, value: &str) -> Result<u32> {
        let value = value.trim();
        let code = match self.kind {
            ParamKind::Range { min, max } => value
                .parse::<u32>()
                .ok()
                .filter(|v| (min..=max).contains(v)),
            ParamKind::Names(names) => names
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(value))
                .map(|&(_, code)| code)
                .or_else(|| {
                    value
                        .parse::<u32>()
                        .ok()
                        .filter(|v| names.iter().any(|&(_, code)| code == *v))
                }),
            ParamKind::Codes(codes) => value.parse::<u32>().ok().filter(|v| codes.contains(v)),
            ParamKind::Flag => parse_flag(value).map(u32::from),
        };
        code.ok_or_else(|| {
            Error::InvalidParameters(format!(
                "illegal value {value:?} for parameter {} ({})",
                self.name, self.kind
            ))
        })
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Range { min, max } => write!(f, "{min}..={max}"),
            ParamKind::Names(names) => {
                let names: Vec<&str> = names.iter().map(|(name, _)| *name).collect();
                write!(f, "one of {}", names.join(", "))
            }
            ParamKind::Codes(codes) => {
                let codes: Vec<String> = codes.iter().map(u32::to_string).collect();
                write!(f, "one of {}", codes.join(", "))
            }
            ParamKind::Flag => f.write_str("0, 1, true or false"),
        }
    }
}

/// Parse a loosely typed boolean.
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

const OFF_ON: &[(&str, u32)] = &[("off", 0), ("on", 1)];

/// The complete parameter table, ordered by wire id.
pub static PARAMETERS: [Parameter; 40] = [
    Parameter {
        name: "transmitting_mode",
        id: 1,
        kind: ParamKind::Names(&[("continuous", 0), ("single", 1), ("off", 2)]),
    },
    Parameter {
        name: "remote_control",
        id: 2,
        kind: ParamKind::Names(&[("off", 0), ("partial", 1), ("full", 2)]),
    },
    Parameter {
        name: "sample_time",
        id: 3,
        kind: ParamKind::Range { min: 250, max: 60000 },
    },
    Parameter {
        name: "actual_values",
        id: 4,
        kind: ParamKind::Names(&[("standard", 0), ("extended", 1), ("extra", 2)]),
    },
    Parameter {
        name: "language",
        id: 5,
        kind: ParamKind::Names(&[
            ("german", 0),
            ("english", 1),
            ("french", 2),
            ("spanish", 3),
            ("italian", 4),
        ]),
    },
    Parameter {
        name: "beeper",
        id: 6,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "beeper_volume",
        id: 7,
        kind: ParamKind::Range { min: 0, max: 10 },
    },
    Parameter {
        name: "display_contrast",
        id: 8,
        kind: ParamKind::Range { min: 0, max: 100 },
    },
    Parameter {
        name: "display_brightness",
        id: 9,
        kind: ParamKind::Range { min: 0, max: 100 },
    },
    Parameter {
        name: "key_click",
        id: 10,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "printer_mode",
        id: 11,
        kind: ParamKind::Names(&[("off", 0), ("fail_only", 1), ("all", 2)]),
    },
    Parameter {
        name: "printer_width",
        id: 12,
        kind: ParamKind::Codes(&[40, 80]),
    },
    Parameter {
        name: "baud_rate",
        id: 13,
        kind: ParamKind::Codes(&[9600, 19200, 38400, 57600, 115200]),
    },
    Parameter {
        name: "handshake",
        id: 14,
        kind: ParamKind::Names(&[("none", 0), ("xon_xoff", 1), ("rts_cts", 2)]),
    },
    Parameter {
        name: "line_frequency",
        id: 15,
        kind: ParamKind::Codes(&[50, 60]),
    },
    Parameter {
        name: "result_storage",
        id: 16,
        kind: ParamKind::Names(&[("off", 0), ("ring", 1), ("stop_when_full", 2)]),
    },
    Parameter {
        name: "max_stored_results",
        id: 17,
        kind: ParamKind::Range { min: 1, max: 9999 },
    },
    Parameter {
        name: "auto_delete_results",
        id: 18,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "program_select",
        id: 19,
        kind: ParamKind::Names(&[("keyboard", 0), ("remote", 1), ("barcode", 2), ("plc", 3)]),
    },
    Parameter {
        name: "start_mode",
        id: 20,
        kind: ParamKind::Names(&[
            ("key", 0),
            ("remote", 1),
            ("two_hand", 2),
            ("foot_switch", 3),
        ]),
    },
    Parameter {
        name: "stop_on_fail",
        id: 21,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "fail_acknowledge",
        id: 22,
        kind: ParamKind::Names(&[("none", 0), ("key", 1), ("remote", 2)]),
    },
    Parameter {
        name: "pass_signal_time",
        id: 23,
        kind: ParamKind::Range { min: 0, max: 10000 },
    },
    Parameter {
        name: "fail_signal_time",
        id: 24,
        kind: ParamKind::Range { min: 0, max: 10000 },
    },
    Parameter {
        name: "lamp_test",
        id: 25,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "safety_circuit",
        id: 26,
        kind: ParamKind::Names(&[("off", 0), ("single", 1), ("dual", 2)]),
    },
    Parameter {
        name: "door_contact",
        id: 27,
        kind: ParamKind::Names(OFF_ON),
    },
    Parameter {
        name: "hv_ramp_time",
        id: 28,
        kind: ParamKind::Range { min: 0, max: 9999 },
    },
    Parameter {
        name: "hv_discharge_time",
        id: 29,
        kind: ParamKind::Range { min: 0, max: 9999 },
    },
    Parameter {
        name: "pe_contact_check",
        id: 30,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "iso_discharge",
        id: 31,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "fct_settle_time",
        id: 32,
        kind: ParamKind::Range { min: 0, max: 9999 },
    },
    Parameter {
        name: "fct_supply",
        id: 33,
        kind: ParamKind::Names(&[("internal", 0), ("external", 1)]),
    },
    Parameter {
        name: "visual_timeout",
        id: 34,
        kind: ParamKind::Range { min: 0, max: 3600 },
    },
    Parameter {
        name: "operator_login",
        id: 35,
        kind: ParamKind::Names(&[("off", 0), ("name", 1), ("password", 2)]),
    },
    Parameter {
        name: "barcode_length",
        id: 36,
        kind: ParamKind::Range { min: 0, max: 32 },
    },
    Parameter {
        name: "order_data_demand",
        id: 37,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "date_format",
        id: 38,
        kind: ParamKind::Names(&[("dmy", 0), ("mdy", 1), ("ymd", 2)]),
    },
    Parameter {
        name: "interim_values",
        id: 39,
        kind: ParamKind::Flag,
    },
    Parameter {
        name: "message_counter",
        id: 40,
        kind: ParamKind::Names(OFF_ON),
    },
];

// ---------------------------------------------------------------
// Typed values for the parameters the stack itself sets
// ---------------------------------------------------------------

/// How the tester reports actual values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmittingMode {
    Continuous = 0,
    /// One report per test run, fetched with `IW`.
    Single = 1,
    Off = 2,
}

/// How much of the front panel remote control locks out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteControl {
    Off = 0,
    Partial = 1,
    Full = 2,
}

/// Verbosity of actual-value reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActualValuesMode {
    Standard = 0,
    Extended = 1,
    /// Includes serial number, operator, station and order data.
    Extra = 2,
}

/// Sample time pushed during a reset.
pub const RESET_SAMPLE_TIME_MS: u32 = 333;

/// An ordered collection of validated parameter codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    values: Vec<(&'static Parameter, u32)>,
}

impl ParameterSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from loosely typed `(name, value)` pairs.
    ///
    /// Fails on the first unknown name or illegal value.
    ///
    /// ```
    /// use glp2::params::ParameterSet;
    ///
    /// let set = ParameterSet::from_pairs(&[("sample_time", "500"), ("beeper", "false")]).unwrap();
    /// assert_eq!(set.to_data_string(), "SP_3_500_6_0");
    ///
    /// assert!(ParameterSet::from_pairs(&[("sample_time", "100")]).is_err());
    /// ```
    pub fn from_pairs<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Result<Self> {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.set(name.as_ref(), value.as_ref())?;
        }
        Ok(set)
    }

    /// The parameters pushed by a reset: single-test transmission, full
    /// remote control, 333 ms sample time, extra verbosity.
    pub fn reset_defaults() -> Self {
        Self::new()
            .transmitting_mode(TransmittingMode::Single)
            .remote_control(RemoteControl::Full)
            .with_code("sample_time", RESET_SAMPLE_TIME_MS)
            .actual_values(ActualValuesMode::Extra)
    }

    /// Validate and store one value, replacing an earlier value for the
    /// same parameter.
    pub fn set(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        let param = Parameter::by_name(name)
            .ok_or_else(|| Error::InvalidParameters(format!("unknown parameter {name:?}")))?;
        let code = param.validate(value)?;
        self.insert(param, code);
        Ok(self)
    }

    pub fn transmitting_mode(self, mode: TransmittingMode) -> Self {
        self.with_code("transmitting_mode", mode as u32)
    }

    pub fn remote_control(self, control: RemoteControl) -> Self {
        self.with_code("remote_control", control as u32)
    }

    pub fn actual_values(self, mode: ActualValuesMode) -> Self {
        self.with_code("actual_values", mode as u32)
    }

    /// Set the sample time in milliseconds (250 to 60000).
    pub fn sample_time(mut self, ms: u32) -> Result<Self> {
        self.set("sample_time", &ms.to_string())?;
        Ok(self)
    }

    /// Code stored for `name`, if any.
    pub fn get(&self, name: &str) -> Option<u32> {
        self.values
            .iter()
            .find(|(p, _)| p.name.eq_ignore_ascii_case(name))
            .map(|&(_, code)| code)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render the `SP` data string.
    pub fn to_data_string(&self) -> String {
        let mut out = String::from("SP");
        for (param, code) in &self.values {
            out.push_str(&format!("_{}_{}", param.id, code));
        }
        out
    }

    // Typed setters only pass codes that are legal for their parameter.
    fn with_code(mut self, name: &str, code: u32) -> Self {
        if let Some(param) = Parameter::by_name(name) {
            self.insert(param, code);
        }
        self
    }

    fn insert(&mut self, param: &'static Parameter, code: u32) {
        match self.values.iter_mut().find(|(p, _)| p.id == param.id) {
            Some(slot) => slot.1 = code,
            None => self.values.push((param, code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ids_are_dense_and_names_unique() {
        for (i, param) in PARAMETERS.iter().enumerate() {
            assert_eq!(param.id as usize, i + 1, "{}", param.name);
            assert_eq!(
                PARAMETERS.iter().filter(|p| p.name == param.name).count(),
                1,
                "duplicate {}",
                param.name
            );
        }
    }

    #[test]
    fn sample_time_bounds() {
        let param = Parameter::by_name("sample_time").unwrap();
        assert_eq!(param.validate("250").unwrap(), 250);
        assert_eq!(param.validate("60000").unwrap(), 60000);
        assert!(param.validate("249").is_err());
        assert!(param.validate("60001").is_err());
        assert!(param.validate("fast").is_err());
    }

    #[test]
    fn names_accept_name_or_code() {
        let param = Parameter::by_name("remote_control").unwrap();
        assert_eq!(param.validate("FULL").unwrap(), 2);
        assert_eq!(param.validate("1").unwrap(), 1);
        assert!(param.validate("3").is_err());
        assert!(param.validate("total").is_err());
    }

    #[test]
    fn codes_and_flags() {
        let baud = Parameter::by_name("baud_rate").unwrap();
        assert_eq!(baud.validate("19200").unwrap(), 19200);
        assert!(baud.validate("14400").is_err());

        let beeper = Parameter::by_name("beeper").unwrap();
        assert_eq!(beeper.validate("true").unwrap(), 1);
        assert_eq!(beeper.validate("0").unwrap(), 0);
        assert!(beeper.validate("yes").is_err());
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let err = ParameterSet::from_pairs(&[("warp_drive", "1")]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(msg) if msg.contains("warp_drive")));
    }

    #[test]
    fn reset_defaults_data_string() {
        let set = ParameterSet::reset_defaults();
        assert_eq!(set.to_data_string(), "SP_1_1_2_2_3_333_4_2");
        assert_eq!(set.get("sample_time"), Some(333));
    }

    #[test]
    fn later_value_replaces_earlier() {
        let set = ParameterSet::from_pairs(&[("sample_time", "500"), ("sample_time", "1000")]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.to_data_string(), "SP_3_1000");
    }

    #[test]
    fn typed_sample_time_is_checked() {
        assert!(ParameterSet::new().sample_time(100).is_err());
        let set = ParameterSet::new().sample_time(1000).unwrap();
        assert_eq!(set.get("SAMPLE_TIME"), Some(1000));
    }
}
