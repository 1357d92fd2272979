//! Program steps.
//!
//! A test program is a list of steps, one per measurement the tester runs:
//! protective earth ([`PeTest`]), insulation ([`IsoTest`]), function
//! ([`FctTest`]) and operator visual inspection ([`VisTest`]). Every step is
//! validated when it is built and immutable afterwards, so serialization
//! cannot fail.
//!
//! Numeric fields travel as fixed-point decimals. Each field has a range
//! and a precision multiplier; a multiplier of 100 means two decimals on
//! the wire, 1 means an integer.

use std::fmt;
use std::str::FromStr;

use glp2_core::{Error, Result};

use crate::frame::{MAX_TEXT_LEN, encode_text};
use crate::params::parse_flag;

/// Lowest step number the tester accepts.
pub const MIN_STEP: u8 = 1;

/// Highest step number the tester accepts.
pub const MAX_STEP: u8 = 254;

/// Inclusive range and precision of one numeric field.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    min: f64,
    max: f64,
    scale: u32,
}

impl Bounds {
    const fn new(min: f64, max: f64, scale: u32) -> Self {
        Bounds { min, max, scale }
    }

    fn check(&self, field: &str, value: f64) -> Result<f64> {
        if value.is_finite() && value >= self.min && value <= self.max {
            Ok(value)
        } else {
            Err(Error::InvalidParameters(format!(
                "{field} must be within {}..={}, got {value}",
                fixed(self.min, self.scale),
                fixed(self.max, self.scale)
            )))
        }
    }

    fn format(&self, value: f64) -> String {
        fixed(value, self.scale)
    }
}

fn decimals(scale: u32) -> usize {
    let mut digits = 0;
    let mut rest = scale;
    while rest >= 10 {
        rest /= 10;
        digits += 1;
    }
    digits
}

/// Format `value` as a fixed-point decimal with `log10(scale)` decimals.
fn fixed(value: f64, scale: u32) -> String {
    let scale = scale.max(1);
    let scaled = (value * f64::from(scale)).round() as u64;
    if scale == 1 {
        return scaled.to_string();
    }
    let scale = u64::from(scale);
    let width = decimals(scale as u32);
    format!("{}.{:0width$}", scaled / scale, scaled % scale)
}

const SECONDS: Bounds = Bounds::new(0.0, 999.9, 10);

// ---------------------------------------------------------------
// Modes
// ---------------------------------------------------------------

/// Parse a mode by name (case-insensitive) or numeric code.
fn parse_mode<M: Copy>(value: &str, table: &[(&str, M)]) -> Option<M> {
    let value = value.trim();
    if let Some(&(_, mode)) = table.iter().find(|(name, _)| name.eq_ignore_ascii_case(value)) {
        return Some(mode);
    }
    let code = value.parse::<usize>().ok()?;
    table.get(code).map(|&(_, mode)| mode)
}

/// Measurement mode of a protective earth test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeMode {
    Ac = 0,
    Dc = 1,
}

impl PeMode {
    // Indexed by wire code.
    const TABLE: &'static [(&'static str, PeMode)] = &[("AC", PeMode::Ac), ("DC", PeMode::Dc)];
}

/// What an insulation test regulates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoMode {
    /// Minimum insulation resistance in MΩ.
    Resistance = 0,
    /// Maximum leakage current in mA.
    Current = 1,
    /// Varistor breakdown voltage in V.
    Varistor = 2,
}

impl IsoMode {
    const TABLE: &'static [(&'static str, IsoMode)] = &[
        ("RESISTANCE", IsoMode::Resistance),
        ("CURRENT", IsoMode::Current),
        ("VARISTOR", IsoMode::Varistor),
    ];

    fn bounds(self) -> Bounds {
        match self {
            IsoMode::Resistance => Bounds::new(0.01, 500.0, 100),
            IsoMode::Current => Bounds::new(0.001, 10.0, 1000),
            IsoMode::Varistor => Bounds::new(50.0, 6000.0, 1),
        }
    }
}

/// Quantity a function test measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FctMode {
    /// Volts.
    Voltage = 0,
    /// Amperes.
    Current = 1,
    /// Watts.
    Power = 2,
}

impl FctMode {
    const TABLE: &'static [(&'static str, FctMode)] = &[
        ("VOLTAGE", FctMode::Voltage),
        ("CURRENT", FctMode::Current),
        ("POWER", FctMode::Power),
    ];

    fn bounds(self) -> Bounds {
        match self {
            FctMode::Voltage => Bounds::new(0.0, 300.0, 10),
            FctMode::Current => Bounds::new(0.0, 16.0, 100),
            FctMode::Power => Bounds::new(0.0, 4000.0, 1),
        }
    }
}

macro_rules! impl_mode_from_str {
    ($($mode:ident),*) => {$(
        impl FromStr for $mode {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                parse_mode(s, Self::TABLE).ok_or_else(|| {
                    Error::InvalidParameters(format!(
                        concat!("unknown ", stringify!($mode), " {:?}"),
                        s
                    ))
                })
            }
        }
    )*};
}

impl_mode_from_str!(PeMode, IsoMode, FctMode);

// ---------------------------------------------------------------
// Common header
// ---------------------------------------------------------------

/// Fields shared by every step kind.
#[derive(Debug, Clone, PartialEq)]
pub struct StepHeader {
    step: u8,
    label: Option<String>,
    enabled: bool,
    start_time: f64,
    duration: f64,
}

impl StepHeader {
    /// Header for step number `step`, enabled, no label, zero timings.
    pub fn new(step: u8) -> Self {
        StepHeader {
            step,
            label: None,
            enabled: true,
            start_time: 0.0,
            duration: 0.0,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Delay before the measurement starts, in seconds.
    pub fn start_time(mut self, seconds: f64) -> Self {
        self.start_time = seconds;
        self
    }

    /// Measurement duration in seconds.
    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = seconds;
        self
    }

    fn validate(mut self) -> Result<Self> {
        if !(MIN_STEP..=MAX_STEP).contains(&self.step) {
            return Err(Error::InvalidParameters(format!(
                "step must be within {MIN_STEP}..={MAX_STEP}, got {}",
                self.step
            )));
        }
        self.label = match self.label.take() {
            Some(label) => {
                let label = label.trim().to_string();
                if label.chars().count() > MAX_TEXT_LEN {
                    return Err(Error::InvalidParameters(format!(
                        "label of step {} is longer than {MAX_TEXT_LEN} characters",
                        self.step
                    )));
                }
                if label.contains('_') {
                    return Err(Error::InvalidParameters(format!(
                        "label of step {} must not contain '_'",
                        self.step
                    )));
                }
                (!label.is_empty()).then_some(label)
            }
            None => None,
        };
        SECONDS.check("start_time", self.start_time)?;
        SECONDS.check("duration", self.duration)?;
        Ok(self)
    }

    fn elapsed_ms(&self) -> u64 {
        ((self.start_time + self.duration) * 1000.0).round() as u64
    }

    /// `<CODE>_<step>_<enabled>_<mode>_<fields...>_<start>_<duration>_<label>`
    fn wire(&self, code: &str, mode: Option<u8>, fields: &[String]) -> String {
        let mut parts = vec![
            code.to_string(),
            format!("{:03}", self.step),
            // The tester stores a "skip" flag, so enabled steps send 0.
            if self.enabled { "0" } else { "1" }.to_string(),
        ];
        if let Some(mode) = mode {
            parts.push(mode.to_string());
        }
        parts.extend(fields.iter().cloned());
        parts.push(SECONDS.format(self.start_time));
        parts.push(SECONDS.format(self.duration));
        parts.push(match &self.label {
            Some(label) => encode_text(label),
            None => "*".to_string(),
        });
        parts.join("_")
    }
}

// ---------------------------------------------------------------
// Step kinds
// ---------------------------------------------------------------

/// Protective earth resistance test.
#[derive(Debug, Clone, PartialEq)]
pub struct PeTest {
    header: StepHeader,
    mode: PeMode,
    test_current: f64,
    max_resistance: f64,
}

const PE_CURRENT: Bounds = Bounds::new(0.1, 32.0, 10);
const PE_RESISTANCE: Bounds = Bounds::new(0.001, 2.0, 1000);

impl PeTest {
    /// * `test_current` - amperes, 0.1 to 32.0
    /// * `max_resistance` - ohms, 0.001 to 2.000
    pub fn new(header: StepHeader, mode: PeMode, test_current: f64, max_resistance: f64) -> Result<Self> {
        Ok(PeTest {
            header: header.validate()?,
            mode,
            test_current: PE_CURRENT.check("test_current", test_current)?,
            max_resistance: PE_RESISTANCE.check("max_resistance", max_resistance)?,
        })
    }

    pub fn mode(&self) -> PeMode {
        self.mode
    }

    pub fn test_current(&self) -> f64 {
        self.test_current
    }

    pub fn max_resistance(&self) -> f64 {
        self.max_resistance
    }

    pub fn to_data_string(&self) -> String {
        self.header.wire(
            StepKind::Pe.code(),
            Some(self.mode as u8),
            &[
                PE_CURRENT.format(self.test_current),
                PE_RESISTANCE.format(self.max_resistance),
            ],
        )
    }
}

/// Insulation test.
#[derive(Debug, Clone, PartialEq)]
pub struct IsoTest {
    header: StepHeader,
    mode: IsoMode,
    set_value: f64,
    test_voltage: f64,
}

const ISO_VOLTAGE: Bounds = Bounds::new(50.0, 6000.0, 1);

impl IsoTest {
    /// `set_value` is interpreted per `mode`; `test_voltage` is 50 to 6000 V.
    pub fn new(header: StepHeader, mode: IsoMode, set_value: f64, test_voltage: f64) -> Result<Self> {
        Ok(IsoTest {
            header: header.validate()?,
            mode,
            set_value: mode.bounds().check("set_value", set_value)?,
            test_voltage: ISO_VOLTAGE.check("test_voltage", test_voltage)?,
        })
    }

    pub fn mode(&self) -> IsoMode {
        self.mode
    }

    pub fn set_value(&self) -> f64 {
        self.set_value
    }

    pub fn test_voltage(&self) -> f64 {
        self.test_voltage
    }

    pub fn to_data_string(&self) -> String {
        self.header.wire(
            StepKind::Iso.code(),
            Some(self.mode as u8),
            &[
                self.mode.bounds().format(self.set_value),
                ISO_VOLTAGE.format(self.test_voltage),
            ],
        )
    }
}

/// Function test: the device runs on supply voltage while one quantity is
/// checked against a window.
#[derive(Debug, Clone, PartialEq)]
pub struct FctTest {
    header: StepHeader,
    mode: FctMode,
    min_value: f64,
    max_value: f64,
    supply_voltage: f64,
}

const FCT_SUPPLY: Bounds = Bounds::new(0.0, 264.0, 1);

impl FctTest {
    pub fn new(
        header: StepHeader,
        mode: FctMode,
        min_value: f64,
        max_value: f64,
        supply_voltage: f64,
    ) -> Result<Self> {
        let bounds = mode.bounds();
        let min_value = bounds.check("min_value", min_value)?;
        let max_value = bounds.check("max_value", max_value)?;
        if min_value > max_value {
            return Err(Error::InvalidParameters(format!(
                "min_value {min_value} exceeds max_value {max_value}"
            )));
        }
        Ok(FctTest {
            header: header.validate()?,
            mode,
            min_value,
            max_value,
            supply_voltage: FCT_SUPPLY.check("supply_voltage", supply_voltage)?,
        })
    }

    pub fn mode(&self) -> FctMode {
        self.mode
    }

    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn supply_voltage(&self) -> f64 {
        self.supply_voltage
    }

    pub fn to_data_string(&self) -> String {
        let bounds = self.mode.bounds();
        self.header.wire(
            StepKind::Fct.code(),
            Some(self.mode as u8),
            &[
                bounds.format(self.min_value),
                bounds.format(self.max_value),
                FCT_SUPPLY.format(self.supply_voltage),
            ],
        )
    }
}

/// Visual inspection confirmed by the operator.
///
/// The label is the prompt shown on the tester; a duration of zero waits
/// for the operator indefinitely.
#[derive(Debug, Clone, PartialEq)]
pub struct VisTest {
    header: StepHeader,
}

impl VisTest {
    pub fn new(header: StepHeader) -> Result<Self> {
        let header = header.validate()?;
        if header.label.is_none() {
            return Err(Error::InvalidParameters(format!(
                "visual test step {} needs a label",
                header.step
            )));
        }
        Ok(VisTest { header })
    }

    /// The operator prompt.
    pub fn prompt(&self) -> &str {
        self.header.label.as_deref().unwrap_or_default()
    }

    pub fn to_data_string(&self) -> String {
        self.header.wire(StepKind::Vis.code(), None, &[])
    }
}

// ---------------------------------------------------------------
// ProgramStep
// ---------------------------------------------------------------

/// Step kind as named by the workflow and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Pe,
    Iso,
    Fct,
    Vis,
}

impl StepKind {
    /// Wire code of the step kind.
    pub fn code(self) -> &'static str {
        match self {
            StepKind::Pe => "PE",
            StepKind::Iso => "ISO",
            StepKind::Fct => "FCT",
            StepKind::Vis => "SPR",
        }
    }

    fn fields(self) -> &'static [&'static str] {
        match self {
            StepKind::Pe => &["mode", "test_current", "max_resistance"],
            StepKind::Iso => &["mode", "set_value", "test_voltage"],
            StepKind::Fct => &["mode", "min_value", "max_value", "supply_voltage"],
            StepKind::Vis => &[],
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for StepKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PE" => Ok(StepKind::Pe),
            "ISO" => Ok(StepKind::Iso),
            "FCT" => Ok(StepKind::Fct),
            "SPR" | "VIS" => Ok(StepKind::Vis),
            _ => Err(Error::InvalidParameters(format!("unknown step kind {s:?}"))),
        }
    }
}

const HEADER_FIELDS: &[&str] = &["step", "label", "enabled", "start_time", "duration"];

/// One step of a test program.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramStep {
    Pe(PeTest),
    Iso(IsoTest),
    Fct(FctTest),
    Vis(VisTest),
}

impl ProgramStep {
    /// Build a step from loosely typed key/value strings.
    ///
    /// Keys are the field names of the step kind plus `step`, `label`,
    /// `enabled`, `start_time` and `duration`. Booleans accept
    /// `0`/`1`/`true`/`false`, modes accept their name or code.
    ///
    /// ```
    /// use glp2::steps::{ProgramStep, StepKind};
    ///
    /// let step = ProgramStep::from_fields(
    ///     StepKind::Iso,
    ///     &[("step", "2"), ("mode", "RESISTANCE"), ("set_value", "2"), ("test_voltage", "500")],
    /// )
    /// .unwrap();
    /// assert_eq!(step.to_data_string(), "ISO_002_0_0_2.00_500_0.0_0.0_*");
    /// ```
    pub fn from_fields<K: AsRef<str>, V: AsRef<str>>(kind: StepKind, fields: &[(K, V)]) -> Result<Self> {
        let fields = Fields::new(kind, fields)?;
        let header = StepHeader {
            step: fields.step()?,
            label: fields.get("label").map(str::to_string),
            enabled: match fields.get("enabled") {
                Some(value) => parse_flag(value).ok_or_else(|| {
                    Error::InvalidParameters(format!("enabled must be a boolean, got {value:?}"))
                })?,
                None => true,
            },
            start_time: fields.number_or_zero("start_time")?,
            duration: fields.number_or_zero("duration")?,
        };

        let step: ProgramStep = match kind {
            StepKind::Pe => PeTest::new(
                header,
                fields.required("mode")?.parse()?,
                fields.number("test_current")?,
                fields.number("max_resistance")?,
            )?
            .into(),
            StepKind::Iso => IsoTest::new(
                header,
                fields.required("mode")?.parse()?,
                fields.number("set_value")?,
                fields.number("test_voltage")?,
            )?
            .into(),
            StepKind::Fct => FctTest::new(
                header,
                fields.required("mode")?.parse()?,
                fields.number("min_value")?,
                fields.number("max_value")?,
                fields.number("supply_voltage")?,
            )?
            .into(),
            StepKind::Vis => VisTest::new(header)?.into(),
        };
        Ok(step)
    }

    fn header(&self) -> &StepHeader {
        match self {
            ProgramStep::Pe(t) => &t.header,
            ProgramStep::Iso(t) => &t.header,
            ProgramStep::Fct(t) => &t.header,
            ProgramStep::Vis(t) => &t.header,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            ProgramStep::Pe(_) => StepKind::Pe,
            ProgramStep::Iso(_) => StepKind::Iso,
            ProgramStep::Fct(_) => StepKind::Fct,
            ProgramStep::Vis(_) => StepKind::Vis,
        }
    }

    pub fn step(&self) -> u8 {
        self.header().step
    }

    pub fn label(&self) -> Option<&str> {
        self.header().label.as_deref()
    }

    pub fn enabled(&self) -> bool {
        self.header().enabled
    }

    pub fn start_time(&self) -> f64 {
        self.header().start_time
    }

    pub fn duration(&self) -> f64 {
        self.header().duration
    }

    /// Planned run time of the step (start delay plus duration).
    pub fn elapsed_ms(&self) -> u64 {
        self.header().elapsed_ms()
    }

    pub fn to_data_string(&self) -> String {
        match self {
            ProgramStep::Pe(t) => t.to_data_string(),
            ProgramStep::Iso(t) => t.to_data_string(),
            ProgramStep::Fct(t) => t.to_data_string(),
            ProgramStep::Vis(t) => t.to_data_string(),
        }
    }
}

impl From<PeTest> for ProgramStep {
    fn from(t: PeTest) -> Self {
        ProgramStep::Pe(t)
    }
}

impl From<IsoTest> for ProgramStep {
    fn from(t: IsoTest) -> Self {
        ProgramStep::Iso(t)
    }
}

impl From<FctTest> for ProgramStep {
    fn from(t: FctTest) -> Self {
        ProgramStep::Fct(t)
    }
}

impl From<VisTest> for ProgramStep {
    fn from(t: VisTest) -> Self {
        ProgramStep::Vis(t)
    }
}

/// Loosely typed step fields, keys lower-cased and checked against the kind.
struct Fields {
    values: Vec<(String, String)>,
}

impl Fields {
    fn new<K: AsRef<str>, V: AsRef<str>>(kind: StepKind, fields: &[(K, V)]) -> Result<Self> {
        let mut values = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let key = key.as_ref().trim().to_ascii_lowercase();
            if !HEADER_FIELDS.contains(&key.as_str()) && !kind.fields().contains(&key.as_str()) {
                return Err(Error::InvalidParameters(format!(
                    "unknown field {key:?} for {kind} step"
                )));
            }
            values.push((key, value.as_ref().trim().to_string()));
        }
        Ok(Fields { values })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::InvalidParameters(format!("missing field {key:?}")))
    }

    fn number(&self, key: &str) -> Result<f64> {
        let value = self.required(key)?;
        value
            .parse()
            .map_err(|_| Error::InvalidParameters(format!("{key} must be a number, got {value:?}")))
    }

    fn number_or_zero(&self, key: &str) -> Result<f64> {
        match self.get(key) {
            Some(_) => self.number(key),
            None => Ok(0.0),
        }
    }

    fn step(&self) -> Result<u8> {
        let value = self.required("step")?;
        value.parse().map_err(|_| {
            Error::InvalidParameters(format!(
                "step must be within {MIN_STEP}..={MAX_STEP}, got {value:?}"
            ))
        })
    }
}
