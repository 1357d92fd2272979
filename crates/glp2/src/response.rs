//! Tester replies.
//!
//! Frame payloads are ASCII tokens separated by whitespace. The first token
//! names the reply type; the rest is decoded by the matching response type.
//! Each response type also decodes a bare payload with the type token left
//! off.
//!
//! | Type   | Reply                                         |
//! |--------|-----------------------------------------------|
//! | `IST`  | [`ActualValuesResponse`]                      |
//! | `SEL`  | [`ActualValuesResponse`] of a self-test       |
//! | `AUF`  | [`OrderDataDemandResponse`]                   |
//! | `SAMP` | [`InterimActualValuesResponse`]               |
//! | `OPT`  | [`DeviceOptionsResponse`]                     |

use std::str::FromStr;

use glp2_core::{Error, Result};

use crate::frame::{self, decode_text};

/// Fault status reported when the operator pressed start with no program
/// loaded.
pub const NO_TEST_STEP_DEFINED: u32 = 3;

const FAULTS: &[(u32, &str)] = &[
    (1, "EMERGENCY_STOP"),
    (2, "SAFETY_CIRCUIT_OPEN"),
    (NO_TEST_STEP_DEFINED, "NO_TEST_STEP_DEFINED"),
    (4, "PROGRAM_NOT_FOUND"),
    (5, "TEST_CANCELLED"),
    (6, "HV_OVERCURRENT"),
    (7, "HV_BREAKDOWN"),
    (8, "PE_CONTACT_ERROR"),
    (9, "ISO_DISCHARGE_ERROR"),
    (10, "FCT_SUPPLY_ERROR"),
    (11, "VISUAL_TEST_TIMEOUT"),
    (12, "DOOR_OPEN"),
    (13, "OVERTEMPERATURE"),
    (14, "CALIBRATION_DUE"),
    (15, "MEMORY_FULL"),
    (16, "INTERNAL_ERROR"),
];

/// Text for a fault status: empty for 0, the table name for known codes,
/// `F_<code>` otherwise.
pub fn fault_text(code: u32) -> String {
    if code == 0 {
        return String::new();
    }
    FAULTS
        .iter()
        .find(|(c, _)| *c == code)
        .map_or_else(|| format!("F_{code}"), |(_, name)| (*name).to_string())
}

// ---------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------

/// Cursor over the whitespace-separated tokens of a payload.
struct Tokens<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(tokens: Vec<&'a str>) -> Self {
        Tokens { tokens, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.tokens.len() - self.pos
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.pos).copied()?;
        self.pos += 1;
        Some(token)
    }

    fn expect(&mut self, what: &str) -> Result<&'a str> {
        self.next()
            .ok_or_else(|| Error::InvalidResponse(format!("missing {what}")))
    }

    fn number<T: FromStr>(&mut self, what: &str) -> Result<T> {
        let token = self.expect(what)?;
        parse_number(token, what)
    }

    fn evaluation(&mut self) -> Result<bool> {
        match self.expect("evaluation")? {
            "IO" => Ok(true),
            "NIO" => Ok(false),
            other => Err(Error::InvalidResponse(format!(
                "evaluation must be IO or NIO, got {other:?}"
            ))),
        }
    }

    fn rest(&mut self) -> Vec<&'a str> {
        let rest = self.tokens[self.pos..].to_vec();
        self.pos = self.tokens.len();
        rest
    }
}

fn parse_number<T: FromStr>(token: &str, what: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| Error::InvalidResponse(format!("{what} is not a number: {token:?}")))
}

fn tokenize(payload: &[u8]) -> Result<Vec<&str>> {
    let text = std::str::from_utf8(payload).map_err(|_| {
        Error::InvalidResponse(format!("payload is not ASCII: {}", frame::pretty(payload)))
    })?;
    Ok(text.split_ascii_whitespace().collect())
}

fn is_step_token(token: &str) -> bool {
    token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit())
}

fn message_counter(token: &str) -> Option<u8> {
    let hex = token.strip_prefix('x')?;
    if hex.len() != 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// Whether `token` can only appear inside an actual-values report.
fn is_actual_values_token(token: &str) -> bool {
    is_step_token(token) || token == "END" || message_counter(token).is_some() || token.contains('_')
}

/// Tokenize `payload`, consuming a leading `kind` token if present.
fn tokens_after<'a>(payload: &'a [u8], kind: &str) -> Result<Tokens<'a>> {
    let mut tokens = Tokens::new(tokenize(payload)?);
    if tokens.tokens.first() == Some(&kind) {
        tokens.pos = 1;
    }
    Ok(tokens)
}

// ---------------------------------------------------------------
// Test results
// ---------------------------------------------------------------

/// Second measured quantity of a function test.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryValues {
    pub set_value: f64,
    pub actual_value: f64,
    pub unit: String,
}

/// Result of a PE, ISO, FCT, leakage (ABL), residual voltage (RSP),
/// substitute leakage (ERS) or resistance (R) step.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultTestResult {
    pub method: String,
    pub step: u16,
    pub set_value: f64,
    pub actual_value: f64,
    pub evaluation: bool,
    pub time_ms: u32,
    pub unit: String,
    /// Only present for FCT.
    pub secondary: Option<SecondaryValues>,
}

/// Result of a high-voltage step.
#[derive(Debug, Clone, PartialEq)]
pub struct HvTestResult {
    pub method: String,
    pub step: u16,
    pub voltage: f64,
    pub max_current: f64,
    pub actual_voltage: f64,
    pub actual_current: f64,
    pub evaluation: bool,
    pub time_ms: u32,
}

/// Result of a visual inspection step.
#[derive(Debug, Clone, PartialEq)]
pub struct VisTestResult {
    pub method: String,
    pub step: u16,
    pub evaluation: bool,
    pub label: String,
}

/// One step result inside an actual-values report.
#[derive(Debug, Clone, PartialEq)]
pub enum TestResult {
    Default(DefaultTestResult),
    Hv(HvTestResult),
    Vis(VisTestResult),
}

const DEFAULT_METHODS: &[&str] = &["PE", "ISO", "FCT", "ABL", "RSP", "ERS", "R"];

impl TestResult {
    pub fn step(&self) -> u16 {
        match self {
            TestResult::Default(r) => r.step,
            TestResult::Hv(r) => r.step,
            TestResult::Vis(r) => r.step,
        }
    }

    pub fn method(&self) -> &str {
        match self {
            TestResult::Default(r) => &r.method,
            TestResult::Hv(r) => &r.method,
            TestResult::Vis(r) => &r.method,
        }
    }

    /// `true` when the tester evaluated the step as passed.
    pub fn evaluation(&self) -> bool {
        match self {
            TestResult::Default(r) => r.evaluation,
            TestResult::Hv(r) => r.evaluation,
            TestResult::Vis(r) => r.evaluation,
        }
    }

    fn decode(step: u16, method: &str, tokens: &mut Tokens<'_>) -> Result<Self> {
        match method {
            "HV" => Ok(TestResult::Hv(HvTestResult {
                method: method.to_string(),
                step,
                voltage: tokens.number("voltage")?,
                max_current: tokens.number("max current")?,
                actual_voltage: tokens.number("actual voltage")?,
                actual_current: tokens.number("actual current")?,
                evaluation: tokens.evaluation()?,
                time_ms: tokens.number("time")?,
            })),
            "SPR" => Ok(TestResult::Vis(VisTestResult {
                method: method.to_string(),
                step,
                evaluation: tokens.evaluation()?,
                label: decode_text(tokens.expect("label")?),
            })),
            m if DEFAULT_METHODS.contains(&m) => {
                let mut result = DefaultTestResult {
                    method: method.to_string(),
                    step,
                    set_value: tokens.number("set value")?,
                    actual_value: tokens.number("actual value")?,
                    evaluation: tokens.evaluation()?,
                    time_ms: tokens.number("time")?,
                    unit: tokens.expect("unit")?.to_string(),
                    secondary: None,
                };
                if method == "FCT" {
                    result.secondary = Some(SecondaryValues {
                        set_value: tokens.number("secondary set value")?,
                        actual_value: tokens.number("secondary actual value")?,
                        unit: tokens.expect("secondary unit")?.to_string(),
                    });
                }
                Ok(TestResult::Default(result))
            }
            other => Err(Error::InvalidResponse(format!(
                "unknown test method {other:?} in step {step:03}"
            ))),
        }
    }
}

// ---------------------------------------------------------------
// Responses
// ---------------------------------------------------------------

/// Results and state of the last (or running) test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActualValuesResponse {
    /// The report belongs to the tester's own self-test.
    pub self_test: bool,
    pub results: Vec<TestResult>,
    /// The program ran to its end.
    pub completed: bool,
    /// Running test counter of the tester.
    pub test_number: Option<u32>,
    pub serial_number: Option<String>,
    pub operator: Option<String>,
    pub program: Option<String>,
    pub fault_status: u32,
    pub fault_text: String,
    pub timestamp: Option<String>,
    pub station: Option<String>,
    pub order_data: Vec<String>,
    pub message_counter: Option<u8>,
}

impl ActualValuesResponse {
    /// Decode an actual-values payload. The `IST` or `SEL` type token is
    /// optional; `SEL` marks a self-test report.
    ///
    /// ```
    /// use glp2::response::ActualValuesResponse;
    ///
    /// let values = ActualValuesResponse::decode(b"001 PE 10.0 9.8 IO 500 A").unwrap();
    /// assert_eq!(values.results.len(), 1);
    /// assert!(!values.completed);
    /// ```
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut tokens = Tokens::new(tokenize(payload)?);
        let self_test = match tokens.tokens.first() {
            Some(&"SEL") => true,
            Some(&"IST") => false,
            _ => return Self::decode_tokens(&mut tokens, false),
        };
        tokens.pos = 1;
        Self::decode_tokens(&mut tokens, self_test)
    }

    /// Decode the tokens following `IST`/`SEL`.
    fn decode_tokens(tokens: &mut Tokens<'_>, self_test: bool) -> Result<Self> {
        if tokens.remaining() == 0 {
            return Err(Error::InvalidResponse("empty actual values".into()));
        }
        let mut response = ActualValuesResponse {
            self_test,
            ..Default::default()
        };

        while let Some(token) = tokens.next() {
            if is_step_token(token) {
                let step = parse_number(token, "step")?;
                let method = tokens.expect("test method")?;
                response.results.push(TestResult::decode(step, method, tokens)?);
            } else if token == "END" {
                response.completed = true;
                break;
            } else if let Some(counter) = message_counter(token) {
                response.message_counter = Some(counter);
            } else if let Some((prefix, value)) = token.split_once('_') {
                match prefix {
                    "NUM" => response.test_number = Some(parse_number(value, "test number")?),
                    "SN" => response.serial_number = Some(decode_text(value)),
                    "NAME" => response.operator = Some(decode_text(value)),
                    "PR" => response.program = Some(decode_text(value)),
                    "F" => {
                        response.fault_status = parse_number(value, "fault status")?;
                        response.fault_text = fault_text(response.fault_status);
                    }
                    "DA" => response.timestamp = Some(decode_text(value)),
                    "ST" => response.station = Some(decode_text(value)),
                    "ORDER" => response.order_data.push(decode_text(value)),
                    _ => tracing::trace!(token, "Ignoring unknown actual-values field"),
                }
            } else {
                tracing::trace!(token, "Ignoring unknown actual-values token");
            }
        }
        Ok(response)
    }

    /// Every reported step passed and none failed.
    pub fn passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(TestResult::evaluation)
    }
}

/// Installed options of the tester (`OPT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOptionsResponse {
    pub options: Vec<String>,
}

impl DeviceOptionsResponse {
    /// Decode an `OPT` payload; the type token is optional.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Self::decode_tokens(&mut tokens_after(payload, "OPT")?)
    }

    fn decode_tokens(tokens: &mut Tokens<'_>) -> Result<Self> {
        let options: Vec<String> = tokens.rest().into_iter().map(str::to_string).collect();
        if options.is_empty() {
            return Err(Error::InvalidResponse("device options list is empty".into()));
        }
        Ok(DeviceOptionsResponse { options })
    }

    pub fn has(&self, option: &str) -> bool {
        self.options.iter().any(|o| o.eq_ignore_ascii_case(option))
    }
}

/// The tester asks for order data before it starts (`AUF`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDataDemandResponse {
    pub order_data: Vec<String>,
}

impl OrderDataDemandResponse {
    /// Decode an `AUF` payload; the type token is optional.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Self::decode_tokens(&mut tokens_after(payload, "AUF")?)
    }

    fn decode_tokens(tokens: &mut Tokens<'_>) -> Result<Self> {
        let order_data: Vec<String> = tokens.rest().into_iter().map(decode_text).collect();
        if order_data.is_empty() {
            return Err(Error::InvalidResponse("order data demand is empty".into()));
        }
        Ok(OrderDataDemandResponse { order_data })
    }
}

/// One measured quantity of an interim report.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
}

/// Values sampled while a step is running (`SAMP`).
#[derive(Debug, Clone, PartialEq)]
pub struct InterimActualValuesResponse {
    pub step: u16,
    pub elapsed_ms: u32,
    pub value1: Measurement,
    pub value2: Measurement,
    pub message_counter: Option<u8>,
}

impl InterimActualValuesResponse {
    /// Decode a `SAMP` payload; the type token is optional.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Self::decode_tokens(&mut tokens_after(payload, "SAMP")?)
    }

    fn decode_tokens(tokens: &mut Tokens<'_>) -> Result<Self> {
        if tokens.remaining() < 6 {
            return Err(Error::InvalidResponse(format!(
                "interim values need 6 fields, got {}",
                tokens.remaining()
            )));
        }
        let response = InterimActualValuesResponse {
            step: tokens.number("step")?,
            elapsed_ms: tokens.number("elapsed time")?,
            value1: Measurement {
                value: tokens.number("first value")?,
                unit: tokens.expect("first unit")?.to_string(),
            },
            value2: Measurement {
                value: tokens.number("second value")?,
                unit: tokens.expect("second unit")?.to_string(),
            },
            message_counter: tokens.next().and_then(message_counter),
        };
        Ok(response)
    }
}

/// Any decoded tester reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    ActualValues(ActualValuesResponse),
    DeviceOptions(DeviceOptionsResponse),
    OrderDataDemand(OrderDataDemandResponse),
    InterimActualValues(InterimActualValuesResponse),
}

impl Response {
    /// Decode a frame payload.
    ///
    /// The leading type token selects the reply. Without one, the payload
    /// is read as actual values if its first token can only belong there.
    ///
    /// ```
    /// use glp2::response::Response;
    ///
    /// let response = Response::decode(b"IST 001 PE 10.0 9.8 IO 500 A END ").unwrap();
    /// let Response::ActualValues(values) = response else { panic!() };
    /// assert!(values.completed);
    /// assert_eq!(values.results.len(), 1);
    /// ```
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut tokens = Tokens::new(tokenize(payload)?);
        let kind = tokens
            .next()
            .ok_or_else(|| Error::InvalidResponse("empty response".into()))?;
        let response = match kind {
            "IST" => Response::ActualValues(ActualValuesResponse::decode_tokens(&mut tokens, false)?),
            "SEL" => Response::ActualValues(ActualValuesResponse::decode_tokens(&mut tokens, true)?),
            "AUF" => Response::OrderDataDemand(OrderDataDemandResponse::decode_tokens(&mut tokens)?),
            "SAMP" => {
                Response::InterimActualValues(InterimActualValuesResponse::decode_tokens(&mut tokens)?)
            }
            "OPT" => Response::DeviceOptions(DeviceOptionsResponse::decode_tokens(&mut tokens)?),
            other if is_actual_values_token(other) => {
                tokens.pos = 0;
                Response::ActualValues(ActualValuesResponse::decode_tokens(&mut tokens, false)?)
            }
            other => {
                return Err(Error::InvalidResponse(format!("unknown response type {other:?}")));
            }
        };
        Ok(response)
    }

    /// Verify and decode a complete frame.
    pub fn decode_frame(bytes: &[u8]) -> Result<Self> {
        frame::verify_checksum(bytes)?;
        Self::decode(frame::payload(bytes))
    }

    /// Fault status carried by an actual-values report, 0 otherwise.
    pub fn fault_status(&self) -> u32 {
        match self {
            Response::ActualValues(values) => values.fault_status,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DATA_MARKER, frame};

    fn actual(text: &str) -> ActualValuesResponse {
        match Response::decode(format!("IST {text}").as_bytes()).unwrap() {
            Response::ActualValues(values) => values,
            other => panic!("expected actual values, got {other:?}"),
        }
    }

    #[test]
    fn single_pe_result() {
        let values = actual("001 PE 10.0 9.8 IO 500 A");
        assert_eq!(values.results.len(), 1);
        match &values.results[0] {
            TestResult::Default(r) => {
                assert_eq!(r.method, "PE");
                assert_eq!(r.step, 1);
                assert_eq!(r.set_value, 10.0);
                assert_eq!(r.actual_value, 9.8);
                assert!(r.evaluation);
                assert_eq!(r.time_ms, 500);
                assert_eq!(r.unit, "A");
                assert!(r.secondary.is_none());
            }
            other => panic!("expected default result, got {other:?}"),
        }
        assert!(!values.completed);
        assert!(values.passed());
    }

    #[test]
    fn fault_three_is_no_test_step_defined() {
        let values = actual("F_3");
        assert_eq!(values.fault_status, 3);
        assert_eq!(values.fault_text, "NO_TEST_STEP_DEFINED");
    }

    #[test]
    fn fault_texts() {
        assert_eq!(fault_text(0), "");
        assert_eq!(fault_text(1), "EMERGENCY_STOP");
        assert_eq!(fault_text(99), "F_99");
    }

    #[test]
    fn end_marks_completed_and_stops() {
        let values = actual("001 PE 10.0 9.8 NIO 500 A END 002 PE 1 1 IO 1 A");
        assert!(values.completed);
        assert_eq!(values.results.len(), 1);
        assert!(!values.passed());
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(matches!(Response::decode(b""), Err(Error::InvalidResponse(_))));
        assert!(matches!(Response::decode(b"   "), Err(Error::InvalidResponse(_))));
        assert!(matches!(Response::decode(b"IST "), Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn mixed_result_variants() {
        let values = actual(
            "NUM_1042 SN_AB*12 NAME_Jo PR_Kettle DA_2024-03-01*10:15 ST_4 \
             001 PE 10.0 0.05 IO 1000 Ohm \
             002 HV 1500 5.0 1498 0.7 IO 2000 \
             003 FCT 230.0 229.1 IO 3000 V 5.0 4.2 A \
             004 SPR NIO Check*cable \
             ORDER_4711 ORDER_B*2 x1F END",
        );
        assert_eq!(values.test_number, Some(1042));
        assert_eq!(values.serial_number.as_deref(), Some("AB 12"));
        assert_eq!(values.operator.as_deref(), Some("Jo"));
        assert_eq!(values.program.as_deref(), Some("Kettle"));
        assert_eq!(values.timestamp.as_deref(), Some("2024-03-01 10:15"));
        assert_eq!(values.station.as_deref(), Some("4"));
        assert_eq!(values.order_data, vec!["4711".to_string(), "B 2".to_string()]);
        assert_eq!(values.message_counter, Some(0x1F));
        assert!(values.completed);

        assert_eq!(values.results.len(), 4);
        assert!(matches!(&values.results[1], TestResult::Hv(r) if r.actual_current == 0.7));
        match &values.results[2] {
            TestResult::Default(r) => {
                let secondary = r.secondary.as_ref().unwrap();
                assert_eq!(secondary.actual_value, 4.2);
                assert_eq!(secondary.unit, "A");
            }
            other => panic!("expected FCT result, got {other:?}"),
        }
        match &values.results[3] {
            TestResult::Vis(r) => {
                assert!(!r.evaluation);
                assert_eq!(r.label, "Check cable");
            }
            other => panic!("expected visual result, got {other:?}"),
        }
    }

    #[test]
    fn self_test_flag() {
        let Response::ActualValues(values) = Response::decode(b"SEL F_0 END").unwrap() else {
            panic!("expected actual values");
        };
        assert!(values.self_test);
        assert_eq!(values.fault_text, "");
    }

    #[test]
    fn malformed_results() {
        assert!(Response::decode(b"IST 001 PE ten 9.8 IO 500 A").is_err());
        assert!(Response::decode(b"IST 001 PE 10.0 9.8 OK 500 A").is_err());
        assert!(Response::decode(b"IST 001 XYZ 1 2 IO 3 A").is_err());
        assert!(Response::decode(b"IST 001 PE 10.0").is_err());
        assert!(Response::decode(b"IST F_x").is_err());
    }

    #[test]
    fn unknown_prefix_is_ignored() {
        let values = actual("ZZ_1 F_0 END");
        assert!(values.completed);
    }

    #[test]
    fn interim_values() {
        let Response::InterimActualValues(interim) =
            Response::decode(b"SAMP 002 1500 1498 V 0.7 mA x0A").unwrap()
        else {
            panic!("expected interim values");
        };
        assert_eq!(interim.step, 2);
        assert_eq!(interim.elapsed_ms, 1500);
        assert_eq!(interim.value2.unit, "mA");
        assert_eq!(interim.message_counter, Some(10));

        assert!(Response::decode(b"SAMP 002 1500 1498 V").is_err());
    }

    #[test]
    fn device_options_and_order_demand() {
        let Response::DeviceOptions(options) = Response::decode(b"OPT PE ISO FCT HV").unwrap() else {
            panic!("expected device options");
        };
        assert!(options.has("hv"));
        assert!(Response::decode(b"OPT").is_err());

        let Response::OrderDataDemand(demand) = Response::decode(b"AUF Order*no").unwrap() else {
            panic!("expected order data demand");
        };
        assert_eq!(demand.order_data, vec!["Order no".to_string()]);
        assert!(Response::decode(b"AUF ").is_err());
    }

    #[test]
    fn type_token_is_optional() {
        let values = ActualValuesResponse::decode(b"001 PE 10.0 9.8 IO 500 A").unwrap();
        assert_eq!(values.results.len(), 1);
        assert!(values.passed());
        assert!(!values.self_test);

        let values = ActualValuesResponse::decode(b"SEL F_0 END").unwrap();
        assert!(values.self_test);
        assert!(values.completed);

        let Response::ActualValues(values) = Response::decode(b"001 PE 10.0 9.8 IO 500 A").unwrap()
        else {
            panic!("expected actual values");
        };
        assert_eq!(values.results[0].step(), 1);
        assert_eq!(Response::decode(b"F_3").unwrap().fault_status(), 3);

        let interim = InterimActualValuesResponse::decode(b"002 1500 1498 V 0.7 mA").unwrap();
        assert_eq!(interim.value1.unit, "V");
        assert!(interim.message_counter.is_none());
        assert_eq!(
            InterimActualValuesResponse::decode(b"SAMP 002 1500 1498 V 0.7 mA x0A")
                .unwrap()
                .message_counter,
            Some(10)
        );
        assert!(InterimActualValuesResponse::decode(b"002 1500").is_err());

        assert!(DeviceOptionsResponse::decode(b"PE ISO").unwrap().has("iso"));
        assert!(DeviceOptionsResponse::decode(b"OPT HV").unwrap().has("hv"));
        assert!(DeviceOptionsResponse::decode(b"OPT ").is_err());

        let demand = OrderDataDemandResponse::decode(b"Order*no").unwrap();
        assert_eq!(demand.order_data, vec!["Order no".to_string()]);
        assert!(OrderDataDemandResponse::decode(b"AUF").is_err());
    }

    #[test]
    fn message_counter_is_two_hex_digits() {
        assert_eq!(message_counter("x1F"), Some(0x1F));
        assert_eq!(message_counter("xff"), Some(0xFF));
        assert_eq!(message_counter("x+F"), None);
        assert_eq!(message_counter("x-1"), None);
        assert_eq!(message_counter("x1"), None);
        assert_eq!(message_counter("X1F"), None);

        let values = actual("x+F F_0 END");
        assert!(values.message_counter.is_none());
    }

    #[test]
    fn unknown_type() {
        assert!(matches!(Response::decode(b"XYZ 1"), Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn decode_frame_checks_checksum() {
        let mut bytes = frame(1, DATA_MARKER, b"IST F_3 ");
        assert_eq!(Response::decode_frame(&bytes).unwrap().fault_status(), 3);

        bytes[4] ^= 0x01;
        assert!(matches!(
            Response::decode_frame(&bytes),
            Err(Error::InvalidChecksum { .. })
        ));
    }
}
