//! GLP2 frame encoder/decoder.
//!
//! The tester speaks a half-duplex, master/slave protocol over a serial
//! line. Requests carry a short ASCII data string wrapped in a checksummed
//! frame; the tester answers either with a single control byte or with a
//! frame of the same shape.
//!
//! # Frame format
//!
//! ```text
//! STX <128+addr> <marker> <payload>... <chk_hi> <chk_lo> ETX
//! ```
//!
//! - `STX` / `ETX`: `0x02` / `0x03`
//! - `128+addr`: tester address with the high bit set (wrapping in a byte)
//! - `marker`: [`DATA_MARKER`] in front of every data string
//! - `chk_hi chk_lo`: XOR of every preceding byte (STX included) as two
//!   upper-case ASCII hex digits
//!
//! Control replies ([`ACK`], [`NAK`], [`BEL`]) are a single byte and carry
//! no checksum.

use bytes::{BufMut, BytesMut};
use glp2_core::{Error, Result};

/// Start of a frame.
pub const STX: u8 = 0x02;

/// End of a frame.
pub const ETX: u8 = 0x03;

/// Positive acknowledgement.
pub const ACK: u8 = 0x06;

/// Tester busy: a test is running or a black-box test is pending.
pub const BEL: u8 = 0x07;

/// Negative acknowledgement. In reply to a data string it means the
/// checksum was rejected; in reply to an actual-values query it means no
/// values are pending.
pub const NAK: u8 = 0x15;

/// Marker byte preceding a data string.
pub const DATA_MARKER: u8 = 0x20;

/// Smallest well-formed frame: `STX addr marker chk chk ETX`.
pub const MIN_FRAME_LEN: usize = 6;

/// Longest text field the tester stores (labels, program names).
pub const MAX_TEXT_LEN: usize = 32;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Address byte for `address` as it appears on the wire.
pub fn wire_address(address: u8) -> u8 {
    address.wrapping_add(128)
}

/// Compute the two ASCII checksum digits over `bytes`.
///
/// # Example
///
/// ```
/// use glp2::frame::checksum;
///
/// assert_eq!(&checksum(&[0x02, 0x81, 0x20, b'T', b'S', b' ']), b"84");
/// ```
pub fn checksum(bytes: &[u8]) -> [u8; 2] {
    let xor = bytes.iter().fold(0u8, |acc, &b| acc ^ b);
    [
        HEX_DIGITS[(xor >> 4) as usize],
        HEX_DIGITS[(xor & 0x0F) as usize],
    ]
}

/// Encode a frame around `payload`.
pub fn frame(address: u8, marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(payload.len() + MIN_FRAME_LEN);
    buf.put_u8(STX);
    buf.put_u8(wire_address(address));
    buf.put_u8(marker);
    buf.put_slice(payload);
    let chk = checksum(&buf);
    buf.put_slice(&chk);
    buf.put_u8(ETX);
    buf.to_vec()
}

/// Encode a data string request.
///
/// The tester expects every data string to end in a space; one is appended
/// when `text` does not already have it.
///
/// # Example
///
/// ```
/// use glp2::frame::frame_data_string;
///
/// let bytes = frame_data_string(1, "TS");
/// assert_eq!(bytes, vec![0x02, 0x81, 0x20, b'T', b'S', b' ', b'8', b'4', 0x03]);
/// ```
pub fn frame_data_string(address: u8, text: &str) -> Vec<u8> {
    if text.ends_with(' ') {
        frame(address, DATA_MARKER, text.as_bytes())
    } else {
        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.extend_from_slice(text.as_bytes());
        payload.push(b' ');
        frame(address, DATA_MARKER, &payload)
    }
}

/// Check the embedded checksum of a complete frame.
pub fn verify_checksum(frame: &[u8]) -> Result<()> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(Error::InvalidResponse(format!(
            "frame too short ({} bytes): {}",
            frame.len(),
            pretty(frame)
        )));
    }
    let body = frame.len() - 3;
    let expected = checksum(&frame[..body]);
    let received = &frame[body..body + 2];
    if received != expected {
        return Err(Error::InvalidChecksum {
            expected: String::from_utf8_lossy(&expected).into_owned(),
            received: String::from_utf8_lossy(received).into_owned(),
            frame: pretty(frame),
        });
    }
    Ok(())
}

/// Returns `true` for bytes that form a complete reply on their own.
pub fn is_control_reply(byte: u8) -> bool {
    matches!(byte, ACK | NAK | BEL)
}

/// The bytes between the marker and the checksum of a complete frame.
pub fn payload(frame: &[u8]) -> &[u8] {
    if frame.len() < MIN_FRAME_LEN {
        return &[];
    }
    &frame[3..frame.len() - 3]
}

/// Render bytes for logs and error messages.
///
/// Printable ASCII is shown as-is, control bytes by name, anything else as
/// `<XX>` hex.
///
/// ```
/// use glp2::frame::{frame_data_string, pretty};
///
/// assert_eq!(pretty(&frame_data_string(1, "IW")), "<STX><81> IW 9D<ETX>");
/// ```
pub fn pretty(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        match b {
            STX => out.push_str("<STX>"),
            ETX => out.push_str("<ETX>"),
            ACK => out.push_str("<ACK>"),
            BEL => out.push_str("<BEL>"),
            NAK => out.push_str("<NAK>"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("<{b:02X}>")),
        }
    }
    out
}

/// Result of scanning a receive buffer for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// The buffer does not yet hold a complete reply.
    Incomplete,

    /// The buffer starts with a single-byte control reply.
    Control(u8),

    /// The whole buffer is one complete frame.
    Frame,

    /// Leading bytes that cannot start a reply. The `usize` is the number of
    /// bytes to discard.
    Noise(usize),
}

/// Inspect a receive buffer.
///
/// A frame is complete only once the buffer ends in [`ETX`] and is at least
/// [`MIN_FRAME_LEN`] long (the address byte can itself be `0x03`).
pub fn scan(buf: &[u8]) -> Scan {
    match buf.first() {
        None => Scan::Incomplete,
        Some(&b) if is_control_reply(b) => Scan::Control(b),
        Some(&STX) => {
            if buf.len() >= MIN_FRAME_LEN && buf.last() == Some(&ETX) {
                Scan::Frame
            } else {
                Scan::Incomplete
            }
        }
        Some(_) => {
            let skip = buf
                .iter()
                .position(|&b| b == STX || is_control_reply(b))
                .unwrap_or(buf.len());
            Scan::Noise(skip)
        }
    }
}

// ---------------------------------------------------------------
// Text fields
// ---------------------------------------------------------------

const FOLDS: &[(&str, char)] = &[
    ("àáâãäåā", 'a'),
    ("ÀÁÂÃÄÅĀ", 'A'),
    ("çćč", 'c'),
    ("ÇĆČ", 'C'),
    ("ďđ", 'd'),
    ("ĎĐ", 'D'),
    ("èéêëēěę", 'e'),
    ("ÈÉÊËĒĚĘ", 'E'),
    ("ìíîïī", 'i'),
    ("ÌÍÎÏĪ", 'I'),
    ("łľ", 'l'),
    ("ŁĽ", 'L'),
    ("ñńň", 'n'),
    ("ÑŃŇ", 'N'),
    ("òóôõöøō", 'o'),
    ("ÒÓÔÕÖØŌ", 'O'),
    ("řŕ", 'r'),
    ("ŘŔ", 'R'),
    ("śšşß", 's'),
    ("ŚŠŞ", 'S'),
    ("ťţ", 't'),
    ("ŤŢ", 'T'),
    ("ùúûüūů", 'u'),
    ("ÙÚÛÜŪŮ", 'U'),
    ("ýÿ", 'y'),
    ("Ý", 'Y'),
    ("źżž", 'z'),
    ("ŹŻŽ", 'Z'),
];

fn fold(c: char) -> char {
    if c.is_ascii() {
        return if c.is_ascii_control() { '?' } else { c };
    }
    FOLDS
        .iter()
        .find(|(from, _)| from.contains(c))
        .map_or('?', |&(_, to)| to)
}

/// Encode a free-text field (label, program name) for a data string.
///
/// The text is trimmed, accented Latin letters are folded to ASCII, any
/// other non-ASCII or control character becomes `?`, spaces become `*` and
/// the result is cut to [`MAX_TEXT_LEN`] characters.
///
/// ```
/// use glp2::frame::encode_text;
///
/// assert_eq!(encode_text("  Prüfung Gerät 1 "), "Prufung*Gerat*1");
/// ```
pub fn encode_text(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| if c == ' ' { '*' } else { fold(c) })
        .take(MAX_TEXT_LEN)
        .collect()
}

/// Undo the space substitution of [`encode_text`].
pub fn decode_text(text: &str) -> String {
    text.replace('*', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Checksum
    // ---------------------------------------------------------------

    #[test]
    fn checksum_is_uppercase_and_padded() {
        assert_eq!(&checksum(&[]), b"00");
        assert_eq!(&checksum(&[0x0A]), b"0A");
        assert_eq!(&checksum(&[0xF0, 0x0F]), b"FF");
    }

    #[test]
    fn framed_data_string_verifies() {
        for text in ["TS", "IW", "SP_1_1_2_2_3_333_4_2", "PRG_Kettle*A_3"] {
            let bytes = frame_data_string(1, text);
            verify_checksum(&bytes).unwrap();
        }
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let original = frame_data_string(7, "SP_3_333");
        // Leave the checksum digits and ETX alone; flipping those is a
        // different kind of corruption.
        for i in 0..original.len() - 3 {
            for bit in 0..8 {
                let mut corrupted = original.clone();
                corrupted[i] ^= 1 << bit;
                assert!(
                    matches!(
                        verify_checksum(&corrupted),
                        Err(Error::InvalidChecksum { .. })
                    ),
                    "flip of bit {bit} in byte {i} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn checksum_mismatch_reports_both_values() {
        let mut bytes = frame_data_string(1, "TS");
        let n = bytes.len();
        bytes[n - 3] = b'0';
        bytes[n - 2] = b'0';
        match verify_checksum(&bytes) {
            Err(Error::InvalidChecksum {
                expected,
                received,
                frame,
            }) => {
                assert_eq!(expected, "84");
                assert_eq!(received, "00");
                assert!(frame.starts_with("<STX>"));
            }
            other => panic!("expected InvalidChecksum, got {other:?}"),
        }
    }

    #[test]
    fn short_frame_is_invalid_response() {
        assert!(matches!(
            verify_checksum(&[STX, 0x81, ETX]),
            Err(Error::InvalidResponse(_))
        ));
    }

    // ---------------------------------------------------------------
    // Framing
    // ---------------------------------------------------------------

    #[test]
    fn data_string_gets_trailing_space_once() {
        assert_eq!(frame_data_string(1, "TS"), frame_data_string(1, "TS "));
    }

    #[test]
    fn address_wraps_in_a_byte() {
        assert_eq!(wire_address(1), 0x81);
        assert_eq!(wire_address(127), 0xFF);
        assert_eq!(wire_address(128), 0x00);
        assert_eq!(wire_address(255), 0x7F);
    }

    #[test]
    fn payload_strips_envelope() {
        let bytes = frame(1, DATA_MARKER, b"OPT PE ");
        assert_eq!(payload(&bytes), b"OPT PE ");
        assert_eq!(payload(&[ACK]), b"");
    }

    #[test]
    fn pretty_names_control_bytes() {
        assert_eq!(pretty(&[ACK]), "<ACK>");
        assert_eq!(pretty(&[NAK, BEL, 0x81]), "<NAK><BEL><81>");
    }

    // ---------------------------------------------------------------
    // Scanning
    // ---------------------------------------------------------------

    #[test]
    fn scan_control_and_frames() {
        assert_eq!(scan(&[]), Scan::Incomplete);
        assert_eq!(scan(&[ACK]), Scan::Control(ACK));
        assert_eq!(scan(&[BEL]), Scan::Control(BEL));

        let bytes = frame(1, DATA_MARKER, b"IST END ");
        assert_eq!(scan(&bytes[..4]), Scan::Incomplete);
        assert_eq!(scan(&bytes), Scan::Frame);
    }

    #[test]
    fn scan_address_byte_equal_to_etx_is_not_an_end() {
        // Address 131 puts 0x03 in the address position.
        let bytes = frame(131, DATA_MARKER, b"IST ");
        assert_eq!(bytes[1], ETX);
        assert_eq!(scan(&bytes[..2]), Scan::Incomplete);
        assert_eq!(scan(&bytes), Scan::Frame);
    }

    #[test]
    fn scan_skips_leading_noise() {
        assert_eq!(scan(&[0xFF, 0x00, STX, 0x81]), Scan::Noise(2));
        assert_eq!(scan(&[b'x', b'y']), Scan::Noise(2));
    }

    // ---------------------------------------------------------------
    // Text fields
    // ---------------------------------------------------------------

    #[test]
    fn encode_text_folds_and_substitutes() {
        assert_eq!(encode_text("Größe"), "Grose");
        assert_eq!(encode_text("Café crème"), "Cafe*creme");
        assert_eq!(encode_text("温度"), "??");
        assert_eq!(encode_text("a\tb"), "a?b");
    }

    #[test]
    fn encode_text_truncates() {
        let long = "x".repeat(40);
        assert_eq!(encode_text(&long).len(), MAX_TEXT_LEN);
    }

    #[test]
    fn decode_text_restores_spaces() {
        assert_eq!(decode_text("Line*3*Station"), "Line 3 Station");
    }
}
