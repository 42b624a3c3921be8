//! Firmware image model and Intel HEX decoding.
//!
//! An upload always operates on a [`BinaryImage`]: a flat byte buffer with
//! no holes. Compiled artifacts arrive either as raw binary or as Intel
//! HEX text; the decoder in this module flattens the latter.
//!
//! ## Intel HEX record layout
//!
//! ```text
//! :llaaaattdd....dddcc
//!  |  |   |  |       |
//!  |  |   |  data    checksum (two's complement of byte sum)
//!  |  |   record type (00=data, 01=EOF, 04=extended linear address)
//!  |  16-bit load address (big-endian)
//!  byte count of the data field
//! ```
//!
//! Gaps between records are filled with `0xFF`, the erased state of flash.
//! A zero fill would be wrong: `0x00` is a valid AVR opcode byte and the
//! MCU would happily execute it.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{DecodeError, Error, Result};

/// Data record.
const RECORD_DATA: u8 = 0x00;
/// End-of-file record; decoding stops here.
const RECORD_EOF: u8 = 0x01;
/// Extended linear address record; sets the upper 16 address bits.
const RECORD_EXT_LINEAR_ADDR: u8 = 0x04;

/// Fill value for unwritten positions (erased flash).
pub const FILL_BYTE: u8 = 0xFF;

/// Upper bound on decoded image addresses: 16 MiB.
///
/// No supported part comes anywhere near this; addresses beyond it mean a
/// corrupt extended address record.
pub const MAX_IMAGE_BYTES: u32 = 16 * 1024 * 1024;

/// Flat firmware image ready for paged programming.
///
/// Invariant: every address in `0..len()` holds a defined byte; gaps in
/// the source records have already been filled with [`FILL_BYTE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    data: Vec<u8>,
}

impl BinaryImage {
    /// Wrap an already-flat binary buffer.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Decode Intel HEX text into a flat image.
    pub fn from_hex(text: &str) -> Result<Self> {
        let mut data: Vec<u8> = Vec::new();
        let mut base_address: u32 = 0;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let record = parse_record(line, line_no)?;
            match record.kind {
                RECORD_DATA => {
                    write_record(&mut data, base_address, &record)?;
                }
                RECORD_EXT_LINEAR_ADDR => {
                    if record.data.len() != 2 {
                        return Err(malformed(
                            line_no,
                            format!(
                                "extended address record carries {} bytes, expected 2",
                                record.data.len()
                            ),
                        ));
                    }
                    base_address = u32::from(u16::from_be_bytes([record.data[0], record.data[1]]))
                        << 16;
                }
                RECORD_EOF => break,
                // Other record types (segment addresses, start vectors)
                // carry nothing we need for flat flash images.
                _ => {}
            }
        }

        if data.is_empty() {
            return Err(Error::Decode(DecodeError::EmptyInput));
        }

        debug!("decoded {} bytes of Intel HEX", data.len());
        Ok(Self { data })
    }

    /// Decode an Intel HEX file from disk.
    pub fn from_hex_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_hex(&text)
    }

    /// Image length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The flat image contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Iterate over page-sized chunks as `(byte_offset, page)` pairs.
    ///
    /// The final chunk may be shorter than `page_size`.
    pub fn pages(&self, page_size: usize) -> impl Iterator<Item = (usize, &[u8])> + '_ {
        self.data
            .chunks(page_size)
            .enumerate()
            .map(move |(i, chunk)| (i * page_size, chunk))
    }
}

/// One parsed record: type, 16-bit load address, payload.
struct HexRecord {
    kind: u8,
    address: u16,
    data: Vec<u8>,
}

fn malformed(line: usize, reason: String) -> Error {
    Error::Decode(DecodeError::MalformedRecord { line, reason })
}

/// Parse and checksum-verify one `:`-prefixed record line.
fn parse_record(line: &str, line_no: usize) -> Result<HexRecord> {
    if !line.starts_with(':') {
        return Err(malformed(line_no, "missing ':' start code".to_string()));
    }
    if !line.is_ascii() {
        return Err(malformed(line_no, "non-ASCII characters".to_string()));
    }

    let hex = &line[1..];
    if hex.len() % 2 != 0 {
        return Err(malformed(line_no, "odd number of hex digits".to_string()));
    }
    // count(1) + address(2) + type(1) + checksum(1)
    if hex.len() < 10 {
        return Err(malformed(line_no, "record too short".to_string()));
    }

    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        let byte = u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| malformed(line_no, format!("invalid hex digits {:?}", &hex[i..i + 2])))?;
        bytes.push(byte);
    }

    let count = usize::from(bytes[0]);
    if bytes.len() != count + 5 {
        return Err(malformed(
            line_no,
            format!(
                "byte count {} does not match {} data bytes",
                count,
                bytes.len() - 5
            ),
        ));
    }

    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        let stated = bytes[bytes.len() - 1];
        let expected = stated.wrapping_sub(sum);
        return Err(malformed(
            line_no,
            format!("checksum mismatch (expected {expected:#04x}, got {stated:#04x})"),
        ));
    }

    Ok(HexRecord {
        kind: bytes[3],
        address: u16::from_be_bytes([bytes[1], bytes[2]]),
        data: bytes[4..4 + count].to_vec(),
    })
}

/// Copy a data record into the image, extending with fill bytes as needed.
#[allow(clippy::cast_possible_truncation)] // addresses are bounded by MAX_IMAGE_BYTES
fn write_record(data: &mut Vec<u8>, base_address: u32, record: &HexRecord) -> Result<()> {
    let start = u64::from(base_address) + u64::from(record.address);
    let end = start + record.data.len() as u64;
    if end > u64::from(MAX_IMAGE_BYTES) {
        return Err(Error::Decode(DecodeError::AddressOverflow {
            address: start as u32,
        }));
    }

    let (start, end) = (start as usize, end as usize);
    if end > data.len() {
        data.resize(end, FILL_BYTE);
    }
    data[start..end].copy_from_slice(&record.data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// Encode a byte slice as Intel HEX, 16 bytes per data record.
    ///
    /// `ext_base` emits a leading type-04 record so tests can cover the
    /// extended linear address path.
    fn encode_hex(data: &[u8], ext_base: Option<u16>) -> String {
        let mut out = String::new();
        if let Some(base) = ext_base {
            let payload = base.to_be_bytes();
            out.push_str(&encode_record(0, RECORD_EXT_LINEAR_ADDR, &payload));
        }
        for (i, chunk) in data.chunks(16).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let addr = (i * 16) as u16;
            out.push_str(&encode_record(addr, RECORD_DATA, chunk));
        }
        out.push_str(&encode_record(0, RECORD_EOF, &[]));
        out
    }

    fn encode_record(addr: u16, kind: u8, data: &[u8]) -> String {
        #[allow(clippy::cast_possible_truncation)]
        let mut bytes = vec![data.len() as u8, (addr >> 8) as u8, (addr & 0xFF) as u8, kind];
        bytes.extend_from_slice(data);
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        bytes.push(sum.wrapping_neg());

        let mut line = String::from(":");
        for b in &bytes {
            line.push_str(&format!("{b:02X}"));
        }
        line.push('\n');
        line
    }

    #[test]
    fn test_round_trip_simple() {
        let original: Vec<u8> = (0..=255).collect();
        let hex = encode_hex(&original, None);
        let image = BinaryImage::from_hex(&hex).unwrap();
        assert_eq!(image.as_bytes(), original.as_slice());
    }

    #[test]
    fn test_round_trip_with_extended_address() {
        let original: Vec<u8> = vec![0xDE, 0xAD, 0xBE, 0xEF];
        // Base 0x0001_0000: image is 64 KiB of fill, then the data.
        let hex = encode_hex(&original, Some(0x0001));
        let image = BinaryImage::from_hex(&hex).unwrap();
        assert_eq!(image.len(), 0x1_0000 + original.len());
        assert!(image.as_bytes()[..0x1_0000].iter().all(|&b| b == FILL_BYTE));
        assert_eq!(&image.as_bytes()[0x1_0000..], original.as_slice());
    }

    #[test]
    fn test_gaps_filled_with_ff() {
        // Two records with a hole from 0x04 to 0x10.
        let hex = ":0400000001020304F2\n:0400100011121314A2\n:00000001FF\n";
        let image = BinaryImage::from_hex(hex).unwrap();
        assert_eq!(image.len(), 0x14);
        assert_eq!(&image.as_bytes()[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert!(image.as_bytes()[4..0x10].iter().all(|&b| b == FILL_BYTE));
        assert_eq!(&image.as_bytes()[0x10..], &[0x11, 0x12, 0x13, 0x14]);
    }

    #[test]
    fn test_records_after_eof_ignored() {
        let hex = ":0100000042BD\n:00000001FF\n:01000100AA54\n";
        let image = BinaryImage::from_hex(hex).unwrap();
        assert_eq!(image.as_bytes(), &[0x42]);
    }

    #[test]
    fn test_unknown_record_types_skipped() {
        // Type 05 (start linear address) between two data records.
        let hex = ":0100000042BD\n:0400000500000100F6\n:0100010043BB\n:00000001FF\n";
        let image = BinaryImage::from_hex(hex).unwrap();
        assert_eq!(image.as_bytes(), &[0x42, 0x43]);
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = BinaryImage::from_hex("").unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::EmptyInput)));

        // EOF alone decodes nothing either.
        let err = BinaryImage::from_hex(":00000001FF\n").unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::EmptyInput)));
    }

    #[test]
    fn test_byte_count_mismatch_rejected() {
        // Count says 4, only 2 data bytes present.
        let hex = ":040000001122C9\n";
        let err = BinaryImage::from_hex(hex).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::MalformedRecord { line: 1, .. })
        ));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        // Valid record is :0100000042BD; corrupt the checksum.
        let hex = ":0100000042BE\n";
        let err = BinaryImage::from_hex(hex).unwrap_err();
        match err {
            Error::Decode(DecodeError::MalformedRecord { line, reason }) => {
                assert_eq!(line, 1);
                assert!(reason.contains("checksum"), "unexpected reason: {reason}");
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_start_code_rejected() {
        let err = BinaryImage::from_hex("0100000042BD\n").unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_address_overflow_rejected() {
        // Base 0x0100_0000 is exactly the 16 MiB bound.
        let hex = ":020000040100F9\n:0100000042BD\n:00000001FF\n";
        let err = BinaryImage::from_hex(hex).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::AddressOverflow { address: 0x0100_0000 })
        ));
    }

    #[test]
    fn test_from_hex_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b":0100000042BD\n:00000001FF\n").unwrap();
        let image = BinaryImage::from_hex_file(file.path()).unwrap();
        assert_eq!(image.as_bytes(), &[0x42]);
    }

    #[test]
    fn test_pages_chunking() {
        let image = BinaryImage::from_bytes(vec![0xAB; 300]);
        let pages: Vec<(usize, usize)> =
            image.pages(128).map(|(off, p)| (off, p.len())).collect();
        assert_eq!(pages, vec![(0, 128), (128, 128), (256, 44)]);
    }
}
