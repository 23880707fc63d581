use serde::Serialize;
use serde_json::ser::Formatter;
use sha2::{Digest, Sha256};
use std::io;

use crate::messaging::envelope::Payload;

/// Serializes JSON in the canonical form that payload checksums are computed over: keys sorted
///  (serde_json's default map is ordered), `", "` and `": "` as separators, non-ASCII escaped
///  as `\uXXXX`, and floats in the shortest round-trip form with exponent notation outside
///  `[1e-4, 1e16)`.
///
/// This is byte-for-byte what the legacy nodes of the network produce, so checksums agree
///  regardless of which implementation sealed a payload.
pub fn to_canonical_vec<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// hex encoded SHA-256 of the payload's canonical form
pub fn payload_checksum(payload: &Payload) -> serde_json::Result<String> {
    let canonical = to_canonical_vec(payload)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        }
        else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        }
        else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        writer.write_all(float_repr(value).as_bytes())
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }

        let mut utf16 = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            }
            else {
                for unit in ch.encode_utf16(&mut utf16) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

fn float_repr(value: f64) -> String {
    let abs = value.abs();
    if abs == 0.0 || (1e-4..1e16).contains(&abs) {
        let fixed = format!("{}", value);
        if fixed.contains('.') {
            fixed
        }
        else {
            format!("{}.0", fixed)
        }
    }
    else {
        let sci = format!("{:e}", value);
        match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let exp: i32 = exp.parse().unwrap_or_default();
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            None => sci,
        }
    }
}
