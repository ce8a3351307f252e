//! JSON encoding compatible with the established wire format.
//!
//! Callers of the host compare response lines byte for byte, and those lines
//! have always used `", "` between items, `": "` between keys and values, and
//! `\uXXXX` escapes for every non-ASCII character. [`CompatFormatter`] plugs
//! those rules into `serde_json` so that both the outer response objects and
//! the double-encoded `Data` strings follow them.

use std::io;

use serde::Serialize;
use serde::ser::Error as _;
use serde_json::Serializer;
use serde_json::ser::Formatter;

/// `serde_json` formatter producing spaced separators and ASCII-only output.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompatFormatter;

impl Formatter for CompatFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut rest = fragment;
        while let Some(index) = rest.find(|ch: char| !ch.is_ascii()) {
            let (ascii, tail) = rest.split_at(index);
            writer.write_all(ascii.as_bytes())?;
            let mut chars = tail.chars();
            if let Some(ch) = chars.next() {
                write_unicode_escape(writer, ch)?;
            }
            rest = chars.as_str();
        }
        writer.write_all(rest.as_bytes())
    }
}

/// Writes `ch` as one or two (surrogate pair) `\uXXXX` escapes.
fn write_unicode_escape<W>(writer: &mut W, ch: char) -> io::Result<()>
where
    W: ?Sized + io::Write,
{
    let mut units = [0_u16; 2];
    for unit in ch.encode_utf16(&mut units) {
        write!(writer, "\\u{unit:04x}")?;
    }
    Ok(())
}

/// Serialises `value` to the given writer using [`CompatFormatter`].
///
/// # Errors
///
/// Returns an error if serialisation or writing fails.
pub fn to_compat_writer<W, T>(writer: W, value: &T) -> serde_json::Result<()>
where
    W: io::Write,
    T: ?Sized + Serialize,
{
    let mut serializer = Serializer::with_formatter(writer, CompatFormatter);
    value.serialize(&mut serializer)
}

/// Serialises `value` to a string using [`CompatFormatter`].
///
/// # Example
///
/// ```
/// use lifecycle_host::protocol::encoding::to_compat_string;
///
/// let encoded = to_compat_string(&serde_json::json!({"x": 1, "name": "é"}))
///     .expect("value should encode");
/// assert_eq!(encoded, r#"{"x": 1, "name": "\u00e9"}"#);
/// ```
///
/// # Errors
///
/// Returns an error if serialisation fails.
pub fn to_compat_string<T>(value: &T) -> serde_json::Result<String>
where
    T: ?Sized + Serialize,
{
    let mut buffer = Vec::new();
    to_compat_writer(&mut buffer, value)?;
    String::from_utf8(buffer).map_err(serde_json::Error::custom)
}
