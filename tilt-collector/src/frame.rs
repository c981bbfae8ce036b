//! Station frame parsing.
//!
//! A station transmits one line per measurement cycle. The line carries two
//! sub-frames, inclinometer then pluviometer, joined by a `~~` separator:
//!
//! ```text
//! ~<binary header><ASCII values>~~<binary header><ASCII values>~\n
//! ```
//!
//! Each sub-frame opens with a fixed-width binary header (station type,
//! station number, network identifier at configured offsets) followed by an
//! ASCII section in which the numeric values appear as explicitly signed
//! decimals such as `+0098.2`. The ASCII section also contains label bytes
//! and, occasionally, line noise; extraction scans for the signed-decimal
//! shape instead of trusting the surrounding text.
//!
//! [`RawLineCodec`] does the transport-level line splitting; [`FrameDecoder`]
//! turns one raw line into a [`Reading`]. A frame either decodes completely
//! or is rejected; no partial readings are produced.

use std::io;
use std::sync::LazyLock;

use bytes::{Buf, Bytes, BytesMut};
use regex::Regex;
use thiserror::Error;
use tokio_util::codec::Decoder;

use crate::config::FrameLayout;
use crate::reading::{Inclinometer, Pluviometer, Reading};
use crate::station;

/// Frame and sub-frame boundary marker.
pub const FRAME_MARKER: u8 = b'~';

/// Separator between the inclinometer and pluviometer sub-frames.
pub const SUBFRAME_SEPARATOR: &[u8] = b"~~";

/// Longest line the codec will buffer before declaring the stream garbage.
pub const MAX_FRAME_LEN: usize = 512;

/// Number of ASCII values in the inclinometer sub-frame.
const INCL_FIELD_COUNT: usize = 4;

/// Number of ASCII values in the pluviometer sub-frame.
const PLUVIO_FIELD_COUNT: usize = 2;

/// Explicitly signed decimal, the only numeric shape stations emit.
static SIGNED_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-][0-9]+\.[0-9]+").expect("hard-coded pattern compiles"));

/// Why a raw line was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// The line does not have the marker/separator structure of a frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// A sub-frame carried the wrong number of ASCII values.
    #[error("{sensor} sub-frame has {found} values, expected {expected}")]
    FieldCountMismatch {
        sensor: &'static str,
        expected: usize,
        found: usize,
    },

    /// A structurally sound frame whose content could not be extracted.
    #[error("extraction failed: {0}")]
    Extraction(String),
}

/// Decodes raw station lines into readings.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    layout: FrameLayout,
}

impl FrameDecoder {
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout }
    }

    /// Decode one raw line into a [`Reading`].
    ///
    /// The input is the line as it came off the wire, including any trailing
    /// `\r\n`. Decoding is pure; the same bytes always produce the same
    /// result.
    pub fn decode(&self, raw: &[u8]) -> Result<Reading, DecodeError> {
        let line = trim_trailing_whitespace(raw);

        if line.first() != Some(&FRAME_MARKER) {
            return Err(DecodeError::MalformedFrame("missing start marker"));
        }
        if line.last() != Some(&FRAME_MARKER) {
            return Err(DecodeError::MalformedFrame("missing end marker"));
        }

        let body = &line[..line.len() - 1];
        let (incl_part, pluvio_part) = split_subframes(body)?;

        let station_type = header_byte(incl_part, self.layout.station_type_offset, "station type")?;
        let station_number =
            header_byte(incl_part, self.layout.station_number_offset, "station number")?;
        let network_id = header_byte(incl_part, self.layout.network_id_offset, "network id")?;

        let incl_values = scan_values(incl_part, self.layout.incl_ascii_offset, "inclinometer")?;
        if incl_values.len() != INCL_FIELD_COUNT {
            return Err(DecodeError::FieldCountMismatch {
                sensor: "inclinometer",
                expected: INCL_FIELD_COUNT,
                found: incl_values.len(),
            });
        }

        let pluvio_values = scan_values(pluvio_part, self.layout.pluvio_ascii_offset, "pluviometer")?;
        if pluvio_values.len() != PLUVIO_FIELD_COUNT {
            return Err(DecodeError::FieldCountMismatch {
                sensor: "pluviometer",
                expected: PLUVIO_FIELD_COUNT,
                found: pluvio_values.len(),
            });
        }

        Ok(Reading {
            station_type,
            station_number,
            network_id,
            station_name: station::station_name(station_number),
            inclinometer: Inclinometer {
                radial: incl_values[0],
                tangential: incl_values[1],
                temperature: incl_values[2],
                voltage: incl_values[3],
            },
            pluviometer: Pluviometer {
                rain_level: pluvio_values[0],
                voltage: pluvio_values[1],
            },
        })
    }
}

fn trim_trailing_whitespace(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && raw[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &raw[..end]
}

/// Split the frame body on the `~~` separator.
///
/// A valid frame has exactly one separator. The pluviometer sub-frame loses
/// its leading marker to the separator, so the returned second part starts
/// directly at its binary header.
fn split_subframes(body: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    let Some(pos) = body
        .windows(SUBFRAME_SEPARATOR.len())
        .position(|w| w == SUBFRAME_SEPARATOR)
    else {
        return Err(DecodeError::MalformedFrame("missing sub-frame separator"));
    };

    let (incl, rest) = body.split_at(pos);
    let pluvio = &rest[SUBFRAME_SEPARATOR.len()..];

    if pluvio
        .windows(SUBFRAME_SEPARATOR.len())
        .any(|w| w == SUBFRAME_SEPARATOR)
    {
        return Err(DecodeError::MalformedFrame("more than two sub-frames"));
    }
    if incl.is_empty() || pluvio.is_empty() {
        return Err(DecodeError::MalformedFrame("empty sub-frame"));
    }

    Ok((incl, pluvio))
}

fn header_byte(part: &[u8], offset: usize, field: &'static str) -> Result<u8, DecodeError> {
    part.get(offset)
        .copied()
        .ok_or_else(|| DecodeError::Extraction(format!("{field} offset {offset} past sub-frame end")))
}

/// Pull the signed-decimal values out of a sub-frame's ASCII section.
///
/// Non-ASCII bytes (binary header residue, line noise) are dropped before
/// matching so a stray high byte inside the payload cannot split a value.
fn scan_values(part: &[u8], ascii_offset: usize, sensor: &'static str) -> Result<Vec<f64>, DecodeError> {
    let payload = part.get(ascii_offset..).ok_or_else(|| {
        DecodeError::Extraction(format!("{sensor} ASCII offset {ascii_offset} past sub-frame end"))
    })?;

    let text: String = payload
        .iter()
        .filter(|b| b.is_ascii() && !b.is_ascii_control())
        .map(|&b| b as char)
        .collect();

    SIGNED_DECIMAL
        .find_iter(&text)
        .map(|m| {
            m.as_str()
                .parse::<f64>()
                .map_err(|e| DecodeError::Extraction(format!("{sensor} value {:?}: {e}", m.as_str())))
        })
        .collect()
}

/// Splits a raw byte stream into `\n`-terminated lines.
///
/// The yielded [`Bytes`] include the delimiter so the decoder sees the line
/// exactly as transmitted. A line that outgrows [`MAX_FRAME_LEN`] without a
/// delimiter is discarded up to the next `\n`; the stream then resumes
/// cleanly on the following line.
#[derive(Debug, Default)]
pub struct RawLineCodec {
    discarding: bool,
}

impl Decoder for RawLineCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            match src.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let line = src.split_to(pos + 1).freeze();
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    return Ok(Some(line));
                }
                None => {
                    if src.len() > MAX_FRAME_LEN {
                        src.advance(src.len());
                        self.discarding = true;
                    }
                    return Ok(None);
                }
            }
        }
    }
}
