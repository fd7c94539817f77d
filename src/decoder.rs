//! Packet decoder. Turns a raw addressed byte buffer plus a [MessageLayout]
//! into a typed [DiagnosticPacket]

use crate::{
    dtc::DTC,
    lamp::{LampStatus, LampVector},
    layout::{BodyLayout, DTC_WIDTH, FieldDef, FieldKind, GroupLayout, LAMP_WIDTH, MessageLayout, Pgn, TrailingBytes},
};

/// Decoder result
pub type DecodeResult<T> = Result<T, DecodeError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
/// Reasons a payload does not fit its layout. Every variant means the packet is malformed
pub enum DecodeError {
    /// Payload is shorter than the fixed header
    #[error("{pgn} payload of {len} bytes is shorter than its {header} byte header")]
    TooShort {
        /// Message kind
        pgn: Pgn,
        /// Received payload length
        len: usize,
        /// Declared header length
        header: usize,
    },
    /// Leftover bytes after the last complete record, with [TrailingBytes::Reject]
    #[error("{pgn} payload has {leftover} trailing bytes after {records} complete {width} byte records")]
    TrailingBytes {
        /// Message kind
        pgn: Pgn,
        /// Number of leftover bytes
        leftover: usize,
        /// Complete records decoded before the leftover
        records: usize,
        /// Record width
        width: usize,
    },
    /// A field in the layout is not 1 to 4 bytes wide
    #[error("{pgn} field '{name}' has unsupported width {width}")]
    UnsupportedWidth {
        /// Message kind
        pgn: Pgn,
        /// Field name
        name: String,
        /// Declared width
        width: usize,
    },
    /// A repeated group in the layout has no width
    #[error("{pgn} group '{name}' has zero width")]
    EmptyGroup {
        /// Message kind
        pgn: Pgn,
        /// Group name
        name: String,
    },
}

/// Interpretation of a decoded field
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// `raw * scale`, in the layout's unit
    Scaled {
        /// Engineering value
        value: f64,
        /// Engineering unit
        unit: String,
    },
    /// Name of an enumerated value
    Label(String),
    /// The field was sent as all `0xFF`
    NotAvailable,
}

/// A decoded field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// Field name from the layout
    pub name: String,
    /// Raw little-endian value
    pub raw: u32,
    /// Interpreted value
    pub reading: Reading,
}

impl FieldValue {
    /// Engineering value of a scaled field, None for labels and not-available values
    pub fn value(&self) -> Option<f64> {
        match &self.reading {
            Reading::Scaled { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// One decoded instance of a repeated [GroupLayout]
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGroup {
    /// Name of the group's label field value, or the group name
    pub label: String,
    /// Decoded fields in wire order
    pub values: Vec<FieldValue>,
}

impl FieldGroup {
    /// Engineering value of the named field
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|v| v.name == name).and_then(FieldValue::value)
    }
}

/// A decoded response from a single module. Immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticPacket {
    pgn: Pgn,
    source: u8,
    lamps: Option<LampVector>,
    header: Vec<FieldValue>,
    dtcs: Vec<DTC>,
    groups: Vec<FieldGroup>,
    raw: Vec<u8>,
}

impl DiagnosticPacket {
    /// Message kind of the packet
    pub fn pgn(&self) -> Pgn {
        self.pgn
    }

    /// Source address of the reporting module
    pub fn source(&self) -> u8 {
        self.source
    }

    /// Lamp header, if the layout has one
    pub fn lamps(&self) -> Option<&LampVector> {
        self.lamps.as_ref()
    }

    /// MIL status, if the layout has a lamp header
    pub fn mil(&self) -> Option<LampStatus> {
        self.lamps.map(|l| l.mil())
    }

    /// Fixed header fields
    pub fn header(&self) -> &[FieldValue] {
        &self.header
    }

    /// Engineering value of the named header field
    pub fn header_value(&self, name: &str) -> Option<f64> {
        self.header.iter().find(|v| v.name == name).and_then(FieldValue::value)
    }

    /// Reported DTCs, without "no DTC" fillers
    pub fn dtcs(&self) -> &[DTC] {
        &self.dtcs
    }

    /// Returns true if a DTC with the same SPN and FMI is reported
    pub fn has_dtc(&self, dtc: &DTC) -> bool {
        self.dtcs.contains(dtc)
    }

    /// Decoded repeated groups
    pub fn groups(&self) -> &[FieldGroup] {
        &self.groups
    }

    /// Payload the packet was decoded from
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

fn read_le(bytes: &[u8]) -> u32 {
    bytes.iter().rev().fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

fn decode_field(field: &FieldDef, bytes: &[u8]) -> FieldValue {
    let raw = read_le(bytes);
    let reading = if bytes.iter().all(|b| *b == 0xFF) {
        Reading::NotAvailable
    } else {
        match &field.kind {
            FieldKind::Scaled { scale, unit } => Reading::Scaled {
                value: raw as f64 * *scale,
                unit: unit.clone(),
            },
            FieldKind::Label { names } => Reading::Label(
                names
                    .iter()
                    .find(|(k, _)| *k == raw)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| format!("{} {raw}", field.name)),
            ),
        }
    };
    FieldValue {
        name: field.name.clone(),
        raw,
        reading,
    }
}

fn decode_group(group: &GroupLayout, bytes: &[u8]) -> FieldGroup {
    let mut pos = 0;
    let mut values = Vec::with_capacity(group.fields.len());
    for field in &group.fields {
        values.push(decode_field(field, &bytes[pos..pos + field.width]));
        pos += field.width;
    }
    let label = values
        .iter()
        .find_map(|v| match &v.reading {
            Reading::Label(l) => Some(l.clone()),
            _ => None,
        })
        .unwrap_or_else(|| group.name.clone());
    FieldGroup { label, values }
}

fn validate(layout: &MessageLayout) -> DecodeResult<()> {
    if let Some(f) = layout.fields().find(|f| f.width == 0 || f.width > 4) {
        return Err(DecodeError::UnsupportedWidth {
            pgn: layout.pgn,
            name: f.name.clone(),
            width: f.width,
        });
    }
    if let BodyLayout::Groups(g) = &layout.body {
        if g.width() == 0 {
            return Err(DecodeError::EmptyGroup {
                pgn: layout.pgn,
                name: g.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_trailing(layout: &MessageLayout, leftover: usize, records: usize, width: usize) -> DecodeResult<()> {
    if leftover != 0 && layout.trailing == TrailingBytes::Reject {
        return Err(DecodeError::TrailingBytes {
            pgn: layout.pgn,
            leftover,
            records,
            width,
        });
    }
    if leftover != 0 {
        log::debug!("{}: discarding {leftover} padding bytes", layout.pgn);
    }
    Ok(())
}

/// Decodes a payload received from `source` according to `layout`.
///
/// Nothing is returned unless the whole payload fits the layout, so a failed
/// decode never leaves a partially filled packet behind.
pub fn decode(source: u8, data: &[u8], layout: &MessageLayout) -> DecodeResult<DiagnosticPacket> {
    validate(layout)?;
    let header_len = layout.header_len();
    if data.len() < header_len {
        return Err(DecodeError::TooShort {
            pgn: layout.pgn,
            len: data.len(),
            header: header_len,
        });
    }

    let mut pos = 0;
    let lamps = if layout.lamps {
        pos = LAMP_WIDTH;
        Some(LampVector::from_bytes(data[0], data[1]))
    } else {
        None
    };

    let mut header = Vec::with_capacity(layout.header.len());
    for field in &layout.header {
        header.push(decode_field(field, &data[pos..pos + field.width]));
        pos += field.width;
    }

    let body = &data[header_len..];
    let mut dtcs = Vec::new();
    let mut groups = Vec::new();
    match &layout.body {
        BodyLayout::None => check_trailing(layout, body.len(), 0, 0)?,
        BodyLayout::Dtcs => {
            let chunks = body.chunks_exact(DTC_WIDTH);
            check_trailing(layout, chunks.remainder().len(), chunks.len(), DTC_WIDTH)?;
            for chunk in chunks {
                if DTC::is_placeholder(chunk) {
                    continue;
                }
                dtcs.push(DTC::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
        BodyLayout::Groups(group) => {
            let width = group.width();
            let chunks = body.chunks_exact(width);
            check_trailing(layout, chunks.remainder().len(), chunks.len(), width)?;
            groups.extend(chunks.map(|chunk| decode_group(group, chunk)));
        }
    }

    Ok(DiagnosticPacket {
        pgn: layout.pgn,
        source,
        lamps,
        header,
        dtcs,
        groups,
        raw: data.to_vec(),
    })
}
