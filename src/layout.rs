//! Field-layout definitions describing how each diagnostic message kind is packed.
//!
//! A [MessageLayout] is pure configuration: the decoder never hard-codes a message's
//! structure, it only walks the layout it is handed. The built-in layouts cover the
//! J1939-73 DM messages used during compliance testing, and further layouts can be
//! registered at runtime (or loaded from JSON with the `serde` feature).

use std::collections::HashMap;
use std::fmt;

/// Width of a single J1939-73 DTC record in bytes
pub const DTC_WIDTH: usize = 4;

/// Width of the lamp status header (lamp state byte + lamp flash byte)
pub const LAMP_WIDTH: usize = 2;

/// Parameter group number. Identifies the purpose and layout of a diagnostic message
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Pgn(pub u32);

impl Pgn {
    /// DM1 - Active diagnostic trouble codes
    pub const DM1: Pgn = Pgn(65226);
    /// DM2 - Previously active diagnostic trouble codes
    pub const DM2: Pgn = Pgn(65227);
    /// DM5 - Diagnostic readiness 1
    pub const DM5: Pgn = Pgn(65230);
    /// DM6 - Emission related pending DTCs
    pub const DM6: Pgn = Pgn(65231);
    /// DM12 - Emission related active DTCs
    pub const DM12: Pgn = Pgn(65236);
    /// DM23 - Emission related previously active DTCs
    pub const DM23: Pgn = Pgn(64949);
    /// DM28 - Permanent DTCs
    pub const DM28: Pgn = Pgn(64896);
    /// Green house gas lifetime active technology tracking
    pub const GHG_ACTIVE_TECH_LIFETIME: Pgn = Pgn(64257);

    /// Returns the short name of a well known PGN
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::DM1 => Some("DM1"),
            Self::DM2 => Some("DM2"),
            Self::DM5 => Some("DM5"),
            Self::DM6 => Some("DM6"),
            Self::DM12 => Some("DM12"),
            Self::DM23 => Some("DM23"),
            Self::DM28 => Some("DM28"),
            Self::GHG_ACTIVE_TECH_LIFETIME => Some("GHG Lifetime Active Technology"),
            _ => None,
        }
    }
}

impl fmt::Display for Pgn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "PGN {}", self.0),
        }
    }
}

/// How a single field's raw value is interpreted
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum FieldKind {
    /// Engineering value is `raw * scale`, in `unit`
    Scaled {
        /// Resolution per bit
        scale: f64,
        /// Engineering unit of the scaled value
        unit: String,
    },
    /// Raw value is an index into a name table
    Label {
        /// Known index to name mappings. Unknown indices are named by their number
        names: Vec<(u32, String)>,
    },
}

/// A single little-endian field of 1 to 4 bytes
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDef {
    /// Name of the field
    pub name: String,
    /// Width of the field in bytes
    pub width: usize,
    /// Interpretation of the raw value
    pub kind: FieldKind,
}

impl FieldDef {
    /// Creates a numeric field with a fixed resolution
    pub fn scaled<N: Into<String>, U: Into<String>>(name: N, width: usize, scale: f64, unit: U) -> Self {
        Self {
            name: name.into(),
            width,
            kind: FieldKind::Scaled {
                scale,
                unit: unit.into(),
            },
        }
    }

    /// Creates an enumerated field whose value names come from `names`
    pub fn label<N: Into<String>>(name: N, width: usize, names: &[(u32, &str)]) -> Self {
        Self {
            name: name.into(),
            width,
            kind: FieldKind::Label {
                names: names.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            },
        }
    }
}

/// An ordered group of fields packed into a contiguous byte run, repeated
/// back to back in the message body
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupLayout {
    /// Name of the group, used as its label when no label field is present
    pub name: String,
    /// Fields of the group in wire order
    pub fields: Vec<FieldDef>,
}

impl GroupLayout {
    /// Total width of one group in bytes
    pub fn width(&self) -> usize {
        self.fields.iter().map(|f| f.width).sum()
    }
}

/// What follows the fixed header of a message
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum BodyLayout {
    /// Header only
    None,
    /// A list of 4 byte J1939-73 DTCs
    Dtcs,
    /// Repeated field groups
    Groups(GroupLayout),
}

/// Policy for bytes left over after the last complete DTC or group
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TrailingBytes {
    /// Leftover bytes are padding and are ignored
    #[default]
    Discard,
    /// Leftover bytes make the message malformed
    Reject,
}

/// Complete description of one message kind
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageLayout {
    /// Message kind this layout describes
    pub pgn: Pgn,
    /// Message starts with the two byte lamp status header
    #[cfg_attr(feature = "serde", serde(default))]
    pub lamps: bool,
    /// Fixed header fields, following the lamp bytes if present
    #[cfg_attr(feature = "serde", serde(default))]
    pub header: Vec<FieldDef>,
    /// Variable part of the message
    pub body: BodyLayout,
    /// Handling of leftover bytes at the end of the body
    #[cfg_attr(feature = "serde", serde(default))]
    pub trailing: TrailingBytes,
}

impl MessageLayout {
    /// Layout of a lamp status + DTC list message (DM1, DM2, DM6, DM12, ...)
    pub fn dtc_message(pgn: Pgn) -> Self {
        Self {
            pgn,
            lamps: true,
            header: Vec::new(),
            body: BodyLayout::Dtcs,
            trailing: TrailingBytes::Discard,
        }
    }

    /// Length of the fixed header in bytes
    pub fn header_len(&self) -> usize {
        let lamps = if self.lamps { LAMP_WIDTH } else { 0 };
        lamps + self.header.iter().map(|f| f.width).sum::<usize>()
    }

    /// Iterates every field definition in the layout
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        let group = match &self.body {
            BodyLayout::Groups(g) => g.fields.as_slice(),
            _ => &[],
        };
        self.header.iter().chain(group.iter())
    }
}

/// Diagnostic readiness (DM5) layout
fn dm5_layout() -> MessageLayout {
    MessageLayout {
        pgn: Pgn::DM5,
        lamps: false,
        header: vec![
            FieldDef::scaled("Active Trouble Code Count", 1, 1.0, "count"),
            FieldDef::scaled("Previously Active Trouble Code Count", 1, 1.0, "count"),
            FieldDef::label(
                "OBD Compliance",
                1,
                &[
                    (1, "OBD II (CARB)"),
                    (2, "OBD (EPA)"),
                    (3, "OBD and OBD II"),
                    (4, "OBD I"),
                    (5, "Not intended to meet OBD II requirements"),
                    (6, "EOBD"),
                    (13, "JOBD"),
                    (19, "HD OBD"),
                    (20, "HD OBD P"),
                ],
            ),
            FieldDef::scaled("Continuously Monitored Systems", 1, 1.0, "bits"),
            FieldDef::scaled("Non-continuously Monitored Systems Support", 2, 1.0, "bits"),
            FieldDef::scaled("Non-continuously Monitored Systems Status", 2, 1.0, "bits"),
        ],
        body: BodyLayout::None,
        trailing: TrailingBytes::Discard,
    }
}

/// Lifetime active technology tracking layout: repeated index/time/distance records
fn ghg_active_tech_layout() -> MessageLayout {
    MessageLayout {
        pgn: Pgn::GHG_ACTIVE_TECH_LIFETIME,
        lamps: false,
        header: Vec::new(),
        body: BodyLayout::Groups(GroupLayout {
            name: "Active Technology".into(),
            fields: vec![
                FieldDef::label("Active Technology Index", 1, &[]),
                FieldDef::scaled("Active Technology Time", 4, 1.0, "s"),
                FieldDef::scaled("Active Technology Vehicle Distance", 4, 1.0, "km"),
            ],
        }),
        trailing: TrailingBytes::Discard,
    }
}

/// Static set of message layouts, keyed by PGN
#[derive(Debug, Clone, Default)]
pub struct LayoutCatalog {
    layouts: HashMap<Pgn, MessageLayout>,
}

impl LayoutCatalog {
    /// Creates an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog with the built-in DM message layouts
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for pgn in [Pgn::DM1, Pgn::DM2, Pgn::DM6, Pgn::DM12, Pgn::DM23, Pgn::DM28] {
            catalog.insert(MessageLayout::dtc_message(pgn));
        }
        catalog.insert(dm5_layout());
        catalog.insert(ghg_active_tech_layout());
        catalog
    }

    /// Adds or replaces the layout for `layout.pgn`
    pub fn insert(&mut self, layout: MessageLayout) -> Option<MessageLayout> {
        self.layouts.insert(layout.pgn, layout)
    }

    /// Returns the layout for a PGN
    pub fn get(&self, pgn: Pgn) -> Option<&MessageLayout> {
        self.layouts.get(&pgn)
    }

    /// Number of layouts in the catalog
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Returns true if the catalog has no layouts
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Loads layouts from a JSON array of [MessageLayout], on top of the built-in set
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> crate::VerifyResult<Self> {
        let layouts: Vec<MessageLayout> = serde_json::from_str(json)?;
        let mut catalog = Self::builtin();
        for layout in layouts {
            log::debug!("Loaded layout for {}", layout.pgn);
            catalog.insert(layout);
        }
        Ok(catalog)
    }
}
