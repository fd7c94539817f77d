//! Lamp status decoding for the two byte J1939 lamp header

use strum_macros::{Display, EnumIter};

/// Fault indicator lamps reported in the lamp status header
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum Lamp {
    /// Malfunction indicator lamp
    #[strum(serialize = "MIL")]
    Mil,
    /// Red stop lamp
    #[strum(serialize = "RSL")]
    RedStop,
    /// Amber warning lamp
    #[strum(serialize = "AWL")]
    AmberWarning,
    /// Protect lamp
    #[strum(serialize = "PL")]
    Protect,
}

impl Lamp {
    /// Bit offset of this lamp's two bit pair in both header bytes
    const fn shift(&self) -> u8 {
        match self {
            Lamp::Mil => 6,
            Lamp::RedStop => 4,
            Lamp::AmberWarning => 2,
            Lamp::Protect => 0,
        }
    }

    const fn index(&self) -> usize {
        match self {
            Lamp::Mil => 0,
            Lamp::RedStop => 1,
            Lamp::AmberWarning => 2,
            Lamp::Protect => 3,
        }
    }
}

/// State of one lamp
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum LampStatus {
    /// Lamp is off
    #[strum(serialize = "off")]
    Off,
    /// Lamp is on steady
    #[strum(serialize = "on")]
    On,
    /// Lamp is on, flashing at 1Hz
    #[strum(serialize = "slow flash")]
    SlowFlash,
    /// Lamp is on, flashing at 2Hz
    #[strum(serialize = "fast flash")]
    FastFlash,
    /// Reserved or not-available bit pattern
    #[strum(serialize = "not supported")]
    NotSupported,
}

impl LampStatus {
    /// Decodes a lamp from its on/off and flash bit pairs.
    ///
    /// Reserved patterns are never folded into [LampStatus::Off]
    pub fn from_bits(on_off: u8, flash: u8) -> Self {
        match (on_off & 0b11, flash & 0b11) {
            (0b00, _) => Self::Off,
            (0b01, 0b00) => Self::SlowFlash,
            (0b01, 0b01) => Self::FastFlash,
            (0b01, 0b11) => Self::On,
            _ => Self::NotSupported,
        }
    }

    /// Returns the on/off and flash bit pairs that encode this status
    pub fn to_bits(&self) -> (u8, u8) {
        match self {
            Self::Off => (0b00, 0b11),
            Self::On => (0b01, 0b11),
            Self::SlowFlash => (0b01, 0b00),
            Self::FastFlash => (0b01, 0b01),
            Self::NotSupported => (0b11, 0b11),
        }
    }

    /// Returns true if the lamp is illuminated, steady or flashing
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On | Self::SlowFlash | Self::FastFlash)
    }
}

/// Status of every lamp in a lamp header
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LampVector {
    lamps: [LampStatus; 4],
}

impl LampVector {
    /// Decodes the lamp state byte and lamp flash byte
    pub fn from_bytes(status: u8, flash: u8) -> Self {
        let decode = |lamp: Lamp| {
            let s = lamp.shift();
            LampStatus::from_bits(status >> s, flash >> s)
        };
        Self {
            lamps: [
                decode(Lamp::Mil),
                decode(Lamp::RedStop),
                decode(Lamp::AmberWarning),
                decode(Lamp::Protect),
            ],
        }
    }

    /// Creates a vector with the MIL set to `mil` and every other lamp off
    pub fn with_mil(mil: LampStatus) -> Self {
        Self {
            lamps: [mil, LampStatus::Off, LampStatus::Off, LampStatus::Off],
        }
    }

    /// Encodes the vector back into its two header bytes
    pub fn to_bytes(&self) -> [u8; 2] {
        let mut status = 0u8;
        let mut flash = 0u8;
        for lamp in [Lamp::Mil, Lamp::RedStop, Lamp::AmberWarning, Lamp::Protect] {
            let (s, f) = self.get(lamp).to_bits();
            status |= s << lamp.shift();
            flash |= f << lamp.shift();
        }
        [status, flash]
    }

    /// Status of a single lamp
    pub fn get(&self, lamp: Lamp) -> LampStatus {
        self.lamps[lamp.index()]
    }

    /// Status of the malfunction indicator lamp
    pub fn mil(&self) -> LampStatus {
        self.get(Lamp::Mil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn decode_mil_states() {
        assert_eq!(LampVector::from_bytes(0x40, 0xFF).mil(), LampStatus::On);
        assert_eq!(LampVector::from_bytes(0x00, 0xFF).mil(), LampStatus::Off);
        assert_eq!(LampVector::from_bytes(0x40, 0x3F).mil(), LampStatus::SlowFlash);
        assert_eq!(LampVector::from_bytes(0x40, 0x7F).mil(), LampStatus::FastFlash);
    }

    #[test]
    fn reserved_patterns_are_not_supported() {
        // on/off = 10 (reserved) and 11 (not available)
        assert_eq!(LampVector::from_bytes(0x80, 0xFF).mil(), LampStatus::NotSupported);
        assert_eq!(LampVector::from_bytes(0xC0, 0xFF).mil(), LampStatus::NotSupported);
        // on with flash = 10 (reserved)
        assert_eq!(LampVector::from_bytes(0x40, 0xBF).mil(), LampStatus::NotSupported);
    }

    #[test]
    fn lamps_are_independent() {
        // MIL off, RSL on, AWL reserved, PL on
        let v = LampVector::from_bytes(0b00_01_10_01, 0xFF);
        assert_eq!(v.get(Lamp::Mil), LampStatus::Off);
        assert_eq!(v.get(Lamp::RedStop), LampStatus::On);
        assert_eq!(v.get(Lamp::AmberWarning), LampStatus::NotSupported);
        assert_eq!(v.get(Lamp::Protect), LampStatus::On);
    }

    #[test]
    fn encode_matches_decode() {
        let v = LampVector::from_bytes(0b01_00_01_00, 0b00_11_01_11);
        assert_eq!(LampVector::from_bytes(v.to_bytes()[0], v.to_bytes()[1]), v);
        assert_eq!(Lamp::iter().count(), 4);
        assert_eq!(Lamp::Mil.to_string(), "MIL");
    }
}
