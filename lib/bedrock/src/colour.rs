use serde_derive::{Deserialize, Serialize};

/// An RGBA colour as understood by game clients. Different RPCs expect
/// different byte orders on the wire, so both packings are provided; the
/// canonical in-memory and serde representation is RGBA.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Colour {
    #[inline]
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Colour {
        Colour { r, g, b, a }
    }

    /// The "no colour" sentinel used by per-player colour tables.
    #[inline]
    pub fn none() -> Colour {
        Colour::default()
    }

    #[inline]
    pub fn from_rgba(rgba: u32) -> Colour {
        Colour {
            r: (rgba >> 24) as u8,
            g: (rgba >> 16) as u8,
            b: (rgba >> 8) as u8,
            a: rgba as u8,
        }
    }

    #[inline]
    pub fn from_argb(argb: u32) -> Colour {
        Colour {
            a: (argb >> 24) as u8,
            r: (argb >> 16) as u8,
            g: (argb >> 8) as u8,
            b: argb as u8,
        }
    }

    #[inline]
    pub fn rgba(self) -> u32 {
        (u32::from(self.r) << 24) | (u32::from(self.g) << 16) | (u32::from(self.b) << 8) | u32::from(self.a)
    }

    #[inline]
    pub fn argb(self) -> u32 {
        (u32::from(self.a) << 24) | (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }
}

impl From<u32> for Colour {
    #[inline]
    fn from(rgba: u32) -> Colour {
        Colour::from_rgba(rgba)
    }
}

impl From<Colour> for u32 {
    #[inline]
    fn from(colour: Colour) -> u32 {
        colour.rgba()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_roundtrip() {
        let colour = Colour::from_rgba(0x11223344);
        assert_eq!(colour, Colour::new(0x11, 0x22, 0x33, 0x44));
        assert_eq!(colour.rgba(), 0x11223344);
    }

    #[test]
    fn test_argb_reorders() {
        let colour = Colour::from_rgba(0x11223344);
        assert_eq!(colour.argb(), 0x44112233);
        assert_eq!(Colour::from_argb(0x44112233), colour);
    }

    #[test]
    fn test_none_is_zero() {
        assert_eq!(Colour::none().rgba(), 0);
    }
}
