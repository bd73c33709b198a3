use crate::error::ConfigError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const PALETTE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Linear blend in RGB space; `t` is clamped to `[0, 1]`.
    pub fn lerp(self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color::rgb(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
        )
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Fill for features whose value cannot be classified. Not part of any scheme.
pub const UNKNOWN_COLOR: Color = Color::rgb(0x80, 0x80, 0x80);

/// Two stops used when every value in a column is the same.
pub const FLAT_STOPS: [Color; 2] = [Color::rgb(0xff, 0xff, 0xcc), Color::rgb(0xff, 0xed, 0xa0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorScheme {
    #[default]
    YlOrRd,
    RdYlGnR,
    Blues,
    Reds,
    Greens,
    Purples,
    Viridis,
}

const fn hex(v: u32) -> Color {
    Color::rgb((v >> 16) as u8, (v >> 8) as u8, v as u8)
}

impl ColorScheme {
    pub const ALL: [ColorScheme; 7] = [
        ColorScheme::YlOrRd,
        ColorScheme::RdYlGnR,
        ColorScheme::Blues,
        ColorScheme::Reds,
        ColorScheme::Greens,
        ColorScheme::Purples,
        ColorScheme::Viridis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ColorScheme::YlOrRd => "YlOrRd",
            ColorScheme::RdYlGnR => "RdYlGn_r",
            ColorScheme::Blues => "Blues",
            ColorScheme::Reds => "Reds",
            ColorScheme::Greens => "Greens",
            ColorScheme::Purples => "Purples",
            ColorScheme::Viridis => "Viridis",
        }
    }

    pub fn colors(&self) -> &'static [Color; PALETTE_LEN] {
        const YL_OR_RD: [Color; PALETTE_LEN] = [
            hex(0xffffcc), hex(0xffeda0), hex(0xfed976), hex(0xfeb24c),
            hex(0xfd8d3c), hex(0xfc4e2a), hex(0xe31a1c), hex(0xb10026),
        ];
        const RD_YL_GN_R: [Color; PALETTE_LEN] = [
            hex(0xd73027), hex(0xf46d43), hex(0xfdae61), hex(0xfee08b),
            hex(0xd9ef8b), hex(0xa6d96a), hex(0x66bd63), hex(0x1a9850),
        ];
        const BLUES: [Color; PALETTE_LEN] = [
            hex(0xf7fbff), hex(0xdeebf7), hex(0xc6dbef), hex(0x9ecae1),
            hex(0x6baed6), hex(0x4292c6), hex(0x2171b5), hex(0x084594),
        ];
        const REDS: [Color; PALETTE_LEN] = [
            hex(0xfff5f0), hex(0xfee0d2), hex(0xfcbba1), hex(0xfc9272),
            hex(0xfb6a4a), hex(0xef3b2c), hex(0xcb181d), hex(0x99000d),
        ];
        const GREENS: [Color; PALETTE_LEN] = [
            hex(0xf7fcf5), hex(0xe5f5e0), hex(0xc7e9c0), hex(0xa1d99b),
            hex(0x74c476), hex(0x41ab5d), hex(0x238b45), hex(0x005a32),
        ];
        const PURPLES: [Color; PALETTE_LEN] = [
            hex(0xfcfbfd), hex(0xefedf5), hex(0xdadaeb), hex(0xbcbddc),
            hex(0x9e9ac8), hex(0x807dba), hex(0x6a51a3), hex(0x4a1486),
        ];
        const VIRIDIS: [Color; PALETTE_LEN] = [
            hex(0x440154), hex(0x482878), hex(0x3e4989), hex(0x31688e),
            hex(0x26828e), hex(0x1f9e89), hex(0x35b779), hex(0x6ece58),
        ];

        match self {
            ColorScheme::YlOrRd => &YL_OR_RD,
            ColorScheme::RdYlGnR => &RD_YL_GN_R,
            ColorScheme::Blues => &BLUES,
            ColorScheme::Reds => &REDS,
            ColorScheme::Greens => &GREENS,
            ColorScheme::Purples => &PURPLES,
            ColorScheme::Viridis => &VIRIDIS,
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|scheme| scheme.name() == s)
            .ok_or_else(|| ConfigError::UnknownScheme {
                scheme: s.to_string(),
                available: Self::names().join(", "),
            })
    }
}

impl Serialize for ColorScheme {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for ColorScheme {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
