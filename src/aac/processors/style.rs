//! Button styles, color normalization, and the style cascade.
//!
//! Every visual property is optional so that a style can act as one layer of
//! the cascade: theme defaults, then the named style a button is based on,
//! then the button's inline overrides. Each layer only overrides what it
//! defines.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

/// Factor applied to each channel when deriving a border from a background.
const BORDER_DARKEN_PERCENT: u16 = 70;

/// An RGBA color. Serialized as `#RRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// Parses `#RGB`, `#RGBA`, `#RRGGBB`, `#RRGGBBAA`, `rgb(r, g, b)` and
    /// `rgba(r, g, b, a)`. Alpha in `rgba()` is a 0–1 float; a missing alpha is
    /// fully opaque.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        let lower = value.to_ascii_lowercase();
        if let Some(inner) = lower
            .strip_prefix("rgba(")
            .or_else(|| lower.strip_prefix("rgb("))
        {
            return parse_functional(inner.strip_suffix(')')?);
        }

        let hex = value.strip_prefix('#').unwrap_or(value);
        if !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        let nibble = |index: usize| u8::from_str_radix(&hex[index..=index], 16).ok();
        let byte = |index: usize| u8::from_str_radix(&hex[index..index + 2], 16).ok();

        match hex.len() {
            3 | 4 => {
                let r = nibble(0)? * 17;
                let g = nibble(1)? * 17;
                let b = nibble(2)? * 17;
                let a = if hex.len() == 4 { nibble(3)? * 17 } else { 255 };
                Some(Color::rgba(r, g, b, a))
            }
            6 | 8 => {
                let a = if hex.len() == 8 { byte(6)? } else { 255 };
                Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, a))
            }
            _ => None,
        }
    }

    /// Formats the color as `#RRGGBBAA`.
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
    }

    /// Formats the color as CSS `rgb()`/`rgba()` text.
    pub fn to_css(&self) -> String {
        if self.a == 255 {
            format!("rgb({}, {}, {})", self.r, self.g, self.b)
        } else {
            let alpha = f64::from(self.a) / 255.0;
            format!("rgba({}, {}, {}, {:.2})", self.r, self.g, self.b, alpha)
        }
    }

    /// Decodes a packed `0xAARRGGBB` integer as stored by SQLite-based formats.
    pub fn from_argb(packed: u32) -> Self {
        let [a, r, g, b] = packed.to_be_bytes();
        Color::rgba(r, g, b, a)
    }

    /// Encodes the color as a packed `0xAARRGGBB` integer.
    pub fn to_argb(&self) -> u32 {
        u32::from_be_bytes([self.a, self.r, self.g, self.b])
    }

    /// Returns a darker variant used for auto-generated borders. The alpha
    /// channel is kept as is.
    pub fn darken(&self) -> Self {
        let scale = |channel: u8| (u16::from(channel) * BORDER_DARKEN_PERCENT / 100) as u8;
        Color::rgba(scale(self.r), scale(self.g), scale(self.b), self.a)
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

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Color::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color '{raw}'")))
    }
}

fn parse_functional(inner: &str) -> Option<Color> {
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let channel = |text: &str| -> Option<u8> {
        let value: f64 = text.parse().ok()?;
        Some(value.round().clamp(0.0, 255.0) as u8)
    };
    let alpha = match parts.get(3) {
        Some(text) => {
            let value: f64 = text.parse().ok()?;
            (value.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        None => 255,
    };
    Some(Color::rgba(
        channel(parts[0])?,
        channel(parts[1])?,
        channel(parts[2])?,
        alpha,
    ))
}

/// Normalizes an optional raw color to `#RRGGBBAA`. Missing or unparsable
/// input falls back to opaque white.
pub fn normalize_color(raw: Option<&str>) -> String {
    raw.and_then(Color::parse).unwrap_or(Color::WHITE).to_hex()
}

/// Visual properties of a button or page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Style {
    /// Name of the style this one is based on (Grid 3 `BasedOnStyle`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub based_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_on_top: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparent: Option<bool>,
}

impl Style {
    /// Returns a style where every property defined by `self` wins and the
    /// rest is taken from `parent`.
    pub fn merge(&self, parent: &Style) -> Style {
        trace!("merging style layer into parent");
        Style {
            based_on: self.based_on.clone().or_else(|| parent.based_on.clone()),
            background_color: self.background_color.or(parent.background_color),
            font_color: self.font_color.or(parent.font_color),
            border_color: self.border_color.or(parent.border_color),
            font_family: self.font_family.clone().or_else(|| parent.font_family.clone()),
            font_size: self.font_size.or(parent.font_size),
            font_weight: self.font_weight.clone().or_else(|| parent.font_weight.clone()),
            font_style: self.font_style.clone().or_else(|| parent.font_style.clone()),
            border_width: self.border_width.or(parent.border_width),
            label_on_top: self.label_on_top.or(parent.label_on_top),
            transparent: self.transparent.or(parent.transparent),
        }
    }

    /// `true` when no property is set.
    pub fn is_empty(&self) -> bool {
        *self == Style::default()
    }

    /// Builds a style with only the background set and the border derived
    /// from it.
    pub fn from_background(background: Color) -> Style {
        Style {
            background_color: Some(background),
            border_color: Some(background.darken()),
            ..Style::default()
        }
    }
}

/// Theme defaults plus the named styles buttons may be based on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleSheet {
    #[serde(default)]
    pub theme: Style,
    #[serde(default)]
    pub named: BTreeMap<String, Style>,
}

impl StyleSheet {
    /// Computes the effective style for an inline style: theme defaults, then
    /// the named style from `based_on`, then the inline overrides. The
    /// resolved style keeps the `based_on` reference of the inline layer.
    ///
    /// An unknown `based_on` name contributes nothing.
    pub fn resolve(&self, inline: &Style) -> Style {
        let named = inline
            .based_on
            .as_ref()
            .and_then(|name| self.named.get(name));
        let base = match named {
            Some(named) => named.merge(&self.theme),
            None => self.theme.clone(),
        };
        let mut resolved = inline.merge(&base);
        resolved.based_on = inline.based_on.clone();
        resolved
    }

    /// Adds the generated category styles without overwriting styles the
    /// sheet already defines.
    pub fn with_category_defaults(mut self) -> Self {
        for (name, style) in default_category_styles() {
            self.named.entry(name).or_insert(style);
        }
        self
    }
}

/// Category palette used when a format needs default named styles.
const CATEGORY_PALETTE: &[(&str, Color)] = &[
    ("Actions", Color::rgb(0xF4, 0xC4, 0x30)),
    ("Describing", Color::rgb(0x7E, 0xC8, 0xE3)),
    ("Nouns", Color::rgb(0xF9, 0xA8, 0x25)),
    ("People", Color::rgb(0xFF, 0xF5, 0x9D)),
    ("Questions", Color::rgb(0xCE, 0x93, 0xD8)),
    ("Social", Color::rgb(0xF4, 0x8F, 0xB1)),
    ("Verbs", Color::rgb(0xA5, 0xD6, 0xA7)),
];

/// Generates the category styles. Borders are derived from the background
/// with [`Color::darken`], so regenerating them always yields the same sheet.
pub fn default_category_styles() -> BTreeMap<String, Style> {
    CATEGORY_PALETTE
        .iter()
        .map(|(name, background)| {
            let mut style = Style::from_background(*background);
            style.font_color = Some(Color::BLACK);
            (name.to_string(), style)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_hex_expands_with_opaque_alpha() {
        assert_eq!(normalize_color(Some("#F00")), "#FF0000FF");
        assert_eq!(normalize_color(Some("00ff00")), "#00FF00FF");
        assert_eq!(normalize_color(Some("#11223344")), "#11223344");
    }

    #[test]
    fn rgba_alpha_rounds_to_byte() {
        let color = Color::parse("rgba(255,0,0,0.5)").expect("rgba parsed");
        assert_eq!(color.a, 0x80);
        assert_eq!(color.to_hex(), "#FF000080");
        assert_eq!(normalize_color(Some("rgb(0, 0, 255)")), "#0000FFFF");
    }

    #[test]
    fn missing_color_is_opaque_white() {
        assert_eq!(normalize_color(None), "#FFFFFFFF");
        assert_eq!(normalize_color(Some("not a color")), "#FFFFFFFF");
    }

    #[test]
    fn argb_packing_round_trips() {
        let color = Color::rgba(0x12, 0x34, 0x56, 0x78);
        assert_eq!(color.to_argb(), 0x7812_3456);
        assert_eq!(Color::from_argb(0x7812_3456), color);
    }

    #[test]
    fn cascade_prefers_most_specific_layer() {
        let mut sheet = StyleSheet::default();
        sheet.theme.font_family = Some("Arial".into());
        sheet.theme.font_size = Some(12.0);
        sheet.named.insert(
            "Verbs".into(),
            Style {
                background_color: Some(Color::rgb(0, 255, 0)),
                font_size: Some(16.0),
                ..Style::default()
            },
        );
        let inline = Style {
            based_on: Some("Verbs".into()),
            font_size: Some(20.0),
            ..Style::default()
        };

        let resolved = sheet.resolve(&inline);
        assert_eq!(resolved.font_family.as_deref(), Some("Arial"));
        assert_eq!(resolved.background_color, Some(Color::rgb(0, 255, 0)));
        assert_eq!(resolved.font_size, Some(20.0));
        assert_eq!(resolved.based_on.as_deref(), Some("Verbs"));
    }

    #[test]
    fn category_defaults_are_idempotent() {
        assert_eq!(default_category_styles(), default_category_styles());
        let once = StyleSheet::default().with_category_defaults();
        let twice = once.clone().with_category_defaults();
        assert_eq!(once, twice);
        let actions = &once.named["Actions"];
        assert_eq!(
            actions.border_color,
            actions.background_color.map(|color| color.darken())
        );
    }

    fn arb_color() -> impl Strategy<Value = Color> {
        (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
            .prop_map(|(r, g, b, a)| Color::rgba(r, g, b, a))
    }

    fn arb_full_style() -> impl Strategy<Value = Style> {
        (
            arb_color(),
            arb_color(),
            arb_color(),
            "[A-Za-z ]{1,12}",
            1.0f32..72.0,
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(bg, font, border, family, size, on_top, transparent)| Style {
                based_on: None,
                background_color: Some(bg),
                font_color: Some(font),
                border_color: Some(border),
                font_family: Some(family),
                font_size: Some(size),
                font_weight: Some("bold".into()),
                font_style: Some("italic".into()),
                border_width: Some(size / 4.0),
                label_on_top: Some(on_top),
                transparent: Some(transparent),
            })
    }

    proptest! {
        #[test]
        fn resolving_a_fully_specified_style_is_identity(style in arb_full_style()) {
            let sheet = StyleSheet::default().with_category_defaults();
            prop_assert_eq!(sheet.resolve(&style), style);
        }

        #[test]
        fn hex_output_reparses_to_same_color(color in arb_color()) {
            prop_assert_eq!(Color::parse(&color.to_hex()), Some(color));
        }
    }
}
