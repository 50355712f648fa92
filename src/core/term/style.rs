//! Text attribute state
//!
//! Holds the rendering attributes applied to text coming out of the shell,
//! and the SGR code table that mutates them.

/// Number of entries in the indexed color table
pub const PALETTE_SIZE: usize = 8;

/// Fixed 8-color table (black, red, green, yellow, blue, magenta, cyan, white)
const PALETTE: [Rgb; PALETTE_SIZE] = [
    Rgb::new(0, 0, 0),
    Rgb::new(128, 0, 0),
    Rgb::new(0, 128, 0),
    Rgb::new(128, 128, 0),
    Rgb::new(0, 0, 128),
    Rgb::new(128, 0, 128),
    Rgb::new(0, 128, 128),
    Rgb::new(192, 192, 192),
];

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

/// Look up an entry of the color table.
///
/// Out-of-range indices yield `None`, meaning "default color".
pub fn ansi_color(index: usize) -> Option<Rgb> {
    PALETTE.get(index).copied()
}

/// Font weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weight {
    #[default]
    Normal,
    Bold,
}

/// Foreground or background color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    /// No override, the sink's own default
    #[default]
    Default,
    /// Index into the 8-color table
    Indexed(u8),
}

impl Color {
    /// Resolve to RGB; `None` for the default color or an out-of-range index.
    pub fn rgb(self) -> Option<Rgb> {
        match self {
            Color::Default => None,
            Color::Indexed(n) => ansi_color(n as usize),
        }
    }

    /// Convert to crossterm color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        match self.rgb() {
            Some(rgb) => rgb.to_crossterm(),
            None => crossterm::style::Color::Reset,
        }
    }
}

/// Current rendering attributes for un-styled incoming text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StyleState {
    pub weight: Weight,
    pub fg: Color,
    pub bg: Color,
}

impl StyleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_bold(&self) -> bool {
        self.weight == Weight::Bold
    }

    /// Apply a single SGR code. Codes outside the table are ignored.
    pub fn apply(&mut self, code: u32) {
        match code {
            0 => self.reset(),
            1 => self.weight = Weight::Bold,
            22 => self.weight = Weight::Normal,
            30..=37 => self.fg = Color::Indexed((code - 30) as u8),
            39 => self.fg = Color::Default,
            40..=47 => self.bg = Color::Indexed((code - 40) as u8),
            49 => self.bg = Color::Default,
            _ => tracing::trace!("Ignoring SGR code {}", code),
        }
    }

    /// Apply the codes of an `ESC [ ... m` parameter list, in order.
    ///
    /// Elements that are empty or do not parse as an integer are skipped.
    pub fn apply_params(&mut self, params: &[u8]) {
        for field in params.split(|&b| b == b';') {
            let parsed = std::str::from_utf8(field)
                .ok()
                .and_then(|s| s.parse::<u32>().ok());
            match parsed {
                Some(code) => self.apply(code),
                None => {
                    if !field.is_empty() {
                        tracing::debug!("Unparseable SGR parameter {:?}", field);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_table_bounds() {
        assert_eq!(ansi_color(0), Some(Rgb::new(0, 0, 0)));
        assert_eq!(ansi_color(1), Some(Rgb::new(128, 0, 0)));
        assert_eq!(ansi_color(7), Some(Rgb::new(192, 192, 192)));
        assert_eq!(ansi_color(8), None);
        assert_eq!(ansi_color(usize::MAX), None);

        assert_eq!(Color::Indexed(8).rgb(), None);
        assert_eq!(Color::Default.rgb(), None);
        assert_eq!(
            Color::Indexed(8).to_crossterm(),
            crossterm::style::Color::Reset
        );
    }

    #[test]
    fn test_sgr_table() {
        let mut style = StyleState::new();

        style.apply(1);
        assert!(style.is_bold());
        style.apply(22);
        assert!(!style.is_bold());

        style.apply(31);
        assert_eq!(style.fg, Color::Indexed(1));
        style.apply(47);
        assert_eq!(style.bg, Color::Indexed(7));

        style.apply(39);
        assert_eq!(style.fg, Color::Default);
        assert_eq!(style.bg, Color::Indexed(7));
        style.apply(49);
        assert_eq!(style.bg, Color::Default);
    }

    #[test]
    fn test_reset() {
        let mut style = StyleState::new();
        style.apply_params(b"1;32;44");
        assert_eq!(
            style,
            StyleState {
                weight: Weight::Bold,
                fg: Color::Indexed(2),
                bg: Color::Indexed(4),
            }
        );

        style.apply(0);
        assert_eq!(style, StyleState::default());
    }

    #[test]
    fn test_unknown_codes_leave_state_alone() {
        let mut style = StyleState::new();
        style.apply_params(b"1;33");
        let before = style;

        for code in [2, 4, 38, 48, 90, 99, 107, 1000] {
            style.apply(code);
        }
        assert_eq!(style, before);
    }

    #[test]
    fn test_params_skip_bad_elements() {
        let mut style = StyleState::new();

        // Empty list is not a reset
        style.apply(1);
        style.apply_params(b"");
        assert!(style.is_bold());

        style.apply_params(b";;34;");
        assert_eq!(style.fg, Color::Indexed(4));

        // Overflowing element is ignored, the rest still apply
        style.apply_params(b"99999999999;41");
        assert_eq!(style.bg, Color::Indexed(1));
        assert!(style.is_bold());
    }
}
