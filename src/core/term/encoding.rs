//! Byte encoding between the shell and the display
//!
//! Output is decoded with the locale's 8-bit encoding rather than strict
//! UTF-8 validation: invalid UTF-8 becomes U+FFFD instead of an error, and
//! Latin-1 maps every byte to a character.

use std::env;

/// Text encoding used on both directions of the PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl Encoding {
    /// Detect from `LC_ALL`, `LC_CTYPE` and `LANG`, first non-empty wins.
    pub fn from_locale() -> Self {
        let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .filter_map(|key| env::var(key).ok())
            .find(|value| !value.is_empty());

        match locale {
            Some(value) => Self::from_locale_name(&value),
            // POSIX locale on an unset environment; modern systems are UTF-8
            None => Encoding::Utf8,
        }
    }

    fn from_locale_name(locale: &str) -> Self {
        let lower = locale.to_lowercase();
        if lower.contains("utf-8") || lower.contains("utf8") {
            Encoding::Utf8
        } else {
            Encoding::Latin1
        }
    }

    /// Get encoding by config name. `auto` consults the locale.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "auto" | "" => Some(Self::from_locale()),
            "utf-8" | "utf8" => Some(Encoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" => Some(Encoding::Latin1),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "Latin-1",
        }
    }

    /// Decode a complete run of bytes
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    /// Encode text for writing to the shell.
    ///
    /// Characters Latin-1 cannot represent become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
                .collect(),
        }
    }

    /// Length of a trailing multi-byte character cut off by a read boundary.
    ///
    /// Always 0 for Latin-1.
    pub fn incomplete_tail_len(&self, bytes: &[u8]) -> usize {
        if *self == Encoding::Latin1 {
            return 0;
        }

        // Walk back over at most three continuation bytes to the lead byte
        let len = bytes.len();
        let floor = len.saturating_sub(4);
        let mut i = len;
        while i > floor {
            i -= 1;
            let b = bytes[i];
            if b & 0xC0 == 0x80 {
                continue;
            }
            let needed = match b {
                0xC0..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF7 => 4,
                _ => return 0,
            };
            let have = len - i;
            return if have < needed { have } else { 0 };
        }
        0
    }
}
