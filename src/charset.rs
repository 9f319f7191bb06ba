use std::fmt;

/// Character sets a field can be decoded with.
///
/// Decoding is a pass-through: malformed or unmappable input is replaced
/// with U+FFFD instead of failing.
#[derive(Eq, PartialEq, Hash, Clone, Copy, Debug, Default)]
pub enum Charset {
    #[default]
    Utf8,
    UsAscii,
    Iso8859_1,
}

impl Charset {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::UsAscii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        b as char
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
            Charset::Iso8859_1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    /// Looks a charset up by its IANA name or a common alias.
    pub fn for_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Charset::Utf8),
            "us-ascii" | "ascii" => Some(Charset::UsAscii),
            "iso-8859-1" | "iso8859-1" | "latin1" => Some(Charset::Iso8859_1),
            _ => None,
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Charset::Utf8 => "UTF-8",
            Charset::UsAscii => "US-ASCII",
            Charset::Iso8859_1 => "ISO-8859-1",
        };
        f.write_str(name)
    }
}
