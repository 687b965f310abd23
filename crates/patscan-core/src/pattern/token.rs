//! Pattern tokens and their source forms.
//!
//! Three source forms are accepted, all producing the same token stream:
//!
//! | form    | literal   | masked         | skip one  | skip many | capture   |
//! |---------|-----------|----------------|-----------|-----------|-----------|
//! | packed  | `0x00VV`  | -              | `0xFF00`  | `0xFF01`  | `0xFF02`  |
//! | mask    | `FF`/`VV` | `MM`/`VV`      | `00`/`00` | `00`/`01` | `00`/`02` |
//! | text    | `48`      | `4?` `48&F0`   | `??` `?`  | `*`       | `@@`      |

use crate::error::{Error, Result};
use crate::pattern::SegmentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// Byte must match exactly.
    Literal(u8),
    /// Only the bits selected by `mask` must match.
    Masked { value: u8, mask: u8 },
    /// Exactly one byte, content ignored.
    SkipOne,
    /// Zero or more bytes, content ignored.
    SkipMany,
    /// One byte copied into the captured address.
    Capture,
}

impl Token {
    pub const PACKED_RESERVED: u8 = 0xFF;
    pub const PACKED_SKIP_ONE: u16 = 0xFF00;
    pub const PACKED_SKIP_MANY: u16 = 0xFF01;
    pub const PACKED_CAPTURE: u16 = 0xFF02;

    pub const MASK_EXACT: u8 = 0xFF;
    pub const MASK_SPECIAL: u8 = 0x00;
    pub const SPECIAL_SKIP_ONE: u8 = 0x00;
    pub const SPECIAL_SKIP_MANY: u8 = 0x01;
    pub const SPECIAL_CAPTURE: u8 = 0x02;

    /// Decode one packed token: the low byte is the value, a high byte of
    /// `0xFF` selects a non-literal token.
    pub fn from_packed(value: u16) -> Option<Self> {
        let [high, low] = value.to_be_bytes();
        match high {
            0x00 => Some(Self::Literal(low)),
            Self::PACKED_RESERVED => Self::special(low),
            _ => None,
        }
    }

    /// Decode one token of the mask + value form.
    pub fn from_masked(value: u8, mask: u8) -> Option<Self> {
        match mask {
            Self::MASK_EXACT => Some(Self::Literal(value)),
            Self::MASK_SPECIAL => Self::special(value),
            _ => Some(Self::Masked { value, mask }),
        }
    }

    fn special(selector: u8) -> Option<Self> {
        match selector {
            Self::SPECIAL_SKIP_ONE => Some(Self::SkipOne),
            Self::SPECIAL_SKIP_MANY => Some(Self::SkipMany),
            Self::SPECIAL_CAPTURE => Some(Self::Capture),
            _ => None,
        }
    }

    /// Packed encoding; masked bytes have none.
    pub fn to_packed(&self) -> Option<u16> {
        match *self {
            Self::Literal(value) => Some(value as u16),
            Self::Masked { .. } => None,
            Self::SkipOne => Some(Self::PACKED_SKIP_ONE),
            Self::SkipMany => Some(Self::PACKED_SKIP_MANY),
            Self::Capture => Some(Self::PACKED_CAPTURE),
        }
    }

    /// Rewrite masks that select every bit or no bit as the equivalent
    /// literal or single-byte skip.
    pub fn normalized(self) -> Self {
        match self {
            Self::Masked {
                value,
                mask: Self::MASK_EXACT,
            } => Self::Literal(value),
            Self::Masked { mask: 0, .. } => Self::SkipOne,
            other => other,
        }
    }

    pub fn kind(&self) -> SegmentKind {
        match self {
            Self::Literal(_) => SegmentKind::Literal,
            Self::Masked { .. } => SegmentKind::MaskedLiteral,
            Self::SkipOne => SegmentKind::SkipFixed,
            Self::SkipMany => SegmentKind::SkipVariable,
            Self::Capture => SegmentKind::Capture,
        }
    }

    /// `(value, mask)` as stored in a compiled pattern. The value is
    /// pre-masked so that matching is `data & mask == value`.
    pub(crate) fn raw(&self) -> (u8, u8) {
        match *self {
            Self::Literal(value) => (value, Self::MASK_EXACT),
            Self::Masked { value, mask } => (value & mask, mask),
            Self::SkipOne | Self::SkipMany | Self::Capture => (0, 0),
        }
    }
}

/// Decode a packed token array.
pub fn tokens_from_packed(packed: &[u16]) -> Result<Vec<Token>> {
    decode_all(packed.iter().copied(), Token::from_packed, |value| value)
}

/// Decode a mask array and its value array. Extra mask bytes are ignored.
pub fn tokens_from_mask(mask: &[u8], values: &[u8]) -> Result<Vec<Token>> {
    if mask.len() < values.len() {
        return Err(Error::MaskTooShort {
            mask: mask.len(),
            pattern: values.len(),
        });
    }
    decode_all(
        values.iter().copied().zip(mask.iter().copied()),
        |(value, mask)| Token::from_masked(value, mask),
        |(value, mask)| u16::from_be_bytes([mask, value]),
    )
}

fn decode_all<T: Copy>(
    items: impl Iterator<Item = T>,
    decode: impl Fn(T) -> Option<Token>,
    describe: impl Fn(T) -> u16,
) -> Result<Vec<Token>> {
    items
        .enumerate()
        .map(|(index, item)| {
            decode(item).ok_or_else(|| Error::InvalidToken {
                index,
                value: describe(item),
            })
        })
        .collect()
}

/// Parse the text form, e.g. `"48 8B 05 @@ @@ @@ @@ * C3"`.
pub fn parse_tokens(text: &str) -> Result<Vec<Token>> {
    text.split_whitespace().map(parse_item).collect()
}

fn parse_item(item: &str) -> Result<Token> {
    let invalid = |message: &str| Error::InvalidSyntax {
        item: item.to_string(),
        message: message.to_string(),
    };

    match item {
        "?" | "??" => return Ok(Token::SkipOne),
        "*" => return Ok(Token::SkipMany),
        "@@" => return Ok(Token::Capture),
        _ => {}
    }

    if let Some((value, mask)) = item.split_once('&') {
        let value = parse_hex_byte(value).ok_or_else(|| invalid("invalid value byte"))?;
        let mask = parse_hex_byte(mask).ok_or_else(|| invalid("invalid mask byte"))?;
        return match mask {
            Token::MASK_EXACT => Ok(Token::Literal(value)),
            0 => Err(invalid("mask selects no bits, use ??")),
            _ => Ok(Token::Masked { value, mask }),
        };
    }

    let bytes = item.as_bytes();
    if bytes.len() != 2 {
        return Err(invalid("expected two hex digits"));
    }
    match (bytes[0], bytes[1]) {
        (b'?', low) => {
            let low = hex_digit(low).ok_or_else(|| invalid("invalid hex digit"))?;
            Ok(Token::Masked {
                value: low,
                mask: 0x0F,
            })
        }
        (high, b'?') => {
            let high = hex_digit(high).ok_or_else(|| invalid("invalid hex digit"))?;
            Ok(Token::Masked {
                value: high << 4,
                mask: 0xF0,
            })
        }
        _ => parse_hex_byte(item)
            .map(Token::Literal)
            .ok_or_else(|| invalid("invalid hex byte")),
    }
}

fn parse_hex_byte(s: &str) -> Option<u8> {
    if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(s, 16).ok()
}

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Render tokens in the text form accepted by [`parse_tokens`].
pub fn format_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|token| match *token {
            Token::Literal(value) => format!("{:02X}", value),
            Token::Masked { value, mask: 0xF0 } => format!("{:X}?", (value & 0xF0) >> 4),
            Token::Masked { value, mask: 0x0F } => format!("?{:X}", value & 0x0F),
            Token::Masked { value, mask } => format!("{:02X}&{:02X}", value & mask, mask),
            Token::SkipOne => "??".to_string(),
            Token::SkipMany => "*".to_string(),
            Token::Capture => "@@".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
