//! Interpretation of captured bytes as addresses.
//!
//! A pattern's capture segments collect up to eight raw bytes. An
//! [`AddressMeaning`] turns that raw value into a final address:
//!
//! ```text
//! absolute:  raw (truncated to the kind's width)
//! relative:  base + match_offset + relative_to_offset + sign_extend(raw)
//! ```
//!
//! Indirect kinds then dereference the result once (8 bytes), and precode
//! kinds follow the small jump stub the result points at.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{Error, Result};
use crate::memory::ReadMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, Display)]
#[strum(ascii_case_insensitive)]
pub enum AddressBase {
    #[strum(serialize = "rel")]
    Relative,
    #[strum(serialize = "abs")]
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, Display)]
pub enum AddressWidth {
    #[strum(serialize = "32")]
    W32,
    #[strum(serialize = "64")]
    W64,
}

impl AddressWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }
}

/// How a captured value is turned into an address.
///
/// Text form: `rel32`, `rel64`, `abs32` or `abs64`, optionally followed by
/// `|indirect` and/or `|precode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressKind {
    base: AddressBase,
    width: AddressWidth,
    indirect: bool,
    precode: bool,
}

impl AddressKind {
    pub const REL32: Self = Self::new(AddressBase::Relative, AddressWidth::W32);
    pub const REL64: Self = Self::new(AddressBase::Relative, AddressWidth::W64);
    pub const ABS32: Self = Self::new(AddressBase::Absolute, AddressWidth::W32);
    pub const ABS64: Self = Self::new(AddressBase::Absolute, AddressWidth::W64);

    pub const fn new(base: AddressBase, width: AddressWidth) -> Self {
        Self {
            base,
            width,
            indirect: false,
            precode: false,
        }
    }

    /// Dereference the computed address once more.
    pub const fn indirect(mut self) -> Self {
        self.indirect = true;
        self
    }

    /// The computed address points at a jump stub rather than the target.
    pub const fn precode(mut self) -> Self {
        self.precode = true;
        self
    }

    pub fn base(&self) -> AddressBase {
        self.base
    }

    pub fn width(&self) -> AddressWidth {
        self.width
    }

    pub fn is_relative(&self) -> bool {
        self.base == AddressBase::Relative
    }

    pub fn is_absolute(&self) -> bool {
        self.base == AddressBase::Absolute
    }

    pub fn is_indirect(&self) -> bool {
        self.indirect
    }

    pub fn is_precode(&self) -> bool {
        self.precode
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.width)?;
        if self.indirect {
            f.write_str("|indirect")?;
        }
        if self.precode {
            f.write_str("|precode")?;
        }
        Ok(())
    }
}

impl FromStr for AddressKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidAddressMeaning(message);
        let mut parts = s.split('|').map(str::trim);

        let head = parts.next().unwrap_or_default();
        if head.len() < 3 || !head.is_char_boundary(3) {
            return Err(invalid(format!("unknown address kind '{}'", s)));
        }
        let (base, width) = head.split_at(3);
        let base = AddressBase::from_str(base)
            .map_err(|_| invalid(format!("unknown address base '{}'", base)))?;
        let width = AddressWidth::from_str(width)
            .map_err(|_| invalid(format!("unknown address width '{}'", width)))?;

        let mut kind = Self::new(base, width);
        for flag in parts {
            match flag.to_ascii_lowercase().as_str() {
                "indirect" => kind.indirect = true,
                "precode" => kind.precode = true,
                other => return Err(invalid(format!("unknown address flag '{}'", other))),
            }
        }
        Ok(kind)
    }
}

impl TryFrom<String> for AddressKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AddressKind> for String {
    fn from(kind: AddressKind) -> Self {
        kind.to_string()
    }
}

/// A validated `(kind, relative_to_offset)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressMeaning {
    kind: AddressKind,
    relative_to_offset: u64,
}

impl AddressMeaning {
    /// Meaning for patterns that capture nothing.
    pub const NONE: Self = Self {
        kind: AddressKind::ABS64,
        relative_to_offset: 0,
    };

    pub fn absolute(kind: AddressKind) -> Result<Self> {
        if kind.is_relative() {
            return Err(Error::InvalidAddressMeaning(format!(
                "'{}' is relative; use AddressMeaning::relative",
                kind
            )));
        }
        Ok(Self {
            kind,
            relative_to_offset: 0,
        })
    }

    /// `relative_to_offset` is measured from the start of the match,
    /// typically the length of the instruction holding the displacement.
    pub fn relative(kind: AddressKind, relative_to_offset: i64) -> Result<Self> {
        if kind.is_absolute() {
            return Err(Error::InvalidAddressMeaning(format!(
                "'{}' is absolute; use AddressMeaning::absolute",
                kind
            )));
        }
        let relative_to_offset = u64::try_from(relative_to_offset).map_err(|_| {
            Error::InvalidAddressMeaning(format!(
                "relative offset must not be negative (got {})",
                relative_to_offset
            ))
        })?;
        Ok(Self {
            kind,
            relative_to_offset,
        })
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn relative_to_offset(&self) -> u64 {
        self.relative_to_offset
    }

    /// Compute the address without touching memory.
    pub fn resolve(&self, base: u64, offset: usize, raw: u64) -> u64 {
        match (self.kind.base, self.kind.width) {
            (AddressBase::Absolute, AddressWidth::W32) => raw as u32 as u64,
            (AddressBase::Absolute, AddressWidth::W64) => raw,
            (AddressBase::Relative, width) => {
                let disp = match width {
                    AddressWidth::W32 => raw as u32 as i32 as i64,
                    AddressWidth::W64 => raw as i64,
                };
                base.wrapping_add(offset as u64)
                    .wrapping_add(self.relative_to_offset)
                    .wrapping_add_signed(disp)
            }
        }
    }

    /// Compute the final address, following indirection and jump stubs.
    ///
    /// `memory` is only read for indirect and precode kinds.
    pub fn process_address<R: ReadMemory + ?Sized>(
        &self,
        base: u64,
        offset: usize,
        raw: u64,
        memory: &R,
    ) -> Result<u64> {
        let mut address = self.resolve(base, offset, raw);
        if self.kind.indirect {
            address = memory.read_u64(address)?;
        }
        if self.kind.precode {
            address = follow_precode(address, memory)?;
        }
        Ok(address)
    }
}

impl Default for AddressMeaning {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for AddressMeaning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative_to_offset == 0 {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}+{}", self.kind, self.relative_to_offset)
        }
    }
}

const STUB_CALL_REL32: u8 = 0xE8;
const STUB_JMP_REL32: u8 = 0xE9;
const STUB_JMP_INDIRECT: [u8; 2] = [0xFF, 0x25];

/// Resolve a precode stub to the address it forwards to.
///
/// Recognized stubs are `call/jmp rel32` and `jmp [rel32]`; anything else is
/// taken to be the target itself.
fn follow_precode<R: ReadMemory + ?Sized>(stub: u64, memory: &R) -> Result<u64> {
    let head = memory.read_bytes(stub, 2)?;
    if head[0] == STUB_CALL_REL32 || head[0] == STUB_JMP_REL32 {
        let disp = memory.read_i32(stub.wrapping_add(1))?;
        return Ok(stub.wrapping_add(5).wrapping_add_signed(disp as i64));
    }
    if head[..] == STUB_JMP_INDIRECT {
        let disp = memory.read_i32(stub.wrapping_add(2))?;
        let slot = stub.wrapping_add(6).wrapping_add_signed(disp as i64);
        return memory.read_u64(slot);
    }
    Ok(stub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MockMemoryBuilder, SliceMemory};

    #[test]
    fn test_constructors_enforce_kind_split() {
        assert!(AddressMeaning::absolute(AddressKind::ABS64).is_ok());
        assert!(AddressMeaning::absolute(AddressKind::REL32).is_err());
        assert!(AddressMeaning::relative(AddressKind::REL32, 7).is_ok());
        assert!(AddressMeaning::relative(AddressKind::ABS32, 0).is_err());
        assert!(AddressMeaning::relative(AddressKind::REL32, -1).is_err());
    }

    #[test]
    fn test_equality_is_structural() {
        let a = AddressMeaning::relative(AddressKind::REL32, 7).unwrap();
        let b = AddressMeaning::relative(AddressKind::REL32, 7).unwrap();
        let c = AddressMeaning::relative(AddressKind::REL32.indirect(), 7).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_absolute_resolution() {
        let abs64 = AddressMeaning::absolute(AddressKind::ABS64).unwrap();
        assert_eq!(abs64.resolve(0x1000, 4, 0x1122_3344_5566_7788), 0x1122_3344_5566_7788);

        let abs32 = AddressMeaning::absolute(AddressKind::ABS32).unwrap();
        assert_eq!(abs32.resolve(0x1000, 4, 0xFFFF_FFFF_8000_0000), 0x8000_0000);
    }

    #[test]
    fn test_relative_resolution_sign_extends() {
        let rel = AddressMeaning::relative(AddressKind::REL32, 7).unwrap();
        assert_eq!(rel.resolve(0x1000, 0x10, 0x20), 0x1000 + 0x10 + 7 + 0x20);
        // -0x10 as a 32-bit displacement
        assert_eq!(rel.resolve(0x1000, 0x10, 0xFFFF_FFF0), 0x1000 + 0x10 + 7 - 0x10);

        let rel64 = AddressMeaning::relative(AddressKind::REL64, 0).unwrap();
        assert_eq!(rel64.resolve(0x1000, 0, (-8i64) as u64), 0x1000 - 8);
    }

    #[test]
    fn test_indirect_dereferences_once() {
        let memory = MockMemoryBuilder::new().u64(0x2000, 0xDEAD_BEEF).build();
        let meaning = AddressMeaning::absolute(AddressKind::ABS64.indirect()).unwrap();

        assert_eq!(meaning.process_address(0, 0, 0x2000, &memory).unwrap(), 0xDEAD_BEEF);
        assert!(meaning.process_address(0, 0, 0x3000, &memory).is_err());
    }

    #[test]
    fn test_direct_kinds_never_touch_memory() {
        let memory = SliceMemory::new(&[], 0);
        let meaning = AddressMeaning::relative(AddressKind::REL32, 5).unwrap();
        assert_eq!(meaning.process_address(0x4000, 1, 2, &memory).unwrap(), 0x4008);
    }

    #[test]
    fn test_precode_follows_jump_stub() {
        // jmp rel32 at 0x5000 -> 0x5005 + 0x100
        let memory = MockMemoryBuilder::new()
            .bytes(0x5000, &[0xE9, 0x00, 0x01, 0x00, 0x00, 0xCC])
            .bytes(0x6000, &[0x48, 0x89, 0x5C, 0x24, 0x08])
            .build();
        let meaning = AddressMeaning::absolute(AddressKind::ABS64.precode()).unwrap();

        assert_eq!(meaning.process_address(0, 0, 0x5000, &memory).unwrap(), 0x5105);
        // Not a stub: the address is the target.
        assert_eq!(meaning.process_address(0, 0, 0x6000, &memory).unwrap(), 0x6000);
    }

    #[test]
    fn test_precode_follows_indirect_jump_stub() {
        // jmp [rip+0x10] at 0x7000 reads the slot at 0x7016
        let memory = MockMemoryBuilder::new()
            .bytes(0x7000, &[0xFF, 0x25, 0x10, 0x00, 0x00, 0x00])
            .u64(0x7016, 0xABCD_0000)
            .build();
        let meaning = AddressMeaning::absolute(AddressKind::ABS64.precode()).unwrap();
        assert_eq!(meaning.process_address(0, 0, 0x7000, &memory).unwrap(), 0xABCD_0000);
    }

    #[test]
    fn test_precode_stub_at_top_of_address_space() {
        let stub = u64::MAX - 4;
        let image = [0xE9, 0x00, 0x00, 0x00, 0x00];
        let memory = SliceMemory::new(&image, stub);
        let meaning = AddressMeaning::absolute(AddressKind::ABS64.precode()).unwrap();

        // The jump target wraps around past the end of the address space.
        assert_eq!(meaning.process_address(0, 0, stub, &memory).unwrap(), 0);
    }

    #[test]
    fn test_truncated_stub_is_an_error() {
        let stub = u64::MAX - 2;
        let image = [0xFF, 0x25, 0x00];
        let memory = SliceMemory::new(&image, stub);
        let meaning = AddressMeaning::absolute(AddressKind::ABS64.precode()).unwrap();

        assert!(meaning.process_address(0, 0, stub, &memory).is_err());
    }

    #[test]
    fn test_kind_text_form() {
        let kind: AddressKind = "rel32|indirect".parse().unwrap();
        assert_eq!(kind, AddressKind::REL32.indirect());
        assert_eq!(kind.to_string(), "rel32|indirect");

        let kind: AddressKind = "ABS64 | Precode".parse().unwrap();
        assert_eq!(kind, AddressKind::ABS64.precode());

        assert!("rel16".parse::<AddressKind>().is_err());
        assert!("near32".parse::<AddressKind>().is_err());
        assert!("abs64|weird".parse::<AddressKind>().is_err());
        assert!("".parse::<AddressKind>().is_err());
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&AddressKind::REL64.precode()).unwrap();
        assert_eq!(json, "\"rel64|precode\"");
        let back: AddressKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AddressKind::REL64.precode());
        assert!(serde_json::from_str::<AddressKind>("\"bogus\"").is_err());
    }

    #[test]
    fn test_meaning_display() {
        let rel = AddressMeaning::relative(AddressKind::REL32, 7).unwrap();
        assert_eq!(rel.to_string(), "rel32+7");
        assert_eq!(AddressMeaning::NONE.to_string(), "abs64");
    }
}
