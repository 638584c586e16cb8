//! The CIM type system (DSP0004 intrinsic data types).

use std::fmt;
use std::str::FromStr;

use crate::CimError;

/// CIM data type as carried by the `TYPE`/`PARAMTYPE` attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CimType {
    String,
    Char16,
    Boolean,
    Uint8,
    Sint8,
    Uint16,
    Sint16,
    Uint32,
    Sint32,
    Uint64,
    Sint64,
    Real32,
    Real64,
    DateTime,
    Reference,
}

impl CimType {
    /// All types in DSP0201 attribute order.
    pub const ALL: [CimType; 15] = [
        CimType::String,
        CimType::Char16,
        CimType::Boolean,
        CimType::Uint8,
        CimType::Sint8,
        CimType::Uint16,
        CimType::Sint16,
        CimType::Uint32,
        CimType::Sint32,
        CimType::Uint64,
        CimType::Sint64,
        CimType::Real32,
        CimType::Real64,
        CimType::DateTime,
        CimType::Reference,
    ];

    /// Name as it appears on the wire.
    pub const fn name(self) -> &'static str {
        match self {
            CimType::String => "string",
            CimType::Char16 => "char16",
            CimType::Boolean => "boolean",
            CimType::Uint8 => "uint8",
            CimType::Sint8 => "sint8",
            CimType::Uint16 => "uint16",
            CimType::Sint16 => "sint16",
            CimType::Uint32 => "uint32",
            CimType::Sint32 => "sint32",
            CimType::Uint64 => "uint64",
            CimType::Sint64 => "sint64",
            CimType::Real32 => "real32",
            CimType::Real64 => "real64",
            CimType::DateTime => "datetime",
            CimType::Reference => "reference",
        }
    }

    /// Look up a type by its wire name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.name().eq_ignore_ascii_case(name.trim()))
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            CimType::Uint8
                | CimType::Sint8
                | CimType::Uint16
                | CimType::Sint16
                | CimType::Uint32
                | CimType::Sint32
                | CimType::Uint64
                | CimType::Sint64
        )
    }

    pub const fn is_real(self) -> bool {
        matches!(self, CimType::Real32 | CimType::Real64)
    }

    pub const fn is_numeric(self) -> bool {
        self.is_integer() || self.is_real()
    }

    /// Inclusive value range of an integer type.
    pub const fn integer_range(self) -> Option<(i128, i128)> {
        match self {
            CimType::Uint8 => Some((0, u8::MAX as i128)),
            CimType::Sint8 => Some((i8::MIN as i128, i8::MAX as i128)),
            CimType::Uint16 => Some((0, u16::MAX as i128)),
            CimType::Sint16 => Some((i16::MIN as i128, i16::MAX as i128)),
            CimType::Uint32 => Some((0, u32::MAX as i128)),
            CimType::Sint32 => Some((i32::MIN as i128, i32::MAX as i128)),
            CimType::Uint64 => Some((0, u64::MAX as i128)),
            CimType::Sint64 => Some((i64::MIN as i128, i64::MAX as i128)),
            _ => None,
        }
    }

    /// `VALUETYPE` attribute value used for keybindings of this type.
    pub const fn key_value_type(self) -> &'static str {
        match self {
            CimType::Boolean => "boolean",
            t if t.is_numeric() => "numeric",
            _ => "string",
        }
    }
}

impl fmt::Display for CimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CimType {
    type Err = CimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CimType::from_name(s).ok_or_else(|| CimError::value(format!("invalid CIM type name: {s:?}")))
    }
}
