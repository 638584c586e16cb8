//! Typed CIM values.

use std::fmt;

use crate::datetime::CimDateTime;
use crate::element::Element;
use crate::objects::{CimClass, CimInstance};
use crate::path::ObjectPath;
use crate::types::CimType;
use crate::CimError;

/// A single CIM value or an array of (possibly NULL) values.
#[derive(Debug, Clone, PartialEq)]
pub enum CimValue {
    String(String),
    Char16(char),
    Boolean(bool),
    Uint8(u8),
    Sint8(i8),
    Uint16(u16),
    Sint16(i16),
    Uint32(u32),
    Sint32(i32),
    Uint64(u64),
    Sint64(i64),
    Real32(f32),
    Real64(f64),
    DateTime(CimDateTime),
    Reference(ObjectPath),
    /// Embedded instance, carried on the wire as an escaped string.
    Instance(Box<CimInstance>),
    /// Embedded class, carried on the wire as an escaped string.
    Class(Box<CimClass>),
    Array(Vec<Option<CimValue>>),
}

impl CimValue {
    /// Wrap an integer into the sized type `ty`, checking its range.
    pub fn from_integer(ty: CimType, value: i128) -> Result<Self, CimError> {
        let (min, max) = ty
            .integer_range()
            .ok_or_else(|| CimError::Type(format!("{ty} is not an integer type")))?;
        if value < min || value > max {
            return Err(CimError::value(format!(
                "integer value {value} is out of range for CIM type {ty} ({min}..={max})"
            )));
        }
        // The range check above makes the narrowing casts lossless.
        Ok(match ty {
            CimType::Uint8 => CimValue::Uint8(value as u8),
            CimType::Sint8 => CimValue::Sint8(value as i8),
            CimType::Uint16 => CimValue::Uint16(value as u16),
            CimType::Sint16 => CimValue::Sint16(value as i16),
            CimType::Uint32 => CimValue::Uint32(value as u32),
            CimType::Sint32 => CimValue::Sint32(value as i32),
            CimType::Uint64 => CimValue::Uint64(value as u64),
            _ => CimValue::Sint64(value as i64),
        })
    }

    /// Wrap a floating point number into `ty`.
    ///
    /// Integer types only accept values without a fractional part.
    pub fn from_real(ty: CimType, value: f64) -> Result<Self, CimError> {
        match ty {
            CimType::Real32 => {
                if value.is_finite() && value.abs() > f32::MAX as f64 {
                    return Err(CimError::value(format!(
                        "real value {value} is out of range for CIM type real32"
                    )));
                }
                Ok(CimValue::Real32(value as f32))
            }
            CimType::Real64 => Ok(CimValue::Real64(value)),
            ty if ty.is_integer() => {
                if !value.is_finite() || value.fract() != 0.0 {
                    return Err(CimError::value(format!(
                        "value {value} is not an integer and cannot be stored as CIM type {ty}"
                    )));
                }
                Self::from_integer(ty, value as i128)
            }
            ty => Err(CimError::Type(format!("{ty} is not a numeric type"))),
        }
    }

    /// CIM type of the value. Arrays report their element type; arrays of only
    /// NULLs have no determinable type.
    pub fn cim_type(&self) -> Option<CimType> {
        Some(match self {
            CimValue::String(_) | CimValue::Instance(_) | CimValue::Class(_) => CimType::String,
            CimValue::Char16(_) => CimType::Char16,
            CimValue::Boolean(_) => CimType::Boolean,
            CimValue::Uint8(_) => CimType::Uint8,
            CimValue::Sint8(_) => CimType::Sint8,
            CimValue::Uint16(_) => CimType::Uint16,
            CimValue::Sint16(_) => CimType::Sint16,
            CimValue::Uint32(_) => CimType::Uint32,
            CimValue::Sint32(_) => CimType::Sint32,
            CimValue::Uint64(_) => CimType::Uint64,
            CimValue::Sint64(_) => CimType::Sint64,
            CimValue::Real32(_) => CimType::Real32,
            CimValue::Real64(_) => CimType::Real64,
            CimValue::DateTime(_) => CimType::DateTime,
            CimValue::Reference(_) => CimType::Reference,
            CimValue::Array(items) => return items.iter().flatten().find_map(CimValue::cim_type),
        })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, CimValue::Array(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CimValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CimValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value of any sized integer variant.
    pub fn as_i128(&self) -> Option<i128> {
        Some(match self {
            CimValue::Uint8(v) => *v as i128,
            CimValue::Sint8(v) => *v as i128,
            CimValue::Uint16(v) => *v as i128,
            CimValue::Sint16(v) => *v as i128,
            CimValue::Uint32(v) => *v as i128,
            CimValue::Sint32(v) => *v as i128,
            CimValue::Uint64(v) => *v as i128,
            CimValue::Sint64(v) => *v as i128,
            _ => return None,
        })
    }

    pub fn as_reference(&self) -> Option<&ObjectPath> {
        match self {
            CimValue::Reference(p) => Some(p),
            _ => None,
        }
    }

    /// `VALUE`, `VALUE.ARRAY`, `VALUE.REFERENCE` or `VALUE.REFARRAY` element.
    pub fn to_element(&self) -> Element {
        match self {
            CimValue::Array(items) => {
                let refs = items
                    .iter()
                    .flatten()
                    .any(|v| matches!(v, CimValue::Reference(_)));
                let name = if refs { "VALUE.REFARRAY" } else { "VALUE.ARRAY" };
                Element::new(name).children(items.iter().map(|item| match item {
                    Some(v) => v.to_element(),
                    None => Element::new("VALUE.NULL"),
                }))
            }
            CimValue::Reference(path) => Element::new("VALUE.REFERENCE").child(path.to_element()),
            other => Element::new("VALUE").text(other.to_value_text()),
        }
    }

    /// Text carried in a `VALUE` element for scalar values.
    ///
    /// Embedded objects render as their CIM-XML serialization; the element
    /// writer escapes it once more on output.
    pub fn to_value_text(&self) -> String {
        match self {
            CimValue::String(s) => s.clone(),
            CimValue::Char16(c) => c.to_string(),
            CimValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CimValue::Real32(v) => format_real(*v as f64),
            CimValue::Real64(v) => format_real(*v),
            CimValue::DateTime(dt) => dt.to_string(),
            CimValue::Instance(inst) => inst.to_element().to_xml(),
            CimValue::Class(class) => class.to_element().to_xml(),
            CimValue::Reference(path) => path.to_string(),
            CimValue::Array(_) => self.to_string(),
            other => other
                .as_i128()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        }
    }
}

fn format_real(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "INF" } else { "-INF" }.into()
    } else {
        format!("{v:?}")
    }
}

impl fmt::Display for CimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CimValue::Array(items) => {
                f.write_str("{")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Some(CimValue::String(s)) => write!(f, "{s:?}")?,
                        Some(v) => write!(f, "{v}")?,
                        None => f.write_str("NULL")?,
                    }
                }
                f.write_str("}")
            }
            CimValue::Instance(inst) => write!(f, "instance of {}", inst.classname),
            CimValue::Class(class) => write!(f, "class {}", class.classname),
            other => f.write_str(&other.to_value_text()),
        }
    }
}

impl From<&str> for CimValue {
    fn from(value: &str) -> Self {
        CimValue::String(value.to_string())
    }
}

impl From<String> for CimValue {
    fn from(value: String) -> Self {
        CimValue::String(value)
    }
}

impl From<bool> for CimValue {
    fn from(value: bool) -> Self {
        CimValue::Boolean(value)
    }
}

macro_rules! impl_from_number {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for CimValue {
                fn from(value: $ty) -> Self {
                    CimValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_number!(
    u8 => Uint8,
    i8 => Sint8,
    u16 => Uint16,
    i16 => Sint16,
    u32 => Uint32,
    i32 => Sint32,
    u64 => Uint64,
    i64 => Sint64,
    f32 => Real32,
    f64 => Real64,
);

impl From<CimDateTime> for CimValue {
    fn from(value: CimDateTime) -> Self {
        CimValue::DateTime(value)
    }
}

impl From<ObjectPath> for CimValue {
    fn from(value: ObjectPath) -> Self {
        CimValue::Reference(value)
    }
}

impl From<CimInstance> for CimValue {
    fn from(value: CimInstance) -> Self {
        CimValue::Instance(Box::new(value))
    }
}

impl From<CimClass> for CimValue {
    fn from(value: CimClass) -> Self {
        CimValue::Class(Box::new(value))
    }
}
