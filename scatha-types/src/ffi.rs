use core::fmt;

use serde::{Deserialize, Serialize};

/// Value type crossing the foreign function boundary. One byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, Serialize, Deserialize)]
#[repr(u8)]
pub enum FfiType {
    /// No value.
    Void = 0,
    /// 8 bit integer.
    Int8 = 1,
    /// 16 bit integer.
    Int16 = 2,
    /// 32 bit integer.
    Int32 = 3,
    /// 64 bit integer.
    Int64 = 4,
    /// 32 bit IEEE-754 value.
    Float = 5,
    /// 64 bit IEEE-754 value.
    Double = 6,
    /// Virtual pointer.
    Pointer = 7,
}

/// The byte does not name a known [`FfiType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid FFI type byte: {0:#x}")]
pub struct InvalidFfiType(pub u8);

impl TryFrom<u8> for FfiType {
    type Error = InvalidFfiType;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::Void),
            1 => Ok(Self::Int8),
            2 => Ok(Self::Int16),
            3 => Ok(Self::Int32),
            4 => Ok(Self::Int64),
            5 => Ok(Self::Float),
            6 => Ok(Self::Double),
            7 => Ok(Self::Pointer),
            _ => Err(InvalidFfiType(byte)),
        }
    }
}

impl FfiType {
    /// Size of a value of this type in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 4,
            Self::Int64 | Self::Double | Self::Pointer => 8,
            Self::Float => 4,
        }
    }
}

impl fmt::Display for FfiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Void => "void",
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::Float => "f32",
            Self::Double => "f64",
            Self::Pointer => "ptr",
        };
        f.write_str(name)
    }
}

/// Position of a foreign function in the VM's function table.
///
/// `slot` selects a library (slot 0 is the builtin table), `index` the
/// function within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignFunctionId {
    /// Library slot. Same width as the virtual pointer slot field.
    pub slot: u16,
    /// Index within the library slot.
    pub index: u32,
}

/// Interface description of a foreign function, as stored in the binary's
/// foreign function table and bound by the VM at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignFunction {
    /// Symbol name the loader resolves.
    pub name: String,
    /// Argument types in call order.
    pub arg_types: Vec<FfiType>,
    /// Return type.
    pub return_type: FfiType,
}

impl fmt::Display for ForeignFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (i, arg) in self.arg_types.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn byte_round_trip() {
        for ty in FfiType::iter() {
            assert_eq!(FfiType::try_from(ty as u8), Ok(ty));
        }
        assert_eq!(FfiType::try_from(8), Err(InvalidFfiType(8)));
    }

    #[test]
    fn display() {
        let f = ForeignFunction {
            name: "memcpy".into(),
            arg_types: vec![FfiType::Pointer, FfiType::Pointer, FfiType::Int64],
            return_type: FfiType::Void,
        };
        assert_eq!(f.to_string(), "void memcpy(ptr, ptr, i64)");
    }
}
