//! The bytecode container.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! offset  size  field
//! 0       16    version (two 64 bit words)
//! 16      8     size of the data and text sections combined
//! 24      8     data section offset, from the end of the header
//! 32      8     text section offset, from the end of the header
//! 40      8     start offset within the text section
//! 48      ..    data section, then text section
//! ```
//!
//! The foreign function table follows the text section: a `u32` entry count,
//! then per entry `{u16 argument count, u8 return type, u8 argument
//! types[], u16 name length, name bytes}`.

use scatha_types::{FfiType, ForeignFunction};
use static_assertions::const_assert_eq;

/// Size of the fixed program header in bytes.
pub const HEADER_SIZE: usize = 48;

/// Version words written into freshly assembled programs.
pub const VERSION: [u64; 2] = [1, 0];

const_assert_eq!(HEADER_SIZE, 16 + 8 + 8 + 8 + 8);

/// A loaded or assembled bytecode program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    /// Version words.
    pub version: [u64; 2],
    /// Static data section, mapped at slot 0 by the VM.
    pub data: Vec<u8>,
    /// Text section.
    pub text: Vec<u8>,
    /// Entry offset within the text section.
    pub start: u64,
    /// Foreign function table.
    pub foreign: Vec<ForeignFunction>,
}

/// Error from decoding a program container.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgramError {
    /// Fewer bytes than a header.
    #[error("program is truncated: {0} bytes")]
    Truncated(usize),
    /// Section offsets point outside the container.
    #[error("malformed program header")]
    MalformedHeader,
    /// Foreign function table does not decode.
    #[error("malformed foreign function table")]
    MalformedForeignTable,
    /// Unknown FFI type byte.
    #[error(transparent)]
    InvalidFfiType(#[from] scatha_types::InvalidFfiType),
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let slice = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes(slice.try_into().unwrap()))
}

impl Program {
    /// Serializes the container.
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = (self.data.len() + self.text.len()) as u64;
        let data_offset = 0u64;
        let text_offset = self.data.len() as u64;
        let mut out = Vec::with_capacity(HEADER_SIZE + size as usize);
        out.extend_from_slice(&self.version[0].to_le_bytes());
        out.extend_from_slice(&self.version[1].to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&data_offset.to_le_bytes());
        out.extend_from_slice(&text_offset.to_le_bytes());
        out.extend_from_slice(&self.start.to_le_bytes());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.text);
        out.extend_from_slice(&(self.foreign.len() as u32).to_le_bytes());
        for function in &self.foreign {
            out.extend_from_slice(&(function.arg_types.len() as u16).to_le_bytes());
            out.push(function.return_type as u8);
            for &arg in &function.arg_types {
                out.push(arg as u8);
            }
            out.extend_from_slice(&(function.name.len() as u16).to_le_bytes());
            out.extend_from_slice(function.name.as_bytes());
        }
        out
    }

    /// Decodes a container.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProgramError::Truncated(bytes.len()));
        }
        let version = [read_u64(bytes, 0).unwrap(), read_u64(bytes, 8).unwrap()];
        let size = read_u64(bytes, 16).unwrap() as usize;
        let data_offset = read_u64(bytes, 24).unwrap() as usize;
        let text_offset = read_u64(bytes, 32).unwrap() as usize;
        let start = read_u64(bytes, 40).unwrap();
        if data_offset > text_offset
            || text_offset > size
            || HEADER_SIZE + size > bytes.len()
        {
            return Err(ProgramError::MalformedHeader);
        }
        let data = bytes[HEADER_SIZE + data_offset..HEADER_SIZE + text_offset].to_vec();
        let text = bytes[HEADER_SIZE + text_offset..HEADER_SIZE + size].to_vec();
        let mut offset = HEADER_SIZE + size;
        let count = read_u32(bytes, offset).ok_or(ProgramError::MalformedForeignTable)?;
        offset += 4;
        let mut foreign = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let arg_count =
                read_u16(bytes, offset).ok_or(ProgramError::MalformedForeignTable)? as usize;
            offset += 2;
            let ret = *bytes
                .get(offset)
                .ok_or(ProgramError::MalformedForeignTable)?;
            offset += 1;
            let mut arg_types = Vec::with_capacity(arg_count);
            for _ in 0..arg_count {
                let byte = *bytes
                    .get(offset)
                    .ok_or(ProgramError::MalformedForeignTable)?;
                offset += 1;
                arg_types.push(FfiType::try_from(byte)?);
            }
            let name_len =
                read_u16(bytes, offset).ok_or(ProgramError::MalformedForeignTable)? as usize;
            offset += 2;
            let name_bytes = bytes
                .get(offset..offset + name_len)
                .ok_or(ProgramError::MalformedForeignTable)?;
            offset += name_len;
            foreign.push(ForeignFunction {
                name: String::from_utf8(name_bytes.to_vec())
                    .map_err(|_| ProgramError::MalformedForeignTable)?,
                arg_types,
                return_type: FfiType::try_from(ret)?,
            });
        }
        Ok(Self {
            version,
            data,
            text,
            start,
            foreign,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_round_trip() {
        let program = Program {
            version: VERSION,
            data: vec![1, 2, 3, 4],
            text: vec![0xaa; 17],
            start: 5,
            foreign: vec![ForeignFunction {
                name: "putstr".into(),
                arg_types: vec![FfiType::Pointer, FfiType::Int64],
                return_type: FfiType::Void,
            }],
        };
        let bytes = program.to_bytes();
        assert_eq!(Program::from_bytes(&bytes).unwrap(), program);
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert_eq!(
            Program::from_bytes(&[0; 10]),
            Err(ProgramError::Truncated(10))
        );
    }
}
