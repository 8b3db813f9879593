use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A source position referenced from the debug sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Index into [`DebugInfo::source_files`].
    pub file: usize,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Half-open range of text offsets a function occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    /// First text offset of the function.
    pub start: u64,
    /// One past the last text offset.
    pub end: u64,
}

/// Contents of a `.scdsym` sidecar: the map from binary offsets back to
/// source terms. Serialized as JSON next to the binary; loaded lazily by
/// the VM and the debugger for error reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    /// Paths of the compiled source files.
    pub source_files: Vec<String>,
    /// Text range of every function, by name.
    pub functions: BTreeMap<String, OffsetRange>,
    /// Source location of individual text offsets.
    pub locations: Vec<(u64, SourceLocation)>,
}

/// File suffix of the sidecar.
pub const DEBUG_INFO_SUFFIX: &str = ".scdsym";
