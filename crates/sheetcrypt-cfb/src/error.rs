use thiserror::Error;

/// Why a sector chain walk was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFault {
    /// A link points outside the allocation table.
    OutOfRange(u32),
    /// The chain visited more sectors than the table holds.
    Cycle,
    /// A link holds a FREESECT/FATSECT/DIFSECT marker instead of a sector or ENDOFCHAIN.
    UnexpectedMarker(u32),
}

impl std::fmt::Display for ChainFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainFault::OutOfRange(sector) => write!(f, "link to sector {sector} is out of range"),
            ChainFault::Cycle => f.write_str("chain does not terminate"),
            ChainFault::UnexpectedMarker(marker) => write!(f, "unexpected marker {marker:#010x}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CfbError {
    #[error("not a compound file (bad signature)")]
    InvalidSignature,
    #[error("truncated {context}: need {expected} bytes, have {actual}")]
    Truncated {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("broken {table} chain starting at sector {start}: {reason}")]
    BrokenChain {
        table: &'static str,
        start: u32,
        reason: ChainFault,
    },
    #[error("invalid directory: {0}")]
    InvalidDirectory(String),
    #[error("stream not found: {0}")]
    StreamNotFound(String),
    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),
    #[error("FAT size did not converge while planning the layout")]
    LayoutDiverged,
    #[error("container too large: {0}")]
    TooLarge(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
