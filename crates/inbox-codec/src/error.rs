use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{field} length exceeds {max}: {len}")]
    LengthOverflow { field: &'static str, len: usize, max: usize },
    #[error("{field} value {value} does not fit in {bits} bits")]
    ValueOverflow { field: &'static str, value: u64, bits: u32 },
    #[error("unexpected end of input: need {needed} bytes at offset {offset}, input is {len} bytes")]
    UnexpectedEof { offset: usize, needed: usize, len: usize },
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("proposal-transition length mismatch: {proposals} != {transitions}")]
    LengthMismatch { proposals: usize, transitions: usize },
    #[error("metadata length mismatch: {metadata} != {transitions}")]
    MetadataMismatch { metadata: usize, transitions: usize },
    #[error("invalid bond type: {0}")]
    InvalidBondType(u8),
    #[error("invalid checkpoint flag: {0}")]
    InvalidCheckpointFlag(u8),
}
