#![forbid(unsafe_code)]

use thiserror::Error;

/// Ways a gzip stream can fail to decode.
///
/// Values travel inside `anyhow::Error` and stay downcastable, so callers
/// can tell stream corruption apart from I/O failures. Truncated input is
/// not represented here: it surfaces as `std::io::Error` with kind
/// `UnexpectedEof`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("not a gzip stream: expected magic 1f 8b, found {0:02x} {1:02x}")]
    BadMagic(u8, u8),

    #[error("unsupported compression method {0} (only 8 = deflate)")]
    UnsupportedMethod(u8),

    #[error("reserved header flag bits set: {0:#010b}")]
    ReservedFlag(u8),

    #[error("invalid code lengths: {0}")]
    InvalidCodeLengths(&'static str),

    #[error("no prefix code matched after 15 bits")]
    InvalidCode,

    #[error("invalid back-reference distance: {0}")]
    InvalidDistance(&'static str),

    #[error("corrupt block: {0}")]
    CorruptBlock(&'static str),

    #[error("crc32 mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("size mismatch: trailer says {stored} bytes, decoded {computed}")]
    SizeMismatch { stored: u32, computed: u32 },
}
