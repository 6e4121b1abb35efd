#![forbid(unsafe_code)]

use std::io::{BufRead, Write};

use anyhow::Result;

use crate::gzip::GzipReader;

mod bit_reader;
mod deflate;
pub mod error;
mod gzip;
mod huffman_coding;
mod tracking_writer;

pub use crate::error::DecodeError;

/// Decompresses a stream of concatenated gzip members from `input` into
/// `output`.
///
/// Trailing bytes that do not start another member end decoding without an
/// error. Corruption inside a member is fatal and surfaces as a
/// [`DecodeError`] in the `anyhow` chain; truncated input surfaces as
/// `std::io::Error` with kind `UnexpectedEof`.
pub fn decompress<R: BufRead, W: Write>(input: R, output: W) -> Result<()> {
    GzipReader::new(input, output).decompress_all()
}
