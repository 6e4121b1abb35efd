#![forbid(unsafe_code)]

use std::io::{BufRead, ErrorKind, Write};

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use crc::Crc;
use log::debug;

use crate::bit_reader::BitReader;
use crate::deflate::DeflateReader;
use crate::error::DecodeError;
use crate::tracking_writer::TrackingWriter;

////////////////////////////////////////////////////////////////////////////////

const ID1: u8 = 0x1f;
const ID2: u8 = 0x8b;

const CM_DEFLATE: u8 = 8;

const FTEXT_OFFSET: u8 = 0;
const FHCRC_OFFSET: u8 = 1;
const FEXTRA_OFFSET: u8 = 2;
const FNAME_OFFSET: u8 = 3;
const FCOMMENT_OFFSET: u8 = 4;
const FRESERVED_MASK: u8 = 0xe0;

static CRC_CODER: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
pub struct MemberHeader {
    pub compression_method: CompressionMethod,
    pub flags: MemberFlags,
    pub modification_time: u32,
    pub extra: Option<Vec<u8>>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub extra_flags: u8,
    pub os: u8,
}

impl MemberHeader {
    /// The low 16 bits of a CRC-32 over every header byte before the FHCRC
    /// field itself, recomputed from the parsed fields.
    pub fn crc16(&self) -> u16 {
        let mut digest = CRC_CODER.digest();

        digest.update(&[ID1, ID2, self.compression_method.into(), self.flags.0]);
        digest.update(&self.modification_time.to_le_bytes());
        digest.update(&[self.extra_flags, self.os]);

        if let Some(extra) = &self.extra {
            digest.update(&(extra.len() as u16).to_le_bytes());
            digest.update(extra);
        }

        if let Some(name) = &self.name {
            digest.update(name.as_bytes());
            digest.update(&[0]);
        }

        if let Some(comment) = &self.comment {
            digest.update(comment.as_bytes());
            digest.update(&[0]);
        }

        (digest.finalize() & 0xffff) as u16
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug)]
pub enum CompressionMethod {
    Deflate,
    Unknown(u8),
}

impl Default for CompressionMethod {
    fn default() -> Self {
        CompressionMethod::Unknown(0)
    }
}

impl From<u8> for CompressionMethod {
    fn from(value: u8) -> Self {
        match value {
            CM_DEFLATE => Self::Deflate,
            x => Self::Unknown(x),
        }
    }
}

impl From<CompressionMethod> for u8 {
    fn from(method: CompressionMethod) -> u8 {
        match method {
            CompressionMethod::Deflate => CM_DEFLATE,
            CompressionMethod::Unknown(x) => x,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// The raw FLG byte, kept as parsed so the FHCRC digest can replay it.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemberFlags(u8);

#[allow(unused)]
impl MemberFlags {
    fn bit(&self, n: u8) -> bool {
        (self.0 >> n) & 1 != 0
    }

    pub fn is_text(&self) -> bool {
        self.bit(FTEXT_OFFSET)
    }

    pub fn has_crc(&self) -> bool {
        self.bit(FHCRC_OFFSET)
    }

    pub fn has_extra(&self) -> bool {
        self.bit(FEXTRA_OFFSET)
    }

    pub fn has_name(&self) -> bool {
        self.bit(FNAME_OFFSET)
    }

    pub fn has_comment(&self) -> bool {
        self.bit(FCOMMENT_OFFSET)
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct MemberFooter {
    pub data_crc32: u32,
    pub data_size: u32,
}

////////////////////////////////////////////////////////////////////////////////

enum MagicProbe {
    Member,
    EndOfStream,
}

pub struct GzipReader<R, W> {
    reader: BitReader<R>,
    output: W,
}

impl<R: BufRead, W: Write> GzipReader<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            reader: BitReader::new(input),
            output,
        }
    }

    /// Decodes every member in the stream. Ends cleanly at end of input,
    /// or when the bytes following a complete member are not a gzip magic.
    pub fn decompress_all(&mut self) -> Result<()> {
        let mut members = 0usize;
        loop {
            match self.read_magic(members > 0)? {
                MagicProbe::EndOfStream => return Ok(()),
                MagicProbe::Member => {}
            }
            self.read_member()?;
            members += 1;
        }
    }

    fn read_magic(&mut self, lenient: bool) -> Result<MagicProbe> {
        let stream = self.reader.borrow_reader_from_boundary();

        let id1 = match stream.read_u8() {
            Ok(byte) => byte,
            Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(MagicProbe::EndOfStream)
            }
            Err(e) => return Err(e.into()),
        };
        let id2 = match stream.read_u8() {
            Ok(byte) => byte,
            Err(ref e) if e.kind() == ErrorKind::UnexpectedEof && lenient => {
                return Ok(MagicProbe::EndOfStream)
            }
            Err(e) => return Err(e.into()),
        };

        if id1 != ID1 || id2 != ID2 {
            if lenient {
                return Ok(MagicProbe::EndOfStream);
            }
            anyhow::bail!(DecodeError::BadMagic(id1, id2));
        }

        Ok(MagicProbe::Member)
    }

    fn read_header(&mut self) -> Result<MemberHeader> {
        let stream = self.reader.borrow_reader_from_boundary();

        let cm = stream.read_u8()?;
        let flg = stream.read_u8()?;
        if flg & FRESERVED_MASK != 0 {
            anyhow::bail!(DecodeError::ReservedFlag(flg));
        }
        let flags = MemberFlags(flg);

        let mut header = MemberHeader {
            compression_method: CompressionMethod::from(cm),
            flags,
            modification_time: stream.read_u32::<LittleEndian>()?,
            ..MemberHeader::default()
        };
        header.extra_flags = stream.read_u8()?;
        header.os = stream.read_u8()?;

        if flags.has_extra() {
            let xlen = stream.read_u16::<LittleEndian>()?;
            let mut extra = vec![0u8; xlen as usize];
            stream.read_exact(&mut extra)?;
            header.extra = Some(extra);
        }

        if flags.has_name() {
            header.name = Some(read_zero_terminated(stream)?);
        }

        if flags.has_comment() {
            header.comment = Some(read_zero_terminated(stream)?);
        }

        if flags.has_crc() {
            let stored = stream.read_u16::<LittleEndian>()?;
            let computed = header.crc16();
            if stored != computed {
                anyhow::bail!(DecodeError::ChecksumMismatch {
                    stored: stored as u32,
                    computed: computed as u32,
                });
            }
        }

        Ok(header)
    }

    fn read_deflate_bitstream(&mut self) -> Result<(usize, u32)> {
        let mut writer = TrackingWriter::new(&mut self.output);

        // The nested reader starts at the byte boundary; dropping it
        // discards the bits of the final partial byte, which is exactly
        // the alignment required before the trailer.
        let mut deflate = DeflateReader::new(self.reader.borrow_reader_from_boundary());
        while !deflate.decode_block(&mut writer)? {}

        Ok((writer.byte_count(), writer.crc32()))
    }

    fn read_footer(&mut self) -> Result<MemberFooter> {
        let stream = self.reader.borrow_reader_from_boundary();

        Ok(MemberFooter {
            data_crc32: stream.read_u32::<LittleEndian>()?,
            data_size: stream.read_u32::<LittleEndian>()?,
        })
    }

    fn read_member(&mut self) -> Result<()> {
        let header = self.read_header()?;

        match header.compression_method {
            CompressionMethod::Deflate => {}
            CompressionMethod::Unknown(value) => {
                anyhow::bail!(DecodeError::UnsupportedMethod(value))
            }
        }
        debug!(
            "member: mtime={} os={} name={:?}",
            header.modification_time, header.os, header.name
        );

        let (byte_count, crc32) = self.read_deflate_bitstream()?;
        let footer = self.read_footer()?;

        if footer.data_size != byte_count as u32 {
            anyhow::bail!(DecodeError::SizeMismatch {
                stored: footer.data_size,
                computed: byte_count as u32,
            });
        }

        if footer.data_crc32 != crc32 {
            anyhow::bail!(DecodeError::ChecksumMismatch {
                stored: footer.data_crc32,
                computed: crc32,
            });
        }

        debug!("member ok: {} bytes, crc32 {:#010x}", byte_count, crc32);
        Ok(())
    }
}

fn read_zero_terminated(stream: &mut impl BufRead) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = stream.read_u8()?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

////////////////////////////////////////////////////////////////////////////////
