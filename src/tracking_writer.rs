#![forbid(unsafe_code)]

use std::io::{self, Write};

use anyhow::Result;
use crc::{Crc, Digest};

use crate::error::DecodeError;

////////////////////////////////////////////////////////////////////////////////

// Back-references reach at most 32 KiB behind the write cursor.
const HISTORY_SIZE: usize = 32 * (1 << 10);

static CRC_CODER: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// A `Write` adapter that keeps the trailing 32 KiB of everything written
/// (the LZ77 window), a running CRC-32 and a byte count. One instance
/// lives for exactly one gzip member, so the window spans block boundaries
/// but never leaks between members.
pub struct TrackingWriter<W> {
    inner: W,
    history: Vec<u8>,
    crc_digest: Digest<'static, u32>,
    num_bytes: usize,
}

impl<W: Write> Write for TrackingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;

        self.crc_digest.update(&buf[..written]);
        self.history.extend_from_slice(&buf[..written]);
        if self.history.len() > HISTORY_SIZE {
            let excess = self.history.len() - HISTORY_SIZE;
            self.history.drain(..excess);
        }

        self.num_bytes += written;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> TrackingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            history: Vec::with_capacity(HISTORY_SIZE),
            crc_digest: CRC_CODER.digest(),
            num_bytes: 0,
        }
    }

    /// Re-emits `len` bytes starting `distance` bytes behind the cursor.
    ///
    /// The copy runs one byte at a time: when `distance < len` it overlaps
    /// itself and picks the freshly written bytes up again, which is how
    /// run-length fills are encoded. A slice copy would get this wrong.
    pub fn write_previous(&mut self, distance: usize, len: usize) -> Result<()> {
        if distance == 0 {
            anyhow::bail!(DecodeError::InvalidDistance("distance is zero"));
        }
        if distance > self.history.len() {
            anyhow::bail!(DecodeError::InvalidDistance(
                "distance reaches past the start of output"
            ));
        }

        for _ in 0..len {
            let byte = self.history[self.history.len() - distance];
            if self.write(&[byte])? != 1 {
                anyhow::bail!("output sink refused a back-reference byte");
            }
        }

        Ok(())
    }

    /// Bytes written so far within the current member.
    pub fn byte_count(&self) -> usize {
        self.num_bytes
    }

    pub fn crc32(self) -> u32 {
        self.crc_digest.finalize()
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    #[test]
    fn write() -> Result<()> {
        let mut buf: &mut [u8] = &mut [0u8; 10];
        let mut writer = TrackingWriter::new(&mut buf);

        assert_eq!(writer.write(&[1, 2, 3, 4])?, 4);
        assert_eq!(writer.byte_count(), 4);

        assert_eq!(writer.write(&[4, 8, 15, 16, 23])?, 5);
        assert_eq!(writer.byte_count(), 9);

        assert_eq!(writer.write(&[0, 0, 123])?, 1);
        assert_eq!(writer.byte_count(), 10);

        assert_eq!(writer.write(&[42, 124, 234, 27])?, 0);
        assert_eq!(writer.byte_count(), 10);
        assert_eq!(writer.crc32(), 2992191065);

        Ok(())
    }

    #[test]
    fn crc_check_value() -> Result<()> {
        let mut sink = Vec::new();
        let mut writer = TrackingWriter::new(&mut sink);
        writer.write_all(b"123456789")?;
        assert_eq!(writer.crc32(), 0xcbf43926);
        Ok(())
    }

    #[test]
    fn empty_crc_is_zero() {
        let writer = TrackingWriter::new(Vec::new());
        assert_eq!(writer.crc32(), 0);
    }

    #[test]
    fn write_previous() -> Result<()> {
        let mut buf: &mut [u8] = &mut [0u8; 512];
        let mut writer = TrackingWriter::new(&mut buf);

        for i in 0..=255 {
            writer.write_u8(i)?;
        }

        writer.write_previous(192, 128)?;
        assert_eq!(writer.byte_count(), 384);

        assert!(writer.write_previous(10000, 20).is_err());
        assert_eq!(writer.byte_count(), 384);

        assert!(writer.write_previous(256, 256).is_err());
        assert_eq!(writer.byte_count(), 512);

        assert!(writer.write_previous(1, 1).is_err());
        assert_eq!(writer.byte_count(), 512);
        assert_eq!(writer.crc32(), 2733545866);

        Ok(())
    }

    #[test]
    fn overlapping_copy_repeats_last_byte() -> Result<()> {
        let mut sink = Vec::new();
        let mut writer = TrackingWriter::new(&mut sink);
        writer.write_all(b"a")?;
        writer.write_previous(1, 5)?;
        assert_eq!(writer.byte_count(), 6);
        drop(writer);
        assert_eq!(sink, b"aaaaaa");
        Ok(())
    }

    #[test]
    fn overlapping_copy_repeats_pattern() -> Result<()> {
        let mut sink = Vec::new();
        let mut writer = TrackingWriter::new(&mut sink);
        writer.write_all(b"ab")?;
        writer.write_previous(2, 7)?;
        drop(writer);
        assert_eq!(sink, b"ababababa");
        Ok(())
    }

    #[test]
    fn zero_distance_rejected() {
        let mut writer = TrackingWriter::new(Vec::new());
        writer.write_all(b"xyz").unwrap();
        let err = writer.write_previous(0, 3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::InvalidDistance(_))
        ));
    }
}
