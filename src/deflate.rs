#![forbid(unsafe_code)]

use std::io::{BufRead, Write};

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::trace;

use crate::bit_reader::BitReader;
use crate::error::DecodeError;
use crate::huffman_coding::{
    decode_litlen_distance_trees, fixed_distance_tree, fixed_litlen_tree, DistanceToken,
    HuffmanCoding, LitLenToken,
};
use crate::tracking_writer::TrackingWriter;

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct BlockHeader {
    pub is_final: bool,
    pub compression_type: CompressionType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionType {
    Uncompressed = 0,
    FixedTree = 1,
    DynamicTree = 2,
    Reserved = 3,
}

////////////////////////////////////////////////////////////////////////////////

pub struct DeflateReader<R> {
    bit_reader: BitReader<R>,
}

impl<R: BufRead> DeflateReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            bit_reader: BitReader::new(stream),
        }
    }

    fn read_header(&mut self) -> Result<BlockHeader> {
        let is_final = self.bit_reader.read_bits(1)? != 0;
        let compression_type = match self.bit_reader.read_bits(2)? {
            0 => CompressionType::Uncompressed,
            1 => CompressionType::FixedTree,
            2 => CompressionType::DynamicTree,
            _ => CompressionType::Reserved,
        };

        Ok(BlockHeader {
            is_final,
            compression_type,
        })
    }

    /// Decodes one block into `output` and reports whether it carried the
    /// BFINAL flag.
    pub fn decode_block<W: Write>(&mut self, output: &mut TrackingWriter<W>) -> Result<bool> {
        let header = self.read_header()?;
        trace!(
            "block: final={} type={:?}",
            header.is_final,
            header.compression_type
        );

        match header.compression_type {
            CompressionType::Uncompressed => self.read_stored_block(output)?,
            CompressionType::FixedTree => {
                let litlen = fixed_litlen_tree()?;
                let distance = fixed_distance_tree()?;
                self.read_compressed_data(&litlen, &distance, output)?;
            }
            CompressionType::DynamicTree => {
                let (litlen, distance) = decode_litlen_distance_trees(&mut self.bit_reader)?;
                self.read_compressed_data(&litlen, &distance, output)?;
            }
            CompressionType::Reserved => {
                anyhow::bail!(DecodeError::CorruptBlock("reserved block type 11"))
            }
        }

        Ok(header.is_final)
    }

    fn read_stored_block<W: Write>(&mut self, output: &mut TrackingWriter<W>) -> Result<()> {
        let reader = self.bit_reader.borrow_reader_from_boundary();
        let len = reader.read_u16::<LittleEndian>()?;
        let nlen = reader.read_u16::<LittleEndian>()?;
        if nlen != !len {
            anyhow::bail!(DecodeError::CorruptBlock(
                "NLEN is not the complement of LEN"
            ));
        }

        let mut data = vec![0u8; len as usize];
        reader.read_exact(&mut data)?;
        output.write_all(&data)?;

        Ok(())
    }

    // The decode loop shared by fixed and dynamic blocks.
    fn read_compressed_data<W: Write>(
        &mut self,
        litlen: &HuffmanCoding<LitLenToken>,
        distance: &HuffmanCoding<DistanceToken>,
        output: &mut TrackingWriter<W>,
    ) -> Result<()> {
        loop {
            match litlen.read_symbol(&mut self.bit_reader)? {
                LitLenToken::Literal(value) => {
                    output.write_u8(value)?;
                }
                LitLenToken::EndOfBlock => return Ok(()),
                LitLenToken::Length { base, extra_bits } => {
                    let len = base + self.bit_reader.read_bits(extra_bits)?;

                    let (dist_base, dist_extra) =
                        match distance.read_symbol(&mut self.bit_reader)? {
                            DistanceToken::Distance { base, extra_bits } => (base, extra_bits),
                            DistanceToken::Unused => anyhow::bail!(DecodeError::InvalidDistance(
                                "reserved distance symbol"
                            )),
                        };
                    let dist =
                        dist_base as usize + self.bit_reader.read_bits(dist_extra)? as usize;

                    output.write_previous(dist, len as usize)?;
                }
                LitLenToken::Unused => {
                    anyhow::bail!(DecodeError::CorruptBlock(
                        "reserved literal/length symbol"
                    ))
                }
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Vec<u8>> {
        let mut sink = Vec::new();
        let mut writer = TrackingWriter::new(&mut sink);
        let mut reader = DeflateReader::new(input);
        while !reader.decode_block(&mut writer)? {}
        drop(writer);
        Ok(sink)
    }

    #[test]
    fn stored_block() -> Result<()> {
        let input = [0x01, 0x03, 0x00, 0xfc, 0xff, 0x41, 0x42, 0x43];
        assert_eq!(decode_all(&input)?, b"ABC");
        Ok(())
    }

    #[test]
    fn stored_block_nlen_mismatch() {
        let input = [0x01, 0x03, 0x00, 0x00, 0x00, 0x41, 0x42, 0x43];
        let err = decode_all(&input).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::CorruptBlock(_))
        ));
    }

    #[test]
    fn fixed_block() -> Result<()> {
        let input = [0x73, 0x74, 0x74, 0x02, 0x02, 0x67, 0x28, 0xe0, 0x02, 0x00];
        assert_eq!(decode_all(&input)?, b"AABBBBCCCCCCCC\n");
        Ok(())
    }

    #[test]
    fn fixed_block_empty() -> Result<()> {
        // BFINAL=1, BTYPE=01, then the seven-bit end-of-block code.
        let input = [0x03, 0x00];
        assert_eq!(decode_all(&input)?, b"");
        Ok(())
    }

    #[test]
    fn fixed_block_overlapping_backref() -> Result<()> {
        // Literal 'a', then length 5 at distance 1, then end of block.
        let input = [0x4b, 0x04, 0x03, 0x00];
        assert_eq!(decode_all(&input)?, b"aaaaaa");
        Ok(())
    }

    #[test]
    fn reserved_block_type() {
        let input = [0x07];
        let err = decode_all(&input).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::CorruptBlock(_))
        ));
    }

    #[test]
    fn backref_before_start_of_output() {
        // Literal 'a', then a match at distance 2 with only one byte out.
        // Fixed code: 'a' = 10010001, length code 259 = 0000011, distance
        // code 1 = 00001.
        let mut bits = vec![1u8, 1, 0];
        bits.extend([1, 0, 0, 1, 0, 0, 0, 1]);
        bits.extend([0, 0, 0, 0, 0, 1, 1]);
        bits.extend([0, 0, 0, 0, 1]);
        let mut input = Vec::new();
        for chunk in bits.chunks(8) {
            let mut byte = 0u8;
            for (i, bit) in chunk.iter().enumerate() {
                byte |= *bit << i;
            }
            input.push(byte);
        }

        let err = decode_all(&input).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::InvalidDistance(_))
        ));
    }
}
