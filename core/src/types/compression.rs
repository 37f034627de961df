//! Zlib block compression for persisted world chunks.

use crate::error::{Error, Result};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

pub type CompressionLevel = u32;

pub const LOW_COMPRESSION: CompressionLevel = 2;
pub const MEDIUM_COMPRESSION: CompressionLevel = 5;
pub const HIGH_COMPRESSION: CompressionLevel = 9;

pub fn compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::new(level.min(9)));
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| Error::serialization(format!("zlib compression failed: {e}")))?;
    Ok(out)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::serialization(format!("zlib decompression failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        for level in [LOW_COMPRESSION, MEDIUM_COMPRESSION, HIGH_COMPRESSION] {
            let compressed = compress(&data, level).unwrap();
            assert_eq!(decompress(&compressed).unwrap(), data);
        }
    }

    #[test]
    fn garbage_fails_to_decompress() {
        assert!(decompress(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}
