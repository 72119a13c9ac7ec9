// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Snapshot framing and compression.
//!
//! A snapshot file is a single frame:
//!
//! ```text
//! +-------+---------+------------------------------------------+
//! | magic | version | LZ4 block (u32 LE size prepended)        |
//! | HCDB  |   u8    | compress_prepend_size(bincode(document)) |
//! +-------+---------+------------------------------------------+
//! ```
//!
//! The magic and version let the loader reject foreign or future files
//! before attempting to decompress them.

use crate::error::{HyperError, Result};

/// File magic for snapshot frames.
pub const MAGIC: &[u8; 4] = b"HCDB";

/// Current frame version.
pub const FRAME_VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1;

/// Compresses data using LZ4 with the original size prepended (4 bytes).
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompresses size-prepended LZ4 data.
///
/// # Returns
///
/// * `Ok(Vec<u8>)` - Decompressed data
/// * `Err(HyperError::DecompressionFailed)` - If the block is malformed
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data).map_err(|_| HyperError::DecompressionFailed)
}

/// Wraps an encoded document body into a snapshot frame.
///
/// ```rust
/// use hypercubedb::compression::{decode_frame, encode_frame};
///
/// let frame = encode_frame(b"hello hello hello");
/// assert_eq!(&frame[..4], b"HCDB");
/// assert_eq!(decode_frame(&frame).unwrap(), b"hello hello hello");
/// ```
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let compressed = compress(body);
    let mut frame = Vec::with_capacity(HEADER_LEN + compressed.len());
    frame.extend_from_slice(MAGIC);
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&compressed);
    frame
}

/// Validates the frame header and returns the decompressed body.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < HEADER_LEN || &frame[..MAGIC.len()] != MAGIC {
        return Err(HyperError::DecompressionFailed);
    }
    if frame[MAGIC.len()] != FRAME_VERSION {
        return Err(HyperError::DecompressionFailed);
    }
    decompress(&frame[HEADER_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repetitive_body_shrinks() {
        let body = vec![7u8; 4096];
        let frame = encode_frame(&body);
        assert!(frame.len() < body.len());
        assert_eq!(decode_frame(&frame).unwrap(), body);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut frame = encode_frame(b"data");
        frame[0] = b'X';
        assert!(matches!(decode_frame(&frame), Err(HyperError::DecompressionFailed)));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut frame = encode_frame(b"data");
        frame[4] = FRAME_VERSION + 1;
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_rejects_truncated() {
        let frame = encode_frame(&[1u8; 512]);
        assert!(decode_frame(&frame[..3]).is_err());
        assert!(decode_frame(&frame[..frame.len() / 2]).is_err());
    }
}
