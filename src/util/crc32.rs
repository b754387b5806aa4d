//! CRC-32 primitive matching the remote server's file checksum
// (c) 2025 Ross Younger

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Result;

/// Buffer size for streaming files through the checksum.
const CHUNK: usize = 16 * 1024;

/// Incremental CRC-32: polynomial 0xEDB88320 (reflected), initial value
/// 0xFFFFFFFF, final XOR 0xFFFFFFFF. This is the variant the reference
/// server applies to whole files.
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// A fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    /// Folds `data` into the accumulator.
    pub fn add(&mut self, data: &[u8]) {
        for byte in data {
            let mut crc = (self.state ^ u32::from(*byte)) & 0xFF;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
            self.state = (self.state >> 8) ^ crc;
        }
    }

    /// The finalized checksum.
    #[must_use]
    pub fn get(self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksums an entire file, streaming it in fixed-size buffers.
///
/// # Errors
/// Any I/O error opening or reading the file.
pub fn crc32_file<P: AsRef<Path>>(path: P) -> Result<u32> {
    let mut file = File::open(path)?;
    let mut checksum = Crc32::new();
    let mut buffer = [0u8; CHUNK];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        checksum.add(&buffer[..n]);
    }
    Ok(checksum.get())
}
