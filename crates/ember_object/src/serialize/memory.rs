//! In-memory archive implementations.

use super::Archive;

/// An [`Archive`] that writes into a growable byte buffer.
///
/// Seeking backwards and rewriting is allowed; the tagged property writer
/// and the package saver rely on it to back-patch placeholder headers.
#[derive(Default)]
pub struct MemoryWriter {
    bytes: Vec<u8>,
    pos: usize,
    error: bool,
}

impl MemoryWriter {
    /// Create an empty writer positioned at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer, returning the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The written bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Archive for MemoryWriter {
    fn is_reading(&self) -> bool {
        false
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos as usize;
    }

    fn total_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn serialize(&mut self, data: &mut [u8]) {
        let end = self.pos + data.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    fn has_error(&self) -> bool {
        self.error
    }

    fn set_error(&mut self) {
        self.error = true;
    }
}

/// An [`Archive`] that reads from a byte slice.
///
/// Reading past the end zero-fills the destination and sets the sticky
/// error flag.
pub struct MemoryReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    error: bool,
}

impl<'a> MemoryReader<'a> {
    /// Create a reader over `bytes`, positioned at zero.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            error: false,
        }
    }
}

impl Archive for MemoryReader<'_> {
    fn is_reading(&self) -> bool {
        true
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos as usize;
    }

    fn total_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn serialize(&mut self, data: &mut [u8]) {
        let end = self.pos + data.len();
        if end > self.bytes.len() || self.error {
            data.fill(0);
            if !self.error {
                tracing::error!(
                    "archive read out of bounds (pos: {}, len: {}, size: {})",
                    self.pos,
                    data.len(),
                    self.bytes.len()
                );
                self.error = true;
            }
            return;
        }
        data.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
    }

    fn has_error(&self) -> bool {
        self.error
    }

    fn set_error(&mut self) {
        self.error = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serialize::Serializable;

    #[test]
    fn writer_backpatches_with_seek() {
        let mut writer = MemoryWriter::new();
        let patch_pos = writer.tell();
        0u32.clone().serialize(&mut writer);
        0xFFu8.clone().serialize(&mut writer);

        let end = writer.tell();
        writer.seek(patch_pos);
        42u32.clone().serialize(&mut writer);
        writer.seek(end);

        let bytes = writer.into_bytes();
        assert_eq!(bytes, [42, 0, 0, 0, 0xFF]);
    }

    #[test]
    fn reader_out_of_bounds_sets_error_and_zero_fills() {
        let bytes = [1u8, 2];
        let mut reader = MemoryReader::new(&bytes);
        let mut value: u64 = u64::MAX;
        value.serialize(&mut reader);
        assert!(reader.has_error());
        assert_eq!(value, 0);
    }

    #[test]
    fn reader_tell_and_total_size() {
        let bytes = [0u8; 8];
        let mut reader = MemoryReader::new(&bytes);
        assert_eq!(reader.total_size(), 8);
        let mut v: u32 = 0;
        v.serialize(&mut reader);
        assert_eq!(reader.tell(), 4);
    }
}
