//! ROM image access
//!
//! The ROM is loaded once and shared read-only by every subsystem for
//! the whole run. `RomCursor` provides bounded little-endian scalar
//! reads over it, plus decoding of "GBA pointers" (32-bit values whose
//! low 26 bits are a cartridge file offset).

use crate::{Result, RipError};

/// Largest ROM image accepted (the AGB cartridge address space).
pub const MAX_ROM_SIZE: usize = 32 * 1024 * 1024;

/// Mask extracting the file offset from a GBA pointer.
pub const GBA_PTR_MASK: u32 = 0x03FF_FFFF;

/// An immutable, randomly addressable GBA cartridge image.
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    /// Wrap a loaded ROM image. Rejects images larger than the GBA
    /// cartridge address space.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_ROM_SIZE {
            return Err(RipError::Structural(format!(
                "ROM image is {} bytes, larger than the 32 MiB cartridge space",
                data.len()
            )));
        }
        Ok(Rom { data })
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// A read cursor positioned at `offset`.
    pub fn cursor_at(&self, offset: usize) -> Result<RomCursor<'_>> {
        let mut cursor = RomCursor {
            data: &self.data,
            pos: 0,
        };
        cursor.seek(offset)?;
        Ok(cursor)
    }

    /// A bounds-checked byte slice of the image.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(&self.data[offset..end]),
            _ => Err(RipError::UnexpectedEof(offset)),
        }
    }

    /// Whether `word` is a GBA ROM pointer (top byte 0x08 or 0x09)
    /// resolving inside this image.
    pub fn is_rom_pointer(&self, word: u32) -> bool {
        let top = word >> 24;
        (top == 0x08 || top == 0x09) && ((word & GBA_PTR_MASK) as usize) < self.data.len()
    }
}

/// Positioned little-endian reader over a ROM image.
pub struct RomCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RomCursor<'a> {
    /// Current read position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move to an absolute offset. Seeking past the end of the image
    /// fails with an out-of-range error.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(RipError::Structural(format!(
                "seek to {:#x} past end of {:#x}-byte image",
                offset,
                self.data.len()
            )));
        }
        self.pos = offset;
        Ok(())
    }

    /// Advance the position by `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        let target = self
            .pos
            .checked_add(count)
            .ok_or_else(|| RipError::Structural("seek offset overflow".to_string()))?;
        self.seek(target)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(count).unwrap_or(usize::MAX);
        if end > self.data.len() {
            return Err(RipError::UnexpectedEof(self.pos));
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Read one unsigned byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read one signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    /// Read a little-endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian i32.
    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a GBA pointer and return it as a file offset.
    pub fn read_gba_pointer(&mut self) -> Result<usize> {
        Ok((self.read_u32()? & GBA_PTR_MASK) as usize)
    }
}
