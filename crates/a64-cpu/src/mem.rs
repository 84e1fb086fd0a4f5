use thiserror::Error;

/// Width of a guest memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemSize {
    U8,
    U16,
    U32,
    U64,
}

impl MemSize {
    /// Size for the `size` field of load/store encodings (`0b00` = byte .. `0b11` = doubleword).
    pub const fn from_log2(size: u32) -> Self {
        match size & 3 {
            0 => MemSize::U8,
            1 => MemSize::U16,
            2 => MemSize::U32,
            _ => MemSize::U64,
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            MemSize::U8 => 1,
            MemSize::U16 => 2,
            MemSize::U32 => 4,
            MemSize::U64 => 8,
        }
    }

    pub const fn log2(self) -> u32 {
        match self {
            MemSize::U8 => 0,
            MemSize::U16 => 1,
            MemSize::U32 => 2,
            MemSize::U64 => 3,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("guest access of {len} bytes at {addr:#x} is outside of RAM (size {size:#x})")]
    OutOfBounds { addr: u64, len: usize, size: usize },
}

/// Flat little-endian guest RAM starting at guest physical address 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestMemory {
    bytes: Vec<u8>,
}

impl GuestMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let err = MemoryError::OutOfBounds {
            addr,
            len,
            size: self.bytes.len(),
        };
        let start = usize::try_from(addr).map_err(|_| err)?;
        let end = start.checked_add(len).ok_or(err)?;
        if end > self.bytes.len() {
            return Err(err);
        }
        Ok(start..end)
    }

    pub fn read_bytes(&self, addr: u64, out: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, out.len())?;
        out.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy a raw image into RAM at `addr`.
    pub fn load_image(&mut self, addr: u64, image: &[u8]) -> Result<(), MemoryError> {
        self.write_bytes(addr, image)
    }

    /// Zero-extending read of `size` bytes.
    pub fn read_sized(&self, addr: u64, size: MemSize) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf[..size.bytes()])?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write the low `size` bytes of `value`.
    pub fn write_sized(&mut self, addr: u64, size: MemSize, value: u64) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes()[..size.bytes()])
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, MemoryError> {
        self.read_sized(addr, MemSize::U8).map(|v| v as u8)
    }

    pub fn read_u16(&self, addr: u64) -> Result<u16, MemoryError> {
        self.read_sized(addr, MemSize::U16).map(|v| v as u16)
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, MemoryError> {
        self.read_sized(addr, MemSize::U32).map(|v| v as u32)
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, MemoryError> {
        self.read_sized(addr, MemSize::U64)
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), MemoryError> {
        self.write_sized(addr, MemSize::U8, value.into())
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), MemoryError> {
        self.write_sized(addr, MemSize::U16, value.into())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), MemoryError> {
        self.write_sized(addr, MemSize::U32, value.into())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), MemoryError> {
        self.write_sized(addr, MemSize::U64, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_accessors() {
        let mut mem = GuestMemory::new(16);
        mem.write_u64(0, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(mem.read_u8(0).unwrap(), 0x08);
        assert_eq!(mem.read_u16(0).unwrap(), 0x0708);
        assert_eq!(mem.read_u32(4).unwrap(), 0x0102_0304);
        mem.write_u16(8, 0xbeef).unwrap();
        assert_eq!(mem.read_sized(8, MemSize::U64).unwrap(), 0xbeef);
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let mut mem = GuestMemory::new(16);
        assert_eq!(
            mem.read_u64(12),
            Err(MemoryError::OutOfBounds {
                addr: 12,
                len: 8,
                size: 16
            })
        );
        assert!(mem.write_u8(16, 0).is_err());
        assert!(mem.read_u32(u64::MAX).is_err());
        assert!(mem.load_image(10, &[0; 6]).is_ok());
    }
}
