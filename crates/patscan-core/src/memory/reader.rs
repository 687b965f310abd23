//! Memory readers used to follow indirect and trampoline addresses.

use crate::error::{Error, Result};

/// Read access to an address space.
///
/// The matcher itself only ever looks at caller-supplied buffers; this trait
/// is consulted when a resolved address has to be dereferenced.
pub trait ReadMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    fn read_u32(&self, address: u64) -> Result<u32> {
        Ok(u32::from_le_bytes(read_exact(self, address)?))
    }

    fn read_i32(&self, address: u64) -> Result<i32> {
        Ok(self.read_u32(address)? as i32)
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        Ok(u64::from_le_bytes(read_exact(self, address)?))
    }

    fn read_u8(&self, address: u64) -> Result<u8> {
        let [byte] = read_exact(self, address)?;
        Ok(byte)
    }
}

/// Read exactly `N` bytes, rejecting readers that return fewer.
fn read_exact<R: ReadMemory + ?Sized, const N: usize>(reader: &R, address: u64) -> Result<[u8; N]> {
    let bytes = reader.read_bytes(address, N)?;
    bytes
        .get(..N)
        .and_then(|head| <[u8; N]>::try_from(head).ok())
        .ok_or_else(|| Error::MemoryReadFailed {
            address,
            message: format!("short read: expected {} bytes, got {}", N, bytes.len()),
        })
}

impl<R: ReadMemory + ?Sized> ReadMemory for &R {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(address, size)
    }
}

/// A borrowed buffer mapped at `base`.
///
/// Typical use is a file or a dumped module image: `base` is the address
/// the first byte of `data` would have at runtime.
#[derive(Debug, Clone, Copy)]
pub struct SliceMemory<'a> {
    data: &'a [u8],
    base: u64,
}

impl<'a> SliceMemory<'a> {
    pub fn new(data: &'a [u8], base: u64) -> Self {
        Self { data, base }
    }

    pub fn base_address(&self) -> u64 {
        self.base
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.data.len() as u64
    }
}

impl ReadMemory for SliceMemory<'_> {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let out_of_range = || Error::MemoryReadFailed {
            address,
            message: format!(
                "{} bytes outside of mapped range 0x{:X}..0x{:X}",
                size,
                self.base,
                self.base.saturating_add(self.data.len() as u64)
            ),
        };

        let start = address.checked_sub(self.base).ok_or_else(out_of_range)?;
        let start = usize::try_from(start).map_err(|_| out_of_range())?;
        let end = start.checked_add(size).ok_or_else(out_of_range)?;
        self.data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(out_of_range)
    }
}

/// Reads the address space of the current process.
#[derive(Debug)]
pub struct LocalMemory {
    _private: (),
}

impl LocalMemory {
    /// # Safety
    ///
    /// Every address later passed to [`ReadMemory::read_bytes`] must be valid
    /// for reads of the requested size for the lifetime of the reader.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl ReadMemory for LocalMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        if address == 0 {
            return Err(Error::MemoryReadFailed {
                address,
                message: "null address".to_string(),
            });
        }
        let ptr = usize::try_from(address).map_err(|_| Error::MemoryReadFailed {
            address,
            message: "address exceeds pointer width".to_string(),
        })? as *const u8;

        let mut buf = vec![0u8; size];
        // SAFETY: the constructor's contract makes the caller responsible for
        // `address..address + size` being readable.
        unsafe {
            std::ptr::copy_nonoverlapping(ptr, buf.as_mut_ptr(), size);
        }
        Ok(buf)
    }
}
