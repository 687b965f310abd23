//! Sparse in-memory address space for tests.

use std::collections::BTreeMap;

use super::ReadMemory;
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
pub struct MockMemoryReader {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl ReadMemory for MockMemoryReader {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let (start, bytes) = self
            .regions
            .range(..=address)
            .next_back()
            .ok_or_else(|| Error::MemoryReadFailed {
                address,
                message: "unmapped".to_string(),
            })?;

        let offset = (address - start) as usize;
        bytes
            .get(offset..offset + size)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::MemoryReadFailed {
                address,
                message: format!("read of {} bytes crosses region end", size),
            })
    }
}

#[derive(Debug, Default)]
pub struct MockMemoryBuilder {
    reader: MockMemoryReader,
}

impl MockMemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(mut self, address: u64, bytes: &[u8]) -> Self {
        self.reader.regions.insert(address, bytes.to_vec());
        self
    }

    pub fn u64(self, address: u64, value: u64) -> Self {
        self.bytes(address, &value.to_le_bytes())
    }

    pub fn build(self) -> MockMemoryReader {
        self.reader
    }
}
