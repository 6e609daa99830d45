use alloc::vec::Vec;
use core::convert::Infallible;

use super::{Area, NvmStorage};

/// RAM-backed [`NvmStorage`], used by the simulator and tests.
///
/// Areas grow on demand; reads past the written end return zeros like an
/// erased flash page would.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    areas: [Vec<u8>; Area::COUNT],
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw contents of one area.
    pub fn area(&self, area: Area) -> &[u8] {
        &self.areas[area.index()]
    }
}

impl NvmStorage for MemoryStorage {
    type Error = Infallible;

    fn read(&mut self, area: Area, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        let bytes = &self.areas[area.index()];
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = bytes.get(offset + i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write(&mut self, area: Area, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        let bytes = &mut self.areas[area.index()];
        let end = offset + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }
}
