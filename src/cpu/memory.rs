//! Z80 memory subsystem.
//!
//! A flat 64 KiB address space. Every `u16` is a valid address, so reads
//! and writes cannot fail; only loading a program image can.

use serde::{Serialize, Deserialize};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// The number of addressable bytes.
pub const MEMORY_SIZE: usize = 0x1_0000;

/// Z80 memory: 65 536 byte cells.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Memory {
    cells: Vec<u8>,
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        self.cells[addr as usize]
    }

    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) {
        self.cells[addr as usize] = value;
    }

    /// Read a little-endian word; the high byte address wraps past 0xFFFF.
    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read(addr), self.read(addr.wrapping_add(1))])
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Copy `program` into memory starting at `start_addr`.
    ///
    /// Memory is left untouched if the program does not fit.
    pub fn load_program(&mut self, start_addr: usize, program: &[u8]) -> Result<(), MemoryError> {
        let available = MEMORY_SIZE.saturating_sub(start_addr);
        if start_addr > MEMORY_SIZE || program.len() > available {
            return Err(MemoryError::LoadTooLarge {
                size: program.len(),
                available,
            });
        }

        self.cells[start_addr..start_addr + program.len()].copy_from_slice(program);
        log::debug!("loaded {} bytes at {:04X}", program.len(), start_addr);
        Ok(())
    }

    /// Read a whole program image from `reader` and load it at address 0.
    ///
    /// Returns the number of bytes loaded.
    pub fn load_from_reader<R: Read>(&mut self, reader: R) -> Result<usize, MemoryError> {
        let image = read_image(reader)?;
        self.load_program(0, &image)?;
        Ok(image.len())
    }

    /// Load a raw binary image file at address 0.
    pub fn load_image_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, MemoryError> {
        let file = std::fs::File::open(path.as_ref())
            .map_err(|e| MemoryError::IoFailure(format!("{}: {}", path.as_ref().display(), e)))?;
        self.load_from_reader(file)
    }

    /// Dump memory contents (for debugging).
    pub fn dump(&self, start: u16, count: usize) -> Vec<(u16, u8)> {
        let start = start as usize;
        let end = (start + count).min(MEMORY_SIZE);
        (start..end)
            .map(|i| (i as u16, self.cells[i]))
            .collect()
    }
}

/// Restores a serialized memory. Anything but exactly [`MEMORY_SIZE`] cells
/// is rejected.
impl TryFrom<Vec<u8>> for Memory {
    type Error = MemoryError;

    fn try_from(cells: Vec<u8>) -> Result<Self, Self::Error> {
        if cells.len() != MEMORY_SIZE {
            return Err(MemoryError::WrongSize { size: cells.len() });
        }
        Ok(Self { cells })
    }
}

impl From<Memory> for Vec<u8> {
    fn from(mem: Memory) -> Self {
        mem.cells
    }
}

/// Read an image of at most [`MEMORY_SIZE`] bytes from `reader`.
///
/// The read is bounded one byte past the limit so an oversized source is
/// detected without buffering all of it.
pub fn read_image<R: Read>(reader: R) -> Result<Vec<u8>, MemoryError> {
    let mut image = Vec::new();
    reader
        .take(MEMORY_SIZE as u64 + 1)
        .read_to_end(&mut image)
        .map_err(|e| MemoryError::IoFailure(e.to_string()))?;

    if image.len() > MEMORY_SIZE {
        return Err(MemoryError::LoadTooLarge {
            size: image.len(),
            available: MEMORY_SIZE,
        });
    }
    Ok(image)
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|&&b| b != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors raised while loading a program image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The image does not fit in the address space. `size` is a lower bound
    /// when the image came from a reader.
    #[error("program size {size} exceeds available space {available}")]
    LoadTooLarge { size: usize, available: usize },

    /// A serialized memory did not hold exactly 65 536 cells.
    #[error("memory must hold {} cells, got {size}", MEMORY_SIZE)]
    WrongSize { size: usize },

    /// The byte source could not be fully read.
    #[error("I/O error: {0}")]
    IoFailure(String),
}
