//! Register memory of the slave
//!
//! Four independent banks, each a fixed-size array indexed by Modbus address.
//! Every access is bounds-checked and reports [`Exception::IllegalDataAddress`]
//! instead of panicking. The banks carry no locks: they are owned by the
//! request serializer, which is the only code that touches them.

use std::ops::Range;

use crate::constants::BANK_SIZE;
use crate::exception::Exception;

/// One addressable bank of bits or words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank<T> {
    cells: Vec<T>,
}

impl<T: Copy + Default> Bank<T> {
    /// Allocate `size` zeroed cells.
    pub fn new(size: usize) -> Self {
        Self {
            cells: vec![T::default(); size],
        }
    }

    /// Number of addressable cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if the bank has no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Every cell, from address 0 to the end of the bank.
    pub fn values(&self) -> &[T] {
        &self.cells
    }

    fn range(&self, address: u16, quantity: usize) -> Result<Range<usize>, Exception> {
        let start = address as usize;
        let end = start.checked_add(quantity).ok_or(Exception::IllegalDataAddress)?;
        if end > self.cells.len() {
            return Err(Exception::IllegalDataAddress);
        }
        Ok(start..end)
    }

    /// Read `quantity` cells starting at `address`.
    pub fn read(&self, address: u16, quantity: u16) -> Result<&[T], Exception> {
        let range = self.range(address, quantity as usize)?;
        Ok(&self.cells[range])
    }

    /// Overwrite cells starting at `address`. Nothing is written if the range
    /// does not fit.
    pub fn write(&mut self, address: u16, values: &[T]) -> Result<(), Exception> {
        let range = self.range(address, values.len())?;
        self.cells[range].copy_from_slice(values);
        Ok(())
    }

    /// Read a single cell.
    pub fn get(&self, address: u16) -> Result<T, Exception> {
        self.cells
            .get(address as usize)
            .copied()
            .ok_or(Exception::IllegalDataAddress)
    }

    /// Write a single cell.
    pub fn set(&mut self, address: u16, value: T) -> Result<(), Exception> {
        let cell = self
            .cells
            .get_mut(address as usize)
            .ok_or(Exception::IllegalDataAddress)?;
        *cell = value;
        Ok(())
    }
}

/// The four Modbus memory classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    /// Read-only bits (FC02).
    pub discrete_inputs: Bank<bool>,
    /// Read/write bits (FC01, FC05, FC15).
    pub coils: Bank<bool>,
    /// Read/write words (FC03, FC06, FC16).
    pub holding_registers: Bank<u16>,
    /// Read-only words (FC04).
    pub input_registers: Bank<u16>,
}

impl RegisterBank {
    /// Banks covering the full 0-65535 address space.
    pub fn new() -> Self {
        Self::with_size(BANK_SIZE)
    }

    /// Banks of `size` cells each, clamped to the Modbus address space.
    pub fn with_size(size: usize) -> Self {
        let size = size.min(BANK_SIZE);
        Self {
            discrete_inputs: Bank::new(size),
            coils: Bank::new(size),
            holding_registers: Bank::new(size),
            input_registers: Bank::new(size),
        }
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_address_space() {
        let bank = RegisterBank::new();
        assert_eq!(bank.coils.len(), 65536);
        assert_eq!(bank.input_registers.len(), 65536);
        assert_eq!(bank.holding_registers.get(u16::MAX), Ok(0));
        assert_eq!(bank.holding_registers.read(65535, 1), Ok(&[0u16][..]));
    }

    #[test]
    fn test_read_write_words() {
        let mut bank = RegisterBank::new();
        bank.holding_registers.write(0, &[10, 20, 30, 40]).unwrap();
        assert_eq!(bank.holding_registers.read(1, 2), Ok(&[20u16, 30][..]));
        bank.holding_registers.set(1, 99).unwrap();
        assert_eq!(bank.holding_registers.get(1), Ok(99));
    }

    #[test]
    fn test_values_cover_last_address() {
        let mut bank = RegisterBank::new();
        bank.holding_registers.set(0, 1).unwrap();
        bank.holding_registers.set(u16::MAX, 7).unwrap();

        let values = bank.holding_registers.values();
        assert_eq!(values.len(), 65536);
        assert_eq!(values.last(), Some(&7));
        assert_eq!(values.iter().filter(|&&v| v != 0).count(), 2);
    }

    #[test]
    fn test_range_past_end() {
        let mut bank = RegisterBank::new();
        assert_eq!(
            bank.holding_registers.read(65535, 2),
            Err(Exception::IllegalDataAddress)
        );
        assert_eq!(
            bank.coils.write(65535, &[true, true]),
            Err(Exception::IllegalDataAddress)
        );
        // rejected writes leave memory untouched
        assert_eq!(bank.coils.get(65535), Ok(false));
    }

    #[test]
    fn test_small_bank_bounds() {
        let mut bank = RegisterBank::with_size(16);
        assert_eq!(bank.discrete_inputs.len(), 16);
        assert_eq!(bank.input_registers.get(16), Err(Exception::IllegalDataAddress));
        assert_eq!(bank.coils.set(15, true), Ok(()));
        assert_eq!(bank.coils.set(16, true), Err(Exception::IllegalDataAddress));
        assert_eq!(bank.holding_registers.read(10, 7), Err(Exception::IllegalDataAddress));
        assert_eq!(bank.holding_registers.read(10, 6).map(<[u16]>::len), Ok(6));
    }

    #[test]
    fn test_size_clamped() {
        let bank = RegisterBank::with_size(1 << 20);
        assert_eq!(bank.coils.len(), BANK_SIZE);
    }
}
