//! Plain memory primitives and the controllers that put them on the bus.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::Component;
use crate::cartridge::Cartridge;
use crate::memory_map::{BOOT_ROM_END, REG_BOOT_ROM_DISABLE};

/// True iff `address` lies in the half-open range `start..end`, where
/// `end == 0` stands for the top of the address space.
fn contains(start: u16, end: u16, address: u16) -> bool {
    address >= start && (address < end || end == 0)
}

/// Byte-addressable read/write memory.
#[derive(Debug)]
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    /// Creates `size` bytes of zeroed memory.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Reads the byte at `index`. Panics if out of range.
    pub fn read(&self, index: usize) -> u8 {
        self.data[index]
    }

    /// Writes the byte at `index`. Panics if out of range.
    pub fn write(&mut self, index: usize, value: u8) {
        self.data[index] = value;
    }
}

/// Byte-addressable read-only memory.
#[derive(Debug)]
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Reads the byte at `index`. Panics if out of range.
    pub fn read(&self, index: usize) -> u8 {
        self.data[index]
    }
}

/// Exposes a (possibly shared) [`Ram`] over a range of bus addresses.
///
/// Attaching the same shared memory under two ranges produces a mirror, as
/// the echo region requires.
pub struct RamController {
    ram: Rc<RefCell<Ram>>,
    start: u16,
    end: u16,
}

impl RamController {
    /// Maps `ram` to `start..end`. Panics if the range is empty or larger
    /// than the memory.
    pub fn new(ram: Rc<RefCell<Ram>>, start: u16, end: u16) -> Self {
        let len = if end == 0 {
            0x1_0000 - usize::from(start)
        } else {
            usize::from(end)
                .checked_sub(usize::from(start))
                .expect("range end precedes start")
        };
        assert!(
            len > 0 && len <= ram.borrow().size(),
            "range does not fit the memory: {len} bytes"
        );
        Self { ram, start, end }
    }

    /// Maps `ram` starting at `start`, spanning exactly its size.
    pub fn new_spanning(ram: Rc<RefCell<Ram>>, start: u16) -> Self {
        let size = ram.borrow().size();
        Self::new(ram, start, start.wrapping_add(size as u16))
    }
}

impl Component for RamController {
    fn read(&mut self, address: u16) -> Option<u8> {
        contains(self.start, self.end, address)
            .then(|| self.ram.borrow().read(usize::from(address - self.start)))
    }

    fn write(&mut self, address: u16, data: u8) {
        if contains(self.start, self.end, address) {
            self.ram
                .borrow_mut()
                .write(usize::from(address - self.start), data);
        }
    }
}

/// Overlays the boot program on the first 256 bytes of the cartridge until
/// the program unmaps itself by writing to `0xFF50`.
pub struct BootRomController {
    cartridge: Rc<RefCell<Cartridge>>,
    boot_rom: Rom,
    boot_rom_enabled: bool,
}

impl BootRomController {
    pub fn new(cartridge: Rc<RefCell<Cartridge>>, boot_rom: Rom) -> Self {
        assert_eq!(boot_rom.size(), usize::from(BOOT_ROM_END));
        Self {
            cartridge,
            boot_rom,
            boot_rom_enabled: true,
        }
    }
}

impl Component for BootRomController {
    fn read(&mut self, address: u16) -> Option<u8> {
        if self.boot_rom_enabled && address < BOOT_ROM_END {
            Some(self.boot_rom.read(usize::from(address)))
        } else {
            self.cartridge.borrow_mut().read(address)
        }
    }

    fn write(&mut self, address: u16, data: u8) {
        if address == REG_BOOT_ROM_DISABLE {
            self.boot_rom_enabled = false;
        }
        self.cartridge.borrow_mut().write(address, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(size: usize) -> Rc<RefCell<Ram>> {
        Rc::new(RefCell::new(Ram::new(size)))
    }

    #[test]
    fn ram_reads_back_writes() {
        let mut ram = Ram::new(16);
        ram.write(3, 0xAB);
        assert_eq!(ram.read(3), 0xAB);
        assert_eq!(ram.read(4), 0);
    }

    #[test]
    #[should_panic]
    fn ram_rejects_out_of_range_index() {
        Ram::new(16).read(16);
    }

    #[test]
    fn controller_claims_only_its_range() {
        let mut c = RamController::new_spanning(shared(0x100), 0xC000);
        assert!(c.read(0xBFFF).is_none());
        assert!(c.read(0xC000).is_some());
        assert!(c.read(0xC0FF).is_some());
        assert!(c.read(0xC100).is_none());
    }

    #[test]
    fn shared_ram_mirrors_between_controllers() {
        let ram = shared(0x100);
        let mut main = RamController::new_spanning(ram.clone(), 0xC000);
        let mut echo = RamController::new_spanning(ram, 0xE000);
        main.write(0xC042, 0x55);
        assert_eq!(echo.read(0xE042), Some(0x55));
    }

    #[test]
    fn controller_reaches_top_of_address_space() {
        let mut c = RamController::new(shared(0x80), 0xFF80, 0);
        c.write(0xFFFF, 0x12);
        assert_eq!(c.read(0xFFFF), Some(0x12));
    }

    #[test]
    #[should_panic]
    fn controller_rejects_oversized_range() {
        RamController::new(shared(0x10), 0xC000, 0xC020);
    }
}
