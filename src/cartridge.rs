//! Cartridge loading and memory bank controllers.
//!
//! The header byte at 0x147 selects the mapper: 0 is a plain 32 KiB ROM,
//! 1 through 3 are MBC1 variants (the differences between them only concern
//! battery hardware, not addressing). Cartridge RAM can be snapshotted and
//! restored for battery-backed saves; erased save bytes read as 0xFF and
//! are skipped on restore.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use log::info;

use crate::bus::Component;
use crate::memory_map::{
    CARTRIDGE_ROM_END, CARTRIDGE_ROM_START, EXTERNAL_RAM_END, EXTERNAL_RAM_START,
};

const HEADER_TYPE: usize = 0x147;
const HEADER_RAM_SIZE: usize = 0x149;
const MIN_ROM_SIZE: usize = 0x150;
const MBC0_ROM_SIZE: usize = 0x8000;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

const RAM_SIZES: [usize; 4] = [0, 2048, 8192, 32768];

#[derive(Debug)]
pub enum CartridgeError {
    Io(io::Error),
    /// The ROM is too small to contain a header.
    NoHeader(usize),
    /// The cartridge type at 0x147 names an unsupported mapper.
    UnsupportedType(u8),
    /// A type-0 cartridge whose ROM is not exactly 32 KiB.
    BadRomSize(usize),
    /// The RAM size code at 0x149 is out of range.
    BadRamSize(u8),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "i/o error: {e}"),
            Self::NoHeader(size) => write!(f, "ROM of {size} bytes has no header"),
            Self::UnsupportedType(t) => write!(f, "unsupported cartridge type 0x{t:02X}"),
            Self::BadRomSize(size) => {
                write!(f, "type-0 cartridge must hold exactly 32768 bytes, got {size}")
            }
            Self::BadRamSize(code) => write!(f, "invalid RAM size code 0x{code:02X}"),
        }
    }
}

impl std::error::Error for CartridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CartridgeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

enum Mbc {
    Mbc0,
    Mbc1 {
        ram_enable: bool,
        rom_bank: u8,
        ram_bank: u8,
        banking_mode: bool,
    },
}

pub struct Cartridge {
    rom: Vec<u8>,
    ram: Vec<u8>,
    mbc: Mbc,
}

impl Cartridge {
    /// Parses a ROM image and sets up the mapper its header declares.
    pub fn from_bytes(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        if rom.len() < MIN_ROM_SIZE {
            return Err(CartridgeError::NoHeader(rom.len()));
        }
        let cartridge_type = rom[HEADER_TYPE];
        let (mbc, ram_size) = match cartridge_type {
            0 => {
                if rom.len() != MBC0_ROM_SIZE {
                    return Err(CartridgeError::BadRomSize(rom.len()));
                }
                (Mbc::Mbc0, 0)
            }
            1..=3 => {
                let code = rom[HEADER_RAM_SIZE];
                let size = *RAM_SIZES
                    .get(usize::from(code))
                    .ok_or(CartridgeError::BadRamSize(code))?;
                let mbc = Mbc::Mbc1 {
                    ram_enable: false,
                    rom_bank: 1,
                    ram_bank: 0,
                    banking_mode: false,
                };
                (mbc, size)
            }
            t => return Err(CartridgeError::UnsupportedType(t)),
        };
        info!(
            "cartridge: type 0x{cartridge_type:02X}, {} KiB ROM, {} KiB RAM",
            rom.len() / 1024,
            ram_size / 1024
        );
        Ok(Self {
            rom,
            ram: vec![0; ram_size],
            mbc,
        })
    }

    /// Reads and parses a ROM file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        Self::from_bytes(fs::read(path)?)
    }

    /// The cartridge RAM contents, for battery saves.
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Restores cartridge RAM from a save snapshot. Bytes equal to 0xFF
    /// are treated as erased and left untouched.
    pub fn load_ram(&mut self, snapshot: &[u8]) {
        let n = self.ram.len().min(snapshot.len());
        for (dst, &src) in self.ram[..n].iter_mut().zip(snapshot) {
            if src != 0xFF {
                *dst = src;
            }
        }
    }

    /// Writes the cartridge RAM to a save file.
    pub fn save_ram_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, &self.ram)
    }

    /// Restores cartridge RAM from a save file; a missing file is not an
    /// error, the RAM just keeps its current contents.
    pub fn load_ram_from<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        match fs::read(path) {
            Ok(snapshot) => {
                self.load_ram(&snapshot);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn rom_read(&self, address: u16) -> u8 {
        let offset = usize::from(address) % ROM_BANK_SIZE;
        let bank = match self.mbc {
            Mbc::Mbc0 => usize::from(address) / ROM_BANK_SIZE,
            Mbc::Mbc1 {
                rom_bank,
                ram_bank,
                banking_mode,
                ..
            } => {
                if usize::from(address) < ROM_BANK_SIZE {
                    if banking_mode {
                        usize::from(ram_bank) << 5
                    } else {
                        0
                    }
                } else {
                    usize::from(ram_bank) << 5 | usize::from(rom_bank)
                }
            }
        };
        self.rom[(bank * ROM_BANK_SIZE + offset) % self.rom.len()]
    }

    fn ram_index(&self, address: u16) -> Option<usize> {
        match self.mbc {
            Mbc::Mbc0 => None,
            Mbc::Mbc1 {
                ram_enable,
                ram_bank,
                banking_mode,
                ..
            } => {
                if !ram_enable || self.ram.is_empty() {
                    return None;
                }
                let bank = if banking_mode { usize::from(ram_bank) } else { 0 };
                let offset = usize::from(address - EXTERNAL_RAM_START);
                Some((bank * RAM_BANK_SIZE + offset) % self.ram.len())
            }
        }
    }
}

impl Component for Cartridge {
    fn read(&mut self, address: u16) -> Option<u8> {
        match address {
            CARTRIDGE_ROM_START..CARTRIDGE_ROM_END => Some(self.rom_read(address)),
            EXTERNAL_RAM_START..EXTERNAL_RAM_END => match &self.mbc {
                Mbc::Mbc0 => None,
                Mbc::Mbc1 { .. } => {
                    Some(self.ram_index(address).map_or(0xFF, |i| self.ram[i]))
                }
            },
            _ => None,
        }
    }

    fn write(&mut self, address: u16, data: u8) {
        match address {
            CARTRIDGE_ROM_START..CARTRIDGE_ROM_END => {
                if let Mbc::Mbc1 {
                    ram_enable,
                    rom_bank,
                    ram_bank,
                    banking_mode,
                } = &mut self.mbc
                {
                    match address {
                        0x0000..0x2000 => *ram_enable = data & 0x0F == 0x0A,
                        0x2000..0x4000 => {
                            let bank = data & 0x1F;
                            *rom_bank = if bank == 0 { 1 } else { bank };
                        }
                        0x4000..0x6000 => *ram_bank = data & 0x03,
                        _ => *banking_mode = data & 1 != 0,
                    }
                }
            }
            EXTERNAL_RAM_START..EXTERNAL_RAM_END => {
                if let Some(index) = self.ram_index(address) {
                    self.ram[index] = data;
                }
            }
            _ => {}
        }
    }
}
