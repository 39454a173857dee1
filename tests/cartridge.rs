//! Cartridge scenarios: file loading, bus behavior, battery saves.

use dotmatrix::cartridge::{Cartridge, CartridgeError};
use dotmatrix::cpu::Reg;
use dotmatrix::gameboy::GameBoy;

fn mbc1_rom_with_ram() -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x147] = 0x03; // MBC1 + RAM + battery
    rom[0x149] = 0x02; // 8 KiB of RAM
    rom
}

#[test]
fn loads_a_rom_from_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.gb");
    let mut rom = vec![0u8; 0x8000];
    rom[0x1234] = 0x42;
    std::fs::write(&path, &rom).unwrap();

    let mut gb = GameBoy::new(Cartridge::from_file(&path).unwrap());
    gb.run_until(1);
    assert_eq!(gb.bus().read(0x1234), 0x42);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Cartridge::from_file(dir.path().join("nope.gb"));
    assert!(matches!(result, Err(CartridgeError::Io(_))));
}

#[test]
fn rom_is_visible_and_external_ram_floats_on_type0() {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0000] = 0x00;
    rom[0x7FFF] = 0xAB;
    let gb = GameBoy::new(Cartridge::from_bytes(rom).unwrap());
    assert_eq!(gb.bus().read(0x0000), 0x00);
    assert_eq!(gb.bus().read(0x7FFF), 0xAB);
    // No RAM behind 0xA000 on a plain cartridge.
    assert_eq!(gb.bus().read(0xA000), 0xFF);
}

#[test]
fn battery_save_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let save = dir.path().join("game.sav");

    let mut first = Cartridge::from_bytes(mbc1_rom_with_ram()).unwrap();
    {
        use dotmatrix::bus::Component;
        first.write(0x0000, 0x0A); // enable RAM
        first.write(0xA000, 0x12);
        first.write(0xA001, 0x34);
    }
    first.save_ram_to(&save).unwrap();

    let mut second = Cartridge::from_bytes(mbc1_rom_with_ram()).unwrap();
    second.load_ram_from(&save).unwrap();
    assert_eq!(&second.ram()[..2], &[0x12, 0x34]);
}

#[test]
fn loading_a_missing_save_keeps_ram_intact() {
    let dir = tempfile::tempdir().unwrap();
    let mut cartridge = Cartridge::from_bytes(mbc1_rom_with_ram()).unwrap();
    cartridge
        .load_ram_from(dir.path().join("never-written.sav"))
        .unwrap();
    assert!(cartridge.ram().iter().all(|&b| b == 0));
}

#[test]
fn program_reads_its_own_banked_rom() {
    // LD A,0x02 ; LD (0x2000),A ; LD A,(0x4000)
    let mut rom = vec![0u8; 4 * 0x4000];
    rom[0x147] = 0x01;
    rom[..8].copy_from_slice(&[0x3E, 0x02, 0xEA, 0x00, 0x20, 0xFA, 0x00, 0x40]);
    rom[2 * 0x4000] = 0x99; // first byte of bank 2
    let mut gb = GameBoy::new(Cartridge::from_bytes(rom).unwrap());
    gb.run_until(20);
    assert_eq!(gb.cpu().reg(Reg::A), 0x99);
}
