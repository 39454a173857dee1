//! The assembled machine.
//!
//! [`GameBoy`] wires every component onto a shared bus and drives them in
//! lockstep, one M-cycle at a time. Frontends run it with [`GameBoy::run_until`],
//! read finished frames with [`GameBoy::frame`] and feed input through
//! [`GameBoy::key_pressed`] / [`GameBoy::key_released`].

use std::cell::RefCell;
use std::io;
use std::path::Path;
use std::rc::Rc;

use crate::bus::{Bus, Clocked};
use crate::cartridge::Cartridge;
use crate::cpu::{Cpu, CpuPort, IrqLine};
use crate::joypad::{Joypad, Key};
use crate::lcd::LcdController;
use crate::lcd_image::LcdImage;
use crate::memory::{BootRomController, Ram, RamController, Rom};
use crate::memory_map::{ECHO_RAM_END, ECHO_RAM_START, WORK_RAM_SIZE, WORK_RAM_START};
use crate::timer::Timer;

/// M-cycles per second of emulated time.
pub const CYCLES_PER_SECOND: u64 = 1 << 20;

pub struct GameBoy {
    bus: Bus,
    cpu: Cpu,
    timer: Rc<RefCell<Timer>>,
    lcd: Rc<RefCell<LcdController>>,
    joypad: Rc<RefCell<Joypad>>,
    cartridge: Rc<RefCell<Cartridge>>,
    cycles: u64,
}

impl GameBoy {
    /// Builds a machine that starts executing cartridge ROM at 0x0000.
    pub fn new(cartridge: Cartridge) -> Self {
        Self::build(cartridge, None)
    }

    /// Builds a machine with a 256-byte boot program overlaid on the start
    /// of the cartridge until it unmaps itself.
    pub fn with_boot_rom(cartridge: Cartridge, boot_rom: Vec<u8>) -> Self {
        Self::build(cartridge, Some(Rom::new(boot_rom)))
    }

    fn build(cartridge: Cartridge, boot_rom: Option<Rom>) -> Self {
        let bus = Bus::new();
        let irq = IrqLine::new();

        bus.attach(Rc::new(RefCell::new(CpuPort::new(irq.clone()))));

        let work_ram = Rc::new(RefCell::new(Ram::new(WORK_RAM_SIZE)));
        bus.attach(Rc::new(RefCell::new(RamController::new_spanning(
            work_ram.clone(),
            WORK_RAM_START,
        ))));
        bus.attach(Rc::new(RefCell::new(RamController::new(
            work_ram,
            ECHO_RAM_START,
            ECHO_RAM_END,
        ))));

        let cartridge = Rc::new(RefCell::new(cartridge));
        match boot_rom {
            Some(rom) => bus.attach(Rc::new(RefCell::new(BootRomController::new(
                cartridge.clone(),
                rom,
            )))),
            None => bus.attach(cartridge.clone()),
        }

        let timer = Rc::new(RefCell::new(Timer::new(irq.clone())));
        bus.attach(timer.clone());

        let lcd = Rc::new(RefCell::new(LcdController::new(bus.clone(), irq.clone())));
        bus.attach(lcd.clone());

        let joypad = Rc::new(RefCell::new(Joypad::new(irq.clone())));
        bus.attach(joypad.clone());

        let cpu = Cpu::new(bus.clone(), irq);
        Self {
            bus,
            cpu,
            timer,
            lcd,
            joypad,
            cartridge,
            cycles: 0,
        }
    }

    /// Runs the machine up to (but not including) `cycle`.
    ///
    /// Panics if `cycle` lies in the past.
    pub fn run_until(&mut self, cycle: u64) {
        assert!(
            cycle >= self.cycles,
            "cycle {cycle} is in the past (now at {})",
            self.cycles
        );
        while self.cycles < cycle {
            let c = self.cycles;
            self.timer.borrow_mut().cycle(c);
            self.cpu.cycle(c);
            self.lcd.borrow_mut().cycle(c);
            self.cycles += 1;
        }
    }

    /// Number of cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// The most recently completed frame.
    pub fn frame(&self) -> LcdImage {
        self.lcd.borrow().frame().clone()
    }

    pub fn key_pressed(&self, key: Key) {
        self.joypad.borrow_mut().key_pressed(key);
    }

    pub fn key_released(&self, key: Key) {
        self.joypad.borrow_mut().key_released(key);
    }

    /// Writes the cartridge RAM to a battery-save file.
    pub fn save_cartridge_ram<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.cartridge.borrow().save_ram_to(path)
    }

    /// Restores the cartridge RAM from a battery-save file, if it exists.
    pub fn load_cartridge_ram<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.cartridge.borrow_mut().load_ram_from(path)
    }
}
