//! LR35902 CPU core.
//!
//! The CPU is clocked in M-cycles. Executing an instruction takes effect
//! entirely on its first cycle; the remaining cycles of its official cost
//! are spent idle, tracked by `next_non_idle_cycle`. HALT parks that
//! schedule at `u64::MAX` until an enabled interrupt is requested.
//!
//! The CPU itself is not attached to the bus; its bus-visible state (the
//! IE and IF registers and high RAM) lives in [`CpuPort`], which shares the
//! interrupt registers with the CPU through an [`IrqLine`]. Peripherals
//! hold their own `IrqLine` clone and request interrupts through it.

use std::cell::Cell;
use std::rc::Rc;

use crate::alu::{self, Flag, RotDir};
use crate::bits;
use crate::bus::{Bus, Clocked, Component};
use crate::memory::Ram;
use crate::memory_map::{HIGH_RAM_SIZE, HIGH_RAM_START, REGS_START, REG_IE, REG_IF};
use crate::registers::{Register, RegisterFile};

const INTERRUPT_VECTOR_BASE: u16 = 0x0040;
const INTERRUPT_SERVICE_CYCLES: u64 = 5;

/// The five interrupt sources, in priority order (lowest value wins).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    LcdStat = 1,
    Timer = 2,
    Serial = 3,
    Joypad = 4,
}

/// Shared handle to the IE and IF registers.
///
/// Clones all refer to the same registers, so a peripheral can request an
/// interrupt while the CPU and its bus port observe it.
#[derive(Clone, Default)]
pub struct IrqLine {
    regs: Rc<IrqRegs>,
}

#[derive(Default)]
struct IrqRegs {
    enable: Cell<u8>,
    flags: Cell<u8>,
}

impl IrqLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the IF bit of `interrupt`.
    pub fn request(&self, interrupt: Interrupt) {
        let flags = self.regs.flags.get() | 1 << interrupt as u8;
        self.regs.flags.set(flags);
    }

    pub(crate) fn interrupt_enable(&self) -> u8 {
        self.regs.enable.get()
    }

    pub(crate) fn set_interrupt_enable(&self, value: u8) {
        self.regs.enable.set(value);
    }

    pub(crate) fn interrupt_flags(&self) -> u8 {
        self.regs.flags.get()
    }

    pub(crate) fn set_interrupt_flags(&self, value: u8) {
        self.regs.flags.set(value);
    }
}

/// The CPU's bus-visible state: IE, IF and high RAM.
pub struct CpuPort {
    irq: IrqLine,
    high_ram: Ram,
}

impl CpuPort {
    pub fn new(irq: IrqLine) -> Self {
        Self {
            irq,
            high_ram: Ram::new(HIGH_RAM_SIZE),
        }
    }
}

impl Component for CpuPort {
    fn read(&mut self, address: u16) -> Option<u8> {
        match address {
            REG_IE => Some(self.irq.interrupt_enable()),
            REG_IF => Some(self.irq.interrupt_flags()),
            HIGH_RAM_START..REG_IE => {
                Some(self.high_ram.read(usize::from(address - HIGH_RAM_START)))
            }
            _ => None,
        }
    }

    fn write(&mut self, address: u16, data: u8) {
        match address {
            REG_IE => self.irq.set_interrupt_enable(data),
            REG_IF => self.irq.set_interrupt_flags(data),
            HIGH_RAM_START..REG_IE => {
                self.high_ram
                    .write(usize::from(address - HIGH_RAM_START), data);
            }
            _ => {}
        }
    }
}

/// The 8-bit registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg {
    A,
    F,
    B,
    C,
    D,
    E,
    H,
    L,
}

impl Register for Reg {
    const COUNT: usize = 8;

    fn index(self) -> usize {
        self as usize
    }
}

/// The 16-bit register pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg16 {
    Af,
    Bc,
    De,
    Hl,
}

pub struct Cpu {
    bus: Bus,
    irq: IrqLine,
    regs: RegisterFile<Reg>,
    pc: u16,
    sp: u16,
    ime: bool,
    next_non_idle_cycle: u64,
}

impl Cpu {
    pub fn new(bus: Bus, irq: IrqLine) -> Self {
        Self {
            bus,
            irq,
            regs: RegisterFile::new(),
            pc: 0,
            sp: 0,
            ime: false,
            next_non_idle_cycle: 0,
        }
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    pub fn sp(&self) -> u16 {
        self.sp
    }

    pub fn set_sp(&mut self, sp: u16) {
        self.sp = sp;
    }

    pub fn reg(&self, r: Reg) -> u8 {
        self.regs.get(r)
    }

    pub fn set_reg(&mut self, r: Reg, value: u8) {
        self.regs.set(r, value);
    }

    pub fn reg16(&self, r: Reg16) -> u16 {
        let (high, low) = match r {
            Reg16::Af => (Reg::A, Reg::F),
            Reg16::Bc => (Reg::B, Reg::C),
            Reg16::De => (Reg::D, Reg::E),
            Reg16::Hl => (Reg::H, Reg::L),
        };
        bits::make16(self.regs.get(high), self.regs.get(low))
    }

    pub fn set_reg16(&mut self, r: Reg16, value: u16) {
        let (high, low) = match r {
            Reg16::Af => (Reg::A, Reg::F),
            Reg16::Bc => (Reg::B, Reg::C),
            Reg16::De => (Reg::D, Reg::E),
            Reg16::Hl => (Reg::H, Reg::L),
        };
        self.regs.set(high, bits::high8(value));
        let mask = if r == Reg16::Af { 0xF0 } else { 0xFF };
        self.regs.set(low, bits::low8(value) & mask);
    }

    // In the encodings where 0b11 names SP rather than AF.
    fn reg16_sp(&self, r: Reg16) -> u16 {
        if r == Reg16::Af {
            self.sp
        } else {
            self.reg16(r)
        }
    }

    fn set_reg16_sp(&mut self, r: Reg16, value: u16) {
        if r == Reg16::Af {
            self.sp = value;
        } else {
            self.set_reg16(r, value);
        }
    }

    fn pending_interrupt(&self) -> bool {
        self.irq.interrupt_enable() & self.irq.interrupt_flags() != 0
    }

    fn flag(&self, flag: Flag) -> bool {
        self.regs.test(Reg::F, flag)
    }

    // Bus access

    fn read8(&self, address: u16) -> u8 {
        self.bus.read(address)
    }

    fn read8_at_hl(&self) -> u8 {
        self.read8(self.reg16(Reg16::Hl))
    }

    fn read8_after_opcode(&self, offset: u16) -> u8 {
        self.read8(self.pc.wrapping_add(offset))
    }

    fn read16(&self, address: u16) -> u16 {
        let low = self.read8(address);
        let high = self.read8(address.wrapping_add(1));
        bits::make16(high, low)
    }

    fn read16_after_opcode(&self) -> u16 {
        self.read16(self.pc.wrapping_add(1))
    }

    fn write8(&self, address: u16, value: u8) {
        self.bus.write(address, value);
    }

    fn write8_at_hl(&self, value: u8) {
        self.write8(self.reg16(Reg16::Hl), value);
    }

    fn write16(&self, address: u16, value: u16) {
        self.write8(address, bits::low8(value));
        self.write8(address.wrapping_add(1), bits::high8(value));
    }

    fn push16(&mut self, value: u16) {
        self.sp = self.sp.wrapping_sub(2);
        self.write16(self.sp, value);
    }

    fn pop16(&mut self) -> u16 {
        let value = self.read16(self.sp);
        self.sp = self.sp.wrapping_add(2);
        value
    }

    // Flag handling

    fn set_reg_from_alu(&mut self, r: Reg, value_flags: u32) {
        self.regs.set(r, alu::unpack_value(value_flags) as u8);
    }

    fn set_flags(&mut self, value_flags: u32) {
        self.regs.set(Reg::F, alu::unpack_flags(value_flags) as u8);
    }

    fn set_reg_flags(&mut self, r: Reg, value_flags: u32) {
        self.set_reg_from_alu(r, value_flags);
        self.set_flags(value_flags);
    }

    fn write8_at_hl_and_set_flags(&mut self, value_flags: u32) {
        self.write8_at_hl(alu::unpack_value(value_flags) as u8);
        self.set_flags(value_flags);
    }

    fn combine_alu_flags(
        &mut self,
        value_flags: u32,
        z: FlagSrc,
        n: FlagSrc,
        h: FlagSrc,
        c: FlagSrc,
    ) {
        let ones = flag_src_mask(FlagSrc::V1, z, n, h, c);
        let from_alu = flag_src_mask(FlagSrc::Alu, z, n, h, c);
        let from_cpu = flag_src_mask(FlagSrc::Cpu, z, n, h, c);
        let flags = ones
            | alu::unpack_flags(value_flags) & from_alu
            | u32::from(self.regs.get(Reg::F)) & from_cpu;
        self.regs.set(Reg::F, flags as u8);
    }

    // Encoding helpers

    // ADC/SBC use the carry flag; ADD/SUB (bit 3 clear) do not.
    fn arithmetic_carry(&self, encoding: u8) -> bool {
        bits::test(u32::from(encoding), 3) && self.flag(Flag::C)
    }

    fn test_condition(&self, encoding: u8) -> bool {
        match bits::extract(u32::from(encoding), 3, 2) {
            0b00 => !self.flag(Flag::Z),
            0b01 => self.flag(Flag::Z),
            0b10 => !self.flag(Flag::C),
            _ => self.flag(Flag::C),
        }
    }

    fn increment_hl(&mut self, encoding: u8) {
        let step: i16 = if bits::test(u32::from(encoding), 4) {
            -1
        } else {
            1
        };
        let hl = self.reg16(Reg16::Hl).wrapping_add_signed(step);
        self.set_reg16(Reg16::Hl, hl);
    }

    // Execution

    fn really_cycle(&mut self) {
        if self.ime && self.pending_interrupt() {
            self.handle_interrupt();
        } else {
            let encoding = self.read8(self.pc);
            let opcode = if encoding == 0xCB {
                decode_prefixed(self.read8_after_opcode(1))
            } else {
                decode_direct(encoding, self.pc)
            };
            self.dispatch(opcode);
        }
    }

    fn handle_interrupt(&mut self) {
        self.ime = false;
        let index =
            (self.irq.interrupt_enable() & self.irq.interrupt_flags()).trailing_zeros();
        let flags = bits::set(u32::from(self.irq.interrupt_flags()), index, false);
        self.irq.set_interrupt_flags(flags as u8);
        let pc = self.pc;
        self.push16(pc);
        self.pc = INTERRUPT_VECTOR_BASE + 8 * index as u16;
        self.next_non_idle_cycle += INTERRUPT_SERVICE_CYCLES;
    }

    fn dispatch(&mut self, opcode: Opcode) {
        use Family::*;

        let encoding = opcode.encoding;
        let mut next_pc = self.pc.wrapping_add(opcode.total_bytes);
        let mut additional_cycles = 0;

        match opcode.family {
            Nop => {}

            // Loads
            LdR8Hlr => {
                let value = self.read8_at_hl();
                self.regs.set(extract_reg(encoding, 3), value);
            }
            LdAHlru => {
                let value = self.read8_at_hl();
                self.regs.set(Reg::A, value);
                self.increment_hl(encoding);
            }
            LdAN8r => {
                let offset = self.read8_after_opcode(1);
                let value = self.read8(REGS_START + u16::from(offset));
                self.regs.set(Reg::A, value);
            }
            LdACr => {
                let value = self.read8(REGS_START + u16::from(self.regs.get(Reg::C)));
                self.regs.set(Reg::A, value);
            }
            LdAN16r => {
                let address = self.read16_after_opcode();
                let value = self.read8(address);
                self.regs.set(Reg::A, value);
            }
            LdABcr => {
                let value = self.read8(self.reg16(Reg16::Bc));
                self.regs.set(Reg::A, value);
            }
            LdADer => {
                let value = self.read8(self.reg16(Reg16::De));
                self.regs.set(Reg::A, value);
            }
            LdR8N8 => {
                let value = self.read8_after_opcode(1);
                self.regs.set(extract_reg(encoding, 3), value);
            }
            LdR16spN16 => {
                let value = self.read16_after_opcode();
                self.set_reg16_sp(extract_reg16(encoding), value);
            }
            LdSpHl => self.sp = self.reg16(Reg16::Hl),
            PopR16 => {
                let value = self.pop16();
                self.set_reg16(extract_reg16(encoding), value);
            }

            // Stores
            LdHlrR8 => self.write8_at_hl(self.regs.get(extract_reg(encoding, 0))),
            LdHlruA => {
                self.write8_at_hl(self.regs.get(Reg::A));
                self.increment_hl(encoding);
            }
            LdN8rA => {
                let offset = self.read8_after_opcode(1);
                self.write8(REGS_START + u16::from(offset), self.regs.get(Reg::A));
            }
            LdCrA => {
                let address = REGS_START + u16::from(self.regs.get(Reg::C));
                self.write8(address, self.regs.get(Reg::A));
            }
            LdN16rA => {
                let address = self.read16_after_opcode();
                self.write8(address, self.regs.get(Reg::A));
            }
            LdBcrA => self.write8(self.reg16(Reg16::Bc), self.regs.get(Reg::A)),
            LdDerA => self.write8(self.reg16(Reg16::De), self.regs.get(Reg::A)),
            LdHlrN8 => {
                let value = self.read8_after_opcode(1);
                self.write8_at_hl(value);
            }
            LdN16rSp => {
                let address = self.read16_after_opcode();
                self.write16(address, self.sp);
            }
            LdR8R8 => {
                let value = self.regs.get(extract_reg(encoding, 0));
                self.regs.set(extract_reg(encoding, 3), value);
            }
            PushR16 => {
                let value = self.reg16(extract_reg16(encoding));
                self.push16(value);
            }

            // Additions
            AddAR8 => {
                let operand = self.regs.get(extract_reg(encoding, 0));
                let carry = self.arithmetic_carry(encoding);
                let vf = alu::add(self.regs.get(Reg::A), operand, carry);
                self.set_reg_flags(Reg::A, vf);
            }
            AddAN8 => {
                let operand = self.read8_after_opcode(1);
                let carry = self.arithmetic_carry(encoding);
                let vf = alu::add(self.regs.get(Reg::A), operand, carry);
                self.set_reg_flags(Reg::A, vf);
            }
            AddAHlr => {
                let operand = self.read8_at_hl();
                let carry = self.arithmetic_carry(encoding);
                let vf = alu::add(self.regs.get(Reg::A), operand, carry);
                self.set_reg_flags(Reg::A, vf);
            }
            IncR8 => {
                let r = extract_reg(encoding, 3);
                let vf = alu::add(self.regs.get(r), 1, false);
                self.set_reg_from_alu(r, vf);
                self.combine_alu_flags(vf, FlagSrc::Alu, FlagSrc::V0, FlagSrc::Alu, FlagSrc::Cpu);
            }
            IncHlr => {
                let vf = alu::add(self.read8_at_hl(), 1, false);
                self.write8_at_hl(alu::unpack_value(vf) as u8);
                self.combine_alu_flags(vf, FlagSrc::Alu, FlagSrc::V0, FlagSrc::Alu, FlagSrc::Cpu);
            }
            IncR16sp => {
                let r = extract_reg16(encoding);
                self.set_reg16_sp(r, self.reg16_sp(r).wrapping_add(1));
            }
            AddHlR16sp => {
                let operand = self.reg16_sp(extract_reg16(encoding));
                let vf = alu::add16_h(self.reg16(Reg16::Hl), operand);
                self.set_reg16(Reg16::Hl, alu::unpack_value(vf) as u16);
                self.combine_alu_flags(vf, FlagSrc::Cpu, FlagSrc::V0, FlagSrc::Alu, FlagSrc::Alu);
            }
            LdHlspS8 => {
                let offset = bits::sign_extend8(self.read8_after_opcode(1)) as u16;
                let vf = alu::add16_l(self.sp, offset);
                let value = alu::unpack_value(vf) as u16;
                self.combine_alu_flags(vf, FlagSrc::V0, FlagSrc::V0, FlagSrc::Alu, FlagSrc::Alu);
                if bits::test(u32::from(encoding), 4) {
                    self.set_reg16(Reg16::Hl, value);
                } else {
                    self.sp = value;
                }
            }

            // Subtractions and comparisons
            SubAR8 => {
                let operand = self.regs.get(extract_reg(encoding, 0));
                let borrow = self.arithmetic_carry(encoding);
                let vf = alu::sub(self.regs.get(Reg::A), operand, borrow);
                self.set_reg_flags(Reg::A, vf);
            }
            SubAN8 => {
                let operand = self.read8_after_opcode(1);
                let borrow = self.arithmetic_carry(encoding);
                let vf = alu::sub(self.regs.get(Reg::A), operand, borrow);
                self.set_reg_flags(Reg::A, vf);
            }
            SubAHlr => {
                let operand = self.read8_at_hl();
                let borrow = self.arithmetic_carry(encoding);
                let vf = alu::sub(self.regs.get(Reg::A), operand, borrow);
                self.set_reg_flags(Reg::A, vf);
            }
            CpAR8 => {
                let operand = self.regs.get(extract_reg(encoding, 0));
                let vf = alu::sub(self.regs.get(Reg::A), operand, false);
                self.set_flags(vf);
            }
            CpAN8 => {
                let operand = self.read8_after_opcode(1);
                let vf = alu::sub(self.regs.get(Reg::A), operand, false);
                self.set_flags(vf);
            }
            CpAHlr => {
                let operand = self.read8_at_hl();
                let vf = alu::sub(self.regs.get(Reg::A), operand, false);
                self.set_flags(vf);
            }
            DecR8 => {
                let r = extract_reg(encoding, 3);
                let vf = alu::sub(self.regs.get(r), 1, false);
                self.set_reg_from_alu(r, vf);
                self.combine_alu_flags(vf, FlagSrc::Alu, FlagSrc::V1, FlagSrc::Alu, FlagSrc::Cpu);
            }
            DecHlr => {
                let vf = alu::sub(self.read8_at_hl(), 1, false);
                self.write8_at_hl(alu::unpack_value(vf) as u8);
                self.combine_alu_flags(vf, FlagSrc::Alu, FlagSrc::V1, FlagSrc::Alu, FlagSrc::Cpu);
            }
            DecR16sp => {
                let r = extract_reg16(encoding);
                self.set_reg16_sp(r, self.reg16_sp(r).wrapping_sub(1));
            }

            // Bitwise logic
            AndAR8 => {
                let operand = self.regs.get(extract_reg(encoding, 0));
                let vf = alu::and(self.regs.get(Reg::A), operand);
                self.set_reg_flags(Reg::A, vf);
            }
            AndAN8 => {
                let operand = self.read8_after_opcode(1);
                let vf = alu::and(self.regs.get(Reg::A), operand);
                self.set_reg_flags(Reg::A, vf);
            }
            AndAHlr => {
                let vf = alu::and(self.regs.get(Reg::A), self.read8_at_hl());
                self.set_reg_flags(Reg::A, vf);
            }
            OrAR8 => {
                let operand = self.regs.get(extract_reg(encoding, 0));
                let vf = alu::or(self.regs.get(Reg::A), operand);
                self.set_reg_flags(Reg::A, vf);
            }
            OrAN8 => {
                let operand = self.read8_after_opcode(1);
                let vf = alu::or(self.regs.get(Reg::A), operand);
                self.set_reg_flags(Reg::A, vf);
            }
            OrAHlr => {
                let vf = alu::or(self.regs.get(Reg::A), self.read8_at_hl());
                self.set_reg_flags(Reg::A, vf);
            }
            XorAR8 => {
                let operand = self.regs.get(extract_reg(encoding, 0));
                let vf = alu::xor(self.regs.get(Reg::A), operand);
                self.set_reg_flags(Reg::A, vf);
            }
            XorAN8 => {
                let operand = self.read8_after_opcode(1);
                let vf = alu::xor(self.regs.get(Reg::A), operand);
                self.set_reg_flags(Reg::A, vf);
            }
            XorAHlr => {
                let vf = alu::xor(self.regs.get(Reg::A), self.read8_at_hl());
                self.set_reg_flags(Reg::A, vf);
            }

            // Rotations and shifts
            Rotca => {
                let vf = alu::rotate(rotation_dir(encoding), self.regs.get(Reg::A));
                self.set_reg_from_alu(Reg::A, vf);
                self.combine_alu_flags(vf, FlagSrc::V0, FlagSrc::V0, FlagSrc::V0, FlagSrc::Alu);
            }
            Rota => {
                let vf = alu::rotate_through_carry(
                    rotation_dir(encoding),
                    self.regs.get(Reg::A),
                    self.flag(Flag::C),
                );
                self.set_reg_from_alu(Reg::A, vf);
                self.combine_alu_flags(vf, FlagSrc::V0, FlagSrc::V0, FlagSrc::V0, FlagSrc::Alu);
            }
            RotcR8 => {
                let r = extract_reg(encoding, 0);
                let vf = alu::rotate(rotation_dir(encoding), self.regs.get(r));
                self.set_reg_flags(r, vf);
            }
            RotR8 => {
                let r = extract_reg(encoding, 0);
                let vf = alu::rotate_through_carry(
                    rotation_dir(encoding),
                    self.regs.get(r),
                    self.flag(Flag::C),
                );
                self.set_reg_flags(r, vf);
            }
            SwapR8 => {
                let r = extract_reg(encoding, 0);
                let vf = alu::swap(self.regs.get(r));
                self.set_reg_flags(r, vf);
            }
            SlaR8 => {
                let r = extract_reg(encoding, 0);
                let vf = alu::shift_left(self.regs.get(r));
                self.set_reg_flags(r, vf);
            }
            SraR8 => {
                let r = extract_reg(encoding, 0);
                let vf = alu::shift_right_a(self.regs.get(r));
                self.set_reg_flags(r, vf);
            }
            SrlR8 => {
                let r = extract_reg(encoding, 0);
                let vf = alu::shift_right_l(self.regs.get(r));
                self.set_reg_flags(r, vf);
            }
            RotcHlr => {
                let vf = alu::rotate(rotation_dir(encoding), self.read8_at_hl());
                self.write8_at_hl_and_set_flags(vf);
            }
            RotHlr => {
                let vf = alu::rotate_through_carry(
                    rotation_dir(encoding),
                    self.read8_at_hl(),
                    self.flag(Flag::C),
                );
                self.write8_at_hl_and_set_flags(vf);
            }
            SwapHlr => {
                let vf = alu::swap(self.read8_at_hl());
                self.write8_at_hl_and_set_flags(vf);
            }
            SlaHlr => {
                let vf = alu::shift_left(self.read8_at_hl());
                self.write8_at_hl_and_set_flags(vf);
            }
            SraHlr => {
                let vf = alu::shift_right_a(self.read8_at_hl());
                self.write8_at_hl_and_set_flags(vf);
            }
            SrlHlr => {
                let vf = alu::shift_right_l(self.read8_at_hl());
                self.write8_at_hl_and_set_flags(vf);
            }

            // Single-bit operations
            BitU3R8 => {
                let value = self.regs.get(extract_reg(encoding, 0));
                let vf = alu::test_bit(value, extract_bit_index(encoding));
                self.combine_alu_flags(vf, FlagSrc::Alu, FlagSrc::V0, FlagSrc::V1, FlagSrc::Cpu);
            }
            BitU3Hlr => {
                let vf = alu::test_bit(self.read8_at_hl(), extract_bit_index(encoding));
                self.combine_alu_flags(vf, FlagSrc::Alu, FlagSrc::V0, FlagSrc::V1, FlagSrc::Cpu);
            }
            ChgU3R8 => {
                let r = extract_reg(encoding, 0);
                let value = bits::set(
                    u32::from(self.regs.get(r)),
                    extract_bit_index(encoding),
                    bits::test(u32::from(encoding), 6),
                );
                self.regs.set(r, value as u8);
            }
            ChgU3Hlr => {
                let value = bits::set(
                    u32::from(self.read8_at_hl()),
                    extract_bit_index(encoding),
                    bits::test(u32::from(encoding), 6),
                );
                self.write8_at_hl(value as u8);
            }

            // Miscellaneous arithmetic
            Daa => {
                let vf = alu::bcd_adjust(
                    self.regs.get(Reg::A),
                    self.flag(Flag::N),
                    self.flag(Flag::H),
                    self.flag(Flag::C),
                );
                self.set_reg_from_alu(Reg::A, vf);
                self.combine_alu_flags(vf, FlagSrc::Alu, FlagSrc::Cpu, FlagSrc::V0, FlagSrc::Alu);
            }
            Sccf => {
                // SCF forces carry; CCF (bit 3 set) complements it.
                let carry = !self.arithmetic_carry(encoding);
                let vf = alu::mask_znhc(false, false, false, carry);
                self.combine_alu_flags(vf, FlagSrc::Cpu, FlagSrc::V0, FlagSrc::V0, FlagSrc::Alu);
            }
            Cpl => {
                let value = !self.regs.get(Reg::A);
                self.regs.set(Reg::A, value);
                self.combine_alu_flags(0, FlagSrc::Cpu, FlagSrc::V1, FlagSrc::V1, FlagSrc::Cpu);
            }

            // Jumps
            JpHl => next_pc = self.reg16(Reg16::Hl),
            JpN16 => next_pc = self.read16_after_opcode(),
            JpCcN16 => {
                if self.test_condition(encoding) {
                    next_pc = self.read16_after_opcode();
                    additional_cycles = opcode.additional_cycles;
                }
            }
            JrE8 => {
                let offset = bits::sign_extend8(self.read8_after_opcode(1)) as i16;
                next_pc = next_pc.wrapping_add_signed(offset);
            }
            JrCcE8 => {
                if self.test_condition(encoding) {
                    let offset = bits::sign_extend8(self.read8_after_opcode(1)) as i16;
                    next_pc = next_pc.wrapping_add_signed(offset);
                    additional_cycles = opcode.additional_cycles;
                }
            }

            // Calls and returns
            CallN16 => {
                self.push16(next_pc);
                next_pc = self.read16_after_opcode();
            }
            CallCcN16 => {
                if self.test_condition(encoding) {
                    self.push16(next_pc);
                    next_pc = self.read16_after_opcode();
                    additional_cycles = opcode.additional_cycles;
                }
            }
            RstU3 => {
                self.push16(next_pc);
                next_pc = 8 * u16::from(bits::extract(u32::from(encoding), 3, 3) as u8);
            }
            Ret => next_pc = self.pop16(),
            RetCc => {
                if self.test_condition(encoding) {
                    next_pc = self.pop16();
                    additional_cycles = opcode.additional_cycles;
                }
            }
            Reti => {
                self.ime = true;
                next_pc = self.pop16();
            }

            // Interrupt master enable and machine control
            Edi => self.ime = bits::test(u32::from(encoding), 3),
            Halt => self.next_non_idle_cycle = u64::MAX,
            Stop => panic!("STOP is not supported"),
        }

        self.pc = next_pc;
        self.next_non_idle_cycle = self
            .next_non_idle_cycle
            .saturating_add(opcode.cycles + additional_cycles);
    }
}

impl Clocked for Cpu {
    fn cycle(&mut self, cycle: u64) {
        // A requested, enabled interrupt ends HALT even when IME is clear.
        if self.next_non_idle_cycle == u64::MAX && self.pending_interrupt() {
            self.next_non_idle_cycle = cycle;
        }
        if cycle < self.next_non_idle_cycle {
            return;
        }
        self.really_cycle();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FlagSrc {
    V0,
    V1,
    Alu,
    Cpu,
}

fn flag_src_mask(which: FlagSrc, z: FlagSrc, n: FlagSrc, h: FlagSrc, c: FlagSrc) -> u32 {
    alu::mask_znhc(z == which, n == which, h == which, c == which)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Family {
    Nop,
    LdR8Hlr,
    LdAHlru,
    LdAN8r,
    LdACr,
    LdAN16r,
    LdABcr,
    LdADer,
    LdR8N8,
    LdR16spN16,
    LdSpHl,
    PopR16,
    LdHlrR8,
    LdHlruA,
    LdN8rA,
    LdCrA,
    LdN16rA,
    LdBcrA,
    LdDerA,
    LdHlrN8,
    LdN16rSp,
    LdR8R8,
    PushR16,
    AddAR8,
    AddAN8,
    AddAHlr,
    IncR8,
    IncHlr,
    IncR16sp,
    AddHlR16sp,
    LdHlspS8,
    SubAR8,
    SubAN8,
    SubAHlr,
    CpAR8,
    CpAN8,
    CpAHlr,
    DecR8,
    DecHlr,
    DecR16sp,
    AndAR8,
    AndAN8,
    AndAHlr,
    OrAR8,
    OrAN8,
    OrAHlr,
    XorAR8,
    XorAN8,
    XorAHlr,
    Rotca,
    Rota,
    RotcR8,
    RotR8,
    SwapR8,
    SlaR8,
    SraR8,
    SrlR8,
    RotcHlr,
    RotHlr,
    SwapHlr,
    SlaHlr,
    SraHlr,
    SrlHlr,
    BitU3R8,
    BitU3Hlr,
    ChgU3R8,
    ChgU3Hlr,
    Daa,
    Sccf,
    Cpl,
    JpHl,
    JpN16,
    JpCcN16,
    JrE8,
    JrCcE8,
    CallN16,
    CallCcN16,
    RstU3,
    Ret,
    RetCc,
    Reti,
    Edi,
    Halt,
    Stop,
}

#[derive(Clone, Copy)]
struct Opcode {
    family: Family,
    encoding: u8,
    total_bytes: u16,
    cycles: u64,
    additional_cycles: u64,
}

fn decode_direct(encoding: u8, pc: u16) -> Opcode {
    use Family::*;

    let family = match encoding {
        0x00 => Nop,
        0x10 => Stop,
        0x76 => Halt,
        0x07 | 0x0F => Rotca,
        0x17 | 0x1F => Rota,
        0x27 => Daa,
        0x2F => Cpl,
        0x37 | 0x3F => Sccf,
        0x08 => LdN16rSp,
        0x01 | 0x11 | 0x21 | 0x31 => LdR16spN16,
        0x02 => LdBcrA,
        0x12 => LdDerA,
        0x0A => LdABcr,
        0x1A => LdADer,
        0x22 | 0x32 => LdHlruA,
        0x2A | 0x3A => LdAHlru,
        0x03 | 0x13 | 0x23 | 0x33 => IncR16sp,
        0x0B | 0x1B | 0x2B | 0x3B => DecR16sp,
        0x09 | 0x19 | 0x29 | 0x39 => AddHlR16sp,
        0x34 => IncHlr,
        0x35 => DecHlr,
        0x36 => LdHlrN8,
        0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => IncR8,
        0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => DecR8,
        0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => LdR8N8,
        0x18 => JrE8,
        0x20 | 0x28 | 0x30 | 0x38 => JrCcE8,
        0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x7E => LdR8Hlr,
        0x70..=0x75 | 0x77 => LdHlrR8,
        0x40..=0x7F => LdR8R8,
        0x86 | 0x8E => AddAHlr,
        0x80..=0x8F => AddAR8,
        0x96 | 0x9E => SubAHlr,
        0x90..=0x9F => SubAR8,
        0xA6 => AndAHlr,
        0xA0..=0xA7 => AndAR8,
        0xAE => XorAHlr,
        0xA8..=0xAF => XorAR8,
        0xB6 => OrAHlr,
        0xB0..=0xB7 => OrAR8,
        0xBE => CpAHlr,
        0xB8..=0xBF => CpAR8,
        0xC0 | 0xC8 | 0xD0 | 0xD8 => RetCc,
        0xC9 => Ret,
        0xD9 => Reti,
        0xC1 | 0xD1 | 0xE1 | 0xF1 => PopR16,
        0xC5 | 0xD5 | 0xE5 | 0xF5 => PushR16,
        0xC2 | 0xCA | 0xD2 | 0xDA => JpCcN16,
        0xC3 => JpN16,
        0xE9 => JpHl,
        0xC4 | 0xCC | 0xD4 | 0xDC => CallCcN16,
        0xCD => CallN16,
        0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => RstU3,
        0xC6 | 0xCE => AddAN8,
        0xD6 | 0xDE => SubAN8,
        0xE6 => AndAN8,
        0xEE => XorAN8,
        0xF6 => OrAN8,
        0xFE => CpAN8,
        0xE0 => LdN8rA,
        0xF0 => LdAN8r,
        0xE2 => LdCrA,
        0xF2 => LdACr,
        0xEA => LdN16rA,
        0xFA => LdAN16r,
        0xE8 | 0xF8 => LdHlspS8,
        0xF9 => LdSpHl,
        0xF3 | 0xFB => Edi,
        _ => panic!("illegal opcode 0x{encoding:02X} at 0x{pc:04X}"),
    };

    let (cycles, additional_cycles) = direct_cycles(family, encoding);
    Opcode {
        family,
        encoding,
        total_bytes: 1 + operand_bytes(family),
        cycles,
        additional_cycles,
    }
}

fn decode_prefixed(encoding: u8) -> Opcode {
    use Family::*;

    let on_hl = encoding & 0b111 == 0b110;
    let family = match encoding {
        0x00..=0x0F => {
            if on_hl {
                RotcHlr
            } else {
                RotcR8
            }
        }
        0x10..=0x1F => {
            if on_hl {
                RotHlr
            } else {
                RotR8
            }
        }
        0x20..=0x27 => {
            if on_hl {
                SlaHlr
            } else {
                SlaR8
            }
        }
        0x28..=0x2F => {
            if on_hl {
                SraHlr
            } else {
                SraR8
            }
        }
        0x30..=0x37 => {
            if on_hl {
                SwapHlr
            } else {
                SwapR8
            }
        }
        0x38..=0x3F => {
            if on_hl {
                SrlHlr
            } else {
                SrlR8
            }
        }
        0x40..=0x7F => {
            if on_hl {
                BitU3Hlr
            } else {
                BitU3R8
            }
        }
        0x80..=0xFF => {
            if on_hl {
                ChgU3Hlr
            } else {
                ChgU3R8
            }
        }
    };

    let cycles = match family {
        BitU3Hlr => 3,
        RotcHlr | RotHlr | SwapHlr | SlaHlr | SraHlr | SrlHlr | ChgU3Hlr => 4,
        _ => 2,
    };
    Opcode {
        family,
        encoding,
        total_bytes: 2,
        cycles,
        additional_cycles: 0,
    }
}

// Immediate operand size implied by the family; the opcode byte itself (and
// the 0xCB prefix) is accounted for separately.
fn operand_bytes(family: Family) -> u16 {
    use Family::*;

    match family {
        LdR8N8 | LdHlrN8 | LdAN8r | LdN8rA | AddAN8 | SubAN8 | AndAN8 | OrAN8 | XorAN8
        | CpAN8 | LdHlspS8 | JrE8 | JrCcE8 => 1,
        LdR16spN16 | LdAN16r | LdN16rA | LdN16rSp | JpN16 | JpCcN16 | CallN16 | CallCcN16 => 2,
        _ => 0,
    }
}

fn direct_cycles(family: Family, encoding: u8) -> (u64, u64) {
    use Family::*;

    match family {
        Nop | LdR8R8 | LdSpHl | AddAR8 | SubAR8 | CpAR8 | AndAR8 | OrAR8 | XorAR8 | IncR8
        | DecR8 | Rotca | Rota | Daa | Sccf | Cpl | JpHl | Edi | Halt | Stop => (1, 0),
        LdR8Hlr | LdAHlru | LdACr | LdABcr | LdADer | LdR8N8 | LdHlrR8 | LdHlruA | LdCrA
        | LdBcrA | LdDerA | AddAN8 | AddAHlr | SubAN8 | SubAHlr | CpAN8 | CpAHlr | AndAN8
        | AndAHlr | OrAN8 | OrAHlr | XorAN8 | XorAHlr | IncR16sp | DecR16sp | AddHlR16sp => {
            (2, 0)
        }
        LdAN8r | LdR16spN16 | PopR16 | LdN8rA | LdHlrN8 | IncHlr | DecHlr | JrE8 => (3, 0),
        LdAN16r | LdN16rA | PushR16 | Ret | Reti | JpN16 | RstU3 => (4, 0),
        LdN16rSp => (5, 0),
        CallN16 => (6, 0),
        LdHlspS8 => {
            if encoding == 0xF8 {
                (3, 0)
            } else {
                (4, 0)
            }
        }
        JpCcN16 => (3, 1),
        JrCcE8 => (2, 1),
        CallCcN16 => (3, 3),
        RetCc => (2, 3),
        _ => unreachable!("prefixed family in direct decode"),
    }
}

fn extract_reg(encoding: u8, start_bit: u32) -> Reg {
    match bits::extract(u32::from(encoding), start_bit, 3) {
        0b000 => Reg::B,
        0b001 => Reg::C,
        0b010 => Reg::D,
        0b011 => Reg::E,
        0b100 => Reg::H,
        0b101 => Reg::L,
        0b111 => Reg::A,
        _ => unreachable!("register code 0b110 addresses memory"),
    }
}

fn extract_reg16(encoding: u8) -> Reg16 {
    match bits::extract(u32::from(encoding), 4, 2) {
        0b00 => Reg16::Bc,
        0b01 => Reg16::De,
        0b10 => Reg16::Hl,
        _ => Reg16::Af,
    }
}

fn extract_bit_index(encoding: u8) -> u32 {
    bits::extract(u32::from(encoding), 3, 3)
}

fn rotation_dir(encoding: u8) -> RotDir {
    if bits::test(u32::from(encoding), 3) {
        RotDir::Right
    } else {
        RotDir::Left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RamController;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn machine(program: &[u8]) -> (Cpu, Bus, IrqLine) {
        let bus = Bus::new();
        let irq = IrqLine::new();
        bus.attach(Rc::new(RefCell::new(CpuPort::new(irq.clone()))));
        let ram = Rc::new(RefCell::new(Ram::new(0x1_0000)));
        for (i, &b) in program.iter().enumerate() {
            ram.borrow_mut().write(i, b);
        }
        bus.attach(Rc::new(RefCell::new(RamController::new(ram, 0x0000, 0))));
        let cpu = Cpu::new(bus.clone(), irq.clone());
        (cpu, bus, irq)
    }

    fn run(cpu: &mut Cpu, cycles: u64) {
        for c in 0..cycles {
            cpu.cycle(c);
        }
    }

    #[test]
    fn decode_spot_checks() {
        let op = decode_direct(0x01, 0);
        assert_eq!(op.family, Family::LdR16spN16);
        assert_eq!(op.total_bytes, 3);
        assert_eq!(op.cycles, 3);

        let op = decode_direct(0xCD, 0);
        assert_eq!(op.family, Family::CallN16);
        assert_eq!(op.cycles, 6);

        let op = decode_direct(0x20, 0);
        assert_eq!(op.family, Family::JrCcE8);
        assert_eq!((op.cycles, op.additional_cycles), (2, 1));

        let op = decode_prefixed(0x46);
        assert_eq!(op.family, Family::BitU3Hlr);
        assert_eq!((op.total_bytes, op.cycles), (2, 3));

        let op = decode_prefixed(0xC7);
        assert_eq!(op.family, Family::ChgU3R8);
    }

    #[test]
    #[should_panic]
    fn illegal_opcode_panics() {
        decode_direct(0xD3, 0x1234);
    }

    #[test]
    fn ld_bc_immediate() {
        let (mut cpu, _bus, _irq) = machine(&[0x01, 0x44, 0x0E, 0x3C]);
        run(&mut cpu, 3);
        assert_eq!(cpu.reg(Reg::B), 0x0E);
        assert_eq!(cpu.reg(Reg::C), 0x44);
        assert_eq!(cpu.pc(), 3);
        // The following INC A only runs on its own cycle.
        assert_eq!(cpu.reg(Reg::A), 0);
        run(&mut cpu, 4);
        assert_eq!(cpu.reg(Reg::A), 1);
    }

    #[test]
    fn add_immediate_sets_half_carry() {
        // LD A,0x08; ADD A,0x08
        let (mut cpu, _bus, _irq) = machine(&[0x3E, 0x08, 0xC6, 0x08]);
        run(&mut cpu, 4);
        assert_eq!(cpu.reg(Reg::A), 0x10);
        assert_eq!(cpu.reg(Reg::F), 0x20);
    }

    #[test]
    fn memory_roundtrip_through_hl() {
        // LD HL,0xC000; LD (HL),0x5A; LD B,(HL)
        let (mut cpu, bus, _irq) = machine(&[0x21, 0x00, 0xC0, 0x36, 0x5A, 0x46]);
        run(&mut cpu, 8);
        assert_eq!(bus.read(0xC000), 0x5A);
        assert_eq!(cpu.reg(Reg::B), 0x5A);
    }

    #[test]
    fn conditional_jump_taken_and_not_taken() {
        // XOR A,A; JR NZ,+2 (not taken); JR Z,+1 (taken, skips the INC B)
        let (mut cpu, _bus, _irq) = machine(&[0xAF, 0x20, 0x02, 0x28, 0x01, 0x04, 0x0C]);
        // XOR 1 cycle, JR NZ untaken 2 cycles, JR Z taken 3 cycles, INC C.
        run(&mut cpu, 7);
        assert_eq!(cpu.reg(Reg::B), 0);
        assert_eq!(cpu.reg(Reg::C), 1);
    }

    #[test]
    fn call_and_ret() {
        // CALL 0x0010; INC B at 0x0010... the callee returns to 0x0003.
        let mut program = [0u8; 0x20];
        program[0] = 0xCD;
        program[1] = 0x10;
        program[2] = 0x00;
        program[3] = 0x04; // INC B, runs after RET
        program[0x10] = 0x0C; // INC C
        program[0x11] = 0xC9; // RET
        let (mut cpu, _bus, _irq) = machine(&program);
        cpu.set_sp(0xFFFE);
        run(&mut cpu, 6 + 1 + 4 + 1);
        assert_eq!(cpu.reg(Reg::C), 1);
        assert_eq!(cpu.reg(Reg::B), 1);
        assert_eq!(cpu.sp(), 0xFFFE);
    }

    #[test]
    fn halt_wakes_on_interrupt_and_services_it() {
        // EI; HALT
        let (mut cpu, bus, irq) = machine(&[0xFB, 0x76]);
        cpu.set_sp(0xFFF0);
        run(&mut cpu, 10);
        assert_eq!(cpu.pc(), 2);

        bus.write(REG_IE, 1 << Interrupt::Timer as u8);
        irq.request(Interrupt::Timer);
        cpu.cycle(10);
        assert_eq!(cpu.pc(), 0x50);
        assert_eq!(cpu.sp(), 0xFFEE);
        assert_eq!(bus.read(0xFFEE), 0x02);
        assert_eq!(irq.interrupt_flags(), 0);
    }

    #[test]
    fn interrupts_are_ignored_while_ime_is_clear() {
        // NOP chain, no EI
        let (mut cpu, bus, irq) = machine(&[0x00, 0x00, 0x00, 0x00]);
        bus.write(REG_IE, 1 << Interrupt::VBlank as u8);
        irq.request(Interrupt::VBlank);
        run(&mut cpu, 3);
        assert_eq!(cpu.pc(), 3);
        assert_ne!(irq.interrupt_flags(), 0);
    }

    #[test]
    fn lower_numbered_interrupts_win() {
        let (mut cpu, bus, irq) = machine(&[0xFB, 0x00, 0x00]);
        cpu.set_sp(0xFFF0);
        bus.write(REG_IE, 0x1F);
        irq.request(Interrupt::Joypad);
        irq.request(Interrupt::LcdStat);
        // EI takes effect after its cycle; the next cycle services LcdStat.
        run(&mut cpu, 2);
        assert_eq!(cpu.pc(), 0x48);
        assert_eq!(irq.interrupt_flags(), 1 << Interrupt::Joypad as u8);
    }

    #[test]
    #[should_panic]
    fn stop_is_fatal() {
        let (mut cpu, _bus, _irq) = machine(&[0x10, 0x00]);
        run(&mut cpu, 1);
    }
}
