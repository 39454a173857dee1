//! Generic byte-register storage indexed by closed enum sets.
//!
//! Components describe their register banks as fieldless enums implementing
//! [`Register`], and their flag bits as enums implementing [`Bit`]. The
//! [`RegisterFile`] then gives byte- and bit-level access without any
//! per-component storage code.

use std::marker::PhantomData;

use crate::bits;

/// A name for one 8-bit register in a bank.
///
/// Implementors are fieldless enums with contiguous discriminants starting
/// at zero; `COUNT` is the number of variants.
pub trait Register: Copy {
    const COUNT: usize;

    fn index(self) -> usize;
}

/// A name for one bit position inside a byte register or word.
pub trait Bit: Copy {
    fn index(self) -> u32;

    fn mask(self) -> u32 {
        bits::mask(self.index())
    }
}

/// A bank of 8-bit registers, one per variant of `R`.
#[derive(Debug)]
pub struct RegisterFile<R: Register> {
    data: Vec<u8>,
    _registers: PhantomData<R>,
}

impl<R: Register> RegisterFile<R> {
    /// Creates a bank with every register initialized to zero.
    pub fn new() -> Self {
        Self {
            data: vec![0; R::COUNT],
            _registers: PhantomData,
        }
    }

    pub fn get(&self, reg: R) -> u8 {
        self.data[reg.index()]
    }

    pub fn set(&mut self, reg: R, value: u8) {
        self.data[reg.index()] = value;
    }

    /// Returns true iff bit `bit` of register `reg` is set.
    pub fn test(&self, reg: R, bit: impl Bit) -> bool {
        bits::test(u32::from(self.get(reg)), bit.index())
    }

    /// Forces bit `bit` of register `reg` to `value`.
    pub fn set_bit(&mut self, reg: R, bit: impl Bit, value: bool) {
        let updated = bits::set(u32::from(self.get(reg)), bit.index(), value);
        self.set(reg, updated as u8);
    }
}

impl<R: Register> Default for RegisterFile<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    enum TestReg {
        A,
        B,
        C,
    }

    impl Register for TestReg {
        const COUNT: usize = 3;

        fn index(self) -> usize {
            self as usize
        }
    }

    #[derive(Clone, Copy)]
    enum TestBit {
        Low,
        High = 7,
    }

    impl Bit for TestBit {
        fn index(self) -> u32 {
            self as u32
        }
    }

    #[test]
    fn registers_start_at_zero() {
        let f = RegisterFile::<TestReg>::new();
        assert_eq!(f.get(TestReg::A), 0);
        assert_eq!(f.get(TestReg::C), 0);
    }

    #[test]
    fn set_and_get_are_independent_per_register() {
        let mut f = RegisterFile::new();
        f.set(TestReg::A, 0x12);
        f.set(TestReg::B, 0x34);
        assert_eq!(f.get(TestReg::A), 0x12);
        assert_eq!(f.get(TestReg::B), 0x34);
        assert_eq!(f.get(TestReg::C), 0);
    }

    #[test]
    fn bit_access_touches_single_bits() {
        let mut f = RegisterFile::new();
        f.set_bit(TestReg::B, TestBit::High, true);
        assert_eq!(f.get(TestReg::B), 0x80);
        assert!(f.test(TestReg::B, TestBit::High));
        assert!(!f.test(TestReg::B, TestBit::Low));
        f.set_bit(TestReg::B, TestBit::High, false);
        assert_eq!(f.get(TestReg::B), 0);
    }
}
