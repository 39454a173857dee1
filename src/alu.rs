//! Arithmetic and logic operations of the CPU.
//!
//! Every operation is a pure function returning a *packed* `u32`: the
//! result value in bits 8 and up, and the Z, N, H, C flags in bits 7..4 of
//! the low byte (matching their layout in the F register). The CPU unpacks
//! the two halves with [`unpack_value`] and [`unpack_flags`] and decides per
//! instruction which flags to keep.

use crate::bits;
use crate::registers::Bit;

/// Flag bit positions, as laid out in the F register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flag {
    C = 4,
    H = 5,
    N = 6,
    Z = 7,
}

impl Bit for Flag {
    fn index(self) -> u32 {
        self as u32
    }
}

/// Rotation direction for the rotate operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotDir {
    Left,
    Right,
}

/// Builds the flag byte from the four flag values.
pub fn mask_znhc(z: bool, n: bool, h: bool, c: bool) -> u32 {
    let mut flags = 0;
    flags = bits::set(flags, Flag::Z.index(), z);
    flags = bits::set(flags, Flag::N.index(), n);
    flags = bits::set(flags, Flag::H.index(), h);
    flags = bits::set(flags, Flag::C.index(), c);
    flags
}

/// Value half of a packed result (8 or 16 bits depending on the operation).
pub fn unpack_value(value_flags: u32) -> u32 {
    value_flags >> 8
}

/// Flag byte of a packed result.
pub fn unpack_flags(value_flags: u32) -> u32 {
    bits::clip(8, value_flags)
}

fn pack_znhc(value: u32, z: bool, n: bool, h: bool, c: bool) -> u32 {
    value << 8 | mask_znhc(z, n, h, c)
}

/// 8-bit addition with optional incoming carry. Flags Z0HC.
pub fn add(l: u8, r: u8, c0: bool) -> u32 {
    let carry = u32::from(c0);
    let sum = u32::from(l) + u32::from(r) + carry;
    let value = bits::clip(8, sum);
    let h = (u32::from(l) & 0xF) + (u32::from(r) & 0xF) + carry > 0xF;
    pack_znhc(value, value == 0, false, h, sum > 0xFF)
}

/// 8-bit subtraction with optional incoming borrow. Flags Z1HC.
pub fn sub(l: u8, r: u8, b0: bool) -> u32 {
    let borrow = u32::from(b0);
    let value = u32::from(l.wrapping_sub(r).wrapping_sub(b0 as u8));
    let h = (u32::from(l) & 0xF) < (u32::from(r) & 0xF) + borrow;
    let c = u32::from(l) < u32::from(r) + borrow;
    pack_znhc(value, value == 0, true, h, c)
}

/// Adjusts the result of an 8-bit addition or subtraction so that it reads
/// as packed decimal, given the N, H and C flags that operation produced.
/// Flags ZN0C.
pub fn bcd_adjust(v: u8, n: bool, h: bool, c: bool) -> u32 {
    let fix_l = h || (!n && v & 0xF > 9);
    let fix_h = c || (!n && v > 0x99);
    let fix = 0x60 * u8::from(fix_h) + 0x06 * u8::from(fix_l);
    let value = if n {
        v.wrapping_sub(fix)
    } else {
        v.wrapping_add(fix)
    };
    pack_znhc(u32::from(value), value == 0, n, false, fix_h)
}

/// Bitwise conjunction. Flags Z010.
pub fn and(l: u8, r: u8) -> u32 {
    let value = u32::from(l & r);
    pack_znhc(value, value == 0, false, true, false)
}

/// Bitwise disjunction. Flags Z000.
pub fn or(l: u8, r: u8) -> u32 {
    let value = u32::from(l | r);
    pack_znhc(value, value == 0, false, false, false)
}

/// Bitwise exclusive disjunction. Flags Z000.
pub fn xor(l: u8, r: u8) -> u32 {
    let value = u32::from(l ^ r);
    pack_znhc(value, value == 0, false, false, false)
}

/// Left shift by one; the evicted bit becomes C. Flags Z00C.
pub fn shift_left(v: u8) -> u32 {
    let value = u32::from(v) << 1;
    let c = bits::test(value, 8);
    let value = bits::clip(8, value);
    pack_znhc(value, value == 0, false, false, c)
}

/// Arithmetic right shift by one (bit 7 is preserved). Flags Z00C.
pub fn shift_right_a(v: u8) -> u32 {
    let value = u32::from((v as i8 >> 1) as u8);
    pack_znhc(value, value == 0, false, false, bits::test(u32::from(v), 0))
}

/// Logical right shift by one (bit 7 becomes zero). Flags Z00C.
pub fn shift_right_l(v: u8) -> u32 {
    let value = u32::from(v >> 1);
    pack_znhc(value, value == 0, false, false, bits::test(u32::from(v), 0))
}

/// 8-bit rotation; the bit that wrapped around becomes C. Flags Z00C.
pub fn rotate(dir: RotDir, v: u8) -> u32 {
    let distance = if dir == RotDir::Left { 1 } else { -1 };
    let value = bits::rotate(8, u32::from(v), distance);
    let wrapped = if dir == RotDir::Left { 0 } else { 7 };
    pack_znhc(value, value == 0, false, false, bits::test(value, wrapped))
}

/// 9-bit rotation of the value and the carry flag together; the new C is
/// what ends up in the ninth bit. Flags Z00C.
pub fn rotate_through_carry(dir: RotDir, v: u8, c: bool) -> u32 {
    let distance = if dir == RotDir::Left { 1 } else { -1 };
    let combined = bits::set(u32::from(v), 8, c);
    let rotated = bits::rotate(9, combined, distance);
    let value = bits::clip(8, rotated);
    pack_znhc(value, value == 0, false, false, bits::test(rotated, 8))
}

/// Exchanges the two nibbles. Flags Z000.
pub fn swap(v: u8) -> u32 {
    let value = bits::rotate(8, u32::from(v), 4);
    pack_znhc(value, value == 0, false, false, false)
}

/// Tests bit `bit_index` of `v`; the packed value is zero and only the
/// flags matter. Flags Z010 with Z set iff the bit is clear.
pub fn test_bit(v: u8, bit_index: u32) -> u32 {
    assert!(bit_index < 8, "bit index out of range: {bit_index}");
    pack_znhc(0, !bits::test(u32::from(v), bit_index), false, true, false)
}

/// 16-bit addition whose H and C flags come from the low-byte addition.
/// Flags 00HC.
pub fn add16_l(l: u16, r: u16) -> u32 {
    let value = u32::from(l.wrapping_add(r));
    let h = (u32::from(l) & 0xF) + (u32::from(r) & 0xF) > 0xF;
    let c = (u32::from(l) & 0xFF) + (u32::from(r) & 0xFF) > 0xFF;
    pack_znhc(value, false, false, h, c)
}

/// 16-bit addition whose H and C flags come from the high-byte addition.
/// Flags 00HC.
pub fn add16_h(l: u16, r: u16) -> u32 {
    let value = u32::from(l.wrapping_add(r));
    let h = (u32::from(l) & 0xFFF) + (u32::from(r) & 0xFFF) > 0xFFF;
    let c = u32::from(l) + u32::from(r) > 0xFFFF;
    pack_znhc(value, false, false, h, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(vf: u32) -> u32 {
        unpack_value(vf)
    }

    fn flags(vf: u32) -> u32 {
        unpack_flags(vf)
    }

    #[test]
    fn add_without_carry() {
        let r = add(0x10, 0x15, false);
        assert_eq!(value(r), 0x25);
        assert_eq!(flags(r), 0x00);
    }

    #[test]
    fn add_sets_half_carry_and_carry() {
        let r = add(0x08, 0x08, false);
        assert_eq!(value(r), 0x10);
        assert_eq!(flags(r), mask_znhc(false, false, true, false));

        let r = add(0x80, 0x7F, true);
        assert_eq!(value(r), 0x00);
        assert_eq!(flags(r), mask_znhc(true, false, true, true));
    }

    #[test]
    fn sub_flags() {
        let r = sub(0x10, 0x10, false);
        assert_eq!(value(r), 0x00);
        assert_eq!(flags(r), mask_znhc(true, true, false, false));

        let r = sub(0x10, 0x80, false);
        assert_eq!(value(r), 0x90);
        assert_eq!(flags(r), mask_znhc(false, true, false, true));

        let r = sub(0x01, 0x01, true);
        assert_eq!(value(r), 0xFF);
        assert_eq!(flags(r), mask_znhc(false, true, true, true));
    }

    #[test]
    fn bcd_adjust_after_addition() {
        // 0x6D is 0x37 + 0x36 in binary; decimally 37 + 36 = 73.
        let r = bcd_adjust(0x6D, false, false, false);
        assert_eq!(value(r), 0x73);
        assert_eq!(flags(r), 0x00);
    }

    #[test]
    fn bcd_adjust_after_subtraction() {
        // 0x0F is 0x12 - 0x03 in binary; decimally 12 - 3 = 9.
        let r = bcd_adjust(0x0F, true, true, false);
        assert_eq!(value(r), 0x09);
        assert_eq!(flags(r), mask_znhc(false, true, false, false));
    }

    #[test]
    fn logic_ops_and_their_fixed_flags() {
        assert_eq!(and(0x53, 0xA7), pack_znhc(0x03, false, false, true, false));
        assert_eq!(and(0x53, 0xAC), pack_znhc(0x00, true, false, true, false));
        assert_eq!(or(0x53, 0xA7), pack_znhc(0xF7, false, false, false, false));
        assert_eq!(xor(0x53, 0xA7), pack_znhc(0xF4, false, false, false, false));
        assert_eq!(xor(0x53, 0x53), pack_znhc(0x00, true, false, false, false));
    }

    #[test]
    fn shifts() {
        assert_eq!(shift_left(0x80), pack_znhc(0x00, true, false, false, true));
        assert_eq!(shift_left(0x41), pack_znhc(0x82, false, false, false, false));
        assert_eq!(
            shift_right_a(0x81),
            pack_znhc(0xC0, false, false, false, true)
        );
        assert_eq!(
            shift_right_l(0x81),
            pack_znhc(0x40, false, false, false, true)
        );
    }

    #[test]
    fn rotations() {
        assert_eq!(
            rotate(RotDir::Left, 0x80),
            pack_znhc(0x01, false, false, false, true)
        );
        assert_eq!(
            rotate(RotDir::Right, 0x01),
            pack_znhc(0x80, false, false, false, true)
        );
        assert_eq!(
            rotate_through_carry(RotDir::Left, 0x80, false),
            pack_znhc(0x00, true, false, false, true)
        );
        assert_eq!(
            rotate_through_carry(RotDir::Right, 0x00, true),
            pack_znhc(0x80, false, false, false, false)
        );
    }

    #[test]
    fn swap_exchanges_nibbles() {
        assert_eq!(swap(0xAB), pack_znhc(0xBA, false, false, false, false));
        assert_eq!(swap(0x00), pack_znhc(0x00, true, false, false, false));
    }

    #[test]
    fn test_bit_reflects_bit_in_z() {
        assert_eq!(
            test_bit(0x10, 4),
            pack_znhc(0, false, false, true, false)
        );
        assert_eq!(test_bit(0x10, 3), pack_znhc(0, true, false, true, false));
    }

    #[test]
    fn add16_variants_pick_their_flag_byte() {
        let r = add16_l(0x11FF, 0x0001);
        assert_eq!(value(r), 0x1200);
        assert_eq!(flags(r), mask_znhc(false, false, true, true));

        let r = add16_h(0x11FF, 0x0001);
        assert_eq!(value(r), 0x1200);
        assert_eq!(flags(r), mask_znhc(false, false, false, false));

        let r = add16_h(0xFFFF, 0x0001);
        assert_eq!(value(r), 0x0000);
        assert_eq!(flags(r), mask_znhc(false, false, true, true));
    }
}
