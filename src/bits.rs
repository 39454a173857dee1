//! Bit-manipulation helpers over 32-bit words.
//!
//! These mirror the handful of operations the CPU, ALU and bit vectors keep
//! needing: masking, range extraction, fixed-width rotation, sign extension
//! and byte reversal. Out-of-range indices are programming errors and panic.

const WORD_SIZE: u32 = u32::BITS;

/// Returns a word whose only set bit is `index`.
///
/// Panics if `index` is not in `0..32`.
pub fn mask(index: u32) -> u32 {
    assert!(index < WORD_SIZE, "bit index out of range: {index}");
    1 << index
}

/// Returns true iff bit `index` of `bits` is set.
pub fn test(bits: u32, index: u32) -> bool {
    bits & mask(index) != 0
}

/// Returns `bits` with bit `index` forced to `value`.
pub fn set(bits: u32, index: u32, value: bool) -> u32 {
    let m = mask(index);
    if value { bits | m } else { bits & !m }
}

/// Keeps the `size` low-order bits of `bits`, clearing the rest.
///
/// Panics if `size > 32`.
pub fn clip(size: u32, bits: u32) -> u32 {
    assert!(size <= WORD_SIZE, "clip size out of range: {size}");
    if size == WORD_SIZE {
        bits
    } else {
        bits & ((1 << size) - 1)
    }
}

/// Extracts the `size`-bit field of `bits` starting at bit `start`.
///
/// Panics unless `start + size <= 32`.
pub fn extract(bits: u32, start: u32, size: u32) -> u32 {
    assert!(
        start <= WORD_SIZE && size <= WORD_SIZE - start,
        "bit range out of bounds: start {start}, size {size}"
    );
    if size == WORD_SIZE {
        bits
    } else {
        clip(size, bits >> start)
    }
}

/// Rotates the `size` low-order bits of `bits` by `distance` (left when
/// positive, right when negative).
///
/// Panics if `size` is not in `1..=32` or if `bits` does not fit in `size`
/// bits.
pub fn rotate(size: u32, bits: u32, distance: i32) -> u32 {
    assert!(size > 0 && size <= WORD_SIZE, "rotation size out of range: {size}");
    assert!(bits == clip(size, bits), "value does not fit in {size} bits");
    let d = distance.rem_euclid(size as i32) as u32;
    if d == 0 {
        bits
    } else {
        clip(size, (bits << d) | (bits >> (size - d)))
    }
}

/// Sign-extends an 8-bit value to a signed 32-bit integer.
pub fn sign_extend8(b: u8) -> i32 {
    b as i8 as i32
}

/// Reverses the order of the 8 bits of `b` (bit 0 swaps with bit 7, etc.).
pub fn reverse8(b: u8) -> u8 {
    b.reverse_bits()
}

/// Concatenates two bytes into a 16-bit value, `high` in the upper byte.
pub fn make16(high: u8, low: u8) -> u16 {
    u16::from(high) << 8 | u16::from(low)
}

/// Upper byte of a 16-bit value.
pub fn high8(v: u16) -> u8 {
    (v >> 8) as u8
}

/// Lower byte of a 16-bit value.
pub fn low8(v: u16) -> u8 {
    v as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_sets_single_bit() {
        assert_eq!(mask(0), 1);
        assert_eq!(mask(7), 0x80);
        assert_eq!(mask(31), 0x8000_0000);
    }

    #[test]
    #[should_panic]
    fn mask_rejects_large_index() {
        mask(32);
    }

    #[test]
    fn test_and_set_roundtrip() {
        let v = set(0, 5, true);
        assert!(test(v, 5));
        assert!(!test(set(v, 5, false), 5));
    }

    #[test]
    fn clip_keeps_low_bits() {
        assert_eq!(clip(4, 0xFF), 0x0F);
        assert_eq!(clip(32, 0xDEAD_BEEF), 0xDEAD_BEEF);
        assert_eq!(clip(0, 0xFF), 0);
    }

    #[test]
    fn extract_pulls_field() {
        assert_eq!(extract(0xABCD, 4, 8), 0xBC);
        assert_eq!(extract(0xFFFF_FFFF, 0, 32), 0xFFFF_FFFF);
    }

    #[test]
    fn rotate_both_directions() {
        assert_eq!(rotate(8, 0b1000_0001, 1), 0b0000_0011);
        assert_eq!(rotate(8, 0b1000_0001, -1), 0b1100_0000);
        assert_eq!(rotate(9, 0x100, 1), 0x001);
    }

    #[test]
    fn sign_extend_negative() {
        assert_eq!(sign_extend8(0xFF), -1);
        assert_eq!(sign_extend8(0x7F), 127);
    }

    #[test]
    fn reverse8_swaps_ends() {
        assert_eq!(reverse8(0b1000_0000), 0b0000_0001);
        assert_eq!(reverse8(0b1100_1010), 0b0101_0011);
    }

    #[test]
    fn make16_concatenates() {
        assert_eq!(make16(0xAB, 0xCD), 0xABCD);
        assert_eq!(high8(0xABCD), 0xAB);
        assert_eq!(low8(0xABCD), 0xCD);
    }
}
