//! Immutable bit vectors whose length is a positive multiple of 32.
//!
//! A [`BitVector`] is stored as little-endian 32-bit chunks: bit 0 of the
//! vector is bit 0 of chunk 0. All operations are value-returning; nothing
//! mutates in place. The two extraction modes treat the vector either as
//! zero-extended to infinity in both directions, or as wrapped around
//! (index modulo length). Shifting is defined in terms of zero-extended
//! extraction, so bits shifted in are always zero.

use crate::bits;

const CHUNK_BITS: usize = u32::BITS as usize;
const BYTES_PER_CHUNK: usize = CHUNK_BITS / 8;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitVector {
    chunks: Vec<u32>,
}

impl BitVector {
    /// Creates a vector of `size` bits, all equal to `initial_value`.
    ///
    /// Panics unless `size` is a positive multiple of 32.
    pub fn new(size: usize, initial_value: bool) -> Self {
        let fill = if initial_value { u32::MAX } else { 0 };
        Self {
            chunks: vec![fill; chunk_count(size)],
        }
    }

    /// Creates an all-zero vector of `size` bits.
    pub fn zeros(size: usize) -> Self {
        Self::new(size, false)
    }

    fn from_chunks(chunks: Vec<u32>) -> Self {
        assert!(!chunks.is_empty());
        Self { chunks }
    }

    /// Length of the vector in bits.
    pub fn size(&self) -> usize {
        self.chunks.len() * CHUNK_BITS
    }

    /// Returns true iff bit `index` is set.
    ///
    /// Panics if `index` is out of bounds.
    pub fn test_bit(&self, index: usize) -> bool {
        assert!(index < self.size(), "bit index out of range: {index}");
        bits::test(self.chunks[index / CHUNK_BITS], (index % CHUNK_BITS) as u32)
    }

    /// Bitwise complement.
    pub fn not(&self) -> Self {
        Self::from_chunks(self.chunks.iter().map(|c| !c).collect())
    }

    /// Bitwise conjunction. Panics if the operands differ in length.
    pub fn and(&self, that: &Self) -> Self {
        self.zip_with(that, |a, b| a & b)
    }

    /// Bitwise disjunction. Panics if the operands differ in length.
    pub fn or(&self, that: &Self) -> Self {
        self.zip_with(that, |a, b| a | b)
    }

    fn zip_with(&self, that: &Self, op: impl Fn(u32, u32) -> u32) -> Self {
        assert_eq!(
            self.size(),
            that.size(),
            "operand lengths differ: {} vs {}",
            self.size(),
            that.size()
        );
        Self::from_chunks(
            self.chunks
                .iter()
                .zip(&that.chunks)
                .map(|(&a, &b)| op(a, b))
                .collect(),
        )
    }

    /// Extracts `size` bits starting at `start_index` from the zero-extended
    /// view of the vector: indices outside `0..self.size()` read as zero.
    pub fn extract_zero_extended(&self, start_index: i32, size: usize) -> Self {
        self.extract(start_index, size, false)
    }

    /// Extracts `size` bits starting at `start_index` from the wrapped view
    /// of the vector: every index is taken modulo `self.size()`.
    pub fn extract_wrapped(&self, start_index: i32, size: usize) -> Self {
        self.extract(start_index, size, true)
    }

    /// Shifts the vector by `distance` bits: left for positive distances,
    /// right for negative ones. Vacated positions fill with zero.
    pub fn shift(&self, distance: i32) -> Self {
        self.extract_zero_extended(-distance, self.size())
    }

    fn extract(&self, start_index: i32, size: usize, wrapped: bool) -> Self {
        let count = chunk_count(size);
        let chunks = (0..count)
            .map(|i| self.chunk_at(start_index as i64 + (i * CHUNK_BITS) as i64, wrapped))
            .collect();
        Self::from_chunks(chunks)
    }

    // Computes the 32-bit output chunk whose lowest bit sits at `bit_index`
    // of the (zero-extended or wrapped) input. A non-aligned chunk straddles
    // two input chunks: the high part of one supplies the low bits, the low
    // part of the next supplies the high bits.
    fn chunk_at(&self, bit_index: i64, wrapped: bool) -> u32 {
        let size = self.size() as i64;
        let wrapped_index = bit_index.rem_euclid(size);
        let bit_in_chunk = (wrapped_index % CHUNK_BITS as i64) as u32;
        let chunk_index = (wrapped_index / CHUNK_BITS as i64) as usize;
        let end_index = bit_index + CHUNK_BITS as i64;
        let upper_size = CHUNK_BITS as u32 - bit_in_chunk;

        // Aligned: the output chunk is exactly one input chunk (or all-zero
        // when outside a zero-extended vector).
        if bit_index.rem_euclid(CHUNK_BITS as i64) == 0 {
            if bit_index < 0 || bit_index >= size {
                return if wrapped { self.chunks[chunk_index] } else { 0 };
            }
            return self.chunks[(bit_index / CHUNK_BITS as i64) as usize];
        }

        if !wrapped {
            if end_index < 0 || bit_index >= size {
                // Entirely outside the vector.
                return 0;
            } else if bit_index >= 0 && end_index > size {
                // Tail straddles the upper boundary; the part beyond is zero.
                return bits::extract(self.chunks[chunk_index], bit_in_chunk, upper_size);
            } else if bit_index < 0 {
                // Head straddles the lower boundary; the part below is zero.
                return bits::clip(end_index as u32, self.chunks[0]) << (-bit_index) as u32;
            }
        }

        let first = bits::extract(self.chunks[chunk_index], bit_in_chunk, upper_size);
        let second =
            bits::clip(bit_in_chunk, self.chunks[(chunk_index + 1) % self.chunks.len()]);
        first | second << upper_size
    }
}

fn chunk_count(size: usize) -> usize {
    assert!(
        size > 0 && size % CHUNK_BITS == 0,
        "size must be a positive multiple of 32, got {size}"
    );
    size / CHUNK_BITS
}

/// Accumulates byte-granularity writes into an all-zero vector.
///
/// `build` consumes the builder, so it can only be used once.
pub struct Builder {
    chunks: Vec<u32>,
}

impl Builder {
    /// Creates a builder for a vector of `size` bits.
    ///
    /// Panics unless `size` is a positive multiple of 32.
    pub fn new(size: usize) -> Self {
        Self {
            chunks: vec![0; chunk_count(size)],
        }
    }

    /// Sets the byte at byte-index `index`.
    ///
    /// Panics if `index` is out of bounds.
    pub fn set_byte(&mut self, index: usize, value: u8) -> &mut Self {
        assert!(
            index < self.chunks.len() * BYTES_PER_CHUNK,
            "byte index out of range: {index}"
        );
        let chunk_index = index / BYTES_PER_CHUNK;
        let bit_index = (index % BYTES_PER_CHUNK) * 8;
        let chunk = &mut self.chunks[chunk_index];
        *chunk = *chunk & !(0xFF << bit_index) | u32::from(value) << bit_index;
        self
    }

    /// Builds the vector, consuming the builder.
    pub fn build(self) -> BitVector {
        BitVector::from_chunks(self.chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_bytes(bytes: &[u8]) -> BitVector {
        let mut b = Builder::new(bytes.len() * 8);
        for (i, &v) in bytes.iter().enumerate() {
            b.set_byte(i, v);
        }
        b.build()
    }

    #[test]
    fn constructors_fill_uniformly() {
        let zeros = BitVector::zeros(64);
        let ones = BitVector::new(64, true);
        for i in 0..64 {
            assert!(!zeros.test_bit(i));
            assert!(ones.test_bit(i));
        }
    }

    #[test]
    #[should_panic]
    fn size_must_be_multiple_of_32() {
        BitVector::zeros(48);
    }

    #[test]
    #[should_panic]
    fn size_must_be_positive() {
        BitVector::zeros(0);
    }

    #[test]
    fn double_complement_is_identity() {
        let v = from_bytes(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x23, 0x45, 0x67]);
        assert_eq!(v.not().not(), v);
    }

    #[test]
    fn and_or_behave_bitwise() {
        let a = from_bytes(&[0xF0, 0x0F, 0xAA, 0x55]);
        let b = from_bytes(&[0xFF, 0x00, 0x0F, 0xF0]);
        assert_eq!(a.and(&b), from_bytes(&[0xF0, 0x00, 0x0A, 0x50]));
        assert_eq!(a.or(&b), from_bytes(&[0xFF, 0x0F, 0xAF, 0xF5]));
    }

    #[test]
    #[should_panic]
    fn and_rejects_length_mismatch() {
        BitVector::zeros(32).and(&BitVector::zeros(64));
    }

    #[test]
    fn zero_extended_extraction_outside_is_zero() {
        let v = BitVector::new(64, true);
        assert_eq!(v.extract_zero_extended(64, 32), BitVector::zeros(32));
        assert_eq!(v.extract_zero_extended(-64, 32), BitVector::zeros(32));
    }

    #[test]
    fn zero_extended_extraction_straddles_boundaries() {
        let v = BitVector::new(32, true);
        let low = v.extract_zero_extended(-16, 32);
        for i in 0..32 {
            assert_eq!(low.test_bit(i), i >= 16);
        }
        let high = v.extract_zero_extended(16, 32);
        for i in 0..32 {
            assert_eq!(high.test_bit(i), i < 16);
        }
    }

    #[test]
    fn wrapped_extraction_repeats_the_vector() {
        let v = from_bytes(&[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(v.extract_wrapped(32, 32), v);
        assert_eq!(v.extract_wrapped(-32, 32), v);
        let rotated = v.extract_wrapped(8, 32);
        assert_eq!(rotated, from_bytes(&[0x34, 0x56, 0x78, 0x12]));
    }

    #[test]
    fn wrapped_extraction_unaligned() {
        let v = from_bytes(&[0x01, 0x00, 0x00, 0x80]);
        let r = v.extract_wrapped(4, 32);
        // Bit 0 of the source lands at position -4, i.e. wraps to 28.
        assert!(r.test_bit(28));
        // Bit 31 of the source lands at position 27.
        assert!(r.test_bit(27));
    }

    #[test]
    fn shift_roundtrip_preserves_surviving_bits() {
        let v = from_bytes(&[0xDE, 0xAD, 0xBE, 0xEF, 0x12, 0x34, 0x56, 0x78]);
        for d in [1, 7, 8, 31, 32, 33] {
            let w = v.shift(d).shift(-d);
            for i in 0..(64 - d as usize) {
                assert_eq!(w.test_bit(i), v.test_bit(i), "bit {i} after shift {d}");
            }
            for i in (64 - d as usize)..64 {
                assert!(!w.test_bit(i), "bit {i} should be cleared after shift {d}");
            }
        }
    }

    #[test]
    fn builder_places_bytes() {
        let mut b = Builder::new(64);
        b.set_byte(0, 0xFF).set_byte(4, 0x0F).set_byte(7, 0x80);
        let v = b.build();
        for i in 0..8 {
            assert!(v.test_bit(i));
        }
        assert!(v.test_bit(32) && v.test_bit(35) && !v.test_bit(36));
        assert!(v.test_bit(63) && !v.test_bit(62));
    }

    #[test]
    #[should_panic]
    fn builder_rejects_out_of_range_byte_index() {
        Builder::new(32).set_byte(4, 0);
    }
}
