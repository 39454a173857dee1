//! Two-bit-per-pixel scanlines and frames.
//!
//! A [`LcdImageLine`] stores one bit plane for the high color bit, one for
//! the low bit, and one opacity plane used when composing layers. Lines are
//! immutable; every operation returns a new line. An [`LcdImage`] is just a
//! stack of equally sized lines.

use crate::bit_vector::{self, BitVector};
use crate::bits;

/// A horizontal line of 2-bit pixels with per-pixel opacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LcdImageLine {
    msb: BitVector,
    lsb: BitVector,
    opacity: BitVector,
}

// The palette that maps every color to itself.
const IDENTITY_PALETTE: u8 = 0b1110_0100;

impl LcdImageLine {
    /// Builds a line from its three planes, which must have equal sizes.
    pub fn new(msb: BitVector, lsb: BitVector, opacity: BitVector) -> Self {
        assert!(
            msb.size() == lsb.size() && lsb.size() == opacity.size(),
            "plane sizes differ"
        );
        Self { msb, lsb, opacity }
    }

    /// A fully transparent line of color-0 pixels.
    pub fn of_size(size: usize) -> Self {
        Self {
            msb: BitVector::zeros(size),
            lsb: BitVector::zeros(size),
            opacity: BitVector::zeros(size),
        }
    }

    /// Length in pixels.
    pub fn size(&self) -> usize {
        self.msb.size()
    }

    pub fn msb(&self) -> &BitVector {
        &self.msb
    }

    pub fn lsb(&self) -> &BitVector {
        &self.lsb
    }

    pub fn opacity(&self) -> &BitVector {
        &self.opacity
    }

    /// Shifts all three planes, left for positive distances.
    pub fn shift(&self, distance: i32) -> Self {
        Self {
            msb: self.msb.shift(distance),
            lsb: self.lsb.shift(distance),
            opacity: self.opacity.shift(distance),
        }
    }

    /// Extracts `size` pixels starting at `start`, wrapping around.
    pub fn extract_wrapped(&self, start: i32, size: usize) -> Self {
        Self {
            msb: self.msb.extract_wrapped(start, size),
            lsb: self.lsb.extract_wrapped(start, size),
            opacity: self.opacity.extract_wrapped(start, size),
        }
    }

    /// Remaps colors through a palette byte: the new value of color `c`
    /// sits in bits `2c..2c+2`. Opacity is unchanged.
    pub fn map_colors(&self, palette: u8) -> Self {
        if palette == IDENTITY_PALETTE {
            return self.clone();
        }

        let mut msb = BitVector::zeros(self.size());
        let mut lsb = BitVector::zeros(self.size());
        for color in 0..4u32 {
            let high = if bits::test(color, 1) {
                self.msb.clone()
            } else {
                self.msb.not()
            };
            let low = if bits::test(color, 0) {
                self.lsb.clone()
            } else {
                self.lsb.not()
            };
            let this_color = high.and(&low);
            let mapped = bits::extract(u32::from(palette), 2 * color, 2);
            if bits::test(mapped, 1) {
                msb = msb.or(&this_color);
            }
            if bits::test(mapped, 0) {
                lsb = lsb.or(&this_color);
            }
        }
        Self {
            msb,
            lsb,
            opacity: self.opacity.clone(),
        }
    }

    /// Composes `that` above this line, using `that`'s own opacity.
    pub fn below(&self, that: &Self) -> Self {
        self.below_with_opacity(that, &that.opacity)
    }

    /// Composes `that` above this line, deciding per pixel with `opacity`.
    /// The result is opaque where either input or the mask is.
    pub fn below_with_opacity(&self, that: &Self, opacity: &BitVector) -> Self {
        assert_eq!(self.size(), that.size(), "line sizes differ");
        let pick = |above: &BitVector, below: &BitVector| {
            opacity.and(above).or(&opacity.not().and(below))
        };
        Self {
            msb: pick(&that.msb, &self.msb),
            lsb: pick(&that.lsb, &self.lsb),
            opacity: self.opacity.or(opacity),
        }
    }

    /// Keeps the first `n` pixels of this line and takes the rest from
    /// `that`.
    pub fn join(&self, that: &Self, n: usize) -> Self {
        assert_eq!(self.size(), that.size(), "line sizes differ");
        assert!(n <= self.size(), "join point out of range: {n}");
        let low = BitVector::new(self.size(), true).shift(n as i32 - self.size() as i32);
        let mix =
            |a: &BitVector, b: &BitVector| low.and(a).or(&low.not().and(b));
        Self {
            msb: mix(&self.msb, &that.msb),
            lsb: mix(&self.lsb, &that.lsb),
            opacity: mix(&self.opacity, &that.opacity),
        }
    }
}

/// Accumulates byte pairs into a line whose opacity marks non-zero colors.
pub struct LineBuilder {
    msb: bit_vector::Builder,
    lsb: bit_vector::Builder,
}

impl LineBuilder {
    pub fn new(size: usize) -> Self {
        Self {
            msb: bit_vector::Builder::new(size),
            lsb: bit_vector::Builder::new(size),
        }
    }

    /// Sets the 8 pixels of byte `index` from their two plane bytes.
    pub fn set_bytes(&mut self, index: usize, msb: u8, lsb: u8) -> &mut Self {
        self.msb.set_byte(index, msb);
        self.lsb.set_byte(index, lsb);
        self
    }

    /// Builds the line; pixels of color 0 are transparent, all others
    /// opaque.
    pub fn build(self) -> LcdImageLine {
        let msb = self.msb.build();
        let lsb = self.lsb.build();
        let opacity = msb.or(&lsb);
        LcdImageLine { msb, lsb, opacity }
    }
}

/// A complete frame: equally sized lines stacked top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LcdImage {
    width: usize,
    height: usize,
    lines: Vec<LcdImageLine>,
}

impl LcdImage {
    pub fn new(width: usize, height: usize, lines: Vec<LcdImageLine>) -> Self {
        assert!(width > 0 && height > 0);
        assert_eq!(lines.len(), height, "line count differs from height");
        assert!(
            lines.iter().all(|l| l.size() == width),
            "line width differs from image width"
        );
        Self {
            width,
            height,
            lines,
        }
    }

    /// An all color-0 image.
    pub fn zeros(width: usize, height: usize) -> Self {
        Self::new(width, height, vec![LcdImageLine::of_size(width); height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Color (0..4) of the pixel at (`x`, `y`).
    pub fn get(&self, x: usize, y: usize) -> u8 {
        let line = &self.lines[y];
        u8::from(line.msb.test_bit(x)) << 1 | u8::from(line.lsb.test_bit(x))
    }
}

/// Collects lines into an image, top to bottom.
pub struct ImageBuilder {
    width: usize,
    lines: Vec<LcdImageLine>,
}

impl ImageBuilder {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            lines: vec![LcdImageLine::of_size(width); height],
        }
    }

    pub fn set_line(&mut self, index: usize, line: LcdImageLine) -> &mut Self {
        assert_eq!(line.size(), self.width, "line width differs");
        self.lines[index] = line;
        self
    }

    pub fn build(self) -> LcdImage {
        let height = self.lines.len();
        LcdImage::new(self.width, height, self.lines)
    }
}
