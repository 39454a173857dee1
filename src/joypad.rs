//! Joypad register (P1) and key matrix.
//!
//! The eight keys form a 2x4 matrix. The program selects rows through P1
//! bits 4 and 5 and reads the selected keys' states in bits 0..4. The
//! register is active-low on the bus; internally everything is kept
//! active-high and complemented at the boundary.

use crate::bus::Component;
use crate::cpu::{Interrupt, IrqLine};
use crate::memory_map::REG_P1;

/// The physical keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Key {
    // (row, column) in the key matrix.
    fn position(self) -> (usize, u32) {
        let index = self as u32;
        (usize::from(index >= 4), index % 4)
    }
}

pub struct Joypad {
    irq: IrqLine,
    row_selection: u8,
    rows: [u8; 2],
}

impl Joypad {
    pub fn new(irq: IrqLine) -> Self {
        Self {
            irq,
            row_selection: 0,
            rows: [0; 2],
        }
    }

    /// Records a key press; requests the joypad interrupt if this makes a
    /// selected column go active.
    pub fn key_pressed(&mut self, key: Key) {
        self.update_key(key, true);
    }

    /// Records a key release.
    pub fn key_released(&mut self, key: Key) {
        self.update_key(key, false);
    }

    fn update_key(&mut self, key: Key, pressed: bool) {
        let before = self.active_columns();
        let (row, column) = key.position();
        if pressed {
            self.rows[row] |= 1 << column;
        } else {
            self.rows[row] &= !(1 << column);
        }
        self.maybe_request_interrupt(before);
    }

    // Pressed keys of the selected rows, active-high.
    fn active_columns(&self) -> u8 {
        let mut columns = 0;
        for (row, &keys) in self.rows.iter().enumerate() {
            if self.row_selection & 1 << row != 0 {
                columns |= keys;
            }
        }
        columns
    }

    fn maybe_request_interrupt(&self, before: u8) {
        if self.active_columns() & !before != 0 {
            self.irq.request(Interrupt::Joypad);
        }
    }
}

impl Component for Joypad {
    fn read(&mut self, address: u16) -> Option<u8> {
        (address == REG_P1).then(|| !(self.row_selection << 4 | self.active_columns()))
    }

    fn write(&mut self, address: u16, data: u8) {
        if address == REG_P1 {
            let before = self.active_columns();
            self.row_selection = !data >> 4 & 0b11;
            self.maybe_request_interrupt(before);
        }
    }
}
