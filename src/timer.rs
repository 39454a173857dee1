//! Divider and programmable timer (DIV, TIMA, TMA, TAC).
//!
//! A single 16-bit counter advances by 4 every M-cycle; DIV is its high
//! byte. TIMA increments on every falling edge of one counter bit selected
//! by TAC, which is why writing DIV or TAC can itself cause an increment.

use crate::bits;
use crate::bus::{Clocked, Component};
use crate::cpu::{Interrupt, IrqLine};
use crate::memory_map::{REG_DIV, REG_TAC, REG_TIMA, REG_TMA};

// Counter bit watched for falling edges, indexed by TAC's clock-select
// field. The corresponding TIMA periods are 256, 4, 16 and 64 M-cycles.
const EDGE_BITS: [u32; 4] = [9, 3, 5, 7];

pub struct Timer {
    irq: IrqLine,
    counter: u16,
    tima: u8,
    tma: u8,
    tac: u8,
}

impl Timer {
    pub fn new(irq: IrqLine) -> Self {
        Self {
            irq,
            counter: 0,
            tima: 0,
            tma: 0,
            tac: 0,
        }
    }

    // The level whose falling edge increments TIMA.
    fn state(&self) -> bool {
        let bit = EDGE_BITS[usize::from(self.tac) & 0b11];
        bits::test(u32::from(self.tac), 2) && bits::test(u32::from(self.counter), bit)
    }

    fn inc_if_change(&mut self, previous_state: bool) {
        if previous_state && !self.state() {
            if self.tima == 0xFF {
                self.irq.request(Interrupt::Timer);
                self.tima = self.tma;
            } else {
                self.tima += 1;
            }
        }
    }
}

impl Clocked for Timer {
    fn cycle(&mut self, _cycle: u64) {
        let s0 = self.state();
        self.counter = self.counter.wrapping_add(4);
        self.inc_if_change(s0);
    }
}

impl Component for Timer {
    fn read(&mut self, address: u16) -> Option<u8> {
        match address {
            REG_DIV => Some(bits::high8(self.counter)),
            REG_TIMA => Some(self.tima),
            REG_TMA => Some(self.tma),
            REG_TAC => Some(self.tac | 0xF8),
            _ => None,
        }
    }

    fn write(&mut self, address: u16, data: u8) {
        match address {
            REG_DIV => {
                let s0 = self.state();
                self.counter = 0;
                self.inc_if_change(s0);
            }
            REG_TIMA => self.tima = data,
            REG_TMA => self.tma = data,
            REG_TAC => {
                let s0 = self.state();
                self.tac = data;
                self.inc_if_change(s0);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(timer: &mut Timer, cycles: u64) {
        for c in 0..cycles {
            timer.cycle(c);
        }
    }

    #[test]
    fn div_increments_every_64_cycles() {
        let mut timer = Timer::new(IrqLine::new());
        run(&mut timer, 63);
        assert_eq!(timer.read(REG_DIV), Some(0));
        run(&mut timer, 1);
        assert_eq!(timer.read(REG_DIV), Some(1));
        run(&mut timer, 64);
        assert_eq!(timer.read(REG_DIV), Some(2));
    }

    #[test]
    fn tima_follows_the_fastest_clock() {
        let mut timer = Timer::new(IrqLine::new());
        timer.write(REG_TAC, 0b101);
        run(&mut timer, 4);
        assert_eq!(timer.read(REG_TIMA), Some(1));
        run(&mut timer, 4 * 9);
        assert_eq!(timer.read(REG_TIMA), Some(10));
    }

    #[test]
    fn tima_is_stopped_without_the_enable_bit() {
        let mut timer = Timer::new(IrqLine::new());
        timer.write(REG_TAC, 0b001);
        run(&mut timer, 1000);
        assert_eq!(timer.read(REG_TIMA), Some(0));
    }

    #[test]
    fn overflow_reloads_tma_and_requests_the_interrupt() {
        let irq = IrqLine::new();
        let mut timer = Timer::new(irq.clone());
        timer.write(REG_TMA, 0xAB);
        timer.write(REG_TIMA, 0xFF);
        timer.write(REG_TAC, 0b101);
        run(&mut timer, 4);
        assert_eq!(timer.read(REG_TIMA), Some(0xAB));
        assert_eq!(irq.interrupt_flags(), 1 << Interrupt::Timer as u8);
    }

    #[test]
    fn div_write_resets_the_counter() {
        let mut timer = Timer::new(IrqLine::new());
        run(&mut timer, 100);
        timer.write(REG_DIV, 0x77);
        assert_eq!(timer.read(REG_DIV), Some(0));
    }

    #[test]
    fn div_write_on_a_high_edge_ticks_tima() {
        let mut timer = Timer::new(IrqLine::new());
        timer.write(REG_TAC, 0b101);
        // Two cycles put the counter at 8, where the watched bit is high;
        // zeroing it is a falling edge.
        run(&mut timer, 2);
        timer.write(REG_DIV, 0);
        assert_eq!(timer.read(REG_TIMA), Some(1));
    }

    #[test]
    fn disabling_the_timer_on_a_high_edge_ticks_tima() {
        let mut timer = Timer::new(IrqLine::new());
        timer.write(REG_TAC, 0b101);
        run(&mut timer, 2);
        timer.write(REG_TAC, 0b001);
        assert_eq!(timer.read(REG_TIMA), Some(1));
    }

    #[test]
    fn tac_reads_back_with_unused_bits_set() {
        let mut timer = Timer::new(IrqLine::new());
        timer.write(REG_TAC, 0b101);
        assert_eq!(timer.read(REG_TAC), Some(0xF8 | 0b101));
    }
}
