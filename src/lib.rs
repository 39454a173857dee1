//! Cycle-accurate Game Boy (DMG) emulation core.
//!
//! This crate contains the platform-agnostic emulator logic (CPU, timer,
//! display controller, cartridge mappers) wired together over a shared
//! address bus. Frontends consume the core through the [`gameboy`] facade:
//! they advance the machine with [`gameboy::GameBoy::run_until`], read the
//! finished frame from the display controller, and feed key events to the
//! joypad. No windowing, audio, or file-dialog code lives here.

/// Arithmetic/logic unit: pure operations returning a packed value+flags word.
pub mod alu;

/// Fixed-length immutable bit vectors used for scanline geometry.
pub mod bit_vector;

/// Bit-twiddling helpers shared by the ALU and the bit vectors.
pub mod bits;

/// Address bus and the component capability attached to it.
pub mod bus;

/// Cartridge loading and bank controllers (fixed ROM and switchable ROM+RAM).
pub mod cartridge;

/// LR35902 CPU core.
pub mod cpu;

/// High-level facade that wires every component into a single machine.
pub mod gameboy;

/// Joypad input register and its interrupt behavior.
pub mod joypad;

/// Display controller: mode state machine and scanline compositor.
pub mod lcd;

/// Two-bit-per-pixel line and image types produced by the display controller.
pub mod lcd_image;

/// RAM/ROM primitives and their bus-facing controllers.
pub mod memory;

/// Memory-map constants shared across components.
pub mod memory_map;

/// Generic register file indexed by closed register sets.
pub mod registers;

/// Divider/timer unit.
pub mod timer;
