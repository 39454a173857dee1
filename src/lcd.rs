//! Display controller: register file, mode state machine, OAM DMA and the
//! scanline compositor.
//!
//! Each visible line goes through sprite search (mode 2), pixel transfer
//! (mode 3) and horizontal blank (mode 0); the line's pixels are computed
//! in one go when mode 3 begins. Ten lines of vertical blank (mode 1)
//! follow line 143, at which point the finished frame is published and a
//! fresh one begins.

use log::trace;

use crate::bits;
use crate::bus::{Bus, Clocked, Component};
use crate::cpu::{Interrupt, IrqLine};
use crate::lcd_image::{ImageBuilder, LcdImage, LcdImageLine, LineBuilder};
use crate::memory::Ram;
use crate::memory_map::{
    OAM_END, OAM_SIZE, OAM_START, REGS_LCD_END, REGS_LCD_START, VIDEO_RAM_END, VIDEO_RAM_SIZE,
    VIDEO_RAM_START,
};
use crate::registers::{Bit, Register, RegisterFile};

pub const LCD_WIDTH: usize = 160;
pub const LCD_HEIGHT: usize = 144;

// The background and window maps describe a 256x256 plane.
const PLANE_SIZE: usize = 256;

const TILES_PER_MAP_LINE: usize = 32;
const TILE_BYTES: usize = 16;

const SPRITE_BYTES: usize = 4;
const SPRITE_COUNT: usize = 40;
const SPRITES_PER_LINE: usize = 10;

const VISIBLE_LINES: u8 = 144;
const TOTAL_LINES: u8 = 154;

// M-cycles spent in each mode, indexed by mode number. Mode 1 is per line.
const MODE_CYCLES: [u64; 4] = [51, 114, 20, 43];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LcdReg {
    Lcdc,
    Stat,
    Scy,
    Scx,
    Ly,
    Lyc,
    Dma,
    Bgp,
    Obp0,
    Obp1,
    Wy,
    Wx,
}

impl Register for LcdReg {
    const COUNT: usize = 12;

    fn index(self) -> usize {
        self as usize
    }
}

const REG_ORDER: [LcdReg; 12] = [
    LcdReg::Lcdc,
    LcdReg::Stat,
    LcdReg::Scy,
    LcdReg::Scx,
    LcdReg::Ly,
    LcdReg::Lyc,
    LcdReg::Dma,
    LcdReg::Bgp,
    LcdReg::Obp0,
    LcdReg::Obp1,
    LcdReg::Wy,
    LcdReg::Wx,
];

#[derive(Clone, Copy)]
enum Lcdc {
    Bg = 0,
    Obj = 1,
    ObjSize = 2,
    BgArea = 3,
    TileSource = 4,
    Win = 5,
    WinArea = 6,
    LcdStatus = 7,
}

impl Bit for Lcdc {
    fn index(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Copy)]
enum Stat {
    Mode0 = 0,
    Mode1 = 1,
    LycEqLy = 2,
    IntMode0 = 3,
    IntMode1 = 4,
    IntMode2 = 5,
    IntLyc = 6,
}

impl Bit for Stat {
    fn index(self) -> u32 {
        self as u32
    }
}

// Sprite attribute bits (OAM byte 3).
const SPRITE_PALETTE: u32 = 4;
const SPRITE_FLIP_H: u32 = 5;
const SPRITE_FLIP_V: u32 = 6;
const SPRITE_BEHIND_BG: u32 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    HBlank = 0,
    VBlank = 1,
    SpriteSearch = 2,
    Transfer = 3,
}

#[derive(Clone, Copy)]
struct DmaTransfer {
    source: u16,
    index: u16,
}

pub struct LcdController {
    bus: Bus,
    irq: IrqLine,
    regs: RegisterFile<LcdReg>,
    video_ram: Ram,
    oam: Ram,
    frame: LcdImage,
    builder: ImageBuilder,
    win_y: u8,
    dma: Option<DmaTransfer>,
    next_non_idle_cycle: u64,
}

impl LcdController {
    pub fn new(bus: Bus, irq: IrqLine) -> Self {
        Self {
            bus,
            irq,
            regs: RegisterFile::new(),
            video_ram: Ram::new(VIDEO_RAM_SIZE),
            oam: Ram::new(OAM_SIZE),
            frame: LcdImage::zeros(LCD_WIDTH, LCD_HEIGHT),
            builder: ImageBuilder::new(LCD_WIDTH, LCD_HEIGHT),
            win_y: 0,
            dma: None,
            next_non_idle_cycle: u64::MAX,
        }
    }

    /// The most recently completed frame.
    pub fn frame(&self) -> &LcdImage {
        &self.frame
    }

    fn screen_on(&self) -> bool {
        self.regs.test(LcdReg::Lcdc, Lcdc::LcdStatus)
    }

    fn mode(&self) -> Mode {
        match bits::clip(2, u32::from(self.regs.get(LcdReg::Stat))) {
            0 => Mode::HBlank,
            1 => Mode::VBlank,
            2 => Mode::SpriteSearch,
            _ => Mode::Transfer,
        }
    }

    fn set_stat_mode(&mut self, mode: Mode) {
        let m = mode as u32;
        self.regs.set_bit(LcdReg::Stat, Stat::Mode0, bits::test(m, 0));
        self.regs.set_bit(LcdReg::Stat, Stat::Mode1, bits::test(m, 1));
    }

    // Switches mode, performing the mode's entry actions and scheduling
    // its end.
    fn enter_mode(&mut self, mode: Mode) {
        self.set_stat_mode(mode);
        match mode {
            Mode::HBlank => {
                if self.regs.test(LcdReg::Stat, Stat::IntMode0) {
                    self.irq.request(Interrupt::LcdStat);
                }
            }
            Mode::SpriteSearch => {
                if self.regs.test(LcdReg::Stat, Stat::IntMode2) {
                    self.irq.request(Interrupt::LcdStat);
                }
            }
            Mode::Transfer => {
                let line = self.regs.get(LcdReg::Ly);
                let pixels = self.compute_line(line);
                self.builder.set_line(usize::from(line), pixels);
            }
            Mode::VBlank => {
                self.irq.request(Interrupt::VBlank);
                if self.regs.test(LcdReg::Stat, Stat::IntMode1) {
                    self.irq.request(Interrupt::LcdStat);
                }
                let finished = std::mem::replace(
                    &mut self.builder,
                    ImageBuilder::new(LCD_WIDTH, LCD_HEIGHT),
                );
                self.frame = finished.build();
                trace!("frame completed");
            }
        }
        self.next_non_idle_cycle += MODE_CYCLES[mode as usize];
    }

    fn really_cycle(&mut self) {
        match self.mode() {
            Mode::SpriteSearch => self.enter_mode(Mode::Transfer),
            Mode::Transfer => self.enter_mode(Mode::HBlank),
            Mode::HBlank => {
                let line = self.regs.get(LcdReg::Ly) + 1;
                self.set_ly(line);
                if line == VISIBLE_LINES {
                    self.enter_mode(Mode::VBlank);
                } else {
                    self.enter_mode(Mode::SpriteSearch);
                }
            }
            Mode::VBlank => {
                let line = self.regs.get(LcdReg::Ly) + 1;
                if line == TOTAL_LINES {
                    self.set_ly(0);
                    self.win_y = 0;
                    self.enter_mode(Mode::SpriteSearch);
                } else {
                    self.set_ly(line);
                    self.next_non_idle_cycle += MODE_CYCLES[Mode::VBlank as usize];
                }
            }
        }
    }

    fn set_ly(&mut self, value: u8) {
        self.regs.set(LcdReg::Ly, value);
        self.check_lyc();
    }

    fn check_lyc(&mut self) {
        let equal = self.regs.get(LcdReg::Ly) == self.regs.get(LcdReg::Lyc);
        let was_equal = self.regs.test(LcdReg::Stat, Stat::LycEqLy);
        self.regs.set_bit(LcdReg::Stat, Stat::LycEqLy, equal);
        if equal && !was_equal && self.regs.test(LcdReg::Stat, Stat::IntLyc) {
            self.irq.request(Interrupt::LcdStat);
        }
    }

    fn dma_cycle(&mut self) {
        let Some(DmaTransfer { source, index }) = self.dma else {
            return;
        };
        let byte = self.dma_read(source + index);
        self.oam.write(usize::from(index), byte);
        let index = index + 1;
        self.dma = if index < OAM_SIZE as u16 {
            Some(DmaTransfer { source, index })
        } else {
            None
        };
    }

    // Reads a DMA source byte. Sources in this controller's own memories
    // are read directly, as a bus access would loop back here.
    fn dma_read(&self, address: u16) -> u8 {
        match address {
            VIDEO_RAM_START..VIDEO_RAM_END => {
                self.video_ram.read(usize::from(address - VIDEO_RAM_START))
            }
            OAM_START..OAM_END => self.oam.read(usize::from(address - OAM_START)),
            _ => self.bus.read(address),
        }
    }

    // Scanline composition

    fn compute_line(&mut self, line: u8) -> LcdImageLine {
        let adjusted_wx = (i32::from(self.regs.get(LcdReg::Wx)) - 7).max(0) as usize;
        let bg_palette = self.regs.get(LcdReg::Bgp);

        let mut pixels = if self.regs.test(LcdReg::Lcdc, Lcdc::Bg) {
            let plane_line = line.wrapping_add(self.regs.get(LcdReg::Scy));
            self.plane_line(plane_line, Lcdc::BgArea)
                .extract_wrapped(i32::from(self.regs.get(LcdReg::Scx)), LCD_WIDTH)
                .map_colors(bg_palette)
        } else {
            LcdImageLine::of_size(LCD_WIDTH)
        };

        if self.window_active(line, adjusted_wx) {
            let window = self
                .plane_line(self.win_y, Lcdc::WinArea)
                .extract_wrapped(0, LCD_WIDTH)
                .shift(adjusted_wx as i32)
                .map_colors(bg_palette);
            self.win_y += 1;
            pixels = pixels.join(&window, adjusted_wx);
        }

        if self.regs.test(LcdReg::Lcdc, Lcdc::Obj) {
            let (behind, in_front) = self.sprite_lines(line);
            // Background pixels win over behind-background sprites where
            // the background is opaque or the sprite is transparent.
            let fusion = pixels.opacity().or(&behind.opacity().not());
            pixels = behind
                .below_with_opacity(&pixels, &fusion)
                .below(&in_front);
        }
        pixels
    }

    fn window_active(&self, line: u8, adjusted_wx: usize) -> bool {
        self.regs.test(LcdReg::Lcdc, Lcdc::Win)
            && adjusted_wx < LCD_WIDTH
            && self.regs.get(LcdReg::Wy) <= line
    }

    // One full 256-pixel line of the background or window plane.
    fn plane_line(&self, plane_line: u8, area: Lcdc) -> LcdImageLine {
        let map_start: usize = if self.regs.test(LcdReg::Lcdc, area) {
            0x1C00
        } else {
            0x1800
        };
        let tile_row = usize::from(plane_line) / 8;
        let row_in_tile = usize::from(plane_line) % 8;

        let mut builder = LineBuilder::new(PLANE_SIZE);
        for tile_x in 0..TILES_PER_MAP_LINE {
            let tile_index = self
                .video_ram
                .read(map_start + tile_row * TILES_PER_MAP_LINE + tile_x);
            let tile_address = self.tile_address(tile_index) + 2 * row_in_tile;
            let lsb = bits::reverse8(self.video_ram.read(tile_address));
            let msb = bits::reverse8(self.video_ram.read(tile_address + 1));
            builder.set_bytes(tile_x, msb, lsb);
        }
        builder.build()
    }

    // Address of a tile's first byte, relative to video RAM. Tiles 0x80
    // and up always come from the low bank; tiles below it come from the
    // high bank unless LCDC selects the low one for everything.
    fn tile_address(&self, tile_index: u8) -> usize {
        if self.regs.test(LcdReg::Lcdc, Lcdc::TileSource) || tile_index >= 0x80 {
            usize::from(tile_index) * TILE_BYTES
        } else {
            0x1000 + usize::from(tile_index) * TILE_BYTES
        }
    }

    // The two sprite layers for a line, front sprites composed over back
    // ones within each layer.
    fn sprite_lines(&self, line: u8) -> (LcdImageLine, LcdImageLine) {
        let height = if self.regs.test(LcdReg::Lcdc, Lcdc::ObjSize) {
            16
        } else {
            8
        };

        // Drawing priority is smallest x first, then smallest OAM index,
        // which is exactly the order of the packed (x, index) keys.
        let mut selected = Vec::new();
        for index in 0..SPRITE_COUNT {
            let y = i32::from(self.oam.read(SPRITE_BYTES * index)) - 16;
            let row = i32::from(line) - y;
            if (0..height).contains(&row) {
                let x = self.oam.read(SPRITE_BYTES * index + 1);
                selected.push(bits::make16(x, index as u8));
            }
        }
        selected.sort_unstable();
        selected.truncate(SPRITES_PER_LINE);

        let mut behind = LcdImageLine::of_size(LCD_WIDTH);
        let mut in_front = LcdImageLine::of_size(LCD_WIDTH);
        for &key in &selected {
            let index = usize::from(bits::low8(key));
            let attributes = self.oam.read(SPRITE_BYTES * index + 3);
            let sprite = self.sprite_line(index, line, height);
            if bits::test(u32::from(attributes), SPRITE_BEHIND_BG) {
                behind = sprite.below(&behind);
            } else {
                in_front = sprite.below(&in_front);
            }
        }
        (behind, in_front)
    }

    fn sprite_line(&self, index: usize, line: u8, height: i32) -> LcdImageLine {
        let y = i32::from(self.oam.read(SPRITE_BYTES * index)) - 16;
        let x = i32::from(self.oam.read(SPRITE_BYTES * index + 1)) - 8;
        let tile = self.oam.read(SPRITE_BYTES * index + 2);
        let attributes = u32::from(self.oam.read(SPRITE_BYTES * index + 3));

        let mut row = i32::from(line) - y;
        if bits::test(attributes, SPRITE_FLIP_V) {
            row = height - 1 - row;
        }
        let address = usize::from(tile) * TILE_BYTES + 2 * row as usize;
        let mut lsb = self.video_ram.read(address);
        let mut msb = self.video_ram.read(address + 1);
        if !bits::test(attributes, SPRITE_FLIP_H) {
            lsb = bits::reverse8(lsb);
            msb = bits::reverse8(msb);
        }

        let palette = if bits::test(attributes, SPRITE_PALETTE) {
            self.regs.get(LcdReg::Obp1)
        } else {
            self.regs.get(LcdReg::Obp0)
        };
        let mut builder = LineBuilder::new(LCD_WIDTH);
        builder.set_bytes(0, msb, lsb);
        builder.build().shift(x).map_colors(palette)
    }

    // Register writes with side effects

    fn write_reg(&mut self, reg: LcdReg, data: u8) {
        match reg {
            LcdReg::Lcdc => {
                self.regs.set(LcdReg::Lcdc, data);
                if !self.screen_on() {
                    self.set_stat_mode(Mode::HBlank);
                    self.set_ly(0);
                    self.next_non_idle_cycle = u64::MAX;
                }
            }
            LcdReg::Stat => {
                // The mode and LYC-comparison bits are read-only.
                let value = data & 0xF8 | self.regs.get(LcdReg::Stat) & 0x07;
                self.regs.set(LcdReg::Stat, value);
            }
            LcdReg::Ly => {}
            LcdReg::Lyc => {
                self.regs.set(LcdReg::Lyc, data);
                self.check_lyc();
            }
            LcdReg::Dma => {
                self.regs.set(LcdReg::Dma, data);
                self.dma = Some(DmaTransfer {
                    source: u16::from(data) << 8,
                    index: 0,
                });
            }
            _ => self.regs.set(reg, data),
        }
    }
}

impl Clocked for LcdController {
    fn cycle(&mut self, cycle: u64) {
        self.dma_cycle();
        if self.next_non_idle_cycle == u64::MAX && self.screen_on() {
            // The screen was just turned on; line 0 starts now.
            self.next_non_idle_cycle = cycle;
            self.enter_mode(Mode::SpriteSearch);
            return;
        }
        if cycle != self.next_non_idle_cycle {
            return;
        }
        self.really_cycle();
    }
}

impl Component for LcdController {
    fn read(&mut self, address: u16) -> Option<u8> {
        match address {
            VIDEO_RAM_START..VIDEO_RAM_END => {
                Some(self.video_ram.read(usize::from(address - VIDEO_RAM_START)))
            }
            OAM_START..OAM_END => Some(self.oam.read(usize::from(address - OAM_START))),
            REGS_LCD_START..REGS_LCD_END => {
                Some(self.regs.get(REG_ORDER[usize::from(address - REGS_LCD_START)]))
            }
            _ => None,
        }
    }

    fn write(&mut self, address: u16, data: u8) {
        match address {
            VIDEO_RAM_START..VIDEO_RAM_END => {
                self.video_ram
                    .write(usize::from(address - VIDEO_RAM_START), data);
            }
            OAM_START..OAM_END => self.oam.write(usize::from(address - OAM_START), data),
            REGS_LCD_START..REGS_LCD_END => {
                self.write_reg(REG_ORDER[usize::from(address - REGS_LCD_START)], data);
            }
            _ => {}
        }
    }
}
