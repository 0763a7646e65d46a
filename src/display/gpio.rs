/*
 *  display/gpio.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Raspberry Pi GPIO register access via /dev/gpiomem and HUB75 pin mappings
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use clap::ValueEnum;
use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

use crate::display::error::DisplayError;

const GPIOMEM_PATH: &str = "/dev/gpiomem";
const GPIO_REGISTER_BLOCK: usize = 4096;

// word offsets into the GPIO register block (BCM2835 peripherals manual, 6.1)
const GPFSEL0: usize = 0x00 / 4;
const GPSET0: usize = 0x1C / 4;
const GPCLR0: usize = 0x28 / 4;

// only BCM 2..=27 are brought out on the 40 pin header
const VALID_BITS: u32 = 0x0FFF_FFFC;

const fn bit(pin: u32) -> u32 { 1 << pin }

/// Colour lines of one parallel chain: upper (1) and lower (2) sub-panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPins {
    pub r1: u32,
    pub g1: u32,
    pub b1: u32,
    pub r2: u32,
    pub g2: u32,
    pub b2: u32,
}

impl ChainPins {
    pub const fn upper(&self) -> u32 { self.r1 | self.g1 | self.b1 }
    pub const fn lower(&self) -> u32 { self.r2 | self.g2 | self.b2 }
    pub const fn all(&self) -> u32 { self.upper() | self.lower() }
}

/// GPIO bit masks for every HUB75 signal of a board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareMapping {
    pub name: &'static str,
    pub output_enable: u32,
    pub clock: u32,
    pub strobe: u32,
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
    pub e: u32,
    pub chains: [ChainPins; 3],
    pub max_parallel: usize,
}

const NO_CHAIN: ChainPins = ChainPins { r1: 0, g1: 0, b1: 0, r2: 0, g2: 0, b2: 0 };

/// Direct wiring as documented for passive adapter boards (three chains)
pub const REGULAR: HardwareMapping = HardwareMapping {
    name: "regular",
    output_enable: bit(18),
    clock: bit(17),
    strobe: bit(4),
    a: bit(22),
    b: bit(23),
    c: bit(24),
    d: bit(25),
    e: bit(15),
    chains: [
        ChainPins { r1: bit(11), g1: bit(27), b1: bit(7), r2: bit(8), g2: bit(9), b2: bit(10) },
        ChainPins { r1: bit(12), g1: bit(5), b1: bit(6), r2: bit(19), g2: bit(13), b2: bit(20) },
        ChainPins { r1: bit(14), g1: bit(2), b1: bit(3), r2: bit(26), g2: bit(16), b2: bit(21) },
    ],
    max_parallel: 3,
};

/// Adafruit RGB Matrix HAT / Bonnet (single chain)
pub const ADAFRUIT_HAT: HardwareMapping = HardwareMapping {
    name: "adafruit-hat",
    output_enable: bit(4),
    clock: bit(17),
    strobe: bit(21),
    a: bit(22),
    b: bit(26),
    c: bit(27),
    d: bit(20),
    e: bit(24),
    chains: [
        ChainPins { r1: bit(5), g1: bit(13), b1: bit(6), r2: bit(12), g2: bit(16), b2: bit(23) },
        NO_CHAIN,
        NO_CHAIN,
    ],
    max_parallel: 1,
};

/// Config-level selection of a [`HardwareMapping`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareMappingKind {
    #[default]
    Regular,
    AdafruitHat,
}

impl HardwareMappingKind {
    pub fn mapping(self) -> &'static HardwareMapping {
        match self {
            HardwareMappingKind::Regular => &REGULAR,
            HardwareMappingKind::AdafruitHat => &ADAFRUIT_HAT,
        }
    }
}

impl HardwareMapping {
    /// Row address lines
    pub const fn row_mask(&self) -> u32 {
        self.a | self.b | self.c | self.d | self.e
    }

    /// Colour lines of the first `parallel` chains
    pub fn color_mask(&self, parallel: usize) -> u32 {
        self.chains.iter().take(parallel).fold(0, |acc, c| acc | c.all())
    }

    /// Row address word for a double row index
    pub fn row_address(&self, double_row: usize) -> u32 {
        let mut address = 0;
        if double_row & 0x01 != 0 { address |= self.a; }
        if double_row & 0x02 != 0 { address |= self.b; }
        if double_row & 0x04 != 0 { address |= self.c; }
        if double_row & 0x08 != 0 { address |= self.d; }
        if double_row & 0x10 != 0 { address |= self.e; }
        address
    }

    /// Every line the output has to drive for the given geometry
    pub fn output_bits(&self, double_rows: usize, parallel: usize) -> u32 {
        let mut bits = self.output_enable | self.clock | self.strobe | self.color_mask(parallel);
        // only claim the address lines the panels actually use
        let mut line = 1usize;
        for mask in [self.a, self.b, self.c, self.d, self.e] {
            if line < double_rows.max(2) {
                bits |= mask;
            }
            line <<= 1;
        }
        bits
    }
}

/// Memory mapped GPIO register block
pub struct Gpio {
    mmap: MmapMut,
    output_bits: u32,
}

impl Gpio {
    /// Map `/dev/gpiomem`. Requires membership of the `gpio` group (or root).
    pub fn open() -> Result<Self, DisplayError> {
        Self::open_path(Path::new(GPIOMEM_PATH))
    }

    pub fn open_path(path: &Path) -> Result<Self, DisplayError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DisplayError::InitializationFailed(format!(
                "cannot open {} ({}); are you on a Raspberry Pi and in the gpio group?",
                path.display(), e
            )))?;

        // Safety: the register block is a fixed device window; nothing else in
        // this process maps it.
        let mmap = unsafe { MmapOptions::new().len(GPIO_REGISTER_BLOCK).map_mut(&file) }
            .map_err(|e| DisplayError::InitializationFailed(format!(
                "cannot map GPIO registers from {}: {}", path.display(), e
            )))?;

        info!("mapped GPIO registers from {}", path.display());
        Ok(Self { mmap, output_bits: 0 })
    }

    #[inline]
    fn reg(&mut self, word: usize) -> *mut u32 {
        debug_assert!(word * 4 < GPIO_REGISTER_BLOCK);
        // Safety: `word` is a register offset inside the mapped block.
        unsafe { (self.mmap.as_mut_ptr() as *mut u32).add(word) }
    }

    /// Switch every pin in `outputs` to output mode. Returns the bits actually claimed.
    pub fn init_outputs(&mut self, outputs: u32) -> u32 {
        let outputs = outputs & VALID_BITS;
        for pin in 0..32u32 {
            if outputs & bit(pin) == 0 {
                continue;
            }
            let fsel = self.reg(GPFSEL0 + (pin / 10) as usize);
            let shift = (pin % 10) * 3;
            // Safety: fsel points at a live GPFSEL register.
            unsafe {
                let mut value = std::ptr::read_volatile(fsel);
                value &= !(0b111 << shift);
                value |= 0b001 << shift;
                std::ptr::write_volatile(fsel, value);
            }
        }
        self.output_bits |= outputs;
        debug!("GPIO outputs configured: {:#010x}", self.output_bits);
        outputs
    }

    #[inline]
    pub fn set_bits(&mut self, value: u32) {
        if value == 0 { return; }
        let reg = self.reg(GPSET0);
        // Safety: GPSET0 is write-only, bits written as 1 are driven high.
        unsafe { std::ptr::write_volatile(reg, value) }
    }

    #[inline]
    pub fn clear_bits(&mut self, value: u32) {
        if value == 0 { return; }
        let reg = self.reg(GPCLR0);
        // Safety: GPCLR0 is write-only, bits written as 1 are driven low.
        unsafe { std::ptr::write_volatile(reg, value) }
    }

    /// Write the bits of `value` selected by `mask`, leave the rest untouched.
    #[inline]
    pub fn write_masked_bits(&mut self, value: u32, mask: u32) {
        self.clear_bits(!value & mask);
        self.set_bits(value & mask);
    }

    pub fn output_bits(&self) -> u32 { self.output_bits }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_address_bits() {
        let m = &REGULAR;
        assert_eq!(m.row_address(0), 0);
        assert_eq!(m.row_address(1), m.a);
        assert_eq!(m.row_address(0b10101), m.a | m.c | m.e);
    }

    #[test]
    fn test_output_bits_only_claim_needed_address_lines() {
        // 32 row panels scan 16 double rows: A..D
        let bits = REGULAR.output_bits(16, 1);
        assert_ne!(bits & REGULAR.d, 0);
        assert_eq!(bits & REGULAR.e, 0);
        // 64 row panels need E as well
        assert_ne!(REGULAR.output_bits(32, 1) & REGULAR.e, 0);
    }

    #[test]
    fn test_color_mask_per_parallel() {
        let one = REGULAR.color_mask(1);
        let three = REGULAR.color_mask(3);
        assert_eq!(one, REGULAR.chains[0].all());
        assert_eq!(three & one, one);
        assert_eq!(three.count_ones(), 18);
        assert_eq!(ADAFRUIT_HAT.color_mask(3), ADAFRUIT_HAT.color_mask(1));
    }

    #[test]
    fn test_mappings_stay_on_header_pins() {
        for m in [&REGULAR, &ADAFRUIT_HAT] {
            let all = m.output_bits(32, m.max_parallel);
            assert_eq!(all & !VALID_BITS, 0, "{} uses a pin off the header", m.name);
        }
    }

    #[test]
    fn test_missing_gpiomem_is_init_failure() {
        let err = Gpio::open_path(Path::new("/nonexistent/gpiomem")).err().unwrap();
        assert!(matches!(err, DisplayError::InitializationFailed(_)));
    }
}
