/*
 *  display/framebuffer.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Hardware oriented bit-plane framebuffer and frame canvases
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
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::display::error::DisplayError;
use crate::display::gpio::HardwareMapping;
use crate::display::traits::PixelSink;

/// Number of bit planes stored per double row. Colours are expanded to this depth.
pub const BIT_PLANES: u8 = 11;

// HUB75 address lines A..E reach 32 double rows (64 row panels)
const MAX_DOUBLE_ROWS: usize = 32;

/// Order in which double rows are scanned out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Progressive,
    Interlaced,
}

/// Physical layout of one framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Rows of a single panel
    pub rows: usize,
    /// Columns along one chain (panel columns x chain length)
    pub columns: usize,
    /// Number of parallel chains
    pub parallel: usize,
    /// Bit planes actually emitted (1..=11)
    pub pwm_bits: u8,
    pub scan_mode: ScanMode,
    pub mapping: &'static HardwareMapping,
}

impl FrameGeometry {
    pub fn double_rows(&self) -> usize { self.rows / 2 }

    /// Addressable width in pixels
    pub fn width(&self) -> usize { self.columns }

    /// Addressable height in pixels (all parallel chains stacked)
    pub fn height(&self) -> usize { self.rows * self.parallel }

    /// Lowest bit plane that is emitted for the configured pwm depth
    pub fn min_bit_plane(&self) -> u8 { BIT_PLANES - self.pwm_bits }

    pub fn validate(&self) -> Result<(), DisplayError> {
        if self.rows < 2 || self.rows % 2 != 0 || self.double_rows() > MAX_DOUBLE_ROWS {
            return Err(DisplayError::InvalidConfiguration(format!(
                "panel rows must be even and at most {} (got {})", MAX_DOUBLE_ROWS * 2, self.rows
            )));
        }
        if self.columns == 0 {
            return Err(DisplayError::InvalidConfiguration("chain has no columns".into()));
        }
        if self.parallel == 0 || self.parallel > self.mapping.max_parallel {
            return Err(DisplayError::InvalidConfiguration(format!(
                "hardware mapping '{}' supports 1..={} parallel chains (got {})",
                self.mapping.name, self.mapping.max_parallel, self.parallel
            )));
        }
        if self.pwm_bits == 0 || self.pwm_bits > BIT_PLANES {
            return Err(DisplayError::InvalidConfiguration(format!(
                "pwm_bits must be 1..={} (got {})", BIT_PLANES, self.pwm_bits
            )));
        }
        Ok(())
    }
}

/// Parameters shared by every canvas a matrix creates.
///
/// Held behind an `Arc` so a brightness change is seen by all live buffers at once,
/// including the ones currently owned by the application.
#[derive(Debug)]
pub struct FrameParams {
    brightness: AtomicU8,
    luminance_correct: AtomicBool,
}

impl FrameParams {
    pub fn new(brightness: u8, luminance_correct: bool) -> Arc<Self> {
        Arc::new(Self {
            brightness: AtomicU8::new(brightness.clamp(1, 100)),
            luminance_correct: AtomicBool::new(luminance_correct),
        })
    }

    /// Brightness in percent (1..=100)
    pub fn brightness(&self) -> u8 { self.brightness.load(Ordering::Relaxed) }

    pub fn set_brightness(&self, percent: u8) {
        self.brightness.store(percent.clamp(1, 100), Ordering::Relaxed);
    }

    pub fn luminance_correct(&self) -> bool { self.luminance_correct.load(Ordering::Relaxed) }

    /// Expand an 8 bit channel to a BIT_PLANES deep pwm value
    #[inline]
    pub fn map_color(&self, c: u8) -> u16 {
        let brightness = self.brightness();
        if self.luminance_correct() {
            cie1931_table()[brightness as usize][c as usize]
        } else {
            (((c as u32 * brightness as u32) / 100) << (BIT_PLANES - 8)) as u16
        }
    }
}

// CIE1931 lightness -> pwm duty, indexed [brightness][channel]
fn cie1931_table() -> &'static [[u16; 256]; 101] {
    static TABLE: OnceLock<Box<[[u16; 256]; 101]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Box::new([[0u16; 256]; 101]);
        let out_factor = ((1u32 << BIT_PLANES) - 1) as f32;
        for (brightness, row) in table.iter_mut().enumerate() {
            for (c, slot) in row.iter_mut().enumerate() {
                let v = c as f32 * brightness as f32 / 255.0;
                let lum = if v <= 8.0 { v / 902.3 } else { ((v + 16.0) / 116.0).powi(3) };
                *slot = (out_factor * lum).round() as u16;
            }
        }
        table
    })
}

/// Bit-plane framebuffer in the layout the HUB75 shift registers consume.
///
/// One GPIO word per (double row, bit plane, column); each word carries the
/// upper and lower sub-panel colour bits of every parallel chain.
pub struct Framebuffer {
    geometry: FrameGeometry,
    bitplanes: Vec<u32>,
    params: Arc<FrameParams>,
}

impl Framebuffer {
    pub fn new(geometry: FrameGeometry, params: Arc<FrameParams>) -> Self {
        let len = geometry.double_rows() * BIT_PLANES as usize * geometry.columns;
        Self { geometry, bitplanes: vec![0; len], params }
    }

    pub fn geometry(&self) -> &FrameGeometry { &self.geometry }
    pub fn width(&self) -> usize { self.geometry.width() }
    pub fn height(&self) -> usize { self.geometry.height() }
    pub fn params(&self) -> &Arc<FrameParams> { &self.params }

    #[inline]
    fn index(&self, double_row: usize, plane: u8, column: usize) -> usize {
        (double_row * BIT_PLANES as usize + plane as usize) * self.geometry.columns + column
    }

    /// GPIO words of one bit plane of one double row, one per column
    pub fn plane(&self, double_row: usize, plane: u8) -> &[u32] {
        let start = self.index(double_row, plane, 0);
        &self.bitplanes[start..start + self.geometry.columns]
    }

    // colour line masks for a pixel row: (r, g, b) bits of the right chain/half
    #[inline]
    fn color_bits(&self, y: usize) -> (usize, u32, u32, u32) {
        let rows = self.geometry.rows;
        let double_rows = self.geometry.double_rows();
        let pins = &self.geometry.mapping.chains[y / rows];
        let y_in_panel = y % rows;
        if y_in_panel < double_rows {
            (y_in_panel, pins.r1, pins.g1, pins.b1)
        } else {
            (y_in_panel - double_rows, pins.r2, pins.g2, pins.b2)
        }
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, red: u8, green: u8, blue: u8) {
        if x >= self.width() || y >= self.height() {
            return;
        }
        let red = self.params.map_color(red);
        let green = self.params.map_color(green);
        let blue = self.params.map_color(blue);

        let (double_row, r_bit, g_bit, b_bit) = self.color_bits(y);
        let keep = !(r_bit | g_bit | b_bit);
        for plane in self.geometry.min_bit_plane()..BIT_PLANES {
            let m = 1u16 << plane;
            let idx = self.index(double_row, plane, x);
            let mut word = self.bitplanes[idx] & keep;
            if red & m != 0 { word |= r_bit; }
            if green & m != 0 { word |= g_bit; }
            if blue & m != 0 { word |= b_bit; }
            self.bitplanes[idx] = word;
        }
    }

    /// Decode the pwm levels stored for one pixel
    pub fn pixel_levels(&self, x: usize, y: usize) -> Option<[u16; 3]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let (double_row, r_bit, g_bit, b_bit) = self.color_bits(y);
        let mut levels = [0u16; 3];
        for plane in self.geometry.min_bit_plane()..BIT_PLANES {
            let word = self.bitplanes[self.index(double_row, plane, x)];
            if word & r_bit != 0 { levels[0] |= 1 << plane; }
            if word & g_bit != 0 { levels[1] |= 1 << plane; }
            if word & b_bit != 0 { levels[2] |= 1 << plane; }
        }
        Some(levels)
    }

    pub fn clear(&mut self) {
        self.bitplanes.fill(0);
    }

    pub fn fill(&mut self, red: u8, green: u8, blue: u8) {
        if red == 0 && green == 0 && blue == 0 {
            self.clear();
            return;
        }
        for y in 0..self.height() {
            for x in 0..self.width() {
                self.set_pixel(x, y, red, green, blue);
            }
        }
    }

    /// True when no colour bit is set anywhere
    pub fn is_blank(&self) -> bool {
        self.bitplanes.iter().all(|&w| w == 0)
    }

    /// Copy every plane of `other`, which must have the same layout
    pub fn copy_from(&mut self, other: &Framebuffer) -> Result<(), DisplayError> {
        let (a, b) = (&self.geometry, &other.geometry);
        let same = a.rows == b.rows
            && a.columns == b.columns
            && a.parallel == b.parallel
            && a.pwm_bits == b.pwm_bits;
        if !same {
            return Err(DisplayError::BufferSizeMismatch {
                expected: self.width() * self.height(),
                actual: other.width() * other.height(),
            });
        }
        self.bitplanes.copy_from_slice(&other.bitplanes);
        Ok(())
    }
}

impl Clone for Framebuffer {
    fn clone(&self) -> Self {
        Self {
            geometry: self.geometry,
            bitplanes: self.bitplanes.clone(),
            params: Arc::clone(&self.params),
        }
    }
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("pwm_bits", &self.geometry.pwm_bits)
            .field("blank", &self.is_blank())
            .finish()
    }
}

/// A framebuffer handed out by the matrix, identified for the swap protocol.
#[derive(Debug)]
pub struct FrameCanvas {
    id: usize,
    frame: Framebuffer,
}

impl FrameCanvas {
    pub(crate) fn new(id: usize, frame: Framebuffer) -> Self {
        Self { id, frame }
    }

    /// Creation index, unique per matrix
    pub fn id(&self) -> usize { self.id }

    pub fn framebuffer(&self) -> &Framebuffer { &self.frame }
    pub fn framebuffer_mut(&mut self) -> &mut Framebuffer { &mut self.frame }

    pub fn brightness(&self) -> u8 { self.frame.params().brightness() }

    pub fn clear(&mut self) { self.frame.clear(); }

    pub fn fill(&mut self, red: u8, green: u8, blue: u8) { self.frame.fill(red, green, blue); }
}

impl PixelSink for FrameCanvas {
    fn width(&self) -> usize { self.frame.width() }
    fn height(&self) -> usize { self.frame.height() }
    fn set_pixel(&mut self, x: usize, y: usize, red: u8, green: u8, blue: u8) {
        self.frame.set_pixel(x, y, red, green, blue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::gpio::REGULAR;

    fn geometry(parallel: usize, pwm_bits: u8) -> FrameGeometry {
        FrameGeometry {
            rows: 32,
            columns: 64,
            parallel,
            pwm_bits,
            scan_mode: ScanMode::Progressive,
            mapping: &REGULAR,
        }
    }

    fn linear(brightness: u8) -> Arc<FrameParams> {
        FrameParams::new(brightness, false)
    }

    #[test]
    fn test_geometry_dimensions() {
        let g = geometry(2, 11);
        assert_eq!(g.width(), 64);
        assert_eq!(g.height(), 64);
        assert_eq!(g.double_rows(), 16);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_geometry_rejects_bad_values() {
        let mut g = geometry(1, 11);
        g.pwm_bits = 12;
        assert!(g.validate().is_err());
        let mut g = geometry(4, 11);
        assert!(g.validate().is_err());
        g.parallel = 1;
        g.rows = 31;
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_upper_and_lower_half_use_different_lines() {
        let mut fb = Framebuffer::new(geometry(1, 11), linear(100));
        fb.set_pixel(3, 2, 255, 0, 0);
        fb.set_pixel(3, 18, 0, 0, 255);

        // rows 2 and 18 share double row 2
        let top = fb.plane(2, BIT_PLANES - 1)[3];
        assert_eq!(top, REGULAR.chains[0].r1 | REGULAR.chains[0].b2);
        assert_eq!(fb.pixel_levels(3, 2), Some([2040, 0, 0]));
        assert_eq!(fb.pixel_levels(3, 18), Some([0, 0, 2040]));
    }

    #[test]
    fn test_overwrite_keeps_other_half() {
        let mut fb = Framebuffer::new(geometry(1, 11), linear(100));
        fb.set_pixel(0, 0, 255, 255, 255);
        fb.set_pixel(0, 16, 255, 255, 255);
        fb.set_pixel(0, 0, 0, 0, 0);
        assert_eq!(fb.pixel_levels(0, 0), Some([0, 0, 0]));
        assert_eq!(fb.pixel_levels(0, 16), Some([2040, 2040, 2040]));
    }

    #[test]
    fn test_parallel_chain_bits() {
        let mut fb = Framebuffer::new(geometry(2, 11), linear(100));
        fb.set_pixel(5, 32, 0, 255, 0);
        let word = fb.plane(0, BIT_PLANES - 1)[5];
        assert_eq!(word, REGULAR.chains[1].g1);
        assert_eq!(fb.pixel_levels(5, 0), Some([0, 0, 0]));
    }

    #[test]
    fn test_brightness_scales_linear_levels() {
        let params = linear(50);
        let mut fb = Framebuffer::new(geometry(1, 11), Arc::clone(&params));
        fb.set_pixel(0, 0, 200, 0, 0);
        assert_eq!(fb.pixel_levels(0, 0), Some([800, 0, 0]));

        // shared params: later writes see the new brightness
        params.set_brightness(100);
        fb.set_pixel(1, 0, 200, 0, 0);
        assert_eq!(fb.pixel_levels(1, 0), Some([1600, 0, 0]));
    }

    #[test]
    fn test_luminance_correction_endpoints() {
        let params = FrameParams::new(100, true);
        assert_eq!(params.map_color(0), 0);
        assert_eq!(params.map_color(255), 2047);
        // perceptual curve stays below linear in the midtones
        assert!(params.map_color(128) < 128 << 3);
    }

    #[test]
    fn test_brightness_is_clamped() {
        let params = linear(0);
        assert_eq!(params.brightness(), 1);
        params.set_brightness(250);
        assert_eq!(params.brightness(), 100);
    }

    #[test]
    fn test_reduced_pwm_bits_drop_low_planes() {
        let mut fb = Framebuffer::new(geometry(1, 4), linear(100));
        // 0x07 << 3 = 56: every set bit lies below plane 7
        fb.set_pixel(0, 0, 0x07, 0, 0);
        assert_eq!(fb.pixel_levels(0, 0), Some([0, 0, 0]));
        assert!(fb.is_blank());
    }

    #[test]
    fn test_fill_and_clear() {
        let mut fb = Framebuffer::new(geometry(1, 11), linear(100));
        fb.fill(10, 20, 30);
        assert!(!fb.is_blank());
        assert_eq!(fb.pixel_levels(63, 31), Some([80, 160, 240]));
        fb.clear();
        assert!(fb.is_blank());
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut fb = Framebuffer::new(geometry(1, 11), linear(100));
        fb.set_pixel(64, 0, 255, 255, 255);
        fb.set_pixel(0, 32, 255, 255, 255);
        assert!(fb.is_blank());
        assert_eq!(fb.pixel_levels(64, 0), None);
    }

    #[test]
    fn test_copy_from_size_mismatch() {
        let mut a = Framebuffer::new(geometry(1, 11), linear(100));
        let b = Framebuffer::new(geometry(2, 11), linear(100));
        // same plane storage, different panel stacking
        assert!(matches!(a.copy_from(&b), Err(DisplayError::BufferSizeMismatch { expected: 2048, actual: 4096 })));

        let c = Framebuffer::new(geometry(1, 7), linear(100));
        assert!(matches!(a.copy_from(&c), Err(DisplayError::BufferSizeMismatch { .. })));

        let mut d = Framebuffer::new(geometry(1, 11), linear(100));
        d.set_pixel(5, 5, 255, 0, 0);
        a.copy_from(&d).unwrap();
        assert_eq!(a.pixel_levels(5, 5), Some([2040, 0, 0]));
    }
}
