/*
 *  display/transformer.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Panel topology mapper: logical surface to chained, parallel and rotated panels
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

use embedded_graphics::{
    pixelcolor::{Rgb888, RgbColor},
    prelude::{DrawTarget, OriginDimensions, Pixel, Size},
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use thiserror::Error;

use crate::display::traits::PixelSink;

/// Highest parallel chain index a panel may sit on
pub const MAX_PARALLEL_INDEX: usize = 2;

/// One physical panel in the logical grid, listed row-major
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Panel {
    /// Position along its chain, 0 being the panel nearest the controller
    pub order: usize,
    /// Clockwise rotation in degrees
    #[serde(default)]
    pub rotate: u16,
    /// Parallel chain the panel is wired to
    #[serde(default)]
    pub parallel: usize,
}

fn shape(square: &bool) -> &'static str {
    if *square { "square" } else { "non-square" }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("display and panel dimensions must be non-zero")]
    ZeroSize,

    #[error("display {width}x{height} is not a multiple of the {panel_width}x{panel_height} panel size")]
    NotMultiple { width: usize, height: usize, panel_width: usize, panel_height: usize },

    #[error("a {cols}x{rows} panel grid needs {expected} panels, {found} configured")]
    PanelCount { cols: usize, rows: usize, expected: usize, found: usize },

    #[error("panel at row {row}, column {col}: rotation {rotate} is not allowed for a {} panel", shape(.square))]
    IllegalRotation { row: usize, col: usize, rotate: u16, square: bool },

    #[error("panel at row {row}, column {col}: parallel {parallel} outside 0..={max}", max = MAX_PARALLEL_INDEX)]
    ParallelOutOfRange { row: usize, col: usize, parallel: usize },

    #[error("panel at row {row}, column {col}: order {order} outside a chain of {chain_length}")]
    OrderOutOfRange { row: usize, col: usize, order: usize, chain_length: usize },

    #[error("panel at row {row}, column {col}: order {order} already used on parallel chain {parallel}")]
    DuplicateOrder { row: usize, col: usize, order: usize, parallel: usize },
}

/// Maps a logical `width x height` surface onto the physical chain layout.
///
/// Writes are filtered through a per-frame dirty map: the first write to a
/// pixel wins unless forced, and [`reset_screen`](Self::reset_screen) blanks
/// every pixel nobody touched.
#[derive(Debug)]
pub struct GridTransformer {
    width: usize,
    height: usize,
    panel_width: usize,
    panel_height: usize,
    chain_length: usize,
    cols: usize,
    panels: Vec<Panel>,
    dirty: Vec<bool>,
    cutoff_enabled: bool,
    cutoff: u8,
    max_brightness: u8,
}

impl GridTransformer {
    pub fn new(
        width: usize,
        height: usize,
        panel_width: usize,
        panel_height: usize,
        chain_length: usize,
        panels: Vec<Panel>,
    ) -> Result<Self, TopologyError> {
        if width == 0 || height == 0 || panel_width == 0 || panel_height == 0 || chain_length == 0 {
            return Err(TopologyError::ZeroSize);
        }
        if width % panel_width != 0 || height % panel_height != 0 {
            return Err(TopologyError::NotMultiple { width, height, panel_width, panel_height });
        }

        let cols = width / panel_width;
        let rows = height / panel_height;
        if panels.len() != cols * rows {
            return Err(TopologyError::PanelCount {
                cols, rows, expected: cols * rows, found: panels.len(),
            });
        }

        let square = panel_width == panel_height;
        let mut used = [Vec::new(), Vec::new(), Vec::new()];
        for (i, panel) in panels.iter().enumerate() {
            let (row, col) = (i / cols, i % cols);
            let legal = match panel.rotate {
                0 | 180 => true,
                90 | 270 => square,
                _ => false,
            };
            if !legal {
                return Err(TopologyError::IllegalRotation { row, col, rotate: panel.rotate, square });
            }
            if panel.parallel > MAX_PARALLEL_INDEX {
                return Err(TopologyError::ParallelOutOfRange { row, col, parallel: panel.parallel });
            }
            if panel.order >= chain_length {
                return Err(TopologyError::OrderOutOfRange { row, col, order: panel.order, chain_length });
            }
            let line: &mut Vec<usize> = &mut used[panel.parallel];
            if line.contains(&panel.order) {
                return Err(TopologyError::DuplicateOrder {
                    row, col, order: panel.order, parallel: panel.parallel,
                });
            }
            line.push(panel.order);
        }

        debug!(
            "panel grid {}x{} of {}x{} panels, chain length {}",
            cols, rows, panel_width, panel_height, chain_length
        );

        Ok(Self {
            width,
            height,
            panel_width,
            panel_height,
            chain_length,
            cols,
            panels,
            dirty: vec![false; width * height],
            cutoff_enabled: false,
            cutoff: 0,
            max_brightness: 100,
        })
    }

    pub fn width(&self) -> usize { self.width }
    pub fn height(&self) -> usize { self.height }
    pub fn panels(&self) -> &[Panel] { &self.panels }
    pub fn chain_length(&self) -> usize { self.chain_length }

    /// Number of parallel chains referenced by the panel list
    pub fn parallel_count(&self) -> usize {
        self.panels.iter().map(|p| p.parallel + 1).max().unwrap_or(1)
    }

    /// Size of the physical surface the sink must provide
    pub fn physical_size(&self) -> (usize, usize) {
        (self.panel_width * self.chain_length, self.panel_height * self.parallel_count())
    }

    pub fn enable_cutoff(&mut self, enabled: bool) { self.cutoff_enabled = enabled; }
    pub fn set_cutoff(&mut self, cutoff: u8) { self.cutoff = cutoff; }
    pub fn cutoff(&self) -> Option<u8> { self.cutoff_enabled.then_some(self.cutoff) }

    /// Recorded for reporting only; colour scaling is the matrix brightness.
    pub fn set_max_brightness(&mut self, percent: u8) { self.max_brightness = percent.min(100); }
    pub fn max_brightness(&self) -> u8 { self.max_brightness }

    pub fn is_dirty(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.dirty[y * self.width + x]
    }

    /// Forget every write of the current frame without touching the sink
    pub fn clear_dirty(&mut self) { self.dirty.fill(false); }

    /// Physical sink coordinate for a logical pixel
    pub fn map(&self, x: usize, y: usize) -> (usize, usize) {
        let (pw, ph) = (self.panel_width, self.panel_height);
        let panel = &self.panels[(y / ph) * self.cols + x / pw];
        let (lx, ly) = (x % pw, y % ph);
        let (px, py) = match panel.rotate {
            90 => (ph - 1 - ly, lx),
            180 => (pw - 1 - lx, ph - 1 - ly),
            270 => (ly, pw - 1 - lx),
            _ => (lx, ly),
        };
        let x_offset = (self.chain_length - 1 - panel.order) * pw;
        let y_offset = panel.parallel * ph;
        (x_offset + px, y_offset + py)
    }

    /// Route one logical pixel write to `sink`.
    ///
    /// Dropped when below the cutoff, or when the pixel was already written
    /// this frame and `force` is not set.
    pub fn set_pixel<S: PixelSink + ?Sized>(
        &mut self,
        sink: &mut S,
        x: usize,
        y: usize,
        red: u8,
        green: u8,
        blue: u8,
        force: bool,
    ) {
        debug_assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{}", self.width, self.height
        );
        if x >= self.width || y >= self.height {
            return;
        }
        if self.cutoff_enabled && red < self.cutoff && green < self.cutoff && blue < self.cutoff {
            return;
        }
        let idx = y * self.width + x;
        if self.dirty[idx] && !force {
            return;
        }
        self.dirty[idx] = true;

        let (px, py) = self.map(x, y);
        sink.set_pixel(px, py, red, green, blue);
    }

    /// Blank every pixel not written this frame, then start a new frame
    pub fn reset_screen<S: PixelSink + ?Sized>(&mut self, sink: &mut S) {
        for y in 0..self.height {
            for x in 0..self.width {
                if !self.dirty[y * self.width + x] {
                    let (px, py) = self.map(x, y);
                    sink.set_pixel(px, py, 0, 0, 0);
                }
            }
        }
        self.clear_dirty();
    }

    /// Bind the mapper to a sink for the duration of one frame
    pub fn attach<'a, S: PixelSink + ?Sized>(&'a mut self, sink: &'a mut S) -> GridCanvas<'a, S> {
        let (pw, ph) = self.physical_size();
        debug_assert!(
            sink.width() >= pw && sink.height() >= ph,
            "sink {}x{} smaller than panel layout {}x{}", sink.width(), sink.height(), pw, ph
        );
        GridCanvas { transformer: self, sink }
    }
}

/// A [`GridTransformer`] bound to a sink, drawing in logical coordinates
pub struct GridCanvas<'a, S: PixelSink + ?Sized> {
    transformer: &'a mut GridTransformer,
    sink: &'a mut S,
}

impl<'a, S: PixelSink + ?Sized> GridCanvas<'a, S> {
    pub fn width(&self) -> usize { self.transformer.width }
    pub fn height(&self) -> usize { self.transformer.height }

    pub fn set_pixel(&mut self, x: usize, y: usize, red: u8, green: u8, blue: u8, force: bool) {
        self.transformer.set_pixel(self.sink, x, y, red, green, blue, force);
    }

    /// Signed variant that silently clips, for effects drawn partly off screen
    pub fn plot(&mut self, x: i32, y: i32, red: u8, green: u8, blue: u8, force: bool) {
        if x < 0 || y < 0 || x as usize >= self.width() || y as usize >= self.height() {
            return;
        }
        self.set_pixel(x as usize, y as usize, red, green, blue, force);
    }

    pub fn reset_screen(&mut self) {
        self.transformer.reset_screen(self.sink);
    }

    /// Effects that fade to black switch the cutoff off while they draw
    pub fn enable_cutoff(&mut self, enabled: bool) {
        self.transformer.enable_cutoff(enabled);
    }

    pub fn transformer(&self) -> &GridTransformer { self.transformer }
}

impl<S: PixelSink + ?Sized> OriginDimensions for GridCanvas<'_, S> {
    fn size(&self) -> Size {
        Size::new(self.width() as u32, self.height() as u32)
    }
}

impl<S: PixelSink + ?Sized> DrawTarget for GridCanvas<'_, S> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.plot(point.x, point.y, color.r(), color.g(), color.b(), true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::{
        mono_font::{ascii::FONT_5X8, MonoTextStyle},
        prelude::*,
        text::Text,
    };

    struct Grid {
        width: usize,
        height: usize,
        pixels: Vec<[u8; 3]>,
        writes: usize,
    }

    impl Grid {
        fn new(width: usize, height: usize) -> Self {
            Self { width, height, pixels: vec![[0; 3]; width * height], writes: 0 }
        }
        fn get(&self, x: usize, y: usize) -> [u8; 3] { self.pixels[y * self.width + x] }
    }

    impl PixelSink for Grid {
        fn width(&self) -> usize { self.width }
        fn height(&self) -> usize { self.height }
        fn set_pixel(&mut self, x: usize, y: usize, red: u8, green: u8, blue: u8) {
            self.writes += 1;
            self.pixels[y * self.width + x] = [red, green, blue];
        }
    }

    fn panel(order: usize, rotate: u16, parallel: usize) -> Panel {
        Panel { order, rotate, parallel }
    }

    #[test]
    fn test_panel_count_must_match_grid() {
        let err = GridTransformer::new(64, 32, 32, 32, 2, vec![panel(0, 0, 0)]).unwrap_err();
        assert_eq!(err, TopologyError::PanelCount { cols: 2, rows: 1, expected: 2, found: 1 });
    }

    #[test]
    fn test_dimensions_must_be_multiples() {
        let err = GridTransformer::new(70, 32, 32, 32, 2, vec![]).unwrap_err();
        assert!(matches!(err, TopologyError::NotMultiple { width: 70, .. }));
    }

    #[test]
    fn test_rotation_legality() {
        // 64x32 panels may only flip
        let err = GridTransformer::new(64, 32, 64, 32, 1, vec![panel(0, 90, 0)]).unwrap_err();
        assert_eq!(err, TopologyError::IllegalRotation { row: 0, col: 0, rotate: 90, square: false });
        assert!(err.to_string().contains("non-square"));
        assert!(GridTransformer::new(64, 32, 64, 32, 1, vec![panel(0, 180, 0)]).is_ok());

        // square panels take any quarter turn but nothing else
        assert!(GridTransformer::new(32, 32, 32, 32, 1, vec![panel(0, 270, 0)]).is_ok());
        let err = GridTransformer::new(32, 32, 32, 32, 1, vec![panel(0, 45, 0)]).unwrap_err();
        assert!(matches!(err, TopologyError::IllegalRotation { square: true, .. }));
    }

    #[test]
    fn test_order_and_parallel_validation() {
        let err = GridTransformer::new(64, 32, 32, 32, 2, vec![panel(0, 0, 0), panel(2, 0, 0)])
            .unwrap_err();
        assert!(matches!(err, TopologyError::OrderOutOfRange { col: 1, order: 2, .. }));

        let err = GridTransformer::new(64, 32, 32, 32, 2, vec![panel(1, 0, 0), panel(1, 0, 0)])
            .unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateOrder { order: 1, parallel: 0, .. }));

        // same order on different chains is fine
        assert!(GridTransformer::new(32, 64, 32, 32, 1, vec![panel(0, 0, 0), panel(0, 0, 1)]).is_ok());

        let err = GridTransformer::new(32, 32, 32, 32, 1, vec![panel(0, 0, 3)]).unwrap_err();
        assert!(matches!(err, TopologyError::ParallelOutOfRange { parallel: 3, .. }));
    }

    #[test]
    fn test_chain_order_offsets() {
        // panel 0 in the chain is the rightmost block of the physical row
        let t = GridTransformer::new(64, 32, 32, 32, 2, vec![panel(0, 0, 0), panel(1, 0, 0)]).unwrap();
        assert_eq!(t.map(0, 0), (32, 0));
        assert_eq!(t.map(32, 5), (0, 5));
        assert_eq!(t.physical_size(), (64, 32));
    }

    #[test]
    fn test_rotation_mapping() {
        let t90 = GridTransformer::new(32, 32, 32, 32, 1, vec![panel(0, 90, 0)]).unwrap();
        assert_eq!(t90.map(0, 0), (31, 0));
        assert_eq!(t90.map(3, 7), (24, 3));

        let t180 = GridTransformer::new(32, 32, 32, 32, 1, vec![panel(0, 180, 0)]).unwrap();
        assert_eq!(t180.map(3, 7), (28, 24));

        let t270 = GridTransformer::new(32, 32, 32, 32, 1, vec![panel(0, 270, 0)]).unwrap();
        assert_eq!(t270.map(3, 7), (7, 28));
    }

    #[test]
    fn test_mapping_is_a_bijection() {
        let panels = vec![panel(1, 90, 0), panel(0, 180, 0), panel(0, 270, 1), panel(1, 0, 1)];
        let t = GridTransformer::new(32, 32, 16, 16, 2, panels).unwrap();
        let mut seen = vec![false; 32 * 32];
        for y in 0..32 {
            for x in 0..32 {
                let (px, py) = t.map(x, y);
                assert!(px < 32 && py < 32);
                assert!(!seen[py * 32 + px], "({x}, {y}) collides");
                seen[py * 32 + px] = true;
            }
        }
    }

    #[test]
    fn test_parallel_offset() {
        let t = GridTransformer::new(32, 64, 32, 32, 1, vec![panel(0, 0, 0), panel(0, 0, 1)]).unwrap();
        assert_eq!(t.map(4, 40), (4, 40));
        assert_eq!(t.parallel_count(), 2);
    }

    #[test]
    fn test_first_writer_wins_unless_forced() {
        let mut t = GridTransformer::new(8, 8, 8, 8, 1, vec![panel(0, 0, 0)]).unwrap();
        let mut sink = Grid::new(8, 8);
        t.set_pixel(&mut sink, 1, 1, 10, 0, 0, false);
        t.set_pixel(&mut sink, 1, 1, 0, 20, 0, false);
        assert_eq!(sink.get(1, 1), [10, 0, 0]);
        t.set_pixel(&mut sink, 1, 1, 0, 0, 30, true);
        assert_eq!(sink.get(1, 1), [0, 0, 30]);
        assert_eq!(sink.writes, 2);
    }

    #[test]
    fn test_cutoff_suppresses_dim_pixels() {
        let mut t = GridTransformer::new(8, 8, 8, 8, 1, vec![panel(0, 0, 0)]).unwrap();
        t.enable_cutoff(true);
        t.set_cutoff(16);
        let mut sink = Grid::new(8, 8);

        t.set_pixel(&mut sink, 2, 2, 15, 15, 15, false);
        assert_eq!(sink.writes, 0);
        assert!(!t.is_dirty(2, 2));

        // one bright channel is enough to pass
        t.set_pixel(&mut sink, 2, 2, 15, 16, 0, false);
        assert_eq!(sink.get(2, 2), [15, 16, 0]);
    }

    #[test]
    fn test_reset_screen_blanks_untouched_pixels() {
        let mut t = GridTransformer::new(4, 4, 4, 4, 1, vec![panel(0, 0, 0)]).unwrap();
        t.enable_cutoff(true);
        t.set_cutoff(50);
        let mut sink = Grid::new(4, 4);
        for p in sink.pixels.iter_mut() {
            *p = [99, 99, 99];
        }
        t.set_pixel(&mut sink, 0, 0, 200, 200, 200, false);
        t.reset_screen(&mut sink);

        // the drawn pixel plus each of the 15 untouched ones, once
        assert_eq!(sink.writes, 1 + 15);
        assert_eq!(sink.get(0, 0), [200, 200, 200]);
        assert_eq!(sink.get(3, 3), [0, 0, 0]);
        assert!(!t.is_dirty(0, 0));

        // next frame starts clean
        t.set_pixel(&mut sink, 0, 0, 100, 0, 0, false);
        assert_eq!(sink.get(0, 0), [100, 0, 0]);
    }

    #[test]
    fn test_canvas_draws_text() {
        let mut t = GridTransformer::new(32, 16, 32, 16, 1, vec![panel(0, 0, 0)]).unwrap();
        let mut sink = Grid::new(32, 16);
        {
            let mut canvas = t.attach(&mut sink);
            let style = MonoTextStyle::new(&FONT_5X8, Rgb888::WHITE);
            Text::new("P0", Point::new(1, 7), style).draw(&mut canvas).unwrap();
            canvas.plot(-1, 40, 255, 0, 0, false);
        }
        assert!(sink.pixels.iter().any(|p| *p == [255, 255, 255]));
        assert!(!sink.pixels.iter().any(|p| *p == [255, 0, 0]));
    }
}
