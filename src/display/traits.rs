/*
 *  display/traits.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Core trait definitions for pixel sinks and matrix outputs
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

use crate::display::error::DisplayError;
use crate::display::framebuffer::{FrameGeometry, Framebuffer};

/// Anything that accepts RGB pixel writes in its own coordinate space.
///
/// Implemented by offscreen [`FrameCanvas`](crate::display::FrameCanvas)es, by the
/// [`RgbMatrix`](crate::display::RgbMatrix) itself (writes go to the active buffer)
/// and used as the downstream target of the panel
/// [`GridTransformer`](crate::display::GridTransformer).
pub trait PixelSink {
    /// Width in pixels
    fn width(&self) -> usize;

    /// Height in pixels
    fn height(&self) -> usize;

    /// Write one pixel. Out of range coordinates are ignored.
    fn set_pixel(&mut self, x: usize, y: usize, red: u8, green: u8, blue: u8);
}

impl<S: PixelSink + ?Sized> PixelSink for &mut S {
    fn width(&self) -> usize { (**self).width() }
    fn height(&self) -> usize { (**self).height() }
    fn set_pixel(&mut self, x: usize, y: usize, red: u8, green: u8, blue: u8) {
        (**self).set_pixel(x, y, red, green, blue)
    }
}

/// Physical output abstraction - every matrix output must implement this trait
///
/// The refresh thread owns the output for its whole lifetime and calls
/// [`emit`](MatrixOutput::emit) back to back, so implementations must push a full
/// frame without waiting on anything the application thread holds.
pub trait MatrixOutput: Send {
    /// Short human readable name for logging
    fn name(&self) -> &str;

    /// Acquire and configure the hardware for frames of the given geometry.
    ///
    /// Failure here is fatal: the caller aborts startup.
    fn init(&mut self, geometry: &FrameGeometry) -> Result<(), DisplayError>;

    /// Push the complete framebuffer to the panels once.
    fn emit(&mut self, frame: &Framebuffer) -> Result<(), DisplayError>;
}

/// Boxed output handed to the refresh engine
pub type BoxedOutput = Box<dyn MatrixOutput>;
