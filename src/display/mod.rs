/*
 *  display/mod.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display subsystem - panel mapping, bit-plane framebuffers and refresh
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

// Core trait definitions
pub mod traits;
pub mod error;
pub mod framebuffer;

// Panel layout
pub mod transformer;

// GPIO access and outputs
pub mod gpio;
pub mod drivers;

// Refresh engine
pub mod matrix;
pub mod thread;

// Display mode controller
pub mod mode_controller;

// Re-exports for convenience
pub use traits::{BoxedOutput, MatrixOutput, PixelSink};
pub use error::DisplayError;
pub use framebuffer::{FrameCanvas, FrameGeometry, FrameParams, Framebuffer, ScanMode};
pub use transformer::{GridCanvas, GridTransformer, Panel, TopologyError};
pub use gpio::{HardwareMapping, HardwareMappingKind};
pub use matrix::{MatrixOptions, RgbMatrix};
pub use mode_controller::{DisplayMode, DisplayModeController, ModeControllerConfig};
