/*
 *  display/drivers/mock.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Mock matrix output for testing and dry runs without hardware
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

use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::display::error::DisplayError;
use crate::display::framebuffer::{FrameGeometry, Framebuffer};
use crate::display::traits::MatrixOutput;

/// Mock matrix output
///
/// Simulates the panels without touching GPIO. Useful for:
/// - Unit and integration tests
/// - `--no-hardware` dry runs on a desktop
///
/// Every emitted frame is recorded in a shared [`MockOutputState`] that tests
/// keep a handle to after the output has been moved into the refresh thread.
#[derive(Debug, Clone, Default)]
pub struct MockOutput {
    state: Arc<Mutex<MockOutputState>>,
}

/// Shared, inspectable state of a [`MockOutput`]
#[derive(Debug, Default)]
pub struct MockOutputState {
    /// Number of times init() was called
    pub init_count: usize,

    /// Number of frames emitted
    pub emit_count: u64,

    /// Geometry passed to init()
    pub geometry: Option<FrameGeometry>,

    /// Copy of the most recently emitted frame
    pub last_frame: Option<Framebuffer>,

    /// Keep a copy of every emitted frame in `last_frame`
    pub capture_frames: bool,

    /// Time each emit takes, stands in for the panel scan
    pub emit_delay: Option<Duration>,

    /// Simulate failures (for error testing)
    pub simulate_init_failure: bool,
    pub simulate_emit_failure: bool,
}

impl MockOutputState {
    /// Decoded pwm levels of one pixel of the last emitted frame
    pub fn last_pixel(&self, x: usize, y: usize) -> Option<[u16; 3]> {
        self.last_frame.as_ref().and_then(|f| f.pixel_levels(x, y))
    }

    /// True when the last emitted frame was entirely black
    pub fn last_frame_blank(&self) -> Option<bool> {
        self.last_frame.as_ref().map(Framebuffer::is_blank)
    }
}

impl MockOutput {
    /// Recording output that emits as fast as the refresh thread calls it
    pub fn new() -> Self {
        let output = Self::default();
        output.lock().capture_frames = true;
        output
    }

    /// Recording output that sleeps `delay` per frame
    pub fn with_emit_delay(delay: Duration) -> Self {
        let output = Self::new();
        output.lock().emit_delay = Some(delay);
        output
    }

    /// Get reference to state for inspection in tests
    pub fn state(&self) -> Arc<Mutex<MockOutputState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> MutexGuard<'_, MockOutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MatrixOutput for MockOutput {
    fn name(&self) -> &str {
        "mock"
    }

    fn init(&mut self, geometry: &FrameGeometry) -> Result<(), DisplayError> {
        let mut state = self.lock();
        if state.simulate_init_failure {
            return Err(DisplayError::InitializationFailed("Simulated init failure".to_string()));
        }
        state.init_count += 1;
        state.geometry = Some(*geometry);
        debug!("mock output initialized for {}x{}", geometry.width(), geometry.height());
        Ok(())
    }

    fn emit(&mut self, frame: &Framebuffer) -> Result<(), DisplayError> {
        let delay = {
            let mut state = self.lock();
            if state.simulate_emit_failure {
                return Err(DisplayError::GpioError("Simulated emit failure".to_string()));
            }
            state.emit_count += 1;
            if state.capture_frames {
                let copied = match state.last_frame.as_mut() {
                    Some(last) => last.copy_from(frame).is_ok(),
                    None => false,
                };
                if !copied {
                    state.last_frame = Some(frame.clone());
                }
            }
            state.emit_delay
        }; // Release lock before sleeping

        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(())
    }
}
