/*
 *  display/matrix.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  RGB matrix refresh engine: refresh thread and vsync double buffering
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

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::display::error::DisplayError;
use crate::display::framebuffer::{FrameCanvas, FrameGeometry, FrameParams, Framebuffer, ScanMode};
use crate::display::gpio::HardwareMappingKind;
use crate::display::thread::{make_realtime, REFRESH_PRIORITY};
use crate::display::drivers::hub75::DEFAULT_LSB_NANOSECONDS;
use crate::display::traits::{BoxedOutput, PixelSink};

// swap waiters re-check the running flag at this interval
const SWAP_POLL: Duration = Duration::from_millis(50);

// log every Nth consecutive emit failure
const EMIT_ERROR_THROTTLE: u64 = 1000;

/// Matrix options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixOptions {
    pub hardware_mapping: HardwareMappingKind,

    /// Panel rows and columns, chain and parallel come from the panel layout
    #[serde(skip)]
    pub rows: usize,
    #[serde(skip)]
    pub cols: usize,
    #[serde(skip)]
    pub chain_length: usize,
    #[serde(skip)]
    pub parallel: usize,

    pub pwm_bits: u8,
    pub pwm_lsb_nanoseconds: u32,
    pub brightness: u8,
    pub luminance_correct: bool,
    pub scan_mode: ScanMode,

    /// Run the refresh thread SCHED_FIFO
    pub realtime: bool,
    /// Core the refresh thread is pinned to
    pub refresh_cpu: Option<usize>,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            hardware_mapping: HardwareMappingKind::Regular,
            rows: 32,
            cols: 32,
            chain_length: 1,
            parallel: 1,
            pwm_bits: 11,
            pwm_lsb_nanoseconds: DEFAULT_LSB_NANOSECONDS,
            brightness: 100,
            luminance_correct: true,
            scan_mode: ScanMode::Progressive,
            realtime: true,
            refresh_cpu: Some(3),
        }
    }
}

impl MatrixOptions {
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry {
            rows: self.rows,
            columns: self.cols * self.chain_length,
            parallel: self.parallel,
            pwm_bits: self.pwm_bits,
            scan_mode: self.scan_mode,
            mapping: self.hardware_mapping.mapping(),
        }
    }
}

struct SwapSlots {
    next: Option<FrameCanvas>,
    retired: Option<FrameCanvas>,
    frame_multiple: u32,
}

struct Shared {
    active: Mutex<FrameCanvas>,
    slots: Mutex<SwapSlots>,
    swapped: Condvar,
    running: AtomicBool,
    frames_emitted: AtomicU64,
}

fn poisoned<T>(_: PoisonError<T>) -> DisplayError {
    DisplayError::RefreshThread("matrix state lock poisoned".into())
}

/// Hardware-oriented RGB matrix with a dedicated refresh thread.
///
/// Exactly one canvas is active and being scanned out. Offscreen canvases
/// from [`create_frame_canvas`](Self::create_frame_canvas) are drawn by the
/// application and exchanged with [`swap_on_vsync`](Self::swap_on_vsync).
pub struct RgbMatrix {
    options: MatrixOptions,
    geometry: FrameGeometry,
    params: Arc<FrameParams>,
    shared: Arc<Shared>,
    refresh: Option<JoinHandle<BoxedOutput>>,
    output: Option<BoxedOutput>,
    next_canvas_id: usize,
    stopped: bool,
}

impl RgbMatrix {
    /// Initialize the output and start refreshing
    pub fn new(options: MatrixOptions, output: BoxedOutput) -> Result<Self, DisplayError> {
        let mut matrix = Self::without_refresh(options, output)?;
        matrix.start_refresh()?;
        Ok(matrix)
    }

    /// Initialize the output but leave the refresh thread stopped
    pub fn without_refresh(options: MatrixOptions, mut output: BoxedOutput) -> Result<Self, DisplayError> {
        let geometry = options.geometry();
        geometry.validate()?;
        output.init(&geometry)?;

        let params = FrameParams::new(options.brightness, options.luminance_correct);
        let mut active = FrameCanvas::new(0, Framebuffer::new(geometry, Arc::clone(&params)));
        active.clear();

        info!(
            "matrix {}x{} ({} rows, chain {}, parallel {}) on '{}', pwm {} bits, brightness {}%",
            geometry.width(), geometry.height(), options.rows, options.chain_length,
            options.parallel, output.name(), options.pwm_bits, params.brightness()
        );

        Ok(Self {
            options,
            geometry,
            params,
            shared: Arc::new(Shared {
                active: Mutex::new(active),
                slots: Mutex::new(SwapSlots { next: None, retired: None, frame_multiple: 1 }),
                swapped: Condvar::new(),
                running: AtomicBool::new(false),
                frames_emitted: AtomicU64::new(0),
            }),
            refresh: None,
            output: Some(output),
            next_canvas_id: 1,
            stopped: false,
        })
    }

    pub fn start_refresh(&mut self) -> Result<(), DisplayError> {
        if self.refresh.is_some() {
            return Ok(());
        }
        let output = self.output.take().ok_or_else(|| {
            DisplayError::RefreshThread("no output to refresh".into())
        })?;

        let shared = Arc::clone(&self.shared);
        let realtime = self.options.realtime.then_some(self.options.refresh_cpu);
        shared.running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("matrix-refresh".into())
            .spawn(move || refresh_loop(shared, output, realtime))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                DisplayError::RefreshThread(format!("cannot spawn refresh thread: {}", e))
            })?;
        self.refresh = Some(handle);
        self.stopped = false;
        debug!("refresh thread started");
        Ok(())
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_some() && self.shared.running.load(Ordering::Acquire)
    }

    pub fn options(&self) -> &MatrixOptions { &self.options }
    pub fn geometry(&self) -> &FrameGeometry { &self.geometry }

    /// New offscreen canvas sharing brightness and luminance settings
    pub fn create_frame_canvas(&mut self) -> FrameCanvas {
        let id = self.next_canvas_id;
        self.next_canvas_id += 1;
        FrameCanvas::new(id, Framebuffer::new(self.geometry, Arc::clone(&self.params)))
    }

    /// Make `canvas` active at the next frame boundary that is a multiple of
    /// `granularity` refreshes and return the canvas it replaced.
    ///
    /// Blocks until the refresh thread has promoted the canvas. Without a
    /// running refresh thread the exchange happens immediately.
    pub fn swap_on_vsync(&mut self, canvas: FrameCanvas, granularity: u32) -> Result<FrameCanvas, DisplayError> {
        if !self.is_refreshing() {
            let mut active = self.shared.active.lock().map_err(poisoned)?;
            return Ok(mem::replace(&mut *active, canvas));
        }

        let mut slots = self.shared.slots.lock().map_err(poisoned)?;
        slots.frame_multiple = granularity.max(1);
        slots.retired = None;
        slots.next = Some(canvas);

        loop {
            if let Some(previous) = slots.retired.take() {
                return Ok(previous);
            }
            let finished = self.refresh.as_ref().is_none_or(JoinHandle::is_finished);
            if finished || !self.shared.running.load(Ordering::Acquire) {
                // refresh stopped while we waited, hand over directly
                let Some(canvas) = slots.next.take() else {
                    return Err(DisplayError::RefreshThread("pending canvas lost".into()));
                };
                let mut active = self.shared.active.lock().map_err(poisoned)?;
                return Ok(mem::replace(&mut *active, canvas));
            }
            slots = self.shared.swapped.wait_timeout(slots, SWAP_POLL).map_err(poisoned)?.0;
        }
    }

    /// Brightness in percent, applies to every canvas of this matrix
    pub fn set_brightness(&self, percent: u8) {
        self.params.set_brightness(percent);
    }

    pub fn brightness(&self) -> u8 { self.params.brightness() }

    pub fn clear(&self) -> Result<(), DisplayError> {
        self.shared.active.lock().map_err(poisoned)?.clear();
        Ok(())
    }

    pub fn fill(&self, red: u8, green: u8, blue: u8) -> Result<(), DisplayError> {
        self.shared.active.lock().map_err(poisoned)?.fill(red, green, blue);
        Ok(())
    }

    pub fn active_canvas_id(&self) -> Result<usize, DisplayError> {
        Ok(self.shared.active.lock().map_err(poisoned)?.id())
    }

    /// Copy of the frame currently scanned out
    pub fn snapshot(&self) -> Result<Framebuffer, DisplayError> {
        Ok(self.shared.active.lock().map_err(poisoned)?.framebuffer().clone())
    }

    /// Frames successfully pushed to the output so far
    pub fn frames_emitted(&self) -> u64 {
        self.shared.frames_emitted.load(Ordering::Relaxed)
    }

    /// Stop refreshing and leave the panels dark
    pub fn stop(&mut self) -> Result<(), DisplayError> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.swapped.notify_all();

        if let Some(handle) = self.refresh.take() {
            match handle.join() {
                Ok(output) => self.output = Some(output),
                Err(_) => error!("refresh thread panicked, output lost"),
            }
            debug!("refresh thread joined");
        }

        let Some(output) = self.output.as_mut() else {
            return Err(DisplayError::RefreshThread("output lost, panels not blanked".into()));
        };
        let mut active = self.shared.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.clear();
        self.stopped = true;
        output.emit(active.framebuffer())
    }
}

impl PixelSink for RgbMatrix {
    fn width(&self) -> usize { self.geometry.width() }
    fn height(&self) -> usize { self.geometry.height() }

    fn set_pixel(&mut self, x: usize, y: usize, red: u8, green: u8, blue: u8) {
        self.shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_pixel(x, y, red, green, blue);
    }
}

impl Drop for RgbMatrix {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        match self.stop() {
            Ok(()) => info!("matrix stopped, panels cleared"),
            Err(e) => warn!("matrix shutdown: {}", e),
        }
    }
}

fn lock_slots(shared: &Shared) -> MutexGuard<'_, SwapSlots> {
    shared.slots.lock().unwrap_or_else(PoisonError::into_inner)
}

fn refresh_loop(shared: Arc<Shared>, mut output: BoxedOutput, realtime: Option<Option<usize>>) -> BoxedOutput {
    if let Some(cpu) = realtime {
        make_realtime(REFRESH_PRIORITY, cpu);
    }

    let mut frame_count: u32 = 0;
    let mut failures: u64 = 0;

    while shared.running.load(Ordering::Acquire) {
        let result = {
            let active = shared.active.lock().unwrap_or_else(PoisonError::into_inner);
            output.emit(active.framebuffer())
        };
        match result {
            Ok(()) => {
                if failures > 0 {
                    info!("'{}' recovered after {} failed frames", output.name(), failures);
                    failures = 0;
                }
                shared.frames_emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                if failures % EMIT_ERROR_THROTTLE == 0 {
                    error!("'{}' emit failed: {}", output.name(), e);
                }
                failures += 1;
            }
        }

        {
            let mut slots = lock_slots(&shared);
            if frame_count % slots.frame_multiple == 0 {
                frame_count = 0;
                if let Some(next) = slots.next.take() {
                    let mut active = shared.active.lock().unwrap_or_else(PoisonError::into_inner);
                    slots.retired = Some(mem::replace(&mut *active, next));
                }
                shared.swapped.notify_all();
            }
        }
        frame_count = frame_count.wrapping_add(1);
    }

    output
}
