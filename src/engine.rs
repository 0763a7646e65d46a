/*
 *  engine.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display engine - audio driven render loop
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

use anyhow::{anyhow, Context, Result};
use embedded_graphics::{
    mono_font::{ascii::FONT_5X8, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    text::{Baseline, Text},
};
use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::animation::BitmapManager;
use crate::audio::{PcmSource, SampleSource};
use crate::bitmap::Bitmap;
use crate::config::Settings;
use crate::display::drivers::{Hub75Output, MockOutput};
use crate::display::{
    BoxedOutput, DisplayMode, DisplayModeController, FrameCanvas, GridCanvas, GridTransformer, RgbMatrix,
};
use crate::spectrum::{ColorGains, SpectrumProcessor};

/// Seconds the contracting circle takes to close before it restarts
const CIRCLE_PERIOD: f64 = 1.0;

/// Fraction of the surface lit by sparkles at full gain
const SPARKLE_DENSITY: f32 = 0.02;

/// Frame time of the `--no-hardware` mock output
const DRY_RUN_FRAME: Duration = Duration::from_millis(10);

type Canvas<'a> = GridCanvas<'a, FrameCanvas>;

/// Owns the whole pipeline from audio samples to the panels
pub struct DisplayEngine {
    settings: Settings,
    bitmaps: BitmapManager,
    source: Box<dyn SampleSource>,
    spectrum: SpectrumProcessor,
    matrix: RgbMatrix,
    transformer: GridTransformer,
    modes: DisplayModeController,
    offscreen: Option<FrameCanvas>,
    samples: Vec<i16>,
    circle_reset: f64,
    rng: StdRng,
}

impl DisplayEngine {
    /// Open the configured audio device and matrix output
    pub fn new(settings: Settings) -> Result<Self> {
        let source = PcmSource::open(&settings.audio)
            .with_context(|| format!("opening audio device '{}'", settings.audio.device))?;

        let output: BoxedOutput = if settings.no_hardware {
            info!("--no-hardware: frames go to a mock output");
            Box::new(MockOutput::with_emit_delay(DRY_RUN_FRAME))
        } else {
            let matrix = &settings.matrix;
            Box::new(Hub75Output::new(matrix.hardware_mapping.mapping(), matrix.pwm_lsb_nanoseconds))
        };

        Self::with_parts(settings, output, Box::new(source), StdRng::from_os_rng())
    }

    /// Build from explicit parts, loading every configured bitmap set
    pub fn with_parts(
        settings: Settings,
        output: BoxedOutput,
        source: Box<dyn SampleSource>,
        rng: StdRng,
    ) -> Result<Self> {
        let display = &settings.display;
        info!("Initializing bitmaps...");
        let mut bitmaps = BitmapManager::new();
        for set in &settings.image_sets {
            let index = bitmaps.create_set(set.duration);
            for path in &set.images {
                bitmaps
                    .load_image(index, path, display.width, display.height)
                    .with_context(|| format!("loading image set {}", index))?;
            }
        }

        info!("Initializing spectral processor...");
        let spectrum = SpectrumProcessor::new(settings.spectrum.clone()).context("creating spectral processor")?;
        let samples = vec![0i16; spectrum.block_size()];

        info!("Initializing LED matrix...");
        let transformer = display.transformer().context("building panel layout")?;
        let (pw, ph) = transformer.physical_size();
        info!(
            "{}x{} display on {} panel(s) of {}x{}, chain {} parallel {} ({}x{} physical)",
            display.width, display.height, display.panels.len(), display.panel_width,
            display.panel_height, display.chain_length, display.parallel_count, pw, ph
        );
        let mut matrix = RgbMatrix::new(settings.matrix.clone(), output).context("starting LED matrix")?;
        matrix.clear().context("clearing LED matrix")?;
        let offscreen = Some(matrix.create_frame_canvas());

        let modes = DisplayModeController::new(settings.modes.clone(), bitmaps.set_count());
        info!("Done initializing display engine, {} bitmap set(s)", bitmaps.set_count());

        Ok(Self {
            settings,
            bitmaps,
            source,
            spectrum,
            matrix,
            transformer,
            modes,
            offscreen,
            samples,
            circle_reset: 0.0,
            rng,
        })
    }

    pub fn matrix(&self) -> &RgbMatrix { &self.matrix }
    pub fn spectrum(&self) -> &SpectrumProcessor { &self.spectrum }
    pub fn mode(&self) -> DisplayMode { self.modes.current_mode() }
    pub fn set_index(&self) -> usize { self.modes.set_index() }

    /// Add a decoded bitmap to `set`, creating sets as needed
    pub fn add_bitmap(&mut self, set: usize, duration: f64, bitmap: Bitmap) -> bool {
        while self.bitmaps.set_count() <= set {
            self.bitmaps.create_set(duration);
        }
        self.modes = DisplayModeController::new(self.settings.modes.clone(), self.bitmaps.set_count());
        self.bitmaps.add_image(set, bitmap)
    }

    /// Label each panel with its grid position "column,row"
    pub fn show_identification(&mut self) -> Result<()> {
        let mut canvas = self.take_canvas()?;
        {
            let display = &self.settings.display;
            let columns = display.width / display.panel_width;
            let rows = display.height / display.panel_height;
            let style = MonoTextStyle::new(&FONT_5X8, Rgb888::WHITE);

            let mut grid = self.transformer.attach(&mut canvas);
            for j in 0..rows {
                for i in 0..columns {
                    let origin = Point::new((i * display.panel_width + 1) as i32, (j * display.panel_height) as i32);
                    let label = format!("{},{}", i, j);
                    // drawing into a GridCanvas cannot fail
                    let _ = Text::with_baseline(&label, origin, style, Baseline::Top).draw(&mut grid);
                }
            }
            grid.reset_screen();
        }
        self.present(canvas)
    }

    /// One tick from an audio block to a swapped frame
    pub fn render_frame(&mut self, seconds: f64) -> Result<DisplayMode> {
        self.source
            .read(&mut self.samples)
            .with_context(|| format!("reading audio from {}", self.source.name()))?;
        self.spectrum
            .cycle(&self.samples, self.settings.spectrum.display_depth, seconds)
            .context("spectral cycle")?;
        let gains = self.spectrum.color_gains();
        let loudness = self.spectrum.stats().max;

        let event = self.spectrum.get_events();
        if self.modes.handle_event(event, seconds) {
            debug!("{:?} at {:.2}s, gains {:?}", event, seconds, gains);
        }
        let mode = self.modes.current_mode();

        let mut canvas = self.take_canvas()?;
        {
            let bitmap = self.bitmaps.frame(self.modes.set_index(), seconds);
            let crop = self.settings.display.crop_origin;
            let mut grid = self.transformer.attach(&mut canvas);

            match mode {
                DisplayMode::LowAmplitude => {
                    print_bitmap(&mut grid, bitmap, crop, scaled(gains, 0.5));
                    print_contracting_circle(&mut grid, seconds, &mut self.circle_reset, gains);
                }
                DisplayMode::HighAmplitude => {
                    print_bitmap(&mut grid, bitmap, crop, gains);
                    print_border(&mut grid, gains);
                    sparkles(&mut grid, &mut self.rng, loudness, gains);
                }
                DisplayMode::Bitmap => {
                    print_bitmap(&mut grid, bitmap, crop, gains);
                }
            }
            grid.reset_screen();
        }
        self.present(canvas)?;
        Ok(mode)
    }

    /// Identification screen, then render until `running` clears. Blanks the panels on exit.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        info!("Initializing display loop...");
        self.show_identification()?;
        let shown = Instant::now();
        let hold = Duration::from_secs_f64(self.settings.identify_seconds);
        while running.load(Ordering::Relaxed) && shown.elapsed() < hold {
            thread::sleep(Duration::from_millis(50));
        }

        let start = Instant::now();
        let mut frames = 0u64;
        let result = loop {
            if !running.load(Ordering::Relaxed) {
                break Ok(());
            }
            match self.render_frame(start.elapsed().as_secs_f64()) {
                Ok(_) => frames += 1,
                // the audio producer usually dies with us
                Err(e) if !running.load(Ordering::Relaxed) => {
                    debug!("ignoring error during shutdown: {:#}", e);
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            info!("Rendered {} frames in {:.1}s ({:.1} fps)", frames, elapsed, frames as f64 / elapsed);
        }
        if let Err(e) = self.matrix.stop() {
            warn!("Failed to blank the matrix on shutdown: {}", e);
        }
        result
    }

    fn take_canvas(&mut self) -> Result<FrameCanvas> {
        self.offscreen.take().ok_or_else(|| anyhow!("offscreen canvas lost after a failed swap"))
    }

    fn present(&mut self, canvas: FrameCanvas) -> Result<()> {
        let canvas = self.matrix.swap_on_vsync(canvas, 1).context("swapping frame")?;
        self.offscreen = Some(canvas);
        Ok(())
    }
}

fn scaled(gains: ColorGains, by: f32) -> ColorGains {
    ColorGains { red: gains.red * by, green: gains.green * by, blue: gains.blue * by }
}

#[inline]
fn tint(value: f32, gain: f32) -> u8 {
    // float to int casts saturate
    (value * gain) as u8
}

fn print_bitmap(grid: &mut Canvas<'_>, bitmap: Option<&Bitmap>, crop: (usize, usize), gains: ColorGains) {
    let Some(bitmap) = bitmap else { return };
    let (bw, bh) = (bitmap.width(), bitmap.height());
    if bw == 0 || bh == 0 {
        return;
    }
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let (r, g, b) = bitmap.get_pixel((x + crop.0) % bw, (y + crop.1) % bh);
            grid.set_pixel(
                x, y,
                tint(r as f32, gains.red), tint(g as f32, gains.green), tint(b as f32, gains.blue),
                false,
            );
        }
    }
}

/// Glow rising with the squared distance from the centre, fills what the bitmap left dark
fn print_border(grid: &mut Canvas<'_>, gains: ColorGains) {
    grid.enable_cutoff(false);
    let (half_w, half_h) = ((grid.width() / 2) as i32, (grid.height() / 2) as i32);
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let dx = x as i32 - half_w;
            let dy = y as i32 - half_h;
            let value = ((dx * dx + dy * dy) as f32 / 32.0 - 10.0).max(0.0);
            grid.set_pixel(x, y, tint(value, gains.red), tint(value, gains.green), tint(value, gains.blue), false);
        }
    }
    grid.enable_cutoff(true);
}

/// Bright rim shrinking to the centre, restarting every period
fn print_contracting_circle(grid: &mut Canvas<'_>, seconds: f64, reset: &mut f64, gains: ColorGains) {
    grid.enable_cutoff(false);
    if seconds - *reset > CIRCLE_PERIOD {
        *reset = seconds;
    }
    let ratio = (CIRCLE_PERIOD - (seconds - *reset)) as f32;

    let (half_w, half_h) = ((grid.width() / 2) as i32, (grid.height() / 2) as i32);
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let dx = ((half_w - (x as i32 - half_w).abs()) as f32 * ratio) as i32;
            let dy = ((half_h - (y as i32 - half_h).abs()) as f32 * ratio) as i32;
            let value = (dx * dx + dy * dy) as f32 / 32.0;
            grid.set_pixel(x, y, tint(value, gains.red), tint(value, gains.green), tint(value, gains.blue), false);
        }
    }
    grid.enable_cutoff(true);
}

/// Random white points over a loud frame, more of them the louder it is
fn sparkles<R: Rng>(grid: &mut Canvas<'_>, rng: &mut R, loudness: i32, gains: ColorGains) {
    let (w, h) = (grid.width(), grid.height());
    let level = (loudness as f32 / 100.0).clamp(0.0, 1.0) * gains.red.max(gains.green).max(gains.blue);
    let count = ((w * h) as f32 * SPARKLE_DENSITY * level) as usize;
    for _ in 0..count {
        let x = rng.random_range(0..w);
        let y = rng.random_range(0..h);
        let v = rng.random_range(160..=255u8);
        grid.set_pixel(x, y, v, v, v, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioError;
    use crate::bitmap::tests::encode;
    use crate::config::{parse_yaml, validate};
    use crate::display::drivers::MockOutputState;
    use std::sync::{Arc, Mutex};

    /// Plays a fixed tone, switchable between loud and near silent
    struct ToneSource {
        amplitude: Arc<Mutex<f32>>,
        phase: f32,
    }

    impl SampleSource for ToneSource {
        fn name(&self) -> &str { "tone" }

        fn read(&mut self, out: &mut [i16]) -> Result<(), AudioError> {
            let amplitude = *self.amplitude.lock().unwrap();
            for s in out.iter_mut() {
                self.phase += 0.3;
                *s = (self.phase.sin() * amplitude) as i16;
            }
            Ok(())
        }
    }

    struct EmptySource;

    impl SampleSource for EmptySource {
        fn name(&self) -> &str { "empty" }
        fn read(&mut self, out: &mut [i16]) -> Result<(), AudioError> {
            Err(AudioError::ShortRead { got: 0, wanted: out.len() })
        }
    }

    fn settings(extra: &str) -> Settings {
        let yaml = format!(
            "display: {{ width: 64, height: 32, panel_width: 32, panel_height: 32, chain_length: 2, \
             panels: [[{{ order: 0 }}, {{ order: 1 }}]] }}\nmatrix: {{ realtime: false }}\n\
             animation: {{ identify_seconds: 0 }}\n{}",
            extra
        );
        validate(&parse_yaml(&yaml).unwrap(), true).unwrap()
    }

    fn build(settings: Settings, source: Box<dyn SampleSource>) -> (DisplayEngine, Arc<Mutex<MockOutputState>>) {
        let output = MockOutput::new();
        let state = output.state();
        let engine = DisplayEngine::with_parts(settings, Box::new(output), source, StdRng::seed_from_u64(7)).unwrap();
        (engine, state)
    }

    fn tone(amplitude: f32) -> (Box<dyn SampleSource>, Arc<Mutex<f32>>) {
        let level = Arc::new(Mutex::new(amplitude));
        (Box::new(ToneSource { amplitude: Arc::clone(&level), phase: 0.0 }), level)
    }

    fn solid(r: u8, g: u8, b: u8) -> Bitmap {
        Bitmap::from_rgb(64, 32, [r, g, b].repeat(64 * 32)).unwrap()
    }

    #[test]
    fn test_identification_labels_every_panel() {
        let (source, _) = tone(0.0);
        let (mut engine, _) = build_stopped(settings(""), source);
        engine.show_identification().unwrap();
        assert!(lit_pixels(&engine, 0..32) > 0);
        assert!(lit_pixels(&engine, 32..64) > 0);
    }

    fn build_stopped(settings: Settings, source: Box<dyn SampleSource>) -> (DisplayEngine, Arc<Mutex<MockOutputState>>) {
        let (mut engine, state) = build(settings, source);
        // without a refresh thread swaps hand the canvas straight over
        engine.matrix.stop().unwrap();
        (engine, state)
    }

    fn lit_pixels(engine: &DisplayEngine, columns: std::ops::Range<usize>) -> usize {
        let frame = engine.matrix.snapshot().unwrap();
        columns
            .flat_map(|x| (0..32).map(move |y| (x, y)))
            .filter(|&(x, y)| frame.pixel_levels(x, y).is_some_and(|p| p != [0, 0, 0]))
            .count()
    }

    #[test]
    fn test_bitmap_tinted_by_gains() {
        let (source, _) = tone(12000.0);
        let (mut engine, _) = build_stopped(settings(""), source);
        assert!(engine.add_bitmap(0, 1.0, solid(200, 200, 200)));

        let mode = engine.render_frame(0.1).unwrap();
        assert_eq!(mode, DisplayMode::Bitmap);
        let gains = engine.spectrum().color_gains();
        // a single tone gives non-zero gain somewhere
        assert!(gains.red + gains.green + gains.blue > 0.0);

        let frame = engine.matrix.snapshot().unwrap();
        let params = frame.params();
        let expected = [
            params.map_color(tint(200.0, gains.red)),
            params.map_color(tint(200.0, gains.green)),
            params.map_color(tint(200.0, gains.blue)),
        ];
        assert_eq!(frame.pixel_levels(10, 10), Some(expected));
    }

    #[test]
    fn test_crop_origin_shifts_bitmap() {
        let (source, _) = tone(0.0);
        let (mut engine, _) = build_stopped(settings(""), source);

        let mut data = vec![0u8; 64 * 32 * 3];
        data[3..6].copy_from_slice(&[255, 255, 255]); // pixel (1, 0)
        engine.add_bitmap(0, 1.0, Bitmap::from_rgb(64, 32, data).unwrap());

        let mut canvas = engine.take_canvas().unwrap();
        {
            let bitmap = engine.bitmaps.frame(0, 0.0);
            let mut grid = engine.transformer.attach(&mut canvas);
            print_bitmap(&mut grid, bitmap, (1, 0), ColorGains { red: 1.0, green: 1.0, blue: 1.0 });
            grid.reset_screen();
        }
        let fb = canvas.framebuffer();
        assert_eq!(levels_at(&engine.transformer, fb, 0, 0).map(|p| p[0] > 0), Some(true));
        assert_eq!(levels_at(&engine.transformer, fb, 1, 0), Some([0, 0, 0]));
    }

    /// Pwm levels of a logical pixel, looked up through the panel mapping
    fn levels_at(grid: &GridTransformer, fb: &crate::display::Framebuffer, x: usize, y: usize) -> Option<[u16; 3]> {
        let (px, py) = grid.map(x, y);
        fb.pixel_levels(px, py)
    }

    #[test]
    fn test_border_fills_dark_edges_only() {
        let (source, _) = tone(0.0);
        let (mut engine, _) = build_stopped(settings(""), source);
        let full = ColorGains { red: 1.0, green: 1.0, blue: 1.0 };
        let mut canvas = engine.take_canvas().unwrap();
        {
            let mut grid = engine.transformer.attach(&mut canvas);
            grid.set_pixel(0, 0, 0, 0, 250, false);
            print_border(&mut grid, full);
            assert!(grid.transformer().cutoff().is_some());
            grid.reset_screen();
        }
        let fb = canvas.framebuffer();
        let grid = &engine.transformer;
        // first writer keeps the corner
        assert_eq!(levels_at(grid, fb, 0, 0).map(|p| p[0]), Some(0));
        // centre stays black, far edge glows: (31^2 + 16^2) / 32 - 10 = 28
        assert_eq!(levels_at(grid, fb, 32, 16), Some([0, 0, 0]));
        assert!(levels_at(grid, fb, 63, 0).unwrap()[0] > 0);
        // logical (0, 16): 32^2 / 32 - 10 = 22
        assert!(levels_at(grid, fb, 0, 16).unwrap()[0] > 0);
    }

    #[test]
    fn test_contracting_circle_restarts() {
        let (source, _) = tone(0.0);
        let (mut engine, _) = build_stopped(settings(""), source);
        let full = ColorGains { red: 1.0, green: 1.0, blue: 1.0 };
        let mut reset = 0.0;

        let mut canvas = engine.take_canvas().unwrap();
        {
            let mut grid = engine.transformer.attach(&mut canvas);
            print_contracting_circle(&mut grid, 0.5, &mut reset, full);
            grid.reset_screen();
        }
        assert_eq!(reset, 0.0);
        // centre at half ratio: (16^2 + 8^2) / 32 = 10
        let centre = levels_at(&engine.transformer, canvas.framebuffer(), 32, 16).unwrap();
        assert!(centre[0] > 0);

        {
            let mut grid = engine.transformer.attach(&mut canvas);
            print_contracting_circle(&mut grid, 1.6, &mut reset, full);
        }
        assert_eq!(reset, 1.6);
    }

    #[test]
    fn test_sparkles_scale_with_loudness() {
        let (source, _) = tone(0.0);
        let (mut engine, _) = build_stopped(settings(""), source);
        let full = ColorGains { red: 1.0, green: 1.0, blue: 1.0 };
        let mut rng = StdRng::seed_from_u64(1);

        let mut canvas = engine.take_canvas().unwrap();
        {
            let mut grid = engine.transformer.attach(&mut canvas);
            sparkles(&mut grid, &mut rng, 0, full);
            grid.reset_screen();
        }
        assert!(canvas.framebuffer().is_blank());

        {
            let mut grid = engine.transformer.attach(&mut canvas);
            sparkles(&mut grid, &mut rng, 100, full);
        }
        assert!(!canvas.framebuffer().is_blank());
    }

    #[test]
    fn test_loads_bitmap_sets_from_disk() {
        let dir = std::env::temp_dir().join(format!("lymatrix-engine-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frame.bmp");
        std::fs::write(&path, encode(64, 32, |_, _| (10, 20, 30))).unwrap();

        let extra = format!("  sets:\n    - duration: 2.0\n      images: ['{}']\n", path.display());
        let yaml_settings = {
            let yaml = format!(
                "display: {{ width: 64, height: 32, panel_width: 32, panel_height: 32, chain_length: 2, \
                 panels: [[{{ order: 0 }}, {{ order: 1 }}]] }}\nmatrix: {{ realtime: false }}\n\
                 animation:\n  identify_seconds: 0\n{}",
                extra
            );
            validate(&parse_yaml(&yaml).unwrap(), true).unwrap()
        };
        let (source, _) = tone(0.0);
        let (engine, _) = build(yaml_settings, source);
        assert_eq!(engine.bitmaps.set_count(), 1);
        assert_eq!(engine.bitmaps.get(0, 0).map(|b| b.get_pixel(3, 3)), Some((10, 20, 30)));

        // wrong size is a load error
        std::fs::write(&path, encode(8, 8, |_, _| (0, 0, 0))).unwrap();
        let mut bad = settings("");
        bad.image_sets = vec![crate::config::ImageSetConfig { duration: 1.0, images: vec![path.clone()] }];
        let (source, _) = tone(0.0);
        let result = DisplayEngine::with_parts(bad, Box::new(MockOutput::new()), source, StdRng::seed_from_u64(0));
        assert!(result.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_audio_error_ends_run() {
        let (mut engine, state) = build(settings(""), Box::new(EmptySource));
        let running = AtomicBool::new(true);
        assert!(engine.run(&running).is_err());
        // panels blanked on the way out
        assert_eq!(state.lock().unwrap().last_frame_blank(), Some(true));
    }

    #[test]
    fn test_run_stops_cleanly_when_flag_cleared() {
        let (source, _) = tone(8000.0);
        let (mut engine, state) = build(settings(""), source);
        engine.add_bitmap(0, 1.0, solid(255, 255, 255));
        let running = AtomicBool::new(false);
        engine.run(&running).unwrap();
        assert!(!engine.matrix.is_refreshing());
        assert_eq!(state.lock().unwrap().last_frame_blank(), Some(true));
    }

    #[test]
    fn test_quiet_spell_lowers_mode() {
        let extra = "spectrum:\n  events:\n    standard: { sustain: 0.0, hold: 0.0 }\n    quiet: { sustain: 0.0, hold: 0.0 }\n    loud: { sustain: 0.0, hold: 0.0 }\n";
        let (source, level) = tone(12000.0);
        let (mut engine, _) = build_stopped(settings(extra), source);
        engine.add_bitmap(0, 1.0, solid(100, 100, 100));

        let mut t = 0.0;
        for _ in 0..20 {
            t += 0.05;
            engine.render_frame(t).unwrap();
        }
        *level.lock().unwrap() = 0.0;
        let mut seen_low = false;
        for _ in 0..20 {
            t += 0.05;
            seen_low |= engine.render_frame(t).unwrap() == DisplayMode::LowAmplitude;
        }
        assert!(seen_low);
    }
}
