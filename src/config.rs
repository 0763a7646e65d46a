/*
 *  config.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Configuration: YAML file layered under command line overrides
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

use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::audio::AudioConfig;
use crate::display::framebuffer::{ScanMode, BIT_PLANES};
use crate::display::gpio::HardwareMappingKind;
use crate::display::matrix::MatrixOptions;
use crate::display::mode_controller::ModeControllerConfig;
use crate::display::transformer::{GridTransformer, Panel, TopologyError};
use crate::spectrum::SpectrumConfig;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Panel topology error: {0}")]
    Topology(#[from] TopologyError),
}

/// Top-level file configuration. Every group is optional and layered.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General options
    pub log_level: Option<String>, // e.g., "info" | "debug"
    /// panel layout and logical surface
    pub display: Option<DisplayConfig>,
    /// refresh engine and GPIO output
    pub matrix: Option<MatrixOptions>,
    pub audio: Option<AudioConfig>,
    pub spectrum: Option<SpectrumConfig>,
    pub animation: Option<AnimationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayConfig {
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub panel_width: Option<usize>,
    pub panel_height: Option<usize>,
    pub chain_length: Option<usize>,
    pub parallel_count: Option<usize>,
    /// Panel rows, each a list of panels left to right
    pub panels: Option<Vec<Vec<Panel>>>,
    /// Pixels with every channel below this are not drawn
    pub led_cutoff: Option<u8>,
    pub led_max_brightness: Option<u8>,
    /// Top-left corner of the bitmap region shown
    pub crop_origin: Option<[usize; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnimationConfig {
    /// Minimum seconds a bitmap set stays up
    pub image_set_duration: Option<f64>,
    pub sets: Option<Vec<ImageSetConfig>>,
    /// Seconds the panel identification screen is shown at start
    pub identify_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSetConfig {
    /// Seconds for one forward and back sweep
    pub duration: f64,
    pub images: Vec<PathBuf>,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "lymatrix", about = "LyMatrix audio reactive LED matrix", version)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// PCM source: `-` for stdin, or a file/FIFO path
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub audio_device: Option<String>,
    #[arg(long)]
    pub audio_channels: Option<usize>,
    #[arg(long, value_enum)]
    pub hardware_mapping: Option<HardwareMappingKind>,
    #[arg(long, value_enum)]
    pub scan_mode: Option<ScanMode>,
    /// Global brightness in percent
    #[arg(long)]
    pub brightness: Option<u8>,
    #[arg(long)]
    pub pwm_bits: Option<u8>,
    #[arg(long)]
    pub led_cutoff: Option<u8>,
    /// keep the refresh thread on normal scheduling
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_realtime: bool,
    /// render to a mock output instead of GPIO
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_hardware: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Validated, fully resolved settings. Immutable after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: String,
    pub display: DisplaySettings,
    pub matrix: MatrixOptions,
    pub audio: AudioConfig,
    pub spectrum: SpectrumConfig,
    pub modes: ModeControllerConfig,
    pub image_sets: Vec<ImageSetConfig>,
    pub identify_seconds: f64,
    pub no_hardware: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    pub width: usize,
    pub height: usize,
    pub panel_width: usize,
    pub panel_height: usize,
    pub chain_length: usize,
    pub parallel_count: usize,
    pub panels: Vec<Panel>,
    pub led_cutoff: u8,
    pub led_max_brightness: u8,
    pub crop_origin: (usize, usize),
}

impl DisplaySettings {
    /// Build the panel mapper for this layout
    pub fn transformer(&self) -> Result<GridTransformer, TopologyError> {
        let mut grid = GridTransformer::new(
            self.width,
            self.height,
            self.panel_width,
            self.panel_height,
            self.chain_length,
            self.panels.clone(),
        )?;
        grid.set_cutoff(self.led_cutoff);
        grid.enable_cutoff(true);
        grid.set_max_brightness(self.led_max_brightness);
        Ok(grid)
    }
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Settings, ConfigError> {
    let cli = Cli::parse();
    let (cfg, settings) = load_from(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(settings)
}

/// Merge defaults, YAML and `cli`, then validate
pub fn load_from(cli: &Cli) -> Result<(Config, Settings), ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    let settings = validate(&cfg, cli.no_hardware)?;
    Ok((cfg, settings))
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/lymatrix/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/lymatrix/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/lymatrix.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["lymatrix.yaml", "config.yaml", "config/lymatrix.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

pub fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    parse_yaml(&s)
}

pub fn parse_yaml(s: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    // top-level
    if src.log_level.is_some()      { dst.log_level = src.log_level; }
    if src.matrix.is_some()         { dst.matrix = src.matrix; }
    if src.audio.is_some()          { dst.audio = src.audio; }
    if src.spectrum.is_some()       { dst.spectrum = src.spectrum; }
    // display
    match (&mut dst.display, src.display) {
        (None, Some(c)) => dst.display = Some(c),
        (Some(d), Some(s)) => merge_display(d, s),
        _ => {}
    }
    match (&mut dst.animation, src.animation) {
        (None, Some(c)) => dst.animation = Some(c),
        (Some(d), Some(s)) => merge_animation(d, s),
        _ => {}
    }
}

fn merge_display(dst: &mut DisplayConfig, src: DisplayConfig) {
    if src.width.is_some()              { dst.width = src.width; }
    if src.height.is_some()             { dst.height = src.height; }
    if src.panel_width.is_some()        { dst.panel_width = src.panel_width; }
    if src.panel_height.is_some()       { dst.panel_height = src.panel_height; }
    if src.chain_length.is_some()       { dst.chain_length = src.chain_length; }
    if src.parallel_count.is_some()     { dst.parallel_count = src.parallel_count; }
    if src.panels.is_some()             { dst.panels = src.panels; }
    if src.led_cutoff.is_some()         { dst.led_cutoff = src.led_cutoff; }
    if src.led_max_brightness.is_some() { dst.led_max_brightness = src.led_max_brightness; }
    if src.crop_origin.is_some()        { dst.crop_origin = src.crop_origin; }
}

fn merge_animation(dst: &mut AnimationConfig, src: AnimationConfig) {
    if src.image_set_duration.is_some() { dst.image_set_duration = src.image_set_duration; }
    if src.sets.is_some()               { dst.sets = src.sets; }
    if src.identify_seconds.is_some()   { dst.identify_seconds = src.identify_seconds; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some() { cfg.log_level = cli.log_level.clone(); }

    if cli.audio_device.is_some() || cli.audio_channels.is_some() {
        let audio = cfg.audio.get_or_insert_with(AudioConfig::default);
        if let Some(device) = &cli.audio_device { audio.device = device.clone(); }
        if let Some(channels) = cli.audio_channels { audio.channels = channels; }
    }

    let any_matrix = cli.hardware_mapping.is_some()
        || cli.scan_mode.is_some()
        || cli.brightness.is_some()
        || cli.pwm_bits.is_some()
        || cli.no_realtime;
    if any_matrix {
        let matrix = cfg.matrix.get_or_insert_with(MatrixOptions::default);
        if let Some(m) = cli.hardware_mapping { matrix.hardware_mapping = m; }
        if let Some(s) = cli.scan_mode        { matrix.scan_mode = s; }
        if let Some(b) = cli.brightness       { matrix.brightness = b; }
        if let Some(p) = cli.pwm_bits         { matrix.pwm_bits = p; }
        if cli.no_realtime                    { matrix.realtime = false; }
    }

    if cli.led_cutoff.is_some() {
        cfg.display.get_or_insert_with(DisplayConfig::default).led_cutoff = cli.led_cutoff;
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

/// Put any invariants here (required fields, ranges, etc.) and resolve defaults
pub fn validate(cfg: &Config, no_hardware: bool) -> Result<Settings, ConfigError> {
    let display = cfg.display.clone().unwrap_or_default();
    let panel_width = display.panel_width.unwrap_or(32);
    let panel_height = display.panel_height.unwrap_or(32);
    let width = display.width.unwrap_or(panel_width);
    let height = display.height.unwrap_or(panel_height);
    let chain_length = display.chain_length.unwrap_or(1);
    let parallel_count = display.parallel_count.unwrap_or(1);

    if width == 0 || height == 0 || panel_width == 0 || panel_height == 0 {
        return Err(invalid("display and panel width/height must be > 0"));
    }
    if width % panel_width != 0 {
        return Err(invalid("display width must be a multiple of panel_width"));
    }
    if height % panel_height != 0 {
        return Err(invalid("display height must be a multiple of panel_height"));
    }
    if !(1..=3).contains(&parallel_count) {
        return Err(invalid("parallel_count must be between 1 and 3"));
    }
    if chain_length == 0 {
        return Err(invalid("chain_length must be at least 1"));
    }

    let panels: Vec<Panel> = match display.panels {
        Some(rows) => rows.into_iter().flatten().collect(),
        // a single panel needs no layout
        None if width == panel_width && height == panel_height => {
            vec![Panel { order: 0, rotate: 0, parallel: 0 }]
        }
        None => return Err(invalid("display spans several panels, 'panels' layout is required")),
    };
    if let Some((i, p)) = panels.iter().enumerate().find(|(_, p)| p.parallel >= parallel_count) {
        return Err(invalid(format!(
            "panel {} is on parallel chain {} but parallel_count is {}", i, p.parallel, parallel_count
        )));
    }

    let display = DisplaySettings {
        width,
        height,
        panel_width,
        panel_height,
        chain_length,
        parallel_count,
        panels,
        led_cutoff: display.led_cutoff.unwrap_or(0),
        led_max_brightness: display.led_max_brightness.unwrap_or(100),
        crop_origin: display.crop_origin.map_or((0, 0), |[x, y]| (x, y)),
    };
    if display.led_max_brightness > 100 {
        return Err(invalid("led_max_brightness must be 0..=100"));
    }
    // full topology check with panel context
    display.transformer()?;

    let mut matrix = cfg.matrix.clone().unwrap_or_default();
    matrix.rows = panel_height;
    matrix.cols = panel_width;
    matrix.chain_length = chain_length;
    matrix.parallel = parallel_count;
    if !(1..=100).contains(&matrix.brightness) {
        return Err(invalid("matrix brightness must be 1..=100"));
    }
    if matrix.pwm_bits == 0 || matrix.pwm_bits > BIT_PLANES {
        return Err(invalid(format!("matrix pwm_bits must be 1..={}", BIT_PLANES)));
    }
    if panel_height % 2 != 0 || panel_height > 64 {
        return Err(invalid("panel_height must be even and at most 64"));
    }
    if parallel_count > matrix.hardware_mapping.mapping().max_parallel {
        return Err(invalid(format!(
            "hardware mapping '{}' drives at most {} parallel chain(s)",
            matrix.hardware_mapping.mapping().name,
            matrix.hardware_mapping.mapping().max_parallel
        )));
    }

    let audio = cfg.audio.clone().unwrap_or_default();
    if audio.channels == 0 || audio.channels > 8 {
        return Err(invalid("audio channels must be 1..=8"));
    }

    let spectrum = cfg.spectrum.clone().unwrap_or_default();
    spectrum.validate().map_err(|e| invalid(format!("spectrum: {}", e)))?;

    let animation = cfg.animation.clone().unwrap_or_default();
    let image_sets = animation.sets.unwrap_or_default();
    for (i, set) in image_sets.iter().enumerate() {
        if !(set.duration > 0.0) {
            return Err(invalid(format!("image set {} duration must be > 0", i)));
        }
        if set.images.is_empty() {
            return Err(invalid(format!("image set {} has no images", i)));
        }
    }
    if image_sets.is_empty() {
        warn!("no image sets configured, only effects will be shown");
    }
    let modes = ModeControllerConfig {
        min_set_duration: animation
            .image_set_duration
            .unwrap_or(ModeControllerConfig::default().min_set_duration),
    };

    Ok(Settings {
        log_level: cfg.log_level.clone().unwrap_or_else(|| "info".to_string()),
        display,
        matrix,
        audio,
        spectrum,
        modes,
        image_sets,
        identify_seconds: animation.identify_seconds.unwrap_or(3.0).max(0.0),
        no_hardware,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PANELS: &str = r#"
log_level: debug
display:
  width: 64
  height: 32
  panel_width: 32
  panel_height: 32
  chain_length: 2
  parallel_count: 1
  led_cutoff: 12
  crop_origin: [4, 2]
  panels:
    - - { order: 1, rotate: 0 }
      - { order: 0, rotate: 180 }
matrix:
  hardware_mapping: adafruit-hat
  brightness: 60
  scan_mode: interlaced
animation:
  image_set_duration: 15
  sets:
    - duration: 2.0
      images: [a.bmp, b.bmp]
"#;

    fn settings(yaml: &str, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut cfg = Config::default();
        merge(&mut cfg, parse_yaml(yaml)?);
        apply_cli_overrides(&mut cfg, cli);
        validate(&cfg, cli.no_hardware)
    }

    #[test]
    fn test_defaults_single_panel() {
        let s = settings("{}", &Cli::default()).unwrap();
        assert_eq!((s.display.width, s.display.height), (32, 32));
        assert_eq!(s.display.panels.len(), 1);
        assert_eq!(s.log_level, "info");
        assert_eq!(s.audio.device, "-");
        assert_eq!(s.matrix.rows, 32);
        assert!(s.image_sets.is_empty());
    }

    #[test]
    fn test_yaml_layout() {
        let s = settings(TWO_PANELS, &Cli::default()).unwrap();
        assert_eq!(s.log_level, "debug");
        assert_eq!(s.display.panels[1], Panel { order: 0, rotate: 180, parallel: 0 });
        assert_eq!(s.display.crop_origin, (4, 2));
        assert_eq!(s.matrix.hardware_mapping, HardwareMappingKind::AdafruitHat);
        assert_eq!(s.matrix.scan_mode, ScanMode::Interlaced);
        assert_eq!(s.matrix.chain_length, 2);
        assert_eq!(s.matrix.brightness, 60);
        assert_eq!(s.modes.min_set_duration, 15.0);
        assert_eq!(s.image_sets[0].images.len(), 2);

        let grid = s.display.transformer().unwrap();
        assert_eq!(grid.cutoff(), Some(12));
    }

    #[test]
    fn test_cli_overrides_yaml() {
        let cli = Cli {
            log_level: Some("trace".into()),
            brightness: Some(20),
            audio_device: Some("/tmp/pcm.fifo".into()),
            no_realtime: true,
            led_cutoff: Some(3),
            ..Default::default()
        };
        let s = settings(TWO_PANELS, &cli).unwrap();
        assert_eq!(s.log_level, "trace");
        assert_eq!(s.matrix.brightness, 20);
        assert!(!s.matrix.realtime);
        // untouched YAML values survive
        assert_eq!(s.matrix.hardware_mapping, HardwareMappingKind::AdafruitHat);
        assert_eq!(s.audio.device, "/tmp/pcm.fifo");
        assert_eq!(s.display.led_cutoff, 3);
    }

    #[test]
    fn test_panel_count_mismatch_is_topology_error() {
        let yaml = "display: { width: 64, height: 32, panel_width: 32, panel_height: 32, chain_length: 2, panels: [[{ order: 0 }]] }";
        let err = settings(yaml, &Cli::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Topology(TopologyError::PanelCount { expected: 2, found: 1, .. })));
    }

    #[test]
    fn test_multi_panel_needs_layout() {
        let yaml = "display: { width: 64, height: 32, panel_width: 32, panel_height: 32, chain_length: 2 }";
        assert!(matches!(settings(yaml, &Cli::default()), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_parallel_checks() {
        let yaml = "display: { parallel_count: 4 }";
        assert!(matches!(settings(yaml, &Cli::default()), Err(ConfigError::Validation(_))));

        let yaml = "display: { width: 32, height: 64, panel_width: 32, panel_height: 32, parallel_count: 1, panels: [[{ order: 0 }], [{ order: 0, parallel: 1 }]] }";
        assert!(matches!(settings(yaml, &Cli::default()), Err(ConfigError::Validation(_))));

        // the hat drives a single chain only
        let yaml = "display: { width: 32, height: 64, panel_width: 32, panel_height: 32, parallel_count: 2, panels: [[{ order: 0 }], [{ order: 0, parallel: 1 }]] }\nmatrix: { hardware_mapping: adafruit-hat }";
        assert!(matches!(settings(yaml, &Cli::default()), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_range_checks() {
        assert!(settings("matrix: { brightness: 0 }", &Cli::default()).is_err());
        assert!(settings("matrix: { pwm_bits: 12 }", &Cli::default()).is_err());
        assert!(settings("audio: { channels: 0 }", &Cli::default()).is_err());
        assert!(settings("spectrum: { display_depth: 100 }", &Cli::default()).is_err());
        assert!(settings("animation: { sets: [{ duration: 0, images: [a.bmp] }] }", &Cli::default()).is_err());
        assert!(settings("animation: { sets: [{ duration: 1, images: [] }] }", &Cli::default()).is_err());
    }

    #[test]
    fn test_bad_yaml() {
        assert!(matches!(parse_yaml("display: [1, 2"), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_missing_explicit_file() {
        let cli = Cli { config: Some(PathBuf::from("/nonexistent/lymatrix.yaml")), ..Default::default() };
        assert!(matches!(load_from(&cli), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "lymatrix", "--hardware-mapping", "adafruit-hat", "--no-hardware", "--pwm-bits", "7",
        ])
        .unwrap();
        assert_eq!(cli.hardware_mapping, Some(HardwareMappingKind::AdafruitHat));
        assert!(cli.no_hardware);
        assert_eq!(cli.pwm_bits, Some(7));
    }
}
