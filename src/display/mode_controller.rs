/*
 *  display/mode_controller.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display mode controller driven by amplitude events
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

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::spectrum::AmplitudeEvent;

/// How a frame is painted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Tinted bitmap only
    #[default]
    Bitmap,
    /// Dimmed bitmap with a contracting circle
    LowAmplitude,
    /// Bitmap with a radial border glow
    HighAmplitude,
}

/// Configuration for display mode controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeControllerConfig {
    /// Minimum seconds a bitmap set stays up before a quiet spell rotates it
    pub min_set_duration: f64,
}

impl Default for ModeControllerConfig {
    fn default() -> Self {
        Self { min_set_duration: 10.0 }
    }
}

/// Display mode controller - picks the rendering mode and bitmap set from amplitude events
#[derive(Debug, Clone)]
pub struct DisplayModeController {
    config: ModeControllerConfig,
    set_count: usize,
    current_mode: DisplayMode,
    set_index: usize,
    last_set_change: f64,
}

impl DisplayModeController {
    /// Create a new display mode controller rotating over `set_count` bitmap sets
    pub fn new(config: ModeControllerConfig, set_count: usize) -> Self {
        Self {
            config,
            set_count,
            current_mode: DisplayMode::Bitmap,
            set_index: 0,
            last_set_change: 0.0,
        }
    }

    /// Get current display mode
    pub fn current_mode(&self) -> DisplayMode {
        self.current_mode
    }

    /// Bitmap set currently shown
    pub fn set_index(&self) -> usize {
        self.set_index
    }

    /// Apply one event at `seconds`. Returns true if the mode changed.
    pub fn handle_event(&mut self, event: AmplitudeEvent, seconds: f64) -> bool {
        let new_mode = match event {
            AmplitudeEvent::DecreasedAmplitude => {
                self.rotate_set(seconds);
                DisplayMode::LowAmplitude
            }
            AmplitudeEvent::ReturnToLevel => DisplayMode::Bitmap,
            AmplitudeEvent::IncreasedAmplitude => DisplayMode::HighAmplitude,
            AmplitudeEvent::None => return false,
        };

        if new_mode != self.current_mode {
            info!("Display mode changed: {:?} -> {:?}", self.current_mode, new_mode);
            self.current_mode = new_mode;
            true
        } else {
            false
        }
    }

    fn rotate_set(&mut self, seconds: f64) {
        if self.set_count == 0 {
            return;
        }
        if seconds - self.last_set_change > self.config.min_set_duration {
            self.set_index = (self.set_index + 1) % self.set_count;
            self.last_set_change = seconds;
            debug!("bitmap set -> {} at {:.1}s", self.set_index, seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(sets: usize) -> DisplayModeController {
        DisplayModeController::new(ModeControllerConfig { min_set_duration: 5.0 }, sets)
    }

    #[test]
    fn test_event_to_mode() {
        let mut c = controller(2);
        assert_eq!(c.current_mode(), DisplayMode::Bitmap);

        assert!(c.handle_event(AmplitudeEvent::IncreasedAmplitude, 1.0));
        assert_eq!(c.current_mode(), DisplayMode::HighAmplitude);

        assert!(c.handle_event(AmplitudeEvent::ReturnToLevel, 2.0));
        assert_eq!(c.current_mode(), DisplayMode::Bitmap);

        assert!(c.handle_event(AmplitudeEvent::DecreasedAmplitude, 3.0));
        assert_eq!(c.current_mode(), DisplayMode::LowAmplitude);
    }

    #[test]
    fn test_none_keeps_mode() {
        let mut c = controller(2);
        c.handle_event(AmplitudeEvent::IncreasedAmplitude, 1.0);
        assert!(!c.handle_event(AmplitudeEvent::None, 2.0));
        assert_eq!(c.current_mode(), DisplayMode::HighAmplitude);
    }

    #[test]
    fn test_quiet_spell_rotates_set_after_min_duration() {
        let mut c = controller(3);

        // too early
        c.handle_event(AmplitudeEvent::DecreasedAmplitude, 4.0);
        assert_eq!(c.set_index(), 0);

        c.handle_event(AmplitudeEvent::DecreasedAmplitude, 6.0);
        assert_eq!(c.set_index(), 1);

        c.handle_event(AmplitudeEvent::DecreasedAmplitude, 8.0);
        assert_eq!(c.set_index(), 1);

        c.handle_event(AmplitudeEvent::DecreasedAmplitude, 11.5);
        c.handle_event(AmplitudeEvent::DecreasedAmplitude, 17.0);
        // wraps around
        assert_eq!(c.set_index(), 0);
    }

    #[test]
    fn test_no_sets_never_rotates() {
        let mut c = controller(0);
        c.handle_event(AmplitudeEvent::DecreasedAmplitude, 100.0);
        assert_eq!(c.set_index(), 0);
    }
}
