/*
 *  spectrum/events.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Amplitude classification with hysteresis and one-shot transition events
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
use serde::{Deserialize, Serialize};

/// Loudness classification of the newest spectrum row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmplitudeState {
    #[default]
    Standard,
    Quiet,
    Loud,
}

/// Transition between confirmed amplitude states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmplitudeEvent {
    #[default]
    None,
    DecreasedAmplitude,
    IncreasedAmplitude,
    ReturnToLevel,
}

/// Transition table between confirmed states
pub fn transition(from: AmplitudeState, to: AmplitudeState) -> AmplitudeEvent {
    use AmplitudeState::*;
    match (from, to) {
        (Standard, Quiet) | (Loud, Quiet) => AmplitudeEvent::DecreasedAmplitude,
        (Standard, Loud) | (Quiet, Loud) => AmplitudeEvent::IncreasedAmplitude,
        (Quiet, Standard) | (Loud, Standard) => AmplitudeEvent::ReturnToLevel,
        _ => AmplitudeEvent::None,
    }
}

/// Min, max and mean of one spectrum row
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BinStats {
    pub min: i32,
    pub max: i32,
    pub avg: f32,
}

impl BinStats {
    pub fn of(row: &[i32]) -> Self {
        if row.is_empty() {
            return Self::default();
        }
        let min = row.iter().copied().min().unwrap_or(0);
        let max = row.iter().copied().max().unwrap_or(0);
        let avg = row.iter().map(|&v| v as f32).sum::<f32>() / row.len() as f32;
        Self { min, max, avg }
    }
}

/// Seconds a state must be seen before it is confirmed, and seconds it then
/// stays confirmed before anything may replace it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hysteresis {
    pub sustain: f64,
    pub hold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Row maximum below this is quiet
    pub quiet_max: i32,
    /// Row maximum above this, together with a mean above `loud_avg`, is loud
    pub loud_max: i32,
    pub loud_avg: f32,
    pub standard: Hysteresis,
    pub quiet: Hysteresis,
    pub loud: Hysteresis,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            quiet_max: 20,
            loud_max: 95,
            loud_avg: 40.0,
            standard: Hysteresis { sustain: 0.5, hold: 1.0 },
            quiet: Hysteresis { sustain: 2.0, hold: 2.0 },
            loud: Hysteresis { sustain: 0.25, hold: 1.0 },
        }
    }
}

impl EventConfig {
    pub fn hysteresis(&self, state: AmplitudeState) -> Hysteresis {
        match state {
            AmplitudeState::Standard => self.standard,
            AmplitudeState::Quiet => self.quiet,
            AmplitudeState::Loud => self.loud,
        }
    }

    pub fn classify(&self, stats: &BinStats) -> AmplitudeState {
        if stats.max < self.quiet_max {
            AmplitudeState::Quiet
        } else if stats.max > self.loud_max && stats.avg > self.loud_avg {
            AmplitudeState::Loud
        } else {
            AmplitudeState::Standard
        }
    }
}

/// A state and the time (seconds) it was entered
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedState {
    pub state: AmplitudeState,
    pub since: f64,
}

/// Debounces the per-row classification into confirmed states.
///
/// Time is passed in by the caller so the detector runs on synthetic clocks.
#[derive(Debug, Clone)]
pub struct EventDetector {
    config: EventConfig,
    confirmed: TrackedState,
    pending: TrackedState,
}

impl EventDetector {
    pub fn new(config: EventConfig) -> Self {
        let start = TrackedState { state: AmplitudeState::Standard, since: 0.0 };
        Self { config, confirmed: start, pending: start }
    }

    pub fn config(&self) -> &EventConfig { &self.config }
    pub fn confirmed(&self) -> TrackedState { self.confirmed }
    pub fn pending(&self) -> TrackedState { self.pending }

    /// Feed one row's statistics at `now` and return the resulting transition
    pub fn update(&mut self, stats: &BinStats, now: f64) -> AmplitudeEvent {
        let candidate = self.config.classify(stats);
        if candidate != self.pending.state {
            self.pending = TrackedState { state: candidate, since: now };
        }

        let previous = self.confirmed.state;
        if self.pending.state != previous {
            let sustained = now - self.pending.since > self.config.hysteresis(self.pending.state).sustain;
            let held = now - self.confirmed.since > self.config.hysteresis(previous).hold;
            if sustained && held {
                self.confirmed = TrackedState { state: self.pending.state, since: now };
                debug!("amplitude {:?} -> {:?} at {:.2}s", previous, self.confirmed.state, now);
            }
        }

        transition(previous, self.confirmed.state)
    }
}
