/*
 *  animation.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Bitmap sets played back as ping-pong animations
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

use log::info;
use std::path::Path;

use crate::bitmap::{Bitmap, BitmapError};

/// Frames of one animation, swept forward then back over `duration` seconds
#[derive(Debug, Clone)]
pub struct BitmapSet {
    duration: f64,
    images: Vec<Bitmap>,
}

impl BitmapSet {
    pub fn new(duration: f64) -> Self {
        Self { duration, images: Vec::new() }
    }

    pub fn add(&mut self, bitmap: Bitmap) {
        self.images.push(bitmap);
    }

    pub fn get(&self, index: usize) -> Option<&Bitmap> {
        self.images.get(index)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Frame to show at `seconds`: `0, 1, .., n-1, n-2, .., 1` once per duration
    pub fn get_index(&self, seconds: f64) -> usize {
        let count = self.images.len() as i64;
        // timing works in hundredths of a second
        let weight = (100.0 * self.duration) as i64;
        if count <= 1 || weight <= 0 {
            return 0;
        }
        let value = ((seconds * 100.0) as i64).rem_euclid(weight);
        let loop_count = (count - 2) * 2 + 2;
        let divisor = (weight / loop_count).max(1);
        let mut index = value / divisor;
        if index >= count {
            index = count - 2 - (index - count);
        }
        index.clamp(0, count - 1) as usize
    }
}

/// Owns every bitmap set
#[derive(Debug, Clone, Default)]
pub struct BitmapManager {
    sets: Vec<BitmapSet>,
}

impl BitmapManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an empty set, returning its index
    pub fn create_set(&mut self, duration: f64) -> usize {
        self.sets.push(BitmapSet::new(duration));
        self.sets.len() - 1
    }

    /// Append an image to a set. Returns false for an unknown set.
    pub fn add_image(&mut self, set: usize, bitmap: Bitmap) -> bool {
        match self.sets.get_mut(set) {
            Some(s) => {
                s.add(bitmap);
                true
            }
            None => false,
        }
    }

    /// Load a BMP file into a set
    pub fn load_image(&mut self, set: usize, path: &Path, width: usize, height: usize) -> Result<(), BitmapError> {
        let bitmap = Bitmap::open(path, width, height)?;
        info!("set {}: {}", set, path.display());
        self.add_image(set, bitmap);
        Ok(())
    }

    pub fn get(&self, set: usize, index: usize) -> Option<&Bitmap> {
        self.sets.get(set).and_then(|s| s.get(index))
    }

    pub fn get_index(&self, set: usize, seconds: f64) -> usize {
        self.sets.get(set).map_or(0, |s| s.get_index(seconds))
    }

    /// Frame of `set` to show at `seconds`
    pub fn frame(&self, set: usize, seconds: f64) -> Option<&Bitmap> {
        self.get(set, self.get_index(set, seconds))
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn image_count(&self, set: usize) -> usize {
        self.sets.get(set).map_or(0, BitmapSet::image_count)
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }
}
