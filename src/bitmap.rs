/*
 *  bitmap.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Raw 24-bit BMP frames for the animation sets
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
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER_LEN: usize = 54;
const WIDTH_OFFSET: usize = 18;
const HEIGHT_OFFSET: usize = 22;
const BPP_OFFSET: usize = 28;

#[derive(Debug, Error)]
pub enum BitmapError {
    #[error("cannot read bitmap {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("{path}: not a BMP file")]
    Signature { path: PathBuf },

    #[error("{path}: {bits} bits per pixel, only 24 is supported")]
    Depth { path: PathBuf, bits: u16 },

    #[error("{path}: image is {found_width}x{found_height}, expected {width}x{height}")]
    Dimensions { path: PathBuf, width: usize, height: usize, found_width: i64, found_height: i64 },

    #[error("{path}: pixel data truncated, {expected} bytes needed, {actual} present")]
    Truncated { path: PathBuf, expected: usize, actual: usize },
}

/// An RGB image stored top-down, row-major, three bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

fn le_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Bitmap {
    /// Load an uncompressed 24-bit BMP that must be exactly `width x height`
    pub fn open(path: impl AsRef<Path>, width: usize, height: usize) -> Result<Self, BitmapError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| BitmapError::Io { path: path.to_path_buf(), source })?;
        let bitmap = Self::decode(&bytes, path, width, height)?;
        debug!("loaded bitmap {} ({}x{})", path.display(), width, height);
        Ok(bitmap)
    }

    /// Decode BMP bytes; `path` only labels errors
    pub fn decode(bytes: &[u8], path: &Path, width: usize, height: usize) -> Result<Self, BitmapError> {
        if bytes.len() < HEADER_LEN || &bytes[0..2] != b"BM" {
            return Err(BitmapError::Signature { path: path.to_path_buf() });
        }
        let bits = u16::from_le_bytes([bytes[BPP_OFFSET], bytes[BPP_OFFSET + 1]]);
        if bits != 24 {
            return Err(BitmapError::Depth { path: path.to_path_buf(), bits });
        }

        let found_width = le_i32(bytes, WIDTH_OFFSET) as i64;
        let found_height = le_i32(bytes, HEIGHT_OFFSET) as i64;
        // negative height marks a top-down file
        let top_down = found_height < 0;
        if found_width != width as i64 || found_height.abs() != height as i64 {
            return Err(BitmapError::Dimensions {
                path: path.to_path_buf(), width, height, found_width, found_height,
            });
        }

        let row_padded = (width * 3 + 3) & !3;
        let expected = HEADER_LEN + row_padded * height;
        if bytes.len() < expected {
            return Err(BitmapError::Truncated { path: path.to_path_buf(), expected, actual: bytes.len() });
        }

        let mut data = vec![0u8; width * height * 3];
        for file_row in 0..height {
            let y = if top_down { file_row } else { height - 1 - file_row };
            let src = &bytes[HEADER_LEN + file_row * row_padded..][..width * 3];
            let dst = &mut data[y * width * 3..][..width * 3];
            for (bgr, rgb) in src.chunks_exact(3).zip(dst.chunks_exact_mut(3)) {
                rgb[0] = bgr[2];
                rgb[1] = bgr[1];
                rgb[2] = bgr[0];
            }
        }

        Ok(Self { width, height, data })
    }

    /// Build from top-down RGB triples
    pub fn from_rgb(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        (data.len() == width * height * 3).then_some(Self { width, height, data })
    }

    pub fn width(&self) -> usize { self.width }
    pub fn height(&self) -> usize { self.height }

    #[inline]
    pub fn get_pixel(&self, x: usize, y: usize) -> (u8, u8, u8) {
        debug_assert!(x < self.width && y < self.height);
        let i = (y * self.width + x) * 3;
        (self.data[i], self.data[i + 1], self.data[i + 2])
    }
}
