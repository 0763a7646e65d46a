/*
 *  audio.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  PCM sample capture from stdin, a file or a FIFO
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
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::PathBuf;
use thiserror::Error;

/// Device name that reads from standard input
pub const STDIN_DEVICE: &str = "-";

const MAX_CHANNELS: usize = 8;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("cannot open audio source {device}: {source}")]
    Open { device: String, #[source] source: io::Error },

    #[error("audio read failed: {0}")]
    Io(#[from] io::Error),

    #[error("audio stream ended after {got} of {wanted} frames")]
    ShortRead { got: usize, wanted: usize },

    #[error("channel count must be 1..={max}, got {0}", max = MAX_CHANNELS)]
    Channels(usize),
}

/// Audio capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// `-` for stdin, otherwise a file or FIFO path (e.g. fed by `arecord -t raw -f S16_LE`)
    pub device: String,
    /// Interleaved channels in the stream, mixed down to mono
    pub channels: usize,
    /// Restart regular files at end of stream
    pub looping: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { device: STDIN_DEVICE.to_string(), channels: 1, looping: false }
    }
}

/// Anything that fills a block of mono samples
pub trait SampleSource: Send {
    fn name(&self) -> &str;

    /// Block until `out` is full
    fn read(&mut self, out: &mut [i16]) -> Result<(), AudioError>;
}

/// Interleaved signed 16 bit little endian PCM
pub struct PcmSource {
    name: String,
    reader: Box<dyn Read + Send>,
    channels: usize,
    reopen: Option<PathBuf>,
    bytes: Vec<u8>,
}

impl PcmSource {
    pub fn open(config: &AudioConfig) -> Result<Self, AudioError> {
        if config.device == STDIN_DEVICE {
            info!("reading {}-channel PCM from stdin", config.channels);
            return Self::from_reader("stdin", Box::new(io::stdin()), config.channels);
        }

        let path = PathBuf::from(&config.device);
        let file = File::open(&path).map_err(|source| AudioError::Open {
            device: config.device.clone(),
            source,
        })?;
        let is_file = file.metadata().map(|m| m.is_file()).unwrap_or(false);
        info!("reading {}-channel PCM from {}", config.channels, path.display());

        let mut source = Self::from_reader(&config.device, Box::new(BufReader::new(file)), config.channels)?;
        if config.looping && is_file {
            source.reopen = Some(path);
        }
        Ok(source)
    }

    pub fn from_reader(name: &str, reader: Box<dyn Read + Send>, channels: usize) -> Result<Self, AudioError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(AudioError::Channels(channels));
        }
        Ok(Self { name: name.to_string(), reader, channels, reopen: None, bytes: Vec::new() })
    }

    // read as much as possible, returns bytes read before end of stream
    fn fill(&mut self, from: usize) -> Result<usize, AudioError> {
        let mut filled = from;
        while filled < self.bytes.len() {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl SampleSource for PcmSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, out: &mut [i16]) -> Result<(), AudioError> {
        let frame_bytes = self.channels * 2;
        self.bytes.resize(out.len() * frame_bytes, 0);

        let mut filled = self.fill(0)?;
        if filled < self.bytes.len() {
            if let Some(path) = self.reopen.clone() {
                debug!("{}: end of stream, looping", self.name);
                let file = File::open(&path)?;
                self.reader = Box::new(BufReader::new(file));
                filled = self.fill(filled)?;
            }
        }
        if filled < self.bytes.len() {
            return Err(AudioError::ShortRead { got: filled / frame_bytes, wanted: out.len() });
        }

        let channels = self.channels as i32;
        for (sample, frame) in out.iter_mut().zip(self.bytes.chunks_exact(frame_bytes)) {
            let sum: i32 = frame
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
                .sum();
            *sample = (sum / channels) as i16;
        }
        Ok(())
    }
}
