/*
 *  display/drivers/hub75.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  HUB75 bit-plane output over memory mapped GPIO
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
use std::hint;
use std::time::{Duration, Instant};

use crate::display::error::DisplayError;
use crate::display::framebuffer::{FrameGeometry, Framebuffer, ScanMode, BIT_PLANES};
use crate::display::gpio::{Gpio, HardwareMapping};
use crate::display::traits::MatrixOutput;

/// Default on-time of the least significant bit plane
pub const DEFAULT_LSB_NANOSECONDS: u32 = 130;

/// Shift the bit planes out to HUB75 panels.
///
/// Per double row and bit plane: clock every column into the shift registers,
/// latch them with the row address set, then enable the LEDs for
/// `lsb_ns << plane` so each plane contributes its binary weight.
pub struct Hub75Output {
    mapping: &'static HardwareMapping,
    lsb_ns: u32,
    gpio: Option<Gpio>,
    color_clock_mask: u32,
    row_mask: u32,
    row_addresses: Vec<u32>,
    scan_order: Vec<usize>,
}

impl Hub75Output {
    pub fn new(mapping: &'static HardwareMapping, lsb_ns: u32) -> Self {
        Self {
            mapping,
            lsb_ns: lsb_ns.max(50),
            gpio: None,
            color_clock_mask: 0,
            row_mask: 0,
            row_addresses: Vec::new(),
            scan_order: Vec::new(),
        }
    }

    fn pulse(&mut self, plane: u8) -> Result<(), DisplayError> {
        let gpio = self.gpio.as_mut().ok_or_else(not_initialized)?;
        let on_time = Duration::from_nanos((self.lsb_ns as u64) << plane);
        // output enable is active low
        gpio.clear_bits(self.mapping.output_enable);
        spin_for(on_time);
        gpio.set_bits(self.mapping.output_enable);
        Ok(())
    }
}

fn not_initialized() -> DisplayError {
    DisplayError::GpioError("HUB75 output used before init".into())
}

fn spin_for(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        hint::spin_loop();
    }
}

/// Double row emission order for a scan mode
pub fn scan_order(double_rows: usize, mode: ScanMode) -> Vec<usize> {
    match mode {
        ScanMode::Progressive => (0..double_rows).collect(),
        ScanMode::Interlaced => (0..double_rows)
            .step_by(2)
            .chain((1..double_rows).step_by(2))
            .collect(),
    }
}

impl MatrixOutput for Hub75Output {
    fn name(&self) -> &str {
        self.mapping.name
    }

    fn init(&mut self, geometry: &FrameGeometry) -> Result<(), DisplayError> {
        if !std::ptr::eq(geometry.mapping, self.mapping) {
            return Err(DisplayError::InvalidConfiguration(format!(
                "frame mapping '{}' does not match output mapping '{}'",
                geometry.mapping.name, self.mapping.name
            )));
        }
        let mut gpio = Gpio::open()?;
        let wanted = self.mapping.output_bits(geometry.double_rows(), geometry.parallel);
        let claimed = gpio.init_outputs(wanted);
        if claimed != wanted {
            return Err(DisplayError::InitializationFailed(format!(
                "GPIO pins {:#010x} of mapping '{}' are not available",
                wanted & !claimed, self.mapping.name
            )));
        }

        // LEDs dark until the first plane is latched
        gpio.set_bits(self.mapping.output_enable);

        self.color_clock_mask = self.mapping.color_mask(geometry.parallel) | self.mapping.clock;
        self.row_mask = self.mapping.row_mask();
        self.row_addresses = (0..geometry.double_rows())
            .map(|d| self.mapping.row_address(d))
            .collect();
        self.scan_order = scan_order(geometry.double_rows(), geometry.scan_mode);
        self.gpio = Some(gpio);

        info!(
            "HUB75 output '{}': {} double rows, {} parallel, {} pwm bits, lsb {}ns",
            self.mapping.name, geometry.double_rows(), geometry.parallel,
            geometry.pwm_bits, self.lsb_ns
        );
        Ok(())
    }

    fn emit(&mut self, frame: &Framebuffer) -> Result<(), DisplayError> {
        if self.gpio.is_none() {
            return Err(not_initialized());
        }
        let min_plane = frame.geometry().min_bit_plane();
        let clock = self.mapping.clock;
        let strobe = self.mapping.strobe;

        for i in 0..self.scan_order.len() {
            let double_row = self.scan_order[i];
            let address = self.row_addresses[double_row];
            for plane in min_plane..BIT_PLANES {
                {
                    let gpio = self.gpio.as_mut().ok_or_else(not_initialized)?;
                    for &word in frame.plane(double_row, plane) {
                        gpio.write_masked_bits(word, self.color_clock_mask);
                        gpio.set_bits(clock);
                    }
                    gpio.clear_bits(self.color_clock_mask);

                    gpio.write_masked_bits(address, self.row_mask);
                    gpio.set_bits(strobe);
                    gpio.clear_bits(strobe);
                }
                self.pulse(plane)?;
            }
        }
        Ok(())
    }
}
