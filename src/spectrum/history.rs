/*
 *  spectrum/history.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Frequency bin history, newest row first
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

/// `depth x count` history of bucket values. Row 0 is the newest sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinHistory {
    depth: usize,
    count: usize,
    values: Vec<i32>,
}

impl BinHistory {
    pub fn new(depth: usize, count: usize) -> Self {
        Self { depth, count, values: vec![0; depth * count] }
    }

    pub fn depth(&self) -> usize { self.depth }
    pub fn count(&self) -> usize { self.count }

    pub fn row(&self, age: usize) -> &[i32] {
        &self.values[age * self.count..(age + 1) * self.count]
    }

    pub fn row_mut(&mut self, age: usize) -> &mut [i32] {
        &mut self.values[age * self.count..(age + 1) * self.count]
    }

    #[inline]
    pub fn get(&self, age: usize, bucket: usize) -> i32 {
        self.values[age * self.count + bucket]
    }

    #[inline]
    pub fn set(&mut self, age: usize, bucket: usize, value: i32) {
        self.values[age * self.count + bucket] = value;
    }

    /// Age every row by one, dropping the oldest. Row 0 keeps its values.
    pub fn archive(&mut self) {
        if self.depth > 1 {
            let keep = (self.depth - 1) * self.count;
            self.values.copy_within(0..keep, self.count);
        }
    }
}
