/*
 *  display/thread.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Real-time scheduling helpers for the refresh thread
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

use log::{info, warn};

use crate::display::error::DisplayError;

/// SCHED_FIFO priority of the refresh thread
pub const REFRESH_PRIORITY: i32 = 99;

/// Switch the calling thread to SCHED_FIFO at `priority`
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> Result<(), DisplayError> {
    let param = libc::sched_param { sched_priority: priority };
    // Safety: pthread_self is always valid for the calling thread and param outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(DisplayError::Other(format!(
            "SCHED_FIFO priority {}: {}", priority, std::io::Error::from_raw_os_error(rc)
        )));
    }
    Ok(())
}

/// Restrict the calling thread to a single CPU core
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> Result<(), DisplayError> {
    // Safety: cpu_set_t is plain data, zeroed is the empty set.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(DisplayError::Other(format!(
            "CPU affinity {}: {}", cpu, std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(_priority: i32) -> Result<(), DisplayError> {
    Err(DisplayError::Other("real-time scheduling needs Linux".into()))
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: usize) -> Result<(), DisplayError> {
    Err(DisplayError::Other("CPU affinity needs Linux".into()))
}

/// Best effort real-time setup, the refresh keeps running without it
pub fn make_realtime(priority: i32, cpu: Option<usize>) {
    match set_realtime_priority(priority) {
        Ok(()) => info!("refresh thread running SCHED_FIFO priority {}", priority),
        Err(e) => warn!("refresh thread stays on normal scheduling ({}), expect flicker", e),
    }
    if let Some(cpu) = cpu {
        let available = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        if cpu >= available {
            warn!("refresh CPU {} not present ({} cores), not pinning", cpu, available);
            return;
        }
        match pin_to_cpu(cpu) {
            Ok(()) => info!("refresh thread pinned to CPU {}", cpu),
            Err(e) => warn!("cannot pin refresh thread: {}", e),
        }
    }
}
