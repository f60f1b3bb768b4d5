// Copyright 2025 corert contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Thread-affinity helpers for pinning a `Context`'s worker thread to a
//! specific CPU core.

use crate::error::Error;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn set_affinity(index: usize) -> Result<(), Error> {
            use std::mem;
            unsafe {
                let mut set: libc::cpu_set_t = mem::zeroed();
                libc::CPU_ZERO(&mut set);
                libc::CPU_SET(index, &mut set);
                let rc = libc::pthread_setaffinity_np(
                    libc::pthread_self(),
                    mem::size_of::<libc::cpu_set_t>(),
                    &set,
                );
                if rc != 0 {
                    return Err(Error::system(rc));
                }
            }
            Ok(())
        }
    } else if #[cfg(target_os = "windows")] {
        fn set_affinity(index: usize) -> Result<(), Error> {
            use windows_sys::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};
            let mask = 1usize << index;
            unsafe {
                if SetThreadAffinityMask(GetCurrentThread(), mask) == 0 {
                    return Err(Error::last_os_error());
                }
            }
            Ok(())
        }
    } else {
        // No hard affinity API on this platform (e.g. macOS, where
        // thread affinity tags are only a scheduling hint); best-effort
        // no-op.
        fn set_affinity(_index: usize) -> Result<(), Error> {
            Ok(())
        }
    }
}

/// Pins the calling thread to the given zero-based CPU core index.
pub fn set_current_thread_affinity(index: usize) -> Result<(), Error> {
    set_affinity(index)
}
