// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use log::warn;

/// Moves the calling thread to the real-time FIFO scheduler so the decode
/// loop keeps up with the serial stream under load.
#[cfg(target_os = "linux")]
pub fn set_thread_priority() {
    let mut param = libc::sched_param { sched_priority: 10 };
    let thread = unsafe { libc::pthread_self() };
    let err = unsafe {
        libc::pthread_setschedparam(
            thread,
            libc::SCHED_FIFO,
            &mut param as *mut libc::sched_param,
        )
    };
    if err != 0 {
        let err = std::io::Error::from_raw_os_error(err);
        warn!("unable to set decode thread real-time fifo scheduler: {}", err);
    }
}

/// Real-time scheduling is only requested on Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_thread_priority() {}
