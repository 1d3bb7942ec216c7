// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted stand-in for a real port.
//!
//! Contexts are allocated like real ones (so allocation failure behaves the
//! same), but switching to one only records the event: control always stays
//! with the caller. This is enough to drive and observe the scheduler from
//! ordinary tests.
//!
//! Recorded state is thread-local, so tests running in parallel each see
//! their own.

use std::cell::Cell;

use abi::TaskEntry;

pub const MIN_STACK_SIZE: usize = 256;

thread_local! {
    static SWITCHES: Cell<usize> = const { Cell::new(0) };
    static RESCHEDULE_REQUESTS: Cell<usize> = const { Cell::new(0) };
    static FAIL_CONTEXT_ALLOC: Cell<bool> = const { Cell::new(false) };
    static NEXT_SERIAL: Cell<u32> = const { Cell::new(1) };
}

macro_rules! klog {
    ($($tt:tt)*) => {{
        #[cfg(feature = "klog-stdout")]
        std::println!($($tt)*);
        #[cfg(not(feature = "klog-stdout"))]
        let _ = format_args!($($tt)*);
    }};
}

#[derive(Debug)]
pub struct Context {
    /// Distinguishes contexts in debug output. The init context is 0.
    serial: u32,
    stack: Vec<u8>,
}

impl Context {
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }
}

pub fn init_context() -> Context {
    Context {
        serial: 0,
        stack: Vec::new(),
    }
}

pub fn create_context(_entry: TaskEntry, stacksize: usize) -> Option<Context> {
    if FAIL_CONTEXT_ALLOC.with(|f| f.replace(false)) {
        return None;
    }
    let size = stacksize.max(MIN_STACK_SIZE);
    let mut stack = Vec::new();
    stack.try_reserve_exact(size).ok()?;
    stack.resize(size, 0);

    let serial = NEXT_SERIAL.with(|n| {
        let s = n.get();
        n.set(s.wrapping_add(1));
        s
    });
    Some(Context {
        serial,
        stack,
    })
}

pub fn switch_to(next: &Context) {
    klog!("fake: switch to context {}", next.serial);
    SWITCHES.with(|s| s.set(s.get() + 1));
}

pub fn request_reschedule() {
    RESCHEDULE_REQUESTS.with(|r| r.set(r.get() + 1));
}

/// Makes the next `create_context` on this thread fail as if memory were
/// exhausted.
pub fn fail_next_context_alloc() {
    FAIL_CONTEXT_ALLOC.with(|f| f.set(true));
}

/// Returns and resets the number of context switches on this thread.
pub fn take_switch_count() -> usize {
    SWITCHES.with(|s| s.replace(0))
}

/// Returns and resets the number of deferred reschedule requests on this
/// thread.
pub fn take_reschedule_requests() -> usize {
    RESCHEDULE_REQUESTS.with(|r| r.replace(0))
}
