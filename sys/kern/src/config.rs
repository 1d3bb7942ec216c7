// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel configuration.
//!
//! Defaults are fixed at build time from the `POSTBOX_MAX_TASKS`,
//! `POSTBOX_MAX_MESSAGES` and `POSTBOX_TRACE_DEPTH` environment variables (see
//! `build.rs`); the table limits can also be overridden per `Kernel` at
//! runtime.

include!(concat!(env!("OUT_DIR"), "/consts.rs"));

/// Largest table size a handle can address. The last index is kept free so
/// that it never collides with the ready queue's end-of-list marker.
pub const MAX_HANDLES: usize = (1 << abi::TaskId::INDEX_BITS) - 1;

static_assertions::const_assert!(DEFAULT_MAX_TASKS <= MAX_HANDLES);
static_assertions::const_assert!(DEFAULT_MAX_MESSAGES <= MAX_HANDLES);
static_assertions::const_assert!(TRACE_DEPTH > 0);

/// Resource limits for one kernel instance.
///
/// Limits above `MAX_HANDLES` are clamped when the kernel is created.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Maximum number of live tasks, counting the init task.
    pub max_tasks: usize,
    /// Maximum number of live message envelopes.
    pub max_messages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_tasks: DEFAULT_MAX_TASKS,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}
