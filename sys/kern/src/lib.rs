// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Postbox kernel.
//!
//! A small preemptive kernel: tasks with static priorities, per-task
//! mailboxes carrying ownership-tracked message envelopes, and per-task
//! signal bits. Messages and signals are the only reasons a task blocks, and
//! blocking and waking are scheduler operations.
//!
//! Everything outside `arch` is portable, and is tested on the host against
//! the `fake` architecture.
//!
//! # Design principles
//!
//! 1. No raw references between kernel objects. Tasks and messages live in
//!    generational tables and refer to each other by handle, and a stale
//!    handle is an error, not a use-after-free.
//! 2. Every refusal is reported. The kernel doesn't panic on caller errors;
//!    panics mean a kernel bug.
//! 3. One kernel object, explicitly created. Tests build as many independent
//!    `Kernel`s as they like; applications use the singleton in `startup`.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

#[macro_use]
pub mod arch;
#[macro_use]
pub mod trace;

pub mod config;
pub mod kernel;
pub mod msg;
pub mod ready;
pub mod startup;
pub mod syscalls;
pub mod table;
pub mod task;

pub use config::Config;
pub use kernel::Kernel;
pub use syscalls::Wait;
pub use task::Wakeup;
