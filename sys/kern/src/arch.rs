// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! For this to work, each architecture support module must define the same set
//! of names:
//!
//! - `Context`: saved execution state of one task, including its stack.
//! - `MIN_STACK_SIZE`: smallest stack `create_context` will hand out.
//! - `init_context()`: adopts the caller's own execution state as the init
//!   task's context.
//! - `create_context(entry, stacksize)`: builds a context that begins
//!   executing `entry` on first switch, or `None` if memory ran out.
//! - `switch_to(&Context)`: arranges for the given context to own the CPU.
//! - `request_reschedule()`: asks for the scheduler to be run once interrupt
//!   handling is finished.
//! - `klog!`: kernel log output.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        #[macro_use]
        pub mod arm_m;
        pub use arm_m::*;
    } else if #[cfg(not(target_os = "none"))] {
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    } else {
        compile_error!("support for this architecture not implemented");
    }
}
