// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process-wide kernel.
//!
//! Applications (and the architecture layer's exception handlers) reach the
//! kernel through a single instance created by `kernel_init`. Access is
//! funneled through `with_kernel`, which holds a critical section for the
//! duration, so a kernel operation is never interleaved with another from an
//! interrupt handler.

use abi::{KernelError, TaskId};

use crate::config::Config;
use crate::kernel::Kernel;

/// The kernel singleton. `None` until `kernel_init`, and again after
/// `kernel_teardown`.
static KERNEL: spin::Mutex<Option<Kernel>> = spin::Mutex::new(None);

fn lock() -> spin::MutexGuard<'static, Option<Kernel>> {
    // We only ever take this inside a critical section, so it can only be
    // held already if kernel code has called back into `with_kernel`.
    match KERNEL.try_lock() {
        Some(guard) => guard,
        None => panic!("kernel entered recursively"),
    }
}

/// Runs `body` with exclusive access to the kernel, inside a critical
/// section.
///
/// Fails with `NotInitialized` if `kernel_init` hasn't run.
///
/// # Panics
///
/// If called from within `body`.
pub fn with_kernel<R>(
    body: impl FnOnce(&mut Kernel) -> Result<R, KernelError>,
) -> Result<R, KernelError> {
    critical_section::with(|_cs| match lock().as_mut() {
        Some(kernel) => body(kernel),
        None => Err(KernelError::NotInitialized),
    })
}

/// Creates the kernel with the default configuration and adopts the caller
/// as the init task.
///
/// May only succeed once (until `kernel_teardown`); later calls fail with
/// `AlreadyInitialized`.
pub fn kernel_init() -> Result<TaskId, KernelError> {
    kernel_init_with(Config::default())
}

/// `kernel_init`, with explicit limits.
pub fn kernel_init_with(config: Config) -> Result<TaskId, KernelError> {
    critical_section::with(|_cs| {
        let mut slot = lock();
        if slot.is_some() {
            klog!("kernel: kernel_init called twice");
            return Err(KernelError::AlreadyInitialized);
        }
        let mut kernel = Kernel::new(config);
        let init = kernel.init()?;
        *slot = Some(kernel);
        Ok(init)
    })
}

/// Starts scheduling. See `Kernel::start`.
pub fn kernel_start() -> Result<TaskId, KernelError> {
    with_kernel(Kernel::start)
}

/// Removes the kernel, returning it. Hosted programs and tests use this to
/// begin again from scratch; it has no use on a real target, where the
/// tasks' contexts are still in use.
pub fn kernel_teardown() -> Option<Kernel> {
    critical_section::with(|_cs| lock().take())
}
