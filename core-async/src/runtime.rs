//! Runtime utilities that abstract over the underlying async executor.
//!
//! Downstream crates never build a Tokio runtime themselves; the
//! `#[core_async::main]` and `#[core_async::test]` macros expand to
//! [`block_on`].

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh current-thread runtime.
///
/// # Panics
///
/// Panics if the runtime cannot be constructed (e.g. the process is out of
/// file descriptors for the I/O driver).
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}

/// Returns `true` when called from inside a running runtime.
pub fn in_runtime() -> bool {
    Handle::try_current().is_ok()
}
