//! Spin-wait hint.
//!
//! Every wait in this crate is a busy spin; this is the single place that
//! issues the CPU relax hint (SSE `pause`, ARM `yield`, RISC-V `pause`, or
//! a no-op on unknown targets). Under loom the hint yields to the model
//! scheduler instead, so blocking operations stay explorable.

/// Issue one spin-wait hint.
///
/// Callers must pair this with a check of the relevant closed flag so that
/// no spin outlives shutdown.
#[inline]
pub(crate) fn relax() {
    #[cfg(not(loom))]
    std::hint::spin_loop();
    #[cfg(loom)]
    loom::thread::yield_now();
}
