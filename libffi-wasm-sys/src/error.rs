//! The two error classes from spec.md §7: declarative return codes handed
//! back to the front-end, and fatal conditions that abort the process.

pub use crate::raw::Status;

/// Logs `msg` at `error` level and aborts. Every call site here indicates a
/// programmer or platform error, never a recoverable runtime condition
/// (spec.md §7): an unknown type kind reaching the machdep layer after
/// canonicalisation, a host primitive failure, or a CIF with an
/// unrecognised ABI tag.
#[cold]
pub fn fatal(msg: &str) -> ! {
    log::error!("libffi-wasm: fatal: {msg}");
    #[cfg(feature = "std")]
    {
        std::process::abort();
    }
    #[cfg(not(feature = "std"))]
    {
        // No portable stable abort in `core`; trap by looping forever so
        // the host's watchdog (or wasm `unreachable`, once stabilised for
        // this purpose) is what actually tears the instance down.
        loop {}
    }
}
