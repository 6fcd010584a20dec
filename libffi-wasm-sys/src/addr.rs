//! Conversions between a native pointer and the fixed-width wasm32 address
//! stored in the machine-dependent ABI structures.
//!
//! On an actual wasm32 build a pointer already is 32 bits, so these are a
//! lossless identity cast, matching the byte-offset contract
//! `raw::ffi_cif` publishes. Off wasm32 — the `host-mock` test harness
//! runs this crate's own logic natively, without a wasm runtime — a real
//! pointer routinely exceeds `u32::MAX` (stack addresses under ASLR
//! reliably do), so truncating one would silently corrupt it. A small
//! process-wide table hands out a 32-bit handle per pointer instead and
//! resolves it back, keeping the round trip lossless regardless of host
//! pointer width.

/// A wasm32 linear-memory address, or (off wasm32) a handle into the
/// fallback address table.
pub type Addr = u32;

#[cfg(target_arch = "wasm32")]
pub fn to_addr<T>(ptr: *mut T) -> Addr {
    ptr as u32
}

#[cfg(target_arch = "wasm32")]
pub fn from_addr<T>(addr: Addr) -> *mut T {
    addr as *mut T
}

#[cfg(all(not(target_arch = "wasm32"), feature = "std"))]
mod table {
    use super::Addr;
    use std::sync::Mutex;
    use std::vec::Vec;

    static SLOTS: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    pub fn intern(addr: usize) -> Addr {
        if addr == 0 {
            return 0;
        }
        let mut slots = SLOTS.lock().unwrap();
        if let Some(pos) = slots.iter().position(|&a| a == addr) {
            return (pos + 1) as Addr;
        }
        slots.push(addr);
        Addr::try_from(slots.len()).expect("address table overflowed u32 handles")
    }

    pub fn resolve(addr: Addr) -> usize {
        if addr == 0 {
            return 0;
        }
        let slots = SLOTS.lock().unwrap();
        slots[addr as usize - 1]
    }
}

#[cfg(all(not(target_arch = "wasm32"), feature = "std"))]
pub fn to_addr<T>(ptr: *mut T) -> Addr {
    table::intern(ptr as usize)
}

#[cfg(all(not(target_arch = "wasm32"), feature = "std"))]
pub fn from_addr<T>(addr: Addr) -> *mut T {
    table::resolve(addr) as *mut T
}

// Neither wasm32 nor `std`: an unsupported configuration in practice (the
// JS/WASI hosts need wasm32 and `host-mock` needs `std`), kept compiling
// with the same best-effort cast the pre-table code used everywhere.
#[cfg(all(not(target_arch = "wasm32"), not(feature = "std")))]
pub fn to_addr<T>(ptr: *mut T) -> Addr {
    ptr as usize as Addr
}

#[cfg(all(not(target_arch = "wasm32"), not(feature = "std")))]
pub fn from_addr<T>(addr: Addr) -> *mut T {
    addr as usize as *mut T
}

#[cfg(all(test, not(target_arch = "wasm32"), feature = "std"))]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_high_stack_address() {
        let local = 0u64;
        let ptr = &local as *const u64 as *mut u64;
        let addr = to_addr(ptr);
        assert_eq!(from_addr::<u64>(addr), ptr);
    }

    #[test]
    fn null_maps_to_zero() {
        assert_eq!(to_addr(core::ptr::null_mut::<u64>()), 0);
        assert!(from_addr::<u64>(0).is_null());
    }

    #[test]
    fn repeated_interning_is_stable() {
        let local = 0u64;
        let ptr = &local as *const u64 as *mut u64;
        assert_eq!(to_addr(ptr), to_addr(ptr));
    }
}
