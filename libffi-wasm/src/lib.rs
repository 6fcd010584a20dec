//! Safe(r) wasm32 bindings for libffi’s calling-convention machinery:
//! dynamic calls to, and closures masquerading as, entries in a wasm
//! table.
//!
//! The goal of this crate is to make it easy to write code that
//! dynamically creates functions using the [C foreign function
//! interface library (libffi)](https://sourceware.org/libffi/),
//! adapted to a world where “native code pointer” means “wasm table
//! index”, and the actual `call_indirect` is always performed by a
//! host outside this crate’s control (a JS runtime, or a WASI-like
//! embedder).
//!
//! # Layers
//!
//! This crate has three layers, each built on top of the last:
//!
//!   * [`low`] is intended to be a thin, safe(r) wrapper around the
//!     wasm32 machine-dependent core in `libffi-wasm-sys`. It exposes
//!     the same [`CodePtr`](low::CodePtr) abstraction, `ffi_cif`
//!     preparation, dynamic call, and closure allocation primitives,
//!     but wraps them in `Result`s and takes care not to expose
//!     uninitialized memory to safe Rust.
//!
//!   * [`mod@middle`] is a medium-level API inspired by libffi’s own
//!     C API. It has less overhead than [`high`], but requires
//!     `unsafe` to use. It also facilitates working with types
//!     other than Rust’s native types, such as structs and complex
//!     numbers.
//!
//!   * [`mod@high`] is a highly safe, (mostly) automated API for
//!     generating Rust closures that can be called from C, and vice
//!     versa. Most of the time, this is the layer you should use,
//!     unless you need the additional flexibility offered by
//!     [`mod@middle`].
//!
//! Because there is no portable way to obtain a callable function
//! pointer from a dynamically-installed wasm32 function (the
//! `call_indirect` instruction always names an immediate, statically
//! known type and slot), the code pointer types in all three layers
//! identify a wasm table slot rather than anything directly callable
//! from Rust. Forward calls still work end to end — the host performs
//! the indirect call on our behalf — but a closure’s slot can only be
//! invoked by the host, never by handing it back into this crate.
//!
//! # Examples
//!
//! ```
//! use libffi_wasm::high::call;
//!
//! let slot = libffi_wasm_sys::host::mock::install_native(Box::new(
//!     |args: *const u8, _args_len: usize, results: *mut u8, _results_len: usize| unsafe {
//!         let m = i64::from_le_bytes(core::slice::from_raw_parts(args, 8).try_into().unwrap());
//!         let n = i64::from_le_bytes(
//!             core::slice::from_raw_parts(args.add(8), 8).try_into().unwrap(),
//!         );
//!         core::ptr::copy_nonoverlapping((m + n).to_le_bytes().as_ptr(), results, 8);
//!     },
//! ));
//!
//! let result: i64 = unsafe {
//!     call::call(
//!         call::CodePtr::from_table_index(slot),
//!         &[call::arg(&5i64), call::arg(&7i64)],
//!     )
//! };
//!
//! assert_eq!(12, result);
//! ```
//!
//! # Features
//!
//! This crate carries the same feature set as `libffi-wasm-sys`:
//!
//!   * `std` (on by default) links `std` for process-level aborts on
//!     fatal errors; without it, fatal errors trap instead.
//!   * `host-js` targets a JS-hosted wasm32 runtime (`wasm-bindgen`),
//!     where forward calls and closure installation go through
//!     `Function.prototype.apply` and a JS-side table.
//!   * `host-wasi` targets a WASI-like embedder that exposes the wasm
//!     table and an indirect-call import directly.
//!   * `complex` adds [`high::c_c32`] and [`high::c_c64`], laid out
//!     like C’s complex float/double but not ABI-correct for argument
//!     passing — see the type documentation.
//!   * `host-mock` (test-only) swaps in an in-process mock host so
//!     this crate’s own test suite, and the [`high::FnPtr1`]-and-
//!     friends `.call()` convenience methods, can exercise the full
//!     dynamic-call and closure-invocation paths without a real wasm
//!     runtime.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod high;
pub mod low;
pub mod middle;

pub use high::call::arg;
pub use middle::CodePtr;
