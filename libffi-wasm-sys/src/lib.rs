//! Machine-dependent wasm32 core for libffi.
//!
//! This crate does not itself describe C types, CIFs, or closures to an
//! application — that is the generic front-end's job (see the sibling
//! `libffi-wasm` crate). What lives here is the layer that bridges the
//! front-end's descriptors to the wasm32 calling convention: type
//! canonicalisation, ABI classification, argument lowering/raising, the
//! forward caller, and the closure engine, in both the JS-hosted and
//! WASI-like host flavors.
//!
//! `no_std` by default (`alloc` is required); enable the `std` feature for
//! a process-level abort on fatal errors instead of trapping.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(non_camel_case_types)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod addr;
pub mod call;
pub mod canon;
pub mod classify;
pub mod closure;
pub mod error;
pub mod host;
pub mod raw;

mod marshal;

pub use call::{ffi_call, prep_cif_machdep, prep_cif_machdep_var};
pub use canon::{canonicalise, TypeRef};
pub use classify::{is_indirect_return, size_bytes, slot_bytes, slot_count, slot_kinds, SlotKind};
pub use marshal::{lower, raise};
pub use raw::{ffi_abi, ffi_cif, ffi_closure, ffi_type, types, Kind, RawCallback, Status, FFI_VARARGS};
