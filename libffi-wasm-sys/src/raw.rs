//! The data layout shared with the generic libffi front-end: type
//! descriptors, CIFs, and closures.
//!
//! Everything in this module is `#[repr(C)]` and laid out to the
//! byte-offset contract in the specification: a front-end may poke these
//! fields directly, so field order here is not negotiable once published.

use core::mem::offset_of;
use core::ptr::null_mut;

/// Tag of a [`ffi_type`]. Numbering matches the historical libffi
/// `FFI_TYPE_*` constants so that a front-end ported from C keeps its
/// literal tag values meaningful.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Void = 0,
    Int = 1,
    Float = 2,
    Double = 3,
    LongDouble = 4,
    Uint8 = 5,
    Sint8 = 6,
    Uint16 = 7,
    Sint16 = 8,
    Uint32 = 9,
    Sint32 = 10,
    Uint64 = 11,
    Sint64 = 12,
    Struct = 13,
    Pointer = 14,
    Complex = 15,
}

impl Kind {
    pub const fn is_struct(self) -> bool {
        matches!(self, Kind::Struct)
    }

    pub const fn is_complex(self) -> bool {
        matches!(self, Kind::Complex)
    }

    pub const fn is_float_like(self) -> bool {
        matches!(self, Kind::Float | Kind::Double | Kind::LongDouble)
    }
}

/// A C type descriptor, owned by the generic front-end.
///
/// `elements` is only meaningful when `kind` is [`Kind::Struct`] or
/// [`Kind::Complex`]: it then points at a null-terminated array of child
/// type references.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ffi_type {
    pub size: usize,
    pub alignment: u16,
    pub kind: Kind,
    pub elements: *mut *mut ffi_type,
}

// SAFETY: `ffi_type`s that appear in `static`s below never have their
// `elements` pointer mutated after construction.
unsafe impl Sync for ffi_type {}

impl ffi_type {
    pub const fn scalar(size: usize, alignment: u16, kind: Kind) -> Self {
        ffi_type {
            size,
            alignment,
            kind,
            elements: null_mut(),
        }
    }
}

macro_rules! scalar_type {
    ($name:ident, $ty:ty, $kind:expr) => {
        pub static mut $name: ffi_type =
            ffi_type::scalar(core::mem::size_of::<$ty>(), core::mem::align_of::<$ty>() as u16, $kind);
    };
}

/// Predeclared scalar type descriptors, analogous to libffi's
/// `ffi_type_*` globals.
#[allow(non_upper_case_globals)]
pub mod types {
    use super::{ffi_type, Kind};

    scalar_type!(void, (), Kind::Void);
    scalar_type!(uint8, u8, Kind::Uint8);
    scalar_type!(sint8, i8, Kind::Sint8);
    scalar_type!(uint16, u16, Kind::Uint16);
    scalar_type!(sint16, i16, Kind::Sint16);
    scalar_type!(uint32, u32, Kind::Uint32);
    scalar_type!(sint32, i32, Kind::Sint32);
    scalar_type!(uint64, u64, Kind::Uint64);
    scalar_type!(sint64, i64, Kind::Sint64);
    scalar_type!(float, f32, Kind::Float);
    scalar_type!(double, f64, Kind::Double);
    scalar_type!(pointer, *const core::ffi::c_void, Kind::Pointer);

    /// Two 64-bit slots, 16-byte aligned, per the wasm32 `long double`
    /// convention (spec.md §3).
    pub static mut longdouble: ffi_type = ffi_type::scalar(16, 16, Kind::LongDouble);
}

/// The ABI tags this core accepts. Any other value is `BAD_ABI`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ffi_abi {
    /// The WASI-like variant: no JS host, varargs unsupported.
    Wasm32 = 1,
    /// The JS-hosted (emscripten) variant.
    Wasm32Emscripten = 2,
}

pub const FFI_VARARGS: u32 = 1 << 0;

/// A call interface: the machine-readable description of one call site.
///
/// Field offsets are part of the contract with the front-end (spec.md §3)
/// and are compile-time asserted below.
/// The CIF's data layout uses fixed-width wasm32 addresses (via
/// [`crate::addr`]) for `arg_types`/`rtype` rather than native pointers, so
/// that this `#[repr(C)]` shape — and the byte offsets asserted below — are
/// stable regardless of the host's real pointer width. A front-end poking
/// these bytes directly only ever does so on an actual wasm32 build, where
/// an address and a pointer are the same 4-byte value; on any other host
/// (as under the `host-mock` test harness) [`crate::addr::from_addr`]
/// resolves the stored address back to the real pointer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ffi_cif {
    pub abi: ffi_abi,
    pub nargs: u32,
    pub arg_types: crate::addr::Addr,
    pub rtype: crate::addr::Addr,
    /// Cached total wasm-ABI byte size of the values buffer; filled in by
    /// `prep_cif_machdep` (spec.md §2: "cache slot counts").
    pub bytes: u32,
    pub flags: u32,
    pub nfixedargs: u32,
}

const _: () = assert!(offset_of!(ffi_cif, abi) == 0);
const _: () = assert!(offset_of!(ffi_cif, nargs) == 4);
const _: () = assert!(offset_of!(ffi_cif, arg_types) == 8);
const _: () = assert!(offset_of!(ffi_cif, rtype) == 12);
const _: () = assert!(offset_of!(ffi_cif, nfixedargs) == 24);

impl ffi_cif {
    pub const fn is_varargs(&self) -> bool {
        self.flags & FFI_VARARGS != 0
    }

    /// Resolves `arg_types` back to a native pointer to the (non-owning)
    /// array of `nargs` argument type descriptors.
    pub fn arg_types_ptr(&self) -> *mut *mut ffi_type {
        crate::addr::from_addr(self.arg_types)
    }

    pub fn set_arg_types_ptr(&mut self, p: *mut *mut ffi_type) {
        self.arg_types = crate::addr::to_addr(p);
    }

    /// Resolves `rtype` back to a native pointer, or null for `void`.
    pub fn rtype_ptr(&self) -> *mut ffi_type {
        crate::addr::from_addr(self.rtype)
    }

    pub fn set_rtype_ptr(&mut self, p: *mut ffi_type) {
        self.rtype = crate::addr::to_addr(p);
    }
}

/// The signature of a user closure handler: `(cif, result_area, argv,
/// user_data)`, per spec.md §3.
pub type RawCallback = unsafe extern "C" fn(
    cif: *mut ffi_cif,
    result: *mut core::ffi::c_void,
    argv: *mut *mut core::ffi::c_void,
    user_data: *mut core::ffi::c_void,
);

/// A dynamically-constructed callable bound to a wasm table slot.
///
/// `ftramp` is opaque to the front-end: a table index in both variants.
#[repr(C)]
pub struct ffi_closure {
    pub ftramp: u32,
    pub cif: *mut ffi_cif,
    pub fun: Option<RawCallback>,
    pub user_data: *mut core::ffi::c_void,
}

/// Declarative return codes (spec.md §6 / §7).
///
/// `Ok` and `BadTypedef` must be numerically 0 and 1 respectively.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    BadTypedef = 1,
    BadAbi = 2,
}

const _: () = assert!(Status::Ok as i32 == 0);
const _: () = assert!(Status::BadTypedef as i32 == 1);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cif_size_is_stable() {
        assert_eq!(core::mem::size_of::<ffi_cif>(), 28);
    }

    #[test]
    fn kind_tags_match_libffi_numbering() {
        assert_eq!(Kind::Void as u16, 0);
        assert_eq!(Kind::Struct as u16, 13);
        assert_eq!(Kind::Pointer as u16, 14);
        assert_eq!(Kind::Complex as u16, 15);
    }
}
