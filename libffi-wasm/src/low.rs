//! A low-level wrapping of the wasm32 machine-dependent core, this layer
//! makes no attempt at safety but tries to provide a somewhat more
//! idiomatic interface than poking at [`libffi_wasm_sys`] directly.
//!
//! This module also re-exports types and constants necessary for using the
//! library, so it should not generally be necessary to depend on
//! `libffi-wasm-sys` directly. See [`middle`](crate::middle) for an
//! easier-to-use approach.

use core::ffi::c_void;
use core::mem;

use libffi_wasm_sys as raw;

/// The two kinds of errors reported by the core.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum Error {
    /// Given a bad or unsupported type representation.
    #[cfg_attr(feature = "std", error("bad or unsupported type representation"))]
    Typedef,
    /// Given a bad or unsupported ABI.
    #[cfg_attr(feature = "std", error("bad or unsupported calling convention"))]
    Abi,
}

/// The [`core::result::Result`] type specialized for libffi-wasm [`Error`]s.
pub type Result<T> = ::core::result::Result<T, Error>;

fn status_to_result<R>(status: raw::Status, good: R) -> Result<R> {
    match status {
        raw::Status::Ok => Ok(good),
        raw::Status::BadTypedef => Err(Error::Typedef),
        raw::Status::BadAbi => Err(Error::Abi),
    }
}

/// Wraps a callable of unknown type: a wasm table index rather than a
/// native function pointer, since on wasm32 invoking an arbitrary
/// dynamically-typed function means asking the host to perform an indirect
/// call through the table (see [`crate::high`]'s `FnPtrN::call`), not
/// calling through the value directly.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[repr(transparent)]
pub struct CodePtr(pub u32);

impl CodePtr {
    /// Initializes a code pointer from a raw wasm table index.
    pub fn from_table_index(index: u32) -> Self {
        CodePtr(index)
    }

    /// The underlying table index.
    pub fn as_table_index(self) -> u32 {
        self.0
    }
}

pub use raw::{ffi_abi, ffi_cif, ffi_closure, ffi_type, Kind, Status};

/// The default calling convention: the non-Emscripten wasm32 ABI.
///
/// Builders that need the JS-hosted variant's signature-string closure
/// engine should set [`ffi_abi::Wasm32Emscripten`] explicitly.
pub const DEFAULT_ABI: ffi_abi = ffi_abi::Wasm32;

/// Re-exports the predeclared [`ffi_type`] objects used to describe the
/// types of arguments and results.
pub mod types {
    pub use libffi_wasm_sys::types::{
        double, float, longdouble, pointer, sint16, sint32, sint64, sint8, uint16, uint32, uint64,
        uint8, void,
    };
}

/// Type tags used when constructing composite [`ffi_type`]s by hand.
///
/// For atomic types this tag doesn't matter because the core predeclares
/// [an instance of each one](mod@types); for structs we construct a fresh
/// `ffi_type` and need to mark its `kind` ourselves.
pub mod type_tag {
    pub use libffi_wasm_sys::Kind as Tag;
    /// Indicates a structure type.
    pub const STRUCT: Tag = Tag::Struct;
    /// Indicates a complex number type, canonicalised away before the core
    /// does anything else with it.
    pub const COMPLEX: Tag = Tag::Complex;
}

/// Initializes a CIF with the given ABI and types.
///
/// # Safety
///
/// The CIF `cif` retains references to `rtype` and `atypes`, so if they
/// are no longer live when the CIF is used the behavior is undefined.
pub unsafe fn prep_cif(
    cif: *mut ffi_cif,
    abi: ffi_abi,
    nargs: usize,
    nfixedargs: usize,
    rtype: *mut ffi_type,
    atypes: *mut *mut ffi_type,
) -> Result<()> {
    // SAFETY: forwarded per this function's contract.
    unsafe {
        (*cif) = ffi_cif {
            abi,
            nargs: nargs as u32,
            arg_types: raw::addr::to_addr(atypes),
            rtype: raw::addr::to_addr(rtype),
            bytes: 0,
            flags: 0,
            nfixedargs: nfixedargs as u32,
        };
    }
    let status = raw::prep_cif_machdep(unsafe { &mut *cif });
    status_to_result(status, ())
}

/// Initializes a CIF for a varargs function.
///
/// # Safety
/// Same contract as [`prep_cif`].
pub unsafe fn prep_cif_var(
    cif: *mut ffi_cif,
    abi: ffi_abi,
    nfixedargs: usize,
    ntotalargs: usize,
    rtype: *mut ffi_type,
    atypes: *mut *mut ffi_type,
) -> Result<()> {
    // SAFETY: forwarded per this function's contract.
    unsafe {
        (*cif) = ffi_cif {
            abi,
            nargs: ntotalargs as u32,
            arg_types: raw::addr::to_addr(atypes),
            rtype: raw::addr::to_addr(rtype),
            bytes: 0,
            flags: 0,
            nfixedargs: nfixedargs as u32,
        };
        status_to_result(
            raw::prep_cif_machdep_var(&mut *cif, nfixedargs as u32, ntotalargs as u32),
            (),
        )?;
        status_to_result(raw::prep_cif_machdep(&mut *cif), ())
    }
}

/// Calls a function described by a CIF through the host's dynamic-call
/// primitive.
///
/// # Safety
/// The core will read values from `args` based on the CIF; make sure every
/// pointer points at correctly-typed, properly-aligned data, and that `R`
/// matches the CIF's return type.
pub unsafe fn call<R>(cif: *mut ffi_cif, fun: CodePtr, args: *mut *mut c_void) -> R {
    let mut result = mem::MaybeUninit::<R>::uninit();
    // SAFETY: forwarded per this function's contract.
    unsafe {
        raw::ffi_call(
            &*cif,
            fun.as_table_index(),
            result.as_mut_ptr().cast::<u8>(),
            args as *const *const u8,
        );
        result.assume_init()
    }
}

/// Allocates a closure, returning a pair of the writable closure object and
/// the table-index code pointer used to invoke it.
pub fn closure_alloc() -> (*mut ffi_closure, CodePtr) {
    let mut code = 0u32;
    // SAFETY: `&mut code` is valid for the call's duration.
    let closure = unsafe { raw::closure::closure_alloc(mem::size_of::<ffi_closure>(), &mut code) };
    (closure as *mut ffi_closure, CodePtr(code))
}

/// Frees a closure allocated with [`closure_alloc`].
///
/// # Safety
/// `closure` must have been returned by [`closure_alloc`] and not already
/// freed.
pub unsafe fn closure_free(closure: *mut ffi_closure) {
    // SAFETY: forwarded per this function's contract.
    unsafe { raw::closure::closure_free(closure as *mut u8) };
}

/// The type of function called by a closure.
///
/// `U` is the type of the user data captured by the closure and passed to
/// the callback, `R` is the type of the result. Parameters are untyped,
/// passed as a C array of `void*`.
pub type Callback<U, R> =
    unsafe extern "C" fn(cif: &ffi_cif, result: &mut R, args: *const *const c_void, userdata: &U);

/// The type of function called by a mutable closure.
pub type CallbackMut<U, R> = unsafe extern "C" fn(
    cif: &ffi_cif,
    result: &mut R,
    args: *const *const c_void,
    userdata: &mut U,
);

pub use raw::RawCallback;

/// Initializes a closure with a callback function and userdata.
///
/// # Safety
/// The closure retains a reference to CIF `cif`, which must outlive it.
pub unsafe fn prep_closure<U, R>(
    closure: *mut ffi_closure,
    cif: *mut ffi_cif,
    callback: Callback<U, R>,
    userdata: *const U,
    code: CodePtr,
) -> Result<()> {
    // SAFETY: forwarded per this function's contract.
    let status = unsafe {
        raw::closure::prep_closure_loc(
            closure,
            cif,
            mem::transmute::<Callback<U, R>, RawCallback>(callback),
            userdata as *mut c_void,
            code.as_table_index(),
        )
    };
    status_to_result(status, ())
}

/// Initializes a mutable closure with a callback function and userdata.
///
/// # Safety
/// Same contract as [`prep_closure`].
pub unsafe fn prep_closure_mut<U, R>(
    closure: *mut ffi_closure,
    cif: *mut ffi_cif,
    callback: CallbackMut<U, R>,
    userdata: *mut U,
    code: CodePtr,
) -> Result<()> {
    // SAFETY: forwarded per this function's contract.
    let status = unsafe {
        raw::closure::prep_closure_loc(
            closure,
            cif,
            mem::transmute::<CallbackMut<U, R>, RawCallback>(callback),
            userdata as *mut c_void,
            code.as_table_index(),
        )
    };
    status_to_result(status, ())
}

#[cfg(all(test, feature = "host-mock"))]
mod test {
    use super::*;
    use core::ptr::{addr_of_mut, null_mut};

    extern "C" fn return_nothing() {}
    extern "C" fn return_i32(a: i32) -> i32 {
        a
    }
    extern "C" fn return_f64(a: f64) -> f64 {
        a
    }
    extern "C" fn return_f64_from_i32(a: i32) -> f64 {
        return_f64(a as f64)
    }

    fn install<R: 'static>(f: extern "C" fn(i32) -> R, write: fn(R, *mut u8)) -> u32
    where
        R: Copy,
    {
        libffi_wasm_sys::host::mock::install_native(alloc::boxed::Box::new(
            move |args: *const u8, _args_len: usize, results: *mut u8, _results_len: usize| unsafe {
                let a = i32::from_le_bytes(core::slice::from_raw_parts(args, 4).try_into().unwrap());
                write(f(a), results);
            },
        ))
    }

    #[test]
    fn call_returns_i32() {
        let slot = install(return_i32, |v, out| unsafe {
            core::ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), out, 4);
        });

        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 1,
            arg_types: 0,
            rtype: 0,
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        let mut arg_types = [unsafe { addr_of_mut!(types::sint32) }];
        unsafe {
            prep_cif(
                &mut cif,
                ffi_abi::Wasm32,
                1,
                1,
                addr_of_mut!(types::sint32),
                arg_types.as_mut_ptr(),
            )
            .unwrap();
        }

        let mut a: i32 = 41;
        let mut args: [*mut c_void; 1] = [addr_of_mut!(a).cast()];
        let result: i32 = unsafe { call(&mut cif, CodePtr(slot), args.as_mut_ptr()) };
        assert_eq!(result, 41);
    }

    #[test]
    fn call_void_return() {
        let slot = libffi_wasm_sys::host::mock::install_native(alloc::boxed::Box::new(
            |_args: *const u8, _args_len: usize, _results: *mut u8, _results_len: usize| {
                return_nothing();
            },
        ));
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 0,
            arg_types: 0,
            rtype: 0,
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        unsafe {
            prep_cif(&mut cif, ffi_abi::Wasm32, 0, 0, addr_of_mut!(types::void), null_mut()).unwrap();
            call::<()>(&mut cif, CodePtr(slot), null_mut());
        }
    }

    #[test]
    fn call_returns_f64() {
        let slot = install(
            return_f64_from_i32,
            |v: f64, out| unsafe {
                core::ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), out, 8);
            },
        );

        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 1,
            arg_types: 0,
            rtype: 0,
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        let mut arg_types = [unsafe { addr_of_mut!(types::sint32) }];
        unsafe {
            prep_cif(
                &mut cif,
                ffi_abi::Wasm32,
                1,
                1,
                addr_of_mut!(types::double),
                arg_types.as_mut_ptr(),
            )
            .unwrap();
        }

        let mut a: i32 = 3;
        let mut args: [*mut c_void; 1] = [addr_of_mut!(a).cast()];
        let result: f64 = unsafe { call(&mut cif, CodePtr(slot), args.as_mut_ptr()) };
        assert_eq!(result, 3.0);
    }
}
