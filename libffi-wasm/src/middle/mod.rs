//! Middle layer providing a somewhat safer (but still quite unsafe)
//! API.
//!
//! The main idea of the middle layer is to wrap types [`low::ffi_cif`]
//! and [`low::ffi_closure`] as [`Cif`] and [`Closure`], respectively,
//! so that their resources are managed properly. However, calling a
//! function via a CIF or closure is still unsafe because argument types
//! aren’t checked. See the [`high`](crate::high) layer for closures
//! with type-checked arguments.

extern crate alloc;
use alloc::boxed::Box;
use core::any::Any;
use core::ffi::c_void;
use core::marker::PhantomData;

use crate::low;
pub use crate::low::{ffi_abi as FfiAbi, Callback, CallbackMut, CodePtr, DEFAULT_ABI};

mod types;
pub use types::Type;

mod builder;
pub use builder::Builder;

use types::{FfiType, FfiTypeArray};

/// Contains an untyped pointer to a function argument.
///
/// When calling a function via a [CIF](Cif), each argument
/// must be passed as a C `void*`. Wrapping the argument in the [`Arg`]
/// struct accomplishes the necessary coercion.
#[derive(Clone, Debug)]
#[repr(C)]
pub struct Arg(*mut c_void);

impl Arg {
    /// Coerces an argument reference into the [`Arg`] type.
    ///
    /// This is used to wrap each argument pointer before passing them
    /// to [`Cif::call`].
    pub fn new<T>(r: &T) -> Self {
        Arg(r as *const T as *mut c_void)
    }
}

/// Coerces an argument reference into the [`Arg`] type.
///
/// This is used to wrap each argument pointer before passing them
/// to [`Cif::call`]. (This is the same as [`Arg::new`]).
pub fn arg<T>(r: &T) -> Arg {
    Arg::new(r)
}

/// Describes the calling convention and types for calling a function.
///
/// This is the middle layer’s wrapping of the [`low`](crate::low)
/// layer’s [`low::ffi_cif`]. An initialized CIF contains references to
/// an array of argument types and a result type, each of which may be
/// allocated on the heap. `Cif` manages the memory of those referenced
/// objects.
///
/// Construct with [`Cif::new`].
///
/// # Examples
///
/// ```no_run
/// use libffi_wasm::middle::*;
///
/// # fn demo(fun_table_index: u32) {
/// let args = vec![Type::I64, Type::I64];
/// let cif = Cif::new(args, Type::I64);
///
/// let x = 5i64;
/// let y = 6i64;
/// let n: i64 = unsafe {
///     cif.call(CodePtr::from_table_index(fun_table_index), &[arg(&x), arg(&y)])
/// };
/// assert_eq!(11, n);
/// # }
/// ```
#[derive(Debug)]
pub struct Cif {
    cif: low::ffi_cif,
    args: FfiTypeArray,
    result: FfiType,
}

// To clone a Cif we need to clone the types and then make sure the new
// ffi_cif refers to the clones of the types.
impl Clone for Cif {
    fn clone(&self) -> Self {
        let mut copy = Cif {
            cif: self.cif,
            args: self.args.clone(),
            result: self.result.clone(),
        };

        copy.cif.set_arg_types_ptr(copy.args.as_ffi_ptr());
        copy.cif.set_rtype_ptr(copy.result.as_ffi_ptr());

        copy
    }
}

impl Cif {
    /// Creates a new [CIF](Cif) for the given argument and result
    /// types.
    ///
    /// Takes ownership of the argument and result [`Type`]s, because
    /// the resulting [`Cif`] retains references to them. Defaults to
    /// [`DEFAULT_ABI`]; this can be adjusted using [`Cif::set_abi`].
    pub fn new<I>(args: I, result: Type) -> Self
    where
        I: IntoIterator<Item = Type>,
    {
        let args: alloc::vec::Vec<Type> = args.into_iter().collect();
        let nargs = args.len();
        let args = FfiTypeArray::new(args);
        let result = FfiType::new(&result);
        // Not `mem::zeroed()`: `ffi_cif::abi` is a non-zero-valued enum, so an
        // all-zero bit pattern isn't a valid instance. This placeholder is
        // immediately overwritten in full below.
        let mut cif: low::ffi_cif = low::ffi_cif {
            abi: DEFAULT_ABI,
            nargs: 0,
            arg_types: 0,
            rtype: 0,
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };

        unsafe {
            low::prep_cif(
                &mut cif,
                DEFAULT_ABI,
                nargs,
                nargs,
                result.as_ffi_ptr(),
                args.as_ffi_ptr(),
            )
        }
        .expect("low::prep_cif");

        // Note that cif retains references to args and result,
        // which is why we hold onto them here.
        Cif { cif, args, result }
    }

    /// Creates a new variadic [CIF](Cif), with `nfixedargs` leading
    /// fixed arguments followed by the remainder of `args` as the
    /// variadic tail.
    pub fn new_variadic<I>(args: I, nfixedargs: usize, result: Type) -> Self
    where
        I: IntoIterator<Item = Type>,
    {
        let args: alloc::vec::Vec<Type> = args.into_iter().collect();
        let ntotalargs = args.len();
        let args = FfiTypeArray::new(args);
        let result = FfiType::new(&result);
        // Not `mem::zeroed()`: `ffi_cif::abi` is a non-zero-valued enum, so an
        // all-zero bit pattern isn't a valid instance. This placeholder is
        // immediately overwritten in full below.
        let mut cif: low::ffi_cif = low::ffi_cif {
            abi: DEFAULT_ABI,
            nargs: 0,
            arg_types: 0,
            rtype: 0,
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };

        unsafe {
            low::prep_cif_var(
                &mut cif,
                DEFAULT_ABI,
                nfixedargs,
                ntotalargs,
                result.as_ffi_ptr(),
                args.as_ffi_ptr(),
            )
        }
        .expect("low::prep_cif_var");

        Cif { cif, args, result }
    }

    /// Calls a function with the given arguments.
    ///
    /// In particular, this method invokes function `fun` passing it
    /// arguments `args`, and returns the result.
    ///
    /// # Safety
    ///
    /// There is no checking that the calling convention and types
    /// in the `Cif` match the actual calling convention and types of
    /// `fun`, nor that they match the types of `args`.
    pub unsafe fn call<R>(&self, fun: CodePtr, args: &[Arg]) -> R {
        assert_eq!(
            self.cif.nargs as usize,
            args.len(),
            "Cif::call: passed wrong number of arguments"
        );

        unsafe {
            low::call::<R>(
                &self.cif as *const _ as *mut _,
                fun,
                args.as_ptr() as *mut *mut c_void,
            )
        }
    }

    /// Sets the CIF to use the given calling convention.
    pub fn set_abi(&mut self, abi: FfiAbi) {
        self.cif.abi = abi;
    }

    /// Gets a raw pointer to the underlying [`low::ffi_cif`].
    ///
    /// This can be used for passing a `middle::Cif` to functions from
    /// the [`low`](crate::low) module.
    pub fn as_raw_ptr(&self) -> *mut low::ffi_cif {
        &self.cif as *const _ as *mut _
    }
}

/// Represents a closure callable from C.
///
/// A libffi closure captures a `void*` (“userdata”) and passes it to a
/// callback when the closure's table slot is invoked by the host.
/// Lifetime parameter `'a` ensures that the closure does not outlive the
/// userdata.
///
/// Construct with [`Closure::new`] and [`Closure::new_mut`].
///
/// Unlike on native targets, a closure's [`code_ptr`](Closure::code_ptr)
/// cannot be called directly from Rust: it identifies a wasm table slot,
/// and calling through it is the host's job (an indirect call from JS or
/// from other wasm code), not something this crate can do in-process.
#[derive(Debug)]
pub struct Closure<'a> {
    _cif: Box<Cif>,
    alloc: *mut low::ffi_closure,
    code: CodePtr,
    _marker: PhantomData<&'a ()>,
}

impl<'a> Drop for Closure<'a> {
    fn drop(&mut self) {
        unsafe {
            low::closure_free(self.alloc);
        }
    }
}

impl<'a> Closure<'a> {
    /// Creates a new closure with immutable userdata.
    ///
    /// # Arguments
    ///
    /// - `cif` — describes the calling convention and argument and
    ///   result types
    /// - `callback` — the function to call when the closure is invoked
    /// - `userdata` — the pointer to pass to `callback` along with the
    ///   arguments when the closure is called
    ///
    /// # Result
    ///
    /// The new closure.
    pub fn new<U, R>(cif: Cif, callback: Callback<U, R>, userdata: &'a U) -> Self {
        let cif = Box::new(cif);
        let (alloc, code) = low::closure_alloc();

        unsafe {
            low::prep_closure(alloc, cif.as_raw_ptr(), callback, userdata as *const U, code)
                .unwrap();
        }

        Closure {
            _cif: cif,
            alloc,
            code,
            _marker: PhantomData,
        }
    }

    /// Creates a new closure with mutable userdata.
    ///
    /// # Arguments
    ///
    /// - `cif` — describes the calling convention and argument and
    ///   result types
    /// - `callback` — the function to call when the closure is invoked
    /// - `userdata` — the pointer to pass to `callback` along with the
    ///   arguments when the closure is called
    ///
    /// # Result
    ///
    /// The new closure.
    pub fn new_mut<U, R>(cif: Cif, callback: CallbackMut<U, R>, userdata: &'a mut U) -> Self {
        let cif = Box::new(cif);
        let (alloc, code) = low::closure_alloc();

        unsafe {
            low::prep_closure_mut(alloc, cif.as_raw_ptr(), callback, userdata as *mut U, code)
                .unwrap();
        }

        Closure {
            _cif: cif,
            alloc,
            code,
            _marker: PhantomData,
        }
    }

    /// Returns the closure's table slot.
    ///
    /// Hand this to the host runtime (export it to JS, or pass it to an
    /// import expecting a callback) so it can invoke the closure via an
    /// indirect call. It is not callable from Rust directly.
    pub fn code_ptr(&self) -> CodePtr {
        self.code
    }
}

/// The type of callback invoked by a [`ClosureOnce`].
pub type CallbackOnce<U, R> = CallbackMut<Option<U>, R>;

/// A closure that owns needs-drop data.
///
/// This allows the closure’s callback to take ownership of the data, in
/// which case the userdata will be gone if called again.
#[derive(Debug)]
pub struct ClosureOnce {
    alloc: *mut low::ffi_closure,
    code: CodePtr,
    _cif: Box<Cif>,
    _userdata: Box<dyn Any>,
}

impl Drop for ClosureOnce {
    fn drop(&mut self) {
        unsafe {
            low::closure_free(self.alloc);
        }
    }
}

impl ClosureOnce {
    /// Creates a new closure with owned userdata.
    ///
    /// # Arguments
    ///
    /// - `cif` — describes the calling convention and argument and
    ///   result types
    /// - `callback` — the function to call when the closure is invoked
    /// - `userdata` — the value to pass to `callback` along with the
    ///   arguments when the closure is called
    ///
    /// # Result
    ///
    /// The new closure.
    pub fn new<U: Any, R>(cif: Cif, callback: CallbackOnce<U, R>, userdata: U) -> Self {
        let _cif = Box::new(cif);
        let _userdata = Box::new(Some(userdata)) as Box<dyn Any>;
        let (alloc, code) = low::closure_alloc();

        assert!(!alloc.is_null(), "closure_alloc: returned null");

        {
            let borrow = _userdata.downcast_ref::<Option<U>>().unwrap();
            unsafe {
                low::prep_closure_mut(
                    alloc,
                    _cif.as_raw_ptr(),
                    callback,
                    borrow as *const _ as *mut _,
                    code,
                )
                .unwrap();
            }
        }

        ClosureOnce {
            alloc,
            code,
            _cif,
            _userdata,
        }
    }

    /// Returns the closure's table slot. See [`Closure::code_ptr`].
    pub fn code_ptr(&self) -> CodePtr {
        self.code
    }
}

#[cfg(all(test, feature = "host-mock"))]
mod test {
    use super::*;
    use alloc::boxed::Box;
    use libffi_wasm_sys::host::mock;

    fn install_i64_add() -> u32 {
        mock::install_native(Box::new(|args, _args_len, results, _results_len| unsafe {
            let a = i64::from_le_bytes(core::slice::from_raw_parts(args, 8).try_into().unwrap());
            let b = i64::from_le_bytes(
                core::slice::from_raw_parts(args.add(8), 8).try_into().unwrap(),
            );
            core::ptr::copy_nonoverlapping((a + b).to_le_bytes().as_ptr(), results, 8);
        }))
    }

    #[test]
    fn call() {
        let cif = Cif::new([Type::I64, Type::I64], Type::I64);
        let slot = install_i64_add();
        let f = |m: i64, n: i64| -> i64 {
            unsafe { cif.call(CodePtr::from_table_index(slot), &[arg(&m), arg(&n)]) }
        };

        assert_eq!(12, f(5, 7));
        assert_eq!(13, f(6, 7));
        assert_eq!(15, f(8, 7));
    }

    #[test]
    fn closure() {
        let cif = Cif::new([Type::U64], Type::U64);
        let env: u64 = 5;
        let closure = Closure::new(cif, callback, &env);

        // A closure's slot is only callable by the host's own indirect
        // call mechanism, not from Rust; just confirm it installed.
        assert!(closure.code_ptr().as_table_index() != u32::MAX);
    }

    unsafe extern "C" fn callback(
        _cif: &low::ffi_cif,
        result: &mut u64,
        args: *const *const c_void,
        userdata: &u64,
    ) {
        let args = args as *const &u64;
        unsafe { *result = **args + *userdata };
    }

    #[test]
    fn rust_lambda() {
        let cif = Cif::new([Type::U64, Type::U64], Type::U64);
        let env = |x: u64, y: u64| x + y;
        let closure = Closure::new(cif, callback2, &env);

        assert!(closure.code_ptr().as_table_index() != u32::MAX);
    }

    unsafe extern "C" fn callback2<F: Fn(u64, u64) -> u64>(
        _cif: &low::ffi_cif,
        result: &mut u64,
        args: *const *const c_void,
        userdata: &F,
    ) {
        unsafe {
            let args = args as *const &u64;
            let arg1 = **args.offset(0);
            let arg2 = **args.offset(1);

            *result = userdata(arg1, arg2);
        }
    }

    #[test]
    fn clone_cif() {
        let cif = Cif::new(
            [
                Type::structure([
                    Type::structure([Type::U64, Type::U8, Type::F64]),
                    Type::I8,
                    Type::I64,
                ]),
                Type::U64,
            ],
            Type::U64,
        );
        let clone_cif = cif.clone();

        unsafe {
            let args =
                core::slice::from_raw_parts(cif.cif.arg_types_ptr(), cif.cif.nargs as usize);
            let struct_arg = args
                .first()
                .expect("CIF arguments slice was empty")
                .as_ref()
                .expect("CIF first argument was null");
            let struct_size = struct_arg.size;
            let struct_parts = core::slice::from_raw_parts(struct_arg.elements, 1);
            let substruct_size = struct_parts
                .first()
                .expect("CIF struct argument's elements slice was empty")
                .as_ref()
                .expect("CIF struct argument's first element was null")
                .size;

            let clone_args = core::slice::from_raw_parts(
                clone_cif.cif.arg_types_ptr(),
                clone_cif.cif.nargs as usize,
            );
            let clone_struct_arg = clone_args
                .first()
                .expect("CIF arguments slice was empty")
                .as_ref()
                .expect("CIF first argument was null");
            let clone_struct_size = clone_struct_arg.size;
            let clone_struct_parts = core::slice::from_raw_parts(clone_struct_arg.elements, 1);
            let clone_substruct_size = clone_struct_parts
                .first()
                .expect("Cloned CIF struct argument's elements slice was empty")
                .as_ref()
                .expect("Cloned CIF struct argument's first element was null")
                .size;

            assert_eq!(struct_size, clone_struct_size);
            assert_eq!(substruct_size, clone_substruct_size);
        }
    }
}
