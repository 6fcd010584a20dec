//! High layer providing automatic marshalling of Rust closures
//! as C function pointers.
//!
//! The main facility here is given by the structs
//! <code>Closure<em>N</em></code>,
//! <code>Closure<span></span>Mut<em>N</em></code>,
//! and <code>Closure<span></span>Once<em>N</em></code>,
//! for natural numbers *`N`*
//! from `0` to `12` (as of
//! now). These represent C closures of *`N`* arguments, which can be
//! used to turn Rust lambdas (or in generally, anything that implements
//! `Fn` or `FnMut`) into closures callable from C. For example, a
//! Rust value of type `Fn(u32, u32) -> u64` can be turned into a
//! closure of type [`Closure2<u32, u32, u64>`] using
//! [`Closure2::new`].
//!
//! Unlike on native targets, [`Closure2::code_ptr`] does not hand back
//! something directly callable from Rust: it identifies a wasm table
//! slot, and only the host (JS, or another wasm module, doing an
//! indirect call) can actually invoke it. The [`FnPtr2::call`] method
//! (and its siblings) exists only under the `host-mock` feature, as a
//! way to exercise a closure end-to-end from `cargo test` without a
//! real wasm host.
//!
//! The above usage case eliminates much of the boilerplate involved in
//! creating a closure as compared to the `middle` and `low` layers, but
//! at the price of flexibility. Some flexibility can be recovered by
//! manually constructing and configuring a CIF (*e.g.,* a
//! [`Cif2`]) and then creating the closure with
//! [`Closure2::new_with_cif`].
//!
//! See the [`mod@call`] submodule for a simple interface
//! to dynamic calls to C functions.
//!
//! # Examples
//!
//! Here we use [`ClosureMut1`], which is the type
//! for creating mutable closures of one argument. We use it to turn a
//! Rust lambda into a closure, and exercise it through the `host-mock`
//! test harness.
//!
//! ```ignore
//! // requires `--features host-mock`
//! use libffi_wasm::high::ClosureMut1;
//!
//! let mut x = 0u64;
//! let mut f = |y: u32| { x += y as u64; x };
//!
//! let closure = ClosureMut1::new(&mut f);
//! let counter = closure.code_ptr();
//!
//! assert_eq!(5, counter.call(5));
//! assert_eq!(6, counter.call(1));
//! assert_eq!(8, counter.call(2));
//! ```
//!
//! Here’s an example using `ClosureOnce3` to create a closure that owns
//! a vector:
//!
//! ```ignore
//! // requires `--features host-mock`
//! use libffi_wasm::high::ClosureOnce3;
//!
//! let v = alloc::vec![1usize, 2, 3, 4, 5];
//! let f = move |x: usize, y: usize, z: usize| {
//!     v[x] + v[y] + v[z]
//! };
//!
//! let closure = ClosureOnce3::new(f);
//! let call = closure.code_ptr();
//!
//! assert_eq!(12, call.call(2, 3, 4));
//! ```
//!
//! Invoking the closure a second time will panic.

extern crate alloc;

pub use crate::middle::{FfiAbi, DEFAULT_ABI};

pub mod types;
pub use types::{CRetType, CType, Type};

pub mod call;
pub use call::*;

macro_rules! define_closure_mod {
    (
        $module:ident $cif:ident $fnptr:ident
          $callback:ident $callback_mut:ident $callback_once:ident
          $closure:ident $closure_mut:ident $closure_once:ident;
        $( $T:ident )*
    )
        =>
    {
        /// CIF and closure types organized by function arity.
        #[allow(clippy::too_many_arguments)]
        pub mod $module {
            use core::any::Any;
            use core::marker::PhantomData;
            use core::{mem, ptr};

            use super::*;
            use crate::{low, middle};

            /// A typed CIF, which statically tracks argument and result types.
            pub struct $cif<$( $T, )* R> {
                untyped: middle::Cif,
                _marker: PhantomData<fn($( $T, )*) -> R>,
            }

            impl<$( $T, )* R> $cif<$( $T, )* R> {
                /// Creates a new statically-typed CIF with the given argument
                /// and result types.
                #[allow(non_snake_case)]
                pub fn new($( $T: Type<$T>, )* result: Type<R>) -> Self {
                    let cif = middle::Cif::new(
                        alloc::vec![$( $T.into_middle() ),*],
                        result.into_middle());
                    $cif { untyped: cif, _marker: PhantomData }
                }

                /// Sets the CIF to use the given calling convention.
                pub fn set_abi(&mut self, abi: FfiAbi) {
                    self.untyped.set_abi(abi);
                }
            }

            impl<$( $T: CType, )* R: CType> $cif<$( $T, )* R> {
                /// Creates a new statically-typed CIF by reifying the
                /// argument types as `Type<T>`s.
                pub fn reify() -> Self {
                    Self::new($( $T::reify(), )* R::reify())
                }
            }

            /// A typed handle to a closure's wasm table slot.
            ///
            /// This does not wrap a callable native function pointer: on
            /// wasm32 there is no such thing for a dynamically-installed
            /// closure. It identifies the slot the host must invoke
            /// indirectly.
            #[derive(Clone, Copy)]
            pub struct $fnptr<'a, $( $T, )* R> {
                code: middle::CodePtr,
                _marker: PhantomData<(&'a (), fn($( $T, )*) -> R)>,
            }

            impl<'a, $( $T, )* R> $fnptr<'a, $( $T, )* R> {
                /// Returns the underlying wasm table slot.
                pub fn code_ptr(&self) -> middle::CodePtr {
                    self.code
                }
            }

            #[cfg(feature = "host-mock")]
            impl<'a, $( $T: CType, )* R: CType> $fnptr<'a, $( $T, )* R> {
                /// Invokes the closure through the in-process mock host,
                /// the same way a real host would invoke it through the
                /// wasm table, without requiring a real wasm runtime.
                #[allow(non_snake_case)]
                pub fn call(&self, $( $T: $T, )*) -> R {
                    let cif = middle::Cif::new(
                        alloc::vec![$( <$T as CType>::reify().into_middle(), )*],
                        <R as CType>::reify().into_middle(),
                    );
                    // SAFETY: `cif` was just prepared by `middle::Cif::new`.
                    let raw_cif = unsafe { &*cif.as_raw_ptr() };

                    let arg_types = raw_cif.arg_types_ptr();
                    let arg_refs: alloc::vec::Vec<&low::ffi_type> = (0..raw_cif.nargs as usize)
                        .map(|i| unsafe { &*(*arg_types.add(i)) })
                        .collect();
                    let total: usize = arg_refs
                        .iter()
                        .map(|t| libffi_wasm_sys::slot_bytes(t))
                        .sum();

                    let mut buf = alloc::vec![0u8; total];
                    let mut cursor = 0usize;
                    #[allow(unused_mut, unused_variables)]
                    let mut idx = 0usize;
                    $(
                        unsafe {
                            libffi_wasm_sys::lower(
                                buf.as_mut_ptr(),
                                &mut cursor,
                                arg_refs[idx],
                                &$T as *const $T as *const u8,
                            );
                        }
                        #[allow(unused_assignments)]
                        { idx += 1; }
                    )*

                    // SAFETY: non-null by construction of `cif`.
                    let rtype = unsafe { &*raw_cif.rtype_ptr() };
                    let results_len = libffi_wasm_sys::size_bytes(rtype);
                    let mut result_buf = alloc::vec![0u8; results_len];

                    // SAFETY: `self.code` names a slot prepared by
                    // `middle::Closure::new` (or a sibling constructor);
                    // `buf`/`result_buf` are sized per `cif`.
                    unsafe {
                        libffi_wasm_sys::host::mock::invoke_closure(
                            self.code.as_table_index(),
                            buf.as_ptr(),
                            result_buf.as_mut_ptr(),
                        )
                        .expect("invoke_closure: slot was not prepared");
                    }

                    let mut rcursor = 0usize;
                    // SAFETY: `result_buf` holds `results_len` valid bytes.
                    let p = unsafe {
                        libffi_wasm_sys::raise(result_buf.as_ptr(), &mut rcursor, rtype)
                    };
                    // SAFETY: `p` points at a valid, initialised `R`.
                    unsafe { ptr::read_unaligned(p as *const R) }
                }
            }

            // We use tuples of references to describe the arguments, and we
            // extract them by pattern matching. This assumes that a tuple
            // of references will be laid out packed and in order, matching
            // `middle::Callback`'s array-of-pointers convention; this holds
            // today but is not guaranteed by the language.

            /// The type of function called from an immutable, typed closure.
            pub type $callback<U, $( $T, )* R>
                = extern "C" fn(cif:      &low::ffi_cif,
                                result:   &mut R,
                                args:     &($( &$T, )*),
                                userdata: &U);

            /// An immutable, typed closure with the given argument and result
            /// types.
            pub struct $closure<'a, $( $T, )* R> {
                untyped: middle::Closure<'a>,
                _marker: PhantomData<fn($( $T, )*) -> R>,
            }

            impl<'a, $($T: CType,)* R: CType> $closure<'a, $($T,)* R> {
                /// Constructs a typed closure callable from C from a
                /// Rust closure.
                pub fn new<Callback>(callback: &'a Callback) -> Self
                    where Callback: Fn($( $T, )*) -> R + 'a
                {
                    Self::new_with_cif($cif::reify(), callback)
                }
            }

            impl<'a, $( $T, )* R> $closure<'a, $( $T, )* R> {
                /// Returns the closure's wasm table slot.
                pub fn code_ptr(&self) -> $fnptr<'a, $( $T, )* R> {
                    $fnptr { code: self.untyped.code_ptr(), _marker: PhantomData }
                }

                /// Constructs a typed closure callable from C from a CIF
                /// describing the calling convention for the resulting
                /// function, a callback for the function to call, and
                /// userdata to pass to the callback.
                pub fn from_parts<U>(cif: $cif<$( $T, )* R>,
                                     callback: $callback<U, $( $T, )* R>,
                                     userdata: &'a U) -> Self
                {
                    // SAFETY: `$callback` and `middle::Callback` are both
                    // plain function pointers of the same size; only the
                    // argument-tuple-vs-pointer-array shape differs, which
                    // is this module's documented convention.
                    let callback: middle::Callback<U, R>
                        = unsafe { mem::transmute(callback) };
                    let closure
                        = middle::Closure::new(cif.untyped,
                                               callback,
                                               userdata);
                    $closure {
                        untyped: closure,
                        _marker: PhantomData,
                    }
                }
            }

            impl<'a, $( $T: Copy, )* R: CType> $closure<'a, $( $T, )* R> {
                /// Constructs a typed closure callable from C from a CIF
                /// describing the calling convention for the resulting
                /// function and the Rust closure to call.
                pub fn new_with_cif<Callback>(cif: $cif<$( $T, )* R>,
                                              callback: &'a Callback) -> Self
                    where Callback: Fn($( $T, )*) -> R + 'a
                {
                    Self::from_parts(cif,
                                     Self::static_callback,
                                     callback)
                }

                #[allow(non_snake_case)]
                extern "C" fn static_callback<Callback>
                    (_cif:     &low::ffi_cif,
                     result:   &mut R,
                     &($( &$T, )*):
                               &($( &$T, )*),
                     userdata: &Callback)
                  where Callback: Fn($( $T, )*) -> R + 'a
                {
                    unsafe {
                        ptr::write(result, userdata($( $T, )*));
                    }
                }
            }

            /// The type of function called from a mutable, typed closure.
            pub type $callback_mut<U, $( $T, )* R>
                = extern "C" fn(cif:      &low::ffi_cif,
                                result:   &mut R,
                                args:     &($( &$T, )*),
                                userdata: &mut U);

            /// A mutable, typed closure with the given argument and
            /// result types.
            pub struct $closure_mut<'a, $( $T, )* R> {
                untyped: middle::Closure<'a>,
                _marker: PhantomData<fn($( $T, )*) -> R>,
            }

            impl<'a, $($T: CType,)* R: CType>
                $closure_mut<'a, $($T,)* R>
            {
                /// Constructs a typed closure callable from C from a
                /// Rust closure.
                pub fn new<Callback>(callback: &'a mut Callback) -> Self
                    where Callback: FnMut($( $T, )*) -> R + 'a
                {
                    Self::new_with_cif($cif::reify(), callback)
                }
            }

            impl<'a, $( $T, )* R> $closure_mut<'a, $( $T, )* R> {
                /// Returns the closure's wasm table slot.
                pub fn code_ptr(&self) -> $fnptr<'a, $( $T, )* R> {
                    $fnptr { code: self.untyped.code_ptr(), _marker: PhantomData }
                }

                /// Constructs a typed closure callable from C from a CIF
                /// describing the calling convention for the resulting
                /// function, a callback for the function to call, and
                /// userdata to pass to the callback.
                pub fn from_parts<U>(cif:      $cif<$( $T, )* R>,
                                     callback: $callback_mut<U, $( $T, )* R>,
                                     userdata: &'a mut U) -> Self
                {
                    // SAFETY: see `$closure::from_parts`.
                    let callback: middle::CallbackMut<U, R>
                        = unsafe { mem::transmute(callback) };
                    let closure
                        = middle::Closure::new_mut(cif.untyped,
                                                   callback,
                                                   userdata);
                    $closure_mut {
                        untyped: closure,
                        _marker: PhantomData,
                    }
                }
            }

            impl<'a, $( $T: Copy, )* R: CType> $closure_mut<'a, $( $T, )* R> {
                /// Constructs a typed closure callable from C from a CIF
                /// describing the calling convention for the resulting
                /// function and the Rust closure to call.
                pub fn new_with_cif<Callback>(cif: $cif<$( $T, )* R>,
                                              callback: &'a mut Callback)
                                              -> Self
                    where Callback: FnMut($( $T, )*) -> R + 'a
                {
                    Self::from_parts(cif,
                                     Self::static_callback,
                                     callback)
                }

                #[allow(non_snake_case)]
                extern "C" fn static_callback<Callback>
                    (_cif:     &low::ffi_cif,
                     result:   &mut R,
                     &($( &$T, )*):
                               &($( &$T, )*),
                     userdata: &mut Callback)
                  where Callback: FnMut($( $T, )*) -> R + 'a
                {
                    unsafe {
                        ptr::write(result, userdata($( $T, )*));
                    }
                }
            }

            /// The type of function called from a one-shot, typed closure.
            pub type $callback_once<U, $( $T, )* R>
                = $callback_mut<Option<U>, $( $T, )* R>;

            /// A one-shot, typed closure with the given argument and
            /// result types.
            pub struct $closure_once<$( $T, )* R> {
                untyped: middle::ClosureOnce,
                _marker: PhantomData<fn($( $T, )*) -> R>,
            }

            impl<$($T: CType,)* R: CType> $closure_once<$($T,)* R> {
                /// Constructs a typed closure callable from C from a
                /// Rust closure.
                pub fn new<Callback>(callback: Callback) -> Self
                    where Callback: FnOnce($( $T, )*) -> R + Any
                {
                    Self::new_with_cif($cif::reify(), callback)
                }
            }

            impl<$( $T: Copy, )* R: CType> $closure_once<$( $T, )* R> {
                /// Constructs a one-shot closure callable from C from a CIF
                /// describing the calling convention for the resulting
                /// function and the Rust closure to call.
                pub fn new_with_cif<Callback>(cif: $cif<$( $T, )* R>,
                                              callback: Callback) -> Self
                    where Callback: FnOnce($( $T, )*) -> R + Any
                {
                    Self::from_parts(cif,
                                     Self::static_callback,
                                     callback)
                }

                #[allow(non_snake_case)]
                extern "C" fn static_callback<Callback>
                    (_cif:     &low::ffi_cif,
                     result:   &mut R,
                     &($( &$T, )*):
                               &($( &$T, )*),
                     userdata: &mut Option<Callback>)
                  where Callback: FnOnce($( $T, )*) -> R
                {
                    if let Some(userdata) = userdata.take() {
                        unsafe {
                            ptr::write(result, userdata($( $T, )*));
                        }
                    } else {
                        libffi_wasm_sys::error::fatal("FnOnce closure already used");
                    }
                }
            }

            impl<$( $T, )* R> $closure_once<$( $T, )* R> {
                /// Returns the closure's wasm table slot.
                pub fn code_ptr(&self) -> $fnptr<'_, $( $T, )* R> {
                    $fnptr { code: self.untyped.code_ptr(), _marker: PhantomData }
                }

                /// Constructs a one-shot closure callable from C from a CIF
                /// describing the calling convention for the resulting
                /// function, a callback for the function to call, and
                /// userdata to pass to the callback.
                pub fn from_parts<U: Any>(
                    cif:      $cif<$( $T, )* R>,
                    callback: $callback_once<U, $( $T, )* R>,
                    userdata: U)
                    -> Self
                {
                    // SAFETY: see `$closure::from_parts`.
                    let callback: middle::CallbackOnce<U, R>
                        = unsafe { mem::transmute(callback) };
                    let closure
                        = middle::ClosureOnce::new(cif.untyped,
                                                   callback,
                                                   userdata);
                    $closure_once {
                        untyped: closure,
                        _marker: PhantomData,
                    }
                }
            }
        }

        pub use $module::*;
    }
}

define_closure_mod!(arity0 Cif0 FnPtr0
Callback0 CallbackMut0 CallbackOnce0
Closure0 ClosureMut0 ClosureOnce0;
);
define_closure_mod!(arity1 Cif1 FnPtr1
                    Callback1 CallbackMut1 CallbackOnce1
                    Closure1 ClosureMut1 ClosureOnce1;
                    A);
define_closure_mod!(arity2 Cif2 FnPtr2
                    Callback2 CallbackMut2 CallbackOnce2
                    Closure2 ClosureMut2 ClosureOnce2;
                    A B);
define_closure_mod!(arity3 Cif3 FnPtr3
                    Callback3 CallbackMut3 CallbackOnce3
                    Closure3 ClosureMut3 ClosureOnce3;
                    A B C);
define_closure_mod!(arity4 Cif4 FnPtr4
                    Callback4 CallbackMut4 CallbackOnce4
                    Closure4 ClosureMut4 ClosureOnce4;
                    A B C D);
define_closure_mod!(arity5 Cif5 FnPtr5
                    Callback5 CallbackMut5 CallbackOnce5
                    Closure5 ClosureMut5 ClosureOnce5;
                    A B C D E);
define_closure_mod!(arity6 Cif6 FnPtr6
                    Callback6 CallbackMut6 CallbackOnce6
                    Closure6 ClosureMut6 ClosureOnce6;
                    A B C D E F);

#[cfg(all(test, feature = "host-mock"))]
mod test {
    use super::*;

    #[test]
    fn new_with_cif() {
        let x: u64 = 1;
        let f = |y: u64, z: u64| x + y + z;

        let type_ = u64::reify();
        let cif = Cif2::new(type_.clone(), type_.clone(), type_.clone());
        let closure = Closure2::new_with_cif(cif, &f);

        assert_eq!(12, closure.code_ptr().call(5, 6));
    }

    #[test]
    fn new_with_cif_mut() {
        let mut x: u64 = 0;
        let mut f = |y: u64| {
            x += y;
            x
        };

        let type_ = u64::reify();
        let cif = Cif1::new(type_.clone(), type_.clone());
        let closure = ClosureMut1::new_with_cif(cif, &mut f);

        let counter = closure.code_ptr();

        assert_eq!(5, counter.call(5));
        assert_eq!(6, counter.call(1));
        assert_eq!(8, counter.call(2));
    }

    #[test]
    fn new() {
        let x: u64 = 1;
        let f = |y: u64, z: u64| x + y + z;

        let closure = Closure2::new(&f);

        assert_eq!(12, closure.code_ptr().call(5, 6));
    }

    #[test]
    fn new_mut() {
        let mut x: u64 = 0;
        let mut f = |y: u32| {
            x += u64::from(y);
            x
        };

        let closure = ClosureMut1::new(&mut f);
        let counter = closure.code_ptr();

        assert_eq!(5, counter.call(5));
        assert_eq!(6, counter.call(1));
        assert_eq!(8, counter.call(2));
    }

    #[test]
    fn once() {
        let v = alloc::vec![1usize, 2, 3, 4, 5];
        let f = move |x: usize, y: usize, z: usize| v[x] + v[y] + v[z];

        let closure = ClosureOnce3::new(f);
        let call = closure.code_ptr();

        assert_eq!(12, call.call(2, 3, 4));
    }
}
