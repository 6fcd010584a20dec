//! CIF preparation and the forward caller (`ffi_call`).

use alloc::vec;
use alloc::vec::Vec;

use crate::canon::canonicalise;
use crate::classify::{is_indirect_return, slot_bytes};
use crate::raw::{ffi_abi, ffi_cif, ffi_type, Kind, Status, FFI_VARARGS};

const MAX_ARGS: u32 = 1000;

/// Runs the canonicaliser over every argument and the return type, caches
/// the varargs-free `nfixedargs`, and rejects CIFs that exceed the
/// implementation's argument budget (spec.md §4.8).
pub fn prep_cif_machdep(cif: &mut ffi_cif) -> Status {
    if cif.nargs > MAX_ARGS {
        log::warn!("cif has {} args, over the {} limit", cif.nargs, MAX_ARGS);
        return Status::BadTypedef;
    }
    if !matches!(cif.abi, ffi_abi::Wasm32 | ffi_abi::Wasm32Emscripten) {
        return Status::BadAbi;
    }

    let arg_types = cif.arg_types_ptr();
    for i in 0..cif.nargs as usize {
        // SAFETY: `arg_types` holds `nargs` valid type-descriptor pointers
        // by the front-end's contract (spec.md §3).
        let arg = unsafe { *arg_types.add(i) };
        if matches!(cif.abi, ffi_abi::Wasm32Emscripten) && unsafe { (*arg).kind.is_complex() } {
            log::warn!("emscripten ABI rejects top-level COMPLEX arguments");
            return Status::BadTypedef;
        }
        // SAFETY: contract of `canonicalise`.
        unsafe { canonicalise(arg, false, cif.abi) };
    }

    let rtype = cif.rtype_ptr();
    if matches!(cif.abi, ffi_abi::Wasm32Emscripten) && !rtype.is_null() {
        // SAFETY: non-null by the check above.
        if unsafe { (*rtype).kind.is_complex() } {
            log::warn!("emscripten ABI rejects a COMPLEX return type");
            return Status::BadTypedef;
        }
    }
    // SAFETY: contract of `canonicalise`; null `rtype` means void.
    unsafe { canonicalise(rtype, true, cif.abi) };

    if cif.flags & FFI_VARARGS == 0 {
        cif.nfixedargs = cif.nargs;
    }

    // SAFETY: `rtype` is either null (void) or a valid, just-canonicalised
    // descriptor.
    let rtype_ref = unsafe { rtype.as_ref() };
    let indirect = rtype_ref.map(is_indirect_return).unwrap_or(false);
    let mut bytes = if indirect { 4 } else { 0 };
    for i in 0..cif.nargs as usize {
        // SAFETY: contract of this function, forwarded from the loop above.
        let arg = unsafe { &*(*arg_types.add(i)) };
        bytes += arg_size(arg);
    }
    if cif.is_varargs() && matches!(cif.abi, ffi_abi::Wasm32Emscripten) {
        // spec.md §4.8: the emscripten variant delivers the variadic tail
        // behind one pointer instead of as individually typed slots, but
        // that pointer itself still occupies a wasm-ABI slot.
        bytes += 4;
    }
    cif.bytes = bytes as u32;

    Status::Ok
}

/// Marks `cif` variadic with `nfixedargs` fixed leading arguments.
///
/// WASM32 (the non-JS variant) does not support varargs (spec.md §1, §4.8).
pub fn prep_cif_machdep_var(cif: &mut ffi_cif, nfixedargs: u32, ntotal: u32) -> Status {
    if matches!(cif.abi, ffi_abi::Wasm32) {
        log::warn!("varargs requested under the WASM32 (non-JS) ABI");
        return Status::BadAbi;
    }
    cif.flags |= FFI_VARARGS;
    cif.nfixedargs = nfixedargs;
    cif.nargs = ntotal;
    Status::Ok
}

fn arg_size(t: &ffi_type) -> usize {
    crate::classify::size_bytes(t)
}

/// Invokes `fn_index` (a wasm table index) per `cif`, lowering `avalue`
/// into a wasm-ABI buffer and raising the result back into `rvalue`.
///
/// # Safety
///
/// `cif` must have been prepared with [`prep_cif_machdep`] (or
/// [`prep_cif_machdep_var`]). `avalue` must hold `cif.nargs` pointers to
/// caller-owned values of the corresponding argument types. `rvalue` must
/// point at storage large enough for the (canonical) return type, or be
/// unused when the return type is void.
pub unsafe fn ffi_call(cif: &ffi_cif, fn_index: u32, rvalue: *mut u8, avalue: *const *const u8) {
    if matches!(cif.abi, ffi_abi::Wasm32) && cif.is_varargs() {
        crate::error::fatal("variadic call under the WASM32 ABI");
    }
    if !matches!(cif.abi, ffi_abi::Wasm32 | ffi_abi::Wasm32Emscripten) {
        crate::error::fatal("ffi_call with an unrecognised ABI tag");
    }

    // SAFETY: `rtype` is either null (void) or a valid, canonicalised
    // descriptor by the CIF's contract.
    let rtype: Option<&ffi_type> = unsafe { cif.rtype_ptr().as_ref() };
    let indirect = rtype.map(is_indirect_return).unwrap_or(false);

    let arg_types = cif.arg_types_ptr();
    let mut arg_refs: Vec<&ffi_type> = Vec::with_capacity(cif.nargs as usize);
    for i in 0..cif.nargs as usize {
        // SAFETY: contract of this function.
        let arg = unsafe { &*(*arg_types.add(i)) };
        arg_refs.push(arg);
    }

    // `cif.bytes` was cached by `prep_cif_machdep` (spec.md §2).
    let total = cif.bytes as usize;
    let mut buf = vec![0u8; total];
    let mut cursor = 0usize;

    if indirect {
        let dst = buf.as_mut_ptr();
        let ptr_bytes = crate::addr::to_addr(rvalue).to_le_bytes();
        // SAFETY: `buf` has at least 4 bytes when `indirect` is true.
        unsafe { core::ptr::copy_nonoverlapping(ptr_bytes.as_ptr(), dst, 4) };
        cursor += 4;
    }

    for (i, arg) in arg_refs.iter().enumerate() {
        // SAFETY: `avalue[i]` points at a valid value of `arg`'s type, and
        // `buf` has room for every argument's slot by construction above.
        unsafe {
            crate::marshal::lower(buf.as_mut_ptr(), &mut cursor, arg, *avalue.add(i));
        }
    }

    let results_len = if indirect {
        0
    } else {
        rtype.map(arg_size).unwrap_or(0)
    };

    let extra_vararg_slot = cif.is_varargs() && matches!(cif.abi, ffi_abi::Wasm32Emscripten);

    let result = dispatch_call_dynamic(
        fn_index,
        buf.as_ptr(),
        total as u32,
        rvalue,
        results_len as u32,
        indirect,
        &arg_refs,
        rtype,
        extra_vararg_slot,
    );
    if result.is_err() {
        crate::error::fatal("host dynamic-call primitive reported an error");
    }
}

#[cfg(feature = "host-mock")]
unsafe fn dispatch_call_dynamic(
    fn_index: u32,
    args_ptr: *const u8,
    args_len: u32,
    results_ptr: *mut u8,
    results_len: u32,
    _indirect: bool,
    _arg_refs: &[&ffi_type],
    _rtype: Option<&ffi_type>,
    _extra_vararg_slot: bool,
) -> Result<(), crate::host::HostError> {
    // SAFETY: forwarded per this function's contract.
    unsafe { crate::host::mock::call_dynamic(fn_index, args_ptr, args_len, results_ptr, results_len) }
}

#[cfg(all(not(feature = "host-mock"), feature = "host-wasi"))]
unsafe fn dispatch_call_dynamic(
    fn_index: u32,
    args_ptr: *const u8,
    args_len: u32,
    results_ptr: *mut u8,
    results_len: u32,
    _indirect: bool,
    _arg_refs: &[&ffi_type],
    _rtype: Option<&ffi_type>,
    _extra_vararg_slot: bool,
) -> Result<(), crate::host::HostError> {
    // SAFETY: forwarded per this function's contract.
    unsafe { crate::host::wasi::call_dynamic(fn_index, args_ptr, args_len, results_ptr, results_len) }
}

#[cfg(all(not(feature = "host-mock"), not(feature = "host-wasi"), feature = "host-js"))]
unsafe fn dispatch_call_dynamic(
    fn_index: u32,
    args_ptr: *const u8,
    _args_len: u32,
    results_ptr: *mut u8,
    _results_len: u32,
    indirect: bool,
    arg_refs: &[&ffi_type],
    rtype: Option<&ffi_type>,
    extra_vararg_slot: bool,
) -> Result<(), crate::host::HostError> {
    let mut arg_kinds = Vec::new();
    if indirect {
        arg_kinds.push(crate::classify::SlotKind::I32);
    }
    for arg in arg_refs {
        arg_kinds.extend_from_slice(crate::classify::slot_kinds(arg));
    }
    if extra_vararg_slot {
        // spec.md §4.8: the emscripten variant's variadic tail is delivered
        // behind one pointer, charged as its own trailing i32 slot.
        arg_kinds.push(crate::classify::SlotKind::I32);
    }
    let result_kind = if indirect {
        None
    } else {
        rtype.and_then(|t| crate::classify::slot_kinds(t).first().copied())
    };
    // SAFETY: forwarded per this function's contract; `arg_kinds` was built
    // from exactly the bytes written into `args_ptr` above.
    unsafe { crate::host::js::call_dynamic(fn_index, args_ptr, &arg_kinds, results_ptr, result_kind) }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raw::types;

    fn int_type() -> ffi_type {
        ffi_type::scalar(4, 4, Kind::Sint32)
    }

    #[test]
    fn prep_cif_caches_nfixedargs_for_non_variadic_calls() {
        let mut a = int_type();
        let mut b = int_type();
        let mut args = [&mut a as *mut ffi_type, &mut b as *mut ffi_type];
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 2,
            arg_types: crate::addr::to_addr(args.as_mut_ptr()),
            rtype: unsafe { crate::addr::to_addr(&mut types::sint32 as *mut ffi_type) },
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        assert_eq!(prep_cif_machdep(&mut cif), Status::Ok);
        assert_eq!(cif.nfixedargs, 2);
    }

    #[test]
    fn prep_cif_rejects_too_many_args() {
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: MAX_ARGS + 1,
            arg_types: 0,
            rtype: 0,
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        assert_eq!(prep_cif_machdep(&mut cif), Status::BadTypedef);
    }

    #[test]
    fn prep_cif_var_rejects_wasm32_abi() {
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 1,
            arg_types: 0,
            rtype: 0,
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        assert_eq!(prep_cif_machdep_var(&mut cif, 1, 2), Status::BadAbi);
    }

    #[test]
    #[cfg(feature = "host-mock")]
    fn add_scenario_end_to_end() {
        let slot = crate::host::mock::install_native(alloc::boxed::Box::new(
            |args: *const u8, _args_len: usize, results: *mut u8, _results_len: usize| unsafe {
                let a = i32::from_le_bytes(core::slice::from_raw_parts(args, 4).try_into().unwrap());
                let b = i32::from_le_bytes(
                    core::slice::from_raw_parts(args.add(4), 4).try_into().unwrap(),
                );
                let sum = (a + b).to_le_bytes();
                core::ptr::copy_nonoverlapping(sum.as_ptr(), results, 4);
            },
        ));

        let mut a = int_type();
        let mut b = int_type();
        let mut args = [&mut a as *mut ffi_type, &mut b as *mut ffi_type];
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 2,
            arg_types: crate::addr::to_addr(args.as_mut_ptr()),
            rtype: unsafe { crate::addr::to_addr(&mut types::sint32 as *mut ffi_type) },
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        assert_eq!(prep_cif_machdep(&mut cif), Status::Ok);

        let av: i32 = 3;
        let bv: i32 = 4;
        let avalue: [*const u8; 2] = [&av as *const i32 as *const u8, &bv as *const i32 as *const u8];
        let mut rvalue: i32 = 0;

        unsafe {
            ffi_call(&cif, slot, &mut rvalue as *mut i32 as *mut u8, avalue.as_ptr());
        }
        assert_eq!(rvalue, 7);
    }

    #[test]
    #[cfg(feature = "host-mock")]
    fn struct_swap_scenario_end_to_end() {
        // A two-int struct argument, passed by pointer, and a two-int
        // struct result, returned through the hidden indirect-return
        // pointer (spec.md §8's "struct round-trip" property).
        let slot = crate::host::mock::install_native(alloc::boxed::Box::new(
            |args: *const u8, _args_len: usize, _results: *mut u8, _results_len: usize| unsafe {
                let result_addr =
                    u32::from_le_bytes(core::slice::from_raw_parts(args, 4).try_into().unwrap());
                let arg_addr = u32::from_le_bytes(
                    core::slice::from_raw_parts(args.add(4), 4).try_into().unwrap(),
                );
                let result_ptr = crate::addr::from_addr::<i32>(result_addr);
                let arg_ptr = crate::addr::from_addr::<i32>(arg_addr);
                let a = *arg_ptr;
                let b = *arg_ptr.add(1);
                *result_ptr = b;
                *result_ptr.add(1) = a;
            },
        ));

        let mut elem_a = int_type();
        let mut elem_b = int_type();
        let mut elements = [
            &mut elem_a as *mut ffi_type,
            &mut elem_b as *mut ffi_type,
            core::ptr::null_mut(),
        ];
        let mut struct_ty = ffi_type::scalar(8, 4, Kind::Struct);
        struct_ty.elements = elements.as_mut_ptr();

        let mut struct_args = [&mut struct_ty as *mut ffi_type];
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 1,
            arg_types: crate::addr::to_addr(struct_args.as_mut_ptr()),
            rtype: crate::addr::to_addr(&mut struct_ty as *mut ffi_type),
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        assert_eq!(prep_cif_machdep(&mut cif), Status::Ok);

        let pair: [i32; 2] = [11, 22];
        let avalue: [*const u8; 1] = [pair.as_ptr() as *const u8];
        let mut out: [i32; 2] = [0, 0];

        unsafe {
            ffi_call(&cif, slot, out.as_mut_ptr() as *mut u8, avalue.as_ptr());
        }
        assert_eq!(out, [22, 11]);
    }

    #[test]
    #[cfg(feature = "host-mock")]
    fn longdouble_id_scenario_end_to_end() {
        // A `long double` argument and result, both passed as the
        // canonical two-i64-slot struct shape, with the result delivered
        // through the hidden indirect-return pointer (spec.md §8's
        // "indirect-return" property).
        let slot = crate::host::mock::install_native(alloc::boxed::Box::new(
            |args: *const u8, _args_len: usize, _results: *mut u8, _results_len: usize| unsafe {
                // The indirect-return pointer occupies the first slot; the
                // LONGDOUBLE argument itself is inlined (not passed by
                // pointer, unlike STRUCT) in the following 16 bytes.
                let result_addr =
                    u32::from_le_bytes(core::slice::from_raw_parts(args, 4).try_into().unwrap());
                let result_ptr = crate::addr::from_addr::<u8>(result_addr);
                core::ptr::copy_nonoverlapping(args.add(4), result_ptr, 16);
            },
        ));

        let mut longdouble_ty = ffi_type::scalar(16, 16, Kind::LongDouble);
        // The canonicaliser rewrites a LONGDOUBLE argument's own descriptor
        // copy to the two-i64-slot struct shape only when it is itself the
        // return type; here we prepare the argument and return descriptors
        // separately to match what `ffi_prep_cif` would hand the core.
        let mut return_ty = ffi_type::scalar(16, 16, Kind::LongDouble);

        let mut args = [&mut longdouble_ty as *mut ffi_type];
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 1,
            arg_types: crate::addr::to_addr(args.as_mut_ptr()),
            rtype: crate::addr::to_addr(&mut return_ty as *mut ffi_type),
            bytes: 0,
            flags: 0,
            nfixedargs: 0,
        };
        assert_eq!(prep_cif_machdep(&mut cif), Status::Ok);
        assert_eq!(return_ty.kind, Kind::Struct);

        let value: [u64; 2] = [0x0102_0304_0506_0708, 0x1112_1314_1516_1718];
        let avalue: [*const u8; 1] = [value.as_ptr() as *const u8];
        let mut out: [u64; 2] = [0, 0];

        unsafe {
            ffi_call(&cif, slot, out.as_mut_ptr() as *mut u8, avalue.as_ptr());
        }
        assert_eq!(out, value);
    }
}
