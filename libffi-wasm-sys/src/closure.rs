//! The closure engine: table-slot allocation and reverse marshalling for
//! dynamically-constructed callables (spec.md §4.6, §4.7).

use alloc::vec::Vec;
use core::ffi::c_void;

use crate::classify::{is_indirect_return, slot_kinds, SlotKind};
use crate::raw::{ffi_abi, ffi_cif, ffi_closure, ffi_type, RawCallback};

/// Header prepended to every closure allocation, recording the reserved
/// table slot (and, since the global allocator needs it back, the visible
/// allocation's length) so `closure_free` can undo `closure_alloc`.
#[repr(C)]
struct Header {
    table_index: u32,
    payload_len: u32,
}

const HEADER_SIZE: usize = core::mem::size_of::<Header>();

fn header_align() -> usize {
    core::cmp::max(core::mem::align_of::<ffi_closure>(), core::mem::align_of::<usize>())
}

/// Allocates a closure payload of `size` bytes and reserves a table slot
/// for it, writing the slot index into `*code`.
///
/// # Safety
/// `code` must point at valid storage for one `u32`.
pub unsafe fn closure_alloc(size: usize, code: *mut u32) -> *mut u8 {
    use alloc::alloc::{alloc, Layout};

    let align = header_align();
    let header_region = align.max(HEADER_SIZE);
    let total = header_region + size;
    let layout = match Layout::from_size_align(total, align) {
        Ok(l) => l,
        Err(_) => crate::error::fatal("invalid layout in closure_alloc"),
    };

    // SAFETY: `layout` has nonzero size.
    let base = unsafe { alloc(layout) };
    if base.is_null() {
        crate::error::fatal("allocation failure in closure_alloc");
    }

    let slot = match reserve_table_slot() {
        Ok(s) => s,
        Err(_) => crate::error::fatal("host failed to reserve a table slot"),
    };

    // SAFETY: `base` has room for a `Header` by construction.
    unsafe {
        core::ptr::write(
            base as *mut Header,
            Header {
                table_index: slot,
                payload_len: size as u32,
            },
        );
        core::ptr::write(code, slot);
    }

    // SAFETY: `base.add(header_region)` stays within the allocation.
    unsafe { base.add(header_region) }
}

/// Frees a closure previously returned by `closure_alloc`, returning its
/// table slot to the host's free list.
///
/// # Safety
/// `p` must be a pointer previously returned by `closure_alloc` and not
/// already freed.
pub unsafe fn closure_free(p: *mut u8) {
    use alloc::alloc::{dealloc, Layout};

    let align = header_align();
    let header_region = align.max(HEADER_SIZE);
    // SAFETY: `p` was produced by `closure_alloc`, which always offsets by
    // `header_region`.
    let base = unsafe { p.sub(header_region) };
    // SAFETY: `base` points at a `Header` written by `closure_alloc`.
    let header = unsafe { core::ptr::read(base as *const Header) };

    if release_table_slot(header.table_index).is_err() {
        crate::error::fatal("host failed to release a table slot");
    }

    let total = header_region + header.payload_len as usize;
    // SAFETY: `total`/`align` match what `closure_alloc` used.
    let layout = Layout::from_size_align_unchecked(total, align);
    unsafe { dealloc(base, layout) };
}

fn flatten_arg_slot_kinds(cif: &ffi_cif, indirect: bool) -> Vec<SlotKind> {
    let mut kinds = Vec::with_capacity(cif.nargs as usize + 1);
    if indirect {
        kinds.push(SlotKind::I32);
    }
    let arg_types = cif.arg_types_ptr();
    for i in 0..cif.nargs as usize {
        // SAFETY: `arg_types` holds `nargs` valid pointers by the CIF's
        // contract.
        let arg = unsafe { &*(*arg_types.add(i)) };
        kinds.extend_from_slice(slot_kinds(arg));
    }
    kinds
}

/// Shared by both host variants: recovers the closure's bound state, raises
/// the incoming argument buffer into a typed `argv`, and invokes the user
/// handler (spec.md §4.6 step 1–5, §4.7's non-stack-dance steps).
///
/// # Safety
/// `closure_ptr` must be a live closure object prepared by
/// [`prep_closure_loc`]. `args_buf` must hold the lowered argument bytes
/// (including a leading hidden-return pointer, if any) for `cif.nargs`
/// fixed arguments. `results_buf` must have room for a direct return, or be
/// unused when the return is indirect.
pub unsafe extern "C" fn invoke_closure_backing(
    args_buf: *const u8,
    results_buf: *mut u8,
    closure_ptr: *mut u8,
) {
    // SAFETY: contract of this function.
    let closure = unsafe { &*(closure_ptr as *const ffi_closure) };
    // SAFETY: `cif` was recorded by `prep_closure_loc` from a caller-owned,
    // still-live CIF.
    let cif = unsafe { &*closure.cif };
    // SAFETY: `rtype` is either null (void) or a valid canonical descriptor.
    let rtype: Option<&ffi_type> = unsafe { cif.rtype_ptr().as_ref() };
    let indirect = rtype.map(is_indirect_return).unwrap_or(false);

    let mut cursor = 0usize;
    let result_area: *mut c_void = if indirect {
        // SAFETY: the first 4 bytes of `args_buf` hold the hidden return
        // pointer written by the forward caller (or its host-side
        // equivalent), as a `crate::addr`-encoded address rather than a
        // truncated native pointer.
        let raw = unsafe { core::ptr::read_unaligned(args_buf as *const u32) };
        cursor = 4;
        crate::addr::from_addr::<c_void>(raw)
    } else {
        results_buf as *mut c_void
    };

    let arg_types = cif.arg_types_ptr();
    let mut argv: Vec<*mut c_void> = Vec::with_capacity(cif.nargs as usize);
    for i in 0..cif.nargs as usize {
        // SAFETY: `arg_types[i]` is valid by the CIF's contract; `args_buf`
        // has room for every declared argument by this function's contract.
        let arg = unsafe { &*(*arg_types.add(i)) };
        // SAFETY: forwarded per this function's contract.
        let p = unsafe { crate::marshal::raise(args_buf, &mut cursor, arg) };
        argv.push(p as *mut c_void);
    }

    if let Some(fun) = closure.fun {
        // SAFETY: `fun` was installed by `prep_closure_loc` with the
        // signature this call matches.
        unsafe {
            fun(closure.cif, result_area, argv.as_mut_ptr(), closure.user_data);
        }
    }
}

// ---------------------------------------------------------------------
// Non-JS (WASI-like) variant
// ---------------------------------------------------------------------

#[cfg(all(feature = "host-wasi", not(feature = "host-mock")))]
mod wasi_engine {
    use core::sync::atomic::{AtomicU32, Ordering};

    /// The table index of `invoke_closure_backing`, wired up once at
    /// module start by the embedder (it is the one piece of state this
    /// crate cannot discover on its own: only the host knows where it
    /// placed our export in the table).
    static BACKING_FN_INDEX: AtomicU32 = AtomicU32::new(u32::MAX);

    pub fn register_backing_fn_index(index: u32) {
        BACKING_FN_INDEX.store(index, Ordering::SeqCst);
    }

    pub fn backing_fn_index() -> u32 {
        let v = BACKING_FN_INDEX.load(Ordering::SeqCst);
        if v == u32::MAX {
            crate::error::fatal("backing function table index was never registered");
        }
        v
    }
}

#[cfg(all(feature = "host-wasi", not(feature = "host-mock")))]
pub use wasi_engine::register_backing_fn_index;

#[cfg(feature = "host-js")]
mod js_backing_engine {
    use core::sync::atomic::{AtomicU32, Ordering};

    /// The table index of `invoke_closure_backing` as seen from JS, wired
    /// up once at module start by the embedder — mirrors
    /// [`super::wasi_engine::BACKING_FN_INDEX`] for the JS-hosted variant,
    /// which resolves it through [`crate::host::js::get_wasm_table_entry`]
    /// instead of a direct `call_indirect`.
    static BACKING_FN_INDEX: AtomicU32 = AtomicU32::new(u32::MAX);

    pub fn register_js_backing_fn_index(index: u32) {
        BACKING_FN_INDEX.store(index, Ordering::SeqCst);
    }

    pub fn backing_fn_index() -> u32 {
        let v = BACKING_FN_INDEX.load(Ordering::SeqCst);
        if v == u32::MAX {
            crate::error::fatal("JS backing function table index was never registered");
        }
        v
    }
}

#[cfg(feature = "host-js")]
pub use js_backing_engine::register_js_backing_fn_index;

fn reserve_table_slot() -> Result<u32, crate::host::HostError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "host-mock")] {
            crate::host::mock::closure_allocate()
        } else if #[cfg(feature = "host-wasi")] {
            crate::host::wasi::closure_allocate()
        } else if #[cfg(feature = "host-js")] {
            Ok(crate::host::js::get_empty_table_slot())
        } else {
            compile_error!("one of `host-wasi`, `host-js`, or `host-mock` must be enabled")
        }
    }
}

fn release_table_slot(slot: u32) -> Result<(), crate::host::HostError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "host-mock")] {
            crate::host::mock::closure_free(slot)
        } else if #[cfg(feature = "host-wasi")] {
            crate::host::wasi::closure_free(slot)
        } else if #[cfg(feature = "host-js")] {
            let _ = slot;
            Ok(())
        } else {
            compile_error!("one of `host-wasi`, `host-js`, or `host-mock` must be enabled")
        }
    }
}

/// Binds `closure` to `fun`/`user_data` and installs its trampoline at
/// `codeloc`, dispatching to whichever host variant is linked.
///
/// # Safety
/// `closure` must be a live allocation from `closure_alloc`. `cif` and
/// `user_data` must outlive the closure. `fun` must accept the argument
/// types described by `cif`.
pub unsafe fn prep_closure_loc(
    closure: *mut ffi_closure,
    cif: *mut ffi_cif,
    fun: RawCallback,
    user_data: *mut c_void,
    codeloc: u32,
) -> crate::raw::Status {
    // SAFETY: caller guarantees `cif` is valid.
    let cif_ref = unsafe { &*cif };
    if matches!(cif_ref.abi, ffi_abi::Wasm32Emscripten) {
        cfg_if::cfg_if! {
            if #[cfg(any(feature = "host-js", feature = "host-mock"))] {
                return prep_closure_loc_js(closure, cif, fun, user_data, codeloc);
            } else {
                log::warn!("emscripten-ABI closure requested but host-js is not enabled");
                return crate::raw::Status::BadAbi;
            }
        }
    }

    // SAFETY: `closure` is caller-guaranteed valid and exclusively owned.
    unsafe {
        (*closure).ftramp = codeloc;
        (*closure).cif = cif;
        (*closure).fun = Some(fun);
        (*closure).user_data = user_data;
    }

    let rtype: Option<&ffi_type> = unsafe { cif_ref.rtype_ptr().as_ref() };
    let indirect = rtype.map(is_indirect_return).unwrap_or(false);
    let arg_kinds: alloc::vec::Vec<u8> = flatten_arg_slot_kinds(cif_ref, indirect)
        .into_iter()
        .map(|k| k as u8)
        .collect();
    let result_kinds: alloc::vec::Vec<u8> = if indirect {
        alloc::vec::Vec::new()
    } else {
        rtype
            .map(|t| slot_kinds(t).iter().map(|k| *k as u8).collect())
            .unwrap_or_default()
    };

    // SAFETY: `closure` is pinned for the lifetime of the installed slot;
    // `arg_kinds`/`result_kinds` describe exactly `cif`'s shape.
    let install_result =
        unsafe { install_backing_trampoline(codeloc, &arg_kinds, &result_kinds, closure as *mut u8) };

    if install_result.is_err() {
        crate::error::fatal("host failed to install a closure trampoline");
    }

    crate::raw::Status::Ok
}

#[cfg(feature = "host-mock")]
unsafe fn install_backing_trampoline(
    codeloc: u32,
    _arg_kinds: &[u8],
    _result_kinds: &[u8],
    user_data: *mut u8,
) -> Result<(), crate::host::HostError> {
    // SAFETY: forwarded per this function's contract.
    unsafe { crate::host::mock::closure_prepare(invoke_closure_backing, codeloc, user_data) }
}

#[cfg(all(not(feature = "host-mock"), feature = "host-wasi"))]
unsafe fn install_backing_trampoline(
    codeloc: u32,
    arg_kinds: &[u8],
    result_kinds: &[u8],
    user_data: *mut u8,
) -> Result<(), crate::host::HostError> {
    // SAFETY: forwarded per this function's contract.
    unsafe {
        crate::host::wasi::closure_prepare(
            wasi_engine::backing_fn_index(),
            codeloc,
            arg_kinds,
            result_kinds,
            user_data,
        )
    }
}

#[cfg(all(not(feature = "host-mock"), not(feature = "host-wasi"), feature = "host-js"))]
unsafe fn install_backing_trampoline(
    _codeloc: u32,
    _arg_kinds: &[u8],
    _result_kinds: &[u8],
    _user_data: *mut u8,
) -> Result<(), crate::host::HostError> {
    crate::error::fatal("the WASI-like closure engine requires `host-wasi` or `host-mock`, not `host-js`")
}

// ---------------------------------------------------------------------
// JS-hosted variant
// ---------------------------------------------------------------------

fn signature_letter(kind: SlotKind) -> char {
    match kind {
        SlotKind::I32 => 'i',
        SlotKind::I64 => 'j',
        SlotKind::F32 => 'f',
        SlotKind::F64 => 'd',
    }
}

/// The Emscripten `setValue`/`getValue` type tag for one wasm primitive
/// slot.
#[cfg(feature = "host-js")]
fn setvalue_type(kind: SlotKind) -> &'static str {
    match kind {
        SlotKind::I32 => "i32",
        SlotKind::I64 => "i64",
        SlotKind::F32 => "float",
        SlotKind::F64 => "double",
    }
}

/// Builds the `<ret><args...>` wasm signature string for `cif`, per
/// spec.md §4.7.
fn build_signature(cif: &ffi_cif) -> alloc::string::String {
    use alloc::string::String;

    let rtype: Option<&ffi_type> = unsafe { cif.rtype_ptr().as_ref() };
    let indirect = rtype.map(is_indirect_return).unwrap_or(false);

    let mut sig = String::new();
    if indirect || rtype.is_none() {
        sig.push('v');
    } else {
        let t = rtype.unwrap();
        sig.push(signature_letter(slot_kinds(t)[0]));
    }

    if indirect {
        sig.push('i');
    }

    let arg_types = cif.arg_types_ptr();
    for i in 0..cif.nfixedargs as usize {
        // SAFETY: `arg_types` holds `nargs` valid pointers; fixed args are
        // the first `nfixedargs` of them.
        let arg = unsafe { &*(*arg_types.add(i)) };
        for kind in slot_kinds(arg) {
            sig.push(signature_letter(*kind));
        }
    }

    if cif.is_varargs() {
        sig.push('i');
    }

    sig
}

/// Builds the body and JS parameter-name list for one closure's trampoline.
///
/// Implements spec.md §4.7's stack dance (steps i-ix) on top of the shared
/// [`invoke_closure_backing`], which already performs the Raiser pass and
/// invokes the user handler (the function's own doc comment notes it
/// covers "§4.7's non-stack-dance steps"): this trampoline's only job is
/// to lower each incoming JS value into a packed wasm-ABI byte buffer —
/// the same layout `prep_cif_machdep` sizes into `cif.bytes` — and make
/// the one cross into compiled wasm through the backing function's table
/// slot, using only the host's already-declared `stackSave`/`stackAlloc`/
/// `stackRestore`/`getWasmTableEntry` primitives plus Emscripten's
/// `setValue`/`getValue` runtime helpers.
#[cfg(feature = "host-js")]
fn build_js_trampoline_body(
    cif: &ffi_cif,
    closure_addr: crate::addr::Addr,
    backing_fn_index: u32,
) -> (alloc::string::String, alloc::vec::Vec<alloc::string::String>) {
    use alloc::string::String;
    use alloc::vec::Vec;

    let rtype: Option<&ffi_type> = unsafe { cif.rtype_ptr().as_ref() };
    let indirect = rtype.map(is_indirect_return).unwrap_or(false);
    let arg_types = cif.arg_types_ptr();

    let mut params: Vec<String> = Vec::new();
    let mut lower = String::new();
    let mut offset: i32 = 0;

    let result_ptr_expr = if indirect {
        params.push(String::from("rp"));
        lower.push_str(&alloc::format!("  Module.setValue(argsBuf + {offset}, rp, 'i32');\n"));
        offset += 4;
        String::from("rp")
    } else {
        String::from("resultArea")
    };

    for i in 0..cif.nfixedargs as usize {
        // SAFETY: `arg_types` holds `nargs` valid pointers; fixed args are
        // the first `nfixedargs` of them.
        let arg = unsafe { &*(*arg_types.add(i)) };
        for kind in slot_kinds(arg) {
            let name = alloc::format!("a{}", params.len());
            let ty = setvalue_type(*kind);
            lower.push_str(&alloc::format!(
                "  Module.setValue(argsBuf + {offset}, {name}, '{ty}');\n"
            ));
            params.push(name);
            offset += kind.byte_size() as i32;
        }
    }

    // Variadic tail: the host delivers it as a pointer to an array of
    // 4-byte-spaced boxed slots regardless of each value's real size
    // (spec.md §4.7 step v); STRUCT varargs box a pointer to the struct,
    // so those slots need one extra dereference.
    if cif.is_varargs() {
        let mut vp_cursor: i32 = 0;
        for i in cif.nfixedargs as usize..cif.nargs as usize {
            // SAFETY: forwarded from this function's contract.
            let arg = unsafe { &*(*arg_types.add(i)) };
            let kind = slot_kinds(arg)[0];
            let ty = setvalue_type(kind);
            let box_name = alloc::format!("vbox{i}");
            lower.push_str(&alloc::format!(
                "  var {box_name} = Module.getValue(vp + {vp_cursor}, 'i32');\n"
            ));
            if arg.kind.is_struct() {
                lower.push_str(&alloc::format!(
                    "  Module.setValue(argsBuf + {offset}, Module.getValue({box_name}, 'i32'), 'i32');\n"
                ));
            } else {
                lower.push_str(&alloc::format!(
                    "  Module.setValue(argsBuf + {offset}, Module.getValue({box_name}, '{ty}'), '{ty}');\n"
                ));
            }
            offset += kind.byte_size() as i32;
            vp_cursor += 4;
        }
        params.push(String::from("vp"));
    }

    let args_buf_bytes = cif.bytes as i32;
    let scratch_bytes: i32 = if indirect {
        0
    } else {
        rtype.map(|t| slot_kinds(t)[0].byte_size() as i32).unwrap_or(0)
    };

    let mut body = String::new();
    body.push_str("var sp = Module.stackSave();\n");
    body.push_str("try {\n");
    body.push_str(&alloc::format!("  var argsBuf = Module.stackAlloc({args_buf_bytes});\n"));
    if !indirect {
        if scratch_bytes > 0 {
            body.push_str(&alloc::format!("  var resultArea = Module.stackAlloc({scratch_bytes});\n"));
        } else {
            body.push_str("  var resultArea = 0;\n");
        }
    }
    body.push_str(&lower);
    body.push_str(&alloc::format!(
        "  Module.getWasmTableEntry({backing_fn_index})(argsBuf, {result_ptr_expr}, {closure_addr});\n"
    ));
    if !indirect {
        if let Some(t) = rtype {
            let ty = setvalue_type(slot_kinds(t)[0]);
            body.push_str(&alloc::format!("  return Module.getValue(resultArea, '{ty}');\n"));
        }
    }
    body.push_str("} finally {\n");
    body.push_str("  Module.stackRestore(sp);\n");
    body.push_str("}");

    (body, params)
}

#[cfg(any(feature = "host-js", feature = "host-mock"))]
unsafe fn prep_closure_loc_js(
    closure: *mut ffi_closure,
    cif: *mut ffi_cif,
    fun: RawCallback,
    user_data: *mut c_void,
    codeloc: u32,
) -> crate::raw::Status {
    // SAFETY: closure/cif validity is the caller's contract, forwarded
    // from `prep_closure_loc`.
    unsafe {
        (*closure).ftramp = codeloc;
        (*closure).cif = cif;
        (*closure).fun = Some(fun);
        (*closure).user_data = user_data;
    }

    #[cfg(feature = "host-js")]
    {
        let sig = build_signature(unsafe { &*cif });
        log::debug!("installing JS trampoline with signature {sig:?} at slot {codeloc}");

        let closure_addr = crate::addr::to_addr(closure);
        let backing_fn_index = js_backing_engine::backing_fn_index();
        let (body, params) =
            build_js_trampoline_body(unsafe { &*cif }, closure_addr, backing_fn_index);

        let js_args: alloc::vec::Vec<&str> = params.iter().map(|s| s.as_str()).collect();
        let js_fn = js_sys::Function::new_with_args(&js_args.join(","), &body);

        let wasm_fn = match crate::host::js::convert_js_function_to_wasm(&js_fn, &sig) {
            Ok(f) => f,
            Err(_) => {
                log::warn!("convertJsFunctionToWasm failed for signature {sig:?}");
                return crate::raw::Status::BadTypedef;
            }
        };

        crate::host::js::set_wasm_table_entry(codeloc, &wasm_fn);
    }

    #[cfg(not(feature = "host-js"))]
    {
        let _ = build_signature(unsafe { &*cif });
    }

    crate::raw::Status::Ok
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raw::{ffi_abi, types, Kind};

    fn int_type() -> ffi_type {
        ffi_type::scalar(4, 4, Kind::Sint32)
    }

    unsafe extern "C" fn echo_first_arg(
        _cif: *mut ffi_cif,
        result: *mut c_void,
        argv: *mut *mut c_void,
        _user_data: *mut c_void,
    ) {
        unsafe {
            let p = *argv;
            core::ptr::copy_nonoverlapping(p as *const u8, result as *mut u8, 4);
        }
    }

    #[cfg(feature = "host-mock")]
    #[test]
    fn closure_round_trip_scalar() {
        let mut ty = int_type();
        let mut args = [&mut ty as *mut ffi_type];
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 1,
            arg_types: crate::addr::to_addr(args.as_mut_ptr()),
            rtype: unsafe { crate::addr::to_addr(&mut types::sint32 as *mut ffi_type) },
            bytes: 0,
            flags: 0,
            nfixedargs: 1,
        };

        let mut code: u32 = 0;
        let payload = unsafe { closure_alloc(core::mem::size_of::<ffi_closure>(), &mut code) };
        let closure = payload as *mut ffi_closure;

        let status = unsafe {
            prep_closure_loc(
                closure,
                &mut cif,
                echo_first_arg,
                core::ptr::null_mut(),
                code,
            )
        };
        assert_eq!(status, crate::raw::Status::Ok);

        let value: i32 = 42;
        let mut args_buf = [0u8; 4];
        args_buf.copy_from_slice(&value.to_le_bytes());
        let mut results_buf = [0u8; 4];

        unsafe {
            crate::host::mock::invoke_closure(code, args_buf.as_ptr(), results_buf.as_mut_ptr())
                .unwrap();
        }
        assert_eq!(i32::from_le_bytes(results_buf), 42);

        unsafe { closure_free(payload) };
    }

    unsafe extern "C" fn echo_generic_arg(
        cif: *mut ffi_cif,
        result: *mut c_void,
        argv: *mut *mut c_void,
        _user_data: *mut c_void,
    ) {
        unsafe {
            let cif_ref = &*cif;
            let arg_ty = &*(*cif_ref.arg_types_ptr());
            let n = crate::classify::slot_bytes(arg_ty);
            core::ptr::copy_nonoverlapping(*argv as *const u8, result as *mut u8, n);
        }
    }

    #[cfg(feature = "host-mock")]
    #[test]
    fn closure_round_trip_every_scalar_kind() {
        let cases: &[(Kind, usize, u16)] = &[
            (Kind::Sint8, 1, 1),
            (Kind::Uint8, 1, 1),
            (Kind::Sint16, 2, 2),
            (Kind::Uint16, 2, 2),
            (Kind::Sint32, 4, 4),
            (Kind::Uint32, 4, 4),
            (Kind::Pointer, 4, 4),
            (Kind::Float, 4, 4),
            (Kind::Uint64, 8, 8),
            (Kind::Sint64, 8, 8),
            (Kind::Double, 8, 8),
        ];

        for &(kind, size, align) in cases {
            let mut arg_ty = ffi_type::scalar(size, align, kind);
            let mut ret_ty = ffi_type::scalar(size, align, kind);
            let mut args = [&mut arg_ty as *mut ffi_type];
            let mut cif = ffi_cif {
                abi: ffi_abi::Wasm32,
                nargs: 1,
                arg_types: crate::addr::to_addr(args.as_mut_ptr()),
                rtype: crate::addr::to_addr(&mut ret_ty as *mut ffi_type),
                bytes: 0,
                flags: 0,
                nfixedargs: 1,
            };

            let mut code: u32 = 0;
            let payload = unsafe { closure_alloc(core::mem::size_of::<ffi_closure>(), &mut code) };
            let closure = payload as *mut ffi_closure;
            let status = unsafe {
                prep_closure_loc(closure, &mut cif, echo_generic_arg, core::ptr::null_mut(), code)
            };
            assert_eq!(status, crate::raw::Status::Ok, "{kind:?}");

            let value: u64 = 0x0102_0304_0506_0708;
            let n = slot_kinds(&arg_ty)[0].byte_size();
            let mut args_buf = [0u8; 8];
            args_buf[0..n].copy_from_slice(&value.to_le_bytes()[0..n]);
            let mut out: u64 = 0;

            unsafe {
                crate::host::mock::invoke_closure(
                    code,
                    args_buf.as_ptr(),
                    &mut out as *mut u64 as *mut u8,
                )
                .unwrap();
            }
            assert_eq!(out.to_le_bytes()[0..n], value.to_le_bytes()[0..n], "{kind:?}");

            unsafe { closure_free(payload) };
        }
    }

    unsafe extern "C" fn copy_struct_arg(
        _cif: *mut ffi_cif,
        result: *mut c_void,
        argv: *mut *mut c_void,
        _user_data: *mut c_void,
    ) {
        unsafe {
            core::ptr::copy_nonoverlapping(*argv as *const u8, result as *mut u8, 8);
        }
    }

    #[cfg(feature = "host-mock")]
    #[test]
    fn closure_round_trip_struct() {
        // A two-field struct argument, passed by address, with the result
        // delivered through the indirect-return pointer.
        let mut elem_a = int_type();
        let mut elem_b = int_type();
        let mut elements = [
            &mut elem_a as *mut ffi_type,
            &mut elem_b as *mut ffi_type,
            core::ptr::null_mut(),
        ];
        let mut struct_ty = ffi_type::scalar(8, 4, Kind::Struct);
        struct_ty.elements = elements.as_mut_ptr();

        let mut args = [&mut struct_ty as *mut ffi_type];
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 1,
            arg_types: crate::addr::to_addr(args.as_mut_ptr()),
            rtype: crate::addr::to_addr(&mut struct_ty as *mut ffi_type),
            bytes: 0,
            flags: 0,
            nfixedargs: 1,
        };

        let mut code: u32 = 0;
        let payload = unsafe { closure_alloc(core::mem::size_of::<ffi_closure>(), &mut code) };
        let closure = payload as *mut ffi_closure;
        let status = unsafe {
            prep_closure_loc(closure, &mut cif, copy_struct_arg, core::ptr::null_mut(), code)
        };
        assert_eq!(status, crate::raw::Status::Ok);

        let pair: [i32; 2] = [5, 9];
        // A stack-local address, not a small literal, to catch a
        // truncating pointer-to-address conversion.
        let pair_addr = crate::addr::to_addr(pair.as_ptr() as *mut i32);
        let mut out: [i32; 2] = [0, 0];
        let out_addr = crate::addr::to_addr(out.as_mut_ptr());

        let mut args_buf = [0u8; 8];
        args_buf[0..4].copy_from_slice(&out_addr.to_le_bytes());
        args_buf[4..8].copy_from_slice(&pair_addr.to_le_bytes());

        unsafe {
            crate::host::mock::invoke_closure(code, args_buf.as_ptr(), core::ptr::null_mut())
                .unwrap();
        }
        assert_eq!(out, pair);

        unsafe { closure_free(payload) };
    }

    unsafe extern "C" fn echo_longdouble_arg(
        _cif: *mut ffi_cif,
        result: *mut c_void,
        argv: *mut *mut c_void,
        _user_data: *mut c_void,
    ) {
        unsafe {
            core::ptr::copy_nonoverlapping(*argv as *const u8, result as *mut u8, 16);
        }
    }

    #[cfg(feature = "host-mock")]
    #[test]
    fn closure_round_trip_longdouble() {
        let mut arg_ty = ffi_type::scalar(16, 16, Kind::LongDouble);
        // The canonical LONGDOUBLE-result shape (spec.md §4.1): already
        // rewritten to STRUCT, as `prep_cif_machdep` would leave it.
        let mut ret_ty = ffi_type::scalar(16, 16, Kind::Struct);

        let mut args = [&mut arg_ty as *mut ffi_type];
        let mut cif = ffi_cif {
            abi: ffi_abi::Wasm32,
            nargs: 1,
            arg_types: crate::addr::to_addr(args.as_mut_ptr()),
            rtype: crate::addr::to_addr(&mut ret_ty as *mut ffi_type),
            bytes: 0,
            flags: 0,
            nfixedargs: 1,
        };

        let mut code: u32 = 0;
        let payload = unsafe { closure_alloc(core::mem::size_of::<ffi_closure>(), &mut code) };
        let closure = payload as *mut ffi_closure;
        let status = unsafe {
            prep_closure_loc(closure, &mut cif, echo_longdouble_arg, core::ptr::null_mut(), code)
        };
        assert_eq!(status, crate::raw::Status::Ok);

        let value: [u64; 2] = [0xAAAA_BBBB_CCCC_DDDD, 0x1111_2222_3333_4444];
        let mut out: [u64; 2] = [0, 0];
        let out_addr = crate::addr::to_addr(out.as_mut_ptr());

        let mut args_buf = [0u8; 20];
        args_buf[0..4].copy_from_slice(&out_addr.to_le_bytes());
        args_buf[4..12].copy_from_slice(&value[0].to_le_bytes());
        args_buf[12..20].copy_from_slice(&value[1].to_le_bytes());

        unsafe {
            crate::host::mock::invoke_closure(code, args_buf.as_ptr(), core::ptr::null_mut())
                .unwrap();
        }
        assert_eq!(out, value);

        unsafe { closure_free(payload) };
    }
}
