//! The two small runtime primitives the core consumes from its host
//! (spec.md §6), plus (test-only) an in-process mock of both.
//!
//! Exactly one of `host-wasi` / `host-js` is expected to be linked into a
//! real build; `host-mock` stands in for either when exercising the core
//! from ordinary `cargo test`.

use crate::classify::SlotKind;

/// Kind tags passed across the host boundary, matching spec.md §6's
/// neutral interface numbering.
pub const KIND_I32: u32 = SlotKind::I32 as u32;
pub const KIND_I64: u32 = SlotKind::I64 as u32;
pub const KIND_F32: u32 = SlotKind::F32 as u32;
pub const KIND_F64: u32 = SlotKind::F64 as u32;

/// Error signalled by a host primitive; always fatal at the call site
/// (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostError;

#[cfg(feature = "host-wasi")]
pub mod wasi {
    //! Variant A: a table-indexed dynamic call plus a fixed backing
    //! function installed by the host at a reserved slot.

    use super::HostError;

    #[link(wasm_import_module = "libffi_wasm")]
    extern "C" {
        #[link_name = "call_dynamic"]
        fn host_call_dynamic(
            fn_index: u32,
            args_ptr: *const u8,
            args_len: u32,
            results_ptr: *mut u8,
            results_len: u32,
        ) -> i32;

        #[link_name = "closure_allocate"]
        fn host_closure_allocate(fn_index_out: *mut u32) -> i32;

        #[link_name = "closure_prepare"]
        fn host_closure_prepare(
            backing_fn: u32,
            fn_index: u32,
            arg_kinds_ptr: *const u8,
            arg_kinds_len: u32,
            result_kinds_ptr: *const u8,
            result_kinds_len: u32,
            user_data: *mut u8,
        ) -> i32;

        #[link_name = "closure_free"]
        fn host_closure_free(fn_index: u32) -> i32;
    }

    /// # Safety
    /// `args_ptr`/`results_ptr` must reference buffers of at least
    /// `args_len`/`results_len` bytes.
    pub unsafe fn call_dynamic(
        fn_index: u32,
        args_ptr: *const u8,
        args_len: u32,
        results_ptr: *mut u8,
        results_len: u32,
    ) -> Result<(), HostError> {
        // SAFETY: forwarded verbatim to the host import.
        let rc = unsafe { host_call_dynamic(fn_index, args_ptr, args_len, results_ptr, results_len) };
        if rc == 0 {
            Ok(())
        } else {
            Err(HostError)
        }
    }

    pub fn closure_allocate() -> Result<u32, HostError> {
        let mut slot = 0u32;
        // SAFETY: `&mut slot` is a valid `*mut u32` for the duration of
        // the call.
        let rc = unsafe { host_closure_allocate(&mut slot) };
        if rc == 0 {
            Ok(slot)
        } else {
            Err(HostError)
        }
    }

    /// # Safety
    /// `arg_kinds`/`result_kinds` must be valid for their stated lengths;
    /// `user_data` must remain valid for as long as the installed
    /// trampoline may be invoked.
    pub unsafe fn closure_prepare(
        backing_fn: u32,
        fn_index: u32,
        arg_kinds: &[u8],
        result_kinds: &[u8],
        user_data: *mut u8,
    ) -> Result<(), HostError> {
        // SAFETY: slices are valid by the caller's contract; lengths match
        // what is passed.
        let rc = unsafe {
            host_closure_prepare(
                backing_fn,
                fn_index,
                arg_kinds.as_ptr(),
                arg_kinds.len() as u32,
                result_kinds.as_ptr(),
                result_kinds.len() as u32,
                user_data,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(HostError)
        }
    }

    pub fn closure_free(fn_index: u32) -> Result<(), HostError> {
        // SAFETY: no preconditions beyond a valid `fn_index`, which the
        // host validates itself.
        let rc = unsafe { host_closure_free(fn_index) };
        if rc == 0 {
            Ok(())
        } else {
            Err(HostError)
        }
    }
}

#[cfg(feature = "host-js")]
pub mod js {
    //! Variant B: linear-memory views, a scratch wasm stack, and
    //! host-function-to-wasm-function conversion.

    use js_sys::Function;
    use wasm_bindgen::prelude::*;

    #[wasm_bindgen]
    extern "C" {
        #[wasm_bindgen(js_name = stackSave)]
        pub fn stack_save() -> i32;
        #[wasm_bindgen(js_name = stackRestore)]
        pub fn stack_restore(sp: i32);
        #[wasm_bindgen(js_name = stackAlloc)]
        pub fn stack_alloc(size: i32) -> i32;

        #[wasm_bindgen(js_name = getWasmTableEntry)]
        pub fn get_wasm_table_entry(index: u32) -> Function;
        #[wasm_bindgen(js_name = setWasmTableEntry)]
        pub fn set_wasm_table_entry(index: u32, f: &Function);
        #[wasm_bindgen(js_name = getEmptyTableSlot)]
        pub fn get_empty_table_slot() -> u32;

        #[wasm_bindgen(js_name = convertJsFunctionToWasm, catch)]
        pub fn convert_js_function_to_wasm(f: &Function, sig: &str) -> Result<Function, JsValue>;

        /// Emscripten's `setValue`/`getValue` runtime helpers, used by the
        /// generated JS trampoline body to read/write scalars on the wasm
        /// stack without a dedicated memory-view import per primitive type.
        #[wasm_bindgen(js_name = setValue)]
        pub fn set_value(ptr: i32, value: f64, js_type: &str);
        #[wasm_bindgen(js_name = getValue)]
        pub fn get_value(ptr: i32, js_type: &str) -> f64;
    }

    /// Forward calls under the JS-hosted variant go straight through the
    /// table entry as a JS-callable `Function` rather than a dedicated
    /// dynamic-call import: unlike the WASI-like variant, the host here
    /// already hands us directly-callable JS functions for table entries.
    ///
    /// `arg_kinds` decodes `args_ptr`'s bytes into JS numbers/bigints in
    /// argument order; `result_kind` (absent for indirect returns) decodes
    /// a single value back out of `results_ptr`.
    ///
    /// # Safety
    /// `args_ptr`/`results_ptr` must be valid for the byte ranges implied
    /// by `arg_kinds`/`result_kind`.
    pub unsafe fn call_dynamic(
        fn_index: u32,
        args_ptr: *const u8,
        arg_kinds: &[crate::classify::SlotKind],
        results_ptr: *mut u8,
        result_kind: Option<crate::classify::SlotKind>,
    ) -> Result<(), super::HostError> {
        use crate::classify::SlotKind;

        let target = get_wasm_table_entry(fn_index);
        let js_args = js_sys::Array::new();
        let mut cursor = 0usize;
        for kind in arg_kinds {
            // SAFETY: caller guarantees enough bytes remain for each kind.
            unsafe {
                match kind {
                    SlotKind::I32 => {
                        let v = i32::from_le_bytes(
                            core::slice::from_raw_parts(args_ptr.add(cursor), 4)
                                .try_into()
                                .unwrap(),
                        );
                        js_args.push(&wasm_bindgen::JsValue::from_f64(v as f64));
                    }
                    SlotKind::F32 => {
                        let v = f32::from_le_bytes(
                            core::slice::from_raw_parts(args_ptr.add(cursor), 4)
                                .try_into()
                                .unwrap(),
                        );
                        js_args.push(&wasm_bindgen::JsValue::from_f64(v as f64));
                    }
                    SlotKind::I64 => {
                        let v = i64::from_le_bytes(
                            core::slice::from_raw_parts(args_ptr.add(cursor), 8)
                                .try_into()
                                .unwrap(),
                        );
                        js_args.push(&js_sys::BigInt::from(v));
                    }
                    SlotKind::F64 => {
                        let v = f64::from_le_bytes(
                            core::slice::from_raw_parts(args_ptr.add(cursor), 8)
                                .try_into()
                                .unwrap(),
                        );
                        js_args.push(&wasm_bindgen::JsValue::from_f64(v));
                    }
                }
            }
            cursor += kind.byte_size();
        }

        let result = target
            .apply(&wasm_bindgen::JsValue::UNDEFINED, &js_args)
            .map_err(|_| super::HostError)?;

        if let Some(kind) = result_kind {
            // SAFETY: `results_ptr` has room for one slot by contract.
            unsafe {
                match kind {
                    SlotKind::I32 => {
                        let v = result.as_f64().ok_or(super::HostError)? as i32;
                        core::ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), results_ptr, 4);
                    }
                    SlotKind::F32 => {
                        let v = result.as_f64().ok_or(super::HostError)? as f32;
                        core::ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), results_ptr, 4);
                    }
                    SlotKind::I64 => {
                        let big = js_sys::BigInt::new(&result).map_err(|_| super::HostError)?;
                        let v: i64 = big.try_into().map_err(|_| super::HostError)?;
                        core::ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), results_ptr, 8);
                    }
                    SlotKind::F64 => {
                        let v = result.as_f64().ok_or(super::HostError)?;
                        core::ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), results_ptr, 8);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Test-only in-process stand-in for either host variant: a free-slot
/// pool and a fake table whose entries are ordinary Rust closures, so the
/// round-trip and end-to-end properties (spec.md §8) can be exercised
/// under plain `cargo test`.
#[cfg(feature = "host-mock")]
pub mod mock {
    extern crate std;

    use std::boxed::Box;
    use std::sync::Mutex;
    use std::vec::Vec;

    use super::HostError;

    /// A backing trampoline: `(args_buf, results_buf, closure_ptr)`, matching
    /// the WASI-variant backing function's wasm signature (spec.md §4.6).
    pub type BackingFn = unsafe extern "C" fn(*const u8, *mut u8, *mut u8);

    pub type NativeFn = Box<dyn Fn(*const u8, usize, *mut u8, usize) + Send>;

    enum Slot {
        Free,
        Backing(BackingFn, *mut u8),
        Native(NativeFn),
    }

    // SAFETY: the mock host is driven from a single test thread at a time;
    // the raw pointer inside `Backing` is never dereferenced concurrently.
    unsafe impl Send for Slot {}

    static TABLE: Mutex<Vec<Slot>> = Mutex::new(Vec::new());
    static FREE: Mutex<Vec<u32>> = Mutex::new(Vec::new());

    /// Registers a native callable standing in for a real function pointer
    /// on the forward (`ffi_call`) side, and returns its slot index.
    pub fn install_native(target: NativeFn) -> u32 {
        let mut table = TABLE.lock().unwrap();
        table.push(Slot::Native(target));
        (table.len() - 1) as u32
    }

    /// # Safety
    /// `args_ptr`/`results_ptr` must reference buffers of the stated
    /// lengths expected by the registered target at `fn_index`.
    pub unsafe fn call_dynamic(
        fn_index: u32,
        args_ptr: *const u8,
        args_len: u32,
        results_ptr: *mut u8,
        results_len: u32,
    ) -> Result<(), HostError> {
        let table = TABLE.lock().unwrap();
        match table.get(fn_index as usize) {
            Some(Slot::Native(f)) => {
                f(args_ptr, args_len as usize, results_ptr, results_len as usize);
                Ok(())
            }
            _ => Err(HostError),
        }
    }

    pub fn closure_allocate() -> Result<u32, HostError> {
        let mut table = TABLE.lock().unwrap();
        let mut free = FREE.lock().unwrap();
        if let Some(slot) = free.pop() {
            table[slot as usize] = Slot::Free;
            Ok(slot)
        } else {
            table.push(Slot::Free);
            Ok((table.len() - 1) as u32)
        }
    }

    /// # Safety
    /// `user_data` must remain valid for as long as the slot is prepared.
    pub unsafe fn closure_prepare(
        backing_fn: BackingFn,
        fn_index: u32,
        user_data: *mut u8,
    ) -> Result<(), HostError> {
        let mut table = TABLE.lock().unwrap();
        if (fn_index as usize) >= table.len() {
            return Err(HostError);
        }
        table[fn_index as usize] = Slot::Backing(backing_fn, user_data);
        Ok(())
    }

    pub fn closure_free(fn_index: u32) -> Result<(), HostError> {
        let mut table = TABLE.lock().unwrap();
        if (fn_index as usize) >= table.len() {
            return Err(HostError);
        }
        table[fn_index as usize] = Slot::Free;
        FREE.lock().unwrap().push(fn_index);
        Ok(())
    }

    /// Simulates an external `call_indirect` into a prepared closure slot:
    /// invokes its backing function with the argument/result buffers and
    /// its bound closure pointer.
    ///
    /// # Safety
    /// `args_ptr`/`results_ptr` must be valid for whatever the installed
    /// backing function expects to read/write.
    pub unsafe fn invoke_closure(
        fn_index: u32,
        args_ptr: *const u8,
        results_ptr: *mut u8,
    ) -> Result<(), HostError> {
        let table = TABLE.lock().unwrap();
        match table.get(fn_index as usize) {
            Some(Slot::Backing(f, user_data)) => {
                let f = *f;
                let user_data = *user_data;
                drop(table);
                // SAFETY: forwarded per this function's contract.
                unsafe { f(args_ptr, results_ptr, user_data) };
                Ok(())
            }
            _ => Err(HostError),
        }
    }
}
