//! Type canonicalisation: reducing an arbitrary front-end type descriptor to
//! the small set of shapes the rest of the core understands.

use alloc::vec;

use crate::raw::{ffi_abi, ffi_type, Kind};

/// A non-owning handle to a front-end-owned type descriptor. May be null,
/// which is only legal for a return type.
pub type TypeRef = *mut ffi_type;

unsafe fn elements(t: &ffi_type) -> &'static [*mut ffi_type] {
    let mut len = 0;
    // SAFETY: caller guarantees `t.elements` is either null or points at a
    // null-terminated array, per the front-end's contract (spec.md §3).
    unsafe {
        if t.elements.is_null() {
            return &[];
        }
        while !(*t.elements.add(len)).is_null() {
            len += 1;
        }
        core::slice::from_raw_parts(t.elements, len)
    }
}

/// Leaks a freshly built null-terminated element array and points `t` at it.
///
/// The descriptor graph is process-lifetime front-end state (mirroring how
/// libffi itself never frees a `ffi_type`), so leaking here is the correct
/// lifetime, not a workaround.
fn install_elements(t: &mut ffi_type, children: alloc::vec::Vec<*mut ffi_type>) {
    let mut owned = children;
    owned.push(core::ptr::null_mut());
    let leaked: &'static mut [*mut ffi_type] = alloc::boxed::Box::leak(owned.into_boxed_slice());
    t.elements = leaked.as_mut_ptr();
}

/// Rewrites `*t` in place to a canonical shape and returns its new `kind`.
///
/// `abi` selects the ABI variant the CIF was prepared for: the JS/emscripten
/// variant suppresses the single-element struct collapse once the struct
/// exceeds 16 bytes, passing it by pointer instead (spec.md §4.1).
///
/// # Safety
///
/// `t` must be null or point at a valid, properly initialised `ffi_type`
/// whose `elements` array (if any) is null-terminated and whose elements are
/// themselves valid. Nested structs are canonicalised recursively, so every
/// descriptor reachable from `t` must satisfy the same contract.
pub unsafe fn canonicalise(t: TypeRef, in_result: bool, abi: ffi_abi) -> Kind {
    if t.is_null() {
        return Kind::Void;
    }

    // SAFETY: contract of this function.
    let ty = unsafe { &mut *t };

    if ty.kind.is_complex() {
        let elems = unsafe { elements(ty) };
        let elem = elems.first().copied().unwrap_or(core::ptr::null_mut());
        if elem.is_null() {
            log::error!("complex type descriptor has no underlying element");
            crate::error::fatal("complex type with no underlying element");
        }
        let elem_ref = unsafe { &*elem };
        let ok = matches!(elem_ref.kind, Kind::Float | Kind::Double | Kind::LongDouble);
        if !ok {
            log::error!("complex type over unsupported underlying kind {:?}", elem_ref.kind);
            crate::error::fatal("unsupported underlying kind for complex type");
        }
        ty.size = 2 * elem_ref.size;
        ty.alignment = elem_ref.alignment;
        ty.kind = Kind::Struct;
        install_elements(ty, vec![elem, elem]);
        return Kind::Struct;
    }

    if in_result && matches!(ty.kind, Kind::LongDouble) {
        ty.size = 16;
        ty.alignment = 16;
        ty.kind = Kind::Struct;
        return Kind::Struct;
    }

    if ty.kind.is_struct() {
        if ty.size == 0 {
            ty.kind = Kind::Void;
            return Kind::Void;
        }

        let elems = unsafe { elements(ty) };
        let mut non_void_count = 0usize;
        let mut last_non_void = Kind::Void;
        for &child in elems {
            if child.is_null() {
                continue;
            }
            // SAFETY: contract of this function extends recursively.
            let child_kind = unsafe { canonicalise(child, false, abi) };
            if !matches!(child_kind, Kind::Void) {
                non_void_count += 1;
                last_non_void = child_kind;
            }
        }

        if non_void_count > 1 {
            return Kind::Struct;
        }

        if non_void_count == 1 && matches!(abi, ffi_abi::Wasm32Emscripten) && ty.size > 16 {
            return Kind::Struct;
        }

        ty.kind = last_non_void;
        return last_non_void;
    }

    ty.kind
}
