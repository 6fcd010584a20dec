//! The argument lowerer and raiser: converting between typed C values and
//! the flat, unaligned byte buffers the wasm ABI calls use.

use crate::classify::slot_bytes;
use crate::raw::{ffi_type, Kind};

fn write_i32(dst: *mut u8, value: i32) {
    let bytes = value.to_le_bytes();
    // SAFETY: caller (`lower`) guarantees `dst..dst+4` is in-bounds.
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, 4) };
}

/// Writes `*v` (a value of canonical type `t`) into `buf` at `*cursor`, in
/// wasm-ABI form, and advances `*cursor` by the slot size.
///
/// # Safety
///
/// `v` must point at a valid, initialised value of the C type `t`
/// describes. `buf` must have at least `slot_bytes(t)` bytes available
/// starting at `*cursor`.
pub unsafe fn lower(buf: *mut u8, cursor: &mut usize, t: &ffi_type, v: *const u8) {
    // SAFETY: caller guarantees enough room at `*cursor`.
    let dst = unsafe { buf.add(*cursor) };

    match t.kind {
        Kind::Void => {}
        // Unsigned narrow ints zero-extend, signed narrow ints sign-extend,
        // to match the wasm i32 integer ABI (spec.md §4.3).
        Kind::Uint8 => write_i32(dst, unsafe { *v } as i32),
        Kind::Sint8 => write_i32(dst, unsafe { *(v as *const i8) } as i32),
        Kind::Uint16 => write_i32(dst, unsafe { *(v as *const u16) } as i32),
        Kind::Sint16 => write_i32(dst, unsafe { *(v as *const i16) } as i32),
        Kind::Uint32 | Kind::Sint32 | Kind::Int | Kind::Pointer => {
            // SAFETY: 4 in-bounds bytes on both sides by contract.
            unsafe { core::ptr::copy_nonoverlapping(v, dst, 4) };
        }
        // STRUCT values are passed by pointer: the pointer itself, not the
        // struct's bytes, goes into the slot, as a fixed-width wasm
        // address rather than a truncated native pointer.
        Kind::Struct => write_i32(dst, crate::addr::to_addr(v as *mut u8) as i32),
        Kind::Float => unsafe { core::ptr::copy_nonoverlapping(v, dst, 4) },
        Kind::Uint64 | Kind::Sint64 | Kind::Double => unsafe {
            core::ptr::copy_nonoverlapping(v, dst, 8)
        },
        Kind::LongDouble => unsafe { core::ptr::copy_nonoverlapping(v, dst, 16) },
        Kind::Complex => {
            log::error!("complex type reached the lowerer uncanonicalised");
            crate::error::fatal("complex type reached the lowerer");
        }
    }

    *cursor += slot_bytes(t);
}

/// Returns a pointer into `buf` (or, for STRUCT, the pointer `buf` stores)
/// suitable for handing to code expecting a `t*`, and advances `*cursor` by
/// the slot size.
///
/// # Safety
///
/// `buf` must have at least `slot_bytes(t)` valid bytes starting at
/// `*cursor`. For STRUCT types the stored pointer must itself be valid.
pub unsafe fn raise(buf: *const u8, cursor: &mut usize, t: &ffi_type) -> *const u8 {
    // SAFETY: caller guarantees enough room at `*cursor`.
    let src = unsafe { buf.add(*cursor) };

    let result = if t.kind.is_struct() {
        // SAFETY: the slot holds a 4-byte wasm address.
        let addr = unsafe { core::ptr::read_unaligned(src as *const u32) };
        crate::addr::from_addr::<u8>(addr) as *const u8
    } else {
        src
    };

    *cursor += slot_bytes(t);
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_scenario_buffer_matches_literal_bytes() {
        let int_ty = ffi_type::scalar(4, 4, Kind::Sint32);
        let mut buf = [0u8; 8];
        let mut cursor = 0usize;
        let a: i32 = 3;
        let b: i32 = 4;
        unsafe {
            lower(buf.as_mut_ptr(), &mut cursor, &int_ty, &a as *const i32 as *const u8);
            lower(buf.as_mut_ptr(), &mut cursor, &int_ty, &b as *const i32 as *const u8);
        }
        assert_eq!(buf, [0x03, 0, 0, 0, 0x04, 0, 0, 0]);
    }

    #[test]
    fn mul_scenario_mixes_double_and_float() {
        let double_ty = ffi_type::scalar(8, 8, Kind::Double);
        let float_ty = ffi_type::scalar(4, 4, Kind::Float);
        let mut buf = [0u8; 12];
        let mut cursor = 0usize;
        let x: f64 = 1.5;
        let y: f32 = 2.0;
        unsafe {
            lower(buf.as_mut_ptr(), &mut cursor, &double_ty, &x as *const f64 as *const u8);
            lower(buf.as_mut_ptr(), &mut cursor, &float_ty, &y as *const f32 as *const u8);
        }
        assert_eq!(cursor, 12);
        assert_eq!(&buf[0..8], &1.5f64.to_le_bytes());
        assert_eq!(&buf[8..12], &2.0f32.to_le_bytes());
    }

    #[test]
    fn narrow_short_scenario_widens_and_raises_correctly() {
        let short_ty = ffi_type::scalar(2, 2, Kind::Sint16);
        let char_ty = ffi_type::scalar(1, 1, Kind::Uint8);
        let mut buf = [0u8; 8];
        let mut cursor = 0usize;
        let a: i16 = -1;
        let b: u8 = 1;
        unsafe {
            lower(buf.as_mut_ptr(), &mut cursor, &short_ty, &a as *const i16 as *const u8);
            lower(buf.as_mut_ptr(), &mut cursor, &char_ty, &b as *const u8 as *const u8);
        }
        assert_eq!(&buf[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&buf[4..8], &[0x01, 0, 0, 0]);

        let mut rcursor = 0usize;
        let p0 = unsafe { raise(buf.as_ptr(), &mut rcursor, &short_ty) };
        let short_val = unsafe { core::ptr::read_unaligned(p0 as *const i16) };
        assert_eq!(short_val, -1i16);
        let p1 = unsafe { raise(buf.as_ptr(), &mut rcursor, &char_ty) };
        let byte_val = unsafe { *p1 };
        assert_eq!(byte_val, 1u8);
    }

    #[test]
    fn round_trip_scalars() {
        let cases: &[(Kind, usize, u16)] = &[
            (Kind::Sint32, 4, 4),
            (Kind::Uint64, 8, 8),
            (Kind::Double, 8, 8),
            (Kind::Float, 4, 4),
            (Kind::Pointer, 4, 4),
        ];
        for &(kind, size, align) in cases {
            let ty = ffi_type::scalar(size, align, kind);
            let mut buf = [0u8; 8];
            let value: u64 = 0x0102_0304_0506_0708;
            let mut cursor = 0usize;
            unsafe {
                lower(buf.as_mut_ptr(), &mut cursor, &ty, &value as *const u64 as *const u8);
            }
            let mut rcursor = 0usize;
            let p = unsafe { raise(buf.as_ptr(), &mut rcursor, &ty) };
            assert_eq!(rcursor, cursor);
            let raised_bytes =
                unsafe { core::slice::from_raw_parts(p, slot_bytes(&ty)) };
            assert_eq!(raised_bytes, &buf[0..slot_bytes(&ty)]);
        }
    }

    #[test]
    fn struct_slot_stores_pointer_and_raises_to_it() {
        let struct_ty = ffi_type::scalar(8, 4, Kind::Struct);
        let payload: [i32; 2] = [1, 2];
        let mut buf = [0u8; 4];
        let mut cursor = 0usize;
        unsafe {
            lower(
                buf.as_mut_ptr(),
                &mut cursor,
                &struct_ty,
                payload.as_ptr() as *const u8,
            );
        }
        let mut rcursor = 0usize;
        let p = unsafe { raise(buf.as_ptr(), &mut rcursor, &struct_ty) };
        assert_eq!(p, payload.as_ptr() as *const u8);
    }
}
