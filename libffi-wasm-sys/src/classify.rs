//! The ABI classifier: pure functions from a canonicalised type to its
//! wasm-ABI shape.

use crate::raw::{ffi_type, Kind};

/// One wasm primitive slot a value occupies.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    I32 = 0,
    I64 = 1,
    F32 = 2,
    F64 = 3,
}

impl SlotKind {
    pub const fn byte_size(self) -> usize {
        match self {
            SlotKind::I32 | SlotKind::F32 => 4,
            SlotKind::I64 | SlotKind::F64 => 8,
        }
    }
}

/// wasm-ABI byte size of a canonicalised type, per spec.md §4.2.
pub fn size_bytes(t: &ffi_type) -> usize {
    match t.kind {
        Kind::Void => 0,
        Kind::LongDouble => 16,
        Kind::Uint64 | Kind::Sint64 | Kind::Double => 8,
        _ => 4,
    }
}

/// Number of wasm primitive slots a canonicalised type occupies.
pub fn slot_count(t: &ffi_type) -> usize {
    match t.kind {
        Kind::Void => 0,
        Kind::LongDouble => 2,
        _ => 1,
    }
}

/// The sequence of primitive slot kinds a canonicalised type occupies.
///
/// Matches `slot_count` in length; see the table in spec.md §4.2.
pub fn slot_kinds(t: &ffi_type) -> &'static [SlotKind] {
    match t.kind {
        Kind::Void => &[],
        Kind::Float => &[SlotKind::F32],
        Kind::Uint64 | Kind::Sint64 => &[SlotKind::I64],
        Kind::Double => &[SlotKind::F64],
        Kind::LongDouble => &[SlotKind::I64, SlotKind::I64],
        // INT, [SU]INT8/16/32, POINTER, STRUCT.
        _ => &[SlotKind::I32],
    }
}

/// True exactly when a return of this (canonical) type is passed back
/// through a hidden first pointer argument.
pub fn is_indirect_return(t: &ffi_type) -> bool {
    t.kind.is_struct()
}

/// Total wasm-ABI byte size of every slot a type occupies; equal to
/// `size_bytes` for every canonical kind, asserted as a testable property.
pub fn slot_bytes(t: &ffi_type) -> usize {
    slot_kinds(t).iter().map(|k| k.byte_size()).sum()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raw::ffi_type;

    #[test]
    fn indirect_return_iff_struct() {
        let scalars = [
            Kind::Void,
            Kind::Sint32,
            Kind::Uint64,
            Kind::Pointer,
            Kind::Float,
            Kind::Double,
        ];
        for k in scalars {
            let t = ffi_type::scalar(4, 4, k);
            assert!(!is_indirect_return(&t), "{k:?} must not be indirect");
        }
        let s = ffi_type::scalar(8, 4, Kind::Struct);
        assert!(is_indirect_return(&s));
    }

    #[test]
    fn slot_bytes_matches_size_bytes_table() {
        let cases = [
            (Kind::Void, 0),
            (Kind::Sint32, 4),
            (Kind::Pointer, 4),
            (Kind::Struct, 4),
            (Kind::Float, 4),
            (Kind::Uint64, 8),
            (Kind::Double, 8),
            (Kind::LongDouble, 16),
        ];
        for (kind, expected) in cases {
            let t = ffi_type::scalar(expected, 4, kind);
            assert_eq!(size_bytes(&t), expected);
            assert_eq!(slot_bytes(&t), expected);
        }
    }
}
