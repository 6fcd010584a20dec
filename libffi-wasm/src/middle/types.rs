//! Representations of C types and arrays thereof.
//!
//! These are used to describe the types of the arguments and results of
//! functions. When we construct a [CIF](super::Cif) (“Call
//! Inter<span></span>Face”), we provide a sequence of argument types
//! and a result type, and the wasm32 core uses this to figure out how to
//! set up a call to a function with those types.

extern crate alloc;
use alloc::boxed::Box;
use alloc::vec::Vec;

use core::iter::once;
use core::ptr::{addr_of_mut, null_mut};
use core::{fmt, slice};

use crate::low::{ffi_type, Kind};

#[cfg(feature = "complex")]
use crate::low::types::{double as complex_elem_double, float as complex_elem_float};
use crate::low::types::{
    double, float, longdouble, pointer, sint16, sint32, sint64, sint8, uint16, uint32, uint64,
    uint8,
};

/// Represents a single C type.
///
/// # Example
///
/// Suppose we have a C struct:
///
/// ```c
/// struct my_struct {
///     uint16_t f1;
///     uint64_t f2;
/// };
/// ```
///
/// To pass the struct by value, we need to construct a `Type` object
/// describing its layout:
///
/// ```
/// use libffi_wasm::middle::Type;
///
/// let my_struct = Type::structure([
///     Type::U64,
///     Type::U16,
/// ]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    /// Represents `void`, the absence of a value.
    Void,
    /// Represents a `i8`
    I8,
    /// Represents a `u8`
    U8,
    /// Represents a `i16`
    I16,
    /// Represents a `u16`
    U16,
    /// Represents a `i32`
    I32,
    /// Represents a `u32`
    U32,
    /// Represents a `i64`
    I64,
    /// Represents a `u64`
    U64,
    /// Represents a `usize`. wasm32 pointers are 32 bits wide, so this
    /// is laid out the same as [`Type::U32`].
    Usize,
    /// Represents an `isize`. wasm32 pointers are 32 bits wide, so this
    /// is laid out the same as [`Type::I32`].
    Isize,
    /// Represents a pointer
    Pointer,
    /// Represents a `f32`
    F32,
    /// Represents a `f64`
    F64,
    /// Represents a `long double`.
    LongDouble,
    /// Returns the C `_Complex float` type.
    ///
    /// This item is enabled by `#[cfg(feature = "complex")]`.
    #[cfg(feature = "complex")]
    ComplexFloat,
    /// Returns the C `_Complex double` type.
    ///
    /// This item is enabled by `#[cfg(feature = "complex")]`.
    #[cfg(feature = "complex")]
    ComplexDouble,
    /// Represents a `repr(C)` structure.
    ///
    /// It is recommended to create a `Type::Structure` using
    /// [`Type::structure`].
    Structure(Box<[Type]>),
}

impl Type {
    /// Returns the `void` type, used for functions that return nothing.
    pub const fn void() -> Self {
        Self::Void
    }

    /// Constructs a structure type whose fields have the given types.
    ///
    /// # Example
    ///
    /// Creating a `Type` for the following C structure:
    ///
    /// ```c
    /// struct ForeignStruct {
    ///     uint64_t id;
    ///     void *ptr;
    /// };
    /// ```
    ///
    /// ```
    /// use libffi_wasm::middle::Type;
    ///
    /// let ty = Type::structure([
    ///     Type::U64,
    ///     Type::Pointer,
    /// ]);
    /// ```
    pub fn structure<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = Type>,
    {
        Self::Structure(fields.into_iter().collect())
    }
}

/// Type used to manage an array of `ffi_type`s for a [`Cif`](super::Cif).
///
/// This is only intended to be used to manage the array for a `Cif`'s
/// argument types. The pointer this struct contains is only intended to pass
/// on to the wasm32 core, and this crate makes no guarantees that it is safe
/// to create references from the pointer.
#[repr(transparent)]
pub(crate) struct FfiTypeArray(*mut [FfiType]);

impl FfiTypeArray {
    pub fn new<I>(types: I) -> Self
    where
        I: IntoIterator<Item = Type>,
    {
        let type_slice: Box<[FfiType]> = types.into_iter().map(|ty| FfiType::new(&ty)).collect();
        Self(Box::into_raw(type_slice))
    }

    /// # Safety
    /// `self.0` must be a valid, properly aligned, non-null pointer not
    /// mutated concurrently with this call.
    pub unsafe fn len(&self) -> usize {
        #[allow(clippy::needless_borrow)]
        unsafe {
            (&(*self.0)).len()
        }
    }

    /// Get a pointer to the underlying `ffi_type` array.
    ///
    /// Note that the pointer can only be used as long as `self` is alive.
    pub fn as_ffi_ptr(&self) -> *mut *mut ffi_type {
        unsafe { (*self.0).as_mut_ptr().cast::<*mut ffi_type>() }
    }
}

impl Clone for FfiTypeArray {
    fn clone(&self) -> Self {
        let slice_clone: Box<[FfiType]> = unsafe { (*self.0).iter() }.cloned().collect();
        Self(Box::into_raw(slice_clone))
    }
}

impl Drop for FfiTypeArray {
    fn drop(&mut self) {
        let _drop = unsafe { Box::from_raw(self.0) };
    }
}

impl core::fmt::Debug for FfiTypeArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(unsafe { &(*self.0) }).finish()
    }
}

/// Type used to manage `ffi_type`s used in the `middle` module.
///
/// `FfiType` owns and is responsible for managing the memory of its
/// `ffi_type`. For structs it also allocates the memory required for the
/// `ffi_type`'s `elements` field, and is responsible for freeing it when
/// dropped.
///
/// # Usage restrictions
///
/// * `FfiType` should only be owned and used by **one** [`Cif`](super::Cif),
///   [`FfiTypeArray`], or `FfiType`.
/// * `prep_cif_machdep` must run over this `FfiType` before it can be used
///   to make calls: it fixes up `size`/`alignment` for collapsed structs and
///   canonicalised `LongDouble`/`Complex` types.
/// * [`FfiType::as_ffi_ptr`] should **only** be used to pass a pointer to the
///   wasm32 core. This crate does not guarantee that it is sound to create
///   references from `FfiType`'s pointers.
#[repr(transparent)]
pub(crate) struct FfiType(*mut ffi_type);

impl FfiType {
    /// Get a `FfiType` for a `void` return type.
    pub fn void() -> Self {
        Self(unsafe { addr_of_mut!(crate::low::types::void) })
    }

    /// Creates a new `FfiType` from a [`Type`].
    pub fn new(ty: &Type) -> Self {
        match ty {
            Type::Void => Self::void(),
            Type::I8 => Self(unsafe { addr_of_mut!(sint8) }),
            Type::U8 => Self(unsafe { addr_of_mut!(uint8) }),
            Type::I16 => Self(unsafe { addr_of_mut!(sint16) }),
            Type::U16 => Self(unsafe { addr_of_mut!(uint16) }),
            Type::I32 => Self(unsafe { addr_of_mut!(sint32) }),
            Type::U32 => Self(unsafe { addr_of_mut!(uint32) }),
            Type::I64 => Self(unsafe { addr_of_mut!(sint64) }),
            Type::U64 => Self(unsafe { addr_of_mut!(uint64) }),
            Type::Usize => Self(unsafe { addr_of_mut!(uint32) }),
            Type::Isize => Self(unsafe { addr_of_mut!(sint32) }),
            Type::Pointer => Self(unsafe { addr_of_mut!(pointer) }),
            Type::F32 => Self(unsafe { addr_of_mut!(float) }),
            Type::F64 => Self(unsafe { addr_of_mut!(double) }),
            Type::LongDouble => Self(unsafe { addr_of_mut!(longdouble) }),

            #[cfg(feature = "complex")]
            Type::ComplexFloat => Self::new_complex(unsafe { addr_of_mut!(complex_elem_float) }),
            #[cfg(feature = "complex")]
            Type::ComplexDouble => Self::new_complex(unsafe { addr_of_mut!(complex_elem_double) }),

            Type::Structure(items) => Self::new_aggregate(Kind::Struct, items),
        }
    }

    #[cfg(feature = "complex")]
    fn new_complex(elem: *mut ffi_type) -> Self {
        let elements: Box<[*mut ffi_type]> = Box::new([elem, null_mut()]);
        let mut inner_type = Box::<ffi_type>::new(ffi_type {
            size: 0,
            alignment: 0,
            kind: Kind::Complex,
            elements: Box::into_raw(elements).cast::<*mut ffi_type>(),
        });
        let _ = &mut inner_type;
        Self(Box::into_raw(inner_type))
    }

    fn new_aggregate(kind: Kind, items: &[Type]) -> Self {
        let elements = items
            .iter()
            .map(FfiType::new)
            .chain(once(FfiType(null_mut())))
            .collect::<Box<[FfiType]>>();

        let mut inner_type = Box::<ffi_type>::new(ffi_type {
            size: 0,
            alignment: 0,
            kind,
            elements: null_mut(),
        });

        // Casting from `*mut [FfiType]` to `*mut *mut ffi_type` is okay as
        // `FfiType` is `#[repr(transparent)]` over a single `*mut ffi_type`.
        inner_type.elements = Box::into_raw(elements).cast::<*mut ffi_type>();
        // Size and alignment are fixed up by `prep_cif_machdep`.

        Self(Box::into_raw(inner_type))
    }

    /// Get a pointer to the underlying `ffi_type`.
    pub fn as_ffi_ptr(&self) -> *mut ffi_type {
        self.0
    }

    /// # Safety
    /// `ty` must be well-formed and created by the wasm32 core or `FfiType`.
    unsafe fn clone_from_ffi_type(ty: *mut ffi_type) -> Self {
        let mut ty_clone = Box::new(unsafe { *ty });

        if ty_clone.elements.is_null() {
            return Self(Box::into_raw(ty_clone));
        }

        let mut elements_vec: Vec<FfiType> = Vec::new();
        unsafe {
            let mut element_ptr = ty_clone.elements;
            while !(*element_ptr).is_null() {
                let cloned_element = (*(element_ptr.cast::<FfiType>())).clone();
                elements_vec.push(cloned_element);
                element_ptr = element_ptr.add(1);
            }
        }
        elements_vec.push(Self(null_mut()));

        let slice_ptr = Box::into_raw(elements_vec.into_boxed_slice());
        let elements_ptr = unsafe { (*slice_ptr).as_mut_ptr() };
        ty_clone.elements = elements_ptr.cast::<*mut ffi_type>();

        Self(Box::into_raw(ty_clone))
    }

    /// # Safety
    /// Only call on a struct or complex `FfiType` owned by this crate.
    unsafe fn deallocate_boxes(&mut self) {
        let self_box = unsafe { Box::from_raw(self.0) };

        if !self_box.elements.is_null() {
            unsafe {
                let mut n_args = 1;
                let mut element = self_box.elements;
                while !(*element).is_null() {
                    element = element.add(1);
                    n_args += 1;
                }
                let _elements_box = Box::<[FfiType]>::from_raw(slice::from_raw_parts_mut(
                    self_box.elements.cast::<FfiType>(),
                    n_args,
                ));
            }
        }
    }
}

impl Clone for FfiType {
    fn clone(&self) -> Self {
        if self.0.is_null() {
            return Self(null_mut());
        }

        let self_kind = unsafe { (*self.0).kind };
        match self_kind {
            Kind::Struct | Kind::Complex => unsafe { Self::clone_from_ffi_type(self.0) },
            _ => Self(self.0),
        }
    }
}

impl Drop for FfiType {
    fn drop(&mut self) {
        if self.0.is_null() {
            return;
        }

        let self_kind = unsafe { (*self.0).kind };
        match self_kind {
            Kind::Struct | Kind::Complex => unsafe { self.deallocate_boxes() },
            _ => {}
        }
    }
}

impl core::fmt::Debug for FfiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_null() {
            f.write_str("FfiType(NULL)")
        } else {
            unsafe { (*self.0).fmt(f) }
        }
    }
}

#[cfg(test)]
mod test {
    use alloc::format;

    use super::*;

    #[test]
    fn create_u64() {
        FfiType::new(&Type::U64);
    }

    #[test]
    fn clone_u64() {
        let _ = Type::U64.clone().clone();
    }

    #[test]
    fn create_struct() {
        Type::structure(alloc::vec![Type::I64, Type::I64, Type::U64]);
    }

    #[test]
    fn clone_struct() {
        let _ = Type::structure(alloc::vec![Type::I64, Type::I64, Type::U64])
            .clone()
            .clone();
    }

    #[test]
    fn verify_type_debug_behavior() {
        let ffi_type = Type::structure([
            Type::U16,
            Type::F32,
            Type::structure([Type::I32, Type::structure([])]),
            Type::Pointer,
        ]);

        let _string = format!("{ffi_type:?}");
    }

    #[test]
    fn verify_type_layout() {
        let type_struct = Type::structure([
            Type::structure([
                Type::I16,
                Type::structure([
                    Type::I32,
                    Type::U32,
                    Type::structure([Type::structure([])]),
                ]),
                Type::U16,
            ]),
            Type::I8,
            Type::U8,
            Type::F32,
            Type::F64,
        ]);

        let ffi_struct = FfiType::new(&type_struct);

        verify_struct_layout(&ffi_struct);

        let clone1 = ffi_struct.clone();
        verify_struct_layout(&ffi_struct);
        verify_struct_layout(&clone1);

        drop(ffi_struct);
        verify_struct_layout(&clone1);
    }

    fn verify_struct_layout(ty: &FfiType) {
        let struct_1 = unsafe { &*ty.0 };
        assert_eq!(struct_1.kind, Kind::Struct);

        assert_eq!(unsafe { (**struct_1.elements).kind }, Kind::Struct);
        assert_eq!(unsafe { (**struct_1.elements.add(1)).kind }, Kind::Sint8);
        assert_eq!(unsafe { (**struct_1.elements.add(2)).kind }, Kind::Uint8);
        assert_eq!(unsafe { (**struct_1.elements.add(3)).kind }, Kind::Float);
        assert_eq!(unsafe { (**struct_1.elements.add(4)).kind }, Kind::Double);
        assert!(unsafe { (*struct_1.elements.add(5)).is_null() });

        let struct_2 = unsafe { &**struct_1.elements };
        assert_eq!(struct_2.kind, Kind::Struct);
        assert_eq!(unsafe { (**struct_2.elements).kind }, Kind::Sint16);
        assert_eq!(unsafe { (**struct_2.elements.add(1)).kind }, Kind::Struct);
        assert_eq!(unsafe { (**struct_2.elements.add(2)).kind }, Kind::Uint16);
        assert!(unsafe { (*struct_2.elements.add(3)).is_null() });

        let struct_3 = unsafe { &**(struct_2.elements.add(1)) };
        assert_eq!(struct_3.kind, Kind::Struct);
        assert_eq!(unsafe { (**struct_3.elements).kind }, Kind::Sint32);
        assert_eq!(unsafe { (**struct_3.elements.add(1)).kind }, Kind::Uint32);
        assert_eq!(unsafe { (**struct_3.elements.add(2)).kind }, Kind::Struct);
        assert!(unsafe { (*struct_3.elements.add(3)).is_null() });
    }
}
