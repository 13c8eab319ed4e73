//! Object and array header layout.
//!
//! Every byte offset, field width and size limit the emitters bake into
//! generated code lives here, behind accessor methods, so the bit-level
//! assumptions can be unit-tested in isolation from code emission.
//!
//! # Header shapes
//!
//! ```text
//! Scalar object:                Contiguous array:
//! ┌────────────┬───────┐        ┌────────────┬───────┬─────────┬──────────┐
//! │ vft (8)    │ flags │        │ vft (8)    │ flags │ length  │ elements │
//! │ offset 0   │ @8    │        │ offset 0   │ @8    │ @12     │ @16...   │
//! └────────────┴───────┘        └────────────┴───────┴─────────┴──────────┘
//!
//! Discontiguous array (also the shape of every zero-length array):
//! ┌────────────┬───────┬──────────────┬───────────────┐
//! │ vft (8)    │ flags │ length == 0  │ true length   │
//! │ offset 0   │ @8    │ @12          │ @16           │
//! └────────────┴───────┴──────────────┴───────────────┘
//! ```
//!
//! A zero contiguous-length field is the discriminator for the
//! discontiguous shape, which is why a zero-length array must have both
//! length fields written even when it was allocated through the
//! contiguous-size arithmetic.

use crate::heap::AddressQuery;

// =============================================================================
// Identifiers
// =============================================================================

/// Index of a class in the compilation's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

impl ClassId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Which length field of an array header is being addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayShape {
    Contiguous,
    Discontiguous,
}

// =============================================================================
// Per-class facts
// =============================================================================

/// Facts about one class, fixed for the duration of a compilation.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Total instance size in bytes, header included. Zero for array
    /// classes (their size is computed from the element count).
    pub instance_size: usize,
    /// Element size in bytes for array classes.
    pub element_size: Option<usize>,
    /// Byte offset of the inline lock word, if the class has one.
    pub lock_word_offset: Option<usize>,
    /// Whether the lock on instances of this class may be reserved for
    /// the allocating thread.
    pub reservable: bool,
    /// Classes still awaiting resolution can never be inline-allocated.
    pub requires_resolution: bool,
    /// The class pointer stored into the vft slot of new instances:
    /// either a compile-time constant or a patch-site value.
    pub class_pointer: AddressQuery,
}

// =============================================================================
// Layout errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Object alignment must be a nonzero power of two.
    BadAlignment(usize),
    /// A header field offset falls outside its header shape.
    FieldOutsideHeader(&'static str),
    /// An array class was registered without an element size.
    MissingElementSize,
    /// Element sizes must be 1, 2, 4 or 8.
    BadElementSize(usize),
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::BadAlignment(a) => {
                write!(f, "object alignment {} is not a power of two", a)
            }
            LayoutError::FieldOutsideHeader(name) => {
                write!(f, "header field `{}` falls outside its header shape", name)
            }
            LayoutError::MissingElementSize => {
                write!(f, "array class registered without an element size")
            }
            LayoutError::BadElementSize(s) => write!(f, "unsupported element size {}", s),
        }
    }
}

impl std::error::Error for LayoutError {}

// =============================================================================
// ObjectLayout
// =============================================================================

/// The object-model layout for one compilation.
///
/// Constructed once, then queried read-only by the emitters.
#[derive(Debug, Clone)]
pub struct ObjectLayout {
    vft_offset: usize,
    flags_offset: usize,
    contiguous_length_offset: usize,
    discontiguous_length_offset: usize,
    scalar_header_size: usize,
    contiguous_array_header_size: usize,
    discontiguous_array_header_size: usize,
    alignment: usize,
    max_inline_allocation_size: usize,
    max_size_guaranteed_not_to_overflow: usize,
    remembered_bit: u32,
    classes: Vec<ClassInfo>,
}

impl ObjectLayout {
    /// The standard 64-bit layout.
    pub fn standard() -> Self {
        ObjectLayout {
            vft_offset: 0,
            flags_offset: 8,
            contiguous_length_offset: 12,
            discontiguous_length_offset: 16,
            scalar_header_size: 16,
            contiguous_array_header_size: 16,
            discontiguous_array_header_size: 24,
            alignment: 8,
            max_inline_allocation_size: 0x4000,
            max_size_guaranteed_not_to_overflow: 0x1000_0000,
            remembered_bit: 0x10,
            classes: Vec::new(),
        }
    }

    /// Register a class and return its id. Validates the combination of
    /// per-class facts against the fixed header shapes.
    pub fn register_class(&mut self, info: ClassInfo) -> Result<ClassId, LayoutError> {
        if let Some(elem) = info.element_size {
            if !matches!(elem, 1 | 2 | 4 | 8) {
                return Err(LayoutError::BadElementSize(elem));
            }
        }
        if let Some(lw) = info.lock_word_offset {
            let header = if info.element_size.is_some() {
                self.discontiguous_array_header_size
            } else {
                self.scalar_header_size.max(info.instance_size)
            };
            if lw + 8 > header.max(self.scalar_header_size) && lw + 8 > info.instance_size {
                return Err(LayoutError::FieldOutsideHeader("lock_word"));
            }
        }
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(info);
        Ok(id)
    }

    #[inline]
    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.index()]
    }

    #[inline]
    pub fn vft_offset(&self) -> usize {
        self.vft_offset
    }

    #[inline]
    pub fn flags_offset(&self) -> usize {
        self.flags_offset
    }

    /// Mask of the "remembered" bit inside the header flags word.
    #[inline]
    pub fn remembered_bit(&self) -> u32 {
        self.remembered_bit
    }

    /// Header size for scalar objects or arrays.
    #[inline]
    pub fn header_size(&self, is_array: bool) -> usize {
        if is_array {
            self.contiguous_array_header_size
        } else {
            self.scalar_header_size
        }
    }

    #[inline]
    pub fn discontiguous_header_size(&self) -> usize {
        self.discontiguous_array_header_size
    }

    #[inline]
    pub fn array_length_offset(&self, shape: ArrayShape) -> usize {
        match shape {
            ArrayShape::Contiguous => self.contiguous_length_offset,
            ArrayShape::Discontiguous => self.discontiguous_length_offset,
        }
    }

    #[inline]
    pub fn object_alignment(&self) -> usize {
        self.alignment
    }

    /// Round a byte size up to the object alignment.
    #[inline]
    pub fn rounded_size(&self, size: usize) -> usize {
        (size + self.alignment - 1) & !(self.alignment - 1)
    }

    /// Largest object the inline bump-pointer path may allocate.
    #[inline]
    pub fn max_inline_allocation_size(&self) -> usize {
        self.max_inline_allocation_size
    }

    /// Largest size for which `cursor + size` can never wrap the address
    /// space; anything above it needs a carry check the fast path does
    /// not emit.
    #[inline]
    pub fn max_size_guaranteed_not_to_overflow(&self) -> usize {
        self.max_size_guaranteed_not_to_overflow
    }

    /// Largest element count a variable-length array may have and still
    /// be eligible for inline allocation. Derived from the tighter of
    /// the inline allocation limit and the no-overflow bound, so it
    /// doubles as the address arithmetic overflow guard: any count that
    /// passes yields a size the fast path can add without a carry
    /// check.
    pub fn max_inline_array_elements(&self, element_size: usize) -> u64 {
        debug_assert!(matches!(element_size, 1 | 2 | 4 | 8));
        let cap = self
            .max_inline_allocation_size
            .min(self.max_size_guaranteed_not_to_overflow);
        ((cap - self.contiguous_array_header_size) / element_size) as u64
    }

    /// Total rounded allocation size for a fixed-length array, clamped
    /// up to the discontiguous header so a zero-length array has room
    /// for both length fields.
    pub fn array_allocation_size(&self, element_size: usize, length: u64) -> usize {
        let raw = self.contiguous_array_header_size + element_size * length as usize;
        self.rounded_size(raw.max(self.discontiguous_array_header_size))
    }

    #[inline]
    pub fn lock_word_offset(&self, id: ClassId) -> Option<usize> {
        self.class(id).lock_word_offset
    }
}

// =============================================================================
// Tests
// =============================================================================
