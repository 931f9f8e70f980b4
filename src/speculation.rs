//! Speculated type bitsets.
//!
//! A [`SpecType`] summarizes the set of runtime representations a value may
//! have. Profiling attaches one to every node and variable; the abstract
//! interpreter narrows and widens them as it learns more. The bitset forms a
//! join-semilattice under union:
//!
//! ```text
//!                  TOP (every bit)
//!        /       |        |        \
//!      CELL   NUMBER   BOOLEAN   OTHER
//!     / | \    /  \
//!   ...           ...
//!        \       |        |        /
//!                ∅  (clear / unreachable)
//! ```
//!
//! The empty set is the bottom element: no value can reach this point. The
//! all-ones pattern is top: nothing is known.

use bitflags::bitflags;

// =============================================================================
// Speculated Types
// =============================================================================

bitflags! {
    /// Bitset over runtime value representations.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub struct SpecType: u32 {
        /// Plain object with named properties only.
        const FINAL_OBJECT = 1 << 0;
        /// Array object (indexed storage).
        const ARRAY = 1 << 1;
        /// Callable function object.
        const FUNCTION = 1 << 2;
        /// Typed array view over a binary buffer.
        const TYPED_ARRAY = 1 << 3;
        /// Host or exotic object not covered by the cases above.
        const OBJECT_OTHER = 1 << 4;
        /// String cell.
        const STRING = 1 << 5;
        /// Heap cell that is not an object or string (environments etc.).
        const CELL_OTHER = 1 << 6;
        /// 32-bit integer.
        const INT32 = 1 << 7;
        /// Double that is not NaN.
        const DOUBLE_REAL = 1 << 8;
        /// Double NaN.
        const DOUBLE_NAN = 1 << 9;
        /// Boolean.
        const BOOLEAN = 1 << 10;
        /// `null` or `undefined`.
        const OTHER = 1 << 11;

        /// Any object.
        const OBJECT = Self::FINAL_OBJECT.bits()
            | Self::ARRAY.bits()
            | Self::FUNCTION.bits()
            | Self::TYPED_ARRAY.bits()
            | Self::OBJECT_OTHER.bits();
        /// Any heap cell.
        const CELL = Self::OBJECT.bits() | Self::STRING.bits() | Self::CELL_OTHER.bits();
        /// Any double.
        const DOUBLE = Self::DOUBLE_REAL.bits() | Self::DOUBLE_NAN.bits();
        /// Any number.
        const NUMBER = Self::INT32.bits() | Self::DOUBLE.bits();
        /// Number known not to be NaN.
        const REAL_NUMBER = Self::INT32.bits() | Self::DOUBLE_REAL.bits();
        /// Object or string cell that is not a string (used by truthiness
        /// speculation on branch conditions).
        const NON_STRING_CELL = Self::CELL.bits() & !Self::STRING.bits();
        /// Everything.
        const TOP = Self::CELL.bits()
            | Self::NUMBER.bits()
            | Self::BOOLEAN.bits()
            | Self::OTHER.bits();
    }
}

impl SpecType {
    /// Whether every representation admitted by `self` is admitted by `sup`.
    ///
    /// The empty set is a subset of everything.
    #[inline]
    pub fn is_subset_of(self, sup: SpecType) -> bool {
        sup.contains(self)
    }

    /// Whether this speculation proves membership in `sup`: non-empty and a
    /// subset. A proven precondition needs no runtime guard.
    #[inline]
    pub fn proves(self, sup: SpecType) -> bool {
        !self.is_empty() && sup.contains(self)
    }
}

// =============================================================================
// Array Storage Modes
// =============================================================================

bitflags! {
    /// Bitset over possible backing-storage representations of an
    /// array-like value.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct ArrayModes: u16 {
        /// Not an array at all.
        const NON_ARRAY = 1 << 0;
        /// Packed int32 element storage.
        const INT32 = 1 << 1;
        /// Packed double element storage.
        const DOUBLE = 1 << 2;
        /// Contiguous boxed-value storage.
        const CONTIGUOUS = 1 << 3;
        /// General array storage (may be sparse).
        const ARRAY_STORAGE = 1 << 4;
        /// Array storage behind a slow put path.
        const SLOW_PUT_ARRAY_STORAGE = 1 << 5;
        /// Typed array with integer elements.
        const TYPED_INT = 1 << 6;
        /// Typed array with float elements.
        const TYPED_FLOAT = 1 << 7;

        /// Every storage mode.
        const TOP = Self::NON_ARRAY.bits()
            | Self::INT32.bits()
            | Self::DOUBLE.bits()
            | Self::CONTIGUOUS.bits()
            | Self::ARRAY_STORAGE.bits()
            | Self::SLOW_PUT_ARRAY_STORAGE.bits()
            | Self::TYPED_INT.bits()
            | Self::TYPED_FLOAT.bits();
    }
}

// =============================================================================
// Array Access Classification
// =============================================================================

/// How an indexed access is specialized, derived from array profiling.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ArrayKind {
    /// Profiling proved nothing usable; the access always exits.
    ForceExit,
    /// Fully generic access through the runtime.
    Generic,
    /// Indexed character read out of a string.
    String,
    /// Packed int32 elements.
    Int32,
    /// Packed double elements.
    Double,
    /// Contiguous boxed elements.
    Contiguous,
    /// General array storage.
    ArrayStorage,
    /// Array storage on the slow put path.
    SlowPutArrayStorage,
    /// Typed array with int8 elements.
    Int8Array,
    /// Typed array with int16 elements.
    Int16Array,
    /// Typed array with int32 elements.
    Int32Array,
    /// Typed array with uint8 elements.
    Uint8Array,
    /// Typed array with uint16 elements.
    Uint16Array,
    /// Typed array with uint32 elements.
    Uint32Array,
    /// Typed array with float32 elements.
    Float32Array,
    /// Typed array with float64 elements.
    Float64Array,
}

impl ArrayKind {
    /// Whether this kind reads a typed array.
    #[inline]
    pub const fn is_typed(self) -> bool {
        matches!(
            self,
            ArrayKind::Int8Array
                | ArrayKind::Int16Array
                | ArrayKind::Int32Array
                | ArrayKind::Uint8Array
                | ArrayKind::Uint16Array
                | ArrayKind::Uint32Array
                | ArrayKind::Float32Array
                | ArrayKind::Float64Array
        )
    }
}

/// An array access mode: the storage kind plus whether profiling saw the
/// access go out of bounds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ArrayMode {
    pub kind: ArrayKind,
    pub out_of_bounds: bool,
}

impl ArrayMode {
    /// In-bounds access of the given kind.
    #[inline]
    pub const fn new(kind: ArrayKind) -> Self {
        ArrayMode {
            kind,
            out_of_bounds: false,
        }
    }

    /// Same kind, but the access may go out of bounds.
    #[inline]
    pub const fn out_of_bounds(kind: ArrayKind) -> Self {
        ArrayMode {
            kind,
            out_of_bounds: true,
        }
    }

    /// The type speculation an array check of this mode narrows the base to.
    pub fn speculation_filter(self) -> SpecType {
        match self.kind {
            ArrayKind::ForceExit | ArrayKind::Generic => SpecType::TOP,
            ArrayKind::String => SpecType::STRING,
            ArrayKind::Int32
            | ArrayKind::Double
            | ArrayKind::Contiguous
            | ArrayKind::ArrayStorage
            | ArrayKind::SlowPutArrayStorage => SpecType::CELL,
            _ => SpecType::TYPED_ARRAY,
        }
    }

    /// The storage modes a value can still have after passing a check of
    /// this mode.
    pub fn modes_that_pass(self) -> ArrayModes {
        match self.kind {
            ArrayKind::ForceExit => ArrayModes::empty(),
            ArrayKind::Generic => ArrayModes::TOP,
            ArrayKind::String => ArrayModes::NON_ARRAY,
            ArrayKind::Int32 => ArrayModes::INT32,
            ArrayKind::Double => ArrayModes::DOUBLE,
            ArrayKind::Contiguous => ArrayModes::CONTIGUOUS,
            ArrayKind::ArrayStorage => ArrayModes::ARRAY_STORAGE,
            ArrayKind::SlowPutArrayStorage => {
                ArrayModes::ARRAY_STORAGE | ArrayModes::SLOW_PUT_ARRAY_STORAGE
            }
            ArrayKind::Int8Array
            | ArrayKind::Int16Array
            | ArrayKind::Int32Array
            | ArrayKind::Uint8Array
            | ArrayKind::Uint16Array
            | ArrayKind::Uint32Array => ArrayModes::TYPED_INT,
            ArrayKind::Float32Array | ArrayKind::Float64Array => ArrayModes::TYPED_FLOAT,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composites_cover_their_parts() {
        assert!(SpecType::NUMBER.contains(SpecType::INT32));
        assert!(SpecType::NUMBER.contains(SpecType::DOUBLE));
        assert!(SpecType::CELL.contains(SpecType::STRING));
        assert!(SpecType::CELL.contains(SpecType::OBJECT));
        assert!(SpecType::TOP.contains(SpecType::CELL | SpecType::NUMBER));
        assert!(!SpecType::NON_STRING_CELL.contains(SpecType::STRING));
    }

    #[test]
    fn proves_requires_nonempty() {
        assert!(SpecType::INT32.proves(SpecType::NUMBER));
        assert!(!SpecType::empty().proves(SpecType::NUMBER));
        assert!(!SpecType::NUMBER.proves(SpecType::INT32));
    }

    #[test]
    fn subset_admits_empty() {
        assert!(SpecType::empty().is_subset_of(SpecType::INT32));
        assert!(SpecType::INT32.is_subset_of(SpecType::INT32));
    }

    #[test]
    fn array_mode_filters() {
        let int32 = ArrayMode::new(ArrayKind::Int32);
        assert_eq!(int32.modes_that_pass(), ArrayModes::INT32);
        assert_eq!(int32.speculation_filter(), SpecType::CELL);

        let chars = ArrayMode::new(ArrayKind::String);
        assert_eq!(chars.speculation_filter(), SpecType::STRING);

        let typed = ArrayMode::new(ArrayKind::Float64Array);
        assert_eq!(typed.modes_that_pass(), ArrayModes::TYPED_FLOAT);
        assert_eq!(typed.speculation_filter(), SpecType::TYPED_ARRAY);
        assert!(typed.kind.is_typed());
    }
}
