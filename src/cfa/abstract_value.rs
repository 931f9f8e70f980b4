//! The abstract value lattice.
//!
//! An [`AbstractValue`] summarizes everything the analysis knows about one
//! value at one program point:
//!
//! - `spec`: which runtime representations are possible (bitset);
//! - `value`: the exact constant, when there is provably only one;
//! - `current_shape`: the shapes the value can have right now;
//! - `future_shape`: the shapes it can ever come to have, backed by
//!   transition watchpoints, which is why it survives structure clobbers;
//! - `array_modes`: possible indexed-storage representations.
//!
//! The default value is bottom ("clear"): nothing reaches this point. Join
//! is [`AbstractValue::merge`]; meets are the `filter_*` family. Filtering
//! can empty a value, which callers must treat as "this program point is
//! unreachable" rather than continuing to compute with bottom.

use crate::shape::{ShapeBound, ShapeId, ShapeRegistry, ShapeSet};
use crate::speculation::{ArrayModes, SpecType};
use crate::value::JsValue;

// =============================================================================
// Abstract Value
// =============================================================================

/// Lattice element describing one value at one program point.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AbstractValue {
    /// Possible runtime representations. Empty means bottom.
    pub spec: SpecType,
    /// Exactly-known constant. Present only when `spec` is precise enough
    /// that a single runtime value remains.
    pub value: Option<JsValue>,
    /// Shapes the value can have at this point.
    pub current_shape: ShapeBound,
    /// Shapes the value can ever transition to, under watchpoint.
    pub future_shape: ShapeBound,
    /// Possible array storage representations.
    pub array_modes: ArrayModes,
}

impl Default for AbstractValue {
    /// Bottom: no value reaches this point.
    fn default() -> Self {
        AbstractValue {
            spec: SpecType::empty(),
            value: None,
            current_shape: ShapeBound::Clear,
            future_shape: ShapeBound::Clear,
            array_modes: ArrayModes::empty(),
        }
    }
}

impl AbstractValue {
    /// Bottom: no value reaches this point.
    pub fn clear(&mut self) {
        *self = AbstractValue::default();
    }

    #[inline]
    pub fn is_clear(&self) -> bool {
        self.spec.is_empty()
    }

    /// Top: nothing is known.
    pub fn make_top(&mut self) {
        self.spec = SpecType::TOP;
        self.value = None;
        self.current_shape = ShapeBound::Top;
        self.future_shape = ShapeBound::Top;
        self.array_modes = ArrayModes::TOP;
    }

    /// A fresh top value.
    pub fn top() -> Self {
        let mut v = AbstractValue::default();
        v.make_top();
        v
    }

    /// Whether the shape component carries usable (non-trivial) knowledge.
    #[inline]
    pub fn has_shape_knowledge(&self) -> bool {
        self.current_shape.is_neither_clear_nor_top()
    }

    // -------------------------------------------------------------------------
    // Precise setters
    // -------------------------------------------------------------------------

    /// Know exactly the representation set, nothing more.
    pub fn set_type(&mut self, spec: SpecType) {
        debug_assert!(!spec.is_empty(), "use clear() for bottom");
        self.spec = spec;
        self.value = None;
        if spec.intersects(SpecType::CELL) {
            self.current_shape = ShapeBound::Top;
            self.future_shape = ShapeBound::Top;
            self.array_modes = ArrayModes::TOP;
        } else {
            self.current_shape = ShapeBound::Clear;
            self.future_shape = ShapeBound::Clear;
            self.array_modes = ArrayModes::empty();
        }
    }

    /// Know the exact constant. Narrows every component to the constant:
    /// the type bits become exactly the constant's type, and an object
    /// constant pins its exact shape.
    pub fn set_constant(&mut self, value: &JsValue, shapes: &ShapeRegistry) {
        self.spec = value.speculation(shapes);
        match value {
            JsValue::Cell(cell) => {
                self.current_shape = ShapeBound::exactly(cell.shape);
                self.future_shape = ShapeBound::exactly(cell.shape);
                self.array_modes = shapes.get(cell.shape).indexing;
            }
            JsValue::String(_) => {
                // String cells carry no registered layout; their storage is
                // never array-like.
                self.current_shape = ShapeBound::Top;
                self.future_shape = ShapeBound::Top;
                self.array_modes = ArrayModes::NON_ARRAY;
            }
            _ => {
                self.current_shape = ShapeBound::Clear;
                self.future_shape = ShapeBound::Clear;
                self.array_modes = ArrayModes::empty();
            }
        }
        self.value = Some(value.clone());
    }

    /// Know the exact shape of a freshly allocated object.
    pub fn set_shape(&mut self, shape: ShapeId, shapes: &ShapeRegistry) {
        self.spec = shapes.speculation(shape);
        self.value = None;
        self.current_shape = ShapeBound::exactly(shape);
        self.future_shape = ShapeBound::exactly(shape);
        self.array_modes = shapes.get(shape).indexing;
    }

    // -------------------------------------------------------------------------
    // Join
    // -------------------------------------------------------------------------

    /// Lattice join in place. Monotone and idempotent; returns whether the
    /// receiver changed.
    pub fn merge(&mut self, other: &AbstractValue) -> bool {
        if other.is_clear() {
            return false;
        }
        if self.is_clear() {
            *self = other.clone();
            return true;
        }

        let mut changed = false;

        let spec = self.spec | other.spec;
        if spec != self.spec {
            self.spec = spec;
            changed = true;
        }

        if self.value != other.value {
            // Two different exact values merge to "not a single constant".
            if self.value.is_some() {
                self.value = None;
                changed = true;
            }
        }

        changed |= self.current_shape.merge(&other.current_shape);
        changed |= self.future_shape.merge(&other.future_shape);

        let modes = self.array_modes | other.array_modes;
        if modes != self.array_modes {
            self.array_modes = modes;
            changed = true;
        }

        changed
    }

    /// Widen by a representation set (join with a shapeless value of that
    /// type). Returns whether the receiver changed.
    pub fn merge_type(&mut self, spec: SpecType) -> bool {
        let mut changed = false;
        let merged = self.spec | spec;
        if merged != self.spec {
            self.spec = merged;
            changed = true;
        }
        if self.value.is_some() {
            self.value = None;
            changed = true;
        }
        if spec.intersects(SpecType::CELL) {
            if !self.current_shape.is_top() {
                self.current_shape.make_top();
                changed = true;
            }
            if !self.future_shape.is_top() {
                self.future_shape.make_top();
                changed = true;
            }
            if self.array_modes != ArrayModes::TOP {
                self.array_modes = ArrayModes::TOP;
                changed = true;
            }
        }
        changed
    }

    // -------------------------------------------------------------------------
    // Meets
    // -------------------------------------------------------------------------

    /// Narrow to the given representation set. Returns `false` when the
    /// value became bottom, which the caller must treat as proof that the
    /// current program point is unreachable.
    ///
    /// Filtering an already-bottom value is a caller bug: the operation
    /// should have been abandoned when its operand was discovered clear.
    pub fn filter_type(&mut self, mask: SpecType) -> bool {
        debug_assert!(!self.is_clear(), "filtering a bottom value");
        self.spec &= mask;
        if self.spec.is_empty() {
            self.clear();
            return false;
        }
        if !self.spec.intersects(SpecType::CELL) {
            self.current_shape = ShapeBound::Clear;
            self.future_shape = ShapeBound::Clear;
            self.array_modes = ArrayModes::empty();
        }
        // A constant's spec is exactly its own type bits, so a filter that
        // keeps `spec` non-empty cannot have excluded the constant.
        true
    }

    /// Narrow the current shape to a checked set. Returns `false` when the
    /// value became bottom.
    pub fn filter_shapes(&mut self, set: &ShapeSet, shapes: &ShapeRegistry) -> bool {
        debug_assert!(!self.is_clear(), "filtering a bottom value");
        // Passing a shape check proves the value is a cell of one of the
        // checked layouts.
        self.spec &= SpecType::CELL & set.speculation(shapes);
        if self.spec.is_empty() {
            self.clear();
            return false;
        }
        self.current_shape.filter(set);
        if self.current_shape.is_clear() {
            self.clear();
            return false;
        }
        self.array_modes &= set.indexing(shapes);
        if self.array_modes.is_empty() {
            self.clear();
            return false;
        }
        if let Some(value) = &self.value {
            let admitted = match value {
                JsValue::Cell(cell) => set.contains(cell.shape),
                _ => false,
            };
            if !admitted {
                self.clear();
                return false;
            }
        }
        true
    }

    /// Narrow the possible array storage modes. Returns `false` when the
    /// value became bottom.
    pub fn filter_array_modes(&mut self, modes: ArrayModes) -> bool {
        debug_assert!(!self.is_clear(), "filtering a bottom value");
        self.spec &= SpecType::CELL;
        self.array_modes &= modes;
        if self.spec.is_empty() || self.array_modes.is_empty() {
            self.clear();
            return false;
        }
        true
    }

    /// Narrow to exactly one constant. Returns `false` without mutating
    /// when current knowledge already excludes the constant; the caller
    /// uses that to detect a check that would statically fail.
    pub fn filter_by_value(&mut self, value: &JsValue, shapes: &ShapeRegistry) -> bool {
        if !self.validate(value, shapes) {
            return false;
        }
        self.set_constant(value, shapes);
        true
    }

    /// Whether this abstract value admits the given concrete value.
    pub fn validate(&self, value: &JsValue, shapes: &ShapeRegistry) -> bool {
        if self.is_clear() {
            return false;
        }
        if let Some(mine) = &self.value {
            return mine == value;
        }
        if !value.speculation(shapes).is_subset_of(self.spec) {
            return false;
        }
        if let JsValue::Cell(cell) = value {
            match &self.current_shape {
                ShapeBound::Clear => return false,
                ShapeBound::Known(set) => {
                    if !set.contains(cell.shape) {
                        return false;
                    }
                }
                ShapeBound::Top => {}
            }
        }
        true
    }

    // -------------------------------------------------------------------------
    // Clobbering
    // -------------------------------------------------------------------------

    /// An arbitrary side effect may have changed any object's layout:
    /// forget current shapes and storage modes. Primitive type knowledge
    /// and the watchpoint-backed future-shape bound are unaffected.
    pub fn clobber_structures(&mut self) {
        if self.spec.intersects(SpecType::CELL) {
            self.current_shape.make_top();
            self.array_modes = ArrayModes::TOP;
        }
    }

    /// The single shape the value is known or watchpointed to have, if any.
    /// Used to fold property-access fast paths.
    pub fn best_proven_shape(&self) -> Option<ShapeId> {
        self.current_shape
            .as_singleton()
            .or_else(|| self.future_shape.as_singleton())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{ShapeInfo, ShapeKind};

    fn registry() -> (ShapeRegistry, ShapeId, ShapeId) {
        let mut reg = ShapeRegistry::new();
        let a = reg.register(ShapeInfo::new(ShapeKind::Object));
        let b = reg.register(ShapeInfo::new(ShapeKind::Object));
        (reg, a, b)
    }

    fn int32_value(v: i32, reg: &ShapeRegistry) -> AbstractValue {
        let mut av = AbstractValue::default();
        av.set_constant(&JsValue::Int32(v), reg);
        av
    }

    #[test]
    fn default_is_bottom() {
        let av = AbstractValue::default();
        assert!(av.is_clear());
        assert_eq!(av.value, None);
    }

    #[test]
    fn set_constant_narrows_all_components() {
        let (reg, shape, _) = registry();
        let mut av = AbstractValue::default();
        av.set_constant(&JsValue::Int32(3), &reg);
        assert_eq!(av.spec, SpecType::INT32);
        assert!(av.current_shape.is_clear());

        let cell = JsValue::Cell(crate::value::CellRef { handle: 0, shape });
        av.set_constant(&cell, &reg);
        assert_eq!(av.spec, SpecType::FINAL_OBJECT);
        assert_eq!(av.current_shape.as_singleton(), Some(shape));
        assert_eq!(av.best_proven_shape(), Some(shape));
    }

    #[test]
    fn merge_is_monotone() {
        let (reg, _, _) = registry();
        let mut a = int32_value(1, &reg);
        let b = {
            let mut v = AbstractValue::default();
            v.set_constant(&JsValue::double(1.5), &reg);
            v
        };
        assert!(a.merge(&b));
        // Both inputs are still admitted.
        assert!(a.spec.contains(SpecType::INT32));
        assert!(a.spec.contains(SpecType::DOUBLE_REAL));
        assert_eq!(a.value, None);
    }

    #[test]
    fn merge_is_idempotent() {
        let (reg, _, _) = registry();
        let mut a = int32_value(7, &reg);
        let snapshot = a.clone();
        assert!(!a.merge(&snapshot));
        assert_eq!(a, snapshot);
    }

    #[test]
    fn merge_with_bottom_is_identity() {
        let (reg, _, _) = registry();
        let mut a = int32_value(7, &reg);
        let snapshot = a.clone();
        assert!(!a.merge(&AbstractValue::default()));
        assert_eq!(a, snapshot);

        let mut bottom = AbstractValue::default();
        assert!(bottom.merge(&snapshot));
        assert_eq!(bottom, snapshot);
    }

    #[test]
    fn same_constant_survives_merge() {
        let (reg, _, _) = registry();
        let mut a = int32_value(7, &reg);
        let b = int32_value(7, &reg);
        assert!(!a.merge(&b));
        assert_eq!(a.value, Some(JsValue::Int32(7)));
    }

    #[test]
    fn merge_type_widens_and_drops_constants() {
        let (reg, _, _) = registry();
        let mut a = int32_value(7, &reg);
        assert!(a.merge_type(SpecType::DOUBLE_REAL));
        assert!(a.spec.contains(SpecType::INT32 | SpecType::DOUBLE_REAL));
        assert_eq!(a.value, None);

        // Widening by a cell type forgets shape knowledge.
        let mut b = AbstractValue::default();
        b.set_type(SpecType::BOOLEAN);
        assert!(b.merge_type(SpecType::FINAL_OBJECT));
        assert!(b.current_shape.is_top());
    }

    #[test]
    fn filter_is_idempotent() {
        let mut a = AbstractValue::top();
        assert!(a.filter_type(SpecType::NUMBER));
        let once = a.clone();
        assert!(a.filter_type(SpecType::NUMBER));
        assert_eq!(a, once);
    }

    #[test]
    fn filter_to_bottom_reports_unreachable() {
        let (reg, _, _) = registry();
        let mut a = int32_value(7, &reg);
        assert!(!a.filter_type(SpecType::BOOLEAN));
        assert!(a.is_clear());
    }

    #[test]
    fn filter_drops_shape_knowledge_for_non_cells() {
        let mut a = AbstractValue::top();
        assert!(a.filter_type(SpecType::NUMBER));
        assert!(a.current_shape.is_clear());
        assert!(a.array_modes.is_empty());
    }

    #[test]
    fn filter_by_value_rejects_excluded_constants() {
        let (reg, _, _) = registry();
        let mut a = AbstractValue::default();
        a.set_type(SpecType::BOOLEAN);
        let snapshot = a.clone();
        assert!(!a.filter_by_value(&JsValue::Int32(1), &reg));
        assert_eq!(a, snapshot);

        assert!(a.filter_by_value(&JsValue::Boolean(true), &reg));
        assert_eq!(a.value, Some(JsValue::Boolean(true)));
    }

    #[test]
    fn clobber_preserves_primitive_knowledge() {
        let (reg, shape, _) = registry();
        let mut a = AbstractValue::default();
        a.set_shape(shape, &reg);
        let spec_before = a.spec;

        a.clobber_structures();
        assert_eq!(a.spec, spec_before);
        assert!(a.current_shape.is_top());
        assert_eq!(a.array_modes, ArrayModes::TOP);
        // The watchpointed bound survives.
        assert_eq!(a.future_shape.as_singleton(), Some(shape));
        assert_eq!(a.best_proven_shape(), Some(shape));
    }

    #[test]
    fn clobber_leaves_non_cells_alone() {
        let (reg, _, _) = registry();
        let mut a = int32_value(3, &reg);
        let snapshot = a.clone();
        a.clobber_structures();
        assert_eq!(a, snapshot);
    }

    #[test]
    fn filter_shapes_narrows_and_detects_contradiction() {
        let (reg, shape_a, shape_b) = registry();
        let mut v = AbstractValue::default();
        v.set_type(SpecType::CELL);
        assert!(v.filter_shapes(&ShapeSet::singleton(shape_a), &reg));
        assert_eq!(v.current_shape.as_singleton(), Some(shape_a));
        assert_eq!(v.spec, SpecType::FINAL_OBJECT);

        assert!(!v.filter_shapes(&ShapeSet::singleton(shape_b), &reg));
        assert!(v.is_clear());
    }
}
