//! Object layout descriptors ("shapes").
//!
//! Every heap object carries a shape describing its layout: what kind of
//! object it is, which named properties live in which slots, and which
//! shape an object transitions to when a property is added. The analysis
//! uses shapes to fold property-access fast paths and to prove structure
//! checks redundant.
//!
//! [`ShapeBound`] is the abstract-domain side: the set of shapes a value is
//! known (or may come) to have, with explicit bottom and top.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::ir::arena::{Arena, Id};
use crate::speculation::{ArrayModes, SpecType};

/// Identifier of an interned property name.
pub type PropertyId = u32;

/// Index of a shape in the [`ShapeRegistry`].
pub type ShapeId = Id<ShapeInfo>;

/// Shape sets beyond this size widen to top. Polymorphism past a handful of
/// layouts is not worth specializing for.
const MAX_TRACKED_SHAPES: usize = 4;

// =============================================================================
// Shape Descriptors
// =============================================================================

/// The coarse layout category of a shape.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ShapeKind {
    /// Plain object.
    Object,
    /// Array object.
    Array,
    /// Callable function.
    Function,
    /// String cell.
    String,
    /// Typed array view.
    TypedArray,
    /// Host-provided exotic object.
    Host,
}

impl ShapeKind {
    /// The speculation bit instances of this kind carry.
    #[inline]
    pub const fn speculation(self) -> SpecType {
        match self {
            ShapeKind::Object => SpecType::FINAL_OBJECT,
            ShapeKind::Array => SpecType::ARRAY,
            ShapeKind::Function => SpecType::FUNCTION,
            ShapeKind::String => SpecType::STRING,
            ShapeKind::TypedArray => SpecType::TYPED_ARRAY,
            ShapeKind::Host => SpecType::OBJECT_OTHER,
        }
    }
}

/// One object layout.
#[derive(Clone, Debug)]
pub struct ShapeInfo {
    pub kind: ShapeKind,
    /// Exotic objects can compare loosely-equal to `undefined`; such a shape
    /// can never be proven truthy.
    pub masquerades_as_undefined: bool,
    /// Indexed-storage modes instances of this shape admit.
    pub indexing: ArrayModes,
    slots: FxHashMap<PropertyId, u32>,
    transitions: FxHashMap<PropertyId, ShapeId>,
}

impl ShapeInfo {
    /// A shape of the given kind with no named properties.
    pub fn new(kind: ShapeKind) -> Self {
        let indexing = match kind {
            ShapeKind::Array => ArrayModes::CONTIGUOUS,
            ShapeKind::TypedArray => ArrayModes::TYPED_INT | ArrayModes::TYPED_FLOAT,
            _ => ArrayModes::NON_ARRAY,
        };
        ShapeInfo {
            kind,
            masquerades_as_undefined: false,
            indexing,
            slots: FxHashMap::default(),
            transitions: FxHashMap::default(),
        }
    }

    /// Same shape with explicit indexed-storage modes.
    pub fn with_indexing(mut self, indexing: ArrayModes) -> Self {
        self.indexing = indexing;
        self
    }

    /// Mark the shape as loosely-equal to `undefined`.
    pub fn masquerading(mut self) -> Self {
        self.masquerades_as_undefined = true;
        self
    }
}

// =============================================================================
// Shape Registry
// =============================================================================

/// All shapes known to one compilation.
///
/// The registry is populated by the graph builder before analysis starts and
/// is read-only during a pass.
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    shapes: Arena<ShapeInfo>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shape and return its ID.
    pub fn register(&mut self, info: ShapeInfo) -> ShapeId {
        self.shapes.alloc(info)
    }

    /// Look up a shape.
    #[inline]
    pub fn get(&self, id: ShapeId) -> &ShapeInfo {
        &self.shapes[id]
    }

    /// The speculation bit values of this shape carry.
    #[inline]
    pub fn speculation(&self, id: ShapeId) -> SpecType {
        self.shapes[id].kind.speculation()
    }

    /// The inline slot a named property occupies on this shape, if the
    /// property is present and plain (no accessor).
    pub fn slot_of(&self, shape: ShapeId, property: PropertyId) -> Option<u32> {
        self.shapes[shape].slots.get(&property).copied()
    }

    /// The shape an object of `from` transitions to when `property` is
    /// added, if that transition has been materialized.
    pub fn transition_for(&self, from: ShapeId, property: PropertyId) -> Option<ShapeId> {
        self.shapes[from].transitions.get(&property).copied()
    }

    /// Record that `property` occupies `slot` on `shape`.
    pub fn define_slot(&mut self, shape: ShapeId, property: PropertyId, slot: u32) {
        self.shapes[shape].slots.insert(property, slot);
    }

    /// Record an add-property transition edge.
    pub fn define_transition(&mut self, from: ShapeId, property: PropertyId, to: ShapeId) {
        self.shapes[from].transitions.insert(property, to);
    }
}

// =============================================================================
// Shape Sets
// =============================================================================

/// A small, sorted set of shape IDs.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ShapeSet {
    ids: SmallVec<[ShapeId; 2]>,
}

impl ShapeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set containing exactly one shape.
    pub fn singleton(id: ShapeId) -> Self {
        let mut ids = SmallVec::new();
        ids.push(id);
        ShapeSet { ids }
    }

    /// Build from an unsorted list.
    pub fn from_ids(mut ids: Vec<ShapeId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        ShapeSet {
            ids: SmallVec::from_vec(ids),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: ShapeId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn insert(&mut self, id: ShapeId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ShapeId> + '_ {
        self.ids.iter().copied()
    }

    /// If the set holds exactly one shape, that shape.
    pub fn as_singleton(&self) -> Option<ShapeId> {
        match self.ids.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn is_subset_of(&self, other: &ShapeSet) -> bool {
        self.ids.iter().all(|id| other.contains(*id))
    }

    /// Set intersection.
    pub fn intersect(&self, other: &ShapeSet) -> ShapeSet {
        ShapeSet {
            ids: self
                .ids
                .iter()
                .copied()
                .filter(|id| other.contains(*id))
                .collect(),
        }
    }

    /// The union of the speculation bits of all member shapes.
    pub fn speculation(&self, registry: &ShapeRegistry) -> SpecType {
        self.ids
            .iter()
            .fold(SpecType::empty(), |acc, &id| acc | registry.speculation(id))
    }

    /// The union of the indexing modes of all member shapes.
    pub fn indexing(&self, registry: &ShapeRegistry) -> ArrayModes {
        self.ids
            .iter()
            .fold(ArrayModes::empty(), |acc, &id| acc | registry.get(id).indexing)
    }
}

// =============================================================================
// Abstract Shape Bound
// =============================================================================

/// The shape component of an abstract value.
///
/// `Clear` means the value cannot be a cell carrying a shape at this point
/// (bottom); `Top` means any shape is possible. The bound widens to `Top`
/// once more than [`MAX_TRACKED_SHAPES`] layouts have been observed.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub enum ShapeBound {
    /// No shape is possible (the value is not a cell, or nothing reaches
    /// here).
    #[default]
    Clear,
    /// The shape is one of this set.
    Known(ShapeSet),
    /// Any shape is possible.
    Top,
}

impl ShapeBound {
    /// Bound admitting exactly one shape.
    pub fn exactly(id: ShapeId) -> Self {
        ShapeBound::Known(ShapeSet::singleton(id))
    }

    #[inline]
    pub fn is_clear(&self) -> bool {
        matches!(self, ShapeBound::Clear)
    }

    #[inline]
    pub fn is_top(&self) -> bool {
        matches!(self, ShapeBound::Top)
    }

    /// Whether the bound carries usable knowledge: some shapes are known and
    /// not every shape is possible.
    #[inline]
    pub fn is_neither_clear_nor_top(&self) -> bool {
        matches!(self, ShapeBound::Known(_))
    }

    /// The single admitted shape, if there is exactly one.
    pub fn as_singleton(&self) -> Option<ShapeId> {
        match self {
            ShapeBound::Known(set) => set.as_singleton(),
            _ => None,
        }
    }

    /// Whether every shape this bound admits is in `set`. `Clear` admits
    /// nothing, so it is trivially a subset; `Top` never is.
    pub fn is_subset_of(&self, set: &ShapeSet) -> bool {
        match self {
            ShapeBound::Clear => true,
            ShapeBound::Known(mine) => mine.is_subset_of(set),
            ShapeBound::Top => false,
        }
    }

    /// Lattice join in place. Returns whether the receiver changed.
    pub fn merge(&mut self, other: &ShapeBound) -> bool {
        match other {
            ShapeBound::Clear => false,
            ShapeBound::Top => {
                if self.is_top() {
                    false
                } else {
                    *self = ShapeBound::Top;
                    true
                }
            }
            ShapeBound::Known(theirs) => match self {
                ShapeBound::Top => false,
                ShapeBound::Clear => {
                    *self = ShapeBound::Known(theirs.clone());
                    true
                }
                ShapeBound::Known(mine) => {
                    let mut changed = false;
                    for id in theirs.iter() {
                        changed |= mine.insert(id);
                    }
                    let widened = mine.len() > MAX_TRACKED_SHAPES;
                    if widened {
                        *self = ShapeBound::Top;
                        changed = true;
                    }
                    changed
                }
            },
        }
    }

    /// Lattice meet with an explicit set. The result may become `Clear`,
    /// which the caller must treat as "this program point is unreachable".
    pub fn filter(&mut self, set: &ShapeSet) {
        match &mut *self {
            ShapeBound::Clear => {}
            ShapeBound::Top => {
                *self = if set.is_empty() {
                    ShapeBound::Clear
                } else {
                    ShapeBound::Known(set.clone())
                };
            }
            ShapeBound::Known(mine) => {
                let narrowed = mine.intersect(set);
                *self = if narrowed.is_empty() {
                    ShapeBound::Clear
                } else {
                    ShapeBound::Known(narrowed)
                };
            }
        }
    }

    /// Forget everything (used when a side effect may change any shape).
    pub fn make_top(&mut self) {
        *self = ShapeBound::Top;
    }
}

// =============================================================================
// Tests
// =============================================================================
