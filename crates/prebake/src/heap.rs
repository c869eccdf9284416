//! The object heap: an arena of property-mapped objects with stable indices.
//!
//! Object graphs may be cyclic, so all references are arena indices and the
//! arena owns the objects. Rollback of speculative evaluation marks objects
//! created inside the speculation as dead instead of truncating the arena, so
//! indices captured in effect entries stay valid if the caller later commits.

use std::{collections::BTreeMap, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::FunctionDef,
    environment::EnvId,
    intern::{Interns, StringId, SymbolId},
    intrinsics::{ErrorKind, Intrinsic},
    resource::{ResourceError, ResourceTracker},
    value::Value,
};

/// Unique identifier for an object stored in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A property key: an interned string or a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Str(StringId),
    Sym(SymbolId),
}

impl PropertyKey {
    #[inline]
    pub fn as_str_id(self) -> Option<StringId> {
        match self {
            Self::Str(id) => Some(id),
            Self::Sym(_) => None,
        }
    }
}

/// The attribute record of a single property.
///
/// Data and accessor attributes are mutually exclusive per kind. A data
/// descriptor's value may itself be abstract.
#[derive(Debug, Clone, Copy)]
pub enum Descriptor {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<Value>,
        set: Option<Value>,
        enumerable: bool,
        configurable: bool,
    },
}

impl Descriptor {
    /// A writable/enumerable/configurable data descriptor, the shape produced
    /// by ordinary assignment.
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// A non-enumerable data descriptor, used for intrinsic plumbing such as
    /// `prototype` links.
    pub fn hidden(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    #[inline]
    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// The stored value, for data descriptors.
    #[inline]
    pub fn value(&self) -> Option<Value> {
        match self {
            Self::Data { value, .. } => Some(*value),
            Self::Accessor { .. } => None,
        }
    }

    /// Structural equality, using SameValue for contained values.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Data {
                    value: v1,
                    writable: w1,
                    enumerable: e1,
                    configurable: c1,
                },
                Self::Data {
                    value: v2,
                    writable: w2,
                    enumerable: e2,
                    configurable: c2,
                },
            ) => v1.same_value(*v2) && w1 == w2 && e1 == e2 && c1 == c2,
            (
                Self::Accessor {
                    get: g1,
                    set: s1,
                    enumerable: e1,
                    configurable: c1,
                },
                Self::Accessor {
                    get: g2,
                    set: s2,
                    enumerable: e2,
                    configurable: c2,
                },
            ) => {
                let opt_same = |a: &Option<Value>, b: &Option<Value>| match (a, b) {
                    (Some(x), Some(y)) => x.same_value(*y),
                    (None, None) => true,
                    _ => false,
                };
                opt_same(g1, g2) && opt_same(s1, s2) && e1 == e2 && c1 == c2
            }
            _ => false,
        }
    }
}

/// How a function object computes its result when called.
#[derive(Debug, Clone)]
pub enum FunctionKind {
    /// A user-defined function: AST body plus captured lexical environment.
    User { def: Rc<FunctionDef>, env: EnvId },
    /// A built-in with a native call handler.
    Native(Intrinsic),
}

/// Shell brand, deciding how the residualizer re-creates the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectBrand {
    Ordinary,
    Array,
    Error(ErrorKind),
}

/// A mutable object record.
///
/// The two soundness bits:
/// - `partial`: reads of keys not known present may yield abstract values.
/// - `simple`: no getters, setters, proxies, or prototype side effects;
///   enumeration is over own keys only. Monotone: once cleared it never
///   returns.
#[derive(Debug, Clone)]
pub struct ObjectData {
    pub proto: Option<ObjectId>,
    pub properties: IndexMap<PropertyKey, Descriptor, ahash::RandomState>,
    pub extensible: bool,
    pub partial: bool,
    pub simple: bool,
    pub brand: ObjectBrand,
    /// Present for function objects.
    pub call: Option<FunctionKind>,
    /// Wrapped primitive, for Boolean/Number/String wrapper objects.
    pub primitive: Option<Value>,
    /// Host path this object models (e.g. `src`). Objects with a path are
    /// never materialized as shells; they are referenced through the prelude.
    pub intrinsic_path: Option<StringId>,
}

impl ObjectData {
    /// A plain extensible object with the given prototype.
    pub fn ordinary(proto: Option<ObjectId>) -> Self {
        Self {
            proto,
            properties: IndexMap::default(),
            extensible: true,
            partial: false,
            simple: true,
            brand: ObjectBrand::Ordinary,
            call: None,
            primitive: None,
            intrinsic_path: None,
        }
    }

    /// An own-property lookup; never walks the prototype chain.
    pub fn own_property(&self, key: PropertyKey) -> Option<&Descriptor> {
        self.properties.get(&key)
    }

    /// Own enumerable string keys, in insertion order.
    pub fn enumerable_string_keys(&self) -> Vec<StringId> {
        self.properties
            .iter()
            .filter(|(_, desc)| desc.is_enumerable())
            .filter_map(|(key, _)| key.as_str_id())
            .collect()
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        self.call.is_some()
    }
}

/// Snapshot of heap state at a point in time.
///
/// Used by the rollback tests to assert that discarded speculation leaves the
/// heap bit-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live objects.
    pub live_objects: usize,
    /// Slots tombstoned by rolled-back speculation.
    pub dead_slots: usize,
    /// Total arena capacity.
    pub total_slots: usize,
    /// Live objects per brand name, in deterministic order.
    pub objects_by_brand: BTreeMap<&'static str, usize>,
    /// Number of interned strings.
    pub interned_strings: usize,
}

/// Difference between two heap snapshots; positive deltas mean growth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDiff {
    pub live_objects_delta: isize,
    pub dead_slots_delta: isize,
    pub total_slots_delta: isize,
    pub interned_strings_delta: isize,
}

impl HeapStats {
    /// Computes `other - self` for each tracked count.
    #[must_use]
    pub fn diff(&self, other: &Self) -> HeapDiff {
        let delta = |before: usize, after: usize| (after as isize).wrapping_sub(before as isize);
        HeapDiff {
            live_objects_delta: delta(self.live_objects, other.live_objects),
            dead_slots_delta: delta(self.dead_slots, other.dead_slots),
            total_slots_delta: delta(self.total_slots, other.total_slots),
            interned_strings_delta: delta(self.interned_strings, other.interned_strings),
        }
    }
}

impl HeapDiff {
    /// Whether nothing changed between the two snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_objects_delta == 0
            && self.dead_slots_delta == 0
            && self.total_slots_delta == 0
            && self.interned_strings_delta == 0
    }
}

#[derive(Debug)]
enum Slot {
    Live(ObjectData),
    /// Tombstone for a rolled-back speculative allocation; may be revived if
    /// the captured effects are committed.
    Dead,
}

/// The arena of objects, generic over resource tracking.
#[derive(Debug)]
pub struct Heap<T: ResourceTracker> {
    slots: Vec<Slot>,
    tracker: T,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self { slots: Vec::new(), tracker }
    }

    /// Allocates a new object, counting it against the resource tracker.
    pub fn allocate(&mut self, data: ObjectData) -> Result<ObjectId, ResourceError> {
        self.tracker.on_allocate()?;
        let id = ObjectId(u32::try_from(self.slots.len()).expect("heap arena overflow"));
        self.slots.push(Slot::Live(data));
        Ok(id)
    }

    /// # Panics
    /// Panics if the object was rolled back; reading a dead object is an
    /// engine invariant violation.
    pub fn get(&self, id: ObjectId) -> &ObjectData {
        match &self.slots[id.index()] {
            Slot::Live(data) => data,
            Slot::Dead => panic!("invariant violated: access to rolled-back object {id:?}"),
        }
    }

    /// # Panics
    /// Panics if the object was rolled back.
    pub fn get_mut(&mut self, id: ObjectId) -> &mut ObjectData {
        match &mut self.slots[id.index()] {
            Slot::Live(data) => data,
            Slot::Dead => panic!("invariant violated: access to rolled-back object {id:?}"),
        }
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        matches!(self.slots[id.index()], Slot::Live(_))
    }

    /// Tombstones an object created inside a rolled-back speculation.
    pub(crate) fn kill(&mut self, id: ObjectId) {
        self.slots[id.index()] = Slot::Dead;
    }

    /// Revives a tombstoned object with its captured final state, used when
    /// speculative effects are committed.
    pub(crate) fn revive(&mut self, id: ObjectId, data: ObjectData) {
        self.slots[id.index()] = Slot::Live(data);
    }

    /// Number of slots ever allocated; ids below this are valid.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Captures heap statistics for monitoring and tests.
    pub fn stats(&self, interns: &Interns) -> HeapStats {
        let mut live_objects = 0;
        let mut dead_slots = 0;
        let mut objects_by_brand: BTreeMap<&'static str, usize> = BTreeMap::new();
        for slot in &self.slots {
            match slot {
                Slot::Live(data) => {
                    live_objects += 1;
                    let brand = if data.is_function() {
                        "Function"
                    } else {
                        match data.brand {
                            ObjectBrand::Ordinary => "Object",
                            ObjectBrand::Array => "Array",
                            ObjectBrand::Error(_) => "Error",
                        }
                    };
                    *objects_by_brand.entry(brand).or_insert(0) += 1;
                }
                Slot::Dead => dead_slots += 1,
            }
        }
        HeapStats {
            live_objects,
            dead_slots,
            total_slots: self.slots.len(),
            objects_by_brand,
            interned_strings: interns.len(),
        }
    }
}
