use smallvec::SmallVec;

use crate::{
    ast::{BinaryOp, LogicalOp, UnaryOp},
    intern::StringId,
    value::{TypesDomain, Value, ValuesDomain},
};

/// Unique identifier for an abstract value in the realm's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbstractId(u32);

impl AbstractId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The origin expression of an abstract value: a source fragment with holes
/// filled by the argument values at residualization time.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// A reference to a host-provided path such as `src` or `global.config`.
    /// Rendered through the prelude generator so repeated uses share one
    /// memoized identifier.
    Intrinsic(StringId),
    /// `args[0][args[1]]`
    Member,
    /// `args[0](args[1], …)`
    Call,
    /// `new args[0](args[1], …)`
    New,
    /// `args[0] <op> args[1]`
    Binary(BinaryOp),
    /// `args[0] <op> args[1]` with short-circuit semantics.
    Logical(LogicalOp),
    /// `<op> args[0]`
    Unary(UnaryOp),
    /// `args[0] ? args[1] : args[2]`
    Conditional,
    /// `typeof args[0]`
    Typeof,
}

/// Tag used by the abstract interpreter to recognize and simplify known
/// shapes without re-deriving them from the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AbstractKind {
    /// A conditional join of two branch values.
    Conditional,
    /// A `typeof x === "…"`-style property-name condition template.
    TemplateForPropertyNameCondition,
    /// A member expression kept as a sentinel for later simplification.
    SentinelMemberExpression,
    /// A check for a property known to be present on a partial object.
    CheckForKnownProperty,
    /// The loop variable of a residual `for-in`.
    ForInKey,
    /// The result of a residual call.
    ResidualCall,
}

/// The payload of one abstract value.
///
/// Immutable after construction; the argument vector can only reference
/// values that already exist, so the dependency graph is acyclic by
/// construction.
#[derive(Debug, Clone)]
pub struct AbstractData {
    /// Which value arms the runtime value may take.
    pub types: TypesDomain,
    /// Candidate concrete values, when finite.
    pub values: ValuesDomain,
    /// Ordered argument values that fill the template's holes. Snapshot at
    /// construction time.
    pub args: SmallVec<[Value; 4]>,
    pub template: TemplateSource,
    pub kind: Option<AbstractKind>,
}

impl AbstractData {
    /// Whether this abstract value stands for an object with a finite set of
    /// concrete object candidates.
    pub fn object_candidates(&self) -> Option<&[Value]> {
        if !self.types.must_be_object() {
            return None;
        }
        self.values.candidates()
    }
}

/// Arena of abstract values owned by the realm.
#[derive(Debug, Default)]
pub struct Abstracts {
    arena: Vec<AbstractData>,
}

impl Abstracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: AbstractData) -> AbstractId {
        let id = AbstractId(u32::try_from(self.arena.len()).expect("abstract arena overflow"));
        self.arena.push(data);
        id
    }

    pub fn get(&self, id: AbstractId) -> &AbstractData {
        &self.arena[id.index()]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}
