//! The effect generator: a tree-shaped log of externally observable
//! operations recorded during interpretation and replayed as statements by
//! the residualizer.
//!
//! Each realm has a root generator; speculative frames push children whose
//! entries can be discarded wholesale or merged into the parent. Entries are
//! never reordered: emission order is the order effects were recorded, and
//! child generators expand inline at their owning entry's position.

use smallvec::SmallVec;

use crate::{
    abstract_value::{AbstractData, AbstractId, AbstractKind, TemplateSource},
    ast::CodeRange,
    intern::StringId,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::{TypesDomain, Value, ValuesDomain},
};

/// How an entry rebuilds its residual statement from the serialized argument
/// expressions.
#[derive(Debug, Clone, strum::IntoStaticStr)]
pub enum BuildNode {
    /// `<global>.name = args[0];`
    GlobalAssignment { name: StringId },
    /// `delete <global>.name;`
    GlobalDelete { name: StringId },
    /// `args[0][args[1]] = args[2];`
    PropertyAssignment,
    /// `Object.defineProperty(args[0], key, { value: args[1], … });`
    DefineProperty {
        key: StringId,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// `delete args[0][args[1]];`
    PropertyDelete,
    /// `args[0](args[1], …);` (bound to a declaration when `declared` is
    /// set).
    Call,
    /// `void args[0];`
    VoidExpression,
    /// `console.log(args[0], …);`
    ConsoleLog,
    /// `var <id> = <template rendered from args>;` for the declared abstract.
    Declare,
    /// `if (<condition built from args>) throw new Error(…);`
    Invariant { kind: InvariantKind },
    /// `if (args[0]) { children[0] } else { children[1] }`
    Conditional,
    /// `for (var key in args[1]) { args[0][key] = args[1][key]; }`
    ForInCopy { key: StringId },
    /// `throw args[0];`
    Throw,
}

/// Condition builders for invariant guards.
#[derive(Debug, Clone, Copy)]
pub enum InvariantKind {
    /// `typeof args[0] !== expected`
    TypeofNot { expected: &'static str },
}

/// One recorded effect.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Argument values, snapshot at record time. These are the entry's data
    /// dependencies.
    pub args: SmallVec<[Value; 4]>,
    pub build: BuildNode,
    /// Set when the entry introduces a fresh binding for an abstract value;
    /// its identifier is chosen at residualization time.
    pub declared: Option<AbstractId>,
    /// Child generators for conditionals and loops.
    pub children: Vec<Generator>,
    /// Pure entries may be dropped entirely when their declared value is not
    /// needed.
    pub pure: bool,
    pub loc: CodeRange,
}

/// An ordered sequence of entries.
#[derive(Debug, Clone, Default)]
pub struct Generator {
    pub entries: Vec<Entry>,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Options for [`Realm::derive`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeriveOptions {
    pub kind: Option<AbstractKind>,
    /// Pure entries are dropped when their declared value is never needed.
    pub is_pure: bool,
    /// Suppresses the runtime `typeof` guard normally emitted alongside the
    /// declaration.
    pub skip_invariant: bool,
}

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    fn push_entry(&mut self, entry: Entry) {
        let kind: &'static str = (&entry.build).into();
        self.tracer.on_effect(kind);
        self.active_generator_mut().entries.push(entry);
    }

    fn effect(&mut self, build: BuildNode, args: SmallVec<[Value; 4]>) {
        let loc = self.current_loc;
        self.push_entry(Entry {
            args,
            build,
            declared: None,
            children: Vec::new(),
            pure: false,
            loc,
        });
    }

    /// Records `<global>.name = value`.
    pub(crate) fn emit_global_assignment(&mut self, name: StringId, value: Value) {
        self.effect(BuildNode::GlobalAssignment { name }, SmallVec::from_slice(&[value]));
    }

    /// Records `delete <global>.name`.
    pub(crate) fn emit_global_delete(&mut self, name: StringId) {
        self.effect(BuildNode::GlobalDelete { name }, SmallVec::new());
    }

    /// Records `object[key] = value`.
    pub(crate) fn emit_property_assignment(&mut self, object: Value, key: Value, value: Value) {
        self.effect(BuildNode::PropertyAssignment, SmallVec::from_slice(&[object, key, value]));
    }

    /// Records an `Object.defineProperty` call with explicit attributes.
    pub(crate) fn emit_define_property(
        &mut self,
        object: Value,
        key: StringId,
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    ) {
        self.effect(
            BuildNode::DefineProperty {
                key,
                writable,
                enumerable,
                configurable,
            },
            SmallVec::from_slice(&[object, value]),
        );
    }

    /// Records `delete object[key]`.
    pub(crate) fn emit_property_delete(&mut self, object: Value, key: Value) {
        self.effect(BuildNode::PropertyDelete, SmallVec::from_slice(&[object, key]));
    }

    /// Records a call whose result is not bound.
    pub(crate) fn emit_call(&mut self, callee: Value, args: &[Value]) {
        let mut entry_args = SmallVec::with_capacity(args.len() + 1);
        entry_args.push(callee);
        entry_args.extend_from_slice(args);
        self.effect(BuildNode::Call, entry_args);
    }

    /// Records `void expr`, evaluating an expression for its effects only.
    pub(crate) fn emit_void_expression(&mut self, value: Value) {
        self.effect(BuildNode::VoidExpression, SmallVec::from_slice(&[value]));
    }

    /// Records a `console.log` call.
    pub(crate) fn emit_console_log(&mut self, args: &[Value]) {
        self.effect(BuildNode::ConsoleLog, SmallVec::from_slice(args));
    }

    /// Records a top-level `throw`.
    pub(crate) fn emit_throw(&mut self, value: Value) {
        self.effect(BuildNode::Throw, SmallVec::from_slice(&[value]));
    }

    /// Records a conditional entry whose children are the two branches'
    /// generator fragments.
    pub(crate) fn emit_conditional(&mut self, condition: AbstractId, consequent: Generator, alternate: Generator) {
        let loc = self.current_loc;
        self.push_entry(Entry {
            args: SmallVec::from_slice(&[Value::Abstract(condition)]),
            build: BuildNode::Conditional,
            declared: None,
            children: vec![consequent, alternate],
            pure: false,
            loc,
        });
    }

    /// Records the residual `for (var k in source) target[k] = source[k];`
    /// loop, reusing the original loop variable name.
    pub(crate) fn emit_for_in_copy(&mut self, target: Value, source: Value, key: StringId) {
        self.effect(BuildNode::ForInCopy { key }, SmallVec::from_slice(&[target, source]));
    }

    /// Records an `if (condition) throw` guard over the argument expressions.
    pub(crate) fn emit_invariant(&mut self, args: SmallVec<[Value; 4]>, kind: InvariantKind) {
        self.effect(BuildNode::Invariant { kind }, args);
    }

    /// Mints a fresh abstract value bound to a residual declaration.
    ///
    /// The declaration receives a realm-unique identifier at residualization
    /// time. Unless suppressed, a runtime `typeof` invariant is emitted so a
    /// mis-modeled intrinsic is caught in the produced program instead of
    /// silently misbehaving.
    pub(crate) fn derive(
        &mut self,
        types: TypesDomain,
        values: ValuesDomain,
        args: SmallVec<[Value; 4]>,
        template: TemplateSource,
        opts: DeriveOptions,
    ) -> Value {
        let id = self.abstracts.push(AbstractData {
            types,
            values,
            args: args.clone(),
            template,
            kind: opts.kind,
        });
        let loc = self.current_loc;
        self.push_entry(Entry {
            args,
            build: BuildNode::Declare,
            declared: Some(id),
            children: Vec::new(),
            pure: opts.is_pure,
            loc,
        });
        if !opts.skip_invariant
            && self.flags.emit_invariants
            && let Some(expected) = types.typeof_result()
        {
            self.emit_invariant(
                SmallVec::from_slice(&[Value::Abstract(id)]),
                InvariantKind::TypeofNot { expected },
            );
        }
        Value::Abstract(id)
    }

    /// A residual read of an unknown global in a partial environment.
    pub(crate) fn derive_global_read(&mut self, name: StringId) -> Value {
        self.derive(
            TypesDomain::TOP,
            ValuesDomain::Top,
            SmallVec::new(),
            TemplateSource::Intrinsic(name),
            DeriveOptions {
                is_pure: true,
                skip_invariant: true,
                ..DeriveOptions::default()
            },
        )
    }
}
