//! The realm: the root container of all interpreter state.
//!
//! All mutable process state lives here and the realm is an explicit
//! parameter to every operation; there are no ambient singletons. The realm
//! owns the heap, the environment and abstract-value arenas, the intern
//! table, the modification log, the generator stack, and the execution
//! context stack. Interpretation is single-threaded and strictly sequential:
//! one realm has one active context stack, mutated by paired enter/leave
//! operations.

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::{
    abstract_value::{AbstractData, AbstractKind, AbstractId, Abstracts, TemplateSource},
    ast::CodeRange,
    completion::{EvalError, EvalResult, PossiblyNormal},
    diagnostics::{Diagnostic, DiagnosticHandler, ErrorCode, FatalError, Severity},
    effects::{Delta, ModLog},
    environment::{DeclarativeEnv, EnvId, EnvRecord, Environments, GlobalEnv},
    generator::Generator,
    heap::{Heap, ObjectData, ObjectId, PropertyKey},
    intern::{Interns, SymbolId},
    intrinsics::IntrinsicIds,
    resource::{ResourceError, ResourceTracker},
    tracer::EvalTracer,
    value::{TypesDomain, Value, ValuesDomain},
};

/// Realm-level switches controlling abstract interpretation.
#[derive(Debug, Clone, Default)]
pub(crate) struct RealmFlags {
    /// Treat the global object as partial: unknown global reads become
    /// abstract values and global writes are re-emitted residually.
    pub partial_global: bool,
    /// Whether the `__abstract` helper family may be called.
    pub allow_abstract_helpers: bool,
    /// Emit runtime `typeof` guards alongside derived declarations.
    pub emit_invariants: bool,
    /// Derive debug name fragments from provenance.
    pub debug_names: bool,
    /// Per-build unique suffix for generated identifiers.
    pub unique_suffix: Option<String>,
}

/// One frame of the execution-context stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecutionContext {
    pub lexical_env: EnvId,
    pub variable_env: EnvId,
    /// The function being executed, `None` for script-level code.
    pub function: Option<ObjectId>,
}

/// The root container of interpreter state. See the module docs.
#[derive(Debug)]
pub struct Realm<T: ResourceTracker, Tr: EvalTracer> {
    pub(crate) heap: Heap<T>,
    pub(crate) envs: Environments,
    pub(crate) abstracts: Abstracts,
    pub(crate) interns: Interns,
    pub(crate) log: ModLog,
    /// Generator stack: index 0 is the root generator, later entries are
    /// speculative effect-capture frames.
    pub(crate) generators: Vec<Generator>,
    pub(crate) contexts: Vec<ExecutionContext>,
    pub(crate) intrinsics: IntrinsicIds,
    pub(crate) handler: Box<dyn DiagnosticHandler>,
    pub(crate) tracer: Tr,
    pub(crate) flags: RealmFlags,
    /// Source location of the node currently being evaluated, recorded by
    /// the dispatcher for diagnostics and effect entries.
    pub(crate) current_loc: CodeRange,
    /// A pending possibly-normal completion from a control-flow join, folded
    /// into subsequent results by the dispatcher.
    pub(crate) saved_completion: Option<PossiblyNormal>,
    pub(crate) global_env: EnvId,
    pub(crate) global_object: ObjectId,
    pub(crate) unscopables_symbol: SymbolId,
    /// Heap length after intrinsics were installed; objects at or above this
    /// index were created by the interpreted program.
    pub(crate) initial_heap_len: usize,
    /// Global property keys present before interpretation; these are host
    /// state and are not re-materialized.
    pub(crate) initial_global_keys: AHashSet<PropertyKey>,
}

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// Builds a realm with installed intrinsics and an empty program state.
    pub(crate) fn new(
        flags: RealmFlags,
        handler: Box<dyn DiagnosticHandler>,
        tracker: T,
        tracer: Tr,
    ) -> Result<Self, ResourceError> {
        let mut heap = Heap::new(tracker);
        let global_object = heap.allocate(ObjectData::ordinary(None))?;

        let mut interns = Interns::new();
        let unscopables_desc = interns.intern("unscopables");
        let unscopables_symbol = interns.new_symbol(Some(unscopables_desc));

        let mut envs = Environments::new();
        let global_env = envs.push(
            EnvRecord::Global(GlobalEnv {
                decl: DeclarativeEnv::default(),
                object: global_object,
                var_names: indexmap::IndexSet::default(),
                global_this: Value::Object(global_object),
            }),
            None,
        );

        let placeholder = IntrinsicIds {
            object_prototype: global_object,
            function_prototype: global_object,
            object_ctor: global_object,
            console: global_object,
            math: global_object,
            error_prototypes: [global_object; 5],
            error_ctors: [global_object; 5],
        };

        let mut realm = Self {
            heap,
            envs,
            abstracts: Abstracts::new(),
            interns,
            log: ModLog::new(),
            generators: vec![Generator::new()],
            contexts: vec![ExecutionContext {
                lexical_env: global_env,
                variable_env: global_env,
                function: None,
            }],
            intrinsics: placeholder,
            handler,
            tracer,
            flags,
            current_loc: CodeRange::synthetic(),
            saved_completion: None,
            global_env,
            global_object,
            unscopables_symbol,
            initial_heap_len: 0,
            initial_global_keys: AHashSet::new(),
        };

        realm.intrinsics = realm.install_intrinsics(global_object)?;
        // The residualizer references the global object as `this`.
        let this_path = realm.interns.intern("this");
        realm.heap.get_mut(global_object).intrinsic_path = Some(this_path);
        if realm.flags.partial_global {
            realm.heap.get_mut(global_object).partial = true;
        }
        realm.initial_heap_len = realm.heap.len();
        realm.initial_global_keys = realm.heap.get(global_object).properties.keys().copied().collect();
        Ok(realm)
    }

    /// The generator entries are appended to: the innermost speculative frame
    /// if one is open, the root generator otherwise.
    pub(crate) fn active_generator_mut(&mut self) -> &mut Generator {
        self.generators.last_mut().expect("generator stack underflow")
    }

    pub(crate) fn root_generator(&self) -> &Generator {
        &self.generators[0]
    }

    pub(crate) fn lexical_env(&self) -> EnvId {
        self.contexts.last().expect("context stack underflow").lexical_env
    }

    pub(crate) fn variable_env(&self) -> EnvId {
        self.contexts.last().expect("context stack underflow").variable_env
    }

    /// Enters an execution context. Must be paired with [`Self::pop_context`].
    pub(crate) fn push_context(&mut self, context: ExecutionContext) {
        self.contexts.push(context);
    }

    pub(crate) fn pop_context(&mut self) {
        self.contexts.pop().expect("context stack underflow");
        assert!(!self.contexts.is_empty(), "invariant violated: script context popped");
    }

    /// Mints a fresh abstract value. Args are snapshot; the origin template is
    /// opaque to the interpreter and consumed only by the residualizer.
    pub(crate) fn create_abstract(
        &mut self,
        types: TypesDomain,
        values: ValuesDomain,
        args: SmallVec<[Value; 4]>,
        template: TemplateSource,
        kind: Option<AbstractKind>,
    ) -> Value {
        let id = self.abstracts.push(AbstractData {
            types,
            values,
            args,
            template,
            kind,
        });
        Value::Abstract(id)
    }

    pub(crate) fn abstract_data(&self, id: AbstractId) -> &AbstractData {
        self.abstracts.get(id)
    }

    /// Reports a diagnostic through the realm's handler.
    pub(crate) fn report(&mut self, code: ErrorCode, severity: Severity, message: &str) {
        let diagnostic = Diagnostic::new(code, severity, message, Some(self.current_loc));
        self.handler.handle(diagnostic);
    }

    /// Reports a diagnostic and returns the fatal sentinel for the
    /// exceptional channel.
    pub(crate) fn fatal_diag(&mut self, code: ErrorCode, severity: Severity, message: &str) -> EvalError {
        self.report(code, severity, message);
        EvalError::Fatal(FatalError)
    }

    /// Maps a resource error onto the error taxonomy: deadline exceedance and
    /// allocation limits are fatal with their dedicated codes; call-depth
    /// exhaustion is a model error the interpreted program may catch.
    pub(crate) fn resource_error(&mut self, error: ResourceError) -> EvalError {
        match error {
            ResourceError::Time { .. } => {
                self.fatal_diag(ErrorCode::Timeout, Severity::FatalError, &error.to_string())
            }
            ResourceError::Allocation { .. } => {
                self.fatal_diag(ErrorCode::ResourceLimit, Severity::FatalError, &error.to_string())
            }
            ResourceError::Recursion { .. } => {
                self.throw_error(crate::intrinsics::ErrorKind::RangeError, "Maximum call stack size exceeded")
            }
        }
    }

    /// Allocates an object, recording the creation in the modification log so
    /// speculative allocation can be rolled back.
    pub(crate) fn alloc_object(&mut self, data: ObjectData) -> EvalResult<ObjectId> {
        match self.heap.allocate(data) {
            Ok(id) => {
                self.log.push(Delta::ObjectCreated { object: id });
                Ok(id)
            }
            Err(error) => Err(self.resource_error(error)),
        }
    }

    /// Deadline poll, called at every statement boundary.
    pub(crate) fn check_deadline(&mut self) -> EvalResult<()> {
        match self.heap.tracker_mut().check_time() {
            Ok(()) => Ok(()),
            Err(error) => Err(self.resource_error(error)),
        }
    }

    /// Whether the object was created by the interpreted program (as opposed
    /// to being an intrinsic or host object).
    pub(crate) fn is_fresh(&self, object: ObjectId) -> bool {
        object.index() >= self.initial_heap_len
    }

    /// Hands the tracer back to the driver once interpretation is done.
    pub(crate) fn into_tracer(self) -> Tr {
        self.tracer
    }
}
