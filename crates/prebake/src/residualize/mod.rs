//! The residualizer: decides what survives into the output program, assigns
//! fresh identifiers, orders declarations by dependency, and builds the final
//! AST for the printer.
//!
//! Two passes. Pass 1 (`visitor`) walks values transitively from the global
//! object, the root generator, and the completion value, computing the
//! reachability set and delaying pure entries whose declared value is not yet
//! known to be required. Pass 2 (`emit`) traverses generators in order,
//! serializes argument values to expressions, and emits statements; object
//! literals come out as constructor-free shells followed by property
//! assignments so that cycles never need forward references.

pub(crate) mod emit;
pub(crate) mod visitor;

use ahash::{AHashMap, AHashSet};

use crate::{
    abstract_value::AbstractId,
    ast::Pos,
    diagnostics::FatalError,
    generator::{Entry, Generator},
    heap::{Descriptor, ObjectId, PropertyKey},
    intern::StringId,
    names::{NameGenerator, PreludeGenerator},
    printer::OutStmt,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::Value,
};

/// Source text retained for residual function emission and source maps.
#[derive(Debug)]
pub(crate) struct SourceInfo {
    pub name: String,
    pub code: String,
    /// Byte offset of each line start.
    pub line_starts: Vec<usize>,
    pub start_line: u32,
}

impl SourceInfo {
    pub fn new(name: &str, code: &str, start_line: u32) -> Self {
        let mut line_starts = vec![0];
        for (index, byte) in code.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(index + 1);
            }
        }
        Self {
            name: name.to_owned(),
            code: code.to_owned(),
            line_starts,
            start_line: start_line.max(1),
        }
    }

    /// Byte offset of a line/column position, counting columns in chars.
    pub fn offset_of(&self, pos: Pos) -> Option<usize> {
        let line_index = pos.line.checked_sub(self.start_line)? as usize;
        let line_start = *self.line_starts.get(line_index)?;
        let mut offset = line_start;
        let mut remaining = pos.column;
        for c in self.code[line_start..].chars() {
            if remaining == 0 {
                break;
            }
            offset += c.len_utf8();
            remaining -= 1;
        }
        Some(offset)
    }
}

/// Residualization state shared by the two passes.
pub(crate) struct Residualizer<'r, T: ResourceTracker, Tr: EvalTracer> {
    pub(crate) realm: &'r mut Realm<T, Tr>,
    pub(crate) sources: &'r [SourceInfo],
    /// Snapshot of the root generator taken at construction.
    pub(crate) root: Generator,
    pub(crate) completion: Option<Value>,
    pub(crate) names: NameGenerator,
    pub(crate) prelude: PreludeGenerator,
    /// Abstract values whose declarations must survive.
    pub(crate) required: AHashSet<AbstractId>,
    /// Pure entries delayed until their declared value is demanded.
    pub(crate) delayed: AHashMap<AbstractId, Entry>,
    /// Every abstract declared by some entry (as opposed to inline).
    pub(crate) entry_declared: AHashSet<AbstractId>,
    pub(crate) ref_counts: AHashMap<ObjectId, usize>,
    pub(crate) visited_objects: AHashSet<ObjectId>,
    pub(crate) abstract_names: AHashMap<AbstractId, String>,
    pub(crate) object_names: AHashMap<ObjectId, String>,
    pub(crate) declared_objects: AHashSet<ObjectId>,
    /// Property assignments waiting for a not-yet-declared dependency.
    pub(crate) deferred_props: Vec<(ObjectId, PropertyKey, Descriptor)>,
}

impl<'r, T: ResourceTracker, Tr: EvalTracer> Residualizer<'r, T, Tr> {
    pub(crate) fn new(realm: &'r mut Realm<T, Tr>, sources: &'r [SourceInfo], completion: Option<Value>) -> Self {
        let root = realm.root_generator().clone();
        let names = NameGenerator::new(realm.flags.unique_suffix.as_deref(), realm.flags.debug_names);
        Self {
            realm,
            sources,
            root,
            completion,
            names,
            prelude: PreludeGenerator::new(),
            required: AHashSet::new(),
            delayed: AHashMap::new(),
            entry_declared: AHashSet::new(),
            ref_counts: AHashMap::new(),
            visited_objects: AHashSet::new(),
            abstract_names: AHashMap::new(),
            object_names: AHashMap::new(),
            declared_objects: AHashSet::new(),
            deferred_props: Vec::new(),
        }
    }

    /// Runs both passes and returns the final output program.
    pub(crate) fn run(mut self) -> Result<Vec<OutStmt>, FatalError> {
        self.forbid_existing_names();
        self.assign_global_names();
        self.visit_roots();
        let body = self.emit()?;

        // Prelude declarations come first; they were accumulated while
        // serializing references to host paths.
        let mut program = Vec::new();
        for (ident, path) in self.prelude.declarations() {
            program.push(OutStmt::Var {
                name: ident.to_owned(),
                init: Some(path_expression(path)),
                loc: None,
            });
        }
        program.extend(body);
        Ok(program)
    }

    /// Every name visible on the global object is off-limits for generated
    /// identifiers.
    fn forbid_existing_names(&mut self) {
        let global = self.realm.global_object;
        let keys: Vec<StringId> = self
            .realm
            .heap
            .get(global)
            .properties
            .keys()
            .filter_map(|key| key.as_str_id())
            .collect();
        for key in keys {
            let text = self.realm.interns.get(key).to_owned();
            self.names.forbid(&text);
        }
    }

    /// Global `var` bindings keep their source names: pre-assign those names
    /// to the objects they hold so the declarations read naturally.
    fn assign_global_names(&mut self) {
        let global_env = self.realm.global_env;
        let crate::environment::EnvRecord::Global(global) = &self.realm.envs.get(global_env).record else {
            panic!("invariant violated: global environment is not a global record")
        };
        let var_names: Vec<StringId> = global.var_names.iter().copied().collect();
        let global_object = self.realm.global_object;
        for name in var_names {
            let desc = self.realm.heap.get(global_object).own_property(PropertyKey::Str(name)).copied();
            if let Some(desc) = desc
                && let Some(Value::Object(id)) = desc.value()
            {
                let data = self.realm.heap.get(id);
                if data.intrinsic_path.is_none()
                    && self.realm.is_fresh(id)
                    && !self.object_names.contains_key(&id)
                {
                    let text = self.realm.interns.get(name).to_owned();
                    self.object_names.insert(id, text);
                }
            }
        }
    }
}

/// Builds the expression for a host path such as `global.Object.prototype`.
fn path_expression(path: &str) -> crate::printer::OutExpr {
    use crate::printer::{OutExpr, OutMember};
    let mut segments = path.split('.');
    let first = segments.next().expect("paths are non-empty");
    let mut expr = OutExpr::Ident(first.to_owned());
    for segment in segments {
        expr = OutExpr::Member {
            object: Box::new(expr),
            property: OutMember::Dot(segment.to_owned()),
        };
    }
    expr
}
