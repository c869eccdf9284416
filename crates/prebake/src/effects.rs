//! The modification log and speculative effect capture.
//!
//! Every write to the heap or to an environment binding appends a delta with
//! the prior state, so a speculative evaluation can be rolled back atomically
//! by replaying the log in reverse. `evaluate_for_effects` runs a closure in
//! a fresh effect-capture frame, captures what it would have done, restores
//! the pre-state, and hands the captured [`Effects`] to the caller, which may
//! commit them later with [`Realm::apply_effects`].

use indexmap::IndexMap;

use crate::{
    ast::Node,
    completion::{Completion, EvalError, EvalResult},
    environment::{Binding, EnvId, EnvRecord, ThisBindingState},
    generator::Generator,
    heap::{Descriptor, ObjectData, ObjectId, PropertyKey},
    intern::StringId,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::Value,
};

/// One reversible state change.
#[derive(Debug)]
pub enum Delta {
    Binding {
        env: EnvId,
        name: StringId,
        prior: Option<Binding>,
    },
    ThisBinding {
        env: EnvId,
        prior_state: ThisBindingState,
        prior_value: Value,
    },
    Property {
        object: ObjectId,
        key: PropertyKey,
        prior: Option<Descriptor>,
        /// Map position of the prior entry, so deletions restore insertion
        /// order on rollback.
        pos: Option<usize>,
    },
    Proto {
        object: ObjectId,
        prior: Option<ObjectId>,
    },
    Flags {
        object: ObjectId,
        prior_extensible: bool,
        prior_partial: bool,
        prior_simple: bool,
    },
    ObjectCreated {
        object: ObjectId,
    },
    GlobalVarName {
        name: StringId,
    },
}

/// Marker into the log used to scope a speculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMark(usize);

/// The realm-scoped stack of deltas.
#[derive(Debug, Default)]
pub struct ModLog {
    deltas: Vec<Delta>,
}

impl ModLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: Delta) {
        self.deltas.push(delta);
    }

    pub fn mark(&self) -> LogMark {
        LogMark(self.deltas.len())
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// What a speculative evaluation would have done.
///
/// Deltas on objects created inside the speculation are folded into the
/// object snapshots in `created`; the remaining lists only cover pre-existing
/// state.
#[derive(Debug, Clone)]
pub struct Effects {
    pub completion: Completion,
    pub generator: Generator,
    pub bindings: Vec<(EnvId, StringId, Option<Binding>, Option<Binding>)>,
    pub this_bindings: Vec<(EnvId, ThisBindingState, Value, ThisBindingState, Value)>,
    pub properties: Vec<(ObjectId, PropertyKey, Option<Descriptor>, Option<Descriptor>)>,
    pub protos: Vec<(ObjectId, Option<ObjectId>, Option<ObjectId>)>,
    pub flags: Vec<(ObjectId, (bool, bool, bool), (bool, bool, bool))>,
    pub created: Vec<(ObjectId, ObjectData)>,
    pub global_var_names: Vec<StringId>,
}

impl Effects {
    /// Effects that change nothing and complete normally with *empty*.
    pub fn empty() -> Self {
        Self {
            completion: Completion::Normal(None),
            generator: Generator::new(),
            bindings: Vec::new(),
            this_bindings: Vec::new(),
            properties: Vec::new(),
            protos: Vec::new(),
            flags: Vec::new(),
            created: Vec::new(),
            global_var_names: Vec::new(),
        }
    }
}

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// Rolls the heap and environments back to `mark`, replaying the log in
    /// reverse.
    pub(crate) fn rollback_to(&mut self, mark: LogMark) {
        while self.log.deltas.len() > mark.0 {
            let delta = self.log.deltas.pop().expect("log underflow");
            match delta {
                Delta::Binding { env, name, prior } => {
                    let decl = match &mut self.envs.get_mut(env).record {
                        EnvRecord::Declarative(decl) => decl,
                        EnvRecord::Function(func) => &mut func.decl,
                        EnvRecord::Global(global) => &mut global.decl,
                        EnvRecord::Object(_) => {
                            panic!("invariant violated: binding delta for object environment")
                        }
                    };
                    match prior {
                        Some(binding) => {
                            decl.bindings.insert(name, binding);
                        }
                        None => {
                            decl.bindings.shift_remove(&name);
                        }
                    }
                }
                Delta::ThisBinding {
                    env,
                    prior_state,
                    prior_value,
                } => {
                    let EnvRecord::Function(func) = &mut self.envs.get_mut(env).record else {
                        panic!("invariant violated: this-binding delta for non-function environment")
                    };
                    func.this_state = prior_state;
                    func.this_value = prior_value;
                }
                Delta::Property { object, key, prior, pos } => {
                    if !self.heap.is_live(object) {
                        // The object itself was rolled back by a later delta.
                        continue;
                    }
                    let props = &mut self.heap.get_mut(object).properties;
                    match (prior, pos) {
                        (Some(desc), Some(index)) if index < props.len() => {
                            props.shift_insert(index, key, desc);
                        }
                        (Some(desc), _) => {
                            props.insert(key, desc);
                        }
                        (None, _) => {
                            props.shift_remove(&key);
                        }
                    }
                }
                Delta::Proto { object, prior } => {
                    if self.heap.is_live(object) {
                        self.heap.get_mut(object).proto = prior;
                    }
                }
                Delta::Flags {
                    object,
                    prior_extensible,
                    prior_partial,
                    prior_simple,
                } => {
                    if self.heap.is_live(object) {
                        let data = self.heap.get_mut(object);
                        data.extensible = prior_extensible;
                        data.partial = prior_partial;
                        data.simple = prior_simple;
                    }
                }
                Delta::ObjectCreated { object } => {
                    self.heap.kill(object);
                }
                Delta::GlobalVarName { name } => {
                    if let EnvRecord::Global(global) = &mut self.envs.get_mut(self.global_env).record {
                        global.var_names.shift_remove(&name);
                    }
                }
            }
        }
    }

    /// Captures the deltas above `mark` as an [`Effects`] record without
    /// modifying any state.
    fn capture_effects(&self, mark: LogMark, completion: Completion, generator: Generator) -> Effects {
        let mut first_binding: IndexMap<(EnvId, StringId), Option<Binding>, ahash::RandomState> = IndexMap::default();
        let mut first_this: IndexMap<EnvId, (ThisBindingState, Value), ahash::RandomState> = IndexMap::default();
        let mut first_property: IndexMap<(ObjectId, PropertyKey), Option<Descriptor>, ahash::RandomState> =
            IndexMap::default();
        let mut first_proto: IndexMap<ObjectId, Option<ObjectId>, ahash::RandomState> = IndexMap::default();
        let mut first_flags: IndexMap<ObjectId, (bool, bool, bool), ahash::RandomState> = IndexMap::default();
        let mut created: Vec<ObjectId> = Vec::new();
        let mut global_var_names: Vec<StringId> = Vec::new();

        for delta in &self.log.deltas[mark.0..] {
            match delta {
                Delta::Binding { env, name, prior } => {
                    first_binding.entry((*env, *name)).or_insert(*prior);
                }
                Delta::ThisBinding {
                    env,
                    prior_state,
                    prior_value,
                } => {
                    first_this.entry(*env).or_insert((*prior_state, *prior_value));
                }
                Delta::Property { object, key, prior, .. } => {
                    first_property.entry((*object, *key)).or_insert(*prior);
                }
                Delta::Proto { object, prior } => {
                    first_proto.entry(*object).or_insert(*prior);
                }
                Delta::Flags {
                    object,
                    prior_extensible,
                    prior_partial,
                    prior_simple,
                } => {
                    first_flags
                        .entry(*object)
                        .or_insert((*prior_extensible, *prior_partial, *prior_simple));
                }
                Delta::ObjectCreated { object } => created.push(*object),
                Delta::GlobalVarName { name } => global_var_names.push(*name),
            }
        }

        let is_created = |object: ObjectId| created.contains(&object);

        let bindings = first_binding
            .into_iter()
            .map(|((env, name), prior)| {
                let new = match &self.envs.get(env).record {
                    EnvRecord::Declarative(decl) => decl.bindings.get(&name).copied(),
                    EnvRecord::Function(func) => func.decl.bindings.get(&name).copied(),
                    EnvRecord::Global(global) => global.decl.bindings.get(&name).copied(),
                    EnvRecord::Object(_) => None,
                };
                (env, name, prior, new)
            })
            .collect();

        let this_bindings = first_this
            .into_iter()
            .map(|(env, (prior_state, prior_value))| {
                let EnvRecord::Function(func) = &self.envs.get(env).record else {
                    panic!("invariant violated: this-binding delta for non-function environment")
                };
                (env, prior_state, prior_value, func.this_state, func.this_value)
            })
            .collect();

        let properties = first_property
            .into_iter()
            .filter(|((object, _), _)| !is_created(*object))
            .map(|((object, key), prior)| {
                let new = self.heap.get(object).own_property(key).copied();
                (object, key, prior, new)
            })
            .collect();

        let protos = first_proto
            .into_iter()
            .filter(|(object, _)| !is_created(*object))
            .map(|(object, prior)| (object, prior, self.heap.get(object).proto))
            .collect();

        let flags = first_flags
            .into_iter()
            .filter(|(object, _)| !is_created(*object))
            .map(|(object, prior)| {
                let data = self.heap.get(object);
                (object, prior, (data.extensible, data.partial, data.simple))
            })
            .collect();

        let created = created
            .into_iter()
            .map(|object| (object, self.heap.get(object).clone()))
            .collect();

        Effects {
            completion,
            generator,
            bindings,
            this_bindings,
            properties,
            protos,
            flags,
            created,
            global_var_names,
        }
    }

    /// Executes `f` in a fresh, isolated effect-capture frame.
    ///
    /// Returns what would have been done without committing; the pre-state is
    /// always restored before returning. Only fatal errors propagate as
    /// `Err`; abrupt completions are part of the captured effects.
    pub(crate) fn evaluate_for_effects<F>(&mut self, f: F) -> Result<Effects, EvalError>
    where
        F: FnOnce(&mut Self) -> EvalResult<Option<Value>>,
    {
        let mark = self.log.mark();
        self.generators.push(Generator::new());
        self.tracer.on_speculation(true);
        let saved = self.saved_completion.take();

        let result = f(self);

        let generator = self.generators.pop().expect("generator stack underflow");
        let leaked = self.saved_completion.take();
        self.saved_completion = saved;
        self.tracer.on_speculation(false);

        let completion = match result {
            Ok(value) => match leaked {
                Some(pn) => Completion::PossiblyNormal(Box::new(pn)),
                None => Completion::Normal(value),
            },
            Err(EvalError::Abrupt(abrupt)) => Completion::Abrupt(abrupt),
            Err(EvalError::Fatal(fatal)) => {
                self.rollback_to(mark);
                return Err(EvalError::Fatal(fatal));
            }
        };

        let effects = self.capture_effects(mark, completion, generator);
        self.rollback_to(mark);
        Ok(effects)
    }

    /// Speculatively evaluates a single statement node.
    pub(crate) fn evaluate_node_for_effects(&mut self, node: &Node, strict: bool) -> Result<Effects, EvalError> {
        self.evaluate_for_effects(|realm| realm.eval_node(node, strict))
    }

    /// Commits previously captured effects: merges the generator fragment
    /// into the active generator and re-applies the state deltas through the
    /// log.
    pub(crate) fn apply_effects(&mut self, effects: &Effects) {
        for (object, data) in &effects.created {
            self.heap.revive(*object, data.clone());
            self.log.push(Delta::ObjectCreated { object: *object });
        }
        for (env, name, _prior, new) in &effects.bindings {
            self.write_binding(*env, *name, *new);
        }
        for (env, _ps, _pv, new_state, new_value) in &effects.this_bindings {
            let EnvRecord::Function(func) = &self.envs.get(*env).record else {
                continue;
            };
            let (prior_state, prior_value) = (func.this_state, func.this_value);
            self.log.push(Delta::ThisBinding {
                env: *env,
                prior_state,
                prior_value,
            });
            let EnvRecord::Function(func) = &mut self.envs.get_mut(*env).record else {
                unreachable!()
            };
            func.this_state = *new_state;
            func.this_value = *new_value;
        }
        for (object, key, _prior, new) in &effects.properties {
            self.apply_property(*object, *key, *new);
        }
        for (object, _prior, new) in &effects.protos {
            self.set_proto_logged(*object, *new);
        }
        for (object, _prior, (extensible, partial, simple)) in &effects.flags {
            self.set_flags_logged(*object, *extensible, *partial, *simple);
        }
        for name in &effects.global_var_names {
            self.add_global_var_name(*name);
        }
        let entries = effects.generator.entries.clone();
        self.active_generator_mut().entries.extend(entries);
    }

    /// Writes a property state (or its absence) through the log.
    pub(crate) fn apply_property(&mut self, object: ObjectId, key: PropertyKey, new: Option<Descriptor>) {
        let (prior, pos) = {
            let props = &self.heap.get(object).properties;
            (props.get(&key).copied(), props.get_index_of(&key))
        };
        self.log.push(Delta::Property { object, key, prior, pos });
        let props = &mut self.heap.get_mut(object).properties;
        match new {
            Some(desc) => {
                props.insert(key, desc);
            }
            None => {
                props.shift_remove(&key);
            }
        }
    }

    /// Changes an object's prototype through the log.
    pub(crate) fn set_proto_logged(&mut self, object: ObjectId, proto: Option<ObjectId>) {
        let prior = self.heap.get(object).proto;
        self.log.push(Delta::Proto { object, prior });
        self.heap.get_mut(object).proto = proto;
    }

    /// Changes an object's flag bits through the log.
    pub(crate) fn set_flags_logged(&mut self, object: ObjectId, extensible: bool, partial: bool, simple: bool) {
        let data = self.heap.get(object);
        let (prior_extensible, prior_partial, prior_simple) = (data.extensible, data.partial, data.simple);
        self.log.push(Delta::Flags {
            object,
            prior_extensible,
            prior_partial,
            prior_simple,
        });
        let data = self.heap.get_mut(object);
        data.extensible = extensible;
        data.partial = partial;
        data.simple = simple;
    }

    /// Registers a `var` name on the global record through the log.
    pub(crate) fn add_global_var_name(&mut self, name: StringId) {
        let EnvRecord::Global(global) = &mut self.envs.get_mut(self.global_env).record else {
            panic!("invariant violated: global environment is not a global record")
        };
        if global.var_names.insert(name) {
            self.log.push(Delta::GlobalVarName { name });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::SourceId,
        diagnostics::CollectDiagnostics,
        parse::{SourceKind, parse},
        realm::{Realm, RealmFlags},
        resource::NoLimitTracker,
        tracer::NoopTracer,
    };

    fn test_realm() -> Realm<NoLimitTracker, NoopTracer> {
        Realm::new(
            RealmFlags {
                allow_abstract_helpers: true,
                emit_invariants: true,
                ..RealmFlags::default()
            },
            Box::new(CollectDiagnostics::new()),
            NoLimitTracker,
            NoopTracer,
        )
        .expect("realm setup")
    }

    fn global_number_prop(realm: &mut Realm<NoLimitTracker, NoopTracer>, object: &str, prop: &str) -> Option<f64> {
        let object_id = realm.interns.lookup(object)?;
        let global = realm.global_object;
        let desc = realm.heap.get(global).own_property(PropertyKey::Str(object_id))?;
        let Value::Object(id) = desc.value()? else { return None };
        let prop_id = realm.interns.lookup(prop)?;
        match realm.heap.get(id).own_property(PropertyKey::Str(prop_id))?.value()? {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Discarded speculation must leave heap and environment state untouched.
    #[test]
    fn rollback_is_neutral() {
        let mut realm = test_realm();
        let setup = parse("var a = {}; a.x = 1;", SourceId(0), SourceKind::Script, 1, &mut realm.interns).unwrap();
        realm.eval_program(&setup).unwrap();
        let before = realm.heap.stats(&realm.interns);
        assert_eq!(global_number_prop(&mut realm, "a", "x"), Some(1.0));

        let mutation = parse("a.x = 2; b = {};", SourceId(0), SourceKind::Script, 1, &mut realm.interns).unwrap();
        let effects = realm
            .evaluate_for_effects(|r| r.eval_statements(&mutation.body, false))
            .unwrap();
        assert!(matches!(effects.completion, Completion::Normal(_)));

        // The mutation is fully rolled back: same live objects, same values.
        let after = realm.heap.stats(&realm.interns);
        let diff = before.diff(&after);
        assert_eq!(diff.live_objects_delta, 0);
        assert_eq!(global_number_prop(&mut realm, "a", "x"), Some(1.0));

        // Committing the captured effects replays the final state.
        realm.apply_effects(&effects);
        assert_eq!(global_number_prop(&mut realm, "a", "x"), Some(2.0));
        let committed = realm.heap.stats(&realm.interns);
        assert_eq!(after.diff(&committed).live_objects_delta, 1);
    }

    /// A throwing speculation is captured as an abrupt completion, not an
    /// error.
    #[test]
    fn abrupt_completions_are_captured() {
        let mut realm = test_realm();
        let program = parse("throw new Error(\"boom\");", SourceId(0), SourceKind::Script, 1, &mut realm.interns).unwrap();
        let effects = realm
            .evaluate_for_effects(|r| r.eval_statements(&program.body, false))
            .unwrap();
        assert!(matches!(
            effects.completion,
            Completion::Abrupt(crate::completion::AbruptCompletion::Throw { .. })
        ));
    }
}
