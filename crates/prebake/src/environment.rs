//! Environment records: declarative, object-backed, function, and global.
//!
//! A lexical environment is a record plus an optional parent; parent links are
//! non-owning, so the environments form a tree rooted at the realm's global
//! environment. All binding writes go through the modification log so that
//! speculative evaluation can be rolled back.

use indexmap::{IndexMap, IndexSet};

use crate::{
    effects::Delta,
    heap::{ObjectId, PropertyKey},
    intern::StringId,
    intrinsics::ErrorKind,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::Value,
    completion::EvalResult,
};

/// Unique identifier for a lexical environment in the realm's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(u32);

impl EnvId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One binding in a declarative record.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
    /// Uninitialized bindings fail reads with a reference error.
    pub initialized: bool,
    pub deletable: bool,
    /// Whether writes to an immutable binding throw (strict) or no-op.
    pub strict: bool,
}

impl Binding {
    pub fn mutable(deletable: bool) -> Self {
        Self {
            value: Value::Undefined,
            mutable: true,
            initialized: false,
            deletable,
            strict: false,
        }
    }

    pub fn immutable(strict: bool) -> Self {
        Self {
            value: Value::Undefined,
            mutable: false,
            initialized: false,
            deletable: false,
            strict,
        }
    }
}

/// Name → binding map with deterministic iteration order.
#[derive(Debug, Default)]
pub struct DeclarativeEnv {
    pub bindings: IndexMap<StringId, Binding, ahash::RandomState>,
}

/// Delegates bindings to an object's properties.
#[derive(Debug)]
pub struct ObjectEnv {
    pub object: ObjectId,
    /// Set for `with` environments; such records expose the object through
    /// `WithBaseObject` and honor the unscopables symbol.
    pub with_env: bool,
}

/// State of a function environment's `this` binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThisBindingState {
    Lexical,
    Uninitialized,
    Initialized,
}

/// A declarative record extended with `this`, home object, and the function
/// object itself.
#[derive(Debug)]
pub struct FunctionEnv {
    pub decl: DeclarativeEnv,
    pub this_state: ThisBindingState,
    pub this_value: Value,
    pub home_object: Option<ObjectId>,
    pub function_object: ObjectId,
}

/// The composite global record: declarative part, object-backed part, the
/// list of `var` names, and the global `this` value.
#[derive(Debug)]
pub struct GlobalEnv {
    pub decl: DeclarativeEnv,
    pub object: ObjectId,
    pub var_names: IndexSet<StringId, ahash::RandomState>,
    pub global_this: Value,
}

/// The record variants.
#[derive(Debug)]
pub enum EnvRecord {
    Declarative(DeclarativeEnv),
    Object(ObjectEnv),
    Function(FunctionEnv),
    Global(GlobalEnv),
}

/// A record plus its parent link.
#[derive(Debug)]
pub struct LexicalEnv {
    pub record: EnvRecord,
    pub parent: Option<EnvId>,
}

/// Arena of lexical environments owned by the realm.
#[derive(Debug, Default)]
pub struct Environments {
    arena: Vec<LexicalEnv>,
}

impl Environments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EnvRecord, parent: Option<EnvId>) -> EnvId {
        let id = EnvId(u32::try_from(self.arena.len()).expect("environment arena overflow"));
        self.arena.push(LexicalEnv { record, parent });
        id
    }

    pub fn get(&self, id: EnvId) -> &LexicalEnv {
        &self.arena[id.index()]
    }

    pub fn get_mut(&mut self, id: EnvId) -> &mut LexicalEnv {
        &mut self.arena[id.index()]
    }

    pub fn parent(&self, id: EnvId) -> Option<EnvId> {
        self.arena[id.index()].parent
    }
}

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    fn declarative_part(&self, env: EnvId) -> Option<&DeclarativeEnv> {
        match &self.envs.get(env).record {
            EnvRecord::Declarative(decl) => Some(decl),
            EnvRecord::Function(func) => Some(&func.decl),
            EnvRecord::Global(global) => Some(&global.decl),
            EnvRecord::Object(_) => None,
        }
    }

    fn declarative_part_mut(&mut self, env: EnvId) -> Option<&mut DeclarativeEnv> {
        match &mut self.envs.get_mut(env).record {
            EnvRecord::Declarative(decl) => Some(decl),
            EnvRecord::Function(func) => Some(&mut func.decl),
            EnvRecord::Global(global) => Some(&mut global.decl),
            EnvRecord::Object(_) => None,
        }
    }

    /// Writes a declarative binding through the modification log.
    pub(crate) fn write_binding(&mut self, env: EnvId, name: StringId, binding: Option<Binding>) {
        let prior = self
            .declarative_part(env)
            .and_then(|decl| decl.bindings.get(&name).copied());
        self.log.push(Delta::Binding { env, name, prior });
        let decl = self
            .declarative_part_mut(env)
            .expect("invariant violated: binding write to object environment");
        match binding {
            Some(b) => {
                decl.bindings.insert(name, b);
            }
            None => {
                decl.bindings.shift_remove(&name);
            }
        }
    }

    /// HasBinding.
    pub(crate) fn has_binding(&mut self, env: EnvId, name: StringId) -> EvalResult<bool> {
        match &self.envs.get(env).record {
            EnvRecord::Declarative(decl) => Ok(decl.bindings.contains_key(&name)),
            EnvRecord::Function(func) => Ok(func.decl.bindings.contains_key(&name)),
            EnvRecord::Global(global) => {
                if global.decl.bindings.contains_key(&name) {
                    return Ok(true);
                }
                let object = global.object;
                self.has_property(object, PropertyKey::Str(name))
            }
            EnvRecord::Object(obj_env) => {
                let (object, with_env) = (obj_env.object, obj_env.with_env);
                if !self.has_property(object, PropertyKey::Str(name))? {
                    return Ok(false);
                }
                if with_env && self.is_unscopable(object, name)? {
                    return Ok(false);
                }
                Ok(true)
            }
        }
    }

    /// CreateMutableBinding.
    pub(crate) fn create_mutable_binding(&mut self, env: EnvId, name: StringId, deletable: bool) {
        debug_assert!(
            self.declarative_part(env)
                .is_none_or(|decl| !decl.bindings.contains_key(&name)),
            "invariant violated: duplicate binding"
        );
        self.write_binding(env, name, Some(Binding::mutable(deletable)));
    }

    /// CreateImmutableBinding.
    pub(crate) fn create_immutable_binding(&mut self, env: EnvId, name: StringId, strict: bool) {
        self.write_binding(env, name, Some(Binding::immutable(strict)));
    }

    /// InitializeBinding.
    pub(crate) fn initialize_binding(&mut self, env: EnvId, name: StringId, value: Value) {
        let mut binding = self
            .declarative_part(env)
            .and_then(|decl| decl.bindings.get(&name).copied())
            .expect("invariant violated: initializing a missing binding");
        debug_assert!(!binding.initialized, "invariant violated: double initialization");
        binding.value = value;
        binding.initialized = true;
        self.write_binding(env, name, Some(binding));
    }

    /// SetMutableBinding.
    pub(crate) fn set_mutable_binding(&mut self, env: EnvId, name: StringId, value: Value, strict: bool) -> EvalResult<()> {
        match &self.envs.get(env).record {
            EnvRecord::Declarative(_) | EnvRecord::Function(_) | EnvRecord::Global(_) => {
                let existing = self
                    .declarative_part(env)
                    .and_then(|decl| decl.bindings.get(&name).copied());
                match existing {
                    Some(binding) if !binding.initialized => {
                        let text = self.interns.get(name).to_owned();
                        Err(self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not initialized")))
                    }
                    Some(binding) if !binding.mutable => {
                        if strict || binding.strict {
                            let text = self.interns.get(name).to_owned();
                            Err(self.throw_error(
                                ErrorKind::TypeError,
                                &format!("Assignment to constant variable {text}"),
                            ))
                        } else {
                            Ok(())
                        }
                    }
                    Some(mut binding) => {
                        binding.value = value;
                        self.write_binding(env, name, Some(binding));
                        Ok(())
                    }
                    None => {
                        if let EnvRecord::Global(global) = &self.envs.get(env).record {
                            // Fall through to the object-backed part.
                            let object = global.object;
                            return self.set_object_binding(object, name, value, strict);
                        }
                        if strict {
                            let text = self.interns.get(name).to_owned();
                            return Err(
                                self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not defined"))
                            );
                        }
                        self.write_binding(
                            env,
                            name,
                            Some(Binding {
                                value,
                                mutable: true,
                                initialized: true,
                                deletable: true,
                                strict: false,
                            }),
                        );
                        Ok(())
                    }
                }
            }
            EnvRecord::Object(obj_env) => {
                let object = obj_env.object;
                self.set_object_binding(object, name, value, strict)
            }
        }
    }

    fn set_object_binding(&mut self, object: ObjectId, name: StringId, value: Value, strict: bool) -> EvalResult<()> {
        let key = PropertyKey::Str(name);
        if strict && !self.has_property(object, key)? {
            let text = self.interns.get(name).to_owned();
            return Err(self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not defined")));
        }
        self.ordinary_set(object, key, value, strict)
    }

    /// GetBindingValue.
    pub(crate) fn get_binding_value(&mut self, env: EnvId, name: StringId, strict: bool) -> EvalResult<Value> {
        match &self.envs.get(env).record {
            EnvRecord::Declarative(_) | EnvRecord::Function(_) => {
                let binding = self
                    .declarative_part(env)
                    .and_then(|decl| decl.bindings.get(&name).copied())
                    .expect("invariant violated: reading a missing binding");
                if !binding.initialized {
                    let text = self.interns.get(name).to_owned();
                    return Err(self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not initialized")));
                }
                Ok(binding.value)
            }
            EnvRecord::Global(global) => {
                if let Some(binding) = global.decl.bindings.get(&name).copied() {
                    if !binding.initialized {
                        let text = self.interns.get(name).to_owned();
                        return Err(
                            self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not initialized"))
                        );
                    }
                    return Ok(binding.value);
                }
                let object = global.object;
                let key = PropertyKey::Str(name);
                if self.has_property(object, key)? {
                    return self.ordinary_get(object, key, Value::Object(object));
                }
                if self.heap.get(object).partial {
                    // Unknown global in a partial environment: read residually.
                    return Ok(self.derive_global_read(name));
                }
                let text = self.interns.get(name).to_owned();
                Err(self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not defined")))
            }
            EnvRecord::Object(obj_env) => {
                let object = obj_env.object;
                let key = PropertyKey::Str(name);
                if !self.has_property(object, key)? {
                    if strict {
                        let text = self.interns.get(name).to_owned();
                        return Err(self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not defined")));
                    }
                    return Ok(Value::Undefined);
                }
                self.ordinary_get(object, key, Value::Object(object))
            }
        }
    }

    /// DeleteBinding.
    pub(crate) fn delete_binding(&mut self, env: EnvId, name: StringId) -> EvalResult<bool> {
        match &self.envs.get(env).record {
            EnvRecord::Declarative(_) | EnvRecord::Function(_) => {
                let existing = self
                    .declarative_part(env)
                    .and_then(|decl| decl.bindings.get(&name).copied());
                match existing {
                    Some(binding) if binding.deletable => {
                        self.write_binding(env, name, None);
                        Ok(true)
                    }
                    Some(_) => Ok(false),
                    None => Ok(true),
                }
            }
            EnvRecord::Global(global) => {
                if global.decl.bindings.contains_key(&name) {
                    // Declarative global bindings are not deletable.
                    return Ok(false);
                }
                if global.var_names.contains(&name) {
                    return Ok(false);
                }
                let object = global.object;
                self.delete_property(object, PropertyKey::Str(name))
            }
            EnvRecord::Object(obj_env) => {
                let object = obj_env.object;
                self.delete_property(object, PropertyKey::Str(name))
            }
        }
    }

    /// HasThisBinding.
    pub(crate) fn has_this_binding(&self, env: EnvId) -> bool {
        match &self.envs.get(env).record {
            EnvRecord::Declarative(_) | EnvRecord::Object(_) => false,
            EnvRecord::Function(func) => func.this_state != ThisBindingState::Lexical,
            EnvRecord::Global(_) => true,
        }
    }

    /// GetThisBinding.
    pub(crate) fn get_this_binding(&mut self, env: EnvId) -> EvalResult<Value> {
        match &self.envs.get(env).record {
            EnvRecord::Function(func) => {
                if func.this_state == ThisBindingState::Uninitialized {
                    return Err(self.throw_error(ErrorKind::ReferenceError, "must call super before accessing this"));
                }
                Ok(func.this_value)
            }
            EnvRecord::Global(global) => Ok(global.global_this),
            EnvRecord::Declarative(_) | EnvRecord::Object(_) => {
                panic!("invariant violated: GetThisBinding on a record without one")
            }
        }
    }

    /// HasSuperBinding.
    pub(crate) fn has_super_binding(&self, env: EnvId) -> bool {
        match &self.envs.get(env).record {
            EnvRecord::Function(func) => func.this_state != ThisBindingState::Lexical && func.home_object.is_some(),
            _ => false,
        }
    }

    /// WithBaseObject.
    pub(crate) fn with_base_object(&self, env: EnvId) -> Option<ObjectId> {
        match &self.envs.get(env).record {
            EnvRecord::Object(obj_env) if obj_env.with_env => Some(obj_env.object),
            _ => None,
        }
    }

    /// BindThisValue.
    pub(crate) fn bind_this_value(&mut self, env: EnvId, value: Value) -> EvalResult<()> {
        let EnvRecord::Function(func) = &self.envs.get(env).record else {
            panic!("invariant violated: BindThisValue on a non-function record")
        };
        if func.this_state == ThisBindingState::Initialized {
            return Err(self.throw_error(ErrorKind::ReferenceError, "super called twice"));
        }
        let (prior_state, prior_value) = (func.this_state, func.this_value);
        self.log.push(Delta::ThisBinding {
            env,
            prior_state,
            prior_value,
        });
        let EnvRecord::Function(func) = &mut self.envs.get_mut(env).record else {
            unreachable!()
        };
        func.this_state = ThisBindingState::Initialized;
        func.this_value = value;
        Ok(())
    }

    /// Whether `name` is blocked by the object's unscopables for `with`
    /// resolution.
    fn is_unscopable(&mut self, object: ObjectId, name: StringId) -> EvalResult<bool> {
        let key = PropertyKey::Sym(self.unscopables_symbol);
        if !self.has_property(object, key)? {
            return Ok(false);
        }
        let blocklist = self.ordinary_get(object, key, Value::Object(object))?;
        let Value::Object(blocklist) = blocklist else {
            return Ok(false);
        };
        let entry = self.ordinary_get(blocklist, PropertyKey::Str(name), Value::Object(blocklist))?;
        Ok(self.to_boolean_value(entry).unwrap_or(false))
    }

    /// Walks the environment chain to find the record binding `name`.
    ///
    /// Returns the environment, or `None` when the name is unresolvable.
    pub(crate) fn lookup_env(&mut self, mut env: Option<EnvId>, name: StringId) -> EvalResult<Option<EnvId>> {
        while let Some(current) = env {
            if self.has_binding(current, name)? {
                return Ok(Some(current));
            }
            env = self.envs.parent(current);
        }
        Ok(None)
    }
}
