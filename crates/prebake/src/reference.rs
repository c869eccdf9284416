use crate::{
    completion::EvalResult,
    environment::EnvId,
    heap::{Descriptor, PropertyKey},
    intern::StringId,
    intrinsics::ErrorKind,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::Value,
};

/// The base of a reference.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RefBase {
    /// The name resolved to no binding anywhere on the chain.
    Unresolvable,
    /// An environment record binding.
    Env(EnvId),
    /// A property of a value (object, primitive wrapper candidate, or
    /// abstract).
    Value(Value),
}

/// The referenced name.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RefName {
    /// A statically known name (environment references).
    Str(StringId),
    /// A computed key: string, symbol, or abstract.
    Value(Value),
}

/// A resolved reference: the *place* an assignment target, `delete`, or
/// `typeof` names, rather than its value.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reference {
    pub base: RefBase,
    pub name: RefName,
    pub strict: bool,
    /// Present for super references.
    pub this_value: Option<Value>,
}

impl Reference {
    pub fn env(env: EnvId, name: StringId, strict: bool) -> Self {
        Self {
            base: RefBase::Env(env),
            name: RefName::Str(name),
            strict,
            this_value: None,
        }
    }

    pub fn unresolvable(name: StringId, strict: bool) -> Self {
        Self {
            base: RefBase::Unresolvable,
            name: RefName::Str(name),
            strict,
            this_value: None,
        }
    }

    pub fn member(base: Value, key: Value, strict: bool) -> Self {
        Self {
            base: RefBase::Value(base),
            name: RefName::Value(key),
            strict,
            this_value: None,
        }
    }

    fn name_str(&self) -> Option<StringId> {
        match self.name {
            RefName::Str(id) => Some(id),
            RefName::Value(Value::Str(id)) => Some(id),
            RefName::Value(_) => None,
        }
    }
}

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// ResolveBinding: walks the environment chain from `env`.
    pub(crate) fn resolve_binding(&mut self, name: StringId, env: EnvId, strict: bool) -> EvalResult<Reference> {
        match self.lookup_env(Some(env), name)? {
            Some(found) => Ok(Reference::env(found, name, strict)),
            None => Ok(Reference::unresolvable(name, strict)),
        }
    }

    /// GetValue.
    pub(crate) fn get_value(&mut self, reference: Reference) -> EvalResult<Value> {
        match reference.base {
            RefBase::Unresolvable => {
                let name = reference.name_str().expect("unresolvable references carry a name");
                if self.flags.partial_global {
                    return Ok(self.derive_global_read(name));
                }
                let text = self.interns.get(name).to_owned();
                Err(self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not defined")))
            }
            RefBase::Env(env) => {
                let name = reference.name_str().expect("environment references carry a name");
                self.get_binding_value(env, name, reference.strict)
            }
            RefBase::Value(base) => {
                let key = match reference.name {
                    RefName::Str(id) => Value::Str(id),
                    RefName::Value(key) => key,
                };
                self.get_member(base, key)
            }
        }
    }

    /// PutValue. Strict-mode assignment to an unresolvable name throws; sloppy
    /// mode creates and initializes a global binding.
    pub(crate) fn put_value(&mut self, reference: Reference, value: Value) -> EvalResult<()> {
        match reference.base {
            RefBase::Unresolvable => {
                let name = reference.name_str().expect("unresolvable references carry a name");
                if reference.strict {
                    let text = self.interns.get(name).to_owned();
                    return Err(self.throw_error(ErrorKind::ReferenceError, &format!("{text} is not defined")));
                }
                let global = self.global_object;
                if self.flags.partial_global {
                    // Model the write and re-emit it as a global assignment.
                    self.apply_property(global, PropertyKey::Str(name), Some(Descriptor::data(value)));
                    self.emit_global_assignment(name, value);
                    return Ok(());
                }
                self.ordinary_set(global, PropertyKey::Str(name), value, false)
            }
            RefBase::Env(env) => {
                let name = reference.name_str().expect("environment references carry a name");
                self.set_mutable_binding(env, name, value, reference.strict)
            }
            RefBase::Value(base) => {
                let key = match reference.name {
                    RefName::Str(id) => Value::Str(id),
                    RefName::Value(key) => key,
                };
                self.set_member(base, key, value, reference.strict)
            }
        }
    }

    /// The `delete` operator over a resolved reference.
    pub(crate) fn delete_reference(&mut self, reference: Reference) -> EvalResult<bool> {
        match reference.base {
            RefBase::Unresolvable => {
                let name = reference.name_str().expect("unresolvable references carry a name");
                if self.flags.partial_global {
                    self.emit_global_delete(name);
                    self.apply_property(self.global_object, PropertyKey::Str(name), None);
                    return Ok(true);
                }
                Ok(true)
            }
            RefBase::Env(env) => {
                let name = reference.name_str().expect("environment references carry a name");
                self.delete_binding(env, name)
            }
            RefBase::Value(base) => match base {
                Value::Object(object) => {
                    let key = match reference.name {
                        RefName::Str(id) => Value::Str(id),
                        RefName::Value(key) => key,
                    };
                    if !key.is_concrete() {
                        if !(self.heap.get(object).partial && self.heap.get(object).simple) {
                            return Err(self.fatal_diag(
                                crate::diagnostics::ErrorCode::UnsupportedAbstractAccess,
                                crate::diagnostics::Severity::FatalError,
                                "abstract-keyed delete on an object the engine must model precisely",
                            ));
                        }
                        self.emit_property_delete(base, key);
                        return Ok(true);
                    }
                    let key = self.to_property_key(key)?;
                    self.delete_property(object, key)
                }
                _ => Ok(true),
            },
        }
    }
}
