//! Property access semantics over the joined concrete/abstract lattice.
//!
//! Concrete base + concrete key resolves along the prototype chain. A read of
//! an unknown key on a partial object yields an abstract value. Accesses the
//! engine cannot prove sound (abstract base that may not be an object,
//! abstract keys on non-simple objects) abort with a diagnostic instead of
//! guessing.

use smallvec::SmallVec;

use crate::{
    abstract_value::{AbstractKind, TemplateSource},
    completion::EvalResult,
    diagnostics::{ErrorCode, Severity},
    generator::DeriveOptions,
    heap::{Descriptor, ObjectId, PropertyKey},
    intrinsics::ErrorKind,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::{TypesDomain, Value, ValuesDomain},
};

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// HasProperty: own or inherited. Unknown keys on partial objects count
    /// as absent here; reads through [`Self::ordinary_get`] still produce
    /// abstract values for them.
    pub(crate) fn has_property(&mut self, object: ObjectId, key: PropertyKey) -> EvalResult<bool> {
        let mut current = Some(object);
        while let Some(id) = current {
            let data = self.heap.get(id);
            if data.own_property(key).is_some() {
                return Ok(true);
            }
            current = data.proto;
        }
        Ok(false)
    }

    /// Ordinary Get along the prototype chain, invoking getters against
    /// `receiver`.
    pub(crate) fn ordinary_get(&mut self, object: ObjectId, key: PropertyKey, receiver: Value) -> EvalResult<Value> {
        let mut current = Some(object);
        while let Some(id) = current {
            let desc = self.heap.get(id).own_property(key).copied();
            match desc {
                Some(Descriptor::Data { value, .. }) => return Ok(value),
                Some(Descriptor::Accessor { get, .. }) => {
                    return match get {
                        Some(Value::Object(getter)) => self.call_function(getter, receiver, &[]),
                        _ => Ok(Value::Undefined),
                    };
                }
                None => current = self.heap.get(id).proto,
            }
        }
        let data = self.heap.get(object);
        if data.partial {
            if !data.simple {
                return Err(self.fatal_diag(
                    ErrorCode::UnsupportedAbstractAccess,
                    Severity::FatalError,
                    "read of an unknown key on a partial, non-simple object",
                ));
            }
            let PropertyKey::Str(name) = key else {
                return Err(self.fatal_diag(
                    ErrorCode::UnsupportedAbstractAccess,
                    Severity::FatalError,
                    "symbol-keyed read on a partial object",
                ));
            };
            return Ok(self.derive(
                TypesDomain::TOP,
                ValuesDomain::Top,
                SmallVec::from_slice(&[Value::Object(object), Value::Str(name)]),
                TemplateSource::Member,
                DeriveOptions {
                    kind: Some(AbstractKind::CheckForKnownProperty),
                    is_pure: true,
                    skip_invariant: true,
                },
            ));
        }
        Ok(Value::Undefined)
    }

    /// Ordinary Set: own data property update, setter invocation, or new own
    /// property creation, honoring writability and extensibility.
    pub(crate) fn ordinary_set(&mut self, object: ObjectId, key: PropertyKey, value: Value, strict: bool) -> EvalResult<()> {
        let partial = self.heap.get(object).partial;

        // Find the controlling descriptor along the chain.
        let mut holder = None;
        let mut current = Some(object);
        while let Some(id) = current {
            if self.heap.get(id).own_property(key).is_some() {
                holder = Some(id);
                break;
            }
            current = self.heap.get(id).proto;
        }

        match holder.map(|id| (id, *self.heap.get(id).own_property(key).expect("holder has the property"))) {
            Some((holder_id, Descriptor::Data { writable, enumerable, configurable, .. })) => {
                if !writable {
                    if strict {
                        return Err(self.throw_error(ErrorKind::TypeError, "Cannot assign to read only property"));
                    }
                    return Ok(());
                }
                if holder_id == object {
                    self.apply_property(
                        object,
                        key,
                        Some(Descriptor::Data {
                            value,
                            writable,
                            enumerable,
                            configurable,
                        }),
                    );
                } else {
                    self.create_own_data_property(object, key, value, strict)?;
                }
            }
            Some((_, Descriptor::Accessor { set, .. })) => match set {
                Some(Value::Object(setter)) => {
                    self.call_function(setter, Value::Object(object), &[value])?;
                }
                _ => {
                    if strict {
                        return Err(
                            self.throw_error(ErrorKind::TypeError, "Cannot set property which has only a getter")
                        );
                    }
                    return Ok(());
                }
            },
            None => self.create_own_data_property(object, key, value, strict)?,
        }

        if partial && let PropertyKey::Str(name) = key {
            // Writes to host-modeled objects must survive into the output.
            self.emit_property_assignment(Value::Object(object), Value::Str(name), value);
        }
        Ok(())
    }

    fn create_own_data_property(&mut self, object: ObjectId, key: PropertyKey, value: Value, strict: bool) -> EvalResult<()> {
        if !self.heap.get(object).extensible {
            if strict {
                return Err(self.throw_error(ErrorKind::TypeError, "Cannot add property, object is not extensible"));
            }
            return Ok(());
        }
        self.apply_property(object, key, Some(Descriptor::data(value)));
        Ok(())
    }

    /// Delete of an own property; true when the property is gone afterwards.
    pub(crate) fn delete_property(&mut self, object: ObjectId, key: PropertyKey) -> EvalResult<bool> {
        let Some(desc) = self.heap.get(object).own_property(key).copied() else {
            return Ok(true);
        };
        let configurable = match desc {
            Descriptor::Data { configurable, .. } | Descriptor::Accessor { configurable, .. } => configurable,
        };
        if !configurable {
            return Ok(false);
        }
        self.apply_property(object, key, None);
        if self.heap.get(object).partial
            && let PropertyKey::Str(name) = key
        {
            self.emit_property_delete(Value::Object(object), Value::Str(name));
        }
        Ok(true)
    }

    /// Member read over the joined lattice: `base[key]`.
    pub(crate) fn get_member(&mut self, base: Value, key: Value) -> EvalResult<Value> {
        match base {
            Value::Undefined | Value::Null => {
                Err(self.throw_error(ErrorKind::TypeError, "Cannot read properties of undefined or null"))
            }
            Value::Object(object) => {
                if key.is_concrete() {
                    let key = self.to_property_key(key)?;
                    self.ordinary_get(object, key, base)
                } else {
                    let data = self.heap.get(object);
                    if !data.simple {
                        return Err(self.fatal_diag(
                            ErrorCode::UnsupportedAbstractAccess,
                            Severity::FatalError,
                            "abstract-keyed read on a non-simple object",
                        ));
                    }
                    Ok(self.derive(
                        TypesDomain::TOP,
                        ValuesDomain::Top,
                        SmallVec::from_slice(&[base, key]),
                        TemplateSource::Member,
                        DeriveOptions {
                            kind: Some(AbstractKind::SentinelMemberExpression),
                            is_pure: true,
                            skip_invariant: true,
                        },
                    ))
                }
            }
            Value::Str(id) => {
                let Value::Str(key_id) = self.concretize_key_for_string(key)? else {
                    return Ok(Value::Undefined);
                };
                let text = self.interns.get(id);
                if key_id == self.interns.common().length {
                    return Ok(Value::Number(text.chars().count() as f64));
                }
                let key_text = self.interns.get(key_id);
                if let Ok(index) = key_text.parse::<usize>()
                    && let Some(c) = self.interns.get(id).chars().nth(index)
                {
                    let s = c.to_string();
                    return Ok(Value::Str(self.interns.intern(&s)));
                }
                Ok(Value::Undefined)
            }
            Value::Number(_) | Value::Bool(_) | Value::Symbol(_) => Ok(Value::Undefined),
            Value::Abstract(id) => {
                let data = self.abstracts.get(id);
                if !data.types.must_be_object() {
                    return Err(self.fatal_diag(
                        ErrorCode::UnsupportedAbstractAccess,
                        Severity::FatalError,
                        "property access on an abstract value that may not be an object",
                    ));
                }
                // A finite candidate set where every candidate agrees can stay
                // concrete.
                if let Some(candidates) = self.abstracts.get(id).object_candidates().map(<[Value]>::to_vec)
                    && key.is_concrete()
                    && !candidates.is_empty()
                {
                    let mut agreed: Option<Value> = None;
                    let mut all_agree = true;
                    for candidate in &candidates {
                        let result = self.get_member(*candidate, key)?;
                        match agreed {
                            None => agreed = Some(result),
                            Some(prev) if prev.same_value(result) => {}
                            Some(_) => {
                                all_agree = false;
                                break;
                            }
                        }
                    }
                    if all_agree && let Some(result) = agreed {
                        return Ok(result);
                    }
                }
                Ok(self.derive(
                    TypesDomain::TOP,
                    ValuesDomain::Top,
                    SmallVec::from_slice(&[base, key]),
                    TemplateSource::Member,
                    DeriveOptions {
                        kind: Some(AbstractKind::SentinelMemberExpression),
                        is_pure: true,
                        skip_invariant: true,
                    },
                ))
            }
        }
    }

    fn concretize_key_for_string(&mut self, key: Value) -> EvalResult<Value> {
        if !key.is_concrete() {
            return Ok(Value::Undefined);
        }
        let id = self.to_string_value(key)?;
        Ok(Value::Str(id))
    }

    /// Member write over the joined lattice: `base[key] = value`.
    pub(crate) fn set_member(&mut self, base: Value, key: Value, value: Value, strict: bool) -> EvalResult<()> {
        match base {
            Value::Undefined | Value::Null => {
                Err(self.throw_error(ErrorKind::TypeError, "Cannot set properties of undefined or null"))
            }
            Value::Object(object) => {
                if key.is_concrete() {
                    let key = self.to_property_key(key)?;
                    self.ordinary_set(object, key, value, strict)
                } else {
                    let data = self.heap.get(object);
                    if !(data.partial && data.simple) {
                        return Err(self.fatal_diag(
                            ErrorCode::UnsupportedAbstractAccess,
                            Severity::FatalError,
                            "abstract-keyed write on an object the engine must model precisely",
                        ));
                    }
                    // The write may shadow any known key: forget them so later
                    // reads re-derive instead of returning stale values.
                    let keys: Vec<PropertyKey> = self.heap.get(object).properties.keys().copied().collect();
                    for known in keys {
                        self.apply_property(object, known, None);
                    }
                    self.emit_property_assignment(base, key, value);
                    Ok(())
                }
            }
            Value::Abstract(id) => {
                let data = self.abstracts.get(id);
                if !data.types.must_be_object() {
                    return Err(self.fatal_diag(
                        ErrorCode::UnsupportedAbstractAccess,
                        Severity::FatalError,
                        "property write on an abstract value that may not be an object",
                    ));
                }
                self.emit_property_assignment(base, key, value);
                Ok(())
            }
            _ => {
                if strict {
                    return Err(self.throw_error(ErrorKind::TypeError, "Cannot create property on primitive value"));
                }
                Ok(())
            }
        }
    }

    /// The `in` operator.
    pub(crate) fn has_member(&mut self, base: Value, key: Value) -> EvalResult<bool> {
        let Value::Object(object) = base else {
            return Err(self.throw_error(ErrorKind::TypeError, "Cannot use 'in' operator on a non-object"));
        };
        let key = self.to_property_key(key)?;
        self.has_property(object, key)
    }

    /// The `instanceof` operator over concrete operands.
    pub(crate) fn instance_of(&mut self, value: Value, ctor: Value) -> EvalResult<bool> {
        let Value::Object(ctor_id) = ctor else {
            return Err(self.throw_error(ErrorKind::TypeError, "Right-hand side of 'instanceof' is not callable"));
        };
        if !self.heap.get(ctor_id).is_function() {
            return Err(self.throw_error(ErrorKind::TypeError, "Right-hand side of 'instanceof' is not callable"));
        }
        let prototype_id = self.interns.common().prototype;
        let target = self.ordinary_get(ctor_id, PropertyKey::Str(prototype_id), ctor)?;
        let Value::Object(target) = target else {
            return Err(self.throw_error(ErrorKind::TypeError, "Function has non-object prototype"));
        };
        let Value::Object(mut current) = value else {
            return Ok(false);
        };
        loop {
            match self.heap.get(current).proto {
                Some(proto) if proto == target => return Ok(true),
                Some(proto) => current = proto,
                None => return Ok(false),
            }
        }
    }
}
