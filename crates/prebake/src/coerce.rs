use smallvec::SmallVec;

use crate::{
    abstract_value::{AbstractId, AbstractKind, TemplateSource},
    completion::EvalResult,
    diagnostics::{ErrorCode, Severity},
    heap::{ObjectId, PropertyKey},
    intern::StringId,
    intrinsics::ErrorKind,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::{TypesDomain, Value, ValuesDomain, format_number, string_to_number},
};

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// The type domain a single value inhabits.
    pub(crate) fn type_domain_of(&self, value: Value) -> TypesDomain {
        match value {
            Value::Undefined => TypesDomain::UNDEFINED,
            Value::Null => TypesDomain::NULL,
            Value::Bool(_) => TypesDomain::BOOLEAN,
            Value::Number(_) => TypesDomain::NUMBER,
            Value::Str(_) => TypesDomain::STRING,
            Value::Symbol(_) => TypesDomain::SYMBOL,
            Value::Object(id) => {
                if self.heap.get(id).is_function() {
                    TypesDomain::FUNCTION
                } else {
                    TypesDomain::OBJECT
                }
            }
            Value::Abstract(id) => self.abstracts.get(id).types,
        }
    }

    /// The `typeof` result, when it is known at build time.
    pub(crate) fn typeof_value(&self, value: Value) -> Option<&'static str> {
        match value {
            Value::Abstract(id) => self.abstracts.get(id).types.typeof_result(),
            _ => self.type_domain_of(value).typeof_result(),
        }
    }

    /// ToBoolean, refined through the domains for abstract values. `None`
    /// means the truthiness is unknown at build time.
    pub(crate) fn to_boolean_value(&self, value: Value) -> Option<bool> {
        match value {
            Value::Str(id) => Some(!self.interns.get(id).is_empty()),
            Value::Abstract(id) => {
                let data = self.abstracts.get(id);
                if !data.types.might_be_falsy() {
                    return Some(true);
                }
                let candidates = data.values.candidates()?;
                let mut truthiness = None;
                for candidate in candidates {
                    let t = self.to_boolean_value(*candidate)?;
                    match truthiness {
                        None => truthiness = Some(t),
                        Some(prev) if prev != t => return None,
                        Some(_) => {}
                    }
                }
                truthiness
            }
            other => other.to_boolean(),
        }
    }

    /// ToNumber. Refuses abstract input: callers residualize before coercing.
    pub(crate) fn to_number_value(&mut self, value: Value) -> EvalResult<f64> {
        match value {
            Value::Undefined => Ok(f64::NAN),
            Value::Null => Ok(0.0),
            Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            Value::Number(n) => Ok(n),
            Value::Str(id) => Ok(string_to_number(self.interns.get(id))),
            Value::Symbol(_) => Err(self.throw_error(ErrorKind::TypeError, "Cannot convert a Symbol to a number")),
            Value::Object(_) => {
                let primitive = self.to_primitive(value, PrimitiveHint::Number)?;
                self.to_number_value(primitive)
            }
            Value::Abstract(_) => Err(self.fatal_diag(
                ErrorCode::UnsupportedAbstractAccess,
                Severity::FatalError,
                "cannot coerce an abstract value to a number at build time",
            )),
        }
    }

    /// ToString. Refuses abstract input: callers residualize before coercing.
    pub(crate) fn to_string_value(&mut self, value: Value) -> EvalResult<StringId> {
        match value {
            Value::Undefined => Ok(self.interns.intern("undefined")),
            Value::Null => Ok(self.interns.intern("null")),
            Value::Bool(b) => Ok(self.interns.intern(if b { "true" } else { "false" })),
            Value::Number(n) => {
                let text = format_number(n);
                Ok(self.interns.intern(&text))
            }
            Value::Str(id) => Ok(id),
            Value::Symbol(_) => Err(self.throw_error(ErrorKind::TypeError, "Cannot convert a Symbol to a string")),
            Value::Object(_) => {
                let primitive = self.to_primitive(value, PrimitiveHint::String)?;
                self.to_string_value(primitive)
            }
            Value::Abstract(_) => Err(self.fatal_diag(
                ErrorCode::UnsupportedAbstractAccess,
                Severity::FatalError,
                "cannot coerce an abstract value to a string at build time",
            )),
        }
    }

    /// ToPrimitive for objects: wrapped primitive if present, otherwise
    /// `valueOf`/`toString` in hint order.
    pub(crate) fn to_primitive(&mut self, value: Value, hint: PrimitiveHint) -> EvalResult<Value> {
        let Value::Object(id) = value else {
            return Ok(value);
        };
        if let Some(primitive) = self.heap.get(id).primitive {
            return Ok(primitive);
        }
        let value_of = self.interns.intern("valueOf");
        let to_string = self.interns.intern("toString");
        let method_order = match hint {
            PrimitiveHint::Number => [value_of, to_string],
            PrimitiveHint::String => [to_string, value_of],
        };
        for method_name in method_order {
            let method = self.walk_proto_chain_value(id, PropertyKey::Str(method_name));
            if let Some(Value::Object(func)) = method
                && self.heap.get(func).is_function()
            {
                let result = self.call_function(func, value, &[])?;
                if result.is_concrete() && !matches!(result, Value::Object(_)) {
                    return Ok(result);
                }
            }
        }
        Err(self.throw_error(ErrorKind::TypeError, "Cannot convert object to primitive value"))
    }

    /// A property key from a concrete value.
    pub(crate) fn to_property_key(&mut self, value: Value) -> EvalResult<PropertyKey> {
        match value {
            Value::Symbol(id) => Ok(PropertyKey::Sym(id)),
            Value::Abstract(_) => Err(self.fatal_diag(
                ErrorCode::UnsupportedAbstractAccess,
                Severity::FatalError,
                "cannot use an abstract value as a concrete property key",
            )),
            other => Ok(PropertyKey::Str(self.to_string_value(other)?)),
        }
    }

    /// Strict equality over concrete operands; `None` when either side is
    /// abstract and the domains cannot settle it.
    pub(crate) fn strict_equals_values(&self, a: Value, b: Value) -> Option<bool> {
        if let Some(result) = a.strict_equals(b) {
            // Interned strings compare by id; content equality holds because
            // the interner deduplicates.
            return Some(result);
        }
        // Type-based refutation: disjoint type domains can never be equal.
        // OBJECT and FUNCTION overlap for this purpose (a host object may be
        // callable).
        let ta = self.type_domain_of(a);
        let tb = self.type_domain_of(b);
        let object_like = TypesDomain::OBJECT | TypesDomain::FUNCTION;
        let both_object_like = ta.intersects(object_like) && tb.intersects(object_like);
        if (ta & tb).is_empty() && !both_object_like {
            return Some(false);
        }
        // `typeof x === "…"` pattern: refine through the typeof template.
        if let Some(result) = self.typeof_comparison(a, b).or_else(|| self.typeof_comparison(b, a)) {
            return Some(result);
        }
        None
    }

    /// Settles `typeof x === "name"` when the abstract's type domain either
    /// excludes or pins the named arm.
    fn typeof_comparison(&self, maybe_typeof: Value, maybe_name: Value) -> Option<bool> {
        let Value::Abstract(id) = maybe_typeof else { return None };
        let data = self.abstracts.get(id);
        if !matches!(data.template, TemplateSource::Typeof) {
            return None;
        }
        let Value::Str(name_id) = maybe_name else { return None };
        let name = self.interns.get(name_id);
        let operand_types = match data.args.first() {
            Some(Value::Abstract(arg)) => self.abstracts.get(*arg).types,
            Some(other) => self.type_domain_of(*other),
            None => return None,
        };
        if !operand_types.admits_typeof(name) {
            return Some(false);
        }
        if operand_types.typeof_result() == Some(name) && !name.is_empty() {
            return Some(true);
        }
        None
    }

    /// The lattice join of two branch values under an abstract condition.
    ///
    /// Identical values join to themselves; anything else folds into a fresh
    /// conditional abstract whose domains are the lattice join of the inputs.
    pub(crate) fn join_values(&mut self, condition: AbstractId, consequent: Value, alternate: Value) -> Value {
        if consequent.same_value(alternate) {
            return consequent;
        }
        let types = self.type_domain_of(consequent) | self.type_domain_of(alternate);
        let side_domain = |realm: &Self, v: Value| match v {
            Value::Abstract(id) => realm.abstracts.get(id).values.clone(),
            concrete => ValuesDomain::Finite(vec![concrete]),
        };
        let values = side_domain(self, consequent).join(&side_domain(self, alternate));
        self.create_abstract(
            types,
            values,
            SmallVec::from_slice(&[Value::Abstract(condition), consequent, alternate]),
            TemplateSource::Conditional,
            Some(AbstractKind::Conditional),
        )
    }

    /// A value usable where the Standard's loose equality (`==`) is required,
    /// concrete operands only.
    pub(crate) fn loose_equals(&mut self, a: Value, b: Value) -> EvalResult<bool> {
        let result = match (a, b) {
            (Value::Null | Value::Undefined, Value::Null | Value::Undefined) => true,
            (Value::Number(_), Value::Number(_))
            | (Value::Str(_), Value::Str(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Symbol(_), Value::Symbol(_))
            | (Value::Object(_), Value::Object(_)) => a.strict_equals(b).unwrap_or(false),
            (Value::Null | Value::Undefined, _) | (_, Value::Null | Value::Undefined) => false,
            (Value::Number(_) | Value::Str(_) | Value::Bool(_), Value::Object(_)) => {
                let prim = self.to_primitive(b, PrimitiveHint::Number)?;
                self.loose_equals(a, prim)?
            }
            (Value::Object(_), Value::Number(_) | Value::Str(_) | Value::Bool(_)) => {
                let prim = self.to_primitive(a, PrimitiveHint::Number)?;
                self.loose_equals(prim, b)?
            }
            (Value::Symbol(_), _) | (_, Value::Symbol(_)) => false,
            _ => {
                // Remaining concrete pairs compare numerically.
                let na = self.to_number_value(a)?;
                let nb = self.to_number_value(b)?;
                na == nb
            }
        };
        Ok(result)
    }

    /// Looks up a data property along the prototype chain without invoking
    /// accessors. Used by internal plumbing that must stay side-effect free.
    pub(crate) fn walk_proto_chain_value(&self, object: ObjectId, key: PropertyKey) -> Option<Value> {
        let mut current = Some(object);
        while let Some(id) = current {
            let data = self.heap.get(id);
            if let Some(desc) = data.own_property(key) {
                return desc.value();
            }
            current = data.proto;
        }
        None
    }
}

/// Preference order for [`Realm::to_primitive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrimitiveHint {
    Number,
    String,
}
