//! Intrinsic singletons and the native call handler contract.
//!
//! This is deliberately a contract-sized library, not the Standard's full
//! built-in surface: enough globals for startup code to exercise the engine
//! (Object, the error constructors, console, Math) plus the abstract-value
//! injection helpers. Every handler receives the realm, the `this` value, and
//! the argument values, and returns through the normal completion channels.

use smallvec::SmallVec;

use crate::{
    abstract_value::TemplateSource,
    completion::{AbruptCompletion, EvalError, EvalResult},
    diagnostics::{ErrorCode, Severity},
    generator::DeriveOptions,
    heap::{Descriptor, FunctionKind, ObjectBrand, ObjectData, ObjectId, PropertyKey},
    intern::StringId,
    realm::Realm,
    resource::{ResourceError, ResourceTracker},
    tracer::EvalTracer,
    value::{TypesDomain, Value, ValuesDomain},
};

/// The error constructor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
}

impl ErrorKind {
    pub const ALL: [Self; 5] = [
        Self::Error,
        Self::TypeError,
        Self::RangeError,
        Self::ReferenceError,
        Self::SyntaxError,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Error => 0,
            Self::TypeError => 1,
            Self::RangeError => 2,
            Self::ReferenceError => 3,
            Self::SyntaxError => 4,
        }
    }
}

/// Built-in functions, dispatched by enum instead of function pointers so the
/// handlers can be plain realm methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    ObjectCtor,
    ObjectDefineProperty,
    ObjectKeys,
    ObjectGetPrototypeOf,
    ObjectFreeze,
    ObjectProtoHasOwnProperty,
    ObjectProtoToString,
    ErrorCtor(ErrorKind),
    ConsoleLog,
    MathAbs,
    MathCeil,
    MathFloor,
    MathMax,
    MathMin,
    MathPow,
    MathSqrt,
    /// `__abstract(typeName, path)`: injects an abstract value.
    AbstractInject,
    /// `__abstract_simple_partial(path)`: injects a partial, simple host
    /// object.
    AbstractSimplePartial,
    /// `__makeSimple(obj)`: asserts an object has no observable read/write
    /// side effects.
    MakeSimple,
}

/// Arena ids of the intrinsic singletons, owned by the realm.
#[derive(Debug, Clone, Copy)]
pub struct IntrinsicIds {
    pub object_prototype: ObjectId,
    pub function_prototype: ObjectId,
    pub object_ctor: ObjectId,
    pub console: ObjectId,
    pub math: ObjectId,
    pub error_prototypes: [ObjectId; 5],
    pub error_ctors: [ObjectId; 5],
}

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// Builds the intrinsic singletons and populates the global object.
    ///
    /// Runs before interpretation starts, so it writes to the heap directly
    /// instead of going through the modification log.
    pub(crate) fn install_intrinsics(&mut self, global_object: ObjectId) -> Result<IntrinsicIds, ResourceError> {
        let object_prototype = self.heap.allocate(ObjectData::ordinary(None))?;
        let function_prototype = self.heap.allocate(ObjectData::ordinary(Some(object_prototype)))?;

        let native = |realm: &mut Self, intrinsic: Intrinsic, path: &str| -> Result<ObjectId, ResourceError> {
            let path_id = realm.interns.intern(path);
            let mut data = ObjectData::ordinary(Some(function_prototype));
            data.call = Some(FunctionKind::Native(intrinsic));
            data.intrinsic_path = Some(path_id);
            realm.heap.allocate(data)
        };

        let has_own = native(self, Intrinsic::ObjectProtoHasOwnProperty, "Object.prototype.hasOwnProperty")?;
        let proto_to_string = native(self, Intrinsic::ObjectProtoToString, "Object.prototype.toString")?;
        {
            let has_own_id = self.interns.intern("hasOwnProperty");
            let to_string_id = self.interns.intern("toString");
            let proto = self.heap.get_mut(object_prototype);
            proto.properties.insert(PropertyKey::Str(has_own_id), Descriptor::hidden(Value::Object(has_own)));
            proto
                .properties
                .insert(PropertyKey::Str(to_string_id), Descriptor::hidden(Value::Object(proto_to_string)));
        }

        let object_ctor = native(self, Intrinsic::ObjectCtor, "Object")?;
        let define_property = native(self, Intrinsic::ObjectDefineProperty, "Object.defineProperty")?;
        let keys = native(self, Intrinsic::ObjectKeys, "Object.keys")?;
        let get_prototype_of = native(self, Intrinsic::ObjectGetPrototypeOf, "Object.getPrototypeOf")?;
        let freeze = native(self, Intrinsic::ObjectFreeze, "Object.freeze")?;
        {
            let define_property_id = self.interns.intern("defineProperty");
            let keys_id = self.interns.intern("keys");
            let get_prototype_of_id = self.interns.intern("getPrototypeOf");
            let freeze_id = self.interns.intern("freeze");
            let prototype_id = self.interns.common().prototype;
            let ctor = self.heap.get_mut(object_ctor);
            ctor.properties
                .insert(PropertyKey::Str(define_property_id), Descriptor::hidden(Value::Object(define_property)));
            ctor.properties.insert(PropertyKey::Str(keys_id), Descriptor::hidden(Value::Object(keys)));
            ctor.properties
                .insert(PropertyKey::Str(get_prototype_of_id), Descriptor::hidden(Value::Object(get_prototype_of)));
            ctor.properties.insert(PropertyKey::Str(freeze_id), Descriptor::hidden(Value::Object(freeze)));
            ctor.properties
                .insert(PropertyKey::Str(prototype_id), Descriptor::hidden(Value::Object(object_prototype)));
        }

        let console = self.heap.allocate(ObjectData::ordinary(Some(object_prototype)))?;
        {
            let log_fn = native(self, Intrinsic::ConsoleLog, "console.log")?;
            let log_id = self.interns.intern("log");
            self.heap
                .get_mut(console)
                .properties
                .insert(PropertyKey::Str(log_id), Descriptor::hidden(Value::Object(log_fn)));
        }

        let math = self.heap.allocate(ObjectData::ordinary(Some(object_prototype)))?;
        for (name, intrinsic) in [
            ("abs", Intrinsic::MathAbs),
            ("ceil", Intrinsic::MathCeil),
            ("floor", Intrinsic::MathFloor),
            ("max", Intrinsic::MathMax),
            ("min", Intrinsic::MathMin),
            ("pow", Intrinsic::MathPow),
            ("sqrt", Intrinsic::MathSqrt),
        ] {
            let func = native(self, intrinsic, &format!("Math.{name}"))?;
            let name_id = self.interns.intern(name);
            self.heap
                .get_mut(math)
                .properties
                .insert(PropertyKey::Str(name_id), Descriptor::hidden(Value::Object(func)));
        }

        let mut error_prototypes = [object_prototype; 5];
        let mut error_ctors = [object_prototype; 5];
        for kind in ErrorKind::ALL {
            let proto_parent = if kind == ErrorKind::Error {
                object_prototype
            } else {
                error_prototypes[ErrorKind::Error.index()]
            };
            let proto = self.heap.allocate(ObjectData::ordinary(Some(proto_parent)))?;
            let kind_name: &'static str = kind.into();
            let name_value = Value::Str(self.interns.intern(kind_name));
            let empty = Value::Str(self.interns.intern(""));
            {
                let name_id = self.interns.common().name;
                let message_id = self.interns.common().message;
                let data = self.heap.get_mut(proto);
                data.properties.insert(PropertyKey::Str(name_id), Descriptor::hidden(name_value));
                data.properties.insert(PropertyKey::Str(message_id), Descriptor::hidden(empty));
            }
            let ctor = native(self, Intrinsic::ErrorCtor(kind), kind_name)?;
            {
                let prototype_id = self.interns.common().prototype;
                self.heap
                    .get_mut(ctor)
                    .properties
                    .insert(PropertyKey::Str(prototype_id), Descriptor::hidden(Value::Object(proto)));
                let constructor_id = self.interns.common().constructor;
                self.heap
                    .get_mut(proto)
                    .properties
                    .insert(PropertyKey::Str(constructor_id), Descriptor::hidden(Value::Object(ctor)));
            }
            error_prototypes[kind.index()] = proto;
            error_ctors[kind.index()] = ctor;
        }

        // Populate the global object.
        {
            self.heap.get_mut(global_object).proto = Some(object_prototype);
            let global_prop = |realm: &mut Self, name: &str, value: Value| {
                let name_id = realm.interns.intern(name);
                realm
                    .heap
                    .get_mut(global_object)
                    .properties
                    .insert(PropertyKey::Str(name_id), Descriptor::hidden(value));
            };
            global_prop(self, "Object", Value::Object(object_ctor));
            global_prop(self, "console", Value::Object(console));
            global_prop(self, "Math", Value::Object(math));
            for kind in ErrorKind::ALL {
                let kind_name: &'static str = kind.into();
                global_prop(self, kind_name, Value::Object(error_ctors[kind.index()]));
            }
            global_prop(self, "undefined", Value::Undefined);
            global_prop(self, "NaN", Value::Number(f64::NAN));
            global_prop(self, "Infinity", Value::Number(f64::INFINITY));
            global_prop(self, "globalThis", Value::Object(global_object));

            let abstract_inject = native(self, Intrinsic::AbstractInject, "__abstract")?;
            let abstract_partial = native(self, Intrinsic::AbstractSimplePartial, "__abstract_simple_partial")?;
            let make_simple = native(self, Intrinsic::MakeSimple, "__makeSimple")?;
            global_prop(self, "__abstract", Value::Object(abstract_inject));
            global_prop(self, "__abstract_simple_partial", Value::Object(abstract_partial));
            global_prop(self, "__makeSimple", Value::Object(make_simple));
        }

        Ok(IntrinsicIds {
            object_prototype,
            function_prototype,
            object_ctor,
            console,
            math,
            error_prototypes,
            error_ctors,
        })
    }

    /// Allocates an error object of the given kind.
    pub(crate) fn create_error_object(&mut self, kind: ErrorKind, message: Option<Value>) -> EvalResult<ObjectId> {
        let proto = self.intrinsics.error_prototypes[kind.index()];
        let mut data = ObjectData::ordinary(Some(proto));
        data.brand = ObjectBrand::Error(kind);
        if let Some(message) = message {
            let message_id = self.interns.common().message;
            data.properties.insert(PropertyKey::Str(message_id), Descriptor::hidden(message));
        }
        self.alloc_object(data)
    }

    /// Builds a throw completion carrying a freshly allocated error object.
    ///
    /// This is the engine's rendering of the Standard's model errors; it
    /// propagates on the completion channel and may be caught by user `try`.
    pub(crate) fn throw_error(&mut self, kind: ErrorKind, message: &str) -> EvalError {
        let message_value = Value::Str(self.interns.intern(message));
        match self.create_error_object(kind, Some(message_value)) {
            Ok(object) => EvalError::Abrupt(AbruptCompletion::Throw {
                value: Value::Object(object),
                loc: self.current_loc,
            }),
            Err(fatal) => fatal,
        }
    }

    /// Invokes a native handler.
    pub(crate) fn call_intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        this: Value,
        args: &[Value],
        is_construct: bool,
    ) -> EvalResult<Value> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(Value::Undefined);
        match intrinsic {
            Intrinsic::ObjectCtor => match arg(0) {
                Value::Object(id) => Ok(Value::Object(id)),
                _ => {
                    let proto = self.intrinsics.object_prototype;
                    let id = self.alloc_object(ObjectData::ordinary(Some(proto)))?;
                    Ok(Value::Object(id))
                }
            },
            Intrinsic::ObjectDefineProperty => self.object_define_property(arg(0), arg(1), arg(2)),
            Intrinsic::ObjectKeys => {
                let Value::Object(id) = arg(0) else {
                    return Err(self.throw_error(ErrorKind::TypeError, "Object.keys called on non-object"));
                };
                let keys = self.heap.get(id).enumerable_string_keys();
                let values: Vec<Value> = keys.into_iter().map(Value::Str).collect();
                let array = self.create_array(&values)?;
                Ok(Value::Object(array))
            }
            Intrinsic::ObjectGetPrototypeOf => {
                let Value::Object(id) = arg(0) else {
                    return Err(self.throw_error(ErrorKind::TypeError, "Object.getPrototypeOf called on non-object"));
                };
                Ok(match self.heap.get(id).proto {
                    Some(proto) => Value::Object(proto),
                    None => Value::Null,
                })
            }
            Intrinsic::ObjectFreeze => {
                let Value::Object(id) = arg(0) else {
                    return Ok(arg(0));
                };
                let keys: Vec<PropertyKey> = self.heap.get(id).properties.keys().copied().collect();
                for key in keys {
                    let Some(desc) = self.heap.get(id).own_property(key).copied() else {
                        continue;
                    };
                    let frozen = match desc {
                        Descriptor::Data { value, enumerable, .. } => Descriptor::Data {
                            value,
                            writable: false,
                            enumerable,
                            configurable: false,
                        },
                        Descriptor::Accessor { get, set, enumerable, .. } => Descriptor::Accessor {
                            get,
                            set,
                            enumerable,
                            configurable: false,
                        },
                    };
                    self.apply_property(id, key, Some(frozen));
                }
                let data = self.heap.get(id);
                let (partial, simple) = (data.partial, data.simple);
                self.set_flags_logged(id, false, partial, simple);
                Ok(Value::Object(id))
            }
            Intrinsic::ObjectProtoHasOwnProperty => {
                let Value::Object(id) = this else {
                    return Err(self.throw_error(ErrorKind::TypeError, "hasOwnProperty called on non-object"));
                };
                let key = self.to_property_key(arg(0))?;
                Ok(Value::Bool(self.heap.get(id).own_property(key).is_some()))
            }
            Intrinsic::ObjectProtoToString => {
                let text = self.interns.intern("[object Object]");
                Ok(Value::Str(text))
            }
            Intrinsic::ErrorCtor(kind) => {
                let message = match arg(0) {
                    Value::Undefined => None,
                    value @ Value::Abstract(_) => Some(value),
                    value => Some(Value::Str(self.to_string_value(value)?)),
                };
                let _ = is_construct; // `Error(…)` and `new Error(…)` are equivalent
                let object = self.create_error_object(kind, message)?;
                Ok(Value::Object(object))
            }
            Intrinsic::ConsoleLog => {
                self.emit_console_log(args);
                Ok(Value::Undefined)
            }
            Intrinsic::MathAbs
            | Intrinsic::MathCeil
            | Intrinsic::MathFloor
            | Intrinsic::MathMax
            | Intrinsic::MathMin
            | Intrinsic::MathPow
            | Intrinsic::MathSqrt => self.call_math_intrinsic(intrinsic, args),
            Intrinsic::AbstractInject => self.abstract_inject(arg(0), arg(1)),
            Intrinsic::AbstractSimplePartial => self.abstract_simple_partial(arg(0)),
            Intrinsic::MakeSimple => {
                let Value::Object(id) = arg(0) else {
                    return Err(self.throw_error(ErrorKind::TypeError, "__makeSimple expects an object"));
                };
                let data = self.heap.get(id);
                let (extensible, partial) = (data.extensible, data.partial);
                self.set_flags_logged(id, extensible, partial, true);
                Ok(Value::Object(id))
            }
        }
    }

    fn call_math_intrinsic(&mut self, intrinsic: Intrinsic, args: &[Value]) -> EvalResult<Value> {
        if args.iter().any(|arg| !arg.is_concrete()) {
            // Residualize the call; the callee carries an intrinsic path.
            let callee = self.math_function_value(intrinsic);
            let mut derive_args: SmallVec<[Value; 4]> = SmallVec::with_capacity(args.len() + 1);
            derive_args.push(callee);
            derive_args.extend_from_slice(args);
            return Ok(self.derive(
                TypesDomain::NUMBER,
                ValuesDomain::Top,
                derive_args,
                TemplateSource::Call,
                DeriveOptions {
                    is_pure: true,
                    ..DeriveOptions::default()
                },
            ));
        }
        let mut numbers = Vec::with_capacity(args.len());
        for arg in args {
            numbers.push(self.to_number_value(*arg)?);
        }
        let first = numbers.first().copied().unwrap_or(f64::NAN);
        let result = match intrinsic {
            Intrinsic::MathAbs => first.abs(),
            Intrinsic::MathCeil => first.ceil(),
            Intrinsic::MathFloor => first.floor(),
            Intrinsic::MathSqrt => first.sqrt(),
            Intrinsic::MathPow => first.powf(numbers.get(1).copied().unwrap_or(f64::NAN)),
            Intrinsic::MathMax => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Intrinsic::MathMin => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            _ => unreachable!("non-math intrinsic in math dispatch"),
        };
        Ok(Value::Number(result))
    }

    fn math_function_value(&self, intrinsic: Intrinsic) -> Value {
        let name_id = match intrinsic {
            Intrinsic::MathAbs => self.interns.lookup("abs"),
            Intrinsic::MathCeil => self.interns.lookup("ceil"),
            Intrinsic::MathFloor => self.interns.lookup("floor"),
            Intrinsic::MathMax => self.interns.lookup("max"),
            Intrinsic::MathMin => self.interns.lookup("min"),
            Intrinsic::MathPow => self.interns.lookup("pow"),
            Intrinsic::MathSqrt => self.interns.lookup("sqrt"),
            _ => None,
        }
        .expect("math intrinsic names are interned at startup");
        let desc = self
            .heap
            .get(self.intrinsics.math)
            .own_property(PropertyKey::Str(name_id))
            .copied()
            .expect("math intrinsic installed at startup");
        desc.value().expect("math intrinsics are data properties")
    }

    fn object_define_property(&mut self, target: Value, key: Value, attributes: Value) -> EvalResult<Value> {
        let Value::Object(object) = target else {
            return Err(self.throw_error(ErrorKind::TypeError, "Object.defineProperty called on non-object"));
        };
        let key = self.to_property_key(key)?;
        let Value::Object(attrs) = attributes else {
            return Err(self.throw_error(ErrorKind::TypeError, "property descriptor must be an object"));
        };
        let read_flag = |realm: &mut Self, name: StringId| -> EvalResult<Option<bool>> {
            let key = PropertyKey::Str(name);
            if realm.heap.get(attrs).own_property(key).is_none() {
                return Ok(None);
            }
            let value = realm.ordinary_get(attrs, key, Value::Object(attrs))?;
            Ok(realm.to_boolean_value(value))
        };
        let get_id = self.interns.intern("get");
        let set_id = self.interns.intern("set");
        let value_id = self.interns.common().value;
        let writable_id = self.interns.intern("writable");
        let enumerable_id = self.interns.intern("enumerable");
        let configurable_id = self.interns.intern("configurable");

        let has_get = self.heap.get(attrs).own_property(PropertyKey::Str(get_id)).is_some();
        let has_set = self.heap.get(attrs).own_property(PropertyKey::Str(set_id)).is_some();
        let has_value = self.heap.get(attrs).own_property(PropertyKey::Str(value_id)).is_some();
        if (has_get || has_set) && has_value {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "property descriptors must not mix accessor and data attributes",
            ));
        }

        let enumerable = read_flag(self, enumerable_id)?.unwrap_or(false);
        let configurable = read_flag(self, configurable_id)?.unwrap_or(false);
        let descriptor = if has_get || has_set {
            let get = if has_get {
                Some(self.ordinary_get(attrs, PropertyKey::Str(get_id), Value::Object(attrs))?)
            } else {
                None
            };
            let set = if has_set {
                Some(self.ordinary_get(attrs, PropertyKey::Str(set_id), Value::Object(attrs))?)
            } else {
                None
            };
            Descriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            }
        } else {
            let value = if has_value {
                self.ordinary_get(attrs, PropertyKey::Str(value_id), Value::Object(attrs))?
            } else {
                Value::Undefined
            };
            let writable = read_flag(self, writable_id)?.unwrap_or(false);
            Descriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            }
        };

        if matches!(descriptor, Descriptor::Accessor { .. }) {
            // Installing an accessor clears the simple bit; it never returns.
            let data = self.heap.get(object);
            let (extensible, partial) = (data.extensible, data.partial);
            self.set_flags_logged(object, extensible, partial, false);
        }

        self.apply_property(object, key, Some(descriptor));

        if self.heap.get(object).partial
            && let (PropertyKey::Str(key_name), Descriptor::Data { value, writable, enumerable, configurable }) =
                (key, descriptor)
        {
            self.emit_define_property(Value::Object(object), key_name, value, writable, enumerable, configurable);
        }
        Ok(Value::Object(object))
    }

    fn abstract_inject(&mut self, type_name: Value, path: Value) -> EvalResult<Value> {
        if !self.flags.allow_abstract_helpers {
            return Err(self.fatal_diag(
                ErrorCode::InvalidHelperArguments,
                Severity::FatalError,
                "__abstract helpers are disabled for this build",
            ));
        }
        let Value::Str(type_name) = type_name else {
            return Err(self.fatal_diag(
                ErrorCode::InvalidHelperArguments,
                Severity::FatalError,
                "__abstract expects a type name string",
            ));
        };
        let Value::Str(path) = path else {
            return Err(self.fatal_diag(
                ErrorCode::InvalidHelperArguments,
                Severity::FatalError,
                "__abstract expects an origin expression string",
            ));
        };
        let Some(types) = TypesDomain::from_type_name(self.interns.get(type_name)) else {
            let text = self.interns.get(type_name).to_owned();
            return Err(self.fatal_diag(
                ErrorCode::UnknownAbstractType,
                Severity::FatalError,
                &format!("unknown abstract type name: {text}"),
            ));
        };
        Ok(self.create_abstract(types, ValuesDomain::Top, SmallVec::new(), TemplateSource::Intrinsic(path), None))
    }

    fn abstract_simple_partial(&mut self, path: Value) -> EvalResult<Value> {
        if !self.flags.allow_abstract_helpers {
            return Err(self.fatal_diag(
                ErrorCode::InvalidHelperArguments,
                Severity::FatalError,
                "__abstract helpers are disabled for this build",
            ));
        }
        let Value::Str(path) = path else {
            return Err(self.fatal_diag(
                ErrorCode::InvalidHelperArguments,
                Severity::FatalError,
                "__abstract_simple_partial expects an origin expression string",
            ));
        };
        let proto = self.intrinsics.object_prototype;
        let mut data = ObjectData::ordinary(Some(proto));
        data.partial = true;
        data.simple = true;
        data.intrinsic_path = Some(path);
        let id = self.alloc_object(data)?;
        Ok(Value::Object(id))
    }

    /// Allocates an array object holding `values` at indexed keys.
    pub(crate) fn create_array(&mut self, values: &[Value]) -> EvalResult<ObjectId> {
        let proto = self.intrinsics.object_prototype;
        let mut data = ObjectData::ordinary(Some(proto));
        data.brand = ObjectBrand::Array;
        for (i, value) in values.iter().enumerate() {
            let key = self.interns.intern(&i.to_string());
            data.properties.insert(PropertyKey::Str(key), Descriptor::data(*value));
        }
        let length_id = self.interns.common().length;
        data.properties
            .insert(PropertyKey::Str(length_id), Descriptor::hidden(Value::Number(values.len() as f64)));
        self.alloc_object(data)
    }
}
