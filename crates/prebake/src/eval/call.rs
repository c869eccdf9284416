use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    abstract_value::{AbstractKind, TemplateSource},
    ast::{Expr, ExprLoc, FunctionDef},
    completion::{AbruptCompletion, EvalError, EvalResult},
    environment::{DeclarativeEnv, EnvId, EnvRecord, FunctionEnv, ThisBindingState},
    generator::DeriveOptions,
    heap::{Descriptor, FunctionKind, ObjectData, ObjectId, PropertyKey},
    intrinsics::ErrorKind,
    realm::{ExecutionContext, Realm},
    reference::RefBase,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::{TypesDomain, Value, ValuesDomain},
};

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// Creates a closure object for a function definition.
    pub(crate) fn create_function_object(
        &mut self,
        def: &Rc<FunctionDef>,
        env: EnvId,
        strict: bool,
    ) -> EvalResult<ObjectId> {
        let _ = strict; // strictness is captured by the parser on the definition
        let function_prototype = self.intrinsics.function_prototype;
        let mut data = ObjectData::ordinary(Some(function_prototype));
        data.call = Some(FunctionKind::User {
            def: Rc::clone(def),
            env,
        });
        let func = self.alloc_object(data)?;

        // The fresh `.prototype` object with its back-reference.
        let object_prototype = self.intrinsics.object_prototype;
        let mut proto_data = ObjectData::ordinary(Some(object_prototype));
        let constructor_id = self.interns.common().constructor;
        proto_data
            .properties
            .insert(PropertyKey::Str(constructor_id), Descriptor::hidden(Value::Object(func)));
        let proto = self.alloc_object(proto_data)?;
        let prototype_id = self.interns.common().prototype;
        self.apply_property(func, PropertyKey::Str(prototype_id), Some(Descriptor::hidden(Value::Object(proto))));
        Ok(func)
    }

    pub(crate) fn eval_call(&mut self, callee: &ExprLoc, args: &[ExprLoc], strict: bool) -> EvalResult<Value> {
        let (func, this) = match &callee.expr {
            Expr::Member { object, property } => {
                let base = self.eval_expr(object, strict)?;
                let key = match property {
                    crate::ast::MemberProp::Dot(name) => Value::Str(*name),
                    crate::ast::MemberProp::Computed(expr) => self.eval_expr(expr, strict)?,
                };
                let func = self.get_member(base, key)?;
                (func, base)
            }
            Expr::Identifier(name) => {
                let env = self.lexical_env();
                let reference = self.resolve_binding(*name, env, strict)?;
                let this = match reference.base {
                    RefBase::Env(env) => match self.with_base_object(env) {
                        Some(object) => Value::Object(object),
                        None => Value::Undefined,
                    },
                    _ => Value::Undefined,
                };
                let func = self.get_value(reference)?;
                (func, this)
            }
            _ => (self.eval_expr(callee, strict)?, Value::Undefined),
        };
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.eval_expr(arg, strict)?);
        }
        self.call_value(func, this, &arg_values)
    }

    /// Calls any callable value: user functions, native handlers, or abstract
    /// callees (which residualize).
    pub(crate) fn call_value(&mut self, callee: Value, this: Value, args: &[Value]) -> EvalResult<Value> {
        match callee {
            Value::Object(func) => match self.heap.get(func).call.clone() {
                Some(FunctionKind::Native(intrinsic)) => self.call_intrinsic(intrinsic, this, args, false),
                Some(FunctionKind::User { .. }) => self.call_user_function(func, this, args),
                None => Err(self.throw_error(ErrorKind::TypeError, "value is not a function")),
            },
            Value::Abstract(id) => {
                let types = self.abstracts.get(id).types;
                if !types.contains(TypesDomain::FUNCTION) {
                    return Err(self.throw_error(ErrorKind::TypeError, "value is not a function"));
                }
                let mut derive_args: SmallVec<[Value; 4]> = SmallVec::with_capacity(args.len() + 1);
                derive_args.push(callee);
                derive_args.extend_from_slice(args);
                Ok(self.derive(
                    TypesDomain::TOP,
                    ValuesDomain::Top,
                    derive_args,
                    TemplateSource::Call,
                    DeriveOptions {
                        kind: Some(AbstractKind::ResidualCall),
                        is_pure: false,
                        skip_invariant: true,
                    },
                ))
            }
            _ => Err(self.throw_error(ErrorKind::TypeError, "value is not a function")),
        }
    }

    /// Calls a concrete function object (native or user) directly.
    pub(crate) fn call_function(&mut self, func: ObjectId, this: Value, args: &[Value]) -> EvalResult<Value> {
        match self.heap.get(func).call.clone() {
            Some(FunctionKind::Native(intrinsic)) => self.call_intrinsic(intrinsic, this, args, false),
            Some(FunctionKind::User { .. }) => self.call_user_function(func, this, args),
            None => Err(self.throw_error(ErrorKind::TypeError, "value is not a function")),
        }
    }

    fn call_user_function(&mut self, func: ObjectId, this: Value, args: &[Value]) -> EvalResult<Value> {
        let Some(FunctionKind::User { def, env }) = self.heap.get(func).call.clone() else {
            panic!("invariant violated: call_user_function on a non-user function")
        };
        if let Err(error) = self.heap.tracker().check_recursion_depth(self.contexts.len()) {
            return Err(self.resource_error(error));
        }

        let strict = def.strict;
        let this_value = if strict {
            this
        } else {
            match this {
                Value::Undefined | Value::Null => Value::Object(self.global_object),
                other => other,
            }
        };

        let func_env = self.envs.push(
            EnvRecord::Function(FunctionEnv {
                decl: DeclarativeEnv::default(),
                this_state: ThisBindingState::Initialized,
                this_value,
                home_object: None,
                function_object: func,
            }),
            Some(env),
        );
        for (index, param) in def.params.iter().enumerate() {
            let value = args.get(index).copied().unwrap_or(Value::Undefined);
            self.create_mutable_binding(func_env, *param, false);
            self.initialize_binding(func_env, *param, value);
        }
        self.hoist_function_declarations(&def.body, func_env, strict)?;

        self.push_context(ExecutionContext {
            lexical_env: func_env,
            variable_env: func_env,
            function: Some(func),
        });
        let name = def.name.map(|id| self.interns.get(id).to_owned());
        self.tracer.on_call(name.as_deref(), self.contexts.len());

        let result = self.eval_statements(&def.body, strict);

        self.pop_context();
        self.tracer.on_return(self.contexts.len());

        // A pending possibly-normal return folds into a conditional return
        // value; pending throws stay saved and guard the caller's remainder.
        if let Some(pending) = self.saved_completion.take() {
            if let AbruptCompletion::Return { value } = pending.abrupt {
                let normal = pending.normal_value.unwrap_or(Value::Undefined);
                let (consequent, alternate) = if pending.normal_is_consequent {
                    (normal, value)
                } else {
                    (value, normal)
                };
                let joined = self.join_values(pending.condition, consequent, alternate);
                return match result {
                    Ok(_) => Ok(joined),
                    Err(error) => Err(error),
                };
            }
            self.saved_completion = Some(pending);
        }

        match result {
            Ok(_) => Ok(Value::Undefined),
            Err(EvalError::Abrupt(AbruptCompletion::Return { value })) => Ok(value),
            Err(other) => Err(other),
        }
    }

    pub(crate) fn eval_new(&mut self, callee: &ExprLoc, args: &[ExprLoc], strict: bool) -> EvalResult<Value> {
        let func = self.eval_expr(callee, strict)?;
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.eval_expr(arg, strict)?);
        }
        match func {
            Value::Object(ctor) => match self.heap.get(ctor).call.clone() {
                Some(FunctionKind::Native(intrinsic)) => {
                    use crate::intrinsics::Intrinsic;
                    match intrinsic {
                        Intrinsic::ErrorCtor(_) | Intrinsic::ObjectCtor => {
                            self.call_intrinsic(intrinsic, Value::Undefined, &arg_values, true)
                        }
                        _ => Err(self.throw_error(ErrorKind::TypeError, "value is not a constructor")),
                    }
                }
                Some(FunctionKind::User { .. }) => {
                    let prototype_id = self.interns.common().prototype;
                    let proto = match self.ordinary_get(ctor, PropertyKey::Str(prototype_id), func)? {
                        Value::Object(proto) => proto,
                        _ => self.intrinsics.object_prototype,
                    };
                    let this = self.alloc_object(ObjectData::ordinary(Some(proto)))?;
                    let result = self.call_user_function(ctor, Value::Object(this), &arg_values)?;
                    Ok(match result {
                        Value::Object(_) => result,
                        _ => Value::Object(this),
                    })
                }
                None => Err(self.throw_error(ErrorKind::TypeError, "value is not a constructor")),
            },
            Value::Abstract(id) => {
                let types = self.abstracts.get(id).types;
                if !types.contains(TypesDomain::FUNCTION) {
                    return Err(self.throw_error(ErrorKind::TypeError, "value is not a constructor"));
                }
                let mut derive_args: SmallVec<[Value; 4]> = SmallVec::with_capacity(arg_values.len() + 1);
                derive_args.push(func);
                derive_args.extend_from_slice(&arg_values);
                Ok(self.derive(
                    TypesDomain::OBJECT,
                    ValuesDomain::Top,
                    derive_args,
                    TemplateSource::New,
                    DeriveOptions {
                        kind: Some(AbstractKind::ResidualCall),
                        is_pure: false,
                        skip_invariant: true,
                    },
                ))
            }
            _ => Err(self.throw_error(ErrorKind::TypeError, "value is not a constructor")),
        }
    }
}
