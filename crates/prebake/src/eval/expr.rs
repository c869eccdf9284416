//! Expression evaluation.
//!
//! Operations over concrete operands fold immediately; operations touching
//! abstract data produce inline abstract values whose templates the
//! residualizer renders back to source. Inline abstracts carry no generator
//! entry: they are pure expression DAG nodes, unlike `derive`d values.

use smallvec::SmallVec;

use crate::{
    abstract_value::TemplateSource,
    ast::{BinaryOp, Expr, ExprLoc, Literal, LogicalOp, MemberProp, UnaryOp, UpdateOp},
    completion::EvalResult,
    heap::{Descriptor, ObjectData, PropertyKey},
    realm::Realm,
    reference::{RefBase, Reference},
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::{to_int32, to_uint32, TypesDomain, Value, ValuesDomain},
};

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    pub(crate) fn eval_expr(&mut self, expr: &ExprLoc, strict: bool) -> EvalResult<Value> {
        match &expr.expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::Number(*n),
                Literal::Str(id) => Value::Str(*id),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Null => Value::Null,
            }),
            Expr::Identifier(name) => {
                let env = self.lexical_env();
                let reference = self.resolve_binding(*name, env, strict)?;
                self.get_value(reference)
            }
            Expr::This => self.resolve_this(),
            Expr::Array(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    let value = match element {
                        Some(element) => self.eval_expr(element, strict)?,
                        None => Value::Undefined,
                    };
                    values.push(value);
                }
                let array = self.create_array(&values)?;
                Ok(Value::Object(array))
            }
            Expr::Object(properties) => {
                let proto = self.intrinsics.object_prototype;
                let object = self.alloc_object(ObjectData::ordinary(Some(proto)))?;
                for property in properties {
                    let value = self.eval_expr(&property.value, strict)?;
                    self.apply_property(object, PropertyKey::Str(property.key), Some(Descriptor::data(value)));
                }
                Ok(Value::Object(object))
            }
            Expr::Function(def) => {
                let env = self.lexical_env();
                let func = self.create_function_object(def, env, strict)?;
                Ok(Value::Object(func))
            }
            Expr::Unary { op, argument } => self.eval_unary(*op, argument, strict),
            Expr::Update { op, prefix, argument } => self.eval_update(*op, *prefix, argument, strict),
            Expr::Binary { op, left, right } => {
                let left_value = self.eval_expr(left, strict)?;
                let right_value = self.eval_expr(right, strict)?;
                self.binary_operation(*op, left_value, right_value)
            }
            Expr::Logical { op, left, right } => self.eval_logical(*op, left, right, strict),
            Expr::Assignment { op, target, value } => {
                let reference = self.eval_expr_to_ref(target, strict)?;
                let result = match op {
                    None => self.eval_expr(value, strict)?,
                    Some(op) => {
                        let old = self.get_value(reference)?;
                        let rhs = self.eval_expr(value, strict)?;
                        self.binary_operation(*op, old, rhs)?
                    }
                };
                self.put_value(reference, result)?;
                Ok(result)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let test_value = self.eval_expr(test, strict)?;
                match self.to_boolean_value(test_value) {
                    Some(true) => self.eval_expr(consequent, strict),
                    Some(false) => self.eval_expr(alternate, strict),
                    None => {
                        let Value::Abstract(condition) = test_value else {
                            panic!("invariant violated: unknown truthiness on a concrete value")
                        };
                        self.eval_expr_joined(condition, consequent, alternate, strict)
                    }
                }
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, strict),
            Expr::New { callee, args } => self.eval_new(callee, args, strict),
            Expr::Member { object, property } => {
                let base = self.eval_expr(object, strict)?;
                let key = self.member_key(property, strict)?;
                self.get_member(base, key)
            }
            Expr::Sequence(items) => {
                let mut value = Value::Undefined;
                for item in items {
                    value = self.eval_expr(item, strict)?;
                }
                Ok(value)
            }
        }
    }

    /// Evaluates an expression to a reference (assignment targets, `delete`,
    /// `typeof`).
    pub(crate) fn eval_expr_to_ref(&mut self, expr: &ExprLoc, strict: bool) -> EvalResult<Reference> {
        match &expr.expr {
            Expr::Identifier(name) => {
                let env = self.lexical_env();
                self.resolve_binding(*name, env, strict)
            }
            Expr::Member { object, property } => {
                let base = self.eval_expr(object, strict)?;
                let key = self.member_key(property, strict)?;
                Ok(Reference::member(base, key, strict))
            }
            _ => {
                // The parser rejects other targets; reaching here is a bug.
                panic!("invariant violated: non-reference expression used as a reference")
            }
        }
    }

    fn member_key(&mut self, property: &MemberProp, strict: bool) -> EvalResult<Value> {
        match property {
            MemberProp::Dot(name) => Ok(Value::Str(*name)),
            MemberProp::Computed(expr) => self.eval_expr(expr, strict),
        }
    }

    /// `this` resolution: the nearest environment record with a this binding.
    pub(crate) fn resolve_this(&mut self) -> EvalResult<Value> {
        let mut env = Some(self.lexical_env());
        while let Some(current) = env {
            if self.has_this_binding(current) {
                return self.get_this_binding(current);
            }
            env = self.envs.parent(current);
        }
        panic!("invariant violated: no environment provides a this binding")
    }

    fn eval_unary(&mut self, op: UnaryOp, argument: &ExprLoc, strict: bool) -> EvalResult<Value> {
        if op == UnaryOp::Typeof {
            // typeof tolerates unresolvable references.
            if let Expr::Identifier(name) = &argument.expr {
                let env = self.lexical_env();
                let reference = self.resolve_binding(*name, env, strict)?;
                if matches!(reference.base, RefBase::Unresolvable) && !self.flags.partial_global {
                    return Ok(Value::Str(self.interns.intern("undefined")));
                }
                let value = self.get_value(reference)?;
                return self.typeof_result_value(value);
            }
            let value = self.eval_expr(argument, strict)?;
            return self.typeof_result_value(value);
        }
        if op == UnaryOp::Delete {
            let reference = self.eval_expr_to_ref(argument, strict)?;
            let result = self.delete_reference(reference)?;
            return Ok(Value::Bool(result));
        }

        let value = self.eval_expr(argument, strict)?;
        match op {
            UnaryOp::Void => Ok(Value::Undefined),
            UnaryOp::Not => match self.to_boolean_value(value) {
                Some(result) => Ok(Value::Bool(!result)),
                None => Ok(self.create_abstract(
                    TypesDomain::BOOLEAN,
                    ValuesDomain::Top,
                    SmallVec::from_slice(&[value]),
                    TemplateSource::Unary(UnaryOp::Not),
                    None,
                )),
            },
            UnaryOp::Minus | UnaryOp::Plus | UnaryOp::BitNot => {
                if value.is_concrete() {
                    let number = self.to_number_value(value)?;
                    let result = match op {
                        UnaryOp::Minus => -number,
                        UnaryOp::Plus => number,
                        UnaryOp::BitNot => f64::from(!to_int32(number)),
                        _ => unreachable!(),
                    };
                    Ok(Value::Number(result))
                } else {
                    Ok(self.create_abstract(
                        TypesDomain::NUMBER,
                        ValuesDomain::Top,
                        SmallVec::from_slice(&[value]),
                        TemplateSource::Unary(op),
                        None,
                    ))
                }
            }
            UnaryOp::Typeof | UnaryOp::Delete => unreachable!("handled above"),
        }
    }

    fn typeof_result_value(&mut self, value: Value) -> EvalResult<Value> {
        match self.typeof_value(value) {
            Some(text) => Ok(Value::Str(self.interns.intern(text))),
            None => Ok(self.create_abstract(
                TypesDomain::STRING,
                ValuesDomain::Top,
                SmallVec::from_slice(&[value]),
                TemplateSource::Typeof,
                None,
            )),
        }
    }

    fn eval_update(&mut self, op: UpdateOp, prefix: bool, argument: &ExprLoc, strict: bool) -> EvalResult<Value> {
        let reference = self.eval_expr_to_ref(argument, strict)?;
        let old = self.get_value(reference)?;
        if old.is_concrete() {
            let old_number = self.to_number_value(old)?;
            let new_number = match op {
                UpdateOp::Inc => old_number + 1.0,
                UpdateOp::Dec => old_number - 1.0,
            };
            self.put_value(reference, Value::Number(new_number))?;
            return Ok(Value::Number(if prefix { new_number } else { old_number }));
        }
        let old_number = self.create_abstract(
            TypesDomain::NUMBER,
            ValuesDomain::Top,
            SmallVec::from_slice(&[old]),
            TemplateSource::Unary(UnaryOp::Plus),
            None,
        );
        let delta_op = match op {
            UpdateOp::Inc => BinaryOp::Add,
            UpdateOp::Dec => BinaryOp::Sub,
        };
        let new_value = self.create_abstract(
            TypesDomain::NUMBER,
            ValuesDomain::Top,
            SmallVec::from_slice(&[old_number, Value::Number(1.0)]),
            TemplateSource::Binary(delta_op),
            None,
        );
        self.put_value(reference, new_value)?;
        Ok(if prefix { new_value } else { old_number })
    }

    fn eval_logical(&mut self, op: LogicalOp, left: &ExprLoc, right: &ExprLoc, strict: bool) -> EvalResult<Value> {
        let left_value = self.eval_expr(left, strict)?;
        match (op, self.to_boolean_value(left_value)) {
            (LogicalOp::And, Some(false)) | (LogicalOp::Or, Some(true)) => Ok(left_value),
            (LogicalOp::And, Some(true)) | (LogicalOp::Or, Some(false)) => self.eval_expr(right, strict),
            (_, None) => {
                let Value::Abstract(condition) = left_value else {
                    panic!("invariant violated: unknown truthiness on a concrete value")
                };
                // Speculate the right side; it runs only when the left side
                // does not short-circuit.
                let effects = self.evaluate_for_effects(|realm| realm.eval_expr(right, strict).map(Some))?;
                let right_value = match &effects.completion {
                    crate::completion::Completion::Normal(value) => value.unwrap_or(Value::Undefined),
                    // The right side never produces a value when it is
                    // abrupt; the join below only sees the left value.
                    _ => left_value,
                };
                let (consequent, alternate) = match op {
                    LogicalOp::And => (Some(effects), None),
                    LogicalOp::Or => (None, Some(effects)),
                };
                self.join_branch_effects(condition, consequent, alternate)?;
                Ok(self.join_values(
                    condition,
                    if op == LogicalOp::And { right_value } else { left_value },
                    if op == LogicalOp::And { left_value } else { right_value },
                ))
            }
        }
    }

    /// Applies a binary operator over evaluated operands.
    pub(crate) fn binary_operation(&mut self, op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
        // Equality over mixed concrete/abstract operands may still settle.
        match op {
            BinaryOp::StrictEq | BinaryOp::StrictNe => {
                if let Some(equal) = self.strict_equals_values(left, right) {
                    return Ok(Value::Bool(if op == BinaryOp::StrictEq { equal } else { !equal }));
                }
            }
            _ => {}
        }

        if !left.is_concrete() || !right.is_concrete() {
            return Ok(self.abstract_binary(op, left, right));
        }

        match op {
            BinaryOp::Add => {
                let lp = self.to_primitive(left, crate::coerce::PrimitiveHint::Number)?;
                let rp = self.to_primitive(right, crate::coerce::PrimitiveHint::Number)?;
                if matches!(lp, Value::Str(_)) || matches!(rp, Value::Str(_)) {
                    let ls = self.to_string_value(lp)?;
                    let rs = self.to_string_value(rp)?;
                    let joined = format!("{}{}", self.interns.get(ls), self.interns.get(rs));
                    Ok(Value::Str(self.interns.intern(&joined)))
                } else {
                    let ln = self.to_number_value(lp)?;
                    let rn = self.to_number_value(rp)?;
                    Ok(Value::Number(ln + rn))
                }
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let ln = self.to_number_value(left)?;
                let rn = self.to_number_value(right)?;
                let result = match op {
                    BinaryOp::Sub => ln - rn,
                    BinaryOp::Mul => ln * rn,
                    BinaryOp::Div => ln / rn,
                    BinaryOp::Mod => ln % rn,
                    _ => unreachable!(),
                };
                Ok(Value::Number(result))
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                let lp = self.to_primitive(left, crate::coerce::PrimitiveHint::Number)?;
                let rp = self.to_primitive(right, crate::coerce::PrimitiveHint::Number)?;
                if let (Value::Str(ls), Value::Str(rs)) = (lp, rp) {
                    let ls = self.interns.get(ls);
                    let rs = self.interns.get(rs);
                    let result = match op {
                        BinaryOp::Lt => ls < rs,
                        BinaryOp::Gt => ls > rs,
                        BinaryOp::Le => ls <= rs,
                        BinaryOp::Ge => ls >= rs,
                        _ => unreachable!(),
                    };
                    return Ok(Value::Bool(result));
                }
                let ln = self.to_number_value(lp)?;
                let rn = self.to_number_value(rp)?;
                let result = match op {
                    BinaryOp::Lt => ln < rn,
                    BinaryOp::Gt => ln > rn,
                    BinaryOp::Le => ln <= rn,
                    BinaryOp::Ge => ln >= rn,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let equal = self.loose_equals(left, right)?;
                Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
            }
            BinaryOp::StrictEq | BinaryOp::StrictNe => {
                let equal = left.strict_equals(right).expect("concrete operands settled above");
                Ok(Value::Bool(if op == BinaryOp::StrictEq { equal } else { !equal }))
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                let ln = to_int32(self.to_number_value(left)?);
                let rn = to_int32(self.to_number_value(right)?);
                let result = match op {
                    BinaryOp::BitAnd => ln & rn,
                    BinaryOp::BitOr => ln | rn,
                    BinaryOp::BitXor => ln ^ rn,
                    _ => unreachable!(),
                };
                Ok(Value::Number(f64::from(result)))
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                let ln = to_int32(self.to_number_value(left)?);
                let shift = (to_uint32(self.to_number_value(right)?) & 31) as u32;
                let result = match op {
                    BinaryOp::Shl => ln.wrapping_shl(shift),
                    BinaryOp::Shr => ln.wrapping_shr(shift),
                    _ => unreachable!(),
                };
                Ok(Value::Number(f64::from(result)))
            }
            BinaryOp::UShr => {
                let ln = to_uint32(self.to_number_value(left)?);
                let shift = to_uint32(self.to_number_value(right)?) & 31;
                Ok(Value::Number(f64::from(ln.wrapping_shr(shift))))
            }
            BinaryOp::In => {
                let result = self.has_member(right, left)?;
                Ok(Value::Bool(result))
            }
            BinaryOp::Instanceof => {
                let result = self.instance_of(left, right)?;
                Ok(Value::Bool(result))
            }
        }
    }

    /// An inline abstract for a binary operation with abstract operands.
    fn abstract_binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Value {
        let types = match op {
            BinaryOp::Add => {
                let either_string = self.type_domain_of(left).contains(TypesDomain::STRING)
                    || self.type_domain_of(right).contains(TypesDomain::STRING);
                if either_string {
                    TypesDomain::STRING | TypesDomain::NUMBER
                } else {
                    TypesDomain::NUMBER
                }
            }
            BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr
            | BinaryOp::UShr => TypesDomain::NUMBER,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::StrictEq
            | BinaryOp::StrictNe
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::Le
            | BinaryOp::Ge
            | BinaryOp::In
            | BinaryOp::Instanceof => TypesDomain::BOOLEAN,
        };
        self.create_abstract(
            types,
            ValuesDomain::Top,
            SmallVec::from_slice(&[left, right]),
            TemplateSource::Binary(op),
            None,
        )
    }
}
