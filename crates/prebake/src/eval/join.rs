//! Control-flow joins over abstract conditions.
//!
//! When a guard is abstract, both branches are speculatively interpreted in
//! effect-capture frames, then merged: the object graph joins per-property,
//! a conditional generator entry carries the two branch fragments, and the
//! branch values fold into one conditional abstract. Joins the engine cannot
//! express soundly (mixed abrupt shapes, accessor/data descriptor clashes)
//! raise introspection errors instead of guessing.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    abstract_value::{AbstractId, TemplateSource},
    ast::{ExprLoc, LogicalOp, Node, UnaryOp},
    completion::{AbruptCompletion, Completion, EvalError, EvalResult, JoinedAbrupt, PossiblyNormal},
    diagnostics::{ErrorCode, Severity},
    effects::{Delta, Effects},
    environment::{Binding, EnvId},
    heap::{Descriptor, ObjectBrand, ObjectId, PropertyKey},
    intern::StringId,
    intrinsics::ErrorKind,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::{TypesDomain, Value, ValuesDomain},
};

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// Joined evaluation of an `if` with an abstract guard.
    pub(crate) fn eval_if_joined(
        &mut self,
        condition: AbstractId,
        consequent: &Node,
        alternate: Option<&Node>,
        strict: bool,
    ) -> EvalResult<Option<Value>> {
        let then_effects = self.evaluate_node_for_effects(consequent, strict)?;
        let else_effects = match alternate {
            Some(node) => self.evaluate_node_for_effects(node, strict)?,
            None => Effects::empty(),
        };
        self.tracer.on_join(self.current_loc);
        self.join_and_commit(condition, then_effects, else_effects)
    }

    /// Joined evaluation of a conditional expression with an abstract guard.
    pub(crate) fn eval_expr_joined(
        &mut self,
        condition: AbstractId,
        consequent: &ExprLoc,
        alternate: &ExprLoc,
        strict: bool,
    ) -> EvalResult<Value> {
        let then_effects = self.evaluate_for_effects(|realm| realm.eval_expr(consequent, strict).map(Some))?;
        let else_effects = self.evaluate_for_effects(|realm| realm.eval_expr(alternate, strict).map(Some))?;
        self.tracer.on_join(self.current_loc);
        let value = self.join_and_commit(condition, then_effects, else_effects)?;
        Ok(value.unwrap_or(Value::Undefined))
    }

    /// Merges two branches: joined object graph, conditional generator entry,
    /// joined completion.
    pub(crate) fn join_and_commit(
        &mut self,
        condition: AbstractId,
        then_effects: Effects,
        else_effects: Effects,
    ) -> EvalResult<Option<Value>> {
        self.join_state(condition, &then_effects, &else_effects)?;
        self.emit_conditional(condition, then_effects.generator.clone(), else_effects.generator.clone());

        match (then_effects.completion, else_effects.completion) {
            (Completion::Normal(v1), Completion::Normal(v2)) => Ok(self.join_value_options(condition, v1, v2)),
            (Completion::Abrupt(a1), Completion::Abrupt(a2)) => Err(self.join_abrupt(condition, a1, a2)),
            (Completion::Normal(value), Completion::Abrupt(abrupt)) => {
                self.save_possibly_normal(condition, true, value, abrupt)?;
                Ok(value)
            }
            (Completion::Abrupt(abrupt), Completion::Normal(value)) => {
                self.save_possibly_normal(condition, false, value, abrupt)?;
                Ok(value)
            }
            (Completion::PossiblyNormal(_), _) | (_, Completion::PossiblyNormal(_)) => Err(self.fatal_diag(
                ErrorCode::UnsupportedCompletionJoin,
                Severity::FatalError,
                "nested conditional completions cannot be joined",
            )),
        }
    }

    /// Commits state and generator effects of one branch guarded by an
    /// abstract condition, joining against the unchanged current state.
    pub(crate) fn join_branch_effects(
        &mut self,
        condition: AbstractId,
        consequent: Option<Effects>,
        alternate: Option<Effects>,
    ) -> EvalResult<Option<Value>> {
        let then_effects = consequent.unwrap_or_else(Effects::empty);
        let else_effects = alternate.unwrap_or_else(Effects::empty);
        self.join_and_commit(condition, then_effects, else_effects)
    }

    /// Continues after a possibly-normal join: `effects` is the speculative
    /// evaluation of the remaining statements, which run only when the normal
    /// side was taken.
    pub(crate) fn commit_guarded_effects(
        &mut self,
        pending: PossiblyNormal,
        effects: Effects,
        value: Option<Value>,
    ) -> EvalResult<Option<Value>> {
        let completion = effects.completion.clone();
        let (then_effects, else_effects) = if pending.normal_is_consequent {
            (effects, Effects::empty())
        } else {
            (Effects::empty(), effects)
        };
        self.join_state(pending.condition, &then_effects, &else_effects)?;
        self.emit_conditional(pending.condition, then_effects.generator.clone(), else_effects.generator.clone());

        match completion {
            Completion::Normal(rest_value) => {
                let normal_value = rest_value.or(value);
                self.saved_completion = Some(PossiblyNormal {
                    condition: pending.condition,
                    normal_is_consequent: pending.normal_is_consequent,
                    normal_value,
                    abrupt: pending.abrupt,
                });
                Ok(normal_value)
            }
            Completion::Abrupt(abrupt) => {
                let (consequent, alternate) = if pending.normal_is_consequent {
                    (abrupt, pending.abrupt)
                } else {
                    (pending.abrupt, abrupt)
                };
                Err(EvalError::Abrupt(AbruptCompletion::Joined(Box::new(JoinedAbrupt {
                    condition: pending.condition,
                    consequent,
                    alternate,
                }))))
            }
            Completion::PossiblyNormal(inner) => {
                // Both joins must hold for execution to stay normal.
                let outer_normal = self.condition_value(pending.condition, pending.normal_is_consequent);
                let inner_normal = self.condition_value(inner.condition, inner.normal_is_consequent);
                let combined = self.create_abstract(
                    TypesDomain::BOOLEAN,
                    ValuesDomain::Top,
                    SmallVec::from_slice(&[outer_normal, inner_normal]),
                    TemplateSource::Logical(LogicalOp::And),
                    None,
                );
                let Value::Abstract(combined_id) = combined else { unreachable!() };
                let (consequent, alternate) = if pending.normal_is_consequent {
                    (inner.abrupt, pending.abrupt)
                } else {
                    (pending.abrupt, inner.abrupt)
                };
                let normal_value = inner.normal_value.or(value);
                self.saved_completion = Some(PossiblyNormal {
                    condition: combined_id,
                    normal_is_consequent: true,
                    normal_value,
                    abrupt: AbruptCompletion::Joined(Box::new(JoinedAbrupt {
                        condition: pending.condition,
                        consequent,
                        alternate,
                    })),
                });
                Ok(normal_value)
            }
        }
    }

    /// The condition (or its negation) as a value.
    pub(crate) fn condition_value(&mut self, condition: AbstractId, positive: bool) -> Value {
        if positive {
            Value::Abstract(condition)
        } else {
            self.create_abstract(
                TypesDomain::BOOLEAN,
                ValuesDomain::Top,
                SmallVec::from_slice(&[Value::Abstract(condition)]),
                TemplateSource::Unary(UnaryOp::Not),
                None,
            )
        }
    }

    fn save_possibly_normal(
        &mut self,
        condition: AbstractId,
        normal_is_consequent: bool,
        normal_value: Option<Value>,
        abrupt: AbruptCompletion,
    ) -> EvalResult<()> {
        if !abrupt_is_residualizable(&abrupt) {
            return Err(self.fatal_diag(
                ErrorCode::UnsupportedCompletionJoin,
                Severity::FatalError,
                "cannot join a normal branch with a non-throw abrupt branch under an abstract condition",
            ));
        }
        self.saved_completion = Some(PossiblyNormal {
            condition,
            normal_is_consequent,
            normal_value,
            abrupt,
        });
        Ok(())
    }

    fn join_value_options(&mut self, condition: AbstractId, a: Option<Value>, b: Option<Value>) -> Option<Value> {
        match (a, b) {
            (None, None) => None,
            (a, b) => Some(self.join_values(
                condition,
                a.unwrap_or(Value::Undefined),
                b.unwrap_or(Value::Undefined),
            )),
        }
    }

    /// Joins two abrupt completions under an abstract condition. Only
    /// same-shaped pairs join; anything else is an introspection error.
    fn join_abrupt(&mut self, condition: AbstractId, consequent: AbruptCompletion, alternate: AbruptCompletion) -> EvalError {
        match (&consequent, &alternate) {
            (AbruptCompletion::Throw { value: v1, .. }, AbruptCompletion::Throw { value: v2, .. }) => {
                match (self.error_kind_of(*v1), self.error_kind_of(*v2)) {
                    (Some(k1), Some(k2)) if k1 == k2 => EvalError::Abrupt(AbruptCompletion::Joined(Box::new(
                        JoinedAbrupt {
                            condition,
                            consequent,
                            alternate,
                        },
                    ))),
                    _ => self.fatal_diag(
                        ErrorCode::UnsupportedCompletionJoin,
                        Severity::FatalError,
                        "both branches throw, but not the same error kind",
                    ),
                }
            }
            (AbruptCompletion::Return { value: v1 }, AbruptCompletion::Return { value: v2 }) => {
                let value = self.join_values(condition, *v1, *v2);
                EvalError::Abrupt(AbruptCompletion::Return { value })
            }
            (AbruptCompletion::Break { label: l1, value: v1 }, AbruptCompletion::Break { label: l2, value: v2 })
                if l1 == l2 =>
            {
                let value = self.join_value_options(condition, *v1, *v2);
                EvalError::Abrupt(AbruptCompletion::Break { label: *l1, value })
            }
            (
                AbruptCompletion::Continue { label: l1, value: v1 },
                AbruptCompletion::Continue { label: l2, value: v2 },
            ) if l1 == l2 => {
                let value = self.join_value_options(condition, *v1, *v2);
                EvalError::Abrupt(AbruptCompletion::Continue { label: *l1, value })
            }
            _ => self.fatal_diag(
                ErrorCode::UnsupportedCompletionJoin,
                Severity::FatalError,
                "cannot join differently abrupt completions under an abstract condition",
            ),
        }
    }

    /// The error-constructor kind of a thrown value, when it is a branded
    /// error object.
    pub(crate) fn error_kind_of(&self, value: Value) -> Option<ErrorKind> {
        match value {
            Value::Object(id) => match self.heap.get(id).brand {
                ObjectBrand::Error(kind) => Some(kind),
                _ => None,
            },
            _ => None,
        }
    }

    /// Builds the joined object graph: per-binding and per-property
    /// descriptor merging against the pre-join state.
    fn join_state(&mut self, condition: AbstractId, then_effects: &Effects, else_effects: &Effects) -> EvalResult<()> {
        // Created objects from either branch become real; values referencing
        // them flow only through the joined (conditional) values below.
        for (object, data) in then_effects.created.iter().chain(&else_effects.created) {
            self.heap.revive(*object, data.clone());
            self.log.push(Delta::ObjectCreated { object: *object });
        }

        // Bindings.
        let mut binding_targets: IndexMap<(EnvId, StringId), (Option<Option<Binding>>, Option<Option<Binding>>), ahash::RandomState> =
            IndexMap::default();
        for (env, name, _prior, new) in &then_effects.bindings {
            binding_targets.entry((*env, *name)).or_default().0 = Some(*new);
        }
        for (env, name, _prior, new) in &else_effects.bindings {
            binding_targets.entry((*env, *name)).or_default().1 = Some(*new);
        }
        let binding_targets: Vec<_> = binding_targets.into_iter().collect();
        for ((env, name), (then_new, else_new)) in binding_targets {
            let current = self.current_binding(env, name);
            let a = then_new.unwrap_or(current);
            let b = else_new.unwrap_or(current);
            let joined = self.join_bindings(condition, a, b);
            self.write_binding(env, name, joined);
        }

        // Properties.
        let mut property_targets: IndexMap<
            (ObjectId, PropertyKey),
            (Option<Option<Descriptor>>, Option<Option<Descriptor>>),
            ahash::RandomState,
        > = IndexMap::default();
        for (object, key, _prior, new) in &then_effects.properties {
            property_targets.entry((*object, *key)).or_default().0 = Some(*new);
        }
        for (object, key, _prior, new) in &else_effects.properties {
            property_targets.entry((*object, *key)).or_default().1 = Some(*new);
        }
        let property_targets: Vec<_> = property_targets.into_iter().collect();
        for ((object, key), (then_new, else_new)) in property_targets {
            let current = self.heap.get(object).own_property(key).copied();
            let a = then_new.unwrap_or(current);
            let b = else_new.unwrap_or(current);
            let joined = self.join_descriptors(condition, a, b)?;
            self.apply_property(object, key, joined);
        }

        // Prototype changes cannot be expressed conditionally: both branches
        // must agree on the resulting prototype.
        let mut proto_objects: Vec<ObjectId> = Vec::new();
        for (object, _, _) in then_effects.protos.iter().chain(&else_effects.protos) {
            if !proto_objects.contains(object) {
                proto_objects.push(*object);
            }
        }
        for object in proto_objects {
            let lookup = |effects: &Effects| {
                effects
                    .protos
                    .iter()
                    .find(|(o, _, _)| *o == object)
                    .map(|(_, _, new)| *new)
            };
            let current = self.heap.get(object).proto;
            let a = lookup(then_effects).unwrap_or(current);
            let b = lookup(else_effects).unwrap_or(current);
            if a == b {
                self.set_proto_logged(object, a);
            } else {
                return Err(self.fatal_diag(
                    ErrorCode::UnsupportedDescriptorJoin,
                    Severity::FatalError,
                    "branches disagree on a prototype change under an abstract condition",
                ));
            }
        }

        // Flag bits join monotonically: simple only survives when both sides
        // keep it, partial spreads, extensibility only survives when both
        // sides keep it.
        let mut flag_targets: IndexMap<ObjectId, ((bool, bool, bool), (bool, bool, bool)), ahash::RandomState> =
            IndexMap::default();
        for (object, _prior, new) in &then_effects.flags {
            let current = {
                let data = self.heap.get(*object);
                (data.extensible, data.partial, data.simple)
            };
            flag_targets.entry(*object).or_insert((current, current)).0 = *new;
        }
        for (object, _prior, new) in &else_effects.flags {
            let current = {
                let data = self.heap.get(*object);
                (data.extensible, data.partial, data.simple)
            };
            flag_targets.entry(*object).or_insert((current, current)).1 = *new;
        }
        let flag_targets: Vec<_> = flag_targets.into_iter().collect();
        for (object, ((ea, pa, sa), (eb, pb, sb))) in flag_targets {
            self.set_flags_logged(object, ea && eb, pa || pb, sa && sb);
        }

        // This-bindings must agree.
        for (env, _ps, _pv, state_a, value_a) in &then_effects.this_bindings {
            let disagrees = else_effects
                .this_bindings
                .iter()
                .find(|(e, ..)| e == env)
                .is_some_and(|(_, _, _, state_b, value_b)| state_b != state_a || !value_b.same_value(*value_a));
            if disagrees {
                return Err(self.fatal_diag(
                    ErrorCode::UnsupportedCompletionJoin,
                    Severity::FatalError,
                    "branches disagree on a this binding under an abstract condition",
                ));
            }
        }

        // Global var registrations from either branch stick.
        for name in then_effects.global_var_names.iter().chain(&else_effects.global_var_names) {
            self.add_global_var_name(*name);
        }
        Ok(())
    }

    fn current_binding(&self, env: EnvId, name: StringId) -> Option<Binding> {
        use crate::environment::EnvRecord;
        match &self.envs.get(env).record {
            EnvRecord::Declarative(decl) => decl.bindings.get(&name).copied(),
            EnvRecord::Function(func) => func.decl.bindings.get(&name).copied(),
            EnvRecord::Global(global) => global.decl.bindings.get(&name).copied(),
            EnvRecord::Object(_) => None,
        }
    }

    fn join_bindings(&mut self, condition: AbstractId, a: Option<Binding>, b: Option<Binding>) -> Option<Binding> {
        match (a, b) {
            (None, None) => None,
            (Some(ba), Some(bb)) => {
                let value = self.join_values(condition, ba.value, bb.value);
                Some(Binding { value, ..ba })
            }
            (Some(ba), None) => {
                let value = self.join_values(condition, ba.value, Value::Undefined);
                Some(Binding { value, ..ba })
            }
            (None, Some(bb)) => {
                let value = self.join_values(condition, Value::Undefined, bb.value);
                Some(Binding { value, ..bb })
            }
        }
    }

    /// Per-property descriptor merging. Same-kind descriptors with matching
    /// attributes join their values; every other combination is an
    /// introspection error.
    fn join_descriptors(
        &mut self,
        condition: AbstractId,
        a: Option<Descriptor>,
        b: Option<Descriptor>,
    ) -> EvalResult<Option<Descriptor>> {
        match (a, b) {
            (None, None) => Ok(None),
            (
                Some(Descriptor::Data {
                    value: va,
                    writable: wa,
                    enumerable: ea,
                    configurable: ca,
                }),
                Some(Descriptor::Data {
                    value: vb,
                    writable: wb,
                    enumerable: eb,
                    configurable: cb,
                }),
            ) => {
                if (wa, ea, ca) != (wb, eb, cb) {
                    return Err(self.fatal_diag(
                        ErrorCode::UnsupportedDescriptorJoin,
                        Severity::FatalError,
                        "branches disagree on property attributes under an abstract condition",
                    ));
                }
                let value = self.join_values(condition, va, vb);
                Ok(Some(Descriptor::Data {
                    value,
                    writable: wa,
                    enumerable: ea,
                    configurable: ca,
                }))
            }
            (Some(desc_a @ Descriptor::Accessor { .. }), Some(desc_b @ Descriptor::Accessor { .. })) => {
                if desc_a.same(&desc_b) {
                    Ok(Some(desc_a))
                } else {
                    Err(self.fatal_diag(
                        ErrorCode::UnsupportedDescriptorJoin,
                        Severity::FatalError,
                        "branches install different accessors under an abstract condition",
                    ))
                }
            }
            (Some(Descriptor::Data { value, writable, enumerable, configurable }), None) => {
                let value = self.join_values(condition, value, Value::Undefined);
                Ok(Some(Descriptor::Data {
                    value,
                    writable,
                    enumerable,
                    configurable,
                }))
            }
            (None, Some(Descriptor::Data { value, writable, enumerable, configurable })) => {
                let value = self.join_values(condition, Value::Undefined, value);
                Ok(Some(Descriptor::Data {
                    value,
                    writable,
                    enumerable,
                    configurable,
                }))
            }
            _ => Err(self.fatal_diag(
                ErrorCode::UnsupportedDescriptorJoin,
                Severity::FatalError,
                "cannot join a data descriptor with an accessor descriptor",
            )),
        }
    }
}

/// Whether an abrupt completion can be re-materialized in the residual
/// program when its branch condition holds at runtime.
fn abrupt_is_residualizable(abrupt: &AbruptCompletion) -> bool {
    match abrupt {
        AbruptCompletion::Throw { .. } => true,
        AbruptCompletion::Joined(joined) => {
            abrupt_is_residualizable(&joined.consequent) && abrupt_is_residualizable(&joined.alternate)
        }
        _ => false,
    }
}
