use crate::{
    abstract_value::{AbstractKind, TemplateSource},
    ast::{BinaryOp, CatchClause, Expr, ExprLoc, ForInTarget, ForInit, MemberProp, Node, Stmt, SwitchCase},
    completion::{AbruptCompletion, EvalError, EvalResult, JoinedAbrupt},
    diagnostics::{ErrorCode, Severity},
    environment::{DeclarativeEnv, EnvRecord},
    heap::PropertyKey,
    intern::StringId,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::{TypesDomain, Value, ValuesDomain},
};

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    pub(crate) fn dispatch_stmt(&mut self, node: &Node, strict: bool) -> EvalResult<Option<Value>> {
        match &node.stmt {
            Stmt::VarDeclaration(declarators) => {
                for declarator in declarators {
                    if let Some(init) = &declarator.init {
                        let env = self.lexical_env();
                        let reference = self.resolve_binding(declarator.name, env, strict)?;
                        let value = self.eval_expr(init, strict)?;
                        self.put_value(reference, value)?;
                    }
                }
                Ok(None)
            }
            // Instantiated during hoisting.
            Stmt::FunctionDeclaration(_) => Ok(None),
            Stmt::Expression(expr) => Ok(Some(self.eval_expr(expr, strict)?)),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                let test_value = self.eval_expr(test, strict)?;
                match self.to_boolean_value(test_value) {
                    Some(true) => self.eval_node(consequent, strict),
                    Some(false) => match alternate {
                        Some(alternate) => self.eval_node(alternate, strict),
                        None => Ok(None),
                    },
                    None => {
                        let Value::Abstract(condition) = test_value else {
                            panic!("invariant violated: unknown truthiness on a concrete value")
                        };
                        self.eval_if_joined(condition, consequent, alternate.as_deref(), strict)
                    }
                }
            }
            Stmt::Block(body) => self.eval_statements(body, strict),
            Stmt::While { .. } | Stmt::DoWhile { .. } | Stmt::For { .. } | Stmt::ForIn { .. } => {
                self.eval_loop(node, None, strict)
            }
            Stmt::Break { label } => Err(AbruptCompletion::Break {
                label: *label,
                value: None,
            }
            .into()),
            Stmt::Continue { label } => Err(AbruptCompletion::Continue {
                label: *label,
                value: None,
            }
            .into()),
            Stmt::Return { argument } => {
                let value = match argument {
                    Some(argument) => self.eval_expr(argument, strict)?,
                    None => Value::Undefined,
                };
                Err(AbruptCompletion::Return { value }.into())
            }
            Stmt::Throw { argument } => {
                let value = self.eval_expr(argument, strict)?;
                Err(AbruptCompletion::Throw {
                    value,
                    loc: node.range,
                }
                .into())
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => self.eval_try(block, handler.as_ref(), finalizer.as_deref(), strict),
            Stmt::Switch { discriminant, cases } => self.eval_switch(discriminant, cases, strict),
            Stmt::Labeled { label, body } => match &body.stmt {
                Stmt::While { .. } | Stmt::DoWhile { .. } | Stmt::For { .. } | Stmt::ForIn { .. } => {
                    self.current_loc = body.range;
                    self.eval_loop(body, Some(*label), strict)
                }
                _ => match self.eval_node(body, strict) {
                    Err(EvalError::Abrupt(abrupt)) if abrupt.is_break_for(Some(*label)) => Ok(abrupt.value()),
                    other => other,
                },
            },
            Stmt::Empty => Ok(None),
        }
    }

    /// Shared loop driver for `while`, `do-while`, `for`, and `for-in`.
    ///
    /// `label` is the loop's own label, consumed by matching `break` and
    /// `continue` completions.
    fn eval_loop(&mut self, node: &Node, label: Option<StringId>, strict: bool) -> EvalResult<Option<Value>> {
        match &node.stmt {
            Stmt::While { test, body } => {
                let mut value = None;
                loop {
                    if !self.loop_guard(test, strict)? {
                        break;
                    }
                    match self.loop_body(body, label, &mut value, strict)? {
                        LoopFlow::Continue => {}
                        LoopFlow::Break => break,
                    }
                }
                Ok(value)
            }
            Stmt::DoWhile { body, test } => {
                let mut value = None;
                loop {
                    match self.loop_body(body, label, &mut value, strict)? {
                        LoopFlow::Continue => {}
                        LoopFlow::Break => break,
                    }
                    if !self.loop_guard(test, strict)? {
                        break;
                    }
                }
                Ok(value)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                match init {
                    Some(ForInit::VarDeclaration(declarators)) => {
                        for declarator in declarators {
                            if let Some(init) = &declarator.init {
                                let env = self.lexical_env();
                                let reference = self.resolve_binding(declarator.name, env, strict)?;
                                let value = self.eval_expr(init, strict)?;
                                self.put_value(reference, value)?;
                            }
                        }
                    }
                    Some(ForInit::Expression(expr)) => {
                        self.eval_expr(expr, strict)?;
                    }
                    None => {}
                }
                let mut value = None;
                loop {
                    if let Some(test) = test
                        && !self.loop_guard(test, strict)?
                    {
                        break;
                    }
                    match self.loop_body(body, label, &mut value, strict)? {
                        LoopFlow::Continue => {}
                        LoopFlow::Break => break,
                    }
                    if let Some(update) = update {
                        self.eval_expr(update, strict)?;
                    }
                }
                Ok(value)
            }
            Stmt::ForIn { left, right, body } => self.eval_for_in(left, right, body, label, strict),
            _ => panic!("invariant violated: eval_loop on a non-loop statement"),
        }
    }

    /// Evaluates a loop guard, requiring build-time truthiness.
    fn loop_guard(&mut self, test: &ExprLoc, strict: bool) -> EvalResult<bool> {
        let value = self.eval_expr(test, strict)?;
        match self.to_boolean_value(value) {
            Some(result) => Ok(result),
            None => Err(self.fatal_diag(
                ErrorCode::UnsupportedAbstractLoopGuard,
                Severity::FatalError,
                "loop guard depends on an abstract value",
            )),
        }
    }

    /// Runs one loop body iteration, consuming matching break/continue.
    fn loop_body(
        &mut self,
        body: &Node,
        label: Option<StringId>,
        value: &mut Option<Value>,
        strict: bool,
    ) -> EvalResult<LoopFlow> {
        let result = self.eval_node(body, strict);
        if self.saved_completion.is_some() {
            self.saved_completion = None;
            return Err(self.fatal_diag(
                ErrorCode::UnsupportedCompletionJoin,
                Severity::FatalError,
                "loop body left a pending conditional completion",
            ));
        }
        match result {
            Ok(v) => {
                if v.is_some() {
                    *value = v;
                }
                Ok(LoopFlow::Continue)
            }
            Err(EvalError::Abrupt(abrupt)) => {
                if abrupt.is_continue_for(label) {
                    if let Some(v) = abrupt.value() {
                        *value = Some(v);
                    }
                    return Ok(LoopFlow::Continue);
                }
                if abrupt.is_break_for(label) {
                    if let Some(v) = abrupt.value() {
                        *value = Some(v);
                    }
                    return Ok(LoopFlow::Break);
                }
                Err(EvalError::Abrupt(abrupt.update_empty(*value)))
            }
            Err(fatal) => Err(fatal),
        }
    }

    fn eval_for_in(
        &mut self,
        left: &ForInTarget,
        right: &ExprLoc,
        body: &Node,
        label: Option<StringId>,
        strict: bool,
    ) -> EvalResult<Option<Value>> {
        let iterated = self.eval_expr(right, strict)?;
        match iterated {
            Value::Undefined | Value::Null => Ok(None),
            Value::Str(id) => {
                let count = self.interns.get(id).chars().count();
                let mut value = None;
                for index in 0..count {
                    let key = Value::Str(self.interns.intern(&index.to_string()));
                    self.assign_for_in_target(left, key, strict)?;
                    match self.loop_body(body, label, &mut value, strict)? {
                        LoopFlow::Continue => {}
                        LoopFlow::Break => break,
                    }
                }
                Ok(value)
            }
            Value::Object(object) => {
                let data = self.heap.get(object);
                if data.partial {
                    if !data.simple {
                        return Err(self.fatal_diag(
                            ErrorCode::UnsupportedForIn,
                            Severity::FatalError,
                            "for-in over a partial object that is not simple",
                        ));
                    }
                    return self.eval_residual_for_in(left, right, body, iterated, object, strict);
                }
                let keys = data.enumerable_string_keys();
                let mut value = None;
                for key in keys {
                    // Keys removed mid-iteration are skipped.
                    if self.heap.get(object).own_property(PropertyKey::Str(key)).is_none() {
                        continue;
                    }
                    self.assign_for_in_target(left, Value::Str(key), strict)?;
                    match self.loop_body(body, label, &mut value, strict)? {
                        LoopFlow::Continue => {}
                        LoopFlow::Break => break,
                    }
                }
                Ok(value)
            }
            Value::Abstract(_) => Err(self.fatal_diag(
                ErrorCode::UnsupportedForIn,
                Severity::FatalError,
                "for-in over an abstract value",
            )),
            Value::Bool(_) | Value::Number(_) | Value::Symbol(_) => Ok(None),
        }
    }

    fn assign_for_in_target(&mut self, left: &ForInTarget, key: Value, strict: bool) -> EvalResult<()> {
        match left {
            ForInTarget::VarDeclaration(name) => {
                let env = self.lexical_env();
                let reference = self.resolve_binding(*name, env, strict)?;
                self.put_value(reference, key)
            }
            ForInTarget::Expression(expr) => {
                let reference = self.eval_expr_to_ref(expr, strict)?;
                self.put_value(reference, key)
            }
        }
    }

    /// The residual `for-in` over a partial, simple object.
    ///
    /// Accepts only the single-assignment copy shape `target[k] = source[k]`
    /// where `source` is the iterated object and `target` is fresh or simple.
    /// Known keys are replayed onto the heap at build time, and a residual
    /// loop is emitted so keys discovered only at runtime are still copied.
    fn eval_residual_for_in(
        &mut self,
        left: &ForInTarget,
        right: &ExprLoc,
        body: &Node,
        iterated: Value,
        source: crate::heap::ObjectId,
        strict: bool,
    ) -> EvalResult<Option<Value>> {
        let _ = right;
        let ForInTarget::VarDeclaration(loop_var) = left else {
            return Err(self.fatal_diag(
                ErrorCode::UnsupportedForIn,
                Severity::FatalError,
                "residual for-in requires a `var` loop variable",
            ));
        };
        let Some((target_expr, source_expr)) = for_in_copy_shape(body, *loop_var) else {
            return Err(self.fatal_diag(
                ErrorCode::UnsupportedForIn,
                Severity::FatalError,
                "residual for-in body must be a single `target[k] = source[k]` assignment",
            ));
        };

        // Both base expressions must be effect-free so evaluating them twice
        // (once to check, once for real) is unobservable.
        for expr in [target_expr, source_expr] {
            let effects = self.evaluate_for_effects(|realm| realm.eval_expr(expr, strict).map(Some))?;
            let pure = effects.generator.is_empty()
                && effects.bindings.is_empty()
                && effects.properties.is_empty()
                && effects.created.is_empty();
            if !pure {
                return Err(self.fatal_diag(
                    ErrorCode::UnsupportedForIn,
                    Severity::FatalError,
                    "residual for-in base expressions must be effect-free",
                ));
            }
        }

        let source_value = self.eval_expr(source_expr, strict)?;
        if !source_value.same_value(iterated) {
            return Err(self.fatal_diag(
                ErrorCode::UnsupportedForIn,
                Severity::FatalError,
                "residual for-in must copy from the iterated object",
            ));
        }
        let target_value = self.eval_expr(target_expr, strict)?;
        let Value::Object(target) = target_value else {
            return Err(self.fatal_diag(
                ErrorCode::UnsupportedForIn,
                Severity::FatalError,
                "residual for-in target must be an object",
            ));
        };
        {
            let data = self.heap.get(target);
            if !(self.is_fresh(target) || data.simple) {
                return Err(self.fatal_diag(
                    ErrorCode::UnsupportedForIn,
                    Severity::FatalError,
                    "residual for-in target must be fresh or simple",
                ));
            }
        }

        // Replay the keys known at build time.
        let keys = self.heap.get(source).enumerable_string_keys();
        for key in keys {
            let value = self.ordinary_get(source, PropertyKey::Str(key), iterated)?;
            self.ordinary_set(target, PropertyKey::Str(key), value, strict)?;
        }

        // After the loop the variable holds some runtime key.
        let key_abstract = self.create_abstract(
            TypesDomain::STRING,
            ValuesDomain::Top,
            smallvec::SmallVec::new(),
            TemplateSource::Intrinsic(*loop_var),
            Some(AbstractKind::ForInKey),
        );
        let env = self.lexical_env();
        let reference = self.resolve_binding(*loop_var, env, strict)?;
        self.put_value(reference, key_abstract)?;

        self.emit_for_in_copy(target_value, iterated, *loop_var);
        Ok(None)
    }

    fn eval_switch(&mut self, discriminant: &ExprLoc, cases: &[SwitchCase], strict: bool) -> EvalResult<Option<Value>> {
        let disc = self.eval_expr(discriminant, strict)?;
        self.eval_switch_dispatch(disc, cases, 0, strict)
    }

    /// Case selection from clause `index` onward.
    ///
    /// Tests evaluate in source order, skipping `default`; the first match
    /// starts execution at its clause and falls through. When a comparison
    /// against the discriminant is not settled at build time, the remaining
    /// switch is joined like an `if`: bodies-from-here against the rest of
    /// the selection, under the comparison condition.
    fn eval_switch_dispatch(
        &mut self,
        disc: Value,
        cases: &[SwitchCase],
        index: usize,
        strict: bool,
    ) -> EvalResult<Option<Value>> {
        let Some(offset) = cases[index..].iter().position(|case| case.test.is_some()) else {
            // No testable clause left: enter the default clause, if any.
            return match cases.iter().position(|case| case.test.is_none()) {
                Some(start) => self.eval_switch_bodies(cases, start, strict),
                None => Ok(None),
            };
        };
        let case_index = index + offset;
        let test = cases[case_index].test.as_ref().expect("position found a test");
        let test_value = self.eval_expr(test, strict)?;
        match self.strict_equals_values(disc, test_value) {
            Some(true) => self.eval_switch_bodies(cases, case_index, strict),
            Some(false) => self.eval_switch_dispatch(disc, cases, case_index + 1, strict),
            None => {
                let condition_value = self.binary_operation(BinaryOp::StrictEq, disc, test_value)?;
                let Value::Abstract(condition) = condition_value else {
                    panic!("invariant violated: unsettled strict equality produced a concrete value")
                };
                let then_effects =
                    self.evaluate_for_effects(|realm| realm.eval_switch_bodies(cases, case_index, strict))?;
                let else_effects =
                    self.evaluate_for_effects(|realm| realm.eval_switch_dispatch(disc, cases, case_index + 1, strict))?;
                self.tracer.on_join(self.current_loc);
                self.join_and_commit(condition, then_effects, else_effects)
            }
        }
    }

    /// Runs clause bodies from `start` to the end of the case block
    /// (fall-through), consuming an unlabeled `break`.
    fn eval_switch_bodies(&mut self, cases: &[SwitchCase], start: usize, strict: bool) -> EvalResult<Option<Value>> {
        let mut value = None;
        for case in &cases[start..] {
            let result = self.eval_statements(&case.body, strict);
            if self.saved_completion.is_some() {
                self.saved_completion = None;
                return Err(self.fatal_diag(
                    ErrorCode::UnsupportedCompletionJoin,
                    Severity::FatalError,
                    "switch clause left a pending conditional completion",
                ));
            }
            match result {
                Ok(v) => {
                    if v.is_some() {
                        value = v;
                    }
                }
                Err(EvalError::Abrupt(abrupt)) if abrupt.is_break_for(None) => {
                    if let Some(v) = abrupt.value() {
                        value = Some(v);
                    }
                    return Ok(value);
                }
                Err(EvalError::Abrupt(abrupt)) => return Err(EvalError::Abrupt(abrupt.update_empty(value))),
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(value)
    }

    fn eval_try(
        &mut self,
        block: &[Node],
        handler: Option<&CatchClause>,
        finalizer: Option<&[Node]>,
        strict: bool,
    ) -> EvalResult<Option<Value>> {
        let block_result = self.eval_statements(block, strict);
        if self.saved_completion.is_some() {
            self.saved_completion = None;
            return Err(self.fatal_diag(
                ErrorCode::UnsupportedCompletionJoin,
                Severity::FatalError,
                "try block left a pending conditional completion",
            ));
        }

        let handled = match block_result {
            Err(EvalError::Abrupt(abrupt)) if handler.is_some() => {
                match self.thrown_value(&abrupt) {
                    Some(thrown) => {
                        let clause = handler.expect("handler presence checked");
                        let parent = self.lexical_env();
                        let catch_env = self.envs.push(EnvRecord::Declarative(DeclarativeEnv::default()), Some(parent));
                        self.create_mutable_binding(catch_env, clause.param, false);
                        self.initialize_binding(catch_env, clause.param, thrown);
                        self.with_lexical_env(catch_env, |realm| realm.eval_statements(&clause.body, strict))
                    }
                    // Not a throw (or not joinable): pass through.
                    None => Err(EvalError::Abrupt(abrupt)),
                }
            }
            other => other,
        };

        match finalizer {
            Some(finalizer) => {
                let finally_result = self.eval_statements(finalizer, strict);
                match finally_result {
                    // A normal finally re-raises the incoming completion.
                    Ok(_) => handled,
                    // An abrupt finally overrides it.
                    Err(error) => Err(error),
                }
            }
            None => handled,
        }
    }

    /// The value a catch clause binds for this abrupt completion, when it is
    /// throw-shaped. Joined throws fold into a conditional value.
    fn thrown_value(&mut self, abrupt: &AbruptCompletion) -> Option<Value> {
        match abrupt {
            AbruptCompletion::Throw { value, .. } => Some(*value),
            AbruptCompletion::Joined(joined) => self.joined_thrown_value(joined),
            _ => None,
        }
    }

    fn joined_thrown_value(&mut self, joined: &JoinedAbrupt) -> Option<Value> {
        let consequent = self.thrown_value(&joined.consequent.clone())?;
        let alternate = self.thrown_value(&joined.alternate.clone())?;
        Some(self.join_values(joined.condition, consequent, alternate))
    }
}

/// One loop iteration's control decision.
enum LoopFlow {
    Continue,
    Break,
}

/// Matches the `target[k] = source[k]` copy shape, unwrapping a
/// single-statement block.
fn for_in_copy_shape(body: &Node, loop_var: StringId) -> Option<(&ExprLoc, &ExprLoc)> {
    let stmt = match &body.stmt {
        Stmt::Block(items) if items.len() == 1 => &items[0].stmt,
        other => other,
    };
    let Stmt::Expression(expr) = stmt else { return None };
    let Expr::Assignment {
        op: None,
        target,
        value,
    } = &expr.expr
    else {
        return None;
    };
    let Expr::Member {
        object: target_obj,
        property: MemberProp::Computed(target_key),
    } = &target.expr
    else {
        return None;
    };
    let Expr::Identifier(target_var) = target_key.expr else { return None };
    let Expr::Member {
        object: source_obj,
        property: MemberProp::Computed(source_key),
    } = &value.expr
    else {
        return None;
    };
    let Expr::Identifier(source_var) = source_key.expr else { return None };
    if target_var != loop_var || source_var != loop_var {
        return None;
    }
    Some((target_obj, source_obj))
}
