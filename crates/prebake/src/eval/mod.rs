//! The AST evaluator dispatcher.
//!
//! For every syntactic form there is one evaluation routine; dispatch is an
//! exhaustive match over the closed statement and expression sums. The
//! dispatcher records the current source location, polls the deadline, invokes
//! the evaluator, and folds any saved possibly-normal completion into the
//! remainder of the statement list.

pub(crate) mod call;
pub(crate) mod expr;
pub(crate) mod join;
pub(crate) mod stmt;

use std::rc::Rc;

use crate::{
    ast::{ForInTarget, ForInit, FunctionDef, Node, Program, Stmt},
    completion::{EvalError, EvalResult, PossiblyNormal},
    environment::EnvId,
    heap::{Descriptor, PropertyKey},
    intern::StringId,
    realm::Realm,
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::Value,
};

/// Collects `var` names and function declarations of one function or script
/// body, without descending into nested functions.
pub(crate) fn collect_declarations(body: &[Node], vars: &mut Vec<StringId>, funcs: &mut Vec<Rc<FunctionDef>>) {
    for node in body {
        match &node.stmt {
            Stmt::VarDeclaration(declarators) => {
                for declarator in declarators {
                    vars.push(declarator.name);
                }
            }
            Stmt::FunctionDeclaration(def) => funcs.push(Rc::clone(def)),
            Stmt::If {
                consequent, alternate, ..
            } => {
                collect_declarations(std::slice::from_ref(consequent), vars, funcs);
                if let Some(alternate) = alternate {
                    collect_declarations(std::slice::from_ref(alternate), vars, funcs);
                }
            }
            Stmt::Block(body) => collect_declarations(body, vars, funcs),
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::Labeled { body, .. } => {
                collect_declarations(std::slice::from_ref(body), vars, funcs);
            }
            Stmt::For { init, body, .. } => {
                if let Some(ForInit::VarDeclaration(declarators)) = init {
                    for declarator in declarators {
                        vars.push(declarator.name);
                    }
                }
                collect_declarations(std::slice::from_ref(body), vars, funcs);
            }
            Stmt::ForIn { left, body, .. } => {
                if let ForInTarget::VarDeclaration(name) = left {
                    vars.push(*name);
                }
                collect_declarations(std::slice::from_ref(body), vars, funcs);
            }
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    collect_declarations(&case.body, vars, funcs);
                }
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => {
                collect_declarations(block, vars, funcs);
                if let Some(handler) = handler {
                    collect_declarations(&handler.body, vars, funcs);
                }
                if let Some(finalizer) = finalizer {
                    collect_declarations(finalizer, vars, funcs);
                }
            }
            Stmt::Expression(_)
            | Stmt::Break { .. }
            | Stmt::Continue { .. }
            | Stmt::Return { .. }
            | Stmt::Throw { .. }
            | Stmt::Empty => {}
        }
    }
}

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// GlobalDeclarationInstantiation followed by script evaluation.
    ///
    /// Returns the script's completion value.
    pub(crate) fn eval_program(&mut self, program: &Program) -> EvalResult<Option<Value>> {
        self.hoist_global_declarations(&program.body, program.strict)?;
        self.eval_statements(&program.body, program.strict)
    }

    fn hoist_global_declarations(&mut self, body: &[Node], strict: bool) -> EvalResult<()> {
        let mut vars = Vec::new();
        let mut funcs = Vec::new();
        collect_declarations(body, &mut vars, &mut funcs);

        let global = self.global_object;
        for name in vars {
            let key = PropertyKey::Str(name);
            if self.heap.get(global).own_property(key).is_none() {
                self.apply_property(global, key, Some(Descriptor::data(Value::Undefined)));
            }
            self.add_global_var_name(name);
        }
        let env = self.global_env;
        for def in funcs {
            let func = self.create_function_object(&def, env, strict)?;
            let name = def.name.expect("function declarations carry a name");
            let key = PropertyKey::Str(name);
            self.apply_property(global, key, Some(Descriptor::data(Value::Object(func))));
            self.add_global_var_name(name);
        }
        Ok(())
    }

    /// Hoists `var` and function declarations into a function environment.
    pub(crate) fn hoist_function_declarations(&mut self, body: &[Node], env: EnvId, strict: bool) -> EvalResult<()> {
        let mut vars = Vec::new();
        let mut funcs = Vec::new();
        collect_declarations(body, &mut vars, &mut funcs);

        for name in vars {
            if !self.has_binding(env, name)? {
                self.create_mutable_binding(env, name, false);
                self.initialize_binding(env, name, Value::Undefined);
            }
        }
        for def in funcs {
            let func = self.create_function_object(&def, env, strict)?;
            let name = def.name.expect("function declarations carry a name");
            if !self.has_binding(env, name)? {
                self.create_mutable_binding(env, name, false);
                self.initialize_binding(env, name, Value::Object(func));
            } else {
                self.set_mutable_binding(env, name, Value::Object(func), strict)?;
            }
        }
        Ok(())
    }

    /// Evaluates a statement list, threading the completion value and folding
    /// pending possibly-normal completions over the remainder of the list.
    pub(crate) fn eval_statements(&mut self, stmts: &[Node], strict: bool) -> EvalResult<Option<Value>> {
        let mut value: Option<Value> = None;
        for (index, node) in stmts.iter().enumerate() {
            let result = match self.eval_node(node, strict) {
                Ok(result) => result,
                Err(EvalError::Abrupt(abrupt)) => return Err(EvalError::Abrupt(abrupt.update_empty(value))),
                Err(fatal) => return Err(fatal),
            };
            let merged = result.or(value);
            if let Some(pending) = self.saved_completion.take() {
                return self.resume_possibly_normal(pending, &stmts[index + 1..], strict, merged);
            }
            value = merged;
        }
        Ok(value)
    }

    /// Evaluates one statement: record location, poll the deadline, dispatch.
    pub(crate) fn eval_node(&mut self, node: &Node, strict: bool) -> EvalResult<Option<Value>> {
        self.current_loc = node.range;
        self.tracer.on_statement(node.stmt.kind(), node.range);
        self.check_deadline()?;
        self.dispatch_stmt(node, strict)
    }

    /// Continues a statement list after a join left one side normal: the
    /// remainder runs speculatively and commits guarded by the normal-side
    /// condition.
    fn resume_possibly_normal(
        &mut self,
        pending: PossiblyNormal,
        rest: &[Node],
        strict: bool,
        value: Option<Value>,
    ) -> EvalResult<Option<Value>> {
        if rest.is_empty() {
            // Nothing left to guard; re-save for the enclosing list.
            let normal_value = pending.normal_value.or(value);
            self.saved_completion = Some(PossiblyNormal {
                normal_value,
                ..pending
            });
            return Ok(normal_value);
        }
        let effects = self.evaluate_for_effects(|realm| realm.eval_statements(rest, strict))?;
        self.commit_guarded_effects(pending, effects, value)
    }

    /// Evaluates statements under a temporary lexical environment (catch
    /// clauses).
    pub(crate) fn with_lexical_env<F, R>(&mut self, env: EnvId, f: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        let context = self.contexts.last_mut().expect("context stack underflow");
        let saved = context.lexical_env;
        context.lexical_env = env;
        let result = f(self);
        let context = self.contexts.last_mut().expect("context stack underflow");
        context.lexical_env = saved;
        result
    }
}
