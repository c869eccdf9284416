//! Pass 2: emission.
//!
//! Traverses the generator tree in order, serializing argument values to
//! expressions and building the output statements. Freshly reached objects
//! are declared on first use as `{}`/`[]` shells followed by property
//! assignment statements, which keeps cyclic object graphs representable
//! without forward references. Property values that depend on an abstract not
//! yet declared are deferred and flushed after the declaration lands.

use crate::{
    abstract_value::{AbstractId, TemplateSource},
    ast::{BinaryOp, UnaryOp},
    diagnostics::{ErrorCode, FatalError, Severity},
    environment::EnvRecord,
    generator::{BuildNode, Entry, Generator, InvariantKind},
    heap::{Descriptor, FunctionKind, ObjectBrand, ObjectId, PropertyKey},
    intern::StringId,
    names::is_identifier,
    printer::{OutExpr, OutMember, OutStmt},
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::Value,
};

use super::Residualizer;

impl<T: ResourceTracker, Tr: EvalTracer> Residualizer<'_, T, Tr> {
    pub(crate) fn emit(&mut self) -> Result<Vec<OutStmt>, FatalError> {
        let mut out = Vec::new();
        let root = self.root.clone();
        self.emit_generator(&root, &mut out)?;
        self.emit_global_state(&mut out)?;
        self.flush_deferred(&mut out)?;

        if let Some(value) = self.completion
            && !matches!(value, Value::Undefined)
        {
            let expr = self.serialize_value(value, &mut out)?;
            out.push(OutStmt::Expr { expr, loc: None });
        }
        Ok(out)
    }

    fn emit_generator(&mut self, generator: &Generator, out: &mut Vec<OutStmt>) -> Result<(), FatalError> {
        for entry in &generator.entries {
            self.emit_entry(entry, out)?;
        }
        Ok(())
    }

    fn emit_entry(&mut self, entry: &Entry, out: &mut Vec<OutStmt>) -> Result<(), FatalError> {
        if entry.pure
            && let Some(declared) = entry.declared
            && !self.required.contains(&declared)
        {
            return Ok(());
        }
        let loc = Some(entry.loc);
        match &entry.build {
            BuildNode::Declare => {
                let declared = entry.declared.expect("declare entries carry an abstract");
                let init = self.render_abstract(declared, out)?;
                let hint = self.realm.abstracts.get(declared).kind.map(|kind| kind.to_string());
                let name = self.names.generate(hint.as_deref());
                self.abstract_names.insert(declared, name.clone());
                out.push(OutStmt::Var {
                    name,
                    init: Some(init),
                    loc,
                });
                self.flush_deferred(out)?;
            }
            BuildNode::Invariant { kind } => {
                let InvariantKind::TypeofNot { expected } = kind;
                let value = self.serialize_value(entry.args[0], out)?;
                let test = OutExpr::Binary {
                    op: BinaryOp::StrictNe,
                    left: Box::new(OutExpr::Unary {
                        op: UnaryOp::Typeof,
                        argument: Box::new(value),
                    }),
                    right: Box::new(OutExpr::Str((*expected).to_owned())),
                };
                let message = format!("invariant failed: value is not a {expected}");
                out.push(OutStmt::If {
                    test,
                    consequent: vec![OutStmt::Throw {
                        argument: OutExpr::New {
                            callee: Box::new(OutExpr::Ident("Error".to_owned())),
                            args: vec![OutExpr::Str(message)],
                        },
                        loc: None,
                    }],
                    alternate: Vec::new(),
                    loc,
                });
            }
            BuildNode::GlobalAssignment { name } => {
                let global = self.global_reference();
                let value = self.serialize_value(entry.args[0], out)?;
                let target = self.member_by_name(global, *name);
                out.push(OutStmt::Expr {
                    expr: OutExpr::Assign {
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                    loc,
                });
            }
            BuildNode::GlobalDelete { name } => {
                let global = self.global_reference();
                let target = self.member_by_name(global, *name);
                out.push(OutStmt::Expr {
                    expr: OutExpr::Unary {
                        op: UnaryOp::Delete,
                        argument: Box::new(target),
                    },
                    loc,
                });
            }
            BuildNode::PropertyAssignment => {
                let object = self.serialize_value(entry.args[0], out)?;
                let target = self.member_by_key(object, entry.args[1], out)?;
                let value = self.serialize_value(entry.args[2], out)?;
                out.push(OutStmt::Expr {
                    expr: OutExpr::Assign {
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                    loc,
                });
            }
            BuildNode::DefineProperty {
                key,
                writable,
                enumerable,
                configurable,
            } => {
                let object = self.serialize_value(entry.args[0], out)?;
                let value = self.serialize_value(entry.args[1], out)?;
                let key_text = self.realm.interns.get(*key).to_owned();
                let define = self.prelude.reference("Object.defineProperty", &mut self.names);
                out.push(OutStmt::Expr {
                    expr: OutExpr::Call {
                        callee: Box::new(OutExpr::Ident(define)),
                        args: vec![
                            object,
                            OutExpr::Str(key_text),
                            OutExpr::ObjectLit(vec![
                                ("value".to_owned(), value),
                                ("writable".to_owned(), OutExpr::Bool(*writable)),
                                ("enumerable".to_owned(), OutExpr::Bool(*enumerable)),
                                ("configurable".to_owned(), OutExpr::Bool(*configurable)),
                            ]),
                        ],
                    },
                    loc,
                });
            }
            BuildNode::PropertyDelete => {
                let object = self.serialize_value(entry.args[0], out)?;
                let target = self.member_by_key(object, entry.args[1], out)?;
                out.push(OutStmt::Expr {
                    expr: OutExpr::Unary {
                        op: UnaryOp::Delete,
                        argument: Box::new(target),
                    },
                    loc,
                });
            }
            BuildNode::Call => {
                let callee = self.serialize_value(entry.args[0], out)?;
                let mut args = Vec::with_capacity(entry.args.len() - 1);
                for arg in &entry.args[1..] {
                    args.push(self.serialize_value(*arg, out)?);
                }
                out.push(OutStmt::Expr {
                    expr: OutExpr::Call {
                        callee: Box::new(callee),
                        args,
                    },
                    loc,
                });
            }
            BuildNode::VoidExpression => {
                let value = self.serialize_value(entry.args[0], out)?;
                out.push(OutStmt::Expr {
                    expr: OutExpr::Unary {
                        op: UnaryOp::Void,
                        argument: Box::new(value),
                    },
                    loc,
                });
            }
            BuildNode::ConsoleLog => {
                let console = self.prelude.reference("console", &mut self.names);
                let mut args = Vec::with_capacity(entry.args.len());
                for arg in &entry.args {
                    args.push(self.serialize_value(*arg, out)?);
                }
                out.push(OutStmt::Expr {
                    expr: OutExpr::Call {
                        callee: Box::new(OutExpr::Member {
                            object: Box::new(OutExpr::Ident(console)),
                            property: OutMember::Dot("log".to_owned()),
                        }),
                        args,
                    },
                    loc,
                });
            }
            BuildNode::Conditional => {
                let test = self.serialize_value(entry.args[0], out)?;
                let mut consequent = Vec::new();
                self.emit_generator(&entry.children[0], &mut consequent)?;
                let mut alternate = Vec::new();
                if entry.children.len() > 1 {
                    self.emit_generator(&entry.children[1], &mut alternate)?;
                }
                if consequent.is_empty() && alternate.is_empty() {
                    return Ok(());
                }
                out.push(OutStmt::If {
                    test,
                    consequent,
                    alternate,
                    loc,
                });
            }
            BuildNode::ForInCopy { key } => {
                let target = self.serialize_value(entry.args[0], out)?;
                let source = self.serialize_value(entry.args[1], out)?;
                let key_text = self.realm.interns.get(*key).to_owned();
                let key_ident = OutExpr::Ident(key_text.clone());
                let body = vec![OutStmt::Expr {
                    expr: OutExpr::Assign {
                        target: Box::new(OutExpr::Member {
                            object: Box::new(target),
                            property: OutMember::Computed(Box::new(key_ident.clone())),
                        }),
                        value: Box::new(OutExpr::Member {
                            object: Box::new(source.clone()),
                            property: OutMember::Computed(Box::new(key_ident)),
                        }),
                    },
                    loc: None,
                }];
                out.push(OutStmt::ForIn {
                    decl_var: key_text,
                    object: source,
                    body,
                    loc,
                });
            }
            BuildNode::Throw => {
                let argument = self.serialize_value(entry.args[0], out)?;
                out.push(OutStmt::Throw { argument, loc });
            }
        }
        Ok(())
    }

    /// Re-materializes the final global state: `var` declarations in
    /// registration order, then implicit globals.
    fn emit_global_state(&mut self, out: &mut Vec<OutStmt>) -> Result<(), FatalError> {
        let global_object = self.realm.global_object;
        let EnvRecord::Global(global) = &self.realm.envs.get(self.realm.global_env).record else {
            panic!("invariant violated: global environment is not a global record")
        };
        let var_names: Vec<StringId> = global.var_names.iter().copied().collect();

        for name in &var_names {
            let Some(desc) = self.realm.heap.get(global_object).own_property(PropertyKey::Str(*name)).copied()
            else {
                continue;
            };
            let Some(value) = desc.value() else { continue };
            let name_text = self.realm.interns.get(*name).to_owned();

            if let Value::Object(id) = value
                && self.object_names.get(&id).map(String::as_str) == Some(name_text.as_str())
            {
                // The declaration carries the binding's own name.
                self.ensure_declared(id, out)?;
                continue;
            }
            let init = self.serialize_value(value, out)?;
            if let OutExpr::Ident(ident) = &init
                && *ident == name_text
            {
                // The value renders as the binding itself; a declaration
                // would be a self-assignment.
                continue;
            }
            out.push(OutStmt::Var {
                name: name_text,
                init: Some(init),
                loc: None,
            });
        }

        // Implicit globals (created without `var`). Under a partial global
        // these were already re-emitted as residual assignments.
        if !self.realm.flags.partial_global {
            let props: Vec<(PropertyKey, Descriptor)> = self
                .realm
                .heap
                .get(global_object)
                .properties
                .iter()
                .map(|(key, desc)| (*key, *desc))
                .collect();
            for (key, desc) in props {
                if self.realm.initial_global_keys.contains(&key) {
                    continue;
                }
                let Some(name) = key.as_str_id() else { continue };
                if var_names.contains(&name) {
                    continue;
                }
                let Some(value) = desc.value() else { continue };
                let name_text = self.realm.interns.get(name).to_owned();
                let init = self.serialize_value(value, out)?;
                out.push(OutStmt::Expr {
                    expr: OutExpr::Assign {
                        target: Box::new(OutExpr::Ident(name_text)),
                        value: Box::new(init),
                    },
                    loc: None,
                });
            }
        }
        Ok(())
    }

    /// Serializes a value to a source expression: literals for primitives,
    /// identifiers for already-declared abstracts and objects, recursive
    /// initializers for freshly reached objects.
    pub(crate) fn serialize_value(&mut self, value: Value, out: &mut Vec<OutStmt>) -> Result<OutExpr, FatalError> {
        match value {
            Value::Undefined => Ok(OutExpr::Undefined),
            Value::Null => Ok(OutExpr::Null),
            Value::Bool(b) => Ok(OutExpr::Bool(b)),
            Value::Number(n) => Ok(OutExpr::Number(n)),
            Value::Str(id) => Ok(OutExpr::Str(self.realm.interns.get(id).to_owned())),
            Value::Symbol(_) => {
                self.realm.report(
                    ErrorCode::UnsupportedAbstractAccess,
                    Severity::RecoverableError,
                    "symbols cannot be re-materialized in the output",
                );
                Ok(OutExpr::Undefined)
            }
            Value::Object(id) => self.serialize_object(id, out),
            Value::Abstract(id) => {
                if let Some(name) = self.abstract_names.get(&id) {
                    return Ok(OutExpr::Ident(name.clone()));
                }
                self.render_abstract(id, out)
            }
        }
    }

    fn serialize_object(&mut self, id: ObjectId, out: &mut Vec<OutStmt>) -> Result<OutExpr, FatalError> {
        if let Some(path) = self.realm.heap.get(id).intrinsic_path {
            let path_text = self.realm.interns.get(path).to_owned();
            let ident = self.prelude.reference(&path_text, &mut self.names);
            return Ok(OutExpr::Ident(ident));
        }
        if self.declared_objects.contains(&id) {
            let name = self.object_names.get(&id).expect("declared objects are named");
            return Ok(OutExpr::Ident(name.clone()));
        }
        if !self.realm.is_fresh(id) {
            self.realm.report(
                ErrorCode::UnsupportedAbstractAccess,
                Severity::FatalError,
                "reference to a host object without a modeled path",
            );
            return Err(FatalError);
        }
        // Single-use error objects inline as constructor calls.
        if let ObjectBrand::Error(kind) = self.realm.heap.get(id).brand
            && self.ref_counts.get(&id).copied().unwrap_or(0) <= 1
            && !self.object_names.contains_key(&id)
        {
            let kind_name: &'static str = kind.into();
            let message_id = self.realm.interns.common().message;
            let message = self
                .realm
                .heap
                .get(id)
                .own_property(PropertyKey::Str(message_id))
                .and_then(Descriptor::value);
            let args = match message {
                Some(message) => vec![self.serialize_value(message, out)?],
                None => Vec::new(),
            };
            return Ok(OutExpr::New {
                callee: Box::new(OutExpr::Ident(kind_name.to_owned())),
                args,
            });
        }
        self.ensure_declared(id, out)?;
        let name = self.object_names.get(&id).expect("declared objects are named");
        Ok(OutExpr::Ident(name.clone()))
    }

    pub(crate) fn ensure_declared(&mut self, id: ObjectId, out: &mut Vec<OutStmt>) -> Result<(), FatalError> {
        if self.declared_objects.contains(&id) {
            return Ok(());
        }
        let name = match self.object_names.get(&id) {
            Some(name) => name.clone(),
            None => {
                let name = self.names.generate(None);
                self.object_names.insert(id, name.clone());
                name
            }
        };
        // Mark declared before serializing properties so cycles terminate.
        self.declared_objects.insert(id);

        let shell = self.object_shell(id, out)?;
        out.push(OutStmt::Var {
            name: name.clone(),
            init: Some(shell),
            loc: None,
        });

        let props: Vec<(PropertyKey, Descriptor)> = self
            .realm
            .heap
            .get(id)
            .properties
            .iter()
            .map(|(key, desc)| (*key, *desc))
            .collect();
        let brand = self.realm.heap.get(id).brand;
        let is_function = self.realm.heap.get(id).is_function();
        for (key, desc) in props {
            if self.skip_shell_property(id, brand, is_function, key, &desc) {
                continue;
            }
            self.emit_property(id, key, desc, out)?;
        }
        Ok(())
    }

    /// Properties implied by the shell form are not re-emitted.
    fn skip_shell_property(
        &self,
        _id: ObjectId,
        brand: ObjectBrand,
        is_function: bool,
        key: PropertyKey,
        desc: &Descriptor,
    ) -> bool {
        let Some(name) = key.as_str_id() else {
            return false;
        };
        let common = self.realm.interns.common();
        match brand {
            ObjectBrand::Array if name == common.length => true,
            ObjectBrand::Error(_) if name == common.message => true,
            _ if is_function && name == common.prototype => {
                // The automatic `.prototype` (holding only the constructor
                // back-reference) re-creates itself.
                match desc.value() {
                    Some(Value::Object(proto)) => {
                        let data = self.realm.heap.get(proto);
                        data.properties.len() == 1
                            && data.properties.keys().all(|k| k.as_str_id() == Some(common.constructor))
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn object_shell(&mut self, id: ObjectId, out: &mut Vec<OutStmt>) -> Result<OutExpr, FatalError> {
        let data = self.realm.heap.get(id);
        if let Some(call) = data.call.clone() {
            return match call {
                FunctionKind::User { def, env } => {
                    if env != self.realm.global_env {
                        self.realm.report(
                            ErrorCode::UnsupportedClosureResidualization,
                            Severity::FatalError,
                            "function captures a non-global environment",
                        );
                        return Err(FatalError);
                    }
                    match self.function_source(&def) {
                        Some(text) => Ok(OutExpr::Raw(format!("({text})"))),
                        None => {
                            self.realm.report(
                                ErrorCode::UnsupportedClosureResidualization,
                                Severity::FatalError,
                                "function body source is unavailable",
                            );
                            Err(FatalError)
                        }
                    }
                }
                FunctionKind::Native(_) => {
                    self.realm.report(
                        ErrorCode::UnsupportedAbstractAccess,
                        Severity::FatalError,
                        "native function without a modeled path",
                    );
                    Err(FatalError)
                }
            };
        }
        match data.brand {
            ObjectBrand::Array => Ok(OutExpr::ArrayShell),
            ObjectBrand::Ordinary => Ok(OutExpr::ObjectShell),
            ObjectBrand::Error(kind) => {
                let kind_name: &'static str = kind.into();
                let message_id = self.realm.interns.common().message;
                let message = self
                    .realm
                    .heap
                    .get(id)
                    .own_property(PropertyKey::Str(message_id))
                    .and_then(Descriptor::value);
                let args = match message {
                    Some(message) => vec![self.serialize_value(message, out)?],
                    None => Vec::new(),
                };
                Ok(OutExpr::New {
                    callee: Box::new(OutExpr::Ident(kind_name.to_owned())),
                    args,
                })
            }
        }
    }

    /// The verbatim source of a user function definition.
    fn function_source(&self, def: &crate::ast::FunctionDef) -> Option<String> {
        let info = self.sources.get(def.range.source.0 as usize)?;
        let start = info.offset_of(def.range.start)?;
        let end = info.offset_of(def.range.end)?;
        if start > end || end > info.code.len() {
            return None;
        }
        Some(format!("function {}", &info.code[start..end]))
    }

    fn emit_property(
        &mut self,
        id: ObjectId,
        key: PropertyKey,
        desc: Descriptor,
        out: &mut Vec<OutStmt>,
    ) -> Result<(), FatalError> {
        if !self.descriptor_available(&desc) {
            self.deferred_props.push((id, key, desc));
            return Ok(());
        }
        self.emit_property_now(id, key, desc, out)
    }

    fn emit_property_now(
        &mut self,
        id: ObjectId,
        key: PropertyKey,
        desc: Descriptor,
        out: &mut Vec<OutStmt>,
    ) -> Result<(), FatalError> {
        let Some(name_id) = key.as_str_id() else {
            self.realm.report(
                ErrorCode::UnsupportedAbstractAccess,
                Severity::Warning,
                "symbol-keyed property dropped from the output",
            );
            return Ok(());
        };
        let object_name = self.object_names.get(&id).expect("declared objects are named").clone();
        let object_expr = OutExpr::Ident(object_name);
        match desc {
            Descriptor::Data {
                value,
                writable: true,
                enumerable: true,
                configurable: true,
            } => {
                let value = self.serialize_value(value, out)?;
                let target = self.member_by_name(object_expr, name_id);
                out.push(OutStmt::Expr {
                    expr: OutExpr::Assign {
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                    loc: None,
                });
            }
            Descriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => {
                let value = self.serialize_value(value, out)?;
                let key_text = self.realm.interns.get(name_id).to_owned();
                let define = self.prelude.reference("Object.defineProperty", &mut self.names);
                out.push(OutStmt::Expr {
                    expr: OutExpr::Call {
                        callee: Box::new(OutExpr::Ident(define)),
                        args: vec![
                            object_expr,
                            OutExpr::Str(key_text),
                            OutExpr::ObjectLit(vec![
                                ("value".to_owned(), value),
                                ("writable".to_owned(), OutExpr::Bool(writable)),
                                ("enumerable".to_owned(), OutExpr::Bool(enumerable)),
                                ("configurable".to_owned(), OutExpr::Bool(configurable)),
                            ]),
                        ],
                    },
                    loc: None,
                });
            }
            Descriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => {
                let mut entries = Vec::new();
                if let Some(get) = get {
                    entries.push(("get".to_owned(), self.serialize_value(get, out)?));
                }
                if let Some(set) = set {
                    entries.push(("set".to_owned(), self.serialize_value(set, out)?));
                }
                entries.push(("enumerable".to_owned(), OutExpr::Bool(enumerable)));
                entries.push(("configurable".to_owned(), OutExpr::Bool(configurable)));
                let key_text = self.realm.interns.get(name_id).to_owned();
                let define = self.prelude.reference("Object.defineProperty", &mut self.names);
                out.push(OutStmt::Expr {
                    expr: OutExpr::Call {
                        callee: Box::new(OutExpr::Ident(define)),
                        args: vec![object_expr, OutExpr::Str(key_text), OutExpr::ObjectLit(entries)],
                    },
                    loc: None,
                });
            }
        }
        Ok(())
    }

    /// Whether a value can be serialized right now without a forward
    /// reference to a not-yet-declared abstract.
    fn value_available(&self, value: Value) -> bool {
        match value {
            Value::Abstract(id) => {
                if self.abstract_names.contains_key(&id) {
                    return true;
                }
                if self.entry_declared.contains(&id) {
                    return false;
                }
                self.realm.abstracts.get(id).args.iter().all(|arg| self.value_available(*arg))
            }
            _ => true,
        }
    }

    fn descriptor_available(&self, desc: &Descriptor) -> bool {
        match desc {
            Descriptor::Data { value, .. } => self.value_available(*value),
            Descriptor::Accessor { get, set, .. } => {
                get.is_none_or(|get| self.value_available(get)) && set.is_none_or(|set| self.value_available(set))
            }
        }
    }

    /// Emits deferred property assignments whose dependencies have landed.
    fn flush_deferred(&mut self, out: &mut Vec<OutStmt>) -> Result<(), FatalError> {
        loop {
            let mut progressed = false;
            let pending = std::mem::take(&mut self.deferred_props);
            for (id, key, desc) in pending {
                if self.descriptor_available(&desc) {
                    self.emit_property_now(id, key, desc, out)?;
                    progressed = true;
                } else {
                    self.deferred_props.push((id, key, desc));
                }
            }
            if !progressed || self.deferred_props.is_empty() {
                return Ok(());
            }
        }
    }

    /// Renders an abstract value's origin template over its serialized
    /// arguments.
    pub(crate) fn render_abstract(&mut self, id: AbstractId, out: &mut Vec<OutStmt>) -> Result<OutExpr, FatalError> {
        let data = self.realm.abstracts.get(id).clone();
        let arg = |index: usize| data.args.get(index).copied().unwrap_or(Value::Undefined);
        match data.template {
            TemplateSource::Intrinsic(path) => {
                let path_text = self.realm.interns.get(path).to_owned();
                let ident = self.prelude.reference(&path_text, &mut self.names);
                Ok(OutExpr::Ident(ident))
            }
            TemplateSource::Member => {
                let object = self.serialize_value(arg(0), out)?;
                self.member_by_key(object, arg(1), out)
            }
            TemplateSource::Call => {
                let callee = self.serialize_value(arg(0), out)?;
                let mut args = Vec::new();
                for value in data.args.iter().skip(1) {
                    args.push(self.serialize_value(*value, out)?);
                }
                Ok(OutExpr::Call {
                    callee: Box::new(callee),
                    args,
                })
            }
            TemplateSource::New => {
                let callee = self.serialize_value(arg(0), out)?;
                let mut args = Vec::new();
                for value in data.args.iter().skip(1) {
                    args.push(self.serialize_value(*value, out)?);
                }
                Ok(OutExpr::New {
                    callee: Box::new(callee),
                    args,
                })
            }
            TemplateSource::Binary(op) => {
                let left = self.serialize_value(arg(0), out)?;
                let right = self.serialize_value(arg(1), out)?;
                Ok(OutExpr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            TemplateSource::Logical(op) => {
                let left = self.serialize_value(arg(0), out)?;
                let right = self.serialize_value(arg(1), out)?;
                Ok(OutExpr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            TemplateSource::Unary(op) => {
                let argument = self.serialize_value(arg(0), out)?;
                Ok(OutExpr::Unary {
                    op,
                    argument: Box::new(argument),
                })
            }
            TemplateSource::Conditional => {
                let test = self.serialize_value(arg(0), out)?;
                let consequent = self.serialize_value(arg(1), out)?;
                let alternate = self.serialize_value(arg(2), out)?;
                Ok(OutExpr::Conditional {
                    test: Box::new(test),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                })
            }
            TemplateSource::Typeof => {
                let argument = self.serialize_value(arg(0), out)?;
                Ok(OutExpr::Unary {
                    op: UnaryOp::Typeof,
                    argument: Box::new(argument),
                })
            }
        }
    }

    fn global_reference(&mut self) -> OutExpr {
        let ident = self.prelude.reference("this", &mut self.names);
        OutExpr::Ident(ident)
    }

    /// `object.name`, `object[0]`, or `object["key"]` depending on the key's
    /// shape.
    fn member_by_name(&self, object: OutExpr, name: StringId) -> OutExpr {
        let text = self.realm.interns.get(name);
        if is_identifier(text) {
            return OutExpr::Member {
                object: Box::new(object),
                property: OutMember::Dot(text.to_owned()),
            };
        }
        // Canonical array indices print unquoted.
        if let Ok(index) = text.parse::<u32>()
            && index.to_string() == text
        {
            return OutExpr::Member {
                object: Box::new(object),
                property: OutMember::Computed(Box::new(OutExpr::Number(f64::from(index)))),
            };
        }
        OutExpr::Member {
            object: Box::new(object),
            property: OutMember::Computed(Box::new(OutExpr::Str(text.to_owned()))),
        }
    }

    /// Member access with a key that may be any value.
    fn member_by_key(&mut self, object: OutExpr, key: Value, out: &mut Vec<OutStmt>) -> Result<OutExpr, FatalError> {
        if let Value::Str(name) = key {
            return Ok(self.member_by_name(object, name));
        }
        let key = self.serialize_value(key, out)?;
        Ok(OutExpr::Member {
            object: Box::new(object),
            property: OutMember::Computed(Box::new(key)),
        })
    }
}
