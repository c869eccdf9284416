//! The residual-program printer.
//!
//! Implements the printer contract: a final AST in, `{code, map?}` out. The
//! output AST is the small statement/expression language the residualizer
//! emits; residual function bodies are carried as verbatim source fragments
//! sliced from the input. Parenthesization is conservative: a non-primary
//! sub-expression is parenthesized whenever precedence could be ambiguous.

use std::fmt::Write;

use crate::{
    ast::{BinaryOp, CodeRange, LogicalOp, UnaryOp},
    value::format_number,
};

/// An expression in the output program.
#[derive(Debug, Clone)]
pub(crate) enum OutExpr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    /// Prints as `void 0`.
    Undefined,
    Ident(String),
    /// A verbatim source fragment (residualized function bodies).
    Raw(String),
    Member {
        object: Box<OutExpr>,
        property: OutMember,
    },
    Call {
        callee: Box<OutExpr>,
        args: Vec<OutExpr>,
    },
    New {
        callee: Box<OutExpr>,
        args: Vec<OutExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<OutExpr>,
        right: Box<OutExpr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<OutExpr>,
        right: Box<OutExpr>,
    },
    Unary {
        op: UnaryOp,
        argument: Box<OutExpr>,
    },
    Conditional {
        test: Box<OutExpr>,
        consequent: Box<OutExpr>,
        alternate: Box<OutExpr>,
    },
    Assign {
        target: Box<OutExpr>,
        value: Box<OutExpr>,
    },
    /// `{}` shell.
    ObjectShell,
    /// `[]` shell.
    ArrayShell,
    /// `{ key: value, … }`, used for property descriptors.
    ObjectLit(Vec<(String, OutExpr)>),
}

#[derive(Debug, Clone)]
pub(crate) enum OutMember {
    Dot(String),
    Computed(Box<OutExpr>),
}

/// A statement in the output program.
#[derive(Debug, Clone)]
pub(crate) enum OutStmt {
    Var {
        name: String,
        init: Option<OutExpr>,
        loc: Option<CodeRange>,
    },
    Expr {
        expr: OutExpr,
        loc: Option<CodeRange>,
    },
    Throw {
        argument: OutExpr,
        loc: Option<CodeRange>,
    },
    If {
        test: OutExpr,
        consequent: Vec<OutStmt>,
        alternate: Vec<OutStmt>,
        loc: Option<CodeRange>,
    },
    ForIn {
        decl_var: String,
        object: OutExpr,
        body: Vec<OutStmt>,
        loc: Option<CodeRange>,
    },
}

/// A version-3 source map, serialized to JSON by the driver.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceMap {
    pub version: u32,
    pub sources: Vec<String>,
    pub names: Vec<String>,
    pub mappings: String,
}

/// Printer output, per the contract.
#[derive(Debug)]
pub(crate) struct PrintOutput {
    pub code: String,
    pub map: Option<SourceMap>,
}

/// Prints an output program with optional source map generation.
pub(crate) fn print_program(program: &[OutStmt], source_names: Option<&[String]>) -> PrintOutput {
    let mut printer = Printer {
        code: String::new(),
        indent: 0,
        line: 0,
        mappings: source_names.map(|_| Vec::new()),
    };
    for stmt in program {
        printer.stmt(stmt);
    }
    let map = match (printer.mappings, source_names) {
        (Some(mappings), Some(names)) => Some(SourceMap {
            version: 3,
            sources: names.to_vec(),
            names: Vec::new(),
            mappings: encode_mappings(&mappings),
        }),
        _ => None,
    };
    PrintOutput {
        code: printer.code,
        map,
    }
}

/// One mapping: generated (line, column) to original (source, line, column).
/// Lines are 0-based here, matching the source-map encoding.
type Mapping = (u32, u32, u32, u32, u32);

struct Printer {
    code: String,
    indent: usize,
    line: u32,
    mappings: Option<Vec<Mapping>>,
}

impl Printer {
    fn open_line(&mut self, loc: Option<CodeRange>) {
        for _ in 0..self.indent {
            self.code.push_str("  ");
        }
        if let (Some(mappings), Some(loc)) = (self.mappings.as_mut(), loc)
            && loc.start.line > 0
        {
            mappings.push((
                self.line,
                (self.indent * 2) as u32,
                u32::from(loc.source.0),
                loc.start.line - 1,
                loc.start.column,
            ));
        }
    }

    fn close_line(&mut self) {
        self.code.push('\n');
        self.line += 1;
    }

    fn stmt(&mut self, stmt: &OutStmt) {
        match stmt {
            OutStmt::Var { name, init, loc } => {
                self.open_line(*loc);
                match init {
                    Some(init) => {
                        let init = maybe_paren(init, prec::ASSIGN);
                        let _ = write!(self.code, "var {name} = {init};");
                    }
                    None => {
                        let _ = write!(self.code, "var {name};");
                    }
                }
                self.close_line();
            }
            OutStmt::Expr { expr, loc } => {
                self.open_line(*loc);
                let text = expr_to_string(expr);
                let _ = write!(self.code, "{text};");
                self.close_line();
            }
            OutStmt::Throw { argument, loc } => {
                self.open_line(*loc);
                let text = expr_to_string(argument);
                let _ = write!(self.code, "throw {text};");
                self.close_line();
            }
            OutStmt::If {
                test,
                consequent,
                alternate,
                loc,
            } => {
                self.open_line(*loc);
                let test = expr_to_string(test);
                let _ = write!(self.code, "if ({test}) {{");
                self.close_line();
                self.indent += 1;
                for stmt in consequent {
                    self.stmt(stmt);
                }
                self.indent -= 1;
                if alternate.is_empty() {
                    self.open_line(None);
                    self.code.push('}');
                    self.close_line();
                } else {
                    self.open_line(None);
                    self.code.push_str("} else {");
                    self.close_line();
                    self.indent += 1;
                    for stmt in alternate {
                        self.stmt(stmt);
                    }
                    self.indent -= 1;
                    self.open_line(None);
                    self.code.push('}');
                    self.close_line();
                }
            }
            OutStmt::ForIn {
                decl_var,
                object,
                body,
                loc,
            } => {
                self.open_line(*loc);
                let object = expr_to_string(object);
                let _ = write!(self.code, "for (var {decl_var} in {object}) {{");
                self.close_line();
                self.indent += 1;
                for stmt in body {
                    self.stmt(stmt);
                }
                self.indent -= 1;
                self.open_line(None);
                self.code.push('}');
                self.close_line();
            }
        }
    }
}

/// Numeric precedence levels; children printed in a context above their own
/// level get parenthesized. The binary levels mirror the parser's binding
/// powers.
mod prec {
    pub const LOWEST: u8 = 0;
    pub const ASSIGN: u8 = 1;
    pub const CONDITIONAL: u8 = 2;
    pub const UNARY: u8 = 13;
    pub const POSTFIX: u8 = 14;
    pub const PRIMARY: u8 = 15;
}

fn binary_level(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::BitOr => 5,
        BinaryOp::BitXor => 6,
        BinaryOp::BitAnd => 7,
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::StrictEq | BinaryOp::StrictNe => 8,
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::In | BinaryOp::Instanceof => 9,
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => 10,
        BinaryOp::Add | BinaryOp::Sub => 11,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 12,
    }
}

fn logical_level(op: LogicalOp) -> u8 {
    match op {
        LogicalOp::Or => 3,
        LogicalOp::And => 4,
    }
}

fn level_of(expr: &OutExpr) -> u8 {
    match expr {
        OutExpr::Number(n) if *n < 0.0 => prec::UNARY,
        OutExpr::Number(_)
        | OutExpr::Str(_)
        | OutExpr::Bool(_)
        | OutExpr::Null
        | OutExpr::Ident(_)
        | OutExpr::Raw(_)
        | OutExpr::ObjectShell
        | OutExpr::ArrayShell
        | OutExpr::ObjectLit(_) => prec::PRIMARY,
        OutExpr::Undefined | OutExpr::Unary { .. } => prec::UNARY,
        OutExpr::Member { .. } | OutExpr::Call { .. } | OutExpr::New { .. } => prec::POSTFIX,
        OutExpr::Binary { op, .. } => binary_level(*op),
        OutExpr::Logical { op, .. } => logical_level(*op),
        OutExpr::Conditional { .. } => prec::CONDITIONAL,
        OutExpr::Assign { .. } => prec::ASSIGN,
    }
}

fn maybe_paren(expr: &OutExpr, required: u8) -> String {
    let text = expr_to_string(expr);
    if level_of(expr) < required {
        format!("({text})")
    } else {
        text
    }
}

fn expr_to_string(expr: &OutExpr) -> String {
    match expr {
        OutExpr::Number(n) => format_number(*n),
        OutExpr::Str(s) => quote_string(s),
        OutExpr::Bool(b) => if *b { "true" } else { "false" }.to_owned(),
        OutExpr::Null => "null".to_owned(),
        OutExpr::Undefined => "void 0".to_owned(),
        OutExpr::Ident(name) => name.clone(),
        OutExpr::Raw(text) => text.clone(),
        OutExpr::Member { object, property } => {
            let object = maybe_paren(object, prec::POSTFIX);
            match property {
                OutMember::Dot(name) => format!("{object}.{name}"),
                OutMember::Computed(key) => {
                    let key = expr_to_string(key);
                    format!("{object}[{key}]")
                }
            }
        }
        OutExpr::Call { callee, args } => {
            let callee = maybe_paren(callee, prec::POSTFIX);
            let args: Vec<String> = args.iter().map(|arg| maybe_paren(arg, prec::ASSIGN)).collect();
            format!("{callee}({})", args.join(", "))
        }
        OutExpr::New { callee, args } => {
            let callee = maybe_paren(callee, prec::POSTFIX);
            let args: Vec<String> = args.iter().map(|arg| maybe_paren(arg, prec::ASSIGN)).collect();
            format!("new {callee}({})", args.join(", "))
        }
        OutExpr::Binary { op, left, right } => {
            let level = binary_level(*op);
            let left = maybe_paren(left, level);
            let right = maybe_paren(right, level + 1);
            format!("{left} {} {right}", op.symbol())
        }
        OutExpr::Logical { op, left, right } => {
            let symbol = match op {
                LogicalOp::And => "&&",
                LogicalOp::Or => "||",
            };
            let level = logical_level(*op);
            let left = maybe_paren(left, level);
            let right = maybe_paren(right, level + 1);
            format!("{left} {symbol} {right}")
        }
        OutExpr::Unary { op, argument } => {
            let argument = maybe_paren(argument, prec::UNARY);
            match op {
                UnaryOp::Typeof | UnaryOp::Void | UnaryOp::Delete => format!("{} {argument}", op.symbol()),
                _ => format!("{}{argument}", op.symbol()),
            }
        }
        OutExpr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            let test = maybe_paren(test, prec::CONDITIONAL + 1);
            let consequent = maybe_paren(consequent, prec::ASSIGN);
            let alternate = maybe_paren(alternate, prec::ASSIGN);
            format!("{test} ? {consequent} : {alternate}")
        }
        OutExpr::Assign { target, value } => {
            let target = maybe_paren(target, prec::POSTFIX);
            let value = maybe_paren(value, prec::ASSIGN);
            format!("{target} = {value}")
        }
        OutExpr::ObjectShell => "{}".to_owned(),
        OutExpr::ArrayShell => "[]".to_owned(),
        OutExpr::ObjectLit(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("{key}: {}", maybe_paren(value, prec::ASSIGN)))
                .collect();
            format!("{{ {} }}", parts.join(", "))
        }
    }
}

/// Quotes a string literal with double quotes and conservative escaping.
pub(crate) fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

const BASE64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Base64-VLQ encodes one signed value.
fn encode_vlq(value: i64, out: &mut String) {
    let mut vlq = if value < 0 { ((-value) as u64) << 1 | 1 } else { (value as u64) << 1 };
    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

/// Encodes line-grouped mappings into the `mappings` field format.
fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut out = String::new();
    let mut current_line = 0u32;
    let mut prev_gen_col = 0i64;
    let mut prev_source = 0i64;
    let mut prev_line = 0i64;
    let mut prev_col = 0i64;
    for &(gen_line, gen_col, source, line, col) in mappings {
        while current_line < gen_line {
            out.push(';');
            current_line += 1;
            prev_gen_col = 0;
        }
        if out.ends_with(|c: char| c != ';') && !out.is_empty() {
            out.push(',');
        }
        encode_vlq(i64::from(gen_col) - prev_gen_col, &mut out);
        encode_vlq(i64::from(source) - prev_source, &mut out);
        encode_vlq(i64::from(line) - prev_line, &mut out);
        encode_vlq(i64::from(col) - prev_col, &mut out);
        prev_gen_col = i64::from(gen_col);
        prev_source = i64::from(source);
        prev_line = i64::from(line);
        prev_col = i64::from(col);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_var_and_expression() {
        let program = vec![
            OutStmt::Var {
                name: "x".to_owned(),
                init: Some(OutExpr::Number(3.0)),
                loc: None,
            },
            OutStmt::Expr {
                expr: OutExpr::Number(3.0),
                loc: None,
            },
        ];
        let output = print_program(&program, None);
        assert_eq!(output.code, "var x = 3;\n3;\n");
        assert!(output.map.is_none());
    }

    #[test]
    fn prints_member_chains_and_calls() {
        let stmt = OutStmt::Expr {
            expr: OutExpr::Call {
                callee: Box::new(OutExpr::Member {
                    object: Box::new(OutExpr::Ident("console".to_owned())),
                    property: OutMember::Dot("log".to_owned()),
                }),
                args: vec![OutExpr::Str("hi".to_owned())],
            },
            loc: None,
        };
        let output = print_program(&[stmt], None);
        assert_eq!(output.code, "console.log(\"hi\");\n");
    }

    #[test]
    fn parenthesizes_low_precedence_children() {
        let expr = OutExpr::Binary {
            op: BinaryOp::Mul,
            left: Box::new(OutExpr::Binary {
                op: BinaryOp::Add,
                left: Box::new(OutExpr::Number(1.0)),
                right: Box::new(OutExpr::Number(2.0)),
            }),
            right: Box::new(OutExpr::Number(3.0)),
        };
        let output = print_program(
            &[OutStmt::Expr { expr, loc: None }],
            None,
        );
        assert_eq!(output.code, "(1 + 2) * 3;\n");
    }

    #[test]
    fn quote_string_escapes() {
        assert_eq!(quote_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote_string("line\nbreak"), "\"line\\nbreak\"");
        assert_eq!(quote_string("\u{1}"), "\"\\u0001\"");
    }

    #[test]
    fn vlq_encoding_matches_known_values() {
        let mut out = String::new();
        encode_vlq(0, &mut out);
        assert_eq!(out, "A");
        let mut out = String::new();
        encode_vlq(16, &mut out);
        assert_eq!(out, "gB");
        let mut out = String::new();
        encode_vlq(-1, &mut out);
        assert_eq!(out, "D");
    }
}
