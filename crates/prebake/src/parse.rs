//! The bundled source-to-AST front-end.
//!
//! The engine itself is parser-agnostic (§ external interfaces); this module
//! implements that contract for the language subset the evaluator handles: a
//! hand-rolled lexer and recursive-descent parser with minimal automatic
//! semicolon insertion. Parse failures surface as [`ParseError`], which the
//! driver converts into a syntax-error throw completion.

use crate::{
    ast::{
        BinaryOp, CatchClause, CodeRange, Declarator, Expr, ExprLoc, ForInTarget, ForInit, FunctionDef, Literal,
        LogicalOp, MemberProp, Node, Pos, Program, PropertyDef, SourceId, Stmt, SwitchCase, UnaryOp, UpdateOp,
    },
    intern::{Interns, StringId},
    intrinsics::ErrorKind,
};
use std::rc::Rc;

/// Source type, per the parser contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Script,
    /// Modules parse like scripts but are strict by default; `import` and
    /// `export` themselves are not modeled.
    Module,
}

/// A parse failure.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub range: CodeRange,
}

/// Message fragments that identify reference-style early errors; everything
/// else is a syntax error. Part of the parser contract.
const REFERENCE_ERROR_PATTERNS: &[&str] = &["Invalid left-hand side"];

impl ParseError {
    /// Which error constructor the failure maps to when surfaced as a throw
    /// completion.
    #[must_use]
    pub fn error_kind(&self) -> ErrorKind {
        if REFERENCE_ERROR_PATTERNS.iter().any(|p| self.message.contains(p)) {
            ErrorKind::ReferenceError
        } else {
            ErrorKind::SyntaxError
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tok {
    Number(f64),
    Str(StringId),
    Ident(StringId),
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Colon,
    Question,
    Assign,
    OpAssign(BinaryOp),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    UShr,
    PlusPlus,
    MinusMinus,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Var,
    Function,
    If,
    Else,
    While,
    Do,
    For,
    In,
    Break,
    Continue,
    Return,
    Throw,
    Try,
    Catch,
    Finally,
    New,
    Delete,
    Typeof,
    Void,
    Instanceof,
    This,
    Null,
    True,
    False,
    Switch,
    Case,
    Default,
    // Recognized so they produce clear "unsupported" errors instead of
    // misparsing as identifiers.
    With,
    Class,
    Const,
    Let,
    Import,
    Export,
    Debugger,
}

fn keyword_of(word: &str) -> Option<Keyword> {
    Some(match word {
        "var" => Keyword::Var,
        "function" => Keyword::Function,
        "if" => Keyword::If,
        "else" => Keyword::Else,
        "while" => Keyword::While,
        "do" => Keyword::Do,
        "for" => Keyword::For,
        "in" => Keyword::In,
        "break" => Keyword::Break,
        "continue" => Keyword::Continue,
        "return" => Keyword::Return,
        "throw" => Keyword::Throw,
        "try" => Keyword::Try,
        "catch" => Keyword::Catch,
        "finally" => Keyword::Finally,
        "new" => Keyword::New,
        "delete" => Keyword::Delete,
        "typeof" => Keyword::Typeof,
        "void" => Keyword::Void,
        "instanceof" => Keyword::Instanceof,
        "this" => Keyword::This,
        "null" => Keyword::Null,
        "true" => Keyword::True,
        "false" => Keyword::False,
        "switch" => Keyword::Switch,
        "case" => Keyword::Case,
        "default" => Keyword::Default,
        "with" => Keyword::With,
        "class" => Keyword::Class,
        "const" => Keyword::Const,
        "let" => Keyword::Let,
        "import" => Keyword::Import,
        "export" => Keyword::Export,
        "debugger" => Keyword::Debugger,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy)]
struct Token {
    tok: Tok,
    range: CodeRange,
    /// Whether a line terminator preceded this token; drives semicolon
    /// insertion and the restricted productions.
    newline_before: bool,
}

struct Lexer<'i> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    source: SourceId,
    interns: &'i mut Interns,
}

impl<'i> Lexer<'i> {
    fn new(src: &str, source: SourceId, start_line: u32, interns: &'i mut Interns) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: start_line,
            column: 0,
            source,
            interns,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn here(&self) -> Pos {
        Pos {
            line: self.line,
            column: self.column,
        }
    }

    fn error(&self, message: impl Into<String>, start: Pos) -> ParseError {
        ParseError {
            message: message.into(),
            range: CodeRange {
                source: self.source,
                start,
                end: self.here(),
            },
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        let mut newline_before = false;
        loop {
            // Skip whitespace and comments, tracking line terminators.
            loop {
                match self.peek() {
                    Some(c) if c.is_whitespace() => {
                        if c == '\n' {
                            newline_before = true;
                        }
                        self.bump();
                    }
                    Some('/') if self.peek2() == Some('/') => {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    }
                    Some('/') if self.peek2() == Some('*') => {
                        let start = self.here();
                        self.bump();
                        self.bump();
                        let mut closed = false;
                        while let Some(c) = self.bump() {
                            if c == '\n' {
                                newline_before = true;
                            }
                            if c == '*' && self.peek() == Some('/') {
                                self.bump();
                                closed = true;
                                break;
                            }
                        }
                        if !closed {
                            return Err(self.error("unterminated block comment", start));
                        }
                    }
                    _ => break,
                }
            }

            let start = self.here();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    tok: Tok::Eof,
                    range: CodeRange {
                        source: self.source,
                        start,
                        end: start,
                    },
                    newline_before,
                });
                return Ok(tokens);
            };

            let tok = if c.is_ascii_digit() || (c == '.' && self.peek2().is_some_and(|d| d.is_ascii_digit())) {
                self.lex_number(start)?
            } else if c == '"' || c == '\'' {
                self.lex_string(start)?
            } else if c.is_ascii_alphabetic() || c == '_' || c == '$' {
                self.lex_word()
            } else {
                self.lex_punct(start)?
            };

            tokens.push(Token {
                tok,
                range: CodeRange {
                    source: self.source,
                    start,
                    end: self.here(),
                },
                newline_before,
            });
            newline_before = false;
        }
    }

    fn lex_number(&mut self, start: Pos) -> Result<Tok, ParseError> {
        let begin = self.pos;
        if self.peek() == Some('0') && matches!(self.peek2(), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.pos == digits_start {
                return Err(self.error("missing hexadecimal digits", start));
            }
            let text: String = self.chars[digits_start..self.pos].iter().collect();
            let value = u64::from_str_radix(&text, 16)
                .map_err(|_| self.error("hexadecimal literal out of range", start))?;
            return Ok(Tok::Number(value as f64));
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            if self.pos == digits_start {
                return Err(self.error("missing exponent digits", start));
            }
        }
        let text: String = self.chars[begin..self.pos].iter().collect();
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number literal: {text}"), start))?;
        Ok(Tok::Number(value))
    }

    fn lex_string(&mut self, start: Pos) -> Result<Tok, ParseError> {
        let quote = self.bump().expect("string start checked");
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string literal", start));
            };
            if c == quote {
                break;
            }
            if c == '\n' {
                return Err(self.error("unterminated string literal", start));
            }
            if c == '\\' {
                let Some(escaped) = self.bump() else {
                    return Err(self.error("unterminated string literal", start));
                };
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'v' => out.push('\u{b}'),
                    '0' => out.push('\0'),
                    'x' => {
                        let mut code = 0u32;
                        for _ in 0..2 {
                            let Some(d) = self.bump().and_then(|c| c.to_digit(16)) else {
                                return Err(self.error("invalid hexadecimal escape", start));
                            };
                            code = code * 16 + d;
                        }
                        out.push(char::from_u32(code).expect("two hex digits are a valid char"));
                    }
                    'u' => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let Some(d) = self.bump().and_then(|c| c.to_digit(16)) else {
                                return Err(self.error("invalid unicode escape", start));
                            };
                            code = code * 16 + d;
                        }
                        let Some(ch) = char::from_u32(code) else {
                            return Err(self.error("invalid unicode escape", start));
                        };
                        out.push(ch);
                    }
                    '\n' => {}
                    other => out.push(other),
                }
            } else {
                out.push(c);
            }
        }
        Ok(Tok::Str(self.interns.intern(&out)))
    }

    fn lex_word(&mut self) -> Tok {
        let begin = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            self.bump();
        }
        let text: String = self.chars[begin..self.pos].iter().collect();
        match keyword_of(&text) {
            Some(keyword) => Tok::Keyword(keyword),
            None => Tok::Ident(self.interns.intern(&text)),
        }
    }

    fn lex_punct(&mut self, start: Pos) -> Result<Tok, ParseError> {
        let c = self.bump().expect("punct start checked");
        let eat = |lexer: &mut Self, expected: char| -> bool {
            if lexer.peek() == Some(expected) {
                lexer.bump();
                true
            } else {
                false
            }
        };
        let tok = match c {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            ';' => Tok::Semi,
            ',' => Tok::Comma,
            '.' => Tok::Dot,
            ':' => Tok::Colon,
            '?' => Tok::Question,
            '~' => Tok::Tilde,
            '+' => {
                if eat(self, '+') {
                    Tok::PlusPlus
                } else if eat(self, '=') {
                    Tok::OpAssign(BinaryOp::Add)
                } else {
                    Tok::Plus
                }
            }
            '-' => {
                if eat(self, '-') {
                    Tok::MinusMinus
                } else if eat(self, '=') {
                    Tok::OpAssign(BinaryOp::Sub)
                } else {
                    Tok::Minus
                }
            }
            '*' => {
                if eat(self, '=') {
                    Tok::OpAssign(BinaryOp::Mul)
                } else {
                    Tok::Star
                }
            }
            '/' => {
                if eat(self, '=') {
                    Tok::OpAssign(BinaryOp::Div)
                } else {
                    Tok::Slash
                }
            }
            '%' => {
                if eat(self, '=') {
                    Tok::OpAssign(BinaryOp::Mod)
                } else {
                    Tok::Percent
                }
            }
            '=' => {
                if eat(self, '=') {
                    if eat(self, '=') { Tok::EqEqEq } else { Tok::EqEq }
                } else {
                    Tok::Assign
                }
            }
            '!' => {
                if eat(self, '=') {
                    if eat(self, '=') { Tok::NotEqEq } else { Tok::NotEq }
                } else {
                    Tok::Not
                }
            }
            '<' => {
                if eat(self, '<') {
                    if eat(self, '=') { Tok::OpAssign(BinaryOp::Shl) } else { Tok::Shl }
                } else if eat(self, '=') {
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            '>' => {
                if eat(self, '>') {
                    if eat(self, '>') {
                        if eat(self, '=') { Tok::OpAssign(BinaryOp::UShr) } else { Tok::UShr }
                    } else if eat(self, '=') {
                        Tok::OpAssign(BinaryOp::Shr)
                    } else {
                        Tok::Shr
                    }
                } else if eat(self, '=') {
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            '&' => {
                if eat(self, '&') {
                    Tok::AndAnd
                } else if eat(self, '=') {
                    Tok::OpAssign(BinaryOp::BitAnd)
                } else {
                    Tok::Amp
                }
            }
            '|' => {
                if eat(self, '|') {
                    Tok::OrOr
                } else if eat(self, '=') {
                    Tok::OpAssign(BinaryOp::BitOr)
                } else {
                    Tok::Pipe
                }
            }
            '^' => {
                if eat(self, '=') {
                    Tok::OpAssign(BinaryOp::BitXor)
                } else {
                    Tok::Caret
                }
            }
            other => {
                return Err(self.error(format!("unexpected character: {other}"), start));
            }
        };
        Ok(tok)
    }
}

struct Parser<'i> {
    tokens: Vec<Token>,
    pos: usize,
    source: SourceId,
    interns: &'i mut Interns,
    strict: bool,
}

/// Parses one source file into a [`Program`].
pub fn parse(
    src: &str,
    source: SourceId,
    kind: SourceKind,
    start_line: u32,
    interns: &mut Interns,
) -> Result<Program, ParseError> {
    let tokens = Lexer::new(src, source, start_line.max(1), interns).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
        interns,
        strict: kind == SourceKind::Module,
    };
    parser.parse_program()
}

impl Parser<'_> {
    fn current(&self) -> Token {
        self.tokens[self.pos]
    }

    fn peek_tok(&self) -> Tok {
        self.tokens[self.pos].tok
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, tok: Tok) -> bool {
        self.peek_tok() == tok
    }

    fn eat(&mut self, tok: Tok) -> bool {
        if self.at(tok) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<Token, ParseError> {
        if self.at(tok) {
            Ok(self.bump())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            range: self.current().range,
        }
    }

    fn span_from(&self, start: CodeRange) -> CodeRange {
        let end = if self.pos > 0 {
            self.tokens[self.pos - 1].range.end
        } else {
            start.end
        };
        CodeRange {
            source: self.source,
            start: start.start,
            end,
        }
    }

    /// Consumes a statement terminator, applying automatic semicolon
    /// insertion: an explicit `;`, a closing brace, end of input, or a
    /// preceding line terminator all end the statement.
    fn semicolon(&mut self) -> Result<(), ParseError> {
        if self.eat(Tok::Semi) {
            return Ok(());
        }
        if self.at(Tok::RBrace) || self.at(Tok::Eof) || self.current().newline_before {
            return Ok(());
        }
        Err(self.error_here("expected semicolon"))
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        if self.directive_prologue_is_strict() {
            self.strict = true;
        }
        let mut body = Vec::new();
        while !self.at(Tok::Eof) {
            body.push(self.parse_statement()?);
        }
        Ok(Program {
            body,
            strict: self.strict,
            source: self.source,
        })
    }

    /// Checks (without consuming) whether the directive prologue at the
    /// current position contains `"use strict"`.
    fn directive_prologue_is_strict(&self) -> bool {
        let mut i = self.pos;
        while let Tok::Str(id) = self.tokens[i].tok {
            let is_strict = self.interns.get(id) == "use strict";
            let next = self.tokens[i + 1].tok;
            let terminated = next == Tok::Semi || self.tokens[i + 1].newline_before || next == Tok::Eof;
            if !terminated {
                return false;
            }
            if is_strict {
                return true;
            }
            i += if next == Tok::Semi { 2 } else { 1 };
        }
        false
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let start = self.current().range;
        let stmt = match self.peek_tok() {
            Tok::Keyword(Keyword::Var) => {
                self.bump();
                let declarators = self.parse_declarators(true)?;
                self.semicolon()?;
                Stmt::VarDeclaration(declarators)
            }
            Tok::Keyword(Keyword::Function) => {
                self.bump();
                let def = self.parse_function(true)?;
                Stmt::FunctionDeclaration(Rc::new(def))
            }
            Tok::Keyword(Keyword::If) => {
                self.bump();
                self.expect(Tok::LParen, "( after if")?;
                let test = self.parse_expression(true)?;
                self.expect(Tok::RParen, ") after if condition")?;
                let consequent = Box::new(self.parse_statement()?);
                let alternate = if self.eat(Tok::Keyword(Keyword::Else)) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Stmt::If {
                    test,
                    consequent,
                    alternate,
                }
            }
            Tok::LBrace => {
                self.bump();
                let mut body = Vec::new();
                while !self.eat(Tok::RBrace) {
                    if self.at(Tok::Eof) {
                        return Err(self.error_here("unterminated block"));
                    }
                    body.push(self.parse_statement()?);
                }
                Stmt::Block(body)
            }
            Tok::Keyword(Keyword::While) => {
                self.bump();
                self.expect(Tok::LParen, "( after while")?;
                let test = self.parse_expression(true)?;
                self.expect(Tok::RParen, ") after while condition")?;
                let body = Box::new(self.parse_statement()?);
                Stmt::While { test, body }
            }
            Tok::Keyword(Keyword::Do) => {
                self.bump();
                let body = Box::new(self.parse_statement()?);
                if !self.eat(Tok::Keyword(Keyword::While)) {
                    return Err(self.error_here("expected while after do body"));
                }
                self.expect(Tok::LParen, "( after do-while")?;
                let test = self.parse_expression(true)?;
                self.expect(Tok::RParen, ") after do-while condition")?;
                self.eat(Tok::Semi);
                Stmt::DoWhile { body, test }
            }
            Tok::Keyword(Keyword::For) => self.parse_for()?,
            Tok::Keyword(Keyword::Break) => {
                self.bump();
                let label = self.parse_optional_label();
                self.semicolon()?;
                Stmt::Break { label }
            }
            Tok::Keyword(Keyword::Continue) => {
                self.bump();
                let label = self.parse_optional_label();
                self.semicolon()?;
                Stmt::Continue { label }
            }
            Tok::Keyword(Keyword::Return) => {
                self.bump();
                let argument = if self.at(Tok::Semi)
                    || self.at(Tok::RBrace)
                    || self.at(Tok::Eof)
                    || self.current().newline_before
                {
                    None
                } else {
                    Some(self.parse_expression(true)?)
                };
                self.semicolon()?;
                Stmt::Return { argument }
            }
            Tok::Keyword(Keyword::Throw) => {
                self.bump();
                if self.current().newline_before {
                    return Err(self.error_here("newline not allowed after throw"));
                }
                let argument = self.parse_expression(true)?;
                self.semicolon()?;
                Stmt::Throw { argument }
            }
            Tok::Keyword(Keyword::Try) => self.parse_try()?,
            Tok::Keyword(Keyword::Switch) => self.parse_switch()?,
            Tok::Semi => {
                self.bump();
                Stmt::Empty
            }
            Tok::Keyword(
                kw @ (Keyword::With
                | Keyword::Class
                | Keyword::Const
                | Keyword::Let
                | Keyword::Import
                | Keyword::Export
                | Keyword::Debugger),
            ) => {
                return Err(self.error_here(format!("unsupported statement: {kw:?}").to_lowercase()));
            }
            Tok::Ident(name) if self.tokens[self.pos + 1].tok == Tok::Colon => {
                self.bump();
                self.bump();
                let body = Box::new(self.parse_statement()?);
                Stmt::Labeled { label: name, body }
            }
            _ => {
                let expr = self.parse_expression(true)?;
                self.semicolon()?;
                Stmt::Expression(expr)
            }
        };
        Ok(Node {
            stmt,
            range: self.span_from(start),
        })
    }

    fn parse_optional_label(&mut self) -> Option<StringId> {
        if self.current().newline_before {
            return None;
        }
        if let Tok::Ident(name) = self.peek_tok() {
            self.bump();
            Some(name)
        } else {
            None
        }
    }

    fn parse_declarators(&mut self, allow_in: bool) -> Result<Vec<Declarator>, ParseError> {
        let mut declarators = Vec::new();
        loop {
            let start = self.current().range;
            let Tok::Ident(name) = self.peek_tok() else {
                return Err(self.error_here("expected variable name"));
            };
            self.bump();
            let init = if self.eat(Tok::Assign) {
                Some(self.parse_assignment(allow_in)?)
            } else {
                None
            };
            declarators.push(Declarator {
                name,
                init,
                range: self.span_from(start),
            });
            if !self.eat(Tok::Comma) {
                break;
            }
        }
        Ok(declarators)
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        self.bump(); // `for`
        self.expect(Tok::LParen, "( after for")?;

        // for (var …
        if self.eat(Tok::Keyword(Keyword::Var)) {
            let declarators = self.parse_declarators(false)?;
            if self.eat(Tok::Keyword(Keyword::In)) {
                if declarators.len() != 1 || declarators[0].init.is_some() {
                    return Err(self.error_here("invalid for-in loop variable"));
                }
                let right = self.parse_expression(true)?;
                self.expect(Tok::RParen, ") after for-in")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt::ForIn {
                    left: ForInTarget::VarDeclaration(declarators[0].name),
                    right,
                    body,
                });
            }
            return self.parse_for_tail(Some(ForInit::VarDeclaration(declarators)));
        }

        // for (;…
        if self.at(Tok::Semi) {
            return self.parse_for_tail(None);
        }

        let init = self.parse_expression(false)?;
        if self.eat(Tok::Keyword(Keyword::In)) {
            match init.expr {
                Expr::Identifier(_) | Expr::Member { .. } => {}
                _ => return Err(self.error_here("Invalid left-hand side in for-in")),
            }
            let right = self.parse_expression(true)?;
            self.expect(Tok::RParen, ") after for-in")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Stmt::ForIn {
                left: ForInTarget::Expression(init),
                right,
                body,
            });
        }
        self.parse_for_tail(Some(ForInit::Expression(init)))
    }

    fn parse_for_tail(&mut self, init: Option<ForInit>) -> Result<Stmt, ParseError> {
        self.expect(Tok::Semi, "; in for")?;
        let test = if self.at(Tok::Semi) {
            None
        } else {
            Some(self.parse_expression(true)?)
        };
        self.expect(Tok::Semi, "; in for")?;
        let update = if self.at(Tok::RParen) {
            None
        } else {
            Some(self.parse_expression(true)?)
        };
        self.expect(Tok::RParen, ") after for clauses")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        self.bump(); // `try`
        self.expect(Tok::LBrace, "{ after try")?;
        let mut block = Vec::new();
        while !self.eat(Tok::RBrace) {
            if self.at(Tok::Eof) {
                return Err(self.error_here("unterminated try block"));
            }
            block.push(self.parse_statement()?);
        }
        let handler = if self.eat(Tok::Keyword(Keyword::Catch)) {
            self.expect(Tok::LParen, "( after catch")?;
            let Tok::Ident(param) = self.peek_tok() else {
                return Err(self.error_here("expected catch parameter"));
            };
            self.bump();
            self.expect(Tok::RParen, ") after catch parameter")?;
            self.expect(Tok::LBrace, "{ after catch")?;
            let mut body = Vec::new();
            while !self.eat(Tok::RBrace) {
                if self.at(Tok::Eof) {
                    return Err(self.error_here("unterminated catch block"));
                }
                body.push(self.parse_statement()?);
            }
            Some(CatchClause { param, body })
        } else {
            None
        };
        let finalizer = if self.eat(Tok::Keyword(Keyword::Finally)) {
            self.expect(Tok::LBrace, "{ after finally")?;
            let mut body = Vec::new();
            while !self.eat(Tok::RBrace) {
                if self.at(Tok::Eof) {
                    return Err(self.error_here("unterminated finally block"));
                }
                body.push(self.parse_statement()?);
            }
            Some(body)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error_here("try requires catch or finally"));
        }
        Ok(Stmt::Try {
            block,
            handler,
            finalizer,
        })
    }

    fn parse_switch(&mut self) -> Result<Stmt, ParseError> {
        self.bump(); // `switch`
        self.expect(Tok::LParen, "( after switch")?;
        let discriminant = self.parse_expression(true)?;
        self.expect(Tok::RParen, ") after switch discriminant")?;
        self.expect(Tok::LBrace, "{ after switch")?;
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.eat(Tok::RBrace) {
            if self.at(Tok::Eof) {
                return Err(self.error_here("unterminated switch block"));
            }
            let test = if self.eat(Tok::Keyword(Keyword::Case)) {
                Some(self.parse_expression(true)?)
            } else if self.eat(Tok::Keyword(Keyword::Default)) {
                if seen_default {
                    return Err(self.error_here("more than one default clause in switch"));
                }
                seen_default = true;
                None
            } else {
                return Err(self.error_here("expected case or default in switch"));
            };
            self.expect(Tok::Colon, ": after case clause")?;
            let mut body = Vec::new();
            while !matches!(
                self.peek_tok(),
                Tok::Keyword(Keyword::Case) | Tok::Keyword(Keyword::Default) | Tok::RBrace
            ) {
                if self.at(Tok::Eof) {
                    return Err(self.error_here("unterminated switch block"));
                }
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(Stmt::Switch { discriminant, cases })
    }

    fn parse_function(&mut self, require_name: bool) -> Result<FunctionDef, ParseError> {
        let start = self.current().range;
        let name = if let Tok::Ident(name) = self.peek_tok() {
            self.bump();
            Some(name)
        } else {
            if require_name {
                return Err(self.error_here("expected function name"));
            }
            None
        };
        self.expect(Tok::LParen, "( after function name")?;
        let mut params = Vec::new();
        if !self.at(Tok::RParen) {
            loop {
                let Tok::Ident(param) = self.peek_tok() else {
                    return Err(self.error_here("expected parameter name"));
                };
                self.bump();
                params.push(param);
                if !self.eat(Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, ") after parameters")?;
        self.expect(Tok::LBrace, "{ before function body")?;

        let outer_strict = self.strict;
        if self.directive_prologue_is_strict() {
            self.strict = true;
        }
        let mut body = Vec::new();
        while !self.eat(Tok::RBrace) {
            if self.at(Tok::Eof) {
                return Err(self.error_here("unterminated function body"));
            }
            body.push(self.parse_statement()?);
        }
        let strict = self.strict;
        self.strict = outer_strict;

        Ok(FunctionDef {
            name,
            params,
            body,
            strict,
            range: self.span_from(start),
        })
    }

    fn parse_expression(&mut self, allow_in: bool) -> Result<ExprLoc, ParseError> {
        let start = self.current().range;
        let first = self.parse_assignment(allow_in)?;
        if !self.at(Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(Tok::Comma) {
            items.push(self.parse_assignment(allow_in)?);
        }
        Ok(ExprLoc {
            expr: Expr::Sequence(items),
            range: self.span_from(start),
        })
    }

    fn parse_assignment(&mut self, allow_in: bool) -> Result<ExprLoc, ParseError> {
        let start = self.current().range;
        let left = self.parse_conditional(allow_in)?;
        let op = match self.peek_tok() {
            Tok::Assign => None,
            Tok::OpAssign(op) => Some(op),
            _ => return Ok(left),
        };
        match left.expr {
            Expr::Identifier(_) | Expr::Member { .. } => {}
            _ => return Err(self.error_here("Invalid left-hand side in assignment")),
        }
        self.bump();
        let value = self.parse_assignment(allow_in)?;
        Ok(ExprLoc {
            expr: Expr::Assignment {
                op,
                target: Box::new(left),
                value: Box::new(value),
            },
            range: self.span_from(start),
        })
    }

    fn parse_conditional(&mut self, allow_in: bool) -> Result<ExprLoc, ParseError> {
        let start = self.current().range;
        let test = self.parse_binary(0, allow_in)?;
        if !self.eat(Tok::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment(true)?;
        self.expect(Tok::Colon, ": in conditional expression")?;
        let alternate = self.parse_assignment(allow_in)?;
        Ok(ExprLoc {
            expr: Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            range: self.span_from(start),
        })
    }

    /// Binding powers for the binary operators; logical operators are lowest.
    fn binary_power(&self, allow_in: bool) -> Option<(u8, BinaryObject)> {
        let entry = match self.peek_tok() {
            Tok::OrOr => (1, BinaryObject::Logical(LogicalOp::Or)),
            Tok::AndAnd => (2, BinaryObject::Logical(LogicalOp::And)),
            Tok::Pipe => (3, BinaryObject::Binary(BinaryOp::BitOr)),
            Tok::Caret => (4, BinaryObject::Binary(BinaryOp::BitXor)),
            Tok::Amp => (5, BinaryObject::Binary(BinaryOp::BitAnd)),
            Tok::EqEq => (6, BinaryObject::Binary(BinaryOp::Eq)),
            Tok::NotEq => (6, BinaryObject::Binary(BinaryOp::Ne)),
            Tok::EqEqEq => (6, BinaryObject::Binary(BinaryOp::StrictEq)),
            Tok::NotEqEq => (6, BinaryObject::Binary(BinaryOp::StrictNe)),
            Tok::Lt => (7, BinaryObject::Binary(BinaryOp::Lt)),
            Tok::Gt => (7, BinaryObject::Binary(BinaryOp::Gt)),
            Tok::Le => (7, BinaryObject::Binary(BinaryOp::Le)),
            Tok::Ge => (7, BinaryObject::Binary(BinaryOp::Ge)),
            Tok::Keyword(Keyword::Instanceof) => (7, BinaryObject::Binary(BinaryOp::Instanceof)),
            Tok::Keyword(Keyword::In) if allow_in => (7, BinaryObject::Binary(BinaryOp::In)),
            Tok::Shl => (8, BinaryObject::Binary(BinaryOp::Shl)),
            Tok::Shr => (8, BinaryObject::Binary(BinaryOp::Shr)),
            Tok::UShr => (8, BinaryObject::Binary(BinaryOp::UShr)),
            Tok::Plus => (9, BinaryObject::Binary(BinaryOp::Add)),
            Tok::Minus => (9, BinaryObject::Binary(BinaryOp::Sub)),
            Tok::Star => (10, BinaryObject::Binary(BinaryOp::Mul)),
            Tok::Slash => (10, BinaryObject::Binary(BinaryOp::Div)),
            Tok::Percent => (10, BinaryObject::Binary(BinaryOp::Mod)),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_binary(&mut self, min_power: u8, allow_in: bool) -> Result<ExprLoc, ParseError> {
        let start = self.current().range;
        let mut left = self.parse_unary(allow_in)?;
        while let Some((power, op)) = self.binary_power(allow_in) {
            if power < min_power {
                break;
            }
            self.bump();
            let right = self.parse_binary(power + 1, allow_in)?;
            left = ExprLoc {
                expr: match op {
                    BinaryObject::Binary(op) => Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    BinaryObject::Logical(op) => Expr::Logical {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                },
                range: self.span_from(start),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self, allow_in: bool) -> Result<ExprLoc, ParseError> {
        let start = self.current().range;
        let op = match self.peek_tok() {
            Tok::Minus => Some(UnaryOp::Minus),
            Tok::Plus => Some(UnaryOp::Plus),
            Tok::Not => Some(UnaryOp::Not),
            Tok::Tilde => Some(UnaryOp::BitNot),
            Tok::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            Tok::Keyword(Keyword::Void) => Some(UnaryOp::Void),
            Tok::Keyword(Keyword::Delete) => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let argument = self.parse_unary(allow_in)?;
            return Ok(ExprLoc {
                expr: Expr::Unary {
                    op,
                    argument: Box::new(argument),
                },
                range: self.span_from(start),
            });
        }
        if matches!(self.peek_tok(), Tok::PlusPlus | Tok::MinusMinus) {
            let op = if self.bump().tok == Tok::PlusPlus { UpdateOp::Inc } else { UpdateOp::Dec };
            let argument = self.parse_unary(allow_in)?;
            return Ok(ExprLoc {
                expr: Expr::Update {
                    op,
                    prefix: true,
                    argument: Box::new(argument),
                },
                range: self.span_from(start),
            });
        }
        let mut expr = self.parse_call_member(allow_in)?;
        // Postfix update: no line terminator allowed before the operator.
        if matches!(self.peek_tok(), Tok::PlusPlus | Tok::MinusMinus) && !self.current().newline_before {
            let op = if self.bump().tok == Tok::PlusPlus { UpdateOp::Inc } else { UpdateOp::Dec };
            expr = ExprLoc {
                expr: Expr::Update {
                    op,
                    prefix: false,
                    argument: Box::new(expr),
                },
                range: self.span_from(start),
            };
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self, allow_in: bool) -> Result<ExprLoc, ParseError> {
        let start = self.current().range;
        let mut expr = if self.eat(Tok::Keyword(Keyword::New)) {
            let callee = self.parse_member_only(allow_in)?;
            let args = if self.at(Tok::LParen) { self.parse_arguments()? } else { Vec::new() };
            ExprLoc {
                expr: Expr::New {
                    callee: Box::new(callee),
                    args,
                },
                range: self.span_from(start),
            }
        } else {
            self.parse_primary(allow_in)?
        };
        loop {
            match self.peek_tok() {
                Tok::Dot => {
                    self.bump();
                    let name = self.parse_property_name()?;
                    expr = ExprLoc {
                        expr: Expr::Member {
                            object: Box::new(expr),
                            property: MemberProp::Dot(name),
                        },
                        range: self.span_from(start),
                    };
                }
                Tok::LBracket => {
                    self.bump();
                    let key = self.parse_expression(true)?;
                    self.expect(Tok::RBracket, "] after computed member")?;
                    expr = ExprLoc {
                        expr: Expr::Member {
                            object: Box::new(expr),
                            property: MemberProp::Computed(Box::new(key)),
                        },
                        range: self.span_from(start),
                    };
                }
                Tok::LParen => {
                    let args = self.parse_arguments()?;
                    expr = ExprLoc {
                        expr: Expr::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        range: self.span_from(start),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Member expression without call tails, for `new` callees.
    fn parse_member_only(&mut self, allow_in: bool) -> Result<ExprLoc, ParseError> {
        let start = self.current().range;
        let mut expr = self.parse_primary(allow_in)?;
        loop {
            match self.peek_tok() {
                Tok::Dot => {
                    self.bump();
                    let name = self.parse_property_name()?;
                    expr = ExprLoc {
                        expr: Expr::Member {
                            object: Box::new(expr),
                            property: MemberProp::Dot(name),
                        },
                        range: self.span_from(start),
                    };
                }
                Tok::LBracket => {
                    self.bump();
                    let key = self.parse_expression(true)?;
                    self.expect(Tok::RBracket, "] after computed member")?;
                    expr = ExprLoc {
                        expr: Expr::Member {
                            object: Box::new(expr),
                            property: MemberProp::Computed(Box::new(key)),
                        },
                        range: self.span_from(start),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_property_name(&mut self) -> Result<StringId, ParseError> {
        match self.peek_tok() {
            Tok::Ident(name) => {
                self.bump();
                Ok(name)
            }
            // Keywords are valid property names after a dot.
            Tok::Keyword(keyword) => {
                self.bump();
                let text = format!("{keyword:?}").to_lowercase();
                Ok(self.interns.intern(&text))
            }
            _ => Err(self.error_here("expected property name")),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<ExprLoc>, ParseError> {
        self.expect(Tok::LParen, "( before arguments")?;
        let mut args = Vec::new();
        if !self.at(Tok::RParen) {
            loop {
                args.push(self.parse_assignment(true)?);
                if !self.eat(Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, ") after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self, _allow_in: bool) -> Result<ExprLoc, ParseError> {
        let start = self.current().range;
        let expr = match self.peek_tok() {
            Tok::Number(value) => {
                self.bump();
                Expr::Literal(Literal::Number(value))
            }
            Tok::Str(id) => {
                self.bump();
                Expr::Literal(Literal::Str(id))
            }
            Tok::Keyword(Keyword::True) => {
                self.bump();
                Expr::Literal(Literal::Bool(true))
            }
            Tok::Keyword(Keyword::False) => {
                self.bump();
                Expr::Literal(Literal::Bool(false))
            }
            Tok::Keyword(Keyword::Null) => {
                self.bump();
                Expr::Literal(Literal::Null)
            }
            Tok::Keyword(Keyword::This) => {
                self.bump();
                Expr::This
            }
            Tok::Keyword(Keyword::Function) => {
                self.bump();
                let def = self.parse_function(false)?;
                Expr::Function(Rc::new(def))
            }
            Tok::Ident(name) => {
                self.bump();
                Expr::Identifier(name)
            }
            Tok::LParen => {
                self.bump();
                let inner = self.parse_expression(true)?;
                self.expect(Tok::RParen, ") after parenthesized expression")?;
                return Ok(inner);
            }
            Tok::LBracket => {
                self.bump();
                let mut elements = Vec::new();
                while !self.eat(Tok::RBracket) {
                    if self.at(Tok::Eof) {
                        return Err(self.error_here("unterminated array literal"));
                    }
                    if self.eat(Tok::Comma) {
                        elements.push(None);
                        continue;
                    }
                    elements.push(Some(self.parse_assignment(true)?));
                    if !self.at(Tok::RBracket) {
                        self.expect(Tok::Comma, ", in array literal")?;
                    }
                }
                Expr::Array(elements)
            }
            Tok::LBrace => {
                self.bump();
                let mut properties = Vec::new();
                while !self.eat(Tok::RBrace) {
                    if self.at(Tok::Eof) {
                        return Err(self.error_here("unterminated object literal"));
                    }
                    let key = match self.peek_tok() {
                        Tok::Ident(name) => {
                            self.bump();
                            name
                        }
                        Tok::Str(id) => {
                            self.bump();
                            id
                        }
                        Tok::Number(n) => {
                            self.bump();
                            let text = crate::value::format_number(n);
                            self.interns.intern(&text)
                        }
                        Tok::Keyword(keyword) => {
                            self.bump();
                            let text = format!("{keyword:?}").to_lowercase();
                            self.interns.intern(&text)
                        }
                        _ => return Err(self.error_here("expected property key")),
                    };
                    self.expect(Tok::Colon, ": in object literal")?;
                    let value = self.parse_assignment(true)?;
                    properties.push(PropertyDef { key, value });
                    if !self.at(Tok::RBrace) {
                        self.expect(Tok::Comma, ", in object literal")?;
                    }
                }
                Expr::Object(properties)
            }
            _ => return Err(self.error_here("unexpected token in expression")),
        };
        Ok(ExprLoc {
            expr,
            range: self.span_from(start),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum BinaryObject {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let mut interns = Interns::new();
        parse(src, SourceId(0), SourceKind::Script, 1, &mut interns).expect("parse failed")
    }

    fn parse_err(src: &str) -> ParseError {
        let mut interns = Interns::new();
        parse(src, SourceId(0), SourceKind::Script, 1, &mut interns).expect_err("expected parse failure")
    }

    #[test]
    fn parses_var_and_expression() {
        let program = parse_ok("var x = 1 + 2; x;");
        assert_eq!(program.body.len(), 2);
        assert!(matches!(program.body[0].stmt, Stmt::VarDeclaration(_)));
        assert!(matches!(program.body[1].stmt, Stmt::Expression(_)));
        assert!(!program.strict);
    }

    #[test]
    fn strict_directive_is_detected() {
        let program = parse_ok("\"use strict\";\nvar x = 1;");
        assert!(program.strict);
    }

    #[test]
    fn asi_accepts_newlines() {
        let program = parse_ok("var x = 1\nvar y = 2\nx + y");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn for_in_parses() {
        let program = parse_ok("for (var k in o) { t[k] = o[k]; }");
        let Stmt::ForIn { left, .. } = &program.body[0].stmt else {
            panic!("expected for-in");
        };
        assert!(matches!(left, ForInTarget::VarDeclaration(_)));
    }

    #[test]
    fn precedence_binds_correctly() {
        let program = parse_ok("x = 1 + 2 * 3;");
        let Stmt::Expression(expr) = &program.body[0].stmt else {
            panic!("expected expression");
        };
        let Expr::Assignment { value, .. } = &expr.expr else {
            panic!("expected assignment");
        };
        let Expr::Binary { op: BinaryOp::Add, right, .. } = &value.expr else {
            panic!("expected addition at the top");
        };
        assert!(matches!(right.expr, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn invalid_assignment_target_is_reference_flavored() {
        let err = parse_err("1 = 2;");
        assert_eq!(err.error_kind(), ErrorKind::ReferenceError);
        let err = parse_err("var = 1;");
        assert_eq!(err.error_kind(), ErrorKind::SyntaxError);
    }

    #[test]
    fn unsupported_statements_error() {
        let err = parse_err("with (o) { x; }");
        assert!(err.message.contains("unsupported"));
    }

    #[test]
    fn switch_parses_with_default() {
        let program = parse_ok("switch (x) { case 1: a(); break; case 2: default: b(); }");
        let Stmt::Switch { cases, .. } = &program.body[0].stmt else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 3);
        assert!(cases[0].test.is_some());
        assert_eq!(cases[0].body.len(), 2);
        assert!(cases[1].test.is_some());
        assert!(cases[1].body.is_empty());
        assert!(cases[2].test.is_none());
    }

    #[test]
    fn switch_rejects_duplicate_default() {
        let err = parse_err("switch (x) { default: default: }");
        assert!(err.message.contains("default"));
    }

    #[test]
    fn throw_rejects_newline() {
        let err = parse_err("throw\nnew Error('x');");
        assert!(err.message.contains("newline"));
    }

    #[test]
    fn locations_track_lines() {
        let program = parse_ok("var a = 1;\nvar b = 2;");
        assert_eq!(program.body[0].range.start.line, 1);
        assert_eq!(program.body[1].range.start.line, 2);
    }
}
