//! Parser.
//!
//! Turns the token sequence into statements.  Statements are recursive
//! descent, one method per form; expressions are precedence climbing, one
//! method per binding level, tightest at the bottom.  On a parse error the
//! parser discards tokens up to the next statement boundary and resumes, so
//! a single malformed statement damages only itself and several diagnostics
//! can be reported per run.
//!
//! The parser is also where structures live: a declaration registers its
//! sculpture and mould with the session table, and an identifier heading a
//! known sculpture is matched and expanded inline, before resolution ever
//! sees the program.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::ast::{
    Expr, FunDecl, Param, PatternPiece, Placeholder, PlaceholderKind, Sculpture, Stmt, Structure,
    SwitchCase,
};
use crate::ctx::Context;
use crate::diag::{Diagnostic, Position, SyntaxError};
use crate::lexer::Lexer;
use crate::sculpt::{self, Binding, Bindings, StructureTable};
use crate::token::{Lit, Token, TokenKind};
use crate::value::TypeKind;

/// Fetches the source text of an imported unit.  The core only splices the
/// unit's tokens into the current stream; locating and reading the text is
/// the driver's business.
pub trait ImportResolver {
    fn source(&self, unit: &str) -> Result<String, String>;
}

/// Default resolver: refuses every import.
#[derive(Debug, Default)]
pub struct NoImports;

impl ImportResolver for NoImports {
    fn source(&self, unit: &str) -> Result<String, String> {
        Err(format!("no import resolver installed for '{}'", unit))
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    ctx: Rc<Context>,
    structures: Rc<RefCell<StructureTable>>,
    imports: Rc<dyn ImportResolver>,
    diagnostics: Vec<Diagnostic>,
    /// Depth of mould bodies being parsed; sharps are only legal inside one.
    mould_depth: u32,
}

impl Parser {
    pub fn new(
        tokens: Vec<Token>,
        ctx: Rc<Context>,
        structures: Rc<RefCell<StructureTable>>,
        imports: Rc<dyn ImportResolver>,
    ) -> Parser {
        Parser {
            tokens,
            pos: 0,
            ctx,
            structures,
            imports,
            diagnostics: Vec::new(),
            mould_depth: 0,
        }
    }

    /// Parses the whole token sequence.  Statements that parsed cleanly are
    /// returned even when others did not; the diagnostics tell the caller
    /// whether the program is usable.
    pub fn parse_program(mut self) -> (Vec<Stmt>, Vec<Diagnostic>) {
        let mut program = vec![];
        while !self.at_end() {
            match self.declaration() {
                Ok(stmt) => program.push(stmt),
                Err(diagnostic) => {
                    self.diagnostics.push(diagnostic);
                    self.synchronize();
                }
            }
        }
        debug!(
            "parsed {} statements, {} diagnostics",
            program.len(),
            self.diagnostics.len()
        );
        (program, self.diagnostics)
    }

    /// Parses a single expression; used by tests and interactive probes.
    pub fn parse_expression(mut self) -> Result<Expr, Diagnostic> {
        self.expression()
    }

    // ---- statements ----------------------------------------------------

    fn declaration(&mut self) -> Result<Stmt, Diagnostic> {
        match self.current_kind() {
            TokenKind::TyInt
            | TokenKind::TyDouble
            | TokenKind::TyChar
            | TokenKind::TyString
            | TokenKind::TyBool
            | TokenKind::TyVar => self.var_decl(),
            TokenKind::Function => self.fun_decl().map(Stmt::Fun),
            TokenKind::Class => self.class_decl(),
            TokenKind::Structure => self.structure_decl(),
            TokenKind::Import => self.import_decl(),
            _ => self.statement(),
        }
    }

    fn var_decl(&mut self) -> Result<Stmt, Diagnostic> {
        let ty = declared_type(self.current_kind());
        self.advance();
        let name_token = self.consume(TokenKind::Identifier, SyntaxError::ExpectedIdentifier)?;
        let init = if self.eat(TokenKind::Equal) {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        self.consume_semicolon()?;
        Ok(Stmt::Decl {
            ty,
            name: name_token.lexeme,
            pos: name_token.pos,
            init,
        })
    }

    fn fun_decl(&mut self) -> Result<Rc<FunDecl>, Diagnostic> {
        self.advance(); // `function`
        let name_token = self.consume(TokenKind::Identifier, SyntaxError::ExpectedIdentifier)?;
        self.consume_expected(TokenKind::LeftParen)?;
        let mut params = vec![];
        if !self.check(TokenKind::RightParen) {
            loop {
                let ty = declared_type(self.current_kind());
                if ty == TypeKind::Void {
                    return Err(self.error_here(SyntaxError::ExpectedTypeName));
                }
                self.advance();
                let param_token =
                    self.consume(TokenKind::Identifier, SyntaxError::ExpectedIdentifier)?;
                params.push(Param {
                    ty,
                    name: param_token.lexeme,
                    pos: param_token.pos,
                });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume_expected(TokenKind::RightParen)?;
        let body = self.brace_body()?;
        Ok(Rc::new(FunDecl {
            name: name_token.lexeme,
            pos: name_token.pos,
            params,
            body,
        }))
    }

    fn class_decl(&mut self) -> Result<Stmt, Diagnostic> {
        self.advance(); // `class`
        let name_token = self.consume(TokenKind::Identifier, SyntaxError::ExpectedIdentifier)?;
        self.consume_expected(TokenKind::LeftCurly)?;
        let mut methods = vec![];
        while !self.check(TokenKind::RightCurly) && !self.at_end() {
            if !self.check(TokenKind::Function) {
                return Err(self.error_here(SyntaxError::UnexpectedToken {
                    expected: "a method declaration".to_string(),
                }));
            }
            methods.push(self.fun_decl()?);
        }
        self.consume_expected(TokenKind::RightCurly)?;
        Ok(Stmt::ClassDecl {
            name: name_token.lexeme,
            pos: name_token.pos,
            methods,
        })
    }

    /// `structure <word> <pieces...> => { mould }`
    fn structure_decl(&mut self) -> Result<Stmt, Diagnostic> {
        if self.mould_depth > 0 {
            return Err(self.error_here(SyntaxError::UnexpectedToken {
                expected: "a statement (structures cannot be declared inside a mould)".to_string(),
            }));
        }
        self.advance(); // `structure`
        if !self.check(TokenKind::Identifier) {
            return Err(self.error_here(SyntaxError::SculptureNeedsKeyword));
        }
        let name_token = self.advance();

        let mut pieces = vec![];
        let mut names: Vec<crate::interner::Symbol> = vec![];
        while !self.check(TokenKind::Arrow) {
            if self.at_end() {
                return Err(self.error_here(SyntaxError::UnexpectedToken {
                    expected: "'=>'".to_string(),
                }));
            }
            if self.check(TokenKind::Less) {
                // Inside a sculpture `<` always opens a placeholder.
                let place = self.placeholder()?;
                if names.iter().any(|n| *n == place.name) {
                    return Err(self.error_here(SyntaxError::DuplicatePlaceholder(
                        place.name.name().to_string(),
                    )));
                }
                names.push(place.name.clone());
                pieces.push(PatternPiece::Place(place));
            } else {
                pieces.push(PatternPiece::Literal(self.advance()));
            }
        }
        self.consume_expected(TokenKind::Arrow)?;

        if !self.check(TokenKind::LeftCurly) {
            return Err(self.error_here(SyntaxError::UnexpectedToken {
                expected: "'{' to open the mould".to_string(),
            }));
        }
        self.mould_depth += 1;
        let mould = self.statement();
        self.mould_depth -= 1;
        let mould = mould?;

        let structure = Rc::new(Structure {
            sculpture: Sculpture {
                name: name_token.lexeme.clone(),
                pieces,
            },
            mould,
        });
        if let Some(dangling) = sculpt::unknown_sharp(&structure) {
            return Err(Diagnostic {
                pos: name_token.pos,
                lexeme: Some(name_token.lexeme.name().to_string()),
                error: SyntaxError::UnknownSharp(dangling.name().to_string()),
            });
        }
        debug!("declared structure '{}'", name_token.lexeme);
        self.structures.borrow_mut().declare(structure.clone());
        Ok(Stmt::Structure(structure))
    }

    fn placeholder(&mut self) -> Result<Placeholder, Diagnostic> {
        self.consume_expected(TokenKind::Less)?;
        let name_token = self.consume(TokenKind::Identifier, SyntaxError::ExpectedIdentifier)?;
        self.consume_expected(TokenKind::Colon)?;
        let kind_token = self.consume(TokenKind::Identifier, SyntaxError::BadPlaceholderKind)?;
        let kind = match kind_token.lexeme.name() {
            "expression" => PlaceholderKind::Expression,
            "statement" => PlaceholderKind::Statement,
            _ => return Err(self.error_at(&kind_token, SyntaxError::BadPlaceholderKind)),
        };
        self.consume_expected(TokenKind::Greater)?;
        Ok(Placeholder {
            name: name_token.lexeme,
            kind,
        })
    }

    /// Matches a call site against a declared sculpture and expands it.
    /// The leading identifier has been checked against the table already.
    fn structure_use(&mut self, structure: Rc<Structure>) -> Result<Stmt, Diagnostic> {
        let name_token = self.advance();
        let mut bindings = Bindings::new();
        for piece in &structure.sculpture.pieces {
            match piece {
                PatternPiece::Literal(expected) => {
                    if self.current().same_spelling(expected) {
                        self.advance();
                    } else {
                        return Err(self.error_here(SyntaxError::SculptureMismatch(
                            name_token.lexeme.name().to_string(),
                        )));
                    }
                }
                PatternPiece::Place(place) => {
                    let binding = match place.kind {
                        PlaceholderKind::Expression => Binding::Expr(self.expression()?),
                        PlaceholderKind::Statement => Binding::Stmt(self.declaration()?),
                    };
                    bindings.insert(place.name.clone(), binding);
                }
            }
        }
        // A pattern ending in an expression leaves its terminator behind.
        self.eat(TokenKind::Semicolon);

        let body = sculpt::instantiate(&self.ctx, &structure, &bindings);
        debug!("expanded structure '{}'", name_token.lexeme);
        Ok(Stmt::Expansion {
            name: name_token.lexeme,
            body: Box::new(body),
        })
    }

    /// `import "unit";` — fetches the unit through the driver's resolver
    /// and splices its tokens into the stream at the current position.
    fn import_decl(&mut self) -> Result<Stmt, Diagnostic> {
        self.advance(); // `import`
        let unit_token = self.consume(TokenKind::StrLit, SyntaxError::ExpectedExpression)?;
        self.consume_semicolon()?;
        let unit = match &unit_token.literal {
            Some(Lit::Str(s)) => s.to_string(),
            _ => String::new(),
        };
        let text = match self.imports.source(&unit) {
            Ok(text) => text,
            Err(message) => {
                return Err(self.error_at(&unit_token, SyntaxError::ImportFailed(message)))
            }
        };
        let (mut spliced, mut import_diagnostics) = Lexer::new(&text, self.ctx.clone()).scan();
        self.diagnostics.append(&mut import_diagnostics);
        spliced.pop(); // the imported unit's Eof
        debug!("import '{}': spliced {} tokens", unit, spliced.len());
        self.tokens.splice(self.pos..self.pos, spliced);
        Ok(Stmt::Nop)
    }

    fn statement(&mut self) -> Result<Stmt, Diagnostic> {
        match self.current_kind() {
            TokenKind::LeftCurly => Ok(Stmt::Block(self.brace_body()?)),
            TokenKind::If => self.if_stmt(),
            TokenKind::While => self.while_stmt(),
            TokenKind::Do => self.do_while_stmt(),
            TokenKind::For => self.for_stmt(),
            TokenKind::Switch => self.switch_stmt(),
            TokenKind::Break => {
                let pos = self.advance().pos;
                self.consume_semicolon()?;
                Ok(Stmt::Break(pos))
            }
            TokenKind::Continue => {
                let pos = self.advance().pos;
                self.consume_semicolon()?;
                Ok(Stmt::Continue(pos))
            }
            TokenKind::Exit => {
                let pos = self.advance().pos;
                self.consume_semicolon()?;
                Ok(Stmt::Exit(pos))
            }
            TokenKind::Return => {
                let pos = self.advance().pos;
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.expression()?))
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return { value, pos })
            }
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Nop)
            }
            TokenKind::Identifier => {
                let head = self.current().lexeme.clone();
                let known = self.structures.borrow().lookup(&head);
                match known {
                    Some(structure) => self.structure_use(structure),
                    None => self.expr_stmt(),
                }
            }
            _ => self.expr_stmt(),
        }
    }

    fn expr_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = Box::new(self.expression()?);
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    /// `{ decls... }` as a raw statement list: blocks, function bodies and
    /// moulds all share it.
    fn brace_body(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.consume_expected(TokenKind::LeftCurly)?;
        let mut stmts = vec![];
        while !self.check(TokenKind::RightCurly) && !self.at_end() {
            stmts.push(self.declaration()?);
        }
        self.consume_expected(TokenKind::RightCurly)?;
        Ok(stmts)
    }

    fn if_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        self.advance();
        self.consume_expected(TokenKind::LeftParen)?;
        let cond = Box::new(self.expression()?);
        self.consume_expected(TokenKind::RightParen)?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.eat(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn while_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        self.advance();
        self.consume_expected(TokenKind::LeftParen)?;
        let cond = Box::new(self.expression()?);
        self.consume_expected(TokenKind::RightParen)?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { cond, body })
    }

    fn do_while_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        self.advance();
        let body = Box::new(self.statement()?);
        self.consume_expected(TokenKind::While)?;
        self.consume_expected(TokenKind::LeftParen)?;
        let cond = Box::new(self.expression()?);
        self.consume_expected(TokenKind::RightParen)?;
        self.consume_semicolon()?;
        Ok(Stmt::DoWhile { body, cond })
    }

    fn for_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        self.advance();
        self.consume_expected(TokenKind::LeftParen)?;
        let init = match self.current_kind() {
            TokenKind::Semicolon => {
                self.advance();
                Stmt::Nop
            }
            TokenKind::TyInt
            | TokenKind::TyDouble
            | TokenKind::TyChar
            | TokenKind::TyString
            | TokenKind::TyBool
            | TokenKind::TyVar => self.var_decl()?,
            _ => self.expr_stmt()?,
        };
        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        self.consume_semicolon()?;
        let incr = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        self.consume_expected(TokenKind::RightParen)?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init: Box::new(init),
            cond,
            incr,
            body,
        })
    }

    fn switch_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.advance().pos;
        self.consume_expected(TokenKind::LeftParen)?;
        let mut controls = vec![self.expression()?];
        while self.eat(TokenKind::Comma) {
            controls.push(self.expression()?);
        }
        self.consume_expected(TokenKind::RightParen)?;
        self.consume_expected(TokenKind::LeftCurly)?;

        let mut cases = vec![];
        let mut default = None;
        while !self.check(TokenKind::RightCurly) && !self.at_end() {
            match self.current_kind() {
                TokenKind::Case => {
                    let case_pos = self.advance().pos;
                    let mut tests = vec![self.expression()?];
                    while self.eat(TokenKind::Comma) {
                        tests.push(self.expression()?);
                    }
                    self.consume_expected(TokenKind::Colon)?;
                    let body = self.case_body()?;
                    cases.push(SwitchCase {
                        tests,
                        body,
                        pos: case_pos,
                    });
                }
                TokenKind::Default => {
                    if default.is_some() {
                        return Err(self.error_here(SyntaxError::UnexpectedToken {
                            expected: "'}' (only one default case)".to_string(),
                        }));
                    }
                    self.advance();
                    self.consume_expected(TokenKind::Colon)?;
                    default = Some(self.case_body()?);
                }
                _ => {
                    return Err(self.error_here(SyntaxError::UnexpectedToken {
                        expected: "'case' or 'default'".to_string(),
                    }))
                }
            }
        }
        self.consume_expected(TokenKind::RightCurly)?;
        Ok(Stmt::Switch {
            controls,
            cases,
            default,
            pos,
        })
    }

    fn case_body(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        let mut stmts = vec![];
        while !matches!(
            self.current_kind(),
            TokenKind::Case | TokenKind::Default | TokenKind::RightCurly | TokenKind::Eof
        ) {
            stmts.push(self.declaration()?);
        }
        Ok(stmts)
    }

    // ---- expressions, loosest binding first ----------------------------

    fn expression(&mut self) -> Result<Expr, Diagnostic> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, Diagnostic> {
        let lhs = self.conditional()?;

        // Postfix `++`/`--` desugar to `name = name <op> 1`.
        if matches!(
            self.current_kind(),
            TokenKind::PlusPlus | TokenKind::MinusMinus
        ) {
            let op = self.advance();
            let one = one_literal(op.pos);
            return self.desugared_assign(lhs, op, one);
        }

        let op = match self.current_kind() {
            TokenKind::Equal
            | TokenKind::PlusEqual
            | TokenKind::MinusEqual
            | TokenKind::StarEqual
            | TokenKind::SlashEqual
            | TokenKind::PercentEqual
            | TokenKind::CaretEqual => self.advance(),
            _ => return Ok(lhs),
        };
        let value = self.assignment()?;

        if op.kind == TokenKind::Equal {
            return match lhs {
                Expr::Variable { name, .. } => Ok(Expr::Assign {
                    name,
                    id: self.ctx.fresh_id(),
                    op,
                    value: Box::new(value),
                }),
                Expr::Get { object, name, pos } => Ok(Expr::Set {
                    object,
                    name,
                    pos,
                    value: Box::new(value),
                }),
                _ => Err(self.error_at(&op, SyntaxError::InvalidAssignmentTarget)),
            };
        }
        self.desugared_assign(lhs, op, value)
    }

    /// Builds `name = name <bare op> rhs` from a compound assignment.  The
    /// re-read of the variable is a fresh node so it resolves on its own.
    fn desugared_assign(
        &mut self,
        lhs: Expr,
        op: Token,
        rhs: Expr,
    ) -> Result<Expr, Diagnostic> {
        let (name, pos) = match &lhs {
            Expr::Variable { name, pos, .. } => (name.clone(), *pos),
            _ => return Err(self.error_at(&op, SyntaxError::InvalidAssignmentTarget)),
        };
        let bare = bare_operator(&op, &self.ctx);
        let current = Expr::Variable {
            name: name.clone(),
            id: self.ctx.fresh_id(),
            pos,
        };
        Ok(Expr::Assign {
            name,
            id: self.ctx.fresh_id(),
            op,
            value: Box::new(Expr::Binary {
                op: bare,
                lhs: Box::new(current),
                rhs: Box::new(rhs),
            }),
        })
    }

    fn conditional(&mut self) -> Result<Expr, Diagnostic> {
        let cond = self.logic_or()?;
        if !self.eat(TokenKind::Question) {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.consume_expected(TokenKind::Colon)?;
        // Right-associative: `a ? b : c ? d : e` nests in the else arm.
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logic_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.logic_nand_nor()?;
        while self.check(TokenKind::Or) {
            let op = self.advance();
            expr = Expr::Logical {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.logic_nand_nor()?),
            };
        }
        Ok(expr)
    }

    /// `nand` and `nor` share one binding class, left-associative.
    fn logic_nand_nor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.logic_and()?;
        while matches!(self.current_kind(), TokenKind::Nand | TokenKind::Nor) {
            let op = self.advance();
            expr = Expr::Logical {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.logic_and()?),
            };
        }
        Ok(expr)
    }

    fn logic_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.implication()?;
        while self.check(TokenKind::And) {
            let op = self.advance();
            expr = Expr::Logical {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.implication()?),
            };
        }
        Ok(expr)
    }

    fn implication(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.equality()?;
        while self.check(TokenKind::Implies) {
            let op = self.advance();
            expr = Expr::Logical {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.equality()?),
            };
        }
        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.comparison()?;
        while matches!(
            self.current_kind(),
            TokenKind::EqualEqual | TokenKind::BangEqual
        ) {
            let op = self.advance();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.comparison()?),
            };
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.term()?;
        while matches!(
            self.current_kind(),
            TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual
        ) {
            let op = self.advance();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.term()?),
            };
        }
        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.factor()?;
        while matches!(self.current_kind(), TokenKind::Plus | TokenKind::Minus) {
            let op = self.advance();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.factor()?),
            };
        }
        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.power()?;
        while matches!(
            self.current_kind(),
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent
        ) {
            let op = self.advance();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(self.power()?),
            };
        }
        Ok(expr)
    }

    /// Exponentiation is right-associative: `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`.
    fn power(&mut self) -> Result<Expr, Diagnostic> {
        let base = self.unary()?;
        if self.check(TokenKind::Caret) {
            let op = self.advance();
            return Ok(Expr::Binary {
                op,
                lhs: Box::new(base),
                rhs: Box::new(self.power()?),
            });
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, Diagnostic> {
        match self.current_kind() {
            TokenKind::Bang | TokenKind::Minus => {
                let op = self.advance();
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(self.unary()?),
                })
            }
            TokenKind::Pipe => {
                let op = self.advance();
                let operand = Box::new(self.expression()?);
                self.consume_expected(TokenKind::Pipe)?;
                Ok(Expr::Unary { op, operand })
            }
            _ => self.call(),
        }
    }

    fn call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.primary()?;
        loop {
            match self.current_kind() {
                TokenKind::LeftParen => {
                    let paren = self.advance();
                    let mut args = vec![];
                    if !self.check(TokenKind::RightParen) {
                        loop {
                            args.push(self.expression()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.consume_expected(TokenKind::RightParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        paren,
                        args,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let name_token =
                        self.consume(TokenKind::Identifier, SyntaxError::ExpectedIdentifier)?;
                    expr = Expr::Get {
                        object: Box::new(expr),
                        name: name_token.lexeme,
                        pos: name_token.pos,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, Diagnostic> {
        match self.current_kind() {
            TokenKind::IntLit
            | TokenKind::DoubleLit
            | TokenKind::CharLit
            | TokenKind::StrLit
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Any => {
                let token = self.advance();
                match token.literal {
                    Some(value) => Ok(Expr::Literal {
                        value,
                        pos: token.pos,
                    }),
                    None => Err(self.error_at(&token, SyntaxError::ExpectedExpression)),
                }
            }
            TokenKind::Identifier => {
                let token = self.advance();
                Ok(Expr::Variable {
                    name: token.lexeme,
                    id: self.ctx.fresh_id(),
                    pos: token.pos,
                })
            }
            TokenKind::This => {
                let token = self.advance();
                Ok(Expr::This {
                    id: self.ctx.fresh_id(),
                    pos: token.pos,
                })
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume_expected(TokenKind::RightParen)?;
                Ok(Expr::Group(Box::new(expr)))
            }
            TokenKind::SharpSign if self.mould_depth > 0 => {
                let sharp = self.advance();
                let name_token =
                    self.consume(TokenKind::Identifier, SyntaxError::ExpectedIdentifier)?;
                Ok(Expr::Sharp {
                    name: name_token.lexeme,
                    pos: sharp.pos,
                })
            }
            _ => Err(self.error_here(SyntaxError::ExpectedExpression)),
        }
    }

    // ---- token plumbing ------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn current_kind(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    fn at_end(&self) -> bool {
        self.current_kind() == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if !self.at_end() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, error: SyntaxError) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(error))
        }
    }

    fn consume_expected(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        self.consume(
            kind,
            SyntaxError::UnexpectedToken {
                expected: format!("'{}'", kind),
            },
        )
    }

    fn consume_semicolon(&mut self) -> Result<(), Diagnostic> {
        self.consume_expected(TokenKind::Semicolon).map(|_| ())
    }

    fn error_here(&self, error: SyntaxError) -> Diagnostic {
        let token = self.current().clone();
        self.error_at(&token, error)
    }

    fn error_at(&self, token: &Token, error: SyntaxError) -> Diagnostic {
        Diagnostic {
            pos: token.pos,
            lexeme: if token.kind == TokenKind::Eof {
                None
            } else {
                Some(token.lexeme.name().to_string())
            },
            error,
        }
    }

    /// Discards tokens until a statement boundary: just past a semicolon,
    /// or in front of a token that can begin a statement.
    fn synchronize(&mut self) {
        while !self.at_end() {
            if self.current_kind() == TokenKind::Semicolon {
                self.advance();
                return;
            }
            match self.current_kind() {
                TokenKind::If
                | TokenKind::While
                | TokenKind::Do
                | TokenKind::For
                | TokenKind::Switch
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Exit
                | TokenKind::Return
                | TokenKind::Function
                | TokenKind::Class
                | TokenKind::Structure
                | TokenKind::Import
                | TokenKind::LeftCurly
                | TokenKind::TyInt
                | TokenKind::TyDouble
                | TokenKind::TyChar
                | TokenKind::TyString
                | TokenKind::TyBool
                | TokenKind::TyVar => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("pos", &self.pos)
            .field("tokens", &self.tokens.len())
            .field("mould_depth", &self.mould_depth)
            .finish()
    }
}

fn declared_type(kind: TokenKind) -> TypeKind {
    match kind {
        TokenKind::TyInt => TypeKind::Int,
        TokenKind::TyDouble => TypeKind::Double,
        TokenKind::TyChar => TypeKind::Char,
        TokenKind::TyString => TypeKind::Str,
        TokenKind::TyBool => TypeKind::Bool,
        TokenKind::TyVar => TypeKind::Dynamic,
        _ => TypeKind::Void,
    }
}

/// The binary operator a compound assignment applies: `+=`/`++` add, and so
/// on.
fn bare_operator(op: &Token, ctx: &Context) -> Token {
    let (kind, text) = match op.kind {
        TokenKind::PlusEqual | TokenKind::PlusPlus => (TokenKind::Plus, "+"),
        TokenKind::MinusEqual | TokenKind::MinusMinus => (TokenKind::Minus, "-"),
        TokenKind::StarEqual => (TokenKind::Star, "*"),
        TokenKind::SlashEqual => (TokenKind::Slash, "/"),
        TokenKind::PercentEqual => (TokenKind::Percent, "%"),
        TokenKind::CaretEqual => (TokenKind::Caret, "^"),
        _ => (op.kind, op.lexeme.name()),
    };
    Token::new(kind, ctx.symbol(text), None, op.pos)
}

fn one_literal(pos: Position) -> Expr {
    Expr::Literal {
        value: Lit::Int(1),
        pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_prg(input: &str) -> (Vec<Stmt>, Vec<Diagnostic>) {
        let ctx = Context::new();
        parse_prg_with_ctx(ctx, input)
    }

    fn parse_prg_with_ctx(ctx: Rc<Context>, input: &str) -> (Vec<Stmt>, Vec<Diagnostic>) {
        let (tokens, lex_diags) = Lexer::new(input, ctx.clone()).scan();
        assert!(lex_diags.is_empty(), "lexical errors: {:?}", lex_diags);
        let parser = Parser::new(
            tokens,
            ctx,
            Rc::new(RefCell::new(StructureTable::new())),
            Rc::new(NoImports),
        );
        parser.parse_program()
    }

    fn parse_ok(input: &str) -> Vec<Stmt> {
        let (stmts, diags) = parse_prg(input);
        assert!(diags.is_empty(), "diagnostics: {:?}", diags);
        stmts
    }

    fn parse_expr(input: &str) -> Expr {
        let ctx = Context::new();
        let (tokens, lex_diags) = Lexer::new(input, ctx.clone()).scan();
        assert!(lex_diags.is_empty());
        let parser = Parser::new(
            tokens,
            ctx,
            Rc::new(RefCell::new(StructureTable::new())),
            Rc::new(NoImports),
        );
        parser.parse_expression().expect("parse error")
    }

    fn binary_op(expr: &Expr) -> TokenKind {
        match expr {
            Expr::Binary { op, .. } => op.kind,
            other => panic!("not a binary expression: {:?}", other),
        }
    }

    #[test]
    fn factors_bind_tighter_than_terms() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        match parse_expr("1 + 2 * 3") {
            Expr::Binary { op, rhs, .. } => {
                assert_eq!(op.kind, TokenKind::Plus);
                assert_eq!(binary_op(&rhs), TokenKind::Star);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn power_binds_tighter_than_factor_and_right_assoc() {
        match parse_expr("2 * 3 ^ 4 ^ 5") {
            Expr::Binary { op, rhs, .. } => {
                assert_eq!(op.kind, TokenKind::Star);
                match *rhs {
                    Expr::Binary { op, rhs, .. } => {
                        assert_eq!(op.kind, TokenKind::Caret);
                        assert_eq!(binary_op(&rhs), TokenKind::Caret);
                    }
                    other => panic!("unexpected parse: {:?}", other),
                }
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn addition_is_left_associative() {
        match parse_expr("1 + 2 + 3") {
            Expr::Binary { op, lhs, .. } => {
                assert_eq!(op.kind, TokenKind::Plus);
                assert_eq!(binary_op(&lhs), TokenKind::Plus);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn implication_binds_tighter_than_and_than_nand_than_or() {
        // a or b nand c and d implies e
        // = a or (b nand ((c and (d implies e))))
        match parse_expr("a or b nand c and d implies e") {
            Expr::Logical { op, rhs, .. } => {
                assert_eq!(op.kind, TokenKind::Or);
                match *rhs {
                    Expr::Logical { op, rhs, .. } => {
                        assert_eq!(op.kind, TokenKind::Nand);
                        match *rhs {
                            Expr::Logical { op, rhs, .. } => {
                                assert_eq!(op.kind, TokenKind::And);
                                match *rhs {
                                    Expr::Logical { op, .. } => {
                                        assert_eq!(op.kind, TokenKind::Implies)
                                    }
                                    other => panic!("unexpected parse: {:?}", other),
                                }
                            }
                            other => panic!("unexpected parse: {:?}", other),
                        }
                    }
                    other => panic!("unexpected parse: {:?}", other),
                }
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn conditional_is_right_associative() {
        match parse_expr("a ? 1 : b ? 2 : 3") {
            Expr::Conditional { otherwise, .. } => {
                assert!(matches!(*otherwise, Expr::Conditional { .. }));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn assignment_requires_variable_lhs() {
        let (_, diags) = parse_prg("1 + 2 = 3;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].error, SyntaxError::InvalidAssignmentTarget);
    }

    #[test]
    fn compound_assignment_desugars() {
        match parse_expr("x += 2") {
            Expr::Assign { op, value, .. } => {
                assert_eq!(op.kind, TokenKind::PlusEqual);
                match *value {
                    Expr::Binary { op, lhs, .. } => {
                        assert_eq!(op.kind, TokenKind::Plus);
                        assert!(matches!(*lhs, Expr::Variable { .. }));
                    }
                    other => panic!("unexpected desugar: {:?}", other),
                }
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn increment_desugars_to_plus_one() {
        match parse_expr("x++") {
            Expr::Assign { op, value, .. } => {
                assert_eq!(op.kind, TokenKind::PlusPlus);
                match *value {
                    Expr::Binary { op, rhs, .. } => {
                        assert_eq!(op.kind, TokenKind::Plus);
                        assert!(matches!(
                            *rhs,
                            Expr::Literal {
                                value: Lit::Int(1),
                                ..
                            }
                        ));
                    }
                    other => panic!("unexpected desugar: {:?}", other),
                }
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn desugared_reads_get_their_own_node_ids() {
        match parse_expr("x += 2") {
            Expr::Assign { id, value, .. } => match *value {
                Expr::Binary { lhs, .. } => match *lhs {
                    Expr::Variable { id: read_id, .. } => assert_ne!(id, read_id),
                    other => panic!("unexpected lhs: {:?}", other),
                },
                other => panic!("unexpected value: {:?}", other),
            },
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn absolute_value_form() {
        match parse_expr("|x - 1|") {
            Expr::Unary { op, operand } => {
                assert_eq!(op.kind, TokenKind::Pipe);
                assert_eq!(binary_op(&operand), TokenKind::Minus);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn typed_declarations() {
        let stmts = parse_ok("int x = 5; var y; double z = 1.5;");
        match &stmts[0] {
            Stmt::Decl { ty, init, .. } => {
                assert_eq!(*ty, TypeKind::Int);
                assert!(init.is_some());
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
        match &stmts[1] {
            Stmt::Decl { ty, init, .. } => {
                assert_eq!(*ty, TypeKind::Dynamic);
                assert!(init.is_none());
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn function_declaration_with_typed_params() {
        let stmts = parse_ok("function add(int a, int b) { return a + b; }");
        match &stmts[0] {
            Stmt::Fun(decl) => {
                assert_eq!(decl.name.name(), "add");
                assert_eq!(decl.params.len(), 2);
                assert_eq!(decl.params[0].ty, TypeKind::Int);
                assert_eq!(decl.body.len(), 1);
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn class_declaration() {
        let stmts = parse_ok("class Counter { function value() { return 1; } }");
        match &stmts[0] {
            Stmt::ClassDecl { name, methods, .. } => {
                assert_eq!(name.name(), "Counter");
                assert_eq!(methods.len(), 1);
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn member_access_and_call_chain() {
        match parse_expr("c.inc().value") {
            Expr::Get { object, name, .. } => {
                assert_eq!(name.name(), "value");
                assert!(matches!(*object, Expr::Call { .. }));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn do_while_and_for() {
        let stmts = parse_ok("do x = x + 1; while (x < 3); for (int i = 0; i < 3; i += 1) ;");
        assert!(matches!(stmts[0], Stmt::DoWhile { .. }));
        match &stmts[1] {
            Stmt::For { init, cond, incr, .. } => {
                assert!(matches!(**init, Stmt::Decl { .. }));
                assert!(cond.is_some());
                assert!(incr.is_some());
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn switch_with_cases_and_default() {
        let stmts = parse_ok(
            "switch (x, y) { case 1, 2: a = 1; case any, 4: a = 2; break; default: a = 3; }",
        );
        match &stmts[0] {
            Stmt::Switch {
                controls,
                cases,
                default,
                ..
            } => {
                assert_eq!(controls.len(), 2);
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0].tests.len(), 2);
                assert_eq!(cases[1].body.len(), 2);
                assert!(default.is_some());
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn structure_declaration_and_expansion() {
        let stmts = parse_ok(
            "structure unless ( <c:expression> ) <b:statement> => { if (!#c) #b; }\n\
             unless (ready) done = true;",
        );
        assert!(matches!(stmts[0], Stmt::Structure(_)));
        match &stmts[1] {
            Stmt::Expansion { name, body } => {
                assert_eq!(name.name(), "unless");
                match body.as_ref() {
                    Stmt::Block(inner) => match &inner[0] {
                        Stmt::If { cond, .. } => {
                            assert!(matches!(**cond, Expr::Unary { .. }));
                        }
                        other => panic!("unexpected expansion: {:?}", other),
                    },
                    other => panic!("unexpected expansion: {:?}", other),
                }
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn two_expansions_share_no_nodes() {
        let stmts = parse_ok(
            "structure unless ( <c:expression> ) <b:statement> => { if (!#c) #b; }\n\
             unless (a) x = 1;\n\
             unless (b) y = 2;",
        );
        let (first, second) = match (&stmts[1], &stmts[2]) {
            (Stmt::Expansion { body: f, .. }, Stmt::Expansion { body: s, .. }) => (f, s),
            other => panic!("unexpected stmts: {:?}", other),
        };
        assert_ne!(first, second);
    }

    #[test]
    fn dangling_sharp_is_reported_at_declaration() {
        let (_, diags) = parse_prg("structure broken ( <c:expression> ) => { if (!#wrong) ; }");
        assert_eq!(diags.len(), 1);
        assert!(matches!(diags[0].error, SyntaxError::UnknownSharp(_)));
    }

    #[test]
    fn duplicate_placeholder_is_reported() {
        let (_, diags) =
            parse_prg("structure s ( <c:expression> , <c:expression> ) => { #c; }");
        assert!(matches!(
            diags[0].error,
            SyntaxError::DuplicatePlaceholder(_)
        ));
    }

    #[test]
    fn sculpture_mismatch_is_reported() {
        let (_, diags) = parse_prg(
            "structure unless ( <c:expression> ) <b:statement> => { if (!#c) #b; }\n\
             unless oops;",
        );
        assert!(diags
            .iter()
            .any(|d| matches!(d.error, SyntaxError::SculptureMismatch(_))));
    }

    #[test]
    fn sharp_outside_mould_is_an_error() {
        let (_, diags) = parse_prg("#x;");
        assert_eq!(diags[0].error, SyntaxError::ExpectedExpression);
    }

    #[test]
    fn recovery_reports_several_errors() {
        let (stmts, diags) = parse_prg("int = 5; x = 1; double = 2.0; y = 2;");
        // The two malformed declarations each produce one diagnostic; the
        // two well-formed statements in between survive.
        assert_eq!(diags.len(), 2);
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn import_splices_tokens() {
        struct OneUnit;
        impl ImportResolver for OneUnit {
            fn source(&self, unit: &str) -> Result<String, String> {
                if unit == "lib" {
                    Ok("int shared = 1;".to_string())
                } else {
                    Err(format!("unknown unit '{}'", unit))
                }
            }
        }
        let ctx = Context::new();
        let (tokens, _) = Lexer::new("import \"lib\"; shared = 2;", ctx.clone()).scan();
        let parser = Parser::new(
            tokens,
            ctx,
            Rc::new(RefCell::new(StructureTable::new())),
            Rc::new(OneUnit),
        );
        let (stmts, diags) = parser.parse_program();
        assert!(diags.is_empty(), "diagnostics: {:?}", diags);
        // import itself, the spliced declaration, then the assignment
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[1], Stmt::Decl { .. }));
    }

    #[test]
    fn failed_import_is_reported() {
        let (_, diags) = parse_prg("import \"nowhere\";");
        assert!(matches!(diags[0].error, SyntaxError::ImportFailed(_)));
    }
}
