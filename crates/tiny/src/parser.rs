//! Recursive-descent, operator-precedence parser.
//!
//! Ported from `ParseFactor`/`ParseBinRhs`/`ParseExpr`/`ParseProgram` in
//! `tiny.c`. Statements and expressions share one production (`parse_factor`
//! handles `if`/`while`/`for`/`return`/blocks/`func` exactly where it
//! handles literals and identifiers) - the distinction between "produces a
//! value" and "has an effect" is left entirely to code generation.

use crate::ast::{BinOp, Expr, ExprKind, ProcDecl, UnOp};
use crate::error::{CompileError, Diagnostic, Severity, SourceLoc};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::pool::Pools;
use crate::symbol::{SymbolKind, SymbolTable, MAX_ARGS};

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    source: &'a str,
    file: String,
    symbols: &'a mut SymbolTable,
    pools: &'a mut Pools,
    diagnostics: &'a mut Vec<Diagnostic>,
}

/// Parses `source` into a sequence of top-level statement expressions,
/// registering literals and declarations into `symbols`/`pools` as it goes.
/// Foreign functions and constants bound before this call resolve normally;
/// `symbols`/`pools` persist across repeated calls on the same state, so a
/// later `parse_program` call sees everything an earlier one declared.
pub fn parse_program(
    file: &str,
    source: &str,
    symbols: &mut SymbolTable,
    pools: &mut Pools,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Vec<Expr>, CompileError> {
    let mut lexer = Lexer::new(file, source.as_bytes());
    let current = lexer.next_token(source)?;
    let mut parser = Parser {
        lexer,
        current,
        source,
        file: file.to_string(),
        symbols,
        pools,
        diagnostics,
    };
    parser.parse_program()
}

impl<'a> Parser<'a> {
    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.file.clone(), self.current.line)
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(self.source, self.loc(), message)
    }

    fn advance(&mut self) -> Result<(), CompileError> {
        self.current = self.lexer.next_token(self.source)?;
        Ok(())
    }

    fn is_char(&self, b: u8) -> bool {
        matches!(self.current.kind, TokenKind::Char(c) if c == b)
    }

    fn expect_char(&self, b: u8, message: &str) -> Result<(), CompileError> {
        if self.is_char(b) {
            Ok(())
        } else {
            Err(self.err(message))
        }
    }

    fn expect_ident(&self, message: &str) -> Result<String, CompileError> {
        match &self.current.kind {
            TokenKind::Ident(name) => Ok(name.clone()),
            _ => Err(self.err(message)),
        }
    }

    pub fn parse_program(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut stmts = Vec::new();
        while !matches!(self.current.kind, TokenKind::Eof) {
            stmts.push(self.parse_expr()?);
        }
        Ok(stmts)
    }

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        let factor = self.parse_factor()?;
        self.parse_bin_rhs(0, factor)
    }

    fn token_prec(kind: &TokenKind) -> i8 {
        use TokenKind::*;
        match kind {
            Char(b'*') | Char(b'/') | Char(b'%') | Char(b'&') | Char(b'|') => 5,
            Char(b'+') | Char(b'-') => 4,
            Char(b'<') | Char(b'>') | Lte | Gte | Equals | NotEquals => 3,
            And | Or => 2,
            Char(b'=') | Declare | DeclareConst | PlusEqual | MinusEqual | MulEqual
            | DivEqual | ModEqual | OrEqual | AndEqual => 1,
            _ => -1,
        }
    }

    fn token_to_binop(kind: &TokenKind) -> Option<BinOp> {
        use TokenKind::*;
        Some(match kind {
            Char(b'=') => BinOp::Assign,
            Declare => BinOp::Declare,
            DeclareConst => BinOp::DeclareConst,
            PlusEqual => BinOp::AddAssign,
            MinusEqual => BinOp::SubAssign,
            MulEqual => BinOp::MulAssign,
            DivEqual => BinOp::DivAssign,
            ModEqual => BinOp::ModAssign,
            OrEqual => BinOp::OrAssign,
            AndEqual => BinOp::AndAssign,
            And => BinOp::LogAnd,
            Or => BinOp::LogOr,
            Char(b'<') => BinOp::Lt,
            Char(b'>') => BinOp::Gt,
            Lte => BinOp::Lte,
            Gte => BinOp::Gte,
            Equals => BinOp::Equ,
            NotEquals => BinOp::NotEqu,
            Char(b'+') => BinOp::Add,
            Char(b'-') => BinOp::Sub,
            Char(b'*') => BinOp::Mul,
            Char(b'/') => BinOp::Div,
            Char(b'%') => BinOp::Mod,
            Char(b'&') => BinOp::BitAnd,
            Char(b'|') => BinOp::BitOr,
            _ => return None,
        })
    }

    fn parse_bin_rhs(&mut self, min_prec: i8, mut lhs: Expr) -> Result<Expr, CompileError> {
        loop {
            let prec = Self::token_prec(&self.current.kind);
            if prec < min_prec {
                return Ok(lhs);
            }

            let bin_op = Self::token_to_binop(&self.current.kind)
                .expect("token_prec and token_to_binop must agree on which tokens are operators");
            let loc = self.loc();

            if bin_op == BinOp::Declare {
                let name = match &lhs.kind {
                    ExprKind::Id { name, .. } => name.clone(),
                    _ => {
                        return Err(self.err("Expected identifier to the left-hand side of ':='."));
                    }
                };
                let sym = if self.symbols.current_function().is_some() {
                    self.symbols.declare_local(self.source, &name, loc.clone())?
                } else {
                    self.symbols
                        .declare_global_var(self.source, &name, loc.clone())?
                };
                if let ExprKind::Id { symbol, .. } = &mut lhs.kind {
                    *symbol = Some(sym);
                }
            }

            self.advance()?;
            let mut rhs = self.parse_factor()?;
            let next_prec = Self::token_prec(&self.current.kind);
            if prec < next_prec {
                rhs = self.parse_bin_rhs(prec + 1, rhs)?;
            }

            if bin_op == BinOp::DeclareConst {
                let name = match &lhs.kind {
                    ExprKind::Id { name, .. } => name.clone(),
                    _ => {
                        return Err(self.err("Expected identifier to the left-hand side of '::'."));
                    }
                };
                let (is_string, pool_index) = match &rhs.kind {
                    ExprKind::Num(idx) => (false, *idx),
                    ExprKind::Str(idx) => (true, *idx),
                    _ => {
                        return Err(self.err(format!(
                            "Expected number or string to be bound to constant '{name}'."
                        )));
                    }
                };
                let (sym, warn_inside_function) = self.symbols.declare_const(
                    self.source,
                    &name,
                    is_string,
                    pool_index,
                    loc.clone(),
                )?;
                if warn_inside_function {
                    self.diagnostics.push(Diagnostic {
                        severity: Severity::Warning,
                        loc: loc.clone(),
                        message: format!(
                            "constant '{name}' is declared inside a function but still has global scope."
                        ),
                    });
                }
                if let ExprKind::Id { symbol, .. } = &mut lhs.kind {
                    *symbol = Some(sym);
                }
            }

            lhs = Expr {
                kind: ExprKind::Binary {
                    op: bin_op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                loc,
            };
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, CompileError> {
        let loc = self.loc();

        match self.current.kind.clone() {
            TokenKind::Null => {
                self.advance()?;
                Ok(Expr { kind: ExprKind::Null, loc })
            }

            TokenKind::True => {
                self.advance()?;
                Ok(Expr { kind: ExprKind::Bool(true), loc })
            }
            TokenKind::False => {
                self.advance()?;
                Ok(Expr { kind: ExprKind::Bool(false), loc })
            }

            TokenKind::Char(b'{') => {
                self.advance()?;
                self.symbols.open_scope();
                let mut stmts = Vec::new();
                while !self.is_char(b'}') {
                    stmts.push(self.parse_expr()?);
                }
                self.advance()?;
                self.symbols.close_scope();
                Ok(Expr { kind: ExprKind::Block(stmts), loc })
            }

            TokenKind::Ident(name) => {
                self.advance()?;
                if !self.is_char(b'(') {
                    let symbol = self.symbols.reference_variable(&name);
                    return Ok(Expr { kind: ExprKind::Id { name, symbol }, loc });
                }

                self.advance()?;
                let mut args = Vec::new();
                while !self.is_char(b')') {
                    args.push(self.parse_expr()?);
                    if self.is_char(b',') {
                        self.advance()?;
                    } else if !self.is_char(b')') {
                        return Err(self.err("Expected ')' after call."));
                    }
                }
                self.advance()?;
                Ok(Expr { kind: ExprKind::Call { callee: name, args }, loc })
            }

            TokenKind::Char(b'-') | TokenKind::Char(b'+') | TokenKind::Not => {
                let op = match self.current.kind {
                    TokenKind::Char(b'-') => UnOp::Neg,
                    TokenKind::Char(b'+') => UnOp::Pos,
                    _ => UnOp::Not,
                };
                self.advance()?;
                let expr = self.parse_factor()?;
                Ok(Expr {
                    kind: ExprKind::Unary { op, expr: Box::new(expr) },
                    loc,
                })
            }

            TokenKind::Number(n) => {
                let idx = self.pools.register_number(self.source, loc.clone(), n)?;
                self.advance()?;
                Ok(Expr { kind: ExprKind::Num(idx), loc })
            }

            TokenKind::Str(s) => {
                let idx = self.pools.register_string(self.source, loc.clone(), &s)?;
                self.advance()?;
                Ok(Expr { kind: ExprKind::Str(idx), loc })
            }

            TokenKind::Func => self.parse_proc(loc),

            TokenKind::If => self.parse_if(loc),

            TokenKind::While => {
                self.advance()?;
                let cond = self.parse_expr()?;
                self.symbols.open_scope();
                let body = self.parse_expr()?;
                self.symbols.close_scope();
                Ok(Expr {
                    kind: ExprKind::While { cond: Box::new(cond), body: Box::new(body) },
                    loc,
                })
            }

            TokenKind::For => {
                self.advance()?;
                self.symbols.open_scope();
                let init = self.parse_expr()?;
                self.expect_char(b';', "Expected ';' after for initializer.")?;
                self.advance()?;
                let cond = self.parse_expr()?;
                self.expect_char(b';', "Expected ';' after for condition.")?;
                self.advance()?;
                let step = self.parse_expr()?;
                let body = self.parse_expr()?;
                self.symbols.close_scope();
                Ok(Expr {
                    kind: ExprKind::For {
                        init: Box::new(init),
                        cond: Box::new(cond),
                        step: Box::new(step),
                        body: Box::new(body),
                    },
                    loc,
                })
            }

            TokenKind::Return => {
                self.advance()?;
                if self.is_char(b';') {
                    self.advance()?;
                    return Ok(Expr { kind: ExprKind::Return(None), loc });
                }
                let expr = self.parse_expr()?;
                Ok(Expr { kind: ExprKind::Return(Some(Box::new(expr))), loc })
            }

            TokenKind::Char(b'(') => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect_char(b')', "Expected matching ')' after previous '('.")?;
                self.advance()?;
                Ok(Expr { kind: ExprKind::Paren(Box::new(inner)), loc })
            }

            other => Err(self.err(format!("Unexpected token {other:?}."))),
        }
    }

    fn parse_if(&mut self, loc: SourceLoc) -> Result<Expr, CompileError> {
        self.advance()?;
        let cond = self.parse_expr()?;
        let body = self.parse_expr()?;
        let alt = if matches!(self.current.kind, TokenKind::Else) {
            self.advance()?;
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        Ok(Expr {
            kind: ExprKind::If { cond: Box::new(cond), body: Box::new(body), alt },
            loc,
        })
    }

    fn parse_proc(&mut self, loc: SourceLoc) -> Result<Expr, CompileError> {
        if let Some(current) = self.symbols.current_function() {
            let name = self.symbols.get(current).name.clone();
            return Err(self.err(format!(
                "Attempted to define function inside of function '{name}'."
            )));
        }

        self.advance()?;
        let name = self.expect_ident("Function name must be an identifier.")?;
        let sym = self.symbols.declare_function(self.source, &name, loc.clone())?;
        self.symbols.enter_function(sym);

        self.advance()?;
        self.expect_char(b'(', "Expected '(' after function name.")?;
        self.advance()?;

        let mut arg_names = Vec::new();
        while !self.is_char(b')') {
            let arg_name = self.expect_ident("Expected identifier in function parameter list.")?;
            if arg_names.len() >= MAX_ARGS {
                return Err(self.err(format!("Function '{name}' takes in too many args.")));
            }
            arg_names.push(arg_name);
            self.advance()?;
            if !self.is_char(b')') && !self.is_char(b',') {
                return Err(self.err(
                    "Expected ')' or ',' after parameter name in function parameter list.",
                ));
            }
            if self.is_char(b',') {
                self.advance()?;
            }
        }

        let nargs = arg_names.len();
        for arg_name in &arg_names {
            self.symbols
                .declare_argument(self.source, arg_name, nargs, loc.clone())?;
        }
        self.advance()?;

        self.symbols.open_scope();
        let body = self.parse_expr()?;
        self.symbols.close_scope();
        self.symbols.leave_function();

        let num_locals = match &self.symbols.get(sym).kind {
            SymbolKind::Function { locals, .. } => locals.len(),
            _ => unreachable!(),
        };

        Ok(Expr {
            kind: ExprKind::Proc {
                decl: ProcDecl {
                    name,
                    symbol: sym,
                    num_args: nargs,
                    num_locals,
                },
                body: Box::new(body),
            },
            loc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Vec<Expr>, SymbolTable, Pools) {
        let mut symbols = SymbolTable::new();
        let mut pools = Pools::new();
        let mut diags = Vec::new();
        let prog = parse_program("t", src, &mut symbols, &mut pools, &mut diags).unwrap();
        (prog, symbols, pools)
    }

    #[test]
    fn empty_program_parses_to_no_statements() {
        let (prog, _, _) = parse("");
        assert!(prog.is_empty());
    }

    #[test]
    fn declare_then_reference_resolves_the_same_global() {
        let (prog, _, _) = parse("x := 1 x");
        assert_eq!(prog.len(), 2);
        let ExprKind::Id { symbol, .. } = &prog[1].kind else {
            panic!("expected an id");
        };
        assert!(symbol.is_some());
    }

    #[test]
    fn forward_reference_to_a_function_is_allowed() {
        let (prog, symbols, _) = parse(
            "func even(n) { if n == 0 { return true } return odd(n - 1) } \
             func odd(n) { if n == 0 { return false } return even(n - 1) }",
        );
        assert_eq!(prog.len(), 2);
        assert!(symbols.reference_function("odd").is_some());
    }

    #[test]
    fn assignment_in_expression_position_still_parses_as_binary() {
        let (prog, _, _) = parse("x := 1 y := x = 2");
        assert_eq!(prog.len(), 2);
    }

    #[test]
    fn mismatched_paren_is_a_compile_error() {
        let mut symbols = SymbolTable::new();
        let mut pools = Pools::new();
        let mut diags = Vec::new();
        let err = parse_program("t", "(1", &mut symbols, &mut pools, &mut diags).unwrap_err();
        assert!(err.message.contains("matching"));
    }

    #[test]
    fn declare_const_inside_a_function_warns() {
        let mut symbols = SymbolTable::new();
        let mut pools = Pools::new();
        let mut diags = Vec::new();
        parse_program(
            "t",
            "func f() { pi :: 3 return pi }",
            &mut symbols,
            &mut pools,
            &mut diags,
        )
        .unwrap();
        assert_eq!(diags.len(), 1);
    }
}
