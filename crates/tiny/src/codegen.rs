//! Single-pass tree-walking code generator.
//!
//! Ported from `CompileExpr`/`CompileStatement`/`CompileProgram` in
//! `tiny.c`. The tree distinguishes expression context (`compile_expr`,
//! must leave exactly one value on the stack) from statement context
//! (`compile_statement`, leaves the stack exactly as it found it) - the
//! AST itself doesn't know which context a node sits in, the generator
//! decides it at each call site, same as the original.

use crate::ast::{BinOp, Expr, ExprKind, UnOp};
use crate::error::CompileError;
use crate::opcode::Opcode;
use crate::pool::Pools;
use crate::symbol::{SymbolKind, SymbolTable};

struct CodeGen<'a> {
    source: &'a str,
    code: &'a mut Vec<u8>,
    function_pcs: &'a mut Vec<u32>,
    symbols: &'a mut SymbolTable,
    pools: &'a mut Pools,
}

/// What a compiled call leaves behind, so `compile_expr`/`compile_statement`
/// know whether a `GET_RETVAL`/`POP` is still needed to reach their
/// context's stack discipline.
enum CallEffect {
    /// `CALL`/`CALLF`: result sits in the return register.
    ReturnRegister,
    /// `PRINT`: pops its argument and leaves nothing behind.
    NoValue,
    /// `READ`: already pushes its result directly onto the stack.
    Pushed,
}

/// Appends bytecode for `statements` to `code`, recording each compiled
/// function's entry point in `function_pcs` (already sized to
/// `symbols.num_functions()` by the caller). Does not append `HALT` or run
/// the initialization check - callers compiling into a long-lived `State`
/// own those so repeated `compile` calls can append to one program buffer.
pub fn compile_statements(
    source: &str,
    statements: &[Expr],
    symbols: &mut SymbolTable,
    pools: &mut Pools,
    code: &mut Vec<u8>,
    function_pcs: &mut Vec<u32>,
) -> Result<(), CompileError> {
    let mut gen = CodeGen {
        source,
        code,
        function_pcs,
        symbols,
        pools,
    };
    for stmt in statements {
        gen.compile_statement(stmt)?;
    }
    Ok(())
}

impl<'a> CodeGen<'a> {
    fn emit(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    fn emit_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn patch_i32(&mut self, pc: usize, value: i32) {
        self.code[pc..pc + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn pc(&self) -> usize {
        self.code.len()
    }

    fn err(&self, expr: &Expr, message: impl Into<String>) -> CompileError {
        CompileError::new(self.source, expr.loc.clone(), message)
    }

    /// Ported from `CompileGetId`: reads the identifier's already-resolved
    /// symbol (set by the parser, or by `:=`/`::` in place). Unresolved
    /// identifiers are only discovered to be an error here, at code-gen
    /// time, exactly like the original.
    fn compile_get_id(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let ExprKind::Id { name, symbol } = &expr.kind else {
            unreachable!("compile_get_id called on a non-Id node");
        };
        let Some(id) = symbol else {
            return Err(self.err(expr, format!("Referencing undeclared identifier '{name}'.")));
        };
        match &self.symbols.get(*id).kind {
            SymbolKind::Global { index, .. } => {
                let index = *index as i32;
                self.emit(Opcode::Get);
                self.emit_i32(index);
            }
            SymbolKind::Local { index, .. } => {
                let index = *index;
                self.emit(Opcode::GetLocal);
                self.emit_i32(index);
            }
            SymbolKind::Const {
                pool_index,
                is_string,
            } => {
                let (pool_index, is_string) = (*pool_index as i32, *is_string);
                self.emit(if is_string {
                    Opcode::PushString
                } else {
                    Opcode::PushNumber
                });
                self.emit_i32(pool_index);
            }
            SymbolKind::Function { .. } | SymbolKind::ForeignFunction { .. } => {
                unreachable!("reference_variable never returns a function symbol")
            }
        }
        Ok(())
    }

    /// Ported from `CompileCall`: arguments compile left to right, then the
    /// callee resolves by name against the symbol table - not before, so a
    /// foreign function bound between parsing and code generation, or a
    /// script function declared later in the same program, both resolve.
    ///
    /// `print`/`read` are not ordinary calls: they compile directly to the
    /// `PRINT`/`READ` instructions (spec §4.4's "Host I/O" opcodes) rather
    /// than going through `CALL`/`CALLF`, unless a user or foreign function
    /// of that name has been declared, in which case the declaration wins.
    fn compile_call(&mut self, expr: &Expr) -> Result<CallEffect, CompileError> {
        let ExprKind::Call { callee, args } = &expr.kind else {
            unreachable!("compile_call called on a non-Call node");
        };

        if self.symbols.reference_function(callee).is_none() {
            if callee == "print" {
                if args.len() != 1 {
                    return Err(self.err(expr, "'print' takes exactly one argument."));
                }
                self.compile_expr(&args[0])?;
                self.emit(Opcode::Print);
                return Ok(CallEffect::NoValue);
            }
            if callee == "read" {
                if !args.is_empty() {
                    return Err(self.err(expr, "'read' takes no arguments."));
                }
                self.emit(Opcode::Read);
                return Ok(CallEffect::Pushed);
            }
        }

        for arg in args {
            self.compile_expr(arg)?;
        }

        let Some(sym) = self.symbols.reference_function(callee) else {
            return Err(self.err(expr, format!("Attempted to call undefined function '{callee}'.")));
        };

        match &self.symbols.get(sym).kind {
            SymbolKind::ForeignFunction { index } => {
                let index = *index as i32;
                self.emit(Opcode::Callf);
                self.emit_i32(args.len() as i32);
                self.emit_i32(index);
            }
            SymbolKind::Function { index, .. } => {
                let index = *index as i32;
                self.emit(Opcode::Call);
                self.emit_i32(args.len() as i32);
                self.emit_i32(index);
            }
            _ => unreachable!("reference_function never returns a non-function symbol"),
        }
        Ok(CallEffect::ReturnRegister)
    }

    /// Value-producing context. Ported from `CompileExpr`.
    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Null => self.emit(Opcode::PushNull),
            ExprKind::Bool(b) => self.emit(if *b { Opcode::PushTrue } else { Opcode::PushFalse }),
            ExprKind::Num(idx) => {
                let idx = *idx as i32;
                self.emit(Opcode::PushNumber);
                self.emit_i32(idx);
            }
            ExprKind::Str(idx) => {
                let idx = *idx as i32;
                self.emit(Opcode::PushString);
                self.emit_i32(idx);
            }
            ExprKind::Id { .. } => self.compile_get_id(expr)?,
            ExprKind::Call { .. } => match self.compile_call(expr)? {
                CallEffect::ReturnRegister => self.emit(Opcode::GetRetVal),
                CallEffect::Pushed => {}
                CallEffect::NoValue => {
                    return Err(self.err(expr, "'print' produces no value; cannot be used in expression context."));
                }
            },
            ExprKind::Paren(inner) => self.compile_expr(inner)?,
            ExprKind::Unary { op, expr: inner } => {
                self.compile_expr(inner)?;
                match op {
                    UnOp::Neg => {
                        let idx = self.pools.register_number(self.source, expr.loc.clone(), -1.0)?;
                        self.emit(Opcode::PushNumber);
                        self.emit_i32(idx as i32);
                        self.emit(Opcode::Mul);
                    }
                    UnOp::Not => self.emit(Opcode::LogNot),
                    // `tiny.c`'s CompileExpr never gave unary `+` a case -
                    // it parses but always fails to compile. Preserved here
                    // rather than silently making it a no-op.
                    UnOp::Pos => {
                        return Err(self.err(expr, "Unsupported unary operator '+'."));
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                if op.is_assignment_family() {
                    return Err(self.err(expr, "Found assignment when expecting expression."));
                }
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                match op {
                    BinOp::Add => self.emit(Opcode::Add),
                    BinOp::Sub => self.emit(Opcode::Sub),
                    BinOp::Mul => self.emit(Opcode::Mul),
                    BinOp::Div => self.emit(Opcode::Div),
                    BinOp::Mod => self.emit(Opcode::Mod),
                    BinOp::BitOr => self.emit(Opcode::Or),
                    BinOp::BitAnd => self.emit(Opcode::And),
                    BinOp::Lt => self.emit(Opcode::Lt),
                    BinOp::Gt => self.emit(Opcode::Gt),
                    BinOp::Lte => self.emit(Opcode::Lte),
                    BinOp::Gte => self.emit(Opcode::Gte),
                    BinOp::Equ => self.emit(Opcode::Equ),
                    BinOp::NotEqu => {
                        self.emit(Opcode::Equ);
                        self.emit(Opcode::LogNot);
                    }
                    BinOp::LogAnd => self.emit(Opcode::LogAnd),
                    BinOp::LogOr => self.emit(Opcode::LogOr),
                    _ => unreachable!("assignment-family ops rejected above"),
                }
            }
            ExprKind::Block(_)
            | ExprKind::Proc { .. }
            | ExprKind::If { .. }
            | ExprKind::While { .. }
            | ExprKind::For { .. }
            | ExprKind::Return(_) => {
                return Err(self.err(expr, "Got statement when expecting expression."));
            }
        }
        Ok(())
    }

    /// Effect-producing context. Ported from `CompileStatement`.
    fn compile_statement(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Call { .. } => match self.compile_call(expr)? {
                CallEffect::ReturnRegister | CallEffect::NoValue => Ok(()),
                CallEffect::Pushed => {
                    self.emit(Opcode::Pop);
                    Ok(())
                }
            },

            ExprKind::Block(stmts) => {
                for stmt in stmts {
                    self.compile_statement(stmt)?;
                }
                Ok(())
            }

            ExprKind::Binary { op, lhs, rhs } => self.compile_assignment(expr, *op, lhs, rhs),

            ExprKind::Proc { decl, body } => {
                self.emit(Opcode::Goto);
                let skip_pc = self.pc();
                self.emit_i32(0);

                let func_index = match &self.symbols.get(decl.symbol).kind {
                    SymbolKind::Function { index, .. } => *index,
                    _ => unreachable!("a Proc's decl.symbol is always a Function symbol"),
                };
                self.function_pcs[func_index as usize] = self.pc() as u32;

                for _ in 0..decl.num_locals {
                    let idx = self.pools.register_number(self.source, expr.loc.clone(), 0.0)?;
                    self.emit(Opcode::PushNumber);
                    self.emit_i32(idx as i32);
                }

                self.compile_statement(body)?;

                self.emit(Opcode::Return);
                let after = self.pc() as i32;
                self.patch_i32(skip_pc, after);
                Ok(())
            }

            ExprKind::If { cond, body, alt } => {
                self.compile_expr(cond)?;
                self.emit(Opcode::Gotoz);
                let skip_pc = self.pc();
                self.emit_i32(0);

                self.compile_statement(body)?;

                self.emit(Opcode::Goto);
                let exit_pc = self.pc();
                self.emit_i32(0);

                let else_pc = self.pc() as i32;
                self.patch_i32(skip_pc, else_pc);

                if let Some(alt) = alt {
                    self.compile_statement(alt)?;
                }

                let after = self.pc() as i32;
                self.patch_i32(exit_pc, after);
                Ok(())
            }

            ExprKind::While { cond, body } => {
                let cond_pc = self.pc() as i32;
                self.compile_expr(cond)?;

                self.emit(Opcode::Gotoz);
                let skip_pc = self.pc();
                self.emit_i32(0);

                self.compile_statement(body)?;

                self.emit(Opcode::Goto);
                self.emit_i32(cond_pc);

                let after = self.pc() as i32;
                self.patch_i32(skip_pc, after);
                Ok(())
            }

            ExprKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.compile_statement(init)?;

                let cond_pc = self.pc() as i32;
                self.compile_expr(cond)?;

                self.emit(Opcode::Gotoz);
                let skip_pc = self.pc();
                self.emit_i32(0);

                self.compile_statement(body)?;
                self.compile_statement(step)?;

                self.emit(Opcode::Goto);
                self.emit_i32(cond_pc);

                let after = self.pc() as i32;
                self.patch_i32(skip_pc, after);
                Ok(())
            }

            ExprKind::Return(value) => {
                match value {
                    Some(value) => {
                        self.compile_expr(value)?;
                        self.emit(Opcode::ReturnValue);
                    }
                    None => self.emit(Opcode::Return),
                }
                Ok(())
            }

            ExprKind::Null
            | ExprKind::Bool(_)
            | ExprKind::Num(_)
            | ExprKind::Str(_)
            | ExprKind::Id { .. }
            | ExprKind::Unary { .. }
            | ExprKind::Paren(_) => Err(self.err(expr, "Got expression when expecting statement.")),
        }
    }

    /// Ported from the `EXP_BINARY` case of `CompileStatement`: `=`/`:=`
    /// and every compound assignment share this path. Marks the target
    /// initialized unconditionally, matching the original - a compound
    /// assignment is not required to have been previously initialized by a
    /// prior plain assignment, only to pass the final whole-program check.
    fn compile_assignment(
        &mut self,
        expr: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(), CompileError> {
        if op == BinOp::DeclareConst {
            // Constants generate no code - the value lives only in the pool.
            return Ok(());
        }
        if !op.is_assignment_family() {
            return Err(self.err(expr, "Invalid operation when expecting statement."));
        }

        let ExprKind::Id { symbol, .. } = &lhs.kind else {
            return Err(self.err(expr, "LHS of assignment operation must be a variable"));
        };

        if let Some(base) = op.compound_base() {
            self.compile_get_id(lhs)?;
            self.compile_expr(rhs)?;
            self.emit(match base {
                BinOp::Add => Opcode::Add,
                BinOp::Sub => Opcode::Sub,
                BinOp::Mul => Opcode::Mul,
                BinOp::Div => Opcode::Div,
                BinOp::Mod => Opcode::Mod,
                BinOp::BitOr => Opcode::Or,
                BinOp::BitAnd => Opcode::And,
                _ => unreachable!(),
            });
        } else {
            self.compile_expr(rhs)?;
        }

        let Some(id) = symbol else {
            let ExprKind::Id { name, .. } = &lhs.kind else {
                unreachable!();
            };
            return Err(self.err(expr, format!("Assigning to undeclared identifier '{name}'.")));
        };

        match &self.symbols.get(*id).kind {
            SymbolKind::Global { index, .. } => {
                let index = *index as i32;
                self.emit(Opcode::Set);
                self.emit_i32(index);
            }
            SymbolKind::Local { index, .. } => {
                let index = *index;
                self.emit(Opcode::SetLocal);
                self.emit_i32(index);
            }
            SymbolKind::Const { .. } => {
                let ExprKind::Id { name, .. } = &lhs.kind else {
                    unreachable!();
                };
                return Err(self.err(expr, format!("Cannot assign to id '{name}'.")));
            }
            SymbolKind::Function { .. } | SymbolKind::ForeignFunction { .. } => {
                unreachable!("an Id symbol is never a function")
            }
        }

        self.symbols.mark_initialized(*id);
        Ok(())
    }
}
