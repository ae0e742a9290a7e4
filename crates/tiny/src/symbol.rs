//! The compile-time symbol table.
//!
//! Ported from `Symbol`/`ReferenceVariable`/`DeclareGlobalVar`/etc. in
//! `tiny.c`. Where the C source keeps a tree of `malloc`'d `Symbol` nodes
//! threaded through stretchy-buffer arrays, this keeps one flat arena
//! (`Vec<Symbol>`) and refers to entries by a small `SymbolId` index -
//! the same handle-over-pointer shape used for the GC heap, applied here
//! to the compiler's own bookkeeping.

use crate::error::{CompileError, SourceLoc};

/// Maximum arguments a single function may declare (`MAX_ARGS`).
pub const MAX_ARGS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

#[derive(Debug, Clone)]
pub enum SymbolKind {
    Global {
        index: u32,
        initialized: bool,
    },
    /// `index` is positive for a true local (frame-relative offset) and
    /// negative for an argument (`-nargs + ordinal`), exactly as in the
    /// spec's `Symbol::Local` variant.
    Local {
        index: i32,
        scope: u32,
        scope_ended: bool,
        initialized: bool,
        is_argument: bool,
    },
    Const {
        pool_index: u32,
        is_string: bool,
    },
    Function {
        index: u32,
        args: Vec<SymbolId>,
        locals: Vec<SymbolId>,
    },
    ForeignFunction {
        index: u32,
    },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub loc: SourceLoc,
}

impl Symbol {
    /// Whether an initialization check should consider this symbol
    /// satisfied. Arguments, constants, functions and foreign functions are
    /// "initialized implicitly" (spec §4.3's initialization check note).
    pub fn is_initialized(&self) -> bool {
        match &self.kind {
            SymbolKind::Global { initialized, .. } => *initialized,
            SymbolKind::Local {
                initialized,
                is_argument,
                ..
            } => *initialized || *is_argument,
            SymbolKind::Const { .. }
            | SymbolKind::Function { .. }
            | SymbolKind::ForeignFunction { .. } => true,
        }
    }
}

pub struct SymbolTable {
    symbols: Vec<Symbol>,
    /// Names declared at global scope: globals, consts, functions and
    /// foreign functions, in declaration order. Mirrors `globalSymbols` in
    /// `tiny.c`, which (despite the name) holds all of these.
    globals: Vec<SymbolId>,
    curr_scope: u32,
    curr_func: Option<SymbolId>,
    num_global_vars: u32,
    num_functions: u32,
    num_foreign_functions: u32,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            symbols: Vec::new(),
            globals: Vec::new(),
            curr_scope: 0,
            curr_func: None,
            num_global_vars: 0,
            num_functions: 0,
            num_foreign_functions: 0,
        }
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn all_symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    pub fn num_global_vars(&self) -> u32 {
        self.num_global_vars
    }

    pub fn num_functions(&self) -> u32 {
        self.num_functions
    }

    pub fn num_foreign_functions(&self) -> u32 {
        self.num_foreign_functions
    }

    pub fn current_function(&self) -> Option<SymbolId> {
        self.curr_func
    }

    fn push(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        id
    }

    pub fn open_scope(&mut self) {
        self.curr_scope += 1;
    }

    pub fn close_scope(&mut self) {
        if let Some(func) = self.curr_func {
            let scope = self.curr_scope;
            let locals = match &self.get(func).kind {
                SymbolKind::Function { locals, .. } => locals.clone(),
                _ => unreachable!(),
            };
            for local in locals {
                if let SymbolKind::Local {
                    scope: s,
                    scope_ended,
                    ..
                } = &mut self.get_mut(local).kind
                {
                    if *s == scope {
                        *scope_ended = true;
                    }
                }
            }
        }
        self.curr_scope -= 1;
    }

    /// Mirrors `ReferenceVariable`: locals (not scope-ended) first, then
    /// arguments, then global variables/constants. Functions and foreign
    /// functions are looked up separately via `reference_function`.
    pub fn reference_variable(&self, name: &str) -> Option<SymbolId> {
        if let Some(func) = self.curr_func {
            let (args, locals) = match &self.get(func).kind {
                SymbolKind::Function { args, locals, .. } => (args, locals),
                _ => unreachable!(),
            };

            for &id in locals {
                if let SymbolKind::Local {
                    scope_ended, ..
                } = &self.get(id).kind
                {
                    if !scope_ended && self.get(id).name == name {
                        return Some(id);
                    }
                }
            }

            for &id in args {
                if self.get(id).name == name {
                    return Some(id);
                }
            }
        }

        for &id in &self.globals {
            let sym = self.get(id);
            if matches!(sym.kind, SymbolKind::Global { .. } | SymbolKind::Const { .. })
                && sym.name == name
            {
                return Some(id);
            }
        }

        None
    }

    /// Mirrors `ReferenceFunction`: looks up a user or foreign function by
    /// name among global symbols.
    pub fn reference_function(&self, name: &str) -> Option<SymbolId> {
        self.globals.iter().copied().find(|&id| {
            let sym = self.get(id);
            matches!(
                sym.kind,
                SymbolKind::Function { .. } | SymbolKind::ForeignFunction { .. }
            ) && sym.name == name
        })
    }

    pub fn declare_global_var(
        &mut self,
        source: &str,
        name: &str,
        loc: SourceLoc,
    ) -> Result<SymbolId, CompileError> {
        if let Some(existing) = self.reference_variable(name) {
            if matches!(
                self.get(existing).kind,
                SymbolKind::Global { .. } | SymbolKind::Const { .. }
            ) {
                return Err(CompileError::new(
                    source,
                    loc,
                    format!(
                        "Attempted to declare multiple global entities with the same name '{name}'."
                    ),
                ));
            }
        }

        let index = self.num_global_vars;
        self.num_global_vars += 1;
        let id = self.push(Symbol {
            name: name.to_string(),
            kind: SymbolKind::Global {
                index,
                initialized: false,
            },
            loc,
        });
        self.globals.push(id);
        Ok(id)
    }

    pub fn declare_argument(
        &mut self,
        source: &str,
        name: &str,
        nargs: usize,
        loc: SourceLoc,
    ) -> Result<SymbolId, CompileError> {
        let func = self.curr_func.expect("declare_argument outside a function");
        let (ordinal, func_name) = match &self.get(func).kind {
            SymbolKind::Function {
                args: existing, ..
            } => {
                for &id in existing {
                    if self.get(id).name == name {
                        return Err(CompileError::new(
                            source,
                            loc,
                            format!(
                                "Function '{}' takes multiple arguments with name '{name}'.",
                                self.get(func).name
                            ),
                        ));
                    }
                }
                (existing.len(), self.get(func).name.clone())
            }
            _ => unreachable!(),
        };
        let _ = func_name;

        let id = self.push(Symbol {
            name: name.to_string(),
            kind: SymbolKind::Local {
                index: -(nargs as i32) + ordinal as i32,
                scope: 0,
                scope_ended: false,
                initialized: false,
                is_argument: true,
            },
            loc,
        });

        if let SymbolKind::Function { args, .. } = &mut self.get_mut(func).kind {
            args.push(id);
        }

        Ok(id)
    }

    pub fn declare_local(
        &mut self,
        source: &str,
        name: &str,
        loc: SourceLoc,
    ) -> Result<SymbolId, CompileError> {
        let func = self.curr_func.expect("declare_local outside a function");
        let scope = self.curr_scope;

        let locals = match &self.get(func).kind {
            SymbolKind::Function { locals, .. } => locals.clone(),
            _ => unreachable!(),
        };
        for &existing in &locals {
            if let SymbolKind::Local {
                scope_ended, ..
            } = &self.get(existing).kind
            {
                if !scope_ended && self.get(existing).name == name {
                    return Err(CompileError::new(
                        source,
                        loc,
                        format!(
                            "Function '{}' has multiple locals in the same scope with name '{name}'.",
                            self.get(func).name
                        ),
                    ));
                }
            }
        }

        let index = locals.len() as i32;
        let id = self.push(Symbol {
            name: name.to_string(),
            kind: SymbolKind::Local {
                index,
                scope,
                scope_ended: false,
                initialized: false,
                is_argument: false,
            },
            loc,
        });

        if let SymbolKind::Function { locals, .. } = &mut self.get_mut(func).kind {
            locals.push(id);
        }

        Ok(id)
    }

    pub fn declare_const(
        &mut self,
        source: &str,
        name: &str,
        is_string: bool,
        pool_index: u32,
        loc: SourceLoc,
    ) -> Result<(SymbolId, bool), CompileError> {
        if let Some(existing) = self.reference_variable(name) {
            if matches!(
                self.get(existing).kind,
                SymbolKind::Const { .. } | SymbolKind::Local { .. } | SymbolKind::Global { .. }
            ) {
                return Err(CompileError::new(
                    source,
                    loc,
                    format!("Attempted to define constant with the same name '{name}' as another value."),
                ));
            }
        }

        let warn_inside_function = self.curr_func.is_some();

        let id = self.push(Symbol {
            name: name.to_string(),
            kind: SymbolKind::Const {
                pool_index,
                is_string,
            },
            loc,
        });
        self.globals.push(id);

        Ok((id, warn_inside_function))
    }

    /// Errors if `name` already names any global-scope entity - a function,
    /// foreign function, global variable or constant. This is what makes a
    /// second `compile` call on the same state unable to silently redefine
    /// a function the first call already declared (spec §9's "repeated
    /// compile calls" open question, resolved in favor of the stricter
    /// collision rule - see DESIGN.md).
    pub fn declare_function(
        &mut self,
        source: &str,
        name: &str,
        loc: SourceLoc,
    ) -> Result<SymbolId, CompileError> {
        if self.reference_function(name).is_some() || self.reference_variable(name).is_some() {
            return Err(CompileError::new(
                source,
                loc,
                format!("Attempted to declare multiple global entities with the same name '{name}'."),
            ));
        }

        let index = self.num_functions;
        self.num_functions += 1;
        let id = self.push(Symbol {
            name: name.to_string(),
            kind: SymbolKind::Function {
                index,
                args: Vec::new(),
                locals: Vec::new(),
            },
            loc,
        });
        self.globals.push(id);
        Ok(id)
    }

    pub fn declare_foreign_function(&mut self, name: &str, loc: SourceLoc) -> SymbolId {
        let index = self.num_foreign_functions;
        self.num_foreign_functions += 1;
        let id = self.push(Symbol {
            name: name.to_string(),
            kind: SymbolKind::ForeignFunction { index },
            loc,
        });
        self.globals.push(id);
        id
    }

    pub fn enter_function(&mut self, id: SymbolId) {
        self.curr_func = Some(id);
    }

    pub fn leave_function(&mut self) {
        self.curr_func = None;
    }

    pub fn mark_initialized(&mut self, id: SymbolId) {
        match &mut self.get_mut(id).kind {
            SymbolKind::Global { initialized, .. } => *initialized = true,
            SymbolKind::Local { initialized, .. } => *initialized = true,
            _ => {}
        }
    }

    /// Final initialization-check pass (spec §4.3): every global or
    /// function-local must have been assigned before the program is
    /// considered compiled.
    pub fn check_all_initialized(&self, source: &str) -> Result<(), CompileError> {
        for (_, sym) in self.all_symbols() {
            if !sym.is_initialized() {
                return Err(CompileError::new(
                    source,
                    sym.loc.clone(),
                    format!("'{}' is never initialized.", sym.name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc::new("t", 1)
    }

    #[test]
    fn shadowing_across_scopes_is_allowed() {
        let mut table = SymbolTable::new();
        let f = table.declare_function("", "f", loc()).unwrap();
        table.enter_function(f);
        table.open_scope();
        let outer = table.declare_local("", "x", loc()).unwrap();
        table.open_scope();
        let inner = table.declare_local("", "x", loc()).unwrap();
        assert_ne!(outer, inner);
        table.close_scope();
        // Outer x is visible again now that the inner scope ended.
        assert_eq!(table.reference_variable("x"), Some(outer));
        table.close_scope();
    }

    #[test]
    fn duplicate_local_in_open_scope_is_an_error() {
        let mut table = SymbolTable::new();
        let f = table.declare_function("", "f", loc()).unwrap();
        table.enter_function(f);
        table.open_scope();
        table.declare_local("", "x", loc()).unwrap();
        let err = table.declare_local("", "x", loc());
        assert!(err.is_err());
    }

    #[test]
    fn argument_indices_are_assigned_left_to_right_below_fp() {
        let mut table = SymbolTable::new();
        let f = table.declare_function("", "f", loc()).unwrap();
        table.enter_function(f);
        let a = table.declare_argument("", "a", 2, loc()).unwrap();
        let b = table.declare_argument("", "b", 2, loc()).unwrap();
        match table.get(a).kind {
            SymbolKind::Local { index, .. } => assert_eq!(index, -2),
            _ => unreachable!(),
        }
        match table.get(b).kind {
            SymbolKind::Local { index, .. } => assert_eq!(index, -1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn duplicate_function_name_is_an_error() {
        let mut table = SymbolTable::new();
        table.declare_function("", "f", loc()).unwrap();
        let err = table.declare_function("", "f", loc());
        assert!(err.is_err());
    }
}
