//! The compiled program image: bytecode, function table, foreign-function
//! table, and the pools/symbols that produced them. A host builds one of
//! these, binds foreign functions and constants, compiles one or more
//! source strings into it, and then spins up any number of `Thread`s
//! against it - ported from `Tiny_State`/`Tiny_CreateState`/
//! `Tiny_CompileString`/`Tiny_CompileFile` in `tiny.c`.

use crate::codegen;
use crate::error::{CompileError, Diagnostic, SourceLoc};
use crate::opcode::Opcode;
use crate::parser;
use crate::pool::Pools;
use crate::symbol::{SymbolKind, SymbolTable};
use crate::thread::Thread;
use std::path::Path;
use std::rc::Rc;
use tiny_core::Value;
use tracing::{debug, error, warn};

/// A host-provided callable bound into a state's foreign-function table and
/// invoked by `CALLF`. Receives the thread so it can read/write globals,
/// allocate heap objects, or even call back into script functions.
pub type ForeignFunction = Rc<dyn Fn(&mut Thread, &[Value]) -> Value>;

pub struct State {
    code: Vec<u8>,
    function_pcs: Vec<u32>,
    foreign_functions: Vec<ForeignFunction>,
    symbols: SymbolTable,
    pools: Pools,
    diagnostics: Vec<Diagnostic>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> State {
        debug!("creating new state");
        State {
            code: Vec::new(),
            function_pcs: Vec::new(),
            foreign_functions: Vec::new(),
            symbols: SymbolTable::new(),
            pools: Pools::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn num_global_vars(&self) -> u32 {
        self.symbols.num_global_vars()
    }

    pub(crate) fn code(&self) -> &[u8] {
        &self.code
    }

    pub(crate) fn function_pc(&self, index: usize) -> u32 {
        self.function_pcs[index]
    }

    pub(crate) fn foreign_function(&self, index: usize) -> ForeignFunction {
        self.foreign_functions[index].clone()
    }

    pub(crate) fn number(&self, index: u32) -> f64 {
        self.pools.number(index)
    }

    pub(crate) fn string(&self, index: u32) -> &str {
        self.pools.string(index)
    }

    /// Binds a host function, callable from scripts under `name` via
    /// `CALLF`. Per the host contract (spec §9's "forward references"
    /// design note), every foreign function a program calls must be bound
    /// before that program is compiled - call resolution for `CALLF`
    /// happens at code-gen time, not lazily at link time.
    pub fn bind_function(
        &mut self,
        name: &str,
        func: impl Fn(&mut Thread, &[Value]) -> Value + 'static,
    ) -> Result<(), CompileError> {
        let loc = SourceLoc::new("<native>", 0);
        if self.symbols.reference_function(name).is_some() {
            return Err(CompileError::new(
                "",
                loc,
                format!("Attempted to bind multiple foreign functions with the same name '{name}'."),
            ));
        }
        self.symbols.declare_foreign_function(name, loc);
        self.foreign_functions.push(Rc::new(func));
        Ok(())
    }

    /// Binds a named compile-time numeric constant, as if the program had
    /// written `name :: <value>` at global scope.
    pub fn bind_const_number(&mut self, name: &str, value: f64) -> Result<(), CompileError> {
        let loc = SourceLoc::new("<native>", 0);
        let idx = self.pools.register_number("", loc.clone(), value)?;
        self.symbols.declare_const("", name, false, idx, loc)?;
        Ok(())
    }

    /// Binds a named compile-time string constant, as if the program had
    /// written `name :: "value"` at global scope.
    pub fn bind_const_string(&mut self, name: &str, value: &str) -> Result<(), CompileError> {
        let loc = SourceLoc::new("<native>", 0);
        let idx = self.pools.register_string("", loc.clone(), value)?;
        self.symbols.declare_const("", name, true, idx, loc)?;
        Ok(())
    }

    /// –1 if `name` is not a global variable, matching `Tiny_GetGlobalIndex`.
    pub fn global_index(&self, name: &str) -> i32 {
        match self.symbols.reference_variable(name) {
            Some(id) => match &self.symbols.get(id).kind {
                SymbolKind::Global { index, .. } => *index as i32,
                _ => -1,
            },
            None => -1,
        }
    }

    /// –1 if `name` is not a script function, matching `Tiny_GetFunctionIndex`.
    pub fn function_index(&self, name: &str) -> i32 {
        match self.symbols.reference_function(name) {
            Some(id) => match &self.symbols.get(id).kind {
                SymbolKind::Function { index, .. } => *index as i32,
                _ => -1,
            },
            None => -1,
        }
    }

    /// Compiles `source` and appends its bytecode to this state's program.
    /// May be called more than once on the same state: a trailing `HALT`
    /// from a prior compilation is popped first so the new program picks up
    /// where the last one left off, matching `CompileState`'s "overwrite
    /// the trailing HALT" behavior.
    pub fn compile_string(&mut self, name: &str, source: &str) -> Result<(), CompileError> {
        debug!(file = name, "compiling");

        if self.code.last() == Some(&(Opcode::Halt as u8)) {
            self.code.pop();
        }

        let diagnostics_before = self.diagnostics.len();

        let result = self.compile_string_inner(name, source);

        for diagnostic in &self.diagnostics[diagnostics_before..] {
            warn!("{diagnostic}");
        }

        if let Err(err) = &result {
            error!("{err}");
        }

        result
    }

    fn compile_string_inner(&mut self, name: &str, source: &str) -> Result<(), CompileError> {
        let program = parser::parse_program(
            name,
            source,
            &mut self.symbols,
            &mut self.pools,
            &mut self.diagnostics,
        )?;

        // Functions may have been declared (and registered) during this
        // parse; size the table before code generation writes into it.
        self.function_pcs
            .resize(self.symbols.num_functions() as usize, 0);

        codegen::compile_statements(
            source,
            &program,
            &mut self.symbols,
            &mut self.pools,
            &mut self.code,
            &mut self.function_pcs,
        )?;

        self.code.push(Opcode::Halt as u8);
        self.symbols.check_all_initialized(source)?;
        Ok(())
    }

    pub fn compile_file(&mut self, path: &Path) -> Result<(), CompileError> {
        let name = path.to_string_lossy().into_owned();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CompileError::new(
                "",
                SourceLoc::new(name.clone(), 0),
                format!("Unable to open file '{name}' for reading: {e}"),
            )
        })?;
        self.compile_string(&name, &source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_compile_calls_append_to_one_program() {
        let mut state = State::new();
        state.compile_string("a", "x := 1").unwrap();
        state.compile_string("b", "y := x + 1").unwrap();
        assert_eq!(state.global_index("x"), 0);
        assert_eq!(state.global_index("y"), 1);
    }

    #[test]
    fn a_later_compile_call_cannot_redefine_an_earlier_function() {
        let mut state = State::new();
        state.compile_string("a", "func f() { return 1 }").unwrap();
        let err = state.compile_string("b", "func f() { return 2 }");
        assert!(err.is_err());
    }

    #[test]
    fn unknown_global_and_function_names_resolve_to_negative_one() {
        let state = State::new();
        assert_eq!(state.global_index("nope"), -1);
        assert_eq!(state.function_index("nope"), -1);
    }
}
