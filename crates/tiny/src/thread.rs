//! The bytecode interpreter.
//!
//! A `Thread` is one independent execution context against a compiled
//! `State` - its own value stack, call-indirection stack, globals and GC
//! heap. Ported from `Tiny_Thread`/`Tiny_InitThread`/`Tiny_StartThread`/
//! `Tiny_ExecuteCycle`/`Tiny_CallFunction` in `tiny.c`; `ExecuteCycle`'s
//! `switch` over opcodes is ported case-by-case in [`Thread::step`].

use crate::error::RuntimeFault;
use crate::opcode::Opcode;
use crate::state::State;
use std::io::{self, BufRead, BufReader, Write};
use std::rc::Rc;
use tiny_core::heap::DEFAULT_GC_THRESHOLD;
use tiny_core::{Heap, Value};
use tracing::error;

/// Tunables a host can override per thread. Mirrors the constants the
/// original hardcodes (`TINY_THREAD_STACK_SIZE`, `TINY_THREAD_INDIR_SIZE`)
/// plus the GC's initial collection threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct ThreadConfig {
    pub stack_max: usize,
    pub indir_max: usize,
    pub gc_initial_threshold: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        ThreadConfig {
            stack_max: 128,
            indir_max: 256,
            gc_initial_threshold: DEFAULT_GC_THRESHOLD,
        }
    }
}

/// Where a thread sits in its lifecycle (spec §4.4). A thread may only be
/// driven by `execute_cycle`/`call_function` once `start` has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Uninitialized,
    Started,
    Running,
    /// Currently inside a host-initiated `call_function`, so re-entrant
    /// calls from within a foreign function nest correctly.
    Calling,
    Done,
}

/// One `CALL`'s saved indirection frame: argument count, caller's frame
/// pointer, and return address - the exact 3-tuple `DoPushIndir` packs onto
/// the indirection stack.
#[derive(Debug, Clone, Copy)]
struct IndirFrame {
    nargs: u32,
    saved_fp: usize,
    return_pc: i64,
}

pub struct Thread {
    state: Rc<State>,
    config: ThreadConfig,
    thread_state: ThreadState,
    /// Negative while uninitialized or after `HALT`/completed `RETURN`.
    pc: i64,
    fp: usize,
    stack: Vec<Value>,
    indir: Vec<IndirFrame>,
    globals: Vec<Value>,
    ret_val: Value,
    heap: Heap,
    output: Box<dyn Write>,
    input: Box<dyn BufRead>,
}

/// What happened during one `execute_cycle` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// An instruction ran; the thread may still have more to do.
    Continued,
    /// `pc` was already negative (e.g. after `HALT`) - nothing executed.
    Halted,
}

impl Thread {
    pub fn new(state: Rc<State>) -> Thread {
        Thread::with_config(state, ThreadConfig::default())
    }

    pub fn with_config(state: Rc<State>, config: ThreadConfig) -> Thread {
        Thread {
            state,
            config,
            thread_state: ThreadState::Uninitialized,
            pc: -1,
            fp: 0,
            stack: Vec::new(),
            indir: Vec::new(),
            globals: Vec::new(),
            ret_val: Value::Null,
            heap: Heap::new(config.gc_initial_threshold),
            output: Box::new(io::stdout()),
            input: Box::new(BufReader::new(io::stdin())),
        }
    }

    /// Redirects `PRINT` output, e.g. so a host or a test can capture it
    /// instead of writing to the process's stdout.
    pub fn set_output(&mut self, output: impl Write + 'static) {
        self.output = Box::new(output);
    }

    /// Redirects `READ` input away from the process's stdin.
    pub fn set_input(&mut self, input: impl BufRead + 'static) {
        self.input = Box::new(input);
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn thread_state(&self) -> ThreadState {
        self.thread_state
    }

    /// A thread is done iff `pc < 0` (spec §4.4), regardless of how it got
    /// there - `HALT`, a top-level `RETURN`, or simply never having been
    /// started yet.
    pub fn is_done(&self) -> bool {
        self.pc < 0
    }

    /// Allocates global storage, matching `AllocGlobals`: a no-op on a
    /// second call, since globals are sized once and persist for the
    /// thread's whole life.
    fn alloc_globals(&mut self) {
        let n = self.state.num_global_vars() as usize;
        if self.globals.len() < n {
            self.globals.resize(n, Value::Null);
        }
    }

    /// Starts the thread at the top of the compiled program, matching
    /// `Tiny_StartThread`.
    pub fn start(&mut self) {
        self.alloc_globals();
        self.pc = 0;
        self.fp = 0;
        self.stack.clear();
        self.indir.clear();
        self.thread_state = ThreadState::Started;
    }

    pub fn get_global(&self, index: usize) -> Value {
        self.globals[index].clone()
    }

    pub fn set_global(&mut self, index: usize, value: Value) {
        self.globals[index] = value;
    }

    /// Resolves a `ConstString`/`HeapString` value to its text, for hosts
    /// writing foreign functions that accept string arguments. `None` for
    /// any other variant.
    pub fn resolve_string<'a>(&'a self, value: &Value) -> Option<&'a str> {
        match value {
            Value::ConstString(idx) => Some(self.state.string(*idx)),
            Value::HeapString(h) => Some(self.heap.get_string(*h)),
            _ => None,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeFault> {
        if self.stack.len() >= self.config.stack_max {
            return Err(RuntimeFault::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeFault> {
        self.stack.pop().ok_or(RuntimeFault::StackUnderflow)
    }

    fn push_indir(&mut self, frame: IndirFrame) -> Result<(), RuntimeFault> {
        if self.indir.len() >= self.config.indir_max {
            return Err(RuntimeFault::IndirectionStackOverflow);
        }
        self.indir.push(frame);
        Ok(())
    }

    fn pop_indir(&mut self) -> Result<IndirFrame, RuntimeFault> {
        self.indir.pop().ok_or(RuntimeFault::IndirectionStackUnderflow)
    }

    fn expect_bool(&self, op: &'static str, value: Value) -> Result<bool, RuntimeFault> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(RuntimeFault::TypeError {
                op,
                found: other.type_name(),
            }),
        }
    }

    /// Reads one little-endian `i32` operand starting at `self.pc` and
    /// advances `self.pc` past it, matching `ReadInteger`.
    fn read_operand(&mut self) -> i32 {
        let pc = self.pc as usize;
        let bytes: [u8; 4] = self.state.code()[pc..pc + 4].try_into().unwrap();
        self.pc += 4;
        i32::from_le_bytes(bytes)
    }

    fn bin_number_op(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeFault> {
        let b = self.pop()?.to_number();
        let a = self.pop()?.to_number();
        self.push(Value::Number(f(a, b)))
    }

    /// `MOD`/`OR`/`AND` truncate both operands to `i32` first. A zero
    /// divisor for `MOD` maps to `0` rather than panicking - C's integer
    /// modulo-by-zero is undefined behavior, so there is no original
    /// semantics to preserve here.
    fn bin_int_op(&mut self, f: impl Fn(i32, i32) -> i32) -> Result<(), RuntimeFault> {
        let b = self.pop()?.to_number() as i32;
        let a = self.pop()?.to_number() as i32;
        self.push(Value::Number(f(a, b) as f64))
    }

    /// `EQU`'s type-aware rule: mismatched variants are unequal, except a
    /// `ConstString`/`HeapString` pair, which compares by content.
    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::ConstString(x), Value::ConstString(y)) => x == y,
            (Value::HeapString(x), Value::HeapString(y)) => {
                self.heap.get_string(*x) == self.heap.get_string(*y)
            }
            (Value::ConstString(x), Value::HeapString(y))
            | (Value::HeapString(y), Value::ConstString(x)) => {
                self.state.string(*x) == self.heap.get_string(*y)
            }
            (Value::Native(x), Value::Native(y)) => Heap::same_object(*x, *y),
            (Value::LightNative(x), Value::LightNative(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format!("{n}"),
            Value::ConstString(idx) => self.state.string(*idx).to_string(),
            Value::HeapString(h) => self.heap.get_string(*h).to_string(),
            Value::Native(h) => format!("<native at {h:?}>"),
            Value::LightNative(ptr) => format!("<light native at {:p}>", Rc::as_ptr(ptr)),
        }
    }

    fn call(&mut self, nargs: u32, target_pc: i64) -> Result<(), RuntimeFault> {
        self.push_indir(IndirFrame {
            nargs,
            saved_fp: self.fp,
            return_pc: self.pc,
        })?;
        self.fp = self.stack.len();
        self.pc = target_pc;
        Ok(())
    }

    /// `sp := fp` happens before the indirection frame is popped, so `fp`
    /// still refers to the returning call's frame when the truncation runs -
    /// matches `DoPopIndir`'s exact restore order.
    fn do_return(&mut self, value: Value) -> Result<(), RuntimeFault> {
        self.ret_val = value;
        self.stack.truncate(self.fp);
        let frame = self.pop_indir()?;
        let new_len = self
            .stack
            .len()
            .checked_sub(frame.nargs as usize)
            .ok_or(RuntimeFault::StackUnderflow)?;
        self.stack.truncate(new_len);
        self.fp = frame.saved_fp;
        self.pc = frame.return_pc;
        Ok(())
    }

    /// Runs exactly one opcode (a `CALLF` runs its foreign closure to
    /// completion, since the host contract has no way to suspend mid-call),
    /// then checks the GC trigger, matching `Tiny_ExecuteCycle` followed by
    /// its caller's `if (numObjects >= maxNumObjects) GarbageCollect(...)`.
    pub fn execute_cycle(&mut self) -> Result<CycleOutcome, RuntimeFault> {
        if self.pc < 0 {
            self.thread_state = ThreadState::Done;
            return Ok(CycleOutcome::Halted);
        }
        self.thread_state = ThreadState::Running;

        if let Err(fault) = self.step() {
            error!("{fault}");
            return Err(fault);
        }

        if self.heap.needs_collect() {
            self.collect();
        }

        if self.pc < 0 {
            self.thread_state = ThreadState::Done;
        }
        Ok(CycleOutcome::Continued)
    }

    fn collect(&mut self) {
        let roots = std::iter::once(&self.ret_val)
            .chain(self.stack.iter())
            .chain(self.globals.iter());
        self.heap.collect(roots);
    }

    fn step(&mut self) -> Result<(), RuntimeFault> {
        let pc = self.pc as usize;
        let byte = self.state.code()[pc];
        let Some(op) = Opcode::from_byte(byte) else {
            return Err(RuntimeFault::InvalidOpcode { pc, byte });
        };
        self.pc += 1;

        match op {
            Opcode::PushNull => self.push(Value::Null)?,
            Opcode::PushTrue => self.push(Value::Bool(true))?,
            Opcode::PushFalse => self.push(Value::Bool(false))?,
            Opcode::Pop => {
                self.pop()?;
            }

            Opcode::PushNumber => {
                let idx = self.read_operand() as u32;
                let n = self.state.number(idx);
                self.push(Value::Number(n))?;
            }
            Opcode::PushString => {
                let idx = self.read_operand() as u32;
                self.push(Value::ConstString(idx))?;
            }

            Opcode::Add => self.bin_number_op(|a, b| a + b)?,
            Opcode::Sub => self.bin_number_op(|a, b| a - b)?,
            Opcode::Mul => self.bin_number_op(|a, b| a * b)?,
            Opcode::Div => self.bin_number_op(|a, b| a / b)?,
            Opcode::Mod => self.bin_int_op(|a, b| if b == 0 { 0 } else { a % b })?,
            Opcode::Or => self.bin_int_op(|a, b| a | b)?,
            Opcode::And => self.bin_int_op(|a, b| a & b)?,

            Opcode::Lt => {
                let b = self.pop()?.to_number();
                let a = self.pop()?.to_number();
                self.push(Value::Bool(a < b))?;
            }
            Opcode::Lte => {
                let b = self.pop()?.to_number();
                let a = self.pop()?.to_number();
                self.push(Value::Bool(a <= b))?;
            }
            Opcode::Gt => {
                let b = self.pop()?.to_number();
                let a = self.pop()?.to_number();
                self.push(Value::Bool(a > b))?;
            }
            Opcode::Gte => {
                let b = self.pop()?.to_number();
                let a = self.pop()?.to_number();
                self.push(Value::Bool(a >= b))?;
            }
            Opcode::Equ => {
                let b = self.pop()?;
                let a = self.pop()?;
                let eq = self.values_equal(&a, &b);
                self.push(Value::Bool(eq))?;
            }

            Opcode::LogNot => {
                let a = self.pop()?;
                let b = self.expect_bool("LOG_NOT", a)?;
                self.push(Value::Bool(!b))?;
            }
            Opcode::LogAnd => {
                let b = self.pop()?;
                let a = self.pop()?;
                let ab = self.expect_bool("LOG_AND", a)?;
                let bb = self.expect_bool("LOG_AND", b)?;
                self.push(Value::Bool(ab && bb))?;
            }
            Opcode::LogOr => {
                let b = self.pop()?;
                let a = self.pop()?;
                let ab = self.expect_bool("LOG_OR", a)?;
                let bb = self.expect_bool("LOG_OR", b)?;
                self.push(Value::Bool(ab || bb))?;
            }

            Opcode::Print => {
                let value = self.pop()?;
                let text = self.format_value(&value);
                let _ = writeln!(self.output, "{text}");
            }
            Opcode::Read => {
                let mut line = String::new();
                let _ = self.input.read_line(&mut line);
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                let handle = self.heap.alloc_string(line);
                self.push(Value::HeapString(handle))?;
            }

            Opcode::Set => {
                let idx = self.read_operand() as usize;
                let value = self.pop()?;
                self.globals[idx] = value;
            }
            Opcode::Get => {
                let idx = self.read_operand() as usize;
                self.push(self.globals[idx].clone())?;
            }

            Opcode::Goto => {
                let target = self.read_operand() as i64;
                self.pc = target;
            }
            Opcode::Gotoz => {
                let target = self.read_operand() as i64;
                let cond = self.pop()?;
                let cond = self.expect_bool("GOTOZ", cond)?;
                if !cond {
                    self.pc = target;
                }
            }

            Opcode::Call => {
                let nargs = self.read_operand() as u32;
                let fidx = self.read_operand() as usize;
                let target = self.state.function_pc(fidx) as i64;
                self.call(nargs, target)?;
            }
            Opcode::Return => self.do_return(Value::Null)?,
            Opcode::ReturnValue => {
                let value = self.pop()?;
                self.do_return(value)?;
            }

            Opcode::Callf => {
                let nargs = self.read_operand() as usize;
                let fidx = self.read_operand() as usize;
                let base = self
                    .stack
                    .len()
                    .checked_sub(nargs)
                    .ok_or(RuntimeFault::StackUnderflow)?;
                let args: Vec<Value> = self.stack[base..].to_vec();
                let func = self.state.foreign_function(fidx);
                let result = func(self, &args);
                self.ret_val = result;
                self.stack.truncate(base);
            }

            Opcode::GetLocal => {
                let offset = self.read_operand() as i64;
                let idx = (self.fp as i64 + offset) as usize;
                self.push(self.stack[idx].clone())?;
            }
            Opcode::SetLocal => {
                let offset = self.read_operand() as i64;
                let idx = (self.fp as i64 + offset) as usize;
                let value = self.pop()?;
                self.stack[idx] = value;
            }

            Opcode::GetRetVal => {
                let value = self.ret_val.clone();
                self.push(value)?;
            }

            Opcode::Halt => {
                self.pc = -1;
            }
        }

        Ok(())
    }

    /// Invokes a compiled function from the host, matching
    /// `Tiny_CallFunction`: saves the thread's current execution position,
    /// pushes `args`, drives cycles until the call (and anything it itself
    /// calls) has returned, then restores the saved position and hands back
    /// the return register.
    pub fn call_function(&mut self, fidx: usize, args: &[Value]) -> Result<Value, RuntimeFault> {
        self.alloc_globals();

        let saved_pc = self.pc;
        let saved_fp = self.fp;
        let saved_stack_len = self.stack.len();
        let saved_indir_depth = self.indir.len();
        let saved_state = self.thread_state;

        for arg in args {
            self.push(arg.clone())?;
        }

        let target = self.state.function_pc(fidx) as i64;
        self.pc = target;
        self.push_indir(IndirFrame {
            nargs: args.len() as u32,
            saved_fp: self.fp,
            return_pc: -1,
        })?;
        self.fp = saved_stack_len + args.len();
        self.thread_state = ThreadState::Calling;

        while self.indir.len() > saved_indir_depth {
            self.execute_cycle()?;
        }

        let result = self.ret_val.clone();

        self.pc = saved_pc;
        self.fp = saved_fp;
        self.stack.truncate(saved_stack_len);
        self.thread_state = saved_state;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use std::rc::Rc;

    fn compiled(source: &str) -> Rc<State> {
        let mut state = State::new();
        state.compile_string("t", source).expect("compiles");
        Rc::new(state)
    }

    #[test]
    fn empty_program_runs_to_completion_immediately() {
        let state = compiled("");
        let mut thread = Thread::new(state);
        thread.start();
        let outcome = thread.execute_cycle().unwrap();
        assert_eq!(outcome, CycleOutcome::Continued);
        assert!(thread.is_done());
    }

    #[test]
    fn global_assignment_then_print_is_observable() {
        let state = compiled("x := 5 print(x)");
        let mut thread = Thread::new(state);
        let mut out = Vec::new();
        thread.set_output(std::io::Cursor::new(&mut out));
        thread.start();
        while !thread.is_done() {
            thread.execute_cycle().unwrap();
        }
    }

    #[test]
    fn recursive_function_computes_factorial_via_call_function() {
        let state = compiled(
            "func fact(n) { if (n <= 1) return 1 return n * fact(n - 1) }",
        );
        let fidx = state.function_index("fact");
        assert!(fidx >= 0);
        let mut thread = Thread::new(Rc::clone(&state));
        thread.start();
        while !thread.is_done() {
            thread.execute_cycle().unwrap();
        }
        let result = thread
            .call_function(fidx as usize, &[Value::Number(5.0)])
            .unwrap();
        assert_eq!(result.to_number(), 120.0);
    }

    #[test]
    fn division_by_zero_does_not_trap() {
        let state = compiled("x := 1 / 0");
        let mut thread = Thread::new(state);
        thread.start();
        while !thread.is_done() {
            thread.execute_cycle().unwrap();
        }
        assert_eq!(thread.get_global(0).to_number(), f64::INFINITY);
    }

    #[test]
    fn equality_across_number_and_bool_is_false() {
        let state = compiled("x := (1 == true)");
        let mut thread = Thread::new(state);
        thread.start();
        while !thread.is_done() {
            thread.execute_cycle().unwrap();
        }
        assert_eq!(thread.get_global(0).to_bool(), false);
    }
}
