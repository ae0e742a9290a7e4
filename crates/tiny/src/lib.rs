//! An embeddable, statically-scoped, dynamically-typed scripting language
//! compiled to a small register-less bytecode and executed by a stack
//! machine with a mark-sweep garbage collector.
//!
//! A host builds a [`State`], binds any foreign functions and constants it
//! wants scripts to see, compiles one or more source strings into it, then
//! drives any number of [`Thread`]s against the compiled program:
//!
//! ```no_run
//! use tiny::{State, Thread};
//!
//! let mut state = State::new();
//! state.compile_string("main", "x := 1 + 2 print(x)").unwrap();
//!
//! let mut thread = Thread::new(std::rc::Rc::new(state));
//! thread.start();
//! while !thread.is_done() {
//!     thread.execute_cycle().unwrap();
//! }
//! ```

mod ast;
mod codegen;
mod error;
mod lexer;
mod opcode;
mod parser;
mod pool;
mod state;
mod symbol;
mod thread;

pub use error::{render_source_window, CompileError, Diagnostic, RuntimeFault, Severity, SourceLoc};
pub use state::{ForeignFunction, State};
pub use symbol::MAX_ARGS;
pub use thread::{CycleOutcome, Thread, ThreadConfig, ThreadState};

pub use tiny_core::{Handle, Heap, NativeObject, Value};
