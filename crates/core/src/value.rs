//! The tagged value union scripts and the host exchange.
//!
//! Mirrors `Tiny_Value` from the original C implementation: a small closed
//! set of variants, numbers are IEEE-754 doubles, and strings come in two
//! flavors - `ConstString` (an index into a process-external literal pool
//! owned by the compiled program) and `HeapString` (owned bytes tracked by
//! the per-thread GC heap).

use crate::heap::{Handle, Heap};
use std::any::Any;
use std::rc::Rc;

/// A host-provided hook set for a `Native` value, standing in for the C
/// `Tiny_NativeProp` vtable. Every method has a no-op default, matching the
/// "any field may be absent" contract in the spec.
pub trait NativeObject: Any {
    /// Name used in diagnostics; analogous to `Tiny_NativeProp::name`.
    fn type_name(&self) -> &str {
        "native"
    }

    /// Invoked while this object is being marked reachable, so the host can
    /// transitively protect child objects it owns from this collection.
    fn protect_from_gc(&self, _heap: &mut Heap) {}

    /// Invoked once, right before this object is freed by the sweeper.
    fn finalize(&mut self) {}

    /// Optional string conversion for `PRINT`/diagnostics.
    fn to_string_value(&self) -> Option<Value> {
        None
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A value a Tiny script or the host can hold.
///
/// `LightNative` is intentionally *not* `Handle`-based: per the spec it is
/// "not heap-tracked" by the GC, so it is represented as an `Rc<dyn Any>`
/// whose lifetime is governed by Rust's own reference counting rather than
/// the mark-sweep heap. Equality on it is `Rc::ptr_eq`, matching the
/// raw-address-equality rule for light natives.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    ConstString(u32),
    HeapString(Handle),
    Native(Handle),
    LightNative(Rc<dyn Any>),
}

impl Value {
    pub fn new_bool(b: bool) -> Value {
        Value::Bool(b)
    }

    pub fn new_number(n: f64) -> Value {
        Value::Number(n)
    }

    pub fn new_const_string(pool_index: u32) -> Value {
        Value::ConstString(pool_index)
    }

    pub fn new_light_native(ptr: Rc<dyn Any>) -> Value {
        Value::LightNative(ptr)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `false` for any non-`Bool` value, mirroring `Tiny_ToBool`.
    pub fn to_bool(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    /// Returns `0.0` for any non-`Number` value, mirroring `Tiny_ToNumber`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            _ => 0.0,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::ConstString(_) => "string",
            Value::HeapString(_) => "string",
            Value::Native(_) => "native",
            Value::LightNative(_) => "light_native",
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::ConstString(i) => write!(f, "ConstString(#{i})"),
            Value::HeapString(h) => write!(f, "HeapString({h:?})"),
            Value::Native(h) => write!(f, "Native({h:?})"),
            Value::LightNative(_) => write!(f, "LightNative(..)"),
        }
    }
}
