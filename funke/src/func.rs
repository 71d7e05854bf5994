//! Callable objects: free functions, closures, varargs.

use crate::heap::Body;
use crate::interning::Sym;
use crate::tagged::Value;
use crate::unwind::RtResult;
use crate::vm::Runtime;

pub const MAX_ARITY: u8 = 10;

/// Every callable body is an ordinary Rust function receiving the runtime
/// context and the fully assembled argument slice.
pub type NativeFn = fn(&mut Runtime, &[Value]) -> RtResult<Value>;

pub struct Func {
    pub ptr: NativeFn,
    /// Declared user-facing arity (0–10). For varargs this includes the
    /// trailing collection tuple.
    pub arity: u8,
    /// Excess positional arguments are packed into a trailing tuple.
    pub vararg: bool,
    /// Closures receive their own Value as an implicit extra first
    /// parameter so the body can recover the captured array.
    pub is_block: bool,
    pub name: Option<Sym>,
    pub captured: Option<Box<[Value]>>,
}

pub fn make_function(rt: &mut Runtime, ptr: NativeFn, arity: u8, name: Option<Sym>) -> Value {
    debug_assert!(arity <= MAX_ARITY, "arity out of range");
    let class = rt.specials.func_class;
    let h = rt.heap.alloc(
        class,
        Body::Func(Func {
            ptr,
            arity,
            vararg: false,
            is_block: false,
            name,
            captured: None,
        }),
    );
    Value::from_handle(h)
}

pub fn make_closure(rt: &mut Runtime, ptr: NativeFn, arity: u8, captured: Vec<Value>) -> Value {
    debug_assert!(arity <= MAX_ARITY, "arity out of range");
    let class = rt.specials.func_class;
    let h = rt.heap.alloc(
        class,
        Body::Func(Func {
            ptr,
            arity,
            vararg: false,
            is_block: true,
            name: None,
            captured: Some(captured.into_boxed_slice()),
        }),
    );
    Value::from_handle(h)
}

/// Flag a callable as vararg after construction.
pub fn mark_vararg(rt: &mut Runtime, callable: Value) -> RtResult<()> {
    let found = callable
        .is_ref()
        .then(|| rt.heap.get_mut(callable.as_handle()))
        .flatten()
        .map(|obj| match &mut obj.body {
            Body::Func(f) => {
                f.vararg = true;
                true
            }
            _ => false,
        })
        .unwrap_or(false);
    if found {
        Ok(())
    } else {
        Err(rt.raise_type_error("callable", callable))
    }
}

/// Recover a captured value from the implicit self argument of a closure.
pub fn captured_value(rt: &mut Runtime, closure: Value, index: usize) -> RtResult<Value> {
    let slot = closure
        .is_ref()
        .then(|| rt.heap.get(closure.as_handle()))
        .flatten()
        .and_then(|obj| match &obj.body {
            Body::Func(f) => f.captured.as_ref().and_then(|c| c.get(index).copied()),
            _ => None,
        });
    match slot {
        Some(v) => Ok(v),
        None => Err(rt.raise_type_error("closure with captured values", closure)),
    }
}
