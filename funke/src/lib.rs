mod call;
mod class;
mod errors;
mod func;
mod heap;
mod interning;
mod modules;
mod sig;
mod table;
mod tagged;
mod unwind;
mod vm;

pub use call::{call, method_call};
pub use class::{ClassId, FieldAccess, FieldSlot, VIRTUAL_THRESHOLD};
pub use func::{
    Func, MAX_ARITY, NativeFn, captured_value, make_closure, make_function, mark_vararg,
};
pub use heap::{Body, Heap, Obj, deep_eq, deep_hash};
pub use interning::{Interner, Statics, Sym};
pub use modules::NativeModule;
pub use sig::{SigError, SigRecord};
pub use table::OpenTable;
pub use tagged::{HANDLE_GEN_MASK, Handle, Value};
pub use unwind::{CatchKind, Raise, RtResult};
pub use vm::{Runtime, Specials};
