//! Runtime error conditions.
//!
//! Every runtime failure surfaces as a raised exception object routed
//! through the unwind machinery; there is no silent local recovery. The
//! builtin error classes are ordinary field objects with a single readable
//! `message` field, registered and sealed during bootstrap. Constructing
//! an error formats its message with plain Rust formatting — the reporting
//! path must never fall back into dynamic dispatch, or a failing
//! formatting method could raise while a raise is already in flight.

use crate::class::ClassId;
use crate::heap::Body;
use crate::interning::Sym;
use crate::tagged::Value;
use crate::unwind::Raise;
use crate::vm::Runtime;

impl Runtime {
    /// Allocate an instance of an error class with its message in field 0.
    pub fn exception(&mut self, class: ClassId, message: String) -> Raise {
        let msg = self.new_string(&message);
        let h = self
            .heap
            .alloc(class, Body::Fields(vec![msg].into_boxed_slice()));
        self.raise(Value::from_handle(h))
    }

    pub(crate) fn sym_name(&self, sym: Sym) -> String {
        self.interner
            .resolve(sym)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<unknown>".to_owned())
    }

    pub fn raise_arity(&mut self, expected: usize, vararg: bool, got: usize) -> Raise {
        let class = self.specials.arity_error;
        let msg = if vararg {
            format!("expected at least {expected} arguments, got {got}")
        } else {
            format!("expected {expected} arguments, got {got}")
        };
        self.exception(class, msg)
    }

    pub fn raise_method_missing(&mut self, recv: Value, name: Sym) -> Raise {
        let class = self.specials.method_missing;
        let msg = format!(
            "no method {:?} on {}",
            self.sym_name(name),
            self.describe(recv)
        );
        self.exception(class, msg)
    }

    pub fn raise_field_missing(&mut self, recv: Value, name: Sym) -> Raise {
        let class = self.specials.field_missing;
        let msg = format!(
            "no field {:?} on {}",
            self.sym_name(name),
            self.describe(recv)
        );
        self.exception(class, msg)
    }

    pub fn raise_type_error(&mut self, expected: &str, got: Value) -> Raise {
        let class = self.specials.type_error;
        let msg = format!("expected {expected}, got {}", self.describe(got));
        self.exception(class, msg)
    }

    pub fn raise_duplicate(&mut self, what: &str, name: &str) -> Raise {
        let class = self.specials.duplicate_definition;
        self.exception(class, format!("{what} {name:?} is already defined"))
    }

    pub fn raise_structural(&mut self, class_name: &str) -> Raise {
        let class = self.specials.structural_class;
        self.exception(
            class,
            format!("class {class_name:?} mixes inline fields with cdata storage"),
        )
    }

    pub fn raise_undefined_symbol(&mut self, name: &str) -> Raise {
        let class = self.specials.undefined_symbol;
        self.exception(class, format!("static symbol {name:?} is not defined"))
    }
}
