//! Arity-checked invocation of callables and methods.
//!
//! Every call funnels through [`call`]: arity validation, vararg
//! collection, the implicit closure-self parameter, and the call
//! annotation stack that names active calls for uncaught-exception traces.

use crate::heap::Body;
use crate::interning::Sym;
use crate::sig::SigRecord;
use crate::tagged::Value;
use crate::unwind::RtResult;
use crate::vm::Runtime;

struct CallInfo {
    ptr: crate::func::NativeFn,
    arity: usize,
    vararg: bool,
    is_block: bool,
    name: Option<Sym>,
}

fn callable_info(rt: &Runtime, callee: Value) -> Option<CallInfo> {
    let obj = rt.obj(callee)?;
    match &obj.body {
        Body::Func(f) => Some(CallInfo {
            ptr: f.ptr,
            arity: f.arity as usize,
            vararg: f.vararg,
            is_block: f.is_block,
            name: f.name,
        }),
        _ => None,
    }
}

/// Call `callee` with `args`.
///
/// Non-vararg callables demand exactly the declared arity. A vararg
/// callable with declared arity N accepts N−1 or more arguments; the
/// arguments from position N−1 onward are collected into one tuple passed
/// as the final parameter. A closure additionally receives its own Value
/// prepended, invisible to the caller.
pub fn call(rt: &mut Runtime, callee: Value, args: &[Value]) -> RtResult<Value> {
    let Some(info) = callable_info(rt, callee) else {
        return Err(rt.raise_type_error("callable", callee));
    };

    let mut full = Vec::with_capacity(info.arity + 1);
    if info.is_block {
        full.push(callee);
    }
    if info.vararg {
        let required = info.arity.saturating_sub(1);
        if args.len() < required {
            return Err(rt.raise_arity(required, true, args.len()));
        }
        full.extend_from_slice(&args[..required]);
        let rest = rt.new_tuple(args[required..].to_vec());
        full.push(rest);
    } else {
        if args.len() != info.arity {
            return Err(rt.raise_arity(info.arity, false, args.len()));
        }
        full.extend_from_slice(args);
    }

    let note = info.name.unwrap_or(rt.specials.anon_sym);
    rt.annotations.push(note);
    let result = (info.ptr)(rt, &full);
    rt.annotations.pop();
    result
}

/// Resolve `name` on the receiver's class and invoke it with the receiver
/// prepended as the implicit first argument.
pub fn method_call(rt: &mut Runtime, recv: Value, name: Sym, args: &[Value]) -> RtResult<Value> {
    let callable = rt.dispatch_method(recv, name)?;
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(recv);
    full.extend_from_slice(args);
    call(rt, callable, &full)
}

impl Runtime {
    /// Validate an argument count against a persisted signature record at
    /// the static-call boundary.
    pub fn check_signature(&mut self, record: &SigRecord, argc: usize) -> RtResult<()> {
        if record.accepts(argc) {
            Ok(())
        } else if record.variadic {
            Err(self.raise_arity(record.params.len().saturating_sub(1), true, argc))
        } else {
            Err(self.raise_arity(record.params.len(), false, argc))
        }
    }
}

#[cfg(test)]
mod call_tests {
    use super::*;
    use crate::func::{captured_value, make_closure, make_function, mark_vararg};
    use crate::heap::Body;
    use crate::unwind::CatchKind;

    fn sum2(rt: &mut Runtime, args: &[Value]) -> RtResult<Value> {
        let _ = rt;
        Ok(Value::from_int(args[0].as_int() + args[1].as_int()))
    }

    fn count_rest(rt: &mut Runtime, args: &[Value]) -> RtResult<Value> {
        // arity 2 vararg: args = [first, rest-tuple]
        let rest = rt.tuple_items(args[1]).expect("trailing tuple").len();
        Ok(Value::from_int(rest as i64))
    }

    fn add_captured(rt: &mut Runtime, args: &[Value]) -> RtResult<Value> {
        // args[0] is the closure itself
        let base = captured_value(rt, args[0], 0)?;
        Ok(Value::from_int(base.as_int() + args[1].as_int()))
    }

    #[test]
    fn exact_arity_is_enforced() {
        let mut rt = Runtime::new();
        let f = make_function(&mut rt, sum2, 2, None);
        let ok = call(&mut rt, f, &[Value::from_int(2), Value::from_int(3)]).unwrap();
        assert_eq!(ok.as_int(), 5);

        for bad in [&[Value::from_int(1)][..], &[Value::NIL; 3][..]] {
            let err = call(&mut rt, f, bad).unwrap_err();
            assert!(rt.is_instance_of(err.payload, rt.specials.arity_error));
        }
    }

    #[test]
    fn vararg_floor_and_tuple_collection() {
        let mut rt = Runtime::new();
        let f = make_function(&mut rt, count_rest, 2, None);
        mark_vararg(&mut rt, f).unwrap();

        let err = call(&mut rt, f, &[]).unwrap_err();
        assert!(rt.is_instance_of(err.payload, rt.specials.arity_error));

        for n in [1usize, 2, 5] {
            let args: Vec<Value> = (0..n).map(|i| Value::from_int(i as i64)).collect();
            let got = call(&mut rt, f, &args).unwrap();
            assert_eq!(got.as_int(), (n - 1) as i64, "rest tuple size for {n} args");
        }
    }

    #[test]
    fn closures_recover_their_captured_values() {
        let mut rt = Runtime::new();
        let c = make_closure(&mut rt, add_captured, 1, vec![Value::from_int(100)]);
        let got = call(&mut rt, c, &[Value::from_int(7)]).unwrap();
        assert_eq!(got.as_int(), 107);
    }

    #[test]
    fn calling_a_non_callable_fails() {
        let mut rt = Runtime::new();
        let s = rt.new_string("not a function");
        let err = call(&mut rt, s, &[]).unwrap_err();
        assert!(rt.is_instance_of(err.payload, rt.specials.type_error));
        let err = call(&mut rt, Value::from_int(9), &[]).unwrap_err();
        assert!(rt.is_instance_of(err.payload, rt.specials.type_error));
    }

    fn boom(rt: &mut Runtime, _args: &[Value]) -> RtResult<Value> {
        let payload = rt.new_string("kaboom");
        Err(rt.raise(payload))
    }

    #[test]
    fn raise_snapshots_the_annotation_stack() {
        let mut rt = Runtime::new();
        let name = rt.intern("boom");
        let f = make_function(&mut rt, boom, 0, Some(name));
        let err = call(&mut rt, f, &[]).unwrap_err();
        assert_eq!(err.trace.len(), 1);
        assert_eq!(&*err.trace[0], "boom");
        // the annotation stack itself is unwound back to empty
        assert!(rt.annotations.is_empty());
    }

    #[test]
    fn method_call_prepends_the_receiver() {
        let mut rt = Runtime::new();
        let point = rt.intern("Pair");
        let class = rt.register_class_sym(point, None, 0).unwrap();
        let a = rt.intern("a");
        rt.add_field_sym(class, a, crate::class::FieldAccess::READ | crate::class::FieldAccess::WRITE)
            .unwrap();

        fn get_a(rt: &mut Runtime, args: &[Value]) -> RtResult<Value> {
            let a = rt.intern("a");
            rt.get_field(args[0], a)
        }
        let m = make_function(&mut rt, get_a, 1, None);
        let name = rt.intern("geta");
        rt.add_method_sym(class, name, m).unwrap();
        rt.finalize_registration().unwrap();

        let obj = rt.new_object(class).unwrap();
        rt.set_field(obj, a, Value::from_int(11)).unwrap();
        let got = method_call(&mut rt, obj, name, &[]).unwrap();
        assert_eq!(got.as_int(), 11);

        let missing = rt.intern("absent");
        let err = method_call(&mut rt, obj, missing, &[]).unwrap_err();
        assert!(rt.is_instance_of(err.payload, rt.specials.method_missing));
    }

    #[test]
    fn arity_error_is_catchable_by_class() {
        let mut rt = Runtime::new();
        let f = make_function(&mut rt, sum2, 2, None);
        let caught = rt.try_catch(
            CatchKind::Class(rt.specials.arity_error),
            |rt| call(rt, f, &[]),
            |rt, payload| {
                assert!(rt.is_instance_of(payload, rt.specials.arity_error));
                Ok(Value::TRUE)
            },
        );
        assert_eq!(caught.unwrap(), Value::TRUE);
    }

    #[test]
    fn vararg_func_body_sees_fixed_then_tuple() {
        let mut rt = Runtime::new();
        fn shape(rt: &mut Runtime, args: &[Value]) -> RtResult<Value> {
            assert_eq!(args.len(), 2);
            assert!(args[0].is_int());
            let items = rt.tuple_items(args[1]).expect("tuple");
            let sum: i64 = items.iter().map(|v| v.as_int()).sum();
            Ok(Value::from_int(args[0].as_int() * 1000 + sum))
        }
        let f = make_function(&mut rt, shape, 2, None);
        mark_vararg(&mut rt, f).unwrap();
        let got = call(
            &mut rt,
            f,
            &[
                Value::from_int(7),
                Value::from_int(1),
                Value::from_int(2),
                Value::from_int(3),
            ],
        )
        .unwrap();
        assert_eq!(got.as_int(), 7006);
    }

    #[test]
    fn signature_records_gate_static_calls() {
        let mut rt = Runtime::new();
        let fixed = SigRecord::parse("fn geom::dist v 2 p p").unwrap();
        assert!(rt.check_signature(&fixed, 2).is_ok());
        let err = rt.check_signature(&fixed, 3).unwrap_err();
        assert!(rt.is_instance_of(err.payload, rt.specials.arity_error));

        let variadic = SigRecord::parse("fn fmt::join v 2 s *").unwrap();
        assert!(rt.check_signature(&variadic, 1).is_ok());
        assert!(rt.check_signature(&variadic, 6).is_ok());
        let err = rt.check_signature(&variadic, 0).unwrap_err();
        assert!(rt.is_instance_of(err.payload, rt.specials.arity_error));
    }

    #[test]
    fn non_func_body_is_rejected_by_mark_vararg() {
        let mut rt = Runtime::new();
        let class = rt.specials.tuple_class;
        let v = Value::from_handle(rt.heap.alloc(class, Body::Tuple(Box::new([]))));
        assert!(mark_vararg(&mut rt, v).is_err());
    }
}
