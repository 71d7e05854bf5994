//! Typed try/catch/finally built on native `Result` propagation.
//!
//! An in-flight exception is an `Err(Raise)` carrying the raised payload
//! Value plus a snapshot of the call-annotation stack taken at raise time.
//! Protected regions are expressed as combinators instead of a saved-
//! continuation stack, which preserves the ordering guarantee by
//! construction: for `try { try { raise E } finally { F1 } } catch (E) C
//! finally { F2 }` the bodies run in the order F1, C, F2, and every
//! intervening finally body runs exactly once no matter how many try
//! levels the raise skips.

use std::sync::Arc;

use crate::class::ClassId;
use crate::heap::Body;
use crate::tagged::Value;
use crate::vm::Runtime;

/// An exception in flight.
#[derive(Debug)]
pub struct Raise {
    pub payload: Value,
    /// Names of the calls active when the raise was created, outermost
    /// first. Used only for the uncaught-exception report.
    pub trace: Box<[Arc<str>]>,
}

pub type RtResult<T> = Result<T, Raise>;

/// What a catch frame accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchKind {
    /// Wildcard: accepts any raised value.
    Any,
    /// Accepts payloads whose class chain contains this class.
    Class(ClassId),
}

impl Runtime {
    /// Begin unwinding with `payload`. The annotation stack is resolved to
    /// names immediately; the stack itself keeps unwinding normally.
    pub fn raise(&self, payload: Value) -> Raise {
        log::trace!("raise {}", self.describe(payload));
        Raise {
            payload,
            trace: self
                .annotations
                .iter()
                .map(|&sym| {
                    self.interner
                        .resolve(sym)
                        .unwrap_or_else(|| Arc::from("<unknown>"))
                })
                .collect(),
        }
    }

    fn accepts(&self, kind: CatchKind, payload: Value) -> bool {
        match kind {
            CatchKind::Any => true,
            CatchKind::Class(target) => self
                .class_of(payload)
                .is_some_and(|c| self.classes.is_subclass(c, target)),
        }
    }

    /// Run `body` under a catch frame. A raise whose payload `kind`
    /// accepts transfers control to `handler`; anything else propagates.
    pub fn try_catch<T>(
        &mut self,
        kind: CatchKind,
        body: impl FnOnce(&mut Self) -> RtResult<T>,
        handler: impl FnOnce(&mut Self, Value) -> RtResult<T>,
    ) -> RtResult<T> {
        match body(self) {
            Ok(v) => Ok(v),
            Err(raise) if self.accepts(kind, raise.payload) => {
                log::trace!("caught {}", self.describe(raise.payload));
                handler(self, raise.payload)
            }
            Err(raise) => Err(raise),
        }
    }

    /// Run `body` under a finally frame. The finalizer runs exactly once
    /// on both the normal and the raising path; it is not a handler —
    /// after it completes, unwinding resumes. A raise from the finalizer
    /// itself supersedes the in-flight one.
    pub fn try_finally<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> RtResult<T>,
        finalizer: impl FnOnce(&mut Self) -> RtResult<()>,
    ) -> RtResult<T> {
        let outcome = body(self);
        match finalizer(self) {
            Ok(()) => outcome,
            Err(superseding) => Err(superseding),
        }
    }

    /// Best-effort human-readable report for an exception that reached the
    /// top. This path performs no dynamic dispatch and cannot raise.
    pub fn report_uncaught(&self, raise: &Raise) {
        let what = self.describe(raise.payload);
        log::error!("uncaught exception: {what}");
        eprintln!("uncaught exception: {what}");
        for name in raise.trace.iter().rev() {
            eprintln!("  in {name}");
        }
    }

    /// Plain textual rendering of a value for diagnostics. Reads class
    /// names and message fields directly; never dispatches.
    pub fn describe(&self, v: Value) -> String {
        if !v.is_ref() {
            return format!("{v:?}");
        }
        let Some(obj) = self.obj(v) else {
            return "<destroyed object>".to_owned();
        };
        let class_name = self
            .interner
            .resolve(self.classes.get(obj.class).name)
            .unwrap_or_else(|| Arc::from("<class>"));
        match &obj.body {
            Body::Str(s) => format!("{class_name}({s:?})"),
            Body::Fields(fields) => {
                // error-style objects carry their message in field 0
                if let Some(first) = fields.first() {
                    if let Some(msg) = self.str_content(*first) {
                        return format!("{class_name}: {msg}");
                    }
                }
                format!("{class_name} instance")
            }
            Body::Tuple(t) => format!("{class_name} of {}", t.len()),
            Body::CData(b) => format!("{class_name} cdata of {} bytes", b.len()),
            Body::Func(_) => format!("{class_name}"),
            Body::Map(m) => format!("{class_name} of {}", m.len()),
            Body::Set(s) => format!("{class_name} of {}", s.len()),
        }
    }
}

#[cfg(test)]
mod unwind_tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn order_log() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) + Clone) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let push = {
            let log = log.clone();
            move |step: &'static str| log.borrow_mut().push(step)
        };
        (log, push)
    }

    #[test]
    fn catch_matches_wildcard() {
        let mut rt = Runtime::new();
        let out = rt.try_catch(
            CatchKind::Any,
            |rt| {
                let payload = rt.new_string("anything");
                Err(rt.raise(payload))
            },
            |_rt, _payload| Ok(Value::from_int(1)),
        );
        assert_eq!(out.unwrap().as_int(), 1);
    }

    #[test]
    fn catch_by_class_skips_other_classes() {
        let mut rt = Runtime::new();
        let te = rt.specials.type_error;
        let out = rt.try_catch(
            CatchKind::Class(te),
            |rt| -> RtResult<Value> {
                // an ArityError must fly past a TypeError frame
                Err(rt.raise_arity(2, false, 0))
            },
            |_rt, _p| Ok(Value::NIL),
        );
        let err = out.unwrap_err();
        assert!(rt.is_instance_of(err.payload, rt.specials.arity_error));
    }

    #[test]
    fn nested_finally_catch_finally_ordering() {
        let mut rt = Runtime::new();
        let (log, push) = order_log();

        let p1 = push.clone();
        let p2 = push.clone();
        let p3 = push.clone();
        let result = rt.try_finally(
            |rt| {
                rt.try_catch(
                    CatchKind::Any,
                    |rt| {
                        rt.try_finally(
                            |rt| -> RtResult<Value> {
                                let payload = rt.new_string("E");
                                Err(rt.raise(payload))
                            },
                            |_rt| {
                                p1("F1");
                                Ok(())
                            },
                        )
                    },
                    |_rt, _p| {
                        p2("C");
                        Ok(Value::NIL)
                    },
                )
            },
            |_rt| {
                p3("F2");
                Ok(())
            },
        );
        assert!(result.is_ok());
        assert_eq!(*log.borrow(), vec!["F1", "C", "F2"]);
    }

    #[test]
    fn finally_runs_once_on_the_normal_path_too() {
        let mut rt = Runtime::new();
        let (log, push) = order_log();
        let out = rt.try_finally(
            |_rt| Ok(Value::from_int(5)),
            |_rt| {
                push("F");
                Ok(())
            },
        );
        assert_eq!(out.unwrap().as_int(), 5);
        assert_eq!(*log.borrow(), vec!["F"]);
    }

    #[test]
    fn raise_inside_handler_propagates_past_the_frame() {
        let mut rt = Runtime::new();
        let (log, push) = order_log();
        let out: RtResult<Value> = rt.try_finally(
            |rt| {
                rt.try_catch(
                    CatchKind::Any,
                    |rt| {
                        let payload = rt.new_string("first");
                        Err(rt.raise(payload))
                    },
                    |rt, _p| {
                        // the frame is consumed: this raise must not
                        // re-enter the same handler
                        let payload = rt.new_string("second");
                        Err(rt.raise(payload))
                    },
                )
            },
            |_rt| {
                push("F2");
                Ok(())
            },
        );
        let err = out.unwrap_err();
        assert_eq!(*log.borrow(), vec!["F2"]);
        assert_eq!(rt.str_content(err.payload), Some("second"));
    }

    #[test]
    fn raise_inside_finalizer_supersedes() {
        let mut rt = Runtime::new();
        let out: RtResult<Value> = rt.try_finally(
            |rt| {
                let payload = rt.new_string("original");
                Err(rt.raise(payload))
            },
            |rt| {
                let payload = rt.new_string("from finalizer");
                Err(rt.raise(payload))
            },
        );
        let err = out.unwrap_err();
        assert_eq!(rt.str_content(err.payload), Some("from finalizer"));
    }

    #[test]
    fn uncaught_report_does_not_panic() {
        let mut rt = Runtime::new();
        let err = rt.raise_arity(1, false, 3);
        rt.report_uncaught(&err);
        let custom = Value::from_int(13);
        rt.report_uncaught(&rt.raise(custom));
    }
}
