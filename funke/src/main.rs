use clap::Parser as ClapParser;
use std::process;

use funke::{
    CatchKind, FieldAccess, NativeModule, RtResult, Runtime, Value, call, make_function,
    mark_vararg, method_call,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise an exception no handler catches, to show trace reporting
    #[arg(long, help = "Leave an exception uncaught")]
    fail: bool,
}

/// Demo module: a `Point` class with stored fields, a method, and a
/// vararg static function.
struct GeometryModule;

fn point_scale(rt: &mut Runtime, args: &[Value]) -> RtResult<Value> {
    let recv = args[0];
    let factor = args[1];
    if !factor.is_int() {
        return Err(rt.raise_type_error("integer scale factor", factor));
    }
    for name in ["x", "y"] {
        let sym = rt.intern(name);
        let v = rt.get_field(recv, sym)?;
        rt.set_field(recv, sym, Value::from_int(v.as_int() * factor.as_int()))?;
    }
    Ok(recv)
}

fn sum_all(rt: &mut Runtime, args: &[Value]) -> RtResult<Value> {
    let Some(rest) = rt.tuple_items(args[0]).map(<[Value]>::to_vec) else {
        return Err(rt.raise_type_error("argument tuple", args[0]));
    };
    let mut total = 0i64;
    for v in rest {
        if !v.is_int() {
            return Err(rt.raise_type_error("integer", v));
        }
        total += v.as_int();
    }
    Ok(Value::from_int(total))
}

impl NativeModule for GeometryModule {
    fn name(&self) -> &str {
        "geometry"
    }

    fn register_types(&self, rt: &mut Runtime) -> RtResult<()> {
        let point = rt.register_class("Point", None, 0)?;
        rt.add_field(point, "x", FieldAccess::READ | FieldAccess::WRITE)?;
        rt.add_field(point, "y", FieldAccess::READ | FieldAccess::WRITE)?;
        Ok(())
    }

    fn register_symbols(&self, rt: &mut Runtime) -> RtResult<()> {
        let point = rt.class_named("Point").expect("registered in phase 1");
        let scale_sym = rt.intern("scale");
        let scale = make_function(rt, point_scale, 2, Some(scale_sym));
        rt.add_method_sym(point, scale_sym, scale)?;

        let sum_sym = rt.intern("geometry::sum");
        let sum = make_function(rt, sum_all, 1, Some(sum_sym));
        mark_vararg(rt, sum)?;
        rt.define_static("geometry::sum", sum)?;
        Ok(())
    }
}

fn run(rt: &mut Runtime, fail: bool) -> RtResult<()> {
    let point = rt.class_named("Point").expect("module loaded");
    let x = rt.intern("x");
    let y = rt.intern("y");

    let p = rt.new_object(point)?;
    rt.set_field(p, x, Value::from_int(3))?;
    rt.set_field(p, y, Value::from_int(4))?;

    let scale = rt.intern("scale");
    method_call(rt, p, scale, &[Value::from_int(10)])?;
    println!(
        "scaled point: ({}, {})",
        rt.get_field(p, x)?.as_int(),
        rt.get_field(p, y)?.as_int()
    );

    let sum = rt.lookup_static("geometry::sum")?;
    let total = call(
        rt,
        sum,
        &[Value::from_int(1), Value::from_int(2), Value::from_int(3)],
    )?;
    println!("sum: {}", total.as_int());

    // a handled failure: field access on a destroyed object
    let doomed = rt.new_object(point)?;
    rt.destroy(doomed)?;
    let type_error = rt.specials.type_error;
    let outcome = rt.try_catch(
        CatchKind::Class(type_error),
        |rt| rt.get_field(doomed, x),
        |rt, payload| {
            println!("caught: {}", rt.describe(payload));
            Ok(Value::NIL)
        },
    )?;
    debug_assert!(outcome.is_nil());

    if fail {
        // wrong arity, and nothing catches it
        method_call(rt, p, scale, &[])?;
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut rt = Runtime::new();
    let modules: [&dyn NativeModule; 1] = [&GeometryModule];
    if let Err(raise) = rt
        .load_modules(&modules)
        .and_then(|()| run(&mut rt, cli.fail))
    {
        rt.report_uncaught(&raise);
        process::exit(1);
    }
}
