use nwasm_codegen::{compile, CompileOptions};
use nwasm_runtime::{Runtime, TrapCode};

fn compile_wat(wat: &str) -> nwasm_codegen::CompileResult {
    let wasm = wat::parse_str(wat).expect("valid wat");
    compile(&wasm, &[], &CompileOptions::default()).expect("compiles")
}

#[test]
fn calls_an_exported_two_arg_function() {
    let result = compile_wat(
        r#"(module
            (func $add (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))"#,
    );
    let mut runtime = Runtime::init_runtime(result, &[], 0).expect("links");
    runtime.start().expect("no start function declared");

    let add = runtime.get_exported_function_by_name("add").expect("exported");
    let add = add.get2::<i32, i32, i32>().expect("signature matches");
    assert_eq!(add.call(2, 3).unwrap(), 5);
    assert_eq!(add.call(-1, 1).unwrap(), 0);
}

#[test]
fn wrong_arity_is_rejected_before_any_call() {
    let result = compile_wat(
        r#"(module
            (func $add (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))"#,
    );
    let runtime = Runtime::init_runtime(result, &[], 0).expect("links");
    let add = runtime.get_exported_function_by_name("add").expect("exported");
    assert!(add.get1::<i32, i32>().is_err());
    assert!(add.get0::<i32>().is_err());
}

#[test]
fn unreachable_surfaces_as_a_trap() {
    let result = compile_wat(r#"(module (func $bad (export "bad") unreachable))"#);
    let mut runtime = Runtime::init_runtime(result, &[], 0).expect("links");
    runtime.start().expect("no start function declared");

    let bad = runtime.get_exported_function_by_name("bad").expect("exported");
    let bad = bad.get0::<()>().expect("signature matches");
    match bad.call() {
        Err(nwasm_runtime::RuntimeError::Trap { code, .. }) => assert_eq!(code, TrapCode::Unreachable),
        other => panic!("expected a trap, got {other:?}"),
    }
}

#[test]
fn mutable_global_round_trips() {
    let result = compile_wat(
        r#"(module
            (global $counter (export "counter") (mut i32) (i32.const 41)))"#,
    );
    let runtime = Runtime::init_runtime(result, &[], 0).expect("links");
    let counter = runtime.get_exported_global_by_name("counter").expect("exported");
    assert_eq!(counter.get::<i32>().unwrap(), 41);
    counter.set(42i32).unwrap();
    assert_eq!(counter.get::<i32>().unwrap(), 42);
}
