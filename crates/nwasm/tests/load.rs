use nwasm::{load, CompileOptions};

#[test]
fn loads_and_runs_a_module_with_a_start_function() {
    let wasm = wat::parse_str(
        r#"(module
            (global $ran (export "ran") (mut i32) (i32.const 0))
            (func $init
                i32.const 1
                global.set $ran)
            (start $init))"#,
    )
    .unwrap();

    let runtime = load(&wasm, &[], &CompileOptions::default(), 0).expect("compiles and links");
    let ran = runtime.get_exported_global_by_name("ran").unwrap();
    assert_eq!(ran.get::<i32>().unwrap(), 1);
}
