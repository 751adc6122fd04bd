use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::bridge::Args;
use crate::bridge::HostFunc;
use crate::bridge::HostModule;
use crate::bridge::Violation;
use crate::builder;
use crate::config::Config;
use crate::host;
use crate::marshal::Lane;
use crate::runtime;
use crate::runtime::ModuleId;
use crate::runtime::Runtime;
use crate::schema::Kind;
use crate::schema::Signature;
use crate::value::HostValue;
use crate::value::Value;

type R<T> = Result<T, Box<dyn std::error::Error>>;

// ============================================================================
//  VALUES
// ============================================================================

#[test]
fn test_host_value_kinds_and_accessors() {
    assert_eq!(HostValue::default(), HostValue::Empty);
    assert_eq!(HostValue::from("hi").as_str(), Some("hi"));
    assert_eq!(HostValue::from("hi").as_bytes(), Some(&b"hi"[..]));
    assert_eq!(HostValue::from(vec![1u8, 2]).as_str(), None);
    assert_eq!(HostValue::from(true).as_bool(), Some(true));
    assert_eq!(HostValue::from(7i64).as_i32(), None);
    assert_eq!(HostValue::Map(BTreeMap::new()).kind(), "map");
}

#[test]
fn test_host_value_floats_compare_by_bits() {
    let nan = f32::from_bits(0x7fc0_0001);
    assert_eq!(HostValue::F32(nan), HostValue::F32(nan));
    assert_ne!(HostValue::F32(0.0), HostValue::F32(-0.0));
}

#[test]
fn test_host_value_objects_downcast_and_compare_by_identity() {
    struct Session {
        user: &'static str,
    }

    let a = HostValue::object(Session { user: "ada" });
    let b = a.clone();
    let c = HostValue::object(Session { user: "ada" });

    assert_eq!(a.downcast_ref::<Session>().map(|s| s.user), Some("ada"));
    assert!(a.downcast_ref::<String>().is_none());
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_value_kind_matches_variant() {
    assert_eq!(Value::string("x").kind(), Kind::Ref);
    assert_eq!(Value::Buf(vec![]).kind(), Kind::Buf);
    assert_eq!(Value::F64(1.0).kind(), Kind::F64);
}

// ============================================================================
//  ARGS
// ============================================================================

#[test]
fn test_args_getters_check_kind() {
    let args = Args::new(vec![
        Value::I32(3),
        Value::Buf(b"key".to_vec()),
        Value::string("text"),
        Value::Bool(true),
    ]);

    assert_eq!(args.len(), 4);
    assert_eq!(args.i32(0), Ok(3));
    assert_eq!(args.str(1), Ok("key"));
    assert_eq!(args.bytes(1), Ok(&b"key"[..]));
    assert_eq!(args.str(2), Ok("text"));
    assert_eq!(args.bool(3), Ok(true));

    assert_eq!(
        args.i64(0),
        Err(Violation::Argument {
            index: 0,
            expected: Kind::I64
        })
    );
    assert!(args.f32(9).is_err());
    // Only refs decoded from a guest call carry a handle.
    assert!(args.handle(2).is_err());
}

#[test]
fn test_args_str_reports_ref_holding_other_kind() {
    let args = Args::new(vec![Value::Ref(HostValue::Bool(true)), Value::I32(1)]);

    assert_eq!(
        args.str(0),
        Err(Violation::Argument {
            index: 0,
            expected: Kind::Ref
        })
    );
    assert_eq!(
        args.str(1),
        Err(Violation::Argument {
            index: 1,
            expected: Kind::Buf
        })
    );
}

#[test]
fn test_args_str_rejects_invalid_utf8() {
    let args = Args::new(vec![Value::Buf(vec![0xc3, 0x28])]);
    assert!(matches!(args.str(0), Err(Violation::Utf8 { len: 2, .. })));
}

// ============================================================================
//  BUILTINS
// ============================================================================

#[test]
fn test_builtins_are_unique_and_in_env() {
    let funcs = host::builtins();
    let names: HashSet<&str> = funcs.iter().map(|f| f.name()).collect();

    assert_eq!(names.len(), funcs.len());
    assert!(funcs.iter().all(|f| f.namespace() == host::NAMESPACE));

    for name in [
        "ref_alloc",
        "ref_free",
        "ref_set_string",
        "ref_as_string",
        "ref_set_bytes",
        "ref_as_bytes",
        "ref_set_bool",
        "ref_as_bool",
        "ref_set_i32",
        "ref_as_f64",
        "value_new",
        "value_set",
        "value_get",
    ] {
        assert!(names.contains(name), "missing builtin {}", name);
    }
}

#[test]
fn test_builtin_lanes() {
    let funcs = host::builtins();
    let lanes = |name: &str| {
        funcs
            .iter()
            .find(|f| f.name() == name)
            .map(|f| (f.params().to_vec(), f.results().to_vec()))
    };

    assert_eq!(lanes("ref_alloc"), Some((vec![], vec![Lane::I32])));
    assert_eq!(
        lanes("ref_set_string"),
        Some((vec![Lane::I32, Lane::I32, Lane::I32], vec![]))
    );
    assert_eq!(lanes("ref_as_string"), Some((vec![Lane::I32], vec![Lane::I64])));
    assert_eq!(
        lanes("value_set"),
        Some((vec![Lane::I32, Lane::I32, Lane::I32, Lane::I64], vec![]))
    );
    assert_eq!(lanes("ref_as_f32"), Some((vec![Lane::I32], vec![Lane::F32])));
}

#[test]
fn test_host_module_shares_namespace() -> R<()> {
    let module = HostModule::new("app")
        .declare("check", "(ref) -> bool", |_call, _args| Ok(Some(Value::Bool(true))))?
        .raw("tick", Vec::new(), [Lane::I64], |_call, _words| Ok(vec![1]));

    let funcs = module.into_funcs();
    assert_eq!(funcs.len(), 2);
    assert!(funcs.iter().all(|f| f.namespace() == "app"));
    assert_eq!(
        funcs[0].signature().map(Signature::to_string),
        Some("(ref) -> bool".to_string())
    );
    assert!(funcs[1].signature().is_none());
    Ok(())
}

// ============================================================================
//  RUNTIME & BUILDER
// ============================================================================

const EMPTY: &str = "(module)";

const IMPORTS_VALIDATE: &str = r#"
    (module
      (import "env" "validate" (func (param i32) (result i32))))
"#;

#[test]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.allocator, "malloc");
    assert_eq!(config.memory, "memory");
    assert_eq!(config.start, "_start");
    assert_eq!(config.initialize, "_initialize");
    assert_eq!(config.handle_capacity, hostref::MIN_CAPACITY);
    assert_eq!(config.fuel, None);
}

#[test]
fn test_module_registry() -> R<()> {
    let rt = Runtime::new()?;
    let a = rt.add_module_bytes(EMPTY)?;
    let b = rt.add_module_bytes(EMPTY)?;

    assert_ne!(a, b);
    assert_eq!(a.to_string(), "module-1");
    rt.get_module(a)?;

    rt.remove_module(a)?;
    assert!(matches!(
        rt.get_module(a),
        Err(runtime::Error::ModuleNotFound(id)) if id == a
    ));
    assert!(rt.remove_module(ModuleId(99)).is_err());
    Ok(())
}

#[test]
fn test_invalid_module_bytes() -> R<()> {
    let rt = Runtime::new()?;
    assert!(matches!(
        rt.add_module_bytes(b"\0asm nope"),
        Err(runtime::Error::Module(_))
    ));
    Ok(())
}

#[test]
fn test_builder_rejects_duplicate_registration() -> R<()> {
    let rt = Arc::new(Runtime::new()?);
    let id = rt.add_module_bytes(EMPTY)?;

    let dup = HostFunc::raw("env", "ref_alloc", Vec::new(), [Lane::I32], |_call, _words| Ok(vec![0]));
    let err = rt.instantiate(id).host(dup).build().err();

    assert!(matches!(
        err,
        Some(builder::Error::Duplicate { ref namespace, ref name }) if namespace == "env" && name == "ref_alloc"
    ));
    Ok(())
}

#[test]
fn test_builder_rejects_import_signature_mismatch() -> R<()> {
    let rt = Arc::new(Runtime::new()?);
    let id = rt.add_module_bytes(IMPORTS_VALIDATE)?;

    let validate = HostFunc::declare("env", "validate", "(buf) -> bool", |_call, _args| {
        Ok(Some(Value::Bool(true)))
    })?;
    let err = rt.instantiate(id).host(validate).build().err();

    assert!(matches!(err, Some(builder::Error::Signature { .. })));
    Ok(())
}

#[test]
fn test_builder_reports_missing_import() -> R<()> {
    let rt = Arc::new(Runtime::new()?);
    let id = rt.add_module_bytes(IMPORTS_VALIDATE)?;

    let err = rt.instantiate(id).build().err();
    assert!(matches!(err, Some(builder::Error::Instantiate(_))));
    Ok(())
}

#[test]
fn test_builder_context_reaches_store() -> R<()> {
    struct Tenant(&'static str);

    let rt = Arc::new(Runtime::with_config(Config::new().handle_capacity(2))?);
    let id = rt.add_module_bytes(EMPTY)?;

    let mut guest = rt
        .instantiate(id)
        .without_builtins()
        .context(|b| {
            b.insert(Tenant("acme"));
        })
        .build()?;

    assert_eq!(guest.ctx().get::<Tenant>().map(|t| t.0), Some("acme"));
    assert_eq!(guest.ctx().handles().capacity(), 2);
    Ok(())
}
