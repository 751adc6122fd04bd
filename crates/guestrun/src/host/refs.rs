//! Handle builtins: `ref_alloc`, `ref_free` and the `ref_set_*`/`ref_as_*`
//! accessor pairs.

use crate::bridge::wrong_kind;
use crate::bridge::Args;
use crate::bridge::HostFunc;
use crate::bridge::Violation;
use crate::host::handle_arg;
use crate::host::NAMESPACE;
use crate::schema::Kind;
use crate::schema::Signature;
use crate::value::HostValue;
use crate::value::Value;

type Store = fn(&Args) -> Result<HostValue, Violation>;
type Load = fn(&HostValue) -> Option<Value>;

pub fn funcs() -> Vec<HostFunc> {
    let mut funcs = vec![
        HostFunc::typed(
            NAMESPACE,
            "ref_alloc",
            Signature::new(Vec::new(), Some(Kind::Ref)),
            |_call, _args| Ok(Some(Value::Ref(HostValue::Empty))),
        ),
        HostFunc::typed(
            NAMESPACE,
            "ref_free",
            Signature::new([Kind::I32], None),
            |call, args| {
                call.free(handle_arg(args, 0)?)?;
                Ok(None)
            },
        ),
    ];

    funcs.extend(accessors(
        "string",
        Kind::Buf,
        |args| Ok(HostValue::String(args.str(1)?.to_string())),
        |v| v.as_str().map(|s| Value::Buf(s.as_bytes().to_vec())),
    ));
    funcs.extend(accessors(
        "bytes",
        Kind::Buf,
        |args| Ok(HostValue::Bytes(args.bytes(1)?.to_vec())),
        |v| v.as_bytes().map(|b| Value::Buf(b.to_vec())),
    ));
    funcs.extend(accessors(
        "bool",
        Kind::Bool,
        |args| Ok(HostValue::Bool(args.bool(1)?)),
        |v| v.as_bool().map(Value::Bool),
    ));
    funcs.extend(accessors(
        "i32",
        Kind::I32,
        |args| Ok(HostValue::I32(args.i32(1)?)),
        |v| v.as_i32().map(Value::I32),
    ));
    funcs.extend(accessors(
        "i64",
        Kind::I64,
        |args| Ok(HostValue::I64(args.i64(1)?)),
        |v| v.as_i64().map(Value::I64),
    ));
    funcs.extend(accessors(
        "f32",
        Kind::F32,
        |args| Ok(HostValue::F32(args.f32(1)?)),
        |v| v.as_f32().map(Value::F32),
    ));
    funcs.extend(accessors(
        "f64",
        Kind::F64,
        |args| Ok(HostValue::F64(args.f64(1)?)),
        |v| v.as_f64().map(Value::F64),
    ));
    funcs
}

/// `ref_set_<suffix>(i32, kind)` and `ref_as_<suffix>(i32) -> kind`.
fn accessors(suffix: &'static str, kind: Kind, store: Store, load: Load) -> [HostFunc; 2] {
    let set = HostFunc::typed(
        NAMESPACE,
        format!("ref_set_{}", suffix),
        Signature::new([Kind::I32, kind], None),
        move |call, args| {
            let handle = handle_arg(args, 0)?;
            call.set(handle, store(args)?)?;
            Ok(None)
        },
    );

    let get = HostFunc::typed(
        NAMESPACE,
        format!("ref_as_{}", suffix),
        Signature::new([Kind::I32], Some(kind)),
        move |call, args| {
            let handle = handle_arg(args, 0)?;
            let value = call.get(handle)?;
            match load(value) {
                Some(v) => Ok(Some(v)),
                None => Err(wrong_kind(handle, suffix, value).into()),
            }
        },
    );

    [set, get]
}
