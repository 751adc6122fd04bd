//! Map builtins: string keys to raw 64-bit words.
//!
//! `value_get` on a missing key answers `0`, the same word a guest would
//! read from a zeroed slot.

use std::collections::BTreeMap;

use crate::bridge::Violation;
use crate::bridge::HostFunc;
use crate::host::handle_arg;
use crate::host::NAMESPACE;
use crate::schema::Kind;
use crate::schema::Signature;
use crate::value::HostValue;
use crate::value::Value;

pub fn funcs() -> Vec<HostFunc> {
    vec![
        HostFunc::typed(
            NAMESPACE,
            "value_new",
            Signature::new(Vec::new(), Some(Kind::Ref)),
            |_call, _args| Ok(Some(Value::Ref(HostValue::Map(BTreeMap::new())))),
        ),
        HostFunc::typed(
            NAMESPACE,
            "value_set",
            Signature::new([Kind::I32, Kind::Buf, Kind::I64], None),
            |call, args| {
                let handle = handle_arg(args, 0)?;
                let key = args.str(1)?.to_string();
                let word = args.i64(2)?;

                let value = call.get_mut(handle)?;
                let found = value.kind();
                let map = value.as_map_mut().ok_or(Violation::WrongKind {
                    handle,
                    expected: "map",
                    found,
                })?;
                map.insert(key, word);
                Ok(None)
            },
        ),
        HostFunc::typed(
            NAMESPACE,
            "value_get",
            Signature::new([Kind::I32, Kind::Buf], Some(Kind::I64)),
            |call, args| {
                let handle = handle_arg(args, 0)?;
                let key = args.str(1)?;

                let value = call.get(handle)?;
                let map = value.as_map().ok_or(Violation::WrongKind {
                    handle,
                    expected: "map",
                    found: value.kind(),
                })?;
                Ok(Some(Value::I64(map.get(key).copied().unwrap_or(0))))
            },
        ),
    ]
}
