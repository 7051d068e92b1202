//! Parses `--invoke` arguments (`i32:1`, `f64:2.5`, ...) into [`WasmValue`]s
//! and formats results back for display.

use anyhow::{anyhow, Result};
use wasmc_runtime::WasmValue;

pub fn parse_value(raw: &str) -> Result<WasmValue> {
    let (ty, lit) = raw.split_once(':').ok_or_else(|| anyhow!("expected TYPE:VALUE (e.g. i32:1), got `{raw}`"))?;
    Ok(match ty {
        "i32" => WasmValue::I32(lit.parse()?),
        "i64" => WasmValue::I64(lit.parse()?),
        "f32" => WasmValue::F32(lit.parse()?),
        "f64" => WasmValue::F64(lit.parse()?),
        "funcref" if lit == "null" => WasmValue::FuncRef(None),
        "funcref" => WasmValue::FuncRef(Some(lit.parse()?)),
        other => return Err(anyhow!("unknown value type `{other}`")),
    })
}

pub fn format_value(value: WasmValue) -> String {
    match value {
        WasmValue::I32(v) => format!("i32:{v}"),
        WasmValue::I64(v) => format!("i64:{v}"),
        WasmValue::F32(v) => format!("f32:{v}"),
        WasmValue::F64(v) => format!("f64:{v}"),
        WasmValue::FuncRef(None) => "funcref:null".to_string(),
        WasmValue::FuncRef(Some(i)) => format!("funcref:{i}"),
    }
}
