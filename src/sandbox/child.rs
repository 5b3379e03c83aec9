/// Sandbox child runtime
///
/// Entered when the binary is started as `pipewright __sandbox-child <program>`.
/// Hosts a restricted Lua 5.4 state (table, string, math, utf8 and coroutine
/// libraries only; no io, os, package or module loading), reads
/// `{prev, params, payload, mode}` as JSON from stdin and exposes them as globals.
///
/// Globals available to programs:
/// - `prev`, `params`, `payload`
/// - `json.encode(value)`, `json.decode(text)`
/// - `emit(value)` writes one JSON value to stdout
/// - `print(...)` writes tab-separated text to stdout
///
/// Inline mode emits the chunk's return value when it is not nil. Entry mode
/// calls the first of `run`, `handler`, `main` with as many of
/// `(prev, params, payload)` as it declares and emits what it returns.
/// Failures go to stderr with exit status 1.

use crate::sandbox::types::{ChildInput, SandboxMode};
use anyhow::{anyhow, Result};
use mlua::{
    DeserializeOptions, Function, Lua, LuaOptions, LuaSerdeExt, SerializeOptions, StdLib, Table,
    Value as LuaValue, Variadic,
};
use std::{
    io::{Read, Write},
    path::Path,
};

/// Entry point names, in priority order
pub const ENTRY_POINTS: [&str; 3] = ["run", "handler", "main"];

/// Run the program at `script` and return the process exit code
pub fn run(script: &Path) -> i32 {
    match execute(script) {
        Ok(()) => 0,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "{}", e);
            1
        }
    }
}

fn execute(script: &Path) -> Result<()> {
    let source = std::fs::read_to_string(script)
        .map_err(|e| anyhow!("Failed to read program {}: {}", script.display(), e))?;

    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| anyhow!("Failed to read sandbox input: {}", e))?;
    let input: ChildInput = if raw.trim().is_empty() {
        ChildInput::default()
    } else {
        serde_json::from_str(&raw).map_err(|e| anyhow!("Invalid sandbox input: {}", e))?
    };

    let (lua, getinfo) = create_sandbox().map_err(|e| anyhow!("Failed to create Lua sandbox: {}", e))?;
    install_globals(&lua, &input).map_err(|e| anyhow!("Failed to seed sandbox globals: {}", e))?;

    if let Some(limit) = input.memory_limit_bytes {
        // Unsupported on some allocators; the process ceiling still applies
        let _ = lua.set_memory_limit(limit);
    }

    let returned: LuaValue = lua
        .load(source.as_str())
        .set_name("=program")
        .eval()
        .map_err(|e| anyhow!("{}", e))?;

    match input.mode {
        SandboxMode::Inline => {
            if !returned.is_nil() {
                emit_value(&lua, returned).map_err(|e| anyhow!("{}", e))?;
            }
        }
        SandboxMode::Entry => {
            let result = call_entry(&lua, &getinfo, &input)?;
            emit_value(&lua, result).map_err(|e| anyhow!("{}", e))?;
        }
    }

    Ok(())
}

/// Restricted interpreter
///
/// The debug library is loaded only to keep `debug.getinfo` for arity
/// inspection; the `debug` global itself is removed before user code runs.
fn create_sandbox() -> mlua::Result<(Lua, Function)> {
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE | StdLib::DEBUG,
            LuaOptions::default(),
        )
    };

    let globals = lua.globals();
    let debug: Table = globals.get("debug")?;
    let getinfo: Function = debug.get("getinfo")?;

    for name in ["debug", "require", "dofile", "loadfile", "collectgarbage"] {
        globals.set(name, mlua::Nil)?;
    }

    Ok((lua, getinfo))
}

fn to_lua_options() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

fn from_lua_options() -> DeserializeOptions {
    DeserializeOptions::new().deny_unsupported_types(false)
}

fn install_globals(lua: &Lua, input: &ChildInput) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("prev", lua.to_value_with(&input.prev, to_lua_options())?)?;
    globals.set("params", lua.to_value_with(&input.params, to_lua_options())?)?;
    globals.set("payload", lua.to_value_with(&input.payload, to_lua_options())?)?;

    let json = lua.create_table()?;
    json.set(
        "encode",
        lua.create_function(|lua, value: LuaValue| {
            let value: serde_json::Value = lua.from_value_with(value, from_lua_options())?;
            serde_json::to_string(&value).map_err(mlua::Error::external)
        })?,
    )?;
    json.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let value: serde_json::Value = serde_json::from_str(&text).map_err(mlua::Error::external)?;
            lua.to_value_with(&value, to_lua_options())
        })?,
    )?;
    globals.set("json", json)?;

    globals.set("emit", lua.create_function(|lua, value: LuaValue| emit_value(lua, value))?)?;

    let tostring: Function = globals.get("tostring")?;
    globals.set(
        "print",
        lua.create_function(move |_, args: Variadic<LuaValue>| {
            let parts = args
                .iter()
                .map(|arg| tostring.call::<String>(arg.clone()))
                .collect::<mlua::Result<Vec<_>>>()?;
            write_line(&parts.join("\t")).map_err(mlua::Error::external)
        })?,
    )?;

    Ok(())
}

fn emit_value(lua: &Lua, value: LuaValue) -> mlua::Result<()> {
    let value: serde_json::Value = lua.from_value_with(value, from_lua_options())?;
    let line = serde_json::to_string(&value).map_err(mlua::Error::external)?;
    write_line(&line).map_err(mlua::Error::external)
}

fn write_line(line: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()
}

/// Call the program's entry point with the arguments it declares
fn call_entry(lua: &Lua, getinfo: &Function, input: &ChildInput) -> Result<LuaValue> {
    let globals = lua.globals();
    let found = ENTRY_POINTS
        .iter()
        .find_map(|name| match globals.get::<LuaValue>(*name) {
            Ok(LuaValue::Function(f)) => Some(f),
            _ => None,
        });
    let Some(entry) = found else {
        return Err(anyhow!("no entry point found (expected one of: {})", ENTRY_POINTS.join(", ")));
    };

    let info: Table = getinfo
        .call((entry.clone(), "u"))
        .map_err(|e| anyhow!("Failed to inspect entry point: {}", e))?;
    let nparams: i64 = info.get("nparams").unwrap_or(0);
    let vararg: bool = info.get("isvararg").unwrap_or(false);

    let convert = |value: &serde_json::Value| {
        lua.to_value_with(value, to_lua_options())
            .map_err(|e| anyhow!("Failed to convert entry argument: {}", e))
    };
    let prev = convert(&input.prev)?;
    let params = convert(&input.params)?;
    let payload = convert(&input.payload)?;

    let result = match (nparams, vararg) {
        (n, _) if n >= 3 => entry.call::<LuaValue>((prev, params, payload)),
        (_, true) => entry.call::<LuaValue>((prev, params, payload)),
        (2, _) => entry.call::<LuaValue>((params, payload)),
        (1, _) => entry.call::<LuaValue>(payload),
        _ => entry.call::<LuaValue>(()),
    };
    result.map_err(|e| anyhow!("{}", e))
}
