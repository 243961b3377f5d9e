//! Fresh, restricted interpreters for script runs

use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Table, Thread, Value, Variadic, VmState};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::modules::log::join_args;
use crate::script::Script;

/// Instructions between deadline checks
const HOOK_EVERY: u32 = 1000;

const OS_REMOVED: [&str; 7] = [
    "execute",
    "exit",
    "remove",
    "rename",
    "tmpname",
    "getenv",
    "setlocale",
];

pub const DEADLINE_EXCEEDED: &str = "deadline exceeded";
pub const RUN_ABORTED: &str = "run aborted";

/// Build an interpreter with the restricted standard library and `print`
/// routed to the log.
pub fn interpreter(script: &str, lua_modules_path: &str) -> mlua::Result<Lua> {
    let libs = StdLib::TABLE
        | StdLib::STRING
        | StdLib::MATH
        | StdLib::UTF8
        | StdLib::COROUTINE
        | StdLib::PACKAGE
        | StdLib::OS;
    let lua = Lua::new_with(libs, LuaOptions::default())?;
    let globals = lua.globals();

    let os: Table = globals.get("os")?;
    for name in OS_REMOVED {
        os.set(name, Value::Nil)?;
    }
    globals.set("dofile", Value::Nil)?;
    globals.set("loadfile", Value::Nil)?;

    let package: Table = globals.get("package")?;
    package.set("path", lua_modules_path)?;
    package.set("cpath", "")?;

    let script = script.to_string();
    globals.set(
        "print",
        lua.create_function(move |_, args: Variadic<Value>| {
            tracing::info!(script = %script, "{}", join_args(&args));
            Ok(())
        })?,
    )?;

    Ok(lua)
}

/// Stop CPU-bound code on `thread` once the deadline passes or `abort` fires.
/// Hooks are per coroutine, so this must target the thread running the chunk.
pub fn install_watchdog(thread: &Thread, deadline: Instant, abort: CancellationToken) {
    thread.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_EVERY),
        move |_lua, _debug| {
            if abort.is_cancelled() {
                return Err(mlua::Error::runtime(RUN_ABORTED));
            }
            if Instant::now() >= deadline {
                return Err(mlua::Error::runtime(DEADLINE_EXCEEDED));
            }
            Ok(VmState::Continue)
        },
    );
}

/// Run the script body as a coroutine guarded by the watchdog.
pub async fn execute(
    lua: &Lua,
    script: &Script,
    deadline: Instant,
    abort: CancellationToken,
) -> mlua::Result<()> {
    let chunk = lua
        .load(script.body.as_str())
        .set_name(script.name.as_str())
        .into_function()?;
    let thread = lua.create_thread(chunk)?;
    install_watchdog(&thread, deadline, abort);
    thread.into_async::<()>(()).await
}
