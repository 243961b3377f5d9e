//! Capability modules injected into every script run
//!
//! Each module builds a table of native functions for one interpreter and is
//! made available to the script through `require(<name>)`. Nothing else from
//! the engine is reachable from inside the sandbox.

pub mod alert;
pub mod chart;
pub mod datasource;
pub mod http;
pub mod kv;
pub mod log;
pub mod runtime;

pub use alert::AlertModule;
pub use chart::ChartModule;
pub use datasource::DataSourceModule;
pub use http::HttpModule;
pub use kv::KvModule;
pub use log::LogModule;
pub use runtime::RuntimeModule;

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mlua::{Lua, Table, Value};

use crate::script::Script;

/// Per-run facts a module may close over
#[derive(Debug, Clone)]
pub struct RunContext {
    pub script: Arc<Script>,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            started_at: Utc::now(),
        }
    }
}

pub trait Module: Send + Sync {
    /// Name passed to `require`
    fn name(&self) -> &str;

    /// Build this module's function table for one interpreter
    fn inject(&self, lua: &Lua, ctx: &RunContext) -> mlua::Result<Table>;
}

/// Register every module in `package.loaded` of a fresh interpreter
pub fn install(lua: &Lua, modules: &[Arc<dyn Module>], ctx: &RunContext) -> mlua::Result<()> {
    let loaded: Table = lua.globals().get::<Table>("package")?.get("loaded")?;
    for module in modules {
        let table = module.inject(lua, ctx)?;
        loaded.set(module.name(), table)?;
    }
    Ok(())
}

/// `(value, nil)` on success, `(nil, message)` on failure: the shape scripts
/// branch on for recoverable errors.
pub(crate) fn lua_result<T, E: Display>(result: Result<T, E>) -> (Option<T>, Option<String>) {
    match result {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e.to_string())),
    }
}

/// Scalar Lua value as a string; tables, functions and nil are rejected
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string_lossy().to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}
