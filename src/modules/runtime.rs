//! `runtime` module: read-only process facts

use mlua::{Lua, LuaSerdeExt, Table};
use serde::Serialize;

use super::{Module, RunContext};

#[derive(Debug, Clone)]
pub struct RuntimeModule {
    once: bool,
    log_level: String,
}

#[derive(Debug, Serialize)]
struct RuntimeInfo<'a> {
    version: &'static str,
    once: bool,
    log_level: &'a str,
    script: &'a str,
    started_at: String,
}

impl RuntimeModule {
    pub fn new(once: bool, log_level: impl Into<String>) -> Self {
        Self {
            once,
            log_level: log_level.into(),
        }
    }
}

impl Module for RuntimeModule {
    fn name(&self) -> &str {
        "runtime"
    }

    fn inject(&self, lua: &Lua, ctx: &RunContext) -> mlua::Result<Table> {
        let info = RuntimeInfo {
            version: env!("CARGO_PKG_VERSION"),
            once: self.once,
            log_level: &self.log_level,
            script: &ctx.script.name,
            started_at: ctx.started_at.to_rfc3339(),
        };
        let snapshot = serde_json::to_value(&info).map_err(mlua::Error::external)?;

        let table = lua.create_table()?;
        table.set(
            "get",
            lua.create_function(move |lua, ()| lua.to_value(&snapshot))?,
        )?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::lua_with;
    use std::sync::Arc;

    #[test]
    fn test_runtime_get() {
        let module = Arc::new(RuntimeModule::new(true, "debug")) as Arc<dyn Module>;
        let lua = lua_with(&[module], "disk-check");

        let (version, once, level, script): (String, bool, String, String) = lua
            .load(
                "local r = require('runtime').get(); return r.version, r.once, r.log_level, r.script",
            )
            .eval()
            .unwrap();

        assert_eq!(version, env!("CARGO_PKG_VERSION"));
        assert!(once);
        assert_eq!(level, "debug");
        assert_eq!(script, "disk-check");
    }
}
