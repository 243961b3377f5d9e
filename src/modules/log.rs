//! `log` module: script output routed through `tracing`

use mlua::{Lua, Table, Value, Variadic};

use super::{scalar_string, Module, RunContext};

pub struct LogModule;

/// Join call arguments the way `print` would
pub(crate) fn join_args(args: &Variadic<Value>) -> String {
    args.iter()
        .map(|v| scalar_string(v).unwrap_or_else(|| format!("<{}>", v.type_name())))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Module for LogModule {
    fn name(&self) -> &str {
        "log"
    }

    fn inject(&self, lua: &Lua, ctx: &RunContext) -> mlua::Result<Table> {
        let table = lua.create_table()?;

        let script = ctx.script.name.clone();
        table.set(
            "debug",
            lua.create_function(move |_, args: Variadic<Value>| {
                tracing::debug!(script = %script, "{}", join_args(&args));
                Ok(())
            })?,
        )?;

        let script = ctx.script.name.clone();
        table.set(
            "info",
            lua.create_function(move |_, args: Variadic<Value>| {
                tracing::info!(script = %script, "{}", join_args(&args));
                Ok(())
            })?,
        )?;

        let script = ctx.script.name.clone();
        table.set(
            "warn",
            lua.create_function(move |_, args: Variadic<Value>| {
                tracing::warn!(script = %script, "{}", join_args(&args));
                Ok(())
            })?,
        )?;

        let script = ctx.script.name.clone();
        table.set(
            "error",
            lua.create_function(move |_, args: Variadic<Value>| {
                tracing::error!(script = %script, "{}", join_args(&args));
                Ok(())
            })?,
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
    fn test_log_functions_exist() {
        let lua = lua_with(&[Arc::new(LogModule) as Arc<dyn Module>], "logger");
        lua.load(
            r#"
            local log = require('log')
            log.debug('d')
            log.info('value', 42, true)
            log.warn({})
            log.error('e')
            "#,
        )
        .exec()
        .unwrap();
    }

    #[test]
    fn test_join_args() {
        let lua = Lua::new();
        let args = Variadic::from_iter([
            Value::String(lua.create_string("disk").unwrap()),
            Value::Integer(95),
            Value::Table(lua.create_table().unwrap()),
        ]);
        assert_eq!(join_args(&args), "disk 95 <table>");
    }
}
