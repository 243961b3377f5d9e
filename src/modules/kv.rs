//! `kv` module: a persistent string namespace shared by all scripts

use std::sync::Arc;

use mlua::{Function, IntoLuaMulti, Lua, MultiValue, Table, Value};

use super::{lua_result, Module, RunContext};
use crate::storage::{KvStore, StorageError};

pub struct KvModule {
    store: Arc<dyn KvStore>,
}

impl KvModule {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

/// Mutations return nothing on success and `(nil, err)` on failure
fn unit_result(lua: &Lua, result: Result<(), StorageError>) -> mlua::Result<MultiValue> {
    match result {
        Ok(()) => ().into_lua_multi(lua),
        Err(e) => (Value::Nil, e.to_string()).into_lua_multi(lua),
    }
}

fn mutation<F, Fut>(
    lua: &Lua,
    store: &Arc<dyn KvStore>,
    script: &str,
    op: &'static str,
    f: F,
) -> mlua::Result<Function>
where
    F: Fn(Arc<dyn KvStore>, String, String) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = Result<(), StorageError>> + Send + 'static,
{
    let store = Arc::clone(store);
    let script = script.to_string();

    lua.create_async_function(move |lua, (key, value): (String, Option<String>)| {
        let store = Arc::clone(&store);
        let script = script.clone();
        let f = f.clone();
        async move {
            let result = f(store, key.clone(), value.unwrap_or_default()).await;
            if let Err(e) = &result {
                tracing::debug!(script = %script, key = %key, op, error = %e, "kv operation failed");
            }
            unit_result(&lua, result)
        }
    })
}

impl Module for KvModule {
    fn name(&self) -> &str {
        "kv"
    }

    fn inject(&self, lua: &Lua, ctx: &RunContext) -> mlua::Result<Table> {
        let table = lua.create_table()?;
        let script = ctx.script.name.as_str();

        let store = Arc::clone(&self.store);
        table.set(
            "all",
            lua.create_async_function(move |_, ()| {
                let store = Arc::clone(&store);
                async move { Ok(lua_result(store.all().await)) }
            })?,
        )?;

        let store = Arc::clone(&self.store);
        table.set(
            "get",
            lua.create_async_function(move |_, key: String| {
                let store = Arc::clone(&store);
                async move {
                    Ok(match store.get(&key).await {
                        Ok(value) => (value, None),
                        Err(e) => (None, Some(e.to_string())),
                    })
                }
            })?,
        )?;

        table.set(
            "put",
            mutation(lua, &self.store, script, "put", |store, key, value| async move {
                store.put(&key, &value).await
            })?,
        )?;
        table.set(
            "upsert",
            mutation(lua, &self.store, script, "upsert", |store, key, value| async move {
                store.upsert(&key, &value).await
            })?,
        )?;
        table.set(
            "delete",
            mutation(lua, &self.store, script, "delete", |store, key, _| async move {
                store.delete(&key).await
            })?,
        )?;

        Ok(table)
    }
}
