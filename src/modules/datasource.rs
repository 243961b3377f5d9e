//! `datasource.<kind>.<name>` modules: read-only query handles

use std::sync::Arc;

use mlua::{Lua, LuaSerdeExt, Table, Value};

use super::{Module, RunContext};
use crate::datasource::{module_name, DataSource, DataSourceRegistry, RangeParams};

pub struct DataSourceModule {
    module_name: String,
    source: Arc<dyn DataSource>,
}

impl DataSourceModule {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            module_name: module_name(source.kind(), source.name()),
            source,
        }
    }

    /// One module per registered source
    pub fn modules_for(registry: &DataSourceRegistry) -> Vec<Arc<dyn Module>> {
        registry
            .iter()
            .map(|(_, source)| Arc::new(Self::new(Arc::clone(source))) as Arc<dyn Module>)
            .collect()
    }
}

impl Module for DataSourceModule {
    fn name(&self) -> &str {
        &self.module_name
    }

    fn inject(&self, lua: &Lua, ctx: &RunContext) -> mlua::Result<Table> {
        let table = lua.create_table()?;

        let source = Arc::clone(&self.source);
        let script = ctx.script.name.clone();
        table.set(
            "query",
            lua.create_async_function(move |lua, query: String| {
                let source = Arc::clone(&source);
                let script = script.clone();
                async move {
                    match source.query(&query).await {
                        Ok(rows) => Ok((lua.to_value(&rows)?, None)),
                        Err(e) => {
                            tracing::debug!(
                                script = %script,
                                source = %source.name(),
                                error = %e,
                                "query failed"
                            );
                            Ok((Value::Nil, Some(e.to_string())))
                        }
                    }
                }
            })?,
        )?;

        let source = Arc::clone(&self.source);
        let script = ctx.script.name.clone();
        table.set(
            "range",
            lua.create_async_function(move |lua, (query, params): (String, Value)| {
                let source = Arc::clone(&source);
                let script = script.clone();
                let params: mlua::Result<RangeParams> = match params {
                    Value::Nil => Ok(RangeParams::default()),
                    other => lua.from_value(other),
                };
                async move {
                    let params = match params {
                        Ok(params) => params,
                        Err(e) => {
                            return Ok((Value::Nil, Some(format!("wrong range params: {}", e))))
                        }
                    };
                    match source.range(&query, &params).await {
                        Ok(series) => Ok((lua.to_value(&series)?, None)),
                        Err(e) => {
                            tracing::debug!(
                                script = %script,
                                source = %source.name(),
                                error = %e,
                                "range query failed"
                            );
                            Ok((Value::Nil, Some(e.to_string())))
                        }
                    }
                }
            })?,
        )?;

        Ok(table)
    }
}
