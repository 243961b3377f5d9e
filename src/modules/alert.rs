//! `alert` module: raise and inspect alerts from scripts
//!
//! ```lua
//! local alert = require('alert')
//! local err = alert.error('disk', 'usage 95%', {['repeat'] = 10, channels = {'ops'}})
//! ```

use std::sync::Arc;

use mlua::{Function, Lua, LuaSerdeExt, Table, Value};

use super::{scalar_string, Module, RunContext};
use crate::alerts::{AlertError, AlertManager, Attachment, Level, RaiseOptions, RaiseRequest};

pub struct AlertModule {
    manager: Arc<AlertManager>,
}

impl AlertModule {
    pub fn new(manager: Arc<AlertManager>) -> Self {
        Self { manager }
    }

    fn raise_fn(&self, lua: &Lua, ctx: &RunContext, level: Level) -> mlua::Result<Function> {
        let manager = Arc::clone(&self.manager);
        let script = Arc::clone(&ctx.script);

        lua.create_async_function(move |_, (name, text, options): (Value, Value, Value)| {
            let manager = Arc::clone(&manager);
            let script = Arc::clone(&script);
            let parsed = parse_raise(&name, &text, &options, level);

            async move {
                let request = match parsed {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::error!(script = %script.name, error = %e, "Error get alert arguments");
                        return Ok(Some(format!("error get arguments: {}", e)));
                    }
                };

                match manager.raise(request, &script.channels).await {
                    Ok(_) => Ok(None),
                    Err(e) => {
                        tracing::error!(script = %script.name, error = %e, "Alert raise failed");
                        Err(mlua::Error::external(e))
                    }
                }
            }
        })
    }

    fn get_fn(&self, lua: &Lua) -> mlua::Result<Function> {
        let manager = Arc::clone(&self.manager);

        lua.create_async_function(move |lua, name: String| {
            let manager = Arc::clone(&manager);
            async move {
                match manager.get(&name).await {
                    Ok(Some(alert)) => lua.to_value(&alert),
                    Ok(None) => Ok(Value::Nil),
                    Err(e) => Err(mlua::Error::external(e)),
                }
            }
        })
    }
}

impl Module for AlertModule {
    fn name(&self) -> &str {
        "alert"
    }

    fn inject(&self, lua: &Lua, ctx: &RunContext) -> mlua::Result<Table> {
        let table = lua.create_table()?;
        for (name, level) in [
            ("success", Level::Success),
            ("warning", Level::Warning),
            ("warn", Level::Warning),
            ("error", Level::Error),
        ] {
            table.set(name, self.raise_fn(lua, ctx, level)?)?;
        }
        table.set("get", self.get_fn(lua)?)?;
        Ok(table)
    }
}

/// Decode `(name, text?, options?)` into a validated request
pub fn parse_raise(
    name: &Value,
    text: &Value,
    options: &Value,
    level: Level,
) -> Result<RaiseRequest, AlertError> {
    let name = match name {
        Value::Nil => return Err(AlertError::MissingName),
        other => scalar_string(other).ok_or(AlertError::NameNotString)?,
    };

    let text = match text {
        Value::Nil => String::new(),
        Value::String(_) | Value::Integer(_) | Value::Number(_) => {
            scalar_string(text).unwrap_or_default()
        }
        _ => return Err(AlertError::TextNotString),
    };

    let options = match options {
        Value::Nil => RaiseOptions::default(),
        Value::Table(table) => parse_options(table)?,
        _ => return Err(AlertError::OptionsNotTable),
    };

    RaiseRequest::new(&name, text, level, options)
}

/// Recognized keys: `fields`, `channels`, `quiet`, `repeat`, `image`.
/// Other keys are ignored; wrong types on recognized keys are errors.
fn parse_options(table: &Table) -> Result<RaiseOptions, AlertError> {
    let field = |key: &str| -> Result<Value, AlertError> {
        table
            .get::<Value>(key)
            .map_err(|e| AlertError::InvalidOptions(e.to_string()))
    };

    let mut options = RaiseOptions::new()
        .with_fields(string_list(field("fields")?, "fields")?)
        .with_channels(string_list(field("channels")?, "channels")?);

    options.quiet = match field("quiet")? {
        Value::Nil => false,
        Value::Boolean(b) => b,
        _ => return Err(invalid("quiet must be a boolean")),
    };

    options.repeat = match field("repeat")? {
        Value::Nil => 0,
        Value::Integer(n) if n >= 0 => n as u64,
        Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as u64,
        _ => return Err(invalid("repeat must be a non-negative integer")),
    };

    options.image = match field("image")? {
        Value::Nil => None,
        Value::String(s) => Some(Attachment::sniff(s.as_bytes().to_vec())),
        Value::Table(t) => Some(attachment_from_table(&t)?),
        _ => return Err(invalid("image must be a string or a chart attachment")),
    };

    Ok(options)
}

fn string_list(value: Value, key: &str) -> Result<Vec<String>, AlertError> {
    let table = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(t) => t,
        _ => return Err(invalid(&format!("{} must be a list of strings", key))),
    };

    let mut out = Vec::new();
    for item in table.sequence_values::<Value>() {
        match item.map_err(|e| AlertError::InvalidOptions(e.to_string()))? {
            Value::String(s) => out.push(s.to_string_lossy().to_string()),
            _ => return Err(invalid(&format!("{} must be a list of strings", key))),
        }
    }
    Ok(out)
}

fn attachment_from_table(table: &Table) -> Result<Attachment, AlertError> {
    let content_type = table.get::<Value>("content_type").ok();
    let data = table.get::<Value>("data").ok();
    match (content_type, data) {
        (Some(Value::String(ct)), Some(Value::String(data))) => Ok(Attachment::new(
            ct.to_string_lossy().to_string(),
            data.as_bytes().to_vec(),
        )),
        _ => Err(invalid("image table must have string content_type and data")),
    }
}

fn invalid(message: &str) -> AlertError {
    AlertError::InvalidOptions(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::testing::RecordingChannel;
    use crate::channels::{Channel, ChannelRegistry};
    use crate::modules::testing::lua_with;
    use crate::storage::{AlertStore, CoreStorage, MemoryStorage};

    fn setup() -> (Lua, Arc<dyn AlertStore>, Arc<RecordingChannel>) {
        let storage = MemoryStorage::new("mem");
        let ops = RecordingChannel::new("ops");
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::clone(&ops) as Arc<dyn Channel>);

        let store = storage.alert();
        let manager = Arc::new(AlertManager::new(Arc::clone(&store), Arc::new(registry)));
        let module = Arc::new(AlertModule::new(manager)) as Arc<dyn Module>;
        (lua_with(&[module], "test"), store, ops)
    }

    #[tokio::test]
    async fn test_raise_from_lua() {
        let (lua, store, ops) = setup();

        let err: Option<String> = lua
            .load(
                r#"
                local alert = require('alert')
                return alert.error(' disk ', 'full', {fields = {'host=db1'}, ['repeat'] = 2, unknown = true})
                "#,
            )
            .eval_async()
            .await
            .unwrap();

        assert!(err.is_none());
        assert_eq!(ops.count(), 1);
        assert_eq!(ops.messages()[0].fields, vec!["host=db1"]);
        let alert = store.get("disk").await.unwrap().unwrap();
        assert_eq!(alert.level, Level::Error);
    }

    #[tokio::test]
    async fn test_empty_name_returns_error_string() {
        let (lua, store, ops) = setup();

        let err: Option<String> = lua
            .load("return require('alert').warning('   ')")
            .eval_async()
            .await
            .unwrap();

        assert_eq!(
            err.as_deref(),
            Some("error get arguments: alert name must be not empty")
        );
        assert!(store.all().await.unwrap().is_empty());
        assert_eq!(ops.count(), 0);
    }

    #[tokio::test]
    async fn test_option_type_mismatch_returns_error_string() {
        let (lua, store, _) = setup();

        let err: Option<String> = lua
            .load("return require('alert').error('disk', 'x', {quiet = 'yes'})")
            .eval_async()
            .await
            .unwrap();

        assert_eq!(
            err.as_deref(),
            Some("error get arguments: wrong options format: quiet must be a boolean")
        );
        assert!(store.get("disk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_alert_get() {
        let (lua, _, _) = setup();

        let (level, count): (String, i64) = lua
            .load(
                r#"
                local alert = require('alert')
                alert.warn('cpu', '', {quiet = true})
                alert.warn('cpu', '', {quiet = true})
                local a = alert.get('cpu')
                return a.level, a.count
                "#,
            )
            .eval_async()
            .await
            .unwrap();

        assert_eq!(level, "warning");
        assert_eq!(count, 1);

        let missing: Value = lua
            .load("return require('alert').get('nope')")
            .eval_async()
            .await
            .unwrap();
        assert!(missing.is_nil());
    }

    #[test]
    fn test_parse_options() {
        let lua = Lua::new();
        let table: Table = lua
            .load("return {channels = {'a', 'b'}, ['repeat'] = 3.0, quiet = false, image = '<svg/>'}")
            .eval()
            .unwrap();
        let request = parse_raise(
            &Value::String(lua.create_string("disk").unwrap()),
            &Value::Nil,
            &Value::Table(table),
            Level::Warning,
        )
        .unwrap();

        let options = request.options();
        assert_eq!(options.channels, vec!["a", "b"]);
        assert_eq!(options.repeat, 3);
        assert_eq!(
            options.image.as_ref().map(|i| i.content_type.as_str()),
            Some("image/svg+xml")
        );
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        let lua = Lua::new();
        let name = Value::String(lua.create_string("disk").unwrap());

        assert!(matches!(
            parse_raise(&Value::Nil, &Value::Nil, &Value::Nil, Level::Error),
            Err(AlertError::MissingName)
        ));
        assert!(matches!(
            parse_raise(&name, &Value::Nil, &Value::Integer(1), Level::Error),
            Err(AlertError::OptionsNotTable)
        ));

        let negative: Table = lua.load("return {['repeat'] = -1}").eval().unwrap();
        assert!(matches!(
            parse_raise(&name, &Value::Nil, &Value::Table(negative), Level::Error),
            Err(AlertError::InvalidOptions(_))
        ));

        let bad_fields: Table = lua.load("return {fields = {1, 2}}").eval().unwrap();
        assert!(parse_raise(&name, &Value::Nil, &Value::Table(bad_fields), Level::Error).is_err());
    }
}
