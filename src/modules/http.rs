//! `http` module: outbound HTTP calls from scripts

use std::collections::BTreeMap;
use std::time::Duration;

use mlua::{Function, Lua, LuaSerdeExt, Table, Value};
use reqwest::Method;
use serde::Serialize;

use super::{Module, RunContext};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpModule {
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct HttpResponse {
    status_code: u16,
    body: String,
    headers: BTreeMap<String, String>,
}

#[derive(Debug)]
struct HttpRequest {
    method: Method,
    uri: String,
    body: Option<String>,
    headers: BTreeMap<String, String>,
}

impl HttpModule {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn call_fn<P>(&self, lua: &Lua, script: &str, parse: P) -> mlua::Result<Function>
    where
        P: Fn(mlua::MultiValue) -> Result<HttpRequest, String> + Send + Sync + 'static,
    {
        let client = self.client.clone();
        let script = script.to_string();

        lua.create_async_function(move |lua, args: mlua::MultiValue| {
            let client = client.clone();
            let script = script.clone();
            let request = parse(args);

            async move {
                let request = match request {
                    Ok(request) => request,
                    Err(e) => return Ok((Value::Nil, Some(format!("wrong arguments: {}", e)))),
                };

                match execute(&client, request).await {
                    Ok(response) => Ok((lua.to_value(&response)?, None)),
                    Err(e) => {
                        tracing::debug!(script = %script, error = %e, "http request failed");
                        Ok((Value::Nil, Some(e.to_string())))
                    }
                }
            }
        })
    }
}

async fn execute(
    client: &reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let mut builder = client.request(request.method, &request.uri);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status_code = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).to_string()))
        .collect();
    let body = response.text().await?;

    Ok(HttpResponse {
        status_code,
        body,
        headers,
    })
}

fn string_arg(value: Option<&Value>, what: &str) -> Result<Option<String>, String> {
    match value {
        None | Some(Value::Nil) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.to_string_lossy().to_string())),
        Some(other) => Err(format!("{} must be a string, got {}", what, other.type_name())),
    }
}

fn headers_arg(value: Option<&Value>) -> Result<BTreeMap<String, String>, String> {
    let table = match value {
        None | Some(Value::Nil) => return Ok(BTreeMap::new()),
        Some(Value::Table(t)) => t,
        Some(other) => return Err(format!("headers must be a table, got {}", other.type_name())),
    };

    let mut headers = BTreeMap::new();
    for pair in table.pairs::<String, String>() {
        let (k, v) = pair.map_err(|e| format!("headers must map strings to strings: {}", e))?;
        headers.insert(k, v);
    }
    Ok(headers)
}

/// `(uri, headers?)` or `(uri, body?, headers?)`
fn positional(
    method: Method,
    with_body: bool,
) -> impl Fn(mlua::MultiValue) -> Result<HttpRequest, String> {
    move |args| {
        let args: Vec<Value> = args.into_iter().collect();
        let uri = string_arg(args.first(), "uri")?.ok_or("uri is required")?;
        let (body, headers) = if with_body {
            (string_arg(args.get(1), "body")?, headers_arg(args.get(2))?)
        } else {
            (None, headers_arg(args.get(1))?)
        };

        Ok(HttpRequest {
            method: method.clone(),
            uri,
            body,
            headers,
        })
    }
}

/// `{method=, uri=, body=?, headers=?}`
fn from_table(args: mlua::MultiValue) -> Result<HttpRequest, String> {
    let table = match args.into_iter().next() {
        Some(Value::Table(t)) => t,
        _ => return Err("request expects a table".to_string()),
    };
    let get = |key: &str| table.get::<Value>(key).map_err(|e| e.to_string());

    let method =
        string_arg(Some(&get("method")?), "method")?.unwrap_or_else(|| "GET".to_string());
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| format!("invalid method '{}'", method))?;
    let uri = string_arg(Some(&get("uri")?), "uri")?.ok_or("uri is required")?;

    Ok(HttpRequest {
        method,
        uri,
        body: string_arg(Some(&get("body")?), "body")?,
        headers: headers_arg(Some(&get("headers")?))?,
    })
}

impl Module for HttpModule {
    fn name(&self) -> &str {
        "http"
    }

    fn inject(&self, lua: &Lua, ctx: &RunContext) -> mlua::Result<Table> {
        let script = ctx.script.name.as_str();
        let table = lua.create_table()?;
        table.set("get", self.call_fn(lua, script, positional(Method::GET, false))?)?;
        table.set("post", self.call_fn(lua, script, positional(Method::POST, true))?)?;
        table.set("put", self.call_fn(lua, script, positional(Method::PUT, true))?)?;
        table.set("delete", self.call_fn(lua, script, positional(Method::DELETE, false))?)?;
        table.set("request", self.call_fn(lua, script, from_table)?)?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::lua_with;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::Router;
    use std::sync::Arc;

    async fn serve() -> String {
        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route(
                "/echo",
                post(|headers: HeaderMap, body: String| async move {
                    let token = headers
                        .get("x-token")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    format!("{}:{}", token, body)
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn lua() -> Lua {
        let module = Arc::new(HttpModule::new().unwrap()) as Arc<dyn Module>;
        lua_with(&[module], "http-test")
    }

    #[tokio::test]
    async fn test_get() {
        let base = serve().await;
        let lua = lua();
        lua.globals().set("base", base).unwrap();

        let (status, body): (u16, String) = lua
            .load("local r = require('http').get(base .. '/ping'); return r.status_code, r.body")
            .eval_async()
            .await
            .unwrap();

        assert_eq!(status, 200);
        assert_eq!(body, "pong");
    }

    #[tokio::test]
    async fn test_post_and_request_with_headers() {
        let base = serve().await;
        let lua = lua();
        lua.globals().set("base", base).unwrap();

        let (posted, requested): (String, String) = lua
            .load(
                r#"
                local http = require('http')
                local a = http.post(base .. '/echo', 'hello', {['x-token'] = 't1'})
                local b = http.request{method = 'post', uri = base .. '/echo', body = 'again'}
                return a.body, b.body
                "#,
            )
            .eval_async()
            .await
            .unwrap();

        assert_eq!(posted, "t1:hello");
        assert_eq!(requested, ":again");
    }

    #[tokio::test]
    async fn test_errors_are_returned() {
        let lua = lua();

        let (missing, bad_headers): (Option<String>, Option<String>) = lua
            .load(
                r#"
                local http = require('http')
                local _, e1 = http.get()
                local _, e2 = http.get('http://127.0.0.1:1/', 'nope')
                return e1, e2
                "#,
            )
            .eval_async()
            .await
            .unwrap();

        assert_eq!(missing.as_deref(), Some("wrong arguments: uri is required"));
        assert!(bad_headers.unwrap().contains("headers must be a table"));
    }

    #[tokio::test]
    async fn test_connection_error() {
        let lua = lua();
        let (response, err): (Value, Option<String>) = lua
            .load("return require('http').get('http://127.0.0.1:1/')")
            .eval_async()
            .await
            .unwrap();

        assert!(response.is_nil());
        assert!(err.is_some());
    }
}
