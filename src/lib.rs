//! Tripwire: scripted alerting engine
//!
//! Operators write checks as Lua scripts. The engine runs them on a schedule
//! (or once), lets them query data sources and raise named alerts, and
//! decides for every raise whether to notify, stay silent or send a
//! reminder, fanning notifications out to the configured channels.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tripwire::alerts::AlertManager;
//! use tripwire::channels::ChannelRegistry;
//! use tripwire::modules::{AlertModule, LogModule, Module};
//! use tripwire::runner::{Runner, RunnerConfig};
//! use tripwire::script::Script;
//! use tripwire::storage::{CoreStorage, MemoryStorage};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::new("memory");
//! let manager = Arc::new(AlertManager::new(storage.alert(), Arc::new(ChannelRegistry::new())));
//! let modules: Vec<Arc<dyn Module>> = vec![Arc::new(AlertModule::new(manager)), Arc::new(LogModule)];
//!
//! let script = Script::new("disk", "require('alert').warning('disk', 'usage 85%')");
//! let runner = Arc::new(Runner::new(vec![script], RunnerConfig::default(), modules)?);
//! let summary = Arc::clone(&runner).watch(CancellationToken::new(), true).await;
//! runner.stop().await;
//! println!("{:?}", summary);
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod channels;
pub mod config;
pub mod datasource;
pub mod modules;
pub mod runner;
pub mod script;
pub mod storage;

// Re-export commonly used types
pub use alerts::{AlertManager, Level};
pub use config::{Config, ConfigError};
pub use runner::{RunSummary, Runner, RunnerConfig};
pub use script::Script;
