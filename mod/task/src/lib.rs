//! Durable background-task connector.
//!
//! Clients submit typed task descriptors; the connector persists each one,
//! drives a per-type serial dispatch loop through a [`WorkerRuntime`]
//! adapter, records outcomes with retry scheduling, and garbage-collects
//! terminal records by retention policy. The entity store stays the
//! authority on what runs next, so restarts resume with at-least-once
//! semantics.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gantry_entity::MemoryStore;
//! use gantry_task::{ConnectorConfig, CreateOptions, LocalRuntime, TaskConnector};
//!
//! # async fn demo() -> Result<(), gantry_core::ServiceError> {
//! let runtime = Arc::new(LocalRuntime::new());
//! runtime.register("mail", "send", |_args| async move {
//!     Ok(serde_json::json!({"sent": true}))
//! });
//!
//! let connector = TaskConnector::new(
//!     Arc::new(MemoryStore::new()),
//!     runtime,
//!     None,
//!     ConnectorConfig::default(),
//! )?;
//! connector.register_handler("mail.send", "mail", "send");
//! connector.start();
//!
//! let urn = connector.create(
//!     "mail.send",
//!     Some(serde_json::json!({"to": "x@example.com"})),
//!     CreateOptions { retain_for: Some(60_000), ..Default::default() },
//! )?;
//! # let _ = urn;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod engine;
pub mod model;
pub mod runtime;
mod store;
pub mod urn;

pub use engine::{ConnectorConfig, HandlerBinding, TaskConnector};
pub use model::{
    CreateOptions, SortProperty, Task, TaskFault, TaskQuery, TaskStatus, TaskView,
};
pub use runtime::{CloneDataSource, LocalRuntime, WorkerRuntime};
