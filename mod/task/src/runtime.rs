use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::model::TaskFault;

// ---------------------------------------------------------------------------
// WorkerRuntime — the execution seam
// ---------------------------------------------------------------------------

/// Executes a named `module.method` with arbitrary JSON arguments in an
/// isolated worker.
///
/// Faults of the worker itself (panic, missing method) come back as
/// `WorkerException`; a fault raised *by* the handler is wrapped one level
/// under `WorkerException` with the handler's fault as `inner`.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    async fn exec(&self, module: &str, method: &str, args: Vec<Value>) -> Result<Value, TaskFault>;
}

/// Provides the opaque engine snapshot handed to every handler as its first
/// argument, so worker processes can rebuild their environment.
pub trait CloneDataSource: Send + Sync {
    fn clone_data(&self) -> Value;
}

// ---------------------------------------------------------------------------
// LocalRuntime — in-process implementation
// ---------------------------------------------------------------------------

/// The boxed-future signature a registered worker function must satisfy.
pub type WorkerFuture = Pin<Box<dyn Future<Output = Result<Value, TaskFault>> + Send>>;
type WorkerFn = Arc<dyn Fn(Vec<Value>) -> WorkerFuture + Send + Sync>;

/// In-process worker runtime: a registry of async functions keyed by
/// `(module, method)`, run on the tokio runtime.
///
/// Each call runs in its own spawned task so a panicking handler surfaces
/// as a `WorkerException` instead of tearing down the dispatcher.
pub struct LocalRuntime {
    methods: RwLock<HashMap<(String, String), WorkerFn>>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Register an async function under `module.method`.
    pub fn register<F, Fut>(&self, module: &str, method: &str, func: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskFault>> + Send + 'static,
    {
        let func: WorkerFn = Arc::new(move |args| Box::pin(func(args)));
        self.methods
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((module.to_string(), method.to_string()), func);
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerRuntime for LocalRuntime {
    async fn exec(&self, module: &str, method: &str, args: Vec<Value>) -> Result<Value, TaskFault> {
        let func = self
            .methods
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(module.to_string(), method.to_string()))
            .cloned();
        let Some(func) = func else {
            return Err(TaskFault::worker(format!("unknown worker method {module}.{method}")));
        };

        match tokio::spawn(func(args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(TaskFault::worker_exception(fault)),
            Err(join_err) => Err(TaskFault::worker(format!("worker panicked: {join_err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GENERAL_ERROR, WORKER_EXCEPTION};
    use serde_json::json;

    #[tokio::test]
    async fn exec_returns_handler_result() {
        let runtime = LocalRuntime::new();
        runtime.register("math", "double", |args| async move {
            let n = args[0].as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        });

        let result = runtime.exec("math", "double", vec![json!(21)]).await.unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn handler_fault_is_wrapped_once() {
        let runtime = LocalRuntime::new();
        runtime.register("mail", "send", |_args| async move {
            Err(TaskFault::general("Mail", "sendFailed"))
        });

        let fault = runtime.exec("mail", "send", vec![]).await.unwrap_err();
        assert_eq!(fault.name, WORKER_EXCEPTION);
        let inner = fault.inner.unwrap();
        assert_eq!(inner.name, GENERAL_ERROR);
        assert_eq!(inner.message, "mail.sendFailed");
    }

    #[tokio::test]
    async fn unknown_method_is_a_worker_fault() {
        let runtime = LocalRuntime::new();
        let fault = runtime.exec("no", "such", vec![]).await.unwrap_err();
        assert_eq!(fault.name, WORKER_EXCEPTION);
        assert!(fault.inner.is_none());
        assert!(fault.message.contains("no.such"));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let runtime = LocalRuntime::new();
        runtime.register("bad", "boom", |_args| async move { panic!("kaboom") });

        let fault = runtime.exec("bad", "boom", vec![]).await.unwrap_err();
        assert_eq!(fault.name, WORKER_EXCEPTION);
        assert!(fault.message.contains("panicked"));
    }
}
