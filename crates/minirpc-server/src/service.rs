//! Named services and their methods.
//!
//! A service is a bag of methods registered under `"Service.Method"` names.
//! Methods are typed async closures; registration erases the argument and
//! reply types behind a serde boundary, so the dispatch loop only ever sees
//! codec bytes. This replaces runtime reflection: the types are checked
//! where the handler is written, and the wire stays schema-free.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use minirpc_core::{Codec, Result, RpcError};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Handler = Box<dyn Fn(Codec, Vec<u8>) -> BoxFuture<Result<Vec<u8>>> + Send + Sync>;

/// One registered method: the erased handler plus an invocation counter.
pub struct Method {
    handler: Handler,
    calls: AtomicU64,
}

impl Method {
    /// Number of times this method has been invoked (including invocations
    /// that failed or timed out mid-handler).
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn invoke(&self, codec: Codec, body: Vec<u8>) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.handler)(codec, body).await
    }
}

/// A named service under construction or registered with a [`Server`].
///
/// Built with the usual builder chain:
///
/// ```
/// use minirpc_server::Service;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Args { a: i32, b: i32 }
///
/// let service = Service::new("Foo")
///     .method("Sum", |args: Args| async move { Ok(args.a + args.b) });
/// assert_eq!(service.name(), "Foo");
/// ```
///
/// Once registered, a service is immutable; its methods never change.
///
/// [`Server`]: crate::Server
pub struct Service {
    name: String,
    methods: HashMap<String, Method>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Adds a method. The handler takes the deserialized argument value and
    /// produces the reply; both cross the wire in whatever codec the
    /// connection negotiated.
    pub fn method<A, R, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: Handler = Box::new(move |codec: Codec, body: Vec<u8>| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let args: A = codec.decode(&body)?;
                let reply = handler(args).await?;
                codec.encode(&reply)
            })
        });
        self.methods.insert(
            name.into(),
            Method {
                handler: erased,
                calls: AtomicU64::new(0),
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn call_count(&self, method: &str) -> Option<u64> {
        self.methods.get(method).map(Method::call_count)
    }

    pub(crate) async fn invoke(&self, method: &str, codec: Codec, body: Vec<u8>) -> Result<Vec<u8>> {
        let method = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound(method.to_string()))?;
        method.invoke(codec, body).await
    }
}
