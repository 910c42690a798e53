//! Service registry
//!
//! A [`Service`] is a named collection of remotely callable methods. Methods
//! are registered explicitly against a handler value:
//!
//! ```ignore
//! let mut service = Service::named("EchoService");
//! service.register(Echo, |r| {
//!     r.unary("Echo", |_echo, _ctx, input: EchoRequest| async move { Ok(input) });
//!     r.streaming("Repeat", |_echo, _ctx, input: EchoRequest, out: Sink<EchoRequest>| async move {
//!         out.send(input.clone()).await?;
//!         out.send(input).await
//!     });
//! })?;
//! ```
//!
//! Single-result methods have the shape `(handler, Context, In) -> Out`;
//! streaming methods have the shape `(handler, Context, In, Sink<Out>) -> ()`
//! and may emit any number of values before they return.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::rpc::protocol::RpcError;

/// Name of the built-in meta-service present on every endpoint
pub const SERVER_INFO_SERVICE: &str = "ServerInfo";

/// The meta-service's only method
pub const LIST_METHOD: &str = "List";

/// Errors raised while building services and endpoints
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no service methods defined on {handler}")]
    NoMethods { handler: String },

    #[error("duplicate method name: {name:?}")]
    DuplicateMethod { name: String },

    #[error("empty method name registered on {handler}")]
    EmptyMethodName { handler: String },

    #[error("service name {name:?} is reserved")]
    ReservedName { name: String },

    #[error("duplicate service name: {name:?}")]
    DuplicateService { name: String },
}

/// Request-specific key/value metadata for an RPC call
///
/// HTTP endpoints fill this from the request headers; pipe endpoints start
/// with an empty context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    values: HashMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the value associated with `key`, or `""` if none is defined.
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// Output side of a streaming method
pub struct Sink<T> {
    tx: mpsc::Sender<Value>,
    _item: PhantomData<fn(T)>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            _item: PhantomData,
        }
    }
}

impl<T: Serialize> Sink<T> {
    pub(crate) fn new(tx: mpsc::Sender<Value>) -> Self {
        Self {
            tx,
            _item: PhantomData,
        }
    }

    /// Emit one result. Results reach the caller in the order they are sent.
    pub async fn send(&self, item: T) -> anyhow::Result<()> {
        let value = serde_json::to_value(item)
            .map_err(|e| RpcError::internal(format!("unable to encode result: {}", e)))?;
        self.tx
            .send(value)
            .await
            .map_err(|_| RpcError::internal("result stream already closed"))?;
        Ok(())
    }
}

type Invoker =
    Arc<dyn Fn(Context, Option<Value>, mpsc::Sender<Value>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A single method on a service
#[derive(Clone)]
pub struct Method {
    pub name: String,
    /// Member names of the input type, sorted. Informational only.
    pub params: Vec<String>,
    pub stream: bool,
    invoker: Invoker,
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl Method {
    /// Decode `params` and run the handler. Every encoded output is sent to
    /// `out`; a single-result method sends exactly one value on success.
    pub fn invoke(
        &self,
        ctx: Context,
        params: Option<Value>,
        out: mpsc::Sender<Value>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.invoker)(ctx, params, out)
    }

    pub fn info(&self) -> MethodInfo {
        MethodInfo {
            name: self.name.clone(),
            params: self.params.clone(),
            stream: self.stream,
        }
    }
}

/// Serializable description of a method, as returned by `ServerInfo/List`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Serializable description of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodInfo>,
}

/// A named collection of remotely-callable methods
#[derive(Debug, Clone, Default)]
pub struct Service {
    name: String,
    methods: Vec<Method>,
}

impl Service {
    /// A service with an explicit name. A default service takes the name of
    /// the first handler registered with it.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Look up a method by its case-sensitive name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Register the methods that `build` declares on `handler`.
    ///
    /// It is an error if no method is declared, or if a declared name is
    /// already taken on this service.
    pub fn register<H, F>(&mut self, handler: H, build: F) -> Result<(), RegistryError>
    where
        H: Send + Sync + 'static,
        F: FnOnce(&mut Registrar<H>),
    {
        let handler_name = short_type_name::<H>();
        let mut registrar = Registrar {
            handler: Arc::new(handler),
            methods: Vec::new(),
        };
        build(&mut registrar);

        if registrar.methods.is_empty() {
            return Err(RegistryError::NoMethods {
                handler: handler_name.to_string(),
            });
        }

        for (i, method) in registrar.methods.iter().enumerate() {
            if method.name.is_empty() {
                return Err(RegistryError::EmptyMethodName {
                    handler: handler_name.to_string(),
                });
            }
            let taken = self.methods.iter().any(|old| old.name == method.name)
                || registrar.methods[..i].iter().any(|m| m.name == method.name);
            if taken {
                return Err(RegistryError::DuplicateMethod {
                    name: method.name.clone(),
                });
            }
        }

        let name = if self.name.is_empty() {
            handler_name
        } else {
            self.name.as_str()
        };
        if name == SERVER_INFO_SERVICE {
            return Err(RegistryError::ReservedName {
                name: name.to_string(),
            });
        }
        if self.name.is_empty() {
            self.name = handler_name.to_string();
        }

        self.methods.extend(registrar.methods);
        Ok(())
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            methods: self.methods.iter().map(Method::info).collect(),
        }
    }
}

/// Collects the methods declared for one handler
pub struct Registrar<H> {
    handler: Arc<H>,
    methods: Vec<Method>,
}

impl<H: Send + Sync + 'static> Registrar<H> {
    /// Declare a single-result method.
    pub fn unary<In, Out, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        In: DeserializeOwned + JsonSchema + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(Arc<H>, Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        let f = Arc::new(f);
        let invoker: Invoker = Arc::new(move |ctx, params, out| {
            let handler = Arc::clone(&handler);
            let f = Arc::clone(&f);
            Box::pin(async move {
                let input: In = decode_params(params)?;
                let output = (*f)(handler, ctx, input).await?;
                let value = serde_json::to_value(output)
                    .map_err(|e| RpcError::internal(format!("unable to encode result: {}", e)))?;
                out.send(value)
                    .await
                    .map_err(|_| RpcError::internal("result stream already closed"))?;
                Ok(())
            })
        });

        self.methods.push(Method {
            name: name.to_string(),
            params: param_names::<In>(),
            stream: false,
            invoker,
        });
        self
    }

    /// Declare a streaming method.
    pub fn streaming<In, Out, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        In: DeserializeOwned + JsonSchema + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(Arc<H>, Context, In, Sink<Out>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        let f = Arc::new(f);
        let invoker: Invoker = Arc::new(move |ctx, params, out| {
            let handler = Arc::clone(&handler);
            let f = Arc::clone(&f);
            Box::pin(async move {
                let input: In = decode_params(params)?;
                (*f)(handler, ctx, input, Sink::new(out)).await
            })
        });

        self.methods.push(Method {
            name: name.to_string(),
            params: param_names::<In>(),
            stream: true,
            invoker,
        });
        self
    }
}

/// Absent or null params decode like an empty object, so that input types
/// with all-default members accept a bare call.
fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let decoded = match params {
        None | Some(Value::Null) => serde_json::from_value(Value::Null)
            .or_else(|_| serde_json::from_value(Value::Object(Default::default()))),
        Some(value) => serde_json::from_value(value),
    };
    decoded.map_err(|e| RpcError::invalid_params(format!("unable to decode params: {}", e)))
}

fn param_names<T: JsonSchema>() -> Vec<String> {
    let schema = schemars::schema_for!(T);
    let mut names: Vec<String> = schema
        .as_object()
        .and_then(|root| root.get("properties"))
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}

/// `my_crate::module::Handler<T>` -> `Handler`
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
