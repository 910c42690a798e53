//! JSON RPC over newline-delimited streams
//!
//! - [`protocol`]: request/response envelopes, versions and error codes
//! - [`service`]: typed method registration
//! - [`endpoint`]: request dispatch, HTTP and pipe serving
//! - [`client`] and [`transport`]: the calling side

pub mod client;
pub mod endpoint;
pub mod protocol;
pub mod service;
pub mod transport;

pub use client::{Client, ClientError, PipeReader, PipeWriter, Reader};
pub use endpoint::{Endpoint, ResolveError, WriterError};
pub use protocol::{ErrorCode, Request, Response, RpcError, Version};
pub use service::{Context, Method, MethodInfo, RegistryError, Service, ServiceInfo, Sink};
pub use transport::{HttpTransport, LocalTransport, Transport};
