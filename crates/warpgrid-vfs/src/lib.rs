//! warpgrid-vfs — virtual resource loader.
//!
//! Resolves URIs (`file://`, `asset://`, `http://`, in-memory blobs) into
//! content bytes plus metadata by routing each request through an ordered
//! chain of [`UriHandler`]s. The first handler that claims a request
//! finalizes it; handlers that need to wait defer and complete later from
//! background work.
//!
//! # Components
//!
//! - [`carrier`] — [`ResourceRequestResponse`], the per-request state
//! - [`handler`] — the [`UriHandler`] seam and deferred completion
//! - [`chain`] — immutable, ordered [`HandlerChain`]
//! - [`loader`] — [`UriLoader`], sync and async dispatch with id correlation
//! - [`pending`] — the loader-scoped pending-request table
//! - [`sink`] — [`CompletionSink`] delivery of async results
//! - [`boundary`] — marshalling to and from a host runtime
//! - [`handlers`] — bundled memory, file, asset and network handlers
//! - [`config`] — building a chain from `vfs.toml`

pub mod boundary;
pub mod carrier;
pub mod chain;
pub mod config;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod loader;
pub mod pending;
pub mod sink;

pub use carrier::{FailureCause, MetaMap, ResourceRequestResponse, RetCode};
pub use chain::{HandlerChain, HandlerChainBuilder};
pub use error::{VfsError, VfsResult};
pub use handler::{Completer, Completion, DispatchContext, HandlerOutcome, UriHandler};
pub use loader::{CompletionPump, LoadMode, LoadRequest, LoaderConfig, UriLoader};
pub use sink::{CompletionSink, OneshotSink};
