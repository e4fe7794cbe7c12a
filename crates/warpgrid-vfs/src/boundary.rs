//! Host boundary — marshalling carriers to and from a host runtime.
//!
//! The host owns the original load call and refers to its objects through
//! opaque [`HostHandle`]s. Everything that crosses is copied:
//!
//! ```text
//! host holder ──invoke("uri")──────────────→ String
//!             ──invoke("requestHeaders")───→ map handle ──read_host_map──→ MetaMap
//! carrier     ──write_host_map(meta)───────→ map handle ──invoke("responseHeaders")
//!             ──take_content → write_host_buffer → buffer handle (host owns it)
//! ```
//!
//! Handles the native side acquires are wrapped in [`HostRef`], which
//! releases them on every exit path.

mod holder;
mod memory;

pub use holder::{HostSink, ResourceHolder};
pub use memory::{HolderState, InMemoryHost};

use std::fmt;

use crate::carrier::{MetaMap, RetCode};
use crate::error::{VfsError, VfsResult};

/// Boundary code reported for a successful request.
pub const STATUS_SUCCESS: i64 = 0;
/// Boundary code reported for a failed request. Any non-zero inbound code is
/// read as failure.
pub const STATUS_FAILED: i64 = 1;

/// Opaque reference to a host-side object, map, or buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostHandle(pub u64);

impl fmt::Display for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value passed to or returned from [`HostBridge::invoke`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostValue {
    Null,
    Int(i64),
    Str(String),
    Handle(HostHandle),
}

impl HostValue {
    pub fn as_int(&self) -> VfsResult<i64> {
        match self {
            HostValue::Int(v) => Ok(*v),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn into_string(self) -> VfsResult<String> {
        match self {
            HostValue::Str(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }

    /// `None` for `Null`, so optional host fields can be skipped.
    pub fn as_handle(&self) -> VfsResult<Option<HostHandle>> {
        match self {
            HostValue::Handle(h) => Ok(Some(*h)),
            HostValue::Null => Ok(None),
            other => Err(mismatch("handle", other)),
        }
    }
}

fn mismatch(expected: &str, got: &HostValue) -> VfsError {
    VfsError::BoundaryMarshal(format!("expected {expected}, host returned {got:?}"))
}

/// Primitives the host runtime provides to the pipeline.
///
/// Implementations must be callable from any thread: async completions are
/// delivered from the completion pump.
pub trait HostBridge: Send + Sync {
    /// Call `method` on the host object behind `target`. Argument handles are
    /// borrowed for the duration of the call.
    fn invoke(
        &self,
        target: HostHandle,
        method: &str,
        args: &[HostValue],
    ) -> VfsResult<HostValue>;

    /// Copy a host-owned string map.
    fn read_host_map(&self, handle: HostHandle) -> VfsResult<MetaMap>;

    /// Copy `map` into a new host map. The caller owns the returned handle.
    fn write_host_map(&self, map: &MetaMap) -> VfsResult<HostHandle>;

    /// Copy the bytes of a host buffer.
    fn read_host_buffer(&self, handle: HostHandle) -> VfsResult<Vec<u8>>;

    /// Move `bytes` into a new host buffer. The caller owns the returned
    /// handle until it hands it to a host object.
    fn write_host_buffer(&self, bytes: Vec<u8>) -> VfsResult<HostHandle>;

    /// Release a handle. Returns `false` if it was not live.
    fn release(&self, handle: HostHandle) -> bool;
}

/// Scoped ownership of a host handle; released on drop unless disarmed.
pub struct HostRef<'a> {
    bridge: &'a dyn HostBridge,
    handle: Option<HostHandle>,
}

impl<'a> HostRef<'a> {
    pub fn new(bridge: &'a dyn HostBridge, handle: HostHandle) -> Self {
        Self {
            bridge,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> HostHandle {
        // Only `into_raw` clears the slot, and it consumes the guard.
        self.handle.unwrap_or(HostHandle(0))
    }

    /// Give up ownership without releasing, e.g. after the host adopted it.
    pub fn into_raw(mut self) -> HostHandle {
        let handle = self.handle();
        self.handle = None;
        handle
    }
}

impl Drop for HostRef<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && !self.bridge.release(handle)
        {
            tracing::debug!(handle = %handle, "host handle already released");
        }
    }
}

impl fmt::Debug for HostRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef").field("handle", &self.handle).finish()
    }
}

/// Coarse boundary code for a finished carrier.
///
/// An `Unset` carrier never crosses the boundary.
pub fn status_to_code(status: RetCode) -> VfsResult<i64> {
    match status {
        RetCode::Success => Ok(STATUS_SUCCESS),
        RetCode::Failed => Ok(STATUS_FAILED),
        RetCode::Unset => Err(VfsError::BoundaryMarshal(
            "carrier has no terminal status".to_string(),
        )),
    }
}

pub fn code_to_status(code: i64) -> RetCode {
    if code == STATUS_SUCCESS {
        RetCode::Success
    } else {
        RetCode::Failed
    }
}
