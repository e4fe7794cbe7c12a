//! Native proxy for a host-side resource holder object.
//!
//! The host creates a holder per load call and exposes it through these
//! methods:
//!
//! | method             | direction | value                          |
//! |--------------------|-----------|--------------------------------|
//! | `nativeRequestId`  | read      | request id                     |
//! | `uri`              | read      | URI string                     |
//! | `requestHeaders`   | read      | map handle (caller releases)   |
//! | `resultCode`       | write     | boundary status code           |
//! | `responseHeaders`  | write     | map handle (borrowed)          |
//! | `buffer`           | write     | buffer handle (host adopts it) |
//! | `resultCode`       | read      | status code, `Null` if unset   |
//! | `responseHeaders`  | read      | map handle (caller releases)   |
//! | `buffer`           | read      | buffer copy (caller releases)  |
//! | `onFetchCompleted` | notify    | —                              |

use std::sync::Arc;

use super::{HostBridge, HostHandle, HostRef, HostValue, code_to_status, status_to_code};
use crate::carrier::{MetaMap, ResourceRequestResponse, RetCode};
use crate::error::{VfsError, VfsResult};
use crate::loader::{LoadRequest, UriLoader};
use crate::sink::CompletionSink;

pub struct ResourceHolder {
    bridge: Arc<dyn HostBridge>,
    holder: HostHandle,
}

impl ResourceHolder {
    pub fn new(bridge: Arc<dyn HostBridge>, holder: HostHandle) -> Self {
        Self { bridge, holder }
    }

    pub fn handle(&self) -> HostHandle {
        self.holder
    }

    pub fn request_id(&self) -> VfsResult<u32> {
        let raw = self
            .bridge
            .invoke(self.holder, "nativeRequestId", &[])?
            .as_int()?;
        u32::try_from(raw)
            .map_err(|_| VfsError::BoundaryMarshal(format!("request id {raw} out of range")))
    }

    /// Read the inbound request from the holder.
    pub fn to_request(&self) -> VfsResult<LoadRequest> {
        let request_id = self.request_id()?;
        let uri = self.bridge.invoke(self.holder, "uri", &[])?.into_string()?;

        let headers = self.bridge.invoke(self.holder, "requestHeaders", &[])?;
        let request_meta = match headers.as_handle()? {
            Some(handle) => {
                let map = HostRef::new(self.bridge.as_ref(), handle);
                self.bridge.read_host_map(map.handle())?
            }
            None => Default::default(),
        };

        Ok(LoadRequest::new(request_id, uri).with_meta(request_meta))
    }

    /// Write a finished carrier back to the holder.
    ///
    /// The content buffer is moved out of `response`; on success the host
    /// owns it, on failure it is released. An `Unset` carrier is rejected
    /// before anything is written, and the result code goes last so a
    /// holder left half-written still reads as unset.
    pub fn apply(&self, response: &mut ResourceRequestResponse) -> VfsResult<()> {
        let code = status_to_code(response.status())?;
        let bridge = self.bridge.as_ref();

        let headers = HostRef::new(bridge, bridge.write_host_map(response.response_meta())?);
        bridge.invoke(
            self.holder,
            "responseHeaders",
            &[HostValue::Handle(headers.handle())],
        )?;

        if let Some(content) = response.take_content() {
            let size = content.len();
            let buffer = HostRef::new(bridge, bridge.write_host_buffer(content)?);
            bridge.invoke(self.holder, "buffer", &[HostValue::Handle(buffer.handle())])?;
            let adopted = buffer.into_raw();
            tracing::trace!(
                request_id = response.request_id(),
                buffer = %adopted,
                size,
                "content handed to host"
            );
        }

        bridge.invoke(self.holder, "resultCode", &[HostValue::Int(code)])?;
        Ok(())
    }

    /// Status the host holds; `Unset` until a result has been applied.
    pub fn result_code(&self) -> VfsResult<RetCode> {
        match self.bridge.invoke(self.holder, "resultCode", &[])? {
            HostValue::Null => Ok(RetCode::Unset),
            value => Ok(code_to_status(value.as_int()?)),
        }
    }

    /// Copy of the response headers the host holds.
    pub fn response_meta(&self) -> VfsResult<MetaMap> {
        let value = self.bridge.invoke(self.holder, "responseHeaders", &[])?;
        match value.as_handle()? {
            Some(handle) => {
                let map = HostRef::new(self.bridge.as_ref(), handle);
                self.bridge.read_host_map(map.handle())
            }
            None => Ok(MetaMap::new()),
        }
    }

    /// Copy of the content buffer the host holds; empty if none.
    pub fn content(&self) -> VfsResult<Vec<u8>> {
        let value = self.bridge.invoke(self.holder, "buffer", &[])?;
        match value.as_handle()? {
            Some(handle) => {
                let buffer = HostRef::new(self.bridge.as_ref(), handle);
                self.bridge.read_host_buffer(buffer.handle())
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn fetch_complete(&self) -> VfsResult<()> {
        self.bridge
            .invoke(self.holder, "onFetchCompleted", &[])
            .map(|_| ())
    }

    /// Serve a host-initiated load.
    ///
    /// Synchronous loads are applied to the holder before returning.
    /// Asynchronous loads apply and notify through a [`HostSink`] later.
    pub fn load(self, loader: &UriLoader, sync: bool) -> VfsResult<()> {
        let request = self.to_request()?;
        if sync {
            let mut response = loader.load_sync(request)?;
            self.apply(&mut response)
        } else {
            loader.load_async(request, HostSink::new(self))
        }
    }
}

/// Delivers async results to a host holder and notifies it.
///
/// A holder the host has already torn down makes the calls fail; the result
/// is then discarded.
pub struct HostSink {
    holder: ResourceHolder,
}

impl HostSink {
    pub fn new(holder: ResourceHolder) -> Self {
        Self { holder }
    }

    fn deliver(&self, response: &mut ResourceRequestResponse) -> VfsResult<()> {
        self.holder.apply(response)?;
        self.holder.fetch_complete()
    }
}

impl CompletionSink for HostSink {
    fn complete(self: Box<Self>, request_id: u32, mut response: ResourceRequestResponse) {
        if let Err(e) = self.deliver(&mut response) {
            tracing::debug!(
                request_id,
                holder = %self.holder.handle(),
                error = %e,
                "host holder unavailable, discarding completion"
            );
        }
    }
}
