//! In-process [`HostBridge`] backed by a handle table.
//!
//! Models the host side faithfully enough to check ownership: buffers are
//! counted while live, releasing an unknown handle is recorded as a stale
//! release, and holder objects adopt the buffer handed to them.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::{HostBridge, HostHandle, HostValue};
use crate::carrier::MetaMap;
use crate::error::{VfsError, VfsResult};

/// Snapshot of a host-side resource holder object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HolderState {
    pub request_id: u32,
    pub uri: String,
    pub request_headers: MetaMap,
    pub result_code: Option<i64>,
    pub response_headers: Option<MetaMap>,
    /// Buffer adopted through `buffer(handle)`.
    pub buffer: Option<HostHandle>,
    /// Number of `onFetchCompleted` notifications received.
    pub completions: u32,
}

#[derive(Debug)]
enum HostObject {
    Map(MetaMap),
    Buffer(Vec<u8>),
    Holder(HolderState),
}

#[derive(Debug)]
struct HostTable {
    objects: HashMap<u64, HostObject>,
    /// Next handle to allocate (monotonically increasing, starts at 1).
    next_handle: u64,
    stale_releases: usize,
}

impl HostTable {
    fn insert(&mut self, object: HostObject) -> HostHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(handle, object);
        HostHandle(handle)
    }

    fn holder_mut(&mut self, handle: HostHandle) -> VfsResult<&mut HolderState> {
        match self.objects.get_mut(&handle.0) {
            Some(HostObject::Holder(state)) => Ok(state),
            Some(_) => Err(VfsError::BoundaryMarshal(format!(
                "handle {handle} is not a resource holder"
            ))),
            None => Err(unknown(handle)),
        }
    }

    fn remove(&mut self, handle: HostHandle) -> bool {
        match self.objects.remove(&handle.0) {
            Some(HostObject::Holder(state)) => {
                if let Some(buffer) = state.buffer {
                    self.objects.remove(&buffer.0);
                }
                true
            }
            Some(_) => true,
            None => {
                self.stale_releases += 1;
                false
            }
        }
    }
}

fn unknown(handle: HostHandle) -> VfsError {
    VfsError::BoundaryMarshal(format!("unknown host handle {handle}"))
}

/// Reference host runtime used by tests and the CLI.
#[derive(Debug)]
pub struct InMemoryHost {
    table: Mutex<HostTable>,
    /// Signalled on every `onFetchCompleted`.
    completed: Condvar,
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HostTable {
                objects: HashMap::new(),
                next_handle: 1,
                stale_releases: 0,
            }),
            completed: Condvar::new(),
        }
    }

    /// Create a holder object the way a host would before calling into the
    /// loader.
    pub fn create_holder(
        &self,
        request_id: u32,
        uri: impl Into<String>,
        request_headers: MetaMap,
    ) -> HostHandle {
        let state = HolderState {
            request_id,
            uri: uri.into(),
            request_headers,
            ..HolderState::default()
        };
        self.table.lock().unwrap().insert(HostObject::Holder(state))
    }

    pub fn holder(&self, handle: HostHandle) -> Option<HolderState> {
        match self.table.lock().unwrap().objects.get(&handle.0) {
            Some(HostObject::Holder(state)) => Some(state.clone()),
            _ => None,
        }
    }

    /// Bytes of the buffer a holder adopted, if any.
    pub fn holder_content(&self, handle: HostHandle) -> Option<Vec<u8>> {
        let table = self.table.lock().unwrap();
        let Some(HostObject::Holder(state)) = table.objects.get(&handle.0) else {
            return None;
        };
        match table.objects.get(&state.buffer?.0) {
            Some(HostObject::Buffer(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn live_handles(&self) -> usize {
        self.table.lock().unwrap().objects.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.table
            .lock()
            .unwrap()
            .objects
            .values()
            .filter(|o| matches!(o, HostObject::Buffer(_)))
            .count()
    }

    /// Block until the holder behind `handle` has been notified through
    /// `onFetchCompleted`. Returns `false` if `timeout` elapses first or the
    /// holder is released.
    pub fn wait_completed(&self, handle: HostHandle, timeout: Duration) -> bool {
        let completions = |table: &HostTable| match table.objects.get(&handle.0) {
            Some(HostObject::Holder(state)) => Some(state.completions),
            _ => None,
        };
        let table = self.table.lock().unwrap();
        let (table, _) = self
            .completed
            .wait_timeout_while(table, timeout, |table| completions(table) == Some(0))
            .unwrap();
        matches!(completions(&table), Some(n) if n > 0)
    }

    /// Releases of handles that were not live (double frees).
    pub fn stale_releases(&self) -> usize {
        self.table.lock().unwrap().stale_releases
    }
}

impl HostBridge for InMemoryHost {
    fn invoke(
        &self,
        target: HostHandle,
        method: &str,
        args: &[HostValue],
    ) -> VfsResult<HostValue> {
        let mut table = self.table.lock().unwrap();
        tracing::trace!(handle = %target, method, "host invoke");

        match (method, args) {
            ("nativeRequestId", []) => {
                let state = table.holder_mut(target)?;
                Ok(HostValue::Int(i64::from(state.request_id)))
            }
            ("uri", []) => Ok(HostValue::Str(table.holder_mut(target)?.uri.clone())),
            ("requestHeaders", []) => {
                let headers = table.holder_mut(target)?.request_headers.clone();
                Ok(HostValue::Handle(table.insert(HostObject::Map(headers))))
            }
            ("resultCode", []) => Ok(match table.holder_mut(target)?.result_code {
                Some(code) => HostValue::Int(code),
                None => HostValue::Null,
            }),
            // Readers get a fresh copy; the caller releases it.
            ("responseHeaders", []) => {
                let Some(headers) = table.holder_mut(target)?.response_headers.clone() else {
                    return Ok(HostValue::Null);
                };
                Ok(HostValue::Handle(table.insert(HostObject::Map(headers))))
            }
            ("buffer", []) => {
                let Some(buffer) = table.holder_mut(target)?.buffer else {
                    return Ok(HostValue::Null);
                };
                let bytes = match table.objects.get(&buffer.0) {
                    Some(HostObject::Buffer(bytes)) => bytes.clone(),
                    _ => return Err(unknown(buffer)),
                };
                Ok(HostValue::Handle(table.insert(HostObject::Buffer(bytes))))
            }
            ("resultCode", [HostValue::Int(code)]) => {
                table.holder_mut(target)?.result_code = Some(*code);
                Ok(HostValue::Null)
            }
            ("responseHeaders", [HostValue::Handle(map)]) => {
                let headers = match table.objects.get(&map.0) {
                    Some(HostObject::Map(m)) => m.clone(),
                    Some(_) => {
                        return Err(VfsError::BoundaryMarshal(format!(
                            "handle {map} is not a map"
                        )));
                    }
                    None => return Err(unknown(*map)),
                };
                table.holder_mut(target)?.response_headers = Some(headers);
                Ok(HostValue::Null)
            }
            ("buffer", [HostValue::Handle(buffer)]) => {
                if !matches!(table.objects.get(&buffer.0), Some(HostObject::Buffer(_))) {
                    return Err(VfsError::BoundaryMarshal(format!(
                        "handle {buffer} is not a buffer"
                    )));
                }
                let previous = table.holder_mut(target)?.buffer.replace(*buffer);
                if let Some(previous) = previous
                    && previous != *buffer
                {
                    table.objects.remove(&previous.0);
                }
                Ok(HostValue::Null)
            }
            ("onFetchCompleted", []) => {
                table.holder_mut(target)?.completions += 1;
                self.completed.notify_all();
                Ok(HostValue::Null)
            }
            _ => Err(VfsError::BoundaryMarshal(format!(
                "host object {target} has no method {method}/{}",
                args.len()
            ))),
        }
    }

    fn read_host_map(&self, handle: HostHandle) -> VfsResult<MetaMap> {
        match self.table.lock().unwrap().objects.get(&handle.0) {
            Some(HostObject::Map(map)) => Ok(map.clone()),
            Some(_) => Err(VfsError::BoundaryMarshal(format!(
                "handle {handle} is not a map"
            ))),
            None => Err(unknown(handle)),
        }
    }

    fn write_host_map(&self, map: &MetaMap) -> VfsResult<HostHandle> {
        Ok(self
            .table
            .lock()
            .unwrap()
            .insert(HostObject::Map(map.clone())))
    }

    fn read_host_buffer(&self, handle: HostHandle) -> VfsResult<Vec<u8>> {
        match self.table.lock().unwrap().objects.get(&handle.0) {
            Some(HostObject::Buffer(bytes)) => Ok(bytes.clone()),
            Some(_) => Err(VfsError::BoundaryMarshal(format!(
                "handle {handle} is not a buffer"
            ))),
            None => Err(unknown(handle)),
        }
    }

    fn write_host_buffer(&self, bytes: Vec<u8>) -> VfsResult<HostHandle> {
        Ok(self.table.lock().unwrap().insert(HostObject::Buffer(bytes)))
    }

    fn release(&self, handle: HostHandle) -> bool {
        self.table.lock().unwrap().remove(handle)
    }
}
