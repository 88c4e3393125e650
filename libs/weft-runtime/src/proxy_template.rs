//! Pull-clone protocol for task templates (and other immutable metadata).
//!
//! The first reference to a foreign template GUID creates a proxy entry and
//! emits exactly one `GUID_METADATA_CLONE` request. References originating
//! in user code on this domain block (spinning through the monitor-progress
//! checkpoint) until the metadata registers; references arriving from peers
//! park their whole message on the proxy queue and are re-injected once the
//! clone lands.
//!
//! One table lock serialises proxy creation against clone completion; the
//! completion path closes the queue by taking it under that lock, so a late
//! queuer either lands before the take (and is re-injected) or observes the
//! registry already populated.

use std::collections::HashMap;

use parking_lot::Mutex;

use weft_proto::PolicyMsg;
use weft_types::Guid;

struct ProxyTemplate {
    /// Messages to re-inject when the metadata arrives.
    queue: Vec<PolicyMsg>,
    /// Outstanding interest; the entry dies when the clone completes and the
    /// last waiter has checked out.
    count: u32,
}

/// Outcome of resolving a template GUID for a locally-originated operation.
#[derive(Debug, PartialEq, Eq)]
pub enum LocalResolve {
    /// Metadata is registered; proceed.
    Ready,
    /// Caller must busy-wait through monitor-progress until registration;
    /// when `send_clone` is set it first emits the clone request.
    Wait { send_clone: bool },
}

/// Outcome of resolving a template GUID for a peer-originated message.
#[derive(Debug, PartialEq, Eq)]
pub enum RemoteResolve {
    /// Metadata is registered; the message is handed back for processing.
    Ready(Box<PolicyMsg>),
    /// Message parked on the proxy queue; the router answers `EPEND`.
    /// When `send_clone` is set the caller emits the clone request.
    Pending { send_clone: bool },
}

#[derive(Default)]
pub struct ProxyTemplateTable {
    proxies: Mutex<HashMap<Guid, ProxyTemplate>>,
}

impl ProxyTemplateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve for user code running on this domain.
    ///
    /// `registered` is evaluated under the table lock to close the race with
    /// a concurrent clone completion.
    pub fn resolve_local(&self, guid: Guid, registered: impl Fn() -> bool) -> LocalResolve {
        let mut proxies = self.proxies.lock();
        if registered() {
            return LocalResolve::Ready;
        }
        match proxies.get_mut(&guid) {
            Some(proxy) => {
                proxy.count += 1;
                LocalResolve::Wait { send_clone: false }
            }
            None => {
                proxies.insert(
                    guid,
                    ProxyTemplate {
                        queue: Vec::new(),
                        count: 1,
                    },
                );
                tracing::debug!(template = %guid, "First local reference, pulling metadata");
                LocalResolve::Wait { send_clone: true }
            }
        }
    }

    /// A blocked local resolver checked the registry again; drop interest.
    pub fn check_out(&self, guid: Guid) {
        let mut proxies = self.proxies.lock();
        if let Some(proxy) = proxies.get_mut(&guid) {
            proxy.count -= 1;
            if proxy.count == 0 && proxy.queue.is_empty() {
                proxies.remove(&guid);
            }
        }
    }

    /// Resolve for a message that arrived from a peer: park it.
    pub fn resolve_remote(
        &self,
        guid: Guid,
        msg: PolicyMsg,
        registered: impl Fn() -> bool,
    ) -> RemoteResolve {
        let mut proxies = self.proxies.lock();
        if registered() {
            return RemoteResolve::Ready(Box::new(msg));
        }
        match proxies.get_mut(&guid) {
            Some(proxy) => {
                proxy.queue.push(msg);
                RemoteResolve::Pending { send_clone: false }
            }
            None => {
                proxies.insert(
                    guid,
                    ProxyTemplate {
                        queue: vec![msg],
                        count: 0,
                    },
                );
                tracing::debug!(template = %guid, "First remote reference, pulling metadata");
                RemoteResolve::Pending { send_clone: true }
            }
        }
    }

    /// Clone completed and the metadata is registered: close the queue.
    ///
    /// Returns every parked message for re-injection through a fresh
    /// process-request task. Callers must register the metadata *before*
    /// calling this, so blocked local resolvers observe it.
    pub fn complete(&self, guid: Guid) -> Vec<PolicyMsg> {
        let mut proxies = self.proxies.lock();
        match proxies.remove(&guid) {
            Some(mut proxy) => {
                let queued = std::mem::take(&mut proxy.queue);
                if proxy.count > 0 {
                    // Blocked locals still spinning; keep the entry (empty
                    // queue) until the last one checks out.
                    proxies.insert(guid, proxy);
                }
                tracing::debug!(
                    template = %guid,
                    requeued = queued.len(),
                    "Metadata clone complete, draining proxy queue"
                );
                queued
            }
            None => Vec::new(),
        }
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.proxies.lock().contains_key(&guid)
    }
}
