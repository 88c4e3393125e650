//! Message router: the per-message pipeline of the request engine.
//!
//! Order per message: scheduler pre-process hook, placement, per-kind
//! special casing (proxy interception, template resolution, finish-latch
//! plumbing, blocking promotion), then remote send or local dispatch, then
//! response shipping and the post-process hook. Requests and their responses
//! share a message id; per-(src, dst) ordering is the transport's.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::dispatch::dispatch;
use crate::domain::PolicyDomain;
use crate::error::{EngineError, EngineResult};
use crate::proxy_db::{AcquireAction, ReleaseAction};
use crate::proxy_template::{LocalResolve, RemoteResolve};
use crate::registry::Binding;
use crate::task::TemplateRecord;
use weft_proto::codec::{self, MarshalMode};
use weft_proto::{MsgBody, MsgFlags, MsgKind, PolicyMsg, TemplateMeta};
use weft_types::{Guid, GuidKind, StatusCode, EDT_PARAM_DEF, LATCH_INCR_SLOT};

impl PolicyDomain {
    /// Process one message, local or remote, request or response.
    ///
    /// With `blocking` set, a two-way request only returns once its response
    /// is in the returned message. Without it, remote two-ways return with
    /// `EPEND` and complete through their proxy/queue machinery.
    pub fn process_message(
        self: &Arc<Self>,
        msg: PolicyMsg,
        blocking: bool,
    ) -> BoxFuture<'static, EngineResult<PolicyMsg>> {
        let domain = self.clone();
        async move { domain.route(msg, blocking).await }.boxed()
    }

    async fn route(self: Arc<Self>, mut msg: PolicyMsg, blocking: bool) -> EngineResult<PolicyMsg> {
        let this = self.location();
        let mut blocking = blocking;

        if !msg.flags.contains(MsgFlags::IGNORE_PRE_PROCESS) {
            self.scheduler.notify_pre_process(&msg);
            msg.flags.insert(MsgFlags::IGNORE_PRE_PROCESS);
        }

        self.placer.place(&mut msg);

        tracing::trace!(
            kind = ?msg.kind(),
            src = %msg.src,
            dst = %msg.dst,
            id = msg.id.0,
            "Routing message"
        );

        match msg.kind() {
            MsgKind::WorkCreate if msg.is_request() => {
                if let Some(done) = self.pre_work_create(&mut msg, &mut blocking).await? {
                    return Ok(done);
                }
            }
            MsgKind::DepSatisfy | MsgKind::EvtSatisfy
                if msg.is_request() && msg.dst != this =>
            {
                // Channel satisfies become blocking to preserve submission
                // order across the boundary.
                let target = match &msg.body {
                    MsgBody::DepSatisfy { guid, .. } | MsgBody::EvtSatisfy { guid, .. } => *guid,
                    _ => Guid::NULL,
                };
                if target.kind() == Ok(GuidKind::EventChannel) {
                    msg.flags.insert(MsgFlags::REQ_RESPONSE);
                    blocking = true;
                }
            }
            MsgKind::DbAcquire => {
                if msg.is_request() && msg.src == this && msg.dst != this {
                    return self.proxy_acquire(msg).await;
                }
                if msg.is_response() && msg.src != this && msg.dst == this {
                    return self.proxy_acquire_response(msg).await;
                }
            }
            MsgKind::DbRelease if msg.is_request() && msg.src == this && msg.dst != this => {
                match self.proxy_dbs.release(&mut msg) {
                    Ok(ReleaseAction::LocalResponse) => return Ok(msg),
                    Ok(ReleaseAction::SendRelease) => {
                        // Fall through to the remote send; the response
                        // epilogue runs the relinquish completion.
                    }
                    Err(status) => {
                        msg.respond_local(status);
                        return Ok(msg);
                    }
                }
            }
            MsgKind::MetadataClone if msg.is_response() && msg.dst == this => {
                self.on_clone_response(&mut msg)?;
                return Ok(msg);
            }
            MsgKind::GuidInfo if msg.is_request() => {
                // Unknown guid-map kinds borrow the pull-clone machinery.
                let subject = match &msg.body {
                    MsgBody::GuidInfo { guid, .. } => *guid,
                    _ => Guid::NULL,
                };
                if subject.kind() == Ok(GuidKind::GuidMap)
                    && subject.location() != this
                    && self.registry.lookup(subject).is_none()
                {
                    if let Some(done) = self.resolve_metadata(subject, &mut msg).await? {
                        return Ok(done);
                    }
                } else {
                    msg.dst = this;
                }
            }
            MsgKind::MonitorProgress => {
                msg.dst = this;
            }
            _ => {}
        }

        if msg.dst != this {
            return self.route_remote(msg, blocking).await;
        }

        if msg.is_response() {
            // Every response kind with a completion path was intercepted
            // above or matched against the pending table; anything else has
            // nobody waiting for it.
            tracing::debug!(kind = ?msg.kind(), id = msg.id.0, "Dropping unmatched response");
            return Ok(msg);
        }

        // Local dispatch.
        let origin = msg.src;
        let wants_reply = msg.expects_response();
        let status = dispatch(&self, &mut msg).await;
        if status == StatusCode::Pending {
            // The operation parked itself; its completion path answers.
            msg.status = StatusCode::Pending;
            return Ok(msg);
        }
        self.finish_local(&mut msg, origin, status);
        if origin != this {
            if wants_reply {
                let mut response = msg.clone();
                response.flags.insert(MsgFlags::PERSIST);
                if matches!(response.kind(), MsgKind::DbAcquire | MsgKind::MetadataClone) {
                    response.flags.insert(MsgFlags::ASYNC);
                }
                self.send_frame(&response).await?;
            }
        } else if msg.kind() == MsgKind::DbAcquire && msg.is_response() {
            self.complete_acquire(msg.clone()).await;
        }

        if msg.flags.contains(MsgFlags::REQ_POST_PROCESS) {
            self.scheduler.notify_post_process(&msg);
            msg.flags.remove(MsgFlags::REQ_POST_PROCESS);
        }
        Ok(msg)
    }

    /// Remote leg: blocking two-way, async two-way, or plain one-way.
    async fn route_remote(
        self: &Arc<Self>,
        mut msg: PolicyMsg,
        blocking: bool,
    ) -> EngineResult<PolicyMsg> {
        if msg.is_response() {
            msg.flags.insert(MsgFlags::PERSIST);
            self.send_frame(&msg).await?;
            return Ok(msg);
        }
        if msg.expects_response() && blocking {
            msg.flags.insert(MsgFlags::PERSIST);
            let response = self.send_and_wait(msg).await?;
            return self.post_remote_response(response).await;
        }
        msg.flags.insert(MsgFlags::PERSIST);
        if msg.expects_response() {
            msg.flags.insert(MsgFlags::ASYNC);
        }
        self.send_frame(&msg).await?;
        if msg.expects_response() {
            msg.status = StatusCode::Pending;
        }
        Ok(msg)
    }

    /// Fix-ups after a blocking two-way came back with its response.
    async fn post_remote_response(
        self: &Arc<Self>,
        response: PolicyMsg,
    ) -> EngineResult<PolicyMsg> {
        match (&response.body, response.status) {
            (
                MsgBody::DbCreate {
                    guid, size, mode, flags, ..
                },
                StatusCode::Ok,
            ) => {
                // A remote create acquired at the destination on our behalf;
                // mirror it as a proxy already in Run.
                self.proxy_dbs.adopt_created(*guid, *size, *mode, *flags);
            }
            (MsgBody::DbRelease { guid, .. }, StatusCode::Ok) => {
                if self.proxy_dbs.contains(*guid) {
                    match self.proxy_dbs.on_release_response(*guid) {
                        Ok(Some(repop)) => {
                            let domain = self.clone();
                            tokio::spawn(async move {
                                if let Err(err) = domain.process_message(repop, false).await {
                                    tracing::error!(error = %err, "Repopped acquire failed");
                                }
                            });
                        }
                        Ok(None) => {}
                        Err(status) => return Err(EngineError::Status(status)),
                    }
                }
            }
            _ => {}
        }
        Ok(response)
    }

    /// Outbound acquire intercepted by the proxy cache.
    async fn proxy_acquire(self: &Arc<Self>, mut msg: PolicyMsg) -> EngineResult<PolicyMsg> {
        match self.proxy_dbs.acquire(&mut msg) {
            AcquireAction::Served => {
                self.complete_acquire(msg.clone()).await;
                Ok(msg)
            }
            AcquireAction::SendFetch => {
                msg.flags.insert(MsgFlags::ASYNC | MsgFlags::PERSIST);
                self.send_frame(&msg).await?;
                msg.status = StatusCode::Pending;
                Ok(msg)
            }
            AcquireAction::Enqueued => {
                msg.status = StatusCode::Pending;
                Ok(msg)
            }
        }
    }

    /// Incoming fetch response: fill the cache and serve the queue.
    async fn proxy_acquire_response(
        self: &Arc<Self>,
        mut msg: PolicyMsg,
    ) -> EngineResult<PolicyMsg> {
        if !msg.status.is_ok() {
            // The home refused (typically a destroyed block). Fail the
            // initiator and every queued acquire with the home's verdict.
            tracing::warn!(status = %msg.status, "Acquire fetch refused by home");
            let subject = match &msg.body {
                MsgBody::DbAcquire { guid, .. } => *guid,
                _ => Guid::NULL,
            };
            for mut queued in self.proxy_dbs.abort_fetch(subject) {
                queued.respond_local(msg.status);
                self.complete_acquire(queued).await;
            }
            self.complete_acquire(msg.clone()).await;
            return Ok(msg);
        }
        let served = self
            .proxy_dbs
            .on_acquire_response(&mut msg)
            .map_err(EngineError::Status)?;
        for granted in served {
            self.complete_acquire(granted).await;
        }
        self.complete_acquire(msg.clone()).await;
        Ok(msg)
    }

    /// WORK_CREATE pre-processing: template resolution, parameter-count
    /// fix-up, cross-domain finish-latch plumbing, blocking promotion.
    async fn pre_work_create(
        self: &Arc<Self>,
        msg: &mut PolicyMsg,
        blocking: &mut bool,
    ) -> EngineResult<Option<PolicyMsg>> {
        let this = self.location();
        let template = match &msg.body {
            MsgBody::WorkCreate { template, .. } => *template,
            _ => return Ok(None),
        };

        if self.registry.lookup_template(template).is_none() {
            if template.location() == this {
                // Home says it does not exist: destroyed or never created.
                return Ok(Some(self.reject(msg, StatusCode::InvalidArg).await?));
            }
            if let Some(done) = self.resolve_metadata(template, msg).await? {
                return Ok(Some(done));
            }
        }

        let Some(tpl) = self.registry.lookup_template(template) else {
            return Err(EngineError::Protocol {
                detail: "template vanished after resolution",
                guid: template,
            });
        };

        // Resolve paramc/depc defaults before the message can be marshalled.
        let mut counts_valid = true;
        if let MsgBody::WorkCreate {
            paramc,
            depc,
            paramv,
            ..
        } = &mut msg.body
        {
            if *paramc == EDT_PARAM_DEF {
                *paramc = tpl.meta.paramc;
            }
            if *depc == EDT_PARAM_DEF {
                *depc = tpl.meta.depc;
            }
            counts_valid = paramv.len() == *paramc as usize;
        }
        if !counts_valid {
            return Ok(Some(self.reject(msg, StatusCode::InvalidArg).await?));
        }

        let (parent_latch, depv) = match &msg.body {
            MsgBody::WorkCreate {
                parent_latch, depv, ..
            } => (*parent_latch, depv.clone()),
            _ => (Guid::NULL, Vec::new()),
        };

        if msg.src == this {
            // Asynchronous remote creation with non-persistent dependences
            // must be made synchronous so the events cannot die under us.
            if msg.dst != this && !msg.expects_response() {
                let risky = depv.iter().any(|dep| {
                    matches!(
                        dep.kind(),
                        Ok(GuidKind::EventOnce) | Ok(GuidKind::EventLatch)
                    )
                });
                if risky {
                    msg.flags.insert(MsgFlags::REQ_RESPONSE);
                    *blocking = true;
                }
            }
            // The creation origin checks the task into its parent latch,
            // strictly before any remote request leaves; the matching
            // decrement comes from the task's completion (possibly through
            // a proxy latch chain).
            if !parent_latch.is_null() {
                let incr = self.request(MsgBody::DepSatisfy {
                    guid: parent_latch,
                    payload: Guid::NULL,
                    slot: LATCH_INCR_SLOT,
                });
                self.process_message(incr, true).await?;
            }
        }

        if msg.src != this
            && msg.dst == this
            && !parent_latch.is_null()
            && parent_latch.location() != this
        {
            // Remote creation inside a finish scope: a proxy latch absorbs
            // this task's check-in/out and reports back to the real parent.
            let create = self.request(MsgBody::EvtCreate {
                guid: Guid::NULL,
                kind: weft_types::EventKind::Latch,
                props: weft_types::GuidProps::empty(),
                latch_init: 0,
                channel: None,
            });
            let created = self.process_message(create, true).await?;
            let proxy_latch = match created.body {
                MsgBody::EvtCreate { guid, .. } if created.status.is_ok() => guid,
                _ => {
                    return Err(EngineError::Protocol {
                        detail: "proxy latch creation failed",
                        guid: parent_latch,
                    })
                }
            };
            // The proxy absorbs this task's occupancy of the remote scope:
            // one check-in now, one check-out at completion, and its firing
            // checks out of the real parent.
            let checkin = self.request(MsgBody::DepSatisfy {
                guid: proxy_latch,
                payload: Guid::NULL,
                slot: LATCH_INCR_SLOT,
            });
            self.process_message(checkin, true).await?;
            let wire = self.request(MsgBody::DepAdd {
                source: proxy_latch,
                dest: parent_latch,
                slot: weft_types::LATCH_DECR_SLOT,
                mode: weft_types::DbAccessMode::Const,
            });
            self.process_message(wire, true).await?;
            if let MsgBody::WorkCreate { parent_latch, .. } = &mut msg.body {
                *parent_latch = proxy_latch;
            }
            tracing::debug!(%proxy_latch, parent = %parent_latch, "Proxy latch installed");
        }
        Ok(None)
    }

    /// Shared pull-clone entry for templates and guid-maps.
    ///
    /// Returns `Some(done)` when the caller's message is finished for now
    /// (parked with `EPEND`); `None` once the metadata is locally known.
    async fn resolve_metadata(
        self: &Arc<Self>,
        subject: Guid,
        msg: &mut PolicyMsg,
    ) -> EngineResult<Option<PolicyMsg>> {
        let this = self.location();
        if msg.src == this {
            // User code blocks; fetch the metadata synchronously-by-spin.
            let resolve = self
                .proxy_templates
                .resolve_local(subject, || self.registry.lookup(subject).is_some());
            match resolve {
                LocalResolve::Ready => Ok(None),
                LocalResolve::Wait { send_clone } => {
                    if send_clone {
                        self.send_clone_request(subject).await?;
                    }
                    let result = self
                        .spin_until(subject, || self.registry.lookup(subject).is_some())
                        .await;
                    self.proxy_templates.check_out(subject);
                    result?;
                    Ok(None)
                }
            }
        } else {
            let resolve = self.proxy_templates.resolve_remote(subject, msg.clone(), || {
                self.registry.lookup(subject).is_some()
            });
            match resolve {
                RemoteResolve::Ready(_) => Ok(None),
                RemoteResolve::Pending { send_clone } => {
                    if send_clone {
                        self.send_clone_request(subject).await?;
                    }
                    msg.status = StatusCode::Pending;
                    Ok(Some(msg.clone()))
                }
            }
        }
    }

    async fn send_clone_request(self: &Arc<Self>, subject: Guid) -> EngineResult<()> {
        let clone = self.request(MsgBody::MetadataClone {
            guid: subject,
            kind: None,
        });
        // Asynchronous two-way: the response lands through the comm worker.
        let out = self.process_message(clone, false).await?;
        debug_assert_eq!(out.status, StatusCode::Pending);
        Ok(())
    }

    /// Incoming clone response: materialise the metadata, close the proxy
    /// queue and re-inject every parked message.
    fn on_clone_response(self: &Arc<Self>, msg: &mut PolicyMsg) -> EngineResult<()> {
        let MsgBody::MetadataClone { guid, kind } = &msg.body else {
            return Err(EngineError::Protocol {
                detail: "clone response without clone body",
                guid: Guid::NULL,
            });
        };
        let subject = *guid;
        match kind {
            Some(GuidKind::TaskTemplate) => {
                let meta: TemplateMeta =
                    postcard::from_bytes(&msg.payload).map_err(codec::CodecError::Body)?;
                let record = Arc::new(TemplateRecord::new(subject, meta));
                if let Err(status) = self
                    .registry
                    .register(subject, Binding::Template(record))
                {
                    // A concurrent clone already registered it; harmless.
                    tracing::debug!(template = %subject, %status, "Clone raced, keeping first");
                }
            }
            Some(GuidKind::Affinity) => {
                let _ = self.registry.register(subject, Binding::RemoteOnly);
            }
            other => {
                tracing::warn!(?other, "Clone response for unsupported kind");
            }
        }
        for parked in self.proxy_templates.complete(subject) {
            // Each parked message resumes as a fresh process-request task.
            let domain = self.clone();
            tokio::spawn(async move {
                if let Err(err) = domain.process_message(parked, false).await {
                    tracing::error!(error = %err, "Re-injected request failed");
                }
            });
        }
        tracing::debug!(subject = %subject, "Metadata clone response applied");
        Ok(())
    }

    /// Turn a request into an error response, shipping it back when the
    /// requester is remote and asked for one.
    async fn reject(
        self: &Arc<Self>,
        msg: &mut PolicyMsg,
        status: StatusCode,
    ) -> EngineResult<PolicyMsg> {
        let origin = msg.src;
        let wants_reply = msg.expects_response();
        self.finish_local(msg, origin, status);
        if origin != self.location() && wants_reply {
            self.send_response(msg.clone()).await?;
        }
        Ok(msg.clone())
    }

    /// Encode and hand a self-contained frame to the transport.
    pub(crate) async fn send_frame(&self, msg: &PolicyMsg) -> EngineResult<()> {
        // Payload-bearing messages never share pointers across domains.
        let frame = codec::encode(msg, MarshalMode::FullCopy)?;
        debug_assert!(frame.is_self_contained());
        self.transport
            .send(msg.dst, frame.head)
            .await
            .map_err(|_| EngineError::NoRoute {
                src: msg.src.0,
                dest: msg.dst.0,
            })
    }

    /// Ship a locally-produced response back to a remote requester.
    pub(crate) async fn send_response(&self, mut msg: PolicyMsg) -> EngineResult<()> {
        msg.flags.insert(MsgFlags::PERSIST | MsgFlags::ASYNC);
        self.send_frame(&msg).await
    }

    /// Blocking two-way: register the response slot, send, await.
    async fn send_and_wait(self: &Arc<Self>, msg: PolicyMsg) -> EngineResult<PolicyMsg> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pending.insert(msg.id.0, tx);
        let dest = msg.dst;
        if let Err(err) = self.send_frame(&msg).await {
            self.pending.remove(&msg.id.0);
            return Err(err);
        }
        rx.await.map_err(|_| EngineError::ResponseDropped {
            msg_id: msg.id.0,
            dest: dest.0,
        })
    }
}
