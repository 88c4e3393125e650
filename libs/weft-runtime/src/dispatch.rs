//! Local dispatcher: the per-kind handlers behind the router.
//!
//! Every handler runs with the message's destination already resolved to
//! this domain. Handlers mutate the output fields of the message body and
//! report a status; the router owns the request/response flip and any
//! response shipping. Unknown or malformed subjects are rejected at entry —
//! nothing here retries.

use std::sync::Arc;

use crate::domain::PolicyDomain;
use crate::event::{EventRecord, Waiter};
use crate::registry::Binding;
use crate::task::{TaskRecord, TemplateRecord};
use weft_proto::{MsgBody, MsgKind, PolicyMsg, TaskProps, TemplateMeta};
use weft_types::{
    DbAccessMode, DbFlags, EventKind, Guid, GuidKind, Hint, StatusCode, EDT_PARAM_DEF,
    LATCH_INCR_SLOT,
};

pub(crate) async fn dispatch(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    match msg.kind() {
        MsgKind::DbCreate => db_create(domain, msg),
        MsgKind::DbDestroy => db_destroy(domain, msg),
        MsgKind::DbFree => db_destroy(domain, msg),
        MsgKind::DbAcquire => db_acquire(domain, msg),
        MsgKind::DbRelease => db_release(domain, msg),
        MsgKind::EvtCreate => evt_create(domain, msg),
        MsgKind::EvtDestroy => evt_destroy(domain, msg),
        MsgKind::EvtSatisfy | MsgKind::DepSatisfy => {
            dep_satisfy(domain, msg).await
        }
        MsgKind::EvtGet => evt_get(domain, msg),
        MsgKind::DepAdd => dep_add(domain, msg).await,
        MsgKind::DepRegSignaler => dep_reg_signaler(domain, msg),
        MsgKind::DepRegWaiter => dep_reg_waiter(domain, msg).await,
        MsgKind::WorkCreate => work_create(domain, msg).await,
        MsgKind::WorkDestroy => work_destroy(domain, msg),
        MsgKind::EdtTempCreate => template_create(domain, msg),
        MsgKind::EdtTempDestroy => template_destroy(domain, msg),
        MsgKind::GuidInfo => guid_info(msg),
        MsgKind::MetadataClone => metadata_clone(domain, msg),
        MsgKind::GuidReserve => guid_reserve(domain, msg),
        MsgKind::GuidUnreserve => guid_unreserve(domain, msg),
        MsgKind::HintSet => hint_set(domain, msg),
        MsgKind::HintGet => hint_get(domain, msg),
        MsgKind::SchedGetWork => sched_get_work(domain, msg),
        MsgKind::SchedNotify => sched_notify(domain, msg),
        MsgKind::SchedTransact | MsgKind::SchedAnalyze => StatusCode::Ok,
        MsgKind::MgtRlNotify => mgt_rl_notify(domain, msg).await,
        MsgKind::MonitorProgress => {
            tokio::task::yield_now().await;
            StatusCode::Ok
        }
    }
}

fn db_create(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let src = msg.src;
    let MsgBody::DbCreate {
        guid,
        edt,
        size,
        flags,
        props: _,
        mode,
        hint,
    } = &mut msg.body
    else {
        return StatusCode::InvalidArg;
    };
    if *size == 0 {
        return StatusCode::InvalidArg;
    }
    if *size > domain.cfg.max_db_bytes {
        tracing::warn!(size, cap = domain.cfg.max_db_bytes, "Datablock allocation refused");
        return StatusCode::NoMemory;
    }
    let block_guid = if guid.is_null() {
        domain.registry.mint(GuidKind::Datablock)
    } else {
        *guid
    };
    let db = Arc::new(crate::db::DataBlock::new(
        block_guid,
        *size,
        *flags,
        hint.clone(),
        src,
    ));
    if let Err(status) = domain.registry.register(block_guid, Binding::Db(db.clone())) {
        return status;
    }
    if flags.contains(DbFlags::ACQUIRE_ON_CREATE) {
        if let Err(status) = db.try_acquire(*edt, *mode) {
            return status;
        }
    }
    *guid = block_guid;
    tracing::debug!(db = %block_guid, size, "Created datablock");
    StatusCode::Ok
}

fn db_destroy(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let guid = match msg.body {
        MsgBody::DbDestroy { guid } | MsgBody::DbFree { guid, .. } => guid,
        _ => return StatusCode::InvalidArg,
    };
    let Some(db) = domain.registry.lookup_db(guid) else {
        return StatusCode::InvalidArg;
    };
    db.destroy();
    domain.registry.unregister(guid);
    tracing::debug!(db = %guid, "Destroyed datablock");
    StatusCode::Ok
}

fn db_acquire(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::DbAcquire {
        guid, edt, mode, ..
    } = msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let Some(db) = domain.registry.lookup_db(guid) else {
        // Destroyed or never-created block: the home answers, never a proxy.
        return StatusCode::InvalidArg;
    };
    match db.try_acquire(edt, mode) {
        Ok(_) => {
            let fetch = matches!(
                &msg.body,
                MsgBody::DbAcquire { flags, .. } if flags.contains(DbFlags::FETCH)
            );
            if let MsgBody::DbAcquire { size, .. } = &mut msg.body {
                *size = db.size;
            }
            if fetch {
                msg.payload = db.payload_bytes();
            }
            StatusCode::Ok
        }
        Err(StatusCode::Busy) => {
            db.park(msg.clone());
            tracing::debug!(db = %guid, "Acquire parked behind exclusive writer");
            StatusCode::Pending
        }
        Err(status) => status,
    }
}

fn db_release(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::DbRelease {
        guid, edt, flags, ..
    } = msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let Some(db) = domain.registry.lookup_db(guid) else {
        return StatusCode::InvalidArg;
    };
    if flags.contains(DbFlags::WRITE_BACK) && !msg.payload.is_empty() {
        db.write_back(&msg.payload);
        tracing::debug!(db = %guid, bytes = msg.payload.len(), "Write-back applied");
    }
    match db.release(edt) {
        Ok(Some(parked)) => {
            // Replay one parked exclusive-write contender.
            let domain = domain.clone();
            tokio::spawn(async move {
                if let Err(err) = domain.process_message(parked, false).await {
                    tracing::error!(error = %err, "Parked acquire replay failed");
                }
            });
            StatusCode::Ok
        }
        Ok(None) => StatusCode::Ok,
        Err(status) => status,
    }
}

fn evt_create(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::EvtCreate {
        guid,
        kind,
        props: _,
        latch_init,
        channel,
    } = &mut msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let event_guid = if guid.is_null() {
        domain.registry.mint(kind.guid_kind())
    } else {
        *guid
    };
    let record = Arc::new(EventRecord::new(event_guid, *kind, *latch_init, *channel));
    if let Err(status) = domain.registry.register(event_guid, Binding::Event(record)) {
        return status;
    }
    *guid = event_guid;
    tracing::debug!(event = %event_guid, ?kind, "Created event");
    StatusCode::Ok
}

fn evt_destroy(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::EvtDestroy { guid } = msg.body else {
        return StatusCode::InvalidArg;
    };
    let Some(event) = domain.registry.lookup_event(guid) else {
        return StatusCode::InvalidArg;
    };
    event.destroy();
    domain.registry.unregister(guid);
    StatusCode::Ok
}

fn evt_get(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::EvtGet {
        guid,
        payload,
        satisfied,
    } = &mut msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let Some(event) = domain.registry.lookup_event(*guid) else {
        return StatusCode::InvalidArg;
    };
    let snapshot = event.snapshot();
    *payload = snapshot.payload;
    *satisfied = snapshot.fired;
    StatusCode::Ok
}

async fn dep_satisfy(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let (guid, payload, slot) = match msg.body {
        MsgBody::DepSatisfy {
            guid,
            payload,
            slot,
        }
        | MsgBody::EvtSatisfy {
            guid,
            payload,
            slot,
        } => (guid, payload, slot),
        _ => return StatusCode::InvalidArg,
    };
    match domain.registry.lookup(guid) {
        Some(Binding::Event(event)) => match event.satisfy(slot, payload) {
            Ok(deliveries) => {
                if event.kind == EventKind::Once && event.is_dead() {
                    domain.registry.unregister(guid);
                }
                domain.deliver_all(deliveries).await;
                StatusCode::Ok
            }
            Err(status) => status,
        },
        Some(Binding::Task(task)) => match task.satisfy_slot(slot, payload) {
            Ok(ready) => {
                if ready {
                    domain.scheduler.give_work(&[task.guid]);
                }
                StatusCode::Ok
            }
            Err(status) => status,
        },
        _ => StatusCode::InvalidArg,
    }
}

/// The dependence-add decision table.
///
/// Runs at the destination object's home; signaler registration is local,
/// waiter registration chases the source event's home.
async fn dep_add(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::DepAdd {
        source,
        dest,
        slot,
        mode,
    } = msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let dest_kind = match dest.kind() {
        Ok(kind) => kind,
        Err(_) => return StatusCode::InvalidArg,
    };

    // A null source degenerates to an immediate satisfaction.
    if source.is_null() {
        return satisfy_local(domain, dest, Guid::NULL, slot).await;
    }
    let src_kind = match source.kind() {
        Ok(kind) => kind,
        Err(_) => return StatusCode::InvalidArg,
    };

    match (src_kind, dest_kind) {
        (GuidKind::Datablock, kind) if kind.is_event() => {
            satisfy_local(domain, dest, source, slot).await
        }
        (GuidKind::Datablock, GuidKind::Task) => {
            let Some(task) = domain.registry.lookup_task(dest) else {
                return StatusCode::InvalidArg;
            };
            // The signaler list is authoritative so the mode is recorded.
            if let Err(status) = task.set_slot_mode(slot, mode) {
                return status;
            }
            match task.satisfy_slot(slot, source) {
                Ok(ready) => {
                    if ready {
                        domain.scheduler.give_work(&[task.guid]);
                    }
                    StatusCode::Ok
                }
                Err(status) => status,
            }
        }
        (src, GuidKind::Task) if src.is_persistent_event() => {
            let Some(task) = domain.registry.lookup_task(dest) else {
                return StatusCode::InvalidArg;
            };
            // Persistent source: signaler only. The event keeps its payload,
            // so the slot stops gating the frontier and the task pulls the
            // value when it runs.
            match task.set_pull_signaler(slot, source, mode) {
                Ok(ready) => {
                    if ready {
                        domain.scheduler.give_work(&[task.guid]);
                    }
                    StatusCode::Ok
                }
                Err(status) => status,
            }
        }
        (src, GuidKind::Task) if src.is_event() => {
            let Some(task) = domain.registry.lookup_task(dest) else {
                return StatusCode::InvalidArg;
            };
            // Signaler first, waiter second: the reverse order races with
            // once-event destruction.
            if let Err(status) = task.set_slot_mode(slot, mode) {
                return status;
            }
            register_waiter(domain, source, dest, slot).await
        }
        (src, dst) if src.is_event() && dst.is_event() => {
            register_waiter(domain, source, dest, slot).await
        }
        _ => {
            tracing::warn!(?src_kind, ?dest_kind, "Unsupported dependence pair");
            StatusCode::InvalidArg
        }
    }
}

/// Satisfy a destination known to live on this domain.
async fn satisfy_local(
    domain: &Arc<PolicyDomain>,
    dest: Guid,
    payload: Guid,
    slot: u32,
) -> StatusCode {
    let satisfy = domain.request_oneway(MsgBody::DepSatisfy {
        guid: dest,
        payload,
        slot,
    });
    match domain.process_message(satisfy, true).await {
        Ok(response) => response.status,
        Err(err) => {
            tracing::error!(error = %err, %dest, "Local satisfaction failed");
            StatusCode::NotFound
        }
    }
}

/// Register `waiter`'s `slot` on the (possibly remote) `event`.
async fn register_waiter(
    domain: &Arc<PolicyDomain>,
    event: Guid,
    waiter: Guid,
    slot: u32,
) -> StatusCode {
    let reg = domain.request(MsgBody::DepRegWaiter {
        waiter,
        dest: event,
        slot,
    });
    match domain.process_message(reg, true).await {
        Ok(response) => response.status,
        Err(err) => {
            tracing::error!(error = %err, %event, "Waiter registration failed");
            StatusCode::NotFound
        }
    }
}

fn dep_reg_signaler(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::DepRegSignaler {
        signaler,
        dest,
        slot,
        mode,
    } = msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let persistent = signaler
        .kind()
        .is_ok_and(|k| k.is_persistent_event());
    match domain.registry.lookup(dest) {
        Some(Binding::Task(task)) if persistent => {
            match task.set_pull_signaler(slot, signaler, mode) {
                Ok(ready) => {
                    if ready {
                        domain.scheduler.give_work(&[task.guid]);
                    }
                    StatusCode::Ok
                }
                Err(status) => status,
            }
        }
        Some(Binding::Task(task)) => match task.set_slot_mode(slot, mode) {
            Ok(()) => StatusCode::Ok,
            Err(status) => status,
        },
        Some(Binding::Event(_)) => StatusCode::Ok,
        _ => StatusCode::InvalidArg,
    }
}

async fn dep_reg_waiter(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::DepRegWaiter { waiter, dest, slot } = msg.body else {
        return StatusCode::InvalidArg;
    };
    let Some(event) = domain.registry.lookup_event(dest) else {
        return StatusCode::InvalidArg;
    };
    match event.add_waiter(Waiter { guid: waiter, slot }) {
        Ok(deliveries) => {
            domain.deliver_all(deliveries).await;
            StatusCode::Ok
        }
        Err(status) => status,
    }
}

async fn work_create(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::WorkCreate {
        guid,
        template,
        paramc,
        depc,
        paramv,
        depv,
        props,
        output_event,
        parent_latch,
        ..
    } = &mut msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let Some(tpl) = domain.registry.lookup_template(*template) else {
        return StatusCode::InvalidArg;
    };
    // Resolve the template-default sentinels exactly once, before the
    // dependence frontier is attached.
    if *paramc == EDT_PARAM_DEF {
        *paramc = tpl.meta.paramc;
    }
    if *depc == EDT_PARAM_DEF {
        *depc = tpl.meta.depc;
    }
    if (*paramc == 0) != paramv.is_empty() || paramv.len() != *paramc as usize {
        return StatusCode::InvalidArg;
    }
    if depv.len() > *depc as usize {
        return StatusCode::InvalidArg;
    }

    let task_guid = domain.registry.mint(GuidKind::Task);
    let out_event = if props.contains(TaskProps::OUTPUT_EVENT) {
        let eg = domain.registry.mint(GuidKind::EventOnce);
        let record = Arc::new(EventRecord::new(eg, EventKind::Once, 0, None));
        if let Err(status) = domain.registry.register(eg, Binding::Event(record)) {
            return status;
        }
        eg
    } else {
        Guid::NULL
    };
    let finish_latch = if props.contains(TaskProps::FINISH) {
        let lg = domain.registry.mint(GuidKind::EventLatch);
        let record = Arc::new(EventRecord::new(lg, EventKind::Latch, 0, None));
        if !out_event.is_null() {
            let _ = record.add_waiter(Waiter {
                guid: out_event,
                slot: 0,
            });
        }
        if !parent_latch.is_null() {
            // The finish scope checks out of the parent when it fires.
            let _ = record.add_waiter(Waiter {
                guid: *parent_latch,
                slot: weft_types::LATCH_DECR_SLOT,
            });
        }
        if let Err(status) = domain.registry.register(lg, Binding::Event(record)) {
            return status;
        }
        lg
    } else {
        Guid::NULL
    };

    let task = Arc::new(TaskRecord::new(
        task_guid,
        tpl.meta.func_id,
        paramv.clone(),
        *depc,
        *props,
        out_event,
        *parent_latch,
        finish_latch,
    ));
    if let Err(status) = domain.registry.register(task_guid, Binding::Task(task)) {
        return status;
    }
    *guid = task_guid;
    *output_event = out_event;
    let deps: Vec<Guid> = depv.clone();
    let depc = *depc;
    tracing::debug!(task = %task_guid, %template, depc, "Created task");

    // A finish task checks into its own scope latch; the parent latch was
    // already incremented by the creation origin.
    if !finish_latch.is_null() {
        let status = satisfy_local(domain, finish_latch, Guid::NULL, LATCH_INCR_SLOT).await;
        if !status.is_ok() {
            return status;
        }
    }

    // Attach the provided dependences; untouched slots wait for DEP_ADD.
    for (slot, dep) in deps.iter().enumerate() {
        if dep.is_uninitialized() {
            continue;
        }
        let add = domain.request(MsgBody::DepAdd {
            source: *dep,
            dest: task_guid,
            slot: slot as u32,
            mode: DbAccessMode::ReadWrite,
        });
        match domain.process_message(add, true).await {
            Ok(response) if response.status.is_ok() => {}
            Ok(response) => return response.status,
            Err(err) => {
                tracing::error!(error = %err, "Dependence attach failed");
                return StatusCode::NotFound;
            }
        }
    }
    if depc == 0 {
        domain.scheduler.give_work(&[task_guid]);
    }
    StatusCode::Ok
}

fn work_destroy(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::WorkDestroy { guid } = msg.body else {
        return StatusCode::InvalidArg;
    };
    match domain.registry.unregister(guid) {
        Some(Binding::Task(_)) => StatusCode::Ok,
        Some(_) | None => StatusCode::InvalidArg,
    }
}

fn template_create(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::EdtTempCreate {
        guid,
        func_id,
        paramc,
        depc,
        name,
    } = &mut msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let tpl_guid = if guid.is_null() {
        domain.registry.mint(GuidKind::TaskTemplate)
    } else {
        *guid
    };
    let record = Arc::new(TemplateRecord::new(
        tpl_guid,
        TemplateMeta {
            func_id: *func_id,
            paramc: *paramc,
            depc: *depc,
            name: name.clone(),
            hint: Hint::new(),
        },
    ));
    if let Err(status) = domain.registry.register(tpl_guid, Binding::Template(record)) {
        return status;
    }
    *guid = tpl_guid;
    tracing::debug!(template = %tpl_guid, func_id, name = %name, "Created template");
    StatusCode::Ok
}

fn template_destroy(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::EdtTempDestroy { guid } = msg.body else {
        return StatusCode::InvalidArg;
    };
    match domain.registry.unregister(guid) {
        Some(Binding::Template(_)) => StatusCode::Ok,
        Some(_) | None => StatusCode::InvalidArg,
    }
}

fn guid_info(msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::GuidInfo {
        guid,
        kind,
        location,
    } = &mut msg.body
    else {
        return StatusCode::InvalidArg;
    };
    match guid.kind() {
        Ok(decoded) => {
            *kind = Some(decoded);
            *location = guid.location();
            StatusCode::Ok
        }
        Err(_) => StatusCode::InvalidArg,
    }
}

/// Serve a clone request at the subject's home.
fn metadata_clone(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::MetadataClone { guid, kind } = &mut msg.body else {
        return StatusCode::InvalidArg;
    };
    match guid.kind() {
        Ok(GuidKind::TaskTemplate) => {
            let Some(tpl) = domain.registry.lookup_template(*guid) else {
                return StatusCode::InvalidArg;
            };
            match postcard::to_stdvec(&tpl.meta) {
                Ok(bytes) => {
                    *kind = Some(GuidKind::TaskTemplate);
                    msg.payload = bytes.into();
                    StatusCode::Ok
                }
                Err(err) => {
                    tracing::error!(error = %err, "Template metadata encode failed");
                    StatusCode::InvalidArg
                }
            }
        }
        Ok(GuidKind::Affinity) => {
            *kind = Some(GuidKind::Affinity);
            StatusCode::Ok
        }
        Ok(other) => {
            tracing::warn!(?other, "Metadata clone for unsupported kind");
            StatusCode::NotSupported
        }
        Err(_) => StatusCode::InvalidArg,
    }
}

fn guid_reserve(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::GuidReserve {
        kind,
        count,
        start,
        stride,
    } = &mut msg.body
    else {
        return StatusCode::InvalidArg;
    };
    let range = domain.registry.reserve(*kind, *count);
    *start = range.start;
    *stride = range.stride;
    StatusCode::Ok
}

fn guid_unreserve(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::GuidUnreserve { start, count } = msg.body else {
        return StatusCode::InvalidArg;
    };
    domain.registry.unreserve(start, count);
    StatusCode::Ok
}

fn hint_set(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::HintSet { guid, hint } = &msg.body else {
        return StatusCode::InvalidArg;
    };
    match domain.registry.lookup(*guid) {
        Some(Binding::Db(db)) => {
            db.set_hint(hint.clone());
            StatusCode::Ok
        }
        Some(Binding::Event(event)) => {
            event.set_hint(hint.clone());
            StatusCode::Ok
        }
        Some(Binding::Template(tpl)) => {
            tpl.set_hint(hint.clone());
            StatusCode::Ok
        }
        Some(_) => StatusCode::NotSupported,
        None => StatusCode::InvalidArg,
    }
}

fn hint_get(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::HintGet { guid, hint } = &mut msg.body else {
        return StatusCode::InvalidArg;
    };
    match domain.registry.lookup(*guid) {
        Some(Binding::Db(db)) => {
            *hint = db.hint();
            StatusCode::Ok
        }
        Some(Binding::Event(event)) => {
            *hint = event.hint();
            StatusCode::Ok
        }
        Some(Binding::Template(tpl)) => {
            *hint = tpl.hint();
            StatusCode::Ok
        }
        Some(_) => StatusCode::NotSupported,
        None => StatusCode::InvalidArg,
    }
}

fn sched_get_work(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::SchedGetWork { count, tasks } = &mut msg.body else {
        return StatusCode::InvalidArg;
    };
    *tasks = domain.scheduler.take_work(*count as usize);
    *count = tasks.len() as u32;
    StatusCode::Ok
}

fn sched_notify(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::SchedNotify { kind, subject } = msg.body else {
        return StatusCode::InvalidArg;
    };
    domain.scheduler.notify(kind, subject);
    StatusCode::Ok
}

async fn mgt_rl_notify(domain: &Arc<PolicyDomain>, msg: &mut PolicyMsg) -> StatusCode {
    let MsgBody::MgtRlNotify { exit_code, .. } = msg.body else {
        return StatusCode::InvalidArg;
    };
    domain.on_rl_notify(exit_code).await;
    StatusCode::Ok
}
