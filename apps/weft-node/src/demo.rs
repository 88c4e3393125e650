//! Demo DAG: a counter pipeline hopping round-robin across the domains.
//!
//! Each stage acquires the shared counter block, increments it and gates the
//! next stage through its output event; the final stage verifies the count
//! and drives the distributed shutdown with the verdict as exit code.

use std::sync::Arc;

use futures::FutureExt;

use weft_runtime::{EdtSpec, PolicyDomain, TaskContext};
use weft_types::{DbAccessMode, EventKind, Guid, Hint, HintKey};

/// Function id of the pipeline stage body; identical on every domain.
pub const STAGE_FUNC: u64 = 0x5701;

pub fn register_funcs(domain: &Arc<PolicyDomain>) {
    domain.register_func(STAGE_FUNC, Arc::new(|ctx: TaskContext| stage(ctx).boxed()));
}

async fn stage(ctx: TaskContext) -> Option<Guid> {
    let &[round, total] = ctx.paramv.as_slice() else {
        tracing::error!(task = %ctx.task, "Stage launched with malformed params");
        return None;
    };
    let Some(counter) = ctx.deps.first().and_then(|d| d.data.as_ref()) else {
        tracing::error!(task = %ctx.task, "Stage launched without its counter block");
        ctx.domain.initiate_shutdown(3).await;
        return None;
    };
    let value = counter.read_u64(0) + 1;
    counter.write_u64(0, value);
    tracing::info!(pd = %ctx.domain.location(), round, value, "Pipeline stage ran");

    if round == total {
        let code = if value == total { 0 } else { 2 };
        ctx.domain.initiate_shutdown(code).await;
    }
    None
}

/// Build and kick off the pipeline from domain 0.
pub async fn launch(domains: &[Arc<PolicyDomain>], rounds: u64) -> anyhow::Result<()> {
    let pd0 = &domains[0];
    let (counter, handle) = pd0
        .db_create(Guid::NULL, 8, DbAccessMode::ReadWrite, Hint::new())
        .await?;
    handle.write_u64(0, 0);
    pd0.db_release(counter, Guid::NULL).await?;

    let template = pd0.template_create(STAGE_FUNC, 2, 2, "pipeline_stage").await?;
    let kickoff = pd0.event_create(EventKind::Once).await?;

    let mut gate = kickoff;
    for round in 1..=rounds {
        let mut spec = EdtSpec::new(template);
        spec.paramv = vec![round, rounds];
        spec.depv = vec![counter, gate];
        spec.output_event = true;
        let target = (round % domains.len() as u64) as u32;
        if let Some(affinity) = pd0.affinity_of(target) {
            spec.hint.set_affinity(HintKey::EdtAffinity, affinity);
        }
        let (_task, output) = pd0.edt_create(spec).await?;
        gate = output;
    }

    tracing::info!(rounds, "Pipeline armed, releasing the kickoff event");
    pd0.event_satisfy(kickoff, Guid::NULL, 0).await?;
    Ok(())
}
