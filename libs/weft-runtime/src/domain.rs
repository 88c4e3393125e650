//! The policy domain: one request engine per address space.
//!
//! A `PolicyDomain` owns every core component — registry, proxy tables,
//! placement oracle, scheduler, shutdown barrier — plus the worker and comm
//! loops that drive them. It is always handled through an `Arc`; workers
//! carry the handle explicitly rather than through ambient globals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::comm::CommTransport;
use crate::error::{EngineError, EngineResult};
use crate::event::Delivery;
use crate::placer::PlacementOracle;
use crate::proxy_db::ProxyDbTable;
use crate::proxy_template::ProxyTemplateTable;
use crate::registry::GuidRegistry;
use crate::scheduler::Scheduler;
use crate::shutdown::ShutdownBarrier;
use crate::task::FuncRegistry;
use weft_proto::{MsgBody, MsgId, PolicyMsg};
use weft_types::{Guid, GuidKind, Location, Runlevel, RunlevelProps, StatusCode};

/// Static description of one policy domain in the topology.
#[derive(Clone, Debug)]
pub struct DomainConfig {
    pub location: Location,
    /// Total number of policy domains in the topology.
    pub domain_count: u32,
    /// Computation workers to spawn at `COMPUTE_OK`.
    pub compute_workers: usize,
    /// Largest datablock the allocator will hand out.
    pub max_db_bytes: u64,
}

impl DomainConfig {
    pub fn new(location: Location, domain_count: u32) -> Self {
        Self {
            location,
            domain_count,
            compute_workers: 2,
            max_db_bytes: 64 << 20,
        }
    }
}

pub struct PolicyDomain {
    pub(crate) cfg: DomainConfig,
    pub(crate) registry: GuidRegistry,
    pub(crate) proxy_dbs: ProxyDbTable,
    pub(crate) proxy_templates: ProxyTemplateTable,
    pub(crate) placer: PlacementOracle,
    pub(crate) scheduler: Scheduler,
    pub(crate) funcs: FuncRegistry,
    pub(crate) transport: Arc<dyn CommTransport>,
    /// Two-way requests awaiting their response frame.
    pub(crate) pending: DashMap<u64, oneshot::Sender<PolicyMsg>>,
    /// Local acquires parked until the proxy or home block can serve them.
    pub(crate) acquire_waiters: DashMap<u64, oneshot::Sender<PolicyMsg>>,
    pub(crate) shutdown: ShutdownBarrier,
    pub(crate) cancel: CancellationToken,
    msg_seq: AtomicU64,
    runlevel: Mutex<Runlevel>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PolicyDomain {
    pub fn new(cfg: DomainConfig, transport: Arc<dyn CommTransport>) -> Arc<Self> {
        let affinities = (0..cfg.domain_count)
            .map(|rank| Guid::encode(GuidKind::Affinity, Location(rank), u64::from(rank) + 1))
            .collect();
        let neighbor_count = cfg.domain_count.saturating_sub(1);
        Arc::new(Self {
            registry: GuidRegistry::new(cfg.location),
            proxy_dbs: ProxyDbTable::new(),
            proxy_templates: ProxyTemplateTable::new(),
            placer: PlacementOracle::new(cfg.location, affinities),
            scheduler: Scheduler::new(),
            funcs: FuncRegistry::new(),
            transport,
            pending: DashMap::new(),
            acquire_waiters: DashMap::new(),
            shutdown: ShutdownBarrier::new(neighbor_count),
            cancel: CancellationToken::new(),
            msg_seq: AtomicU64::new(1),
            runlevel: Mutex::new(Runlevel::ConfigParse),
            workers: Mutex::new(Vec::new()),
            cfg,
        })
    }

    pub fn location(&self) -> Location {
        self.cfg.location
    }

    pub fn config(&self) -> &DomainConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &GuidRegistry {
        &self.registry
    }

    pub fn funcs(&self) -> &FuncRegistry {
        &self.funcs
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn current_runlevel(&self) -> Runlevel {
        *self.runlevel.lock()
    }

    pub(crate) fn next_msg_id(&self) -> MsgId {
        MsgId(self.msg_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Fresh two-way request originating here.
    pub(crate) fn request(&self, body: MsgBody) -> PolicyMsg {
        PolicyMsg::request_response(self.next_msg_id(), self.location(), body)
    }

    /// Fresh one-way request originating here.
    pub(crate) fn request_oneway(&self, body: MsgBody) -> PolicyMsg {
        PolicyMsg::request(self.next_msg_id(), self.location(), body)
    }

    /// Walk runlevels up and start the worker loops.
    pub async fn start(self: &Arc<Self>) {
        let mut level = Runlevel::ConfigParse;
        loop {
            tracing::info!(runlevel = ?level, "Runlevel up");
            match level {
                Runlevel::ComputeOk => self.spawn_workers(),
                Runlevel::UserOk => {
                    *self.runlevel.lock() = level;
                    break;
                }
                _ => {}
            }
            *self.runlevel.lock() = level;
            let Some(next) = level.next_up() else { break };
            level = next;
        }
    }

    fn spawn_workers(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        workers.push(crate::worker::spawn_comm_worker(self.clone()));
        for id in 0..self.cfg.compute_workers {
            workers.push(crate::worker::spawn_compute_worker(self.clone(), id));
        }
    }

    /// Begin local teardown with `code`; idempotent across ticks.
    ///
    /// The first beginner broadcasts the runlevel notify to every neighbor
    /// and self-acknowledges; later calls (user or remote-triggered) no-op.
    pub async fn initiate_shutdown(self: &Arc<Self>, code: i32) {
        if !self.shutdown.begin(code) {
            return;
        }
        for neighbor in self.placer.neighbors() {
            let mut msg = self.request_oneway(MsgBody::MgtRlNotify {
                runlevel: Runlevel::ComputeOk,
                props: RunlevelProps::REQUEST | RunlevelProps::BARRIER | RunlevelProps::TEAR_DOWN,
                exit_code: code,
            });
            msg.dst = neighbor;
            if let Err(err) = self.process_message(msg, false).await {
                tracing::warn!(%neighbor, error = %err, "Failed to send shutdown notify");
            }
        }
        self.shutdown.ack();
    }

    /// Block until the distributed barrier opens, then tear down.
    ///
    /// Returns the exit code the shutdown was initiated with.
    pub async fn run_until_shutdown(self: &Arc<Self>) -> i32 {
        self.shutdown.wait_open().await;
        let mut level = Runlevel::UserOk;
        loop {
            tracing::info!(runlevel = ?level, "Runlevel down");
            if level == Runlevel::ComputeOk {
                self.cancel.cancel();
                let workers = std::mem::take(&mut *self.workers.lock());
                for worker in workers {
                    worker.abort();
                }
            }
            *self.runlevel.lock() = level;
            let Some(next) = level.next_down() else { break };
            level = next;
        }
        self.shutdown.exit_code()
    }

    /// Handle an incoming distributed-shutdown notification.
    pub(crate) async fn on_rl_notify(self: &Arc<Self>, exit_code: i32) {
        let newly_begun = self.shutdown.begin(exit_code);
        self.shutdown.ack();
        if newly_begun {
            // This domain had not started shutting down; propagate.
            for neighbor in self.placer.neighbors() {
                let mut msg = self.request_oneway(MsgBody::MgtRlNotify {
                    runlevel: Runlevel::ComputeOk,
                    props: RunlevelProps::REQUEST
                        | RunlevelProps::BARRIER
                        | RunlevelProps::TEAR_DOWN,
                    exit_code,
                });
                msg.dst = neighbor;
                if let Err(err) = self.process_message(msg, false).await {
                    tracing::warn!(%neighbor, error = %err, "Failed to propagate shutdown");
                }
            }
            self.shutdown.ack();
        }
    }

    /// Route one event delivery as a dependence satisfaction.
    pub(crate) async fn deliver(self: &Arc<Self>, delivery: Delivery) -> EngineResult<()> {
        let msg = self.request_oneway(MsgBody::DepSatisfy {
            guid: delivery.target,
            payload: delivery.payload,
            slot: delivery.slot,
        });
        self.process_message(msg, false).await.map(|_| ())
    }

    pub(crate) async fn deliver_all(self: &Arc<Self>, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            if let Err(err) = self.deliver(delivery).await {
                tracing::error!(target = %delivery.target, error = %err, "Delivery failed");
            }
        }
    }

    /// Complete a locally-awaited acquire, or ship the response to its
    /// remote origin, whichever the message calls for.
    pub(crate) async fn complete_acquire(self: &Arc<Self>, msg: PolicyMsg) {
        if let Some((_, tx)) = self.acquire_waiters.remove(&msg.id.0) {
            let _ = tx.send(msg);
            return;
        }
        if msg.dst != self.location() {
            if let Err(err) = self.send_response(msg).await {
                tracing::error!(error = %err, "Failed to ship acquire response");
            }
        }
        // Otherwise: a fire-and-forget runtime acquire; nothing waits on it.
    }

    /// Cooperative checkpoint for busy-waiting callers.
    ///
    /// Modelled as a message so the scheduler observes the blockage; the
    /// yield gives the comm worker a chance to land the resolution.
    pub async fn monitor_progress(self: &Arc<Self>, monitoree: Guid) -> EngineResult<()> {
        let msg = self.request(MsgBody::MonitorProgress { monitoree });
        self.process_message(msg, true).await?;
        Ok(())
    }

    /// Wait until `predicate` holds, yielding through monitor-progress.
    pub(crate) async fn spin_until(
        self: &Arc<Self>,
        monitoree: Guid,
        predicate: impl Fn() -> bool,
    ) -> EngineResult<()> {
        while !predicate() {
            if self.cancel.is_cancelled() {
                return Err(EngineError::TransportClosed {
                    context: "spinning on a resolution during teardown",
                });
            }
            self.monitor_progress(monitoree).await?;
        }
        Ok(())
    }

    /// Map a handler status into the response arrangement of `msg`.
    pub(crate) fn finish_local(&self, msg: &mut PolicyMsg, origin: Location, status: StatusCode) {
        if origin == self.location() {
            msg.respond_local(status);
        } else {
            msg.respond(status);
        }
    }
}
