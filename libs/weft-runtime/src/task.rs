//! Task templates, task records and the EDT function registry.
//!
//! A task record tracks its dependence frontier: every slot must be
//! satisfied (with a datablock GUID or null) before the task is handed to
//! the scheduler. Execution itself happens on a worker, which acquires the
//! slot datablocks, runs the registered function and walks the completion
//! protocol (output event, parent latch, destroy).

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::db::DbHandle;
use crate::domain::PolicyDomain;
use weft_proto::{TaskProps, TemplateMeta};
use weft_types::{DbAccessMode, Guid, Hint, StatusCode};

/// A registered task template: immutable metadata, cloned across domains.
pub struct TemplateRecord {
    pub guid: Guid,
    pub meta: TemplateMeta,
    hint: Mutex<Hint>,
}

impl TemplateRecord {
    pub fn new(guid: Guid, meta: TemplateMeta) -> Self {
        Self {
            guid,
            meta,
            hint: Mutex::new(Hint::new()),
        }
    }

    pub fn hint(&self) -> Hint {
        self.hint.lock().clone()
    }

    pub fn set_hint(&self, hint: Hint) {
        *self.hint.lock() = hint;
    }
}

/// One resolved dependence handed to an EDT body.
pub struct EdtDep {
    pub guid: Guid,
    pub mode: DbAccessMode,
    /// Acquired payload; `None` for null dependences and pure events.
    pub data: Option<DbHandle>,
}

/// Execution context an EDT body runs against.
pub struct TaskContext {
    pub domain: Arc<PolicyDomain>,
    pub task: Guid,
    pub paramv: Vec<u64>,
    pub deps: Vec<EdtDep>,
    /// Latch the body's spawns check into (the enclosing finish scope).
    pub scope_latch: Guid,
}

/// An EDT body: consumes its context, returns the data GUID to satisfy the
/// output event with (or `None` for a null satisfaction).
pub type EdtFunc =
    Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Option<Guid>> + Send + Sync + 'static>;

/// Per-domain table mapping template `func_id`s to executable bodies.
///
/// Function ids are stable across domains (same binary everywhere), which is
/// what makes template cloning sufficient to run a task anywhere.
#[derive(Default)]
pub struct FuncRegistry {
    funcs: DashMap<u64, EdtFunc>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, func_id: u64, func: EdtFunc) {
        self.funcs.insert(func_id, func);
    }

    pub fn get(&self, func_id: u64) -> Option<EdtFunc> {
        self.funcs.get(&func_id).map(|f| f.value().clone())
    }
}

#[derive(Clone, Copy)]
struct SlotState {
    satisfied: bool,
    payload: Guid,
    mode: DbAccessMode,
    /// Persistent-event signaler whose value the task pulls when it runs.
    pull: Option<Guid>,
}

/// One slot as the executing worker sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedSlot {
    pub payload: Guid,
    pub mode: DbAccessMode,
    /// Set when the slot is fed by a persistent event: query it for the
    /// payload instead of trusting a pushed satisfaction.
    pub pull: Option<Guid>,
}

struct TaskState {
    slots: Vec<SlotState>,
    remaining: u32,
    scheduled: bool,
}

/// A created task waiting on its dependence frontier, then execution.
pub struct TaskRecord {
    pub guid: Guid,
    pub func_id: u64,
    pub paramv: Vec<u64>,
    pub props: TaskProps,
    /// Event satisfied when the task (or its finish scope) completes.
    pub output_event: Guid,
    /// Latch this task checks out of when its scope completes.
    pub parent_latch: Guid,
    /// For finish tasks: the latch tracking the transitive spawn tree.
    pub finish_latch: Guid,
    state: Mutex<TaskState>,
}

impl TaskRecord {
    pub fn new(
        guid: Guid,
        func_id: u64,
        paramv: Vec<u64>,
        depc: u32,
        props: TaskProps,
        output_event: Guid,
        parent_latch: Guid,
        finish_latch: Guid,
    ) -> Self {
        let slots = vec![
            SlotState {
                satisfied: false,
                payload: Guid::NULL,
                mode: DbAccessMode::ReadWrite,
                pull: None,
            };
            depc as usize
        ];
        Self {
            guid,
            func_id,
            paramv,
            props,
            output_event,
            parent_latch,
            finish_latch,
            state: Mutex::new(TaskState {
                remaining: depc,
                slots,
                scheduled: false,
            }),
        }
    }

    pub fn depc(&self) -> u32 {
        self.state.lock().slots.len() as u32
    }

    /// Record the access mode a signaler registered for `slot`.
    pub fn set_slot_mode(&self, slot: u32, mode: DbAccessMode) -> Result<(), StatusCode> {
        let mut state = self.state.lock();
        let slot = state
            .slots
            .get_mut(slot as usize)
            .ok_or(StatusCode::InvalidArg)?;
        slot.mode = mode;
        Ok(())
    }

    /// Register a persistent-event signaler for `slot`.
    ///
    /// The slot stops gating the dependence frontier: the event keeps its
    /// payload after firing, so the task pulls it at execution time instead
    /// of waiting for a push. Returns `true` when this made the task ready.
    pub fn set_pull_signaler(
        &self,
        slot: u32,
        event: Guid,
        mode: DbAccessMode,
    ) -> Result<bool, StatusCode> {
        let mut state = self.state.lock();
        let entry = state
            .slots
            .get_mut(slot as usize)
            .ok_or(StatusCode::InvalidArg)?;
        if entry.satisfied {
            return Err(StatusCode::InvalidArg);
        }
        entry.satisfied = true;
        entry.mode = mode;
        entry.pull = Some(event);
        state.remaining -= 1;
        if state.remaining == 0 && !state.scheduled {
            state.scheduled = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Satisfy one slot. Returns `true` when this was the last unsatisfied
    /// slot and the task must be handed to the scheduler exactly once.
    pub fn satisfy_slot(&self, slot: u32, payload: Guid) -> Result<bool, StatusCode> {
        let mut state = self.state.lock();
        let entry = state
            .slots
            .get_mut(slot as usize)
            .ok_or(StatusCode::InvalidArg)?;
        if entry.satisfied {
            return Err(StatusCode::InvalidArg);
        }
        entry.satisfied = true;
        entry.payload = payload;
        state.remaining -= 1;
        if state.remaining == 0 && !state.scheduled {
            state.scheduled = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Slot payloads and modes, for the executing worker.
    pub fn resolved_slots(&self) -> Vec<ResolvedSlot> {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .map(|s| ResolvedSlot {
                payload: s.payload,
                mode: s.mode,
                pull: s.pull,
            })
            .collect()
    }

    pub fn is_finish(&self) -> bool {
        self.props.contains(TaskProps::FINISH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{GuidKind, Location};

    fn task(depc: u32) -> TaskRecord {
        TaskRecord::new(
            Guid::encode(GuidKind::Task, Location(0), 1),
            7,
            vec![],
            depc,
            TaskProps::empty(),
            Guid::NULL,
            Guid::NULL,
            Guid::NULL,
        )
    }

    #[test]
    fn task_schedules_after_last_slot() {
        let t = task(2);
        assert!(!t.satisfy_slot(0, Guid::NULL).unwrap());
        assert!(t.satisfy_slot(1, Guid::NULL).unwrap());
    }

    #[test]
    fn zero_dep_task_never_reports_ready_via_slots() {
        let t = task(0);
        assert_eq!(t.satisfy_slot(0, Guid::NULL), Err(StatusCode::InvalidArg));
    }

    #[test]
    fn double_satisfy_of_a_slot_is_rejected() {
        let t = task(1);
        t.satisfy_slot(0, Guid::NULL).unwrap();
        assert_eq!(t.satisfy_slot(0, Guid::NULL), Err(StatusCode::InvalidArg));
    }

    #[test]
    fn slot_mode_is_recorded_for_the_acquire() {
        let t = task(1);
        t.set_slot_mode(0, DbAccessMode::Const).unwrap();
        let payload = Guid::encode(GuidKind::Datablock, Location(0), 5);
        t.satisfy_slot(0, payload).unwrap();
        assert_eq!(
            t.resolved_slots(),
            vec![ResolvedSlot {
                payload,
                mode: DbAccessMode::Const,
                pull: None,
            }]
        );
    }

    #[test]
    fn persistent_signaler_does_not_gate_the_frontier() {
        let t = task(2);
        let event = Guid::encode(GuidKind::EventSticky, Location(0), 3);
        // The pull slot counts as resolved immediately.
        assert!(!t.set_pull_signaler(0, event, DbAccessMode::Const).unwrap());
        assert!(t.satisfy_slot(1, Guid::NULL).unwrap());
        let slots = t.resolved_slots();
        assert_eq!(slots[0].pull, Some(event));
        assert_eq!(slots[0].mode, DbAccessMode::Const);
        // A second registration on the same slot is rejected.
        assert_eq!(
            t.set_pull_signaler(0, event, DbAccessMode::Const),
            Err(StatusCode::InvalidArg)
        );
    }
}
