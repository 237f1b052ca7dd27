//! Reconciliation engine for a single group.
//!
//! The [`ReconcileEngine`] drives one run through a fixed sequence of
//! states:
//!
//! 1. Build the [`GroupDirectorySnapshot`] and pending-request set.
//! 2. Compute the [`MembershipDiff`].
//! 3. Plan operations (skipped on dry runs).
//! 4. Execute the independent queue, then the dependent queue.
//!
//! No stage rolls back and no per-row or transport error aborts the run. A
//! lock prevents two runs from overlapping on the same engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{GroupConfig, SyncConfig};
use crate::directory::DirectoryTransport;
use crate::errors::EngineError;
use crate::executor::{ExecutionSummary, QueueExecutor, DEFAULT_CONCURRENCY};
use crate::models::{DesiredMembership, MembershipDiff};
use crate::planner::{OperationPlanner, Plan, PlanningPolicy, RejectedRow, SkippedRow};
use crate::reconciler::Reconciler;
use crate::roles::RoleResolver;
use crate::snapshot::{GroupDirectorySnapshot, ProvisioningPolicy};

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

/// States of a reconciliation run. Transitions only move forward.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    SnapshotBuilt,
    Reconciled,
    Planned,
    ExecutingIndependent,
    ExecutingDependent,
    Done,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SnapshotBuilt => write!(f, "snapshot_built"),
            Self::Reconciled => write!(f, "reconciled"),
            Self::Planned => write!(f, "planned"),
            Self::ExecutingIndependent => write!(f, "executing_independent"),
            Self::ExecutingDependent => write!(f, "executing_dependent"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Process-wide switches for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Compute and log the diff only.
    pub dry_run: bool,
    pub planning: PlanningPolicy,
    pub concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            planning: PlanningPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl EngineOptions {
    pub fn from_config(sync: &SyncConfig) -> Self {
        Self {
            dry_run: sync.dry_run,
            planning: PlanningPolicy {
                provisioning: ProvisioningPolicy::from_flag(sync.auto_provision),
                invite_to_all_orgs: sync.invite_to_all_orgs,
            },
            concurrency: sync.concurrency,
        }
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Number of operations per queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanCounts {
    pub independent: usize,
    pub dependent: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub superseded_removals: usize,
}

impl From<&Plan> for PlanCounts {
    fn from(plan: &Plan) -> Self {
        Self {
            independent: plan.independent.len(),
            dependent: plan.dependent.len(),
            skipped: plan.skipped.len(),
            rejected: plan.rejected.len(),
            superseded_removals: plan.superseded_removals,
        }
    }
}

/// Everything that happened during one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub group: String,
    pub group_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub desired_rows: usize,
    pub diff: MembershipDiff,
    pub planned: PlanCounts,
    pub skipped: Vec<SkippedRow>,
    pub rejected: Vec<RejectedRow>,
    pub execution: ExecutionSummary,
}

impl RunReport {
    fn new(group: &str, group_id: &str, dry_run: bool, desired_rows: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            group: group.to_string(),
            group_id: group_id.to_string(),
            dry_run,
            started_at: Utc::now(),
            completed_at: None,
            state: RunState::Idle,
            desired_rows,
            diff: MembershipDiff::default(),
            planned: PlanCounts::default(),
            skipped: Vec::new(),
            rejected: Vec::new(),
            execution: ExecutionSummary::default(),
        }
    }

    /// Operations sent to the directory.
    pub fn dispatched(&self) -> usize {
        self.execution.dispatched()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RunProgress {
    state: RunState,
    started_at: Option<DateTime<Utc>>,
}

pub struct ReconcileEngine {
    transport: Arc<dyn DirectoryTransport>,
    group_name: String,
    group_id: String,
    options: EngineOptions,
    /// Atomic flag preventing concurrent runs.
    running: Arc<AtomicBool>,
    progress: Mutex<RunProgress>,
}

impl ReconcileEngine {
    pub fn new(
        transport: Arc<dyn DirectoryTransport>,
        group_name: impl Into<String>,
        group_id: impl Into<String>,
        options: EngineOptions,
    ) -> Self {
        let group_name = group_name.into();
        let group_id = group_id.into();
        info!(group = %group_name, group_id = %group_id, dry_run = options.dry_run, "initializing reconcile engine");
        Self {
            transport,
            group_name,
            group_id,
            options,
            running: Arc::new(AtomicBool::new(false)),
            progress: Mutex::new(RunProgress::default()),
        }
    }

    pub fn for_group(
        transport: Arc<dyn DirectoryTransport>,
        group: &GroupConfig,
        options: EngineOptions,
    ) -> Self {
        Self::new(transport, &group.name, &group.id, options)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// State of the current (or last) run.
    pub fn state(&self) -> RunState {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Reconcile the group against `desired`.
    ///
    /// The only error is a run already in progress; everything else is
    /// logged and reflected in the report.
    pub async fn run(&self, desired: &[DesiredMembership]) -> Result<RunReport, EngineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let started_at = self
                .progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .started_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            return Err(EngineError::AlreadyRunning { started_at });
        }
        let _guard = RunLockGuard(self.running.clone());

        let mut report = RunReport::new(&self.group_name, &self.group_id, self.options.dry_run, desired.len());
        {
            let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            progress.state = RunState::Idle;
            progress.started_at = Some(report.started_at);
        }
        info!(run_id = %report.run_id, group = %self.group_name, rows = desired.len(), "starting reconciliation");

        self.do_run(desired, &mut report).await;

        report.completed_at = Some(Utc::now());
        report.state = self.state();
        info!(
            run_id = %report.run_id,
            additions = report.diff.additions.len(),
            removals = report.diff.removals.len(),
            succeeded = report.execution.succeeded(),
            failed = report.execution.failed(),
            skipped = report.execution.skipped(),
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn do_run(&self, desired: &[DesiredMembership], report: &mut RunReport) {
        let desired_orgs: Vec<String> = desired.iter().map(|d| d.org.clone()).collect();
        let fetched = GroupDirectorySnapshot::fetch(
            self.transport.as_ref(),
            &self.group_id,
            &desired_orgs,
            self.options.planning.provisioning,
        )
        .await;
        let snapshot = fetched.snapshot;
        let mut pending = fetched.pending;
        info!(
            members = snapshot.members().len(),
            orgs = snapshot.organizations().len(),
            pending_invites = pending.invites().len(),
            pending_provisions = pending.provisions().len(),
            "directory snapshot loaded"
        );
        if snapshot.roles().is_empty() {
            warn!(group = %self.group_name, "no roles available, every row will be rejected");
        }
        self.transition(RunState::SnapshotBuilt);

        let roles = RoleResolver::new(snapshot.roles());
        report.diff = Reconciler::new(&snapshot, &roles).diff(desired);
        for addition in &report.diff.additions {
            info!(membership = %addition.membership, user_exists_in_org = addition.user_exists_in_org, "to add");
        }
        for removal in &report.diff.removals {
            info!(
                org = %removal.org,
                email = %removal.user_email,
                role = %removal.role,
                reason = %removal.reason,
                "to remove"
            );
        }
        self.transition(RunState::Reconciled);

        if self.options.dry_run {
            info!("dry run, skipping planning and execution");
            self.transition(RunState::Done);
            return;
        }

        let plan = OperationPlanner::new(&snapshot, &roles, self.options.planning)
            .plan(&report.diff, &mut pending);
        report.planned = PlanCounts::from(&plan);
        self.transition(RunState::Planned);

        let executor = QueueExecutor::new(self.transport.clone(), self.options.concurrency);
        self.transition(RunState::ExecutingIndependent);
        let independent = executor.execute(&plan.independent).await;
        self.transition(RunState::ExecutingDependent);
        let dependent = executor.execute_dependent(&plan.dependent, &independent).await;
        self.transition(RunState::Done);

        report.skipped = plan.skipped;
        report.rejected = plan.rejected;
        report.execution = ExecutionSummary {
            independent,
            dependent,
        };
    }

    fn transition(&self, next: RunState) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        info!(from = %progress.state, to = %next, "run state");
        progress.state = next;
    }
}

// ---------------------------------------------------------------------------
// Run lock RAII guard
// ---------------------------------------------------------------------------

/// Resets the `running` flag when dropped, including on panic.
struct RunLockGuard(Arc<AtomicBool>);

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
