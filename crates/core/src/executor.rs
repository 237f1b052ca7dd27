//! Bounded-concurrency dispatch of planned operations.
//!
//! Every operation in a queue is spawned onto a [`JoinSet`] and waits for a
//! semaphore permit before calling the transport, so at most `concurrency`
//! requests are in flight. A failed operation is logged and recorded; it
//! never cancels its siblings. The executor does not retry; that belongs to
//! the transport.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::directory::DirectoryTransport;
use crate::planner::{OperationId, OperationKind, Plan, PlannedOperation};

/// Default number of requests allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    Succeeded,
    Failed { message: String },
    Skipped { reason: String },
}

impl OperationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { message } => write!(f, "failed: {}", message),
            Self::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationOutcome {
    pub id: OperationId,
    pub kind: OperationKind,
    pub description: String,
    #[serde(flatten)]
    pub status: OperationStatus,
}

impl OperationOutcome {
    fn new(op: &PlannedOperation, status: OperationStatus) -> Self {
        Self {
            id: op.id,
            kind: op.kind,
            description: op.description.clone(),
            status,
        }
    }
}

/// Outcomes of both queues of a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub independent: Vec<OperationOutcome>,
    pub dependent: Vec<OperationOutcome>,
}

impl ExecutionSummary {
    pub fn outcomes(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.independent.iter().chain(self.dependent.iter())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes().filter(|o| o.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o.status, OperationStatus::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o.status, OperationStatus::Skipped { .. }))
            .count()
    }

    /// Operations actually sent to the directory.
    pub fn dispatched(&self) -> usize {
        self.succeeded() + self.failed()
    }
}

pub struct QueueExecutor {
    transport: Arc<dyn DirectoryTransport>,
    concurrency: usize,
}

impl QueueExecutor {
    pub fn new(transport: Arc<dyn DirectoryTransport>, concurrency: usize) -> Self {
        Self {
            transport,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run the independent queue to completion, then the dependent queue.
    pub async fn execute_plan(&self, plan: &Plan) -> ExecutionSummary {
        let independent = self.execute(&plan.independent).await;
        let dependent = self.execute_dependent(&plan.dependent, &independent).await;
        ExecutionSummary {
            independent,
            dependent,
        }
    }

    /// Dispatch every operation in `queue` and collect one outcome each,
    /// ordered by operation id.
    pub async fn execute(&self, queue: &[PlannedOperation]) -> Vec<OperationOutcome> {
        let total = queue.len();
        if total == 0 {
            return Vec::new();
        }
        info!(total, concurrency = self.concurrency, "processing operation queue");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        for op in queue.iter().cloned() {
            let transport = Arc::clone(&self.transport);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = transport.request(&op.request).await;
                (op, result)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut completed = 0usize;
        while let Some(joined) = join_set.join_next().await {
            completed += 1;
            match joined {
                Ok((op, Ok(_))) => {
                    debug!(operation = %op.id, request = %op.request, "operation succeeded");
                    outcomes.push(OperationOutcome::new(&op, OperationStatus::Succeeded));
                }
                Ok((op, Err(e))) => {
                    let message = e.message();
                    warn!(
                        operation = %op.id,
                        request = %op.request,
                        description = %op.description,
                        error = %message,
                        "operation failed"
                    );
                    outcomes.push(OperationOutcome::new(&op, OperationStatus::Failed { message }));
                }
                Err(e) => error!(error = %e, "operation task panicked"),
            }
            info!("progress {}/{}", completed, total);
        }

        // A panicked task leaves no outcome behind; record it as failed.
        if outcomes.len() < total {
            let seen: HashSet<OperationId> = outcomes.iter().map(|o| o.id).collect();
            for op in queue.iter().filter(|op| !seen.contains(&op.id)) {
                outcomes.push(OperationOutcome::new(
                    op,
                    OperationStatus::Failed {
                        message: "operation task panicked".into(),
                    },
                ));
            }
        }

        outcomes.sort_by_key(|o| o.id);
        outcomes
    }

    /// Dispatch operations whose parent succeeded; record the rest as
    /// skipped.
    pub async fn execute_dependent(
        &self,
        queue: &[PlannedOperation],
        parents: &[OperationOutcome],
    ) -> Vec<OperationOutcome> {
        let succeeded: HashSet<OperationId> = parents
            .iter()
            .filter(|o| o.status.is_success())
            .map(|o| o.id)
            .collect();

        let (ready, blocked): (Vec<PlannedOperation>, Vec<PlannedOperation>) = queue
            .iter()
            .cloned()
            .partition(|op| op.depends_on.map_or(true, |parent| succeeded.contains(&parent)));

        let mut outcomes = self.execute(&ready).await;
        for op in &blocked {
            let parent = op
                .depends_on
                .map(|p| p.to_string())
                .unwrap_or_default();
            info!(operation = %op.id, parent = %parent, "skipping dependent operation, parent did not succeed");
            outcomes.push(OperationOutcome::new(
                op,
                OperationStatus::Skipped {
                    reason: format!("{} did not succeed", parent),
                },
            ));
        }

        outcomes.sort_by_key(|o| o.id);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::directory::DirectoryRequest;
    use crate::errors::DirectoryError;

    /// Transport that tracks in-flight requests and fails paths containing
    /// "fail".
    #[derive(Default)]
    struct CountingTransport {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DirectoryTransport for CountingTransport {
        async fn request(
            &self,
            request: &DirectoryRequest,
        ) -> Result<serde_json::Value, DirectoryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request.path.clone());

            if request.path.contains("fail") {
                Err(DirectoryError::ApiError {
                    status: 400,
                    message: "bad request".into(),
                })
            } else {
                Ok(json!({}))
            }
        }
    }

    fn op(id: u32, kind: OperationKind, path: &str, depends_on: Option<u32>) -> PlannedOperation {
        PlannedOperation {
            id: OperationId(id),
            kind,
            request: DirectoryRequest::put(path, json!({})),
            depends_on: depends_on.map(OperationId),
            description: path.to_string(),
        }
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_is_respected() {
        let transport = Arc::new(CountingTransport::default());
        let executor = QueueExecutor::new(transport.clone(), 3);
        let queue: Vec<PlannedOperation> = (1..=12)
            .map(|i| op(i, OperationKind::UpdateRole, &format!("/op/{}", i), None))
            .collect();

        let outcomes = executor.execute(&queue).await;

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(|o| o.status.is_success()));
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(transport.calls.lock().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_siblings() {
        let transport = Arc::new(CountingTransport::default());
        let executor = QueueExecutor::new(transport.clone(), DEFAULT_CONCURRENCY);
        let queue = vec![
            op(1, OperationKind::UpdateRole, "/ok/1", None),
            op(2, OperationKind::UpdateRole, "/fail/2", None),
            op(3, OperationKind::Remove, "/ok/3", None),
        ];

        let outcomes = executor.execute(&queue).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].status.is_success());
        assert_eq!(
            outcomes[1].status,
            OperationStatus::Failed {
                message: "bad request".into()
            }
        );
        assert!(outcomes[2].status.is_success());
    }

    #[tokio::test]
    async fn test_dependent_runs_only_after_parent_success() {
        let transport = Arc::new(CountingTransport::default());
        let executor = QueueExecutor::new(transport.clone(), DEFAULT_CONCURRENCY);
        let plan = Plan {
            independent: vec![
                op(1, OperationKind::AddToOrg, "/add/ok", None),
                op(2, OperationKind::AddToOrg, "/add/fail", None),
            ],
            dependent: vec![
                op(3, OperationKind::UpdateRole, "/update/after-ok", Some(1)),
                op(4, OperationKind::UpdateRole, "/update/after-fail", Some(2)),
            ],
            ..Default::default()
        };

        let summary = executor.execute_plan(&plan).await;

        assert_eq!(summary.dependent.len(), 2);
        assert!(summary.dependent[0].status.is_success());
        assert!(matches!(
            summary.dependent[1].status,
            OperationStatus::Skipped { .. }
        ));
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.dispatched(), 3);

        let calls = transport.calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c == "/update/after-fail"));
        let add = calls.iter().position(|c| c == "/add/ok").unwrap();
        let update = calls.iter().position(|c| c == "/update/after-ok").unwrap();
        assert!(add < update);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let executor = QueueExecutor::new(Arc::new(CountingTransport::default()), 0);
        assert_eq!(executor.concurrency(), 1);
        assert!(executor.execute(&[]).await.is_empty());
        let summary = executor.execute_plan(&Plan::default()).await;
        assert_eq!(summary.dispatched(), 0);
    }
}
