//! Human-in-the-loop approval workflow
//!
//! A detector that wants to take a sensitive corrective action (maintenance
//! mode, token refresh, disabling an API) submits an [`ApprovalRequest`]. The
//! workflow records a pending [`ApprovalAction`], sends a notification with
//! approve / reject / postpone buttons, and hands back an [`ApprovalTicket`].
//!
//! The first of these resolves the action:
//!
//! - a human decision via [`ApprovalWorkflow::handle_decision`]
//!   (or the chat-button payload via [`ApprovalWorkflow::handle_callback`]);
//! - the deadline passing with no decision, in which case the action is
//!   auto-executed (fail open).
//!
//! A postpone decision moves the deadline without resolving. Every state
//! change happens under one lock and a resolved action leaves the pending
//! map, so an action reaches exactly one terminal status exactly once and
//! later decisions for it are no-ops.

use crate::error::{Result, SentinelError};
use crate::events::{EventBus, MonitorEvent};
use crate::notification::{deliver, Notification, NotificationChannel};
use crate::policy::{ApprovalPolicy, MAX_DECISION_DELAY};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

static ACTION_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    MaintenanceMode,
    TokenRefresh,
    ApiDisable,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::MaintenanceMode => "MAINTENANCE_MODE",
            ActionType::TokenRefresh => "TOKEN_REFRESH",
            ActionType::ApiDisable => "API_DISABLE",
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            ActionType::MaintenanceMode => "🔧",
            ActionType::TokenRefresh => "🔑",
            ActionType::ApiDisable => "⛔",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    AutoExecuted,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    /// Whether the corrective action should go ahead
    pub fn proceeds(&self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::AutoExecuted)
    }
}

/// A human decision on a pending action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
    Postpone,
}

impl Decision {
    pub const ALL: [Decision; 3] = [Decision::Approve, Decision::Reject, Decision::Postpone];

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::Postpone => "postpone",
        }
    }

    pub fn button_label(&self) -> &'static str {
        match self {
            Decision::Approve => "✅ Approve",
            Decision::Reject => "❌ Reject",
            Decision::Postpone => "⏸️ Postpone",
        }
    }
}

impl FromStr for Decision {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Decision::Approve),
            "reject" => Ok(Decision::Reject),
            "postpone" => Ok(Decision::Postpone),
            other => Err(SentinelError::InvalidCallback(format!(
                "unknown decision '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub endpoint: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub auto_execute_after: DateTime<Utc>,
    pub status: ApprovalStatus,
    /// Number of postpone decisions received
    pub postponed: u32,
}

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub action_type: ActionType,
    pub endpoint: String,
    pub reason: String,
    /// Deadline for a human decision; the policy default when `None`
    pub auto_execute_after: Option<Duration>,
}

impl ApprovalRequest {
    pub fn new(
        action_type: ActionType,
        endpoint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            endpoint: endpoint.into(),
            reason: reason.into(),
            auto_execute_after: None,
        }
    }

    pub fn auto_execute_after(mut self, after: Duration) -> Self {
        self.auto_execute_after = Some(after);
        self
    }
}

/// Result of applying a decision
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    Approved,
    Rejected,
    Postponed { auto_execute_after: DateTime<Utc> },
    /// The action is unknown or already resolved
    NotPending,
}

/// Handle to a pending action's eventual status
#[derive(Debug)]
pub struct ApprovalTicket {
    action: ApprovalAction,
    rx: oneshot::Receiver<ApprovalStatus>,
}

impl ApprovalTicket {
    pub fn id(&self) -> &str {
        &self.action.id
    }

    /// The action as it was when submitted
    pub fn action(&self) -> &ApprovalAction {
        &self.action
    }

    /// Wait for the terminal status
    pub async fn wait(self) -> ApprovalStatus {
        // The resolver only disappears with the workflow itself; fail open.
        self.rx.await.unwrap_or(ApprovalStatus::AutoExecuted)
    }
}

struct PendingEntry {
    action: ApprovalAction,
    deadline: Instant,
    deadline_tx: watch::Sender<Instant>,
    resolver: Option<oneshot::Sender<ApprovalStatus>>,
}

#[derive(Default)]
struct WorkflowState {
    pending: HashMap<String, PendingEntry>,
    history: VecDeque<ApprovalAction>,
}

struct WorkflowInner {
    policy: ApprovalPolicy,
    channel: Arc<dyn NotificationChannel>,
    state: Mutex<WorkflowState>,
}

enum Applied {
    Decided(DecisionOutcome, ApprovalAction),
    Expired(ApprovalAction),
    NotPending,
}

enum Expiry {
    Executed(ApprovalAction),
    NotYetDue,
    Resolved,
}

/// Pending-action registry with timed auto-execution.
///
/// Cloning is cheap and clones share the same registry.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    inner: Arc<WorkflowInner>,
    bus: Option<EventBus>,
}

impl ApprovalWorkflow {
    pub fn new(policy: ApprovalPolicy, channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            inner: Arc::new(WorkflowInner {
                policy,
                channel,
                state: Mutex::new(WorkflowState::default()),
            }),
            bus: None,
        }
    }

    /// Publish `ApprovalResolved` events on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.inner.policy
    }

    /// Submit a request and wait for it to resolve. Returns whether the
    /// action should proceed.
    pub async fn request_approval(&self, request: ApprovalRequest) -> bool {
        self.submit(request).await.wait().await.proceeds()
    }

    /// Register a pending action, notify a human and return a ticket for it.
    ///
    /// Must be called from within a tokio runtime; the deadline is enforced
    /// by a background task whether or not anyone waits on the ticket.
    pub async fn submit(&self, request: ApprovalRequest) -> ApprovalTicket {
        let delay = request
            .auto_execute_after
            .unwrap_or(self.inner.policy.auto_execute_after)
            .min(MAX_DECISION_DELAY);
        let created_at = Utc::now();
        let action = ApprovalAction {
            id: next_action_id(created_at),
            action_type: request.action_type,
            endpoint: request.endpoint,
            reason: request.reason,
            created_at,
            auto_execute_after: add_std(created_at, delay),
            status: ApprovalStatus::Pending,
            postponed: 0,
        };

        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or(now);
        let (deadline_tx, deadline_rx) = watch::channel(deadline);
        let (resolver, rx) = oneshot::channel();

        self.inner.state.lock().pending.insert(
            action.id.clone(),
            PendingEntry {
                action: action.clone(),
                deadline,
                deadline_tx,
                resolver: Some(resolver),
            },
        );

        let workflow = self.clone();
        let id = action.id.clone();
        tokio::spawn(async move {
            workflow.enforce_deadline(id, deadline_rx).await;
        });

        info!(
            action_id = %action.id,
            action = %action.action_type,
            endpoint = %action.endpoint,
            auto_execute_ms = delay.as_millis() as u64,
            "🙋 Approval requested"
        );

        let notification =
            Notification::text(request_text(&action)).with_decisions(&action.id, &Decision::ALL);
        deliver(
            self.inner.channel.as_ref(),
            &notification,
            self.inner.policy.notification_timeout,
        )
        .await;

        ApprovalTicket { action, rx }
    }

    /// Apply a human decision to a pending action
    pub async fn handle_decision(&self, action_id: &str, decision: Decision) -> DecisionOutcome {
        let (outcome, action) = match self.apply_decision(action_id, decision, Instant::now()) {
            Applied::Decided(outcome, action) => (outcome, action),
            Applied::Expired(action) => {
                info!(
                    action_id,
                    decision = decision.as_str(),
                    "⏰ Decision arrived after deadline, auto-executing"
                );
                self.announce(&action).await;
                return DecisionOutcome::NotPending;
            }
            Applied::NotPending => {
                debug!(action_id, decision = decision.as_str(), "Decision ignored: action not pending");
                return DecisionOutcome::NotPending;
            }
        };

        match &outcome {
            DecisionOutcome::Postponed { auto_execute_after } => {
                info!(
                    action_id,
                    until = %auto_execute_after,
                    "⏸️  Approval postponed"
                );
                self.notify(format!(
                    "⏸️ *Postponed:* {} for `{}`\nAuto-executes at {}",
                    action.action_type,
                    action.endpoint,
                    auto_execute_after.format("%H:%M:%S UTC")
                ))
                .await;
            }
            _ => self.announce(&action).await,
        }

        outcome
    }

    /// Decide `action_id` as of `now`. An action whose deadline has passed
    /// is auto-executed instead, whatever the decision.
    fn apply_decision(&self, action_id: &str, decision: Decision, now: Instant) -> Applied {
        let history_len = self.inner.policy.history_len;
        let mut state = self.inner.state.lock();
        let Some(deadline) = state.pending.get(action_id).map(|entry| entry.deadline) else {
            return Applied::NotPending;
        };

        if deadline <= now {
            return Self::finish(&mut state, history_len, action_id, ApprovalStatus::AutoExecuted)
                .map_or(Applied::NotPending, Applied::Expired);
        }

        let decided = match decision {
            Decision::Approve => {
                Self::finish(&mut state, history_len, action_id, ApprovalStatus::Approved)
                    .map(|action| (DecisionOutcome::Approved, action))
            }
            Decision::Reject => {
                Self::finish(&mut state, history_len, action_id, ApprovalStatus::Rejected)
                    .map(|action| (DecisionOutcome::Rejected, action))
            }
            Decision::Postpone => state.pending.get_mut(action_id).map(|entry| {
                let increment = self.inner.policy.postpone_increment;
                entry.deadline = entry.deadline.checked_add(increment).unwrap_or(entry.deadline);
                entry.action.auto_execute_after =
                    add_std(entry.action.auto_execute_after, increment);
                entry.action.postponed += 1;
                entry.deadline_tx.send_replace(entry.deadline);
                (
                    DecisionOutcome::Postponed {
                        auto_execute_after: entry.action.auto_execute_after,
                    },
                    entry.action.clone(),
                )
            }),
        };
        decided.map_or(Applied::NotPending, |(outcome, action)| {
            Applied::Decided(outcome, action)
        })
    }

    /// Apply a chat-button payload such as `approve:<action id>`
    pub async fn handle_callback(&self, data: &str) -> Result<DecisionOutcome> {
        let (decision, action_id) = data
            .split_once(':')
            .ok_or_else(|| SentinelError::InvalidCallback(format!("missing ':' in '{data}'")))?;
        let decision: Decision = decision.parse()?;
        let action_id = action_id.trim();
        if action_id.is_empty() {
            return Err(SentinelError::InvalidCallback("empty action id".to_string()));
        }
        Ok(self.handle_decision(action_id, decision).await)
    }

    /// Reject a pending action without a human decision. Returns `false` if
    /// the action was not pending.
    pub fn cancel_action(&self, action_id: &str) -> bool {
        let cancelled = {
            let mut state = self.inner.state.lock();
            Self::finish(
                &mut state,
                self.inner.policy.history_len,
                action_id,
                ApprovalStatus::Rejected,
            )
        };
        match cancelled {
            Some(action) => {
                info!(action_id, "🛑 Approval cancelled");
                self.publish(&action);
                true
            }
            None => false,
        }
    }

    /// Pending actions, oldest first
    pub fn pending_actions(&self) -> Vec<ApprovalAction> {
        let state = self.inner.state.lock();
        let mut actions: Vec<_> = state.pending.values().map(|e| e.action.clone()).collect();
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        actions
    }

    /// Resolved actions, newest first
    pub fn recent_actions(&self) -> Vec<ApprovalAction> {
        self.inner.state.lock().history.iter().rev().cloned().collect()
    }

    /// Look up an action, pending or resolved
    pub fn action(&self, action_id: &str) -> Option<ApprovalAction> {
        let state = self.inner.state.lock();
        state
            .pending
            .get(action_id)
            .map(|e| e.action.clone())
            .or_else(|| state.history.iter().find(|a| a.id == action_id).cloned())
    }

    async fn enforce_deadline(&self, id: String, mut deadline_rx: watch::Receiver<Instant>) {
        loop {
            let deadline = *deadline_rx.borrow_and_update();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    match self.try_expire(&id) {
                        Expiry::Executed(action) => {
                            info!(
                                action_id = %action.id,
                                action = %action.action_type,
                                endpoint = %action.endpoint,
                                "⏰ No decision before deadline, auto-executing"
                            );
                            self.announce(&action).await;
                            return;
                        }
                        Expiry::NotYetDue => continue,
                        Expiry::Resolved => return,
                    }
                }
                changed = deadline_rx.changed() => {
                    // The sender is dropped once the action resolves
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn try_expire(&self, action_id: &str) -> Expiry {
        let mut state = self.inner.state.lock();
        match state.pending.get(action_id) {
            None => Expiry::Resolved,
            Some(entry) if entry.deadline > Instant::now() => Expiry::NotYetDue,
            Some(_) => Self::finish(
                &mut state,
                self.inner.policy.history_len,
                action_id,
                ApprovalStatus::AutoExecuted,
            )
            .map(Expiry::Executed)
            .unwrap_or(Expiry::Resolved),
        }
    }

    /// Move a pending action to `status`. Caller holds the lock.
    fn finish(
        state: &mut WorkflowState,
        history_len: usize,
        action_id: &str,
        status: ApprovalStatus,
    ) -> Option<ApprovalAction> {
        let mut entry = state.pending.remove(action_id)?;
        entry.action.status = status;
        if let Some(resolver) = entry.resolver.take() {
            let _ = resolver.send(status);
        }

        if history_len > 0 {
            if state.history.len() == history_len {
                state.history.pop_front();
            }
            state.history.push_back(entry.action.clone());
        }
        Some(entry.action)
    }

    /// Publish and confirm a resolved action
    async fn announce(&self, action: &ApprovalAction) {
        self.publish(action);
        let text = match action.status {
            ApprovalStatus::Approved => format!(
                "✅ *Approved:* {} for `{}`",
                action.action_type, action.endpoint
            ),
            ApprovalStatus::Rejected => format!(
                "❌ *Rejected:* {} for `{}`",
                action.action_type, action.endpoint
            ),
            ApprovalStatus::AutoExecuted => format!(
                "⏰ *Auto-executed:* {} for `{}` (no response before deadline)",
                action.action_type, action.endpoint
            ),
            ApprovalStatus::Pending => return,
        };
        self.notify(text).await;
    }

    fn publish(&self, action: &ApprovalAction) {
        if let Some(bus) = &self.bus {
            bus.publish(MonitorEvent::ApprovalResolved(action.clone()));
        }
    }

    async fn notify(&self, text: String) {
        if !deliver(
            self.inner.channel.as_ref(),
            &Notification::text(text),
            self.inner.policy.notification_timeout,
        )
        .await
        {
            warn!("Approval confirmation was not delivered");
        }
    }
}

fn next_action_id(at: DateTime<Utc>) -> String {
    format!(
        "hitl-{}-{}",
        at.timestamp_millis(),
        ACTION_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

fn add_std(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delta)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(at)
}

fn request_text(action: &ApprovalAction) -> String {
    format!(
        "{} *Approval required: {}*\n\n*Endpoint:* `{}`\n*Reason:* {}\n\nAuto-executes at {} unless rejected.\n_Action ID: {}_",
        action.action_type.icon(),
        action.action_type,
        action.endpoint,
        action.reason,
        action.auto_execute_after.format("%H:%M:%S UTC"),
        action.id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingChannel, RecordingChannel};

    fn workflow(channel: Arc<dyn NotificationChannel>) -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            ApprovalPolicy {
                postpone_increment: Duration::from_secs(5),
                ..Default::default()
            },
            channel,
        )
    }

    fn maintenance() -> ApprovalRequest {
        ApprovalRequest::new(ActionType::MaintenanceMode, "solvex", "5 × HTTP 503")
            .auto_execute_after(Duration::from_millis(5000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_executes_at_deadline_exactly_once() {
        let channel = Arc::new(RecordingChannel::new());
        let workflow = workflow(channel.clone());

        let start = Instant::now();
        let ticket = workflow.submit(maintenance()).await;
        let id = ticket.id().to_string();

        assert_eq!(ticket.wait().await, ApprovalStatus::AutoExecuted);
        assert_eq!(start.elapsed(), Duration::from_millis(5000));

        // Late decision is a no-op
        assert_eq!(
            workflow.handle_decision(&id, Decision::Reject).await,
            DecisionOutcome::NotPending
        );
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        let history = workflow.recent_actions();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ApprovalStatus::AutoExecuted);
        assert!(workflow.pending_actions().is_empty());

        let texts = channel.texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("Auto-executed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_resolves_before_deadline() {
        let channel = Arc::new(RecordingChannel::new());
        let workflow = workflow(channel.clone());

        let ticket = workflow.submit(maintenance()).await;
        let id = ticket.id().to_string();

        assert_eq!(
            workflow.handle_decision(&id, Decision::Approve).await,
            DecisionOutcome::Approved
        );
        assert_eq!(ticket.wait().await, ApprovalStatus::Approved);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;

        assert_eq!(workflow.recent_actions().len(), 1);
        assert_eq!(workflow.action(&id).unwrap().status, ApprovalStatus::Approved);
        assert!(channel.texts().iter().all(|t| !t.contains("Auto-executed")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_does_not_proceed() {
        let workflow = workflow(Arc::new(RecordingChannel::new()));
        let ticket = workflow.submit(maintenance()).await;

        workflow.handle_decision(ticket.id(), Decision::Reject).await;

        assert!(!ticket.wait().await.proceeds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_postpone_extends_deadline() {
        let workflow = workflow(Arc::new(RecordingChannel::new()));
        let start = Instant::now();
        let ticket = workflow.submit(maintenance()).await;
        let before = ticket.action().auto_execute_after;

        tokio::time::advance(Duration::from_secs(1)).await;
        let outcome = workflow.handle_decision(ticket.id(), Decision::Postpone).await;

        match outcome {
            DecisionOutcome::Postponed { auto_execute_after } => {
                assert_eq!(auto_execute_after - before, chrono::Duration::seconds(5));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(workflow.pending_actions()[0].status, ApprovalStatus::Pending);
        assert_eq!(workflow.pending_actions()[0].postponed, 1);

        assert_eq!(ticket.wait().await, ApprovalStatus::AutoExecuted);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decision_at_deadline_auto_executes() {
        for decision in Decision::ALL {
            let channel = Arc::new(RecordingChannel::new());
            let workflow = workflow(channel.clone());
            let ticket = workflow.submit(maintenance()).await;
            let id = ticket.id().to_string();
            let deadline = workflow.inner.state.lock().pending[&id].deadline;

            match workflow.apply_decision(&id, decision, deadline) {
                Applied::Expired(action) => {
                    assert_eq!(action.status, ApprovalStatus::AutoExecuted);
                    assert_eq!(action.postponed, 0);
                }
                _ => panic!("{} at the deadline was applied", decision.as_str()),
            }
            assert_eq!(ticket.wait().await, ApprovalStatus::AutoExecuted);
            assert_eq!(
                workflow.handle_decision(&id, decision).await,
                DecisionOutcome::NotPending
            );
            assert_eq!(workflow.recent_actions().len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delays_do_not_overflow() {
        let workflow = ApprovalWorkflow::new(
            ApprovalPolicy {
                postpone_increment: Duration::MAX,
                ..Default::default()
            },
            Arc::new(RecordingChannel::new()),
        );
        let ticket = workflow
            .submit(
                ApprovalRequest::new(ActionType::TokenRefresh, "solvex", "HTTP 401")
                    .auto_execute_after(Duration::MAX),
            )
            .await;

        let outcome = workflow.handle_decision(ticket.id(), Decision::Postpone).await;
        assert!(matches!(outcome, DecisionOutcome::Postponed { .. }));
        assert_eq!(
            workflow.handle_decision(ticket.id(), Decision::Approve).await,
            DecisionOutcome::Approved
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_payloads() {
        let workflow = workflow(Arc::new(RecordingChannel::new()));
        let ticket = workflow.submit(maintenance()).await;

        assert!(matches!(
            workflow.handle_callback("explode:abc").await,
            Err(SentinelError::InvalidCallback(_))
        ));
        assert!(workflow.handle_callback("approve").await.is_err());
        assert!(workflow.handle_callback("approve: ").await.is_err());

        let outcome = workflow
            .handle_callback(&format!("approve:{}", ticket.id()))
            .await
            .unwrap();
        assert_eq!(outcome, DecisionOutcome::Approved);
        assert!(ticket.wait().await.proceeds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_channel_does_not_block_resolution() {
        let channel = Arc::new(FailingChannel::new("chat api down"));
        let workflow = workflow(channel.clone());

        assert!(workflow.request_approval(maintenance()).await);
        assert_eq!(channel.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_rejects() {
        let workflow = workflow(Arc::new(RecordingChannel::new()));
        let ticket = workflow.submit(maintenance()).await;
        let id = ticket.id().to_string();

        assert_eq!(workflow.pending_actions().len(), 1);
        assert!(workflow.cancel_action(&id));
        assert!(!workflow.cancel_action(&id));
        assert_eq!(ticket.wait().await, ApprovalStatus::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_published_on_bus() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let workflow =
            ApprovalWorkflow::new(ApprovalPolicy::default(), Arc::new(RecordingChannel::new()))
                .with_event_bus(bus);

        let ticket = workflow.submit(maintenance()).await;
        workflow.handle_decision(ticket.id(), Decision::Approve).await;

        match events.recv().await.unwrap() {
            MonitorEvent::ApprovalResolved(action) => {
                assert_eq!(action.status, ApprovalStatus::Approved);
                assert_eq!(action.endpoint, "solvex");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!("Approve".parse::<Decision>().unwrap(), Decision::Approve);
        assert_eq!(" postpone ".parse::<Decision>().unwrap(), Decision::Postpone);
        assert!("maybe".parse::<Decision>().is_err());
        assert!(ApprovalStatus::AutoExecuted.proceeds());
        assert!(!ApprovalStatus::Rejected.proceeds());
        assert!(!ApprovalStatus::Pending.is_terminal());
    }
}
