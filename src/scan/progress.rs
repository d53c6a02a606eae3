//! Completion tracking for one batch of submitted domains.
//!
//! The session is a plain value: every incoming notification goes through [`dispatch`],
//! which consumes the current session and hands back the next one together with a
//! [`Step`] telling the caller what (if anything) it has to act on. Nothing here knows
//! about the transport the notifications came from.

use std::collections::{HashMap, HashSet};

use crate::domain::RecordId;

/// Scorer check-ins after which a domain counts as fully scored.
pub const COMPLETION_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Submission,
    Fetch,
    Subscription,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Submitting,
    Aggregating,
    Complete,
    Failed(FailureKind),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Pending rows exist and the subscription is live.
    Submitted(Vec<(RecordId, String)>),
    /// The scorer touched a row.
    Updated { id: RecordId, checks: u32 },
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Event did not belong to this session or arrived after it ended.
    Ignored,
    Advanced,
    /// Entered `Complete` with this event. Happens at most once per session.
    Completed,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone)]
struct Tracked {
    domain: String,
    checks: u32,
}

#[derive(Debug, Clone)]
pub struct ScanSession {
    state: SessionState,
    order: Vec<RecordId>,
    progress: HashMap<RecordId, Tracked>,
    counted: HashSet<RecordId>,
    completed: usize,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::idle()
    }
}

impl ScanSession {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            order: Vec::new(),
            progress: HashMap::new(),
            counted: HashSet::new(),
            completed: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn total(&self) -> usize {
        self.order.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Record ids in submission order.
    pub fn record_ids(&self) -> &[RecordId] {
        &self.order
    }

    pub fn domain_of(&self, id: &RecordId) -> Option<&str> {
        self.progress.get(id).map(|t| t.domain.as_str())
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Complete | SessionState::Failed(_))
    }

    pub fn percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let checks: u32 = self.progress.values().map(|t| t.checks).sum();
        100.0 * f64::from(checks) / (total as f64 * f64::from(COMPLETION_THRESHOLD))
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed,
            total: self.total(),
            percent: self.percent(),
        }
    }
}

/// Advances `session` by one event.
///
/// Per-record counters are high-water marks, not last-write-wins: an update
/// reporting fewer checks than already seen is logged and leaves the counter
/// alone, so the overall percentage never drops. For counters that only grow
/// the two rules agree.
pub fn dispatch(mut session: ScanSession, event: SessionEvent) -> (ScanSession, Step) {
    let step = match event {
        SessionEvent::Submitted(entries) => on_submitted(&mut session, entries),
        SessionEvent::Updated { id, checks } => on_updated(&mut session, id, checks),
        SessionEvent::Failed(kind) => {
            if session.is_finished() {
                Step::Ignored
            } else {
                session.state = SessionState::Failed(kind);
                Step::Failed(kind)
            }
        }
    };
    (session, step)
}

fn on_submitted(session: &mut ScanSession, entries: Vec<(RecordId, String)>) -> Step {
    if session.state != SessionState::Idle {
        return Step::Ignored;
    }
    if entries.is_empty() {
        session.state = SessionState::Failed(FailureKind::Validation);
        return Step::Failed(FailureKind::Validation);
    }
    for (id, domain) in entries {
        if session.progress.contains_key(&id) {
            continue;
        }
        session.order.push(id.clone());
        session.progress.insert(id, Tracked { domain, checks: 0 });
    }
    session.state = SessionState::Submitting;
    Step::Advanced
}

fn on_updated(session: &mut ScanSession, id: RecordId, checks: u32) -> Step {
    if !matches!(
        session.state,
        SessionState::Submitting | SessionState::Aggregating
    ) {
        return Step::Ignored;
    }
    let Some(tracked) = session.progress.get_mut(&id) else {
        return Step::Ignored;
    };

    let clamped = checks.min(COMPLETION_THRESHOLD);
    if clamped < tracked.checks {
        tracing::warn!(
            target: "scan",
            record = %id,
            domain = %tracked.domain,
            previous = tracked.checks,
            reported = checks,
            "check counter went backwards; keeping previous value"
        );
    } else {
        tracked.checks = clamped;
    }
    session.state = SessionState::Aggregating;

    if checks >= COMPLETION_THRESHOLD && session.counted.insert(id) {
        session.completed += 1;
    }

    if session.completed == session.total() {
        session.state = SessionState::Complete;
        return Step::Completed;
    }
    Step::Advanced
}
