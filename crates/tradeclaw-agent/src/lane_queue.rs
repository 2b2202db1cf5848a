//! Lane queue: admission control for runs
//!
//! Tasks wait in one FIFO list. A scheduling pass walks the whole list and
//! admits every task whose lane has spare capacity and whose session has no
//! active task. Admitted work is spawned and never awaited by the queue; when
//! it finishes (or panics) its lane slot and session are released and another
//! pass runs.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};
use tradeclaw_core::SessionKey;

pub const LANE_MAIN: &str = "main";
pub const LANE_SUBAGENT: &str = "subagent";
pub const LANE_AUTOPILOT: &str = "autopilot";

/// Capacity of a lane nobody configured.
const UNKNOWN_LANE_CAPACITY: usize = 1;

pub fn default_lanes() -> BTreeMap<String, usize> {
    BTreeMap::from([
        (LANE_MAIN.to_string(), 2),
        (LANE_SUBAGENT.to_string(), 4),
        (LANE_AUTOPILOT.to_string(), 1),
    ])
}

type Work = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

/// A unit of work waiting for admission.
pub struct QueueTask {
    pub id: String,
    pub run_id: String,
    pub session_key: SessionKey,
    pub lane: String,
    work: Work,
}

impl QueueTask {
    pub fn new<F, Fut>(run_id: impl Into<String>, session_key: SessionKey, lane: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            session_key,
            lane: lane.into(),
            work: Box::new(move || work().boxed()),
        }
    }
}

impl std::fmt::Debug for QueueTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueTask")
            .field("id", &self.id)
            .field("run_id", &self.run_id)
            .field("session_key", &self.session_key)
            .field("lane", &self.lane)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the queue.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub active: BTreeMap<String, usize>,
    pub active_sessions: usize,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueTask>,
    active: HashMap<String, usize>,
    active_sessions: HashSet<SessionKey>,
}

struct Inner {
    capacities: HashMap<String, usize>,
    state: Mutex<QueueState>,
}

/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct LaneQueue {
    inner: Arc<Inner>,
}

impl Default for LaneQueue {
    fn default() -> Self {
        Self::new(default_lanes())
    }
}

impl LaneQueue {
    /// Capacities are fixed here. Zero is treated as one.
    pub fn new(capacities: impl IntoIterator<Item = (String, usize)>) -> Self {
        let capacities = capacities
            .into_iter()
            .map(|(lane, cap)| (lane, cap.max(1)))
            .collect();
        Self {
            inner: Arc::new(Inner {
                capacities,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn capacity(&self, lane: &str) -> usize {
        self.inner
            .capacities
            .get(lane)
            .copied()
            .unwrap_or(UNKNOWN_LANE_CAPACITY)
    }

    /// Queue `task` and admit whatever can run now. Must be called inside a tokio runtime.
    pub fn enqueue(&self, task: QueueTask) {
        debug!(task_id = %task.id, run_id = %task.run_id, session = %task.session_key, lane = %task.lane, "enqueue");
        self.lock().pending.push_back(task);
        self.schedule();
    }

    pub fn is_session_active(&self, key: &SessionKey) -> bool {
        self.lock().active_sessions.contains(key)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pending: state.pending.len(),
            active: state
                .active
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(lane, n)| (lane.clone(), *n))
                .collect(),
            active_sessions: state.active_sessions.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Work runs outside the lock, so a poisoned lock still holds consistent state.
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One pass over the full pending list.
    fn schedule(&self) {
        let admitted = {
            let mut state = self.lock();
            let mut waiting = VecDeque::with_capacity(state.pending.len());
            let mut admitted = Vec::new();

            while let Some(task) = state.pending.pop_front() {
                let in_lane = state.active.get(&task.lane).copied().unwrap_or(0);
                if in_lane < self.capacity(&task.lane) && !state.active_sessions.contains(&task.session_key) {
                    *state.active.entry(task.lane.clone()).or_insert(0) += 1;
                    state.active_sessions.insert(task.session_key.clone());
                    admitted.push(task);
                } else {
                    waiting.push_back(task);
                }
            }
            state.pending = waiting;
            admitted
        };

        for task in admitted {
            self.launch(task);
        }
    }

    fn launch(&self, task: QueueTask) {
        let queue = self.clone();
        let QueueTask {
            id,
            run_id,
            session_key,
            lane,
            work,
        } = task;
        debug!(task_id = %id, run_id = %run_id, session = %session_key, lane = %lane, "admitted");

        tokio::spawn(async move {
            // The inner task turns a panic into a JoinError instead of unwinding past the release.
            match tokio::spawn(async move { work().await }).await {
                Ok(Ok(())) => debug!(task_id = %id, run_id = %run_id, "task finished"),
                Ok(Err(e)) => warn!(task_id = %id, run_id = %run_id, error = %e, "task returned an error"),
                Err(e) => error!(task_id = %id, run_id = %run_id, error = %e, "task panicked"),
            }
            queue.release(&lane, &session_key);
        });
    }

    fn release(&self, lane: &str, session_key: &SessionKey) {
        {
            let mut state = self.lock();
            if let Some(n) = state.active.get_mut(lane) {
                *n = n.saturating_sub(1);
            }
            state.active_sessions.remove(session_key);
        }
        self.schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    fn key(s: &str) -> SessionKey {
        SessionKey::new(s)
    }

    /// Task that reports when it starts and then waits for `gate`.
    fn gated(
        run_id: &str,
        session: &str,
        lane: &str,
        started: mpsc::UnboundedSender<String>,
        gate: oneshot::Receiver<()>,
    ) -> QueueTask {
        let id = run_id.to_string();
        QueueTask::new(run_id, key(session), lane, move || async move {
            let _ = started.send(id);
            let _ = gate.await;
            Ok(())
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn lane_capacity_is_respected() {
        let queue = LaneQueue::new([("main".to_string(), 2)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut gates = Vec::new();
        for i in 0..3 {
            let (g_tx, g_rx) = oneshot::channel();
            gates.push(g_tx);
            queue.enqueue(gated(&format!("r{i}"), &format!("s{i}"), "main", tx.clone(), g_rx));
        }
        settle().await;

        assert_eq!(rx.recv().await.unwrap(), "r0");
        assert_eq!(rx.recv().await.unwrap(), "r1");
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.stats().pending, 1);
        assert_eq!(queue.stats().active["main"], 2);

        let _ = gates.remove(0).send(());
        assert_eq!(rx.recv().await.unwrap(), "r2");
    }

    #[tokio::test]
    async fn one_task_per_session() {
        let queue = LaneQueue::new([("main".to_string(), 4)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (g1, r1) = oneshot::channel();
        let (_g2, r2) = oneshot::channel();
        queue.enqueue(gated("first", "s1", "main", tx.clone(), r1));
        queue.enqueue(gated("second", "s1", "main", tx.clone(), r2));
        settle().await;

        assert_eq!(rx.recv().await.unwrap(), "first");
        assert!(rx.try_recv().is_err());
        assert!(queue.is_session_active(&key("s1")));

        let _ = g1.send(());
        assert_eq!(rx.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn blocked_session_does_not_block_later_tasks() {
        let queue = LaneQueue::new([("main".to_string(), 4)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_g1, r1) = oneshot::channel();
        let (_g2, r2) = oneshot::channel();
        let (_g3, r3) = oneshot::channel();
        queue.enqueue(gated("a1", "a", "main", tx.clone(), r1));
        queue.enqueue(gated("a2", "a", "main", tx.clone(), r2));
        queue.enqueue(gated("b1", "b", "main", tx.clone(), r3));
        settle().await;

        let mut started = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        started.sort();
        assert_eq!(started, vec!["a1", "b1"]);
        assert_eq!(queue.stats().pending, 1);
    }

    #[tokio::test]
    async fn session_exclusivity_spans_lanes() {
        let queue = LaneQueue::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_g1, r1) = oneshot::channel();
        let (_g2, r2) = oneshot::channel();
        queue.enqueue(gated("m", "shared", "main", tx.clone(), r1));
        queue.enqueue(gated("s", "shared", "subagent", tx.clone(), r2));
        settle().await;

        assert_eq!(rx.recv().await.unwrap(), "m");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_lane_defaults_to_one_and_zero_is_clamped() {
        let queue = LaneQueue::new([("zero".to_string(), 0)]);
        assert_eq!(queue.capacity("zero"), 1);
        assert_eq!(queue.capacity("never-configured"), 1);
        assert_eq!(LaneQueue::default().capacity(LANE_SUBAGENT), 4);
    }

    #[tokio::test]
    async fn panicking_task_releases_its_slot() {
        let queue = LaneQueue::new([("main".to_string(), 1)]);
        let explode = true;
        queue.enqueue(QueueTask::new("boom", key("s1"), "main", move || async move {
            if explode {
                panic!("tool blew up");
            }
            Ok(())
        }));

        let ran = Arc::new(AtomicUsize::new(0));
        let seen = ran.clone();
        queue.enqueue(QueueTask::new("next", key("s1"), "main", move || async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        for _ in 0..50 {
            if ran.load(Ordering::SeqCst) == 1 {
                break;
            }
            settle().await;
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        settle().await;
        assert!(!queue.is_session_active(&key("s1")));
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[tokio::test]
    async fn failing_task_releases_its_slot() {
        let queue = LaneQueue::new([("main".to_string(), 1)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.enqueue(QueueTask::new("err", key("s1"), "main", || async { Err("model down".to_string()) }));
        let (g, r) = oneshot::channel();
        queue.enqueue(gated("after", "s1", "main", tx, r));

        assert_eq!(rx.recv().await.unwrap(), "after");
        let _ = g.send(());
    }
}
