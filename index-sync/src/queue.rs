//! In-process event queue between the change detector and the coordinator.
//!
//! - Coalescing: a later event for a path replaces the unconsumed earlier
//!   one and keeps its queue position.
//! - Per-path exclusivity: a path handed out in a [`Lease`] is not handed
//!   out again until that lease is dropped. Events arriving meanwhile wait
//!   behind it, so per-path order is preserved.
//! - Unbounded: the coordinator is the bottleneck and nothing is dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use sync_common::{ChangeEvent, ChangeKind};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct QueueState {
    order: VecDeque<String>,
    pending: HashMap<String, ChangeEvent>,
    leased: HashSet<String>,
    closed: bool,
}

#[derive(Default)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl EventQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues an event, coalescing with any unconsumed event for the same path.
    pub fn push(&self, event: ChangeEvent) {
        {
            let mut st = self.lock();
            if st.closed {
                return;
            }
            match st.pending.get_mut(&event.path) {
                Some(prev) => {
                    trace!(
                        target: "index_sync::queue",
                        path = %event.path,
                        from = ?prev.kind,
                        to = ?event.kind,
                        "coalesced"
                    );
                    *prev = event;
                }
                None => {
                    st.order.push_back(event.path.clone());
                    st.pending.insert(event.path.clone(), event);
                }
            }
        }
        self.notify.notify_waiters();
    }

    pub fn push_path(&self, path: impl Into<String>, kind: ChangeKind) {
        self.push(ChangeEvent::new(path, kind));
    }

    /// Waits for the next event whose path is not leased.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn recv(self: &Arc<Self>) -> Option<Lease> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.lock();
                if st.closed {
                    return None;
                }
                if let Some(event) = Self::take_next(&mut st) {
                    return Some(Lease {
                        queue: Arc::clone(self),
                        event,
                    });
                }
            }

            notified.await;
        }
    }

    fn take_next(st: &mut QueueState) -> Option<ChangeEvent> {
        let pos = st.order.iter().position(|p| !st.leased.contains(p))?;
        let path = st.order.remove(pos)?;
        let event = st.pending.remove(&path)?;
        st.leased.insert(path);
        Some(event)
    }

    /// Events waiting to be consumed.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events waiting plus events being processed.
    pub fn outstanding(&self) -> usize {
        let st = self.lock();
        st.pending.len() + st.leased.len()
    }

    /// Wakes every consumer with `None`; later pushes are ignored.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn release(&self, path: &str) {
        self.lock().leased.remove(path);
        self.notify.notify_waiters();
    }
}

/// Exclusive hold on one path's next event. Dropping it lets the next event
/// for the same path through.
pub struct Lease {
    queue: Arc<EventQueue>,
    event: ChangeEvent,
}

impl Lease {
    pub fn event(&self) -> &ChangeEvent {
        &self.event
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.queue.release(&self.event.path);
    }
}
