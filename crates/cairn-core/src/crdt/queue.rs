use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Writing,
    Compacting,
}

#[derive(Debug)]
struct State {
    next_ticket: u64,
    serving: u64,
    /// Tickets whose holders gave up waiting.
    abandoned: BTreeSet<u64>,
    phase: Phase,
    /// A compaction holds or waits for a ticket.
    compaction_queued: bool,
}

/// FIFO single-writer queue for one engine instance.
///
/// Writers take a ticket and block until every earlier ticket has been
/// released or abandoned. At most one writer runs at a time, so `Writing`
/// and `Compacting` are mutually exclusive. Not re-entrant: acquiring again
/// while holding a [`QueueGuard`] on the same thread waits on itself until
/// the timeout.
#[derive(Debug)]
pub struct WriterQueue {
    state: Mutex<State>,
    turn: Condvar,
    timeout: Duration,
}

/// RAII guard for a writer's turn. Dropping it admits the next ticket.
#[derive(Debug)]
pub struct QueueGuard<'a> {
    queue: &'a WriterQueue,
}

impl WriterQueue {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                next_ticket: 0,
                serving: 0,
                abandoned: BTreeSet::new(),
                phase: Phase::Idle,
                compaction_queued: false,
            }),
            turn: Condvar::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Wait for a turn to write.
    ///
    /// # Errors
    ///
    /// [`Error::LockTimeout`] if the turn does not come within the timeout.
    pub fn write(&self) -> Result<QueueGuard<'_>> {
        self.enter(Phase::Writing, |_, waited| Error::LockTimeout { waited })
    }

    /// Wait for a turn to merge a remote head.
    ///
    /// # Errors
    ///
    /// [`Error::CompactionConflict`] if the wait timed out behind a running
    /// or queued compaction, [`Error::LockTimeout`] otherwise.
    pub fn merge(&self) -> Result<QueueGuard<'_>> {
        self.enter(Phase::Writing, |state, waited| {
            if state.phase == Phase::Compacting || state.compaction_queued {
                Error::CompactionConflict
            } else {
                Error::LockTimeout { waited }
            }
        })
    }

    /// Wait for a turn to compact. Returns `Ok(None)` without waiting when
    /// another compaction is already running or queued.
    ///
    /// # Errors
    ///
    /// [`Error::LockTimeout`] if the turn does not come within the timeout.
    pub fn compact(&self) -> Result<Option<QueueGuard<'_>>> {
        {
            let mut state = self.lock();
            if state.compaction_queued {
                debug!("compaction already in flight");
                return Ok(None);
            }
            state.compaction_queued = true;
        }
        match self.enter(Phase::Compacting, |_, waited| Error::LockTimeout { waited }) {
            Ok(guard) => Ok(Some(guard)),
            Err(err) => {
                self.lock().compaction_queued = false;
                Err(err)
            }
        }
    }

    fn enter(
        &self,
        phase: Phase,
        on_timeout: impl FnOnce(&State, Duration) -> Error,
    ) -> Result<QueueGuard<'_>> {
        let start = Instant::now();
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        while state.serving != ticket {
            let waited = start.elapsed();
            let Some(remaining) = self.timeout.checked_sub(waited).filter(|d| !d.is_zero())
            else {
                state.abandoned.insert(ticket);
                warn!(ticket, ?waited, phase = ?state.phase, "gave up waiting for writer queue");
                return Err(on_timeout(&state, waited));
            };
            state = self
                .turn
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        state.phase = phase;
        debug!(ticket, ?phase, waited = ?start.elapsed(), "entered writer queue");
        Ok(QueueGuard { queue: self })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        if state.phase == Phase::Compacting {
            state.compaction_queued = false;
        }
        state.phase = Phase::Idle;
        state.serving += 1;
        loop {
            let next = state.serving;
            if !state.abandoned.remove(&next) {
                break;
            }
            state.serving += 1;
        }
        drop(state);
        self.queue.turn.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guard_sets_and_clears_phase() {
        let queue = WriterQueue::new(Duration::from_secs(1));
        assert_eq!(queue.phase(), Phase::Idle);
        {
            let _guard = queue.write().unwrap();
            assert_eq!(queue.phase(), Phase::Writing);
        }
        assert_eq!(queue.phase(), Phase::Idle);
        let guard = queue.compact().unwrap();
        assert!(guard.is_some());
        assert_eq!(queue.phase(), Phase::Compacting);
    }

    #[test]
    fn waiting_writer_times_out() {
        let queue = WriterQueue::new(Duration::from_millis(20));
        let _held = queue.write().unwrap();
        let err = queue.write().unwrap_err();
        assert!(matches!(err, Error::LockTimeout { waited } if waited >= Duration::from_millis(20)));
    }

    #[test]
    fn merge_behind_compaction_conflicts() {
        let queue = WriterQueue::new(Duration::from_millis(20));
        let _compacting = queue.compact().unwrap().unwrap();
        assert!(matches!(queue.merge(), Err(Error::CompactionConflict)));
    }

    #[test]
    fn second_compaction_is_skipped() {
        let queue = WriterQueue::new(Duration::from_secs(1));
        let first = queue.compact().unwrap();
        assert!(first.is_some());
        assert!(queue.compact().unwrap().is_none());
        drop(first);
        assert!(queue.compact().unwrap().is_some());
    }

    #[test]
    fn abandoned_tickets_are_skipped() {
        let queue = WriterQueue::new(Duration::from_millis(20));
        let held = queue.write().unwrap();
        assert!(queue.write().is_err());
        drop(held);
        // The abandoned ticket must not block the next writer.
        let _next = queue.write().unwrap();
    }

    #[test]
    fn writers_are_served_in_ticket_order() {
        let queue = Arc::new(WriterQueue::new(Duration::from_secs(5)));
        let order = Arc::new(Mutex::new(Vec::new()));
        let held = queue.write().unwrap();

        let mut handles = Vec::new();
        for id in 0..4 {
            let thread_queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _guard = thread_queue.write().unwrap();
                order.lock().unwrap().push(id);
            }));
            // Let each thread take its ticket before spawning the next.
            while queue.lock().next_ticket < id + 2 {
                thread::yield_now();
            }
        }

        drop(held);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
