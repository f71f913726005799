//! Counting gate with two priority classes.
//!
//! A released permit is handed directly to the oldest `High` waiter, then the
//! oldest `Low` waiter; it only returns to the free count when nobody waits.
//! Waiters that give up (timeout or dropped future) withdraw from the queue,
//! and a permit granted concurrently with the withdrawal is passed on.

use remora_core::Priority;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::time::Instant;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct GateState {
    available: usize,
    high: VecDeque<Waiter>,
    low: VecDeque<Waiter>,
    next_id: u64,
}

pub(crate) struct PriorityGate {
    limit: usize,
    state: Mutex<GateState>,
}

/// One unit of gate capacity; returned on drop.
pub(crate) struct GatePermit {
    gate: Arc<PriorityGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// A queued acquisition. Withdraws itself if dropped before completing.
struct Pending<'a> {
    gate: &'a Arc<PriorityGate>,
    id: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled && self.gate.withdraw(self.id, &mut self.rx) {
            self.gate.release();
        }
    }
}

impl PriorityGate {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        let limit = limit.max(1);
        Arc::new(Self {
            limit,
            state: Mutex::new(GateState {
                available: limit,
                high: VecDeque::new(),
                low: VecDeque::new(),
                next_id: 0,
            }),
        })
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently handed out.
    pub(crate) fn in_use(&self) -> usize {
        self.limit - self.lock().available
    }

    /// Callers currently queued.
    pub(crate) fn waiting(&self) -> usize {
        let st = self.lock();
        st.high.len() + st.low.len()
    }

    /// Wait for a permit until `deadline`. `None` on timeout.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        priority: Priority,
        deadline: Instant,
    ) -> Option<GatePermit> {
        let mut pending = {
            let mut st = self.lock();
            if st.available > 0 {
                st.available -= 1;
                return Some(GatePermit { gate: self.clone() });
            }
            let (tx, rx) = oneshot::channel();
            let id = st.next_id;
            st.next_id += 1;
            let waiter = Waiter { id, tx };
            match priority {
                Priority::High => st.high.push_back(waiter),
                Priority::Low => st.low.push_back(waiter),
            }
            Pending {
                gate: self,
                id,
                rx,
                settled: false,
            }
        };

        let outcome = tokio::time::timeout_at(deadline, &mut pending.rx).await;
        pending.settled = true;
        match outcome {
            Ok(Ok(())) => Some(GatePermit { gate: self.clone() }),
            Ok(Err(_)) => None,
            Err(_) => {
                if self.withdraw(pending.id, &mut pending.rx) {
                    Some(GatePermit { gate: self.clone() })
                } else {
                    None
                }
            }
        }
    }

    /// Remove a waiter. Returns `true` if a permit had already been granted
    /// to it, in which case the caller now owns that permit.
    fn withdraw(&self, id: u64, rx: &mut oneshot::Receiver<()>) -> bool {
        let mut st = self.lock();
        let queued = Self::remove_waiter(&mut st.high, id) || Self::remove_waiter(&mut st.low, id);
        drop(st);
        if queued {
            return false;
        }
        rx.try_recv().is_ok()
    }

    fn remove_waiter(queue: &mut VecDeque<Waiter>, id: u64) -> bool {
        match queue.iter().position(|w| w.id == id) {
            Some(idx) => {
                queue.remove(idx);
                true
            }
            None => false,
        }
    }

    fn release(&self) {
        let mut st = self.lock();
        loop {
            let next = match st.high.pop_front() {
                Some(w) => Some(w),
                None => st.low.pop_front(),
            };
            match next {
                Some(waiter) => {
                    if waiter.tx.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    st.available = (st.available + 1).min(self.limit);
                    return;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn permits_are_bounded_and_returned() {
        let gate = PriorityGate::new(2);
        let a = gate.acquire(Priority::Low, soon(10)).await.unwrap();
        let _b = gate.acquire(Priority::Low, soon(10)).await.unwrap();
        assert_eq!(gate.in_use(), 2);
        assert!(gate.acquire(Priority::High, soon(20)).await.is_none());
        assert_eq!(gate.waiting(), 0);

        drop(a);
        assert_eq!(gate.in_use(), 1);
        assert!(gate.acquire(Priority::Low, soon(10)).await.is_some());
    }

    #[tokio::test]
    async fn high_priority_is_served_first() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(Priority::Low, soon(10)).await.unwrap();

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut tasks = Vec::new();
        for (label, prio) in [("low-1", Priority::Low), ("low-2", Priority::Low), ("high", Priority::High)] {
            let g = gate.clone();
            let tx = order_tx.clone();
            tasks.push(tokio::spawn(async move {
                let permit = g.acquire(prio, soon(5_000)).await.unwrap();
                tx.send(label).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(permit);
            }));
            // Make queue order deterministic.
            while gate.waiting() < tasks.len() {
                tokio::task::yield_now().await;
            }
        }
        drop(held);
        for t in tasks {
            t.await.unwrap();
        }
        let mut order = Vec::new();
        while let Ok(label) = order_rx.try_recv() {
            order.push(label);
        }
        assert_eq!(order, vec!["high", "low-1", "low-2"]);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_leak_a_permit() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(Priority::Low, soon(10)).await.unwrap();

        let g = gate.clone();
        let waiter = tokio::spawn(async move { g.acquire(Priority::Low, soon(60_000)).await.map(|_| ()) });
        while gate.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(gate.waiting(), 0);

        drop(held);
        assert_eq!(gate.in_use(), 0);
    }
}
