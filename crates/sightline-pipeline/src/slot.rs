//! Keep-latest hand-off between the frame source and the worker.
//!
//! A one-slot channel. Offering while an item waits pulls the stale item back
//! out and drops it on the offering thread, so a superseded frame releases its
//! capture buffer right away. Every item handed to the worker comes with a
//! [`Held`] guard; `close` waits for outstanding guards before returning.

use std::sync::{Condvar, Mutex, MutexGuard};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The slot was empty.
    Accepted,
    /// A waiting item was replaced and dropped.
    Superseded,
    /// The slot is closed; the offered item was dropped.
    Closed,
}

struct State<T> {
    // `None` once closed.
    tx: Option<Sender<T>>,
    // Items sent and not yet dropped or given up by the worker.
    outstanding: usize,
}

pub struct LatestSlot<T> {
    rx: Receiver<T>,
    state: Mutex<State<T>>,
    settled: Condvar,
}

/// Marks an item taken from the slot as still in the worker's hands.
/// Dropping it lets a pending `close` return.
pub struct Held<'a, T> {
    slot: &'a LatestSlot<T>,
}

impl<T> Drop for Held<'_, T> {
    fn drop(&mut self) {
        self.slot.settle(1);
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            rx,
            state: Mutex::new(State {
                tx: Some(tx),
                outstanding: 0,
            }),
            settled: Condvar::new(),
        }
    }

    // A panic while holding the lock cannot leave `State` half-written.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle(&self, n: usize) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(n);
        if state.outstanding == 0 {
            self.settled.notify_all();
        }
    }

    pub fn offer(&self, item: T) -> Offer {
        let mut displaced = None;
        let outcome = {
            let mut state = self.lock();
            let Some(tx) = state.tx.clone() else {
                drop(state);
                drop(item);
                return Offer::Closed;
            };
            let mut item = item;
            loop {
                match tx.try_send(item) {
                    Ok(()) => break,
                    Err(TrySendError::Full(back)) => {
                        item = back;
                        // The worker may take the waiting item first; then the retry lands.
                        if let Ok(stale) = self.rx.try_recv() {
                            displaced = Some(stale);
                        }
                    }
                    Err(TrySendError::Disconnected(back)) => {
                        drop(state);
                        drop(back);
                        return Offer::Closed;
                    }
                }
            }
            if displaced.is_some() {
                Offer::Superseded
            } else {
                state.outstanding += 1;
                Offer::Accepted
            }
        };
        drop(displaced);
        outcome
    }

    /// Block until an item is available. `None` once the slot is closed.
    pub fn take(&self) -> Option<(T, Held<'_, T>)> {
        let item = self.rx.recv().ok()?;
        let held = Held { slot: self };
        if self.lock().tx.is_none() {
            drop(item);
            return None;
        }
        Some((item, held))
    }

    /// Close the slot, drop any waiting item, and wait until the worker has
    /// given up the item it holds.
    pub fn close(&self) {
        let pending: Vec<T> = {
            let mut state = self.lock();
            state.tx = None;
            self.rx.try_iter().collect()
        };
        let drained = pending.len();
        drop(pending);
        self.settle(drained);

        let mut state = self.lock();
        while state.outstanding > 0 {
            state = self
                .settled
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct Tracked(Arc<Mutex<Vec<u32>>>, u32);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.lock().unwrap().push(self.1);
        }
    }

    #[test]
    fn newest_offer_wins_and_displaced_items_drop_immediately() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let slot = LatestSlot::new();
        assert_eq!(slot.offer(Tracked(dropped.clone(), 1)), Offer::Accepted);
        assert_eq!(slot.offer(Tracked(dropped.clone(), 2)), Offer::Superseded);
        assert_eq!(slot.offer(Tracked(dropped.clone(), 3)), Offer::Superseded);
        assert_eq!(*dropped.lock().unwrap(), [1, 2]);

        let (item, held) = slot.take().unwrap();
        assert_eq!(item.1, 3);
        drop(item);
        drop(held);
        assert!(slot.rx.is_empty());
    }

    #[test]
    fn close_drops_pending_and_rejects_later_offers() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let slot = LatestSlot::new();
        slot.offer(Tracked(dropped.clone(), 7));
        slot.close();
        assert_eq!(*dropped.lock().unwrap(), [7]);

        assert_eq!(slot.offer(Tracked(dropped.clone(), 8)), Offer::Closed);
        assert_eq!(*dropped.lock().unwrap(), [7, 8]);
        assert!(slot.take().is_none());
    }

    #[test]
    fn take_wakes_on_offer_and_on_close() {
        let slot = Arc::new(LatestSlot::new());
        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.take().map(|(item, _held)| item))
        };
        thread::sleep(Duration::from_millis(20));
        slot.offer(5u32);
        assert_eq!(waiter.join().unwrap(), Some(5));

        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.take().map(|(item, _held)| item))
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn close_waits_for_the_held_item() {
        let slot = Arc::new(LatestSlot::new());
        let let_go = Arc::new(AtomicBool::new(false));
        let (taken_tx, taken_rx) = bounded(0);
        slot.offer(1u32);
        let worker = {
            let (slot, let_go) = (slot.clone(), let_go.clone());
            thread::spawn(move || {
                let (_item, held) = slot.take().unwrap();
                taken_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                let_go.store(true, Ordering::SeqCst);
                drop(held);
            })
        };
        taken_rx.recv().unwrap();
        slot.close();
        assert!(let_go.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
