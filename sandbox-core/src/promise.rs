//! One-shot broadcast primitive: many independent waiters each observe the
//! same completion result, whether they called `get()` before or after it
//! fired. Replaces the source's ad-hoc `MultiDeferred`.

use tokio::sync::oneshot;
use tokio::sync::Mutex;

enum State<T> {
    Pending(Vec<oneshot::Sender<T>>),
    Fired(T),
}

/// A value that can be waited on by any number of callers and is delivered
/// to all of them -- past and future -- exactly once it fires.
pub struct PromiseSet<T: Clone> {
    state: Mutex<State<T>>,
}

impl<T: Clone> Default for PromiseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> PromiseSet<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
        }
    }

    /// Returns the fired value, waiting for it to fire if necessary. Safe
    /// to call before or after `fire()`, and safe to call more than once.
    pub async fn get(&self) -> T {
        let rx = {
            let mut state = self.state.lock().await;
            match &mut *state {
                State::Fired(value) => return value.clone(),
                State::Pending(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };
        match rx.await {
            Ok(value) => value,
            // `fire()` always sends to every registered waiter before
            // dropping them, so a closed channel here would mean `fire()`
            // panicked mid-delivery -- a bug elsewhere, not a valid state
            // for this waiter to observe.
            Err(_) => unreachable!("PromiseSet sender dropped without firing"),
        }
    }

    /// Delivers `result` to every current waiter and records it for every
    /// future `get()` call. A second `fire()` is a silent no-op: the first
    /// result wins, matching "the `done` promise fires at most once".
    pub async fn fire(&self, result: T) {
        let mut state = self.state.lock().await;
        if matches!(&*state, State::Fired(_)) {
            return;
        }
        let waiters = match std::mem::replace(&mut *state, State::Fired(result.clone())) {
            State::Pending(waiters) => waiters,
            State::Fired(_) => unreachable!("checked above"),
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    pub async fn fired(&self) -> bool {
        matches!(&*self.state.lock().await, State::Fired(_))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn waiters_registered_before_fire_all_receive_the_result() {
        let promise = Arc::new(PromiseSet::<u32>::new());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let p = promise.clone();
            handles.push(tokio::spawn(async move { p.get().await }));
        }
        // Give the waiters a chance to register before firing.
        tokio::task::yield_now().await;
        promise.fire(42).await;
        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
    }

    #[tokio::test]
    async fn get_after_fire_resolves_immediately() {
        let promise = PromiseSet::<&'static str>::new();
        promise.fire("done").await;
        assert!(promise.fired().await);
        assert_eq!(promise.get().await, "done");
        assert_eq!(promise.get().await, "done");
    }

    #[tokio::test]
    async fn second_fire_is_a_no_op() {
        let promise = PromiseSet::<u32>::new();
        promise.fire(1).await;
        promise.fire(2).await;
        assert_eq!(promise.get().await, 1);
    }
}
