use dashmap::{DashMap, mapref::entry::Entry};
use log::trace;
use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use import_cost_core::CostError;

/// One pass over a file. Later runs get larger ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(u64);

/// Last-writer-wins guard keyed by request location.
///
/// A key is held by the newest run that issued a token for it. Issuing from a
/// newer run invalidates the tokens of every earlier run for that key, while
/// tokens of the same run stay valid together, so two imports sharing a line
/// do not cancel each other. A guarded computation waits out the delay and
/// only runs if its token is still current; a token superseded while the
/// computation runs discards the result.
pub struct Debouncer {
    delay: Duration,
    holders: DashMap<String, Holder>,
    counter: AtomicU64,
}

struct Holder {
    run: RunId,
    outstanding: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceToken {
    key: String,
    run: RunId,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, holders: DashMap::new(), counter: AtomicU64::new(0) }
    }

    pub fn begin_run(&self) -> RunId {
        RunId(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn issue(&self, key: &str, run: RunId) -> DebounceToken {
        let mut holder =
            self.holders.entry(key.to_string()).or_insert(Holder { run, outstanding: 0 });
        if run > holder.run {
            trace!("Run {:?} takes over {} from run {:?}", run, key, holder.run);
            *holder = Holder { run, outstanding: 0 };
        }
        if run == holder.run {
            holder.outstanding += 1;
        }
        trace!("Issued debounce token for {} in run {:?}", key, run);
        DebounceToken { key: key.to_string(), run }
    }

    pub fn is_current(&self, token: &DebounceToken) -> bool {
        self.holders.get(&token.key).is_some_and(|h| h.run == token.run)
    }

    pub async fn run<T, F>(&self, token: DebounceToken, work: F) -> Result<T, CostError>
    where
        F: Future<Output = Result<T, CostError>>,
    {
        tokio::time::sleep(self.delay).await;
        if !self.is_current(&token) {
            trace!("Run {:?} for {} superseded before start", token.run, token.key);
            return Err(CostError::Debounced);
        }

        let result = work.await;
        if !self.is_current(&token) {
            trace!("Run {:?} for {} superseded while running", token.run, token.key);
            return Err(CostError::Debounced);
        }
        self.release(&token);
        result
    }

    fn release(&self, token: &DebounceToken) {
        if let Entry::Occupied(mut holder) = self.holders.entry(token.key.clone())
            && holder.get().run == token.run
        {
            let outstanding = &mut holder.get_mut().outstanding;
            *outstanding = outstanding.saturating_sub(1);
            if *outstanding == 0 {
                holder.remove();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_single_request_runs() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let token = debouncer.issue("a.js#1", debouncer.begin_run());
        assert_eq!(debouncer.run(token, async { Ok(7) }).await, Ok(7));
        assert!(debouncer.holders.is_empty());
    }

    #[tokio::test]
    async fn test_newer_run_supersedes() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let (old, new) = (debouncer.begin_run(), debouncer.begin_run());
        let first = debouncer.issue("a.js#1", old);
        let second = debouncer.issue("a.js#1", new);
        let other = debouncer.issue("a.js#2", old);

        let (a, b, c) = tokio::join!(
            debouncer.run(first, async { Ok(1) }),
            debouncer.run(second, async { Ok(2) }),
            debouncer.run(other, async { Ok(3) }),
        );
        assert_eq!(a, Err(CostError::Debounced));
        assert_eq!(b, Ok(2));
        assert_eq!(c, Ok(3));
    }

    #[tokio::test]
    async fn test_older_run_issued_late_is_stale() {
        let debouncer = Debouncer::new(Duration::ZERO);
        let (old, new) = (debouncer.begin_run(), debouncer.begin_run());
        let current = debouncer.issue("a.js#1", new);
        let late = debouncer.issue("a.js#1", old);

        assert!(!debouncer.is_current(&late));
        assert_eq!(debouncer.run(late, async { Ok(1) }).await, Err(CostError::Debounced));
        assert_eq!(debouncer.run(current, async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn test_same_run_shares_key() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let run = debouncer.begin_run();
        let first = debouncer.issue("a.js#1", run);
        let second = debouncer.issue("a.js#1", run);

        let (a, b) = tokio::join!(
            debouncer.run(first, async { Ok(1) }),
            debouncer.run(second, async { Ok(2) }),
        );
        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert!(debouncer.holders.is_empty());
    }

    #[tokio::test]
    async fn test_superseded_while_running() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(5)));
        let token = debouncer.issue("a.js#1", debouncer.begin_run());
        let inner = Arc::clone(&debouncer);
        let result = debouncer
            .run(token, async move {
                inner.issue("a.js#1", inner.begin_run());
                Ok(1)
            })
            .await;
        assert_eq!(result, Err(CostError::Debounced));
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let debouncer = Debouncer::new(Duration::ZERO);
        let token = debouncer.issue("a.js#1", debouncer.begin_run());
        let result: Result<(), _> =
            debouncer.run(token, async { Err(CostError::bundle("boom")) }).await;
        assert_eq!(result, Err(CostError::bundle("boom")));
    }
}
