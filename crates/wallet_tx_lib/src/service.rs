use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// One periodic sweep of a controller. Implementations log and swallow their own
/// errors so the worker keeps rescheduling.
#[async_trait]
pub trait PollTarget: Send + Sync {
    fn name(&self) -> &str;
    async fn poll_once(&self);

    /// Interval read before every sleep, overriding the one the worker was started with.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }
}

#[derive(Default, Debug)]
struct GuardState {
    running: bool,
    refresh_requested: bool,
}

/// Bounds a controller to one sweep at a time. A request arriving mid-sweep is
/// remembered and served by exactly one extra sweep.
#[derive(Default, Debug)]
pub struct PollGuard {
    state: Mutex<GuardState>,
}

impl PollGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the caller now owns the sweep.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.running {
            state.refresh_requested = true;
            false
        } else {
            state.running = true;
            true
        }
    }

    /// `true` when a refresh was requested during the sweep; the caller keeps
    /// ownership and must sweep again.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.refresh_requested {
            state.refresh_requested = false;
            true
        } else {
            state.running = false;
            false
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).running
    }
}

/// Runs sweeps until no refresh is pending. Returns the number of sweeps run, zero
/// when another sweep was already in progress.
pub async fn sweep(target: &dyn PollTarget, guard: &PollGuard) -> usize {
    if !guard.try_begin() {
        log::debug!("{}: sweep in progress, refresh queued", target.name());
        return 0;
    }
    let mut runs = 0;
    loop {
        target.poll_once().await;
        runs += 1;
        if !guard.finish() {
            break;
        }
        log::debug!("{}: running queued refresh", target.name());
    }
    runs
}

/// Wakes a poll worker before its interval elapses.
#[derive(Clone, Default)]
pub struct PollTrigger {
    notify: Arc<Notify>,
}

impl PollTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Single worker per controller: sleep, sweep, reschedule.
pub fn run_poll_worker(
    target: Arc<dyn PollTarget>,
    guard: Arc<PollGuard>,
    trigger: PollTrigger,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!(
            "Starting poll worker {} with interval {:?}",
            target.name(),
            interval
        );
        loop {
            sweep(target.as_ref(), &guard).await;
            let interval = target.poll_interval().unwrap_or(interval);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = trigger.notified() => {
                    log::debug!("{}: refresh requested", target.name());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTarget {
        count: AtomicUsize,
        guard: Arc<PollGuard>,
        reenter: bool,
    }

    struct TunableTarget {
        count: AtomicUsize,
        interval: Mutex<Duration>,
    }

    #[async_trait]
    impl PollTarget for TunableTarget {
        fn name(&self) -> &str {
            "tunable"
        }

        async fn poll_once(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }

        fn poll_interval(&self) -> Option<Duration> {
            Some(*self.interval.lock().unwrap())
        }
    }

    #[async_trait]
    impl PollTarget for CountingTarget {
        fn name(&self) -> &str {
            "counting"
        }

        async fn poll_once(&self) {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            if self.reenter && n == 0 {
                // two requests during the first sweep coalesce into one rerun
                assert!(!self.guard.try_begin());
                assert!(!self.guard.try_begin());
            }
        }
    }

    #[test]
    fn test_guard_coalesces() {
        let guard = PollGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        assert!(!guard.try_begin());
        assert!(guard.finish());
        assert!(guard.is_running());
        assert!(!guard.finish());
        assert!(!guard.is_running());
        assert!(guard.try_begin());
    }

    #[tokio::test]
    async fn test_sweep_runs_one_extra_pass() {
        let guard = Arc::new(PollGuard::new());
        let target = CountingTarget {
            count: AtomicUsize::new(0),
            guard: guard.clone(),
            reenter: true,
        };
        assert_eq!(sweep(&target, &guard).await, 2);
        assert_eq!(target.count.load(Ordering::SeqCst), 2);
        assert!(!guard.is_running());

        let quiet = CountingTarget {
            count: AtomicUsize::new(0),
            guard: guard.clone(),
            reenter: false,
        };
        assert_eq!(sweep(&quiet, &guard).await, 1);
    }

    #[tokio::test]
    async fn test_sweep_skipped_while_running() {
        let guard = PollGuard::new();
        let target = CountingTarget {
            count: AtomicUsize::new(0),
            guard: Arc::new(PollGuard::new()),
            reenter: false,
        };
        assert!(guard.try_begin());
        assert_eq!(sweep(&target, &guard).await, 0);
        assert_eq!(target.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_follows_interval_changes() {
        let target = Arc::new(TunableTarget {
            count: AtomicUsize::new(0),
            interval: Mutex::new(Duration::from_millis(20)),
        });
        let handle = run_poll_worker(
            target.clone(),
            Arc::new(PollGuard::new()),
            PollTrigger::new(),
            Duration::from_secs(3600),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(target.count.load(Ordering::SeqCst) >= 3);

        *target.interval.lock().unwrap() = Duration::from_secs(3600);
        // a sleep already in progress still uses the old value
        tokio::time::sleep(Duration::from_millis(60)).await;
        let settled = target.count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(target.count.load(Ordering::SeqCst), settled);
        handle.abort();
    }
}
