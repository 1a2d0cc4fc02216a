//! Config + state holder shared by every controller.
//!
//! State only changes through [`Observable::update`]; subscribers registered for a
//! key are invoked synchronously whenever that key changed.

use std::sync::{Mutex, MutexGuard};

/// Reports which top level keys differ between two snapshots.
pub trait ChangedKeys {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str>;
}

type Callback<S> = Box<dyn Fn(&S) + Send + Sync>;

struct Subscriber<S> {
    keys: Vec<&'static str>,
    callback: Callback<S>,
}

pub struct Observable<C, S> {
    config: Mutex<C>,
    state: Mutex<S>,
    state_subscribers: Mutex<Vec<Subscriber<S>>>,
    config_subscribers: Mutex<Vec<Subscriber<C>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<C, S> Observable<C, S>
where
    C: Clone + ChangedKeys,
    S: Clone + ChangedKeys,
{
    pub fn new(config: C, state: S) -> Self {
        Observable {
            config: Mutex::new(config),
            state: Mutex::new(state),
            state_subscribers: Mutex::new(Vec::new()),
            config_subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> S {
        lock(&self.state).clone()
    }

    pub fn config(&self) -> C {
        lock(&self.config).clone()
    }

    /// Subscribe to state changes. An empty `keys` list means every change.
    pub fn subscribe<F>(&self, keys: &[&'static str], callback: F)
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        lock(&self.state_subscribers).push(Subscriber {
            keys: keys.to_vec(),
            callback: Box::new(callback),
        });
    }

    pub fn subscribe_config<F>(&self, keys: &[&'static str], callback: F)
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        lock(&self.config_subscribers).push(Subscriber {
            keys: keys.to_vec(),
            callback: Box::new(callback),
        });
    }

    /// Merges a change into the state and notifies matching subscribers.
    /// Returns the keys that changed.
    pub fn update<F>(&self, f: F) -> Vec<&'static str>
    where
        F: FnOnce(&mut S),
    {
        let (changed, snapshot) = {
            let mut state = lock(&self.state);
            let previous = state.clone();
            f(&mut state);
            (state.changed_keys(&previous), state.clone())
        };
        notify(&self.state_subscribers, &changed, &snapshot);
        changed
    }

    pub fn configure<F>(&self, f: F) -> Vec<&'static str>
    where
        F: FnOnce(&mut C),
    {
        let (changed, snapshot) = {
            let mut config = lock(&self.config);
            let previous = config.clone();
            f(&mut config);
            (config.changed_keys(&previous), config.clone())
        };
        notify(&self.config_subscribers, &changed, &snapshot);
        changed
    }
}

fn notify<T>(subscribers: &Mutex<Vec<Subscriber<T>>>, changed: &[&'static str], snapshot: &T) {
    if changed.is_empty() {
        return;
    }
    for sub in lock(subscribers).iter() {
        if sub.keys.is_empty() || sub.keys.iter().any(|k| changed.contains(k)) {
            (sub.callback)(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct TestState {
        counter: u32,
        label: String,
    }

    impl ChangedKeys for TestState {
        fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
            let mut keys = Vec::new();
            if self.counter != previous.counter {
                keys.push("counter");
            }
            if self.label != previous.label {
                keys.push("label");
            }
            keys
        }
    }

    #[derive(Clone, Default)]
    struct TestConfig {
        interval: u64,
    }

    impl ChangedKeys for TestConfig {
        fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
            if self.interval != previous.interval {
                vec!["interval"]
            } else {
                vec![]
            }
        }
    }

    #[test]
    fn test_update_notifies_by_key() {
        let obs = Observable::new(TestConfig::default(), TestState::default());
        let counter_calls = Arc::new(AtomicUsize::new(0));
        let all_calls = Arc::new(AtomicUsize::new(0));
        {
            let counter_calls = counter_calls.clone();
            obs.subscribe(&["counter"], move |s| {
                assert!(s.counter > 0);
                counter_calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let all_calls = all_calls.clone();
            obs.subscribe(&[], move |_| {
                all_calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(obs.update(|s| s.counter += 1), vec!["counter"]);
        assert_eq!(obs.update(|s| s.label = "x".to_string()), vec!["label"]);
        // no change, no notification
        assert!(obs.update(|s| s.label = "x".to_string()).is_empty());

        assert_eq!(counter_calls.load(Ordering::SeqCst), 1);
        assert_eq!(all_calls.load(Ordering::SeqCst), 2);
        assert_eq!(obs.state().counter, 1);

        let config_calls = Arc::new(AtomicUsize::new(0));
        {
            let config_calls = config_calls.clone();
            obs.subscribe_config(&["interval"], move |_| {
                config_calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        obs.configure(|c| c.interval = 10);
        assert_eq!(config_calls.load(Ordering::SeqCst), 1);
        assert_eq!(obs.config().interval, 10);
    }
}
