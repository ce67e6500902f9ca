//! One-shot software timers with millisecond resolution.
//!
//! The engine arms one reassembly timer per receiving context and stops
//! it before the context is released. [`TokioTimers`] drives callbacks
//! from a background task over a [`tokio_util::time::DelayQueue`];
//! [`ManualTimers`] records armed timers so tests can fire them
//! deterministically.

use rustc_hash::FxHashMap;
use std::future::poll_fn;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::time::delay_queue::{DelayQueue, Key};

/// Handle to a running timer.
pub type TimerId = u64;

/// The closure invoked when a timer expires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// A source of one-shot timers.
pub trait TimerService: Send + Sync {
    /// Arms a timer that invokes `callback` once after `after`.
    fn start(&self, after: Duration, callback: TimerCallback) -> TimerId;

    /// Stops a running timer. Stopping an already-expired or unknown
    /// timer is a no-op.
    fn stop(&self, id: TimerId);
}

enum Command {
    Start {
        id: TimerId,
        after: Duration,
        callback: TimerCallback,
    },
    Stop {
        id: TimerId,
    },
}

/// Timers driven by the tokio runtime.
pub struct TokioTimers {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
}

impl TokioTimers {
    /// Spawns the driver task on the current runtime.
    pub fn new() -> Arc<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::drive(receiver));
        Arc::new(Self {
            commands,
            next_id: AtomicU64::new(1),
        })
    }

    async fn drive(mut receiver: mpsc::UnboundedReceiver<Command>) {
        let mut queue: DelayQueue<(TimerId, TimerCallback)> = DelayQueue::new();
        let mut keys: FxHashMap<TimerId, Key> = FxHashMap::default();
        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Start { id, after, callback }) => {
                        let key = queue.insert((id, callback), after);
                        keys.insert(id, key);
                    }
                    Some(Command::Stop { id }) => {
                        if let Some(key) = keys.remove(&id) {
                            queue.remove(&key);
                        }
                    }
                    None => break,
                },
                expired = poll_fn(|cx| queue.poll_expired(cx)), if !queue.is_empty() => {
                    if let Some(expired) = expired {
                        let (id, callback) = expired.into_inner();
                        keys.remove(&id);
                        callback();
                    }
                }
            }
        }
    }
}

impl TimerService for TokioTimers {
    fn start(&self, after: Duration, callback: TimerCallback) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // The driver task only goes away when the service is dropped, at
        // which point expiry no longer matters.
        let _ = self.commands.send(Command::Start {
            id,
            after,
            callback,
        });
        id
    }

    fn stop(&self, id: TimerId) {
        let _ = self.commands.send(Command::Stop { id });
    }
}

/// A timer service that never fires on its own. Tests arm timers through
/// the engine and expire them explicitly with [`ManualTimers::fire`].
#[derive(Default)]
pub struct ManualTimers {
    armed: Mutex<FxHashMap<TimerId, (Duration, TimerCallback)>>,
    next_id: AtomicU64,
}

impl ManualTimers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            armed: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Ids of the timers currently armed, in no particular order.
    pub fn armed(&self) -> Vec<TimerId> {
        self.armed.lock().unwrap().keys().copied().collect()
    }

    /// The duration the given timer was armed with.
    pub fn duration(&self, id: TimerId) -> Option<Duration> {
        self.armed.lock().unwrap().get(&id).map(|(d, _)| *d)
    }

    /// Expires the given timer now. Returns false when no such timer is
    /// armed.
    pub fn fire(&self, id: TimerId) -> bool {
        let callback = self.armed.lock().unwrap().remove(&id);
        match callback {
            Some((_, callback)) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl TimerService for ManualTimers {
    fn start(&self, after: Duration, callback: TimerCallback) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.armed.lock().unwrap().insert(id, (after, callback));
        id
    }

    fn stop(&self, id: TimerId) {
        self.armed.lock().unwrap().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn manual_fire_and_stop() {
        let timers = ManualTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        let a = timers.start(
            Duration::from_secs(60),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let f = fired.clone();
        let b = timers.start(
            Duration::from_secs(60),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        timers.stop(a);
        assert!(!timers.fire(a));
        assert!(timers.fire(b));
        assert!(!timers.fire(b));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_fires_once() {
        let timers = TokioTimers::new();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        timers.start(
            Duration::from_millis(500),
            Box::new(move || {
                let _ = sender.send(());
            }),
        );
        tokio::time::sleep(Duration::from_millis(600)).await;
        receiver.recv().await.unwrap();
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_stop_cancels() {
        let timers = TokioTimers::new();
        let (sender, mut receiver) = mpsc::unbounded_channel::<()>();
        let id = timers.start(
            Duration::from_millis(500),
            Box::new(move || {
                let _ = sender.send(());
            }),
        );
        timers.stop(id);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(receiver.try_recv().is_err());
    }
}
