use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often a believed leader broadcasts a HEARTBEAT.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(750);

/// How long a follower waits without a heartbeat before starting an
/// election. `reset_heartbeat_timeout` always jitters this with
/// `HEARTBEAT_TIMEOUT + random(0, HEARTBEAT_TIMEOUT)` to desynchronize
/// simultaneous elections.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(750 * 3);

/// Picks a randomized heartbeat-timeout deadline: `HEARTBEAT_TIMEOUT +
/// random(0, HEARTBEAT_TIMEOUT)`.
pub fn jittered_heartbeat_timeout() -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=HEARTBEAT_TIMEOUT.as_millis() as u64);
    HEARTBEAT_TIMEOUT + Duration::from_millis(jitter_ms)
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u64,
    deadline: Instant,
}

impl Slot {
    fn armed_now() -> Self {
        Self { generation: 0, deadline: Instant::now() }
    }
}

struct Slots {
    heartbeat_timeout: Slot,
    send_heartbeat: Slot,
}

/// The two per-node timers: `heartbeat_timeout_timer` and
/// `send_heartbeat_timer`. Both slots share one mutex, so concurrent resets
/// can't race to leave two timers live; each slot gets its own [`Notify`]
/// purely as a wakeup signal for the task driving it.
pub struct Timers {
    slots: Mutex<Slots>,
    heartbeat_timeout_notify: Notify,
    send_heartbeat_notify: Notify,
}

impl Timers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(Slots {
                heartbeat_timeout: Slot::armed_now(),
                send_heartbeat: Slot::armed_now(),
            }),
            heartbeat_timeout_notify: Notify::new(),
            send_heartbeat_notify: Notify::new(),
        })
    }

    /// Cancels any pending heartbeat-timeout fire and arms a new one,
    /// atomically with respect to the driving task (see `spawn_*`: a
    /// fired-but-stale generation is suppressed rather than acted on).
    pub fn reset_heartbeat_timeout(&self, after: Duration) {
        {
            let mut slots = self.slots.lock();
            slots.heartbeat_timeout.generation += 1;
            slots.heartbeat_timeout.deadline = Instant::now() + after;
        }
        self.heartbeat_timeout_notify.notify_one();
    }

    /// Cancels any pending heartbeat-send fire and arms a new one.
    pub fn reset_send_heartbeat(&self, after: Duration) {
        {
            let mut slots = self.slots.lock();
            slots.send_heartbeat.generation += 1;
            slots.send_heartbeat.deadline = Instant::now() + after;
        }
        self.send_heartbeat_notify.notify_one();
    }

    /// Drives the heartbeat-timeout timer: calls `on_fire` every time the
    /// armed deadline elapses without an intervening `reset`. `on_fire`
    /// typically re-arms the timer itself before returning.
    pub fn spawn_heartbeat_timeout<F, Fut>(self: &Arc<Self>, on_fire: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let (generation, deadline) = {
                    let slots = this.slots.lock();
                    (slots.heartbeat_timeout.generation, slots.heartbeat_timeout.deadline)
                };
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        let still_current = this.slots.lock().heartbeat_timeout.generation == generation;
                        if still_current {
                            on_fire().await;
                        }
                    }
                    _ = this.heartbeat_timeout_notify.notified() => {}
                }
            }
        })
    }

    /// Drives the heartbeat-send timer; same generation-suppression
    /// discipline as [`Self::spawn_heartbeat_timeout`].
    pub fn spawn_send_heartbeat<F, Fut>(self: &Arc<Self>, on_fire: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let (generation, deadline) = {
                    let slots = this.slots.lock();
                    (slots.send_heartbeat.generation, slots.send_heartbeat.deadline)
                };
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        let still_current = this.slots.lock().send_heartbeat.generation == generation;
                        if still_current {
                            on_fire().await;
                        }
                    }
                    _ = this.send_heartbeat_notify.notified() => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_deadline() {
        let timers = Timers::new();
        let fires = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fires);
        let _handle = timers.spawn_heartbeat_timeout(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        timers.reset_heartbeat_timeout(Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_before_deadline_suppresses_the_stale_fire() {
        let timers = Timers::new();
        let fires = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fires);
        let _handle = timers.spawn_heartbeat_timeout(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        timers.reset_heartbeat_timeout(Duration::from_millis(50));
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        // Reset again before the first deadline would have elapsed.
        timers.reset_heartbeat_timeout(Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(45)).await;
        tokio::task::yield_now().await;
        assert_eq!(fires.load(Ordering::SeqCst), 0, "stale deadline must not fire");

        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }
}
