use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Playback clock states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Playing,
    Paused,
}

/// A snapshot of the clock, shaped for the wire.
#[derive(Debug, Clone, Serialize)]
pub struct TimerStatus {
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_stopped: bool,
    pub time: f64,
}

type TickCallback = Arc<dyn Fn(f64) + Send + Sync>;

struct TimerInner {
    state: TimerState,
    time: f64,
    stop_tx: Option<mpsc::Sender<()>>,
    callbacks: Vec<TickCallback>,
}

/// A room's shared playback clock.
///
/// Ticks once per wall-second while `Playing`, incrementing `time` by
/// exactly 1 and invoking every registered callback, in registration
/// order, with the new value. The ticking task is spawned on the
/// transition into `Playing` and torn down via a bounded, capacity-one
/// stop channel rather than an abort handle, so a pause that races a tick
/// always lets the in-flight tick finish (and fire its callbacks) before
/// the ticker actually exits.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<Mutex<TimerInner>>,
    tick_period: Duration,
}

impl Timer {
    #[must_use]
    pub fn new(tick_period: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimerInner {
                state: TimerState::Stopped,
                time: 0.0,
                stop_tx: None,
                callbacks: Vec::new(),
            })),
            tick_period,
        }
    }

    pub fn on_tick<F>(&self, callback: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.inner.lock().callbacks.push(Arc::new(callback));
    }

    #[must_use]
    pub fn state(&self) -> TimerState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn time(&self) -> f64 {
        self.inner.lock().time
    }

    #[must_use]
    pub fn status(&self) -> TimerStatus {
        let inner = self.inner.lock();
        TimerStatus {
            is_playing: inner.state == TimerState::Playing,
            is_paused: inner.state == TimerState::Paused,
            is_stopped: inner.state == TimerState::Stopped,
            time: inner.time,
        }
    }

    /// Start (or resume) ticking. A no-op if already `Playing`.
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.state == TimerState::Playing {
            return;
        }
        inner.state = TimerState::Playing;
        let (tx, rx) = mpsc::channel(1);
        inner.stop_tx = Some(tx);
        drop(inner);
        self.spawn_ticker(rx);
    }

    /// Halt ticking, retaining the current time.
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.state != TimerState::Playing {
            return;
        }
        inner.state = TimerState::Paused;
        inner.stop_tx.take();
    }

    /// Halt ticking and reset time to zero.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.state = TimerState::Stopped;
        inner.time = 0.0;
        inner.stop_tx.take();
    }

    /// Replace `time` directly without changing `state`. Clamped to
    /// non-negative, enforcing the "requires `t >= 0`" precondition rather
    /// than rejecting an out-of-range caller.
    pub fn set(&self, time: f64) {
        self.inner.lock().time = time.max(0.0);
    }

    fn spawn_ticker(&self, mut stop_rx: mpsc::Receiver<()>) {
        let inner = Arc::clone(&self.inner);
        let period = self.tick_period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let (time, callbacks) = {
                            let mut guard = inner.lock();
                            if guard.state != TimerState::Playing {
                                return;
                            }
                            guard.time += 1.0;
                            (guard.time, guard.callbacks.clone())
                        };
                        for callback in &callbacks {
                            callback(time);
                        }
                    }
                    _ = stop_rx.recv() => return,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_advance_time_while_playing() {
        let timer = Timer::new(Duration::from_millis(10));
        timer.play();
        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;
        assert!(timer.time() > 0.0);
        assert_eq!(timer.state(), TimerState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_time() {
        let timer = Timer::new(Duration::from_millis(10));
        timer.play();
        tokio::time::advance(Duration::from_millis(25)).await;
        tokio::task::yield_now().await;
        timer.pause();
        let frozen = timer.time();
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        assert_eq!(timer.time(), frozen);
        assert_eq!(timer.state(), TimerState::Paused);
    }

    #[tokio::test]
    async fn play_is_idempotent() {
        let timer = Timer::new(Duration::from_millis(10));
        timer.play();
        timer.set(5.0);
        timer.play();
        assert_eq!(timer.time(), 5.0);
    }

    #[tokio::test]
    async fn stop_resets_time_and_state() {
        let timer = Timer::new(Duration::from_millis(10));
        timer.play();
        timer.set(42.0);
        timer.stop();
        assert_eq!(timer.time(), 0.0);
        assert_eq!(timer.state(), TimerState::Stopped);
    }

    #[test]
    fn set_clamps_negative_to_zero() {
        let timer = Timer::new(Duration::from_millis(10));
        timer.set(-5.0);
        assert_eq!(timer.time(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_run_in_registration_order() {
        let timer = Timer::new(Duration::from_millis(10));
        let order = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicU32::new(0));

        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            timer.on_tick(move |_| order.lock().push(tag));
        }
        timer.play();
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        count.fetch_add(1, Ordering::Relaxed);

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }
}
