//! Idle-session detection.
//!
//! The `IdleTimer` arms two deadlines from the last observed user activity:
//! a warning shortly before the idle timeout and the idle timeout itself.
//! Activity arrives through an `ActivityBus`, which the embedding
//! environment feeds with pointer, keyboard, scroll and touch events.
//! Every event pushes both deadlines back to a full timeout from "now".
//!
//! States: `Stopped` → `Armed` → `WarningFired` → `IdleFired`. The timer
//! does not restart itself after the idle callback; call `start` again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use crate::config::SessionConfig;

/// Buffered activity events per listener before it starts lagging.
/// A lagging listener still counts the burst as activity.
const ACTIVITY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityEvent {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

/// Source of user activity. Clones share the same channel.
#[derive(Debug, Clone)]
pub struct ActivityBus {
    tx: broadcast::Sender<ActivityEvent>,
}

impl Default for ActivityBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(ACTIVITY_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Report an activity event. Returns the number of listeners notified.
    pub fn emit(&self, event: ActivityEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Stopped,
    /// Both deadlines pending
    Armed,
    /// Warning delivered, idle deadline pending
    WarningFired,
    IdleFired,
}

pub struct IdleTimer {
    idle_timeout: Duration,
    warning_lead: Duration,
    state_tx: Arc<watch::Sender<IdleState>>,
    state_rx: watch::Receiver<IdleState>,
    task: Option<JoinHandle<()>>,
}

impl IdleTimer {
    pub fn new(idle_timeout: Duration, warning_lead: Duration) -> Self {
        let (state_tx, state_rx) = watch::channel(IdleState::Stopped);
        Self {
            idle_timeout,
            warning_lead,
            state_tx: Arc::new(state_tx),
            state_rx,
            task: None,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.idle_timeout(), config.idle_warning_lead())
    }

    pub fn state(&self) -> IdleState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions, e.g. to show a "still there?" prompt
    pub fn subscribe_state(&self) -> watch::Receiver<IdleState> {
        self.state_rx.clone()
    }

    /// Delay from last activity to the warning, if the timeout leaves room for one
    pub fn warning_delay(&self) -> Option<Duration> {
        self.idle_timeout
            .checked_sub(self.warning_lead)
            .filter(|delay| !delay.is_zero())
    }

    /// Arm the timer without a warning callback.
    pub fn start<I>(&mut self, bus: &ActivityBus, on_idle: I)
    where
        I: FnOnce() + Send + 'static,
    {
        self.start_with_warning(bus, on_idle, || {});
    }

    /// Arm the timer. A running timer is stopped first, so its callbacks and
    /// listener are replaced rather than duplicated.
    ///
    /// Must be called within a tokio runtime.
    pub fn start_with_warning<I, W>(&mut self, bus: &ActivityBus, on_idle: I, on_warning: W)
    where
        I: FnOnce() + Send + 'static,
        W: FnMut() + Send + 'static,
    {
        self.stop();

        let deadlines = Deadlines {
            idle_timeout: self.idle_timeout,
            warning_delay: self.warning_delay(),
        };
        let activity = bus.subscribe();
        let state = Arc::clone(&self.state_tx);
        let armed_at = Instant::now();

        state.send_replace(IdleState::Armed);
        debug!(idle_timeout_secs = self.idle_timeout.as_secs(), "Idle timer armed");

        self.task = Some(tokio::spawn(run(
            activity, deadlines, armed_at, state, on_idle, on_warning,
        )));
    }

    /// Cancel pending callbacks and detach from the activity bus.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Idle timer stopped");
        }
        self.state_tx.send_replace(IdleState::Stopped);
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadlines {
    idle_timeout: Duration,
    warning_delay: Option<Duration>,
}

async fn run<I, W>(
    mut activity: broadcast::Receiver<ActivityEvent>,
    deadlines: Deadlines,
    mut last_activity: Instant,
    state: Arc<watch::Sender<IdleState>>,
    on_idle: I,
    mut on_warning: W,
) where
    I: FnOnce(),
    W: FnMut(),
{
    let mut warned = false;
    let mut bus_open = true;

    loop {
        // A deadline past what `Instant` can represent never fires
        let idle_at = last_activity.checked_add(deadlines.idle_timeout);
        let warning_at = deadlines
            .warning_delay
            .and_then(|delay| last_activity.checked_add(delay))
            .filter(|_| !warned);

        tokio::select! {
            // Activity wins ties with the deadlines
            biased;

            received = activity.recv(), if bus_open => {
                match received {
                    Ok(event) => trace!(?event, "Activity"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(skipped, "Activity listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // No more activity can arrive; the deadlines still run
                        debug!("Activity source closed");
                        bus_open = false;
                        continue;
                    }
                }
                last_activity = Instant::now();
                warned = false;
                state.send_replace(IdleState::Armed);
            }

            _ = sleep_until(warning_at.unwrap_or(last_activity)), if warning_at.is_some() => {
                warned = true;
                state.send_replace(IdleState::WarningFired);
                info!("Session idle warning");
                on_warning();
            }

            _ = sleep_until(idle_at.unwrap_or(last_activity)), if idle_at.is_some() => {
                state.send_replace(IdleState::IdleFired);
                info!("Session idle timeout reached");
                on_idle();
                return;
            }

            // Bus closed and nothing left that can fire
            else => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    const MINUTE: Duration = Duration::from_secs(60);

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Clone + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn timer(minutes: u64) -> IdleTimer {
        IdleTimer::new(MINUTE * minutes as u32, MINUTE * 2)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_fires_once_without_activity() {
        let bus = ActivityBus::new();
        let mut timer = timer(5);
        let (idle_count, on_idle) = counter();
        timer.start(&bus, on_idle);
        assert_eq!(timer.state(), IdleState::Armed);

        sleep(MINUTE * 5 - Duration::from_secs(1)).await;
        assert_eq!(idle_count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), IdleState::IdleFired);

        // Not self-restarting
        sleep(MINUTE * 20).await;
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_reschedules_idle() {
        let bus = ActivityBus::new();
        let mut timer = timer(5);
        let (idle_count, on_idle) = counter();
        timer.start(&bus, on_idle);

        sleep(MINUTE * 4).await;
        assert_eq!(bus.emit(ActivityEvent::KeyPress), 1);

        // Past the original 5 minute mark
        sleep(MINUTE * 2).await;
        assert_eq!(idle_count.load(Ordering::SeqCst), 0);

        // 5 minutes after the activity at minute 4
        sleep(MINUTE * 3 + Duration::from_secs(1)).await;
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_fires_before_idle_and_resets_on_activity() {
        let bus = ActivityBus::new();
        let mut timer = timer(5);
        let (idle_count, on_idle) = counter();
        let (warning_count, on_warning) = counter();
        timer.start_with_warning(&bus, on_idle, on_warning);

        sleep(MINUTE * 3 + Duration::from_secs(1)).await;
        assert_eq!(warning_count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), IdleState::WarningFired);

        bus.emit(ActivityEvent::PointerMove);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(timer.state(), IdleState::Armed);

        // Warning re-arms for the new window
        sleep(MINUTE * 3).await;
        assert_eq!(warning_count.load(Ordering::SeqCst), 2);
        assert_eq!(idle_count.load(Ordering::SeqCst), 0);

        sleep(MINUTE * 2).await;
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_warning_when_timeout_shorter_than_lead() {
        let bus = ActivityBus::new();
        let mut timer = timer(2);
        assert_eq!(timer.warning_delay(), None);

        let (idle_count, on_idle) = counter();
        let (warning_count, on_warning) = counter();
        timer.start_with_warning(&bus, on_idle, on_warning);

        sleep(MINUTE * 2 + Duration::from_secs(1)).await;
        assert_eq!(warning_count.load(Ordering::SeqCst), 0);
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_callbacks_and_detaches() {
        let bus = ActivityBus::new();
        let mut timer = timer(5);
        let (idle_count, on_idle) = counter();
        timer.start(&bus, on_idle);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(bus.listener_count(), 1);

        timer.stop();
        assert_eq!(timer.state(), IdleState::Stopped);

        sleep(MINUTE * 10).await;
        assert_eq!(idle_count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_callbacks() {
        let bus = ActivityBus::new();
        let mut timer = timer(5);
        let (first_count, first) = counter();
        let (second_count, second) = counter();

        timer.start(&bus, first);
        timer.start(&bus, second);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(bus.listener_count(), 1);

        sleep(MINUTE * 5).await;
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_still_fires_after_bus_closed() {
        let mut timer = timer(5);
        let (idle_count, on_idle) = counter();
        let (warning_count, on_warning) = counter();
        {
            let bus = ActivityBus::new();
            timer.start_with_warning(&bus, on_idle, on_warning);
        }

        sleep(MINUTE * 4).await;
        assert_eq!(warning_count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), IdleState::WarningFired);

        sleep(MINUTE * 6).await;
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), IdleState::IdleFired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_never_fires() {
        let bus = ActivityBus::new();
        let mut timer = IdleTimer::new(Duration::MAX, MINUTE * 2);
        let (idle_count, on_idle) = counter();
        let (warning_count, on_warning) = counter();
        timer.start_with_warning(&bus, on_idle, on_warning);

        sleep(MINUTE * 60).await;
        assert_eq!(timer.state(), IdleState::Armed);
        assert_eq!(idle_count.load(Ordering::SeqCst), 0);
        assert_eq!(warning_count.load(Ordering::SeqCst), 0);

        // Still listening, so stop has something to detach
        assert_eq!(bus.listener_count(), 1);
        assert_eq!(bus.emit(ActivityEvent::Scroll), 1);
        timer.stop();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_configured_timeout_is_scheduled() {
        let config = SessionConfig {
            idle_timeout_minutes: u64::MAX / 120,
            ..SessionConfig::default()
        };
        let bus = ActivityBus::new();
        let mut timer = IdleTimer::from_config(&config);
        let (idle_count, on_idle) = counter();
        timer.start(&bus, on_idle);

        sleep(MINUTE * 60).await;
        assert_eq!(timer.state(), IdleState::Armed);
        assert_eq!(idle_count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 1);
    }
}
