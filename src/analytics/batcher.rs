//! Bounded, best-effort analytics queue with periodic and threshold flushing.

use super::connection::{ConnectionTracker, DEFAULT_INTENT_WINDOW};
use super::event::{AnalyticsEvent, EnvironmentMetadata};
use super::identity;
use super::sender::{AnalyticsError, AnalyticsSender, HttpSender, DEFAULT_ENDPOINT, SEND_TIMEOUT};
use crate::event_hub::{names, EventHub, HubEvent, SubscriptionId};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsSettings {
    pub enabled: bool,
    pub debug: bool,
    pub endpoint: String,
    pub batch_size: usize,
    pub capacity: usize,
    pub flush_interval: Duration,
    pub intent_window: Duration,
    pub send_timeout: Duration,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            batch_size: 10,
            capacity: 100,
            flush_interval: Duration::from_secs(30),
            intent_window: DEFAULT_INTENT_WINDOW,
            send_timeout: SEND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Queued,
    /// Queued after evicting the oldest event.
    QueuedWithEviction,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Interval,
    Threshold,
    Dispose,
    Manual,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Interval => "interval",
            FlushReason::Threshold => "threshold",
            FlushReason::Dispose => "dispose",
            FlushReason::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Sent(usize),
    AlreadyFlushing,
    Empty,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyticsStats {
    pub queued: usize,
    pub sent: u64,
    pub dropped: u64,
}

/// Clears the in-flight flag even when a flush future is dropped mid-send.
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
    done: &'a Notify,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.done.notify_waiters();
    }
}

/// Analytics batcher. Every public operation returns a value; nothing here
/// panics or blocks the caller on the network.
pub struct AnalyticsBatcher {
    me: Weak<AnalyticsBatcher>,
    settings: AnalyticsSettings,
    sender: Option<Arc<dyn AnalyticsSender>>,
    user_id: String,
    metadata: EnvironmentMetadata,
    queue: Mutex<VecDeque<AnalyticsEvent>>,
    tracker: Mutex<ConnectionTracker>,
    is_flushing: AtomicBool,
    flush_done: Notify,
    host_enabled: AtomicBool,
    app_enabled: AtomicBool,
    disposed: AtomicBool,
    sent: AtomicU64,
    dropped: AtomicU64,
    interval_task: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Option<(Arc<EventHub>, Vec<(&'static str, SubscriptionId)>)>>,
}

impl AnalyticsBatcher {
    pub fn new(
        settings: AnalyticsSettings,
        sender: Arc<dyn AnalyticsSender>,
        user_id: impl Into<String>,
        metadata: EnvironmentMetadata,
    ) -> Arc<Self> {
        Self::build(settings, Some(sender), user_id.into(), metadata)
    }

    /// Builds the HTTP-backed batcher. Any construction failure yields a
    /// disabled batcher instead of an error.
    pub fn from_settings(settings: AnalyticsSettings) -> Arc<Self> {
        if !settings.enabled {
            return Self::disabled(settings);
        }
        if settings.batch_size == 0 || settings.capacity < settings.batch_size {
            warn!(
                batch_size = settings.batch_size,
                capacity = settings.capacity,
                "analytics disabled: invalid queue limits"
            );
            return Self::disabled(settings);
        }
        match HttpSender::new(&settings.endpoint, settings.send_timeout) {
            Ok(sender) => {
                let user_id = identity::anonymous_id();
                let metadata = EnvironmentMetadata::detect();
                Self::build(settings, Some(Arc::new(sender)), user_id, metadata)
            }
            Err(e) => {
                warn!("analytics disabled: {}", e);
                Self::disabled(settings)
            }
        }
    }

    /// A batcher that drops everything.
    pub fn disabled(mut settings: AnalyticsSettings) -> Arc<Self> {
        settings.enabled = false;
        let metadata = EnvironmentMetadata {
            client_version: super::event::client_version(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            machine_id: String::new(),
            session_id: String::new(),
        };
        Self::build(settings, None, String::new(), metadata)
    }

    fn build(
        settings: AnalyticsSettings,
        sender: Option<Arc<dyn AnalyticsSender>>,
        user_id: String,
        metadata: EnvironmentMetadata,
    ) -> Arc<Self> {
        let enabled = settings.enabled && sender.is_some();
        let window = settings.intent_window;
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            settings,
            sender,
            user_id,
            metadata,
            queue: Mutex::new(VecDeque::new()),
            tracker: Mutex::new(ConnectionTracker::new(window)),
            is_flushing: AtomicBool::new(false),
            flush_done: Notify::new(),
            host_enabled: AtomicBool::new(true),
            app_enabled: AtomicBool::new(enabled),
            disposed: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            interval_task: Mutex::new(None),
            subscriptions: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &AnalyticsSettings {
        &self.settings
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Editor-wide telemetry toggle.
    pub fn set_host_enabled(&self, enabled: bool) {
        self.host_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Extension-level telemetry toggle.
    pub fn set_app_enabled(&self, enabled: bool) {
        self.app_enabled
            .store(enabled && self.sender.is_some(), Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.host_enabled.load(Ordering::SeqCst)
            && self.app_enabled.load(Ordering::SeqCst)
            && !self.disposed.load(Ordering::SeqCst)
    }

    /// Queues one event. When the queue is full the oldest event is evicted.
    /// Reaching the batch size schedules a flush on the current runtime.
    pub fn track(
        &self,
        event: &str,
        mut properties: Map<String, Value>,
    ) -> Result<TrackOutcome, AnalyticsError> {
        if !self.is_enabled() {
            return Ok(TrackOutcome::Disabled);
        }
        self.metadata.apply(&mut properties);
        let event = AnalyticsEvent::track(&self.user_id, event, properties, self.settings.debug);

        let (queued, evicted) = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let mut evicted = false;
            while queue.len() >= self.settings.capacity.max(1) {
                queue.pop_front();
                evicted = true;
            }
            queue.push_back(event);
            (queue.len(), evicted)
        };
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if queued >= self.settings.batch_size {
            self.schedule_flush(FlushReason::Threshold);
        }

        Ok(if evicted {
            TrackOutcome::QueuedWithEviction
        } else {
            TrackOutcome::Queued
        })
    }

    fn schedule_flush(&self, reason: FlushReason) {
        let (Some(me), Ok(runtime)) = (self.me.upgrade(), tokio::runtime::Handle::try_current())
        else {
            return;
        };
        runtime.spawn(async move {
            if let Err(e) = me.flush(reason).await {
                debug!("analytics flush failed: {}", e);
            }
        });
    }

    /// Sends up to one batch from the head of the queue. A failed batch is
    /// discarded, never re-queued.
    pub async fn flush(&self, reason: FlushReason) -> Result<FlushOutcome, AnalyticsError> {
        let toggled_on =
            self.host_enabled.load(Ordering::SeqCst) && self.app_enabled.load(Ordering::SeqCst);
        let disposed = self.disposed.load(Ordering::SeqCst);
        if !toggled_on || (disposed && reason != FlushReason::Dispose) {
            return Ok(FlushOutcome::Disabled);
        }
        let Some(sender) = self.sender.as_ref() else {
            return Ok(FlushOutcome::Disabled);
        };
        if self
            .is_flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(FlushOutcome::AlreadyFlushing);
        }
        let _guard = FlushGuard {
            flag: &self.is_flushing,
            done: &self.flush_done,
        };

        let batch: Vec<AnalyticsEvent> = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let take = queue.len().min(self.settings.batch_size.max(1));
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let count = batch.len();
        debug!(reason = reason.as_str(), events = count, "flushing analytics");
        match sender.send(&batch).await {
            Ok(()) => {
                self.sent.fetch_add(count as u64, Ordering::Relaxed);
                Ok(FlushOutcome::Sent(count))
            }
            Err(e) => {
                self.dropped.fetch_add(count as u64, Ordering::Relaxed);
                debug!(events = count, "analytics batch discarded: {}", e);
                Err(e)
            }
        }
    }

    /// Starts the periodic flush. Does nothing when disabled or already started.
    pub fn start(&self) {
        if !self.is_enabled() {
            return;
        }
        let mut task = self
            .interval_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }
        let weak = self.me.clone();
        let period = self.settings.flush_interval;
        let first_tick = tokio::time::Instant::now() + period;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(batcher) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = batcher.flush(FlushReason::Interval).await {
                    debug!("analytics flush failed: {}", e);
                }
            }
        }));
    }

    /// Subscribes to track requests and connection events. Handlers never
    /// fail, so a telemetry problem cannot reach the emitter.
    pub fn attach(&self, hub: &Arc<EventHub>) {
        self.detach();

        let weak = self.me.clone();
        let track = hub.on(names::ANALYTICS_TRACK, move |event| {
            if let (Some(batcher), HubEvent::AnalyticsTrack { event, properties }) =
                (weak.upgrade(), event)
            {
                if let Err(e) = batcher.track(event, properties.clone()) {
                    debug!("analytics track failed: {}", e);
                }
            }
            Ok(())
        });

        let weak = self.me.clone();
        let status = hub.on(names::CONNECTION_STATUS_UPDATED, move |event| {
            if let (Some(batcher), HubEvent::ConnectionStatusUpdated(status)) =
                (weak.upgrade(), event)
            {
                batcher.observe_connection(status);
            }
            Ok(())
        });

        let weak = self.me.clone();
        let intent = hub.on(names::DISCONNECT_REQUESTED, move |_| {
            if let Some(batcher) = weak.upgrade() {
                batcher
                    .tracker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record_disconnect_intent();
            }
            Ok(())
        });

        *self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((
            Arc::clone(hub),
            vec![
                (names::ANALYTICS_TRACK, track),
                (names::CONNECTION_STATUS_UPDATED, status),
                (names::DISCONNECT_REQUESTED, intent),
            ],
        ));
    }

    fn observe_connection(&self, status: &crate::event_hub::ConnectionStatus) {
        let transition = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(status);
        if let Some(transition) = transition {
            if let Err(e) = self.track(transition.event_name(), transition.properties()) {
                debug!("analytics track failed: {}", e);
            }
        }
    }

    fn detach(&self) {
        let previous = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((hub, subscriptions)) = previous {
            for (name, id) in subscriptions {
                hub.off(name, Some(id));
            }
        }
    }

    /// Stops the interval task, flushes what is queued and disables further
    /// tracking. Calling it again does nothing. The first failed batch ends
    /// the drain; whatever is still queued then is dropped and the send
    /// error returned.
    pub async fn dispose(&self) -> Result<(), AnalyticsError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = self
            .interval_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.detach();

        let mut last_error = None;
        loop {
            let idle = self.flush_done.notified();
            match self.flush(FlushReason::Dispose).await {
                Ok(FlushOutcome::Sent(_)) => continue,
                Ok(FlushOutcome::AlreadyFlushing) => idle.await,
                Ok(FlushOutcome::Empty | FlushOutcome::Disabled) => break,
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }
        self.app_enabled.store(false, Ordering::SeqCst);

        let leftover = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let n = queue.len();
            queue.clear();
            n
        };
        if leftover > 0 {
            self.dropped.fetch_add(leftover as u64, Ordering::Relaxed);
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> AnalyticsStats {
        AnalyticsStats {
            queued: self.queue.lock().unwrap_or_else(PoisonError::into_inner).len(),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Events waiting to be sent, oldest first.
    pub fn pending(&self) -> Vec<AnalyticsEvent> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Drop for AnalyticsBatcher {
    fn drop(&mut self) {
        if let Some(task) = self
            .interval_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.detach();
    }
}
