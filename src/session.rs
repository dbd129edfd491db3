//! Dashboard session
//!
//! A [`Session`] owns the transport, the setpoint store and the
//! [`StateReconciler`]. Transport messages, the persistence load and user
//! intents are all funnelled through channels into one task, so state is only
//! ever touched from that task. Presentation code reads state through the
//! snapshot channel of a [`SessionHandle`].

use crate::error::{DashboardError, DashboardResult};
use crate::observability::SessionMetrics;
use crate::protocol::{topic_matches, validate_topic_filter, TelemetryDecoder};
use crate::publisher::CommandPublisher;
use crate::state::{ChangeOrigin, DashboardSnapshot, StateDelta, StateReconciler, UserIntent};
use crate::storage::{load_setpoints, save_setpoints, PersistenceError, SetpointStore, StoredSetpoints};
use crate::transport::{InboundMessage, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the inbound message queue
const INBOUND_QUEUE_CAPACITY: usize = 100;
/// Capacity of the session event queue
const EVENT_QUEUE_CAPACITY: usize = 32;
/// How long `shutdown` waits for the session task
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Events other than transport messages that the session loop processes
#[derive(Debug)]
pub enum SessionEvent {
    /// A gesture forwarded by the presentation layer
    Intent(UserIntent),
    /// The persistence load finished
    SeedLoaded(Result<StoredSetpoints, PersistenceError>),
    Shutdown,
}

/// Session context owning all dashboard state and collaborators
pub struct Session<T, S>
where
    T: Transport,
    S: SetpointStore,
{
    reconciler: StateReconciler,
    transport: T,
    store: Arc<S>,
    publisher: CommandPublisher,
    metrics: Arc<SessionMetrics>,
    telemetry_filter: String,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
}

impl<T, S> Session<T, S>
where
    T: Transport + 'static,
    S: SetpointStore + 'static,
{
    pub fn new(
        transport: T,
        store: Arc<S>,
        telemetry_topic: impl Into<String>,
    ) -> DashboardResult<Self> {
        let telemetry_filter = telemetry_topic.into();
        validate_topic_filter(&telemetry_filter)?;

        let reconciler = StateReconciler::new();
        let (snapshot_tx, _) = watch::channel(reconciler.snapshot());
        let metrics = Arc::new(SessionMetrics::new());

        Ok(Self {
            reconciler,
            transport,
            store,
            publisher: CommandPublisher::new(metrics.clone()),
            metrics,
            telemetry_filter,
            snapshot_tx,
        })
    }

    pub fn reconciler(&self) -> &StateReconciler {
        &self.reconciler
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        self.metrics.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Connect, subscribe, start the persistence load and spawn the event loop.
    ///
    /// Transport failures are logged and do not prevent the session from
    /// running; the transport keeps retrying on its own.
    pub async fn start(mut self) -> SessionHandle {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        self.transport.set_message_sender(inbound_tx).await;

        if let Err(e) = self.transport.connect().await {
            error!(error = %e, "Transport connect failed, continuing while it retries");
        }
        if let Err(e) = self.transport.subscribe(&self.telemetry_filter).await {
            error!(topic = %self.telemetry_filter, error = %e, "Telemetry subscription failed");
        }

        self.spawn_seed_load(events_tx.clone());
        self.publish_snapshot();

        let snapshot_rx = self.snapshot_tx.subscribe();
        let span = crate::session_span!(topic = %self.telemetry_filter);
        let task = tokio::spawn(self.run(inbound_rx, events_rx).instrument(span));

        SessionHandle {
            events_tx,
            snapshot_rx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    fn spawn_seed_load(&mut self, events_tx: mpsc::Sender<SessionEvent>) {
        if !self.reconciler.begin_seeding() {
            return;
        }

        let store = self.store.clone();
        tokio::spawn(async move {
            let result = load_setpoints(store.as_ref()).await;
            if events_tx.send(SessionEvent::SeedLoaded(result)).await.is_err() {
                debug!("Session ended before stored setpoints were loaded");
            }
        });
    }

    /// The serialized event loop
    pub async fn run(
        mut self,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        mut events_rx: mpsc::Receiver<SessionEvent>,
    ) {
        info!("Dashboard session running");

        loop {
            tokio::select! {
                Some(message) = inbound_rx.recv() => {
                    self.handle_message(message).await;
                }
                event = events_rx.recv() => {
                    let keep_running = match event {
                        Some(event) => self.process_event(event).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Decode, merge and react to one transport message
    pub async fn handle_message(&mut self, message: InboundMessage) {
        self.metrics.message_received();

        if !topic_matches(&self.telemetry_filter, &message.topic) {
            self.metrics.message_ignored();
            debug!(topic = %message.topic, "Ignoring message outside the telemetry topic");
            return;
        }

        let span = crate::telemetry_span!(topic = %message.topic, retained = message.retain);
        self.ingest_telemetry(message).instrument(span).await;
    }

    async fn ingest_telemetry(&mut self, message: InboundMessage) {
        let record = match TelemetryDecoder::decode(&message.payload) {
            Ok(record) => record,
            Err(e) => {
                self.metrics.decode_failed();
                warn!(error = %e, bytes = message.payload.len(), "Dropping telemetry message");
                return;
            }
        };

        let delta = self.reconciler.apply_telemetry(&record);
        self.metrics.telemetry_applied();
        debug!(changed = ?delta.changed, "Telemetry merged");

        self.react(&delta).await;
        self.publish_snapshot();
    }

    /// Handle a queued event. Returns false when the loop should stop.
    pub async fn process_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Intent(intent) => {
                debug!(?intent, "Applying user intent");
                let delta = self.reconciler.apply_user_intent(intent);
                self.react(&delta).await;
                self.publish_snapshot();
                true
            }
            SessionEvent::SeedLoaded(Ok(stored)) => {
                self.metrics.seed_loaded();
                info!(?stored, "Stored setpoints loaded");
                let seeded = self.reconciler.apply_seed(&stored);
                self.react_to_ready(Some(seeded)).await;
                self.publish_snapshot();
                true
            }
            SessionEvent::SeedLoaded(Err(e)) => {
                error!(error = %e, "Failed to load stored setpoints, keeping defaults");
                self.reconciler.complete_seeding_without_data();
                self.react_to_ready(None).await;
                self.publish_snapshot();
                true
            }
            SessionEvent::Shutdown => {
                info!("Shutdown requested");
                false
            }
        }
    }

    /// Publish and checkpoint as the delta requires
    async fn react(&self, delta: &StateDelta) {
        self.publisher
            .publish_if_changed(&self.transport, delta, self.reconciler.readiness())
            .await;
        self.checkpoint_if_needed(delta).await;
    }

    /// React once to the end of seeding.
    ///
    /// Setpoints held from before READY have not reached the device or the
    /// store yet. A user-held delta carries every current setpoint, so one
    /// command covers the seeded ones too. A device-held delta is only
    /// checkpointed.
    async fn react_to_ready(&mut self, seeded: Option<StateDelta>) {
        let held = self.reconciler.take_held_setpoints();
        match (held, seeded) {
            (Some(mut held), Some(seeded)) if held.origin == ChangeOrigin::User => {
                held.changed.extend(seeded.changed);
                self.react(&held).await;
            }
            (Some(held), seeded) => {
                if let Some(seeded) = seeded {
                    self.react(&seeded).await;
                }
                self.react(&held).await;
            }
            (None, Some(seeded)) => self.react(&seeded).await,
            (None, None) => {}
        }
    }

    async fn checkpoint_if_needed(&self, delta: &StateDelta) {
        // Storage-origin deltas came from the store; nothing new to write
        if !self.reconciler.is_ready()
            || delta.origin == ChangeOrigin::Storage
            || !delta.touches_setpoints()
        {
            return;
        }

        match save_setpoints(self.store.as_ref(), &delta.setpoints).await {
            Ok(()) => {
                self.metrics.checkpoint_written();
                debug!(setpoints = ?delta.setpoints, "Setpoints checkpointed");
            }
            Err(e) => {
                self.metrics.checkpoint_failed();
                error!(error = %e, "Failed to checkpoint setpoints, stored values are stale");
            }
        }
    }

    fn publish_snapshot(&self) {
        let next = self.reconciler.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn shutdown(&mut self) {
        let metrics = self.metrics.snapshot();
        match serde_json::to_string(&metrics) {
            Ok(json) => info!(metrics = %json, "Session metrics"),
            Err(e) => warn!(error = %e, "Failed to serialize session metrics"),
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
        info!("Dashboard session stopped");
    }
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    events_tx: mpsc::Sender<SessionEvent>,
    snapshot_rx: watch::Receiver<DashboardSnapshot>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    /// Queue a user intent
    pub async fn apply_intent(&self, intent: UserIntent) -> DashboardResult<()> {
        self.events_tx
            .send(SessionEvent::Intent(intent))
            .await
            .map_err(|_| DashboardError::SessionClosed)
    }

    /// Latest published state
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified whenever the state changes
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.events_tx.is_closed()
    }

    /// Stop the session and wait for it to disconnect
    pub async fn shutdown(&self) -> DashboardResult<()> {
        if self.events_tx.send(SessionEvent::Shutdown).await.is_err() {
            debug!("Session already stopped");
        }

        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DashboardError::internal_error(format!(
                "Session task failed: {e}"
            ))),
            Err(_) => Err(DashboardError::internal_error(
                "Session did not stop within the shutdown timeout",
            )),
        }
    }
}
