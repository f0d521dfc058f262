// ── Hub facade ──
//
// Process-wide entry point for camera state channels. The shared bus
// connection, the topic registry, and their background tasks start
// lazily on first use and live until `shutdown`.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_api::{BusConnection, BusMessage, LinkState};

use crate::channel::StateChannel;
use crate::config::HubConfig;
use crate::error::CoreError;
use crate::registry::TopicRegistry;
use crate::topic::{Feature, StateValue, Toggle, TopicKey};
use crate::transport::Transport;

static SHARED: OnceLock<Hub> = OnceLock::new();

// ── Hub ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<HubInner>`. Nothing connects until the
/// first channel is requested.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    source: TransportSource,
    confirm_timeout: Duration,
    cancel: CancellationToken,
    running: Mutex<Option<Arc<Running>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

enum TransportSource {
    Bus(HubConfig),
    Provided(Arc<dyn Transport>),
}

struct Running {
    transport: Arc<dyn Transport>,
    registry: TopicRegistry,
}

impl Hub {
    /// Create a hub for the bus described by `config`. Does NOT connect.
    pub fn new(config: HubConfig) -> Self {
        let confirm_timeout = config.confirm_timeout;
        Self::from_source(TransportSource::Bus(config), confirm_timeout)
    }

    /// Create a hub over an existing transport (e.g. a
    /// [`MemoryTransport`](crate::MemoryTransport)).
    pub fn with_transport(transport: Arc<dyn Transport>, confirm_timeout: Duration) -> Self {
        Self::from_source(TransportSource::Provided(transport), confirm_timeout)
    }

    /// The process-wide hub. The first caller's `config` wins; later
    /// calls return the same instance.
    pub fn shared(config: HubConfig) -> Hub {
        SHARED.get_or_init(|| Hub::new(config)).clone()
    }

    /// Run `f` against a fresh hub and shut it down afterwards.
    pub async fn oneshot<F, Fut, T>(config: HubConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Hub) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let hub = Hub::new(config);
        let result = f(hub.clone()).await;
        hub.shutdown().await;
        result
    }

    fn from_source(source: TransportSource, confirm_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                source,
                confirm_timeout,
                cancel: CancellationToken::new(),
                running: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Channels ─────────────────────────────────────────────────

    /// Bind a typed channel for `camera`'s `feature`.
    pub fn channel<T: StateValue>(&self, camera: &str, feature: Feature) -> Result<StateChannel<T>, CoreError> {
        self.bind(TopicKey::new(camera, feature)?)
    }

    /// Bind a typed channel for an already-validated key.
    pub fn bind<T: StateValue>(&self, key: TopicKey) -> Result<StateChannel<T>, CoreError> {
        let running = self.running()?;
        let binding = running.registry.bind(&key);
        Ok(StateChannel::new(key, binding))
    }

    pub fn detect_state(&self, camera: &str) -> Result<StateChannel<Toggle>, CoreError> {
        self.channel(camera, Feature::Detect)
    }

    pub fn recordings_state(&self, camera: &str) -> Result<StateChannel<Toggle>, CoreError> {
        self.channel(camera, Feature::Recordings)
    }

    pub fn snapshots_state(&self, camera: &str) -> Result<StateChannel<Toggle>, CoreError> {
        self.channel(camera, Feature::Snapshots)
    }

    pub fn audio_state(&self, camera: &str) -> Result<StateChannel<Toggle>, CoreError> {
        self.channel(camera, Feature::Audio)
    }

    pub fn motion_state(&self, camera: &str) -> Result<StateChannel<Toggle>, CoreError> {
        self.channel(camera, Feature::Motion)
    }

    pub fn improve_contrast_state(&self, camera: &str) -> Result<StateChannel<Toggle>, CoreError> {
        self.channel(camera, Feature::ImproveContrast)
    }

    pub fn ptz_autotracker_state(&self, camera: &str) -> Result<StateChannel<Toggle>, CoreError> {
        self.channel(camera, Feature::PtzAutotracker)
    }

    pub fn motion_threshold_state(&self, camera: &str) -> Result<StateChannel<u32>, CoreError> {
        self.channel(camera, Feature::MotionThreshold)
    }

    pub fn motion_contour_area_state(&self, camera: &str) -> Result<StateChannel<u32>, CoreError> {
        self.channel(camera, Feature::MotionContourArea)
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to link state changes. Starts the hub if needed.
    pub fn connection_state(&self) -> Result<watch::Receiver<LinkState>, CoreError> {
        Ok(self.running()?.transport.state())
    }

    /// Wait until the link is open, or fail after `timeout`.
    ///
    /// When a connection attempt has already failed, the failure is
    /// reported instead of a bare timeout.
    pub async fn wait_until_open(&self, timeout: Duration) -> Result<(), CoreError> {
        let running = self.running()?;
        let mut state = running.transport.state();
        let waited = tokio::time::timeout(
            timeout,
            state.wait_for(|s| s.is_open() || *s == LinkState::Closed),
        )
        .await
        .map(|r| r.map(|s| s.is_open()));

        if let Ok(Ok(true)) = waited {
            return Ok(());
        }
        if let Some(err) = running.transport.last_error() {
            return Err(CoreError::from_link_failure(&self.url(), &err));
        }
        match waited {
            Err(_) => Err(CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            }),
            Ok(_) => Err(CoreError::Disconnected),
        }
    }

    /// Where this hub connects, for error reports.
    pub fn url(&self) -> String {
        match &self.inner.source {
            TransportSource::Bus(config) => config.url.to_string(),
            TransportSource::Provided(_) => "(in-process transport)".into(),
        }
    }

    /// The registry behind this hub, for diagnostics.
    pub fn registry(&self) -> Result<TopicRegistry, CoreError> {
        Ok(self.running()?.registry.clone())
    }

    pub fn is_started(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Close the connection, revert pending commands, and join the
    /// background tasks. Terminal: later channel requests fail with
    /// [`CoreError::Disconnected`].
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let running = lock(&self.inner.running).take();
        if let Some(running) = running {
            running.registry.invalidate_all_pending();
            running.transport.shutdown();
        }

        let handles: Vec<JoinHandle<()>> = lock(&self.inner.task_handles).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("hub shut down");
    }

    // ── Private helpers ──────────────────────────────────────────

    /// Start the transport and background tasks on first use.
    fn running(&self) -> Result<Arc<Running>, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Disconnected);
        }

        let mut slot = lock(&self.inner.running);
        if let Some(running) = slot.as_ref() {
            return Ok(Arc::clone(running));
        }

        let handle = Handle::try_current().map_err(|_| CoreError::NoRuntime)?;

        let transport: Arc<dyn Transport> = match &self.inner.source {
            TransportSource::Bus(config) => {
                info!(url = %config.url, "starting event bus connection");
                Arc::new(BusConnection::connect(
                    config.url.clone(),
                    config.reconnect.clone(),
                    self.inner.cancel.child_token(),
                    config.token.clone(),
                )?)
            }
            TransportSource::Provided(transport) => Arc::clone(transport),
        };

        let registry = TopicRegistry::new(Arc::clone(&transport), self.inner.confirm_timeout);

        // Receivers are taken before any bind so no early value is missed.
        let inbound = transport.inbound();
        let link = transport.state();
        {
            let mut handles = lock(&self.inner.task_handles);
            handles.push(handle.spawn(dispatch_task(
                registry.clone(),
                inbound,
                self.inner.cancel.clone(),
            )));
            handles.push(handle.spawn(link_task(
                registry.clone(),
                Arc::clone(&transport),
                link,
                self.inner.cancel.clone(),
            )));
        }

        let started = Arc::new(Running {
            transport,
            registry,
        });
        *slot = Some(Arc::clone(&started));
        Ok(started)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Background tasks ─────────────────────────────────────────────

/// Apply inbound values to the registry in bus arrival order.
async fn dispatch_task(
    registry: TopicRegistry,
    mut inbound: broadcast::Receiver<Arc<BusMessage>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = inbound.recv() => match received {
                Ok(message) => {
                    registry.apply_inbound(&message);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The latest value for some topics may be among the
                    // skipped ones; ask the bus to replay retained state.
                    let replayed = registry.resync();
                    warn!(skipped, replayed, "dispatcher lagged, resubscribed to resync state");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("dispatcher exiting");
}

/// Replay subscriptions when the link opens; revert pending commands
/// when it drops.
async fn link_task(
    registry: TopicRegistry,
    transport: Arc<dyn Transport>,
    mut state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
) {
    // The link may have opened before this task first ran.
    let initial = state.borrow_and_update().clone();
    on_link_state(&registry, transport.as_ref(), &initial);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                on_link_state(&registry, transport.as_ref(), &current);
                if current == LinkState::Closed {
                    break;
                }
            }
        }
    }
    debug!("link listener exiting");
}

fn on_link_state(registry: &TopicRegistry, transport: &dyn Transport, state: &LinkState) {
    match state {
        LinkState::Open => {
            let generation = transport.generation();
            let replayed = registry.resubscribe(generation);
            if replayed > 0 {
                info!(replayed, generation, "replayed subscriptions");
            }
        }
        LinkState::Connecting | LinkState::Retrying { .. } | LinkState::Closed => {
            let dropped = registry.invalidate_all_pending();
            if dropped > 0 {
                warn!(dropped, ?state, "link down, pending commands reverted");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::reconcile::Reconciliation;
    use crate::transport::MemoryTransport;

    const WAIT: Duration = Duration::from_secs(1);

    fn memory_hub() -> (Arc<MemoryTransport>, Hub) {
        let transport = Arc::new(MemoryTransport::new());
        let hub = Hub::with_transport(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Duration::from_secs(5),
        );
        (transport, hub)
    }

    /// Let the background tasks drain what is queued.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn channel_without_runtime_fails() {
        let hub = Hub::new(HubConfig::new(Url::parse("ws://127.0.0.1:9/ws").unwrap()));
        let err = hub.detect_state("front_door").unwrap_err();
        assert!(matches!(err, CoreError::NoRuntime));
        assert!(!hub.is_started());
    }

    #[tokio::test]
    async fn non_websocket_url_is_a_config_error() {
        let hub = Hub::new(HubConfig::new(Url::parse("http://nvr.local/ws").unwrap()));
        let err = hub.audio_state("yard").unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[tokio::test]
    async fn invalid_camera_name_is_rejected() {
        let (_transport, hub) = memory_hub();
        assert!(matches!(
            hub.detect_state("front/door"),
            Err(CoreError::InvalidTopic { .. })
        ));
    }

    #[tokio::test]
    async fn channels_for_the_same_feature_share_one_subscription() {
        let (transport, hub) = memory_hub();
        let _a = hub.detect_state("front_door").unwrap();
        let _b = hub.detect_state("front_door").unwrap();
        let _c = hub.audio_state("front_door").unwrap();

        assert!(hub.is_started());
        assert_eq!(transport.subscribe_count("front_door/detect/state"), 1);
        assert_eq!(hub.registry().unwrap().ref_count("front_door/detect/state"), 2);
    }

    #[tokio::test]
    async fn inbound_values_reach_every_channel() {
        let (transport, hub) = memory_hub();
        let mut a = hub.recordings_state("front_door").unwrap();
        let mut b = hub.recordings_state("front_door").unwrap();

        transport.inject("front_door/recordings/state", json!("ON"));

        let seen_a = tokio::time::timeout(WAIT, a.changed()).await.unwrap().unwrap();
        let seen_b = tokio::time::timeout(WAIT, b.changed()).await.unwrap().unwrap();
        assert_eq!(seen_a.value, Some(Toggle::On));
        assert_eq!(seen_b.value, Some(Toggle::On));
    }

    #[tokio::test]
    async fn reconnect_resubscribes_once_and_keeps_cached_value() {
        let (transport, hub) = memory_hub();
        let mut first = hub.detect_state("garage").unwrap();
        let _second = hub.detect_state("garage").unwrap();

        transport.inject("garage/detect/state", json!("ON"));
        tokio::time::timeout(WAIT, first.wait_for_value()).await.unwrap();

        transport.drop_link();
        settle().await;
        transport.reopen();
        settle().await;

        assert_eq!(transport.subscribe_count("garage/detect/state"), 2);
        assert_eq!(first.current_value(), Some(Toggle::On));
    }

    #[tokio::test]
    async fn link_loss_reverts_pending_commands() {
        let (transport, hub) = memory_hub();
        let mut detect = hub.detect_state("front_door").unwrap();
        transport.inject("front_door/detect/state", json!("OFF"));
        tokio::time::timeout(WAIT, detect.wait_for_value()).await.unwrap();

        detect.send(Toggle::On).unwrap();
        assert!(detect.is_pending());

        transport.drop_link();
        settle().await;

        assert!(!detect.is_pending());
        assert_eq!(detect.current_value(), Some(Toggle::Off));
        assert_eq!(detect.last_outcome(), Some(Reconciliation::Discarded));
    }

    #[tokio::test]
    async fn confirmation_round_trip_through_dispatcher() {
        let (transport, hub) = memory_hub();
        let mut detect = hub.detect_state("front_door").unwrap();
        transport.inject("front_door/detect/state", json!("OFF"));
        tokio::time::timeout(WAIT, detect.wait_for_value()).await.unwrap();

        detect.send(Toggle::On).unwrap();
        detect.changed().await.unwrap();
        transport.inject("front_door/detect/state", json!("ON"));
        let confirmed = tokio::time::timeout(WAIT, detect.changed()).await.unwrap().unwrap();

        assert_eq!(confirmed.value, Some(Toggle::On));
        assert_eq!(confirmed.outcome, Some(Reconciliation::Confirmed));
        assert_eq!(
            transport.published(),
            vec![("front_door/detect/set".to_string(), json!("ON"))]
        );
    }

    #[tokio::test]
    async fn dispatcher_lag_triggers_a_resync() {
        let (transport, hub) = memory_hub();
        let _detect = hub.detect_state("front_door").unwrap();
        assert_eq!(transport.subscribe_count("front_door/detect/state"), 1);

        // Overflow the inbound buffer before the dispatcher gets to run.
        for i in 0..400 {
            transport.inject("garage/motion_threshold/state", json!(i));
        }
        settle().await;

        assert_eq!(transport.subscribe_count("front_door/detect/state"), 2);
    }

    #[tokio::test]
    async fn wait_until_open_times_out_while_offline() {
        let transport = Arc::new(MemoryTransport::offline());
        let hub = Hub::with_transport(transport as Arc<dyn Transport>, Duration::from_secs(5));
        let err = hub.wait_until_open(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
    }

    #[tokio::test]
    async fn wait_until_open_reports_the_last_connect_error() {
        let transport = Arc::new(MemoryTransport::offline());
        let hub = Hub::with_transport(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Duration::from_secs(5),
        );
        transport.fail(vigil_api::Error::WebSocketConnect("Connection refused".into()));

        let err = hub.wait_until_open(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, CoreError::ConnectionFailed { ref reason, .. } if reason.contains("refused")));
    }

    #[tokio::test]
    async fn rejected_credentials_fail_fast() {
        let transport = Arc::new(MemoryTransport::offline());
        let hub = Hub::with_transport(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Duration::from_secs(5),
        );
        transport.fail(vigil_api::Error::Rejected { status: 401 });

        // Closed is terminal, so this returns well before the timeout.
        let err = tokio::time::timeout(WAIT, hub.wait_until_open(Duration::from_secs(60)))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized { status: 401, .. }));
    }

    #[tokio::test]
    async fn shutdown_is_terminal() {
        let (transport, hub) = memory_hub();
        let _detect = hub.detect_state("yard").unwrap();
        hub.wait_until_open(WAIT).await.unwrap();

        hub.shutdown().await;

        assert!(!hub.is_started());
        assert_eq!(*transport.state().borrow(), LinkState::Closed);
        assert!(matches!(hub.detect_state("yard"), Err(CoreError::Disconnected)));
    }

    #[tokio::test]
    async fn oneshot_shuts_down_after_closure() {
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let result = Hub::oneshot(HubConfig::new(url), |hub| async move {
            let channel = hub.snapshots_state("yard")?;
            Ok::<_, CoreError>(channel.current_value())
        })
        .await
        .unwrap();
        assert_eq!(result, None);
    }
}
