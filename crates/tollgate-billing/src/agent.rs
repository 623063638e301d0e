//! # Billing Agent
//!
//! The orchestrator: one worker task owns every mutation of entitlement
//! state, and a cloneable [`BillingHandle`] is the public contract for UI
//! collaborators.
//!
//! ## Connection State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Store Session States                                 │
//! │                                                                         │
//! │  ┌────────────┐   start()    ┌────────────┐   setup OK   ┌───────────┐ │
//! │  │Disconnected│ ───────────► │ Connecting │ ───────────► │ Connected │ │
//! │  └────────────┘              └─────┬──────┘              └─────┬─────┘ │
//! │        ▲                        ▲  │ setup failed              │       │
//! │        │                        │  ▼                           │       │
//! │        │                  timer │ ┌───────────────┐ disconnect │       │
//! │        │                  fires └─│ reconnect_at  │ ◄──────────┘       │
//! │        │                          └───────────────┘                     │
//! │        └──────────── shutdown() (timer dropped) ────────────────────    │
//! │                                                                         │
//! │  On Connected: details refresh, THEN owned purchases refresh           │
//! │  (a flow launch needs fresh details)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Worker Loop
//! ```text
//! ┌───────────────┐
//! │ BillingHandle │──commands──┐
//! └───────────────┘            │      ┌────────────────────────────────────┐
//! ┌───────────────┐            ├────► │ select! one at a time:             │
//! │ StoreCallbacks│──events────┤      │  command / store event / requery / │
//! └───────────────┘            │      │  reconnect deadline                │
//! ┌───────────────┐            │      └────────────────────────────────────┘
//! │ Catalog       │──requery───┘
//! └───────────────┘
//! ```
//!
//! Because the loop handles one input at a time, reconciliation passes
//! never interleave.

use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

use tollgate_core::{
    CatalogSpec, PurchaseRecord, ResponseCode, SkuDetails, SkuId, SkuKind, SkuState, StoreResult,
    UiHandle,
};

use crate::catalog::{Catalog, DetailsRequery};
use crate::cell::combine_latest;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{ConnectionState, EventFabric};
use crate::flow::{FlowLauncher, LaunchedFlow};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::security::{Ed25519Verifier, PurchaseVerifier};
use crate::store::{StoreCallbacks, StoreClient, StoreEvent};
use crate::supervisor::{BackoffSupervisor, ConnectDecision};

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 64;

// =============================================================================
// Commands
// =============================================================================

/// Requests a handle enqueues into the worker.
#[derive(Debug)]
enum BillingCommand {
    LaunchFlow {
        ui: UiHandle,
        sku: SkuId,
        upgrade_candidates: Vec<SkuId>,
        reply: oneshot::Sender<BillingResult<LaunchedFlow>>,
    },
    RefreshPurchases {
        reply: oneshot::Sender<BillingResult<ReconcileReport>>,
    },
    RefreshDetails {
        reply: oneshot::Sender<BillingResult<()>>,
    },
    ConsumeById {
        sku: SkuId,
        reply: oneshot::Sender<BillingResult<()>>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// =============================================================================
// Billing Handle
// =============================================================================

/// Public contract of the orchestrator.
///
/// Reads go straight to the catalog cells; everything that talks to the
/// store is enqueued into the worker.
#[derive(Clone)]
pub struct BillingHandle {
    cmd_tx: mpsc::Sender<BillingCommand>,
    catalog: Arc<Catalog>,
    events: Arc<EventFabric>,
}

impl BillingHandle {
    // =========================================================================
    // Reactive Views
    // =========================================================================

    /// True while the item is owned and acknowledged.
    pub fn is_purchased(&self, id: &str) -> BillingResult<BoxStream<'static, bool>> {
        let rx = self.catalog.observe_state(id)?;
        Ok(WatchStream::new(rx).map(|state| state.is_entitled()).boxed())
    }

    /// True while the item is unpurchased and its details are loaded.
    pub fn can_purchase(&self, id: &str) -> BillingResult<BoxStream<'static, bool>> {
        let state = self.catalog.observe_state(id)?;
        let details = self.catalog.observe_details(id)?;
        Ok(combine_latest(state, details, |state, details| {
            *state == SkuState::Unpurchased && details.is_some()
        }))
    }

    /// Localised title, once details are loaded.
    pub fn title(&self, id: &str) -> BillingResult<BoxStream<'static, String>> {
        self.details_text(id, |d| d.title)
    }

    /// Formatted price, once details are loaded.
    pub fn price(&self, id: &str) -> BillingResult<BoxStream<'static, String>> {
        self.details_text(id, |d| d.price)
    }

    /// Localised description, once details are loaded.
    pub fn description(&self, id: &str) -> BillingResult<BoxStream<'static, String>> {
        self.details_text(id, |d| d.description)
    }

    fn details_text(
        &self,
        id: &str,
        pick: fn(SkuDetails) -> String,
    ) -> BillingResult<BoxStream<'static, String>> {
        let rx = self.catalog.observe_details(id)?;
        Ok(WatchStream::new(rx)
            .filter_map(move |details| future::ready(details.map(pick)))
            .boxed())
    }

    /// Current state snapshot.
    pub fn state(&self, id: &str) -> BillingResult<SkuState> {
        self.catalog.state(id)
    }

    /// Current details snapshot.
    pub fn details(&self, id: &str) -> BillingResult<Option<SkuDetails>> {
        self.catalog.details(id)
    }

    /// True between a successful flow launch and the store's answer.
    pub fn flow_in_process(&self) -> BoxStream<'static, bool> {
        self.events.flow_in_process.stream()
    }

    pub fn is_flow_in_process(&self) -> bool {
        self.events.flow_in_process.get()
    }

    /// Ids of each newly completed purchase.
    pub fn new_purchases(&self) -> BoxStream<'static, Vec<SkuId>> {
        self.events.new_purchases.subscribe()
    }

    /// Ids of each consumed purchase.
    pub fn consumed_purchases(&self) -> BoxStream<'static, Vec<SkuId>> {
        self.events.consumed_purchases.subscribe()
    }

    pub fn connection_state(&self) -> BoxStream<'static, ConnectionState> {
        self.events.connection.stream()
    }

    pub fn current_connection_state(&self) -> ConnectionState {
        self.events.connection.get()
    }

    /// The catalog configuration this agent runs with.
    pub fn catalog_spec(&self) -> &CatalogSpec {
        self.catalog.spec()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Starts a purchase flow for `id`.
    ///
    /// If `id` belongs to an upgrade group, a held tier of the same group
    /// is replaced by the purchase.
    pub async fn buy(&self, ui: UiHandle, id: &str) -> BillingResult<LaunchedFlow> {
        let candidates = self.catalog.spec().upgrade_candidates(id);
        self.launch_flow(ui, id, candidates).await
    }

    /// Starts a purchase flow with explicit upgrade candidates.
    pub async fn launch_flow(
        &self,
        ui: UiHandle,
        id: &str,
        upgrade_candidates: Vec<SkuId>,
    ) -> BillingResult<LaunchedFlow> {
        self.catalog.record(id)?;
        let sku = id.to_string();
        self.request(|reply| BillingCommand::LaunchFlow {
            ui,
            sku,
            upgrade_candidates,
            reply,
        })
        .await?
    }

    /// Queries owned purchases of both kinds and reconciles them.
    pub async fn refresh_purchases(&self) -> BillingResult<ReconcileReport> {
        self.request(|reply| BillingCommand::RefreshPurchases { reply })
            .await?
    }

    /// Refetches listing details for the whole catalog.
    pub async fn refresh_details(&self) -> BillingResult<()> {
        self.request(|reply| BillingCommand::RefreshDetails { reply })
            .await?
    }

    /// Consumes the owned one-time purchase covering `id`.
    pub async fn consume_by_id(&self, id: &str) -> BillingResult<()> {
        self.catalog.record(id)?;
        let sku = id.to_string();
        self.request(|reply| BillingCommand::ConsumeById { sku, reply })
            .await?
    }

    /// Host lifecycle signal: the app came back to the foreground.
    ///
    /// Returns true if a purchases refresh ran.
    pub async fn on_resume(&self) -> BillingResult<bool> {
        self.request(|reply| BillingCommand::Resume { reply }).await
    }

    /// Ends the store session and stops the worker.
    pub async fn shutdown(&self) -> BillingResult<()> {
        self.request(|reply| BillingCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> BillingCommand,
    ) -> BillingResult<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| BillingError::ChannelError("Billing agent channel closed".into()))?;
        rx.await.map_err(|_| BillingError::ShuttingDown)
    }
}

impl std::fmt::Debug for BillingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingHandle")
            .field("connection", &self.events.connection.get())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Billing Agent
// =============================================================================

/// A configured orchestrator, not yet running.
pub struct BillingAgent {
    core: Orchestrator,
    store_rx: mpsc::UnboundedReceiver<StoreEvent>,
    requery_rx: mpsc::Receiver<DetailsRequery>,
}

impl BillingAgent {
    /// Builds an agent that verifies purchases with `verifier`.
    pub fn new(
        config: &BillingConfig,
        store: Arc<dyn StoreClient>,
        verifier: Arc<dyn PurchaseVerifier>,
    ) -> BillingResult<Self> {
        config.validate()?;

        let (catalog, requery_rx) =
            Catalog::initialize(config.catalog.clone(), config.requery_interval())?;
        let catalog = Arc::new(catalog);
        let events = Arc::new(EventFabric::new());
        let (callbacks, store_rx) = StoreCallbacks::channel();

        let reconciler = Reconciler::new(
            catalog.clone(),
            store.clone(),
            verifier,
            events.clone(),
            config.ack_notify(),
        );
        let launcher = FlowLauncher::new(catalog.clone(), store.clone(), events.clone());

        let core = Orchestrator {
            store,
            catalog,
            events,
            reconciler,
            launcher,
            supervisor: BackoffSupervisor::new(config.initial_backoff(), config.max_backoff()),
            callbacks,
            reconnect_at: None,
        };

        Ok(Self {
            core,
            store_rx,
            requery_rx,
        })
    }

    /// Builds an agent that verifies purchases with the configured ed25519
    /// store key.
    pub fn from_config(config: &BillingConfig, store: Arc<dyn StoreClient>) -> BillingResult<Self> {
        let key = config.security.public_key.as_deref().ok_or_else(|| {
            BillingError::InvalidConfig("security.public_key is required".into())
        })?;
        let verifier = Ed25519Verifier::from_base64(key)?;
        Self::new(config, store, Arc::new(verifier))
    }

    /// Spawns the worker and starts connecting.
    pub fn start(self) -> BillingHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = BillingHandle {
            cmd_tx,
            catalog: self.core.catalog.clone(),
            events: self.core.events.clone(),
        };

        tokio::spawn(async move {
            self.run(cmd_rx).await;
        });

        handle
    }

    /// Main worker loop.
    async fn run(self, mut cmd_rx: mpsc::Receiver<BillingCommand>) {
        let BillingAgent {
            mut core,
            mut store_rx,
            mut requery_rx,
        } = self;

        info!("Billing agent started");
        core.connect().await;

        loop {
            let reconnect_at = core.reconnect_at;
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(BillingCommand::Shutdown { reply }) => {
                        core.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => core.handle_command(cmd).await,
                    None => {
                        info!("All billing handles dropped");
                        core.shutdown().await;
                        break;
                    }
                },
                Some(event) = store_rx.recv() => {
                    core.handle_store_event(event).await;
                }
                Some(request) = requery_rx.recv() => {
                    core.handle_requery(request).await;
                }
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    core.reconnect_at = None;
                    core.connect().await;
                }
            }
        }

        info!("Billing agent stopped");
    }
}

// =============================================================================
// Orchestrator (worker-owned state)
// =============================================================================

struct Orchestrator {
    store: Arc<dyn StoreClient>,
    catalog: Arc<Catalog>,
    events: Arc<EventFabric>,
    reconciler: Reconciler,
    launcher: FlowLauncher,
    supervisor: BackoffSupervisor,
    callbacks: StoreCallbacks,
    reconnect_at: Option<Instant>,
}

impl Orchestrator {
    fn is_connected(&self) -> bool {
        self.events.connection.get() == ConnectionState::Connected
    }

    async fn connect(&mut self) {
        self.events.connection.set(ConnectionState::Connecting);
        debug!("Starting store connection");
        self.store.start_connection(self.callbacks.clone()).await;
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.events.connection.set(ConnectionState::Connecting);
        self.reconnect_at = Some(Instant::now() + delay);
        info!(delay_ms = delay.as_millis() as u64, "Store reconnect scheduled");
    }

    async fn shutdown(&mut self) {
        self.reconnect_at = None;
        self.store.end_connection().await;
        self.events.connection.set(ConnectionState::Disconnected);
        info!("Store connection closed");
    }

    // =========================================================================
    // Store Callbacks
    // =========================================================================

    async fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::SetupFinished(result) => self.on_setup_finished(result).await,
            StoreEvent::Disconnected => {
                warn!("Store connection lost");
                if let ConnectDecision::RetryAfter(delay) = self.supervisor.on_disconnect() {
                    self.schedule_reconnect(delay);
                }
            }
            StoreEvent::PurchasesUpdated { result, purchases } => {
                self.on_purchases_updated(result, purchases).await
            }
        }
    }

    async fn on_setup_finished(&mut self, result: StoreResult) {
        match self.supervisor.on_setup(result.is_ok()) {
            ConnectDecision::Refresh => {
                info!("Store connection ready");
                self.events.connection.set(ConnectionState::Connected);
                self.refresh_details().await;
                self.reconciler.refresh_purchases().await;
            }
            ConnectDecision::RetryAfter(delay) => {
                warn!(
                    code = %result.code,
                    message = %result.debug_message,
                    "Store setup failed"
                );
                self.schedule_reconnect(delay);
            }
        }
    }

    async fn on_purchases_updated(&mut self, result: StoreResult, purchases: Vec<PurchaseRecord>) {
        if result.is_ok() && !purchases.is_empty() {
            // The flow flag stays set on this path; only a non-purchase
            // outcome clears it.
            self.reconciler.reconcile(&purchases, None).await;
            return;
        }

        match result.code {
            ResponseCode::Ok => debug!("Purchase update with an empty list"),
            ResponseCode::UserCanceled => info!("User canceled the purchase flow"),
            ResponseCode::ItemAlreadyOwned => info!("Item already owned"),
            ResponseCode::DeveloperError => error!(
                message = %result.debug_message,
                "Developer error, check the SKU ids and the store listing"
            ),
            code => warn!(%code, message = %result.debug_message, "Purchase update failed"),
        }
        self.events.flow_in_process.set(false);
    }

    async fn handle_requery(&mut self, request: DetailsRequery) {
        if self.is_connected() {
            debug!(trigger = %request.trigger, "Refreshing stale details");
            self.refresh_details().await;
        } else {
            // Setup refreshes details anyway once connected.
            debug!(trigger = %request.trigger, "Details requery while disconnected, dropped");
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, cmd: BillingCommand) {
        match cmd {
            BillingCommand::LaunchFlow {
                ui,
                sku,
                upgrade_candidates,
                reply,
            } => {
                let result = self.launcher.launch(&ui, &sku, &upgrade_candidates).await;
                let _ = reply.send(result);
            }
            BillingCommand::RefreshPurchases { reply } => {
                let result = if self.is_connected() {
                    Ok(self.reconciler.refresh_purchases().await)
                } else {
                    Err(BillingError::NotConnected)
                };
                let _ = reply.send(result);
            }
            BillingCommand::RefreshDetails { reply } => {
                let result = if self.is_connected() {
                    self.refresh_details().await;
                    Ok(())
                } else {
                    Err(BillingError::NotConnected)
                };
                let _ = reply.send(result);
            }
            BillingCommand::ConsumeById { sku, reply } => {
                let result = if self.is_connected() {
                    self.reconciler.consume_by_id(&sku).await
                } else {
                    Err(BillingError::NotConnected)
                };
                let _ = reply.send(result);
            }
            BillingCommand::Resume { reply } => {
                let refreshed = self.on_resume().await;
                let _ = reply.send(refreshed);
            }
            BillingCommand::Shutdown { reply } => {
                // Handled by the loop; kept for exhaustiveness.
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    async fn on_resume(&mut self) -> bool {
        let flow = self.events.flow_in_process.get();
        let connected = self.is_connected();
        if !flow && connected {
            self.reconciler.refresh_purchases().await;
            true
        } else {
            debug!(flow_in_process = flow, connected, "Skipping refresh on resume");
            false
        }
    }

    /// Fetches listing details for every configured id, one kind at a time.
    async fn refresh_details(&self) {
        for kind in SkuKind::ALL {
            let ids = self.catalog.ids_of(kind);
            if ids.is_empty() {
                continue;
            }

            let response = self.store.query_details(kind, ids).await;
            if !response.result.is_ok() {
                error!(
                    %kind,
                    code = %response.result.code,
                    message = %response.result.debug_message,
                    "Details query failed"
                );
                self.catalog.mark_stale(kind);
                continue;
            }
            if response.items.is_empty() {
                error!(%kind, "Store returned no details, check the SKU ids in the store console");
                continue;
            }

            let count = response.items.len();
            for details in response.items {
                if let Err(e) = self.catalog.apply_details(details) {
                    error!(error = %e, "Details for a SKU outside the catalog");
                }
            }
            debug!(%kind, count, "Details refreshed");
        }
    }
}
