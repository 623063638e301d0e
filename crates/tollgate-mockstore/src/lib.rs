//! Mock store for exercising the billing agent without a vendor SDK.
//!
//! Provides `MemoryStore` - a `StoreClient` whose listings, owned purchases
//! and failures are scripted by the test. Purchases are signed with an
//! ed25519 key so they pass real verification.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use tollgate_billing::{StoreCallbacks, StoreClient, StoreOperation};
use tollgate_core::{
    DetailsResponse, FlowParams, PurchaseRecord, PurchaseState, PurchasesResponse, ResponseCode,
    SkuDetails, SkuId, SkuKind, StoreResult, UiHandle,
};

#[derive(Default)]
struct StoreState {
    details: HashMap<SkuId, SkuDetails>,
    owned: Vec<PurchaseRecord>,
    setup_outcomes: VecDeque<StoreResult>,
    failures: HashMap<StoreOperation, VecDeque<StoreResult>>,
    calls: HashMap<StoreOperation, usize>,
    connect_times: Vec<Instant>,
    launched: Vec<(UiHandle, FlowParams)>,
    callbacks: Option<StoreCallbacks>,
    consume_delay: Option<Duration>,
}

impl StoreState {
    fn kind_of(&self, sku: &str) -> SkuKind {
        self.details
            .get(sku)
            .map(|d| d.kind)
            .unwrap_or(SkuKind::OneTime)
    }

    /// Counts the call and pops a scripted failure for it, if any.
    fn enter(&mut self, op: StoreOperation) -> Option<StoreResult> {
        *self.calls.entry(op).or_default() += 1;
        self.failures.get_mut(&op).and_then(VecDeque::pop_front)
    }
}

/// In-memory `StoreClient`.
pub struct MemoryStore {
    signing_key: SigningKey,
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Creates a store with a fresh signing key.
    pub fn new() -> Self {
        Self::with_key(SigningKey::generate(&mut OsRng))
    }

    pub fn with_key(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Base64 public key to put in `security.public_key`.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.signing_key.verifying_key().to_bytes())
    }

    // =========================================================================
    // Listings
    // =========================================================================

    pub fn add_details(&self, details: SkuDetails) {
        self.state().details.insert(details.sku.clone(), details);
    }

    /// Adds a listing with a generated title and description.
    pub fn list(&self, sku: &str, kind: SkuKind, price: &str) {
        self.add_details(SkuDetails {
            sku: sku.to_string(),
            kind,
            title: format!("{} (Tollgate Demo)", sku),
            price: price.to_string(),
            description: format!("Description of {}", sku),
        });
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Signs `payload` with the store key.
    pub fn sign(&self, payload: &str) -> String {
        STANDARD.encode(self.signing_key.sign(payload.as_bytes()).to_bytes())
    }

    /// Builds a signed purchase without adding it to the owned list.
    pub fn signed_purchase(
        &self,
        skus: &[&str],
        state: PurchaseState,
        acknowledged: bool,
    ) -> PurchaseRecord {
        let token = Uuid::new_v4().to_string();
        let order_id = (state == PurchaseState::Purchased)
            .then(|| format!("GPA.{}", &token[..8]));
        let purchase_time = Utc::now();
        let payload = serde_json::json!({
            "orderId": order_id,
            "productIds": skus,
            "purchaseToken": token,
            "purchaseState": state.to_string(),
            "purchaseTime": purchase_time.timestamp_millis(),
        })
        .to_string();
        let signature = self.sign(&payload);

        PurchaseRecord {
            token,
            skus: skus.iter().map(|s| s.to_string()).collect(),
            state,
            acknowledged,
            payload,
            signature,
            order_id,
            purchase_time,
        }
    }

    /// Adds an unacknowledged signed purchase to the owned list.
    pub fn grant(&self, skus: &[&str], state: PurchaseState) -> PurchaseRecord {
        let record = self.signed_purchase(skus, state, false);
        self.insert_owned(record.clone());
        record
    }

    pub fn insert_owned(&self, record: PurchaseRecord) {
        self.state().owned.push(record);
    }

    pub fn remove_owned(&self, token: &str) -> Option<PurchaseRecord> {
        let mut state = self.state();
        let idx = state.owned.iter().position(|p| p.token == token)?;
        Some(state.owned.remove(idx))
    }

    /// Current owned purchases, both kinds.
    pub fn owned(&self) -> Vec<PurchaseRecord> {
        self.state().owned.clone()
    }

    // =========================================================================
    // Scripted Failures
    // =========================================================================

    /// The next `count` connection attempts answer with `code`.
    pub fn refuse_connections(&self, count: usize, code: ResponseCode) {
        let mut state = self.state();
        for _ in 0..count {
            state
                .setup_outcomes
                .push_back(StoreResult::new(code, "scripted setup failure"));
        }
    }

    /// The next call of `op` answers with `code`.
    pub fn fail_next(&self, op: StoreOperation, code: ResponseCode) {
        self.state()
            .failures
            .entry(op)
            .or_default()
            .push_back(StoreResult::new(code, format!("scripted {} failure", op)));
    }

    /// Makes every consume call wait before answering.
    pub fn set_consume_delay(&self, delay: Duration) {
        self.state().consume_delay = Some(delay);
    }

    // =========================================================================
    // Pushes (store → agent)
    // =========================================================================

    /// Delivers a purchases update. Returns false if nobody is connected.
    pub fn push_purchases(&self, result: StoreResult, purchases: Vec<PurchaseRecord>) -> bool {
        let callbacks = self.state().callbacks.clone();
        match callbacks {
            Some(cb) => {
                cb.on_purchases_updated(result, purchases);
                true
            }
            None => false,
        }
    }

    /// Simulates the session dropping.
    pub fn drop_connection(&self) -> bool {
        let callbacks = self.state().callbacks.take();
        match callbacks {
            Some(cb) => {
                cb.on_disconnected();
                true
            }
            None => false,
        }
    }

    /// Completes the most recent launched flow as the user paying.
    ///
    /// The replaced subscription, if any, leaves the owned list.
    pub fn complete_flow(&self) -> Option<PurchaseRecord> {
        let (_, params) = self.state().launched.last().cloned()?;
        if let Some(token) = &params.replace_token {
            self.remove_owned(token);
        }
        let record = self.grant(&[params.details.sku.as_str()], PurchaseState::Purchased);
        self.push_purchases(StoreResult::ok(), vec![record.clone()]);
        Some(record)
    }

    /// Completes the most recent launched flow as the user backing out.
    pub fn cancel_flow(&self) -> bool {
        self.push_purchases(
            StoreResult::new(ResponseCode::UserCanceled, "user canceled"),
            Vec::new(),
        )
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// How many times `op` was called.
    pub fn calls(&self, op: StoreOperation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// When each connection attempt started.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.state().connect_times.clone()
    }

    pub fn launched_flows(&self) -> Vec<FlowParams> {
        self.state().launched.iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.state().callbacks.is_some()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn start_connection(&self, callbacks: StoreCallbacks) {
        let outcome = {
            let mut state = self.state();
            *state.calls.entry(StoreOperation::StartConnection).or_default() += 1;
            state.connect_times.push(Instant::now());
            let outcome = state.setup_outcomes.pop_front().unwrap_or_else(StoreResult::ok);
            if outcome.is_ok() {
                state.callbacks = Some(callbacks.clone());
            }
            outcome
        };
        debug!(code = %outcome.code, "Mock store setup");
        callbacks.on_setup_finished(outcome);
    }

    async fn end_connection(&self) {
        self.state().callbacks = None;
    }

    async fn query_details(&self, kind: SkuKind, ids: &[SkuId]) -> DetailsResponse {
        let mut state = self.state();
        if let Some(result) = state.enter(StoreOperation::QueryDetails) {
            return DetailsResponse {
                result,
                items: Vec::new(),
            };
        }
        let items = ids
            .iter()
            .filter_map(|id| state.details.get(id))
            .filter(|d| d.kind == kind)
            .cloned()
            .collect();
        DetailsResponse {
            result: StoreResult::ok(),
            items,
        }
    }

    async fn query_owned_purchases(&self, kind: SkuKind) -> PurchasesResponse {
        let mut state = self.state();
        if let Some(result) = state.enter(StoreOperation::QueryPurchases) {
            return PurchasesResponse {
                result,
                purchases: Vec::new(),
            };
        }
        let purchases = state
            .owned
            .iter()
            .filter(|p| p.skus.first().map(|s| state.kind_of(s)) == Some(kind))
            .cloned()
            .collect();
        PurchasesResponse {
            result: StoreResult::ok(),
            purchases,
        }
    }

    async fn launch_flow(&self, ui: &UiHandle, params: FlowParams) -> StoreResult {
        let mut state = self.state();
        if let Some(result) = state.enter(StoreOperation::LaunchFlow) {
            return result;
        }
        state.launched.push((ui.clone(), params));
        StoreResult::ok()
    }

    async fn consume(&self, token: &str) -> StoreResult {
        let (scripted, delay) = {
            let mut state = self.state();
            (state.enter(StoreOperation::Consume), state.consume_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(result) = scripted {
            return result;
        }
        match self.remove_owned(token) {
            Some(_) => StoreResult::ok(),
            None => StoreResult::new(ResponseCode::ItemNotOwned, "unknown purchase token"),
        }
    }

    async fn acknowledge(&self, token: &str) -> StoreResult {
        let mut state = self.state();
        if let Some(result) = state.enter(StoreOperation::Acknowledge) {
            return result;
        }
        match state.owned.iter_mut().find(|p| p.token == token) {
            Some(purchase) => {
                purchase.acknowledged = true;
                StoreResult::ok()
            }
            None => StoreResult::new(ResponseCode::ItemNotOwned, "unknown purchase token"),
        }
    }
}
