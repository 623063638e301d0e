//! Shared fixtures for the billing integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use tollgate_billing::{
    AckNotifyPolicy, BillingAgent, BillingConfig, BillingHandle, CatalogSpec, ConnectionState,
    SkuKind, SkuState,
};
use tollgate_mockstore::MemoryStore;

/// How long a test waits for the agent before failing.
pub const WAIT: Duration = Duration::from_secs(30);

pub fn catalog() -> CatalogSpec {
    CatalogSpec {
        one_time: vec!["consa".into(), "remove_ads".into()],
        subscriptions: vec!["sub01".into(), "sub02".into()],
        auto_consume: vec!["consa".into()],
        upgrade_groups: vec![vec!["sub01".into(), "sub02".into()]],
    }
}

/// A store listing every catalog item.
pub fn listed_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.list("consa", SkuKind::OneTime, "$0.99");
    store.list("remove_ads", SkuKind::OneTime, "$2.99");
    store.list("sub01", SkuKind::Subscription, "$1.99");
    store.list("sub02", SkuKind::Subscription, "$4.99");
    store
}

pub fn config(store: &MemoryStore) -> BillingConfig {
    let mut config = BillingConfig::new(catalog());
    config.security.public_key = Some(store.public_key_base64());
    config
}

pub fn config_with_policy(store: &MemoryStore, policy: AckNotifyPolicy) -> BillingConfig {
    let mut config = config(store);
    config.notifications.ack_notify = policy;
    config
}

pub fn start(store: &Arc<MemoryStore>) -> BillingHandle {
    let agent = BillingAgent::from_config(&config(store), store.clone()).expect("valid config");
    agent.start()
}

/// Starts an agent and waits until its first refresh has run.
pub async fn start_connected(store: &Arc<MemoryStore>) -> BillingHandle {
    let handle = start(store);
    wait_connected(&handle).await;
    // Commands queue behind the setup refresh, so a round trip through the
    // worker means details and purchases are loaded.
    handle.refresh_details().await.expect("connected");
    handle
}

pub async fn wait_connected(handle: &BillingHandle) {
    let mut states = handle.connection_state();
    tokio::time::timeout(WAIT, async {
        while let Some(state) = states.next().await {
            if state == ConnectionState::Connected {
                return;
            }
        }
        panic!("connection stream ended");
    })
    .await
    .expect("agent never connected");
}

pub async fn wait_for_state(handle: &BillingHandle, id: &str, expected: SkuState) {
    let polled = eventually(|| async { handle.state(id).ok() == Some(expected) }).await;
    assert!(
        polled,
        "{} never reached {}, still {:?}",
        id,
        expected,
        handle.state(id)
    );
}

/// Polls `check` until it holds or `WAIT` runs out.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

pub fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}
