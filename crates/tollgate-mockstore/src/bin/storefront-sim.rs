//! # storefront-sim
//!
//! Runs the billing agent against the in-memory store and walks through
//! the purchase lifecycle: a non-consumable, a consumable, and a
//! subscription upgrade.
//!
//! ```text
//! RUST_LOG=tollgate_billing=debug cargo run -p tollgate-mockstore --bin storefront-sim
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate_billing::{
    BillingAgent, BillingConfig, BillingResult, CatalogSpec, ConnectionState, SkuKind, Storefront,
    UiHandle,
};
use tollgate_mockstore::MemoryStore;

#[tokio::main]
async fn main() -> BillingResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(MemoryStore::new());
    store.list("consa", SkuKind::OneTime, "$0.99");
    store.list("remove_ads", SkuKind::OneTime, "$2.99");
    store.list("sub01", SkuKind::Subscription, "$1.99/month");
    store.list("sub02", SkuKind::Subscription, "$4.99/month");

    let mut config = BillingConfig::new(CatalogSpec {
        one_time: vec!["consa".into(), "remove_ads".into()],
        subscriptions: vec!["sub01".into(), "sub02".into()],
        auto_consume: vec!["consa".into()],
        upgrade_groups: vec![vec!["sub01".into(), "sub02".into()]],
    });
    config.security.public_key = Some(store.public_key_base64());

    let agent = BillingAgent::from_config(&config, store.clone())?;
    let storefront = Storefront::new(agent.start());
    let handle = storefront.handle().clone();

    let mut connection = handle.connection_state();
    while let Some(state) = connection.next().await {
        if state == ConnectionState::Connected {
            break;
        }
    }
    info!("Connected to the simulated store");

    let mut new_purchases = handle.new_purchases();
    let ui = UiHandle::new("sim");

    for sku in ["remove_ads", "consa", "sub01", "sub02"] {
        match storefront.buy(ui.clone(), sku).await {
            Ok(flow) => info!(sku, upgrade = flow.replaced_token.is_some(), "Flow launched"),
            Err(e) => {
                warn!(sku, error = %e, "Could not launch flow");
                continue;
            }
        }
        store.complete_flow();

        if let Ok(Some(skus)) =
            tokio::time::timeout(Duration::from_secs(1), new_purchases.next()).await
        {
            info!(?skus, "New purchase");
        }
        // Let the subscription watcher finish its refresh.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for sku in ["consa", "remove_ads", "sub01", "sub02"] {
        info!(sku, state = %handle.state(sku)?, "Final state");
    }

    storefront.shutdown().await
}
