//! End-to-end behavior of the billing agent against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use tollgate_billing::{
    BillingError, ConnectionState, PurchaseState, ResponseCode, SkuState, StoreOperation,
    Storefront, UiHandle,
};
use tollgate_mockstore::MemoryStore;

use common::{eventually, ids, listed_store, start, start_connected, wait_connected, wait_for_state};

fn ui() -> UiHandle {
    UiHandle::new("test-activity")
}

fn assert_gap(gap: Duration, expected_secs: u64) {
    let expected = Duration::from_secs(expected_secs);
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(10),
        "gap {:?}, expected about {:?}",
        gap,
        expected
    );
}

// =============================================================================
// Connection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_setup_retries_with_doubling_delay() {
    let store = listed_store();
    store.refuse_connections(3, ResponseCode::ServiceUnavailable);

    let handle = start(&store);
    wait_connected(&handle).await;

    let times = store.connect_times();
    assert_eq!(times.len(), 4);
    assert_gap(times[1] - times[0], 1);
    assert_gap(times[2] - times[1], 2);
    assert_gap(times[3] - times[2], 4);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connection_reconnects() {
    let store = listed_store();
    let handle = start_connected(&store).await;

    assert!(store.drop_connection());

    let reconnected = eventually(|| async {
        store.calls(StoreOperation::StartConnection) == 2
            && handle.current_connection_state() == ConnectionState::Connected
    })
    .await;
    assert!(reconnected);
    assert!(store.is_connected());
}

#[tokio::test]
async fn test_shutdown_disconnects() {
    let store = listed_store();
    let handle = start_connected(&store).await;

    handle.shutdown().await.unwrap();

    assert_eq!(
        handle.current_connection_state(),
        ConnectionState::Disconnected
    );
    assert!(!store.is_connected());
    assert!(handle.refresh_purchases().await.is_err());
}

#[tokio::test]
async fn test_requests_fail_while_disconnected() {
    let store = listed_store();
    store.refuse_connections(100, ResponseCode::BillingUnavailable);
    let handle = start(&store);

    let result = handle.refresh_purchases().await;
    assert!(matches!(result, Err(BillingError::NotConnected)));

    let result = handle.consume_by_id("consa").await;
    assert!(matches!(result, Err(BillingError::NotConnected)));
}

#[tokio::test]
async fn test_setup_loads_owned_purchases() {
    let store = listed_store();
    store.grant(&["remove_ads"], PurchaseState::Purchased);

    let handle = start_connected(&store).await;

    assert_eq!(
        handle.state("remove_ads").unwrap(),
        SkuState::PurchasedAndAcknowledged
    );
    assert_eq!(handle.state("sub01").unwrap(), SkuState::Unpurchased);
    assert_eq!(
        handle.details("remove_ads").unwrap().map(|d| d.price),
        Some("$2.99".to_string())
    );
}

// =============================================================================
// Reactive Views
// =============================================================================

#[tokio::test]
async fn test_can_purchase_follows_ownership() {
    let store = listed_store();
    let handle = start_connected(&store).await;

    let mut can_purchase = handle.can_purchase("remove_ads").unwrap();
    assert_eq!(can_purchase.next().await, Some(true));

    store.grant(&["remove_ads"], PurchaseState::Purchased);
    handle.refresh_purchases().await.unwrap();

    let became_false = tokio::time::timeout(common::WAIT, async {
        while let Some(value) = can_purchase.next().await {
            if !value {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(became_false);

    let mut owned = handle.is_purchased("remove_ads").unwrap();
    assert_eq!(owned.next().await, Some(true));
}

#[tokio::test]
async fn test_unknown_sku_views_fail() {
    let store = listed_store();
    let handle = start(&store);

    assert!(matches!(
        handle.is_purchased("ghost"),
        Err(BillingError::UnknownSku(_))
    ));
    assert!(matches!(handle.price("ghost"), Err(BillingError::UnknownSku(_))));
}

#[tokio::test(start_paused = true)]
async fn test_stale_details_are_requeried_when_observed() {
    let store = listed_store();
    let handle = start_connected(&store).await;
    let baseline = store.calls(StoreOperation::QueryDetails);

    // Fresh details: observing does not hit the store.
    let mut price = handle.price("remove_ads").unwrap();
    assert_eq!(price.next().await, Some("$2.99".to_string()));
    drop(price);
    tokio::task::yield_now().await;
    assert_eq!(store.calls(StoreOperation::QueryDetails), baseline);

    tokio::time::advance(Duration::from_secs(4 * 3600 + 1)).await;

    let _title = handle.title("remove_ads").unwrap();
    let requeried = eventually(|| async {
        // One query per kind.
        store.calls(StoreOperation::QueryDetails) == baseline + 2
    })
    .await;
    assert!(requeried);
}

// =============================================================================
// Purchase Flows
// =============================================================================

#[tokio::test]
async fn test_buy_without_details_fails() {
    let store = Arc::new(MemoryStore::new());
    let handle = start_connected(&store).await;

    let result = handle.buy(ui(), "remove_ads").await;

    assert!(matches!(result, Err(BillingError::DetailsNotReady(_))));
    assert_eq!(store.calls(StoreOperation::LaunchFlow), 0);
    assert!(!handle.is_flow_in_process());
}

#[tokio::test]
async fn test_flow_flag_follows_store_answers() {
    let store = listed_store();
    let handle = start_connected(&store).await;

    let flow = handle.buy(ui(), "remove_ads").await.unwrap();
    assert_eq!(flow.sku, "remove_ads");
    assert!(flow.replaced_token.is_none());
    assert!(handle.is_flow_in_process());

    // A completed purchase leaves the flag set.
    store.complete_flow();
    wait_for_state(&handle, "remove_ads", SkuState::PurchasedAndAcknowledged).await;
    assert!(handle.is_flow_in_process());

    // A canceled flow clears it.
    handle.buy(ui(), "sub01").await.unwrap();
    assert!(store.cancel_flow());
    assert!(eventually(|| async { !handle.is_flow_in_process() }).await);
}

#[tokio::test]
async fn test_failed_launch_keeps_flag_clear() {
    let store = listed_store();
    let handle = start_connected(&store).await;
    store.fail_next(StoreOperation::LaunchFlow, ResponseCode::BillingUnavailable);

    let result = handle.buy(ui(), "remove_ads").await;

    assert!(matches!(
        result,
        Err(BillingError::Store {
            operation: StoreOperation::LaunchFlow,
            code: ResponseCode::BillingUnavailable,
            ..
        })
    ));
    assert!(!handle.is_flow_in_process());
}

#[tokio::test]
async fn test_buy_replaces_held_tier() {
    let store = listed_store();
    let held = store.grant(&["sub01"], PurchaseState::Purchased);
    let handle = start_connected(&store).await;

    let flow = handle.buy(ui(), "sub02").await.unwrap();

    assert_eq!(flow.replaced_token.as_deref(), Some(held.token.as_str()));
    let launched = store.launched_flows();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].details.sku, "sub02");
    assert_eq!(launched[0].replace_token.as_deref(), Some(held.token.as_str()));
}

#[tokio::test]
async fn test_two_held_tiers_abort_the_upgrade() {
    let store = listed_store();
    store.grant(&["sub01"], PurchaseState::Purchased);
    store.grant(&["sub02"], PurchaseState::Purchased);
    let handle = start_connected(&store).await;

    let result = handle
        .launch_flow(ui(), "sub02", ids(&["sub01", "sub02"]))
        .await;

    assert!(matches!(
        result,
        Err(BillingError::AmbiguousUpgrade { held: 2, .. })
    ));
    assert_eq!(store.calls(StoreOperation::LaunchFlow), 0);
    assert!(!handle.is_flow_in_process());
}

#[tokio::test]
async fn test_resume_skips_refresh_during_flow() {
    let store = listed_store();
    let handle = start_connected(&store).await;

    assert!(handle.on_resume().await.unwrap());

    handle.buy(ui(), "remove_ads").await.unwrap();
    let before = store.calls(StoreOperation::QueryPurchases);
    assert!(!handle.on_resume().await.unwrap());
    assert_eq!(store.calls(StoreOperation::QueryPurchases), before);
}

#[tokio::test]
async fn test_consume_by_id_emits_consumed() {
    let store = listed_store();
    let handle = start_connected(&store).await;
    let mut consumed = handle.consumed_purchases();
    store.grant(&["consa"], PurchaseState::Purchased);

    handle.consume_by_id("consa").await.unwrap();

    assert_eq!(consumed.next().await, Some(ids(&["consa"])));
    assert!(store.owned().is_empty());
    assert_eq!(handle.state("consa").unwrap(), SkuState::Unpurchased);
}

#[tokio::test]
async fn test_bought_consumable_is_consumed() {
    let store = listed_store();
    let handle = start_connected(&store).await;
    let mut new_purchases = handle.new_purchases();

    handle.buy(ui(), "consa").await.unwrap();
    store.complete_flow();

    assert_eq!(new_purchases.next().await, Some(ids(&["consa"])));
    assert_eq!(store.calls(StoreOperation::Consume), 1);
    assert_eq!(handle.state("consa").unwrap(), SkuState::Unpurchased);
}

// =============================================================================
// Storefront
// =============================================================================

#[tokio::test]
async fn test_storefront_upgrade_releases_old_tier() {
    let store = listed_store();
    store.grant(&["sub01"], PurchaseState::Purchased);
    let storefront = Storefront::new(start_connected(&store).await);
    let handle = storefront.handle().clone();
    wait_for_state(&handle, "sub01", SkuState::PurchasedAndAcknowledged).await;

    storefront.buy(ui(), "sub02").await.unwrap();
    store.complete_flow();

    wait_for_state(&handle, "sub02", SkuState::PurchasedAndAcknowledged).await;
    wait_for_state(&handle, "sub01", SkuState::Unpurchased).await;

    storefront.shutdown().await.unwrap();
}
