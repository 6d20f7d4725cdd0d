use std::sync::atomic::Ordering;

use super::support::*;
use crate::application::{CheckoutInput, CheckoutSessionUseCase, CheckoutUseCase};
use crate::domain::entities::Transaction;
use crate::domain::services::split_fee;
use crate::domain::value_objects::{Email, Purchaser, TransactionStatus};
use crate::error::{MarketError, MarketResult};
use kernel::id::UserId;

fn checkout(h: &Harness) -> CheckoutUseCase<MemoryMarket, FakeGateway> {
    CheckoutUseCase::new(
        h.state.repo.clone(),
        h.state.gateway.clone(),
        h.state.config.clone(),
    )
}

async fn buy(
    h: &Harness,
    user_id: Option<UserId>,
    resource_id: String,
    guest_email: Option<&str>,
) -> MarketResult<crate::application::CheckoutOutput> {
    checkout(h)
        .execute(CheckoutInput {
            user_id,
            resource_id,
            guest_email: guest_email.map(str::to_string),
        })
        .await
}

#[tokio::test]
async fn test_checkout_requires_an_identity() {
    let h = Harness::new().await;
    let id = h.resource.id.to_string();

    let result = buy(&h, None, id.clone(), None).await;
    assert!(matches!(result, Err(MarketError::Unauthenticated)));

    let result = buy(&h, None, id.clone(), Some("   ")).await;
    assert!(matches!(result, Err(MarketError::Unauthenticated)));

    let result = buy(&h, None, id, Some("not-an-email")).await;
    assert!(matches!(result, Err(MarketError::InvalidEmail(_))));
}

#[tokio::test]
async fn test_checkout_unknown_resource() {
    let h = Harness::new().await;
    let result = buy(&h, None, "garbage".into(), Some("gast@example.com")).await;
    assert!(matches!(result, Err(MarketError::ResourceNotFound)));

    let result = buy(
        &h,
        None,
        kernel::id::ResourceId::new().to_string(),
        Some("gast@example.com"),
    )
    .await;
    assert!(matches!(result, Err(MarketError::ResourceNotFound)));
}

#[tokio::test]
async fn test_checkout_unlisted_resource() {
    let h = Harness::new().await;
    let mut draft = resource(&h.seller, 1500);
    draft.is_published = false;
    h.repo().insert_resource(draft.clone()).await;

    let result = buy(&h, None, draft.id.to_string(), Some("gast@example.com")).await;
    assert!(matches!(result, Err(MarketError::ResourceNotAvailable)));
}

#[tokio::test]
async fn test_checkout_own_resource() {
    let h = Harness::new().await;
    let result = buy(&h, Some(h.seller.id), h.resource.id.to_string(), None).await;
    assert!(matches!(result, Err(MarketError::OwnResource)));
}

#[tokio::test]
async fn test_checkout_guest_with_seller_email_is_not_own_resource() {
    let h = Harness::new().await;
    let result = buy(
        &h,
        None,
        h.resource.id.to_string(),
        Some(h.seller.email.as_str()),
    )
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_checkout_already_purchased() {
    let h = Harness::new().await;
    let buyer = h.buyer("kaeufer@example.com").await;
    let mut done = Transaction::pending(
        Purchaser::Registered(buyer.id),
        h.resource.id,
        split_fee(990, 3000),
    );
    done.status = TransactionStatus::Completed;
    h.repo().insert_transaction(done).await;

    let result = buy(&h, Some(buyer.id), h.resource.id.to_string(), None).await;
    assert!(matches!(result, Err(MarketError::AlreadyPurchased)));

    // Same for a guest who already bought with that email
    let mut guest_done = Transaction::pending(
        Purchaser::Guest(Email::from_db("gast@example.com")),
        h.resource.id,
        split_fee(990, 3000),
    );
    guest_done.status = TransactionStatus::Completed;
    h.repo().insert_transaction(guest_done).await;
    let result = buy(&h, None, h.resource.id.to_string(), Some("GAST@example.com")).await;
    assert!(matches!(result, Err(MarketError::AlreadyPurchased)));
}

#[tokio::test]
async fn test_checkout_failed_attempt_does_not_block_retry() {
    let h = Harness::new().await;
    let buyer = h.buyer("kaeufer@example.com").await;
    let mut failed = Transaction::pending(
        Purchaser::Registered(buyer.id),
        h.resource.id,
        split_fee(990, 3000),
    );
    failed.status = TransactionStatus::Failed;
    h.repo().insert_transaction(failed).await;

    assert!(buy(&h, Some(buyer.id), h.resource.id.to_string(), None).await.is_ok());
}

#[tokio::test]
async fn test_checkout_seller_not_payable() {
    let h = Harness::new().await;
    let newbie = user("anfang@example.com", crate::domain::value_objects::UserRole::Seller);
    h.repo().insert_user(newbie.clone()).await;
    let material = resource(&newbie, 500);
    h.repo().insert_resource(material.clone()).await;

    let result = buy(&h, None, material.id.to_string(), Some("gast@example.com")).await;
    assert!(matches!(result, Err(MarketError::SellerNotPayable)));
}

#[tokio::test]
async fn test_checkout_free_resource() {
    let h = Harness::new().await;
    let free = resource(&h.seller, 0);
    h.repo().insert_resource(free.clone()).await;

    let result = buy(&h, None, free.id.to_string(), Some("gast@example.com")).await;
    assert!(matches!(result, Err(MarketError::FreeResource)));
}

#[tokio::test]
async fn test_checkout_validation_leaves_no_pending_rows() {
    let h = Harness::new().await;
    let free = resource(&h.seller, 0);
    h.repo().insert_resource(free.clone()).await;

    let _ = buy(&h, None, free.id.to_string(), Some("gast@example.com")).await;
    let _ = buy(&h, Some(h.seller.id), h.resource.id.to_string(), None).await;

    assert!(h.repo().state.lock().await.transactions.is_empty());
    assert!(h.state.gateway.sessions.lock().await.is_empty());
}

#[tokio::test]
async fn test_checkout_sends_split_and_destination_to_gateway() {
    let h = Harness::new().await;
    let output = buy(
        &h,
        None,
        h.resource.id.to_string(),
        Some("gast@example.com"),
    )
    .await
    .unwrap();

    assert_eq!(output.session_id, "cs_test_1");
    assert!(output.checkout_url.ends_with("cs_test_1"));

    let sessions = h.state.gateway.sessions.lock().await;
    let request = &sessions[0];
    assert_eq!(request.amount, 990);
    assert_eq!(request.platform_fee, 297);
    assert_eq!(request.currency, "chf");
    assert_eq!(request.seller_account_id, "acct_seller");
    assert_eq!(request.transaction_id, output.transaction_id);
    assert_eq!(request.customer_id, None);
    assert!(request.purchaser.is_guest());
    assert!(request.success_url.contains("{CHECKOUT_SESSION_ID}"));
    assert!(request.cancel_url.contains(&h.resource.id.to_string()));
    drop(sessions);

    let stored = h.repo().transaction(&output.transaction_id).await;
    assert_eq!(stored.checkout_session_id.as_deref(), Some("cs_test_1"));
    assert_eq!(stored.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_checkout_reuses_gateway_customer() {
    let h = Harness::new().await;
    let buyer = h.buyer("kaeufer@example.com").await;
    let second = resource(&h.seller, 2500);
    h.repo().insert_resource(second.clone()).await;

    buy(&h, Some(buyer.id), h.resource.id.to_string(), None)
        .await
        .unwrap();
    buy(&h, Some(buyer.id), second.id.to_string(), None)
        .await
        .unwrap();

    assert_eq!(h.state.gateway.customers_created.load(Ordering::SeqCst), 1);
    let sessions = h.state.gateway.sessions.lock().await;
    assert_eq!(sessions[0].customer_id.as_deref(), Some("cus_test_1"));
    assert_eq!(sessions[1].customer_id.as_deref(), Some("cus_test_1"));
}

#[tokio::test]
async fn test_checkout_gateway_outage_is_service_unavailable() {
    let h = Harness::new().await;
    h.state.gateway.fail.store(true, Ordering::SeqCst);

    let result = buy(
        &h,
        None,
        h.resource.id.to_string(),
        Some("gast@example.com"),
    )
    .await;
    let err = result.unwrap_err();
    assert!(matches!(err, MarketError::PaymentGateway(_)));
    assert_eq!(err.code(), "PAYMENT_SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_checkout_session_lookup_is_scoped_to_buyer() {
    let h = Harness::new().await;
    let buyer = h.buyer("kaeufer@example.com").await;
    let output = buy(&h, Some(buyer.id), h.resource.id.to_string(), None)
        .await
        .unwrap();
    let lookup = CheckoutSessionUseCase::new(h.state.repo.clone(), h.state.config.clone());

    let view = lookup
        .execute(Some(buyer.id), &output.session_id)
        .await
        .unwrap();
    assert_eq!(view.transaction_id, output.transaction_id);
    assert_eq!(view.amount, 990);
    assert_eq!(view.formatted_amount, "CHF 9.90");
    assert_eq!(view.status, TransactionStatus::Pending);
    assert_eq!(view.resource_id, h.resource.id);
    assert_eq!(view.resource_title, "Bruchrechnen Werkstatt");

    let other = h.buyer("andere@example.com").await;
    let result = lookup.execute(Some(other.id), &output.session_id).await;
    assert!(matches!(result, Err(MarketError::NotFound)));

    let result = lookup.execute(None, &output.session_id).await;
    assert!(matches!(result, Err(MarketError::Unauthenticated)));
}
