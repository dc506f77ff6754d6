//! Order handlers.
//!
//! Implements order creation (checkout initiation) and order lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::CheckoutError,
    middleware::AuthContext,
    models::{CreateOrder, Order, PaymentProvider},
    services::metrics::record_order_operation,
    startup::AppState,
};

/// Request to create a new order.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    /// Product to purchase.
    pub product_id: Uuid,
    /// Gateway selector; defaults to the platform's primary gateway.
    pub provider: Option<String>,
    /// Client-generated key. Resubmitting with the same key returns the
    /// original order instead of opening a second one.
    #[validate(length(min = 1, max = 64))]
    pub idempotency_key: Option<String>,
}

/// Response after opening an order.
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    /// Hosted checkout URL for the payer.
    pub checkout_url: Option<String>,
    /// Client secret for embedded checkout.
    pub client_secret: Option<String>,
}

/// Order details DTO.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub provider: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        Self {
            order_id: o.order_id,
            product_id: o.product_id,
            amount_cents: o.amount_cents,
            currency: o.currency,
            status: o.status,
            provider: o.provider,
            created_utc: o.created_utc,
            updated_utc: o.updated_utc,
        }
    }
}

/// Create a new order and open a gateway checkout session for it.
///
/// The order row is persisted regardless of the gateway outcome: a
/// gateway failure leaves it behind in `failed` as an audit trail of
/// the attempt.
pub async fn create_order(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    payload.validate()?;

    let provider = match payload.provider.as_deref() {
        Some(selector) => PaymentProvider::parse(selector).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unsupported payment provider: {}", selector))
        })?,
        None => PaymentProvider::default(),
    };

    tracing::info!(
        user_id = %auth.user_id,
        product_id = %payload.product_id,
        provider = provider.as_str(),
        "Creating order"
    );

    // Idempotent replay: the same key returns the original checkout handle.
    if let Some(ref key) = payload.idempotency_key {
        if let Some(existing) = state
            .db
            .find_order_by_idempotency_key(auth.user_id, key)
            .await?
        {
            tracing::info!(order_id = %existing.order_id, "Returning existing order for idempotency key");
            record_order_operation("create", "replayed");
            return Ok((
                StatusCode::CREATED,
                Json(CreateOrderResponse {
                    order_id: existing.order_id,
                    checkout_url: existing.checkout_url,
                    client_secret: existing.client_secret,
                }),
            ));
        }
    }

    let product = state
        .db
        .get_product(payload.product_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| {
            record_order_operation("create", "product_unavailable");
            AppError::from(CheckoutError::ProductUnavailable)
        })?;

    let order = match state
        .db
        .create_order(&CreateOrder {
            user_id: auth.user_id,
            product_id: product.product_id,
            amount_cents: product.price_cents,
            currency: state.config.checkout.default_currency.clone(),
            provider,
            idempotency_key: payload.idempotency_key.clone(),
        })
        .await
    {
        Ok(order) => order,
        // A concurrent submission with the same key won the insert;
        // replay its order instead of surfacing the race.
        Err(AppError::Conflict(_)) => {
            let key = payload.idempotency_key.as_deref().unwrap_or_default();
            let existing = state
                .db
                .find_order_by_idempotency_key(auth.user_id, key)
                .await?
                .ok_or_else(|| {
                    AppError::Conflict(anyhow::anyhow!("Concurrent order submission"))
                })?;
            tracing::info!(order_id = %existing.order_id, "Returning existing order for idempotency key");
            record_order_operation("create", "replayed");
            return Ok((
                StatusCode::CREATED,
                Json(CreateOrderResponse {
                    order_id: existing.order_id,
                    checkout_url: existing.checkout_url,
                    client_secret: existing.client_secret,
                }),
            ));
        }
        Err(e) => return Err(e),
    };

    let session = match state.stripe.create_checkout_session(&order, &product).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(order_id = %order.order_id, error = %e, "Failed to create checkout session");
            state.db.mark_order_failed(order.order_id).await?;
            record_order_operation("create", "gateway_failed");
            return Err(CheckoutError::PaymentInitiationFailed.into());
        }
    };

    let order = state
        .db
        .attach_checkout_session(
            order.order_id,
            &session.id,
            session.url.as_deref(),
            session.client_secret.as_deref(),
        )
        .await?;

    tracing::info!(
        order_id = %order.order_id,
        session_id = %session.id,
        "Order created and checkout session opened"
    );
    record_order_operation("create", "ok");

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.order_id,
            checkout_url: order.checkout_url,
            client_secret: order.client_secret,
        }),
    ))
}

/// Get one of the caller's orders (for status polling).
pub async fn get_order(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .db
        .get_order_for_user(auth.user_id, order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;

    Ok(Json(OrderResponse::from(order)))
}
