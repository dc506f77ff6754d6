//! Product catalog handler. Read-only; the catalog is administered elsewhere.

use axum::{extract::State, Json};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{models::Product, startup::AppState};

/// Storefront product DTO.
#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub product_id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub billing_interval: String,
    pub features: Option<serde_json::Value>,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            product_id: p.product_id,
            slug: p.slug,
            name: p.name,
            description: p.description,
            price_cents: p.price_cents,
            billing_interval: p.billing_interval,
            features: p.features,
        }
    }
}

/// List active products for the mobile storefront.
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductResponse>>, AppError> {
    let products = state.db.list_active_products().await?;
    Ok(Json(
        products.into_iter().map(ProductResponse::from).collect(),
    ))
}
