//! Product model. Managed by the admin surface; read-only here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How often a product bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    OneTime,
    Monthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::OneTime => "one_time",
            BillingInterval::Monthly => "monthly",
            BillingInterval::Quarterly => "quarterly",
            BillingInterval::Semiannual => "semiannual",
            BillingInterval::Annual => "annual",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "monthly" => BillingInterval::Monthly,
            "quarterly" => BillingInterval::Quarterly,
            "semiannual" => BillingInterval::Semiannual,
            "annual" => BillingInterval::Annual,
            _ => BillingInterval::OneTime,
        }
    }

    /// Length of one billing period, in months. `None` for one-time purchases.
    pub fn period_months(&self) -> Option<u32> {
        match self {
            BillingInterval::OneTime => None,
            BillingInterval::Monthly => Some(1),
            BillingInterval::Quarterly => Some(3),
            BillingInterval::Semiannual => Some(6),
            BillingInterval::Annual => Some(12),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.period_months().is_some()
    }
}

/// Purchasable coaching product.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub product_id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub coach_id: Option<Uuid>,
    pub price_cents: i64,
    pub billing_interval: String,
    pub is_active: bool,
    pub features: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Product {
    pub fn billing_interval(&self) -> BillingInterval {
        BillingInterval::from_string(&self.billing_interval)
    }
}
