//! Domain errors for the checkout and reconciliation flows.

use service_core::error::AppError;
use thiserror::Error;

/// Failures the order-creation and webhook flows can surface.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The requested product is inactive or does not exist.
    #[error("Product is not available")]
    ProductUnavailable,

    /// The gateway call failed; the order is preserved as `failed`.
    /// Gateway internals are never leaked to the client.
    #[error("Payment initiation failed")]
    PaymentInitiationFailed,

    /// Webhook request arrived without a signature header.
    #[error("Missing signature")]
    MissingSignature,

    /// Webhook signature did not verify. May indicate a forged request.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Verified event could not be applied; the gateway will redeliver.
    #[error("Webhook processing failed")]
    ProcessingFailed(#[source] anyhow::Error),
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::ProductUnavailable => {
                AppError::BadRequest(anyhow::anyhow!("Product is not available"))
            }
            CheckoutError::PaymentInitiationFailed => {
                AppError::BadGateway("Payment initiation failed".to_string())
            }
            CheckoutError::MissingSignature => {
                AppError::BadRequest(anyhow::anyhow!("Missing signature"))
            }
            CheckoutError::InvalidSignature => {
                AppError::BadRequest(anyhow::anyhow!("Invalid signature"))
            }
            CheckoutError::ProcessingFailed(_) => {
                AppError::InternalError(anyhow::anyhow!("Webhook processing failed"))
            }
        }
    }
}
