pub mod database;
pub mod events;
pub mod metrics;
pub mod stripe;

pub use database::{ApplyOutcome, Database};
pub use events::{interpret_event, parse_webhook_event, Interpretation, OrderEventAction, OrderLookup};
pub use metrics::{get_metrics, init_metrics};
pub use stripe::{CheckoutSession, StripeClient};
