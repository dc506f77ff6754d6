pub mod order;
pub mod product;
pub mod subscription;

pub use order::{CreateOrder, Order, OrderStatus, PaymentProvider};
pub use product::{BillingInterval, Product};
pub use subscription::{Subscription, SubscriptionStatus};
