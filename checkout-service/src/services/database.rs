//! Database service for checkout-service.

use crate::models::{CreateOrder, Order, OrderStatus, Product, Subscription};
use crate::services::events::{OrderEventAction, OrderLookup};
use crate::services::metrics::DB_QUERY_DURATION;
use anyhow::anyhow;
use chrono::{Months, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Outcome of applying a webhook event to an order.
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The transition was applied by this delivery.
    Applied { subscription_granted: bool },
    /// Redelivered, stale, or terminal: accepted without side effects.
    NoOp { reason: &'static str },
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "checkout-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Product Operations (read-only; the catalog is managed elsewhere)
    // =========================================================================

    /// Get a product by ID.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, slug, name, description, coach_id, price_cents, billing_interval, is_active, features, created_utc, updated_utc
            FROM products
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to get product: {}", e)))?;

        timer.observe_duration();

        Ok(product)
    }

    /// List active products for the storefront.
    #[instrument(skip(self))]
    pub async fn list_active_products(&self) -> Result<Vec<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_products"])
            .start_timer();

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, slug, name, description, coach_id, price_cents, billing_interval, is_active, features, created_utc, updated_utc
            FROM products
            WHERE is_active = TRUE
            ORDER BY created_utc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to list products: {}", e)))?;

        timer.observe_duration();

        Ok(products)
    }

    // =========================================================================
    // Order Operations
    // =========================================================================

    /// Find an order previously created by this user with this idempotency key.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn find_order_by_idempotency_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Order>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_order_by_idempotency_key"])
            .start_timer();

        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, user_id, product_id, amount_cents, currency, status, provider, gateway_ref, payment_intent_ref, checkout_url, client_secret, idempotency_key, last_event_id, last_event_at, created_utc, updated_utc
            FROM orders
            WHERE user_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(user_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to look up order: {}", e)))?;

        timer.observe_duration();

        Ok(order)
    }

    /// Open a new order in `pending` state.
    ///
    /// `amount_cents` is the price snapshot; it is never updated.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, product_id = %input.product_id))]
    pub async fn create_order(&self, input: &CreateOrder) -> Result<Order, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_order"])
            .start_timer();

        let order_id = Uuid::new_v4();
        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (order_id, user_id, product_id, amount_cents, currency, status, provider, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)
            RETURNING order_id, user_id, product_id, amount_cents, currency, status, provider, gateway_ref, payment_intent_ref, checkout_url, client_secret, idempotency_key, last_event_id, last_event_at, created_utc, updated_utc
            "#,
        )
        .bind(order_id)
        .bind(input.user_id)
        .bind(input.product_id)
        .bind(input.amount_cents)
        .bind(&input.currency)
        .bind(input.provider.as_str())
        .bind(&input.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            // Loser of a concurrent-submission race on the idempotency
            // key; the caller replays the winner's order.
            sqlx::Error::Database(db)
                if db.constraint() == Some("idx_orders_idempotency_key") =>
            {
                AppError::Conflict(anyhow!("Order already exists for this idempotency key"))
            }
            _ => AppError::DatabaseError(anyhow!("Failed to create order: {}", e)),
        })?;

        timer.observe_duration();
        info!(order_id = %order.order_id, amount_cents = order.amount_cents, "Order created");

        Ok(order)
    }

    /// Attach the gateway checkout handle to a pending order.
    #[instrument(skip(self, checkout_url, client_secret), fields(order_id = %order_id))]
    pub async fn attach_checkout_session(
        &self,
        order_id: Uuid,
        gateway_ref: &str,
        checkout_url: Option<&str>,
        client_secret: Option<&str>,
    ) -> Result<Order, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["attach_checkout_session"])
            .start_timer();

        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET gateway_ref = $2, checkout_url = $3, client_secret = $4, updated_utc = now()
            WHERE order_id = $1
            RETURNING order_id, user_id, product_id, amount_cents, currency, status, provider, gateway_ref, payment_intent_ref, checkout_url, client_secret, idempotency_key, last_event_id, last_event_at, created_utc, updated_utc
            "#,
        )
        .bind(order_id)
        .bind(gateway_ref)
        .bind(checkout_url)
        .bind(client_secret)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to attach session: {}", e)))?;

        timer.observe_duration();

        Ok(order)
    }

    /// Mark an order `failed` after a gateway error during creation.
    ///
    /// Conditional on the order still being `pending`; the row is kept
    /// as an audit trail of the failed attempt.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_order_failed(&self, order_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_order_failed"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'failed', updated_utc = now()
            WHERE order_id = $1 AND status = 'pending'
            "#,
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to mark order failed: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    /// Get an order scoped to its owner.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_order_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Order>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order_for_user"])
            .start_timer();

        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, user_id, product_id, amount_cents, currency, status, provider, gateway_ref, payment_intent_ref, checkout_url, client_secret, idempotency_key, last_event_id, last_event_at, created_utc, updated_utc
            FROM orders
            WHERE user_id = $1 AND order_id = $2
            "#,
        )
        .bind(user_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to get order: {}", e)))?;

        timer.observe_duration();

        Ok(order)
    }

    // =========================================================================
    // Webhook Reconciliation
    // =========================================================================

    /// Apply an interpreted webhook event to its order.
    ///
    /// The transition is a conditional update keyed on the allowed prior
    /// statuses plus an event-recency guard, so concurrent or redelivered
    /// deliveries cannot double-apply. The first effective `paid`
    /// transition on a recurring product grants or renews the
    /// subscription inside the same transaction.
    ///
    /// Errors when the order cannot be found, or when the transition is
    /// neither applicable nor an idempotent repeat (e.g. a refund
    /// arriving before the payment) — the gateway retries those.
    #[instrument(skip(self, action), fields(event_id = %action.event_id, target = %action.target.as_str()))]
    pub async fn apply_order_event(
        &self,
        action: &OrderEventAction,
    ) -> Result<ApplyOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_order_event"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        let (lookup_sql, lookup_value) = match &action.lookup {
            OrderLookup::ByCheckoutSession(id) => ("gateway_ref", id.as_str()),
            OrderLookup::ByPaymentIntent(id) => ("payment_intent_ref", id.as_str()),
        };

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT order_id, user_id, product_id, amount_cents, currency, status, provider, gateway_ref, payment_intent_ref, checkout_url, client_secret, idempotency_key, last_event_id, last_event_at, created_utc, updated_utc
            FROM orders
            WHERE {} = $1
            FOR UPDATE
            "#,
            lookup_sql
        ))
        .bind(lookup_value)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load order: {}", e)))?;

        let order = order.ok_or_else(|| {
            AppError::NotFound(anyhow!(
                "No order with {} = {}",
                lookup_sql,
                lookup_value
            ))
        })?;

        let allowed: Vec<String> = action
            .target
            .allowed_prior_statuses()
            .iter()
            .map(|s| s.to_string())
            .collect();

        // Gateway timestamps have second granularity, so an event
        // stamped in the same second as the last applied one is still
        // applicable; only strictly older events are stale.
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1,
                payment_intent_ref = COALESCE($2, payment_intent_ref),
                last_event_id = $3,
                last_event_at = $4,
                updated_utc = now()
            WHERE order_id = $5
              AND status = ANY($6)
              AND (last_event_at IS NULL OR last_event_at <= $4)
            "#,
        )
        .bind(action.target.as_str())
        .bind(&action.payment_intent)
        .bind(&action.event_id)
        .bind(action.event_created)
        .bind(order.order_id)
        .bind(&allowed)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update order: {}", e)))?;

        if updated.rows_affected() == 0 {
            // The conditional update did not fire. Work out whether this
            // is an idempotent repeat or a transition we must reject so
            // the gateway redelivers later.
            tx.rollback()
                .await
                .map_err(|e| AppError::DatabaseError(anyhow!("Rollback failed: {}", e)))?;

            let current = order.status();
            if current == action.target {
                return Ok(ApplyOutcome::NoOp {
                    reason: "already in target status",
                });
            }
            if let Some(last) = order.last_event_at {
                if last > action.event_created {
                    return Ok(ApplyOutcome::NoOp {
                        reason: "event older than last applied",
                    });
                }
            }
            if current.is_terminal() {
                return Ok(ApplyOutcome::NoOp {
                    reason: "order in terminal status",
                });
            }
            // e.g. refund delivered before the payment event landed.
            return Err(AppError::Conflict(anyhow!(
                "Cannot move order {} from {} to {}",
                order.order_id,
                current.as_str(),
                action.target.as_str()
            )));
        }

        let mut subscription_granted = false;
        if action.target == OrderStatus::Paid {
            let product = sqlx::query_as::<_, Product>(
                r#"
                SELECT product_id, slug, name, description, coach_id, price_cents, billing_interval, is_active, features, created_utc, updated_utc
                FROM products
                WHERE product_id = $1
                "#,
            )
            .bind(order.product_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load product: {}", e)))?;

            if let Some(months) = product.billing_interval().period_months() {
                self.grant_subscription(&mut tx, &order, &product, months)
                    .await?;
                subscription_granted = true;
                crate::services::metrics::record_subscription_grant(
                    product.billing_interval().as_str(),
                );
            }
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Commit failed: {}", e)))?;

        timer.observe_duration();
        info!(
            order_id = %order.order_id,
            status = %action.target.as_str(),
            event_id = %action.event_id,
            "Order transitioned via webhook"
        );

        Ok(ApplyOutcome::Applied {
            subscription_granted,
        })
    }

    /// Create or renew the (user, product) subscription from a paid order.
    ///
    /// Renewal extends the period from whichever is later: the existing
    /// period end or the payment time.
    async fn grant_subscription(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order: &Order,
        product: &Product,
        period_months: u32,
    ) -> Result<(), AppError> {
        let period_start = Utc::now();
        let period_end = period_start
            .checked_add_months(Months::new(period_months))
            .ok_or_else(|| {
                AppError::InternalError(anyhow!("Period end overflow for subscription"))
            })?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, product_id, coach_id, order_id, status, current_period_start, current_period_end)
            VALUES ($1, $2, $3, $4, $5, 'active', $6, $7)
            ON CONFLICT (user_id, product_id) DO UPDATE SET
                status = 'active',
                order_id = EXCLUDED.order_id,
                current_period_start = GREATEST(subscriptions.current_period_end, EXCLUDED.current_period_start),
                current_period_end = GREATEST(subscriptions.current_period_end, EXCLUDED.current_period_start) + make_interval(months => $8),
                updated_utc = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.user_id)
        .bind(order.product_id)
        .bind(product.coach_id)
        .bind(order.order_id)
        .bind(period_start)
        .bind(period_end)
        .bind(period_months as i32)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to grant subscription: {}", e)))?;

        info!(
            user_id = %order.user_id,
            product_id = %order.product_id,
            months = period_months,
            "Subscription granted or renewed"
        );

        Ok(())
    }

    /// Get the (user, product) subscription, if any.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn get_subscription(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, product_id, coach_id, order_id, status, current_period_start, current_period_end, created_utc, updated_utc
            FROM subscriptions
            WHERE user_id = $1 AND product_id = $2
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to get subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }
}
