use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::order::{Order, OrderNote, PaymentMeta, PaymentStatus};

/// Result of a compare-and-set on an order's payment status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusTransition {
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// The current status was not among the expected ones, or the order is frozen for review
    Rejected { current: PaymentStatus },
}

impl StatusTransition {
    pub fn is_applied(&self) -> bool {
        matches!(self, StatusTransition::Applied { .. })
    }
}

/// Order persistence required by the payment core.
///
/// Every method is a single atomic step; `compare_and_set_status` is the only
/// way to change an order's payment status.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<(), ServiceError>;

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError>;

    async fn find_by_cowpay_reference(
        &self,
        cowpay_reference_id: &str,
    ) -> Result<Option<Order>, ServiceError>;

    /// Stores `candidate` as the order's merchant reference unless one is already
    /// assigned, and returns whichever reference the order ends up with.
    async fn assign_merchant_reference(
        &self,
        order_id: Uuid,
        candidate: String,
    ) -> Result<String, ServiceError>;

    /// Merges the populated fields of `meta` into the stored metadata.
    async fn save_payment_meta(&self, order_id: Uuid, meta: PaymentMeta)
        -> Result<(), ServiceError>;

    async fn append_note(&self, order_id: Uuid, message: String) -> Result<(), ServiceError>;

    async fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: &[PaymentStatus],
        new_status: PaymentStatus,
    ) -> Result<StatusTransition, ServiceError>;

    /// Freezes the order: later compare-and-set calls are rejected until an operator intervenes.
    async fn flag_for_review(&self, order_id: Uuid) -> Result<(), ServiceError>;
}

/// In-process store backed by `DashMap`; each order's entry lock makes every
/// mutation atomic with respect to concurrent handlers.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    by_cowpay_reference: DashMap<String, Uuid>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_order<T>(
        &self,
        order_id: Uuid,
        f: impl FnOnce(&mut Order) -> T,
    ) -> Result<T, ServiceError> {
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
        Ok(f(entry.value_mut()))
    }
}

fn touch(order: &mut Order) {
    order.version += 1;
    order.updated_at = Some(Utc::now());
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), ServiceError> {
        if let Some(reference) = &order.payment.cowpay_reference_id {
            self.by_cowpay_reference.insert(reference.clone(), order.id);
        }
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn find_by_cowpay_reference(
        &self,
        cowpay_reference_id: &str,
    ) -> Result<Option<Order>, ServiceError> {
        let Some(order_id) = self
            .by_cowpay_reference
            .get(cowpay_reference_id)
            .map(|entry| *entry.value())
        else {
            return Ok(None);
        };
        self.find_by_id(order_id).await
    }

    async fn assign_merchant_reference(
        &self,
        order_id: Uuid,
        candidate: String,
    ) -> Result<String, ServiceError> {
        self.with_order(order_id, |order| {
            if let Some(existing) = &order.payment.merchant_reference_id {
                return existing.clone();
            }
            order.payment.merchant_reference_id = Some(candidate.clone());
            touch(order);
            candidate
        })
    }

    async fn save_payment_meta(
        &self,
        order_id: Uuid,
        meta: PaymentMeta,
    ) -> Result<(), ServiceError> {
        let reference = meta.cowpay_reference_id.clone();
        self.with_order(order_id, |order| {
            let stored = &mut order.payment;
            if meta.merchant_reference_id.is_some() {
                stored.merchant_reference_id = meta.merchant_reference_id;
            }
            if meta.cowpay_reference_id.is_some() {
                stored.cowpay_reference_id = meta.cowpay_reference_id;
            }
            if meta.customer_profile_id.is_some() {
                stored.customer_profile_id = meta.customer_profile_id;
            }
            if meta.signature.is_some() {
                stored.signature = meta.signature;
            }
            if meta.raw_request.is_some() {
                stored.raw_request = meta.raw_request;
            }
            if meta.raw_response.is_some() {
                stored.raw_response = meta.raw_response;
            }
            touch(order);
        })?;

        // Earlier references stay indexed so late notifications for a previous attempt still resolve.
        if let Some(reference) = reference {
            self.by_cowpay_reference.insert(reference, order_id);
        }
        Ok(())
    }

    async fn append_note(&self, order_id: Uuid, message: String) -> Result<(), ServiceError> {
        self.with_order(order_id, |order| {
            order.notes.push(OrderNote::new(message));
            touch(order);
        })
    }

    async fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: &[PaymentStatus],
        new_status: PaymentStatus,
    ) -> Result<StatusTransition, ServiceError> {
        self.with_order(order_id, |order| {
            let current = order.status;
            if order.review_required || !expected.contains(&current) {
                debug!(%order_id, %current, requested = %new_status, "status compare-and-set rejected");
                return StatusTransition::Rejected { current };
            }
            order.status = new_status;
            touch(order);
            StatusTransition::Applied {
                from: current,
                to: new_status,
            }
        })
    }

    async fn flag_for_review(&self, order_id: Uuid) -> Result<(), ServiceError> {
        self.with_order(order_id, |order| {
            order.review_required = true;
            touch(order);
        })
    }
}
