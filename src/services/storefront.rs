use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// Where the buyer's browser should go next
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum RedirectTarget {
    ThankYou,
    Checkout,
    Landing,
    /// Issuer step-up page returned by the gateway
    StepUp(String),
}

/// Storefront side effect requested by a handler; applied by the HTTP layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Effect {
    ClearCart,
    Notice(String),
}

/// Pure result of handling a checkout submission or a browser callback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// The order the effects belong to; `None` when nothing matched
    pub order_id: Option<Uuid>,
    pub order_number: Option<String>,
    /// `None` re-presents the checkout form in place
    pub redirect: Option<RedirectTarget>,
    pub effects: Vec<Effect>,
}

impl Outcome {
    pub fn redirect(target: RedirectTarget) -> Self {
        Self {
            redirect: Some(target),
            ..Default::default()
        }
    }

    pub fn for_order(mut self, order_id: Uuid, order_number: impl Into<String>) -> Self {
        self.order_id = Some(order_id);
        self.order_number = Some(order_number.into());
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn notices(&self) -> Vec<String> {
        self.effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Notice(message) => Some(message.clone()),
                Effect::ClearCart => None,
            })
            .collect()
    }

    pub fn clears_cart(&self) -> bool {
        self.effects.contains(&Effect::ClearCart)
    }
}

/// Storefront URLs the redirect targets resolve to
#[derive(Clone, Debug)]
pub struct StorefrontUrls {
    pub thank_you_url: String,
    pub checkout_url: String,
    pub landing_url: String,
}

impl StorefrontUrls {
    pub fn resolve(&self, target: &RedirectTarget, order_number: Option<&str>) -> String {
        match (target, order_number) {
            (RedirectTarget::ThankYou, Some(number)) => {
                let separator = if self.thank_you_url.contains('?') { '&' } else { '?' };
                format!("{}{}order={}", self.thank_you_url, separator, number)
            }
            (RedirectTarget::ThankYou, None) => self.thank_you_url.clone(),
            (RedirectTarget::Checkout, _) => self.checkout_url.clone(),
            (RedirectTarget::Landing, _) => self.landing_url.clone(),
            (RedirectTarget::StepUp(url), _) => url.clone(),
        }
    }
}

/// Cart and notice surface of the hosting shop.
#[async_trait]
pub trait Storefront: Send + Sync {
    async fn clear_cart(&self, order_id: Uuid);

    async fn add_notice(&self, order_id: Uuid, message: String);

    /// Notices queued for the buyer of `order_id`, oldest first; reading drains them.
    async fn take_notices(&self, order_id: Uuid) -> Vec<String>;
}

pub async fn apply_effects(storefront: &dyn Storefront, order_id: Uuid, effects: &[Effect]) {
    for effect in effects {
        match effect {
            Effect::ClearCart => storefront.clear_cart(order_id).await,
            Effect::Notice(message) => storefront.add_notice(order_id, message.clone()).await,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStorefront {
    cleared_carts: DashSet<Uuid>,
    notices: DashMap<Uuid, Vec<String>>,
}

impl InMemoryStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cart_cleared(&self, order_id: Uuid) -> bool {
        self.cleared_carts.contains(&order_id)
    }
}

#[async_trait]
impl Storefront for InMemoryStorefront {
    async fn clear_cart(&self, order_id: Uuid) {
        debug!(%order_id, "clearing cart");
        self.cleared_carts.insert(order_id);
    }

    async fn add_notice(&self, order_id: Uuid, message: String) {
        self.notices.entry(order_id).or_default().push(message);
    }

    async fn take_notices(&self, order_id: Uuid) -> Vec<String> {
        self.notices
            .remove(&order_id)
            .map(|(_, messages)| messages)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> StorefrontUrls {
        StorefrontUrls {
            thank_you_url: "https://shop.example.com/checkout/thank-you".into(),
            checkout_url: "https://shop.example.com/checkout".into(),
            landing_url: "https://shop.example.com/".into(),
        }
    }

    #[test]
    fn thank_you_url_carries_order_number() {
        assert_eq!(
            urls().resolve(&RedirectTarget::ThankYou, Some("1042")),
            "https://shop.example.com/checkout/thank-you?order=1042"
        );
        assert_eq!(
            urls().resolve(
                &RedirectTarget::StepUp("https://3ds.example.com/s/1".into()),
                Some("1042")
            ),
            "https://3ds.example.com/s/1"
        );
    }

    #[tokio::test]
    async fn effects_are_applied_in_order() {
        let storefront = InMemoryStorefront::new();
        let order_id = Uuid::new_v4();
        apply_effects(
            &storefront,
            order_id,
            &[
                Effect::Notice("first".into()),
                Effect::ClearCart,
                Effect::Notice("second".into()),
            ],
        )
        .await;

        assert!(storefront.cart_cleared(order_id));
        assert_eq!(storefront.take_notices(order_id).await, vec!["first", "second"]);
        assert!(storefront.take_notices(order_id).await.is_empty());
    }
}
