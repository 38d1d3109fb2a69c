use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::error::ServiceError;
use crate::http::{build_client, ensure_success, join};
use crate::promotion::types::PromotionRule;

/// Read-only promotion lookup, consulted when a product enters the cart.
#[async_trait]
pub trait PromotionCatalog: Send + Sync + 'static {
    async fn active_promotion_for(
        &self,
        product_id: &str,
    ) -> Result<Option<PromotionRule>, ServiceError>;
}

#[derive(Clone)]
pub struct HttpPromotionCatalog {
    http: Client,
    url: String,
}

impl HttpPromotionCatalog {
    pub fn new(url: String, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            http: build_client(timeout)?,
            url,
        })
    }
}

#[async_trait]
impl PromotionCatalog for HttpPromotionCatalog {
    #[instrument(skip(self), fields(product_id = %product_id), level = "debug")]
    async fn active_promotion_for(
        &self,
        product_id: &str,
    ) -> Result<Option<PromotionRule>, ServiceError> {
        let url = join(&self.url, "promotions/active");

        let resp = self
            .http
            .get(&url)
            .query(&[("productId", product_id)])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let rule: Option<PromotionRule> = ensure_success("active_promotion", resp)
            .await?
            .json()
            .await?;

        debug!(found = rule.is_some(), "promotion lookup complete");
        Ok(rule)
    }
}
