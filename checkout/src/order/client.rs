use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument};

use crate::error::ServiceError;
use crate::http::{build_client, ensure_success, join};
use crate::order::types::{CreateOrderRequest, CreateOrderResponse};

/// Persists orders and commits their reservations atomically server-side.
#[async_trait]
pub trait OrderService: Send + Sync + 'static {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError>;
}

#[derive(Clone)]
pub struct HttpOrderClient {
    http: Client,
    url: String,
}

impl HttpOrderClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            http: build_client(timeout)?,
            url,
        })
    }
}

#[async_trait]
impl OrderService for HttpOrderClient {
    #[instrument(
        skip(self, request),
        fields(items = request.items.len(), payment_method = ?request.payment_method),
        level = "debug"
    )]
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        let url = join(&self.url, "orders");

        let resp = self.http.post(&url).json(request).send().await?;
        let body: CreateOrderResponse = ensure_success("create_order", resp).await?.json().await?;

        info!(
            order_id = %body.order_id,
            total_amount = body.total_amount,
            "order created"
        );

        Ok(body)
    }
}
