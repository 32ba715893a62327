use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{OrderCatalog, OrderDetails, OrderPhase, RestaurantDetails};
use crate::error::AppError;

pub struct HttpOrderCatalog {
    client: Client,
    order_base_url: String,
    restaurant_base_url: String,
}

impl HttpOrderCatalog {
    pub fn new(order_base_url: String, restaurant_base_url: String) -> Self {
        Self {
            client: Client::new(),
            order_base_url: trim_slash(order_base_url),
            restaurant_base_url: trim_slash(restaurant_base_url),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, AppError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| AppError::CollaboratorUnavailable(format!("{url}: {err}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("{url} returned 404")));
        }
        if !response.status().is_success() {
            return Err(AppError::CollaboratorUnavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        response.json::<T>().await.map_err(|err| {
            AppError::CollaboratorUnavailable(format!("{url} returned malformed payload: {err}"))
        })
    }
}

#[derive(Deserialize)]
struct OrderStatusResponse {
    status: OrderPhase,
}

#[async_trait]
impl OrderCatalog for HttpOrderCatalog {
    async fn fetch_order(&self, order_id: Uuid) -> Result<OrderDetails, AppError> {
        self.get_json(format!("{}/orders/{order_id}", self.order_base_url))
            .await
    }

    async fn fetch_restaurant(&self, restaurant_id: Uuid) -> Result<RestaurantDetails, AppError> {
        self.get_json(format!(
            "{}/restaurants/{restaurant_id}",
            self.restaurant_base_url
        ))
        .await
    }

    async fn fetch_order_status(&self, order_id: Uuid) -> Result<OrderPhase, AppError> {
        let response: OrderStatusResponse = self
            .get_json(format!("{}/orders/{order_id}/status", self.order_base_url))
            .await?;
        Ok(response.status)
    }
}

fn trim_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
