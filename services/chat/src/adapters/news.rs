//! services/chat/src/adapters/news.rs
//!
//! This module contains the adapter for the news collaborator.
//! It implements the `NewsService` port from the `core` crate.

use async_trait::async_trait;
use carechat_core::domain::Headline;
use carechat_core::ports::{NewsService, PortError, PortResult};
use serde::Deserialize;
use tracing::debug;

const NEWS_API_URL: &str = "https://api.thenewsapi.com/v1/news/top";

#[derive(Deserialize)]
struct TopStoriesResponse {
    #[serde(default)]
    data: Vec<Article>,
}

#[derive(Deserialize)]
struct Article {
    title: String,
    #[serde(default)]
    description: String,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `NewsService` port against
/// thenewsapi.com's top-stories endpoint.
#[derive(Clone)]
pub struct TheNewsApiAdapter {
    client: reqwest::Client,
    api_token: String,
}

impl TheNewsApiAdapter {
    /// Creates a new `TheNewsApiAdapter`.
    pub fn new(client: reqwest::Client, api_token: String) -> Self {
        Self { client, api_token }
    }
}

//=========================================================================================
// `NewsService` Trait Implementation
//=========================================================================================

#[async_trait]
impl NewsService for TheNewsApiAdapter {
    async fn top_headlines(&self, limit: usize) -> PortResult<Vec<Headline>> {
        let response = self
            .client
            .get(NEWS_API_URL)
            .query(&[
                ("api_token", self.api_token.as_str()),
                ("locale", "us"),
                ("language", "en"),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let body: TopStoriesResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(count = body.data.len(), "fetched top headlines");
        Ok(body
            .data
            .into_iter()
            .map(|article| Headline {
                title: article.title,
                description: article.description,
            })
            .collect())
    }
}
