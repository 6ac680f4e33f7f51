//!
//! HTTP client for JSON ledger explorers with a WebSocket block feed.
//!
//! This module provides an async client implementing `LedgerExplorer` over a REST API, plus a
//! real-time subscription to new blocks used to trigger synchronization. GET requests that fail
//! with a transient network error are retried with exponential backoff; everything else is
//! reported as-is.

use super::types::*;
use super::LedgerExplorer;
use crate::config::ExplorerConfig;

use backoff::{ExponentialBackoff, future::retry};
use futures_util::{SinkExt, StreamExt};
use itertools::Itertools;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info};

/// JSON explorer client
#[derive(Clone)]
pub struct HttpLedgerExplorer {
	/// The underlying HTTP client.
	http_client: Client,
	/// The base URL of the explorer REST API.
	base_url: String,
	/// The WebSocket URL for block notifications.
	ws_url: Option<String>,
	/// Upper bound on time spent retrying one transient failure.
	max_retry_elapsed: Duration,
}

impl HttpLedgerExplorer {
	/// Create a new explorer client.
	///
	/// # Arguments
	/// * `config` - Endpoints and timeouts for the explorer.
	///
	/// # Returns
	/// A new `HttpLedgerExplorer`, or a `Network` error if the HTTP client cannot be built.
	pub fn new(config: &ExplorerConfig) -> Result<Self, ExplorerError> {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(config.request_timeout_secs))
			.build()?;

		Ok(Self {
			http_client,
			base_url: config.base_url.trim_end_matches('/').to_string(),
			ws_url: config.ws_url.clone(),
			max_retry_elapsed: Duration::from_secs(config.max_retry_elapsed_secs),
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path.trim_start_matches('/'))
	}

	/// Execute a GET request and decode the JSON body.
	///
	/// # Arguments
	/// * `path` - Path relative to the base URL.
	/// * `query` - Query string parameters.
	///
	/// # Returns
	/// The decoded body, or an `ExplorerError`. Non-success statuses become `Api` errors
	/// carrying the remote status and message.
	pub async fn get_json<T: DeserializeOwned>(
		&self,
		path: &str,
		query: &[(&str, String)],
	) -> Result<T, ExplorerError> {
		let url = self.url(path);
		let policy = ExponentialBackoff {
			max_elapsed_time: Some(self.max_retry_elapsed),
			..ExponentialBackoff::default()
		};

		retry(policy, || async {
			debug!("GET {} {:?}", url, query);
			let response = self
				.http_client
				.get(&url)
				.query(query)
				.send()
				.await
				.map_err(|e| classify(ExplorerError::from(e)))?;

			decode_response(response).await.map_err(classify)
		})
		.await
	}

	/// Subscribe to new blocks.
	///
	/// # Returns
	/// A pinned async stream of `Block` results, or a `WebSocket` error if the connection or
	/// subscription fails. Without a configured WebSocket URL the call fails immediately.
	pub async fn subscribe_blocks(
		&self,
	) -> Result<
		std::pin::Pin<Box<dyn futures_util::Stream<Item = Result<Block, ExplorerError>> + Send>>,
		ExplorerError,
	> {
		let ws_url = self
			.ws_url
			.as_ref()
			.ok_or_else(|| ExplorerError::WebSocket("No WebSocket URL configured".to_string()))?;

		debug!("Attempting WebSocket connection to: {}", ws_url);
		let (ws_stream, response) = connect_async(ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, ws_receiver) = ws_stream.split();

		let subscribe_message = json!({
			"type": "subscribe",
			"channel": "blocks"
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;
		info!("Subscribed to new blocks on {}", ws_url);

		let stream = ws_receiver.filter_map(|msg| async move {
			match msg {
				Ok(Message::Text(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
					Ok(parsed) => match parsed.get("type").and_then(|t| t.as_str()) {
						Some("block") => match parsed.get("payload") {
							Some(payload) => match serde_json::from_value::<Block>(payload.clone()) {
								Ok(block) => Some(Ok(block)),
								Err(e) => {
									error!("Failed to deserialize block notification: {}", e);
									Some(Err(ExplorerError::from(e)))
								}
							},
							None => Some(Err(ExplorerError::Parse(
								"Block notification without payload".to_string(),
							))),
						},
						Some("error") => {
							let error_msg = parsed
								.get("message")
								.and_then(|m| m.as_str())
								.unwrap_or("Unknown subscription error");
							Some(Err(ExplorerError::WebSocket(error_msg.to_string())))
						}
						Some(other) => {
							debug!("Ignoring message type: {}", other);
							None
						}
						None => Some(Err(ExplorerError::Parse(
							"Message missing type field".to_string(),
						))),
					},
					Err(e) => Some(Err(ExplorerError::from(e))),
				},
				Ok(Message::Close(_)) => {
					info!("Block subscription closed by explorer");
					None
				}
				Ok(_) => None,
				Err(e) => Some(Err(ExplorerError::from(e))),
			}
		});

		Ok(Box::pin(stream))
	}
}

/// Only network failures are worth retrying.
fn classify(e: ExplorerError) -> backoff::Error<ExplorerError> {
	if e.is_transient() {
		backoff::Error::transient(e)
	} else {
		backoff::Error::permanent(e)
	}
}

async fn decode_response<T: DeserializeOwned>(
	response: reqwest::Response,
) -> Result<T, ExplorerError> {
	let status = response.status();
	if !status.is_success() {
		let message = response.text().await.unwrap_or_default();
		return Err(ExplorerError::Api {
			status: status.as_u16(),
			message,
		});
	}
	let body = response.bytes().await?;
	Ok(serde_json::from_slice(&body)?)
}

#[async_trait::async_trait]
impl LedgerExplorer for HttpLedgerExplorer {
	async fn get_account(&self, address: &str) -> Result<AccountInfo, ExplorerError> {
		match self.get_json(&format!("accounts/{}", address), &[]).await {
			Err(ExplorerError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
				Err(ExplorerError::AccountNotFound(address.to_string()))
			}
			other => other,
		}
	}

	async fn get_transactions(
		&self,
		addresses: &[String],
		from_block_hash: Option<&str>,
		batch_size: u32,
	) -> Result<Page<Transaction>, ExplorerError> {
		let mut query = vec![("batch_size", batch_size.to_string())];
		if let Some(hash) = from_block_hash {
			query.push(("block_hash", hash.to_string()));
		}
		self.get_json(
			&format!("addresses/{}/transactions", addresses.iter().join(",")),
			&query,
		)
		.await
	}

	async fn get_account_transactions(
		&self,
		address: &str,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError> {
		let mut query = vec![("order", "asc".to_string())];
		if let Some(cursor) = cursor {
			query.push(("cursor", cursor.to_string()));
		}
		self.get_json(&format!("accounts/{}/transactions", address), &query)
			.await
	}

	async fn get_operations(
		&self,
		address: &str,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError> {
		let mut query = vec![("order", "asc".to_string())];
		if let Some(cursor) = cursor {
			query.push(("cursor", cursor.to_string()));
		}
		self.get_json(&format!("accounts/{}/operations", address), &query)
			.await
	}

	async fn get_current_block(&self) -> Result<Block, ExplorerError> {
		self.get_json("blocks/current", &[]).await
	}

	async fn get_fee_estimate(&self) -> Result<FeeStats, ExplorerError> {
		self.get_json("fee_stats", &[]).await
	}

	async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, ExplorerError> {
		let body = json!({ "tx": hex::encode(raw_tx) });
		let response = self
			.http_client
			.post(self.url("transactions"))
			.json(&body)
			.send()
			.await?;

		let result: serde_json::Value = decode_response(response).await?;
		let hash = result
			.get("hash")
			.and_then(|h| h.as_str())
			.ok_or_else(|| ExplorerError::Parse("Broadcast response without hash".to_string()))?
			.to_string();

		info!("Broadcast transaction {}", hash);
		Ok(hash)
	}
}
