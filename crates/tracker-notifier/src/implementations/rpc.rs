//! JSON-RPC signature poller.
//!
//! Each subscription spawns a polling task that asks the node for the
//! signature's status at a fixed interval, until the configured commitment
//! is reached. Individual requests are retried with exponential backoff
//! within `request_timeout`; a request that still fails is logged and the
//! next tick tries again. There is no overall deadline.

use crate::types::{Commitment, RpcNotifierConfig};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracker_types::{
	NotificationSource, NotifierError, OutcomeSender, Signature, SignatureOutcome, SubscriptionId,
};

/// Status entry returned by `getSignatureStatuses`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
	pub slot: u64,
	/// `None` once the block is rooted.
	pub confirmations: Option<u64>,
	/// Transaction error, `null` on success.
	#[serde(default)]
	pub err: Option<serde_json::Value>,
	pub confirmation_status: Option<Commitment>,
}

impl SignatureStatus {
	/// Converts the status into an outcome once `commitment` is reached.
	pub fn outcome(&self, commitment: Commitment) -> Option<SignatureOutcome> {
		let reached = match self.confirmation_status {
			Some(status) => status >= commitment,
			// Older nodes omit the field; rooted blocks report no confirmations
			None => self.confirmations.is_none(),
		};

		if !reached {
			return None;
		}

		Some(SignatureOutcome {
			error: self.err.as_ref().map(|err| err.to_string()),
		})
	}
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
	result: Option<T>,
	error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
	code: i64,
	message: String,
}

#[derive(Debug, Deserialize)]
struct SignatureStatuses {
	value: Vec<Option<SignatureStatus>>,
}

/// Parses a `getSignatureStatuses` response body for a single signature.
///
/// Returns `Ok(None)` while the node does not know the signature yet.
pub fn parse_status_response(body: &str) -> Result<Option<SignatureStatus>, NotifierError> {
	let response: RpcResponse<SignatureStatuses> =
		serde_json::from_str(body).map_err(|e| NotifierError::Rpc(e.to_string()))?;

	if let Some(error) = response.error {
		return Err(NotifierError::Rpc(format!(
			"{} (code {})",
			error.message, error.code
		)));
	}

	let statuses = response
		.result
		.ok_or_else(|| NotifierError::Rpc("response has neither result nor error".to_string()))?;

	Ok(statuses.value.into_iter().next().flatten())
}

/// Notification source polling a JSON-RPC node.
pub struct RpcSignatureNotifier {
	client: reqwest::Client,
	config: RpcNotifierConfig,
	tasks: Arc<DashMap<SubscriptionId, JoinHandle<()>>>,
}

impl RpcSignatureNotifier {
	pub fn new(config: RpcNotifierConfig) -> Result<Self, NotifierError> {
		let client = reqwest::Client::builder()
			.timeout(config.request_timeout)
			.build()
			.map_err(|e| {
				NotifierError::Unavailable(format!("Failed to create HTTP client: {}", e))
			})?;

		Ok(Self {
			client,
			config,
			tasks: Arc::new(DashMap::new()),
		})
	}

	/// Number of polling tasks still running.
	pub fn active_subscriptions(&self) -> usize {
		self.tasks
			.iter()
			.filter(|entry| !entry.value().is_finished())
			.count()
	}

	async fn fetch_status(
		client: &reqwest::Client,
		rpc_url: &str,
		signature: &Signature,
	) -> Result<Option<SignatureStatus>, NotifierError> {
		let request = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "getSignatureStatuses",
			"params": [[signature.as_str()], { "searchTransactionHistory": true }],
		});

		let response = client
			.post(rpc_url)
			.json(&request)
			.send()
			.await
			.map_err(|e| NotifierError::Rpc(format!("HTTP request failed: {}", e)))?;

		if !response.status().is_success() {
			return Err(NotifierError::Rpc(format!(
				"HTTP request failed with status: {}",
				response.status()
			)));
		}

		let body = response
			.text()
			.await
			.map_err(|e| NotifierError::Rpc(format!("Failed to read response: {}", e)))?;

		parse_status_response(&body)
	}

	/// Background task polling one signature until it resolves.
	async fn poll_signature(
		client: reqwest::Client,
		config: RpcNotifierConfig,
		signature: Signature,
		sender: OutcomeSender,
	) {
		let mut ticker = interval(config.poll_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		let mut attempts: u64 = 0;

		loop {
			ticker.tick().await;

			if sender.is_closed() {
				debug!("Receiver for {} dropped, stopping poll", signature);
				return;
			}

			attempts += 1;
			let policy = ExponentialBackoffBuilder::new()
				.with_max_elapsed_time(Some(config.request_timeout))
				.build();

			let (client_ref, url, sig) = (&client, config.rpc_url.as_str(), &signature);
			let result = backoff::future::retry(policy, || async move {
				Self::fetch_status(client_ref, url, sig)
					.await
					.map_err(backoff::Error::transient)
			})
			.await;

			match result {
				Ok(Some(status)) => match status.outcome(config.commitment) {
					Some(outcome) => {
						info!(
							"Signature {} reached {} at slot {} after {} attempt(s)",
							signature,
							config.commitment.as_str(),
							status.slot,
							attempts
						);
						let _ = sender.send(outcome);
						return;
					}
					None => debug!(
						"Signature {} seen at slot {}, waiting for {}",
						signature,
						status.slot,
						config.commitment.as_str()
					),
				},
				Ok(None) => debug!("Signature {} not yet known (attempt {})", signature, attempts),
				Err(e) => warn!("Failed to fetch status for {}: {}", signature, e),
			}
		}
	}
}

#[async_trait]
impl NotificationSource for RpcSignatureNotifier {
	fn name(&self) -> &str {
		"rpc"
	}

	async fn subscribe(
		&self,
		signature: &Signature,
		sender: OutcomeSender,
	) -> Result<SubscriptionId, NotifierError> {
		// Drop handles of polls that already delivered
		self.tasks.retain(|_, handle| !handle.is_finished());

		let id = SubscriptionId::new();
		let handle = tokio::spawn(Self::poll_signature(
			self.client.clone(),
			self.config.clone(),
			signature.clone(),
			sender,
		));
		self.tasks.insert(id, handle);

		debug!("Polling {} as subscription {}", signature, id);
		Ok(id)
	}

	async fn unsubscribe(&self, id: SubscriptionId) {
		if let Some((_, handle)) = self.tasks.remove(&id) {
			handle.abort();
			debug!("Stopped polling subscription {}", id);
		}
	}
}
