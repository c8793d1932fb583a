//! Deadline race for RPC exchanges.

use std::future::Future;
use std::task::Poll;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default deadline for a single exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

pub const DEFAULT_TIMEOUT_MESSAGE: &str = "Request timed out";

/// Races `operation` against `timeout`.
///
/// Resolves with the operation's own result if it settles first, otherwise with
/// [`Error::Timeout`] carrying `message` (or [`DEFAULT_TIMEOUT_MESSAGE`]).
///
/// The operation is polled once inline, so an already-settled operation wins
/// even with a zero deadline. Past that it runs as its own task: losing the
/// race does not cancel it, its eventual result is dropped.
pub async fn with_timeout<F, T>(operation: F, timeout: Duration, message: Option<&str>) -> Result<T>
where
	F: Future<Output = Result<T>> + Send + 'static,
	T: Send + 'static,
{
	let mut operation = Box::pin(operation);
	if let Poll::Ready(result) = futures_util::poll!(operation.as_mut()) {
		return result;
	}

	let mut handle = tokio::spawn(operation);
	tokio::select! {
		biased;
		joined = &mut handle => joined.unwrap_or_else(|e| Err(Error::rpc(format!("operation aborted: {e}")))),
		_ = tokio::time::sleep(timeout) => Err(Error::Timeout {
			message: message.unwrap_or(DEFAULT_TIMEOUT_MESSAGE).to_string(),
		}),
	}
}
