use crate::api::{
    OpenPositions, PortfolioHistory, PortfolioSummary, TradeLog, OPEN_POSITIONS,
    PORTFOLIO_HISTORY, PORTFOLIO_SUMMARY, TRADE_LOG,
};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Errors from fetching one endpoint.
#[derive(Debug)]
pub enum FetchError {
    /// Connection refused, timeout, ...
    Request(reqwest::Error),
    /// The server answered with a non-success status.
    Status(u16),
    /// The body was not the expected JSON.
    Decode(reqwest::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Request(e) => write!(f, "request failed: {e}"),
            FetchError::Status(code) => write!(f, "HTTP {code}"),
            FetchError::Decode(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Request(e) | FetchError::Decode(e) => Some(e),
            FetchError::Status(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Ok,
    Error,
}

/// Result of one tick: all four endpoints, each independently ok or failed.
#[derive(Debug)]
pub struct Snapshot {
    pub summary: Result<PortfolioSummary, FetchError>,
    pub positions: Result<OpenPositions, FetchError>,
    pub trade_log: Result<TradeLog, FetchError>,
    pub history: Result<PortfolioHistory, FetchError>,
}

impl Snapshot {
    /// `Error` if any endpoint failed.
    pub fn status(&self) -> PollStatus {
        if self.errors().is_empty() {
            PollStatus::Ok
        } else {
            PollStatus::Error
        }
    }

    /// Failed endpoints with their errors.
    pub fn errors(&self) -> Vec<(&'static str, &FetchError)> {
        let mut errors = Vec::new();
        if let Err(e) = &self.summary {
            errors.push((PORTFOLIO_SUMMARY, e));
        }
        if let Err(e) = &self.positions {
            errors.push((OPEN_POSITIONS, e));
        }
        if let Err(e) = &self.trade_log {
            errors.push((TRADE_LOG, e));
        }
        if let Err(e) = &self.history {
            errors.push((PORTFOLIO_HISTORY, e));
        }
        errors
    }
}

pub struct Poller {
    client: reqwest::Client,
    base_url: String,
}

impl Poller {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(FetchError::Request)?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        resp.json::<T>().await.map_err(FetchError::Decode)
    }

    /// Fetch all four endpoints in parallel.
    pub async fn poll_once(&self) -> Snapshot {
        let (summary, positions, trade_log, history) = tokio::join!(
            self.get_json::<PortfolioSummary>(PORTFOLIO_SUMMARY),
            self.get_json::<OpenPositions>(OPEN_POSITIONS),
            self.get_json::<TradeLog>(TRADE_LOG),
            self.get_json::<PortfolioHistory>(PORTFOLIO_HISTORY),
        );
        Snapshot {
            summary,
            positions,
            trade_log,
            history,
        }
    }

    /// Poll every `interval` until `shutdown` resolves, handing each snapshot to
    /// `on_snapshot`. A failed tick never stops the next one. Can be called
    /// again after it returns.
    pub async fn run<F, S>(&self, interval: Duration, mut on_snapshot: F, shutdown: S)
    where
        F: FnMut(&Snapshot),
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let snapshot = self.poll_once().await;
                    for (endpoint, e) in snapshot.errors() {
                        tracing::warn!(endpoint, error = %e, "poll failed");
                    }
                    on_snapshot(&snapshot);
                }
            }
        }
    }
}
