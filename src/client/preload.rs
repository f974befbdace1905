//! Preload helpers
//!
//! Data loading runs against the primary and then waits for the
//! secondaries to replicate far enough, polling each secondary's
//! `/status` map until the shard HighTS reaches the target.

use std::collections::HashMap;
use std::time::Duration;

use crate::client::api::ClientContext;
use crate::common::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_DEADLINE: Duration = Duration::from_secs(120);

impl ClientContext {
    /// Read the freshest copy of `key` straight from its primary.
    /// Returns (value, object timestamp, primary HighTS).
    pub async fn primary_latest(&self, key: &str) -> Result<(String, i64, i64)> {
        let primary = self.config().shard_for_key(key).primary.clone();
        let url = format!("http://{}/get?key={}", primary, key);
        let resp = self.http().get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "get returned {} from {}",
                resp.status(),
                primary
            )));
        }
        let body: crate::node::http::GetResponse = resp
            .json()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))?;
        Ok((body.value, body.timestamp, body.high_ts))
    }

    /// Wait until every secondary of `key`'s shard reports a HighTS
    /// of at least `target_ts`. Polls every 5 s for up to 2 minutes.
    pub async fn wait_for_secondaries(&self, key: &str, target_ts: i64) -> Result<()> {
        self.wait_for_secondaries_with(key, target_ts, POLL_INTERVAL, POLL_DEADLINE)
            .await
    }

    pub async fn wait_for_secondaries_with(
        &self,
        key: &str,
        target_ts: i64,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<()> {
        let shard = self.config().shard_for_key(key);
        let shard_id = shard.id;
        let secondaries = shard.secondaries.clone();
        let started = std::time::Instant::now();

        loop {
            if started.elapsed() > deadline {
                return Err(Error::Timeout(format!(
                    "secondaries of shard {} did not reach ts {}",
                    shard_id, target_ts
                )));
            }
            tokio::time::sleep(poll_interval).await;

            let mut all_caught_up = true;
            for secondary in &secondaries {
                match self.shard_status(secondary).await {
                    Ok(status) => {
                        let seen = status.get(&shard_id).copied().unwrap_or(0);
                        if seen < target_ts {
                            tracing::debug!(
                                secondary = %secondary,
                                shard = shard_id,
                                seen,
                                want = target_ts,
                                "secondary not caught up"
                            );
                            all_caught_up = false;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(secondary = %secondary, error = %e, "status poll failed");
                        all_caught_up = false;
                    }
                }
            }

            if all_caught_up {
                tracing::info!(shard = shard_id, target_ts, "all secondaries caught up");
                return Ok(());
            }
        }
    }

    /// Fetch a node's shard → HighTS map.
    pub async fn shard_status(&self, node: &str) -> Result<HashMap<u64, i64>> {
        let url = format!("http://{}/status", node);
        let resp = self.http().get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "status returned {} from {}",
                resp.status(),
                node
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))
    }
}
