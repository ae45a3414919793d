use super::{TrackerRequest, TrackerResponse};
use crate::bencode::decode;
use crate::error::{BittorrentError, Result};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, info};

/// Client for communicating with BitTorrent trackers
pub struct TrackerClient {
    client: Client,
}

impl TrackerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Send an announce to a tracker and get the peer list
    pub async fn announce(&self, tracker_url: &str, request: &TrackerRequest) -> Result<TrackerResponse> {
        info!("Announcing to tracker: {}", tracker_url);

        let separator = if tracker_url.contains('?') { '&' } else { '?' };
        let url = Url::parse(&format!(
            "{}{}{}",
            tracker_url,
            separator,
            request.to_query_string()
        ))?;

        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        debug!("Tracker response status: {}, body length: {}", status, body.len());

        if !status.is_success() {
            return Err(BittorrentError::TrackerError(format!("HTTP error: {}", status)));
        }

        let tracker_response = TrackerResponse::from_bencode(&decode(&body)?)?;

        info!(
            "Received {} peers from tracker (interval: {}s)",
            tracker_response.peers.len(),
            tracker_response.interval
        );
        debug!(
            "Tracker reports {:?} seeders, {:?} leechers, min interval {:?}",
            tracker_response.complete, tracker_response.incomplete, tracker_response.min_interval
        );

        Ok(tracker_response)
    }
}
