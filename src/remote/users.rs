//! Users service client: one elo snapshot per connection.

use serde::Deserialize;
use std::time::Duration;

const ELO_TIMEOUT: Duration = Duration::from_millis(2000);

/// Rating handed out when the Users service cannot answer in time or
/// answers with a malformed body.
pub const DEFAULT_ELO: u32 = 1000;

#[derive(Debug, Deserialize)]
struct EloResponse {
    elo: u32,
}

#[derive(Clone)]
pub struct UsersClient {
    http: reqwest::Client,
    base_url: String,
}

impl UsersClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        UsersClient {
            http,
            base_url: base_url.into(),
        }
    }

    /// Fetch the skill rating for `user_id`, falling back to
    /// [`DEFAULT_ELO`] on any transport or validation failure.
    pub async fn fetch_elo(&self, user_id: &str) -> u32 {
        let url = format!("{}/users/{}/elo", self.base_url, user_id);
        let resp = match self.http.get(&url).timeout(ELO_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("users service unreachable for {user_id}: {e}");
                return DEFAULT_ELO;
            }
        };

        if !resp.status().is_success() {
            log::warn!("users service returned {} for {user_id}", resp.status());
            return DEFAULT_ELO;
        }

        match resp.json::<EloResponse>().await {
            Ok(body) => body.elo,
            Err(e) => {
                log::warn!("malformed elo body for {user_id}: {e}");
                DEFAULT_ELO
            }
        }
    }
}
