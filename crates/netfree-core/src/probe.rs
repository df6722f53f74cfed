//! Internet reachability check.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use tracing::debug;

use netfree_logging::targets::T_SPOOF;

/// Decides whether the current link identity has Internet access
pub trait ConnectivityProbe {
    fn is_online(&self) -> bool;
}

/// Online iff a GET of the probe URL answers `200 OK` directly
///
/// Redirects are not followed: a captive portal usually answers with one.
/// Proxies are bypassed so the request leaves through the spoofed link.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .no_proxy()
            .build()
            .context("building HTTP client for connectivity probe")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ConnectivityProbe for HttpProbe {
    fn is_online(&self) -> bool {
        match self.client.get(&self.url).send() {
            Ok(response) => {
                let status = response.status();
                debug!(target: T_SPOOF, url = %self.url, %status, "probe answered");
                status == StatusCode::OK
            }
            Err(err) => {
                debug!(target: T_SPOOF, url = %self.url, "probe failed: {}", err);
                false
            }
        }
    }
}
