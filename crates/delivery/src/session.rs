//! Authenticated session to the remote ingest API.
//!
//! The session token is captured once at startup via `GET {base}login/` and
//! attached to every upload as a CSRF-style header. The token is read-only
//! for the session's lifetime except for the re-login path taken after the
//! server answers an upload with 401.

use std::future::Future;
use std::pin::Pin;

use reqwest::StatusCode;
use reqwest::multipart;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use segpost_protocol::{LoginResponse, UploadAck};

use crate::DeliveryError;
use crate::client::IngestApi;

/// Header carrying the session token on upload requests.
const TOKEN_HEADER: &str = "X-CSRFToken";

/// One authenticated connection context to the remote API.
///
/// Outlives all delivery attempts made through it.
#[derive(Debug)]
pub struct ApiSession {
    http: reqwest::Client,
    base_url: String,
    /// Swapped only by the re-login path after a 401.
    token: RwLock<String>,
}

impl ApiSession {
    /// Logs in and captures the session token.
    ///
    /// Login failure is fatal to the caller: without a token no upload can
    /// succeed, so there is no retry here.
    pub async fn login(base_url: &str) -> Result<Self, DeliveryError> {
        let base_url = normalize_base_url(base_url);
        let http = reqwest::Client::new();
        let token = fetch_token(&http, &base_url).await?;
        info!(api = %base_url, "session established");
        Ok(Self {
            http,
            base_url,
            token: RwLock::new(token),
        })
    }

    /// The API base URL, always with a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn do_upload(
        &self,
        camera: &str,
        file_name: &str,
        bytes: Vec<u8>,
        sha1: &str,
    ) -> Result<UploadAck, DeliveryError> {
        let url = format!("{}segment/upload/{}/", self.base_url, camera);
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new()
            .part("segment", part)
            .text("sha1", sha1.to_string());

        let token = self.token.read().await.clone();
        let resp = self
            .http
            .post(&url)
            .header(TOKEN_HEADER, token)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            // Token expired. Refresh once; the caller retries the whole
            // attempt with the new token.
            warn!(camera, "upload rejected with 401, refreshing session token");
            match fetch_token(&self.http, &self.base_url).await {
                Ok(token) => *self.token.write().await = token,
                Err(e) => warn!(error = %e, "token refresh failed"),
            }
            return Err(DeliveryError::Status(status.as_u16()));
        }
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        let ack: UploadAck = serde_json::from_str(&body)?;
        debug!(camera, file_name, ?ack, "upload acknowledged");
        Ok(ack)
    }
}

impl IngestApi for ApiSession {
    fn upload<'a>(
        &'a self,
        camera: &'a str,
        file_name: &'a str,
        bytes: Vec<u8>,
        sha1: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadAck, DeliveryError>> + Send + 'a>> {
        Box::pin(self.do_upload(camera, file_name, bytes, sha1))
    }
}

fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    format!("{trimmed}/")
}

async fn fetch_token(http: &reqwest::Client, base_url: &str) -> Result<String, DeliveryError> {
    let url = format!("{base_url}login/");
    let resp = http
        .get(&url)
        .send()
        .await
        .map_err(|e| DeliveryError::Login(format!("{url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(DeliveryError::Login(format!(
            "{url} returned status {}",
            resp.status()
        )));
    }

    let login: LoginResponse = resp
        .json()
        .await
        .map_err(|e| DeliveryError::Login(format!("malformed login response: {e}")))?;
    Ok(login.token)
}
