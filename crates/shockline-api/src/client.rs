// REST API client
//
// Wraps `reqwest::Client` with token injection, envelope unwrapping and
// status-to-error mapping for the handful of endpoints the live-control
// path needs.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::error::Error;
use crate::models::{
    BaseResponse, DeviceWithShockers, LcgResponse, PROBLEM_DEVICE_NO_GATEWAY,
    PROBLEM_DEVICE_OFFLINE, ProblemDetails, SelfResponse,
};
use crate::transport::TransportConfig;

/// Header carrying the API token on every request.
pub const TOKEN_HEADER: &str = "OpenShockToken";

/// HTTP client for the OpenShock backend.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client that authenticates every request with `token`.
    pub fn new(
        base_url: Url,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(token.expose_secret())
            .map_err(|e| Error::InvalidToken(e.to_string()))?;
        value.set_sensitive(true);
        headers.insert(TOKEN_HEADER, value);

        let http = transport.build_client_with_headers(headers)?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    ///
    /// The caller is responsible for any authentication headers.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// List the devices (and their shockers) owned by the token's account.
    pub async fn own_devices(&self) -> Result<Vec<DeviceWithShockers>, Error> {
        let url = self.endpoint("1/shockers/own")?;
        let devices: Vec<DeviceWithShockers> = self.get(url, "own shockers").await?;
        debug!(count = devices.len(), "fetched own devices");
        Ok(devices)
    }

    /// Look up the live-control gateway a device is attached to.
    ///
    /// The four failure shapes the backend distinguishes come back as
    /// [`Error::NotFound`], [`Error::DeviceOffline`],
    /// [`Error::DeviceNotConnectedToGateway`] and [`Error::Unauthenticated`].
    pub async fn device_gateway(&self, device: &Uuid) -> Result<LcgResponse, Error> {
        let url = self.endpoint(&format!("1/devices/{device}/lcg"))?;
        self.get(url, &format!("device {device}")).await
    }

    /// Fetch the account that owns the token. Used to validate credentials.
    pub async fn self_info(&self) -> Result<SelfResponse, Error> {
        let url = self.endpoint("1/users/self")?;
        self.get(url, "self").await
    }

    // ── Transport mechanics ──────────────────────────────────────────

    /// Resolve an endpoint path against the base URL, tolerating a base
    /// with or without a trailing slash.
    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Ok(base.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, resource: &str) -> Result<T, Error> {
        trace!(%url, "GET");
        let response = self.http.get(url).send().await?;
        let response = check_status(response, resource).await?;
        unwrap_envelope(response).await
    }
}

/// Map non-success statuses onto typed errors.
async fn check_status(response: Response, resource: &str) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let problem: ProblemDetails = serde_json::from_str(&body).unwrap_or_default();
    debug!(status = status.as_u16(), problem = ?problem.kind, "request rejected");

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthenticated,
        StatusCode::NOT_FOUND => Error::NotFound {
            resource: resource.to_owned(),
        },
        StatusCode::PRECONDITION_FAILED => match problem.kind.as_deref() {
            Some(PROBLEM_DEVICE_OFFLINE) => Error::DeviceOffline,
            Some(PROBLEM_DEVICE_NO_GATEWAY) => Error::DeviceNotConnectedToGateway,
            _ => Error::Api {
                status: status.as_u16(),
                message: problem.describe(),
            },
        },
        _ => Error::Api {
            status: status.as_u16(),
            message: if problem.describe().is_empty() {
                body
            } else {
                problem.describe()
            },
        },
    })
}

/// Strip the `{ message, data }` envelope.
async fn unwrap_envelope<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    let body = response.text().await?;
    let envelope: BaseResponse<T> =
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;
    envelope.data.ok_or_else(|| Error::Deserialization {
        message: "response envelope has no data".into(),
        body,
    })
}
