//! Fleet manager HTTP client
//!
//! Thin reqwest wrapper over the vendor API with a per-request timeout.
//! Consumed endpoints: `GET /ping`, `POST /getProfiles`, `GET /licInfo`,
//! `GET /order/details/{id}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use shared::{AppError, AppResult, ErrorCode};

use super::{ApiResponse, FleetBackend, LicenseInfo, OrderDetail, PingResponse};

pub struct RdsClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct GetProfilesRequest<'a> {
    file: &'a str,
}

fn request_error(context: &str, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::timeout(format!("rds {context}: {e}"))
    } else {
        AppError::fleet(format!("rds {context}: {e}"))
    }
}

impl RdsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::internal(format!("build fleet http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let url = self.url(path);
        tracing::debug!(%url, "rds GET");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(path, e))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| request_error(path, e))?;
        if status.as_u16() >= 400 {
            return Err(AppError::fleet(format!(
                "rds HTTP {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }
        serde_json::from_slice(&body)
            .map_err(|e| AppError::fleet(format!("rds decode {path}: {e}")))
    }

    /// Unwrap the `{code, msg, data}` envelope; `code != 0` is an error.
    fn unwrap_response<T>(path: &str, resp: ApiResponse<T>) -> AppResult<T> {
        if resp.code != 0 {
            return Err(AppError::with_message(
                ErrorCode::FleetResponse,
                format!("rds error {} on {path}: {}", resp.code, resp.msg),
            ));
        }
        resp.data
            .ok_or_else(|| AppError::fleet(format!("rds {path}: code=0 but data is null")))
    }

    /// Retrieve a fleet configuration file as raw JSON.
    pub async fn get_profiles(&self, file: &str) -> AppResult<serde_json::Value> {
        let url = self.url("/getProfiles");
        tracing::debug!(%url, file, "rds POST");
        let resp = self
            .http
            .post(&url)
            .json(&GetProfilesRequest { file })
            .send()
            .await
            .map_err(|e| request_error("/getProfiles", e))?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::fleet(format!("rds HTTP {status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| request_error("/getProfiles", e))
    }

    /// Current fleet license information.
    pub async fn license_info(&self) -> AppResult<LicenseInfo> {
        let resp: ApiResponse<LicenseInfo> = self.get_json("/licInfo").await?;
        Self::unwrap_response("/licInfo", resp)
    }
}

#[async_trait]
impl FleetBackend for RdsClient {
    fn name(&self) -> &str {
        "seer-rds"
    }

    async fn ping(&self) -> AppResult<PingResponse> {
        self.get_json("/ping").await
    }

    async fn order_details(&self, rds_order_id: &str) -> AppResult<OrderDetail> {
        let path = format!("/order/details/{rds_order_id}");
        let resp: ApiResponse<OrderDetail> = self.get_json(&path).await?;
        Self::unwrap_response(&path, resp)
    }
}
