//! Outbound calls to the database gateway.
//!
//! Every [`UserGateway`] method performs exactly one network call. Failures are
//! reported as a [`GatewayError`] carrying a [`FaultCode`]; this is the only
//! place where the gateway's free-text error messages are interpreted.

use crate::model::{
    CreateUser, DeleteReply, UpdateUser, UpsertUser, UserList, UserReply, VerifyReply, VerifyUser,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, time::Duration};
use tracing::debug;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Unavailable,
    DeadlineExceeded,
    Internal,
}

impl FaultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultCode::NotFound => "not_found",
            FaultCode::AlreadyExists => "already_exists",
            FaultCode::InvalidArgument => "invalid_argument",
            FaultCode::Unavailable => "unavailable",
            FaultCode::DeadlineExceeded => "deadline_exceeded",
            FaultCode::Internal => "internal",
        }
    }

    /// Derives a code from a gateway message that arrived without one.
    pub fn from_message(message: &str) -> Self {
        let m = message.to_ascii_lowercase();
        if m.contains("not found") {
            FaultCode::NotFound
        } else if m.contains("duplicate") || m.contains("already exists") {
            FaultCode::AlreadyExists
        } else if m.contains("password is required") {
            FaultCode::InvalidArgument
        } else {
            FaultCode::Internal
        }
    }

    pub fn from_http_status(status: StatusCode) -> Self {
        match status {
            StatusCode::NOT_FOUND => FaultCode::NotFound,
            StatusCode::CONFLICT => FaultCode::AlreadyExists,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => FaultCode::InvalidArgument,
            StatusCode::SERVICE_UNAVAILABLE => FaultCode::Unavailable,
            StatusCode::GATEWAY_TIMEOUT => FaultCode::DeadlineExceeded,
            _ => FaultCode::Internal,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level error embedded in an otherwise successful reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFault {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FaultCode>,
    pub message: String,
}

impl GatewayFault {
    pub fn code(&self) -> FaultCode {
        self.code.unwrap_or_else(|| FaultCode::from_message(&self.message))
    }
}

/// Transport-level failure of a gateway call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: FaultCode,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    fn from_reqwest(method: &str, err: reqwest::Error) -> Self {
        let code = if err.is_connect() {
            FaultCode::Unavailable
        } else if err.is_timeout() {
            FaultCode::DeadlineExceeded
        } else if err.is_decode() {
            FaultCode::Internal
        } else {
            err.status().map(FaultCode::from_http_status).unwrap_or(FaultCode::Internal)
        };
        Self::new(code, format!("{method}: {err}"))
    }
}

#[async_trait]
pub trait UserGateway: Send + Sync {
    async fn get_all_users(&self) -> Result<UserList, GatewayError>;
    async fn get_user_by_id(&self, id: i32) -> Result<UserReply, GatewayError>;
    async fn create_user(&self, req: &CreateUser) -> Result<UserReply, GatewayError>;
    async fn update_user(&self, id: i32, req: &UpdateUser) -> Result<UserReply, GatewayError>;
    async fn delete_user(&self, id: i32) -> Result<DeleteReply, GatewayError>;
    async fn upsert_user(&self, req: &UpsertUser) -> Result<UserReply, GatewayError>;
    async fn verify_user(&self, req: &VerifyUser) -> Result<VerifyReply, GatewayError>;
}

#[derive(Serialize)]
struct ById<'a, T: Serialize> {
    id: i32,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize)]
struct Empty {}

/// JSON-over-HTTP client: `POST {base_url}/{method}`.
#[derive(Clone, Debug)]
pub struct HttpUserGateway {
    client: Client,
    base_url: String,
    call_timeout: Duration,
}

impl HttpUserGateway {
    pub fn new(client: Client, base_url: impl Into<String>, call_timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, call_timeout }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn rpc<B, R>(&self, method: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        // The deadline covers connect, send and reading the body.
        match tokio::time::timeout(self.call_timeout, self.exchange(method, body)).await {
            Ok(res) => res,
            Err(_) => Err(GatewayError::new(
                FaultCode::DeadlineExceeded,
                format!("{method}: no reply within {}ms", self.call_timeout.as_millis()),
            )),
        }
    }

    async fn exchange<B, R>(&self, method: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, method);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(method, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            debug!(method, status = status.as_u16(), "gateway returned an error status");
            let message = if text.trim().is_empty() { status.to_string() } else { text };
            return Err(GatewayError::new(FaultCode::from_http_status(status), message));
        }

        resp.json::<R>()
            .await
            .map_err(|e| GatewayError::new(FaultCode::Internal, format!("{method}: bad json: {e}")))
    }
}

#[async_trait]
impl UserGateway for HttpUserGateway {
    async fn get_all_users(&self) -> Result<UserList, GatewayError> {
        self.rpc("GetAllUsers", &Empty {}).await
    }

    async fn get_user_by_id(&self, id: i32) -> Result<UserReply, GatewayError> {
        self.rpc("GetUserByID", &ById { id, body: &Empty {} }).await
    }

    async fn create_user(&self, req: &CreateUser) -> Result<UserReply, GatewayError> {
        self.rpc("CreateUser", req).await
    }

    async fn update_user(&self, id: i32, req: &UpdateUser) -> Result<UserReply, GatewayError> {
        self.rpc("UpdateUser", &ById { id, body: req }).await
    }

    async fn delete_user(&self, id: i32) -> Result<DeleteReply, GatewayError> {
        self.rpc("DeleteUser", &ById { id, body: &Empty {} }).await
    }

    async fn upsert_user(&self, req: &UpsertUser) -> Result<UserReply, GatewayError> {
        self.rpc("UpsertUser", req).await
    }

    async fn verify_user(&self, req: &VerifyUser) -> Result<VerifyReply, GatewayError> {
        self.rpc("VerifyUser", req).await
    }
}
