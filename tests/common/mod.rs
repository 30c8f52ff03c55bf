//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use user_relay::circuit_breaker::{BreakerSettings, CircuitBreaker, TripPolicy};
use user_relay::gateway::{FaultCode, GatewayError, GatewayFault, UserGateway};
use user_relay::model::{
    CreateUser, DeleteReply, Profile, UpdateUser, UpsertUser, User, UserList, UserReply, VerifyReply,
    VerifyUser,
};
use user_relay::service::UserService;

/// What the fake database gateway answers with.
#[derive(Clone, Debug)]
pub enum Mode {
    Ok,
    Transport(FaultCode, &'static str),
    Soft(&'static str),
}

/// In-memory stand-in for the database gateway.
pub struct FakeGateway {
    pub calls: AtomicUsize,
    mode: Mutex<Mode>,
}

impl FakeGateway {
    pub fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), mode: Mutex::new(mode) })
    }

    pub fn set(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<Option<GatewayFault>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.lock().clone() {
            Mode::Ok => Ok(None),
            Mode::Transport(code, msg) => Err(GatewayError::new(code, msg)),
            Mode::Soft(msg) => Ok(Some(GatewayFault { code: None, message: msg.to_string() })),
        }
    }

    fn user_reply(&self, id: i32) -> Result<UserReply, GatewayError> {
        let error = self.answer()?;
        let user = error.is_none().then(|| sample_user(id));
        Ok(UserReply { user, error })
    }
}

pub fn sample_user(id: i32) -> User {
    User {
        id,
        full_name: "Ada Lovelace".into(),
        email: "ada@example.com".into(),
        profile: Profile { city: Some("London".into()), ..Profile::default() },
        last_active: None,
        created_at: Some("2024-01-01T00:00:00Z".into()),
        updated_at: Some("2024-01-01T00:00:00Z".into()),
    }
}

#[async_trait]
impl UserGateway for FakeGateway {
    async fn get_all_users(&self) -> Result<UserList, GatewayError> {
        let error = self.answer()?;
        let users = if error.is_none() { vec![sample_user(1), sample_user(2)] } else { Vec::new() };
        Ok(UserList { users, error })
    }

    async fn get_user_by_id(&self, id: i32) -> Result<UserReply, GatewayError> {
        self.user_reply(id)
    }

    async fn create_user(&self, _req: &CreateUser) -> Result<UserReply, GatewayError> {
        self.user_reply(10)
    }

    async fn update_user(&self, id: i32, _req: &UpdateUser) -> Result<UserReply, GatewayError> {
        self.user_reply(id)
    }

    async fn delete_user(&self, id: i32) -> Result<DeleteReply, GatewayError> {
        let error = self.answer()?;
        Ok(DeleteReply { message: format!("user {id} deleted"), error })
    }

    async fn upsert_user(&self, _req: &UpsertUser) -> Result<UserReply, GatewayError> {
        self.user_reply(11)
    }

    async fn verify_user(&self, _req: &VerifyUser) -> Result<VerifyReply, GatewayError> {
        let error = self.answer()?;
        let valid = error.is_none();
        Ok(VerifyReply { valid, user: valid.then(|| sample_user(1)), error })
    }
}

/// `maxRequests=3 window=10s timeout=30s`, trip at >=3 requests and >=60% failures.
pub fn db_breaker() -> CircuitBreaker {
    CircuitBreaker::new(
        BreakerSettings::new("DBGateway")
            .max_requests(3)
            .interval(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .trip_policy(TripPolicy { min_requests: 3, failure_ratio: 0.6 }),
    )
}

pub fn service(gw: Arc<FakeGateway>) -> UserService {
    UserService::new(gw, db_breaker())
}

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_backend(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
