//! User operations, each forwarding exactly one call to the database gateway
//! through the circuit breaker.

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::error_reason::{ErrorKind, FailureOrigin, ServiceError};
use crate::gateway::{GatewayError, GatewayFault, UserGateway};
use crate::model::{CreateUser, UpdateUser, UpsertUser, User, VerifyOutcome, VerifyUser};
use parking_lot::RwLock;
use std::{future::Future, sync::Arc};
use tracing::{debug, warn};

pub struct UserService {
    gateway: Arc<dyn UserGateway>,
    breaker: CircuitBreaker,
    // Sticky: not cleared on success.
    last_error: RwLock<Option<ErrorKind>>,
}

impl UserService {
    pub fn new(gateway: Arc<dyn UserGateway>, breaker: CircuitBreaker) -> Self {
        Self { gateway, breaker, last_error: RwLock::new(None) }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        *self.last_error.read()
    }

    pub async fn get_all_users(&self) -> Result<Vec<User>, ServiceError> {
        const OP: &str = "get users";
        let gw = &self.gateway;
        let reply = self.guarded(OP, || gw.get_all_users()).await?;
        self.check_soft(OP, reply.error.as_ref())?;
        Ok(reply.users)
    }

    pub async fn get_user_by_id(&self, id: i32) -> Result<User, ServiceError> {
        const OP: &str = "get user";
        let gw = &self.gateway;
        let reply = self.guarded(OP, || gw.get_user_by_id(id)).await?;
        self.check_soft(OP, reply.error.as_ref())?;
        self.require_user(OP, reply.user)
    }

    pub async fn create_user(&self, req: CreateUser) -> Result<User, ServiceError> {
        const OP: &str = "create user";
        if req.full_name.is_empty() || req.email.is_empty() || req.password.is_empty() {
            return Err(ServiceError::invalid("fullName, email, and password are required"));
        }
        let gw = &self.gateway;
        let reply = self.guarded(OP, || gw.create_user(&req)).await?;
        self.check_soft(OP, reply.error.as_ref())?;
        self.require_user(OP, reply.user)
    }

    pub async fn update_user(&self, id: i32, req: UpdateUser) -> Result<User, ServiceError> {
        const OP: &str = "update user";
        if req.is_empty() {
            return Err(ServiceError::invalid("no fields to update"));
        }
        let gw = &self.gateway;
        let reply = self.guarded(OP, || gw.update_user(id, &req)).await?;
        self.check_soft(OP, reply.error.as_ref())?;
        self.require_user(OP, reply.user)
    }

    /// Returns the gateway's confirmation message.
    pub async fn delete_user(&self, id: i32) -> Result<String, ServiceError> {
        const OP: &str = "delete user";
        let gw = &self.gateway;
        let reply = self.guarded(OP, || gw.delete_user(id)).await?;
        self.check_soft(OP, reply.error.as_ref())?;
        Ok(reply.message)
    }

    pub async fn upsert_user(&self, req: UpsertUser) -> Result<User, ServiceError> {
        const OP: &str = "upsert user";
        if req.full_name.is_empty() || req.email.is_empty() {
            return Err(ServiceError::invalid("fullName and email are required"));
        }
        let gw = &self.gateway;
        let reply = self.guarded(OP, || gw.upsert_user(&req)).await?;
        self.check_soft(OP, reply.error.as_ref()).map_err(|e| match e.kind {
            ErrorKind::InvalidArgument => e.with_message("password is required for new users"),
            _ => e,
        })?;
        self.require_user(OP, reply.user)
    }

    /// Every failure after validation yields `valid: false`, so callers cannot
    /// tell an unknown account from a bad password or an outage.
    pub async fn verify_user(&self, req: VerifyUser) -> Result<VerifyOutcome, ServiceError> {
        const OP: &str = "verify user";
        if req.email.is_empty() || req.password.is_empty() {
            return Err(ServiceError::invalid("email and password are required"));
        }
        let gw = &self.gateway;
        let reply = match self.guarded(OP, || gw.verify_user(&req)).await {
            Ok(reply) => reply,
            Err(_) => return Ok(VerifyOutcome::rejected()),
        };
        if let Some(fault) = &reply.error {
            debug!(op = OP, code = %fault.code(), "verification refused by gateway");
            return Ok(VerifyOutcome::rejected());
        }
        if !reply.valid {
            return Ok(VerifyOutcome::rejected());
        }
        Ok(VerifyOutcome { valid: true, user: reply.user })
    }

    async fn guarded<T, F, Fut>(&self, op: &str, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.breaker
            .call(work)
            .await
            .map_err(|err| self.remember(ServiceError::from_breaker(op, err)))
    }

    fn check_soft(&self, op: &str, fault: Option<&GatewayFault>) -> Result<(), ServiceError> {
        match fault {
            Some(fault) => Err(self.remember(ServiceError::from_soft(op, fault))),
            None => Ok(()),
        }
    }

    fn require_user(&self, op: &str, user: Option<User>) -> Result<User, ServiceError> {
        user.ok_or_else(|| {
            warn!(op, "gateway reply carried no user");
            self.remember(ServiceError::new(ErrorKind::NotFound, FailureOrigin::SoftError, "user not found"))
        })
    }

    fn remember(&self, err: ServiceError) -> ServiceError {
        *self.last_error.write() = Some(err.kind);
        err
    }
}
