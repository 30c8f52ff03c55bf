use crate::gateway::GatewayFault;
use serde::{Deserialize, Serialize};

/// Optional profile attributes shared by every write request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state_province: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub utc_offset: Option<i32>,
}

impl Profile {
    pub fn is_empty(&self) -> bool {
        *self == Profile::default()
    }
}

/// A user record as returned to clients. Never carries a password.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub full_name: String,
    pub email: String,
    #[serde(flatten)]
    pub profile: Profile,
    #[serde(default)]
    pub last_active: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(flatten)]
    pub profile: Profile,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub profile: Profile,
}

impl UpdateUser {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.email.is_none() && self.profile.is_empty()
    }
}

/// Create-or-update keyed by email. `password` is only required for new users.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertUser {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(flatten)]
    pub profile: Profile,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyUser {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl VerifyOutcome {
    pub fn rejected() -> Self {
        Self { valid: false, user: None }
    }
}

// Gateway replies. `error` is a soft error: the call itself succeeded.

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserList {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub error: Option<GatewayFault>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserReply {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub error: Option<GatewayFault>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeleteReply {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<GatewayFault>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VerifyReply {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub error: Option<GatewayFault>,
}
