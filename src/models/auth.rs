//! Wire types for the auth endpoints

use serde::{Deserialize, Serialize};

use super::user::User;

/// Standard success envelope the API wraps every payload in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Token-pair response returned by both login and refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: User,
    #[serde(default)]
    pub requires_password_change: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_auth_response_decoding() {
        let json = r#"{
            "accessToken": "T1",
            "refreshToken": "R1",
            "tokenType": "Bearer",
            "expiresIn": 3600,
            "user": {"id": "u-1", "username": "admin", "role": "ADMIN"}
        }"#;
        let response: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "T1");
        assert_eq!(response.user.role, Role::Admin);
        // Absent flag defaults to false
        assert!(!response.requires_password_change);
    }

    #[test]
    fn test_envelope_unwrap() {
        let json = r#"{"data": {"refreshToken": "R1"}}"#;
        let envelope: ApiEnvelope<RefreshRequest> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data.refresh_token, "R1");
    }
}
