use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::permission::{Permission, Role};

/// Authenticated user identity as returned by the auth service.
///
/// A user has exactly one role. The server may additionally return an
/// explicit `permissions` list; when present it overrides the role's fixed
/// permission set (e.g. for accounts with tailored grants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// Explicit permission override; `None` means "use the role's set"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<Permission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub must_change_password: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// Effective permission set: the explicit override when the server
    /// returned one, otherwise the role mapping.
    #[must_use]
    pub fn effective_permissions(&self) -> &[Permission] {
        match &self.permissions {
            Some(explicit) => explicit.as_slice(),
            None => self.role.permissions(),
        }
    }

    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.effective_permissions().contains(&permission)
    }

    #[must_use]
    pub fn has_any_permission(&self, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.has_permission(*p))
    }

    #[must_use]
    pub fn has_all_permissions(&self, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.has_permission(*p))
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => self.username.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer() -> User {
        User {
            id: "u-1".to_string(),
            username: "inspector".to_string(),
            email: None,
            first_name: None,
            last_name: None,
            role: Role::Viewer,
            department: None,
            permissions: None,
            must_change_password: None,
            last_login_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_role_mapping_fallback() {
        let user = viewer();
        assert!(user.has_permission(Permission::SensorRead));
        assert!(!user.has_permission(Permission::SensorWrite));
    }

    #[test]
    fn test_explicit_permissions_override_role() {
        let mut user = viewer();
        user.permissions = Some(vec![Permission::SensorWrite]);
        assert!(user.has_permission(Permission::SensorWrite));
        // Role's own permissions no longer apply once overridden
        assert!(!user.has_permission(Permission::SensorRead));
    }

    #[test]
    fn test_vacuous_any_is_false() {
        let user = viewer();
        assert!(!user.has_any_permission(&[]));
        assert!(user.has_all_permissions(&[]));
    }

    #[test]
    fn test_camel_case_wire_format() {
        let user: User = serde_json::from_str(
            r#"{"id":"u-2","username":"admin","role":"ADMIN","mustChangePassword":true}"#,
        )
        .unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.must_change_password, Some(true));
    }
}
