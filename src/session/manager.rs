//! Session manager: owns the authenticated identity and exposes the
//! role/permission predicates the rest of the client gates on.
//!
//! All predicates are pure functions of the current session. They return
//! `false` whenever no user is present, and `has_any_permission(&[])` is
//! `false` (an empty "any" requirement is never satisfied).

use std::sync::Arc;

use tracing::debug;

use crate::models::{AuthResponse, Permission, Role, User};

use super::store::{Session, SessionStore};

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    #[must_use]
    pub fn session(&self) -> Session {
        self.store.get()
    }

    /// Install the result of a login or refresh exchange: tokens and
    /// identity replaced, `must_change_password` taken from the
    /// server-declared flag (absent means false).
    pub fn set_auth(&self, response: &AuthResponse) {
        let must_change_password = response.requires_password_change
            || response.user.must_change_password.unwrap_or(false);
        debug!(username = %response.user.username, "Installing authenticated session");
        self.store.set(Session {
            user: Some(response.user.clone()),
            access_token: Some(response.access_token.clone()),
            refresh_token: Some(response.refresh_token.clone()),
            is_authenticated: true,
            must_change_password,
        });
    }

    /// Profile update: identity replaced, tokens retained.
    pub fn update_user(&self, user: User) {
        let mut session = self.store.get();
        session.user = Some(user);
        self.store.set(session);
    }

    pub fn set_must_change_password(&self, value: bool) {
        let mut session = self.store.get();
        session.must_change_password = value;
        self.store.set(session);
    }

    /// Clear the session entirely. Idempotent.
    pub fn logout(&self) {
        self.store.clear();
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_authenticated
    }

    #[must_use]
    pub fn must_change_password(&self) -> bool {
        self.store.get().must_change_password
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.store.get().access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.store.get().refresh_token
    }

    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.store.get().user
    }

    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.store
            .get()
            .user
            .is_some_and(|user| user.has_permission(permission))
    }

    #[must_use]
    pub fn has_any_permission(&self, permissions: &[Permission]) -> bool {
        self.store
            .get()
            .user
            .is_some_and(|user| user.has_any_permission(permissions))
    }

    #[must_use]
    pub fn has_all_permissions(&self, permissions: &[Permission]) -> bool {
        self.store
            .get()
            .user
            .is_some_and(|user| user.has_all_permissions(permissions))
    }

    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.store.get().user.is_some_and(|user| user.role == role)
    }

    #[must_use]
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.store
            .get()
            .user
            .is_some_and(|user| roles.contains(&user.role))
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    #[must_use]
    pub fn is_engineer(&self) -> bool {
        self.has_role(Role::Engineer)
    }

    #[must_use]
    pub fn is_operator(&self) -> bool {
        self.has_role(Role::Operator)
    }

    #[must_use]
    pub fn is_viewer(&self) -> bool {
        self.has_role(Role::Viewer)
    }

    #[must_use]
    pub fn can_manage_users(&self) -> bool {
        self.has_permission(Permission::UserManage)
    }

    #[must_use]
    pub fn can_configure_sensors(&self) -> bool {
        self.has_permission(Permission::SensorConfigure)
    }

    #[must_use]
    pub fn can_manage_alerts(&self) -> bool {
        self.has_any_permission(&[Permission::AlertAcknowledge, Permission::AlertResolve])
    }

    #[must_use]
    pub fn can_export_data(&self) -> bool {
        self.has_permission(Permission::AnalyticsExport)
    }
}
