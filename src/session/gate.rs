//! Authorization gate for protected views
//!
//! Denial is data, never control flow: a check returns a decision the
//! embedder turns into a redirect or a hidden element. A denied
//! requirement is additionally reported through the notice callback as a
//! dismissable message, at most once while the denial persists, so
//! re-evaluating the same gate (a view re-render) does not spam the user.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use crate::models::{Permission, Role};

use super::manager::SessionManager;

/// Declarative requirement for a protected view.
///
/// `roles` is any-of; `permissions` is any-of unless
/// `require_all_permissions` is set. Empty lists mean "no requirement of
/// that kind" (authentication alone suffices).
#[derive(Debug, Clone)]
pub struct GateRequirement {
    /// Stable key identifying the protected view (e.g. the route path);
    /// denial notices are deduplicated per key.
    pub name: String,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
    pub require_all_permissions: bool,
}

impl GateRequirement {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
            permissions: Vec::new(),
            require_all_permissions: false,
        }
    }

    #[must_use]
    pub fn with_roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: &[Permission]) -> Self {
        self.permissions = permissions.to_vec();
        self
    }

    #[must_use]
    pub const fn require_all(mut self) -> Self {
        self.require_all_permissions = true;
        self
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Granted,
    /// No authenticated session: send the user to the login entry point.
    RequiresLogin,
    /// Session is valid but a password change is pending.
    RequiresPasswordChange,
    /// Authenticated but not authorized for this view.
    Denied,
}

/// Callback receiving the dismissable denial notice (requirement name).
pub type DenialNotice = Box<dyn Fn(&str) + Send + Sync>;

pub struct AccessGate {
    manager: SessionManager,
    /// Requirement names whose current denial has already been reported.
    notified: Mutex<HashSet<String>>,
    notice: Mutex<Option<DenialNotice>>,
}

impl AccessGate {
    #[must_use]
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            notified: Mutex::new(HashSet::new()),
            notice: Mutex::new(None),
        }
    }

    /// Install the notice sink (a toast, a status line, ...).
    pub fn on_denial(&self, notice: DenialNotice) {
        *self.notice.lock() = Some(notice);
    }

    /// Evaluate a requirement against the current session.
    pub fn check(&self, requirement: &GateRequirement) -> GateDecision {
        if !self.manager.is_authenticated() {
            // An unauthenticated visit is a redirect, not a denial notice.
            self.notified.lock().remove(&requirement.name);
            return GateDecision::RequiresLogin;
        }

        if self.manager.must_change_password() {
            return GateDecision::RequiresPasswordChange;
        }

        let role_ok = requirement.roles.is_empty() || self.manager.has_any_role(&requirement.roles);
        let permission_ok = requirement.permissions.is_empty()
            || if requirement.require_all_permissions {
                self.manager.has_all_permissions(&requirement.permissions)
            } else {
                self.manager.has_any_permission(&requirement.permissions)
            };

        if role_ok && permission_ok {
            // Outcome flipped back to allowed: a future denial of the same
            // view should notify again.
            self.notified.lock().remove(&requirement.name);
            return GateDecision::Granted;
        }

        let first_denial = self.notified.lock().insert(requirement.name.clone());
        if first_denial {
            debug!(view = %requirement.name, "Access denied");
            if let Some(notice) = self.notice.lock().as_ref() {
                notice(&requirement.name);
            }
        }
        GateDecision::Denied
    }
}
