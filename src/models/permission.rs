//! Role and permission model
//!
//! Mirrors the server-side role/permission authority. The mapping here is
//! advisory only (it drives UI gating); the server re-checks every request.
//!
//! Key properties:
//! - `Role` and `Permission` are closed enums, not string maps
//! - `Role::permissions` is an exhaustive match, so a new role cannot be
//!   added without declaring its permission set
//! - A user's explicit permission list, when the server returns one,
//!   overrides the role mapping (see `User::effective_permissions`)

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Global user role, strictly ordered by privilege breadth.
///
/// Each role carries an explicitly enumerated permission set; the ordering
/// is a property of the table, not a hierarchy enforced in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Full system access including user management
    Admin,
    /// Technical access for configuration and analysis
    Engineer,
    /// Operational access for monitoring and incident response
    Operator,
    /// Read-only access to all resources
    Viewer,
}

/// Capability tag gating a specific UI action or view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    // Sensors
    SensorRead,
    SensorWrite,
    SensorDelete,
    SensorConfigure,
    // Assets
    AssetRead,
    AssetWrite,
    AssetDelete,
    AssetProgressUpdate,
    // Monitoring
    MonitoringRead,
    MonitoringConfigureThresholds,
    // Alerts
    AlertRead,
    AlertAcknowledge,
    AlertAssign,
    AlertResolve,
    AlertRuleManage,
    // Analytics
    AnalyticsRead,
    AnalyticsExport,
    AnalyticsRefresh,
    // Inspections
    InspectionRead,
    InspectionWrite,
    // User management
    UserRead,
    UserManage,
    // System administration
    SystemAdmin,
}

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::SensorRead,
    Permission::SensorWrite,
    Permission::SensorDelete,
    Permission::SensorConfigure,
    Permission::AssetRead,
    Permission::AssetWrite,
    Permission::AssetDelete,
    Permission::AssetProgressUpdate,
    Permission::MonitoringRead,
    Permission::MonitoringConfigureThresholds,
    Permission::AlertRead,
    Permission::AlertAcknowledge,
    Permission::AlertAssign,
    Permission::AlertResolve,
    Permission::AlertRuleManage,
    Permission::AnalyticsRead,
    Permission::AnalyticsExport,
    Permission::AnalyticsRefresh,
    Permission::InspectionRead,
    Permission::InspectionWrite,
    Permission::UserRead,
    Permission::UserManage,
    Permission::SystemAdmin,
];

const ENGINEER_PERMISSIONS: &[Permission] = &[
    Permission::SensorRead,
    Permission::SensorWrite,
    Permission::SensorConfigure,
    Permission::AssetRead,
    Permission::AssetWrite,
    Permission::AssetProgressUpdate,
    Permission::MonitoringRead,
    Permission::MonitoringConfigureThresholds,
    Permission::AlertRead,
    Permission::AlertAcknowledge,
    Permission::AlertAssign,
    Permission::AlertResolve,
    Permission::AlertRuleManage,
    Permission::AnalyticsRead,
    Permission::AnalyticsExport,
    Permission::AnalyticsRefresh,
    Permission::InspectionRead,
    Permission::InspectionWrite,
];

const OPERATOR_PERMISSIONS: &[Permission] = &[
    Permission::SensorRead,
    Permission::AssetRead,
    Permission::AssetProgressUpdate,
    Permission::MonitoringRead,
    Permission::AlertRead,
    Permission::AlertAcknowledge,
    Permission::AlertAssign,
    Permission::AlertResolve,
    Permission::AnalyticsRead,
    Permission::InspectionRead,
    Permission::InspectionWrite,
];

const VIEWER_PERMISSIONS: &[Permission] = &[
    Permission::SensorRead,
    Permission::AssetRead,
    Permission::MonitoringRead,
    Permission::AlertRead,
    Permission::AnalyticsRead,
    Permission::InspectionRead,
];

impl Role {
    /// All roles, in privilege order.
    pub const ALL: &'static [Self] = &[Self::Admin, Self::Engineer, Self::Operator, Self::Viewer];

    /// Get the fixed permission set for this role.
    ///
    /// The match is exhaustive: adding a role without a table entry is a
    /// compile error.
    #[must_use]
    pub const fn permissions(&self) -> &'static [Permission] {
        match self {
            Self::Admin => ADMIN_PERMISSIONS,
            Self::Engineer => ENGINEER_PERMISSIONS,
            Self::Operator => OPERATOR_PERMISSIONS,
            Self::Viewer => VIEWER_PERMISSIONS,
        }
    }

    /// Check if this role's fixed set contains a permission.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// All roles whose fixed set contains a permission.
    #[must_use]
    pub fn roles_with_permission(permission: Permission) -> Vec<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|role| role.has_permission(permission))
            .collect()
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Engineer => "ENGINEER",
            Self::Operator => "OPERATOR",
            Self::Viewer => "VIEWER",
        }
    }

    /// Human-readable role label for display.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Admin => "Administrator",
            Self::Engineer => "Engineer",
            Self::Operator => "Operator",
            Self::Viewer => "Viewer",
        }
    }

    /// One-line role description for display.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Admin => "Full system access including user management",
            Self::Engineer => "Technical access for configuration and analysis",
            Self::Operator => "Operational access for monitoring and incident response",
            Self::Viewer => "Read-only access to all resources",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "ENGINEER" => Ok(Self::Engineer),
            "OPERATOR" => Ok(Self::Operator),
            "VIEWER" => Ok(Self::Viewer),
            _ => Err(format!("Unknown role: {s}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Permission {
    /// Human-readable permission label for display.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SensorRead => "Read sensor data",
            Self::SensorWrite => "Create/update sensors",
            Self::SensorDelete => "Delete sensors",
            Self::SensorConfigure => "Configure sensor settings",
            Self::AssetRead => "Read asset data",
            Self::AssetWrite => "Create/update assets",
            Self::AssetDelete => "Delete assets",
            Self::AssetProgressUpdate => "Update asset progress",
            Self::MonitoringRead => "Read monitoring data",
            Self::MonitoringConfigureThresholds => "Configure thresholds",
            Self::AlertRead => "Read alerts",
            Self::AlertAcknowledge => "Acknowledge alerts",
            Self::AlertAssign => "Assign alerts",
            Self::AlertResolve => "Resolve alerts",
            Self::AlertRuleManage => "Manage alert rules",
            Self::AnalyticsRead => "Read analytics",
            Self::AnalyticsExport => "Export data",
            Self::AnalyticsRefresh => "Refresh analytics",
            Self::InspectionRead => "Read inspections",
            Self::InspectionWrite => "Create/update inspections",
            Self::UserRead => "Read user data",
            Self::UserManage => "Manage users",
            Self::SystemAdmin => "System administration",
        }
    }

    /// Feature group a permission belongs to, for grouped display.
    #[must_use]
    pub const fn group(&self) -> &'static str {
        match self {
            Self::SensorRead | Self::SensorWrite | Self::SensorDelete | Self::SensorConfigure => {
                "sensor"
            }
            Self::AssetRead
            | Self::AssetWrite
            | Self::AssetDelete
            | Self::AssetProgressUpdate => "asset",
            Self::MonitoringRead | Self::MonitoringConfigureThresholds => "monitoring",
            Self::AlertRead
            | Self::AlertAcknowledge
            | Self::AlertAssign
            | Self::AlertResolve
            | Self::AlertRuleManage => "alert",
            Self::AnalyticsRead | Self::AnalyticsExport | Self::AnalyticsRefresh => "analytics",
            Self::InspectionRead | Self::InspectionWrite => "inspection",
            Self::UserRead | Self::UserManage | Self::SystemAdmin => "admin",
        }
    }
}
