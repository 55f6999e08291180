//! Role-based permission matrix.
//!
//! | Role     | Submit Signal  | Trigger Cycle | Set Kill Switch | Settle Karma |
//! |----------|----------------|---------------|-----------------|--------------|
//! | operator | yes            | yes           | yes (elevated)  | yes          |
//! | agent    | yes            | no            | no              | no           |
//! | curator  | yes            | no            | no              | no           |
//! | tester   | rate-limited   | no            | no              | no           |

use b1e55ed_models::{CoreError, PolicyError, Role};

/// Operations the ingress boundary guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    SubmitSignal,
    TriggerCycle,
    SetKillSwitch,
    SettleKarma,
    RegisterContributor,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::SubmitSignal => "signal.submit",
            Permission::TriggerCycle => "brain.cycle",
            Permission::SetKillSwitch => "kill_switch.set",
            Permission::SettleKarma => "karma.settle",
            Permission::RegisterContributor => "contributor.register",
        }
    }
}

/// The matrix. Deny-by-default: anything not listed is forbidden.
pub struct RolePermissions;

impl RolePermissions {
    pub fn allows(role: Role, permission: Permission) -> bool {
        match role {
            Role::Operator => true,
            Role::Agent | Role::Curator | Role::Tester => {
                matches!(permission, Permission::SubmitSignal)
            }
        }
    }

    /// Check or refuse with a `RoleForbidden` policy error.
    pub fn check(role: Role, permission: Permission) -> Result<(), CoreError> {
        if Self::allows(role, permission) {
            Ok(())
        } else {
            Err(CoreError::Policy(PolicyError::RoleForbidden {
                role: role.to_string(),
                permission: permission.as_str().to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_can_do_everything() {
        for permission in [
            Permission::SubmitSignal,
            Permission::TriggerCycle,
            Permission::SetKillSwitch,
            Permission::SettleKarma,
            Permission::RegisterContributor,
        ] {
            assert!(RolePermissions::allows(Role::Operator, permission));
        }
    }

    #[test]
    fn test_non_operators_only_submit() {
        for role in [Role::Agent, Role::Curator, Role::Tester] {
            assert!(RolePermissions::allows(role, Permission::SubmitSignal));
            assert!(!RolePermissions::allows(role, Permission::TriggerCycle));
            assert!(!RolePermissions::allows(role, Permission::SetKillSwitch));
            assert!(!RolePermissions::allows(role, Permission::SettleKarma));
        }
    }

    #[test]
    fn test_refusal_carries_stable_code() {
        let err = RolePermissions::check(Role::Agent, Permission::SettleKarma).unwrap_err();
        assert_eq!(err.code(), "role_forbidden");
    }
}
