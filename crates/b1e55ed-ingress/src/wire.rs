//! Wire error shape: `{error: {code, message, detail?}}`.

use serde::{Deserialize, Serialize};

use b1e55ed_models::{CoreError, PolicyError};

/// The envelope callers receive on failure. Codes are stable and safe to
/// automate against; messages are human-facing and may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn from_core(err: &CoreError) -> Self {
        let detail = match err {
            CoreError::Policy(PolicyError::RateLimited {
                retry_after_seconds,
            }) => Some(serde_json::json!({ "retry_after_seconds": retry_after_seconds })),
            CoreError::Ledger(b1e55ed_models::LedgerError::ChainBroken { seq }) => {
                Some(serde_json::json!({ "seq": seq }))
            }
            _ => None,
        };
        Self {
            error: ErrorDetail {
                code: err.code().to_string(),
                message: err.to_string(),
                detail,
            },
        }
    }
}

impl From<CoreError> for ErrorBody {
    fn from(err: CoreError) -> Self {
        Self::from_core(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use b1e55ed_models::{InputError, KillLevel, LedgerError};

    #[test]
    fn test_codes_survive_the_wire() {
        let body = ErrorBody::from_core(&CoreError::Input(InputError::ContributorNotFound(
            "c1".into(),
        )));
        assert_eq!(body.error.code, "contributor_not_found");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["code"], "contributor_not_found");
        assert!(json["error"].get("detail").is_none());
    }

    #[test]
    fn test_rate_limit_carries_retry_detail() {
        let body = ErrorBody::from_core(&CoreError::Policy(PolicyError::RateLimited {
            retry_after_seconds: 120,
        }));
        assert_eq!(
            body.error.detail.unwrap()["retry_after_seconds"],
            serde_json::json!(120)
        );
    }

    #[test]
    fn test_chain_broken_carries_seq() {
        let body = ErrorBody::from_core(&CoreError::Ledger(LedgerError::ChainBroken { seq: 42 }));
        assert_eq!(body.error.code, "chain_broken");
        assert_eq!(body.error.detail.unwrap()["seq"], serde_json::json!(42));
    }

    #[test]
    fn test_kill_switch_message_names_level() {
        let body = ErrorBody::from_core(&CoreError::Policy(PolicyError::KillSwitchActive {
            level: KillLevel::L3Lockdown,
        }));
        assert!(body.error.message.contains("L3_LOCKDOWN"));
    }
}
