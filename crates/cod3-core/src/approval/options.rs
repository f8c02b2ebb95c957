//! Permission options offered by an ACP agent.
//!
//! `session/request_permission` carries a list of options; the client answers
//! with the id of exactly one of them, or with a `cancelled` outcome.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
    #[serde(other)]
    Other,
}

impl PermissionOptionKind {
    pub fn is_allow(self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }

    pub fn is_reject(self) -> bool {
        matches!(self, Self::RejectOnce | Self::RejectAlways)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    pub option_id: String,
    #[serde(default)]
    pub name: String,
    pub kind: PermissionOptionKind,
}

impl PermissionOption {
    pub fn new(option_id: impl Into<String>, kind: PermissionOptionKind) -> Self {
        let option_id = option_id.into();
        Self {
            name: option_id.clone(),
            option_id,
            kind,
        }
    }
}

/// Option picked when the user (or the policy) allows the call.
///
/// Prefers any allow variant, otherwise the first offered option.
pub fn preferred_allow_option(options: &[PermissionOption]) -> Option<&PermissionOption> {
    options
        .iter()
        .find(|option| option.kind.is_allow())
        .or_else(|| options.first())
}

/// Option picked when the user declines. `None` means answer `cancelled`.
pub fn preferred_reject_option(options: &[PermissionOption]) -> Option<&PermissionOption> {
    options.iter().find(|option| option.kind.is_reject())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decline() -> PermissionOption {
        PermissionOption::new("decline", PermissionOptionKind::RejectOnce)
    }

    fn allow_once() -> PermissionOption {
        PermissionOption::new("allow-once", PermissionOptionKind::AllowOnce)
    }

    #[test]
    fn allow_variant_wins_over_order() {
        let options = vec![decline(), allow_once()];
        let picked = preferred_allow_option(&options).unwrap();
        assert_eq!(picked.option_id, "allow-once");
    }

    #[test]
    fn allow_always_counts_as_allow() {
        let options = vec![
            decline(),
            PermissionOption::new("always", PermissionOptionKind::AllowAlways),
        ];
        assert_eq!(preferred_allow_option(&options).unwrap().option_id, "always");
    }

    #[test]
    fn falls_back_to_first_option() {
        let options = vec![
            PermissionOption::new("custom-a", PermissionOptionKind::Other),
            decline(),
        ];
        assert_eq!(preferred_allow_option(&options).unwrap().option_id, "custom-a");
    }

    #[test]
    fn no_options_means_no_pick() {
        assert!(preferred_allow_option(&[]).is_none());
        assert!(preferred_reject_option(&[]).is_none());
    }

    #[test]
    fn reject_option_only_matches_reject_kinds() {
        let options = vec![allow_once()];
        assert!(preferred_reject_option(&options).is_none());
        let options = vec![allow_once(), decline()];
        assert_eq!(preferred_reject_option(&options).unwrap().option_id, "decline");
    }

    #[test]
    fn deserializes_acp_shape_and_unknown_kinds() {
        let json = r#"[
            {"optionId":"a","name":"Allow","kind":"allow_once"},
            {"optionId":"b","name":"Maybe","kind":"something_new"}
        ]"#;
        let options: Vec<PermissionOption> = serde_json::from_str(json).unwrap();
        assert_eq!(options[0].kind, PermissionOptionKind::AllowOnce);
        assert_eq!(options[1].kind, PermissionOptionKind::Other);
    }
}
