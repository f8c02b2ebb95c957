//! Permission gate for tool execution.
//!
//! Decides per tool call whether to run it, based on the configured
//! [`PermissionMode`]:
//! - `Chat`: tools never run
//! - `ConfirmEachCall`: ask the host through an [`ApprovalBroker`]
//! - `AutoApprove`: always run
//!
//! ACP agents offer their own permission options; the decision then also
//! names which option to answer with.

mod broker;
mod options;

pub use broker::{ApprovalAnswer, ApprovalBroker, ApprovalRequest, PendingApproval};
pub use options::{
    preferred_allow_option, preferred_reject_option, PermissionOption, PermissionOptionKind,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const CHAT_MODE_NOTICE: &str =
    "Tools are disabled in chat mode. Switch to agent mode to let the assistant change files.";
pub const NO_APPROVER_NOTICE: &str =
    "Tool call declined: approval is required but no approval prompt is available.";
pub const DECLINED_NOTICE: &str = "Tool call declined by the user.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Chat,
    #[default]
    #[serde(alias = "confirm")]
    ConfirmEachCall,
    #[serde(alias = "auto")]
    AutoApprove,
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "confirm" | "confirmeachcall" | "confirm_each_call" | "ask" => {
                Ok(Self::ConfirmEachCall)
            }
            "auto" | "autoapprove" | "auto_approve" | "yolo" => Ok(Self::AutoApprove),
            other => Err(format!(
                "Unknown permission mode '{other}' (expected chat, confirm or auto)"
            )),
        }
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    /// ACP option to answer with. `None` with offered options means `cancelled`.
    pub option_id: Option<String>,
    /// User-visible explanation, set when a call is refused by policy.
    pub notice: Option<String>,
}

impl PermissionDecision {
    pub fn allow(option_id: Option<String>) -> Self {
        Self {
            allowed: true,
            option_id,
            notice: None,
        }
    }

    pub fn decline(option_id: Option<String>, notice: impl Into<String>) -> Self {
        Self {
            allowed: false,
            option_id,
            notice: Some(notice.into()),
        }
    }
}

/// Read-only policy shared by every turn of a service.
#[derive(Debug, Clone, Default)]
pub struct PermissionGate {
    mode: PermissionMode,
    broker: Option<ApprovalBroker>,
    /// Tools the user allowed with "always" for this gate's lifetime.
    always_allowed: Arc<Mutex<HashSet<String>>>,
}

impl PermissionGate {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_broker(mut self, broker: ApprovalBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Decide whether `tool_name` may run.
    ///
    /// `offered` is `Some` on the ACP path, where the agent supplies the
    /// options to pick from. Waiting for a human happens on the caller's
    /// task and is released by `cancel`.
    pub async fn should_execute(
        &self,
        tool_name: &str,
        arguments: &IndexMap<String, String>,
        offered: Option<&[PermissionOption]>,
        cancel: &CancellationToken,
    ) -> PermissionDecision {
        match self.mode {
            PermissionMode::Chat => {
                log::info!("Chat mode: refusing tool {tool_name}");
                PermissionDecision::decline(offered.and_then(reject_id), CHAT_MODE_NOTICE)
            }
            PermissionMode::AutoApprove => allow_with(offered),
            PermissionMode::ConfirmEachCall => {
                if self.is_always_allowed(tool_name) {
                    return allow_with(offered);
                }
                self.confirm(tool_name, arguments, offered, cancel).await
            }
        }
    }

    async fn confirm(
        &self,
        tool_name: &str,
        arguments: &IndexMap<String, String>,
        offered: Option<&[PermissionOption]>,
        cancel: &CancellationToken,
    ) -> PermissionDecision {
        let Some(broker) = &self.broker else {
            return match offered {
                Some(options) if !options.is_empty() => allow_with(Some(options)),
                _ => {
                    log::warn!("No approval handler for {tool_name}; declining");
                    PermissionDecision::decline(None, NO_APPROVER_NOTICE)
                }
            };
        };

        let request = ApprovalRequest {
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
        };
        match broker.request(request, cancel).await {
            Some(ApprovalAnswer::AllowAlways) => {
                if let Ok(mut allowed) = self.always_allowed.lock() {
                    allowed.insert(tool_name.to_string());
                }
                allow_with(offered)
            }
            Some(ApprovalAnswer::Allow) => allow_with(offered),
            Some(ApprovalAnswer::Decline) => {
                PermissionDecision::decline(offered.and_then(reject_id), DECLINED_NOTICE)
            }
            None => PermissionDecision::decline(None, DECLINED_NOTICE),
        }
    }

    fn is_always_allowed(&self, tool_name: &str) -> bool {
        self.always_allowed
            .lock()
            .map(|allowed| allowed.contains(tool_name))
            .unwrap_or(false)
    }
}

fn allow_with(offered: Option<&[PermissionOption]>) -> PermissionDecision {
    match offered {
        None => PermissionDecision::allow(None),
        Some(options) => match preferred_allow_option(options) {
            Some(option) => PermissionDecision::allow(Some(option.option_id.clone())),
            None => PermissionDecision::decline(None, "The agent offered no permission options."),
        },
    }
}

fn reject_id(options: &[PermissionOption]) -> Option<String> {
    preferred_reject_option(options).map(|option| option.option_id.clone())
}
