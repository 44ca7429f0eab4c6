//! Control channel messages of the state coordinator.
//!
//! Two message families share the control topic:
//!
//! - actions, keyed by `action`: requests sent by any context
//! - notifications, keyed by `type`: state echoes sent by the owner
//!
//! # Format
//!
//! ```json
//! { "action": "toggle" }
//! { "action": "switch-tab", "pluginName": "Network", "tabName": "Headers" }
//! { "type": "u-devtools:state-changed", "isOpen": true }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::topics::Topics;

// ============================================================================
// ControlMessage
// ============================================================================

/// A parsed control channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Request to show the tool UI.
    Open,
    /// Request to hide the tool UI.
    Close,
    /// Request to flip visibility.
    Toggle,
    /// Query for the current visibility.
    GetState,
    /// Request to focus a plugin.
    SwitchPlugin {
        /// Plugin name.
        plugin_name: String,
    },
    /// Request to focus a tab inside a plugin.
    SwitchTab {
        /// Plugin name.
        plugin_name: String,
        /// Tab name.
        tab_name: String,
    },
    /// Owner's reply to [`ControlMessage::GetState`].
    StateResponse {
        /// Current visibility.
        is_open: bool,
    },
    /// Owner's notification that visibility changed.
    StateChanged {
        /// New visibility.
        is_open: bool,
    },
}

/// Loose shape accepted from the wire before classification.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawControl {
    action: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    is_open: Option<bool>,
    plugin_name: Option<String>,
    tab_name: Option<String>,
}

impl ControlMessage {
    /// Returns `true` for messages that request something of the owner.
    ///
    /// State notifications are never actions, whatever other fields they
    /// carry.
    #[inline]
    #[must_use]
    pub fn is_action(&self) -> bool {
        !matches!(
            self,
            Self::StateResponse { .. } | Self::StateChanged { .. }
        )
    }

    /// Wire name of the action or notification.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Toggle => "toggle",
            Self::GetState => "get-state",
            Self::SwitchPlugin { .. } => "switch-plugin",
            Self::SwitchTab { .. } => "switch-tab",
            Self::StateResponse { .. } => "state-response",
            Self::StateChanged { .. } => "state-changed",
        }
    }

    /// Encodes the message for the control topic.
    #[must_use]
    pub fn to_value(&self, topics: &Topics) -> Value {
        match self {
            Self::StateResponse { is_open } => {
                json!({ "type": topics.state_response(), "isOpen": is_open })
            }
            Self::StateChanged { is_open } => {
                json!({ "type": topics.state_changed(), "isOpen": is_open })
            }
            Self::SwitchPlugin { plugin_name } => {
                json!({ "action": self.name(), "pluginName": plugin_name })
            }
            Self::SwitchTab {
                plugin_name,
                tab_name,
            } => json!({
                "action": self.name(),
                "pluginName": plugin_name,
                "tabName": tab_name,
            }),
            _ => {
                let mut map = Map::new();
                map.insert("action".to_string(), Value::from(self.name()));
                Value::Object(map)
            }
        }
    }

    /// Parses a control topic value.
    ///
    /// Returns `None` for anything malformed or unknown. A message carrying
    /// `type` is classified by it alone; `action` is only consulted when
    /// `type` is absent.
    #[must_use]
    pub fn parse(value: &Value, topics: &Topics) -> Option<Self> {
        let raw = RawControl::deserialize(value).ok()?;

        if let Some(kind) = raw.kind.as_deref() {
            let is_open = raw.is_open?;
            return match topics.strip(kind) {
                "state-changed" => Some(Self::StateChanged { is_open }),
                "state-response" => Some(Self::StateResponse { is_open }),
                _ => None,
            };
        }

        match raw.action.as_deref()? {
            "open" => Some(Self::Open),
            "close" => Some(Self::Close),
            "toggle" => Some(Self::Toggle),
            "get-state" => Some(Self::GetState),
            "switch-plugin" => Some(Self::SwitchPlugin {
                plugin_name: raw.plugin_name?,
            }),
            "switch-tab" => Some(Self::SwitchTab {
                plugin_name: raw.plugin_name?,
                tab_name: raw.tab_name?,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::default()
    }

    #[test]
    fn test_action_encoding() {
        assert_eq!(
            ControlMessage::Toggle.to_value(&topics()),
            json!({ "action": "toggle" })
        );
        assert_eq!(
            ControlMessage::GetState.to_value(&topics()),
            json!({ "action": "get-state" })
        );
    }

    #[test]
    fn test_state_changed_encoding_is_prefixed() {
        let value = ControlMessage::StateChanged { is_open: true }.to_value(&topics());
        assert_eq!(
            value,
            json!({ "type": "u-devtools:state-changed", "isOpen": true })
        );
    }

    #[test]
    fn test_switch_tab_encoding() {
        let value = ControlMessage::SwitchTab {
            plugin_name: "Network".into(),
            tab_name: "Headers".into(),
        }
        .to_value(&topics());
        assert_eq!(
            value,
            json!({ "action": "switch-tab", "pluginName": "Network", "tabName": "Headers" })
        );
    }

    #[test]
    fn test_parse_actions() {
        let t = topics();
        assert_eq!(
            ControlMessage::parse(&json!({ "action": "open" }), &t),
            Some(ControlMessage::Open)
        );
        assert_eq!(
            ControlMessage::parse(&json!({ "action": "switch-plugin", "pluginName": "I18n" }), &t),
            Some(ControlMessage::SwitchPlugin {
                plugin_name: "I18n".into()
            })
        );
    }

    #[test]
    fn test_parse_accepts_bare_and_prefixed_types() {
        let t = topics();
        assert_eq!(
            ControlMessage::parse(&json!({ "type": "state-changed", "isOpen": false }), &t),
            Some(ControlMessage::StateChanged { is_open: false })
        );
        assert_eq!(
            ControlMessage::parse(
                &json!({ "type": "u-devtools:state-response", "isOpen": true }),
                &t
            ),
            Some(ControlMessage::StateResponse { is_open: true })
        );
    }

    #[test]
    fn test_type_wins_over_action() {
        let value = json!({ "type": "u-devtools:state-changed", "isOpen": true, "action": "toggle" });
        let message = ControlMessage::parse(&value, &topics()).expect("parse");
        assert!(!message.is_action());
    }

    #[test]
    fn test_parse_malformed() {
        let t = topics();
        assert_eq!(ControlMessage::parse(&json!("open"), &t), None);
        assert_eq!(ControlMessage::parse(&json!({ "action": "explode" }), &t), None);
        assert_eq!(ControlMessage::parse(&json!({ "action": "switch-tab", "pluginName": "x" }), &t), None);
        assert_eq!(ControlMessage::parse(&json!({ "type": "state-changed" }), &t), None);
    }

    #[test]
    fn test_round_trip_of_each_variant() {
        let t = topics();
        let all = [
            ControlMessage::Open,
            ControlMessage::Close,
            ControlMessage::Toggle,
            ControlMessage::GetState,
            ControlMessage::StateResponse { is_open: true },
            ControlMessage::StateChanged { is_open: false },
        ];
        for message in all {
            assert_eq!(ControlMessage::parse(&message.to_value(&t), &t), Some(message));
        }
    }
}
