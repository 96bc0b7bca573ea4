//! Command tables and dispatch.

use serde::Serialize;

use crate::config::{ActionCommand, CommandsConfig, NavigationCommand, ResponsesConfig};

/// Action tag of a wake-word detection.
pub const WAKE_ACTION: &str = "WAKE";

/// Action tag of a navigation command; `response` carries the destination.
pub const NAVIGATE_ACTION: &str = "NAVIGATE";

/// Outcome of a recognised utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub action: Option<String>,
    pub response: Option<String>,
    pub error: Option<String>,
    /// Utterance that failed to match, kept so it can be routed elsewhere.
    pub transcript: Option<String>,
}

impl CommandResult {
    pub fn wake(greeting: &str) -> Self {
        Self::matched(WAKE_ACTION, greeting)
    }

    pub fn navigate(destination: &str) -> Self {
        Self::matched(NAVIGATE_ACTION, destination)
    }

    pub fn matched(action: &str, response: &str) -> Self {
        Self {
            success: true,
            action: Some(action.to_string()),
            response: Some(response.to_string()),
            error: None,
            transcript: None,
        }
    }

    pub fn unmatched(error: &str, transcript: &str) -> Self {
        Self {
            success: false,
            action: None,
            response: None,
            error: Some(error.to_string()),
            transcript: Some(transcript.to_string()),
        }
    }

    pub fn is_action(&self, action: &str) -> bool {
        self.action.as_deref() == Some(action)
    }
}

/// Navigation and action phrases, matched by substring containment.
///
/// Navigation entries are checked before actions; within a table the first
/// entry in declaration order wins.
#[derive(Debug, Clone)]
pub struct CommandTable {
    navigation: Vec<NavigationCommand>,
    actions: Vec<ActionCommand>,
    error_response: String,
}

impl CommandTable {
    pub fn new(commands: &CommandsConfig, responses: &ResponsesConfig) -> Self {
        let navigation = commands
            .navigation
            .iter()
            .map(|c| NavigationCommand {
                phrase: c.phrase.to_lowercase(),
                destination: c.destination.clone(),
            })
            .collect();
        let actions = commands
            .actions
            .iter()
            .map(|c| ActionCommand {
                phrase: c.phrase.to_lowercase(),
                ..c.clone()
            })
            .collect();

        Self {
            navigation,
            actions,
            error_response: responses.error.clone(),
        }
    }

    /// Whether `text` contains any known phrase.
    pub fn is_complete(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.navigation.iter().any(|c| text.contains(&c.phrase))
            || self.actions.iter().any(|c| text.contains(&c.phrase))
    }

    /// Resolve `text` against the tables.
    pub fn dispatch(&self, text: &str) -> CommandResult {
        let lowered = text.to_lowercase();

        if let Some(nav) = self
            .navigation
            .iter()
            .find(|c| lowered.contains(&c.phrase))
        {
            log::info!("recognition: navigation command {:?} -> {}", nav.phrase, nav.destination);
            return CommandResult::navigate(&nav.destination);
        }

        if let Some(act) = self.actions.iter().find(|c| lowered.contains(&c.phrase)) {
            log::info!("recognition: action command {:?} -> {}", act.phrase, act.action);
            return CommandResult::matched(&act.action, &act.response);
        }

        log::debug!("recognition: no command matched");
        CommandResult::unmatched(&self.error_response, text.trim())
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new(&CommandsConfig::default(), &ResponsesConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_resolves_to_destination() {
        let table = CommandTable::default();
        let result = table.dispatch("please show patients now");
        assert_eq!(result, CommandResult::navigate("/patients"));
    }

    #[test]
    fn action_resolves_with_configured_response() {
        let table = CommandTable::default();
        let result = table.dispatch("show high risk patients");
        assert!(result.success);
        assert_eq!(result.action.as_deref(), Some("SHOW_HIGH_RISK"));
        assert_eq!(
            result.response.as_deref(),
            Some("Here are your high-risk patients...")
        );
    }

    #[test]
    fn navigation_wins_over_actions() {
        let table = CommandTable::default();
        // Contains both "show care gaps" and "care gaps summary".
        let result = table.dispatch("show care gaps summary");
        assert!(result.is_action(NAVIGATE_ACTION));
        assert_eq!(result.response.as_deref(), Some("/care-lists"));
    }

    #[test]
    fn first_declared_entry_wins() {
        let commands = CommandsConfig {
            navigation: vec![
                NavigationCommand {
                    phrase: "open".into(),
                    destination: "/first".into(),
                },
                NavigationCommand {
                    phrase: "open dashboard".into(),
                    destination: "/second".into(),
                },
            ],
            actions: vec![],
            ..CommandsConfig::default()
        };
        let table = CommandTable::new(&commands, &ResponsesConfig::default());
        assert_eq!(table.dispatch("open dashboard"), CommandResult::navigate("/first"));
    }

    #[test]
    fn unmatched_carries_generic_error_and_transcript() {
        let table = CommandTable::default();
        let result = table.dispatch(" what is the weather ");
        assert!(!result.success);
        assert_eq!(result.error, Some(ResponsesConfig::default().error));
        assert_eq!(result.transcript.as_deref(), Some("what is the weather"));
        assert!(!table.is_complete("what is the weather"));
    }

    #[test]
    fn matching_ignores_case() {
        let table = CommandTable::default();
        assert!(table.is_complete("Open Dashboard"));
    }
}
