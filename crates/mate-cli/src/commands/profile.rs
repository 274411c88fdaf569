//! /profile command - pick the post-processing profile for replies

use super::CommandResult;
use crate::utils::truncate_chars;
use mate_agent::{RuleKind, RuleStore, SharedRuleStore};

pub struct ProfileCommand;

impl ProfileCommand {
    /// Execute /profile command
    /// - No args: show the active profile
    /// - `none` / `off`: deactivate
    /// - Otherwise: activate the profile with that id or name
    pub fn execute(args: &str, rules: &SharedRuleStore) -> CommandResult {
        match args {
            "" => {
                let store = rules.read();
                CommandResult::Message(match store.active_profile() {
                    Some(profile) => format!(
                        "Active profile: {} ({}), {} rule(s)",
                        profile.name,
                        profile.id,
                        profile.rule_ids.len()
                    ),
                    None => "No active profile. Use /profiles to see what's available.".to_string(),
                })
            }
            "none" | "off" => match rules.write().set_active_profile(None) {
                Ok(()) => CommandResult::Message("Post-processing disabled".to_string()),
                Err(e) => CommandResult::Message(format!("Failed to update profile: {}", e)),
            },
            query => {
                let mut store = rules.write();
                let Some(id) = find_profile_id(&store, query) else {
                    return CommandResult::Message(format!(
                        "No profile matching '{}'. Use /profiles to list them.",
                        query
                    ));
                };
                match store.set_active_profile(Some(id.as_str())) {
                    Ok(()) => CommandResult::Message(format!("Activated profile {}", id)),
                    Err(e) => CommandResult::Message(format!("Failed to update profile: {}", e)),
                }
            }
        }
    }

    /// Execute /profiles command
    pub fn list(rules: &SharedRuleStore) -> CommandResult {
        let store = rules.read();
        CommandResult::Message(format!(
            "{}\n\n{}",
            list_profiles_text(&store),
            list_rules_text(&store)
        ))
    }
}

/// Match by exact id first, then case-insensitive name
fn find_profile_id(store: &RuleStore, query: &str) -> Option<String> {
    store
        .profile(query)
        .or_else(|| {
            store
                .profiles()
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(query))
        })
        .map(|p| p.id.clone())
}

/// One-line summary of what a rule does
pub fn describe_kind(kind: &RuleKind) -> String {
    match kind {
        RuleKind::RegexReplace {
            pattern,
            replacement,
        } => format!(
            "regex /{}/ -> \"{}\"",
            pattern,
            replacement.as_deref().unwrap_or("")
        ),
        RuleKind::AddPrefix { prefix } => format!("prefix \"{}\"", truncate_chars(prefix, 40)),
        RuleKind::AddSuffix { suffix } => format!("suffix \"{}\"", truncate_chars(suffix, 40)),
        RuleKind::Unknown => "unknown (ignored)".to_string(),
    }
}

pub fn list_profiles_text(store: &RuleStore) -> String {
    if store.profiles().is_empty() {
        return "No profiles defined.".to_string();
    }

    let active = store.active_profile_id();
    let mut output = String::from("Profiles:\n");
    for profile in store.profiles() {
        let marker = if Some(profile.id.as_str()) == active { " *" } else { "" };
        output.push_str(&format!("  {}{}  {}\n", profile.id, marker, profile.name));
        for rule_id in &profile.rule_ids {
            match store.rule(rule_id) {
                Some(rule) => output.push_str(&format!("      - {}\n", rule.name)),
                None => output.push_str(&format!("      - {} (missing)\n", rule_id)),
            }
        }
    }
    output.trim_end().to_string()
}

pub fn list_rules_text(store: &RuleStore) -> String {
    if store.rules().is_empty() {
        return "No rules defined.".to_string();
    }

    let mut output = String::from("Rules:\n");
    for rule in store.rules() {
        let state = if rule.enabled { "" } else { " [disabled]" };
        output.push_str(&format!(
            "  {}  {}{}: {}\n",
            rule.id,
            rule.name,
            state,
            describe_kind(&rule.kind)
        ));
    }
    output.trim_end().to_string()
}
