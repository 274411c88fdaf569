//! Non-interactive subcommands: rules, profiles, saved conversations, code tasks

use std::path::Path;

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use mate_agent::compaction::compress_conversation;
use mate_agent::{
    ConversationStore, NewProfile, NewRule, Profile, RuleKind, RulePatch, RuleStore,
    TomlSettingsFile,
};
use mate_ai::{ClientConfig, CodeTask, InferenceProvider};

use crate::commands::conversation::{list_text, show_text};
use crate::commands::profile::{list_profiles_text, list_rules_text};
use crate::commands::ModelCommand;

#[derive(Subcommand, Debug)]
pub enum RuleAction {
    /// List rules
    List,
    /// Add a regex find-and-replace rule
    AddRegex {
        name: String,
        pattern: String,
        /// Replacement text; `$1` / `${name}` expand capture groups
        #[arg(short, long)]
        replacement: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Add a rule that prepends text
    AddPrefix {
        name: String,
        prefix: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Add a rule that appends text
    AddSuffix {
        name: String,
        suffix: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Change a rule's name, description, or kind-specific text
    Edit {
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        /// New description; an empty string clears it
        #[arg(short, long)]
        description: Option<String>,
        #[command(flatten)]
        kind: KindEdit,
    },
    /// Enable a rule
    Enable { id: String },
    /// Disable a rule
    Disable { id: String },
    /// Remove a rule from the store and from every profile
    Remove { id: String },
}

/// Fields of a rule's kind that `rules edit` can change
#[derive(Args, Debug, Default)]
pub struct KindEdit {
    /// Regex pattern (regex-replace rules)
    #[arg(long)]
    pub pattern: Option<String>,
    /// Replacement text (regex-replace rules)
    #[arg(long)]
    pub replacement: Option<String>,
    /// Prefix text (add-prefix rules)
    #[arg(long)]
    pub prefix: Option<String>,
    /// Suffix text (add-suffix rules)
    #[arg(long)]
    pub suffix: Option<String>,
}

impl KindEdit {
    /// Apply the edits to `kind`; `None` when nothing changes.
    ///
    /// Fields that `kind` does not have are an error.
    fn apply(self, kind: &RuleKind) -> anyhow::Result<Option<RuleKind>> {
        let KindEdit {
            pattern,
            replacement,
            prefix,
            suffix,
        } = self;

        let foreign = match kind {
            RuleKind::RegexReplace { .. } => prefix.is_some() || suffix.is_some(),
            RuleKind::AddPrefix { .. } => {
                pattern.is_some() || replacement.is_some() || suffix.is_some()
            }
            RuleKind::AddSuffix { .. } => {
                pattern.is_some() || replacement.is_some() || prefix.is_some()
            }
            RuleKind::Unknown => {
                pattern.is_some() || replacement.is_some() || prefix.is_some() || suffix.is_some()
            }
        };
        if foreign {
            bail!("That option does not apply to a {} rule", kind.type_name());
        }

        Ok(match kind {
            RuleKind::RegexReplace {
                pattern: old_pattern,
                replacement: old_replacement,
            } if pattern.is_some() || replacement.is_some() => Some(RuleKind::RegexReplace {
                pattern: pattern.unwrap_or_else(|| old_pattern.clone()),
                replacement: replacement.or_else(|| old_replacement.clone()),
            }),
            RuleKind::AddPrefix { .. } => prefix.map(|prefix| RuleKind::AddPrefix { prefix }),
            RuleKind::AddSuffix { .. } => suffix.map(|suffix| RuleKind::AddSuffix { suffix }),
            _ => None,
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    /// List profiles
    List,
    /// Create a profile from an ordered list of rules
    Create {
        name: String,
        /// Rule id, in pipeline order (repeatable)
        #[arg(short, long = "rule")]
        rules: Vec<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Append a rule to the end of a profile
    AddRule { profile: String, rule: String },
    /// Append every rule the profile does not already run
    AddAll { profile: String },
    /// Take a rule out of a profile (the rule itself is kept)
    RemoveRule { profile: String, rule: String },
    /// Set the order a profile runs its rules in
    Reorder {
        profile: String,
        /// Every rule id of the profile, in the new order
        #[arg(required = true)]
        rules: Vec<String>,
    },
    /// Post-process replies with this profile
    Activate { id: String },
    /// Stop post-processing replies
    Deactivate,
    /// Remove a profile
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ConversationAction {
    /// List saved conversations
    List,
    /// Print a saved conversation
    Show { id: String },
    /// Delete a saved conversation
    Delete { id: String },
    /// Rename a saved conversation
    Rename { id: String, name: String },
    /// Summarize a saved conversation into a single message
    Compress { id: String },
}

fn open_rules(path: &Path) -> anyhow::Result<RuleStore> {
    RuleStore::open(TomlSettingsFile::new(path))
        .with_context(|| format!("Failed to load rules from {}", path.display()))
}

pub fn rules(path: &Path, action: RuleAction) -> anyhow::Result<()> {
    let mut store = open_rules(path)?;

    let with_description = |mut new: NewRule, description: Option<String>| {
        new.description = description;
        new
    };

    let created = match action {
        RuleAction::List => {
            println!("{}", list_rules_text(&store));
            return Ok(());
        }
        RuleAction::AddRegex {
            name,
            pattern,
            replacement,
            description,
        } => store.create_rule(with_description(
            NewRule::new(
                name,
                RuleKind::RegexReplace {
                    pattern,
                    replacement,
                },
            ),
            description,
        ))?,
        RuleAction::AddPrefix {
            name,
            prefix,
            description,
        } => store.create_rule(with_description(
            NewRule::new(name, RuleKind::AddPrefix { prefix }),
            description,
        ))?,
        RuleAction::AddSuffix {
            name,
            suffix,
            description,
        } => store.create_rule(with_description(
            NewRule::new(name, RuleKind::AddSuffix { suffix }),
            description,
        ))?,
        RuleAction::Edit {
            id,
            name,
            description,
            kind,
        } => {
            let current = store
                .rule(&id)
                .map(|r| r.kind.clone())
                .with_context(|| format!("No rule with id {}", id))?;
            let kind = kind.apply(&current)?;
            if name.is_none() && description.is_none() && kind.is_none() {
                bail!("Nothing to change; pass --name, --description, or a kind option");
            }
            let rule = store.update_rule(
                &id,
                RulePatch {
                    name,
                    description,
                    kind,
                    enabled: None,
                },
            )?;
            println!("Updated rule {} ({})", rule.id, rule.name);
            return Ok(());
        }
        RuleAction::Enable { id } => {
            set_enabled(&mut store, &id, true)?;
            println!("Enabled {}", id);
            return Ok(());
        }
        RuleAction::Disable { id } => {
            set_enabled(&mut store, &id, false)?;
            println!("Disabled {}", id);
            return Ok(());
        }
        RuleAction::Remove { id } => {
            store.delete_rule(&id)?;
            println!("Removed rule {}", id);
            return Ok(());
        }
    };

    println!("Created rule {} ({})", created.id, created.name);
    Ok(())
}

fn set_enabled(store: &mut RuleStore, id: &str, enabled: bool) -> anyhow::Result<()> {
    store.update_rule(
        id,
        RulePatch {
            enabled: Some(enabled),
            ..Default::default()
        },
    )?;
    Ok(())
}

pub fn profiles(path: &Path, action: ProfileAction) -> anyhow::Result<()> {
    let mut store = open_rules(path)?;

    match action {
        ProfileAction::List => println!("{}", list_profiles_text(&store)),
        ProfileAction::Create {
            name,
            rules,
            description,
        } => {
            if let Some(missing) = rules.iter().find(|id| store.rule(id).is_none()) {
                bail!("No rule with id {}", missing);
            }
            let mut new = NewProfile::new(name, rules);
            new.description = description;
            let profile = store.create_profile(new)?;
            println!("Created profile {} ({})", profile.id, profile.name);
        }
        ProfileAction::AddRule { profile, rule } => {
            let updated = store.append_rule(&profile, &rule)?;
            print_pipeline(&store, &updated);
        }
        ProfileAction::AddAll { profile } => {
            let updated = store.add_all_rules(&profile)?;
            print_pipeline(&store, &updated);
        }
        ProfileAction::RemoveRule { profile, rule } => {
            let updated = store.remove_rule_from_profile(&profile, &rule)?;
            print_pipeline(&store, &updated);
        }
        ProfileAction::Reorder { profile, rules } => {
            let updated = store.reorder_profile(&profile, rules)?;
            print_pipeline(&store, &updated);
        }
        ProfileAction::Activate { id } => {
            store.set_active_profile(Some(id.as_str()))?;
            println!("Activated profile {}", id);
        }
        ProfileAction::Deactivate => {
            store.set_active_profile(None)?;
            println!("Post-processing disabled");
        }
        ProfileAction::Remove { id } => {
            store.delete_profile(&id)?;
            println!("Removed profile {}", id);
        }
    }
    Ok(())
}

fn print_pipeline(store: &RuleStore, profile: &Profile) {
    let names: Vec<&str> = profile
        .rule_ids
        .iter()
        .map(|id| store.rule(id).map_or(id.as_str(), |r| r.name.as_str()))
        .collect();
    println!(
        "Profile {} now runs {} rule(s): {}",
        profile.id,
        names.len(),
        names.join(" -> ")
    );
}

pub async fn conversations(
    store: &ConversationStore,
    action: ConversationAction,
    provider: &dyn InferenceProvider,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    match action {
        ConversationAction::List => println!("{}", list_text(&store.list()?)),
        ConversationAction::Show { id } => match store.load(&id)? {
            Some(conversation) => println!("{}", show_text(&conversation)),
            None => bail!("No conversation with id {}", id),
        },
        ConversationAction::Delete { id } => {
            if !store.delete(&id)? {
                bail!("No conversation with id {}", id);
            }
            println!("Deleted {}", id);
        }
        ConversationAction::Rename { id, name } => {
            if !store.rename(&id, &name)? {
                bail!("No conversation with id {}", id);
            }
            println!("Renamed {} to '{}'", id, name);
        }
        ConversationAction::Compress { id } => {
            println!("Compressing {}...", id);
            let conversation = compress_conversation(store, provider, config, &id).await?;
            println!(
                "Compressed. Context is now {} tokens.\n\n{}",
                conversation.context.len(),
                conversation
                    .messages
                    .first()
                    .map(|m| m.content.as_str())
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

/// Run a one-shot code task over a file and print the answer
pub async fn run_task(
    task: CodeTask,
    file: &Path,
    provider: &dyn InferenceProvider,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if code.trim().is_empty() {
        bail!("{} is empty", file.display());
    }

    let answer = task.run(provider, config, &code).await?;
    println!("{}", answer.trim_end());
    Ok(())
}

pub async fn list_models(provider: &dyn InferenceProvider, current: &str) -> anyhow::Result<()> {
    let models = provider.list_models().await?;
    println!("{}", ModelCommand::list_models_text(current, &models));
    Ok(())
}
