//! Rule and profile store with all-or-nothing persistence

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::profile::{Profile, RuleRegistry};
use crate::rules::{Rule, RuleKind};
use crate::settings::{PipelineSettings, SettingsBackend};

/// Store shared between the session and the command layer
pub type SharedRuleStore = Arc<RwLock<RuleStore>>;

/// Fields for a new rule
#[derive(Debug, Clone)]
pub struct NewRule {
    pub name: String,
    pub description: Option<String>,
    pub kind: RuleKind,
    pub enabled: bool,
}

impl NewRule {
    pub fn new(name: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind,
            enabled: true,
        }
    }
}

/// Partial rule update; `None` leaves the field alone
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<RuleKind>,
    pub enabled: Option<bool>,
}

/// Fields for a new profile
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub name: String,
    pub description: Option<String>,
    pub rule_ids: Vec<String>,
}

impl NewProfile {
    pub fn new(name: impl Into<String>, rule_ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            rule_ids,
        }
    }
}

/// Partial profile update
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rule_ids: Option<Vec<String>>,
}

/// Owns the rule and profile collections and the active-profile pointer.
///
/// Every mutation is validated, applied to a copy, and written through the
/// backend. Memory is only updated once the write succeeds.
pub struct RuleStore {
    settings: PipelineSettings,
    backend: Box<dyn SettingsBackend>,
}

impl RuleStore {
    /// Open the store, reading the current snapshot from `backend`
    pub fn open(backend: impl SettingsBackend + 'static) -> Result<Self> {
        let settings = backend.load()?;
        tracing::debug!(
            "Loaded {} rules, {} profiles",
            settings.rules.len(),
            settings.profiles.len()
        );
        Ok(Self {
            settings,
            backend: Box::new(backend),
        })
    }

    pub fn into_shared(self) -> SharedRuleStore {
        Arc::new(RwLock::new(self))
    }

    /// Re-read the backend, discarding the in-memory snapshot
    pub fn reload(&mut self) -> Result<()> {
        self.settings = self.backend.load()?;
        Ok(())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.settings.rules
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.settings.profiles
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.settings.rules.iter().find(|r| r.id == id)
    }

    pub fn profile(&self, id: &str) -> Option<&Profile> {
        self.settings.profiles.iter().find(|p| p.id == id)
    }

    pub fn registry(&self) -> RuleRegistry<'_> {
        RuleRegistry::new(&self.settings.rules)
    }

    pub fn active_profile_id(&self) -> Option<&str> {
        self.settings.active_profile_id.as_deref()
    }

    /// The active profile, if one is set and still exists
    pub fn active_profile(&self) -> Option<&Profile> {
        self.active_profile_id().and_then(|id| self.profile(id))
    }

    /// Run the active profile over `text`; `None` when no profile is active
    pub fn apply_active(&self, text: &str) -> Option<String> {
        let profile = self.active_profile()?;
        Some(profile.run(&self.registry(), text))
    }

    pub fn create_rule(&mut self, new: NewRule) -> Result<Rule> {
        let now = Utc::now();
        let rule = Rule {
            id: generate_id(),
            name: new.name,
            description: new.description,
            kind: new.kind,
            enabled: new.enabled,
            created_at: now,
            updated_at: now,
        };
        rule.validate()?;

        self.commit(|settings| {
            settings.rules.push(rule.clone());
            Ok(())
        })?;
        tracing::info!("Created rule '{}' ({})", rule.name, rule.id);
        Ok(rule)
    }

    pub fn update_rule(&mut self, id: &str, patch: RulePatch) -> Result<Rule> {
        let mut rule = self
            .rule(id)
            .cloned()
            .ok_or_else(|| Error::not_found("Rule", id))?;

        if let Some(name) = patch.name {
            rule.name = name;
        }
        if let Some(description) = patch.description {
            rule.description = (!description.is_empty()).then_some(description);
        }
        if let Some(kind) = patch.kind {
            rule.kind = kind;
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        rule.updated_at = Utc::now();
        rule.validate()?;

        self.commit(|settings| {
            if let Some(slot) = settings.rules.iter_mut().find(|r| r.id == rule.id) {
                *slot = rule.clone();
            }
            Ok(())
        })?;
        Ok(rule)
    }

    /// Delete a rule and drop its id from every profile
    pub fn delete_rule(&mut self, id: &str) -> Result<()> {
        if self.rule(id).is_none() {
            return Err(Error::not_found("Rule", id));
        }

        self.commit(|settings| {
            settings.rules.retain(|r| r.id != id);
            let now = Utc::now();
            for profile in &mut settings.profiles {
                let before = profile.rule_ids.len();
                profile.rule_ids.retain(|rid| rid != id);
                if profile.rule_ids.len() != before {
                    profile.updated_at = now;
                }
            }
            Ok(())
        })?;
        tracing::info!("Deleted rule {}", id);
        Ok(())
    }

    pub fn create_profile(&mut self, new: NewProfile) -> Result<Profile> {
        let now = Utc::now();
        let profile = Profile {
            id: generate_id(),
            name: new.name,
            description: new.description,
            rule_ids: new.rule_ids,
            created_at: now,
            updated_at: now,
        };
        profile.validate()?;

        self.commit(|settings| {
            settings.profiles.push(profile.clone());
            Ok(())
        })?;
        tracing::info!("Created profile '{}' ({})", profile.name, profile.id);
        Ok(profile)
    }

    pub fn update_profile(&mut self, id: &str, patch: ProfilePatch) -> Result<Profile> {
        let mut profile = self
            .profile(id)
            .cloned()
            .ok_or_else(|| Error::not_found("Profile", id))?;

        if let Some(name) = patch.name {
            profile.name = name;
        }
        if let Some(description) = patch.description {
            profile.description = (!description.is_empty()).then_some(description);
        }
        if let Some(rule_ids) = patch.rule_ids {
            profile.rule_ids = rule_ids;
        }
        profile.updated_at = Utc::now();
        profile.validate()?;

        self.commit(|settings| {
            if let Some(slot) = settings.profiles.iter_mut().find(|p| p.id == profile.id) {
                *slot = profile.clone();
            }
            Ok(())
        })?;
        Ok(profile)
    }

    /// Append an existing rule to the end of a profile's pipeline
    pub fn append_rule(&mut self, profile_id: &str, rule_id: &str) -> Result<Profile> {
        if self.rule(rule_id).is_none() {
            return Err(Error::not_found("Rule", rule_id));
        }
        let mut rule_ids = self
            .profile(profile_id)
            .map(|p| p.rule_ids.clone())
            .ok_or_else(|| Error::not_found("Profile", profile_id))?;
        rule_ids.push(rule_id.to_string());
        self.update_profile(
            profile_id,
            ProfilePatch {
                rule_ids: Some(rule_ids),
                ..Default::default()
            },
        )
    }

    /// Drop a rule from one profile's pipeline; the rule itself is kept
    pub fn remove_rule_from_profile(
        &mut self,
        profile_id: &str,
        rule_id: &str,
    ) -> Result<Profile> {
        let mut rule_ids = self
            .profile(profile_id)
            .map(|p| p.rule_ids.clone())
            .ok_or_else(|| Error::not_found("Profile", profile_id))?;
        let before = rule_ids.len();
        rule_ids.retain(|id| id != rule_id);
        if rule_ids.len() == before {
            return Err(Error::not_found("Rule", rule_id));
        }
        self.update_profile(
            profile_id,
            ProfilePatch {
                rule_ids: Some(rule_ids),
                ..Default::default()
            },
        )
    }

    /// Replace a profile's pipeline order.
    ///
    /// `order` must name exactly the rules already in the profile.
    pub fn reorder_profile(&mut self, profile_id: &str, order: Vec<String>) -> Result<Profile> {
        let current = self
            .profile(profile_id)
            .map(|p| p.rule_ids.clone())
            .ok_or_else(|| Error::not_found("Profile", profile_id))?;

        let mut expected = current;
        let mut given = order.clone();
        expected.sort();
        given.sort();
        if expected != given {
            return Err(Error::Validation(
                "new order must list each of the profile's rules exactly once".into(),
            ));
        }

        self.update_profile(
            profile_id,
            ProfilePatch {
                rule_ids: Some(order),
                ..Default::default()
            },
        )
    }

    /// Append every stored rule the profile does not already run, in store order
    pub fn add_all_rules(&mut self, profile_id: &str) -> Result<Profile> {
        let mut rule_ids = self
            .profile(profile_id)
            .map(|p| p.rule_ids.clone())
            .ok_or_else(|| Error::not_found("Profile", profile_id))?;
        for rule in &self.settings.rules {
            if !rule_ids.contains(&rule.id) {
                rule_ids.push(rule.id.clone());
            }
        }
        self.update_profile(
            profile_id,
            ProfilePatch {
                rule_ids: Some(rule_ids),
                ..Default::default()
            },
        )
    }

    /// Delete a profile, clearing the active pointer if it was active
    pub fn delete_profile(&mut self, id: &str) -> Result<()> {
        if self.profile(id).is_none() {
            return Err(Error::not_found("Profile", id));
        }

        self.commit(|settings| {
            settings.profiles.retain(|p| p.id != id);
            if settings.active_profile_id.as_deref() == Some(id) {
                settings.active_profile_id = None;
            }
            Ok(())
        })?;
        tracing::info!("Deleted profile {}", id);
        Ok(())
    }

    /// Activate a profile by id, or deactivate with `None`
    pub fn set_active_profile(&mut self, id: Option<&str>) -> Result<()> {
        if let Some(id) = id {
            if self.profile(id).is_none() {
                return Err(Error::not_found("Profile", id));
            }
        }

        let id = id.map(str::to_string);
        self.commit(|settings| {
            settings.active_profile_id = id;
            Ok(())
        })
    }

    /// Apply `mutate` to a copy of the settings, persist it, then swap it in
    fn commit<R>(&mut self, mutate: impl FnOnce(&mut PipelineSettings) -> Result<R>) -> Result<R> {
        let mut next = self.settings.clone();
        let out = mutate(&mut next)?;
        if let Err(e) = self.backend.save(&next) {
            tracing::warn!("Failed to persist pipeline settings: {}", e);
            return Err(e);
        }
        self.settings = next;
        Ok(out)
    }
}

/// Base-36 timestamp followed by a random suffix
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", to_base36(millis), &random[..9])
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
