use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::ids::ConnectionId;

/// A single grant: a human-readable `name` used for exact-match checks, and
/// a set of path-segment action patterns (`"stream/*"`, `"queue/reorder"`)
/// used for wildcard checks against a requested action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub actions: Vec<String>,
}

impl Rule {
    #[must_use]
    pub fn new(name: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }
}

/// A named bundle of rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }
}

struct RoleBinding {
    role_name: String,
    subjects: HashSet<ConnectionId>,
}

/// Per-room role-based access control.
///
/// Roles and bindings are stored independently: a role can exist unbound,
/// and a binding references a role by name so updating a role's rules
/// retroactively affects everyone already bound to it.
pub struct Authorizer {
    enabled: bool,
    roles: Mutex<HashMap<String, Role>>,
    bindings: Mutex<HashMap<String, RoleBinding>>,
}

impl Authorizer {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            roles: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Register a role. A no-op if a role with that name already exists.
    pub fn add_role(&self, role: Role) {
        self.roles.lock().entry(role.name.clone()).or_insert(role);
    }

    #[must_use]
    pub fn role(&self, name: &str) -> Option<Role> {
        self.roles.lock().get(name).cloned()
    }

    /// Bind `subjects` to `role_name`, creating the binding on first use.
    /// Additive: re-binding an already-bound subject is a no-op.
    pub fn bind(&self, role_name: &str, subjects: &[ConnectionId]) -> Result<()> {
        if !self.roles.lock().contains_key(role_name) {
            return Err(Error::RoleNotFound(role_name.to_string()));
        }
        let mut bindings = self.bindings.lock();
        let binding = bindings
            .entry(role_name.to_string())
            .or_insert_with(|| RoleBinding {
                role_name: role_name.to_string(),
                subjects: HashSet::new(),
            });
        binding.subjects.extend(subjects.iter().copied());
        Ok(())
    }

    /// Remove `subject` from `role_name`'s binding.
    pub fn unbind(&self, role_name: &str, subject: &ConnectionId) -> Result<()> {
        let mut bindings = self.bindings.lock();
        let binding = bindings.get_mut(role_name).ok_or(Error::NotBound)?;
        if !binding.subjects.remove(subject) {
            return Err(Error::NotBound);
        }
        Ok(())
    }

    #[must_use]
    pub fn has_role(&self, subject: &ConnectionId, role_name: &str) -> bool {
        self.bindings
            .lock()
            .get(role_name)
            .is_some_and(|b| b.subjects.contains(subject))
    }

    #[must_use]
    pub fn roles_of(&self, subject: &ConnectionId) -> Vec<String> {
        self.bindings
            .lock()
            .values()
            .filter(|b| b.subjects.contains(subject))
            .map(|b| b.role_name.clone())
            .collect()
    }

    /// True iff some role bound to `subject` contains a rule with the same
    /// `name` as `rule`.
    #[must_use]
    pub fn verify(&self, subject: &ConnectionId, rule: &Rule) -> bool {
        if !self.enabled {
            return true;
        }
        let bound_roles = self.roles_of(subject);
        let roles = self.roles.lock();
        bound_roles.iter().any(|role_name| {
            roles
                .get(role_name)
                .is_some_and(|role| role.rules.iter().any(|r| r.name == rule.name))
        })
    }

    /// Find the first rule, among every role bound to `subject`, whose
    /// action patterns match `action` (a `/`-segmented path).
    #[must_use]
    pub fn rule_by_action(&self, subject: &ConnectionId, action: &str) -> Option<Rule> {
        if !self.enabled {
            return None;
        }
        let bound_roles = self.roles_of(subject);
        let roles = self.roles.lock();
        for role_name in &bound_roles {
            if let Some(role) = roles.get(role_name) {
                for rule in &role.rules {
                    if rule.actions.iter().any(|pattern| action_matches(pattern, action)) {
                        return Some(rule.clone());
                    }
                }
            }
        }
        None
    }

    /// Authorize `action` for `subject`, returning `PermissionDenied` if no
    /// bound role grants a matching pattern. Always permits when the
    /// authorizer is disabled.
    pub fn authorize(&self, subject: &ConnectionId, action: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.rule_by_action(subject, action).is_some() {
            Ok(())
        } else {
            Err(Error::PermissionDenied)
        }
    }
}

/// Match a wildcard action pattern against a requested action, comparing
/// `/`-separated segments. A `*` segment matches exactly one segment; a
/// trailing `*` segment also matches any number of further segments.
fn action_matches(pattern: &str, action: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let action_segments: Vec<&str> = action.split('/').collect();

    let mut pi = 0;
    let mut ai = 0;
    while pi < pattern_segments.len() {
        if pattern_segments[pi] == "*" && pi == pattern_segments.len() - 1 {
            return true;
        }
        if ai >= action_segments.len() {
            return false;
        }
        if pattern_segments[pi] != "*" && pattern_segments[pi] != action_segments[ai] {
            return false;
        }
        pi += 1;
        ai += 1;
    }
    pi == pattern_segments.len() && ai == action_segments.len()
}

/// The built-in roles every room starts with.
#[must_use]
pub fn default_roles() -> Vec<Role> {
    vec![
        Role::new(
            "viewer",
            vec![Rule::new("chat.read", vec!["chat/read".to_string()])],
        ),
        Role::new(
            "user",
            vec![
                Rule::new("chat.send", vec!["chat/read".to_string(), "chat/send".to_string()]),
                Rule::new("stream.control", vec!["stream/*".to_string()]),
                Rule::new("queue.manage", vec!["queue/*".to_string()]),
            ],
        ),
        Role::new(
            "admin",
            vec![
                Rule::new("admin.all", vec!["*".to_string()]),
                Rule::new("role.manage", vec!["role/*".to_string()]),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorizer_with_defaults() -> Authorizer {
        let auth = Authorizer::new(true);
        for role in default_roles() {
            auth.add_role(role);
        }
        auth
    }

    #[test]
    fn verify_matches_by_rule_name_across_bound_roles() {
        let auth = authorizer_with_defaults();
        let subject = ConnectionId::new();
        auth.bind("user", &[subject]).unwrap();
        assert!(auth.verify(&subject, &Rule::new("stream.control", vec![])));
        assert!(!auth.verify(&subject, &Rule::new("role.manage", vec![])));
    }

    #[test]
    fn rule_by_action_matches_wildcard_segment() {
        let auth = authorizer_with_defaults();
        let subject = ConnectionId::new();
        auth.bind("user", &[subject]).unwrap();
        assert!(auth.rule_by_action(&subject, "stream/play").is_some());
        assert!(auth.rule_by_action(&subject, "role/set").is_none());
    }

    #[test]
    fn admin_wildcard_matches_everything() {
        let auth = authorizer_with_defaults();
        let subject = ConnectionId::new();
        auth.bind("admin", &[subject]).unwrap();
        assert!(auth.rule_by_action(&subject, "role/set").is_some());
        assert!(auth.rule_by_action(&subject, "queue/clear").is_some());
    }

    #[test]
    fn bind_requires_existing_role() {
        let auth = Authorizer::new(true);
        assert_eq!(
            auth.bind("ghost", &[ConnectionId::new()]).unwrap_err(),
            Error::RoleNotFound("ghost".to_string())
        );
    }

    #[test]
    fn disabled_authorizer_always_permits() {
        let auth = Authorizer::new(false);
        let subject = ConnectionId::new();
        assert!(auth.authorize(&subject, "anything/goes").is_ok());
    }

    #[test]
    fn add_role_is_idempotent_on_name_collision() {
        let auth = Authorizer::new(true);
        auth.add_role(Role::new("viewer", vec![Rule::new("a", vec![])]));
        auth.add_role(Role::new("viewer", vec![Rule::new("b", vec![])]));
        let role = auth.role("viewer").unwrap();
        assert_eq!(role.rules[0].name, "a");
    }
}
