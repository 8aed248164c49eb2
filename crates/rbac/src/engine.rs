//! RBAC engine (§4.5): users, roles with single-parent inheritance,
//! black/white permission tries per subject, black-overrides-white
//! resolution.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::trie::Trie;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantMode {
    White,
    Black,
}

#[derive(Default)]
struct Grants {
    white: Trie,
    black: Trie,
}

fn subject_key(kind: SubjectKind, id: &str) -> String {
    match kind {
        SubjectKind::User => format!("user:{id}"),
        SubjectKind::Role => format!("role:{id}"),
    }
}

/// Serializable snapshot of engine state, for [`RbacEngine::save`]/`restore`.
#[derive(Serialize, Deserialize)]
pub struct RbacState {
    pub default_role: String,
    pub users: Vec<String>,
    pub roles: Vec<String>,
    pub user_roles: HashMap<String, Vec<String>>,
    pub role_parent: HashMap<String, String>,
    pub permissions: Vec<String>,
    pub white: HashMap<String, Vec<String>>,
    pub black: HashMap<String, Vec<String>>,
}

pub struct RbacEngine {
    default_role: String,
    users: Mutex<HashSet<String>>,
    roles: Mutex<HashSet<String>>,
    user_roles: Mutex<HashMap<String, HashSet<String>>>,
    role_parent: Mutex<HashMap<String, String>>,
    permissions: Mutex<HashSet<String>>,
    grants: Mutex<HashMap<String, Grants>>,
}

impl RbacEngine {
    #[must_use]
    pub fn new(default_role: impl Into<String>) -> Self {
        let default_role = default_role.into();
        let mut roles = HashSet::new();
        roles.insert(default_role.clone());
        Self {
            default_role,
            users: Mutex::new(HashSet::new()),
            roles: Mutex::new(roles),
            user_roles: Mutex::new(HashMap::new()),
            role_parent: Mutex::new(HashMap::new()),
            permissions: Mutex::new(HashSet::new()),
            grants: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_permission(&self, path: &str) -> ncatbot_common::Result<()> {
        Trie::default().add_path(path)?; // validates: no wildcard segments
        self.permissions.lock().unwrap_or_else(|p| p.into_inner()).insert(path.to_string());
        Ok(())
    }

    /// Drop a declared permission path from the known set. Grants that
    /// reference it are left alone — a plugin's unload clears what it
    /// *declared*, not grants an operator made against it (§4.7 unload step 3).
    pub fn remove_permission(&self, path: &str) {
        self.permissions.lock().unwrap_or_else(|p| p.into_inner()).remove(path);
    }

    pub fn add_user(&self, id: &str) {
        self.ensure_user(id);
    }

    pub fn add_role(&self, name: &str) {
        self.roles.lock().unwrap_or_else(|p| p.into_inner()).insert(name.to_string());
    }

    fn ensure_user(&self, id: &str) {
        let mut users = self.users.lock().unwrap_or_else(|p| p.into_inner());
        if users.insert(id.to_string()) {
            drop(users);
            self.user_roles
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .entry(id.to_string())
                .or_insert_with(|| HashSet::from([self.default_role.clone()]));
        }
    }

    pub fn assign_role(&self, user: &str, role: &str) -> ncatbot_common::Result<()> {
        if !self.roles.lock().unwrap_or_else(|p| p.into_inner()).contains(role) {
            return Err(ncatbot_common::Error::Validation(format!("no such role: {role}")));
        }
        self.ensure_user(user);
        self.user_roles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(user.to_string())
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    pub fn unassign_role(&self, user: &str, role: &str) {
        if let Some(roles) = self.user_roles.lock().unwrap_or_else(|p| p.into_inner()).get_mut(user) {
            roles.remove(role);
        }
    }

    /// Set `child`'s parent role, rejecting a cycle by walking the parent
    /// chain from `parent` back up (§4.5).
    pub fn set_role_inheritance(&self, child: &str, parent: &str) -> ncatbot_common::Result<()> {
        if child == parent {
            return Err(ncatbot_common::Error::CircularInheritance(child.to_string()));
        }

        let mut edges = self.role_parent.lock().unwrap_or_else(|p| p.into_inner());
        let mut cursor = Some(parent.to_string());
        let mut visited = HashSet::new();
        while let Some(current) = cursor {
            if current == child {
                return Err(ncatbot_common::Error::CircularInheritance(child.to_string()));
            }
            if !visited.insert(current.clone()) {
                break;
            }
            cursor = edges.get(&current).cloned();
        }

        self.roles.lock().unwrap_or_else(|p| p.into_inner()).insert(parent.to_string());
        self.roles.lock().unwrap_or_else(|p| p.into_inner()).insert(child.to_string());
        edges.insert(child.to_string(), parent.to_string());
        Ok(())
    }

    pub fn grant(&self, kind: SubjectKind, id: &str, path: &str, mode: GrantMode) -> ncatbot_common::Result<()> {
        let key = subject_key(kind, id);
        let mut grants = self.grants.lock().unwrap_or_else(|p| p.into_inner());
        let entry = grants.entry(key).or_default();
        match mode {
            GrantMode::White => entry.white.add_path(path)?,
            GrantMode::Black => entry.black.add_path(path)?,
        }
        Ok(())
    }

    pub fn revoke(&self, kind: SubjectKind, id: &str, path: &str) {
        let key = subject_key(kind, id);
        if let Some(entry) = self.grants.lock().unwrap_or_else(|p| p.into_inner()).get_mut(&key) {
            entry.white.del_path(path, true);
            entry.black.del_path(path, true);
        }
    }

    /// Closed role set for `user`: directly assigned roles plus every
    /// ancestor reachable via `role_parent`, cycle-guarded.
    fn closed_roles(&self, user: &str) -> Vec<String> {
        let assigned = self
            .user_roles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(user)
            .cloned()
            .unwrap_or_else(|| HashSet::from([self.default_role.clone()]));

        let edges = self.role_parent.lock().unwrap_or_else(|p| p.into_inner());
        let mut closed = HashSet::new();
        for role in assigned {
            let mut cursor = Some(role);
            while let Some(current) = cursor {
                if !closed.insert(current.clone()) {
                    break;
                }
                cursor = edges.get(&current).cloned();
            }
        }
        closed.into_iter().collect()
    }

    /// `check` algorithm (§4.5): auto-create the user with the default
    /// role if absent, compute the closed role set, black-overrides-white.
    #[must_use]
    pub fn check(&self, user: &str, path: &str) -> bool {
        self.ensure_user(user);
        let roles = self.closed_roles(user);

        let grants = self.grants.lock().unwrap_or_else(|p| p.into_inner());
        let subject_keys: Vec<String> = std::iter::once(subject_key(SubjectKind::User, user))
            .chain(roles.iter().map(|r| subject_key(SubjectKind::Role, r)))
            .collect();

        let any_black = subject_keys
            .iter()
            .filter_map(|key| grants.get(key))
            .any(|g| g.black.check_path(path, false));
        if any_black {
            return false;
        }

        subject_keys.iter().filter_map(|key| grants.get(key)).any(|g| g.white.check_path(path, false))
    }

    #[must_use]
    pub fn save(&self) -> RbacState {
        let grants = self.grants.lock().unwrap_or_else(|p| p.into_inner());
        let mut white = HashMap::new();
        let mut black = HashMap::new();
        for (key, entry) in grants.iter() {
            white.insert(key.clone(), entry.white.leaves());
            black.insert(key.clone(), entry.black.leaves());
        }

        RbacState {
            default_role: self.default_role.clone(),
            users: self.users.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect(),
            roles: self.roles.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect(),
            user_roles: self
                .user_roles
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
            role_parent: self.role_parent.lock().unwrap_or_else(|p| p.into_inner()).clone(),
            permissions: self.permissions.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect(),
            white,
            black,
        }
    }

    pub fn restore(&self, state: RbacState) {
        *self.users.lock().unwrap_or_else(|p| p.into_inner()) = state.users.into_iter().collect();
        *self.roles.lock().unwrap_or_else(|p| p.into_inner()) = state.roles.into_iter().collect();
        *self.user_roles.lock().unwrap_or_else(|p| p.into_inner()) =
            state.user_roles.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect();
        *self.role_parent.lock().unwrap_or_else(|p| p.into_inner()) = state.role_parent;
        *self.permissions.lock().unwrap_or_else(|p| p.into_inner()) = state.permissions.into_iter().collect();

        let mut grants = HashMap::new();
        for (key, leaves) in state.white {
            grants.entry(key).or_insert_with(Grants::default).white = Trie::from_leaves(true, &leaves);
        }
        for (key, leaves) in state.black {
            grants.entry(key).or_insert_with(Grants::default).black = Trie::from_leaves(true, &leaves);
        }
        *self.grants.lock().unwrap_or_else(|p| p.into_inner()) = grants;
    }
}
