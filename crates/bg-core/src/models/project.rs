use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub team_id: String,
    /// Custom production domain. Falls back to `{name}.{baseDomain}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Admin,
}

/// Identity an API key resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub team_id: String,
    pub role: Role,
    /// Recorded as `deployedBy` / `promotedBy`.
    pub actor: String,
}

impl Caller {
    pub fn new(team_id: &str, role: Role) -> Self {
        Self {
            team_id: team_id.to_string(),
            role,
            actor: format!("{team_id}:{}", role_label(role)),
        }
    }

    pub fn can_access(&self, project: &Project) -> bool {
        self.role == Role::Admin || self.team_id == project.team_id
    }

    pub fn can_mutate(&self) -> bool {
        self.role >= Role::Member
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Viewer => "viewer",
        Role::Member => "member",
        Role::Admin => "admin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(team: &str) -> Project {
        Project {
            name: "demo".into(),
            team_id: team.into(),
            domain: None,
        }
    }

    #[test]
    fn members_only_reach_their_own_team() {
        let caller = Caller::new("team-a", Role::Member);
        assert!(caller.can_access(&project("team-a")));
        assert!(!caller.can_access(&project("team-b")));
    }

    #[test]
    fn admins_cross_team_scope() {
        let caller = Caller::new("ops", Role::Admin);
        assert!(caller.can_access(&project("team-b")));
    }

    #[test]
    fn viewers_cannot_mutate() {
        assert!(!Caller::new("team-a", Role::Viewer).can_mutate());
        assert!(Caller::new("team-a", Role::Member).can_mutate());
        assert!(Caller::new("team-a", Role::Admin).can_mutate());
    }
}
