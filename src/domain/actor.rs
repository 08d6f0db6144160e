use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    WorkshopAdmin,
    #[serde(rename = "SUPERADMIN")]
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::WorkshopAdmin => "WORKSHOP_ADMIN",
            Role::SuperAdmin => "SUPERADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "USER" => Some(Role::User),
            "WORKSHOP_ADMIN" | "ADMIN" => Some(Role::WorkshopAdmin),
            "SUPERADMIN" | "SUPER_ADMIN" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    /// Workshop administered by a `WorkshopAdmin`.
    pub workshop_id: Option<Uuid>,
}

impl Actor {
    pub fn administers(&self, workshop_id: Uuid) -> bool {
        match self.role {
            Role::SuperAdmin => true,
            Role::WorkshopAdmin => self.workshop_id == Some(workshop_id),
            Role::User => false,
        }
    }
}
