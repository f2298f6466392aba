use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{StudentId, UserId};

/// Account role; decides which pages and endpoints a user may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A login account as returned by `/api/auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(with = "crate::time::serde_utc")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "crate::time::serde_utc::option")]
    pub last_login_at: Option<DateTime<Utc>>,
    /// Linked student record for accounts with the student role.
    #[serde(default)]
    pub student_id: Option<StudentId>,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    #[must_use]
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }

    #[must_use]
    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_deserializes_from_me_payload() {
        let json = r#"{
            "id": "admin-001",
            "username": "admin",
            "role": "admin",
            "display_name": "Administrator",
            "created_at": "2025-01-14T08:00:00Z"
        }"#;

        let user: User = serde_json::from_str(json).unwrap();
        assert!(user.is_admin());
        assert!(!user.is_student());
        assert_eq!(user.email, None);
        assert_eq!(user.role.to_string(), "admin");
    }
}
