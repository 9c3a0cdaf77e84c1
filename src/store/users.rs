use chrono::Utc;
use log::info;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password};
use crate::error::AppError;
use crate::models::{Role, Team, User};

pub const DEFAULT_ADMIN_EMAIL: &str = "john@example.com";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
/// Team assigned to self-registered users.
pub const DEFAULT_TEAM_ID: &str = "t1";

/// Registered users and the static team list.
pub struct UserStore {
    users: RwLock<Vec<User>>,
    teams: Vec<Team>,
    password_cost: u32,
}

impl UserStore {
    /// An empty store with the built-in teams.
    pub fn new(password_cost: u32) -> Self {
        Self {
            users: RwLock::new(Vec::new()),
            teams: vec![
                Team {
                    id: "t1".into(),
                    name: "Tim Engineering".into(),
                },
                Team {
                    id: "t2".into(),
                    name: "Tim Desain".into(),
                },
            ],
            password_cost,
        }
    }

    /// A store seeded with the default administrator account.
    pub fn with_default_admin(password_cost: u32) -> Result<Self, AppError> {
        let store = Self::new(password_cost);
        let now = Utc::now();
        store.insert(User {
            id: "1".into(),
            name: "John Doe".into(),
            email: DEFAULT_ADMIN_EMAIL.into(),
            password_hash: hash_password(DEFAULT_ADMIN_PASSWORD, password_cost)?,
            role: Role::Admin,
            team_id: DEFAULT_TEAM_ID.into(),
            created_at: now,
            updated_at: now,
        })?;
        info!("Default admin user seeded: {}", DEFAULT_ADMIN_EMAIL);
        Ok(store)
    }

    /// Creates a regular user in the default team.
    ///
    /// Fails with `Conflict` if the email is already registered.
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<User, AppError> {
        if self.find_by_email(email).is_some() {
            return Err(AppError::Conflict("Email already exists".into()));
        }
        let now = Utc::now();
        self.insert(User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password, self.password_cost)?,
            role: Role::User,
            team_id: DEFAULT_TEAM_ID.into(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Checks a login attempt. Unknown email and wrong password are
    /// indistinguishable to the caller.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<User, AppError> {
        let user = self
            .find_by_email(email)
            .ok_or_else(|| AppError::Unauthorized("Invalid credentials".into()))?;
        if verify_password(password, &user.password_hash) {
            Ok(user)
        } else {
            Err(AppError::Unauthorized("Invalid credentials".into()))
        }
    }

    pub fn list(&self) -> Vec<User> {
        self.users.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<User> {
        self.users.read().iter().find(|user| user.id == id).cloned()
    }

    pub fn delete(&self, id: &str) -> Option<User> {
        let mut users = self.users.write();
        users
            .iter()
            .position(|user| user.id == id)
            .map(|index| users.remove(index))
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    /// Members of a team; `NotFound` if the team does not exist.
    pub fn team_users(&self, team_id: &str) -> Result<Vec<User>, AppError> {
        if !self.teams.iter().any(|team| team.id == team_id) {
            return Err(AppError::NotFound("Team not found".into()));
        }
        Ok(self
            .users
            .read()
            .iter()
            .filter(|user| user.team_id == team_id)
            .cloned()
            .collect())
    }

    fn find_by_email(&self, email: &str) -> Option<User> {
        self.users
            .read()
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    fn insert(&self, user: User) -> Result<User, AppError> {
        let mut users = self.users.write();
        if users.iter().any(|existing| existing.email.eq_ignore_ascii_case(&user.email)) {
            return Err(AppError::Conflict("Email already exists".into()));
        }
        users.push(user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_admin_can_authenticate() {
        let store = UserStore::with_default_admin(4).unwrap();
        let admin = store
            .authenticate(DEFAULT_ADMIN_EMAIL, DEFAULT_ADMIN_PASSWORD)
            .unwrap();
        assert_eq!(admin.id, "1");
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.team_id, "t1");

        assert!(matches!(
            store.authenticate(DEFAULT_ADMIN_EMAIL, "wrong"),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            store.authenticate("nobody@example.com", DEFAULT_ADMIN_PASSWORD),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_register_rejects_duplicate_email() {
        let store = UserStore::with_default_admin(4).unwrap();
        let jane = store.register("Jane Roe", "jane@example.com", "secret1").unwrap();
        assert_eq!(jane.role, Role::User);
        assert_eq!(jane.team_id, DEFAULT_TEAM_ID);
        assert_ne!(jane.password_hash, "secret1");

        assert!(matches!(
            store.register("Jane Again", "JANE@example.com", "secret2"),
            Err(AppError::Conflict(_))
        ));
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_team_users_and_delete() {
        let store = UserStore::with_default_admin(4).unwrap();
        let jane = store.register("Jane Roe", "jane@example.com", "secret1").unwrap();

        assert_eq!(store.team_users("t1").unwrap().len(), 2);
        assert!(store.team_users("t2").unwrap().is_empty());
        assert!(matches!(store.team_users("t9"), Err(AppError::NotFound(_))));

        assert_eq!(store.delete(&jane.id).map(|u| u.email), Some("jane@example.com".into()));
        assert!(store.get(&jane.id).is_none());
        assert!(store.delete(&jane.id).is_none());
    }
}
