use crate::config::SecurityConfig;
use crate::db::models::user_models::{LoginCredentials, User, UserRole};
use crate::db::repositories::UserStore;
use crate::error::Error;
use crate::security::{password, Claims, SecurityService};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Authentication service for handling user login/logout
pub struct AuthService {
    users: Arc<dyn UserStore>,
    security: SecurityService,
    config: SecurityConfig,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(users: Arc<dyn UserStore>, config: &SecurityConfig) -> Self {
        Self {
            users,
            security: SecurityService::new(config.clone()),
            config: config.clone(),
        }
    }

    /// Login a user with username/password, returning the session token
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<(User, String)> {
        let user = self
            .users
            .get_by_username(&credentials.username)
            .await?
            .ok_or_else(|| Error::Authentication("Invalid username or password".to_string()))?;

        if !user.active {
            return Err(Error::Authentication("User account is inactive".to_string()).into());
        }

        let valid = password::verify_password(&credentials.password, &user.password_hash)?;

        if !valid {
            return Err(Error::Authentication("Invalid username or password".to_string()).into());
        }

        self.users.update_last_login(&user.id).await?;

        let token = self.security.generate_token(&user)?;

        info!("User logged in: {}", user.username);

        Ok((user, token))
    }

    /// Register a new user
    pub async fn register(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        if self.users.get_by_username(username).await?.is_some() {
            return Err(Error::AlreadyExists("Username already exists".to_string()).into());
        }

        let password_hash = password::hash_password(password, &self.config)?;

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            role,
            created_at: Utc::now(),
            last_login: None,
            active: true,
        };

        let created_user = self.users.create(&user).await?;

        info!("New user registered: {}", username);

        Ok(created_user)
    }

    /// Create the configured admin account when no user exists yet
    pub async fn ensure_default_admin(&self) -> Result<bool> {
        if self.users.count().await? > 0 {
            return Ok(false);
        }

        let password = match &self.config.admin_password {
            Some(password) => password.clone(),
            None => {
                let generated = password::generate_random_password(16);
                warn!(
                    "Generated password for '{}': {} (set security.admin_password to choose one)",
                    self.config.admin_username, generated
                );
                generated
            }
        };

        self.register(&self.config.admin_username, &password, UserRole::Admin)
            .await?;
        warn!("Default admin account '{}' created", self.config.admin_username);

        Ok(true)
    }

    /// Resolve a session token to its claims
    pub fn authenticate(&self, token: &str) -> Result<Claims> {
        self.security.validate_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::MemoryUserStore;

    fn service() -> AuthService {
        let config = SecurityConfig {
            password_hash_cost: 4,
            admin_password: Some("wild-admin".to_string()),
            ..SecurityConfig::default()
        };
        AuthService::new(Arc::new(MemoryUserStore::new()), &config)
    }

    fn credentials(username: &str, password: &str) -> LoginCredentials {
        LoginCredentials {
            username: username.to_string(),
            password: password.to_string(),
            next: None,
        }
    }

    #[tokio::test]
    async fn test_login_issues_valid_token() -> Result<()> {
        let auth = service();
        auth.register("ranger", "trail-mix", UserRole::Viewer).await?;

        let (user, token) = auth.login(&credentials("ranger", "trail-mix")).await?;
        let claims = auth.authenticate(&token)?;

        assert_eq!(claims.user_id()?, user.id);
        assert!(!claims.is_admin());
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() -> Result<()> {
        let auth = service();
        auth.register("ranger", "trail-mix", UserRole::Viewer).await?;

        assert!(auth.login(&credentials("ranger", "nope")).await.is_err());
        assert!(auth.login(&credentials("nobody", "trail-mix")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() -> Result<()> {
        let auth = service();
        auth.register("ranger", "a", UserRole::Viewer).await?;
        assert!(auth.register("ranger", "b", UserRole::Admin).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_default_admin_created_once() -> Result<()> {
        let auth = service();
        assert!(auth.ensure_default_admin().await?);
        assert!(!auth.ensure_default_admin().await?);

        let (user, _) = auth.login(&credentials("admin", "wild-admin")).await?;
        assert_eq!(user.role, UserRole::Admin);
        Ok(())
    }
}
