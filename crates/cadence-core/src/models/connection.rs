//! Named database connections used by SQL jobs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named connection, as stored in `user_connections`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NamedConnection {
    pub connection_id: Uuid,
    pub name: String,
    pub server_name: String,
    pub port: i32,
    pub database_name: String,
    pub trusted_connection: bool,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub description: Option<String>,
    pub driver: String,
    pub connection_timeout: i32,
    pub command_timeout: i32,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub is_active: bool,
}

impl NamedConnection {
    /// Render a connection URL for sqlx
    pub fn connection_url(&self) -> String {
        match (&self.username, self.trusted_connection) {
            (Some(user), false) if !user.is_empty() => format!(
                "postgres://{}:{}@{}:{}/{}",
                user,
                self.password.as_deref().unwrap_or(""),
                self.server_name,
                self.port,
                self.database_name
            ),
            _ => format!(
                "postgres://{}:{}/{}",
                self.server_name, self.port, self.database_name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url_with_credentials() {
        let conn = NamedConnection {
            connection_id: Uuid::new_v4(),
            name: "reporting".into(),
            server_name: "db01".into(),
            port: 5432,
            database_name: "reports".into(),
            trusted_connection: false,
            username: Some("svc".into()),
            password: Some("pw".into()),
            description: None,
            driver: "postgres".into(),
            connection_timeout: 30,
            command_timeout: 300,
            encrypt: false,
            trust_server_certificate: true,
            is_active: true,
        };
        assert_eq!(conn.connection_url(), "postgres://svc:pw@db01:5432/reports");
    }

    #[test]
    fn test_connection_url_trusted() {
        let conn = NamedConnection {
            connection_id: Uuid::new_v4(),
            name: "local".into(),
            server_name: "localhost".into(),
            port: 5432,
            database_name: "jobs".into(),
            trusted_connection: true,
            username: Some("ignored".into()),
            password: None,
            description: None,
            driver: "postgres".into(),
            connection_timeout: 30,
            command_timeout: 300,
            encrypt: false,
            trust_server_certificate: true,
            is_active: true,
        };
        assert_eq!(conn.connection_url(), "postgres://localhost:5432/jobs");
    }
}
