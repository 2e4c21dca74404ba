//! Named connection registry used by SQL jobs

use serde::Deserialize;
use uuid::Uuid;

use crate::db::Database;
use crate::models::NamedConnection;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: Database,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConnectionRequest {
    pub name: String,
    pub server_name: String,

    #[serde(default = "default_port")]
    pub port: i32,

    pub database_name: String,

    #[serde(default)]
    pub trusted_connection: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_port() -> i32 {
    5432
}

impl ConnectionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<NamedConnection>> {
        let row = sqlx::query_as::<_, NamedConnection>(
            "SELECT * FROM user_connections WHERE name = $1 AND is_active = TRUE",
        )
        .bind(name)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    pub async fn list(&self) -> Result<Vec<NamedConnection>> {
        let rows = sqlx::query_as::<_, NamedConnection>(
            "SELECT * FROM user_connections ORDER BY name",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn create(&self, request: CreateConnectionRequest) -> Result<Uuid> {
        if request.name.trim().is_empty() {
            return Err(Error::validation("Connection name cannot be empty"));
        }
        if request.server_name.trim().is_empty() {
            return Err(Error::validation("Server name cannot be empty"));
        }

        let connection_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO user_connections (
                connection_id, name, server_name, port, database_name,
                trusted_connection, username, password, description
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(connection_id)
        .bind(request.name.trim())
        .bind(request.server_name.trim())
        .bind(request.port)
        .bind(&request.database_name)
        .bind(request.trusted_connection)
        .bind(&request.username)
        .bind(&request.password)
        .bind(&request.description)
        .execute(self.db.pool())
        .await?;

        Ok(connection_id)
    }

    pub async fn delete(&self, connection_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM user_connections WHERE connection_id = $1")
            .bind(connection_id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!(
                "Connection {} not found",
                connection_id
            )));
        }
        Ok(())
    }
}
