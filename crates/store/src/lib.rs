use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    UniqueViolation,
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::UniqueViolation => write!(f, "unique constraint violated"),
            StoreError::Sqlx(err) => write!(f, "store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &value
            && db.message().contains("UNIQUE constraint failed")
        {
            return StoreError::UniqueViolation;
        }
        StoreError::Sqlx(value)
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub hashed_password: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct DataRecord {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub data_type: String,
    pub user_id: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// SQLite-backed persistence for users and their data items. Cloneable; all
/// writes run under `write_timeout`.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_timeout: Duration,
}

impl Store {
    pub async fn connect_and_migrate(
        db_url: &str,
        write_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(StoreError::Sqlx)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        // A single connection keeps `sqlite::memory:` databases shared and
        // serializes writers, which SQLite wants anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Sqlx)?;

        let store = Self {
            pool,
            write_timeout,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                full_name TEXT,
                hashed_password TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                data_type TEXT NOT NULL DEFAULT 'text',
                user_id INTEGER NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        full_name: Option<&str>,
        hashed_password: &str,
    ) -> Result<UserRecord, StoreError> {
        let result = tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "INSERT INTO users (username, email, full_name, hashed_password) VALUES ($1, $2, $3, $4)",
            )
            .bind(username)
            .bind(email)
            .bind(full_name)
            .bind(hashed_password)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        self.get_user_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| StoreError::Sqlx(sqlx::Error::RowNotFound))
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn update_user(
        &self,
        id: i64,
        username: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<Option<UserRecord>, StoreError> {
        tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "UPDATE users SET username = COALESCE($1, username), full_name = COALESCE($2, full_name) WHERE id = $3",
            )
            .bind(username)
            .bind(full_name)
            .bind(id)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        self.get_user_by_id(id).await
    }

    pub async fn create_data(
        &self,
        user_id: i64,
        title: &str,
        content: &str,
        data_type: &str,
    ) -> Result<DataRecord, StoreError> {
        let result = tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "INSERT INTO user_data (title, content, data_type, user_id) VALUES ($1, $2, $3, $4)",
            )
            .bind(title)
            .bind(content)
            .bind(data_type)
            .bind(user_id)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let id = result.last_insert_rowid();
        self.get_data(id, user_id)
            .await?
            .ok_or_else(|| StoreError::Sqlx(sqlx::Error::RowNotFound))
    }

    pub async fn list_data(&self, user_id: i64) -> Result<Vec<DataRecord>, StoreError> {
        let rows = sqlx::query_as::<_, DataRecord>(
            "SELECT * FROM user_data WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ownership is enforced in the query: an id belonging to another user
    /// reads as absent.
    pub async fn get_data(
        &self,
        data_id: i64,
        user_id: i64,
    ) -> Result<Option<DataRecord>, StoreError> {
        let row = sqlx::query_as::<_, DataRecord>(
            "SELECT * FROM user_data WHERE id = $1 AND user_id = $2",
        )
        .bind(data_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_data(
        &self,
        data_id: i64,
        user_id: i64,
        title: &str,
        content: &str,
        data_type: &str,
    ) -> Result<Option<DataRecord>, StoreError> {
        let result = tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "UPDATE user_data SET title = $1, content = $2, data_type = $3, updated_at = datetime('now') WHERE id = $4 AND user_id = $5",
            )
            .bind(title)
            .bind(content)
            .bind(data_type)
            .bind(data_id)
            .bind(user_id)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_data(data_id, user_id).await
    }

    pub async fn delete_data(&self, data_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let result = tokio::time::timeout(
            self.write_timeout,
            sqlx::query("DELETE FROM user_data WHERE id = $1 AND user_id = $2")
                .bind(data_id)
                .bind(user_id)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(result.rows_affected() > 0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
