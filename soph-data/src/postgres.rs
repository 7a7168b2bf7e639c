//! Postgres store.
//!
//! Thin sqlx layer over the external schema: `users`, `profiles`, `checks`,
//! and the `profiles_checks(profile_id, check_id, position)` relation.
//! Schema and migrations are owned by the deployment, not this crate.
//!
//! Uniqueness lives in partial unique indexes over live rows; violations
//! come back as SQLSTATE 23505 and surface as `conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soph_core::{Error, Id};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;

use crate::entity::{Check, NewCheck, NewProfile, NewUser, Profile, User};
use crate::store::{CheckStore, CheckUpdate, ProfileStore, ProfileUpdate, UserStore, UserUpdate};

/// `database.*` connection options.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
}

/// sqlx-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(options: &DatabaseOptions) -> Result<Self, Error> {
        let connect = PgConnectOptions::new()
            .host(&options.host)
            .port(options.port)
            .username(&options.user)
            .password(&options.password)
            .database(&options.name);
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(connect)
            .await
            .map_err(|e| Error::internal("database connection failed").with_source(e))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Liveness of the connection, used by the readiness probe.
    pub async fn ping(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn profile_check_ids(&self, profile_id: Id) -> Result<Vec<Id>, Error> {
        let rows = sqlx::query(
            "SELECT check_id FROM profiles_checks WHERE profile_id = $1 ORDER BY position",
        )
        .bind(profile_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter()
            .map(|row| parse_id(row.get::<String, _>("check_id")))
            .collect()
    }

    async fn check_profile_ids(&self, check_id: Id) -> Result<Vec<Id>, Error> {
        let rows = sqlx::query(
            "SELECT profile_id FROM profiles_checks WHERE check_id = $1 ORDER BY profile_id",
        )
        .bind(check_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter()
            .map(|row| parse_id(row.get::<String, _>("profile_id")))
            .collect()
    }

    async fn assemble_profile(&self, row: ProfileRow) -> Result<Profile, Error> {
        let checks = self.profile_check_ids(parse_id(row.id.clone())?).await?;
        row.into_profile(checks)
    }

    async fn assemble_check(&self, row: CheckRow) -> Result<Check, Error> {
        let profiles = self.check_profile_ids(parse_id(row.id.clone())?).await?;
        row.into_check(profiles)
    }
}

// ── Row types ──────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: String,
    email: String,
    protected_token: Vec<u8>,
    is_admin: bool,
    default_profile: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl UserRow {
    fn into_user(self) -> Result<User, Error> {
        Ok(User {
            id: parse_id(self.id)?,
            name: self.name,
            email: self.email,
            protected_token: self.protected_token,
            is_admin: self.is_admin,
            default_profile: self.default_profile.map(parse_id).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl ProfileRow {
    fn into_profile(self, checks: Vec<Id>) -> Result<Profile, Error> {
        Ok(Profile {
            id: parse_id(self.id)?,
            name: self.name,
            checks,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CheckRow {
    id: String,
    name: String,
    upstream_services: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl CheckRow {
    fn into_check(self, profiles: Vec<Id>) -> Result<Check, Error> {
        Ok(Check {
            id: parse_id(self.id)?,
            name: self.name,
            profiles,
            upstream_services: self.upstream_services,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

fn parse_id(raw: String) -> Result<Id, Error> {
    raw.parse()
        .map_err(|_| Error::internal(format!("store returned malformed id {raw:?}")))
}

/// 23505 is Postgres' unique-violation SQLSTATE.
fn store_err(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return Error::conflict("already exists").with_source(err);
        }
    }
    Error::internal("store failure").with_source(err)
}

const USER_COLUMNS: &str =
    "id, name, email, protected_token, is_admin, default_profile, created_at, updated_at, deleted_at";
const PROFILE_COLUMNS: &str = "id, name, created_at, updated_at, deleted_at";
const CHECK_COLUMNS: &str = "id, name, upstream_services, created_at, updated_at, deleted_at";

#[async_trait]
impl UserStore for PgStore {
    async fn get_user(&self, id: Id) -> Result<User, Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.ok_or_else(|| Error::not_found("user not found"))?.into_user()
    }

    async fn get_user_by_name(&self, name: &str) -> Result<User, Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE name = $1 AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.ok_or_else(|| Error::not_found("user not found"))?.into_user()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.ok_or_else(|| Error::not_found("user not found"))?.into_user()
    }

    async fn get_user_by_protected_token(&self, protected: &[u8]) -> Result<User, Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE protected_token = $1 AND deleted_at IS NULL"
        ))
        .bind(protected)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.ok_or_else(|| Error::not_found("user not found"))?.into_user()
    }

    async fn list_users(&self, after: Option<Id>, limit: usize) -> Result<Vec<User>, Error> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE deleted_at IS NULL AND ($1::text IS NULL OR id > $1) \
             ORDER BY id ASC LIMIT $2"
        ))
        .bind(after.map(|id| id.to_string()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(UserRow::into_user).collect()
    }

    async fn create_user(&self, new: NewUser) -> Result<User, Error> {
        let id = Id::new();
        let now = Utc::now();
        let row: UserRow = sqlx::query_as(&format!(
            "INSERT INTO users (id, name, email, protected_token, is_admin, default_profile, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7) RETURNING {USER_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.protected_token)
        .bind(new.is_admin)
        .bind(new.default_profile.map(|p| p.to_string()))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        row.into_user()
    }

    async fn update_user(&self, id: Id, update: UserUpdate) -> Result<User, Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET \
                 email = COALESCE($2, email), \
                 is_admin = COALESCE($3, is_admin), \
                 default_profile = CASE WHEN $4 THEN $5 ELSE default_profile END, \
                 updated_at = $6 \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(update.email)
        .bind(update.is_admin)
        .bind(update.default_profile.is_some())
        .bind(update.default_profile.flatten().map(|p| p.to_string()))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.ok_or_else(|| Error::not_found("user not found"))?.into_user()
    }

    async fn delete_user(&self, id: Id) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("user not found"));
        }
        Ok(())
    }

    async fn rotate_user_token(&self, id: Id, protected: Vec<u8>) -> Result<User, Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET protected_token = $2, updated_at = $3 \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(protected)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.ok_or_else(|| Error::not_found("user not found"))?.into_user()
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn get_profile(&self, id: Id) -> Result<Profile, Error> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let row = row.ok_or_else(|| Error::not_found("profile not found"))?;
        self.assemble_profile(row).await
    }

    async fn get_profile_by_name(&self, name: &str) -> Result<Profile, Error> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE name = $1 AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let row = row.ok_or_else(|| Error::not_found("profile not found"))?;
        self.assemble_profile(row).await
    }

    async fn list_profiles(&self, after: Option<Id>, limit: usize) -> Result<Vec<Profile>, Error> {
        let rows: Vec<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles \
             WHERE deleted_at IS NULL AND ($1::text IS NULL OR id > $1) \
             ORDER BY id ASC LIMIT $2"
        ))
        .bind(after.map(|id| id.to_string()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        let mut profiles = Vec::with_capacity(rows.len());
        for row in rows {
            profiles.push(self.assemble_profile(row).await?);
        }
        Ok(profiles)
    }

    async fn create_profile(&self, new: NewProfile) -> Result<Profile, Error> {
        let id = Id::new();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row: ProfileRow = sqlx::query_as(&format!(
            "INSERT INTO profiles (id, name, created_at, updated_at) \
             VALUES ($1, $2, $3, $3) RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(&new.name)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;

        insert_relations(&mut tx, id, &new.checks).await?;
        tx.commit().await.map_err(store_err)?;
        row.into_profile(new.checks)
    }

    async fn update_profile(&self, id: Id, update: ProfileUpdate) -> Result<Profile, Error> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "UPDATE profiles SET name = COALESCE($2, name), updated_at = $3 \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(update.name)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;
        let row = row.ok_or_else(|| Error::not_found("profile not found"))?;

        if let Some(checks) = &update.checks {
            sqlx::query("DELETE FROM profiles_checks WHERE profile_id = $1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            insert_relations(&mut tx, id, checks).await?;
        }
        tx.commit().await.map_err(store_err)?;

        match update.checks {
            Some(checks) => row.into_profile(checks),
            None => self.assemble_profile(row).await,
        }
    }

    async fn delete_profile(&self, id: Id) -> Result<(), Error> {
        let referenced: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM users WHERE default_profile = $1 AND deleted_at IS NULL LIMIT 1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        if referenced.is_some() {
            return Err(Error::conflict("profile is referenced as a default profile"));
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let result = sqlx::query(
            "UPDATE profiles SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("profile not found"));
        }
        sqlx::query("DELETE FROM profiles_checks WHERE profile_id = $1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        tx.commit().await.map_err(store_err)
    }
}

async fn insert_relations(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    profile_id: Id,
    checks: &[Id],
) -> Result<(), Error> {
    for (position, check) in checks.iter().enumerate() {
        sqlx::query(
            "INSERT INTO profiles_checks (profile_id, check_id, position) VALUES ($1, $2, $3)",
        )
        .bind(profile_id.to_string())
        .bind(check.to_string())
        .bind(position as i32)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
    }
    Ok(())
}

#[async_trait]
impl CheckStore for PgStore {
    async fn get_check(&self, id: Id) -> Result<Check, Error> {
        let row: Option<CheckRow> = sqlx::query_as(&format!(
            "SELECT {CHECK_COLUMNS} FROM checks WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let row = row.ok_or_else(|| Error::not_found("check not found"))?;
        self.assemble_check(row).await
    }

    async fn get_check_by_name(&self, name: &str) -> Result<Check, Error> {
        let row: Option<CheckRow> = sqlx::query_as(&format!(
            "SELECT {CHECK_COLUMNS} FROM checks WHERE name = $1 AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let row = row.ok_or_else(|| Error::not_found("check not found"))?;
        self.assemble_check(row).await
    }

    async fn list_checks(&self, after: Option<Id>, limit: usize) -> Result<Vec<Check>, Error> {
        let rows: Vec<CheckRow> = sqlx::query_as(&format!(
            "SELECT {CHECK_COLUMNS} FROM checks \
             WHERE deleted_at IS NULL AND ($1::text IS NULL OR id > $1) \
             ORDER BY id ASC LIMIT $2"
        ))
        .bind(after.map(|id| id.to_string()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        let mut checks = Vec::with_capacity(rows.len());
        for row in rows {
            checks.push(self.assemble_check(row).await?);
        }
        Ok(checks)
    }

    async fn create_check(&self, new: NewCheck) -> Result<Check, Error> {
        let id = Id::new();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row: CheckRow = sqlx::query_as(&format!(
            "INSERT INTO checks (id, name, upstream_services, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) RETURNING {CHECK_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(&new.name)
        .bind(&new.upstream_services)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;

        for profile in &new.profiles {
            sqlx::query(
                "INSERT INTO profiles_checks (profile_id, check_id, position) \
                 VALUES ($1, $2, (SELECT COALESCE(MAX(position) + 1, 0) \
                                  FROM profiles_checks WHERE profile_id = $1))",
            )
            .bind(profile.to_string())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        row.into_check(new.profiles)
    }

    async fn update_check(&self, id: Id, update: CheckUpdate) -> Result<Check, Error> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row: Option<CheckRow> = sqlx::query_as(&format!(
            "UPDATE checks SET \
                 name = COALESCE($2, name), \
                 upstream_services = COALESCE($3, upstream_services), \
                 updated_at = $4 \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {CHECK_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(update.name)
        .bind(update.upstream_services)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;
        let row = row.ok_or_else(|| Error::not_found("check not found"))?;

        if let Some(profiles) = &update.profiles {
            sqlx::query("DELETE FROM profiles_checks WHERE check_id = $1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            for profile in profiles {
                sqlx::query(
                    "INSERT INTO profiles_checks (profile_id, check_id, position) \
                     VALUES ($1, $2, (SELECT COALESCE(MAX(position) + 1, 0) \
                                      FROM profiles_checks WHERE profile_id = $1))",
                )
                .bind(profile.to_string())
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
        }
        tx.commit().await.map_err(store_err)?;

        match update.profiles {
            Some(profiles) => row.into_check(profiles),
            None => self.assemble_check(row).await,
        }
    }

    async fn delete_check(&self, id: Id) -> Result<(), Error> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let result = sqlx::query(
            "UPDATE checks SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("check not found"));
        }
        sqlx::query("DELETE FROM profiles_checks WHERE check_id = $1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        tx.commit().await.map_err(store_err)
    }
}
