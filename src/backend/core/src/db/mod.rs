//! PostgreSQL identity store.
//!
//! Every mutation runs inside one `sqlx` transaction. Username and slug
//! uniqueness are enforced by unique indexes, so concurrent creates are
//! decided by the database rather than by a pre-check. Membership rows
//! cascade when either side is deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{CastellanError, Result};
use crate::identity::validation::apply_user_update;
use crate::identity::{
    Organization, OrganizationDraft, OrganizationId, User, UserDraft, UserFilter, UserId,
    UserRecord, UserType, UserUpdate,
};
use crate::rbac::RoleType;
use crate::store::DirectoryStore;
use crate::telemetry::StoreTimer;

const USER_COLUMNS: &str = "id, user_type, enabled, valid_to, username, first_name, last_name, \
                            email_address, description, roles, secret_hash";
const ORGANIZATION_COLUMNS: &str = "id, name, email, description, slug, external_id";

/// Database-backed [`DirectoryStore`].
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
    operation_timeout: Duration,
}

impl PgDirectory {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig, url: &str, operation_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(operation_timeout)
            .connect(url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL identity store"
        );
        Ok(Self {
            pool,
            operation_timeout,
        })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CastellanError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn bounded<T, F>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _timer = StoreTimer::start(operation);
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CastellanError::unavailable(operation)),
        }
    }

    /// Read-only transaction over one snapshot.
    async fn snapshot(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    user_type: String,
    enabled: bool,
    valid_to: Option<DateTime<Utc>>,
    username: String,
    first_name: Option<String>,
    last_name: Option<String>,
    email_address: Option<String>,
    description: Option<String>,
    roles: Vec<String>,
    secret_hash: Option<String>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = CastellanError;

    fn try_from(row: UserRow) -> Result<Self> {
        let user_type = UserType::parse(&row.user_type).ok_or_else(|| {
            CastellanError::internal(format!("unknown user_type in row {}: {}", row.id, row.user_type))
        })?;
        let roles = row
            .roles
            .iter()
            .map(|r| {
                RoleType::parse(r).ok_or_else(|| {
                    CastellanError::internal(format!("unknown role in row {}: {}", row.id, r))
                })
            })
            .collect::<Result<BTreeSet<_>>>()?;

        Ok(UserRecord {
            id: UserId(row.id),
            user_type,
            enabled: row.enabled,
            valid_to: row.valid_to,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            email_address: row.email_address,
            description: row.description,
            roles,
            secret_hash: row.secret_hash,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: i64,
    name: String,
    email: String,
    description: String,
    slug: String,
    external_id: Option<String>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: OrganizationId(row.id),
            name: row.name,
            email: row.email,
            description: row.description,
            slug: row.slug,
            external_id: row.external_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    user_id: i64,
    #[sqlx(flatten)]
    organization: OrganizationRow,
}

fn role_names(roles: &BTreeSet<RoleType>) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════════════════════════════════════════

async fn fetch_user(conn: &mut PgConnection, id: UserId, lock: bool) -> Result<Option<UserRecord>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, UserRow>(&sql)
        .bind(id.0)
        .fetch_optional(conn)
        .await?
        .map(UserRecord::try_from)
        .transpose()
}

async fn require_user(conn: &mut PgConnection, id: UserId) -> Result<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR KEY SHARE")
        .bind(id.0)
        .fetch_optional(conn)
        .await?;
    found
        .map(|_| ())
        .ok_or_else(|| CastellanError::user_not_found(id))
}

fn organization_sql(lock: bool) -> String {
    format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1{}",
        if lock { " FOR KEY SHARE" } else { "" }
    )
}

/// `lock` takes FOR KEY SHARE for writers. Snapshot reads pass `false`:
/// a READ ONLY transaction rejects row locks.
async fn require_organization(
    conn: &mut PgConnection,
    id: OrganizationId,
    lock: bool,
) -> Result<Organization> {
    let sql = organization_sql(lock);
    sqlx::query_as::<_, OrganizationRow>(&sql)
        .bind(id.0)
        .fetch_optional(conn)
        .await?
        .map(Organization::from)
        .ok_or_else(|| CastellanError::organization_not_found(id))
}

/// `memberOf` for each of `user_ids`, in membership order.
async fn member_of_map(
    conn: &mut PgConnection,
    user_ids: &[i64],
) -> Result<HashMap<i64, Vec<Organization>>> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, MembershipRow>(
        r#"
        SELECT m.user_id, o.id, o.name, o.email, o.description, o.slug, o.external_id
        FROM memberships m
        JOIN organizations o ON o.id = m.organization_id
        WHERE m.user_id = ANY($1)
        ORDER BY m.id
        "#,
    )
    .bind(user_ids)
    .fetch_all(conn)
    .await?;

    let mut map: HashMap<i64, Vec<Organization>> = HashMap::new();
    for row in rows {
        map.entry(row.user_id)
            .or_default()
            .push(row.organization.into());
    }
    Ok(map)
}

async fn project_all(conn: &mut PgConnection, rows: Vec<UserRow>) -> Result<Vec<User>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut member_of = member_of_map(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let orgs = member_of.remove(&row.id).unwrap_or_default();
            UserRecord::try_from(row).map(|record| User::from_record(record, orgs))
        })
        .collect()
}

async fn project(conn: &mut PgConnection, record: UserRecord) -> Result<User> {
    let mut member_of = member_of_map(conn, &[record.id.0]).await?;
    let orgs = member_of.remove(&record.id.0).unwrap_or_default();
    Ok(User::from_record(record, orgs))
}

async fn link(conn: &mut PgConnection, org: OrganizationId, user: UserId) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO memberships (organization_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (organization_id, user_id) DO NOTHING
        "#,
    )
    .bind(org.0)
    .bind(user.0)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_user(conn: &mut PgConnection, draft: UserDraft) -> Result<UserRecord> {
    for org in &draft.member_of {
        require_organization(&mut *conn, *org, true).await?;
    }

    let sql = format!(
        r#"
        INSERT INTO users (user_type, enabled, valid_to, username, first_name, last_name,
                           email_address, description, roles, secret_hash)
        VALUES ($1, TRUE, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {USER_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(draft.user_type.as_str())
        .bind(draft.valid_to)
        .bind(&draft.username)
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.email_address)
        .bind(&draft.description)
        .bind(role_names(&draft.roles))
        .bind(&draft.secret_hash)
        .fetch_one(&mut *conn)
        .await?;
    let record = UserRecord::try_from(row)?;

    for org in draft.member_of {
        link(&mut *conn, org, record.id).await?;
    }
    Ok(record)
}

#[async_trait]
impl DirectoryStore for PgDirectory {
    #[instrument(skip(self, draft), fields(username = %draft.username))]
    async fn create_user(&self, draft: UserDraft) -> Result<User> {
        self.bounded("create_user", async {
            let mut tx = self.pool.begin().await?;
            let record = insert_user(&mut tx, draft).await?;
            let user = project(&mut tx, record).await?;
            tx.commit().await?;
            Ok(user)
        })
        .await
    }

    #[instrument(skip(self, update), fields(user_id = %update.id))]
    async fn update_user(&self, update: UserUpdate) -> Result<User> {
        self.bounded("update_user", async {
            let mut tx = self.pool.begin().await?;
            let current = fetch_user(&mut tx, update.id, true)
                .await?
                .ok_or_else(|| CastellanError::user_not_found(update.id))?;
            let applied = apply_user_update(&current, update)?;
            let record = applied.record;

            sqlx::query(
                r#"
                UPDATE users
                SET username = $2, first_name = $3, last_name = $4, email_address = $5,
                    description = $6, roles = $7, valid_to = $8
                WHERE id = $1
                "#,
            )
            .bind(record.id.0)
            .bind(&record.username)
            .bind(&record.first_name)
            .bind(&record.last_name)
            .bind(&record.email_address)
            .bind(&record.description)
            .bind(role_names(&record.roles))
            .bind(record.valid_to)
            .execute(&mut *tx)
            .await?;

            if let Some(member_of) = applied.member_of {
                for org in &member_of {
                    require_organization(&mut tx, *org, true).await?;
                }
                let keep: Vec<i64> = member_of.iter().map(|o| o.0).collect();
                sqlx::query(
                    "DELETE FROM memberships WHERE user_id = $1 AND NOT (organization_id = ANY($2))",
                )
                .bind(record.id.0)
                .bind(&keep)
                .execute(&mut *tx)
                .await?;
                for org in member_of {
                    link(&mut tx, org, record.id).await?;
                }
            }

            let user = project(&mut tx, record).await?;
            tx.commit().await?;
            Ok(user)
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> Result<User> {
        self.bounded("get_user", async {
            let mut tx = self.snapshot().await?;
            let record = fetch_user(&mut tx, id, false)
                .await?
                .ok_or_else(|| CastellanError::user_not_found(id))?;
            project(&mut tx, record).await
        })
        .await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>> {
        self.bounded("find_user", async {
            let mut conn = self.pool.acquire().await?;
            fetch_user(&mut conn, id, false).await
        })
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.bounded("find_user_by_username", async {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(username)
                .fetch_optional(&self.pool)
                .await?
                .map(UserRecord::try_from)
                .transpose()
        })
        .await
    }

    async fn list_users(&self, filter: UserFilter) -> Result<Vec<User>> {
        self.bounded("list_users", async {
            let mut tx = self.snapshot().await?;
            let rows = match filter {
                UserFilter::MemberOf(org) => {
                    require_organization(&mut tx, org, false).await?;
                    let sql = format!(
                        "SELECT {} FROM users u JOIN memberships m ON m.user_id = u.id \
                         WHERE m.organization_id = $1 ORDER BY u.id",
                        prefixed_user_columns()
                    );
                    sqlx::query_as::<_, UserRow>(&sql)
                        .bind(org.0)
                        .fetch_all(&mut *tx)
                        .await?
                }
                other => {
                    let condition = match other {
                        UserFilter::ExcludeApiKeys => "WHERE user_type <> 'API_KEY'",
                        UserFilter::OnlyApiKeys => "WHERE user_type = 'API_KEY'",
                        _ => "",
                    };
                    let sql = format!("SELECT {USER_COLUMNS} FROM users {condition} ORDER BY id");
                    sqlx::query_as::<_, UserRow>(&sql).fetch_all(&mut *tx).await?
                }
            };
            project_all(&mut tx, rows).await
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: UserId) -> Result<()> {
        self.bounded("delete_user", async {
            let result = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id.0)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CastellanError::user_not_found(id));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn set_enabled(&self, id: UserId, enabled: bool) -> Result<()> {
        self.bounded("set_enabled", async {
            let result = sqlx::query("UPDATE users SET enabled = $2 WHERE id = $1")
                .bind(id.0)
                .bind(enabled)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CastellanError::user_not_found(id));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, drafts), fields(count = drafts.len()))]
    async fn create_users_batch(&self, drafts: Vec<UserDraft>) -> Result<Vec<User>> {
        self.bounded("create_users_batch", async {
            let mut tx = self.pool.begin().await?;
            let mut records = Vec::with_capacity(drafts.len());
            for draft in drafts {
                records.push(insert_user(&mut tx, draft).await?);
            }
            let mut users = Vec::with_capacity(records.len());
            for record in records {
                users.push(project(&mut tx, record).await?);
            }
            tx.commit().await?;
            Ok(users)
        })
        .await
    }

    async fn has_user_with_role(&self, role: RoleType) -> Result<bool> {
        self.bounded("has_user_with_role", async {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE $1 = ANY(roles))")
                    .bind(role.as_str())
                    .fetch_one(&self.pool)
                    .await?;
            Ok(exists)
        })
        .await
    }

    #[instrument(skip(self, draft), fields(slug = %draft.slug))]
    async fn create_organization(&self, draft: OrganizationDraft) -> Result<Organization> {
        self.bounded("create_organization", async {
            let sql = format!(
                "INSERT INTO organizations (name, email, description, slug, external_id) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {ORGANIZATION_COLUMNS}"
            );
            let row = sqlx::query_as::<_, OrganizationRow>(&sql)
                .bind(&draft.name)
                .bind(&draft.email)
                .bind(&draft.description)
                .bind(&draft.slug)
                .bind(&draft.external_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(row.into())
        })
        .await
    }

    #[instrument(skip(self, draft))]
    async fn update_organization(
        &self,
        id: OrganizationId,
        draft: OrganizationDraft,
    ) -> Result<Organization> {
        self.bounded("update_organization", async {
            let sql = format!(
                "UPDATE organizations SET name = $2, email = $3, description = $4, slug = $5, \
                 external_id = $6 WHERE id = $1 RETURNING {ORGANIZATION_COLUMNS}"
            );
            sqlx::query_as::<_, OrganizationRow>(&sql)
                .bind(id.0)
                .bind(&draft.name)
                .bind(&draft.email)
                .bind(&draft.description)
                .bind(&draft.slug)
                .bind(&draft.external_id)
                .fetch_optional(&self.pool)
                .await?
                .map(Organization::from)
                .ok_or_else(|| CastellanError::organization_not_found(id))
        })
        .await
    }

    async fn get_organization(&self, id: OrganizationId) -> Result<Organization> {
        self.bounded("get_organization", async {
            let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1");
            sqlx::query_as::<_, OrganizationRow>(&sql)
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?
                .map(Organization::from)
                .ok_or_else(|| CastellanError::organization_not_found(id))
        })
        .await
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        self.bounded("list_organizations", async {
            let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations ORDER BY id");
            let rows = sqlx::query_as::<_, OrganizationRow>(&sql)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(Organization::from).collect())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_organization(&self, id: OrganizationId) -> Result<()> {
        self.bounded("delete_organization", async {
            let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
                .bind(id.0)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CastellanError::organization_not_found(id));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn add_member(&self, org: OrganizationId, user: UserId) -> Result<()> {
        self.bounded("add_member", async {
            let mut tx = self.pool.begin().await?;
            require_organization(&mut tx, org, true).await?;
            require_user(&mut tx, user).await?;
            link(&mut tx, org, user).await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn remove_member(&self, org: OrganizationId, user: UserId) -> Result<()> {
        self.bounded("remove_member", async {
            let mut tx = self.pool.begin().await?;
            require_organization(&mut tx, org, true).await?;
            require_user(&mut tx, user).await?;
            sqlx::query("DELETE FROM memberships WHERE organization_id = $1 AND user_id = $2")
                .bind(org.0)
                .bind(user.0)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn organizations_of(&self, user: UserId) -> Result<Vec<Organization>> {
        self.bounded("organizations_of", async {
            let mut tx = self.snapshot().await?;
            fetch_user(&mut tx, user, false)
                .await?
                .ok_or_else(|| CastellanError::user_not_found(user))?;
            let mut map = member_of_map(&mut tx, &[user.0]).await?;
            Ok(map.remove(&user.0).unwrap_or_default())
        })
        .await
    }

    async fn members_of(&self, org: OrganizationId) -> Result<Vec<User>> {
        self.list_users(UserFilter::MemberOf(org)).await
    }

    async fn ping(&self) -> Result<()> {
        self.bounded("ping", async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

fn prefixed_user_columns() -> String {
    USER_COLUMNS
        .split(',')
        .map(|c| format!("u.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
