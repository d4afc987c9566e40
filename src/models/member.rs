use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    Single,
    Family,
    Student,
    Pensioner,
}

impl MemberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberType::Single => "single",
            MemberType::Family => "family",
            MemberType::Student => "student",
            MemberType::Pensioner => "pensioner",
        }
    }
}

/// Directory entry: one person/household entitled to member pricing.
/// `name_key` is the normalized lookup key (see services::name_normalize).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub id: Uuid,
    pub name_key: String,
    pub member_type: MemberType,
    pub created_at: DateTime<Utc>,
}

impl Member {
    /// Inserts or updates a directory entry. Callers that mutate the table
    /// must refresh the in-memory MemberDirectory afterwards.
    pub async fn upsert(
        pool: &PgPool,
        name_key: &str,
        member_type: MemberType,
    ) -> Result<Self, sqlx::Error> {
        let member = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO members (name_key, member_type)
            VALUES ($1, $2)
            ON CONFLICT (name_key) DO UPDATE SET member_type = EXCLUDED.member_type
            RETURNING *
            "#,
        )
        .bind(name_key)
        .bind(member_type)
        .fetch_one(pool)
        .await?;

        Ok(member)
    }

    /// Loads the whole directory; the table is read-mostly and small.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let members = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM members
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(members)
    }
}
