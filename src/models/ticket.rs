use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::registration::TicketStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Regular,
    Member,
    Student,
    Children,
}

impl TicketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::Regular => "regular",
            TicketType::Member => "member",
            TicketType::Student => "student",
            TicketType::Children => "children",
        }
    }
}

/// One scannable credential, child of exactly one registration.
/// `ticket_no` is globally unique; `checked_in` is a one-way flag.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub ticket_no: String,
    pub ticket_type: TicketType,
    pub qr_url: String,
    pub status: TicketStatus,
    pub checked_in: bool,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTicketData {
    pub registration_id: Uuid,
    pub ticket_no: String,
    pub ticket_type: TicketType,
    pub qr_url: String,
}

/// True when an insert failed on the ticket_no unique constraint; the
/// issuance engine retries with a fresh number in that case.
pub fn is_ticket_no_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("23505")
                && db
                    .constraint()
                    .map(|c| c.contains("ticket_no"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

impl Ticket {
    pub async fn create(pool: &PgPool, data: CreateTicketData) -> Result<Self, sqlx::Error> {
        let ticket = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO tickets (registration_id, ticket_no, ticket_type, qr_url, status)
            VALUES ($1, $2, $3, $4, 'issued')
            RETURNING *
            "#,
        )
        .bind(data.registration_id)
        .bind(&data.ticket_no)
        .bind(data.ticket_type)
        .bind(&data.qr_url)
        .fetch_one(pool)
        .await?;

        Ok(ticket)
    }

    pub async fn find_by_ticket_no(
        pool: &PgPool,
        ticket_no: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let ticket = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM tickets WHERE ticket_no = $1
            "#,
        )
        .bind(ticket_no)
        .fetch_optional(pool)
        .await?;

        Ok(ticket)
    }

    pub async fn list_by_registration(
        pool: &PgPool,
        registration_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let tickets = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM tickets
            WHERE registration_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(registration_id)
        .fetch_all(pool)
        .await?;

        Ok(tickets)
    }

    /// Atomic check-then-set: flips checked_in only if it is still false.
    /// Returns the updated row, or None when the ticket was already
    /// checked in (or does not exist); two near-simultaneous scans of the
    /// same number cannot both win this update.
    pub async fn try_check_in(
        pool: &PgPool,
        ticket_no: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let ticket = sqlx::query_as::<_, Self>(
            r#"
            UPDATE tickets
            SET checked_in = TRUE, checked_in_at = NOW()
            WHERE ticket_no = $1 AND checked_in = FALSE
            RETURNING *
            "#,
        )
        .bind(ticket_no)
        .fetch_optional(pool)
        .await?;

        Ok(ticket)
    }

    pub async fn count_checked_in(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM tickets WHERE checked_in = TRUE
            "#,
        )
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
