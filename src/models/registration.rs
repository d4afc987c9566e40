use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::member::MemberType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "review_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Ok,
    Pending,
    NeedsMember,
    NeedsOcr,
    Recheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    NotIssued,
    Issued,
}

/// One attendee order: ticket counts, payment evidence, review state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub tickets_regular: i32,
    pub tickets_member: i32,
    pub tickets_student: i32,
    pub tickets_children: i32,
    pub total_tickets: i32,
    pub total_amount: i32,
    pub proof_url: String,
    pub payment_status: PaymentStatus,
    pub review_status: ReviewStatus,
    pub review_reason: Option<String>,
    pub member_type_detected: Option<MemberType>,
    pub member_checked_at: Option<DateTime<Utc>>,
    pub ocr_expected_amount: Option<i32>,
    pub ocr_amount_detected: Option<i32>,
    pub ocr_checked_at: Option<DateTime<Utc>>,
    pub ticket_status: TicketStatus,
    pub invoice_sent: bool,
    pub tickets_email_sent: bool,
    pub tickets_email_last_error: Option<String>,
    pub tickets_email_last_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateRegistrationData {
    pub name: String,
    pub email: String,
    pub tickets_regular: i32,
    pub tickets_member: i32,
    pub tickets_student: i32,
    pub tickets_children: i32,
    pub total_amount: i32,
    pub proof_url: String,
    pub payment_status: PaymentStatus,
    pub review_status: ReviewStatus,
}

/// Row selection for a batch-issuance run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchFilter {
    /// Restrict to rows with payment_status = pending.
    pub only_pending: bool,
    /// Restrict to rows already flagged for review
    /// (needs_member / needs_ocr / recheck).
    pub only_flagged: bool,
}

impl Registration {
    pub async fn create(pool: &PgPool, data: CreateRegistrationData) -> Result<Self, sqlx::Error> {
        let total_tickets = data.tickets_regular
            + data.tickets_member
            + data.tickets_student
            + data.tickets_children;

        let reg = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO registrations
                (name, email, tickets_regular, tickets_member, tickets_student,
                 tickets_children, total_tickets, total_amount, proof_url,
                 payment_status, review_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(&data.email)
        .bind(data.tickets_regular)
        .bind(data.tickets_member)
        .bind(data.tickets_student)
        .bind(data.tickets_children)
        .bind(total_tickets)
        .bind(data.total_amount)
        .bind(&data.proof_url)
        .bind(data.payment_status)
        .bind(data.review_status)
        .fetch_one(pool)
        .await?;

        Ok(reg)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let reg = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM registrations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(reg)
    }

    /// Selects the page a batch run operates over: registrations with no
    /// tickets yet, oldest first. The no-tickets predicate is what guards
    /// re-runs against double issuance.
    pub async fn list_for_issuance(
        pool: &PgPool,
        filter: BatchFilter,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let regs = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM registrations r
            WHERE NOT EXISTS (SELECT 1 FROM tickets t WHERE t.registration_id = r.id)
              AND ($1 = FALSE OR r.payment_status = 'pending')
              AND ($2 = FALSE OR r.review_status IN ('needs_member', 'needs_ocr', 'recheck'))
            ORDER BY r.created_at ASC
            LIMIT $3
            "#,
        )
        .bind(filter.only_pending)
        .bind(filter.only_flagged)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(regs)
    }

    /// Flags a registration for manual membership review and records the
    /// check timestamp.
    pub async fn flag_needs_member(
        pool: &PgPool,
        id: Uuid,
        reason: &str,
        detected: Option<MemberType>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET review_status = 'needs_member',
                review_reason = $2,
                member_type_detected = $3,
                member_checked_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(detected)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Flags a registration after a failed OCR payment check, keeping the
    /// detected/expected amounts for audit.
    pub async fn flag_needs_ocr(
        pool: &PgPool,
        id: Uuid,
        reason: &str,
        detected: Option<i32>,
        expected: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET review_status = 'needs_ocr',
                review_reason = $2,
                ocr_amount_detected = $3,
                ocr_expected_amount = $4,
                ocr_checked_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(detected)
        .bind(expected)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn confirm_payment(
        pool: &PgPool,
        id: Uuid,
        detected: Option<i32>,
        expected: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET payment_status = 'confirmed',
                ocr_amount_detected = $2,
                ocr_expected_amount = $3,
                ocr_checked_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(detected)
        .bind(expected)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Marks a registration issued and clears its review flag. Called only
    /// after all planned ticket rows have been persisted.
    pub async fn mark_issued(
        pool: &PgPool,
        id: Uuid,
        member_type: Option<MemberType>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET ticket_status = 'issued',
                review_status = 'ok',
                review_reason = NULL,
                member_type_detected = $2,
                member_checked_at = CASE WHEN $2 IS NULL THEN member_checked_at ELSE NOW() END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(member_type)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Flags a partially issued row for operator follow-up. Tickets already
    /// persisted stay valid.
    pub async fn flag_recheck(pool: &PgPool, id: Uuid, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET review_status = 'recheck',
                review_reason = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Records a successful ticket delivery. A recheck flag that was only
    /// there because of an earlier delivery failure is cleared with it.
    pub async fn record_tickets_email_sent(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET tickets_email_sent = TRUE,
                tickets_email_last_error = NULL,
                tickets_email_last_attempt = NOW(),
                review_status = CASE
                    WHEN review_reason LIKE 'tickets_email_failed:%' THEN 'ok'::review_status
                    ELSE review_status
                END,
                review_reason = CASE
                    WHEN review_reason LIKE 'tickets_email_failed:%' THEN NULL
                    ELSE review_reason
                END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Records a delivery failure and re-flags the row for recheck. Ticket
    /// issuance is never rolled back here; only redelivery is pending.
    pub async fn record_tickets_email_failure(
        pool: &PgPool,
        id: Uuid,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET tickets_email_sent = FALSE,
                tickets_email_last_error = $2,
                tickets_email_last_attempt = NOW(),
                review_status = 'recheck',
                review_reason = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(format!("tickets_email_failed:{error}"))
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn mark_invoice_sent(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET invoice_sent = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Total entitled tickets across all registrations (issued or not).
    pub async fn sum_total_tickets(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let total = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT SUM(total_tickets) FROM registrations
            "#,
        )
        .fetch_one(pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    /// Issued registrations whose ticket email never went out; input to the
    /// redelivery job.
    pub async fn list_email_redelivery_candidates(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let regs = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM registrations
            WHERE ticket_status = 'issued'
              AND tickets_email_sent = FALSE
              AND review_status = 'recheck'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(regs)
    }
}
