use sqlx::PgPool;

use crate::models::registration::Registration;
use crate::models::ticket::Ticket;
use crate::services::mailer::Mailer;

#[derive(Debug)]
pub struct RedeliveryStats {
    pub candidates: usize,
    pub resent: usize,
    pub failures: usize,
}

/// Background job that redelivers ticket emails
///
/// Issuance never rolls back when the SMTP leg fails; those rows sit in
/// recheck with tickets_email_sent = false. For each such row:
/// 1. Load its persisted tickets
/// 2. Resend the ticket email
/// 3. On success, mark delivered and clear the email-failure flag
/// 4. On failure, record the new error and leave the row for the next run
pub async fn resend_pending_ticket_emails(
    pool: &PgPool,
    mailer: &Mailer,
    batch_size: i64,
) -> Result<RedeliveryStats, sqlx::Error> {
    let candidates = Registration::list_email_redelivery_candidates(pool, batch_size).await?;
    let mut stats = RedeliveryStats {
        candidates: candidates.len(),
        resent: 0,
        failures: 0,
    };

    if candidates.is_empty() {
        return Ok(stats);
    }

    tracing::info!(candidates = stats.candidates, "Starting ticket email redelivery job");

    for reg in &candidates {
        let tickets = Ticket::list_by_registration(pool, reg.id).await?;
        if tickets.is_empty() {
            // Issued flag without ticket rows means a partially failed
            // registration; the recheck flag already points at it.
            tracing::warn!(registration_id = %reg.id, "redelivery candidate has no tickets");
            continue;
        }

        match mailer.send_tickets_email(reg, &tickets).await {
            Ok(()) => {
                Registration::record_tickets_email_sent(pool, reg.id).await?;
                stats.resent += 1;
                tracing::info!(registration_id = %reg.id, "ticket email redelivered");
            }
            Err(e) => {
                let msg = e.to_string();
                Registration::record_tickets_email_failure(pool, reg.id, &msg).await?;
                stats.failures += 1;
                tracing::warn!(registration_id = %reg.id, error = %msg, "redelivery failed");
            }
        }
    }

    tracing::info!(?stats, "Ticket email redelivery job completed");

    Ok(stats)
}
