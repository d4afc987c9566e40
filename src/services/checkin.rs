//! Door check-in: resolve whatever the scanner hands us to a ticket
//! number, then flip the one-way checked_in flag.

use serde::Serialize;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::registration::Registration;
use crate::models::ticket::Ticket;
use crate::services::qr::{TicketTokenSigner, QR_SCHEME};

/// Accepts the three shapes a scan can produce: the full QR payload
/// `TKT|<no>[|<token>]`, a bare signed token, or a hand-typed ticket
/// number. Tokens are verified when a signer is configured, but the
/// database stays the source of truth, so an expired or unverifiable
/// token still falls back to its plain ticket number when one is present.
pub fn extract_ticket_no(input: &str, signer: Option<&TicketTokenSigner>) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(rest) = input.strip_prefix(&format!("{QR_SCHEME}|")) {
        let mut parts = rest.splitn(2, '|');
        let ticket_no = parts.next()?.trim();
        if ticket_no.is_empty() {
            return None;
        }
        if let (Some(signer), Some(token)) = (signer, parts.next()) {
            if let Some(claims) = signer.verify(token.trim()) {
                return Some(claims.t);
            }
        }
        return Some(ticket_no.to_string());
    }

    // A bare token carries the number inside its claims.
    if let Some(signer) = signer {
        if input.contains('.') {
            if let Some(claims) = signer.verify(input) {
                return Some(claims.t);
            }
        }
    }

    Some(input.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    CheckedIn,
    AlreadyCheckedIn,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInOutcome {
    pub status: CheckInStatus,
    pub ticket: Ticket,
}

/// Attempts to check a scanned credential in. Idempotent in effect: the
/// first scan wins, every later scan of the same number reports
/// `already_checked_in` with the original timestamp.
#[tracing::instrument(skip(pool, signer))]
pub async fn check_in(
    pool: &PgPool,
    raw: &str,
    signer: Option<&TicketTokenSigner>,
) -> Result<CheckInOutcome, AppError> {
    let ticket_no = extract_ticket_no(raw, signer)
        .ok_or_else(|| AppError::Validation("empty or unreadable ticket code".to_string()))?;

    if let Some(ticket) = Ticket::try_check_in(pool, &ticket_no).await? {
        tracing::info!(ticket_no = %ticket.ticket_no, "ticket checked in");
        return Ok(CheckInOutcome {
            status: CheckInStatus::CheckedIn,
            ticket,
        });
    }

    match Ticket::find_by_ticket_no(pool, &ticket_no).await? {
        Some(ticket) => {
            tracing::info!(ticket_no = %ticket.ticket_no, "duplicate check-in attempt");
            Ok(CheckInOutcome {
                status: CheckInStatus::AlreadyCheckedIn,
                ticket,
            })
        }
        None => Err(AppError::NotFound(format!("ticket {ticket_no} not found"))),
    }
}

/// Ticket lookup without state change, for the door screen.
pub async fn lookup(pool: &PgPool, ticket_no: &str) -> Result<Ticket, AppError> {
    Ticket::find_by_ticket_no(pool, ticket_no)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket {ticket_no} not found")))
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInStats {
    /// Tickets everyone is entitled to, issued or not.
    pub total_registrants: i64,
    pub checked_in: i64,
}

pub async fn stats(pool: &PgPool) -> Result<CheckInStats, AppError> {
    let total_registrants = Registration::sum_total_tickets(pool).await?;
    let checked_in = Ticket::count_checked_in(pool).await?;
    Ok(CheckInStats {
        total_registrants,
        checked_in,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn signer() -> TicketTokenSigner {
        TicketTokenSigner::new(b"a-test-signing-secret")
    }

    #[test]
    fn extracts_plain_number() {
        assert_eq!(
            extract_ticket_no("NM25-ABCD", None).as_deref(),
            Some("NM25-ABCD")
        );
        assert_eq!(
            extract_ticket_no("  NM25-ABCD  ", None).as_deref(),
            Some("NM25-ABCD")
        );
        assert_eq!(extract_ticket_no("", None), None);
        assert_eq!(extract_ticket_no("   ", None), None);
    }

    #[test]
    fn extracts_from_qr_payload_without_token() {
        assert_eq!(
            extract_ticket_no("TKT|NM25-ABCD", None).as_deref(),
            Some("NM25-ABCD")
        );
        assert_eq!(extract_ticket_no("TKT|", None), None);
    }

    #[test]
    fn extracts_from_qr_payload_with_valid_token() {
        let s = signer();
        let token = s.sign(Uuid::new_v4(), "NM25-WXYZ").unwrap();
        assert_eq!(
            extract_ticket_no(&format!("TKT|NM25-WXYZ|{token}"), Some(&s)).as_deref(),
            Some("NM25-WXYZ")
        );
    }

    #[test]
    fn invalid_token_falls_back_to_plain_number() {
        let s = signer();
        assert_eq!(
            extract_ticket_no("TKT|NM25-WXYZ|not.a.token", Some(&s)).as_deref(),
            Some("NM25-WXYZ")
        );
    }

    #[test]
    fn bare_token_resolves_via_claims() {
        let s = signer();
        let token = s.sign(Uuid::new_v4(), "NM25-QRST").unwrap();
        assert_eq!(
            extract_ticket_no(&token, Some(&s)).as_deref(),
            Some("NM25-QRST")
        );
    }
}
