//! Batch ticket issuance: gates each eligible registration through
//! membership and payment checks, persists its tickets, and emails the QR
//! codes. One registration failing never aborts the run.

use secrecy::ExposeSecret;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::registration::{BatchFilter, PaymentStatus, Registration};
use crate::models::ticket::{is_ticket_no_collision, CreateTicketData, Ticket, TicketType};
use crate::services::blob_store::BlobStore;
use crate::services::mailer::Mailer;
use crate::services::membership::{membership_verdict, MemberDirectory, MembershipVerdict};
use crate::services::ocr_client::OcrClient;
use crate::services::payment_verifier::{amounts_match, PaymentVerifier};
use crate::services::qr::{issue_credential, QrGenerationError, TicketTokenSigner};
use crate::services::ticket_code::{
    with_unique_retry, TicketCodeGenerator, UniqueRetryError, MAX_TICKET_NO_ATTEMPTS,
};

const DEFAULT_BATCH_LIMIT: i64 = 100;
const MAX_BATCH_LIMIT: i64 = 500;

/// Caps a requested batch size to something a single HTTP request can
/// finish; OCR and SMTP round trips dominate the run time.
pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_BATCH_LIMIT)
        .clamp(1, MAX_BATCH_LIMIT)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub filter: BatchFilter,
    pub dry_run: bool,
    pub use_ocr: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub registration_id: Uuid,
    pub name: String,
    pub email: String,
    pub member_tickets_claimed: i32,
    pub member_type: Option<&'static str>,
    pub member_ok: bool,
    pub payment_confirmed: bool,
    pub will_issue: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Issued,
    Skipped,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRow {
    pub registration_id: Uuid,
    pub name: String,
    pub email: String,
    pub status: RowStatus,
    pub issued_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub email_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_amount: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum BatchReport {
    #[serde(rename = "preview")]
    Preview { scanned: usize, rows: Vec<PreviewRow> },
    #[serde(rename = "commit")]
    Commit {
        scanned: usize,
        issued: usize,
        skipped: usize,
        rows: Vec<IssueRow>,
    },
}

/// Reason code attached to a registration a membership gate rejected.
fn membership_reason(verdict: &MembershipVerdict) -> Option<String> {
    match verdict {
        MembershipVerdict::Allowed { .. } => None,
        MembershipVerdict::NotFound => Some("membership_not_found".to_string()),
        MembershipVerdict::LimitExceeded { member_type, limit } => Some(format!(
            "member_limit_exceeded:{}:{}",
            member_type.as_str(),
            limit
        )),
    }
}

/// Expands a registration's counts into the ticket rows to create,
/// in a stable category order.
fn planned_tickets(reg: &Registration) -> Vec<TicketType> {
    let mut planned = Vec::with_capacity(reg.total_tickets as usize);
    for (ticket_type, count) in [
        (TicketType::Regular, reg.tickets_regular),
        (TicketType::Member, reg.tickets_member),
        (TicketType::Student, reg.tickets_student),
        (TicketType::Children, reg.tickets_children),
    ] {
        for _ in 0..count {
            planned.push(ticket_type);
        }
    }
    planned
}

#[derive(thiserror::Error, Debug)]
enum TicketPersistError {
    #[error(transparent)]
    Credential(#[from] QrGenerationError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct IssuanceEngine<'a> {
    pool: &'a PgPool,
    config: &'a Config,
    directory: &'a MemberDirectory,
    blob: &'a BlobStore,
    mailer: &'a Mailer,
}

impl<'a> IssuanceEngine<'a> {
    pub fn new(
        pool: &'a PgPool,
        config: &'a Config,
        directory: &'a MemberDirectory,
        blob: &'a BlobStore,
        mailer: &'a Mailer,
    ) -> Self {
        Self {
            pool,
            config,
            directory,
            blob,
            mailer,
        }
    }

    fn signer(&self) -> Option<TicketTokenSigner> {
        self.config.ticket_token_enabled.then(|| {
            TicketTokenSigner::new(self.config.ticket_signing_secret.expose_secret().as_bytes())
        })
    }

    /// OCR verification is opt-in per run; requesting it without the OCR
    /// service configured is a caller error that fails the whole batch
    /// before any row is touched.
    fn ocr_client(&self) -> Result<OcrClient, AppError> {
        match (&self.config.ocr_api_url, &self.config.ocr_api_key) {
            (Some(url), Some(key)) => Ok(OcrClient::new(url, key.clone())),
            _ => Err(AppError::Config(
                "OCR verification requested but ocr_api_url/ocr_api_key are not configured"
                    .to_string(),
            )),
        }
    }

    #[tracing::instrument(skip(self), fields(dry_run = options.dry_run, use_ocr = options.use_ocr))]
    pub async fn run(&self, options: BatchOptions) -> Result<BatchReport, AppError> {
        let ocr = if options.use_ocr {
            Some(self.ocr_client()?)
        } else {
            None
        };

        // Freshly imported members must be visible to this run.
        self.directory.refresh(self.pool).await?;

        let limit = clamp_limit(options.limit);
        let regs = Registration::list_for_issuance(self.pool, options.filter, limit).await?;
        tracing::info!(candidates = regs.len(), limit, "batch issuance selected rows");

        if options.dry_run {
            return Ok(self.preview(&regs, options.use_ocr).await);
        }

        let verifier = ocr
            .as_ref()
            .map(|ocr| {
                PaymentVerifier::new(
                    self.blob,
                    ocr,
                    &self.config.proof_bucket,
                    self.config.ocr_tolerance,
                )
            });

        let mut rows = Vec::with_capacity(regs.len());
        for reg in &regs {
            rows.push(self.process_one(reg, verifier.as_ref()).await?);
        }

        let issued = rows.iter().filter(|r| r.status == RowStatus::Issued).count();
        let skipped = rows.iter().filter(|r| r.status == RowStatus::Skipped).count();
        tracing::info!(scanned = regs.len(), issued, skipped, "batch issuance finished");

        Ok(BatchReport::Commit {
            scanned: regs.len(),
            issued,
            skipped,
            rows,
        })
    }

    /// Read-only pass over the same selection: reports what a commit run
    /// would do without touching storage, OCR, or the database.
    async fn preview(&self, regs: &[Registration], use_ocr: bool) -> BatchReport {
        let mut rows = Vec::with_capacity(regs.len());
        for reg in regs {
            let resolved = self.directory.resolve(&reg.name).await;
            let verdict = membership_verdict(reg.tickets_member, resolved, &self.config.membership);
            let member_ok = matches!(verdict, MembershipVerdict::Allowed { .. });
            let payment_confirmed = reg.payment_status == PaymentStatus::Confirmed;
            // OCR runs only at commit time; a preview reports whether the
            // gate is already satisfied, counting an amount detected by an
            // earlier run that sits within tolerance.
            let previously_detected_ok = reg.ocr_amount_detected.is_some_and(|d| {
                amounts_match(
                    d as i64,
                    reg.total_amount as i64,
                    self.config.ocr_tolerance as i64,
                )
            });
            let will_issue = member_ok && (!use_ocr || payment_confirmed || previously_detected_ok);
            rows.push(PreviewRow {
                registration_id: reg.id,
                name: reg.name.clone(),
                email: reg.email.clone(),
                member_tickets_claimed: reg.tickets_member,
                member_type: resolved.map(|t| t.as_str()),
                member_ok,
                payment_confirmed,
                will_issue,
                reason: membership_reason(&verdict),
            });
        }
        BatchReport::Preview {
            scanned: regs.len(),
            rows,
        }
    }

    async fn process_one(
        &self,
        reg: &Registration,
        verifier: Option<&PaymentVerifier<'_>>,
    ) -> Result<IssueRow, AppError> {
        let skipped = |reason: String, expected: Option<i32>, detected: Option<i32>| IssueRow {
            registration_id: reg.id,
            name: reg.name.clone(),
            email: reg.email.clone(),
            status: RowStatus::Skipped,
            issued_count: 0,
            reason: Some(reason),
            email_sent: false,
            email_error: None,
            expected_amount: expected,
            detected_amount: detected,
        };

        // Gate 1: membership claims against the member directory.
        let resolved = self.directory.resolve(&reg.name).await;
        let verdict = membership_verdict(reg.tickets_member, resolved, &self.config.membership);
        let member_type = match &verdict {
            MembershipVerdict::Allowed { member_type } => *member_type,
            _ => {
                let reason = membership_reason(&verdict)
                    .unwrap_or_else(|| "membership_not_found".to_string());
                Registration::flag_needs_member(self.pool, reg.id, &reason, resolved).await?;
                tracing::info!(registration_id = %reg.id, reason = %reason, "membership gate rejected");
                return Ok(skipped(reason, None, None));
            }
        };

        // Gate 2: OCR payment verification, skipped for rows already
        // confirmed (manual registrations, earlier runs).
        let mut detected_amount = reg.ocr_amount_detected;
        if let Some(verifier) = verifier {
            if reg.payment_status != PaymentStatus::Confirmed {
                let check = verifier.verify(&reg.proof_url, reg.total_amount).await;
                detected_amount = check.detected;
                if check.matched {
                    Registration::confirm_payment(self.pool, reg.id, check.detected, reg.total_amount)
                        .await?;
                } else {
                    let reason = format!(
                        "payment_ocr_{}",
                        check.reason.map(|r| r.as_str()).unwrap_or("unknown")
                    );
                    Registration::flag_needs_ocr(
                        self.pool,
                        reg.id,
                        &reason,
                        check.detected,
                        reg.total_amount,
                    )
                    .await?;
                    tracing::info!(registration_id = %reg.id, reason = %reason, "payment gate rejected");
                    return Ok(skipped(reason, Some(reg.total_amount), check.detected));
                }
            }
        }

        // Gates passed: persist tickets one by one.
        let generator =
            TicketCodeGenerator::new(&self.config.ticket_prefix, self.config.ticket_code_len);
        let signer = self.signer();
        let planned = planned_tickets(reg);
        let mut tickets: Vec<Ticket> = Vec::with_capacity(planned.len());

        for ticket_type in planned {
            let result = with_unique_retry(
                MAX_TICKET_NO_ATTEMPTS,
                || generator.make_ticket_no(),
                |ticket_no| {
                    let signer = signer.as_ref();
                    async move {
                        // The QR encodes the number, so a regenerated number
                        // always gets a freshly rendered credential.
                        let credential = issue_credential(
                            self.blob,
                            &self.config.qr_bucket,
                            signer,
                            reg.id,
                            &ticket_no,
                        )
                        .await?;
                        let ticket = Ticket::create(
                            self.pool,
                            CreateTicketData {
                                registration_id: reg.id,
                                ticket_no,
                                ticket_type,
                                qr_url: credential.qr_url,
                            },
                        )
                        .await?;
                        Ok::<_, TicketPersistError>(ticket)
                    }
                },
                |e| matches!(e, TicketPersistError::Database(db) if is_ticket_no_collision(db)),
            )
            .await;

            match result {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    // Tickets persisted so far stay valid; the row goes to
                    // the operator instead of sinking the whole batch.
                    let detail = match &e {
                        UniqueRetryError::AttemptsExhausted(n) => {
                            format!("ticket_no_exhausted_after_{n}_attempts")
                        }
                        UniqueRetryError::Persist(e) => e.to_string(),
                    };
                    let reason = format!("ticket_issue_failed:{detail}");
                    Registration::flag_recheck(self.pool, reg.id, &reason).await?;
                    tracing::error!(
                        registration_id = %reg.id,
                        issued = tickets.len(),
                        error = %detail,
                        "ticket issuance failed mid-registration"
                    );
                    return Ok(IssueRow {
                        registration_id: reg.id,
                        name: reg.name.clone(),
                        email: reg.email.clone(),
                        status: RowStatus::Partial,
                        issued_count: tickets.len() as i32,
                        reason: Some(reason),
                        email_sent: false,
                        email_error: None,
                        expected_amount: Some(reg.total_amount),
                        detected_amount,
                    });
                }
            }
        }

        Registration::mark_issued(self.pool, reg.id, member_type).await?;

        // Delivery failure never rolls issuance back; the redelivery job
        // picks the row up later.
        let (email_sent, email_error) = match self.mailer.send_tickets_email(reg, &tickets).await {
            Ok(()) => {
                Registration::record_tickets_email_sent(self.pool, reg.id).await?;
                (true, None)
            }
            Err(e) => {
                let msg = e.to_string();
                Registration::record_tickets_email_failure(self.pool, reg.id, &msg).await?;
                tracing::warn!(registration_id = %reg.id, error = %msg, "ticket email failed");
                (false, Some(msg))
            }
        };

        tracing::info!(
            registration_id = %reg.id,
            tickets = tickets.len(),
            email_sent,
            "registration issued"
        );

        Ok(IssueRow {
            registration_id: reg.id,
            name: reg.name.clone(),
            email: reg.email.clone(),
            status: RowStatus::Issued,
            issued_count: tickets.len() as i32,
            reason: None,
            email_sent,
            email_error,
            expected_amount: reg.ocr_expected_amount.or(Some(reg.total_amount)),
            detected_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::member::MemberType;
    use crate::models::registration::ReviewStatus;
    use chrono::Utc;

    fn registration(regular: i32, member: i32, student: i32, children: i32) -> Registration {
        Registration {
            id: Uuid::new_v4(),
            name: "Test Person".to_string(),
            email: "test@example.com".to_string(),
            tickets_regular: regular,
            tickets_member: member,
            tickets_student: student,
            tickets_children: children,
            total_tickets: regular + member + student + children,
            total_amount: 0,
            proof_url: String::new(),
            payment_status: PaymentStatus::Pending,
            review_status: ReviewStatus::Pending,
            review_reason: None,
            member_type_detected: None,
            member_checked_at: None,
            ocr_expected_amount: None,
            ocr_amount_detected: None,
            ocr_checked_at: None,
            ticket_status: crate::models::registration::TicketStatus::NotIssued,
            invoice_sent: false,
            tickets_email_sent: false,
            tickets_email_last_error: None,
            tickets_email_last_attempt: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(None), 100);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(10_000)), 500);
    }

    #[test]
    fn planned_tickets_expand_in_category_order() {
        let reg = registration(2, 1, 0, 3);
        assert_eq!(
            planned_tickets(&reg),
            vec![
                TicketType::Regular,
                TicketType::Regular,
                TicketType::Member,
                TicketType::Children,
                TicketType::Children,
                TicketType::Children,
            ]
        );
        assert!(planned_tickets(&registration(0, 0, 0, 0)).is_empty());
    }

    #[test]
    fn membership_reason_codes() {
        assert_eq!(membership_reason(&MembershipVerdict::NotFound).as_deref(),
            Some("membership_not_found"));
        assert_eq!(
            membership_reason(&MembershipVerdict::LimitExceeded {
                member_type: MemberType::Family,
                limit: 6
            })
            .as_deref(),
            Some("member_limit_exceeded:family:6")
        );
        assert_eq!(
            membership_reason(&MembershipVerdict::Allowed { member_type: None }),
            None
        );
    }

}
