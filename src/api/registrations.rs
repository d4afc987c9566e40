use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::registration::{
    CreateRegistrationData, PaymentStatus, Registration, ReviewStatus,
};

/// Per-category cap on a single order; fat-finger guard, not policy.
const MAX_TICKETS_PER_CATEGORY: i32 = 20;

/// Sentinel proof references for operator-entered registrations. These
/// are not storage keys; the batch OCR gate cannot verify them.
pub const MANUAL_PROOF_VERIFIED: &str = "manual:verified";
pub const MANUAL_PROOF_UNVERIFIED: &str = "manual:unverified";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub tickets_regular: i32,
    #[serde(default)]
    pub tickets_member: i32,
    #[serde(default)]
    pub tickets_student: i32,
    #[serde(default)]
    pub tickets_children: i32,
    pub proof_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualRegisterRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub tickets_regular: i32,
    #[serde(default)]
    pub tickets_member: i32,
    #[serde(default)]
    pub tickets_student: i32,
    #[serde(default)]
    pub tickets_children: i32,
    /// Operator vouches the payment is already settled; skips the OCR
    /// gate at issuance time.
    #[serde(default)]
    pub payment_verified: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub id: Uuid,
    pub total_tickets: i32,
    pub total_amount: i32,
    pub confirmation_email_sent: bool,
}

struct ValidatedCounts {
    regular: i32,
    member: i32,
    student: i32,
    children: i32,
}

fn validate_common(
    name: &str,
    email: &str,
    counts: [i32; 4],
) -> std::result::Result<ValidatedCounts, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".to_string()));
    }
    // Full address validation happens at send time; this catches the
    // obviously broken input early.
    if !email.contains('@') || email.trim().len() < 3 {
        return Err(AppError::Validation(format!("invalid email: {email}")));
    }

    let [regular, member, student, children] = counts;
    for (label, count) in [
        ("ticketsRegular", regular),
        ("ticketsMember", member),
        ("ticketsStudent", student),
        ("ticketsChildren", children),
    ] {
        if count < 0 {
            return Err(AppError::Validation(format!("{label} must not be negative")));
        }
        if count > MAX_TICKETS_PER_CATEGORY {
            return Err(AppError::Validation(format!(
                "{label} exceeds the maximum of {MAX_TICKETS_PER_CATEGORY}"
            )));
        }
    }
    if regular + member + student + children < 1 {
        return Err(AppError::Validation(
            "at least one ticket is required".to_string(),
        ));
    }

    Ok(ValidatedCounts {
        regular,
        member,
        student,
        children,
    })
}

/// Prices are server configuration; the client sends counts only.
fn order_amount(state: &AppState, counts: &ValidatedCounts) -> i32 {
    let prices = &state.config.prices;
    counts.regular * prices.regular
        + counts.member * prices.member
        + counts.student * prices.student
        + counts.children * prices.children
}

/// Public self-registration. All input errors are synchronous 400s with
/// no partial record; a failed confirmation email does not fail the
/// registration (invoice_sent stays false for follow-up).
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let counts = validate_common(
        &req.name,
        &req.email,
        [
            req.tickets_regular,
            req.tickets_member,
            req.tickets_student,
            req.tickets_children,
        ],
    )?;
    if req.proof_url.trim().is_empty() {
        return Err(AppError::Validation(
            "a payment proof reference is required".to_string(),
        ));
    }

    let total_amount = order_amount(&state, &counts);
    let reg = Registration::create(
        &state.pool,
        CreateRegistrationData {
            name: req.name.trim().to_string(),
            email: req.email.trim().to_string(),
            tickets_regular: counts.regular,
            tickets_member: counts.member,
            tickets_student: counts.student,
            tickets_children: counts.children,
            total_amount,
            proof_url: req.proof_url.trim().to_string(),
            payment_status: PaymentStatus::Pending,
            review_status: ReviewStatus::Pending,
        },
    )
    .await?;

    let confirmation_email_sent = match state.mailer.send_registration_email(&reg).await {
        Ok(()) => {
            Registration::mark_invoice_sent(&state.pool, reg.id).await?;
            true
        }
        Err(e) => {
            tracing::warn!(registration_id = %reg.id, error = %e, "confirmation email failed");
            false
        }
    };

    tracing::info!(
        registration_id = %reg.id,
        total_tickets = reg.total_tickets,
        total_amount = reg.total_amount,
        "registration created"
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: reg.id,
            total_tickets: reg.total_tickets,
            total_amount: reg.total_amount,
            confirmation_email_sent,
        }),
    ))
}

/// Operator entry for door sales and phone orders. No proof image exists,
/// so the proof reference is a sentinel; verified orders skip both the
/// payment and review gates at issuance time. Run the batch with OCR
/// disabled for unverified manual rows.
async fn manual_register(
    State(state): State<AppState>,
    Json(req): Json<ManualRegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let counts = validate_common(
        &req.name,
        &req.email,
        [
            req.tickets_regular,
            req.tickets_member,
            req.tickets_student,
            req.tickets_children,
        ],
    )?;

    let (proof_url, payment_status, review_status) = if req.payment_verified {
        (MANUAL_PROOF_VERIFIED, PaymentStatus::Confirmed, ReviewStatus::Ok)
    } else {
        (MANUAL_PROOF_UNVERIFIED, PaymentStatus::Pending, ReviewStatus::Pending)
    };

    let total_amount = order_amount(&state, &counts);
    let reg = Registration::create(
        &state.pool,
        CreateRegistrationData {
            name: req.name.trim().to_string(),
            email: req.email.trim().to_string(),
            tickets_regular: counts.regular,
            tickets_member: counts.member,
            tickets_student: counts.student,
            tickets_children: counts.children,
            total_amount,
            proof_url: proof_url.to_string(),
            payment_status,
            review_status,
        },
    )
    .await?;

    tracing::info!(
        registration_id = %reg.id,
        payment_verified = req.payment_verified,
        "manual registration created"
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: reg.id,
            total_tickets: reg.total_tickets,
            total_amount: reg.total_amount,
            confirmation_email_sent: false,
        }),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/admin/manual-register", post(manual_register))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name_and_bad_email() {
        assert!(validate_common("", "a@b.se", [1, 0, 0, 0]).is_err());
        assert!(validate_common("   ", "a@b.se", [1, 0, 0, 0]).is_err());
        assert!(validate_common("Anna", "not-an-email", [1, 0, 0, 0]).is_err());
    }

    #[test]
    fn rejects_zero_and_out_of_range_counts() {
        assert!(validate_common("Anna", "a@b.se", [0, 0, 0, 0]).is_err());
        assert!(validate_common("Anna", "a@b.se", [-1, 1, 0, 0]).is_err());
        assert!(validate_common("Anna", "a@b.se", [21, 0, 0, 0]).is_err());
    }

    #[test]
    fn accepts_reasonable_order() {
        let counts = validate_common("Anna", "a@b.se", [2, 1, 0, 3]).unwrap();
        assert_eq!(counts.regular, 2);
        assert_eq!(counts.children, 3);
    }
}
