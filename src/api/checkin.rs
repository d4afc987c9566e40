use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::services::checkin;
use crate::services::qr::TicketTokenSigner;

fn signer(state: &AppState) -> Option<TicketTokenSigner> {
    state.config.ticket_token_enabled.then(|| {
        TicketTokenSigner::new(state.config.ticket_signing_secret.expose_secret().as_bytes())
    })
}

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    /// Whatever the scanner produced: full QR payload, bare token, or a
    /// hand-typed ticket number.
    pub code: String,
}

async fn check_in(
    State(state): State<AppState>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<checkin::CheckInOutcome>> {
    let outcome = checkin::check_in(&state.pool, &req.code, signer(&state).as_ref()).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupParams {
    ticket_no: Option<String>,
}

async fn lookup(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<crate::models::ticket::Ticket>> {
    let ticket_no = params
        .ticket_no
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("ticketNo query parameter is required".to_string()))?;
    let ticket = checkin::lookup(&state.pool, ticket_no).await?;
    Ok(Json(ticket))
}

/// Counter for the door screen. Marked no-store so the browser polls the
/// live numbers instead of a cached response.
async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = checkin::stats(&state.pool).await?;
    Ok(([(header::CACHE_CONTROL, "no-store")], Json(stats)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/checkin", post(check_in).get(lookup))
        .route("/api/admin/checkin/stats", get(stats))
}
