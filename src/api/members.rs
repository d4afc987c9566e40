use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::member::{Member, MemberType};
use crate::services::name_normalize::normalize_name;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertMemberRequest {
    pub name: String,
    pub member_type: MemberType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResponse {
    pub id: Uuid,
    pub name_key: String,
    pub member_type: MemberType,
}

/// Adds or updates one member-directory entry. The stored key is the
/// normalized name, so lookups during issuance match regardless of
/// diacritics or punctuation in either spelling.
async fn upsert_member(
    State(state): State<AppState>,
    Json(req): Json<UpsertMemberRequest>,
) -> Result<(StatusCode, Json<MemberResponse>)> {
    let name_key = normalize_name(&req.name);
    if name_key.is_empty() {
        return Err(AppError::Validation(
            "name must contain at least one letter or digit".to_string(),
        ));
    }

    let member = Member::upsert(&state.pool, &name_key, req.member_type).await?;
    // Keep the in-memory directory in step with the table.
    state.directory.refresh(&state.pool).await?;

    tracing::info!(name_key = %member.name_key, member_type = ?member.member_type, "member upserted");

    Ok((
        StatusCode::CREATED,
        Json(MemberResponse {
            id: member.id,
            name_key: member.name_key,
            member_type: member.member_type,
        }),
    ))
}

async fn list_members(State(state): State<AppState>) -> Result<Json<Vec<Member>>> {
    Ok(Json(Member::list_all(&state.pool).await?))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/admin/members", post(upsert_member).get(list_members))
}
