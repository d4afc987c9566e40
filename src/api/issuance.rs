use axum::{extract::Query, extract::State, routing::get, Json, Router};
use serde::Deserialize;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::registration::BatchFilter;
use crate::services::issuance::{BatchOptions, BatchReport, IssuanceEngine};

/// Flags arrive as `0`/`1` (or `true`/`false`) query values from the
/// admin console. Anything else is a malformed request; a mistyped flag
/// must not silently run a full commit.
fn flag(name: &str, value: Option<&str>) -> std::result::Result<bool, AppError> {
    match value {
        Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") | None => Ok(false),
        Some(other) => Err(AppError::Validation(format!(
            "{name} must be 0/1/true/false, got {other:?}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchIssueParams {
    only_pending: Option<String>,
    only_flagged: Option<String>,
    dry_run: Option<String>,
    #[serde(rename = "useOCR")]
    use_ocr: Option<String>,
    limit: Option<i64>,
}

/// Runs one batch-issuance pass. GET so the admin console can trigger it
/// from a plain link; `dryRun=1` makes it side-effect free.
async fn batch_issue(
    State(state): State<AppState>,
    Query(params): Query<BatchIssueParams>,
) -> Result<Json<BatchReport>> {
    let options = BatchOptions {
        filter: BatchFilter {
            only_pending: flag("onlyPending", params.only_pending.as_deref())?,
            only_flagged: flag("onlyFlagged", params.only_flagged.as_deref())?,
        },
        dry_run: flag("dryRun", params.dry_run.as_deref())?,
        use_ocr: flag("useOCR", params.use_ocr.as_deref())?,
        limit: params.limit,
    };

    let engine = IssuanceEngine::new(
        &state.pool,
        &state.config,
        &state.directory,
        &state.blob,
        &state.mailer,
    );
    let report = engine.run(options).await?;
    Ok(Json(report))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/admin/batch-issue", get(batch_issue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing() {
        assert!(flag("dryRun", Some("1")).unwrap());
        assert!(flag("dryRun", Some("true")).unwrap());
        assert!(!flag("dryRun", Some("0")).unwrap());
        assert!(!flag("dryRun", Some("false")).unwrap());
        assert!(!flag("dryRun", None).unwrap());
        assert!(flag("dryRun", Some("yes")).is_err());
    }
}
