use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::dispatcher::{ChannelOutcome, DispatchResult};
use super::domain::{Document, DocumentId, DocumentType};
use super::ledger::ReminderLedger;
use super::milestone::ReminderMilestone;
use super::probe::ProbeRecipient;
use super::scanner::{
    DispatchError, DocumentExpiryScanner, DocumentScanResult, ScanSummary,
};
use super::store::{AccountStore, DocumentStore};

/// Shared state behind the reminder endpoints.
pub struct ReminderApi<D, A, L> {
    pub scanner: Arc<DocumentExpiryScanner<D, A, L>>,
    pub probe: ProbeRecipient,
}

/// Router exposing the scan trigger and the single-reminder dispatch endpoint.
pub fn reminder_router<D, A, L>(api: Arc<ReminderApi<D, A, L>>) -> Router
where
    D: DocumentStore + 'static,
    A: AccountStore + 'static,
    L: ReminderLedger + 'static,
{
    Router::new()
        .route("/api/v1/reminders/scan", post(scan_handler::<D, A, L>))
        .route("/api/v1/reminders/dispatch", post(dispatch_handler::<D, A, L>))
        .with_state(api)
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    /// Evaluation instant override, mainly for backfills and tests.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<DocumentScanResult>,
    pub summary: ScanSummary,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchBody {
    pub document_id: String,
    pub reminder_type: String,
    #[serde(default)]
    pub is_test: bool,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: DocumentId,
    pub title: String,
    pub document_type: DocumentType,
    pub expiry_date: Option<NaiveDate>,
}

impl From<&Document> for DocumentView {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            title: document.title.clone(),
            document_type: document.document_type,
            expiry_date: document.expiry_date,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotificationTotals {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    pub document: DocumentView,
    pub reminder_type: ReminderMilestone,
    pub is_test: bool,
    pub notifications: Vec<ChannelOutcome>,
    pub summary: NotificationTotals,
}

impl DispatchResponse {
    fn new(document: &Document, result: DispatchResult, is_test: bool) -> Self {
        Self {
            success: result.is_success(),
            document: DocumentView::from(document),
            reminder_type: result.milestone,
            is_test,
            summary: NotificationTotals {
                total: result.summary.attempted,
                successful: result.summary.succeeded,
                failed: result.summary.failed,
            },
            notifications: result.outcomes,
        }
    }
}

pub(crate) async fn scan_handler<D, A, L>(
    State(api): State<Arc<ReminderApi<D, A, L>>>,
    body: Option<Json<ScanRequest>>,
) -> Response
where
    D: DocumentStore + 'static,
    A: AccountStore + 'static,
    L: ReminderLedger + 'static,
{
    let now = body
        .and_then(|Json(request)| request.now)
        .unwrap_or_else(Utc::now);

    match api.scanner.scan(now).await {
        Ok(report) => {
            let message = format!(
                "Checked {} documents, triggered {} reminders",
                report.summary.documents_checked, report.summary.notifications_triggered
            );
            let payload = ScanResponse {
                success: true,
                message,
                results: report.results,
                summary: report.summary,
                timestamp: report.timestamp,
            };
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => {
            let payload = json!({
                "success": false,
                "error": error.to_string(),
                "timestamp": now,
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn dispatch_handler<D, A, L>(
    State(api): State<Arc<ReminderApi<D, A, L>>>,
    Json(body): Json<DispatchBody>,
) -> Response
where
    D: DocumentStore + 'static,
    A: AccountStore + 'static,
    L: ReminderLedger + 'static,
{
    let milestone = match body.reminder_type.parse::<ReminderMilestone>() {
        Ok(milestone) => milestone,
        Err(error) => {
            let payload = json!({ "success": false, "error": error.to_string() });
            return (StatusCode::BAD_REQUEST, Json(payload)).into_response();
        }
    };
    let document_id = DocumentId(body.document_id);
    let now = body.now.unwrap_or_else(Utc::now);

    if body.is_test {
        let (document, result) = api
            .scanner
            .dispatch_probe(&api.probe, &document_id, milestone, now)
            .await;
        let payload = DispatchResponse::new(&document, result, true);
        return (StatusCode::OK, Json(payload)).into_response();
    }

    match api
        .scanner
        .dispatch_document(&document_id, milestone, now)
        .await
    {
        Ok((document, result)) => {
            let payload = DispatchResponse::new(&document, result, false);
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => {
            let status = match &error {
                DispatchError::DocumentNotFound(_) | DispatchError::ProfileNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                DispatchError::MissingExpiry(_) => StatusCode::UNPROCESSABLE_ENTITY,
                DispatchError::AlreadyClaimed { .. } => StatusCode::CONFLICT,
                DispatchError::Store(_) | DispatchError::Ledger(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            let payload = json!({ "success": false, "error": error.to_string() });
            (status, Json(payload)).into_response()
        }
    }
}
