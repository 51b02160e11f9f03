//! Reminder and export batches.
//!
//! Each request runs one bounded fan-out. A batch registers a cancellation
//! handle under its id (client supplied or generated) for as long as the
//! request is in flight, so `POST /invoices/batches/:batch_id/cancel` from
//! another request can stop it.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use tokio::sync::watch;

use levy_billing::InvoiceId;

use crate::app::dto;
use crate::app::errors::{ApiError, ApiResult, parse_id};
use crate::app::services::AppServices;
use crate::authz::{self, INVOICES_READ, INVOICES_WRITE};
use crate::context::RequestContext;

/// Carries the export's batch report alongside the binary body.
pub const BATCH_REPORT_HEADER: &str = "x-levy-batch-report";

pub fn router() -> Router {
    Router::new()
        .route("/invoices/send-reminders", post(send_reminders))
        .route("/invoices/export-pdf", post(export_pdf))
        .route("/invoices/batches/:batch_id/cancel", post(cancel_batch))
}

/// Deregisters the batch when the request finishes or is dropped.
struct BatchGuard {
    services: Arc<AppServices>,
    batch_id: String,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.services.billing.close_batch(&self.batch_id);
    }
}

fn open_batch(
    services: &Arc<AppServices>,
    body: &dto::BatchRequest,
) -> ApiResult<(Vec<InvoiceId>, BatchGuard, watch::Receiver<bool>)> {
    let invoice_ids = body
        .invoice_ids
        .iter()
        .map(|id| parse_id(id, "invoice"))
        .collect::<ApiResult<Vec<InvoiceId>>>()?;
    let batch_id = match body.batch_id.as_deref().map(str::trim) {
        Some("") => return Err(ApiError::bad_request("invalid_batch_id", "batch_id must not be empty")),
        Some(id) => id.to_string(),
        None => uuid::Uuid::now_v7().to_string(),
    };
    let cancel = services.billing.open_batch(&batch_id)?;
    let guard = BatchGuard {
        services: services.clone(),
        batch_id,
    };
    Ok((invoice_ids, guard, cancel))
}

pub async fn send_reminders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<dto::BatchRequest>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_WRITE)?;
    let (invoice_ids, guard, cancel) = open_batch(&services, &body)?;

    let report = services.billing.send_reminders(&invoice_ids, cancel).await;
    Ok(Json(dto::batch_report_to_json(&guard.batch_id, &report, "sent")).into_response())
}

/// Rendered documents come back as one bundle; the per-invoice outcome is in
/// the [`BATCH_REPORT_HEADER`] header as JSON.
pub async fn export_pdf(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<dto::BatchRequest>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_READ)?;
    let (invoice_ids, guard, cancel) = open_batch(&services, &body)?;

    let export = services.billing.export_invoices_to_pdf(&invoice_ids, cancel).await;
    let bundle = services.billing.bundle_documents(&export.documents)?;
    let report = dto::batch_report_to_json(&guard.batch_id, &export.report, "exported").to_string();

    let report_header = HeaderValue::from_str(&header_safe(&report))
        .map_err(|e| ApiError::from(levy_infra::ServiceError::Internal(e.to_string())))?;
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", header_safe(&bundle.file_name)))
        .map_err(|e| ApiError::from(levy_infra::ServiceError::Internal(e.to_string())))?;
    let content_type = HeaderValue::from_str(&bundle.content_type)
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (HeaderName::from_static(BATCH_REPORT_HEADER), report_header),
        ],
        bundle.bytes,
    )
        .into_response())
}

pub async fn cancel_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(batch_id): Path<String>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_WRITE)?;
    services.billing.cancel_batch(&batch_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "batch_id": batch_id, "cancelled": true })),
    )
        .into_response())
}

/// Header values must be visible ASCII.
fn header_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values_are_made_ascii() {
        assert_eq!(header_safe("fakturor-Ängen.txt"), "fakturor-?ngen.txt");
        assert!(HeaderValue::from_str(&header_safe("{\"a\":\"ö\\n\"}")).is_ok());
    }
}
