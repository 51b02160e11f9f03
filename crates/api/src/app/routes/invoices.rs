use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use levy_billing::{InvoiceId, InvoiceStatus};
use levy_infra::projections::InvoiceFilter;

use crate::app::dto;
use crate::app::errors::{ApiError, ApiResult, parse_id};
use crate::app::services::AppServices;
use crate::authz::{self, INVOICES_READ, INVOICES_WRITE};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/invoices", get(list_invoices))
        .route("/invoices/mark-overdue", post(mark_overdue))
        .route("/invoices/by-ocr/:ocr", get(get_invoice_by_ocr))
        .route("/invoices/:id", get(get_invoice))
        .route("/invoices/:id/status", put(set_status))
        .route("/invoices/:id/mark-as-sent", post(mark_as_sent))
        .route("/invoices/:id/cancel", post(cancel_invoice))
}

fn parse_status(raw: &str) -> ApiResult<InvoiceStatus> {
    raw.parse()
        .map_err(|e: levy_core::DomainError| ApiError::bad_request("invalid_status", e.to_string()))
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<dto::InvoiceListQuery>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_READ)?;
    let filter = InvoiceFilter {
        status: query.status.as_deref().map(parse_status).transpose()?,
        property_id: query.property_id.as_deref().map(|id| parse_id(id, "property")).transpose()?,
        billing_id: query.billing_id.as_deref().map(|id| parse_id(id, "billing")).transpose()?,
    };
    let items = services.billing.invoices(&filter).iter().map(dto::invoice_to_json).collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_READ)?;
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    let invoice = services.billing.invoice(invoice_id)?;
    Ok(Json(dto::invoice_to_json(&invoice)).into_response())
}

pub async fn get_invoice_by_ocr(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(ocr): Path<String>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_READ)?;
    let invoice = services.billing.invoice_by_ocr(&ocr)?;
    Ok(Json(dto::invoice_to_json(&invoice)).into_response())
}

pub async fn set_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetStatusRequest>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_WRITE)?;
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    let target = parse_status(&body.status)?;
    let today = body.date.unwrap_or_else(|| Utc::now().date_naive());
    let invoice = services.billing.set_status(invoice_id, target, today)?;
    Ok(Json(dto::invoice_to_json(&invoice)).into_response())
}

pub async fn mark_as_sent(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_WRITE)?;
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    let invoice = services.billing.mark_as_sent(invoice_id)?;
    Ok(Json(dto::invoice_to_json(&invoice)).into_response())
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelInvoiceRequest>>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_WRITE)?;
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    let reason = body.and_then(|Json(b)| b.reason);
    let invoice = services.billing.cancel(invoice_id, reason)?;
    Ok(Json(dto::invoice_to_json(&invoice)).into_response())
}

/// Sweep every open invoice due before `date` (default: today) to OVERDUE.
pub async fn mark_overdue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<dto::MarkOverdueQuery>,
) -> ApiResult {
    authz::require_permission(&ctx, INVOICES_WRITE)?;
    let today = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let sweep = services.billing.mark_overdue_invoices(today);
    Ok(Json(dto::overdue_sweep_to_json(&sweep)).into_response())
}
