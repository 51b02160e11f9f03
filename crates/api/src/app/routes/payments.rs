use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use levy_billing::{InvoiceId, PaymentType};
use levy_core::PaymentId;
use levy_infra::projections::PaymentFilter;

use crate::app::dto;
use crate::app::errors::{ApiError, ApiResult, parse_id};
use crate::app::services::AppServices;
use crate::authz::{self, PAYMENTS_READ, PAYMENTS_WRITE};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/invoices/:id/payments", get(list_invoice_payments).post(register_payment))
        .route("/payments", get(list_payments))
        .route("/payments/by-ocr", post(register_payment_by_ocr))
        .route("/payments/import", post(import_payments))
        .route("/payments/:id", get(get_payment).put(update_payment).delete(delete_payment))
}

pub async fn list_invoice_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require_permission(&ctx, PAYMENTS_READ)?;
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    let items = services
        .billing
        .invoice_payments(invoice_id)?
        .iter()
        .map(dto::payment_to_json)
        .collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn register_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PaymentRequest>,
) -> ApiResult {
    authz::require_permission(&ctx, PAYMENTS_WRITE)?;
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    let payment = services
        .billing
        .register_payment(invoice_id, body.into_new_payment(Utc::now().date_naive()))?;
    let invoice = services.billing.invoice(invoice_id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "payment": dto::payment_rm_to_json(&payment),
            "invoice": dto::invoice_to_json(&invoice),
        })),
    )
        .into_response())
}

pub async fn register_payment_by_ocr(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<dto::OcrPaymentRequest>,
) -> ApiResult {
    authz::require_permission(&ctx, PAYMENTS_WRITE)?;
    let (ocr, payment) = body.split(Utc::now().date_naive());
    let payment = services.billing.register_payment_by_ocr(&ocr, payment)?;
    let invoice = services.billing.invoice(payment.invoice_id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "payment": dto::payment_rm_to_json(&payment),
            "invoice": dto::invoice_to_json(&invoice),
        })),
    )
        .into_response())
}

pub async fn list_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<dto::PaymentListQuery>,
) -> ApiResult {
    authz::require_permission(&ctx, PAYMENTS_READ)?;
    let payment_type = query
        .payment_type
        .as_deref()
        .map(|t| {
            t.parse::<PaymentType>()
                .map_err(|e| ApiError::bad_request("invalid_payment_type", e.to_string()))
        })
        .transpose()?;
    let filter = PaymentFilter {
        from: query.from,
        to: query.to,
        payment_type,
    };
    let items = services.billing.payments(&filter).iter().map(dto::payment_rm_to_json).collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn get_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require_permission(&ctx, PAYMENTS_READ)?;
    let payment_id: PaymentId = parse_id(&id, "payment")?;
    let payment = services.billing.payment(payment_id)?;
    Ok(Json(dto::payment_rm_to_json(&payment)).into_response())
}

pub async fn update_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PaymentRequest>,
) -> ApiResult {
    authz::require_permission(&ctx, PAYMENTS_WRITE)?;
    let payment_id: PaymentId = parse_id(&id, "payment")?;
    let payment = services
        .billing
        .update_payment(payment_id, body.into_new_payment(Utc::now().date_naive()))?;
    let invoice = services.billing.invoice(payment.invoice_id)?;
    Ok(Json(json!({
        "payment": dto::payment_rm_to_json(&payment),
        "invoice": dto::invoice_to_json(&invoice),
    }))
    .into_response())
}

pub async fn delete_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require_permission(&ctx, PAYMENTS_WRITE)?;
    let payment_id: PaymentId = parse_id(&id, "payment")?;
    let invoice = services.billing.delete_payment(payment_id)?;
    Ok(Json(json!({ "invoice": dto::invoice_to_json(&invoice) })).into_response())
}

/// Bank file upload: multipart form with the file in field `file`.
pub async fn import_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    mut multipart: Multipart,
) -> ApiResult {
    authz::require_permission(&ctx, PAYMENTS_WRITE)?;

    let mut contents = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("invalid_multipart", e.body_text()))?
    {
        if field.name() == Some("file") {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request("invalid_file", e.body_text()))?;
            contents = Some(text);
            break;
        }
    }
    let contents = contents.ok_or_else(|| ApiError::bad_request("missing_file", "multipart field 'file' is required"))?;

    // Rows are applied one by one under the ledger locks; keep that off the runtime workers.
    let billing = services.billing.clone();
    let report = tokio::task::spawn_blocking(move || billing.import_payments_csv(&contents))
        .await
        .map_err(|e| ApiError::from(levy_infra::ServiceError::Internal(format!("payment import task failed: {e}"))))?;
    Ok(Json(dto::import_report_to_json(&report)).into_response())
}
