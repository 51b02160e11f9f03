//! Billing runs. Administrative: every route requires the admin role.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use levy_auth::Role;
use levy_billing::{BillingId, BillingTerms};
use levy_infra::services::BillingChanges;

use crate::app::dto;
use crate::app::errors::{ApiResult, parse_id};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/billings", get(list_billings).post(create_billing))
        .route("/billings/:id", get(get_billing).put(update_billing).delete(delete_billing))
        .route("/billings/:id/generate-invoices", post(generate_invoices))
        .route("/billings/:id/invoices", get(billing_invoices))
}

fn admin(ctx: &RequestContext) -> Result<(), levy_auth::AuthzError> {
    authz::require_role(ctx, &Role::ADMIN)
}

pub async fn list_billings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult {
    admin(&ctx)?;
    let items = services.billing.billings().iter().map(dto::billing_to_json).collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn create_billing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<dto::CreateBillingQuery>,
    Json(terms): Json<BillingTerms>,
) -> ApiResult {
    admin(&ctx)?;
    let billing = services.billing.create_billing(terms, query.generate_invoices)?;

    let mut body = dto::billing_to_json(&billing);
    if billing.invoices_generated {
        let invoices = services.billing.billing_invoices(billing.billing_id)?;
        body["invoices"] = json!(invoices.iter().map(dto::invoice_to_json).collect::<Vec<_>>());
    }
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn get_billing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    admin(&ctx)?;
    let billing_id: BillingId = parse_id(&id, "billing")?;
    let billing = services.billing.billing(billing_id)?;
    Ok(Json(dto::billing_to_json(&billing)).into_response())
}

pub async fn update_billing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(changes): Json<BillingChanges>,
) -> ApiResult {
    admin(&ctx)?;
    let billing_id: BillingId = parse_id(&id, "billing")?;
    let billing = services.billing.update_billing(billing_id, &changes)?;
    Ok(Json(dto::billing_to_json(&billing)).into_response())
}

pub async fn delete_billing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    admin(&ctx)?;
    let billing_id: BillingId = parse_id(&id, "billing")?;
    services.billing.delete_billing(billing_id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn generate_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    admin(&ctx)?;
    let billing_id: BillingId = parse_id(&id, "billing")?;
    let report = services.billing.generate_invoices(billing_id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "billing": dto::billing_to_json(&report.billing),
            "invoices": report.invoices.iter().map(dto::invoice_to_json).collect::<Vec<_>>(),
        })),
    )
        .into_response())
}

pub async fn billing_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    admin(&ctx)?;
    let billing_id: BillingId = parse_id(&id, "billing")?;
    let items = services
        .billing
        .billing_invoices(billing_id)?
        .iter()
        .map(dto::invoice_to_json)
        .collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })).into_response())
}
