use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};

use levy_auth::Role;
use levy_billing::Association;
use levy_core::PropertyId;
use levy_infra::services::PropertyRemoval;

use crate::app::dto;
use crate::app::errors::{ApiResult, parse_id};
use crate::app::services::AppServices;
use crate::authz::{self, DIRECTORY_READ};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/association", get(get_association).put(update_association))
        .route("/owners", get(list_owners).post(create_owner))
        .route("/properties", get(list_properties).post(create_property))
        .route("/properties/:id", delete(delete_property))
}

pub async fn get_association(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult {
    authz::require_role(&ctx, &Role::ADMIN)?;
    Ok(Json(services.billing.association()).into_response())
}

pub async fn update_association(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<Association>,
) -> ApiResult {
    authz::require_role(&ctx, &Role::ADMIN)?;
    let association = services.billing.update_association(body)?;
    Ok(Json(association).into_response())
}

pub async fn list_owners(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult {
    authz::require_permission(&ctx, DIRECTORY_READ)?;
    Ok(Json(serde_json::json!({ "items": services.billing.owners() })).into_response())
}

pub async fn create_owner(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<dto::CreateOwnerRequest>,
) -> ApiResult {
    authz::require_role(&ctx, &Role::ADMIN)?;
    let owner = services.billing.add_owner(body.into_owner())?;
    Ok((StatusCode::CREATED, Json(owner)).into_response())
}

pub async fn list_properties(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult {
    authz::require_permission(&ctx, DIRECTORY_READ)?;
    Ok(Json(serde_json::json!({ "items": services.billing.properties() })).into_response())
}

pub async fn create_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<dto::CreatePropertyRequest>,
) -> ApiResult {
    authz::require_role(&ctx, &Role::ADMIN)?;
    let property = services.billing.add_property(body.into_property())?;
    Ok((StatusCode::CREATED, Json(property)).into_response())
}

pub async fn delete_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require_role(&ctx, &Role::ADMIN)?;
    let property_id: PropertyId = parse_id(&id, "property")?;
    let response = match services.billing.delete_property(property_id)? {
        PropertyRemoval::Deleted => StatusCode::NO_CONTENT.into_response(),
        PropertyRemoval::Deactivated => Json(serde_json::json!({
            "id": property_id.to_string(),
            "deactivated": true,
        }))
        .into_response(),
    };
    Ok(response)
}
