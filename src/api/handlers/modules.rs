use crate::AppState;
use crate::api::error::AppError;
use crate::models::{CreateModuleForm, Module, ModuleDraft, UpdateModuleForm};
use crate::services::staging::FilePart;
use crate::services::{content_type, storage::OperationScope};
use crate::utils::auth::UserData;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Deserialize, IntoParams)]
pub struct DownloadQuery {
    /// Object key, or a bare file name under the module folder
    pub object_name: Option<String>,
}

fn request_scope(state: &AppState) -> OperationScope {
    OperationScope::with_timeout(state.config.operation_timeout)
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[utoipa::path(
    post,
    path = "/v1/modules/create",
    request_body(content = CreateModuleForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Module created", body = Module),
        (status = 400, description = "Missing or invalid form field"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Multipart body too large")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "modules"
)]
pub async fn create_module(
    State(state): State<AppState>,
    user: UserData,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Module>), AppError> {
    let scope = request_scope(&state);
    let _guard = scope.cancel_on_drop();

    let form = state
        .pipeline
        .receive(
            declared_length(&headers),
            &mut multipart,
            "file",
            FilePart::Required,
        )
        .await?;

    // The staged file goes away with `form` if the fields are rejected.
    let draft = ModuleDraft::from_form(&form)?;
    let published = state.pipeline.publish(&scope, form).await?;

    let module = state
        .modules
        .create(draft, published.map(|o| o.key), &user)
        .await?;

    Ok((StatusCode::CREATED, Json(module)))
}

#[utoipa::path(
    get,
    path = "/v1/modules/{uid}",
    params(
        ("uid" = Uuid, Path, description = "Module ID")
    ),
    responses(
        (status = 200, description = "Module", body = Module),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Module not found")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "modules"
)]
pub async fn get_module(
    State(state): State<AppState>,
    _user: UserData,
    Path(uid): Path<Uuid>,
) -> Result<Json<Module>, AppError> {
    Ok(Json(state.modules.get(uid).await?))
}

#[utoipa::path(
    put,
    path = "/v1/modules/{uid}",
    params(
        ("uid" = Uuid, Path, description = "Module ID")
    ),
    request_body(content = UpdateModuleForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Module updated", body = Module),
        (status = 400, description = "Invalid form field"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Module not found"),
        (status = 413, description = "Multipart body too large")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "modules"
)]
pub async fn update_module(
    State(state): State<AppState>,
    user: UserData,
    Path(uid): Path<Uuid>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Module>, AppError> {
    // Reject unknown modules before anything is published.
    state.modules.get(uid).await?;

    let scope = request_scope(&state);
    let _guard = scope.cancel_on_drop();

    let form = state
        .pipeline
        .receive(
            declared_length(&headers),
            &mut multipart,
            "new_file",
            FilePart::Optional,
        )
        .await?;

    let draft = ModuleDraft::from_form(&form)?;
    let published = state.pipeline.publish(&scope, form).await?;

    let module = state
        .modules
        .update(uid, draft, published.map(|o| o.key), &user)
        .await?;

    Ok(Json(module))
}

#[utoipa::path(
    delete,
    path = "/v1/modules/{uid}",
    params(
        ("uid" = Uuid, Path, description = "Module ID")
    ),
    responses(
        (status = 204, description = "Module deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Module not found")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "modules"
)]
pub async fn delete_module(
    State(state): State<AppState>,
    user: UserData,
    Path(uid): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.modules.delete(uid, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/modules/download/file",
    params(DownloadQuery),
    responses(
        (status = 200, description = "File content stream"),
        (status = 400, description = "Missing object name"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Object or bucket not found"),
        (status = 502, description = "Object store unavailable")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "modules"
)]
pub async fn download_file(
    State(state): State<AppState>,
    _user: UserData,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let object_name = query
        .object_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("object_name is required".to_string()))?;

    let scope = request_scope(&state);
    let _guard = scope.cancel_on_drop();

    let object = state.relay.open(&scope, &object_name).await?;

    let disposition = content_type::content_disposition(&object.filename, &object.content_type);
    let body = Body::from_stream(ReaderStream::with_capacity(
        object.reader,
        state.config.relay_buffer_size,
    ));

    let mut response = (
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response();

    if let Some(len) = object.content_length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    Ok(response)
}
