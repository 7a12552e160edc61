pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::module_service::{ModuleRepository, ModuleService};
use crate::services::relay::{DownloadRelay, UrlResolver};
use crate::services::staging::UploadPipeline;
use crate::services::storage::Gateway;
use axum::{
    Router,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::modules::create_module,
        api::handlers::modules::get_module,
        api::handlers::modules::update_module,
        api::handlers::modules::delete_module,
        api::handlers::modules::download_file,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            models::Module,
            models::CreateModuleForm,
            models::UpdateModuleForm,
            api::handlers::health::HealthResponse,
        )
    ),
    modifiers(&JwtAddon),
    tags(
        (name = "modules", description = "Course modules and their files"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

struct JwtAddon;

impl utoipa::Modify for JwtAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub pipeline: UploadPipeline,
    pub relay: DownloadRelay,
    pub modules: ModuleService,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        gateway: Gateway,
        resolver: Arc<dyn UrlResolver>,
        repository: Arc<dyn ModuleRepository>,
        config: AppConfig,
    ) -> Self {
        let pipeline = UploadPipeline::new(
            gateway.clone(),
            config.staging_dir.clone(),
            config.module_folder.clone(),
            config.max_multipart_size,
        );
        let relay = DownloadRelay::new(
            gateway.clone(),
            resolver,
            config.module_folder.clone(),
            config.presign_ttl,
        );

        Self {
            gateway,
            pipeline,
            relay,
            modules: ModuleService::new(repository),
            config,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_multipart_size).unwrap_or(usize::MAX);

    let protected = Router::new()
        .route("/v1/modules/create", post(api::handlers::modules::create_module))
        .route(
            "/v1/modules/:uid",
            get(api::handlers::modules::get_module)
                .put(api::handlers::modules::update_module)
                .delete(api::handlers::modules::delete_module),
        )
        .route(
            "/modules/download/file",
            get(api::handlers::modules::download_file),
        )
        .layer(from_fn_with_state(
            state.clone(),
            api::middleware::auth::auth_middleware,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .merge(protected)
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
