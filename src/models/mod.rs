use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// A course module and the object key of its learning material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Module {
    pub uid: Uuid,
    pub name: String,
    pub description: String,
    pub module_materials: Vec<String>,
    /// Object key in the module bucket.
    pub file: Option<String>,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Text fields of a create or update form.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct ModuleDraft {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Module name must be between 1 and 255 characters"
    ))]
    pub name: String,
    #[validate(length(max = 4096, message = "Description is too long"))]
    pub description: String,
    pub module_materials: Vec<String>,
}

/// Multipart body of `POST /v1/modules/create`, for the API document only.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct CreateModuleForm {
    pub name: String,
    pub description: Option<String>,
    /// JSON array or comma separated list.
    pub module_materials: Option<String>,
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Multipart body of `PUT /v1/modules/{uid}`, for the API document only.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UpdateModuleForm {
    pub name: String,
    pub description: Option<String>,
    pub module_materials: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    pub new_file: Option<Vec<u8>>,
}
