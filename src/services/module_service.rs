use crate::api::error::AppError;
use crate::models::{Module, ModuleDraft};
use crate::services::staging::UploadForm;
use crate::utils::auth::UserData;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Persistence seam for modules.
#[async_trait]
pub trait ModuleRepository: Send + Sync {
    async fn insert(&self, module: Module) -> Result<(), AppError>;
    async fn get(&self, uid: Uuid) -> Result<Option<Module>, AppError>;
    async fn update(&self, module: Module) -> Result<(), AppError>;
    /// `Ok(false)` when nothing was stored under `uid`.
    async fn delete(&self, uid: Uuid) -> Result<bool, AppError>;
}

#[derive(Default)]
pub struct InMemoryModuleRepository {
    modules: DashMap<Uuid, Module>,
}

impl InMemoryModuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModuleRepository for InMemoryModuleRepository {
    async fn insert(&self, module: Module) -> Result<(), AppError> {
        self.modules.insert(module.uid, module);
        Ok(())
    }

    async fn get(&self, uid: Uuid) -> Result<Option<Module>, AppError> {
        Ok(self.modules.get(&uid).map(|m| m.value().clone()))
    }

    async fn update(&self, module: Module) -> Result<(), AppError> {
        match self.modules.get_mut(&module.uid) {
            Some(mut existing) => {
                *existing = module;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Module {} not found", module.uid))),
        }
    }

    async fn delete(&self, uid: Uuid) -> Result<bool, AppError> {
        Ok(self.modules.remove(&uid).is_some())
    }
}

/// Accepts a JSON array (`["a","b"]`) or a comma separated list (`a, b`).
pub fn parse_module_materials(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    if let Some(items) = raw
        .starts_with('[')
        .then(|| serde_json::from_str::<Vec<String>>(raw).ok())
        .flatten()
    {
        return items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    raw.split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ModuleDraft {
    /// Collects and validates the text fields of an upload form.
    pub fn from_form(form: &UploadForm) -> Result<Self, AppError> {
        let draft = Self {
            name: form.field("name").unwrap_or_default().trim().to_string(),
            description: form.field("description").unwrap_or_default().to_string(),
            module_materials: parse_module_materials(
                form.field("module_materials").unwrap_or_default(),
            ),
        };
        draft.validate()?;
        Ok(draft)
    }
}

#[derive(Clone)]
pub struct ModuleService {
    repo: Arc<dyn ModuleRepository>,
}

impl ModuleService {
    pub fn new(repo: Arc<dyn ModuleRepository>) -> Self {
        Self { repo }
    }

    pub async fn create(
        &self,
        draft: ModuleDraft,
        file: Option<String>,
        actor: &UserData,
    ) -> Result<Module, AppError> {
        let now = Utc::now();
        let module = Module {
            uid: Uuid::new_v4(),
            name: draft.name,
            description: draft.description,
            module_materials: draft.module_materials,
            file,
            created_by: actor.user_uuid,
            updated_by: None,
            created_at: now,
            updated_at: now,
        };

        self.repo.insert(module.clone()).await?;
        tracing::info!(
            "Module {} created by {} (role {})",
            module.uid,
            actor.user_uuid,
            actor.role_uuid
        );
        Ok(module)
    }

    pub async fn get(&self, uid: Uuid) -> Result<Module, AppError> {
        self.repo
            .get(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Module {} not found", uid)))
    }

    /// Replaces the text fields; the file key changes only when a new one is given.
    pub async fn update(
        &self,
        uid: Uuid,
        draft: ModuleDraft,
        file: Option<String>,
        actor: &UserData,
    ) -> Result<Module, AppError> {
        let mut module = self.get(uid).await?;
        module.name = draft.name;
        module.description = draft.description;
        module.module_materials = draft.module_materials;
        if file.is_some() {
            module.file = file;
        }
        module.updated_by = Some(actor.user_uuid);
        module.updated_at = Utc::now();

        self.repo.update(module.clone()).await?;
        tracing::info!(
            "Module {} updated by {} (role {})",
            uid,
            actor.user_uuid,
            actor.role_uuid
        );
        Ok(module)
    }

    pub async fn delete(&self, uid: Uuid, actor: &UserData) -> Result<(), AppError> {
        if !self.repo.delete(uid).await? {
            return Err(AppError::NotFound(format!("Module {} not found", uid)));
        }
        tracing::info!(
            "Module {} deleted by {} (role {})",
            uid,
            actor.user_uuid,
            actor.role_uuid
        );
        Ok(())
    }
}
