pub mod content_type;
pub mod module_service;
pub mod relay;
pub mod staging;
pub mod storage;
