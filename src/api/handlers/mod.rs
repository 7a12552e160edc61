pub mod health;
pub mod modules;
