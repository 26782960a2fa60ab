pub mod auth;
pub mod core;
pub mod dashboard;
pub mod notifications;
pub mod reviews;
pub mod sections;
pub mod students;
pub mod teachers;
