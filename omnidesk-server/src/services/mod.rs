//! Domain services. Database-backed services are cheap to construct per
//! request from the shared pool; the hub and the cache live for the whole
//! process.
pub mod analytics_service;
pub mod change_notifier;
pub mod conversation_service;
pub mod error;
pub mod message_service;
pub mod note_service;
pub mod notification_hub;
pub mod query_cache;
pub mod template_service;
pub mod user_service;
