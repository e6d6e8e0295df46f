#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{
    AgentIdentity, AssignConversationRequest, CacheStats, Channel, ChannelCount, ClientMessage,
    ConversationDetail, ConversationListResponse, ConversationStatus, ConversationSummary,
    CreateNoteRequest, CreateTemplateRequest, CustomerSummary, DashboardStats,
    InvalidateCacheRequest, InvalidateCacheResponse, MessageDirection, MessageView, Note,
    OpsStats, RealtimeStats, SendMessageRequest, ServerEvent, StatusBreakdown, Template,
    UpdateConversationStatusRequest, UpdateUserRoleRequest, UserRole, UserSummary,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::http::problem::ProblemDetails;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "OmniDesk API",
        version = "1.0.0",
        description = "Agent-facing API of the OmniDesk customer service desk"
    ),
    paths(
        crate::handlers::identity::get_me,
        crate::handlers::conversations::list_conversations,
        crate::handlers::conversations::get_conversation,
        crate::handlers::conversations::update_conversation_status,
        crate::handlers::conversations::assign_conversation,
        crate::handlers::messages::list_messages,
        crate::handlers::messages::send_message,
        crate::handlers::notes::list_notes,
        crate::handlers::notes::create_note,
        crate::handlers::templates::list_templates,
        crate::handlers::templates::create_template,
        crate::handlers::templates::delete_template,
        crate::handlers::analytics::dashboard,
        crate::handlers::admin::list_users,
        crate::handlers::admin::update_user_role,
        crate::handlers::admin::cache_stats,
        crate::handlers::admin::invalidate_cache,
        crate::handlers::realtime::ws_handler,
    ),
    components(
        schemas(
            AgentIdentity,
            UserRole,
            UserSummary,
            UpdateUserRoleRequest,
            Channel,
            ConversationStatus,
            CustomerSummary,
            ConversationSummary,
            ConversationListResponse,
            ConversationDetail,
            UpdateConversationStatusRequest,
            AssignConversationRequest,
            MessageDirection,
            MessageView,
            SendMessageRequest,
            Note,
            CreateNoteRequest,
            Template,
            CreateTemplateRequest,
            StatusBreakdown,
            ChannelCount,
            DashboardStats,
            CacheStats,
            RealtimeStats,
            OpsStats,
            InvalidateCacheRequest,
            InvalidateCacheResponse,
            ServerEvent,
            ClientMessage,
            ProblemDetails,
        )
    ),
    modifiers(&SessionSecurity),
    tags(
        (name = "Identity", description = "The calling agent"),
        (name = "Conversations", description = "Company inbox and conversation state"),
        (name = "Messages", description = "Conversation transcripts and outbound replies"),
        (name = "Notes", description = "Internal notes visible to agents only"),
        (name = "Templates", description = "Canned replies"),
        (name = "Analytics", description = "Dashboard aggregates"),
        (name = "Admin", description = "User management and cache operations"),
        (name = "Realtime", description = "WebSocket notifications")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by every protected operation.
struct SessionSecurity;

impl Modify for SessionSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some("Opaque session token issued at sign-in"))
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/me",
            "/api/conversations",
            "/api/conversations/{conversation_id}",
            "/api/conversations/{conversation_id}/status",
            "/api/conversations/{conversation_id}/assign",
            "/api/conversations/{conversation_id}/messages",
            "/api/conversations/{conversation_id}/notes",
            "/api/templates",
            "/api/templates/{template_id}",
            "/api/analytics/dashboard",
            "/api/admin/users",
            "/api/admin/users/{user_id}/role",
            "/api/admin/cache/stats",
            "/api/admin/cache/invalidate",
            "/ws",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer"));
        assert!(components.schemas.contains_key("ServerEvent"));
        assert!(components.schemas.contains_key("ProblemDetails"));
    }

    #[test]
    fn document_renders_as_yaml() {
        let yaml = ApiDoc::openapi().to_yaml().expect("yaml");
        assert!(yaml.contains("OmniDesk API"));
    }
}
