use actix_web::web;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::RequestStatus;
use crate::feed::{ChangeOp, EntityKind};
use crate::handlers;
use crate::handlers::feed::ResyncNotice;
use crate::models::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::request::submit_request,
        handlers::request::list_requests,
        handlers::request::get_request,
        handlers::request::activate_request,
        handlers::request::mark_sms_sent,
        handlers::request::request_additional_sms,
        handlers::request::submit_sms_code,
        handlers::request::complete_request,
        handlers::credential::list_credentials,
        handlers::credential::create_credential,
        handlers::credential::get_credential,
        handlers::credential::update_credential,
        handlers::credential::delete_credential,
        handlers::feed::feed_ws,
    ),
    components(
        schemas(
            RequestStatus,
            Transition,
            SubmitRequest,
            SubmitSmsCodeRequest,
            RequestQuery,
            RequestResponse,
            CreateCredentialRequest,
            UpdateCredentialRequest,
            CredentialQuery,
            CredentialResponse,
            EntityKind,
            ChangeOp,
            ResyncNotice,
            ApiError,
        )
    ),
    tags(
        (name = "request", description = "Request lifecycle API"),
        (name = "credential", description = "Credential management API"),
        (name = "feed", description = "Change feed WebSocket"),
    ),
    info(
        title = "Relay Backend API",
        version = "1.0.0",
        description = "SMS relay credential and request lifecycle REST API documentation"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
