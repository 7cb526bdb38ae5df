use actix_web::{HttpResponse, ResponseError, Result, web};

use crate::entities::RequestStatus;
use crate::error::AppResult;
use crate::models::*;
use crate::services::RequestService;

fn respond(result: AppResult<RequestResponse>) -> Result<HttpResponse> {
    match result {
        Ok(request) => Ok(HttpResponse::Ok().json(ApiResponse::success(request))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/requests",
    tag = "request",
    request_body = SubmitRequest,
    responses(
        (status = 201, description = "提交成功，请求进入 pending", body = RequestResponse),
        (status = 400, description = "手机号格式错误或访问码不匹配"),
        (status = 404, description = "手机号未登记"),
        (status = 409, description = "凭证已被使用")
    )
)]
pub async fn submit_request(
    request_service: web::Data<RequestService>,
    body: web::Json<SubmitRequest>,
) -> Result<HttpResponse> {
    match request_service.submit(&body.phone, &body.access_code).await {
        Ok(request) => Ok(HttpResponse::Created().json(ApiResponse::success(request))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/requests",
    tag = "request",
    params(
        ("page" = Option<u64>, Query, description = "页码"),
        ("per_page" = Option<u64>, Query, description = "每页数量"),
        ("status" = Option<RequestStatus>, Query, description = "按状态过滤")
    ),
    responses(
        (status = 200, description = "获取请求列表成功")
    )
)]
pub async fn list_requests(
    request_service: web::Data<RequestService>,
    query: web::Query<RequestQuery>,
) -> Result<HttpResponse> {
    match request_service.list(&query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/requests/{id}",
    tag = "request",
    params(("id" = i64, Path, description = "请求 ID")),
    responses(
        (status = 200, description = "获取请求成功", body = RequestResponse),
        (status = 404, description = "请求不存在")
    )
)]
pub async fn get_request(
    request_service: web::Data<RequestService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    respond(request_service.get(path.into_inner()).await)
}

#[utoipa::path(
    post,
    path = "/requests/{id}/activate",
    tag = "request",
    params(("id" = i64, Path, description = "请求 ID")),
    responses(
        (status = 200, description = "已激活 (重复激活同样成功)", body = RequestResponse),
        (status = 404, description = "请求不存在"),
        (status = 409, description = "当前状态不允许激活")
    )
)]
pub async fn activate_request(
    request_service: web::Data<RequestService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    respond(request_service.activate(path.into_inner()).await)
}

#[utoipa::path(
    post,
    path = "/requests/{id}/sms-sent",
    tag = "request",
    params(("id" = i64, Path, description = "请求 ID")),
    responses(
        (status = 200, description = "工作人员已发送短信", body = RequestResponse),
        (status = 404, description = "请求不存在"),
        (status = 409, description = "请求尚未激活")
    )
)]
pub async fn mark_sms_sent(
    request_service: web::Data<RequestService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    respond(request_service.mark_sms_sent(path.into_inner()).await)
}

#[utoipa::path(
    post,
    path = "/requests/{id}/request-sms",
    tag = "request",
    params(("id" = i64, Path, description = "请求 ID")),
    responses(
        (status = 200, description = "已请求追加短信", body = RequestResponse),
        (status = 404, description = "请求不存在"),
        (status = 409, description = "当前状态不允许请求短信")
    )
)]
pub async fn request_additional_sms(
    request_service: web::Data<RequestService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    respond(request_service.request_additional_sms(path.into_inner()).await)
}

#[utoipa::path(
    post,
    path = "/requests/{id}/sms-code",
    tag = "request",
    params(("id" = i64, Path, description = "请求 ID")),
    request_body = SubmitSmsCodeRequest,
    responses(
        (status = 200, description = "验证码已记录", body = RequestResponse),
        (status = 400, description = "验证码格式错误"),
        (status = 404, description = "请求不存在"),
        (status = 409, description = "请求尚未激活")
    )
)]
pub async fn submit_sms_code(
    request_service: web::Data<RequestService>,
    path: web::Path<i64>,
    body: web::Json<SubmitSmsCodeRequest>,
) -> Result<HttpResponse> {
    respond(
        request_service
            .submit_sms_code(path.into_inner(), &body.code)
            .await,
    )
}

#[utoipa::path(
    post,
    path = "/requests/{id}/complete",
    tag = "request",
    params(("id" = i64, Path, description = "请求 ID")),
    responses(
        (status = 200, description = "请求已完成", body = RequestResponse),
        (status = 404, description = "请求不存在"),
        (status = 409, description = "仅 waiting_for_additional_sms 状态可完成")
    )
)]
pub async fn complete_request(
    request_service: web::Data<RequestService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    respond(request_service.complete(path.into_inner()).await)
}

pub fn request_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/requests")
            .route("", web::post().to(submit_request))
            .route("", web::get().to(list_requests))
            .route("/{id}", web::get().to(get_request))
            .route("/{id}/activate", web::post().to(activate_request))
            .route("/{id}/sms-sent", web::post().to(mark_sms_sent))
            .route("/{id}/request-sms", web::post().to(request_additional_sms))
            .route("/{id}/sms-code", web::post().to(submit_sms_code))
            .route("/{id}/complete", web::post().to(complete_request)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActivationConfig;
    use crate::database::memory_pool;
    use crate::feed::ChangeFeed;
    use crate::services::CredentialService;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::{Value, json};

    async fn services() -> RequestService {
        let pool = memory_pool().await;
        let feed = ChangeFeed::new(16);
        CredentialService::new(pool.clone(), feed.clone())
            .create(CreateCredentialRequest {
                phone: "+15550001111".into(),
                access_code: Some("ABC234".into()),
            })
            .await
            .unwrap();
        RequestService::new(pool, feed, &ActivationConfig::default())
    }

    #[actix_web::test]
    async fn test_relay_cycle_over_http() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(services().await))
                .configure(request_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/requests")
            .set_json(json!({"phone": "+1 555 000 1111", "access_code": "ABC234"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "pending");
        let id = body["data"]["id"].as_i64().unwrap();

        for (step, status) in [("activate", "activated"), ("sms-sent", "sms_sent")] {
            let req = test::TestRequest::post()
                .uri(&format!("/requests/{id}/{step}"))
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["data"]["status"], status);
        }

        let req = test::TestRequest::post()
            .uri(&format!("/requests/{id}/sms-code"))
            .set_json(json!({"code": "482913"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "waiting_for_additional_sms");
        assert_eq!(body["data"]["sms_code"], "482913");

        let req = test::TestRequest::post()
            .uri(&format!("/requests/{id}/complete"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "completed");
    }

    #[actix_web::test]
    async fn test_error_envelopes() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(services().await))
                .configure(request_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/requests")
            .set_json(json!({"phone": "+15550001111", "access_code": "ZZZ999"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "CODE_MISMATCH");

        let req = test::TestRequest::post()
            .uri("/requests/999/complete")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/requests")
            .set_json(json!({"phone": "+15550001111", "access_code": "ABC234"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let id = body["data"]["id"].as_i64().unwrap();

        let req = test::TestRequest::post()
            .uri(&format!("/requests/{id}/complete"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
    }

    #[actix_web::test]
    async fn test_list_filters_by_status() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(services().await))
                .configure(request_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/requests")
            .set_json(json!({"phone": "+15550001111", "access_code": "ABC234"}))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/requests?status=pending")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 1);

        let req = test::TestRequest::get()
            .uri("/requests?status=completed")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 0);
    }

    #[actix_web::test]
    async fn test_huge_page_returns_empty_page() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(services().await))
                .configure(request_config),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/requests?page=18446744073709551615")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["data"].as_array().map(Vec::len), Some(0));
    }
}
