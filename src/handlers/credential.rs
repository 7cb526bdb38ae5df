use actix_web::{HttpResponse, ResponseError, Result, web};
use serde_json::json;

use crate::models::*;
use crate::services::CredentialService;

#[utoipa::path(
    get,
    path = "/credentials",
    tag = "credential",
    params(
        ("page" = Option<u64>, Query, description = "页码"),
        ("per_page" = Option<u64>, Query, description = "每页数量"),
        ("is_used" = Option<bool>, Query, description = "是否已使用")
    ),
    responses(
        (status = 200, description = "获取凭证列表成功")
    )
)]
pub async fn list_credentials(
    credential_service: web::Data<CredentialService>,
    query: web::Query<CredentialQuery>,
) -> Result<HttpResponse> {
    match credential_service.list(&query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/credentials",
    tag = "credential",
    request_body = CreateCredentialRequest,
    responses(
        (status = 201, description = "创建凭证成功", body = CredentialResponse),
        (status = 400, description = "手机号或访问码格式错误"),
        (status = 409, description = "该手机号已存在相同访问码")
    )
)]
pub async fn create_credential(
    credential_service: web::Data<CredentialService>,
    body: web::Json<CreateCredentialRequest>,
) -> Result<HttpResponse> {
    match credential_service.create(body.into_inner()).await {
        Ok(credential) => Ok(HttpResponse::Created().json(ApiResponse::success(credential))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/credentials/{id}",
    tag = "credential",
    params(("id" = i64, Path, description = "凭证 ID")),
    responses(
        (status = 200, description = "获取凭证成功", body = CredentialResponse),
        (status = 404, description = "凭证不存在")
    )
)]
pub async fn get_credential(
    credential_service: web::Data<CredentialService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    match credential_service.get(path.into_inner()).await {
        Ok(credential) => Ok(HttpResponse::Ok().json(ApiResponse::success(credential))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    put,
    path = "/credentials/{id}",
    tag = "credential",
    params(("id" = i64, Path, description = "凭证 ID")),
    request_body = UpdateCredentialRequest,
    responses(
        (status = 200, description = "更新凭证成功", body = CredentialResponse),
        (status = 404, description = "凭证不存在"),
        (status = 409, description = "该手机号已存在相同访问码")
    )
)]
pub async fn update_credential(
    credential_service: web::Data<CredentialService>,
    path: web::Path<i64>,
    body: web::Json<UpdateCredentialRequest>,
) -> Result<HttpResponse> {
    match credential_service
        .update(path.into_inner(), body.into_inner())
        .await
    {
        Ok(credential) => Ok(HttpResponse::Ok().json(ApiResponse::success(credential))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    delete,
    path = "/credentials/{id}",
    tag = "credential",
    params(("id" = i64, Path, description = "凭证 ID")),
    responses(
        (status = 200, description = "删除凭证成功"),
        (status = 404, description = "凭证不存在"),
        (status = 409, description = "凭证已有请求记录")
    )
)]
pub async fn delete_credential(
    credential_service: web::Data<CredentialService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    match credential_service.delete(id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "id": id })))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn credential_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/credentials")
            .route("", web::get().to(list_credentials))
            .route("", web::post().to(create_credential))
            .route("/{id}", web::get().to(get_credential))
            .route("/{id}", web::put().to(update_credential))
            .route("/{id}", web::delete().to(delete_credential)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_pool;
    use crate::feed::ChangeFeed;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_credential_crud() {
        let service = CredentialService::new(memory_pool().await, ChangeFeed::new(16));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service))
                .configure(credential_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/credentials")
            .set_json(json!({"phone": "+4917600000000"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["is_used"], false);
        assert_eq!(body["data"]["access_code"].as_str().unwrap().len(), 6);
        let id = body["data"]["id"].as_i64().unwrap();

        let req = test::TestRequest::put()
            .uri(&format!("/credentials/{id}"))
            .set_json(json!({"phone": "+4917600000000", "access_code": "NEW234"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["access_code"], "NEW234");

        let req = test::TestRequest::get()
            .uri("/credentials?is_used=false")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 1);

        let req = test::TestRequest::delete()
            .uri(&format!("/credentials/{id}"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/credentials/{id}"))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[actix_web::test]
    async fn test_duplicate_pair_is_conflict() {
        let service = CredentialService::new(memory_pool().await, ChangeFeed::new(16));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service))
                .configure(credential_config),
        )
        .await;

        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let req = test::TestRequest::post()
                .uri("/credentials")
                .set_json(json!({"phone": "+4917600000000", "access_code": "ABC234"}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected);
        }
    }
}
