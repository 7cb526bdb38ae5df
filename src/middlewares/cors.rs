use actix_cors::Cors;

/// 操作员控制台与工作人员页面可能部署在不同域名下
pub fn create_cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_any_header()
        .max_age(3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::{StatusCode, header};
    use actix_web::{App, HttpResponse, test, web};

    #[actix_web::test]
    async fn test_preflight_is_accepted() {
        let app = test::init_service(
            App::new()
                .wrap(create_cors())
                .route("/requests", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/requests")
            .insert_header((header::ORIGIN, "http://operator.local"))
            .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "POST"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }
}
