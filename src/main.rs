use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter

use relay_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    feed::ChangeFeed,
    handlers,
    middlewares::create_cors,
    services::*,
    swagger::swagger_config,
    tasks,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml().expect("Failed to load configuration");

    // 创建数据库连接池
    let pool = create_pool(&config.database)
        .await
        .expect("Failed to create database connection pool");

    // 运行数据库迁移
    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    // 变更推送
    let feed = ChangeFeed::new(config.feed.channel_capacity);

    // 创建服务
    let credential_service = CredentialService::new(pool.clone(), feed.clone());
    let request_service = RequestService::new(pool.clone(), feed.clone(), &config.activation);
    let activation_service = ActivationService::new(
        pool.clone(),
        request_service.clone(),
        config.activation.clone(),
    );

    // 启动后台任务
    tasks::spawn_all(activation_service);

    // 启动HTTP服务器
    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .app_data(web::Data::new(credential_service.clone()))
            .app_data(web::Data::new(request_service.clone()))
            .app_data(web::Data::new(feed.clone()))
            .configure(swagger_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::credential_config)
                    .configure(handlers::request_config)
                    .configure(handlers::feed_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
