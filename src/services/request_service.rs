use crate::config::ActivationConfig;
use crate::entities::{RequestStatus, credential_entity as credentials, request_entity as requests};
use crate::error::{AppError, AppResult};
use crate::feed::ChangeFeed;
use crate::models::*;
use crate::services::activation_service::schedule_activation;
use crate::services::credential_service::{lease_credential, validate_pair};
use crate::utils::parse_phone;
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};

const SMS_CODE_MAX_LEN: usize = 32;

/// 状态迁移结果
enum Outcome {
    Applied(requests::Model),
    Unchanged(requests::Model),
}

#[derive(Clone)]
pub struct RequestService {
    pool: DatabaseConnection,
    feed: ChangeFeed,
    activation_delay: Duration,
}

impl RequestService {
    pub fn new(pool: DatabaseConnection, feed: ChangeFeed, activation: &ActivationConfig) -> Self {
        Self {
            pool,
            feed,
            activation_delay: Duration::seconds(activation.delay_secs),
        }
    }

    /// 工作人员提交凭证
    ///
    /// 逻辑 (单个事务):
    /// 1. 按 (phone, access_code) 校验凭证
    /// 2. 原子租用 (update where is_used = false)
    /// 3. 创建 Pending 请求
    /// 4. 写入激活任务 (due_at = now + delay)
    ///
    /// 任一步失败整体回滚，不会出现一个凭证对应两个请求。
    pub async fn submit(&self, phone: &str, access_code: &str) -> AppResult<RequestResponse> {
        let access_code = access_code.trim();
        if access_code.is_empty() {
            return Err(AppError::ValidationError("Access code is required".into()));
        }
        let phone = parse_phone(phone)?;
        let now = Utc::now();

        let txn = self.pool.begin().await?;
        let credential = validate_pair(&txn, &phone, access_code).await?;
        let (request, leased) = self.open_request(&txn, &credential, now).await?;
        txn.commit().await?;

        log::info!(
            "Request {} created for credential {} ({})",
            request.id,
            credential.id,
            phone
        );
        let resp = RequestResponse::from(request);
        self.feed.updated(CredentialResponse::from(leased));
        self.feed.inserted(resp.clone());
        Ok(resp)
    }

    /// 租用凭证、创建 Pending 请求并写入激活任务
    ///
    /// 租用失败 (被其他提交抢先) 返回 Conflict，调用方回滚事务后不会留下请求或任务。
    async fn open_request<C: ConnectionTrait>(
        &self,
        conn: &C,
        credential: &credentials::Model,
        now: DateTime<Utc>,
    ) -> AppResult<(requests::Model, credentials::Model)> {
        lease_credential(conn, credential.id, now).await?;

        let request = requests::ActiveModel {
            credential_id: Set(credential.id),
            status: Set(RequestStatus::Pending),
            sms_code: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        schedule_activation(conn, request.id, now + self.activation_delay, now).await?;

        let leased = credentials::Entity::find_by_id(credential.id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::InternalError("Leased credential disappeared".into()))?;
        Ok((request, leased))
    }

    /// Pending -> Activated；已激活时重复调用直接返回
    pub async fn activate(&self, id: i64) -> AppResult<RequestResponse> {
        self.transition(id, Transition::Activate, None).await
    }

    pub async fn mark_sms_sent(&self, id: i64) -> AppResult<RequestResponse> {
        self.transition(id, Transition::MarkSmsSent, None).await
    }

    /// 需要新一轮验证码；保留上一次的 sms_code
    pub async fn request_additional_sms(&self, id: i64) -> AppResult<RequestResponse> {
        self.transition(id, Transition::RequestAdditionalSms, None)
            .await
    }

    /// 写入操作员转录的验证码，已完成的请求也会被重新打开
    pub async fn submit_sms_code(&self, id: i64, code: &str) -> AppResult<RequestResponse> {
        let code = normalize_sms_code(code)?;
        self.transition(id, Transition::SubmitSmsCode, Some(code))
            .await
    }

    pub async fn complete(&self, id: i64) -> AppResult<RequestResponse> {
        self.transition(id, Transition::Complete, None).await
    }

    /// 定时任务使用：只有仍处于 Pending 时才激活
    ///
    /// 返回 true 表示本次完成了激活；请求已离开 Pending 时返回 false。
    pub async fn activate_if_pending(&self, id: i64) -> AppResult<bool> {
        match apply_transition(&self.pool, id, Transition::Activate, None).await {
            Ok(Outcome::Applied(model)) => {
                log::info!("Request {id} activated by schedule");
                self.feed.updated(RequestResponse::from(model));
                Ok(true)
            }
            Ok(Outcome::Unchanged(_)) | Err(AppError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: i64) -> AppResult<RequestResponse> {
        let model = requests::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Request {id} not found")))?;
        Ok(model.into())
    }

    /// 分页获取请求 (最新在前)
    pub async fn list(&self, query: &RequestQuery) -> AppResult<PaginatedResponse<RequestResponse>> {
        let params = PaginationParams::new(query.page, query.per_page);

        let mut base_query = requests::Entity::find();
        if let Some(status) = query.status {
            base_query = base_query.filter(requests::Column::Status.eq(status));
        }

        let total = base_query.clone().count(&self.pool).await?;
        let items = base_query
            .order_by_desc(requests::Column::CreatedAt)
            .order_by_desc(requests::Column::Id)
            .limit(params.per_page())
            .offset(params.offset())
            .all(&self.pool)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(PaginatedResponse::new(items, &params, total))
    }

    async fn transition(
        &self,
        id: i64,
        transition: Transition,
        sms_code: Option<String>,
    ) -> AppResult<RequestResponse> {
        match apply_transition(&self.pool, id, transition, sms_code).await? {
            Outcome::Applied(model) => {
                log::info!("Request {id}: {transition} -> {}", model.status);
                let resp = RequestResponse::from(model);
                self.feed.updated(resp.clone());
                Ok(resp)
            }
            Outcome::Unchanged(model) => Ok(model.into()),
        }
    }
}

/// 带状态条件的更新: UPDATE ... WHERE id = ? AND status IN (sources)
///
/// 更新与回读在同一事务内，回读到的一定是本次写入的行。
/// 未命中时不写任何数据，再读取当前状态区分 NotFound / 幂等 / 非法迁移。
async fn apply_transition(
    pool: &DatabaseConnection,
    id: i64,
    transition: Transition,
    sms_code: Option<String>,
) -> AppResult<Outcome> {
    let txn = pool.begin().await?;

    let mut update = requests::Entity::update_many()
        .col_expr(requests::Column::Status, Expr::value(transition.target()))
        .col_expr(requests::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(requests::Column::Id.eq(id))
        .filter(requests::Column::Status.is_in(transition.sources().iter().copied()));
    if let Some(code) = sms_code {
        update = update.col_expr(requests::Column::SmsCode, Expr::value(code));
    }
    let result = update.exec(&txn).await?;

    let current = requests::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Request {id} not found")))?;

    txn.commit().await?;

    if result.rows_affected == 1 {
        return Ok(Outcome::Applied(current));
    }
    if transition.is_noop(current.status) {
        return Ok(Outcome::Unchanged(current));
    }
    Err(AppError::InvalidTransition {
        from: current.status,
        transition,
    })
}

fn normalize_sms_code(code: &str) -> AppResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(AppError::ValidationError("SMS code is required".into()));
    }
    if code.len() > SMS_CODE_MAX_LEN {
        return Err(AppError::ValidationError(format!(
            "SMS code must be at most {SMS_CODE_MAX_LEN} characters"
        )));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::ValidationError(
            "SMS code may only contain letters and digits".into(),
        ));
    }
    Ok(code.to_string())
}
