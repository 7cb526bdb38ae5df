use crate::entities::{credential_entity as credentials, request_entity as requests};
use crate::error::{AppError, AppResult};
use crate::feed::ChangeFeed;
use crate::models::*;
use crate::utils::{generate_access_code, parse_phone, validate_access_code};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

/// 生成访问码时遇到重复组合的最大重试次数
const GENERATE_ATTEMPTS: usize = 10;

#[derive(Clone)]
pub struct CredentialService {
    pool: DatabaseConnection,
    feed: ChangeFeed,
}

impl CredentialService {
    pub fn new(pool: DatabaseConnection, feed: ChangeFeed) -> Self {
        Self { pool, feed }
    }

    /// 创建凭证
    ///
    /// 同一手机号可以创建多条凭证 (每条访问码不同)；完全相同的
    /// (phone, access_code) 组合会返回 Conflict，否则提交时无法区分。
    pub async fn create(&self, req: CreateCredentialRequest) -> AppResult<CredentialResponse> {
        let phone = parse_phone(&req.phone)?;
        let access_code = match req.access_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                validate_access_code(code)?;
                if pair_exists(&self.pool, &phone, code, None).await? {
                    return Err(AppError::Conflict(format!(
                        "Access code {code} already exists for {phone}"
                    )));
                }
                code.to_string()
            }
            _ => self.generate_free_code(&phone).await?,
        };

        let now = Utc::now();
        let duplicate = format!("Access code {access_code} already exists for {phone}");
        let model = credentials::ActiveModel {
            phone: Set(phone),
            access_code: Set(access_code),
            is_used: Set(false),
            used_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.pool)
        .await
        .map_err(|e| AppError::from_write(e, || duplicate))?;

        log::info!("Credential {} created for {}", model.id, model.phone);
        let resp = CredentialResponse::from(model);
        self.feed.inserted(resp.clone());
        Ok(resp)
    }

    pub async fn get(&self, id: i64) -> AppResult<CredentialResponse> {
        let model = credentials::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Credential {id} not found")))?;
        Ok(model.into())
    }

    /// 分页获取凭证 (倒序)
    pub async fn list(
        &self,
        query: &CredentialQuery,
    ) -> AppResult<PaginatedResponse<CredentialResponse>> {
        let params = PaginationParams::new(query.page, query.per_page);

        let mut base_query = credentials::Entity::find();
        if let Some(is_used) = query.is_used {
            base_query = base_query.filter(credentials::Column::IsUsed.eq(is_used));
        }

        let total = base_query.clone().count(&self.pool).await?;
        let items = base_query
            .order_by_desc(credentials::Column::Id)
            .limit(params.per_page())
            .offset(params.offset())
            .all(&self.pool)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(PaginatedResponse::new(items, &params, total))
    }

    /// 修改手机号 / 访问码，不影响 is_used
    pub async fn update(
        &self,
        id: i64,
        req: UpdateCredentialRequest,
    ) -> AppResult<CredentialResponse> {
        let phone = parse_phone(&req.phone)?;
        let access_code = req.access_code.trim().to_string();
        validate_access_code(&access_code)?;

        let existing = credentials::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Credential {id} not found")))?;

        if pair_exists(&self.pool, &phone, &access_code, Some(id)).await? {
            return Err(AppError::Conflict(format!(
                "Access code {access_code} already exists for {phone}"
            )));
        }

        let duplicate = format!("Access code {access_code} already exists for {phone}");
        let mut am = existing.into_active_model();
        am.phone = Set(phone);
        am.access_code = Set(access_code);
        am.updated_at = Set(Utc::now());
        let updated = am
            .update(&self.pool)
            .await
            .map_err(|e| AppError::from_write(e, || duplicate))?;

        let resp = CredentialResponse::from(updated);
        self.feed.updated(resp.clone());
        Ok(resp)
    }

    /// 删除凭证；已有请求记录的凭证不能删除 (请求永不删除)
    pub async fn delete(&self, id: i64) -> AppResult<()> {
        let existing = credentials::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Credential {id} not found")))?;

        let history = requests::Entity::find()
            .filter(requests::Column::CredentialId.eq(id))
            .count(&self.pool)
            .await?;
        if history > 0 {
            return Err(AppError::Conflict(format!(
                "Credential {id} has {history} requests and cannot be deleted"
            )));
        }

        credentials::Entity::delete_by_id(id)
            .exec(&self.pool)
            .await
            .map_err(|e| {
                AppError::from_write(e, || {
                    format!("Credential {id} gained requests and cannot be deleted")
                })
            })?;
        log::info!("Credential {id} deleted");
        self.feed.deleted(CredentialResponse::from(existing));
        Ok(())
    }

    /// 校验 (phone, access_code)
    pub async fn validate(&self, phone: &str, access_code: &str) -> AppResult<credentials::Model> {
        let phone = parse_phone(phone)?;
        validate_pair(&self.pool, &phone, access_code.trim()).await
    }

    /// 原子租用凭证: is_used false -> true，只会成功一次
    pub async fn lease(&self, id: i64) -> AppResult<CredentialResponse> {
        lease_credential(&self.pool, id, Utc::now()).await?;
        let model = credentials::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Credential {id} not found")))?;
        let resp = CredentialResponse::from(model);
        self.feed.updated(resp.clone());
        Ok(resp)
    }

    async fn generate_free_code(&self, phone: &str) -> AppResult<String> {
        for _ in 0..GENERATE_ATTEMPTS {
            let code = generate_access_code();
            if !pair_exists(&self.pool, phone, &code, None).await? {
                return Ok(code);
            }
        }
        Err(AppError::InternalError(format!(
            "Could not generate a free access code for {phone}"
        )))
    }
}

/// 按 (phone, access_code) 组合查找，而不是只按手机号
///
/// - 手机号不存在 -> CredentialNotFound
/// - 手机号存在但访问码不匹配 (无论是否已使用) -> CodeMismatch
/// - 匹配但已使用 -> AlreadyUsed
pub(crate) async fn validate_pair<C: ConnectionTrait>(
    conn: &C,
    phone: &str,
    access_code: &str,
) -> AppResult<credentials::Model> {
    let matched = credentials::Entity::find()
        .filter(credentials::Column::Phone.eq(phone))
        .filter(credentials::Column::AccessCode.eq(access_code))
        .one(conn)
        .await?;

    if let Some(credential) = matched {
        if credential.is_used {
            return Err(AppError::AlreadyUsed);
        }
        return Ok(credential);
    }

    let phone_known = credentials::Entity::find()
        .filter(credentials::Column::Phone.eq(phone))
        .count(conn)
        .await?
        > 0;

    if phone_known {
        Err(AppError::CodeMismatch)
    } else {
        Err(AppError::CredentialNotFound)
    }
}

/// UPDATE credentials SET is_used = true WHERE id = ? AND is_used = false
pub(crate) async fn lease_credential<C: ConnectionTrait>(
    conn: &C,
    id: i64,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let result = credentials::Entity::update_many()
        .col_expr(credentials::Column::IsUsed, Expr::value(true))
        .col_expr(credentials::Column::UsedAt, Expr::value(now))
        .col_expr(credentials::Column::UpdatedAt, Expr::value(now))
        .filter(credentials::Column::Id.eq(id))
        .filter(credentials::Column::IsUsed.eq(false))
        .exec(conn)
        .await?;

    if result.rows_affected != 1 {
        return Err(AppError::Conflict(format!(
            "Credential {id} is already leased"
        )));
    }
    Ok(())
}

async fn pair_exists<C: ConnectionTrait>(
    conn: &C,
    phone: &str,
    access_code: &str,
    exclude_id: Option<i64>,
) -> AppResult<bool> {
    let mut query = credentials::Entity::find()
        .filter(credentials::Column::Phone.eq(phone))
        .filter(credentials::Column::AccessCode.eq(access_code));
    if let Some(id) = exclude_id {
        query = query.filter(credentials::Column::Id.ne(id));
    }
    Ok(query.count(conn).await? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_pool;
    use crate::error::ErrorCategory;
    use crate::feed::{ChangeOp, EntityKind};

    const PHONE: &str = "+4917600000000";

    async fn service() -> CredentialService {
        CredentialService::new(memory_pool().await, ChangeFeed::new(16))
    }

    fn create_req(phone: &str, code: Option<&str>) -> CreateCredentialRequest {
        CreateCredentialRequest {
            phone: phone.to_string(),
            access_code: code.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_phone_and_generates_code() {
        let svc = service().await;
        let cred = svc.create(create_req("+49 176 0000 0000", None)).await.unwrap();
        assert_eq!(cred.phone, PHONE);
        assert_eq!(cred.access_code.len(), 6);
        assert!(!cred.is_used);
        assert!(cred.used_at.is_none());
    }

    #[tokio::test]
    async fn test_same_phone_allows_multiple_codes_but_not_duplicate_pairs() {
        let svc = service().await;
        svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();
        svc.create(create_req(PHONE, Some("XYZ789"))).await.unwrap();

        let err = svc
            .create(create_req(PHONE, Some("ABC234")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_validate_keys_on_phone_and_code_pair() {
        let svc = service().await;
        let first = svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();
        let second = svc.create(create_req(PHONE, Some("XYZ789"))).await.unwrap();

        assert_eq!(svc.validate(PHONE, "ABC234").await.unwrap().id, first.id);
        assert_eq!(svc.validate(PHONE, "XYZ789").await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_validate_error_kinds() {
        let svc = service().await;
        let cred = svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();

        assert!(matches!(
            svc.validate("+4917699999999", "ABC234").await,
            Err(AppError::CredentialNotFound)
        ));
        assert!(matches!(
            svc.validate(PHONE, "WRONG1").await,
            Err(AppError::CodeMismatch)
        ));

        svc.lease(cred.id).await.unwrap();
        assert!(matches!(
            svc.validate(PHONE, "ABC234").await,
            Err(AppError::AlreadyUsed)
        ));
        // 已使用的凭证，错误的访问码仍然是 CodeMismatch
        assert!(matches!(
            svc.validate(PHONE, "WRONG1").await,
            Err(AppError::CodeMismatch)
        ));
    }

    #[tokio::test]
    async fn test_lease_succeeds_exactly_once() {
        let svc = service().await;
        let cred = svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();

        // 两个调用方都在租用前通过了校验
        let a = svc.validate(PHONE, "ABC234").await.unwrap();
        let b = svc.validate(PHONE, "ABC234").await.unwrap();
        assert_eq!(a.id, b.id);

        let leased = svc.lease(a.id).await.unwrap();
        assert!(leased.is_used);
        assert!(leased.used_at.is_some());

        let err = svc.lease(b.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert!(svc.get(cred.id).await.unwrap().is_used);
    }

    #[tokio::test]
    async fn test_update_keeps_lease_flag() {
        let svc = service().await;
        let cred = svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();
        svc.lease(cred.id).await.unwrap();

        let updated = svc
            .update(
                cred.id,
                UpdateCredentialRequest {
                    phone: "+4917611111111".into(),
                    access_code: "QRS567".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.phone, "+4917611111111");
        assert_eq!(updated.access_code, "QRS567");
        assert!(updated.is_used);
        assert!(updated.updated_at >= cred.updated_at);
    }

    #[tokio::test]
    async fn test_delete_and_missing_ids() {
        let svc = service().await;
        let cred = svc.create(create_req(PHONE, None)).await.unwrap();
        svc.delete(cred.id).await.unwrap();

        assert!(matches!(svc.get(cred.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(svc.delete(cred.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_usage() {
        let svc = service().await;
        let used = svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();
        svc.create(create_req(PHONE, Some("XYZ789"))).await.unwrap();
        svc.create(create_req("+4917611111111", None)).await.unwrap();
        svc.lease(used.id).await.unwrap();

        let all = svc
            .list(&CredentialQuery {
                page: None,
                per_page: None,
                is_used: None,
            })
            .await
            .unwrap();
        assert_eq!(all.total, 3);

        let free = svc
            .list(&CredentialQuery {
                page: Some(1),
                per_page: Some(1),
                is_used: Some(false),
            })
            .await
            .unwrap();
        assert_eq!(free.total, 2);
        assert_eq!(free.data.len(), 1);
        assert_eq!(free.total_pages, 2);
    }

    #[tokio::test]
    async fn test_writes_publish_credential_events() {
        let svc = service().await;
        let mut rx = svc.feed.receiver();

        let cred = svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();
        svc.lease(cred.id).await.unwrap();

        let inserted = rx.recv().await.unwrap();
        assert_eq!(inserted.entity, EntityKind::Credentials);
        assert_eq!(inserted.op, ChangeOp::Insert);
        let leased = rx.recv().await.unwrap();
        assert_eq!(leased.op, ChangeOp::Update);
        assert_eq!(leased.record.id(), cred.id);
    }

    #[tokio::test]
    async fn test_duplicate_pair_rejected_by_index_is_conflict() {
        let svc = service().await;
        let cred = svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();

        // 绕过 pair_exists，模拟并发创建时只有唯一索引拦截
        let now = Utc::now();
        let raw = credentials::ActiveModel {
            phone: Set(cred.phone.clone()),
            access_code: Set(cred.access_code.clone()),
            is_used: Set(false),
            used_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&svc.pool)
        .await
        .unwrap_err();

        let err = AppError::from_write(raw, || "duplicate pair".to_string());
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[tokio::test]
    async fn test_delete_blocked_by_foreign_key_is_conflict() {
        let svc = service().await;
        let cred = svc.create(create_req(PHONE, Some("ABC234"))).await.unwrap();

        let now = Utc::now();
        requests::ActiveModel {
            credential_id: Set(cred.id),
            status: Set(crate::entities::RequestStatus::Pending),
            sms_code: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&svc.pool)
        .await
        .unwrap();

        // 绕过历史检查，直接删除时由外键拦截
        let raw = credentials::Entity::delete_by_id(cred.id)
            .exec(&svc.pool)
            .await
            .unwrap_err();
        let err = AppError::from_write(raw, || "has requests".to_string());
        assert!(matches!(err, AppError::Conflict(_)));

        assert!(matches!(svc.delete(cred.id).await, Err(AppError::Conflict(_))));
        assert!(svc.get(cred.id).await.is_ok());
    }
}
