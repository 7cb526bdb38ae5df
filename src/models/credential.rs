use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::credential_entity;

/// 创建凭证请求，access_code 为空时自动生成
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CreateCredentialRequest {
    pub phone: String,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct UpdateCredentialRequest {
    pub phone: String,
    pub access_code: String,
}

/// 凭证列表查询参数
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CredentialQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// 仅返回已使用 / 未使用的凭证
    pub is_used: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CredentialResponse {
    pub id: i64,
    pub phone: String,
    pub access_code: String,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<credential_entity::Model> for CredentialResponse {
    fn from(m: credential_entity::Model) -> Self {
        CredentialResponse {
            id: m.id,
            phone: m.phone,
            access_code: m.access_code,
            is_used: m.is_used,
            used_at: m.used_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
