use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::{RequestStatus, request_entity};

/// 工作人员提交手机号 + 访问码
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SubmitRequest {
    pub phone: String,
    pub access_code: String,
}

/// 操作员转录的短信验证码
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SubmitSmsCodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct RequestQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RequestResponse {
    pub id: i64,
    pub credential_id: i64,
    pub status: RequestStatus,
    pub sms_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<request_entity::Model> for RequestResponse {
    fn from(m: request_entity::Model) -> Self {
        RequestResponse {
            id: m.id,
            credential_id: m.credential_id,
            status: m.status,
            sms_code: m.sms_code,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
