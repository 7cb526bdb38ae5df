use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    ToSchema,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "activated")]
    Activated,
    #[sea_orm(string_value = "sms_requested")]
    SmsRequested,
    #[sea_orm(string_value = "sms_sent")]
    SmsSent,
    #[sea_orm(string_value = "waiting_for_additional_sms")]
    WaitingForAdditionalSms,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Activated => write!(f, "activated"),
            RequestStatus::SmsRequested => write!(f, "sms_requested"),
            RequestStatus::SmsSent => write!(f, "sms_sent"),
            RequestStatus::WaitingForAdditionalSms => write!(f, "waiting_for_additional_sms"),
            RequestStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "activated" => Ok(RequestStatus::Activated),
            "sms_requested" => Ok(RequestStatus::SmsRequested),
            "sms_sent" => Ok(RequestStatus::SmsSent),
            "waiting_for_additional_sms" => Ok(RequestStatus::WaitingForAdditionalSms),
            "completed" => Ok(RequestStatus::Completed),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// 激活请求实体
/// - 每次成功提交凭证生成一条记录，永不删除
/// - 只有 status / sms_code / updated_at 会变化
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub credential_id: i64,
    pub status: RequestStatus,
    /// 操作员转录的最新短信验证码
    pub sms_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::credentials::Entity",
        from = "Column::CredentialId",
        to = "super::credentials::Column::Id",
        on_update = "NoAction",
        on_delete = "Restrict"
    )]
    Credential,
}

impl Related<super::credentials::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Credential.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
