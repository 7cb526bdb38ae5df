use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// 凭证实体 (手机号 + 访问码)
/// 说明:
/// - 同一手机号允许存在多条记录，查找必须使用 (phone, access_code) 组合
/// - is_used 只能通过原子租用 (lease) 从 false 变为 true，不会自动回退
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// E.164 手机号
    pub phone: String,
    pub access_code: String,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::requests::Entity")]
    Requests,
}

impl Related<super::requests::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Requests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
