use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// 激活任务 (持久化的延时任务队列)
/// - due_at 之前绝不执行
/// - claimed_at 非空表示某个 worker 正在处理 (超时后可被重新认领)
/// - completed_at 非空表示任务结束 (成功、无操作或放弃)
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "activation_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub request_id: i64,
    pub due_at: DateTime<Utc>,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::requests::Entity",
        from = "Column::RequestId",
        to = "super::requests::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Request,
}

impl Related<super::requests::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Request.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
