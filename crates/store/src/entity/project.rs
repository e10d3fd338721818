//! Project entity: one registered web application.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub repo_url: String,
    pub root_dir: String,
    pub build_command: String,
    pub app_type: String,
    #[sea_orm(unique)]
    pub port: i32,
    #[sea_orm(unique)]
    pub domain: Option<String>,
    pub repo_id: Option<String>,
    pub repo_full_name: Option<String>,
    pub branch: String,
    pub installation_id: Option<String>,
    pub auto_deploy: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
