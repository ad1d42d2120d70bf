use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Priced estimate for printing an uploaded model, valid until `expire_at`
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "quotes")]
#[schema(as = Quote)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub uploaded_model_id: Uuid,
    pub material: Material,
    #[sea_orm(column_type = "Decimal(Some((4, 2)))")]
    pub layer_height_mm: Decimal,
    pub infill_pct: i32,
    pub quality: PrintQuality,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub price: Decimal,
    pub currency: String,
    pub expire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expire_at
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::uploaded_model::Entity",
        from = "Column::UploadedModelId",
        to = "super::uploaded_model::Column::Id",
        on_delete = "Cascade"
    )]
    UploadedModel,
}

impl Related<super::uploaded_model::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UploadedModel.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Printing filament
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
#[serde(rename_all = "UPPERCASE")]
pub enum Material {
    #[sea_orm(string_value = "PLA")]
    Pla,
    #[sea_orm(string_value = "PETG")]
    Petg,
    #[sea_orm(string_value = "TPU")]
    Tpu,
}

/// Print quality tier; `high` is also accepted as `quality` on input
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(12))")]
#[serde(rename_all = "lowercase")]
pub enum PrintQuality {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "standard")]
    Standard,
    #[sea_orm(string_value = "high")]
    #[serde(alias = "quality")]
    High,
}
