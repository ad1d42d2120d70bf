use crate::{
    entities::{
        product::{self, Entity as Product},
        product_image::{self, Entity as ProductImage},
        product_variant::{self, Entity as ProductVariant},
        quote::Material,
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Condition, Expr, Func},
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_PAGE_SIZE: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProductSort {
    PriceAsc,
    PriceDesc,
    Newest,
    #[default]
    Name,
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub ready_to_ship: Option<bool>,
    pub query: Option<String>,
    pub sort: ProductSort,
    pub page: u64,
    pub page_size: u64,
}

/// Product together with its images and variants
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: product::Model,
    pub images: Vec<product_image::Model>,
    pub variants: Vec<product_variant::Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ImageInput {
    #[validate(length(min = 1, max = 255))]
    pub url: String,
    #[serde(default)]
    pub alt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct VariantInput {
    pub material: Material,
    #[validate(length(min = 1, max = 60))]
    pub color: String,
    pub layer_height_mm: Decimal,
    #[validate(range(min = 0, max = 100))]
    pub infill_pct: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 180))]
    pub name: String,
    pub base_price: Decimal,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub short_desc: String,
    #[serde(default = "default_ready_to_ship")]
    pub ready_to_ship: bool,
    #[serde(default)]
    pub width_mm: Decimal,
    #[serde(default)]
    pub height_mm: Decimal,
    #[serde(default)]
    pub depth_mm: Decimal,
    #[serde(default)]
    #[validate]
    pub images: Vec<ImageInput>,
    #[serde(default)]
    #[validate]
    pub variants: Vec<VariantInput>,
}

fn default_ready_to_ship() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 180))]
    pub name: Option<String>,
    pub base_price: Option<Decimal>,
    pub category: Option<String>,
    pub short_desc: Option<String>,
    pub ready_to_ship: Option<bool>,
    pub width_mm: Option<Decimal>,
    pub height_mm: Option<Decimal>,
    pub depth_mm: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkDeleteResult {
    pub deleted: Vec<String>,
    pub not_found: Vec<String>,
    /// Image URLs of deleted products, for storage cleanup
    pub image_urls: Vec<String>,
}

/// Lower-case name with spaces replaced by dashes.
pub fn slugify(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: ProductFilter,
    ) -> Result<(Vec<ProductView>, u64), ServiceError> {
        let mut query = Product::find();

        if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
            query = query.filter(product::Column::Category.eq(category));
        }
        if let Some(ready) = filter.ready_to_ship {
            query = query.filter(product::Column::ReadyToShip.eq(ready));
        }
        if let Some(q) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", q.to_lowercase());
            query = query.filter(
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(product::Column::Name))).like(&pattern))
                    .add(
                        Expr::expr(Func::lower(Expr::col(product::Column::Category)))
                            .like(&pattern),
                    ),
            );
        }

        query = match filter.sort {
            ProductSort::PriceAsc => query.order_by_asc(product::Column::BasePrice),
            ProductSort::PriceDesc => query.order_by_desc(product::Column::BasePrice),
            ProductSort::Newest => query.order_by_desc(product::Column::CreatedAt),
            ProductSort::Name => query.order_by_asc(product::Column::Name),
        };

        let page_size = if filter.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            filter.page_size
        };
        let paginator = query.paginate(&*self.db, page_size);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(filter.page.max(1) - 1).await?;

        let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
        let mut images: HashMap<Uuid, Vec<product_image::Model>> = HashMap::new();
        if !ids.is_empty() {
            for image in ProductImage::find()
                .filter(product_image::Column::ProductId.is_in(ids))
                .order_by_asc(product_image::Column::CreatedAt)
                .all(&*self.db)
                .await?
            {
                images.entry(image.product_id).or_default().push(image);
            }
        }

        let views = products
            .into_iter()
            .map(|product| ProductView {
                images: images.remove(&product.id).unwrap_or_default(),
                variants: Vec::new(),
                product,
            })
            .collect();

        Ok((views, total))
    }

    #[instrument(skip(self))]
    pub async fn get_by_slug(&self, slug: &str) -> Result<ProductView, ServiceError> {
        if slug.trim().is_empty() {
            return Err(ServiceError::InvalidInput("slug is empty".to_string()));
        }
        let product = self
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", slug)))?;
        self.load_view(product).await
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<product::Model>, ServiceError> {
        Ok(Product::find()
            .filter(product::Column::Slug.eq(slug))
            .one(&*self.db)
            .await?)
    }

    /// Current catalog rows for `slugs`, keyed by slug.
    pub async fn find_by_slugs(
        &self,
        slugs: &[String],
    ) -> Result<HashMap<String, product::Model>, ServiceError> {
        if slugs.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = Product::find()
            .filter(product::Column::Slug.is_in(slugs.iter().cloned()))
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|p| (p.slug.clone(), p)).collect())
    }

    async fn load_view(&self, product: product::Model) -> Result<ProductView, ServiceError> {
        let images = ProductImage::find()
            .filter(product_image::Column::ProductId.eq(product.id))
            .order_by_asc(product_image::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        let variants = ProductVariant::find()
            .filter(product_variant::Column::ProductId.eq(product.id))
            .order_by_asc(product_variant::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(ProductView {
            product,
            images,
            variants,
        })
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: CreateProductRequest) -> Result<ProductView, ServiceError> {
        input.validate()?;
        if input.base_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "base_price cannot be negative".to_string(),
            ));
        }

        let slug = slugify(&input.name);
        if self.find_by_slug(&slug).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "a product with slug {} already exists",
                slug
            )));
        }

        let now = Utc::now();
        let product_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        product::ActiveModel {
            id: Set(product_id),
            slug: Set(slug.clone()),
            name: Set(input.name.trim().to_string()),
            base_price: Set(input.base_price),
            category: Set(input.category.trim().to_string()),
            short_desc: Set(input.short_desc),
            ready_to_ship: Set(input.ready_to_ship),
            width_mm: Set(input.width_mm),
            height_mm: Set(input.height_mm),
            depth_mm: Set(input.depth_mm),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for image in input.images {
            image_model(product_id, image).insert(&txn).await?;
        }
        for variant in input.variants {
            product_variant::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_id),
                material: Set(variant.material),
                color: Set(variant.color),
                layer_height_mm: Set(variant.layer_height_mm),
                infill_pct: Set(variant.infill_pct),
                created_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        info!(%product_id, %slug, "product created");

        self.get_by_slug(&slug).await
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        slug: &str,
        input: UpdateProductRequest,
    ) -> Result<ProductView, ServiceError> {
        input.validate()?;
        let existing = self
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", slug)))?;

        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(price) = input.base_price {
            if price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "base_price cannot be negative".to_string(),
                ));
            }
            active.base_price = Set(price);
        }
        if let Some(category) = input.category {
            active.category = Set(category.trim().to_string());
        }
        if let Some(desc) = input.short_desc {
            active.short_desc = Set(desc);
        }
        if let Some(ready) = input.ready_to_ship {
            active.ready_to_ship = Set(ready);
        }
        if let Some(width) = input.width_mm {
            active.width_mm = Set(width);
        }
        if let Some(height) = input.height_mm {
            active.height_mm = Set(height);
        }
        if let Some(depth) = input.depth_mm {
            active.depth_mm = Set(depth);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        self.load_view(updated).await
    }

    #[instrument(skip(self, images))]
    pub async fn add_images(
        &self,
        slug: &str,
        images: Vec<ImageInput>,
    ) -> Result<Vec<product_image::Model>, ServiceError> {
        let product = self
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", slug)))?;

        let mut created = Vec::with_capacity(images.len());
        for image in images {
            image.validate()?;
            created.push(image_model(product.id, image).insert(&*self.db).await?);
        }
        Ok(created)
    }

    /// Removes the product, its images and variants in one transaction and returns the
    /// image URLs so stored files can be cleaned up.
    #[instrument(skip(self))]
    pub async fn delete_by_slug(&self, slug: &str) -> Result<Vec<String>, ServiceError> {
        if slug.trim().is_empty() {
            return Err(ServiceError::InvalidInput("slug is empty".to_string()));
        }
        let product = self
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", slug)))?;

        let txn = self.db.begin().await?;
        let image_urls: Vec<String> = ProductImage::find()
            .filter(product_image::Column::ProductId.eq(product.id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|img| img.url)
            .collect();

        ProductImage::delete_many()
            .filter(product_image::Column::ProductId.eq(product.id))
            .exec(&txn)
            .await?;
        ProductVariant::delete_many()
            .filter(product_variant::Column::ProductId.eq(product.id))
            .exec(&txn)
            .await?;
        Product::delete_by_id(product.id).exec(&txn).await?;
        txn.commit().await?;

        info!(product_id = %product.id, %slug, "product deleted");
        Ok(image_urls)
    }

    pub async fn bulk_delete(&self, slugs: Vec<String>) -> Result<BulkDeleteResult, ServiceError> {
        let mut result = BulkDeleteResult {
            deleted: Vec::new(),
            not_found: Vec::new(),
            image_urls: Vec::new(),
        };
        for slug in slugs {
            match self.delete_by_slug(&slug).await {
                Ok(urls) => {
                    result.image_urls.extend(urls);
                    result.deleted.push(slug);
                }
                Err(ServiceError::NotFound(_)) | Err(ServiceError::InvalidInput(_)) => {
                    result.not_found.push(slug)
                }
                Err(other) => return Err(other),
            }
        }
        Ok(result)
    }

    /// Distinct non-empty categories, sorted.
    pub async fn categories(&self) -> Result<Vec<String>, ServiceError> {
        let categories = Product::find()
            .select_only()
            .column(product::Column::Category)
            .distinct()
            .filter(product::Column::Category.ne(""))
            .order_by_asc(product::Column::Category)
            .into_tuple::<String>()
            .all(&*self.db)
            .await?;
        Ok(categories)
    }

    pub async fn count(&self) -> Result<u64, ServiceError> {
        Ok(Product::find().count(&*self.db).await?)
    }
}

fn image_model(product_id: Uuid, image: ImageInput) -> product_image::ActiveModel {
    product_image::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        url: Set(image.url),
        alt: Set(image.alt),
        created_at: Set(Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_lowercase_dashed() {
        assert_eq!(slugify("Vaso Espiral Grande"), "vaso-espiral-grande");
        assert_eq!(slugify("  Maceta "), "maceta");
    }

    #[test]
    fn sort_parses_from_query_values() {
        assert_eq!("price_desc".parse::<ProductSort>().unwrap(), ProductSort::PriceDesc);
        assert_eq!("newest".parse::<ProductSort>().unwrap(), ProductSort::Newest);
        assert!("cheapest".parse::<ProductSort>().is_err());
        assert_eq!(ProductSort::default(), ProductSort::Name);
    }
}
