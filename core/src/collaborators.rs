/// Upstream services that turn user picks into content blocks
use crate::chat_types::ContentBlock;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Where an uploaded image ended up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Image upload service returning a public URL
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload_image(
        &self,
        file_name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<UploadedImage>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub shop_id: Option<String>,
}

impl ProductSummary {
    pub fn to_content(&self) -> ContentBlock {
        ContentBlock::Product {
            product_id: self.id.clone(),
            name: self.name.clone(),
            image_url: self.image_url.clone(),
            price: self.price,
            shop_id: self.shop_id.clone(),
        }
    }
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(&self, product_id: &str) -> Result<ProductSummary>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub item_count: Option<u32>,
}

impl OrderSummary {
    pub fn to_content(&self) -> ContentBlock {
        ContentBlock::Order {
            order_id: self.id.clone(),
            order_code: self.code.clone(),
            status: self.status.clone(),
            total: self.total,
            item_count: self.item_count,
        }
    }
}

#[async_trait]
pub trait OrderLookup: Send + Sync {
    async fn order(&self, order_id: &str) -> Result<OrderSummary>;
}

/// Image block for an upload of `size` bytes
pub fn image_content(
    uploaded: UploadedImage,
    file_name: &str,
    mime_type: &str,
    size: u64,
) -> ContentBlock {
    ContentBlock::Image {
        url: uploaded.url,
        thumbnail_url: uploaded.thumbnail_url,
        file_name: Some(file_name.to_string()),
        file_size: Some(size),
        mime_type: Some(mime_type.to_string()),
    }
}
