use std::collections::HashMap;

use axum::body::Bytes;

use crate::error::{AppError, AppResult};
use crate::models::product::{
    parse_date, parse_price, parse_text, ProductDetails, Sale, UpdateProduct, MAX_CONDITION_LEN,
    MAX_NAME_LEN, MAX_TYPE_LEN,
};

/// Checkbox value browsers submit for a ticked `is_sold`.
pub const SOLD_SENTINEL: &str = "on";

/// A file part submitted as `image`.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Raw product form as submitted, before any conversion.
#[derive(Debug, Default)]
pub struct ProductForm {
    fields: HashMap<String, String>,
    pub image: Option<ImageUpload>,
}

impl ProductForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a text field. The first value of a repeated field wins.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(name.into()).or_insert_with(|| value.into());
    }

    #[cfg(test)]
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.trim())
    }

    fn required(&self, name: &str) -> AppResult<&str> {
        self.text(name).ok_or_else(|| AppError::missing_field(name))
    }

    pub fn is_sold(&self) -> bool {
        self.text("is_sold") == Some(SOLD_SENTINEL)
    }

    pub fn details(&self) -> AppResult<ProductDetails> {
        Ok(ProductDetails {
            product_name: parse_text("product_name", self.required("product_name")?, MAX_NAME_LEN)?,
            product_type: parse_text("product_type", self.required("product_type")?, MAX_TYPE_LEN)?,
            date_bought: parse_date("date_bought", self.required("date_bought")?)?,
            price_bought: parse_price("price_bought", self.required("price_bought")?)?,
            condition: parse_text("condition", self.required("condition")?, MAX_CONDITION_LEN)?,
        })
    }

    /// Sale fields are only read when the sold box is ticked; otherwise they are ignored.
    pub fn sale(&self) -> AppResult<Option<Sale>> {
        if !self.is_sold() {
            return Ok(None);
        }
        Ok(Some(Sale {
            date: parse_date("date_sold", self.required("date_sold")?)?,
            price: parse_price("price_sold", self.required("price_sold")?)?,
        }))
    }

    pub fn into_create(self) -> AppResult<(ProductDetails, Option<ImageUpload>)> {
        let details = self.details()?;
        Ok((details, self.image))
    }

    pub fn into_update(self) -> AppResult<(UpdateProduct, Option<ImageUpload>)> {
        let update = UpdateProduct {
            details: self.details()?,
            sale: self.sale()?,
        };
        Ok((update, self.image))
    }
}
