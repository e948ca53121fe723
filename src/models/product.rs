use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::error::{AppError, AppResult};

/// Day-first format used on every form and in every response.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_TYPE_LEN: usize = 50;
pub const MAX_CONDITION_LEN: usize = 20;

/// One inventory row. Serializes to the flat record returned by `GET /products`,
/// with dates rendered as `DD/MM/YYYY`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub product_name: String,
    pub product_type: String,
    #[serde(serialize_with = "serialize_date")]
    pub date_bought: NaiveDate,
    pub price_bought: f64,
    #[serde(serialize_with = "serialize_optional_date")]
    pub date_sold: Option<NaiveDate>,
    pub price_sold: Option<f64>,
    pub condition: String,
    /// Public reference such as `/static/uploads/bike.jpg`.
    pub image: Option<String>,
    pub is_sold: bool,
}

impl Product {
    /// Sale data, present only when the row is in the sold state.
    pub fn sale(&self) -> Option<Sale> {
        match (self.is_sold, self.date_sold, self.price_sold) {
            (true, Some(date), Some(price)) => Some(Sale { date, price }),
            _ => None,
        }
    }
}

fn serialize_date<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&date.format(DATE_FORMAT))
}

fn serialize_optional_date<S: Serializer>(
    date: &Option<NaiveDate>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match date {
        Some(date) => serialize_date(date, serializer),
        None => serializer.serialize_none(),
    }
}

// ── Request payloads ─────────────────────────────────────────────────────────

/// Purchase-side fields shared by create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDetails {
    pub product_name: String,
    pub product_type: String,
    pub date_bought: NaiveDate,
    pub price_bought: f64,
    pub condition: String,
}

/// Sale date and price always travel together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sale {
    pub date: NaiveDate,
    pub price: f64,
}

/// Full overwrite of a row. `sale: None` clears any previous sale.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateProduct {
    pub details: ProductDetails,
    pub sale: Option<Sale>,
}

// ── Field parsing ────────────────────────────────────────────────────────────

pub fn parse_date(field: &str, raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| AppError::invalid_field(field, format!("expected DD/MM/YYYY, got {:?}", raw)))
}

pub fn parse_price(field: &str, raw: &str) -> AppResult<f64> {
    let price: f64 = raw
        .parse()
        .map_err(|_| AppError::invalid_field(field, format!("{:?} is not a number", raw)))?;
    if !price.is_finite() {
        return Err(AppError::invalid_field(field, "must be a finite number"));
    }
    if price < 0.0 {
        return Err(AppError::invalid_field(field, "must be >= 0"));
    }
    Ok(price)
}

pub fn parse_text(field: &str, raw: &str, max_len: usize) -> AppResult<String> {
    if raw.is_empty() {
        return Err(AppError::invalid_field(field, "must not be empty"));
    }
    if raw.chars().count() > max_len {
        return Err(AppError::invalid_field(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }
    Ok(raw.to_string())
}
