use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::{AppError, AppResult};
use crate::models::*;

/// Opens (and creates if missing) the SQLite database behind `url`.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

// ── Products ──────────────────────────────────────────────────────────────────

pub async fn fetch_all_products(pool: &SqlitePool) -> AppResult<Vec<Product>> {
    let products = sqlx::query_as::<_, Product>(
        r#"
        SELECT id, product_name, product_type, date_bought, price_bought,
               date_sold, price_sold, condition, image, is_sold
        FROM products
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(products)
}

#[cfg(test)]
pub async fn fetch_product_by_id(pool: &SqlitePool, id: i64) -> AppResult<Product> {
    sqlx::query_as::<_, Product>(
        "SELECT id, product_name, product_type, date_bought, price_bought,
                date_sold, price_sold, condition, image, is_sold
         FROM products WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Product {} not found", id)))
}

/// Returns `NotFound` unless a row with `id` exists. Rows are never deleted,
/// so the answer stays true for the rest of the request.
pub async fn ensure_product_exists(pool: &SqlitePool, id: i64) -> AppResult<()> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM products WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("Product {} not found", id)))
}

/// Number of rows whose image is `image`.
pub async fn count_image_references(pool: &SqlitePool, image: &str) -> AppResult<i64> {
    let refs = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE image = ?")
        .bind(image)
        .fetch_one(pool)
        .await?;
    Ok(refs)
}

/// Inserts an unsold product. Committed before returning.
pub async fn insert_product(
    pool: &SqlitePool,
    details: &ProductDetails,
    image: Option<&str>,
) -> AppResult<Product> {
    let mut tx = pool.begin().await?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (product_name, product_type, date_bought, price_bought,
                              date_sold, price_sold, condition, image, is_sold)
        VALUES (?, ?, ?, ?, NULL, NULL, ?, ?, 0)
        RETURNING id, product_name, product_type, date_bought, price_bought,
                  date_sold, price_sold, condition, image, is_sold
        "#,
    )
    .bind(&details.product_name)
    .bind(&details.product_type)
    .bind(details.date_bought)
    .bind(details.price_bought)
    .bind(&details.condition)
    .bind(image)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(product)
}

/// Result of a committed update.
#[derive(Debug)]
pub struct UpdatedProduct {
    pub product: Product,
    /// Previous image reference, when the update pointed the row elsewhere.
    /// Other rows may still share it; see [`count_image_references`].
    pub replaced_image: Option<String>,
}

/// Overwrites every field of product `id`. `image: None` keeps the stored reference.
/// The lookup and write share one transaction; nothing is written when the
/// row does not exist.
pub async fn update_product(
    pool: &SqlitePool,
    id: i64,
    update: &UpdateProduct,
    image: Option<&str>,
) -> AppResult<UpdatedProduct> {
    let mut tx = pool.begin().await?;

    let previous_image: Option<String> =
        sqlx::query_scalar::<_, Option<String>>("SELECT image FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {} not found", id)))?;

    let details = &update.details;
    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products
        SET product_name = ?,
            product_type = ?,
            date_bought  = ?,
            price_bought = ?,
            date_sold    = ?,
            price_sold   = ?,
            condition    = ?,
            image        = ?,
            is_sold      = ?
        WHERE id = ?
        RETURNING id, product_name, product_type, date_bought, price_bought,
                  date_sold, price_sold, condition, image, is_sold
        "#,
    )
    .bind(&details.product_name)
    .bind(&details.product_type)
    .bind(details.date_bought)
    .bind(details.price_bought)
    .bind(update.sale.map(|s| s.date))
    .bind(update.sale.map(|s| s.price))
    .bind(&details.condition)
    .bind(image.or(previous_image.as_deref()))
    .bind(update.sale.is_some())
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    let replaced_image = previous_image.filter(|old| product.image.as_deref() != Some(old.as_str()));
    Ok(UpdatedProduct {
        product,
        replaced_image,
    })
}

#[cfg(test)]
pub async fn count_products(pool: &SqlitePool) -> AppResult<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Single-connection in-memory database with migrations applied.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    migrate(&pool).await.expect("run migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::product::Sale;
    use chrono::NaiveDate;

    fn date(d: u32, m: u32, y: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn details(name: &str) -> ProductDetails {
        ProductDetails {
            product_name: name.to_string(),
            product_type: "Sporting".to_string(),
            date_bought: date(1, 1, 2024),
            price_bought: 100.0,
            condition: "Used".to_string(),
        }
    }

    fn sold(name: &str) -> UpdateProduct {
        UpdateProduct {
            details: details(name),
            sale: Some(Sale {
                date: date(5, 1, 2024),
                price: 150.0,
            }),
        }
    }

    #[tokio::test]
    async fn inserted_products_start_unsold() {
        let pool = memory_pool().await;
        let product = insert_product(&pool, &details("Bike"), None).await.unwrap();
        assert!(product.id > 0);
        assert!(!product.is_sold);
        assert_eq!(product.date_sold, None);
        assert_eq!(product.price_sold, None);
        assert_eq!(product.date_bought, date(1, 1, 2024));
    }

    #[tokio::test]
    async fn lists_in_insertion_order() {
        let pool = memory_pool().await;
        for name in ["Bike", "Amp", "Lamp"] {
            insert_product(&pool, &details(name), None).await.unwrap();
        }
        let names: Vec<String> = fetch_all_products(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.product_name)
            .collect();
        assert_eq!(names, vec!["Bike", "Amp", "Lamp"]);
    }

    #[tokio::test]
    async fn empty_inventory_lists_nothing() {
        let pool = memory_pool().await;
        assert!(fetch_all_products(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn marking_sold_then_unsold_clears_sale() {
        let pool = memory_pool().await;
        let id = insert_product(&pool, &details("Bike"), None).await.unwrap().id;

        let updated = update_product(&pool, id, &sold("Bike"), None).await.unwrap();
        assert!(updated.product.is_sold);
        assert_eq!(updated.product.date_sold, Some(date(5, 1, 2024)));
        assert_eq!(updated.product.price_sold, Some(150.0));

        let unsold = UpdateProduct {
            details: details("Bike"),
            sale: None,
        };
        let updated = update_product(&pool, id, &unsold, None).await.unwrap();
        assert!(!updated.product.is_sold);
        assert_eq!(updated.product.sale(), None);
        assert_eq!(updated.product.date_sold, None);
        assert_eq!(updated.product.price_sold, None);
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found_and_writes_nothing() {
        let pool = memory_pool().await;
        insert_product(&pool, &details("Bike"), None).await.unwrap();

        let err = update_product(&pool, 42, &sold("Ghost"), None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(count_products(&pool).await.unwrap(), 1);
        assert_eq!(fetch_product_by_id(&pool, 1).await.unwrap().product_name, "Bike");
    }

    #[tokio::test]
    async fn update_without_image_keeps_reference() {
        let pool = memory_pool().await;
        let id = insert_product(&pool, &details("Bike"), Some("/static/uploads/bike.jpg"))
            .await
            .unwrap()
            .id;
        let updated = update_product(&pool, id, &sold("Bike"), None).await.unwrap();
        assert_eq!(updated.product.image.as_deref(), Some("/static/uploads/bike.jpg"));
        assert_eq!(updated.replaced_image, None);
    }

    #[tokio::test]
    async fn reuploading_the_same_name_replaces_nothing() {
        let pool = memory_pool().await;
        let bike = Some("/static/uploads/bike.jpg");
        let id = insert_product(&pool, &details("Bike"), bike).await.unwrap().id;
        let updated = update_product(&pool, id, &sold("Bike"), bike).await.unwrap();
        assert_eq!(updated.replaced_image, None);
    }

    #[tokio::test]
    async fn replaced_image_is_reported_and_unreferenced() {
        let pool = memory_pool().await;
        let id = insert_product(&pool, &details("Bike"), Some("/static/uploads/old.jpg"))
            .await
            .unwrap()
            .id;
        let updated = update_product(&pool, id, &sold("Bike"), Some("/static/uploads/new.jpg"))
            .await
            .unwrap();
        assert_eq!(updated.product.image.as_deref(), Some("/static/uploads/new.jpg"));
        assert_eq!(updated.replaced_image.as_deref(), Some("/static/uploads/old.jpg"));
        assert_eq!(count_image_references(&pool, "/static/uploads/old.jpg").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shared_image_keeps_its_other_references() {
        let pool = memory_pool().await;
        let shared = Some("/static/uploads/shared.jpg");
        let id = insert_product(&pool, &details("Bike"), shared).await.unwrap().id;
        insert_product(&pool, &details("Helmet"), shared).await.unwrap();

        let updated = update_product(&pool, id, &sold("Bike"), Some("/static/uploads/new.jpg"))
            .await
            .unwrap();
        assert_eq!(updated.replaced_image.as_deref(), Some("/static/uploads/shared.jpg"));
        assert_eq!(count_image_references(&pool, "/static/uploads/shared.jpg").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn existence_check_matches_rows() {
        let pool = memory_pool().await;
        let id = insert_product(&pool, &details("Bike"), None).await.unwrap().id;
        ensure_product_exists(&pool, id).await.unwrap();

        let err = ensure_product_exists(&pool, id + 1).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(msg) if msg == format!("Product {} not found", id + 1)));
    }

    #[tokio::test]
    async fn schema_rejects_half_sold_rows() {
        let pool = memory_pool().await;
        let id = insert_product(&pool, &details("Bike"), None).await.unwrap().id;
        let result = sqlx::query("UPDATE products SET is_sold = 1 WHERE id = ?")
            .bind(id)
            .execute(&pool)
            .await;
        assert!(result.is_err(), "CHECK constraint must reject is_sold without sale data");
    }
}
