use std::time::Instant;

use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use tokio::sync::MutexGuard;
use tracing::{debug, error, info, warn};

use crate::{
    db,
    error::{AppError, AppResult},
    models::{ImageUpload, Product, ProductForm},
    uploads::StagedImage,
    AppState,
};

// ── List ──────────────────────────────────────────────────────────────────────

pub async fn list_products(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<Vec<Product>>)> {
    let start = Instant::now();
    let products = db::fetch_all_products(&state.db).await?;
    let elapsed = start.elapsed();

    info!(
        count = products.len(),
        elapsed_ms = elapsed.as_millis(),
        "Listed products"
    );

    Ok((StatusCode::OK, Json(products)))
}

// ── Create ────────────────────────────────────────────────────────────────────

pub async fn create_product(
    State(state): State<AppState>,
    form: ProductForm,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let (details, image) = form.into_create()?;
    let staged = stage(&state, image.as_ref()).await?;

    let start = Instant::now();
    let _publish = lock_if_staged(&state, &staged).await;
    let product =
        match db::insert_product(&state.db, &details, staged.as_ref().map(StagedImage::url)).await {
            Ok(product) => product,
            Err(e) => {
                discard(staged).await;
                return Err(e);
            }
        };
    let elapsed = start.elapsed();

    if let Some(staged) = staged {
        promote(staged, product.id).await?;
    }

    info!(
        id = product.id,
        name = %product.product_name,
        image = ?product.image,
        elapsed_ms = elapsed.as_millis(),
        "Created product"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Product added successfully!" })),
    ))
}

// ── Update ────────────────────────────────────────────────────────────────────

pub async fn update_product(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    form: Result<ProductForm, AppError>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    // A non-numeric id can never name a row.
    let Path(id) = path.map_err(|_| AppError::NotFound("Product not found".to_string()))?;
    // An unknown id is a 404 whatever the body holds.
    db::ensure_product_exists(&state.db, id).await?;
    let (update, image) = form?.into_update()?;
    let staged = stage(&state, image.as_ref()).await?;

    let start = Instant::now();
    let _publish = lock_if_staged(&state, &staged).await;
    let updated =
        match db::update_product(&state.db, id, &update, staged.as_ref().map(StagedImage::url))
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                discard(staged).await;
                return Err(e);
            }
        };
    let elapsed = start.elapsed();

    if let Some(staged) = staged {
        promote(staged, id).await?;
    }

    if let Some(old) = &updated.replaced_image {
        if let Err(e) = release(&state, old).await {
            warn!(id, image = %old, error = %e, "Failed to remove replaced image");
        }
    }

    info!(
        id,
        sale = ?updated.product.sale(),
        image = ?updated.product.image,
        elapsed_ms = elapsed.as_millis(),
        "Updated product"
    );

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Product updated successfully!" })),
    ))
}

// ── Uploads ───────────────────────────────────────────────────────────────────

async fn stage(state: &AppState, image: Option<&ImageUpload>) -> AppResult<Option<StagedImage>> {
    match image {
        Some(upload) => Ok(Some(state.uploads.stage(upload).await?)),
        None => Ok(None),
    }
}

/// Requests without an upload never touch the public directory and skip the lock.
async fn lock_if_staged<'a>(
    state: &'a AppState,
    staged: &Option<StagedImage>,
) -> Option<MutexGuard<'a, ()>> {
    match staged {
        Some(_) => Some(state.uploads.lock().await),
        None => None,
    }
}

async fn discard(staged: Option<StagedImage>) {
    if let Some(staged) = staged {
        staged.discard().await;
    }
}

/// Runs after the row has committed, so a failure here leaves the row pointing
/// at a file that never arrived.
async fn promote(staged: StagedImage, id: i64) -> AppResult<()> {
    let url = staged.url().to_string();
    staged.promote().await.map_err(|e| {
        error!(id, image = %url, error = %e, "Row committed but image could not be moved into place");
        AppError::Upload(e)
    })
}

/// Deletes a replaced image unless some row still references it. The caller
/// must hold the upload lock, otherwise a concurrent request could publish a
/// same-named file between the count and the removal.
async fn release(state: &AppState, image: &str) -> AppResult<bool> {
    let refs = db::count_image_references(&state.db, image).await?;
    if refs > 0 {
        debug!(image = %image, refs, "Replaced image still referenced");
        return Ok(false);
    }
    state.uploads.remove(image).await?;
    Ok(true)
}
