use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::{header::CONTENT_TYPE, StatusCode},
    Form,
};

use crate::{
    error::AppError,
    models::{ImageUpload, ProductForm},
};

/// Accepts `multipart/form-data` (the only way to attach an image) or a plain
/// urlencoded form.
#[async_trait]
impl<S> FromRequest<S> for ProductForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            read_multipart(multipart).await
        } else {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            let mut form = ProductForm::new();
            for (name, value) in pairs {
                form.insert(name, value);
            }
            Ok(form)
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<ProductForm, AppError> {
    let mut form = ProductForm::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| body_error(e.status(), e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        if name == "image" {
            let file_name = field.file_name().unwrap_or_default().to_owned();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            // Browsers send an empty part when no file was chosen.
            if form.image.is_none() && !file_name.is_empty() && !bytes.is_empty() {
                form.image = Some(ImageUpload { file_name, bytes });
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            form.insert(name, value);
        }
    }

    Ok(form)
}

fn body_error(status: StatusCode, message: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::Validation(message)
    }
}
