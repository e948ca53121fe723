pub mod form;
pub mod product;

pub use form::{ImageUpload, ProductForm};
pub use product::{Product, ProductDetails, UpdateProduct};
