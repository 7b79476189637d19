use axum::extract::FromRequest;

use crate::error::AuthError;

/// JSON request body whose rejections render as validation errors.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AuthError))]
pub struct AppJson<T>(pub T);
