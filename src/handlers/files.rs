use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use sqlx::Row;

use crate::error::ApiError;
use crate::handlers::auth::AuthUser;
use crate::state::AppState;

/// Streams a stored export back with its original name.
pub async fn download_file(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let id = path.into_inner();

    let r = sqlx::query("SELECT filename, mime, bytes FROM files WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::NotFound("file"))?;

    let filename = r.get::<String, _>("filename");
    let mime = r.get::<String, _>("mime");
    let bytes = r.get::<Vec<u8>, _>("bytes");

    Ok(HttpResponse::Ok()
        .content_type(mime)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename)],
        })
        .body(bytes))
}
