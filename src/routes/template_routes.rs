use actix_multipart::Multipart;
use actix_web::{post, web, HttpResponse};
use bytes::BytesMut;
use futures::TryStreamExt;
use tracing::{debug, info};

use crate::errors::{AppError, StorageError};
use crate::templates::TemplateStore;

/// Multipart part carrying the template.
const FILE_FIELD: &str = "file";

/// Stores the uploaded `file` part in the template directory under its
/// client-supplied file name, replacing any template of that name.
#[post("/upload/")]
pub async fn upload_template(
    mut payload: Multipart,
    store: web::Data<TemplateStore>,
) -> Result<HttpResponse, AppError> {
    let mut stored = false;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let is_file = field.name() == Some(FILE_FIELD);
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned);

        let mut contents = BytesMut::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            contents.extend_from_slice(&chunk);
        }

        if !is_file {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }

        let filename = filename.ok_or(StorageError::MissingFilename)?;
        store.save(&filename, &contents).await?;
        info!("Template '{}' uploaded", filename);
        stored = true;
    }

    if !stored {
        return Err(AppError::BadRequest(format!(
            "multipart body has no `{}` part",
            FILE_FIELD
        )));
    }

    Ok(HttpResponse::Ok().json(true))
}
