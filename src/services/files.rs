use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::database::Store;
use crate::error::AppError;
use crate::models::files::{FileRecord, NewFileRecord};
use crate::services::blobs::BlobStore;
use crate::services::context::is_text_mime;
use crate::services::ownership::{assert_file_access, assert_project_access};

/// A file as received from the client, before it is stored.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

pub struct FileService {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    max_upload_bytes: usize,
}

impl FileService {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>, max_upload_bytes: usize) -> Self {
        Self {
            store,
            blobs,
            max_upload_bytes,
        }
    }

    pub async fn list_files(&self, user_id: Uuid, project_id: Uuid) -> Result<Vec<FileRecord>, AppError> {
        assert_project_access(self.store.as_ref(), user_id, project_id).await?;
        Ok(self.store.list_files(project_id, None).await?)
    }

    pub async fn upload_file(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        upload: Upload,
    ) -> Result<FileRecord, AppError> {
        assert_project_access(self.store.as_ref(), user_id, project_id).await?;

        if upload.bytes.len() > self.max_upload_bytes {
            return Err(AppError::bad_request(
                "file_too_large",
                format!("files may be at most {} bytes", self.max_upload_bytes),
            ));
        }
        let mime = normalize_mime(&upload.mime);
        if mime != "application/pdf" && !is_text_mime(&mime) {
            return Err(AppError::bad_request(
                "unsupported_file_type",
                format!("'{mime}' files are not supported"),
            ));
        }

        let locator = self.blobs.put(&upload.bytes).await?;
        let name = match upload.name.trim() {
            "" => "upload".to_owned(),
            name => name.to_owned(),
        };
        let record = NewFileRecord {
            id: Uuid::new_v4(),
            project_id,
            user_id,
            name,
            mime,
            size: upload.bytes.len() as i64,
            storage_locator: locator.clone(),
            created_at: Utc::now(),
        };

        match self.store.insert_file(record).await {
            Ok(file) => {
                info!("Stored file {} ({} bytes) in project {}", file.id, file.size, project_id);
                Ok(file)
            }
            Err(e) => {
                if let Err(cleanup) = self.blobs.remove(&locator).await {
                    warn!("Failed to remove orphaned blob {locator}: {cleanup}");
                }
                Err(e.into())
            }
        }
    }

    pub async fn delete_file(&self, user_id: Uuid, file_id: Uuid) -> Result<(), AppError> {
        let file = assert_file_access(self.store.as_ref(), user_id, file_id).await?;
        if let Err(e) = self.blobs.remove(&file.storage_locator).await {
            warn!("Failed to remove blob for file {file_id}: {e}");
        }
        self.store.delete_file(file_id).await?;
        info!("Deleted file {file_id}");
        Ok(())
    }
}

/// `Text/Plain; charset=utf-8` -> `text/plain`
fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}
