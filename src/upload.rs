//! Optimistic image upload pipeline.
//!
//! A selected file becomes visible immediately as a local preview
//! record; the network upload runs in a background task and patches
//! the same record by its local id when it settles. A failed upload
//! keeps the preview so the user never loses the photo.

use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::{
    api::UploadService,
    model::{ImageFile, ImagePatch, ImageRecord, PhotoCategory, Tab},
    state::{self, SharedState},
};

/// Orchestrates optimistic inserts and background uploads.
pub struct ImageUploadManager {
    state: SharedState,
    api: Arc<dyn UploadService>,
    /// Server-side report id, present in edit mode only.
    report_id: Option<String>,
}

impl ImageUploadManager {
    /// Create a manager with its collaborators injected.
    pub fn new(state: SharedState, api: Arc<dyn UploadService>) -> Self {
        Self {
            state,
            api,
            report_id: None,
        }
    }

    /// Bind an existing server report id (edit mode).
    pub fn set_report_id(&mut self, report_id: impl Into<String>) {
        self.report_id = Some(report_id.into());
    }

    /// Work date passed along to the upload service.
    fn current_date(&self) -> Option<String> {
        let st = state::lock(&self.state);
        let date = st.meta.date.clone();
        if date.is_empty() { None } else { Some(date) }
    }

    /// Upload one file into a section slot.
    ///
    /// The preview record is inserted synchronously before this method
    /// returns, so the UI shows the photo regardless of network latency.
    /// Returns the local record id and the background task handle.
    pub fn upload_to_section(
        &self,
        tab: Tab,
        section_id: &str,
        category: PhotoCategory,
        file: ImageFile,
    ) -> (String, JoinHandle<()>) {
        let record = ImageRecord::local_preview(file.clone());
        let record_id = record.id.clone();
        {
            let mut st = state::lock(&self.state);
            st.add_image_to_section(tab, section_id, category, record);
        }
        tracing::info!("upload queued: {} -> {}/{}", record_id, section_id, category.as_str());

        let state = Arc::clone(&self.state);
        let api = Arc::clone(&self.api);
        let section_id = section_id.to_string();
        let report_id = self.report_id.clone();
        let date = self.current_date();
        let id = record_id.clone();
        let handle = tokio::spawn(async move {
            let patch = run_upload(&api, &file, category, report_id.as_deref(), date.as_deref(), &id).await;
            // A deleted section or record makes this a silent no-op.
            state::lock(&state).update_section_image(tab, &section_id, category, &id, patch);
        });
        (record_id, handle)
    }

    /// Upload a batch of files into the stock holding area.
    ///
    /// Every record is inserted before any network call begins, then
    /// each file uploads in its own task; one failure never affects
    /// the others. There is no automatic retry. The category is the
    /// caller's choice and travels to the upload service unchanged;
    /// it does not pin where the image can later be dropped.
    pub fn upload_to_stock(
        &self,
        files: Vec<ImageFile>,
        category: PhotoCategory,
    ) -> Vec<(String, JoinHandle<()>)> {
        // Insert all previews first so the whole batch shows up at once.
        let records: Vec<ImageRecord> = files.iter().cloned().map(ImageRecord::stock_preview).collect();
        {
            let mut st = state::lock(&self.state);
            for record in records.iter().cloned() {
                st.add_to_stock(record);
            }
        }
        tracing::info!("stock upload queued: {} files", files.len());

        let report_id = self.report_id.clone();
        let date = self.current_date();
        records
            .into_iter()
            .zip(files)
            .map(|(record, file)| {
                let state = Arc::clone(&self.state);
                let api = Arc::clone(&self.api);
                let report_id = report_id.clone();
                let date = date.clone();
                let id = record.id.clone();
                let handle_id = id.clone();
                let handle = tokio::spawn(async move {
                    let patch = run_upload(
                        &api,
                        &file,
                        category,
                        report_id.as_deref(),
                        date.as_deref(),
                        &id,
                    )
                    .await;
                    state::lock(&state).update_stock_image(&id, patch);
                });
                (handle_id, handle)
            })
            .collect()
    }

    /// Apply a drag-and-drop payload onto a drop zone.
    ///
    /// The payload carries the source image id as JSON; the target slot
    /// comes from the zone the user dropped onto. Malformed payloads
    /// are logged and ignored.
    pub fn handle_drop_payload(
        &self,
        payload_json: &str,
        target_section_id: &str,
        category: PhotoCategory,
    ) {
        let payload: DropPayload = match serde_json::from_str(payload_json) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("drop payload ignored: {e}");
                return;
            }
        };
        state::lock(&self.state).move_image_to_section(&payload.image_id, target_section_id, category);
    }
}

/// JSON payload attached to a dragged image.
#[derive(Debug, Deserialize)]
struct DropPayload {
    /// Local id of the dragged image.
    #[serde(rename = "imageId")]
    image_id: String,
}

/// Run one upload and map the outcome to a record patch.
async fn run_upload(
    api: &Arc<dyn UploadService>,
    file: &ImageFile,
    category: PhotoCategory,
    report_id: Option<&str>,
    date: Option<&str>,
    record_id: &str,
) -> ImagePatch {
    match api.upload_image(file, category, report_id, date).await {
        Ok(uploaded) => {
            tracing::info!("upload done: {} -> {}", record_id, uploaded.url);
            ImagePatch::uploaded(uploaded.url, uploaded.id)
        }
        Err(e) => {
            // Keep the preview; the user re-triggers the upload manually.
            tracing::error!("upload failed: {}: {e}", record_id);
            ImagePatch::failed()
        }
    }
}
