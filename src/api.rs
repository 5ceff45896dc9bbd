//! Injected collaborator interfaces.
//!
//! Every manager receives these as constructor arguments instead of
//! resolving shared singletons at call time, so tests can substitute
//! fakes and the engine never touches the network on its own.

use crate::model::{ImageFile, PhotoCategory, ScheduleSummary};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Result of a successful image upload.
#[derive(Clone, Debug, Deserialize)]
pub struct UploadedImage {
    /// Server-side id of the stored image.
    pub id: String,
    /// Durable remote URL.
    pub url: String,
}

/// Uploads a single image and returns its durable location.
#[async_trait]
pub trait UploadService: Send + Sync {
    /// Upload `file` under the given category and report context.
    /// Must return an error on failure; the caller marks the record.
    async fn upload_image(
        &self,
        file: &ImageFile,
        category: PhotoCategory,
        report_id: Option<&str>,
        date: Option<&str>,
    ) -> Result<UploadedImage>;
}

/// Persists and fetches whole report records.
#[async_trait]
pub trait ReportService: Send + Sync {
    /// Create or update a report; returns the server record.
    async fn save_report(
        &self,
        report: &serde_json::Value,
        is_edit_mode: bool,
    ) -> Result<serde_json::Value>;

    /// Fetch a report by id; None when the server has no such record.
    async fn fetch_report(&self, report_id: &str) -> Result<Option<serde_json::Value>>;
}

/// Supplies the schedule list and the per-schedule service item catalog.
/// Read-only from the engine's perspective.
#[async_trait]
pub trait ScheduleLoader: Send + Sync {
    /// List schedule summaries for the current user.
    async fn list_schedules(&self) -> Result<Vec<ScheduleSummary>>;

    /// Declared service items for one schedule.
    async fn service_items(&self, schedule_id: &str) -> Result<Vec<String>>;
}
