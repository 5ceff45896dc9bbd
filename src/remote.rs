//! HTTP adapters for the collaborator interfaces.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::{
    api::{ReportService, ScheduleLoader, UploadService, UploadedImage},
    config::UploadCfg,
    model::{ImageFile, PhotoCategory, ScheduleSummary},
};

/// Uploads images to the report API with a multipart POST.
pub struct HttpUploadService {
    http: Client,
    endpoint: String,
}

impl HttpUploadService {
    /// Create a service against the given API base URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Create a service from config, honoring the request timeout.
    pub fn from_config(cfg: &UploadCfg) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
        })
    }
}

#[async_trait]
impl UploadService for HttpUploadService {
    async fn upload_image(
        &self,
        file: &ImageFile,
        category: PhotoCategory,
        report_id: Option<&str>,
        date: Option<&str>,
    ) -> Result<UploadedImage> {
        // Context rides in the query string; the body is the image.
        let mut url = format!(
            "{}/images?category={}",
            self.endpoint,
            urlencoding::encode(category.as_str())
        );
        if let Some(report_id) = report_id {
            url.push_str(&format!("&reportId={}", urlencoding::encode(report_id)));
        }
        if let Some(date) = date {
            url.push_str(&format!("&date={}", urlencoding::encode(date)));
        }

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.name.clone())
                .mime_str(&file.mime)?,
        );

        let uploaded = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json::<UploadedImage>()
            .await?;
        Ok(uploaded)
    }
}

/// Talks to the report persistence endpoints as JSON.
pub struct HttpReportService {
    http: Client,
    endpoint: String,
}

impl HttpReportService {
    /// Create a service against the given API base URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ReportService for HttpReportService {
    async fn save_report(
        &self,
        report: &serde_json::Value,
        is_edit_mode: bool,
    ) -> Result<serde_json::Value> {
        let req = if is_edit_mode {
            // Editing updates the existing record in place.
            let id = report["id"]
                .as_str()
                .ok_or_else(|| anyhow!("report id required in edit mode"))?;
            self.http.put(format!("{}/reports/{}", self.endpoint, id))
        } else {
            self.http.post(format!("{}/reports", self.endpoint))
        };
        let record = req
            .json(report)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        Ok(record)
    }

    async fn fetch_report(&self, report_id: &str) -> Result<Option<serde_json::Value>> {
        let resp = self
            .http
            .get(format!(
                "{}/reports/{}",
                self.endpoint,
                urlencoding::encode(report_id)
            ))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = resp.error_for_status()?.json::<serde_json::Value>().await?;
        Ok(Some(record))
    }
}

/// Loads schedules and their declared service items.
pub struct HttpScheduleLoader {
    http: Client,
    endpoint: String,
}

impl HttpScheduleLoader {
    /// Create a loader against the given API base URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ScheduleLoader for HttpScheduleLoader {
    async fn list_schedules(&self) -> Result<Vec<ScheduleSummary>> {
        let schedules = self
            .http
            .get(format!("{}/schedules", self.endpoint))
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ScheduleSummary>>()
            .await?;
        Ok(schedules)
    }

    async fn service_items(&self, schedule_id: &str) -> Result<Vec<String>> {
        let items = self
            .http
            .get(format!(
                "{}/schedules/{}/items",
                self.endpoint,
                urlencoding::encode(schedule_id)
            ))
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<String>>()
            .await?;
        Ok(items)
    }
}
