//! 清掃報告書のドラフト作成エンジン。
//!
//! ブラウザ相当のクライアントが複数セクションの作業報告書
//! （テキスト・写真・HACCP項目）を組み立てるための中核部分：
//! 単一の可変ストア、スケジュール単位の自動保存／復元、
//! 楽観的な画像アップロードパイプライン、写真要件の判定を提供する。
//! 画面描画やマスタ管理は外部協調者であり、このクレートには含まれない。

pub mod api;
pub mod config;
pub mod draft;
pub mod logging;
pub mod model;
pub mod remote;
pub mod rules;
pub mod state;
pub mod storage;
pub mod upload;

pub use api::{ReportService, ScheduleLoader, UploadService, UploadedImage};
pub use config::EngineConfig;
pub use draft::AutoSaveDraftStore;
pub use model::{
    ImageFile, ImageRecord, ImageStatus, PhotoCategory, ReportMeta, ScheduleSummary, Section,
    SectionType, Tab,
};
pub use rules::{SubmissionGate, compute_photo_requirement, count_uploaded_photos};
pub use state::{ReportState, SharedState};
pub use upload::ImageUploadManager;
