//! 報告書ドメインのモデル定義。

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 報告書のタブ種別。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    /// 新規報告タブ。
    New,
    /// 提案タブ。
    Proposal,
}

impl Tab {
    /// 文字列表現からタブを解決する。未知の値はNone。
    pub fn parse(s: &str) -> Option<Tab> {
        match s {
            "new" => Some(Tab::New),
            "proposal" => Some(Tab::Proposal),
            _ => None,
        }
    }

    /// 永続化・ログ用の文字列表現。
    pub fn as_str(self) -> &'static str {
        match self {
            Tab::New => "new",
            Tab::Proposal => "proposal",
        }
    }
}

/// セクションの種別。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    /// 清掃作業のセクション（HACCP項目付き）。
    Cleaning,
    /// 写真のみのセクション。
    Image,
}

/// 写真のカテゴリ（作業前／作業後／完了）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoCategory {
    /// 作業前。
    Before,
    /// 作業後。
    After,
    /// 完了。
    Completed,
}

impl PhotoCategory {
    /// API・ログ用の文字列表現。
    pub fn as_str(self) -> &'static str {
        match self {
            PhotoCategory::Before => "before",
            PhotoCategory::After => "after",
            PhotoCategory::Completed => "completed",
        }
    }
}

/// 画像1件のライフサイクル状態。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    /// 選択済み・処理前。
    Pending,
    /// アップロード中。
    Uploading,
    /// アップロード完了（リモートURLあり）。
    Uploaded,
    /// アップロード失敗（プレビューは保持）。
    Error,
    /// 削除済み（集計から除外）。
    Removed,
}

/// ユーザーが選択した画像ファイルの実体。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFile {
    /// 元のファイル名。
    pub name: String,
    /// MIMEタイプ（例: image/jpeg）。
    pub mime: String,
    /// 生のバイト列。永続化してはならない。
    pub bytes: Vec<u8>,
}

impl ImageFile {
    /// セッション限定のプレビュー用data URLを生成する。
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// 写真1枚のレコード。選択からリモート保存までを追跡する。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageRecord {
    /// ローカル発行の安定ID。リモートIDで上書きしない。
    pub id: String,
    /// 現在の状態。
    pub status: ImageStatus,
    /// リモートURL。Uploadedのときのみ有効。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// サーバー側のID。アップロード完了後に設定される。
    #[serde(rename = "remoteId", default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// ローカルプレビューURL。セッション限定のため永続化しない。
    #[serde(skip)]
    pub blob_url: Option<String>,
    /// 生ファイル。アップロード前のみ保持し、永続化しない。
    #[serde(skip)]
    pub file: Option<ImageFile>,
    /// 在庫画像のマーカー（"stock"）。
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ImageRecord {
    /// 選択直後のローカルプレビューレコードを作成する。
    pub fn local_preview(file: ImageFile) -> Self {
        Self {
            // 安定IDを発行する。以後このIDで状態を更新する。
            id: Uuid::new_v4().to_string(),
            status: ImageStatus::Uploading,
            url: None,
            remote_id: None,
            // ネットワークに出る前からUIに表示できるようにする。
            blob_url: Some(file.data_url()),
            file: Some(file),
            kind: None,
        }
    }

    /// 在庫（未割当）用のプレビューレコードを作成する。
    pub fn stock_preview(file: ImageFile) -> Self {
        let mut r = Self::local_preview(file);
        r.kind = Some("stock".into());
        r
    }

    /// URLがセッション限定（blob/data）かどうか。
    pub fn is_ephemeral_url(url: &str) -> bool {
        url.starts_with("blob:") || url.starts_with("data:")
    }

    /// リロード後も意味を持つレコードかどうか。
    /// Uploadedかつ非blobのリモートURLを持つものだけが永続化対象。
    pub fn is_persistable(&self) -> bool {
        self.status == ImageStatus::Uploaded
            && self
                .url
                .as_deref()
                .is_some_and(|u| !Self::is_ephemeral_url(u))
    }

    /// 永続化用のクローンを作る（生ファイルとプレビューを落とす）。
    pub fn persisted_copy(&self) -> Self {
        let mut r = self.clone();
        r.file = None;
        r.blob_url = None;
        r
    }
}

/// カテゴリ別の写真バケット。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PhotoBuckets {
    /// 作業前の写真。
    #[serde(default)]
    pub before: Vec<ImageRecord>,
    /// 作業後の写真。
    #[serde(default)]
    pub after: Vec<ImageRecord>,
    /// 完了写真。
    #[serde(default)]
    pub completed: Vec<ImageRecord>,
}

impl PhotoBuckets {
    /// カテゴリに対応するバケットを返す。
    pub fn bucket(&self, category: PhotoCategory) -> &Vec<ImageRecord> {
        match category {
            PhotoCategory::Before => &self.before,
            PhotoCategory::After => &self.after,
            PhotoCategory::Completed => &self.completed,
        }
    }

    /// カテゴリに対応するバケットを可変で返す。
    pub fn bucket_mut(&mut self, category: PhotoCategory) -> &mut Vec<ImageRecord> {
        match category {
            PhotoCategory::Before => &mut self.before,
            PhotoCategory::After => &mut self.after,
            PhotoCategory::Completed => &mut self.completed,
        }
    }

    /// 全カテゴリの写真を走査する。
    pub fn iter_all(&self) -> impl Iterator<Item = &ImageRecord> {
        self.before
            .iter()
            .chain(self.after.iter())
            .chain(self.completed.iter())
    }
}

/// セクション内の写真コンテナ。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageContent {
    /// コンテナID。
    pub id: String,
    /// コンテナ種別（現状は before_after のみ生成する）。
    #[serde(rename = "type")]
    pub content_type: String,
    /// カテゴリ別の写真。
    #[serde(default)]
    pub photos: PhotoBuckets,
}

impl ImageContent {
    /// 既定の before_after コンテナを作成する。
    pub fn before_after() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content_type: "before_after".into(),
            photos: PhotoBuckets::default(),
        }
    }
}

/// 自由ブロックの種別。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomContentKind {
    /// テキストブロック。
    Text,
    /// 画像ブロック。
    Image,
}

/// セクション内の自由ブロック。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomContent {
    /// ブロックID。
    pub id: String,
    /// ブロック種別。
    #[serde(rename = "type")]
    pub kind: CustomContentKind,
    /// テキスト値。
    #[serde(default)]
    pub value: String,
    /// 画像ブロックの写真スロット。
    #[serde(default)]
    pub image: Option<ImageRecord>,
}

impl CustomContent {
    /// テキストブロックを作成する。
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: CustomContentKind::Text,
            value: value.into(),
            image: None,
        }
    }

    /// 空の画像ブロックを作成する。
    pub fn image_slot() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: CustomContentKind::Image,
            value: String::new(),
            image: None,
        }
    }
}

/// 報告書の1セクション（清掃項目または写真ブロック）。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Section {
    /// セクションID。タブ内で一意。
    pub id: String,
    /// セクション種別。
    #[serde(rename = "type")]
    pub section_type: SectionType,
    /// 清掃項目名。HACCP項目と写真要件の解決に使う。
    #[serde(default)]
    pub item_name: String,
    /// 写真コンテナの列。
    #[serde(rename = "imageContents", default)]
    pub image_contents: Vec<ImageContent>,
    /// 自由ブロックの列。
    #[serde(rename = "customContents", default)]
    pub custom_contents: Vec<CustomContent>,
    /// HACCP項目（work_type / abnormal / correction / confirmer / next_date）。
    #[serde(default)]
    pub haccp_info: BTreeMap<String, String>,
}

impl Section {
    /// 新しいセクションを作成する。IDは自動発行する。
    pub fn new(section_type: SectionType, item_name: impl Into<String>) -> Self {
        Self {
            id: format!("section-{}", Uuid::new_v4()),
            section_type,
            item_name: item_name.into(),
            image_contents: vec![],
            custom_contents: vec![],
            haccp_info: BTreeMap::new(),
        }
    }
}

/// セクションへの部分更新。Someの項目だけを浅くマージする。
/// `haccp_info` は全体置換であり、呼び出し側が読み出し→修正→
/// 丸ごと渡す責務を負う。個別キーは `patch_haccp_field` を使う。
#[derive(Clone, Debug, Default)]
pub struct SectionPatch {
    /// 項目名の更新。
    pub item_name: Option<String>,
    /// HACCP項目の全体置換。
    pub haccp_info: Option<BTreeMap<String, String>>,
}

/// 画像レコードへの部分更新。
#[derive(Clone, Debug, Default)]
pub struct ImagePatch {
    /// 状態の更新。
    pub status: Option<ImageStatus>,
    /// リモートURLの設定。
    pub url: Option<String>,
    /// リモートIDの設定。
    pub remote_id: Option<String>,
}

impl ImagePatch {
    /// アップロード成功時のパッチ。
    pub fn uploaded(url: String, remote_id: String) -> Self {
        Self {
            status: Some(ImageStatus::Uploaded),
            url: Some(url),
            remote_id: Some(remote_id),
        }
    }

    /// アップロード失敗時のパッチ。プレビューは残す。
    pub fn failed() -> Self {
        Self {
            status: Some(ImageStatus::Error),
            url: None,
            remote_id: None,
        }
    }

    /// レコードへ適用する。Someの項目だけ上書きする。
    pub fn apply(&self, record: &mut ImageRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(url) = &self.url {
            record.url = Some(url.clone());
        }
        if let Some(remote_id) = &self.remote_id {
            record.remote_id = Some(remote_id.clone());
        }
    }
}

/// 自由ブロックへの部分更新。
#[derive(Clone, Debug, Default)]
pub struct CustomContentPatch {
    /// テキスト値の更新。
    pub value: Option<String>,
    /// 画像スロットへの設定。
    pub image: Option<ImageRecord>,
    /// 画像スロットのクリア。
    pub clear_image: bool,
}

/// 選択中スケジュールから複写する報告書コンテキスト。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReportMeta {
    /// ブランドID。
    #[serde(rename = "brandId", default)]
    pub brand_id: String,
    /// 店舗ID。
    #[serde(rename = "storeId", default)]
    pub store_id: String,
    /// スケジュールID。ドラフトの適用範囲を決める。
    #[serde(rename = "scheduleId", default)]
    pub schedule_id: String,
    /// 作業日（YYYY-MM-DD）。
    #[serde(default)]
    pub date: String,
    /// 開始時刻。
    #[serde(rename = "startTime", default)]
    pub start_time: String,
    /// 終了時刻。
    #[serde(rename = "endTime", default)]
    pub end_time: String,
}

/// 外部ローダーが供給するスケジュール概要。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleSummary {
    /// スケジュールID。
    pub id: String,
    /// 作業日（YYYY-MM-DD）。
    #[serde(default)]
    pub date: String,
    /// 店舗名。
    #[serde(rename = "storeName", default)]
    pub store_name: String,
    /// 予定されている清掃項目名。
    #[serde(rename = "serviceItems", default)]
    pub service_items: Vec<String>,
}
