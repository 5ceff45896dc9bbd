//! Schedule-scoped draft persistence with debounced auto-save.
//!
//! The draft is a sanitized projection of the report state: only
//! uploaded images with durable URLs survive, because blob previews
//! and raw file handles do not outlive the session. A stored draft is
//! only ever restored into the schedule it was saved under; a mismatch
//! deletes it so one work order's data can never bleed into another.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    model::{ImageRecord, Section, Tab},
    state::{self, SharedState},
    storage::DraftStorage,
};

/// The single storage slot for the draft blob, app-wide.
pub const DRAFT_KEY: &str = "report_draft";

/// Default quiet window before a burst of changes is persisted.
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;

/// Persisted projection of the report state.
#[derive(Debug, Serialize, Deserialize)]
pub struct Draft {
    /// Schedule this draft belongs to; gates restore.
    #[serde(rename = "scheduleId")]
    pub schedule_id: String,
    /// Sanitized sections per tab, keyed by section id.
    pub sections: DraftSections,
    /// Tab that was active when the draft was saved.
    #[serde(rename = "activeTab")]
    pub active_tab: Tab,
    /// Uploaded, durable stock images.
    #[serde(rename = "imageStock", default, skip_serializing_if = "Vec::is_empty")]
    pub image_stock: Vec<ImageRecord>,
    /// Bookkeeping metadata.
    pub meta: DraftMeta,
}

/// Draft bookkeeping fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct DraftMeta {
    /// Save time in epoch milliseconds.
    pub timestamp: i64,
}

/// Per-tab section maps in the persisted layout.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DraftSections {
    /// Sections of the "new" tab.
    #[serde(with = "section_map", default)]
    pub new: Vec<Section>,
    /// Sections of the "proposal" tab.
    #[serde(with = "section_map", default)]
    pub proposal: Vec<Section>,
}

/// Serializes a section list as a `{id: section}` object, the layout
/// the draft blob uses on the wire. Entries are read back in document
/// order so display order survives a save/restore round-trip; ids are
/// re-imposed from the keys on read.
mod section_map {
    use super::Section;
    use serde::{
        Deserializer, Serializer,
        de::{MapAccess, Visitor},
        ser::SerializeMap,
    };
    use std::fmt;

    pub fn serialize<S: Serializer>(v: &[Section], s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(v.len()))?;
        for section in v {
            map.serialize_entry(&section.id, section)?;
        }
        map.end()
    }

    struct SectionMapVisitor;

    impl<'de> Visitor<'de> for SectionMapVisitor {
        type Value = Vec<Section>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of section id to section")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut sections = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((id, mut section)) = map.next_entry::<String, Section>()? {
                // The map key is authoritative for the section id.
                section.id = id;
                sections.push(section);
            }
            Ok(sections)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Section>, D::Error> {
        d.deserialize_map(SectionMapVisitor)
    }
}

/// Deep-copy sections, dropping everything that cannot survive a
/// reload: non-persistable photos are filtered out and blob-backed
/// custom images are nulled.
fn sanitize_sections(sections: &[Section]) -> Vec<Section> {
    sections
        .iter()
        .map(|section| {
            let mut section = section.clone();
            for content in &mut section.image_contents {
                for category in [
                    &mut content.photos.before,
                    &mut content.photos.after,
                    &mut content.photos.completed,
                ] {
                    category.retain(|r| r.is_persistable());
                    for record in category.iter_mut() {
                        *record = record.persisted_copy();
                    }
                }
            }
            for custom in &mut section.custom_contents {
                match &custom.image {
                    Some(image) if image.is_persistable() => {
                        custom.image = Some(image.persisted_copy());
                    }
                    Some(_) => custom.image = None,
                    None => {}
                }
            }
            section
        })
        .collect()
}

/// Stock slice restricted to uploaded, durable entries.
fn sanitize_stock(stock: &[ImageRecord]) -> Vec<ImageRecord> {
    stock
        .iter()
        .filter(|r| r.is_persistable())
        .map(|r| {
            let mut r = r.persisted_copy();
            r.kind = Some("stock".into());
            r
        })
        .collect()
}

/// Debounced, schedule-scoped persistence of the report state.
///
/// The store is schedule-agnostic until `set_schedule_id` or a
/// successful `restore`; before that every save is a guaranteed no-op,
/// because there is nothing it would be safe to scope the draft to.
pub struct AutoSaveDraftStore {
    state: SharedState,
    storage: Arc<dyn DraftStorage>,
    schedule_id: Arc<Mutex<Option<String>>>,
    tx: mpsc::Sender<()>,
}

impl AutoSaveDraftStore {
    /// Create the store and spawn its debounce task.
    pub fn new(state: SharedState, storage: Arc<dyn DraftStorage>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<()>(8);
        let schedule_id = Arc::new(Mutex::new(None));
        tokio::spawn(debounce_loop(
            rx,
            Arc::clone(&state),
            Arc::clone(&storage),
            Arc::clone(&schedule_id),
            debounce,
        ));
        Self {
            state,
            storage,
            schedule_id,
            tx,
        }
    }

    /// Create the store with the default 2s debounce window.
    pub fn with_default_debounce(state: SharedState, storage: Arc<dyn DraftStorage>) -> Self {
        Self::new(state, storage, Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }

    /// Subscribe to the report store so every change schedules a save.
    pub fn attach(&self) {
        let tx = self.tx.clone();
        state::lock(&self.state).subscribe(Box::new(move |_| {
            // A full channel already has a save pending; dropping the
            // signal loses nothing.
            let _ = tx.try_send(());
        }));
    }

    /// Reset the debounce window; only the last change in a burst
    /// actually reaches storage.
    pub fn schedule_save(&self) {
        let _ = self.tx.try_send(());
    }

    /// Bind the schedule the draft will be scoped to.
    pub fn set_schedule_id(&self, schedule_id: &str) {
        let mut sid = self.schedule_id.lock().unwrap_or_else(|e| e.into_inner());
        *sid = Some(schedule_id.to_string());
    }

    /// Persist a sanitized snapshot now. Failures are logged and
    /// degrade to "no draft"; they are never raised to the caller.
    pub fn save(&self) {
        save_now(&self.state, self.storage.as_ref(), &self.schedule_id);
    }

    /// Restore the stored draft into the report state.
    ///
    /// Returns false when no draft exists or it cannot be read. A draft
    /// saved under a different schedule is actively deleted and not
    /// restored; that guard is what keeps one work order's sections out
    /// of another when the user navigates schedules in the same tab.
    pub fn restore(&self, current_schedule_id: &str) -> bool {
        let raw = match self.storage.get(DRAFT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!("draft read failed: {e}");
                return false;
            }
        };
        let draft: Draft = match serde_json::from_str(&raw) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("draft unreadable, treating as absent: {e}");
                return false;
            }
        };
        if draft.schedule_id != current_schedule_id {
            tracing::warn!(
                "draft belongs to schedule {}, not {}; clearing",
                draft.schedule_id,
                current_schedule_id
            );
            self.clear();
            return false;
        }

        self.set_schedule_id(current_schedule_id);
        // Replace, not merge; listeners are notified exactly once.
        state::lock(&self.state).install_draft(
            draft.sections.new,
            draft.sections.proposal,
            draft.active_tab,
            draft.image_stock,
        );
        tracing::info!("draft restored for schedule {current_schedule_id}");
        true
    }

    /// Delete the stored draft.
    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(DRAFT_KEY) {
            tracing::warn!("draft clear failed: {e}");
        }
    }
}

/// Collapse bursts of change signals into one save per quiet window.
async fn debounce_loop(
    mut rx: mpsc::Receiver<()>,
    state: SharedState,
    storage: Arc<dyn DraftStorage>,
    schedule_id: Arc<Mutex<Option<String>>>,
    window: Duration,
) {
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(window, rx.recv()).await {
                // Another change arrived; the window starts over.
                Ok(Some(())) => continue,
                // Channel closed: flush once and stop.
                Ok(None) => {
                    save_now(&state, storage.as_ref(), &schedule_id);
                    return;
                }
                // Quiet window elapsed.
                Err(_) => break,
            }
        }
        save_now(&state, storage.as_ref(), &schedule_id);
    }
}

/// Build and write the sanitized draft blob.
fn save_now(
    state: &SharedState,
    storage: &dyn DraftStorage,
    schedule_id: &Arc<Mutex<Option<String>>>,
) {
    let sid = {
        let sid = schedule_id.lock().unwrap_or_else(|e| e.into_inner());
        match sid.as_ref() {
            Some(s) => s.clone(),
            None => {
                // Nothing it would be safe to scope the save to.
                tracing::debug!("save skipped: no schedule bound");
                return;
            }
        }
    };

    let draft = {
        let st = state::lock(state);
        Draft {
            schedule_id: sid,
            sections: DraftSections {
                new: sanitize_sections(st.sections(Tab::New)),
                proposal: sanitize_sections(st.sections(Tab::Proposal)),
            },
            active_tab: st.active_tab,
            image_stock: sanitize_stock(&st.image_stock),
            meta: DraftMeta {
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        }
    };

    match serde_json::to_string(&draft) {
        Ok(json) => {
            if let Err(e) = storage.set(DRAFT_KEY, &json) {
                tracing::warn!("draft write failed: {e}");
            } else {
                tracing::info!("draft saved for schedule {}", draft.schedule_id);
            }
        }
        Err(e) => tracing::warn!("draft serialize failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CustomContent, CustomContentPatch, ImageFile, ImagePatch, ImageStatus, PhotoCategory,
        Section, SectionType,
    };
    use crate::storage::MemoryDraftStorage;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jpeg(name: &str) -> ImageFile {
        ImageFile {
            name: name.into(),
            mime: "image/jpeg".into(),
            bytes: vec![0xff],
        }
    }

    fn uploaded(name: &str) -> ImageRecord {
        let mut r = ImageRecord::local_preview(jpeg(name));
        ImagePatch::uploaded(
            format!("https://cdn.example.com/{name}"),
            format!("srv-{name}"),
        )
        .apply(&mut r);
        r
    }

    /// 状態を組み立てる：アップロード済み1枚＋途中1枚＋自由ブロック。
    fn populate(state: &SharedState) -> String {
        let mut st = state::lock(state);
        let id = st.add_section(Tab::New, Section::new(SectionType::Cleaning, "床・共用部清掃"));
        st.patch_haccp_field(Tab::New, &id, "work_type", "定期");
        st.add_image_to_section(Tab::New, &id, PhotoCategory::Before, uploaded("done.jpg"));
        st.add_image_to_section(
            Tab::New,
            &id,
            PhotoCategory::After,
            ImageRecord::local_preview(jpeg("pending.jpg")),
        );
        let block = CustomContent::image_slot();
        let block_id = block.id.clone();
        st.add_custom_content(Tab::New, &id, block);
        st.update_custom_content(
            Tab::New,
            &id,
            &block_id,
            CustomContentPatch {
                image: Some(ImageRecord::local_preview(jpeg("blob.jpg"))),
                ..Default::default()
            },
        );
        st.set_active_tab(Tab::Proposal);
        id
    }

    #[tokio::test]
    async fn test_save_before_schedule_binding_is_noop() {
        // スケジュール未確定のうちは何も書かれない。
        let state = state::shared();
        let storage = Arc::new(MemoryDraftStorage::new());
        let store = AutoSaveDraftStore::new(
            Arc::clone(&state),
            storage.clone() as Arc<dyn DraftStorage>,
            Duration::from_millis(10),
        );
        populate(&state);
        store.save();
        assert_eq!(storage.get(DRAFT_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_roundtrip_keeps_persistable_and_drops_rest() {
        // 保存→復元でアップロード済みだけが往復し、途中の画像は落ちる。
        let state = state::shared();
        let storage: Arc<dyn DraftStorage> = Arc::new(MemoryDraftStorage::new());
        let store =
            AutoSaveDraftStore::new(Arc::clone(&state), storage, Duration::from_millis(10));
        let section_id = populate(&state);
        store.set_schedule_id("S1");
        store.save();

        // 復元前に状態を壊しておく。
        state::lock(&state).install_draft(vec![], vec![], Tab::New, vec![]);

        assert!(store.restore("S1"));
        let st = state::lock(&state);
        assert_eq!(st.active_tab, Tab::Proposal);
        let section = st.find_section(Tab::New, &section_id).unwrap();
        assert_eq!(section.item_name, "床・共用部清掃");
        assert_eq!(section.haccp_info.get("work_type").map(String::as_str), Some("定期"));
        let photos = &section.image_contents[0].photos;
        // before のアップロード済みは残る。
        assert_eq!(photos.before.len(), 1);
        assert_eq!(photos.before[0].status, ImageStatus::Uploaded);
        assert_eq!(
            photos.before[0].url.as_deref(),
            Some("https://cdn.example.com/done.jpg")
        );
        // after の途中の画像は捨てられる。
        assert!(photos.after.is_empty());
        // blob裏付けの自由ブロック画像はnullになる。
        assert!(section.custom_contents[0].image.is_none());
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        // 同じドラフトを2回復元しても結果は同じ。
        let state = state::shared();
        let storage: Arc<dyn DraftStorage> = Arc::new(MemoryDraftStorage::new());
        let store =
            AutoSaveDraftStore::new(Arc::clone(&state), storage, Duration::from_millis(10));
        populate(&state);
        store.set_schedule_id("S1");
        store.save();

        assert!(store.restore("S1"));
        let first = state::lock(&state).sections(Tab::New).to_vec();
        assert!(store.restore("S1"));
        let second = state::lock(&state).sections(Tab::New).to_vec();
        assert_eq!(
            serde_json::to_value(&DraftSections {
                new: first,
                proposal: vec![]
            })
            .unwrap(),
            serde_json::to_value(&DraftSections {
                new: second,
                proposal: vec![]
            })
            .unwrap()
        );
    }

    #[tokio::test]
    async fn test_restore_preserves_section_order() {
        // セクションの表示順（挿入順）が復元後も保たれる。
        // IDを逆順にしておき、キーの辞書順に並び替わらないことを確かめる。
        let state = state::shared();
        let storage: Arc<dyn DraftStorage> = Arc::new(MemoryDraftStorage::new());
        let store =
            AutoSaveDraftStore::new(Arc::clone(&state), storage, Duration::from_millis(10));
        {
            let mut st = state::lock(&state);
            for id in ["section-c", "section-b", "section-a"] {
                let mut section = Section::new(SectionType::Cleaning, "定期清掃");
                section.id = id.into();
                st.add_section(Tab::New, section);
            }
        }
        store.set_schedule_id("S1");
        store.save();
        state::lock(&state).install_draft(vec![], vec![], Tab::New, vec![]);

        assert!(store.restore("S1"));
        let st = state::lock(&state);
        let ids: Vec<&str> = st.sections(Tab::New).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["section-c", "section-b", "section-a"]);
    }

    #[tokio::test]
    async fn test_cross_schedule_draft_is_deleted_not_restored() {
        // 別スケジュールのドラフトは復元されず、削除される。状態も無傷。
        let state = state::shared();
        let storage = Arc::new(MemoryDraftStorage::new());
        let store = AutoSaveDraftStore::new(
            Arc::clone(&state),
            storage.clone() as Arc<dyn DraftStorage>,
            Duration::from_millis(10),
        );
        populate(&state);
        store.set_schedule_id("S1");
        store.save();

        // 新しい作業の開始を模して状態を空に戻す。
        state::lock(&state).install_draft(vec![], vec![], Tab::New, vec![]);

        assert!(!store.restore("S2"));
        assert_eq!(storage.get(DRAFT_KEY).unwrap(), None);
        let st = state::lock(&state);
        assert!(st.sections(Tab::New).is_empty());
        assert_eq!(st.active_tab, Tab::New);
    }

    #[tokio::test]
    async fn test_corrupt_draft_treated_as_absent() {
        // 壊れたJSONは「ドラフト無し」に落ちる（削除はしない）。
        let state = state::shared();
        let storage = Arc::new(MemoryDraftStorage::new());
        storage.set(DRAFT_KEY, "{broken").unwrap();
        let store = AutoSaveDraftStore::new(
            Arc::clone(&state),
            storage.clone() as Arc<dyn DraftStorage>,
            Duration::from_millis(10),
        );
        assert!(!store.restore("S1"));
        assert!(state::lock(&state).sections(Tab::New).is_empty());
    }

    #[tokio::test]
    async fn test_stock_slice_restricted_to_uploaded() {
        // 在庫はアップロード済み・非blobのものだけが "stock" 付きで残る。
        let state = state::shared();
        let storage = Arc::new(MemoryDraftStorage::new());
        let store = AutoSaveDraftStore::new(
            Arc::clone(&state),
            storage.clone() as Arc<dyn DraftStorage>,
            Duration::from_millis(10),
        );
        {
            let mut st = state::lock(&state);
            st.add_to_stock(uploaded("kept.jpg"));
            st.add_to_stock(ImageRecord::stock_preview(jpeg("dropped.jpg")));
        }
        store.set_schedule_id("S1");
        store.save();

        let raw = storage.get(DRAFT_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let stock = value["imageStock"].as_array().unwrap();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0]["status"], "uploaded");
        assert_eq!(stock[0]["type"], "stock");
        assert_eq!(stock[0]["url"], "https://cdn.example.com/kept.jpg");
        // セクションはIDをキーにしたオブジェクトで永続化される。
        assert!(value["sections"]["new"].is_object());
        assert_eq!(value["scheduleId"], "S1");
    }

    /// 書き込み回数を数えるテスト用ストレージ。
    struct CountingStorage {
        inner: MemoryDraftStorage,
        sets: AtomicUsize,
    }

    impl DraftStorage for CountingStorage {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_debounce_coalesces_burst_into_one_write() {
        // 連打の最後の1回だけが書き込まれる。
        let state = state::shared();
        let storage = Arc::new(CountingStorage {
            inner: MemoryDraftStorage::new(),
            sets: AtomicUsize::new(0),
        });
        let store = AutoSaveDraftStore::new(
            Arc::clone(&state),
            storage.clone() as Arc<dyn DraftStorage>,
            Duration::from_millis(40),
        );
        store.set_schedule_id("S1");
        store.attach();

        {
            let mut st = state::lock(&state);
            for i in 0..5 {
                st.add_section(
                    Tab::New,
                    Section::new(SectionType::Cleaning, format!("項目{i}")),
                );
            }
        }
        // 静止期間を待ってから書き込み回数を確認する。
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(storage.sets.load(Ordering::SeqCst), 1);
        assert!(storage.get(DRAFT_KEY).unwrap().is_some());
    }
}
