//! 報告書の単一ストアと購読通知。

use std::sync::{Arc, Mutex, MutexGuard};

use crate::model::{
    CustomContent, CustomContentPatch, ImageContent, ImagePatch, ImageRecord, PhotoCategory,
    ReportMeta, ScheduleSummary, Section, SectionPatch, Tab,
};
use uuid::Uuid;

/// 状態変更の購読コールバック。notify()から同期的に呼ばれる。
pub type Listener = Box<dyn Fn(&ReportState) + Send + Sync>;

/// ページ寿命の間、プロセス内に1つだけ存在する報告書ストア。
/// すべての変更メソッドは、その場で状態を書き換えてから
/// 購読者全員へ同期的に通知する。バッチングはこの層では行わない。
pub struct ReportState {
    /// 表示中のタブ。
    pub active_tab: Tab,
    /// 新規タブのセクション列（挿入順を保持）。
    sections_new: Vec<Section>,
    /// 提案タブのセクション列（挿入順を保持）。
    sections_proposal: Vec<Section>,
    /// どのセクションにも未割当の画像置き場。
    pub image_stock: Vec<ImageRecord>,
    /// 外部ローダーが所有するスケジュール一覧のキャッシュ。
    pub schedules: Vec<ScheduleSummary>,
    /// 選択中スケジュールから複写したコンテキスト。
    pub meta: ReportMeta,
    /// 購読者の列。
    listeners: Vec<Listener>,
}

/// 共有ハンドル。変更は短い同期クリティカルセクションで行う。
pub type SharedState = Arc<Mutex<ReportState>>;

/// 共有ストアを作成する。
pub fn shared() -> SharedState {
    Arc::new(Mutex::new(ReportState::new()))
}

/// ロックを取得する。ポイズンは内側の値を回収して継続する。
pub fn lock(state: &SharedState) -> MutexGuard<'_, ReportState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl ReportState {
    /// 空のストアを作成する。
    pub fn new() -> Self {
        Self {
            active_tab: Tab::New,
            sections_new: vec![],
            sections_proposal: vec![],
            image_stock: vec![],
            schedules: vec![],
            meta: ReportMeta::default(),
            listeners: vec![],
        }
    }

    /// 購読者を登録する。解除手段は提供しない（ページ寿命と同じ）。
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// 全購読者へ同期的に配信する。遅い購読者は後続を塞ぐ。
    pub fn notify(&self) {
        for l in &self.listeners {
            l(self);
        }
    }

    /// タブのセクション列を返す。
    pub fn sections(&self, tab: Tab) -> &[Section] {
        match tab {
            Tab::New => &self.sections_new,
            Tab::Proposal => &self.sections_proposal,
        }
    }

    fn sections_mut(&mut self, tab: Tab) -> &mut Vec<Section> {
        match tab {
            Tab::New => &mut self.sections_new,
            Tab::Proposal => &mut self.sections_proposal,
        }
    }

    /// タブ内のセクションをIDで引く。
    pub fn find_section(&self, tab: Tab, id: &str) -> Option<&Section> {
        self.sections(tab).iter().find(|s| s.id == id)
    }

    /// タブ内の項目名を集める（写真要件の解決に使う）。
    pub fn item_names(&self, tab: Tab) -> Vec<String> {
        self.sections(tab)
            .iter()
            .map(|s| s.item_name.clone())
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// セクションを追加する。IDが空なら自動発行する。
    /// 既存IDと一致した場合は位置を保ったまま置き換える。
    pub fn add_section(&mut self, tab: Tab, mut section: Section) -> String {
        if section.id.is_empty() {
            section.id = format!("section-{}", Uuid::new_v4());
        }
        let id = section.id.clone();
        let list = self.sections_mut(tab);
        if let Some(existing) = list.iter_mut().find(|s| s.id == id) {
            *existing = section;
        } else {
            list.push(section);
        }
        self.notify();
        id
    }

    /// セクションへ浅いマージを適用する。存在しなければ何もしない
    /// （通知も発火しない）。
    pub fn update_section(&mut self, tab: Tab, id: &str, patch: SectionPatch) {
        let Some(section) = self.sections_mut(tab).iter_mut().find(|s| s.id == id) else {
            tracing::warn!("update_section: section not found: {id}");
            return;
        };
        if let Some(name) = patch.item_name {
            section.item_name = name;
        }
        if let Some(haccp) = patch.haccp_info {
            // 全体置換。部分更新は patch_haccp_field を使う。
            section.haccp_info = haccp;
        }
        self.notify();
    }

    /// HACCPの1項目だけを更新する。兄弟キーを巻き込まない。
    pub fn patch_haccp_field(&mut self, tab: Tab, id: &str, key: &str, value: &str) {
        let Some(section) = self.sections_mut(tab).iter_mut().find(|s| s.id == id) else {
            tracing::warn!("patch_haccp_field: section not found: {id}");
            return;
        };
        section.haccp_info.insert(key.to_string(), value.to_string());
        self.notify();
    }

    /// セクションを削除する。存在しなければ何もしない。
    pub fn remove_section(&mut self, tab: Tab, id: &str) {
        let list = self.sections_mut(tab);
        let before = list.len();
        list.retain(|s| s.id != id);
        if list.len() == before {
            tracing::warn!("remove_section: section not found: {id}");
            return;
        }
        self.notify();
    }

    /// 表示タブを切り替える。
    pub fn set_active_tab(&mut self, tab: Tab) {
        self.active_tab = tab;
        self.notify();
    }

    /// 文字列表現でタブを切り替える。未知の値は警告して無視する。
    pub fn set_active_tab_str(&mut self, tab: &str) {
        match Tab::parse(tab) {
            Some(t) => self.set_active_tab(t),
            None => tracing::warn!("set_active_tab: invalid tab ignored: {tab}"),
        }
    }

    /// 通知なしでセクションへ画像を取り付ける内部処理。
    /// コンテナが無ければ最初の before_after コンテナを作る。
    fn attach_image(
        &mut self,
        tab: Tab,
        section_id: &str,
        category: PhotoCategory,
        record: ImageRecord,
    ) -> bool {
        let Some(section) = self.sections_mut(tab).iter_mut().find(|s| s.id == section_id) else {
            return false;
        };
        if section.image_contents.is_empty() {
            section.image_contents.push(ImageContent::before_after());
        }
        section.image_contents[0]
            .photos
            .bucket_mut(category)
            .push(record);
        true
    }

    /// セクションへ画像を追加する。存在しなければ何もしない。
    pub fn add_image_to_section(
        &mut self,
        tab: Tab,
        section_id: &str,
        category: PhotoCategory,
        record: ImageRecord,
    ) {
        if !self.attach_image(tab, section_id, category, record) {
            tracing::warn!("add_image_to_section: section not found: {section_id}");
            return;
        }
        self.notify();
    }

    /// セクション内の画像レコードへパッチを適用する。
    /// 探索は最初の imageContents コンテナのみ（既知の範囲制限）。
    /// セクションやレコードが既に無い場合は安全な no-op とする
    /// （アップロード中の削除で宙に浮いたコールバック対策）。
    pub fn update_section_image(
        &mut self,
        tab: Tab,
        section_id: &str,
        category: PhotoCategory,
        record_id: &str,
        patch: ImagePatch,
    ) {
        let Some(section) = self.sections_mut(tab).iter_mut().find(|s| s.id == section_id) else {
            tracing::warn!("update_section_image: section not found: {section_id}");
            return;
        };
        let Some(content) = section.image_contents.first_mut() else {
            tracing::warn!("update_section_image: no image container: {section_id}");
            return;
        };
        let Some(record) = content
            .photos
            .bucket_mut(category)
            .iter_mut()
            .find(|r| r.id == record_id)
        else {
            tracing::warn!("update_section_image: record not found: {record_id}");
            return;
        };
        patch.apply(record);
        self.notify();
    }

    /// セクションへ自由ブロックを追加する。
    pub fn add_custom_content(&mut self, tab: Tab, section_id: &str, content: CustomContent) {
        let Some(section) = self.sections_mut(tab).iter_mut().find(|s| s.id == section_id) else {
            tracing::warn!("add_custom_content: section not found: {section_id}");
            return;
        };
        section.custom_contents.push(content);
        self.notify();
    }

    /// 自由ブロックへパッチを適用する。存在しなければ何もしない。
    pub fn update_custom_content(
        &mut self,
        tab: Tab,
        section_id: &str,
        content_id: &str,
        patch: CustomContentPatch,
    ) {
        let Some(section) = self.sections_mut(tab).iter_mut().find(|s| s.id == section_id) else {
            tracing::warn!("update_custom_content: section not found: {section_id}");
            return;
        };
        let Some(content) = section
            .custom_contents
            .iter_mut()
            .find(|c| c.id == content_id)
        else {
            tracing::warn!("update_custom_content: content not found: {content_id}");
            return;
        };
        if let Some(value) = patch.value {
            content.value = value;
        }
        if patch.clear_image {
            content.image = None;
        } else if let Some(image) = patch.image {
            content.image = Some(image);
        }
        self.notify();
    }

    /// 在庫へ画像を追加する。
    pub fn add_to_stock(&mut self, record: ImageRecord) {
        self.image_stock.push(record);
        self.notify();
    }

    /// 在庫の画像レコードへパッチを適用する。存在しなければ何もしない。
    pub fn update_stock_image(&mut self, record_id: &str, patch: ImagePatch) {
        let Some(record) = self.image_stock.iter_mut().find(|r| r.id == record_id) else {
            tracing::warn!("update_stock_image: record not found: {record_id}");
            return;
        };
        patch.apply(record);
        self.notify();
    }

    /// 在庫から画像を取り除いて返す。通知は行わない。
    fn take_from_stock(&mut self, record_id: &str) -> Option<ImageRecord> {
        let idx = self.image_stock.iter().position(|r| r.id == record_id)?;
        Some(self.image_stock.remove(idx))
    }

    /// 在庫から画像を削除する（失敗したアップロードの破棄など）。
    /// 存在しなければ何もしない。
    pub fn remove_from_stock(&mut self, record_id: &str) {
        if self.take_from_stock(record_id).is_none() {
            tracing::warn!("remove_from_stock: record not found: {record_id}");
            return;
        }
        self.notify();
    }

    /// 画像をセクションへ移動する。対応するのは在庫→セクションのみ。
    /// 移動は「元から削除して先へ挿入」であり、同じレコードを
    /// 二つの置き場が共有することはない。
    /// セクション間の移動は未対応のため警告して何もしない。
    pub fn move_image_to_section(
        &mut self,
        image_id: &str,
        target_section_id: &str,
        category: PhotoCategory,
    ) {
        let tab = self.active_tab;
        // 移動先が無いなら在庫を崩さずに終わる。
        if self.find_section(tab, target_section_id).is_none() {
            tracing::warn!("move_image_to_section: target section not found: {target_section_id}");
            return;
        }
        let Some(record) = self.take_from_stock(image_id) else {
            // セクション内に居るレコードなら、それはセクション間移動の要求。
            let in_section = self.sections(tab).iter().any(|s| {
                s.image_contents
                    .iter()
                    .flat_map(|c| c.photos.iter_all())
                    .any(|r| r.id == image_id)
            });
            if in_section {
                tracing::warn!(
                    "move_image_to_section: section-to-section move is not supported: {image_id}"
                );
            } else {
                tracing::warn!("move_image_to_section: image not found in stock: {image_id}");
            }
            return;
        };
        // 存在確認済みなので必ず取り付く。
        self.attach_image(tab, target_section_id, category, record);
        self.notify();
    }

    /// スケジュール由来のコンテキストを設定する。
    pub fn set_meta(&mut self, meta: ReportMeta) {
        self.meta = meta;
        self.notify();
    }

    /// スケジュール一覧キャッシュを差し替える。
    pub fn set_schedules(&mut self, schedules: Vec<ScheduleSummary>) {
        self.schedules = schedules;
        self.notify();
    }

    /// ドラフト復元用の一括差し替え。マージせず置き換え、通知は1回。
    pub fn install_draft(
        &mut self,
        sections_new: Vec<Section>,
        sections_proposal: Vec<Section>,
        active_tab: Tab,
        image_stock: Vec<ImageRecord>,
    ) {
        self.sections_new = sections_new;
        self.sections_proposal = sections_proposal;
        self.active_tab = active_tab;
        self.image_stock = image_stock;
        self.notify();
    }
}

impl Default for ReportState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageFile, ImageStatus, SectionType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jpeg(name: &str) -> ImageFile {
        ImageFile {
            name: name.into(),
            mime: "image/jpeg".into(),
            bytes: vec![0xff, 0xd8],
        }
    }

    fn unique_ids(state: &ReportState, tab: Tab) -> bool {
        // タブ内のIDが重複していないことを確認する。
        let ids: Vec<&str> = state.sections(tab).iter().map(|s| s.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.len() == ids.len()
    }

    #[test]
    fn test_section_ids_stay_unique() {
        // 追加・更新・削除の列の後でもIDの一意性が保たれる。
        let mut st = ReportState::new();
        let a = st.add_section(Tab::New, Section::new(SectionType::Cleaning, "床・共用部清掃"));
        let b = st.add_section(Tab::New, Section::new(SectionType::Cleaning, "トイレ・水回り清掃"));
        assert!(unique_ids(&st, Tab::New));

        // 同じIDでの追加は置き換えになる。
        let mut replacement = Section::new(SectionType::Image, "写真");
        replacement.id = a.clone();
        st.add_section(Tab::New, replacement);
        assert_eq!(st.sections(Tab::New).len(), 2);
        assert!(unique_ids(&st, Tab::New));

        st.update_section(
            Tab::New,
            &b,
            SectionPatch {
                item_name: Some("定期清掃".into()),
                ..Default::default()
            },
        );
        st.remove_section(Tab::New, &a);
        assert!(unique_ids(&st, Tab::New));
        assert_eq!(st.sections(Tab::New).len(), 1);
        assert_eq!(st.sections(Tab::New)[0].item_name, "定期清掃");
    }

    #[test]
    fn test_update_missing_section_is_silent_noop() {
        // 存在しないIDへの更新は状態を変えず、通知も発火しない。
        let mut st = ReportState::new();
        st.add_section(Tab::New, Section::new(SectionType::Cleaning, "定期清掃"));

        let fired = std::sync::Arc::new(AtomicUsize::new(0));
        let fired2 = std::sync::Arc::clone(&fired);
        st.subscribe(Box::new(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));

        st.update_section(
            Tab::New,
            "section-missing",
            SectionPatch {
                item_name: Some("x".into()),
                ..Default::default()
            },
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(st.sections(Tab::New)[0].item_name, "定期清掃");
    }

    #[test]
    fn test_invalid_tab_string_ignored() {
        // 未知のタブ名は無視され、通知も出ない。
        let mut st = ReportState::new();
        let fired = std::sync::Arc::new(AtomicUsize::new(0));
        let fired2 = std::sync::Arc::clone(&fired);
        st.subscribe(Box::new(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));

        st.set_active_tab_str("archive");
        assert_eq!(st.active_tab, Tab::New);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        st.set_active_tab_str("proposal");
        assert_eq!(st.active_tab, Tab::Proposal);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_image_container_creation() {
        // 最初の画像追加で before_after コンテナが1つだけ作られる。
        let mut st = ReportState::new();
        let id = st.add_section(Tab::New, Section::new(SectionType::Cleaning, "定期清掃"));

        let r1 = ImageRecord::local_preview(jpeg("a.jpg"));
        let r2 = ImageRecord::local_preview(jpeg("b.jpg"));
        st.add_image_to_section(Tab::New, &id, PhotoCategory::Before, r1);
        st.add_image_to_section(Tab::New, &id, PhotoCategory::After, r2);

        let section = st.find_section(Tab::New, &id).unwrap();
        assert_eq!(section.image_contents.len(), 1);
        assert_eq!(section.image_contents[0].content_type, "before_after");
        assert_eq!(section.image_contents[0].photos.before.len(), 1);
        assert_eq!(section.image_contents[0].photos.after.len(), 1);
    }

    #[test]
    fn test_update_section_image_searches_first_container_only() {
        // 2つ目以降のコンテナに居るレコードは対象外（既知の範囲制限）。
        let mut st = ReportState::new();
        let id = st.add_section(Tab::New, Section::new(SectionType::Cleaning, "定期清掃"));
        let r = ImageRecord::local_preview(jpeg("a.jpg"));
        let rid = r.id.clone();
        st.add_image_to_section(Tab::New, &id, PhotoCategory::Before, r);

        // レコードを2つ目のコンテナへ押し込んだ状態を作る。
        {
            let section = st
                .sections_mut(Tab::New)
                .iter_mut()
                .find(|s| s.id == id)
                .unwrap();
            let moved = section.image_contents[0].photos.before.remove(0);
            let mut second = ImageContent::before_after();
            second.photos.before.push(moved);
            section.image_contents.push(second);
        }

        st.update_section_image(
            Tab::New,
            &id,
            PhotoCategory::Before,
            &rid,
            ImagePatch::failed(),
        );
        let section = st.find_section(Tab::New, &id).unwrap();
        // 2つ目のコンテナ内のレコードは変更されない。
        assert_eq!(
            section.image_contents[1].photos.before[0].status,
            ImageStatus::Uploading
        );
    }

    #[test]
    fn test_move_stock_image_transfers_ownership() {
        // 在庫→セクションの移動で、レコードは一方だけに存在する。
        let mut st = ReportState::new();
        let id = st.add_section(Tab::New, Section::new(SectionType::Cleaning, "定期清掃"));
        let r = ImageRecord::stock_preview(jpeg("a.jpg"));
        let rid = r.id.clone();
        st.add_to_stock(r);

        st.move_image_to_section(&rid, &id, PhotoCategory::Completed);
        assert!(st.image_stock.is_empty());
        let section = st.find_section(Tab::New, &id).unwrap();
        assert_eq!(section.image_contents[0].photos.completed.len(), 1);
        assert_eq!(section.image_contents[0].photos.completed[0].id, rid);
    }

    #[test]
    fn test_remove_from_stock() {
        // 在庫からの削除は通知を1回出し、存在しないIDは無視される。
        let mut st = ReportState::new();
        let r = ImageRecord::stock_preview(jpeg("a.jpg"));
        let rid = r.id.clone();
        st.add_to_stock(r);

        let fired = std::sync::Arc::new(AtomicUsize::new(0));
        let fired2 = std::sync::Arc::clone(&fired);
        st.subscribe(Box::new(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));

        st.remove_from_stock(&rid);
        assert!(st.image_stock.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // 2回目の削除は状態を変えず、通知も出ない。
        st.remove_from_stock(&rid);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_move_to_missing_section_keeps_stock() {
        // 移動先が無い場合、在庫はそのまま残る。
        let mut st = ReportState::new();
        let r = ImageRecord::stock_preview(jpeg("a.jpg"));
        let rid = r.id.clone();
        st.add_to_stock(r);

        st.move_image_to_section(&rid, "section-missing", PhotoCategory::Before);
        assert_eq!(st.image_stock.len(), 1);
    }

    #[test]
    fn test_section_to_section_move_is_noop() {
        // セクション間移動は未対応であり、状態を変えない。
        let mut st = ReportState::new();
        let a = st.add_section(Tab::New, Section::new(SectionType::Cleaning, "定期清掃"));
        let b = st.add_section(Tab::New, Section::new(SectionType::Cleaning, "トイレ・水回り清掃"));
        let r = ImageRecord::local_preview(jpeg("a.jpg"));
        let rid = r.id.clone();
        st.add_image_to_section(Tab::New, &a, PhotoCategory::Before, r);

        st.move_image_to_section(&rid, &b, PhotoCategory::Before);
        let sa = st.find_section(Tab::New, &a).unwrap();
        let sb = st.find_section(Tab::New, &b).unwrap();
        assert_eq!(sa.image_contents[0].photos.before.len(), 1);
        assert!(sb.image_contents.is_empty());
    }

    #[test]
    fn test_notify_fans_out_to_all_listeners() {
        // 変更1回につき全購読者へ同期的に配られる。
        let mut st = ReportState::new();
        let count = std::sync::Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = std::sync::Arc::clone(&count);
            st.subscribe(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        st.add_section(Tab::New, Section::new(SectionType::Cleaning, "定期清掃"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
