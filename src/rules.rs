//! 写真要件の判定と提出ゲート。

use crate::model::{CustomContentKind, ImageRecord, ImageStatus};
use crate::state::{ReportState, SharedState};

/// 清掃項目の集合から導いた写真要件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhotoRequirement {
    /// 必要枚数の下限。
    pub min: u32,
    /// 社内限定アルバム行き（顧客向け報告書には載せない）。
    pub internal: bool,
    /// 既知の項目に一致しなかったための保守的既定値かどうか。
    pub is_fallback: bool,
}

/// 項目名が未知のときの既定枚数。
/// 未知の作業を「証跡不要」として扱わないための保守的な値。
const FALLBACK_MIN: u32 = 3;

/// 既知の清掃項目と要件の対応表。完全一致で引く。
/// (項目名, 必要枚数, 社内限定)
const REQUIREMENT_TABLE: &[(&str, u32, bool)] = &[
    ("レンジフード清掃", 6, true),
    ("ダクト清掃", 6, true),
    ("グリストラップ清掃", 6, true),
    ("厨房機器清掃", 4, false),
    // 旧実装では 3 と 4 の二重定義が併存していた。厳しい方に統一する。
    ("床・共用部清掃", 4, false),
    ("エアコン清掃", 4, false),
    ("窓・サッシ清掃", 3, false),
    ("トイレ・水回り清掃", 3, false),
    ("定期清掃", 3, false),
];

/// 項目名に含まれていたら社内限定とみなすキーワード。
const INTERNAL_KEYWORDS: &[&str] = &["レンジフード", "ダクト", "グリストラップ"];

/// 項目名の集合から写真要件を計算する純関数。
///
/// 1. 入力が空なら保守的既定値を返す。
/// 2. 各項目を完全一致で引く。未知の項目はエラーにせず無視する。
/// 3. 必要枚数は一致した項目の最大値（要件は項目間で加算しない）。
/// 4. 社内限定は、一致した項目のフラグまたはキーワード包含で立つ。
/// 5. 1件も一致しなければ既定枚数へフォールバックする。
pub fn compute_photo_requirement(lines: &[String]) -> PhotoRequirement {
    if lines.is_empty() {
        return PhotoRequirement {
            min: FALLBACK_MIN,
            internal: false,
            is_fallback: true,
        };
    }

    let mut min: Option<u32> = None;
    let mut internal = false;
    for line in lines {
        if let Some(&(_, m, i)) = REQUIREMENT_TABLE.iter().find(|(name, _, _)| name == line) {
            min = Some(min.map_or(m, |cur| cur.max(m)));
            internal = internal || i;
        }
        // 未知の項目でもキーワードを含んでいれば社内限定に倒す。
        internal = internal || INTERNAL_KEYWORDS.iter().any(|k| line.contains(k));
    }

    match min {
        Some(min) => PhotoRequirement {
            min,
            internal,
            is_fallback: false,
        },
        None => PhotoRequirement {
            min: FALLBACK_MIN,
            internal,
            is_fallback: true,
        },
    }
}

/// 集計対象の写真かどうか。削除済みだけを除外する。
pub fn should_count_photo(record: &ImageRecord) -> bool {
    match record.status {
        ImageStatus::Removed => false,
        ImageStatus::Pending
        | ImageStatus::Uploading
        | ImageStatus::Uploaded
        | ImageStatus::Error => true,
    }
}

/// 表示中タブの写真枚数を数える。
/// 各セクションの before/after/completed と、画像型の自由ブロックを
/// 合算する。鮮度バグを避けるため毎回計算し、キャッシュしない。
pub fn count_uploaded_photos(state: &ReportState) -> usize {
    let mut count = 0;
    for section in state.sections(state.active_tab) {
        for content in &section.image_contents {
            count += content.photos.iter_all().filter(|r| should_count_photo(r)).count();
        }
        for custom in &section.custom_contents {
            if custom.kind == CustomContentKind::Image
                && custom.image.as_ref().is_some_and(should_count_photo)
            {
                count += 1;
            }
        }
    }
    count
}

/// 提出前チェックの結果。
#[derive(Clone, Copy, Debug)]
pub struct SubmissionCheck {
    /// 適用された写真要件。
    pub requirement: PhotoRequirement,
    /// 現在の写真枚数。
    pub counted: usize,
    /// 要件を満たしているか。満たさない場合は提出前に警告する。
    pub satisfied: bool,
}

/// 写真要件と現在の状態を突き合わせる提出ゲート。
pub struct SubmissionGate {
    state: SharedState,
}

impl SubmissionGate {
    /// 共有ストアを注入して作成する。
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// スケジュール側の予定項目と報告書側の項目名を合算して判定する。
    pub fn check(&self, schedule_items: &[String]) -> SubmissionCheck {
        let st = crate::state::lock(&self.state);
        // スケジュールの予定項目と報告書の項目名の和集合をとる。
        let mut lines: Vec<String> = schedule_items
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        for name in st.item_names(st.active_tab) {
            if !lines.contains(&name) {
                lines.push(name);
            }
        }
        let requirement = compute_photo_requirement(&lines);
        let counted = count_uploaded_photos(&st);
        let satisfied = counted >= requirement.min as usize;
        tracing::info!(
            "submission check: required={} counted={} internal={} fallback={}",
            requirement.min,
            counted,
            requirement.internal,
            requirement.is_fallback
        );
        SubmissionCheck {
            requirement,
            counted,
            satisfied,
        }
    }
}
