use chrono::{FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote primary key of a program row.
pub type ProgramId = i64;

/// Japan Standard Time has no DST, so a fixed offset is exact.
const JST_OFFSET_SECS: i32 = 9 * 3600;

/// Today's date in Japan, regardless of the host time zone.
pub fn jst_today() -> NaiveDate {
    match FixedOffset::east_opt(JST_OFFSET_SECS) {
        Some(jst) => Utc::now().with_timezone(&jst).date_naive(),
        None => Utc::now().date_naive(),
    }
}

/// Production stage of a program.
///
/// Serialized with the labels the remote table stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Casting in progress. Never shown on the board.
    #[serde(rename = "キャスティング中")]
    Casting,
    #[serde(rename = "日程調整中")]
    Scheduling,
    #[serde(rename = "ロケハン前")]
    LocationScouting,
    #[serde(rename = "収録準備中")]
    RecordingPrep,
    #[serde(rename = "編集中")]
    Editing,
    #[serde(rename = "試写中")]
    Preview,
    #[serde(rename = "MA中")]
    AudioMix,
    #[serde(rename = "完パケ納品")]
    FinalDelivery,
    #[serde(rename = "放送済み")]
    Aired,
}

impl Stage {
    /// The eight board columns, in display order. The first four form the
    /// top row, the last four the bottom row.
    pub const BOARD: [Stage; 8] = [
        Stage::Scheduling,
        Stage::LocationScouting,
        Stage::RecordingPrep,
        Stage::Editing,
        Stage::Preview,
        Stage::AudioMix,
        Stage::FinalDelivery,
        Stage::Aired,
    ];

    const COLUMNS_PER_ROW: usize = 4;

    pub fn label(&self) -> &'static str {
        match self {
            Self::Casting => "キャスティング中",
            Self::Scheduling => "日程調整中",
            Self::LocationScouting => "ロケハン前",
            Self::RecordingPrep => "収録準備中",
            Self::Editing => "編集中",
            Self::Preview => "試写中",
            Self::AudioMix => "MA中",
            Self::FinalDelivery => "完パケ納品",
            Self::Aired => "放送済み",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Casting => "casting",
            Self::Scheduling => "scheduling",
            Self::LocationScouting => "location_scouting",
            Self::RecordingPrep => "recording_prep",
            Self::Editing => "editing",
            Self::Preview => "preview",
            Self::AudioMix => "audio_mix",
            Self::FinalDelivery => "final_delivery",
            Self::Aired => "aired",
        }
    }

    /// Hidden stages are excluded from the board no matter the filters.
    pub fn is_hidden(&self) -> bool {
        matches!(self, Self::Casting)
    }

    /// Board row (0 = top, 1 = bottom), `None` for hidden stages.
    pub fn board_row(&self) -> Option<usize> {
        Self::BOARD
            .iter()
            .position(|s| s == self)
            .map(|idx| idx / Self::COLUMNS_PER_ROW)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Stage {
    type Err = String;

    /// Accepts both the stored label and the ASCII name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        std::iter::once(Self::Casting)
            .chain(Self::BOARD)
            .find(|stage| stage.label() == s || stage.as_str() == s)
            .ok_or_else(|| format!("Invalid stage: {}", s))
    }
}

/// A tracked production item, as stored in the remote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    /// Human-readable business identifier such as "018".
    pub program_id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub status: Stage,
    pub first_air_date: Option<NaiveDate>,
    pub re_air_date: Option<NaiveDate>,
    /// Recording date.
    pub filming_date: Option<NaiveDate>,
    /// Mix-complete / delivery date.
    pub complete_date: Option<NaiveDate>,
    pub cast1: Option<String>,
    pub cast2: Option<String>,
    pub script_url: Option<String>,
    pub pr_80text: Option<String>,
    pub pr_200text: Option<String>,
    /// Deliverable (PR copy) completed.
    #[serde(default)]
    pub pr_completed: bool,
    pub pr_due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
    /// Server managed; ignored when comparing content.
    pub updated_at: Option<String>,
}

impl Program {
    /// Field-by-field equality excluding `updated_at`.
    pub fn same_content(&self, other: &Program) -> bool {
        let lhs = Program {
            updated_at: None,
            ..self.clone()
        };
        let rhs = Program {
            updated_at: None,
            ..other.clone()
        };
        lhs == rhs
    }

    /// Whether the first broadcast happened strictly before `today`.
    pub fn aired_before(&self, today: NaiveDate) -> bool {
        self.first_air_date.map_or(false, |d| d < today)
    }
}

/// Payload for creating a program. The server assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProgram {
    pub program_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub status: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_air_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub re_air_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filming_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_80text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_200text: Option<String>,
    #[serde(default)]
    pub pr_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewProgram {
    pub fn new(program_id: impl Into<String>, title: impl Into<String>, status: Stage) -> Self {
        Self {
            program_id: program_id.into(),
            title: title.into(),
            subtitle: None,
            status,
            first_air_date: None,
            re_air_date: None,
            filming_date: None,
            complete_date: None,
            cast1: None,
            cast2: None,
            script_url: None,
            pr_80text: None,
            pr_200text: None,
            pr_completed: false,
            pr_due_date: None,
            notes: None,
        }
    }

    /// Materialize the row the server would store.
    pub fn into_program(self, id: ProgramId, timestamp: &str) -> Program {
        Program {
            id,
            program_id: self.program_id,
            title: self.title,
            subtitle: self.subtitle,
            status: self.status,
            first_air_date: self.first_air_date,
            re_air_date: self.re_air_date,
            filming_date: self.filming_date,
            complete_date: self.complete_date,
            cast1: self.cast1,
            cast2: self.cast2,
            script_url: self.script_url,
            pr_80text: self.pr_80text,
            pr_200text: self.pr_200text,
            pr_completed: self.pr_completed,
            pr_due_date: self.pr_due_date,
            notes: self.notes,
            created_at: Some(timestamp.to_string()),
            updated_at: Some(timestamp.to_string()),
        }
    }
}

/// Partial update. Absent fields are left untouched; `id` and
/// `program_id` are immutable and therefore not part of the patch.
///
/// Nullable columns are double options: `None` leaves the column alone,
/// `Some(None)` (an explicit JSON `null`) clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Stage>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub first_air_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub re_air_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub filming_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub complete_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub cast1: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub cast2: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub script_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub pr_80text: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub pr_200text: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_completed: Option<bool>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub pr_due_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ProgramPatch {
    /// Patch that only changes the stage.
    pub fn stage(stage: Stage) -> Self {
        Self {
            status: Some(stage),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, program: &mut Program) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut program.title, &self.title);
        set(&mut program.subtitle, &self.subtitle);
        set(&mut program.status, &self.status);
        set(&mut program.first_air_date, &self.first_air_date);
        set(&mut program.re_air_date, &self.re_air_date);
        set(&mut program.filming_date, &self.filming_date);
        set(&mut program.complete_date, &self.complete_date);
        set(&mut program.cast1, &self.cast1);
        set(&mut program.cast2, &self.cast2);
        set(&mut program.script_url, &self.script_url);
        set(&mut program.pr_80text, &self.pr_80text);
        set(&mut program.pr_200text, &self.pr_200text);
        set(&mut program.pr_completed, &self.pr_completed);
        set(&mut program.pr_due_date, &self.pr_due_date);
        set(&mut program.notes, &self.notes);
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::program;
    use super::*;

    #[test]
    fn test_stage_serializes_to_stored_label() {
        let json = serde_json::to_string(&Stage::RecordingPrep).unwrap();
        assert_eq!(json, "\"収録準備中\"");
        let back: Stage = serde_json::from_str("\"MA中\"").unwrap();
        assert_eq!(back, Stage::AudioMix);
    }

    #[test]
    fn test_stage_from_str_accepts_label_and_name() {
        assert_eq!("編集中".parse::<Stage>().unwrap(), Stage::Editing);
        assert_eq!("final_delivery".parse::<Stage>().unwrap(), Stage::FinalDelivery);
        assert_eq!("キャスティング中".parse::<Stage>().unwrap(), Stage::Casting);
        assert!("unknown".parse::<Stage>().is_err());
    }

    #[test]
    fn test_board_rows() {
        assert_eq!(Stage::Scheduling.board_row(), Some(0));
        assert_eq!(Stage::Editing.board_row(), Some(0));
        assert_eq!(Stage::Preview.board_row(), Some(1));
        assert_eq!(Stage::Aired.board_row(), Some(1));
        assert_eq!(Stage::Casting.board_row(), None);
        assert!(Stage::Casting.is_hidden());
    }

    #[test]
    fn test_same_content_ignores_updated_at() {
        let a = program(1, "A", Stage::Editing);
        let mut b = a.clone();
        b.updated_at = Some("2025-08-01T00:00:00+00:00".into());
        assert!(a.same_content(&b));

        b.notes = Some("changed".into());
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_program_deserializes_remote_row() {
        let row = r#"{
            "id": 18, "program_id": "018", "title": "戦争と創造",
            "subtitle": "@上野公園", "status": "完パケ納品",
            "first_air_date": "2025-08-10", "re_air_date": null,
            "filming_date": "2025-07-01", "complete_date": "2025-08-05",
            "cast1": "岡本 裕一朗", "cast2": "今日 マチ子",
            "script_url": null, "pr_80text": null, "pr_200text": null,
            "pr_completed": false, "pr_due_date": null, "notes": null,
            "created_at": "2025-06-01T00:00:00+00:00",
            "updated_at": "2025-08-05T00:00:00+00:00"
        }"#;
        let p: Program = serde_json::from_str(row).unwrap();
        assert_eq!(p.status, Stage::FinalDelivery);
        assert_eq!(p.complete_date, NaiveDate::from_ymd_opt(2025, 8, 5));
        assert_eq!(p.cast2.as_deref(), Some("今日 マチ子"));
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let mut p = program(1, "A", Stage::Scheduling);
        p.subtitle = Some("keep".into());
        let patch = ProgramPatch {
            title: Some("B".into()),
            pr_completed: Some(true),
            ..ProgramPatch::default()
        };
        patch.apply_to(&mut p);
        assert_eq!(p.title, "B");
        assert!(p.pr_completed);
        assert_eq!(p.subtitle.as_deref(), Some("keep"));
        assert_eq!(p.status, Stage::Scheduling);
    }

    #[test]
    fn test_patch_null_clears_nullable_columns() {
        let patch: ProgramPatch =
            serde_json::from_str(r#"{ "subtitle": null, "first_air_date": null }"#).unwrap();
        assert!(!patch.is_empty());
        assert_eq!(patch.subtitle, Some(None));
        assert_eq!(patch.first_air_date, Some(None));
        assert_eq!(patch.notes, None);

        let wire = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            wire,
            serde_json::json!({ "subtitle": null, "first_air_date": null })
        );

        let mut p = program(1, "A", Stage::Scheduling);
        p.subtitle = Some("gone".into());
        p.first_air_date = NaiveDate::from_ymd_opt(2025, 9, 1);
        p.notes = Some("kept".into());
        patch.apply_to(&mut p);
        assert_eq!(p.subtitle, None);
        assert_eq!(p.first_air_date, None);
        assert_eq!(p.notes.as_deref(), Some("kept"));
    }

    #[test]
    fn test_patch_value_sets_nullable_column() {
        let patch: ProgramPatch = serde_json::from_str(r#"{ "cast1": "出演 太郎" }"#).unwrap();
        assert_eq!(patch.cast1, Some(Some("出演 太郎".to_string())));
        let mut p = program(1, "A", Stage::Scheduling);
        patch.apply_to(&mut p);
        assert_eq!(p.cast1.as_deref(), Some("出演 太郎"));
    }

    #[test]
    fn test_stage_patch_serializes_status_only() {
        let json = serde_json::to_value(ProgramPatch::stage(Stage::Editing)).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "編集中" }));
    }

    #[test]
    fn test_aired_before_is_strict() {
        let mut p = program(1, "A", Stage::Aired);
        let today = NaiveDate::from_ymd_opt(2025, 8, 10).unwrap();
        p.first_air_date = Some(today);
        assert!(!p.aired_before(today));
        p.first_air_date = NaiveDate::from_ymd_opt(2025, 8, 9);
        assert!(p.aired_before(today));
        p.first_air_date = None;
        assert!(!p.aired_before(today));
    }
}
