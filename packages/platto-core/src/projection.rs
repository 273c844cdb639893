/// Board projection: stage columns derived from whichever program list is
/// active (overlay or store). Pure; callers pass "today" in.
use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::overlay::PendingMove;
use crate::search::SearchQuery;
use crate::types::{Program, ProgramId, Stage};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardFilter {
    #[serde(default)]
    pub search: String,
    /// Include programs whose first air date is already past.
    #[serde(default)]
    pub show_aired: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageColumn {
    pub stage: Stage,
    pub row: usize,
    pub count: usize,
    pub programs: Vec<Arc<Program>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub columns: Vec<StageColumn>,
    /// Programs whose first air date is past, counted before filtering.
    pub aired_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingMove>,
    pub today: NaiveDate,
}

impl BoardView {
    pub fn column(&self, stage: Stage) -> Option<&StageColumn> {
        self.columns.iter().find(|c| c.stage == stage)
    }

    /// Stage a program is shown in, if visible at all.
    pub fn stage_of(&self, id: ProgramId) -> Option<Stage> {
        self.columns
            .iter()
            .find(|c| c.programs.iter().any(|p| p.id == id))
            .map(|c| c.stage)
    }
}

pub fn project(programs: &[Arc<Program>], filter: &BoardFilter, today: NaiveDate) -> BoardView {
    let query = SearchQuery::compile(&filter.search);

    let visible: Vec<&Arc<Program>> = programs
        .iter()
        .filter(|p| !p.status.is_hidden())
        .filter(|p| filter.show_aired || !p.aired_before(today))
        .filter(|p| query.matches(p))
        .collect();

    let columns = Stage::BOARD
        .iter()
        .map(|stage| {
            let in_stage: Vec<Arc<Program>> = visible
                .iter()
                .filter(|p| p.status == *stage)
                .map(|p| Arc::clone(*p))
                .collect();
            StageColumn {
                stage: *stage,
                row: stage.board_row().unwrap_or(0),
                count: in_stage.len(),
                programs: in_stage,
            }
        })
        .collect();

    BoardView {
        columns,
        aired_count: programs.iter().filter(|p| p.aired_before(today)).count(),
        pending: None,
        today,
    }
}

/// Programs ordered by how close their first air date is to `date`.
/// Undated programs sort last; ties go to the higher numeric business id.
pub fn nearby(programs: &[Arc<Program>], date: NaiveDate) -> Vec<Arc<Program>> {
    let distance = |p: &Program| {
        p.first_air_date
            .map(|d| (d - date).num_days().abs())
            .unwrap_or(i64::MAX)
    };
    let numeric_id = |p: &Program| p.program_id.trim().parse::<i64>().unwrap_or(0);

    let mut sorted = programs.to_vec();
    sorted.sort_by(|a, b| match distance(a).cmp(&distance(b)) {
        Ordering::Equal => numeric_id(b).cmp(&numeric_id(a)),
        other => other,
    });
    sorted
}
