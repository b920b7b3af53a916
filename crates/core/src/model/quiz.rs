use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{CategoryId, GroupId, QuestionId, SubCategoryId, SubjectId};
use crate::model::question::{Level, Question};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FilterError {
    #[error("a group must be selected")]
    MissingGroup,

    #[error("a subject must be selected")]
    MissingSubject,
}

//
// ─── FILTER ────────────────────────────────────────────────────────────────────
//

/// Raw quiz selection as submitted by a client; nothing is validated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRequest {
    pub group_id: Option<GroupId>,
    pub subject_id: Option<SubjectId>,
    pub category_ids: Vec<CategoryId>,
    pub subcategory_ids: Vec<SubCategoryId>,
    pub levels: Vec<Level>,
}

impl FilterRequest {
    /// Validate the request into a [`QuizFilter`].
    ///
    /// Id lists are sorted and deduplicated so equal selections compare equal.
    ///
    /// # Errors
    ///
    /// Returns `FilterError::MissingGroup` or `FilterError::MissingSubject`
    /// when either mandatory selection is absent.
    pub fn resolve(self) -> Result<QuizFilter, FilterError> {
        let group_id = self.group_id.ok_or(FilterError::MissingGroup)?;
        let subject_id = self.subject_id.ok_or(FilterError::MissingSubject)?;
        Ok(QuizFilter {
            group_id,
            subject_id,
            category_ids: normalized(self.category_ids),
            subcategory_ids: normalized(self.subcategory_ids),
            levels: normalized(self.levels),
        })
    }
}

fn normalized<T: Ord>(mut values: Vec<T>) -> Vec<T> {
    values.sort_unstable();
    values.dedup();
    values
}

/// Which taxonomy restriction below the subject a filter applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope<'a> {
    /// Whole subject.
    Subject,
    Categories(&'a [CategoryId]),
    /// Subcategories win over categories when both were supplied.
    SubCategories(&'a [SubCategoryId]),
}

/// Validated quiz selection stored with the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizFilter {
    group_id: GroupId,
    subject_id: SubjectId,
    #[serde(default)]
    category_ids: Vec<CategoryId>,
    #[serde(default)]
    subcategory_ids: Vec<SubCategoryId>,
    #[serde(default)]
    levels: Vec<Level>,
}

impl QuizFilter {
    #[must_use]
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    #[must_use]
    pub fn category_ids(&self) -> &[CategoryId] {
        &self.category_ids
    }

    #[must_use]
    pub fn subcategory_ids(&self) -> &[SubCategoryId] {
        &self.subcategory_ids
    }

    #[must_use]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    #[must_use]
    pub fn scope(&self) -> FilterScope<'_> {
        if !self.subcategory_ids.is_empty() {
            FilterScope::SubCategories(&self.subcategory_ids)
        } else if !self.category_ids.is_empty() {
            FilterScope::Categories(&self.category_ids)
        } else {
            FilterScope::Subject
        }
    }

    /// Evaluate the filter predicate against a question.
    #[must_use]
    pub fn matches(&self, question: &Question) -> bool {
        let placement = question.placement();
        if placement.group_id() != self.group_id || placement.subject_id() != self.subject_id {
            return false;
        }
        let in_scope = match self.scope() {
            FilterScope::Subject => true,
            FilterScope::Categories(ids) => placement
                .category_id()
                .is_some_and(|id| ids.contains(&id)),
            FilterScope::SubCategories(ids) => placement
                .subcategory_id()
                .is_some_and(|id| ids.contains(&id)),
        };
        in_scope && (self.levels.is_empty() || self.levels.contains(&question.level()))
    }
}

//
// ─── SESSION STATE ─────────────────────────────────────────────────────────────
//

/// Lifecycle of a quiz session as seen by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizPhase {
    Uninitialized,
    Active,
    Exhausted,
}

impl QuizPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for QuizPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session delivery state.
///
/// Invariants kept by the mutators: `seen` holds no duplicates, no pending id
/// is already seen, and `pending` holds no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSessionState {
    filter: Option<QuizFilter>,
    #[serde(default)]
    seen: Vec<QuestionId>,
    #[serde(default)]
    pending: VecDeque<QuestionId>,
    #[serde(default)]
    exhausted: bool,
}

impl QuizSessionState {
    /// Fresh state for a newly started quiz.
    #[must_use]
    pub fn begin(filter: QuizFilter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(&self) -> Option<&QuizFilter> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn phase(&self) -> QuizPhase {
        match (&self.filter, self.exhausted) {
            (None, _) => QuizPhase::Uninitialized,
            (Some(_), true) => QuizPhase::Exhausted,
            (Some(_), false) => QuizPhase::Active,
        }
    }

    /// Ids delivered so far, oldest first.
    #[must_use]
    pub fn seen(&self) -> &[QuestionId] {
        &self.seen
    }

    #[must_use]
    pub fn seen_set(&self) -> HashSet<QuestionId> {
        self.seen.iter().copied().collect()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn needs_refill(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue a freshly allocated batch, dropping ids already seen or queued.
    ///
    /// Returns how many ids were queued.
    pub fn refill(&mut self, batch: impl IntoIterator<Item = QuestionId>) -> usize {
        let mut known = self.seen_set();
        known.extend(self.pending.iter().copied());
        let before = self.pending.len();
        for id in batch {
            if known.insert(id) {
                self.pending.push_back(id);
            }
        }
        self.pending.len() - before
    }

    /// Pop the next pending id and record it as seen.
    pub fn take_next(&mut self) -> Option<QuestionId> {
        let id = self.pending.pop_front()?;
        self.seen.push(id);
        self.exhausted = false;
        Some(id)
    }

    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::question::{Metadata, Placement, QuestionKind};
    use crate::time::fixed_now;

    fn request() -> FilterRequest {
        FilterRequest {
            group_id: Some(GroupId::new(1)),
            subject_id: Some(SubjectId::new(1)),
            ..FilterRequest::default()
        }
    }

    fn question(
        id: u64,
        category: Option<u64>,
        subcategory: Option<u64>,
        level: Level,
    ) -> Question {
        Question::new(
            QuestionId::new(id),
            Placement::from_persisted(
                GroupId::new(1),
                SubjectId::new(1),
                category.map(CategoryId::new),
                subcategory.map(SubCategoryId::new),
            ),
            level,
            QuestionKind::Mcq,
            Metadata::new(),
            fixed_now(),
        )
    }

    #[test]
    fn group_and_subject_are_mandatory() {
        let mut missing_group = request();
        missing_group.group_id = None;
        assert_eq!(missing_group.resolve(), Err(FilterError::MissingGroup));

        let mut missing_subject = request();
        missing_subject.subject_id = None;
        assert_eq!(missing_subject.resolve(), Err(FilterError::MissingSubject));
    }

    #[test]
    fn subcategories_override_categories() {
        let mut req = request();
        req.category_ids = vec![CategoryId::new(5)];
        req.subcategory_ids = vec![SubCategoryId::new(9), SubCategoryId::new(9)];
        let filter = req.resolve().unwrap();

        assert_eq!(
            filter.scope(),
            FilterScope::SubCategories(&[SubCategoryId::new(9)])
        );
        assert!(filter.matches(&question(1, Some(7), Some(9), Level::Easy)));
        assert!(!filter.matches(&question(2, Some(5), None, Level::Easy)));
    }

    #[test]
    fn category_and_level_restrictions_combine() {
        let mut req = request();
        req.category_ids = vec![CategoryId::new(5)];
        req.levels = vec![Level::Easy];
        let filter = req.resolve().unwrap();

        assert!(filter.matches(&question(1, Some(5), None, Level::Easy)));
        assert!(!filter.matches(&question(2, Some(5), None, Level::Medium)));
        assert!(!filter.matches(&question(3, None, None, Level::Easy)));
    }

    #[test]
    fn subject_scope_matches_everything_in_subject() {
        let filter = request().resolve().unwrap();
        assert_eq!(filter.scope(), FilterScope::Subject);
        assert!(filter.matches(&question(1, None, None, Level::Advance)));
    }

    #[test]
    fn refill_never_requeues_seen_ids() {
        let mut state = QuizSessionState::begin(request().resolve().unwrap());
        assert_eq!(state.refill([QuestionId::new(1), QuestionId::new(2)]), 2);
        assert_eq!(state.take_next(), Some(QuestionId::new(1)));

        let queued = state.refill([QuestionId::new(1), QuestionId::new(2), QuestionId::new(3)]);
        assert_eq!(queued, 1);
        assert_eq!(state.pending_len(), 2);
        assert_eq!(state.seen(), &[QuestionId::new(1)]);
    }

    #[test]
    fn phase_tracks_lifecycle() {
        assert_eq!(QuizSessionState::default().phase(), QuizPhase::Uninitialized);

        let mut state = QuizSessionState::begin(request().resolve().unwrap());
        assert_eq!(state.phase(), QuizPhase::Active);
        state.mark_exhausted();
        assert_eq!(state.phase(), QuizPhase::Exhausted);

        state.refill([QuestionId::new(4)]);
        state.take_next();
        assert_eq!(state.phase(), QuizPhase::Active);
    }

    #[test]
    fn state_survives_json_round_trip() {
        let mut state = QuizSessionState::begin(request().resolve().unwrap());
        state.refill([QuestionId::new(10), QuestionId::new(11)]);
        state.take_next();

        let json = serde_json::to_string(&state).unwrap();
        let back: QuizSessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
