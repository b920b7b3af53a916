use rand::Rng;
use rand::rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;

use qbank_core::model::{QuestionId, QuizFilter};
use storage::repository::{QuestionRepository, StorageError};
use tracing::debug;

/// Pick up to `batch_size` distinct candidates not in `excluded`, in uniformly random order.
pub fn sample_unseen<R: Rng + ?Sized>(
    candidates: impl IntoIterator<Item = QuestionId>,
    excluded: &HashSet<QuestionId>,
    batch_size: usize,
    rng: &mut R,
) -> Vec<QuestionId> {
    let mut pool: Vec<QuestionId> = candidates
        .into_iter()
        .filter(|id| !excluded.contains(id))
        .collect();
    pool.sort_unstable();
    pool.dedup();
    let (picked, _) = pool.partial_shuffle(rng, batch_size);
    picked.to_vec()
}

/// Draws random batches of unseen question ids for a filter.
#[derive(Clone)]
pub struct BatchAllocator {
    questions: Arc<dyn QuestionRepository>,
}

impl BatchAllocator {
    #[must_use]
    pub fn new(questions: Arc<dyn QuestionRepository>) -> Self {
        Self { questions }
    }

    /// Allocate the next batch. An empty result means the filter is exhausted
    /// for this exclusion set.
    ///
    /// Seen ids are excluded by the repository, so a refill transfers only the
    /// unseen remainder. The random pick and the batch limit happen here, so
    /// every backend draws with the same generator.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the candidate query fails.
    pub async fn allocate(
        &self,
        filter: &QuizFilter,
        excluded: &HashSet<QuestionId>,
        batch_size: usize,
    ) -> Result<Vec<QuestionId>, StorageError> {
        let candidates = self.questions.unseen_question_ids(filter, excluded).await?;
        let total = candidates.len();
        let batch = sample_unseen(candidates, excluded, batch_size, &mut rng());
        debug!(
            unseen = total,
            excluded = excluded.len(),
            allocated = batch.len(),
            "allocated question batch"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbank_core::model::{FilterRequest, Level, Metadata, NodeName, Placement, QuestionKind};
    use qbank_core::time::fixed_now;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use storage::InMemoryRepository;
    use storage::repository::{
        NewGroupRecord, NewQuestionRecord, NewSubjectRecord, TaxonomyRepository,
    };

    fn ids(raw: &[u64]) -> Vec<QuestionId> {
        raw.iter().copied().map(QuestionId::new).collect()
    }

    #[test]
    fn sample_respects_size_and_exclusions() {
        let mut rng = StdRng::seed_from_u64(7);
        let excluded: HashSet<QuestionId> = ids(&[2, 4]).into_iter().collect();
        let batch = sample_unseen(ids(&[1, 2, 3, 4, 5, 6, 3]), &excluded, 3, &mut rng);

        assert_eq!(batch.len(), 3);
        let unique: HashSet<_> = batch.iter().copied().collect();
        assert_eq!(unique.len(), 3);
        assert!(batch.iter().all(|id| !excluded.contains(id)));
        assert!(batch.iter().all(|id| [1, 3, 5, 6].contains(&id.value())));
    }

    #[test]
    fn sample_returns_everything_when_short() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut batch = sample_unseen(ids(&[9, 8]), &HashSet::new(), 50, &mut rng);
        batch.sort_unstable();
        assert_eq!(batch, ids(&[8, 9]));
    }

    #[test]
    fn sample_is_empty_once_everything_is_excluded() {
        let mut rng = StdRng::seed_from_u64(3);
        let excluded: HashSet<QuestionId> = ids(&[1, 2]).into_iter().collect();
        assert!(sample_unseen(ids(&[1, 2]), &excluded, 10, &mut rng).is_empty());
    }

    #[test]
    fn sample_order_varies_across_draws() {
        let mut rng = StdRng::seed_from_u64(11);
        let candidates = ids(&(1..=20).collect::<Vec<_>>());
        let first = sample_unseen(candidates.clone(), &HashSet::new(), 20, &mut rng);
        let orders: HashSet<Vec<QuestionId>> = (0..5)
            .map(|_| sample_unseen(candidates.clone(), &HashSet::new(), 20, &mut rng))
            .chain(std::iter::once(first))
            .collect();
        assert!(orders.len() > 1);
    }

    #[tokio::test]
    async fn allocate_draws_only_unseen_questions() {
        let repo = Arc::new(InMemoryRepository::new());
        let now = fixed_now();
        let gid = repo
            .insert_groups(&[NewGroupRecord {
                name: NodeName::new("Science").unwrap(),
                description: None,
                created_at: now,
            }])
            .await
            .unwrap()[0];
        let sid = repo
            .insert_subjects(&[NewSubjectRecord {
                group_id: gid,
                name: NodeName::new("Physics").unwrap(),
                description: None,
                created_at: now,
            }])
            .await
            .unwrap()[0];
        let group = repo.get_group(gid).await.unwrap().unwrap();
        let subject = repo.get_subject(sid).await.unwrap().unwrap();
        let placement = Placement::resolve(&group, &subject, None, None).unwrap();
        let records: Vec<NewQuestionRecord> = (0..5)
            .map(|_| NewQuestionRecord {
                placement,
                level: Level::Easy,
                kind: QuestionKind::Mcq,
                metadata: Metadata::new(),
                created_at: now,
            })
            .collect();
        let question_ids = repo.insert_questions(&records).await.unwrap();

        let filter = FilterRequest {
            group_id: Some(gid),
            subject_id: Some(sid),
            ..FilterRequest::default()
        }
        .resolve()
        .unwrap();
        let excluded: HashSet<QuestionId> = question_ids[..3].iter().copied().collect();
        let allocator = BatchAllocator::new(repo);

        let mut batch = allocator.allocate(&filter, &excluded, 10).await.unwrap();
        batch.sort_unstable();
        assert_eq!(batch, question_ids[3..].to_vec());

        let single = allocator.allocate(&filter, &excluded, 1).await.unwrap();
        assert_eq!(single.len(), 1);
        assert!(!excluded.contains(&single[0]));

        let all: HashSet<QuestionId> = question_ids.iter().copied().collect();
        assert!(allocator.allocate(&filter, &all, 10).await.unwrap().is_empty());
    }
}
