use std::collections::HashSet;

use qbank_core::model::{FilterScope, Question, QuestionId, QuizFilter};
use sqlx::{QueryBuilder, Sqlite};

use super::SqliteRepository;
use super::mapping::{
    count_from_i64, db_err, encode_metadata, id_to_i64, map_question_row, page_bounds,
    question_id_from_i64, ser,
};
use crate::repository::{
    NewQuestionRecord, Page, PageRequest, QuestionQuery, QuestionRepository, StorageError,
};

const QUESTION_COLUMNS: &str = "id, group_id, subject_id, category_id, subcategory_id, level, kind, metadata, created_at, updated_at";

/// Append `AND column = ?` for every populated field of the listing query.
fn push_query_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    query: &QuestionQuery,
) -> Result<(), StorageError> {
    qb.push(" WHERE 1 = 1");
    if let Some(id) = query.group_id {
        qb.push(" AND group_id = ")
            .push_bind(id_to_i64("group_id", id.value())?);
    }
    if let Some(id) = query.subject_id {
        qb.push(" AND subject_id = ")
            .push_bind(id_to_i64("subject_id", id.value())?);
    }
    if let Some(id) = query.category_id {
        qb.push(" AND category_id = ")
            .push_bind(id_to_i64("category_id", id.value())?);
    }
    if let Some(id) = query.subcategory_id {
        qb.push(" AND subcategory_id = ")
            .push_bind(id_to_i64("subcategory_id", id.value())?);
    }
    if let Some(level) = query.level {
        qb.push(" AND level = ").push_bind(level.as_str());
    }
    if let Some(kind) = query.kind {
        qb.push(" AND kind = ").push_bind(kind.as_str());
    }
    Ok(())
}

fn push_id_list(
    qb: &mut QueryBuilder<'_, Sqlite>,
    column: &str,
    ids: impl IntoIterator<Item = i64>,
) {
    qb.push(" AND ");
    qb.push(column);
    qb.push(" IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
}

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn insert_questions(
        &self,
        questions: &[NewQuestionRecord],
    ) -> Result<Vec<QuestionId>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut ids = Vec::with_capacity(questions.len());
        for record in questions {
            let placement = &record.placement;
            let res = sqlx::query(
                r"
                INSERT INTO questions (
                    group_id, subject_id, category_id, subcategory_id,
                    level, kind, metadata, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ",
            )
            .bind(id_to_i64("group_id", placement.group_id().value())?)
            .bind(id_to_i64("subject_id", placement.subject_id().value())?)
            .bind(
                placement
                    .category_id()
                    .map(|id| id_to_i64("category_id", id.value()))
                    .transpose()?,
            )
            .bind(
                placement
                    .subcategory_id()
                    .map(|id| id_to_i64("subcategory_id", id.value()))
                    .transpose()?,
            )
            .bind(record.level.as_str())
            .bind(record.kind.as_str())
            .bind(encode_metadata(&record.metadata)?)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            ids.push(question_id_from_i64(res.last_insert_rowid())?);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(ids)
    }

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, group_id, subject_id, category_id, subcategory_id,
                   level, kind, metadata, created_at, updated_at
            FROM questions WHERE id = ?1
            ",
        )
        .bind(id_to_i64("question_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_question_row).transpose()
    }

    async fn update_question(&self, question: &Question) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE questions
            SET level = ?1, kind = ?2, metadata = ?3, updated_at = ?4
            WHERE id = ?5
            ",
        )
        .bind(question.level().as_str())
        .bind(question.kind().as_str())
        .bind(encode_metadata(question.metadata())?)
        .bind(question.updated_at())
        .bind(id_to_i64("question_id", question.id().value())?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_question(&self, id: QuestionId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM questions WHERE id = ?1")
            .bind(id_to_i64("question_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_questions(
        &self,
        query: &QuestionQuery,
        page: PageRequest,
    ) -> Result<Page<Question>, StorageError> {
        let (offset, limit) = page_bounds(page.offset(), page.limit())?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        qb.push(QUESTION_COLUMNS).push(" FROM questions");
        push_query_filters(&mut qb, query)?;
        qb.push(" ORDER BY id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        let items = rows
            .iter()
            .map(map_question_row)
            .collect::<Result<_, _>>()?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM questions");
        push_query_filters(&mut count, query)?;
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Page {
            items,
            total: count_from_i64(total)?,
            request: page,
        })
    }

    async fn unseen_question_ids(
        &self,
        filter: &QuizFilter,
        excluded: &HashSet<QuestionId>,
    ) -> Result<Vec<QuestionId>, StorageError> {
        // Ids past i64::MAX cannot exist in SQLite, so they match nothing.
        let (Ok(group_id), Ok(subject_id)) = (
            i64::try_from(filter.group_id().value()),
            i64::try_from(filter.subject_id().value()),
        ) else {
            return Ok(Vec::new());
        };
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM questions WHERE group_id = ");
        qb.push_bind(group_id);
        qb.push(" AND subject_id = ").push_bind(subject_id);

        let narrowed = match filter.scope() {
            FilterScope::Subject => None,
            FilterScope::Categories(ids) => Some((
                "category_id",
                ids.iter()
                    .filter_map(|id| i64::try_from(id.value()).ok())
                    .collect::<Vec<_>>(),
            )),
            FilterScope::SubCategories(ids) => Some((
                "subcategory_id",
                ids.iter()
                    .filter_map(|id| i64::try_from(id.value()).ok())
                    .collect::<Vec<_>>(),
            )),
        };
        if let Some((column, ids)) = narrowed {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            push_id_list(&mut qb, column, ids);
        }

        if !filter.levels().is_empty() {
            qb.push(" AND level IN (");
            let mut separated = qb.separated(", ");
            for level in filter.levels() {
                separated.push_bind(level.as_str());
            }
            separated.push_unseparated(")");
        }
        if !excluded.is_empty() {
            // One JSON array bind instead of a variable per seen id.
            let seen: Vec<i64> = excluded
                .iter()
                .filter_map(|id| i64::try_from(id.value()).ok())
                .collect();
            let seen = serde_json::to_string(&seen).map_err(ser)?;
            qb.push(" AND id NOT IN (SELECT value FROM json_each(")
                .push_bind(seen)
                .push("))");
        }
        qb.push(" ORDER BY id ASC");

        let ids: Vec<i64> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        ids.into_iter().map(question_id_from_i64).collect()
    }

    async fn count_questions(&self) -> Result<u64, StorageError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        count_from_i64(total)
    }
}
