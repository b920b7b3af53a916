use chrono::{DateTime, Utc};
use qbank_core::model::{
    AccessToken, Category, CategoryId, Group, GroupId, Level, Metadata, NodeName, Placement,
    Question, QuestionId, QuestionKind, SubCategory, SubCategoryId, Subject, SubjectId, TokenKey,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Map driver errors, surfacing constraint violations as domain-level outcomes.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StorageError::Conflict;
        }
        if db.is_foreign_key_violation() {
            return StorageError::NotFound;
        }
    }
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn page_bounds(offset: u64, limit: u64) -> Result<(i64, i64), StorageError> {
    Ok((id_to_i64("offset", offset)?, id_to_i64("limit", limit)?))
}

pub(crate) fn count_from_i64(v: i64) -> Result<u64, StorageError> {
    i64_to_u64("count", v)
}

pub(crate) fn group_id_from_i64(v: i64) -> Result<GroupId, StorageError> {
    Ok(GroupId::new(i64_to_u64("group_id", v)?))
}

pub(crate) fn subject_id_from_i64(v: i64) -> Result<SubjectId, StorageError> {
    Ok(SubjectId::new(i64_to_u64("subject_id", v)?))
}

pub(crate) fn category_id_from_i64(v: i64) -> Result<CategoryId, StorageError> {
    Ok(CategoryId::new(i64_to_u64("category_id", v)?))
}

pub(crate) fn subcategory_id_from_i64(v: i64) -> Result<SubCategoryId, StorageError> {
    Ok(SubCategoryId::new(i64_to_u64("subcategory_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

fn node_name(row: &SqliteRow) -> Result<NodeName, StorageError> {
    NodeName::new(row.try_get::<String, _>("name").map_err(ser)?).map_err(ser)
}

pub(crate) fn map_group_row(row: &SqliteRow) -> Result<Group, StorageError> {
    Ok(Group::new(
        group_id_from_i64(row.try_get("id").map_err(ser)?)?,
        node_name(row)?,
        row.try_get("description").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    ))
}

pub(crate) fn map_subject_row(row: &SqliteRow) -> Result<Subject, StorageError> {
    Ok(Subject::new(
        subject_id_from_i64(row.try_get("id").map_err(ser)?)?,
        group_id_from_i64(row.try_get("group_id").map_err(ser)?)?,
        node_name(row)?,
        row.try_get("description").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    ))
}

pub(crate) fn map_category_row(row: &SqliteRow) -> Result<Category, StorageError> {
    Ok(Category::from_persisted(
        category_id_from_i64(row.try_get("id").map_err(ser)?)?,
        group_id_from_i64(row.try_get("group_id").map_err(ser)?)?,
        subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?,
        node_name(row)?,
        row.try_get("description").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    ))
}

pub(crate) fn map_subcategory_row(row: &SqliteRow) -> Result<SubCategory, StorageError> {
    Ok(SubCategory::from_persisted(
        subcategory_id_from_i64(row.try_get("id").map_err(ser)?)?,
        group_id_from_i64(row.try_get("group_id").map_err(ser)?)?,
        subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?,
        category_id_from_i64(row.try_get("category_id").map_err(ser)?)?,
        node_name(row)?,
        row.try_get("description").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    ))
}

pub(crate) fn encode_metadata(metadata: &Metadata) -> Result<String, StorageError> {
    serde_json::to_string(metadata).map_err(ser)
}

pub(crate) fn map_question_row(row: &SqliteRow) -> Result<Question, StorageError> {
    let placement = Placement::from_persisted(
        group_id_from_i64(row.try_get("group_id").map_err(ser)?)?,
        subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?,
        row.try_get::<Option<i64>, _>("category_id")
            .map_err(ser)?
            .map(category_id_from_i64)
            .transpose()?,
        row.try_get::<Option<i64>, _>("subcategory_id")
            .map_err(ser)?
            .map(subcategory_id_from_i64)
            .transpose()?,
    );

    let level: Level = row
        .try_get::<String, _>("level")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let kind: QuestionKind = row
        .try_get::<String, _>("kind")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let metadata: Metadata =
        serde_json::from_str(&row.try_get::<String, _>("metadata").map_err(ser)?).map_err(ser)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(ser)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(ser)?;

    Ok(Question::from_persisted(
        question_id_from_i64(row.try_get("id").map_err(ser)?)?,
        placement,
        level,
        kind,
        metadata,
        created_at,
        updated_at,
    ))
}

pub(crate) fn map_token_row(row: &SqliteRow) -> Result<AccessToken, StorageError> {
    let key = TokenKey::new(row.try_get::<String, _>("token_key").map_err(ser)?).map_err(ser)?;
    let is_active: i64 = row.try_get("is_active").map_err(ser)?;
    Ok(AccessToken::from_persisted(
        key,
        row.try_get("description").map_err(ser)?,
        is_active != 0,
        row.try_get("created_at").map_err(ser)?,
    ))
}
