use qbank_core::model::{
    Category, CategoryId, Group, GroupId, SubCategory, SubCategoryId, Subject, SubjectId,
};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::SqliteRepository;
use super::mapping::{
    category_id_from_i64, count_from_i64, db_err, group_id_from_i64, id_to_i64,
    map_category_row, map_group_row, map_subcategory_row, map_subject_row, page_bounds, ser,
    subcategory_id_from_i64, subject_id_from_i64,
};
use crate::repository::{
    NewCategoryRecord, NewGroupRecord, NewSubCategoryRecord, NewSubjectRecord, Page,
    PageRequest, StorageError, TaxonomyCounts, TaxonomyRepository,
};

/// Natural-key lookups are split so one statement stays well under the bind limit.
const LOOKUP_CHUNK: usize = 400;

impl SqliteRepository {
    async fn count_where(
        &self,
        sql: &'static str,
        parent: Option<i64>,
    ) -> Result<u64, StorageError> {
        let total: i64 = sqlx::query_scalar(sql)
            .bind(parent)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        count_from_i64(total)
    }

    async fn delete_where_id(&self, sql: &'static str, id: i64) -> Result<bool, StorageError> {
        let res = sqlx::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }

    /// Run a `(parent_id, name) IN (VALUES ...)` lookup in chunks.
    async fn fetch_by_parent_and_name(
        &self,
        select: &'static str,
        parent_column: &'static str,
        keys: Vec<(i64, String)>,
    ) -> Result<Vec<sqlx::sqlite::SqliteRow>, StorageError> {
        let mut rows = Vec::new();
        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(select);
            qb.push(" WHERE (");
            qb.push(parent_column);
            qb.push(", name) IN (");
            qb.push_values(chunk.iter().cloned(), |mut b, (parent, name)| {
                b.push_bind(parent).push_bind(name);
            });
            qb.push(") ORDER BY id ASC");
            rows.extend(
                qb.build()
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_err)?,
            );
        }
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl TaxonomyRepository for SqliteRepository {
    async fn insert_groups(&self, groups: &[NewGroupRecord]) -> Result<Vec<GroupId>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut ids = Vec::with_capacity(groups.len());
        for group in groups {
            let res = sqlx::query(
                r"
                INSERT INTO taxonomy_groups (name, description, created_at)
                VALUES (?1, ?2, ?3)
                ",
            )
            .bind(group.name.as_str())
            .bind(group.description.as_deref())
            .bind(group.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            ids.push(group_id_from_i64(res.last_insert_rowid())?);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(ids)
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, name, description, created_at
            FROM taxonomy_groups WHERE id = ?1
            ",
        )
        .bind(id_to_i64("group_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_group_row).transpose()
    }

    async fn list_groups(&self, page: PageRequest) -> Result<Page<Group>, StorageError> {
        let (offset, limit) = page_bounds(page.offset(), page.limit())?;
        let rows = sqlx::query(
            r"
            SELECT id, name, description, created_at
            FROM taxonomy_groups
            ORDER BY id ASC
            LIMIT ?1 OFFSET ?2
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows.iter().map(map_group_row).collect::<Result<_, _>>()?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM taxonomy_groups")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let total = count_from_i64(total)?;
        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn groups_by_name(&self, names: &[String]) -> Result<Vec<Group>, StorageError> {
        let mut groups = Vec::new();
        for chunk in names.chunks(LOOKUP_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT id, name, description, created_at FROM taxonomy_groups WHERE name IN (",
            );
            let mut separated = qb.separated(", ");
            for name in chunk {
                separated.push_bind(name.clone());
            }
            separated.push_unseparated(") ORDER BY id ASC");
            let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
            for row in &rows {
                groups.push(map_group_row(row)?);
            }
        }
        Ok(groups)
    }

    async fn delete_group(&self, id: GroupId) -> Result<bool, StorageError> {
        self.delete_where_id(
            "DELETE FROM taxonomy_groups WHERE id = ?1",
            id_to_i64("group_id", id.value())?,
        )
        .await
    }

    async fn insert_subjects(
        &self,
        subjects: &[NewSubjectRecord],
    ) -> Result<Vec<SubjectId>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut ids = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let res = sqlx::query(
                r"
                INSERT INTO subjects (group_id, name, description, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(id_to_i64("group_id", subject.group_id.value())?)
            .bind(subject.name.as_str())
            .bind(subject.description.as_deref())
            .bind(subject.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            ids.push(subject_id_from_i64(res.last_insert_rowid())?);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(ids)
    }

    async fn get_subject(&self, id: SubjectId) -> Result<Option<Subject>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, group_id, name, description, created_at
            FROM subjects WHERE id = ?1
            ",
        )
        .bind(id_to_i64("subject_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_subject_row).transpose()
    }

    async fn list_subjects(
        &self,
        group: Option<GroupId>,
        page: PageRequest,
    ) -> Result<Page<Subject>, StorageError> {
        let (offset, limit) = page_bounds(page.offset(), page.limit())?;
        let parent = group
            .map(|g| id_to_i64("group_id", g.value()))
            .transpose()?;
        let rows = sqlx::query(
            r"
            SELECT id, group_id, name, description, created_at
            FROM subjects
            WHERE ?1 IS NULL OR group_id = ?1
            ORDER BY id ASC
            LIMIT ?2 OFFSET ?3
            ",
        )
        .bind(parent)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows.iter().map(map_subject_row).collect::<Result<_, _>>()?;
        let total = self
            .count_where(
                "SELECT COUNT(*) FROM subjects WHERE ?1 IS NULL OR group_id = ?1",
                parent,
            )
            .await?;
        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn subjects_by_name(
        &self,
        keys: &[(GroupId, String)],
    ) -> Result<Vec<Subject>, StorageError> {
        let keys = keys
            .iter()
            .map(|(g, n)| Ok((id_to_i64("group_id", g.value())?, n.clone())))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let rows = self
            .fetch_by_parent_and_name(
                "SELECT id, group_id, name, description, created_at FROM subjects",
                "group_id",
                keys,
            )
            .await?;
        rows.iter().map(map_subject_row).collect()
    }

    async fn delete_subject(&self, id: SubjectId) -> Result<bool, StorageError> {
        self.delete_where_id(
            "DELETE FROM subjects WHERE id = ?1",
            id_to_i64("subject_id", id.value())?,
        )
        .await
    }

    async fn insert_categories(
        &self,
        categories: &[NewCategoryRecord],
    ) -> Result<Vec<CategoryId>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut ids = Vec::with_capacity(categories.len());
        for category in categories {
            let res = sqlx::query(
                r"
                INSERT INTO categories (group_id, subject_id, name, description, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(id_to_i64("group_id", category.group_id.value())?)
            .bind(id_to_i64("subject_id", category.subject_id.value())?)
            .bind(category.name.as_str())
            .bind(category.description.as_deref())
            .bind(category.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            ids.push(category_id_from_i64(res.last_insert_rowid())?);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(ids)
    }

    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, group_id, subject_id, name, description, created_at
            FROM categories WHERE id = ?1
            ",
        )
        .bind(id_to_i64("category_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_category_row).transpose()
    }

    async fn list_categories(
        &self,
        subject: Option<SubjectId>,
        page: PageRequest,
    ) -> Result<Page<Category>, StorageError> {
        let (offset, limit) = page_bounds(page.offset(), page.limit())?;
        let parent = subject
            .map(|s| id_to_i64("subject_id", s.value()))
            .transpose()?;
        let rows = sqlx::query(
            r"
            SELECT id, group_id, subject_id, name, description, created_at
            FROM categories
            WHERE ?1 IS NULL OR subject_id = ?1
            ORDER BY id ASC
            LIMIT ?2 OFFSET ?3
            ",
        )
        .bind(parent)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows.iter().map(map_category_row).collect::<Result<_, _>>()?;
        let total = self
            .count_where(
                "SELECT COUNT(*) FROM categories WHERE ?1 IS NULL OR subject_id = ?1",
                parent,
            )
            .await?;
        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn categories_by_name(
        &self,
        keys: &[(SubjectId, String)],
    ) -> Result<Vec<Category>, StorageError> {
        let keys = keys
            .iter()
            .map(|(s, n)| Ok((id_to_i64("subject_id", s.value())?, n.clone())))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let rows = self
            .fetch_by_parent_and_name(
                "SELECT id, group_id, subject_id, name, description, created_at FROM categories",
                "subject_id",
                keys,
            )
            .await?;
        rows.iter().map(map_category_row).collect()
    }

    async fn delete_category(&self, id: CategoryId) -> Result<bool, StorageError> {
        self.delete_where_id(
            "DELETE FROM categories WHERE id = ?1",
            id_to_i64("category_id", id.value())?,
        )
        .await
    }

    async fn insert_subcategories(
        &self,
        subcategories: &[NewSubCategoryRecord],
    ) -> Result<Vec<SubCategoryId>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut ids = Vec::with_capacity(subcategories.len());
        for sub in subcategories {
            let res = sqlx::query(
                r"
                INSERT INTO subcategories (group_id, subject_id, category_id, name, description, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(id_to_i64("group_id", sub.group_id.value())?)
            .bind(id_to_i64("subject_id", sub.subject_id.value())?)
            .bind(id_to_i64("category_id", sub.category_id.value())?)
            .bind(sub.name.as_str())
            .bind(sub.description.as_deref())
            .bind(sub.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            ids.push(subcategory_id_from_i64(res.last_insert_rowid())?);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(ids)
    }

    async fn get_subcategory(
        &self,
        id: SubCategoryId,
    ) -> Result<Option<SubCategory>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, group_id, subject_id, category_id, name, description, created_at
            FROM subcategories WHERE id = ?1
            ",
        )
        .bind(id_to_i64("subcategory_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_subcategory_row).transpose()
    }

    async fn list_subcategories(
        &self,
        category: Option<CategoryId>,
        page: PageRequest,
    ) -> Result<Page<SubCategory>, StorageError> {
        let (offset, limit) = page_bounds(page.offset(), page.limit())?;
        let parent = category
            .map(|c| id_to_i64("category_id", c.value()))
            .transpose()?;
        let rows = sqlx::query(
            r"
            SELECT id, group_id, subject_id, category_id, name, description, created_at
            FROM subcategories
            WHERE ?1 IS NULL OR category_id = ?1
            ORDER BY id ASC
            LIMIT ?2 OFFSET ?3
            ",
        )
        .bind(parent)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows
            .iter()
            .map(map_subcategory_row)
            .collect::<Result<_, _>>()?;
        let total = self
            .count_where(
                "SELECT COUNT(*) FROM subcategories WHERE ?1 IS NULL OR category_id = ?1",
                parent,
            )
            .await?;
        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn subcategories_by_name(
        &self,
        keys: &[(CategoryId, String)],
    ) -> Result<Vec<SubCategory>, StorageError> {
        let keys = keys
            .iter()
            .map(|(c, n)| Ok((id_to_i64("category_id", c.value())?, n.clone())))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let rows = self
            .fetch_by_parent_and_name(
                "SELECT id, group_id, subject_id, category_id, name, description, created_at FROM subcategories",
                "category_id",
                keys,
            )
            .await?;
        rows.iter().map(map_subcategory_row).collect()
    }

    async fn delete_subcategory(&self, id: SubCategoryId) -> Result<bool, StorageError> {
        self.delete_where_id(
            "DELETE FROM subcategories WHERE id = ?1",
            id_to_i64("subcategory_id", id.value())?,
        )
        .await
    }

    async fn taxonomy_counts(&self) -> Result<TaxonomyCounts, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM taxonomy_groups) AS groups_total,
                (SELECT COUNT(*) FROM subjects) AS subjects_total,
                (SELECT COUNT(*) FROM categories) AS categories_total,
                (SELECT COUNT(*) FROM subcategories) AS subcategories_total
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let get = |column: &str| -> Result<u64, StorageError> {
            count_from_i64(row.try_get(column).map_err(ser)?)
        };
        Ok(TaxonomyCounts {
            groups: get("groups_total")?,
            subjects: get("subjects_total")?,
            categories: get("categories_total")?,
            subcategories: get("subcategories_total")?,
        })
    }
}
