//! Lazily evaluated bookmark queries.
//!
//! A [`BookmarkQuery`] only collects SQL clauses and their parameters; nothing
//! runs until one of `ids`, `all`, `count` or `paginate` is called. Visibility
//! and tag filters are part of the WHERE/HAVING clauses, so LIMIT/OFFSET always
//! apply to the already filtered set.

mod aggregate;
mod engine;

pub use aggregate::{weigh_tag_cloud, Aggregator};
pub use engine::{QueryEngine, SearchResults, TagResults};

use crate::db::{load_bookmarks, Store};
use crate::error::{Result, TagmarkError};
use crate::models::{Bookmark, TagCount, Viewer};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Serialize;

/// How the rows of a query are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultOrdering {
    /// Newest first
    CreatedDesc,
    /// Same order as an explicit id list (search relevance)
    ExplicitIds,
}

pub struct BookmarkQuery<'s> {
    store: &'s Store,
    joins: Vec<String>,
    join_params: Vec<Value>,
    conditions: Vec<String>,
    where_params: Vec<Value>,
    having: Option<(String, Vec<Value>)>,
    order: Option<(String, Vec<Value>)>,
    ordering: ResultOrdering,
}

impl<'s> BookmarkQuery<'s> {
    pub(crate) fn new(store: &'s Store) -> Self {
        Self {
            store,
            joins: Vec::new(),
            join_params: Vec::new(),
            conditions: Vec::new(),
            where_params: Vec::new(),
            having: None,
            order: None,
            ordering: ResultOrdering::CreatedDesc,
        }
    }

    /// A query that matches nothing
    pub(crate) fn empty(store: &'s Store) -> Self {
        Self::new(store).filter("0 = 1", Vec::new())
    }

    pub(crate) fn join(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.joins.push(sql.into());
        self.join_params.extend(params);
        self
    }

    pub(crate) fn filter(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.conditions.push(sql.into());
        self.where_params.extend(params);
        self
    }

    /// Group by bookmark id and keep groups satisfying `sql`
    pub(crate) fn having(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.having = Some((sql.into(), params));
        self
    }

    pub(crate) fn order_by_list(mut self, expr: String, params: Vec<Value>) -> Self {
        self.order = Some((expr, params));
        self.ordering = ResultOrdering::ExplicitIds;
        self
    }

    /// Public bookmarks, plus the viewer's own private ones
    pub(crate) fn visible_to(self, viewer: Viewer) -> Self {
        match viewer {
            Viewer::Anonymous => self.filter("b.private = 0", Vec::new()),
            Viewer::User(id) => self.filter(
                "(b.private = 0 OR b.user_id = ?)",
                vec![Value::Integer(id)],
            ),
        }
    }

    pub(crate) fn public_only(self) -> Self {
        self.filter("b.private = 0", Vec::new())
    }

    /// Restrict to bookmarks owned by `owner_id`
    pub fn owned_by(self, owner_id: i64) -> Self {
        self.filter("b.user_id = ?", vec![Value::Integer(owner_id)])
    }

    pub fn ordering(&self) -> ResultOrdering {
        self.ordering
    }

    fn base_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT b.id FROM bookmarks b");
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }

        let mut params = self.join_params.clone();
        params.extend(self.where_params.iter().cloned());

        if let Some((having, having_params)) = &self.having {
            sql.push_str(" GROUP BY b.id HAVING ");
            sql.push_str(having);
            params.extend(having_params.iter().cloned());
        }
        (sql, params)
    }

    fn ordered_sql(&self) -> (String, Vec<Value>) {
        let (mut sql, mut params) = self.base_sql();
        sql.push_str(" ORDER BY ");
        if let Some((expr, order_params)) = &self.order {
            sql.push_str(expr);
            sql.push_str(", ");
            params.extend(order_params.iter().cloned());
        }
        sql.push_str("b.created_on DESC, b.id DESC");
        (sql, params)
    }

    fn fetch_ids(&self, limit: Option<(usize, usize)>) -> Result<Vec<i64>> {
        let (mut sql, mut params) = self.ordered_sql();
        if let Some((limit, offset)) = limit {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Integer(limit as i64));
            params.push(Value::Integer(offset as i64));
        }
        log::debug!("bookmark query: {}", sql);

        let conn = self.store.conn();
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Matching ids, in result order
    pub fn ids(&self) -> Result<Vec<i64>> {
        self.fetch_ids(None)
    }

    /// Every matching bookmark, in result order
    pub fn all(&self) -> Result<Vec<Bookmark>> {
        let ids = self.fetch_ids(None)?;
        load_bookmarks(self.store.conn(), &ids)
    }

    pub fn first(&self) -> Result<Option<Bookmark>> {
        let ids = self.fetch_ids(Some((1, 0)))?;
        Ok(load_bookmarks(self.store.conn(), &ids)?.pop())
    }

    pub fn count(&self) -> Result<u64> {
        let (sql, params) = self.base_sql();
        let sql = format!("SELECT COUNT(*) FROM ({sql})");
        let count: i64 = self
            .store
            .conn()
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Tags on the matching bookmarks with how many of them carry each,
    /// most frequent first
    pub fn tag_counts(&self) -> Result<Vec<TagCount>> {
        let (sql, params) = self.base_sql();
        let sql = format!(
            "SELECT t.id, t.name, COUNT(*) AS total
             FROM bookmark_tags bt JOIN tags t ON t.id = bt.tag_id
             WHERE bt.bookmark_id IN ({sql})
             GROUP BY t.id, t.name
             ORDER BY total DESC, t.name ASC"
        );
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&sql)?;
        let counts = stmt
            .query_map(params_from_iter(params), |row| {
                Ok(TagCount {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    count: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    /// Items of page `page` (1-based) with `per_page` items per page
    pub fn paginate(&self, page: usize, per_page: usize) -> Result<Page<Bookmark>> {
        if page < 1 || per_page < 1 {
            return Err(TagmarkError::InvalidInput(format!(
                "invalid page {page} with {per_page} items per page"
            )));
        }
        let ids = self.fetch_ids(Some((per_page, (page - 1) * per_page)))?;
        let items = load_bookmarks(self.store.conn(), &ids)?;

        // A short first page already holds everything
        let total = if page == 1 && items.len() < per_page {
            items.len() as u64
        } else {
            self.count()?
        };

        Ok(Page {
            items,
            page,
            per_page,
            total,
        })
    }
}

/// One page of a paginated result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn pages(&self) -> usize {
        if self.per_page == 0 {
            return 0;
        }
        (self.total as usize).div_ceil(self.per_page)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBookmark, NewUser};
    use chrono::{Duration, Utc};
    use rstest::rstest;

    fn store_with_bookmarks(n: usize) -> Store {
        let store = Store::init_in_memory().unwrap();
        store
            .create_user(&NewUser::new("alice", "alice@example.com", "x"))
            .unwrap();
        let start = Utc::now() - Duration::days(1);
        for i in 0..n {
            let new = NewBookmark::new(format!("https://example.com/{i}"), format!("B{i}"))
                .created_on(start + Duration::minutes(i as i64));
            store.add_bookmark(Some(1), &new).unwrap();
        }
        store
    }

    #[test]
    fn test_newest_first() {
        let store = store_with_bookmarks(3);
        let ids = BookmarkQuery::new(&store).ids().unwrap();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[rstest]
    #[case(1, 10, 10, 25)]
    #[case(3, 10, 5, 25)]
    #[case(4, 10, 0, 25)]
    #[case(1, 30, 25, 25)]
    fn test_paginate(
        #[case] page: usize,
        #[case] per_page: usize,
        #[case] expected_items: usize,
        #[case] expected_total: u64,
    ) {
        let store = store_with_bookmarks(25);
        let result = BookmarkQuery::new(&store).paginate(page, per_page).unwrap();
        assert_eq!(result.items.len(), expected_items);
        assert_eq!(result.total, expected_total);
        assert_eq!(result.pages(), 25usize.div_ceil(per_page));
    }

    #[test]
    fn test_paginate_navigation() {
        let store = store_with_bookmarks(25);
        let page = BookmarkQuery::new(&store).paginate(2, 10).unwrap();
        assert!(page.has_prev());
        assert!(page.has_next());
        assert_eq!(page.items[0].title, "B14");
        let last = BookmarkQuery::new(&store).paginate(3, 10).unwrap();
        assert!(!last.has_next());
    }

    #[test]
    fn test_paginate_rejects_page_zero() {
        let store = store_with_bookmarks(1);
        let result = BookmarkQuery::new(&store).paginate(0, 10);
        assert!(matches!(result, Err(TagmarkError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_query() {
        let store = store_with_bookmarks(3);
        let query = BookmarkQuery::empty(&store);
        assert!(query.ids().unwrap().is_empty());
        assert_eq!(query.count().unwrap(), 0);
        assert!(query.first().unwrap().is_none());
    }

    #[test]
    fn test_page_map() {
        let page = Page {
            items: vec![1, 2, 3],
            page: 1,
            per_page: 3,
            total: 7,
        };
        let mapped = page.map(|n| n * 10);
        assert_eq!(mapped.items, vec![10, 20, 30]);
        assert_eq!(mapped.pages(), 3);
    }
}
