use super::{Aggregator, BookmarkQuery, Page};
use crate::config::Config;
use crate::db::Store;
use crate::error::{Result, TagmarkError};
use crate::models::{Bookmark, TagCount, Viewer};
use crate::search::SearchIndex;
use crate::tags::{normalize_tags, split_exclusions};
use crate::utils::{now_utc, placeholders};
use rusqlite::types::Value;
use serde::Serialize;

const JOIN_TAGS: &str =
    "JOIN bookmark_tags bt ON bt.bookmark_id = b.id JOIN tags t ON t.id = bt.tag_id";

fn text_values(names: &[String]) -> Vec<Value> {
    names.iter().cloned().map(Value::Text).collect()
}

/// Result of a tag search expression such as `web python -php`
#[derive(Debug, Clone, Serialize)]
pub struct TagResults {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub bookmarks: Page<Bookmark>,
    pub related: Vec<TagCount>,
}

/// Free-text hits resolved to the bookmarks the viewer may see. Totals and
/// facets are computed over the visible bookmarks only.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    /// Visible bookmarks, best match first
    pub bookmarks: Page<Bookmark>,
    /// Tags of every visible hit, most common first
    pub facets: Vec<TagCount>,
}

/// Read side over the bookmark store: visibility-aware, lazily evaluated queries
pub struct QueryEngine<'a> {
    store: &'a Store,
    config: &'a Config,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a Store, config: &'a Config) -> Self {
        Self { store, config }
    }

    /// Everything `viewer` may see, newest first
    pub fn latest(&self, viewer: Viewer) -> BookmarkQuery<'a> {
        BookmarkQuery::new(self.store).visible_to(viewer)
    }

    /// Bookmarks of one user. Without `include_private` only public ones are
    /// returned, whoever is asking.
    pub fn by_owner(&self, owner_id: i64, include_private: bool) -> BookmarkQuery<'a> {
        let query = BookmarkQuery::new(self.store).owned_by(owner_id);
        if include_private {
            query
        } else {
            query.public_only()
        }
    }

    /// Bookmarks of `owner_id` carrying every tag in `tags`
    pub fn by_owner_and_tags<S: AsRef<str>>(
        &self,
        owner_id: i64,
        tags: &[S],
    ) -> Result<BookmarkQuery<'a>> {
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return Err(TagmarkError::EmptyTagList("by_owner_and_tags"));
        }
        let n = tags.len() as i64;
        Ok(BookmarkQuery::new(self.store)
            .join(JOIN_TAGS, Vec::new())
            .filter(
                format!("t.name IN ({})", placeholders(tags.len())),
                text_values(&tags),
            )
            .owned_by(owner_id)
            .having("COUNT(*) = ?", vec![Value::Integer(n)]))
    }

    /// Visible bookmarks carrying all of `include` and none of `exclude`
    pub fn by_tags<S: AsRef<str>, E: AsRef<str>>(
        &self,
        include: &[S],
        exclude: &[E],
        viewer: Viewer,
        owner_id: Option<i64>,
    ) -> Result<BookmarkQuery<'a>> {
        let include = normalize_tags(include);
        let exclude = normalize_tags(exclude);

        if include.is_empty() {
            if exclude.is_empty() {
                return Err(TagmarkError::EmptyTagList("by_tags"));
            }
            log::debug!("by_tags called with exclusions only, returning nothing");
            return Ok(BookmarkQuery::empty(self.store));
        }

        let n = include.len() as i64;
        let mut query = if exclude.is_empty() {
            BookmarkQuery::new(self.store)
                .join(JOIN_TAGS, Vec::new())
                .filter(
                    format!("t.name IN ({})", placeholders(include.len())),
                    text_values(&include),
                )
                .visible_to(viewer)
                .having("COUNT(*) = ?", vec![Value::Integer(n)])
        } else {
            let mut include_params = text_values(&include);
            include_params.push(Value::Integer(n));
            let include_set = format!(
                "JOIN (SELECT bt.bookmark_id FROM bookmark_tags bt
                       JOIN tags t ON t.id = bt.tag_id
                       WHERE t.name IN ({})
                       GROUP BY bt.bookmark_id
                       HAVING COUNT(DISTINCT t.name) = ?) inc ON inc.bookmark_id = b.id",
                placeholders(include.len())
            );
            let exclude_set = format!(
                "b.id NOT IN (SELECT bt.bookmark_id FROM bookmark_tags bt
                              JOIN tags t ON t.id = bt.tag_id
                              WHERE t.name IN ({}))",
                placeholders(exclude.len())
            );
            BookmarkQuery::new(self.store)
                .join(include_set, include_params)
                .filter(exclude_set, text_values(&exclude))
                .visible_to(viewer)
        };

        if let Some(owner_id) = owner_id {
            query = query.owned_by(owner_id);
        }
        Ok(query)
    }

    /// Public bookmarks of the users `viewer` follows; empty when anonymous
    pub fn by_followed(&self, viewer: Viewer) -> BookmarkQuery<'a> {
        match viewer {
            Viewer::Anonymous => BookmarkQuery::empty(self.store),
            Viewer::User(id) => BookmarkQuery::new(self.store)
                .join(
                    "JOIN watched_users w ON w.other_user_id = b.user_id",
                    Vec::new(),
                )
                .filter("w.user_id = ?", vec![Value::Integer(id)])
                .public_only(),
        }
    }

    /// Visible bookmarks among `ids`, in the order of `ids` when the backend
    /// can order by an explicit list. Check [`BookmarkQuery::ordering`] for
    /// the order actually applied.
    pub fn by_ids(&self, ids: &[i64], viewer: Viewer) -> BookmarkQuery<'a> {
        if ids.is_empty() {
            return BookmarkQuery::empty(self.store);
        }
        let id_values: Vec<Value> = ids.iter().copied().map(Value::Integer).collect();
        let query = BookmarkQuery::new(self.store)
            .filter(
                format!("b.id IN ({})", placeholders(ids.len())),
                id_values.clone(),
            )
            .visible_to(viewer);

        let order = if self.config.query.explicit_id_order {
            self.store.dialect().explicit_order("b.id", ids.len())
        } else {
            None
        };
        match order {
            Some(expr) => query.order_by_list(expr, id_values),
            None => {
                log::warn!(
                    "explicit id ordering unavailable, {} results fall back to newest first",
                    ids.len()
                );
                query
            }
        }
    }

    /// Bookmarks created on each of the last `days` days (UTC), oldest first.
    /// The last entry is today.
    pub fn submit_by_day(&self, days: usize) -> Result<Vec<u64>> {
        if days == 0 {
            return Ok(Vec::new());
        }
        let dialect = self.store.dialect();
        let day = dialect.day_number("b.created_on");
        let today = dialect.day_number("?1");
        let sql = format!(
            "SELECT {today} - {day} AS age, COUNT(*) FROM bookmarks b
             WHERE {day} BETWEEN {today} - ?2 AND {today}
             GROUP BY age"
        );

        let mut counts = vec![0u64; days];
        let mut stmt = self.store.conn().prepare(&sql)?;
        let rows = stmt.query_map((now_utc(), (days - 1) as i64), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (age, count) = row?;
            if let Some(slot) = usize::try_from(age)
                .ok()
                .and_then(|age| (days - 1).checked_sub(age))
            {
                counts[slot] = count as u64;
            }
        }
        Ok(counts)
    }

    /// One bookmark as seen by `viewer`; someone else's private bookmark is
    /// reported as missing
    pub fn get_bookmark(&self, id: i64, viewer: Viewer) -> Result<Bookmark> {
        let bookmark = self.store.get_bookmark(id)?;
        if !bookmark.is_visible_to(viewer.id()) {
            return Err(TagmarkError::not_found("Bookmark", id));
        }
        Ok(bookmark)
    }

    /// Search the full-text index and load one page of matching bookmarks.
    /// Hits that are private to someone else or no longer in the store are
    /// left out before anything is counted.
    pub fn full_text_search(
        &self,
        index: &SearchIndex,
        query: &str,
        viewer: Viewer,
        page: usize,
    ) -> Result<SearchResults> {
        let search = &self.config.search;
        let ids = index.matching_ids(query, &search.fields, search.max_hits)?;
        let visible = self.by_ids(&ids, viewer);
        Ok(SearchResults {
            bookmarks: visible.paginate(page, search.page_len)?,
            facets: visible.tag_counts()?,
        })
    }

    /// Run a tag search expression (`-name` excludes a tag) and fetch one page
    pub fn tag_search<S: AsRef<str>>(
        &self,
        terms: &[S],
        viewer: Viewer,
        owner_id: Option<i64>,
        page: usize,
    ) -> Result<TagResults> {
        let (include, exclude) = split_exclusions(terms);
        let include = normalize_tags(&include);
        let exclude = normalize_tags(&exclude);
        let bookmarks = self
            .by_tags(&include, &exclude, viewer, owner_id)?
            .paginate(page, self.config.query.per_page)?;

        let related = if self.config.query.related_tags_enabled && !include.is_empty() {
            Aggregator::new(self.store, self.config).related_tags(
                &include,
                self.config.query.related_tags_max,
                viewer,
            )?
        } else {
            Vec::new()
        };

        Ok(TagResults {
            include,
            exclude,
            bookmarks,
            related,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBookmark, NewUser};
    use crate::query::ResultOrdering;
    use chrono::Duration;
    use rstest::rstest;

    struct Fixture {
        store: Store,
        config: Config,
    }

    impl Fixture {
        fn engine(&self) -> QueryEngine<'_> {
            QueryEngine::new(&self.store, &self.config)
        }

        fn add(&self, owner: i64, title: &str, tags: &[&str], private: bool) -> i64 {
            let new = NewBookmark::new(format!("https://example.com/{title}"), title)
                .tags(tags)
                .private(private);
            self.store.add_bookmark(Some(owner), &new).unwrap()
        }
    }

    /// alice (1) and bob (2); alice owns the web/python fixture
    fn fixture() -> Fixture {
        let store = Store::init_in_memory().unwrap();
        store
            .create_user(&NewUser::new("alice", "alice@example.com", "x"))
            .unwrap();
        store
            .create_user(&NewUser::new("bob", "bob@example.com", "x"))
            .unwrap();
        let fx = Fixture {
            store,
            config: Config::default(),
        };
        fx.add(1, "one", &["web", "python"], false);
        fx.add(1, "two", &["web"], false);
        fx.add(1, "three", &["python", "web", "bing"], false);
        fx
    }

    fn titles(query: &BookmarkQuery<'_>) -> Vec<String> {
        query.all().unwrap().into_iter().map(|b| b.title).collect()
    }

    #[rstest]
    #[case(&["web"], &[], 3)]
    #[case(&["web"], &["bing"], 2)]
    #[case(&["web", "python"], &[], 2)]
    #[case(&["WEB", "Python"], &[], 2)]
    #[case(&["web", "python"], &["bing"], 1)]
    #[case(&["web", "web"], &[], 3)]
    #[case(&["missing"], &[], 0)]
    #[case(&["web"], &["python", "bing"], 1)]
    fn test_by_tags(#[case] include: &[&str], #[case] exclude: &[&str], #[case] expected: u64) {
        let fx = fixture();
        let query = fx
            .engine()
            .by_tags(include, exclude, Viewer::Anonymous, None)
            .unwrap();
        assert_eq!(query.count().unwrap(), expected);
        assert_eq!(query.ids().unwrap().len() as u64, expected);
    }

    #[test]
    fn test_by_tags_empty_lists() {
        let fx = fixture();
        let engine = fx.engine();
        let result = engine.by_tags::<&str, &str>(&[], &[], Viewer::Anonymous, None);
        assert!(matches!(result, Err(TagmarkError::EmptyTagList(_))));

        let query = engine
            .by_tags::<&str, &str>(&[], &["web"], Viewer::Anonymous, None)
            .unwrap();
        assert!(query.ids().unwrap().is_empty());
    }

    #[test]
    fn test_private_bookmarks_hidden_from_others() {
        let fx = fixture();
        fx.add(2, "secret", &["web"], true);
        let engine = fx.engine();

        let anon = engine.by_tags(&["web"], &[] as &[&str], Viewer::Anonymous, None).unwrap();
        assert!(!titles(&anon).contains(&"secret".to_string()));
        let alice = engine.latest(Viewer::User(1));
        assert!(!titles(&alice).contains(&"secret".to_string()));

        let bob = engine.by_tags(&["web"], &[] as &[&str], Viewer::User(2), None).unwrap();
        assert!(titles(&bob).contains(&"secret".to_string()));
        assert!(titles(&engine.by_owner(2, true)).contains(&"secret".to_string()));
        assert!(titles(&engine.by_owner(2, false)).is_empty());
    }

    #[test]
    fn test_visibility_applies_before_pagination() {
        let fx = fixture();
        for i in 0..5 {
            fx.add(2, &format!("hidden{i}"), &["web"], true);
        }
        let page = fx
            .engine()
            .by_tags(&["web"], &[] as &[&str], Viewer::Anonymous, None)
            .unwrap()
            .paginate(1, 3)
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_latest_is_newest_first() {
        let fx = fixture();
        assert_eq!(titles(&fx.engine().latest(Viewer::Anonymous)), vec!["three", "two", "one"]);
    }

    #[test]
    fn test_by_tags_restricted_to_owner() {
        let fx = fixture();
        fx.add(2, "bobs", &["web"], false);
        let engine = fx.engine();
        let query = engine
            .by_tags(&["web"], &[] as &[&str], Viewer::Anonymous, Some(2))
            .unwrap();
        assert_eq!(titles(&query), vec!["bobs"]);
        let query = engine
            .by_tags(&["web"], &["bing"], Viewer::Anonymous, Some(1))
            .unwrap();
        assert_eq!(titles(&query), vec!["two", "one"]);
    }

    #[test]
    fn test_by_owner_and_tags() {
        let fx = fixture();
        fx.add(2, "bobs", &["web", "python"], false);
        let engine = fx.engine();
        let query = engine.by_owner_and_tags(1, &["python", "web"]).unwrap();
        assert_eq!(titles(&query), vec!["three", "one"]);
        assert!(matches!(
            engine.by_owner_and_tags::<&str>(1, &[]),
            Err(TagmarkError::EmptyTagList(_))
        ));
    }

    #[test]
    fn test_by_followed() {
        let fx = fixture();
        fx.add(2, "bob-public", &["misc"], false);
        fx.add(2, "bob-private", &["misc"], true);
        fx.store.watch_user(1, 2).unwrap();
        let engine = fx.engine();

        assert_eq!(titles(&engine.by_followed(Viewer::User(1))), vec!["bob-public"]);
        assert!(titles(&engine.by_followed(Viewer::User(2))).is_empty());
        assert!(titles(&engine.by_followed(Viewer::Anonymous)).is_empty());
    }

    #[test]
    fn test_by_ids_keeps_given_order() {
        let fx = fixture();
        let query = fx.engine().by_ids(&[3, 1, 2], Viewer::Anonymous);
        assert_eq!(query.ordering(), ResultOrdering::ExplicitIds);
        assert_eq!(query.ids().unwrap(), vec![3, 1, 2]);
        let page = query.paginate(1, 2).unwrap();
        assert_eq!(page.items.iter().map(|b| b.id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn test_by_ids_fallback_order_is_reported() {
        let mut fx = fixture();
        fx.config.query.explicit_id_order = false;
        let query = fx.engine().by_ids(&[1, 3, 2], Viewer::Anonymous);
        assert_eq!(query.ordering(), ResultOrdering::CreatedDesc);
        assert_eq!(query.ids().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn test_by_ids_filters_stale_and_private() {
        let fx = fixture();
        let private = fx.add(2, "secret", &["x"], true);
        let query = fx.engine().by_ids(&[private, 999, 2], Viewer::Anonymous);
        assert_eq!(query.ids().unwrap(), vec![2]);
        assert!(fx.engine().by_ids(&[], Viewer::Anonymous).ids().unwrap().is_empty());
    }

    #[test]
    fn test_get_bookmark_visibility() {
        let fx = fixture();
        let private = fx.add(2, "secret", &["x"], true);
        let engine = fx.engine();
        assert!(engine.get_bookmark(private, Viewer::User(1)).unwrap_err().is_not_found());
        assert!(engine.get_bookmark(private, Viewer::Anonymous).unwrap_err().is_not_found());
        assert_eq!(engine.get_bookmark(private, Viewer::User(2)).unwrap().title, "secret");
        assert!(engine.get_bookmark(999, Viewer::User(2)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_submit_by_day() {
        let fx = fixture();
        let now = now_utc();
        for (title, age) in [("old", 2), ("older", 2), ("ancient", 40)] {
            let new = NewBookmark::new(format!("https://example.com/{title}"), title)
                .created_on(now - Duration::days(age));
            fx.store.add_bookmark(Some(1), &new).unwrap();
        }

        let counts = fx.engine().submit_by_day(7).unwrap();
        assert_eq!(counts.len(), 7);
        assert_eq!(counts[6], 3);
        assert_eq!(counts[4], 2);
        assert_eq!(counts.iter().sum::<u64>(), 5);
        assert!(fx.engine().submit_by_day(0).unwrap().is_empty());
    }

    #[test]
    fn test_tag_search() {
        let fx = fixture();
        let results = fx
            .engine()
            .tag_search(&["Web", "-bing"], Viewer::Anonymous, None, 1)
            .unwrap();
        assert_eq!(results.include, vec!["web"]);
        assert_eq!(results.exclude, vec!["bing"]);
        assert_eq!(results.bookmarks.total, 2);
        assert_eq!(results.related[0].name, "python");
    }

    #[test]
    fn test_tag_search_without_related() {
        let mut fx = fixture();
        fx.config.query.related_tags_enabled = false;
        let results = fx
            .engine()
            .tag_search(&["web"], Viewer::Anonymous, None, 1)
            .unwrap();
        assert!(results.related.is_empty());
        assert_eq!(results.bookmarks.items.len(), 3);
    }

    #[test]
    fn test_full_text_search_filters_hits() {
        let fx = fixture();
        let secret = fx.add(2, "secret", &["python"], true);
        let index = SearchIndex::open_in_memory().unwrap();
        for id in fx.store.all_bookmark_ids().unwrap() {
            index.index_bookmark(&fx.store.get_bookmark(id).unwrap()).unwrap();
        }
        let writer = index.writer().unwrap();
        writer
            .upsert(&crate::search::Document {
                id: 99,
                title: "stale".into(),
                notes: String::new(),
                tags: "python".into(),
            })
            .unwrap();
        writer.commit().unwrap();

        let engine = fx.engine();
        let anonymous = engine
            .full_text_search(&index, "python", Viewer::Anonymous, 1)
            .unwrap();
        assert_eq!(anonymous.bookmarks.total, 2);
        let mut titles: Vec<_> = anonymous
            .bookmarks
            .items
            .iter()
            .map(|b| b.title.as_str())
            .collect();
        titles.sort_unstable();
        assert_eq!(titles, vec!["one", "three"]);

        let owner = engine
            .full_text_search(&index, "python", Viewer::User(2), 1)
            .unwrap();
        assert_eq!(owner.bookmarks.total, 3);
        assert!(owner.bookmarks.items.iter().any(|b| b.id == secret));
    }

    #[test]
    fn test_full_text_search_facets_cover_visible_hits_only() {
        let fx = fixture();
        fx.add(2, "secret", &["python", "bobs-diary"], true);
        let index = SearchIndex::open_in_memory().unwrap();
        for id in fx.store.all_bookmark_ids().unwrap() {
            index.index_bookmark(&fx.store.get_bookmark(id).unwrap()).unwrap();
        }
        let facets = |viewer: Viewer| -> Vec<(String, u64)> {
            fx.engine()
                .full_text_search(&index, "python", viewer, 1)
                .unwrap()
                .facets
                .into_iter()
                .map(|t| (t.name, t.count))
                .collect()
        };

        assert_eq!(
            facets(Viewer::Anonymous),
            vec![
                ("python".to_string(), 2),
                ("web".to_string(), 2),
                ("bing".to_string(), 1),
            ]
        );
        let owner = facets(Viewer::User(2));
        assert!(owner.contains(&("bobs-diary".to_string(), 1)));
        assert!(owner.contains(&("python".to_string(), 3)));
    }

    #[test]
    fn test_full_text_search_pages_visible_hits() {
        let mut fx = fixture();
        fx.config.search.page_len = 1;
        let index = SearchIndex::open_in_memory().unwrap();
        for id in fx.store.all_bookmark_ids().unwrap() {
            index.index_bookmark(&fx.store.get_bookmark(id).unwrap()).unwrap();
        }
        let engine = fx.engine();
        let second = engine
            .full_text_search(&index, "web", Viewer::Anonymous, 2)
            .unwrap();
        assert_eq!(second.bookmarks.items.len(), 1);
        assert_eq!(second.bookmarks.total, 3);
        assert!(matches!(
            engine.full_text_search(&index, "web", Viewer::Anonymous, 0),
            Err(TagmarkError::InvalidInput(_))
        ));
    }
}
