use super::QueryEngine;
use crate::config::Config;
use crate::db::Store;
use crate::error::{Result, TagmarkError};
use crate::models::{CloudTag, Tag, TagCount, Viewer};
use crate::tags::normalize_tags;
use crate::utils::placeholders;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

fn tag_count_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TagCount> {
    Ok(TagCount {
        id: row.get(0)?,
        name: row.get(1)?,
        count: row.get::<_, i64>(2)? as u64,
    })
}

/// Turn usage counts (most used first) into a logarithmically weighted cloud
/// sorted by tag name.
pub fn weigh_tag_cloud(counts: Vec<TagCount>, min_size: u32, max_size: u32) -> Result<Vec<CloudTag>> {
    let (Some(first), Some(last)) = (counts.first(), counts.last()) else {
        return Ok(Vec::new());
    };
    let (max_count, min_count) = (first.count, last.count);
    if max_count == min_count {
        return Err(TagmarkError::UniformTagCounts(counts.len()));
    }

    let log_min = (min_count as f64).ln();
    let log_range = (max_count as f64).ln() - log_min;
    let span = max_size.saturating_sub(min_size) as f64;

    let mut cloud: Vec<CloudTag> = counts
        .into_iter()
        .map(|tag| {
            let weight = ((tag.count as f64).ln() - log_min) / log_range;
            CloudTag {
                name: tag.name,
                weight,
                count: tag.count,
                size: min_size + (span * weight).round() as u32,
            }
        })
        .collect();
    cloud.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(cloud)
}

/// Tag statistics over the bookmark store
pub struct Aggregator<'a> {
    store: &'a Store,
    config: &'a Config,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a Store, config: &'a Config) -> Self {
        Self { store, config }
    }

    fn public_tag_counts(&self, owner_id: Option<i64>, limit: usize) -> Result<Vec<TagCount>> {
        let mut sql = String::from(
            "SELECT t.id, t.name, COUNT(*) AS total FROM tags t
             JOIN bookmark_tags bt ON bt.tag_id = t.id
             JOIN bookmarks b ON b.id = bt.bookmark_id
             WHERE b.private = 0",
        );
        let mut params = Vec::new();
        if let Some(owner_id) = owner_id {
            sql.push_str(" AND b.user_id = ?");
            params.push(Value::Integer(owner_id));
        }
        sql.push_str(" GROUP BY t.id, t.name ORDER BY total DESC, t.id ASC LIMIT ?");
        params.push(Value::Integer(limit as i64));

        let mut stmt = self.store.conn().prepare(&sql)?;
        let counts = stmt
            .query_map(params_from_iter(params), tag_count_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    /// Most used tags on public bookmarks; ties go to the older tag
    pub fn popular_tags(&self, max_results: usize) -> Result<Vec<TagCount>> {
        self.public_tag_counts(None, max_results)
    }

    /// Popular tag list sized by configuration
    pub fn taglist(&self) -> Result<Vec<TagCount>> {
        self.popular_tags(self.config.query.taglist_items)
    }

    /// The `limit` most used public tags as a weighted cloud.
    ///
    /// An empty cloud is returned when fewer than `limit` tags are in use.
    /// When every retained tag has the same count the weights are undefined
    /// and `UniformTagCounts` is returned; see [`Aggregator::tag_cloud_or_empty`].
    pub fn tag_cloud(
        &self,
        limit: usize,
        min_size: u32,
        max_size: u32,
        owner_id: Option<i64>,
    ) -> Result<Vec<CloudTag>> {
        let counts = self.public_tag_counts(owner_id, limit)?;
        if counts.len() < limit {
            return Ok(Vec::new());
        }
        weigh_tag_cloud(counts, min_size, max_size)
    }

    /// Configured tag cloud, degrading to an empty one on uniform counts
    pub fn tag_cloud_or_empty(&self, owner_id: Option<i64>) -> Result<Vec<CloudTag>> {
        let cloud = &self.config.tag_cloud;
        match self.tag_cloud(cloud.limit, cloud.min_size, cloud.max_size, owner_id) {
            Err(TagmarkError::UniformTagCounts(n)) => {
                log::debug!("tag cloud of {} equally used tags skipped", n);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Tags that co-occur on visible bookmarks carrying all of `tags`,
    /// most frequent first, without the input tags themselves.
    pub fn related_tags<S: AsRef<str>>(
        &self,
        tags: &[S],
        max_results: usize,
        viewer: Viewer,
    ) -> Result<Vec<TagCount>> {
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return Err(TagmarkError::EmptyTagList("related_tags"));
        }

        let matched = QueryEngine::new(self.store, self.config).by_tags(
            &tags,
            &[] as &[&str],
            viewer,
            None,
        )?;
        let (matched_sql, mut params) = matched.base_sql();
        let sql = format!(
            "SELECT t.id, t.name, COUNT(*) AS total FROM bookmark_tags bt
             JOIN tags t ON t.id = bt.tag_id
             JOIN ({matched_sql}) m ON m.id = bt.bookmark_id
             WHERE t.name NOT IN ({})
             GROUP BY t.id, t.name
             ORDER BY total DESC, t.id ASC
             LIMIT ?",
            placeholders(tags.len())
        );
        params.extend(tags.into_iter().map(Value::Text));
        params.push(Value::Integer(max_results as i64));

        let mut stmt = self.store.conn().prepare(&sql)?;
        let related = stmt
            .query_map(params_from_iter(params), tag_count_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(related)
    }

    /// Tag name autocompletion
    pub fn complete_tags(&self, prefix: &str) -> Result<Vec<Tag>> {
        self.store
            .search_tags(prefix, self.config.query.tag_autocomplete_max)
    }

    /// Number of public bookmarks and of distinct tags used on them
    pub fn stats(&self) -> Result<(u64, u64)> {
        let (bookmarks, tags): (i64, i64) = self.store.conn().query_row(
            "SELECT
                (SELECT COUNT(*) FROM bookmarks WHERE private = 0),
                (SELECT COUNT(DISTINCT bt.tag_id) FROM bookmark_tags bt
                 JOIN bookmarks b ON b.id = bt.bookmark_id WHERE b.private = 0)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((bookmarks as u64, tags as u64))
    }
}
