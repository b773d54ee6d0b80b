use crate::error::{Result, TagmarkError};
use crate::tags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest allowed bookmark title
pub const TITLE_MAX: usize = 300;
/// Longest allowed notes field
pub const NOTES_MAX: usize = 2500;
/// Longest allowed URL
pub const URL_MAX: usize = 2000;

/// A bookmark as read back from the store, with its link and tags resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub id: i64,
    pub title: String,
    pub notes: String,
    pub private: bool,
    pub user_id: Option<i64>,
    pub link_id: i64,
    pub url: String,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    /// Last successful search index sync
    pub indexed_on: Option<DateTime<Utc>>,
    /// Tag names, ordered by name
    pub tags: Vec<String>,
}

impl Bookmark {
    /// Whether `viewer_id` may see this bookmark
    pub fn is_visible_to(&self, viewer_id: Option<i64>) -> bool {
        !self.private || (viewer_id.is_some() && self.user_id == viewer_id)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.tags.iter().any(|t| *t == name)
    }
}

/// Input for creating a bookmark
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewBookmark {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub private: bool,
    /// Set by imports that carry their own timestamps
    #[serde(default, alias = "creation_date")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default, alias = "last_modified")]
    pub modified_on: Option<DateTime<Utc>>,
}

impl NewBookmark {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            notes: String::new(),
            tags: Vec::new(),
            private: false,
            created_on: None,
            modified_on: None,
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn tags<S: AsRef<str>>(mut self, tags: &[S]) -> Self {
        self.tags = tags.iter().map(|t| t.as_ref().to_string()).collect();
        self
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn created_on(mut self, created_on: DateTime<Utc>) -> Self {
        self.created_on = Some(created_on);
        self
    }

    /// Check field bounds and return the normalized tag list
    pub fn validate(&self) -> Result<Vec<String>> {
        validate_url(&self.url)?;
        validate_title(&self.title)?;
        validate_notes(&self.notes)?;
        tags::clean_tags(&self.tags)
    }
}

/// Partial update of a bookmark; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookmarkChanges {
    pub url: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub private: Option<bool>,
    pub tags: Option<Vec<String>>,
}

impl BookmarkChanges {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.title.is_none()
            && self.notes.is_none()
            && self.private.is_none()
            && self.tags.is_none()
    }

    /// Check the fields that are present; returns the normalized tags if given
    pub fn validate(&self) -> Result<Option<Vec<String>>> {
        if let Some(url) = &self.url {
            validate_url(url)?;
        }
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(notes) = &self.notes {
            validate_notes(notes)?;
        }
        self.tags.as_deref().map(tags::clean_tags).transpose()
    }
}

fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(TagmarkError::InvalidInput("URL is required".into()));
    }
    if url.chars().count() > URL_MAX {
        return Err(TagmarkError::InvalidInput(format!(
            "URL longer than {URL_MAX} characters"
        )));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(TagmarkError::InvalidInput("title is required".into()));
    }
    if title.chars().count() > TITLE_MAX {
        return Err(TagmarkError::InvalidInput(format!(
            "title longer than {TITLE_MAX} characters"
        )));
    }
    Ok(())
}

fn validate_notes(notes: &str) -> Result<()> {
    if notes.chars().count() > NOTES_MAX {
        return Err(TagmarkError::InvalidInput(format!(
            "notes longer than {NOTES_MAX} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample(private: bool, user_id: Option<i64>) -> Bookmark {
        let now = Utc::now();
        Bookmark {
            id: 1,
            title: "Example".into(),
            notes: String::new(),
            private,
            user_id,
            link_id: 1,
            url: "https://example.com".into(),
            created_on: now,
            modified_on: now,
            indexed_on: None,
            tags: vec!["python".into(), "web".into()],
        }
    }

    #[rstest]
    #[case(false, Some(1), None, true)]
    #[case(false, Some(1), Some(2), true)]
    #[case(true, Some(1), Some(1), true)]
    #[case(true, Some(1), Some(2), false)]
    #[case(true, Some(1), None, false)]
    #[case(true, None, None, false)]
    fn test_visibility(
        #[case] private: bool,
        #[case] owner: Option<i64>,
        #[case] viewer: Option<i64>,
        #[case] expected: bool,
    ) {
        assert_eq!(sample(private, owner).is_visible_to(viewer), expected);
    }

    #[test]
    fn test_has_tag_is_case_insensitive() {
        let b = sample(false, None);
        assert!(b.has_tag("WEB"));
        assert!(!b.has_tag("rust"));
    }

    #[test]
    fn test_new_bookmark_validate_normalizes_tags() {
        let new = NewBookmark::new("https://example.com", "Example").tags(&["Web", "web", "Python"]);
        assert_eq!(new.validate().unwrap(), vec!["python", "web"]);
    }

    #[rstest]
    #[case("", "Title")]
    #[case("https://example.com", "   ")]
    fn test_new_bookmark_requires_fields(#[case] url: &str, #[case] title: &str) {
        let result = NewBookmark::new(url, title).validate();
        assert!(matches!(result, Err(TagmarkError::InvalidInput(_))));
    }

    #[test]
    fn test_new_bookmark_rejects_long_notes() {
        let new = NewBookmark::new("https://example.com", "Example").notes("x".repeat(NOTES_MAX + 1));
        assert!(new.validate().is_err());
    }

    #[test]
    fn test_changes_validate_only_present_fields() {
        let changes = BookmarkChanges {
            title: Some("New title".into()),
            ..Default::default()
        };
        assert!(!changes.is_empty());
        assert_eq!(changes.validate().unwrap(), None);
        assert!(BookmarkChanges::default().is_empty());
    }
}
