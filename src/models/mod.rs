pub mod bookmark;
pub mod tag;
pub mod user;

pub use bookmark::{Bookmark, BookmarkChanges, NewBookmark};
pub use tag::{CloudTag, Tag, TagCount};
pub use user::{NewUser, ResetToken, User, Viewer};
