use crate::domain::result::DomainResult;
use crate::domain::PeopleCountingItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A photo attached to a lecture. `id` is the image id used by counting items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LecturePhoto {
    pub id: String,
    pub url: String,
}

/// Lecture as returned by the store.
///
/// `photos` and `people_counting_items` are only populated when requested
/// through `LectureFetchOptions`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Lecture {
    pub id: String,
    pub title: String,
    pub description: String,
    pub photos: Option<Vec<LecturePhoto>>,
    pub people_counting_items: Option<Vec<PeopleCountingItem>>,
}

impl Lecture {
    /// Photos of the lecture, empty when they were not fetched
    pub fn photos(&self) -> &[LecturePhoto] {
        self.photos.as_deref().unwrap_or_default()
    }

    /// Counting items of the lecture, empty when they were not fetched
    pub fn people_counting_items(&self) -> &[PeopleCountingItem] {
        self.people_counting_items.as_deref().unwrap_or_default()
    }

    pub fn photo(&self, image_id: &str) -> Option<&LecturePhoto> {
        self.photos().iter().find(|photo| photo.id == image_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LectureFetchOptions {
    pub fetch_photos: bool,
    pub fetch_people_counting_items: bool,
}

impl LectureFetchOptions {
    pub fn with_photos() -> Self {
        Self {
            fetch_photos: true,
            fetch_people_counting_items: false,
        }
    }

    pub fn with_photos_and_counting() -> Self {
        Self {
            fetch_photos: true,
            fetch_people_counting_items: true,
        }
    }
}

/// Persistence of lectures and their counting state
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LectureStore: Send + Sync {
    /// Get a lecture by ID, with the collections selected by `options`
    async fn get_one_by(
        &self,
        id: &str,
        options: LectureFetchOptions,
    ) -> DomainResult<Option<Lecture>>;

    /// Add counting items to a lecture.
    /// Set-union keyed by image id: items already present are left untouched.
    async fn add_people_counting_items(
        &self,
        lecture: &Lecture,
        items: Vec<PeopleCountingItem>,
    ) -> DomainResult<Vec<PeopleCountingItem>>;

    /// Replace the counting item matching `old` with `new`
    async fn update_people_counting_item(
        &self,
        lecture: &Lecture,
        old: &PeopleCountingItem,
        new: PeopleCountingItem,
    ) -> DomainResult<PeopleCountingItem>;
}
