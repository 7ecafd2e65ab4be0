use async_trait::async_trait;
use common::domain::{
    DomainError, DomainResult, Lecture, LectureFetchOptions, LectureStore, PeopleCountingItem,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of LectureStore using HashMap
pub struct InMemoryLectureStore {
    lectures: Arc<RwLock<HashMap<String, Lecture>>>,
}

impl InMemoryLectureStore {
    pub fn new() -> Self {
        Self {
            lectures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace a lecture. Missing collections are stored as empty.
    pub async fn upsert(&self, mut lecture: Lecture) {
        lecture.photos.get_or_insert_with(Vec::new);
        lecture.people_counting_items.get_or_insert_with(Vec::new);
        let mut lectures = self.lectures.write().await;
        lectures.insert(lecture.id.clone(), lecture);
    }
}

impl Default for InMemoryLectureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LectureStore for InMemoryLectureStore {
    async fn get_one_by(
        &self,
        id: &str,
        options: LectureFetchOptions,
    ) -> DomainResult<Option<Lecture>> {
        let lectures = self.lectures.read().await;
        Ok(lectures.get(id).map(|stored| Lecture {
            id: stored.id.clone(),
            title: stored.title.clone(),
            description: stored.description.clone(),
            photos: if options.fetch_photos {
                Some(stored.photos().to_vec())
            } else {
                None
            },
            people_counting_items: if options.fetch_people_counting_items {
                Some(stored.people_counting_items().to_vec())
            } else {
                None
            },
        }))
    }

    async fn add_people_counting_items(
        &self,
        lecture: &Lecture,
        items: Vec<PeopleCountingItem>,
    ) -> DomainResult<Vec<PeopleCountingItem>> {
        let mut lectures = self.lectures.write().await;
        let stored = lectures
            .get_mut(&lecture.id)
            .ok_or_else(|| DomainError::LectureNotFound(lecture.id.clone()))?;

        let counting = stored.people_counting_items.get_or_insert_with(Vec::new);
        for item in &items {
            if !counting.iter().any(|existing| existing.image_id == item.image_id) {
                counting.push(item.clone());
            }
        }
        Ok(items)
    }

    async fn update_people_counting_item(
        &self,
        lecture: &Lecture,
        old: &PeopleCountingItem,
        new: PeopleCountingItem,
    ) -> DomainResult<PeopleCountingItem> {
        let mut lectures = self.lectures.write().await;
        let stored = lectures
            .get_mut(&lecture.id)
            .ok_or_else(|| DomainError::LectureNotFound(lecture.id.clone()))?;

        let counting = stored.people_counting_items.get_or_insert_with(Vec::new);
        match counting
            .iter_mut()
            .find(|existing| existing.image_id == old.image_id)
        {
            Some(existing) => *existing = new.clone(),
            None => {
                return Err(DomainError::InvalidOperation(format!(
                    "no counting item for image {} in lecture {}",
                    old.image_id, lecture.id
                )))
            }
        }
        Ok(new)
    }
}
