use crate::domain::{reconcile, unknown_image_ids};
use common::domain::{
    DomainError, DomainResult, LectureFetchOptions, LecturePhoto, LectureStore,
    PeopleCountingItem, PeopleCountingPublisher, PeopleCountingRequest, PeopleCountingResult,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Domain service for the people counting flow of lecture photos
///
/// Outbound:
/// 1. Resolve the requested image ids against the lecture's photos
/// 2. Publish one counting request with the resolved photos
///
/// Inbound:
/// 1. Check every counted image belongs to the lecture
/// 2. Partition the batch into new and replaced counts
/// 3. Apply both through the store
pub struct LecturePhotoService {
    store: Arc<dyn LectureStore>,
    publisher: Arc<dyn PeopleCountingPublisher>,
}

impl LecturePhotoService {
    pub fn new(store: Arc<dyn LectureStore>, publisher: Arc<dyn PeopleCountingPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Publish a counting request for `image_ids` of a lecture.
    ///
    /// Fails with `LecturePhotoNotFound` before anything is published when one
    /// of the ids is not a photo of the lecture.
    #[instrument(skip(self, image_ids), fields(lecture_id = %lecture_id, image_count = image_ids.len()))]
    pub async fn send_photos_to_be_processed(
        &self,
        lecture_id: &str,
        image_ids: &[String],
    ) -> DomainResult<()> {
        validate_id("lecture_id", lecture_id)?;
        for image_id in image_ids {
            validate_id("image_id", image_id)?;
        }

        debug!(lecture_id = %lecture_id, "getting lecture");
        let lecture = self
            .store
            .get_one_by(lecture_id, LectureFetchOptions::with_photos())
            .await?
            .ok_or_else(|| DomainError::LectureNotFound(lecture_id.to_string()))?;

        let photos = image_ids
            .iter()
            .map(|image_id| {
                lecture.photo(image_id).cloned().ok_or_else(|| {
                    warn!(lecture_id = %lecture_id, image_id = %image_id, "lecture photo not found");
                    DomainError::LecturePhotoNotFound(image_id.clone())
                })
            })
            .collect::<DomainResult<Vec<LecturePhoto>>>()?;

        debug!(
            lecture_id = %lecture_id,
            photo_count = photos.len(),
            "sending photos to be processed"
        );
        self.publisher
            .publish(PeopleCountingRequest {
                lecture_id: lecture_id.to_string(),
                photos,
            })
            .await
    }

    /// Merge a counting result into the lecture's counting state.
    ///
    /// Returns the added items followed by the updated ones.
    #[instrument(skip(self, result), fields(lecture_id = %result.lecture_id, item_count = result.people_counting_items.len()))]
    pub async fn add_people_counting_results(
        &self,
        result: PeopleCountingResult,
    ) -> DomainResult<Vec<PeopleCountingItem>> {
        let PeopleCountingResult {
            lecture_id,
            people_counting_items,
        } = result;

        validate_id("lecture_id", &lecture_id)?;
        for item in &people_counting_items {
            validate_id("image_id", &item.image_id)?;
        }

        debug!(lecture_id = %lecture_id, "getting lecture");
        let lecture = self
            .store
            .get_one_by(&lecture_id, LectureFetchOptions::with_photos_and_counting())
            .await?
            .ok_or_else(|| DomainError::LectureNotFound(lecture_id.clone()))?;

        if people_counting_items.is_empty() {
            debug!(lecture_id = %lecture_id, "empty counting result, nothing to apply");
            return Ok(Vec::new());
        }

        let unknown = unknown_image_ids(&lecture, &people_counting_items);
        if !unknown.is_empty() {
            warn!(
                lecture_id = %lecture_id,
                image_ids = ?unknown,
                "rejecting counting result for images outside the lecture"
            );
            return Err(DomainError::InvalidOperation(format!(
                "the following image ids do not belong to the lecture: {}",
                unknown.join(", ")
            )));
        }

        let reconciliation = reconcile(lecture.people_counting_items(), people_counting_items);
        debug!(
            lecture_id = %lecture_id,
            added = reconciliation.added.len(),
            updated = reconciliation.updated.len(),
            "applying counting result"
        );

        let mut applied = Vec::with_capacity(reconciliation.len());
        if !reconciliation.added.is_empty() {
            applied.extend(
                self.store
                    .add_people_counting_items(&lecture, reconciliation.added)
                    .await?,
            );
        }
        for update in reconciliation.updated {
            applied.push(
                self.store
                    .update_people_counting_item(&lecture, &update.previous, update.current)
                    .await?,
            );
        }

        info!(
            lecture_id = %lecture_id,
            item_count = applied.len(),
            "people counting result applied"
        );
        Ok(applied)
    }
}

fn validate_id(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::ValidationError(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}
