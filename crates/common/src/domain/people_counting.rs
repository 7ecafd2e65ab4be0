use crate::domain::result::DomainResult;
use crate::domain::LecturePhoto;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Head count for one image of a lecture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeopleCountingItem {
    pub image_id: String,
    pub number_of_people: u32,
}

impl PeopleCountingItem {
    pub fn new(image_id: impl Into<String>, number_of_people: u32) -> Self {
        Self {
            image_id: image_id.into(),
            number_of_people,
        }
    }
}

/// Request sent to the counting worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeopleCountingRequest {
    pub lecture_id: String,
    pub photos: Vec<LecturePhoto>,
}

/// Result returned by the counting worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeopleCountingResult {
    pub lecture_id: String,
    pub people_counting_items: Vec<PeopleCountingItem>,
}

/// Outbound side of the counting exchange
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PeopleCountingPublisher: Send + Sync {
    async fn publish(&self, request: PeopleCountingRequest) -> DomainResult<()>;
}
