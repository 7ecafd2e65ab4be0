pub mod amqp;
pub mod domain;
pub mod messaging;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use amqp::MockAmqpChannel;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockLectureStore;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockPeopleCountingPublisher;
