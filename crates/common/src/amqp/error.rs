use thiserror::Error;

pub type AmqpResult<T> = Result<T, AmqpError>;

/// Failures raised by the broker layer.
///
/// `Connection` and `Topology` are startup errors: the service must not accept
/// traffic when either is returned.
#[derive(Error, Debug)]
pub enum AmqpError {
    #[error("failed to connect to broker: {0:#}")]
    Connection(anyhow::Error),

    #[error("failed to assert topology for {name}: {source:#}")]
    Topology {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to consume from queue {queue}: {source:#}")]
    Consume {
        queue: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to settle delivery {delivery_tag}: {source:#}")]
    Acknowledge {
        delivery_tag: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("channel error: {0:#}")]
    Channel(anyhow::Error),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl AmqpError {
    pub fn topology(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Topology {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Payload bytes that could not be parsed as JSON (or as the expected type).
#[derive(Error, Debug)]
#[error("failed to decode message payload: {source}")]
pub struct DecodeError {
    #[from]
    source: serde_json::Error,
}

impl DecodeError {
    pub fn inner(&self) -> &serde_json::Error {
        &self.source
    }
}
