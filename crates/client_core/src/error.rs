use thiserror::Error;

/// Errors surfaced by the sync engine.
///
/// None of these is fatal to the client: read failures leave the previous
/// snapshot intact, send failures trigger a recovery reload, and channel
/// failures degrade to "stale until next successful refresh".
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("no conversation selected")]
    NoSelection,

    #[error("server_url must start with http:// or https://")]
    InvalidServerUrl,
}
