use thiserror::Error;

/// Failures of the collaborators the extraction pipeline depends on.
///
/// Malformed payloads and rejected signatures are not errors: they are dropped.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Account mapping failed for `{address}`: {source}")]
    AccountMapping {
        address: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Scheduled data store error: {0}")]
    ScheduledStore(#[source] anyhow::Error),
}
