use thiserror::Error;

use crate::api::ApiError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the session, favorites and feedback layers.
///
/// Profile probe failures never show up here: they demote the session to
/// anonymous instead (see [`crate::auth::ProfileProbe`]).
#[derive(Error, Debug)]
pub enum Error {
    /// Login was rejected; the message comes from the server.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A write (favorite, rating, comment, material) failed. Local state was
    /// left untouched.
    #[error("Could not {action}: {source}")]
    Mutation {
        action: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Material {0} not found")]
    NotFound(i64),

    #[error("Not signed in")]
    NotAuthenticated,

    /// The session changed (logout, another login) while this request was
    /// in flight, so its result was dropped.
    #[error("Session changed while signing in")]
    Superseded,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub(crate) fn mutation(action: &'static str) -> impl FnOnce(ApiError) -> Self {
        move |source| Error::Mutation { action, source }
    }
}
