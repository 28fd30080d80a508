// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for export runs.
//!
//! Most variants describe a problem with a single element and are contained by
//! the visitor. [`Error::is_fatal`] picks out the few that abort a whole run.

use crate::keys::{ElementId, Handle};

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exporting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A handle no longer resolves in the target document.
    #[error("target entity not found: {0:?}")]
    HandleNotFound(Handle),

    /// An entity lacks an attribute the caller relied on.
    #[error("entity {handle:?} has no attribute `{name}`")]
    MissingAttribute { handle: Handle, name: &'static str },

    /// An attribute exists but holds a value of the wrong shape.
    #[error("entity {handle:?} attribute `{name}` has unexpected type")]
    AttributeType { handle: Handle, name: &'static str },

    /// A source transform could not be turned into a placement.
    #[error("invalid placement: {0}")]
    InvalidPlacement(String),

    /// The geometry collaborator failed for an element.
    #[error("representation builder failed for {element}: {reason}")]
    Representation { element: ElementId, reason: String },

    /// The target document refused writes. Aborts the run.
    #[error("target document unavailable: {0}")]
    DocumentUnavailable(String),

    /// The run was aborted by the host. Aborts the run.
    #[error("export aborted: {0}")]
    Aborted(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns `true` for failures that must abort the entire run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DocumentUnavailable(_) | Error::Aborted(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
