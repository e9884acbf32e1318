use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stage an error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Loading,
    Resolving,
    Exporting,
    Validating,
    CopyingParity,
    Done,
}

impl Stage {
    /// The stage that follows this one. `Done` is terminal.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Loading => Some(Stage::Resolving),
            Stage::Resolving => Some(Stage::Exporting),
            Stage::Exporting => Some(Stage::Validating),
            Stage::Validating => Some(Stage::CopyingParity),
            Stage::CopyingParity => Some(Stage::Done),
            Stage::Done => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Loading => write!(f, "loading"),
            Stage::Resolving => write!(f, "resolving"),
            Stage::Exporting => write!(f, "exporting"),
            Stage::Validating => write!(f, "validating"),
            Stage::CopyingParity => write!(f, "copying-parity"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// Errors that can occur while exporting a checkpoint.
///
/// Every variant is fatal for the run. Nothing here is retried.
#[derive(Debug, Error)]
pub enum HaganeError {
    /// The checkpoint or tokenizer is missing or malformed.
    #[error("failed to load checkpoint from {path}: {reason}")]
    Load {
        /// Checkpoint directory or the file inside it that failed.
        path: PathBuf,
        reason: String,
    },

    /// The tokenizer produced none of the recognized input names.
    #[error("no valid model inputs found for export (tokenizer produced {produced:?})")]
    NoValidInputs {
        /// Names the tokenizer did produce.
        produced: Vec<String>,
    },

    /// The trace sample could not be tokenized into consistent inputs.
    #[error("failed to prepare trace sample: {0}")]
    Sample(String),

    /// The model graph could not be traced or serialized.
    #[error("ONNX export failed: {0}")]
    Export(String),

    /// The exporter returned but the artifact is missing or malformed.
    #[error("exported artifact at {path} failed verification: {reason}")]
    ExportVerification { path: PathBuf, reason: String },

    /// A parity file present in the source could not be copied.
    #[error("failed to copy {file} to {destination}: {source}")]
    Copy {
        file: String,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HaganeError {
    /// The pipeline stage this error aborts.
    pub fn stage(&self) -> Stage {
        match self {
            HaganeError::Load { .. } => Stage::Loading,
            HaganeError::NoValidInputs { .. } | HaganeError::Sample(_) => Stage::Resolving,
            HaganeError::Export(_) => Stage::Exporting,
            HaganeError::ExportVerification { .. } => Stage::Validating,
            HaganeError::Copy { .. } => Stage::CopyingParity,
        }
    }

    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        HaganeError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sample(reason: impl fmt::Display) -> Self {
        HaganeError::Sample(reason.to_string())
    }

    pub(crate) fn export(reason: impl fmt::Display) -> Self {
        HaganeError::Export(reason.to_string())
    }

    pub(crate) fn verification(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        HaganeError::ExportVerification {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for Hagane operations.
pub type Result<T> = std::result::Result<T, HaganeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = HaganeError::NoValidInputs {
            produced: vec!["pixel_values".into()],
        };
        assert!(err.to_string().contains("no valid model inputs"));
        assert!(err.to_string().contains("pixel_values"));

        let err = HaganeError::load("/models/missing", "config.json not found");
        assert_eq!(
            err.to_string(),
            "failed to load checkpoint from /models/missing: config.json not found"
        );
    }

    #[test]
    fn errors_map_to_their_stage() {
        assert_eq!(HaganeError::load("x", "y").stage(), Stage::Loading);
        assert_eq!(
            HaganeError::NoValidInputs { produced: vec![] }.stage(),
            Stage::Resolving
        );
        assert_eq!(HaganeError::sample("too short").stage(), Stage::Resolving);
        assert_eq!(HaganeError::export("boom").stage(), Stage::Exporting);
        assert_eq!(
            HaganeError::verification("model.onnx", "missing").stage(),
            Stage::Validating
        );
        let copy = HaganeError::Copy {
            file: "vocab.txt".into(),
            destination: PathBuf::from("out/vocab.txt"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(copy.stage(), Stage::CopyingParity);
    }

    #[test]
    fn stages_advance_linearly() {
        let mut stage = Stage::Loading;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(
            seen,
            vec![
                Stage::Loading,
                Stage::Resolving,
                Stage::Exporting,
                Stage::Validating,
                Stage::CopyingParity,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HaganeError>();
    }
}
