//! Error types for the provisioning pipeline.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

/// Stages of the create pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Workspace,
    Render,
    InitMedium,
    BaseImage,
    Disk,
    Define,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Workspace => "workspace",
            Stage::Render => "render",
            Stage::InitMedium => "init_medium",
            Stage::BaseImage => "base_image",
            Stage::Disk => "disk",
            Stage::Define => "define",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the image resolver, renderer and lifecycle controller.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Unknown OS variant or malformed catalog/config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Base image acquisition failed.
    #[error("download of {source_url} failed: {detail}")]
    Download { source_url: String, detail: String },

    /// Document assembly failed.
    #[error("render error: {0}")]
    Render(String),

    /// An external management command exited unsuccessfully or could not be spawned.
    #[error("`{command}` failed ({}): {}", display_exit(*exit_code), stderr.trim())]
    Hypervisor {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// A request field or command argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem error at a known path.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A create pipeline stage failed; wraps the stage's own error.
    #[error("create failed at stage {stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ProvisionError>,
    },
}

fn display_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "did not run to completion".to_string(),
    }
}

impl ProvisionError {
    /// Wrap an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the failing create stage.
    pub fn at_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The stage a create failure happened at, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, unwrapping stage context.
    pub fn root(&self) -> &ProvisionError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Download { .. } => "download_error",
            Self::Render(_) => "render_error",
            Self::Hypervisor { .. } => "hypervisor_error",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Io { .. } => "io_error",
            Self::Stage { source, .. } => source.reason_code(),
        }
    }
}
