//! Error Types
//!
//! This module defines the error types used throughout the render core.
//!
//! # Overview
//!
//! The main error type [`RenderError`] covers configuration and usage
//! failures that are fatal to a frame:
//! - Drawing a view/stage pair that was never registered
//! - Exceeding the effect permutation slot capacity
//! - Removing render stages (stages are additive only)
//! - Indices or keys that do not resolve
//!
//! Shader compilation failures use the separate [`EffectCompileError`]. They
//! are recovered inside the effect pipeline (the render effect enters the
//! `Error` state and falls back) and never abort `prepare` or `draw`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use prism::errors::{RenderError, Result};
//!
//! fn draw_opaque(system: &RenderSystem, ctx: &mut RenderDrawContext) -> Result<()> {
//!     system.draw(ctx, 0, 0)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the render core.
#[derive(Error, Debug)]
pub enum RenderError {
    // ========================================================================
    // Frame Configuration Errors
    // ========================================================================
    /// `draw` was requested for a view/stage combination that the view never
    /// registered.
    #[error("Requested RenderView|RenderStage combination doesn't exist (view: {view}, stage: {stage})")]
    MissingRenderViewStage {
        /// Index of the view
        view: usize,
        /// Index of the render stage
        stage: usize,
    },

    /// More effect permutation slots were requested than a feature supports.
    #[error("Only {max} effect slots are currently allowed (requested slot #{requested})")]
    TooManyEffectSlots {
        /// Number of slots the request would produce
        requested: usize,
        /// Maximum supported slot count
        max: usize,
    },

    /// Render stages can only be added.
    #[error("Removing render stage '{0}' is not supported")]
    RenderStageRemovalUnsupported(String),

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// A render stage index does not exist.
    #[error("Invalid render stage index: {0}")]
    InvalidRenderStage(usize),

    /// A render view index does not exist.
    #[error("Invalid render view index: {0}")]
    InvalidRenderView(usize),

    /// A render object key is stale or was never registered.
    #[error("Invalid render object key")]
    InvalidRenderObject,

    // ========================================================================
    // Feature Errors
    // ========================================================================
    /// A render feature failed to initialise.
    #[error("Failed to initialize render feature '{feature}': {message}")]
    FeatureInitialization {
        /// Name of the feature
        feature: String,
        /// What went wrong
        message: String,
    },

    // ========================================================================
    // Effect Errors
    // ========================================================================
    /// A shader effect failed to compile.
    #[error(transparent)]
    EffectCompile(#[from] EffectCompileError),
}

/// Failure reported by an [`EffectCompiler`](crate::renderer::effect::EffectCompiler).
///
/// Clonable because a single pending compile can be observed by several
/// render effects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectCompileError {
    /// The compiler rejected the permutation.
    #[error("Effect '{effect}' failed to compile: {message}")]
    Failed {
        /// Effect name that was requested
        effect: String,
        /// Compiler diagnostic
        message: String,
    },

    /// The compile task was dropped before producing a result.
    #[error("Compilation of effect '{effect}' was abandoned")]
    Abandoned {
        /// Effect name that was requested
        effect: String,
    },
}

/// Alias for `Result<T, RenderError>`.
pub type Result<T> = std::result::Result<T, RenderError>;
