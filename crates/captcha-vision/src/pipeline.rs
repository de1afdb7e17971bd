//! Preprocessing pipeline: denoise → enhance → resize.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::codec::ImageBuffer;
use crate::filters;
use crate::types::{Operation, VisionError, VisionResult};

pub const DEFAULT_CONTRAST: f32 = 1.5;
pub const DEFAULT_SHARPNESS: f32 = 1.2;
pub const DEFAULT_MAX_WIDTH: u32 = 800;
pub const DEFAULT_MAX_HEIGHT: u32 = 600;
pub const DEFAULT_DENOISE_RADIUS: u32 = 1;

/// What to run and with which parameters.
///
/// `operations` is a set ordered by [`Operation`]'s canonical order, so the
/// order a caller listed stages in never matters.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOptions {
    pub operations: BTreeSet<Operation>,
    pub contrast: f32,
    pub sharpness: f32,
    pub max_width: u32,
    pub max_height: u32,
    pub denoise_radius: u32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            operations: BTreeSet::new(),
            contrast: DEFAULT_CONTRAST,
            sharpness: DEFAULT_SHARPNESS,
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
            denoise_radius: DEFAULT_DENOISE_RADIUS,
        }
    }
}

impl PreprocessOptions {
    pub fn with_operations(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub image: ImageBuffer,
    /// Stages that ran, in execution order.
    pub applied: Vec<Operation>,
    pub elapsed: Duration,
}

/// Run the requested stages over `input`.
///
/// The input is never modified. With no stages requested the outcome holds
/// the input itself, so it re-encodes to the exact source bytes.
pub fn preprocess(input: &ImageBuffer, options: &PreprocessOptions) -> VisionResult<PipelineOutcome> {
    if options.operations.is_empty() {
        return Ok(PipelineOutcome {
            image: input.clone(),
            applied: Vec::new(),
            elapsed: Duration::ZERO,
        });
    }

    let start = Instant::now();
    let mut current = input.clone();
    let mut applied = Vec::with_capacity(options.operations.len());

    for &op in &options.operations {
        let stage_start = Instant::now();
        current = run_stage(op, &current, options)?;
        applied.push(op);
        tracing::debug!(
            "Stage {op} finished in {:?} ({})",
            stage_start.elapsed(),
            current.dimensions()
        );
    }

    Ok(PipelineOutcome {
        image: current,
        applied,
        elapsed: start.elapsed(),
    })
}

fn run_stage(op: Operation, input: &ImageBuffer, options: &PreprocessOptions) -> VisionResult<ImageBuffer> {
    match op {
        Operation::Denoise => Ok(input.derive(filters::median_filter(
            input.pixels(),
            options.denoise_radius,
        ))),
        Operation::Enhance => {
            check_factor(op, "contrast", options.contrast)?;
            check_factor(op, "sharpness", options.sharpness)?;
            let contrasted = filters::adjust_contrast(input.pixels(), options.contrast);
            Ok(input.derive(filters::adjust_sharpness(&contrasted, options.sharpness)))
        }
        Operation::Resize => {
            if options.max_width == 0 || options.max_height == 0 {
                return Err(VisionError::Pipeline {
                    stage: op,
                    reason: format!(
                        "bounds must be at least 1x1, got {}x{}",
                        options.max_width, options.max_height
                    ),
                });
            }
            let (w, h) = (input.width(), input.height());
            if w <= options.max_width && h <= options.max_height {
                return Ok(input.clone());
            }
            Ok(input.derive(filters::resize_to_fit(
                input.pixels(),
                options.max_width,
                options.max_height,
            )))
        }
    }
}

fn check_factor(stage: Operation, name: &str, value: f32) -> VisionResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(VisionError::Pipeline {
            stage,
            reason: format!("{name} factor must be a non-negative number, got {value}"),
        })
    }
}
