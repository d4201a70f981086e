//! Prefilters environment maps for image based lighting.
//!
//! An equirectangular panorama (or an existing cubemap) is projected
//! onto a cubemap, mipmapped, and convolved on the GPU under a chosen
//! importance-sampling distribution. The result is serialized as a
//! KTX2 container with a synthesized data format descriptor, with an
//! optional BRDF lookup table written alongside it as a PNG.

pub mod codec;
pub mod core;
pub mod dfd;
pub mod error;
pub mod filter;
pub mod format;
pub mod ktx;
pub mod logger;

pub use self::{
    error::{Error, Result},
    filter::{filter_environment, FilterRequest, FilterRequestBuilder},
    format::{Distribution, TargetFormat},
    ktx::KtxImage,
};
