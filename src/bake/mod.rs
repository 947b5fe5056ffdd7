//! Machine image baking.
//!
//! After the release barrier opens, each [`ImageVariant`] is baked from the
//! reference artifact. Bakes are keyed by a content tag over all of their
//! inputs and recorded in the store, so repeating a bake with unchanged
//! inputs returns the recorded image instead of producing a divergent one.

mod bakery;
mod builder;
mod variant;

pub use bakery::{BakedImage, ImageBakery, content_tag, manifest_key};
pub use builder::{
    BakeRequest, CommandImageBuilder, DEFAULT_BAKE_COMMAND, DEFAULT_IMAGE_ID_PATTERN,
    ImageBuilder,
};
pub use variant::ImageVariant;
