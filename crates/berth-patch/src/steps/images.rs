//! Image allow-list and private registry rewrite

use serde_json::Value;
use tracing::debug;

use crate::context::{ImageRef, PatchConfig, PatchContext};
use crate::error::PatchError;
use crate::view::PodSpecMut;

/// Reject images outside the allow-list and point mirrored ones at the private registry
pub fn apply(
    pod: &mut PodSpecMut<'_>,
    ctx: &PatchContext,
    config: &PatchConfig,
) -> Result<(), PatchError> {
    for container in pod.containers() {
        let Some(image) = container
            .get("image")
            .and_then(Value::as_str)
            .filter(|i| !i.is_empty())
        else {
            continue;
        };
        let image_ref = ImageRef::parse(image);

        if !ctx.actor_is_admin && !ctx.images.is_allowed(&image_ref) {
            return Err(PatchError::ImageNotAllowed {
                name: image_ref.name,
                tag: image_ref.tag,
            });
        }

        let Some(prefix) = config.registry_prefix.as_deref() else {
            continue;
        };
        if image.starts_with(prefix) || !ctx.images.is_mirrored(&image_ref) {
            continue;
        }
        let rewritten = format!("{prefix}{image}");
        debug!(from = %image, to = %rewritten, "rewriting image to private registry");
        container["image"] = Value::String(rewritten);
    }
    Ok(())
}
