//! Rollback image resolution

use tarmac_core::domain::image::image_tag;

use crate::service::error::ControlError;

/// Resolves `input` against an app's image history.
///
/// A reference recorded verbatim is used as is. Otherwise `input` is taken
/// as a bare version tag and must match the tag of exactly one recorded
/// image. No match, an ambiguous tag, or a full reference that was never
/// deployed all yield [`ControlError::InvalidVersion`].
pub fn resolve_image(history: &[String], input: &str) -> Result<String, ControlError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ControlError::InvalidVersion(input.to_string()));
    }

    if history.iter().any(|image| image == input) {
        return Ok(input.to_string());
    }

    let mut matches: Vec<&String> = history
        .iter()
        .filter(|image| image_tag(image) == Some(input))
        .collect();
    matches.sort();
    matches.dedup();

    match matches.as_slice() {
        [image] => Ok((*image).clone()),
        [] => Err(ControlError::InvalidVersion(input.to_string())),
        _ => {
            tracing::warn!(
                "Version {} matches {} recorded images, refusing to guess",
                input,
                matches.len()
            );
            Err(ControlError::InvalidVersion(input.to_string()))
        }
    }
}
