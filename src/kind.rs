//! Flag kind classification.

use crate::error::{ConfigError, ConfigResult};
use crate::hooks::{find_hooks, HookFamily};
use crate::item::{ItemId, ItemTree};
use crate::value::Kind;

/// Determines the primitive kind a leaf is registered as.
///
/// The input type of the first resolved `Parse` hook decides when there is
/// one, and must then be a primitive. Without a hook the leaf's storage type
/// decides, and storage types without a primitive counterpart fall back to
/// [`Kind::String`].
pub fn classify(tree: &ItemTree, id: ItemId) -> ConfigResult<Kind> {
    if let Some(hook) = find_hooks(tree, id, HookFamily::Parse)
        .first()
        .and_then(|resolved| resolved.parse_hook(HookFamily::Parse))
    {
        return hook.input.kind.ok_or_else(|| ConfigError::UnsupportedType {
            type_name: hook.input.type_name.to_string(),
        });
    }

    Ok(tree.item(id).kind().unwrap_or(Kind::String))
}
