//! Hook storage and resolution.
//!
//! Every item can carry its own hooks, and a group can register hooks for
//! each of its children by field identifier. Resolution returns the own hook
//! first, then the group's, and call sites act on the first match.

use crate::error::{ConfigError, ConfigResult, HookError};
use crate::item::{ItemId, ItemTree};
use crate::value::{FieldType, Kind, Value};
use std::any::Any;

/// Hook families an item can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFamily {
    Parse,
    ParseEnv,
    Validate,
    Merge,
    FlagValue,
}

impl HookFamily {
    pub fn name(&self) -> &'static str {
        match self {
            HookFamily::Parse => "Parse",
            HookFamily::ParseEnv => "ParseEnv",
            HookFamily::Validate => "Validate",
            HookFamily::Merge => "Merge",
            HookFamily::FlagValue => "FlagValue",
        }
    }
}

/// Declared input type of a parse hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookInput {
    pub kind: Option<Kind>,
    pub type_name: &'static str,
}

impl HookInput {
    pub(crate) fn of<I: FieldType>() -> Self {
        Self {
            kind: I::KIND,
            type_name: I::type_name(),
        }
    }
}

type ParseFn = dyn Fn(&dyn Any, Value) -> ConfigResult<Value> + Send + Sync;

pub(crate) struct ParseHook {
    pub(crate) input: HookInput,
    call: Box<ParseFn>,
}

impl ParseHook {
    pub(crate) fn new(
        input: HookInput,
        call: impl Fn(&dyn Any, Value) -> ConfigResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            input,
            call: Box::new(call),
        }
    }
}

pub(crate) type CheckHook = Box<dyn Fn(&dyn Any) -> ConfigResult<()> + Send + Sync>;
pub(crate) type MutateHook = Box<dyn Fn(&mut dyn Any) -> ConfigResult<()> + Send + Sync>;
pub(crate) type DefaultHook = Box<dyn Fn(&dyn Any) -> ConfigResult<Value> + Send + Sync>;

/// The hooks attached at one place: an item itself, or its group on its behalf.
#[derive(Default)]
pub(crate) struct HookSet {
    pub(crate) parse: Option<ParseHook>,
    pub(crate) parse_env: Option<ParseHook>,
    pub(crate) validate: Option<CheckHook>,
    pub(crate) merge: Option<MutateHook>,
    pub(crate) flag_value: Option<DefaultHook>,
}

impl HookSet {
    pub(crate) fn has(&self, family: HookFamily) -> bool {
        match family {
            HookFamily::Parse => self.parse.is_some(),
            HookFamily::ParseEnv => self.parse_env.is_some(),
            HookFamily::Validate => self.validate.is_some(),
            HookFamily::Merge => self.merge.is_some(),
            HookFamily::FlagValue => self.flag_value.is_some(),
        }
    }
}

/// A hook found for an item, together with the item whose object it expects.
pub(crate) struct Resolved<'a> {
    /// Group item whose storage is handed to the hook.
    pub(crate) owner: ItemId,
    pub(crate) hooks: &'a HookSet,
}

impl<'a> Resolved<'a> {
    pub(crate) fn parse_hook(&self, family: HookFamily) -> Option<&'a ParseHook> {
        match family {
            HookFamily::ParseEnv => self.hooks.parse_env.as_ref(),
            _ => self.hooks.parse.as_ref(),
        }
    }

    pub(crate) fn validate_hook(&self) -> Option<&'a CheckHook> {
        self.hooks.validate.as_ref()
    }

    pub(crate) fn merge_hook(&self) -> Option<&'a MutateHook> {
        self.hooks.merge.as_ref()
    }

    pub(crate) fn flag_value_hook(&self) -> Option<&'a DefaultHook> {
        self.hooks.flag_value.as_ref()
    }
}

/// Finds the hooks of `family` for an item: its own hook, then the hook its
/// group registered under the item's field identifier.
///
/// A group's own hooks receive the group object itself; every other hook
/// receives the object of the item's group.
pub(crate) fn find_hooks(tree: &ItemTree, id: ItemId, family: HookFamily) -> Vec<Resolved<'_>> {
    let item = tree.item(id);
    let mut found = Vec::with_capacity(2);

    if item.own_hooks().has(family) {
        found.push(Resolved {
            owner: if item.is_group() {
                id
            } else {
                item.group().unwrap_or(id)
            },
            hooks: item.own_hooks(),
        });
    }

    if let Some(group_id) = item.group() {
        if let Some(hooks) = tree.item(group_id).child_hooks(item.field_name()) {
            if hooks.has(family) {
                found.push(Resolved {
                    owner: group_id,
                    hooks,
                });
            }
        }
    }

    found
}

/// Runs a parse hook against a raw input.
pub(crate) fn call_parse(hook: &ParseHook, owner: &dyn Any, input: Value) -> ConfigResult<Value> {
    (hook.call)(owner, input)
}

/// Converts a raw input into the declared input type of a typed hook.
pub(crate) fn hook_input<I: FieldType>(family: HookFamily, input: Value) -> ConfigResult<I> {
    let input = match I::KIND {
        Some(kind) => input.coerce_to(kind).unwrap_or_else(|raw| raw),
        None => input,
    };
    I::from_value(input).map_err(|raw| {
        ConfigError::hook_contract(
            family.name(),
            format!("expects {}, got {}", I::type_name(), raw.type_name()),
        )
    })
}

/// Maps the error side of a user hook.
pub(crate) fn hook_result<T, E: Into<HookError>>(result: Result<T, E>) -> ConfigResult<T> {
    result.map_err(|e| ConfigError::hook(e.into()))
}

pub(crate) fn downcast<'a, G: Any>(object: &'a dyn Any) -> ConfigResult<&'a G> {
    object.downcast_ref::<G>().ok_or_else(|| storage_mismatch::<G>())
}

pub(crate) fn downcast_mut<'a, G: Any>(object: &'a mut dyn Any) -> ConfigResult<&'a mut G> {
    object.downcast_mut::<G>().ok_or_else(|| storage_mismatch::<G>())
}

fn storage_mismatch<G>() -> ConfigError {
    ConfigError::Construction(format!(
        "item storage does not hold a {}",
        std::any::type_name::<G>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Group, Schema};

    #[derive(Debug, Default)]
    struct Naru {
        a: i32,
        b: String,
    }

    impl Group for Naru {
        fn describe(schema: &mut Schema<Self>) {
            schema
                .field("A", |s| &s.a, |s| &mut s.a)
                .validate(|a: &i32| if *a < 0 { Err("negative") } else { Ok(()) });
            schema.field("B", |s| &s.b, |s| &mut s.b);
            schema.on_validate("A", |_: &Naru| Ok::<(), HookError>(()));
            schema.on_parse("B", |_: &Naru, raw: String| Ok::<_, HookError>(raw));
        }
    }

    #[test]
    fn test_find_hooks_order() {
        let tree = ItemTree::build(&mut Naru::default()).unwrap();
        let a = tree.find("a").unwrap().id();

        let found = find_hooks(&tree, a, HookFamily::Validate);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.owner == ItemId::ROOT));
        assert!(found[0].validate_hook().is_some());

        assert!(find_hooks(&tree, a, HookFamily::Parse).is_empty());
    }

    #[test]
    fn test_find_group_hook_only() {
        let tree = ItemTree::build(&mut Naru::default()).unwrap();
        let b = tree.find("b").unwrap().id();

        let found = find_hooks(&tree, b, HookFamily::Parse);
        assert_eq!(found.len(), 1);
        let hook = found[0].parse_hook(HookFamily::Parse).unwrap();
        assert_eq!(hook.input.kind, Some(Kind::String));
    }

    #[test]
    fn test_root_hooks_are_own() {
        let tree = ItemTree::build(&mut Naru::default()).unwrap();
        let found = find_hooks(&tree, ItemId::ROOT, HookFamily::Merge);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].owner, ItemId::ROOT);
    }

    #[test]
    fn test_hook_input_coerces_losslessly() {
        let n: i32 = hook_input(HookFamily::Parse, Value::I64(10)).unwrap();
        assert_eq!(n, 10);

        let s: String = hook_input(HookFamily::ParseEnv, Value::from("10")).unwrap();
        assert_eq!(s, "10");
    }

    #[test]
    fn test_hook_input_mismatch_is_contract_error() {
        let err = hook_input::<String>(HookFamily::Parse, Value::I64(10)).unwrap_err();
        assert!(matches!(err, ConfigError::HookContract { .. }));
        assert!(err.to_string().contains("Parse"));
    }

    #[test]
    fn test_hook_set_has() {
        let mut hooks = HookSet::default();
        assert!(!hooks.has(HookFamily::Validate));
        hooks.validate = Some(Box::new(|_: &dyn Any| Ok(())));
        assert!(hooks.has(HookFamily::Validate));
        assert!(!hooks.has(HookFamily::Merge));
    }
}
