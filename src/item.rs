//! The item tree built from a settings schema.
//!
//! Items live in an arena and refer to each other by [`ItemId`]. A leaf never
//! holds a pointer into the settings object: reading or writing it walks the
//! group chain from the root object down to the leaf's group.

use crate::error::{ConfigError, ConfigResult};
use crate::hooks::HookSet;
use crate::naming::{env_prefix, is_valid_env_name, normalize, normalize_with};
use crate::schema::{group_hooks, parts, Group, GroupAccess, NodeBody, NodeSpec, Slot, Tags};
use crate::value::{Kind, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tracing::error;

/// Deepest group nesting accepted while building a tree.
pub const MAX_DEPTH: usize = 32;

/// Index of an item in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(usize);

impl ItemId {
    /// The root group.
    pub const ROOT: ItemId = ItemId(0);

    pub fn index(&self) -> usize {
        self.0
    }
}

enum ItemBody {
    Root,
    Leaf(Box<dyn Slot>),
    Group(Box<dyn GroupAccess>),
}

/// A node of the settings tree: a group or a settable leaf.
pub struct Item {
    id: ItemId,
    field_name: String,
    tags: Tags,
    group: Option<ItemId>,
    children: Vec<ItemId>,
    body: ItemBody,
    hooks: HookSet,
    child_hooks: HashMap<String, HookSet>,
    name: String,
    prefixes: Vec<String>,
    full_name: String,
    flag_enabled: bool,
}

impl Item {
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// The identifier the field was declared with.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn help(&self) -> Option<&str> {
        self.tags.help.as_deref()
    }

    /// The enclosing group, `None` for the root.
    pub fn group(&self) -> Option<ItemId> {
        self.group
    }

    pub fn children(&self) -> &[ItemId] {
        &self.children
    }

    pub fn is_group(&self) -> bool {
        !matches!(self.body, ItemBody::Leaf(_))
    }

    pub fn is_root(&self) -> bool {
        matches!(self.body, ItemBody::Root)
    }

    /// The name segment: the flag annotation when set, the field identifier
    /// otherwise.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical dotted path, e.g. `database.pool_size`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Whether neither the item nor any of its groups opted out of flags.
    pub fn enable_flag(&self) -> bool {
        self.flag_enabled
    }

    /// The flag name, `None` when the item is excluded from flags.
    ///
    /// Path segments are joined with `-`, so `database.pool_size` becomes
    /// `database-pool-size`.
    pub fn flag_name(&self) -> Option<String> {
        if !self.flag_enabled {
            return None;
        }
        let path = join(&self.prefixes, &self.name, ".");
        Some(normalize_with(&path, ".", '-').replace(['.', '_'], "-"))
    }

    /// Derives the environment variable name of the item.
    ///
    /// An empty string means the item has no environment variable, either
    /// because it opted out or because the derived name is not a valid one.
    ///
    /// # Arguments
    /// * `prefix` - Program level prefix, e.g. `myapp-serve`; may be empty
    ///
    /// # Example
    /// A field `TestFindMe` in group `ThisIsGroup` with prefix `app` maps to
    /// `APP_THIS_IS_GROUP_TEST_FIND_ME`.
    pub fn env_name(&self, prefix: &str) -> String {
        let base = match self.tags.env.as_deref() {
            Some("-") => return String::new(),
            Some(env) if !env.is_empty() => env,
            _ => self.name.as_str(),
        };

        let mut name = normalize(&join(&self.prefixes, base, "_"), "_")
            .to_uppercase()
            .replace(['-', '.'], "_");
        if !prefix.is_empty() {
            name = format!("{}_{}", env_prefix(prefix), name);
        }

        if !is_valid_env_name(&name) {
            error!(name = %name, item = %self.full_name, "invalid env name found");
            return String::new();
        }

        name
    }

    /// The primitive kind of a leaf's storage, `None` for groups and for
    /// storage types without a primitive counterpart.
    pub fn kind(&self) -> Option<Kind> {
        match &self.body {
            ItemBody::Leaf(slot) => slot.kind(),
            _ => None,
        }
    }

    /// The storage type name of a leaf.
    pub fn type_name(&self) -> Option<&'static str> {
        match &self.body {
            ItemBody::Leaf(slot) => Some(slot.type_name()),
            _ => None,
        }
    }

    pub(crate) fn own_hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub(crate) fn child_hooks(&self, field_name: &str) -> Option<&HookSet> {
        self.child_hooks.get(field_name)
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.id)
            .field("field_name", &self.field_name)
            .field("full_name", &self.full_name)
            .field("group", &self.group)
            .field("children", &self.children)
            .field("tags", &self.tags)
            .finish()
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Item full_name={} field_name={} name={} children={} is_group={}>",
            self.full_name,
            self.field_name,
            self.name,
            self.children.len(),
            self.is_group()
        )
    }
}

fn join(prefixes: &[String], last: &str, sep: &str) -> String {
    let mut segments: Vec<&str> = prefixes.iter().map(String::as_str).collect();
    segments.push(last);
    segments.join(sep)
}

/// Arena of items with a canonical name index.
pub struct ItemTree {
    items: Vec<Item>,
    index: HashMap<String, ItemId>,
}

impl ItemTree {
    /// Builds the tree of `settings`, allocating unset optional groups on the
    /// way down.
    ///
    /// Fails with [`ConfigError::DuplicateName`] when two items share a
    /// canonical name and with [`ConfigError::Construction`] when groups nest
    /// deeper than [`MAX_DEPTH`].
    pub fn build<S: Group>(settings: &mut S) -> ConfigResult<Self> {
        let parts = parts::<S>();
        let mut tree = ItemTree {
            items: vec![Item {
                id: ItemId::ROOT,
                field_name: String::new(),
                tags: Tags::default(),
                group: None,
                children: Vec::new(),
                body: ItemBody::Root,
                hooks: group_hooks::<S>(),
                child_hooks: parts.child_hooks,
                name: String::new(),
                prefixes: Vec::new(),
                full_name: String::new(),
                flag_enabled: true,
            }],
            index: HashMap::new(),
        };

        tree.expand(ItemId::ROOT, parts.nodes, settings, 1)?;
        Ok(tree)
    }

    fn expand(
        &mut self,
        parent: ItemId,
        nodes: Vec<NodeSpec>,
        object: &mut dyn Any,
        depth: usize,
    ) -> ConfigResult<()> {
        if depth > MAX_DEPTH {
            return Err(ConfigError::Construction(format!(
                "groups nested deeper than {} levels at '{}'",
                MAX_DEPTH,
                self.item(parent).full_name
            )));
        }

        for node in nodes {
            match node.body {
                NodeBody::Leaf(slot) => {
                    self.push(
                        parent,
                        node.field_name,
                        node.tags,
                        node.hooks,
                        ItemBody::Leaf(slot),
                        HashMap::new(),
                    )?;
                }
                NodeBody::Group { access, expand } => {
                    let child = access.get_mut(object)?;
                    let parts = expand();
                    let id = self.push(
                        parent,
                        node.field_name,
                        node.tags,
                        node.hooks,
                        ItemBody::Group(access),
                        parts.child_hooks,
                    )?;
                    self.expand(id, parts.nodes, child, depth + 1)?;
                }
            }
        }

        Ok(())
    }

    fn push(
        &mut self,
        parent: ItemId,
        field_name: String,
        tags: Tags,
        hooks: HookSet,
        body: ItemBody,
        child_hooks: HashMap<String, HookSet>,
    ) -> ConfigResult<ItemId> {
        let group = self.item(parent);
        let mut prefixes = group.prefixes.clone();
        if !group.is_root() {
            prefixes.push(group.name.clone());
        }
        let flag_enabled = group.flag_enabled && tags.flag.as_deref() != Some("-");

        let name = match tags.flag.as_deref() {
            Some(flag) if !flag.is_empty() && flag != "-" => flag.to_string(),
            _ => field_name.clone(),
        };
        let full_name = normalize(&join(&prefixes, &name, "."), ".");

        let id = ItemId(self.items.len());
        if self.index.insert(full_name.clone(), id).is_some() {
            return Err(ConfigError::DuplicateName { name: full_name });
        }

        self.items.push(Item {
            id,
            field_name,
            tags,
            group: Some(parent),
            children: Vec::new(),
            body,
            hooks,
            child_hooks,
            name,
            prefixes,
            full_name,
            flag_enabled,
        });
        self.items[parent.0].children.push(id);
        Ok(id)
    }

    pub fn root(&self) -> &Item {
        &self.items[0]
    }

    pub(crate) fn item(&self, id: ItemId) -> &Item {
        &self.items[id.0]
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id.0)
    }

    /// Looks an item up by canonical name.
    pub fn find(&self, full_name: &str) -> Option<&Item> {
        self.index.get(full_name).map(|id| self.item(*id))
    }

    /// Every item except the root, groups before their children, in
    /// declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().skip(1)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Item> {
        self.iter().filter(|item| !item.is_group())
    }

    /// Number of items, the root excluded.
    pub fn len(&self) -> usize {
        self.items.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Group ids from just below the root down to `id` itself.
    fn chain(&self, id: ItemId) -> Vec<ItemId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cursor) = current {
            if cursor == ItemId::ROOT {
                break;
            }
            chain.push(cursor);
            current = self.item(cursor).group;
        }
        chain.reverse();
        chain
    }

    /// Returns the object of group `id`, `None` when it or one of its groups
    /// is an unset optional group.
    pub(crate) fn object<'a>(
        &self,
        root: &'a dyn Any,
        id: ItemId,
    ) -> ConfigResult<Option<&'a dyn Any>> {
        let mut current = root;
        for step in self.chain(id) {
            let access = self.access(step)?;
            match access.get(current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Returns the object of group `id`, allocating unset optional groups.
    pub(crate) fn object_mut<'a>(
        &self,
        root: &'a mut dyn Any,
        id: ItemId,
    ) -> ConfigResult<&'a mut dyn Any> {
        let mut current = root;
        for step in self.chain(id) {
            current = self.access(step)?.get_mut(current)?;
        }
        Ok(current)
    }

    fn access(&self, id: ItemId) -> ConfigResult<&dyn GroupAccess> {
        match &self.item(id).body {
            ItemBody::Group(access) => Ok(access.as_ref()),
            _ => Err(ConfigError::Construction(format!(
                "'{}' is not a group",
                self.item(id).full_name
            ))),
        }
    }

    fn slot(&self, id: ItemId) -> ConfigResult<(&dyn Slot, ItemId)> {
        let item = self.item(id);
        match (&item.body, item.group) {
            (ItemBody::Leaf(slot), Some(group)) => Ok((slot.as_ref(), group)),
            _ => Err(ConfigError::CannotSet {
                key: item.full_name.clone(),
            }),
        }
    }

    /// Reads a leaf, `None` when one of its groups is unset.
    pub(crate) fn read(&self, root: &dyn Any, id: ItemId) -> ConfigResult<Option<Value>> {
        let (slot, group) = self.slot(id)?;
        match self.object(root, group)? {
            Some(object) => slot.get(object).map(Some),
            None => Ok(None),
        }
    }

    /// Writes a leaf, refusing any value that is not exactly its type.
    pub(crate) fn write(&self, root: &mut dyn Any, id: ItemId, value: Value) -> ConfigResult<()> {
        let (slot, group) = self.slot(id)?;
        slot.set(self.object_mut(root, group)?, value)
    }
}

impl fmt::Debug for ItemTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}
