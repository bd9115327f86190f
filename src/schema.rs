//! Declarative settings schema.
//!
//! A settings type describes its own fields once through [`Group::describe`].
//! Each field is declared with accessors into the live storage, optional
//! naming annotations and optional hooks. Nested groups are declared the same
//! way and expanded lazily when the item tree is built.
//!
//! # Example
//! ```
//! use spicetree::{field, Group, Schema};
//!
//! #[derive(Debug, Default)]
//! struct Database {
//!     host: String,
//!     pool_size: u32,
//! }
//!
//! impl Group for Database {
//!     fn describe(schema: &mut Schema<Self>) {
//!         field!(schema, host).help("database host");
//!         field!(schema, pool_size).validate(|n: &u32| {
//!             if *n == 0 {
//!                 return Err("pool size must be positive");
//!             }
//!             Ok(())
//!         });
//!     }
//! }
//!
//! #[derive(Debug, Default)]
//! struct Settings {
//!     verbose: bool,
//!     database: Database,
//! }
//!
//! impl Group for Settings {
//!     fn describe(schema: &mut Schema<Self>) {
//!         field!(schema, verbose).env("-");
//!         schema.group("database", |s| &s.database, |s| &mut s.database);
//!     }
//! }
//! ```

use crate::error::{ConfigError, ConfigResult, HookError};
use crate::hooks::{
    downcast, downcast_mut, hook_input, hook_result, HookFamily, HookInput, HookSet, ParseHook,
};
use crate::value::{FieldType, Kind, Value};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// A node of the settings tree that contains further fields.
///
/// `validate` and `merge` are the group's own hooks and run during the
/// validation phase, after every child has been handled.
pub trait Group: Any + Send + Sized {
    /// Declares the children of this group in order.
    fn describe(schema: &mut Schema<Self>);

    fn validate(&self) -> Result<(), HookError> {
        Ok(())
    }

    fn merge(&mut self) -> Result<(), HookError> {
        Ok(())
    }
}

/// Per-field annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    /// Flag name override, `"-"` excludes the item and its descendants from flags.
    pub flag: Option<String>,
    /// Environment name override, `"-"` excludes the item from the environment.
    pub env: Option<String>,
    pub help: Option<String>,
}

/// Typed access to a leaf, relative to the object of its group.
pub(crate) trait Slot: Send + Sync {
    fn kind(&self) -> Option<Kind>;
    fn type_name(&self) -> &'static str;
    fn get(&self, group: &dyn Any) -> ConfigResult<Value>;
    fn set(&self, group: &mut dyn Any, value: Value) -> ConfigResult<()>;
}

/// Access to a nested group, relative to the object of its parent group.
pub(crate) trait GroupAccess: Send + Sync {
    /// Returns the nested object, `None` when it is an unset optional group.
    fn get<'a>(&self, parent: &'a dyn Any) -> ConfigResult<Option<&'a dyn Any>>;
    /// Returns the nested object, allocating an unset optional group first.
    fn get_mut<'a>(&self, parent: &'a mut dyn Any) -> ConfigResult<&'a mut dyn Any>;
}

type Getter<G, T> = Arc<dyn Fn(&G) -> &T + Send + Sync>;
type GetterMut<G, T> = Arc<dyn Fn(&mut G) -> &mut T + Send + Sync>;

struct FieldSlot<G, T> {
    get: Getter<G, T>,
    get_mut: GetterMut<G, T>,
}

impl<G: Group, T: FieldType> Slot for FieldSlot<G, T> {
    fn kind(&self) -> Option<Kind> {
        T::KIND
    }

    fn type_name(&self) -> &'static str {
        T::type_name()
    }

    fn get(&self, group: &dyn Any) -> ConfigResult<Value> {
        let group = downcast::<G>(group)?;
        Ok((self.get)(group).to_value())
    }

    fn set(&self, group: &mut dyn Any, value: Value) -> ConfigResult<()> {
        let group = downcast_mut::<G>(group)?;
        let found = value.type_name();
        let value = T::from_value(value)
            .map_err(|_| ConfigError::not_assignable(T::type_name(), found))?;
        *(self.get_mut)(group) = value;
        Ok(())
    }
}

struct InlineGroup<P, G> {
    get: Getter<P, G>,
    get_mut: GetterMut<P, G>,
}

impl<P: Group, G: Group> GroupAccess for InlineGroup<P, G> {
    fn get<'a>(&self, parent: &'a dyn Any) -> ConfigResult<Option<&'a dyn Any>> {
        let parent = downcast::<P>(parent)?;
        Ok(Some((self.get)(parent) as &dyn Any))
    }

    fn get_mut<'a>(&self, parent: &'a mut dyn Any) -> ConfigResult<&'a mut dyn Any> {
        let parent = downcast_mut::<P>(parent)?;
        Ok((self.get_mut)(parent) as &mut dyn Any)
    }
}

struct OptionalGroup<P, G> {
    get: Getter<P, Option<G>>,
    get_mut: GetterMut<P, Option<G>>,
}

impl<P: Group, G: Group + Default> GroupAccess for OptionalGroup<P, G> {
    fn get<'a>(&self, parent: &'a dyn Any) -> ConfigResult<Option<&'a dyn Any>> {
        let parent = downcast::<P>(parent)?;
        Ok((self.get)(parent).as_ref().map(|g| g as &dyn Any))
    }

    fn get_mut<'a>(&self, parent: &'a mut dyn Any) -> ConfigResult<&'a mut dyn Any> {
        let parent = downcast_mut::<P>(parent)?;
        let group = (self.get_mut)(parent).get_or_insert_with(G::default);
        Ok(group as &mut dyn Any)
    }
}

pub(crate) enum NodeBody {
    Leaf(Box<dyn Slot>),
    Group {
        access: Box<dyn GroupAccess>,
        expand: fn() -> SchemaParts,
    },
}

/// One declared child of a group.
pub(crate) struct NodeSpec {
    pub(crate) field_name: String,
    pub(crate) tags: Tags,
    /// Own hooks. A leaf's hooks receive the object of the enclosing group, a
    /// group's hooks receive the group itself.
    pub(crate) hooks: HookSet,
    pub(crate) body: NodeBody,
}

/// The erased result of running [`Group::describe`].
pub(crate) struct SchemaParts {
    pub(crate) nodes: Vec<NodeSpec>,
    /// Hooks registered by the group for its children, by field identifier.
    pub(crate) child_hooks: HashMap<String, HookSet>,
}

/// Describes `G` and erases the result.
pub(crate) fn parts<G: Group>() -> SchemaParts {
    let mut schema = Schema::<G>::new();
    G::describe(&mut schema);
    SchemaParts {
        nodes: schema.nodes,
        child_hooks: schema.child_hooks,
    }
}

/// The own `validate` and `merge` hooks of a group, called on the group object.
pub(crate) fn group_hooks<G: Group>() -> HookSet {
    HookSet {
        validate: Some(Box::new(|object: &dyn Any| {
            hook_result(downcast::<G>(object)?.validate())
        })),
        merge: Some(Box::new(|object: &mut dyn Any| {
            hook_result(downcast_mut::<G>(object)?.merge())
        })),
        ..HookSet::default()
    }
}

/// Builder for the children of a group, handed to [`Group::describe`].
pub struct Schema<G> {
    nodes: Vec<NodeSpec>,
    child_hooks: HashMap<String, HookSet>,
    _group: PhantomData<fn(G)>,
}

impl<G: Group> Schema<G> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            child_hooks: HashMap::new(),
            _group: PhantomData,
        }
    }

    /// Declares a leaf field.
    ///
    /// Usually written through the [`field!`](crate::field) macro, which takes
    /// the identifier from the Rust field name.
    ///
    /// # Arguments
    /// * `name` - Field identifier, normalized into the item's path name
    /// * `get` - Returns the field from the group
    /// * `get_mut` - Returns the field mutably from the group
    ///
    /// # Returns
    /// A handle for attaching annotations and own hooks to the field
    pub fn field<T, R, W>(&mut self, name: &str, get: R, get_mut: W) -> Field<'_, G, T>
    where
        T: FieldType,
        R: Fn(&G) -> &T + Send + Sync + 'static,
        W: Fn(&mut G) -> &mut T + Send + Sync + 'static,
    {
        let get: Getter<G, T> = Arc::new(get);
        let get_mut: GetterMut<G, T> = Arc::new(get_mut);
        let slot = FieldSlot {
            get: Arc::clone(&get),
            get_mut: Arc::clone(&get_mut),
        };
        let node = self.push(name, HookSet::default(), NodeBody::Leaf(Box::new(slot)));
        Field { node, get, get_mut }
    }

    /// Declares a nested group stored inline.
    pub fn group<S, R, W>(&mut self, name: &str, get: R, get_mut: W) -> GroupField<'_>
    where
        S: Group,
        R: Fn(&G) -> &S + Send + Sync + 'static,
        W: Fn(&mut G) -> &mut S + Send + Sync + 'static,
    {
        let access = InlineGroup::<G, S> {
            get: Arc::new(get),
            get_mut: Arc::new(get_mut),
        };
        self.push_group::<S>(name, Box::new(access))
    }

    /// Declares a nested group stored as `Option<S>`.
    ///
    /// An unset group is allocated with `S::default()` while the item tree is
    /// built. The validation phase skips it whenever it is unset again.
    pub fn optional_group<S, R, W>(&mut self, name: &str, get: R, get_mut: W) -> GroupField<'_>
    where
        S: Group + Default,
        R: Fn(&G) -> &Option<S> + Send + Sync + 'static,
        W: Fn(&mut G) -> &mut Option<S> + Send + Sync + 'static,
    {
        let access = OptionalGroup::<G, S> {
            get: Arc::new(get),
            get_mut: Arc::new(get_mut),
        };
        self.push_group::<S>(name, Box::new(access))
    }

    fn push_group<S: Group>(&mut self, name: &str, access: Box<dyn GroupAccess>) -> GroupField<'_> {
        let body = NodeBody::Group {
            access,
            expand: parts::<S>,
        };
        let node = self.push(name, group_hooks::<S>(), body);
        GroupField { node }
    }

    fn push(&mut self, name: &str, hooks: HookSet, body: NodeBody) -> &mut NodeSpec {
        self.nodes.push(NodeSpec {
            field_name: name.to_string(),
            tags: Tags::default(),
            hooks,
            body,
        });
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }

    fn hooks_for(&mut self, name: &str) -> &mut HookSet {
        self.child_hooks.entry(name.to_string()).or_default()
    }

    /// Registers a parse hook for the child `name`, called with this group.
    ///
    /// The hook replaces the default parsing of values from every source, and
    /// its input type decides the kind the child is registered as a flag.
    pub fn on_parse<I, O, E, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        I: FieldType,
        O: FieldType,
        E: Into<HookError>,
        F: Fn(&G, I) -> Result<O, E> + Send + Sync + 'static,
    {
        self.hooks_for(name).parse = Some(group_parse_hook(HookFamily::Parse, f));
        self
    }

    /// Registers an environment parse hook for the child `name`.
    pub fn on_parse_env<O, E, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        O: FieldType,
        E: Into<HookError>,
        F: Fn(&G, String) -> Result<O, E> + Send + Sync + 'static,
    {
        self.hooks_for(name).parse_env = Some(group_parse_hook(HookFamily::ParseEnv, f));
        self
    }

    /// Registers a validation hook for the child `name`.
    pub fn on_validate<E, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        E: Into<HookError>,
        F: Fn(&G) -> Result<(), E> + Send + Sync + 'static,
    {
        self.hooks_for(name).validate = Some(Box::new(move |object: &dyn Any| {
            hook_result(f(downcast::<G>(object)?))
        }));
        self
    }

    /// Registers a merge hook for the child `name`.
    pub fn on_merge<E, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        E: Into<HookError>,
        F: Fn(&mut G) -> Result<(), E> + Send + Sync + 'static,
    {
        self.hooks_for(name).merge = Some(Box::new(move |object: &mut dyn Any| {
            hook_result(f(downcast_mut::<G>(object)?))
        }));
        self
    }

    /// Registers the flag default of the child `name`.
    pub fn on_flag_value<D, E, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        D: FieldType,
        E: Into<HookError>,
        F: Fn(&G) -> Result<D, E> + Send + Sync + 'static,
    {
        self.hooks_for(name).flag_value = Some(Box::new(move |object: &dyn Any| {
            hook_result(f(downcast::<G>(object)?)).map(|d| d.to_value())
        }));
        self
    }
}

fn group_parse_hook<G, I, O, E, F>(family: HookFamily, f: F) -> ParseHook
where
    G: Group,
    I: FieldType,
    O: FieldType,
    E: Into<HookError>,
    F: Fn(&G, I) -> Result<O, E> + Send + Sync + 'static,
{
    ParseHook::new(HookInput::of::<I>(), move |object, raw| {
        let group = downcast::<G>(object)?;
        let input = hook_input::<I>(family, raw)?;
        hook_result(f(group, input)).map(|o| o.to_value())
    })
}

/// Handle to a declared leaf.
pub struct Field<'a, G, T> {
    node: &'a mut NodeSpec,
    get: Getter<G, T>,
    get_mut: GetterMut<G, T>,
}

impl<'a, G: Group, T: FieldType> Field<'a, G, T> {
    /// Overrides the name segment, `"-"` excludes the field from flags.
    pub fn flag(self, name: &str) -> Self {
        self.node.tags.flag = Some(name.to_string());
        self
    }

    /// Overrides the environment name segment, `"-"` excludes the field
    /// from the environment.
    pub fn env(self, name: &str) -> Self {
        self.node.tags.env = Some(name.to_string());
        self
    }

    /// Sets the flag help text.
    pub fn help(self, text: &str) -> Self {
        self.node.tags.help = Some(text.to_string());
        self
    }

    /// Attaches the field's own parse hook.
    pub fn parse<I, O, E, F>(self, f: F) -> Self
    where
        I: FieldType,
        O: FieldType,
        E: Into<HookError>,
        F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
    {
        self.node.hooks.parse = Some(ParseHook::new(HookInput::of::<I>(), move |_, raw| {
            let input = hook_input::<I>(HookFamily::Parse, raw)?;
            hook_result(f(input)).map(|o| o.to_value())
        }));
        self
    }

    /// Attaches the field's own environment parse hook.
    pub fn parse_env<O, E, F>(self, f: F) -> Self
    where
        O: FieldType,
        E: Into<HookError>,
        F: Fn(String) -> Result<O, E> + Send + Sync + 'static,
    {
        self.node.hooks.parse_env = Some(ParseHook::new(
            HookInput::of::<String>(),
            move |_, raw| {
                let input = hook_input::<String>(HookFamily::ParseEnv, raw)?;
                hook_result(f(input)).map(|o| o.to_value())
            },
        ));
        self
    }

    /// Attaches the field's own validation hook.
    pub fn validate<E, F>(self, f: F) -> Self
    where
        E: Into<HookError>,
        F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
    {
        let get = Arc::clone(&self.get);
        self.node.hooks.validate = Some(Box::new(move |object: &dyn Any| {
            hook_result(f(get(downcast::<G>(object)?)))
        }));
        self
    }

    /// Attaches the field's own merge hook, which may rewrite the value.
    pub fn merge<E, F>(self, f: F) -> Self
    where
        E: Into<HookError>,
        F: Fn(&mut T) -> Result<(), E> + Send + Sync + 'static,
    {
        let get_mut = Arc::clone(&self.get_mut);
        self.node.hooks.merge = Some(Box::new(move |object: &mut dyn Any| {
            hook_result(f(get_mut(downcast_mut::<G>(object)?)))
        }));
        self
    }

    /// Attaches the field's own flag default.
    pub fn flag_value<D, E, F>(self, f: F) -> Self
    where
        D: FieldType,
        E: Into<HookError>,
        F: Fn(&T) -> Result<D, E> + Send + Sync + 'static,
    {
        let get = Arc::clone(&self.get);
        self.node.hooks.flag_value = Some(Box::new(move |object: &dyn Any| {
            hook_result(f(get(downcast::<G>(object)?))).map(|d| d.to_value())
        }));
        self
    }
}

/// Handle to a declared nested group.
pub struct GroupField<'a> {
    node: &'a mut NodeSpec,
}

impl<'a> GroupField<'a> {
    /// Overrides the group's name segment, `"-"` excludes every descendant
    /// from flags.
    pub fn flag(self, name: &str) -> Self {
        self.node.tags.flag = Some(name.to_string());
        self
    }
}

/// Declares a leaf whose identifier is the Rust field name.
///
/// `field!(schema, port)` expands to
/// `schema.field("port", |s| &s.port, |s| &mut s.port)`.
#[macro_export]
macro_rules! field {
    ($schema:expr, $name:ident) => {
        $schema.field(
            stringify!($name),
            |s| &s.$name,
            |s| &mut s.$name,
        )
    };
}
