//! Name-indexed factory registries for agents and requests.
//!
//! A [`Registry`] maps a unique name to a [`Factory`] producing boxed trait
//! objects. The server keeps one registry for agent kinds and one for request
//! kinds; modules extend both at load time and shrink them again on unload.

use std::collections::BTreeMap;
use std::fmt;

use crate::agent::Agent;
use crate::error::{RegistryError, RegistryResult};
use crate::request::Request;

/// Descriptive metadata attached to a factory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassInfo {
    /// Class identifier of the products.
    pub id: String,
    /// One-line description (shown by `help`).
    pub description: String,
    /// Usage text (shown by `help <name>`).
    pub help: String,
}

impl ClassInfo {
    /// Create class info with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            help: String::new(),
        }
    }

    /// Set the short description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the usage text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }
}

/// Produces fresh instances of `T`.
pub trait Factory<T: ?Sized>: Send + Sync {
    /// Metadata describing the products.
    fn class_info(&self) -> &ClassInfo;

    /// Construct a new instance. The caller owns it.
    fn create(&self) -> Box<T>;
}

/// A factory backed by a closure.
pub struct FnFactory<T: ?Sized> {
    info: ClassInfo,
    make: Box<dyn Fn() -> Box<T> + Send + Sync>,
}

impl<T: ?Sized> FnFactory<T> {
    pub fn new(info: ClassInfo, make: impl Fn() -> Box<T> + Send + Sync + 'static) -> Self {
        Self {
            info,
            make: Box::new(make),
        }
    }
}

impl<T: ?Sized> Factory<T> for FnFactory<T> {
    fn class_info(&self) -> &ClassInfo {
        &self.info
    }

    fn create(&self) -> Box<T> {
        (self.make)()
    }
}

/// A factory that builds `C::default()`.
///
/// Implemented for both `dyn Agent` and `dyn Request`, so a module can
/// register a concrete type without writing a closure.
pub struct TypeFactory<C> {
    info: ClassInfo,
    _marker: std::marker::PhantomData<fn() -> C>,
}

impl<C> TypeFactory<C> {
    pub fn new(info: ClassInfo) -> Self {
        Self {
            info,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<C: Agent + Default + 'static> Factory<dyn Agent> for TypeFactory<C> {
    fn class_info(&self) -> &ClassInfo {
        &self.info
    }

    fn create(&self) -> Box<dyn Agent> {
        Box::new(C::default())
    }
}

impl<C: Request + Default + 'static> Factory<dyn Request> for TypeFactory<C> {
    fn class_info(&self) -> &ClassInfo {
        &self.info
    }

    fn create(&self) -> Box<dyn Request> {
        Box::new(C::default())
    }
}

/// Name → factory table.
///
/// Names are kept sorted, so [`Registry::names`] is stable between mutations.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    factories: BTreeMap<String, Box<dyn Factory<T>>>,
}

/// Registry of agent kinds.
pub type AgentRegistry = Registry<dyn Agent>;

/// Registry of request kinds.
pub type RequestRegistry = Registry<dyn Request>;

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry. `kind` names the products in error messages.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory. Errors if the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: Box<dyn Factory<T>>,
    ) -> RegistryResult<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicateName {
                kind: self.kind,
                name,
            });
        }
        tracing::debug!(kind = self.kind, %name, "registered factory");
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Remove a factory. Errors if the name is absent.
    pub fn unregister(&mut self, name: &str) -> RegistryResult<()> {
        match self.factories.remove(name) {
            Some(_) => {
                tracing::debug!(kind = self.kind, %name, "unregistered factory");
                Ok(())
            }
            None => Err(self.unknown(name)),
        }
    }

    /// Invoke the factory registered under `name`.
    pub fn create(&self, name: &str) -> RegistryResult<Box<T>> {
        self.factories
            .get(name)
            .map(|f| f.create())
            .ok_or_else(|| self.unknown(name))
    }

    /// Metadata of the factory registered under `name`.
    pub fn class_info(&self, name: &str) -> RegistryResult<&ClassInfo> {
        self.factories
            .get(name)
            .map(|f| f.class_info())
            .ok_or_else(|| self.unknown(name))
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|k| k.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Drop every factory.
    pub fn clear(&mut self) {
        self.factories.clear();
    }

    fn unknown(&self, name: &str) -> RegistryError {
        RegistryError::UnknownName {
            kind: self.kind,
            name: name.to_string(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}
