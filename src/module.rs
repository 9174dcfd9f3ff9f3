//! Dynamically loaded modules.
//!
//! A module is a native library exporting three C symbols:
//!
//! | Symbol | Signature |
//! |---|---|
//! | `cogserver_module_id` | `extern "C" fn() -> *const c_char` |
//! | `cogserver_module_load` | `extern "C" fn() -> *mut c_void` |
//! | `cogserver_module_unload` | `extern "C" fn(*mut c_void)` |
//!
//! The load function returns an opaque pointer to a boxed [`Module`]; the
//! server calls [`Module::init`] right after loading and [`Module::shutdown`]
//! right before handing the pointer back to the unload function. Use
//! [`declare_module!`](crate::declare_module) to generate the exports.
//!
//! Libraries are opened through a [`ModuleLoader`]. [`DynamicLoader`] uses
//! `libloading`; [`StaticLoader`] serves entry points linked into the current
//! process, which is what tests use.
//!
//! Modules must be built with the same toolchain and `cogserver` version as
//! the host: the instance pointer carries a Rust trait object.

use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{CogResult, ModuleError, ModuleResult};
use crate::server::CogServer;

/// Symbol returning the module id as a NUL-terminated string.
pub const MODULE_ID_SYMBOL: &[u8] = b"cogserver_module_id\0";
/// Symbol constructing the module instance.
pub const MODULE_LOAD_SYMBOL: &[u8] = b"cogserver_module_load\0";
/// Symbol destroying the module instance.
pub const MODULE_UNLOAD_SYMBOL: &[u8] = b"cogserver_module_unload\0";

pub type ModuleIdFn = unsafe extern "C" fn() -> *const c_char;
pub type ModuleLoadFn = unsafe extern "C" fn() -> *mut c_void;
pub type ModuleUnloadFn = unsafe extern "C" fn(*mut c_void);

/// A loaded extension.
pub trait Module: Send {
    /// Register the module's agents and requests.
    ///
    /// An error unloads the module again.
    fn init(&mut self, server: &mut CogServer) -> CogResult<()>;

    /// Undo what `init` registered. Runs before the instance is destroyed.
    fn shutdown(&mut self, server: &mut CogServer) {
        let _ = server;
    }
}

/// Box a module into the opaque pointer handed across the ABI.
pub fn into_raw(module: Box<dyn Module>) -> *mut c_void {
    Box::into_raw(Box::new(module)).cast()
}

/// Destroy a module created by [`into_raw`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must come from [`into_raw`] and must not have been freed.
pub unsafe fn drop_raw(ptr: *mut c_void) {
    if !ptr.is_null() {
        drop(unsafe { Box::from_raw(ptr.cast::<Box<dyn Module>>()) });
    }
}

/// Generate the three module exports for a `Module + Default` type.
///
/// ```ignore
/// #[derive(Default)]
/// struct Hello;
/// impl cogserver::module::Module for Hello { /* ... */ }
/// cogserver::declare_module!(Hello, "hello");
/// ```
#[macro_export]
macro_rules! declare_module {
    ($ty:ty, $id:literal) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn cogserver_module_id() -> *const ::std::ffi::c_char {
            concat!($id, "\0").as_ptr().cast()
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn cogserver_module_load() -> *mut ::std::ffi::c_void {
            $crate::module::into_raw(::std::boxed::Box::new(
                <$ty as ::std::default::Default>::default(),
            ))
        }

        /// # Safety
        ///
        /// `ptr` must come from `cogserver_module_load`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn cogserver_module_unload(ptr: *mut ::std::ffi::c_void) {
            unsafe { $crate::module::drop_raw(ptr) }
        }
    };
}

/// Build [`ModuleEntryPoints`] for a `Module + Default` type without exporting
/// symbols. Used with [`StaticLoader`].
#[macro_export]
macro_rules! module_entry_points {
    ($ty:ty, $id:literal) => {{
        extern "C" fn id() -> *const ::std::ffi::c_char {
            concat!($id, "\0").as_ptr().cast()
        }
        extern "C" fn load() -> *mut ::std::ffi::c_void {
            $crate::module::into_raw(::std::boxed::Box::new(
                <$ty as ::std::default::Default>::default(),
            ))
        }
        unsafe extern "C" fn unload(ptr: *mut ::std::ffi::c_void) {
            unsafe { $crate::module::drop_raw(ptr) }
        }
        $crate::module::ModuleEntryPoints::new(id, load, unload)
    }};
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// The three resolved exports of a module library.
#[derive(Debug, Clone, Copy)]
pub struct ModuleEntryPoints {
    pub id: ModuleIdFn,
    pub load: ModuleLoadFn,
    pub unload: ModuleUnloadFn,
}

impl ModuleEntryPoints {
    pub fn new(id: ModuleIdFn, load: ModuleLoadFn, unload: ModuleUnloadFn) -> Self {
        Self { id, load, unload }
    }
}

/// An open module library.
pub trait ModuleLibrary: Send {
    /// Resolve the module exports.
    ///
    /// The returned pointers are valid until [`ModuleLibrary::close`].
    fn entry_points(&self) -> ModuleResult<ModuleEntryPoints>;

    /// Release the library.
    fn close(self: Box<Self>) -> ModuleResult<()>;
}

/// Opens module libraries by path.
pub trait ModuleLoader: Send {
    fn open(&mut self, path: &str) -> ModuleResult<Box<dyn ModuleLibrary>>;
}

/// Loads shared libraries from disk with lazy symbol binding.
#[derive(Debug, Default)]
pub struct DynamicLoader;

impl DynamicLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for DynamicLoader {
    fn open(&mut self, path: &str) -> ModuleResult<Box<dyn ModuleLibrary>> {
        // Safety: running a library's initializers is inherent to loading it.
        #[cfg(unix)]
        let opened = unsafe {
            libloading::os::unix::Library::open(Some(path), libloading::os::unix::RTLD_LAZY)
        }
        .map(libloading::Library::from);
        #[cfg(not(unix))]
        let opened = unsafe { libloading::Library::new(path) };

        let lib = opened.map_err(|e| ModuleError::LoadFailed {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Box::new(DynamicLibrary {
            path: path.to_string(),
            lib,
        }))
    }
}

struct DynamicLibrary {
    path: String,
    lib: libloading::Library,
}

impl DynamicLibrary {
    fn symbol<T: Copy>(&self, name: &[u8]) -> ModuleResult<T> {
        // Safety: the caller picks `T` to match the documented ABI, and the
        // pointer is only used while the library stays open.
        unsafe { self.lib.get::<T>(name) }
            .map(|sym| *sym)
            .map_err(|e| ModuleError::LoadFailed {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }
}

impl ModuleLibrary for DynamicLibrary {
    fn entry_points(&self) -> ModuleResult<ModuleEntryPoints> {
        Ok(ModuleEntryPoints {
            id: self.symbol(MODULE_ID_SYMBOL)?,
            load: self.symbol(MODULE_LOAD_SYMBOL)?,
            unload: self.symbol(MODULE_UNLOAD_SYMBOL)?,
        })
    }

    fn close(self: Box<Self>) -> ModuleResult<()> {
        let DynamicLibrary { path, lib } = *self;
        lib.close()
            .map_err(|e| ModuleError::CloseFailed {
                path,
                message: e.to_string(),
            })
    }
}

/// Serves module entry points compiled into the current process.
///
/// Paths are arbitrary keys. Opening an unknown path fails like a missing file.
#[derive(Debug, Default)]
pub struct StaticLoader {
    modules: HashMap<String, ModuleEntryPoints>,
    open: Arc<AtomicUsize>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `entry_points` loadable under `path`.
    pub fn with_module(mut self, path: impl Into<String>, entry_points: ModuleEntryPoints) -> Self {
        self.modules.insert(path.into(), entry_points);
        self
    }

    /// Counter of libraries opened and not yet closed.
    pub fn open_libraries(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.open)
    }
}

impl ModuleLoader for StaticLoader {
    fn open(&mut self, path: &str) -> ModuleResult<Box<dyn ModuleLibrary>> {
        let entry_points = self
            .modules
            .get(path)
            .copied()
            .ok_or_else(|| ModuleError::LoadFailed {
                path: path.to_string(),
                message: "no such module".into(),
            })?;
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticLibrary {
            entry_points,
            open: Arc::clone(&self.open),
        }))
    }
}

struct StaticLibrary {
    entry_points: ModuleEntryPoints,
    open: Arc<AtomicUsize>,
}

impl ModuleLibrary for StaticLibrary {
    fn entry_points(&self) -> ModuleResult<ModuleEntryPoints> {
        Ok(self.entry_points)
    }

    fn close(self: Box<Self>) -> ModuleResult<()> {
        self.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct ModuleInstance(*mut c_void);

// Safety: the pointer is a `Box<Box<dyn Module>>` and `Module: Send`. It is
// only dereferenced on the server thread.
unsafe impl Send for ModuleInstance {}
unsafe impl Sync for ModuleInstance {}

/// Id and filename of a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: String,
    pub filename: String,
}

/// Descriptor of a loaded module.
pub struct ModuleData {
    id: String,
    filename: String,
    entry_points: ModuleEntryPoints,
    instance: Mutex<Option<ModuleInstance>>,
    library: Mutex<Option<Box<dyn ModuleLibrary>>>,
}

impl ModuleData {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: self.id.clone(),
            filename: self.filename.clone(),
        }
    }

    fn instance(&self) -> Option<ModuleInstance> {
        *self.instance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_instance(&self) -> Option<ModuleInstance> {
        self.instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn take_library(&self) -> Option<Box<dyn ModuleLibrary>> {
        self.library
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl std::fmt::Debug for ModuleData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleData")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .finish()
    }
}

/// Loaded modules, indexed by both id and filename.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    by_key: HashMap<String, Arc<ModuleData>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a module up by id or filename.
    pub fn get(&self, key: &str) -> Option<Arc<ModuleData>> {
        self.by_key.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Every key (ids and filenames).
    pub fn keys(&self) -> Vec<String> {
        self.by_key.keys().cloned().collect()
    }

    /// Loaded modules, sorted by id.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        let mut infos: Vec<ModuleInfo> = Vec::new();
        for data in self.by_key.values() {
            if !infos.iter().any(|i| i.id == data.id) {
                infos.push(data.info());
            }
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Number of distinct loaded modules.
    pub fn len(&self) -> usize {
        self.modules().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn insert(&mut self, data: Arc<ModuleData>) {
        self.by_key.insert(data.id.clone(), Arc::clone(&data));
        self.by_key.insert(data.filename.clone(), data);
    }

    fn remove(&mut self, data: &Arc<ModuleData>) {
        for key in [&data.id, &data.filename] {
            if self.by_key.get(key).is_some_and(|d| Arc::ptr_eq(d, data)) {
                self.by_key.remove(key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load / unload
// ---------------------------------------------------------------------------

fn close_library(path: &str, library: Box<dyn ModuleLibrary>) -> ModuleResult<()> {
    library.close().inspect_err(|e| {
        tracing::error!(path, error = %e, "failed to close module library");
    })
}

fn read_id(path: &str, id_fn: ModuleIdFn) -> ModuleResult<String> {
    let failed = |message: &str| ModuleError::LoadFailed {
        path: path.to_string(),
        message: message.to_string(),
    };
    // Safety: `id_fn` was resolved from the module's export table.
    let ptr = unsafe { id_fn() };
    if ptr.is_null() {
        return Err(failed("module id is null"));
    }
    // Safety: the export contract is a NUL-terminated string with static lifetime.
    let id = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    if id.is_empty() {
        return Err(failed("module id is empty"));
    }
    Ok(id)
}

/// Load the module at `path` and run its `init`.
pub(crate) fn load(server: &mut CogServer, path: &str) -> ModuleResult<()> {
    if server.modules.contains(path) {
        tracing::warn!(path, "module already loaded");
        return Err(ModuleError::AlreadyLoaded {
            key: path.to_string(),
        });
    }

    let library = server.loader.open(path).inspect_err(|e| {
        tracing::error!(path, error = %e, "unable to open module");
    })?;

    let resolved = library
        .entry_points()
        .and_then(|entry_points| Ok((entry_points, read_id(path, entry_points.id)?)));
    let (entry_points, id) = match resolved {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(path, error = %e, "unable to load module");
            let _ = close_library(path, library);
            return Err(e);
        }
    };

    if server.modules.contains(&id) {
        tracing::error!(module = %id, path, "module id collides with a loaded module");
        let _ = close_library(path, library);
        return Err(ModuleError::KeyCollision {
            id,
            path: path.to_string(),
        });
    }

    // Safety: resolved from the module's export table.
    let raw = unsafe { (entry_points.load)() };
    if raw.is_null() {
        tracing::error!(module = %id, path, "module load function returned null");
        let _ = close_library(path, library);
        return Err(ModuleError::LoadFailed {
            path: path.to_string(),
            message: "module load function returned null".into(),
        });
    }

    let data = Arc::new(ModuleData {
        id: id.clone(),
        filename: path.to_string(),
        entry_points,
        instance: Mutex::new(Some(ModuleInstance(raw))),
        library: Mutex::new(Some(library)),
    });
    server.modules.insert(Arc::clone(&data));

    if let Some(instance) = data.instance() {
        // Safety: produced by the module's load function, freed only by unload.
        let module = unsafe { &mut **instance.0.cast::<Box<dyn Module>>() };
        if let Err(e) = module.init(server) {
            tracing::error!(module = %id, path, error = %e, "module init failed");
            let _ = unload(server, &id);
            return Err(ModuleError::InitFailed {
                id,
                message: e.to_string(),
            });
        }
    }

    tracing::info!(module = %id, path, "module loaded");
    Ok(())
}

/// Shut a module down and destroy its instance, leaving the library open.
pub(crate) fn unload_instance(server: &mut CogServer, key: &str) -> ModuleResult<Arc<ModuleData>> {
    let data = server.modules.get(key).ok_or_else(|| ModuleError::UnknownModule {
        key: key.to_string(),
    })?;

    if let Some(instance) = data.take_instance() {
        // Safety: taken out of the descriptor, so nothing else holds it.
        let module = unsafe { &mut **instance.0.cast::<Box<dyn Module>>() };
        module.shutdown(server);
        // Safety: the library is still open, so the unload export is valid.
        unsafe { (data.entry_points.unload)(instance.0) };
    }

    server.modules.remove(&data);
    tracing::info!(module = %data.id, path = %data.filename, "module unloaded");
    Ok(data)
}

/// Close the library behind an unloaded module.
pub(crate) fn close(data: &ModuleData) -> ModuleResult<()> {
    match data.take_library() {
        Some(library) => close_library(&data.filename, library),
        None => Ok(()),
    }
}

/// Unload the module known as `key` (id or filename) and close its library.
pub(crate) fn unload(server: &mut CogServer, key: &str) -> ModuleResult<()> {
    let data = unload_instance(server, key)?;
    close(&data)
}

/// Unload every module without closing libraries. Returns the descriptors so
/// the caller can close them once nothing references module code.
pub(crate) fn unload_all_instances(server: &mut CogServer) -> Vec<Arc<ModuleData>> {
    let mut unloaded = Vec::new();
    for key in server.modules.keys() {
        // Each unload removes two keys.
        if !server.modules.contains(&key) {
            continue;
        }
        if let Ok(data) = unload_instance(server, &key) {
            unloaded.push(data);
        }
    }
    unloaded
}
