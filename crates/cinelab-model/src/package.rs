//! Packages: the unit of storage, import and identity.
//!
//! A [`Package`] is a cheap clonable handle on an open package. It owns the
//! binding to its backend, hands out one live [`Element`] per id, keeps
//! dirty elements alive until they are flushed and resolves id-references
//! across its imports.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use lazy_static::lazy_static;

use crate::backend::sqlite::SqliteUrl;
use crate::backend::{registry, Backend, Binding, ElementData, ElementRow};
use crate::config::ModelConfig;
use crate::consts::DEFAULT_FRAME_OF_REFERENCE;
use crate::content::NewContent;
use crate::element::{
    Annotation, Element, ElementInner, ElementKind, Import, List, Media, PackageElement, Query,
    Relation, Resource, Stream, Tag, TypedElement, View,
};
use crate::error::{BackendError, ModelError, Result};
use crate::events::{EventHub, EventKind, HandlerId, PackageEvent};
use crate::group::{AllGroup, OwnGroup};
use crate::idref;
use crate::meta::{MetaCache, MetaValue};
use crate::rules::{CoreRules, ModelRules};
use crate::serialize;
use crate::sync::{lock, CriticalSection, SectionGuard};

lazy_static! {
    /// Open packages by URL, so imports can share them.
    static ref OPEN_PACKAGES: Mutex<HashMap<String, Weak<PackageInner>>> =
        Mutex::new(HashMap::new());
}

fn register_open(package: &Package) {
    let url = package.url();
    lock(&OPEN_PACKAGES).insert(url, Arc::downgrade(&package.inner));
}

fn unregister_open(url: &str, inner: &Arc<PackageInner>) {
    let mut open = lock(&OPEN_PACKAGES);
    if open
        .get(url)
        .map_or(false, |w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(inner)))
    {
        open.remove(url);
    }
}

fn find_open(url: &str) -> Option<Package> {
    let inner = lock(&OPEN_PACKAGES).get(url).and_then(Weak::upgrade);
    let package = Package::from_inner(inner?);
    if package.is_closed() {
        None
    } else {
        Some(package)
    }
}

/// Canonical form of a package URL, used to recognize already open packages.
pub(crate) fn canonical_url(url: &str) -> String {
    if serialize::is_json_url(url) {
        serialize::json_path(url)
            .and_then(|path| serialize::file_url(&path))
            .unwrap_or_else(|_| url.to_string())
    } else {
        SqliteUrl::parse(url)
            .map(|u| u.package_url())
            .unwrap_or_else(|_| url.to_string())
    }
}

fn release_binding(binding: &Binding, transient: bool) {
    if transient {
        if let Err(e) = binding.backend.delete_package(&binding.package_id) {
            tracing::warn!("could not delete transient package {}: {}", binding.url, e);
        }
    }
    binding.backend.release(&binding.package_id);
}

fn same_backend(a: &Arc<dyn Backend>, b: &Arc<dyn Backend>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// How a package is opened.
#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub readonly: bool,
    pub config: ModelConfig,
    pub rules: Arc<dyn ModelRules>,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            config: ModelConfig::default(),
            rules: Arc::new(CoreRules),
        }
    }
}

impl PackageOptions {
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_rules(mut self, rules: Arc<dyn ModelRules>) -> Self {
        self.rules = rules;
        self
    }
}

/// Options of [`Package::save_as`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Overwrite an existing target
    pub erase: bool,
    /// Rebind the package to the target
    pub change_url: bool,
}

pub(crate) struct PackageInner {
    cs: CriticalSection,
    state: Mutex<PackageState>,
    rules: Arc<dyn ModelRules>,
    config: ModelConfig,
    readonly: bool,
    events: EventHub,
}

struct PackageState {
    /// `None` once closed
    binding: Option<Binding>,
    url: String,
    uri: Option<String>,
    elements: HashMap<String, Weak<ElementInner>>,
    prune_at: usize,
    /// Elements with pending writes, in the order they became dirty
    dirty: Vec<Element>,
    /// Resolved imports by alias; `None` when the import could not be loaded
    imports: BTreeMap<String, Option<Package>>,
    importers: Vec<Weak<PackageInner>>,
    meta: MetaCache,
    transient: bool,
    json_file: Option<PathBuf>,
}

impl Drop for PackageInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(binding) = state.binding.take() else {
            return;
        };
        for element in state.dirty.drain(..) {
            if let Err(e) = element.flush_into(&binding) {
                tracing::warn!("lost changes of element {}: {}", element.id(), e);
            }
        }
        let backend = &binding.backend;
        if let Err(e) = state
            .meta
            .flush(|key, value| backend.set_meta(&binding.package_id, "", key, value))
        {
            tracing::warn!("lost metadata changes of {}: {}", state.url, e);
        }
        release_binding(&binding, state.transient);
        lock(&OPEN_PACKAGES).retain(|_, w| w.strong_count() > 0);
        tracing::debug!("released package {}", state.url);
    }
}

/// Handle on an open package.
#[derive(Clone)]
pub struct Package {
    inner: Arc<PackageInner>,
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package").field("url", &self.url()).finish()
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Package {}

impl Package {
    pub(crate) fn from_inner(inner: Arc<PackageInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn is_inner(&self, weak: &Weak<PackageInner>) -> bool {
        std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&self.inner))
    }

    fn state(&self) -> MutexGuard<'_, PackageState> {
        lock(&self.inner.state)
    }

    fn from_binding(binding: Binding, options: &PackageOptions, transient: bool) -> Self {
        let url = binding.url.clone();
        Self {
            inner: Arc::new(PackageInner {
                cs: CriticalSection::new(),
                state: Mutex::new(PackageState {
                    binding: Some(binding),
                    url,
                    uri: None,
                    elements: HashMap::new(),
                    prune_at: 64,
                    dirty: Vec::new(),
                    imports: BTreeMap::new(),
                    importers: Vec::new(),
                    meta: MetaCache::default(),
                    transient,
                    json_file: None,
                }),
                rules: Arc::clone(&options.rules),
                config: options.config.clone(),
                readonly: options.readonly,
                events: EventHub::default(),
            }),
        }
    }

    // Lifecycle

    /// Create a new package with the core rules.
    pub fn create(url: &str) -> Result<Self> {
        Self::create_with(url, PackageOptions::default())
    }

    /// Create a new package. JSON targets are created in memory and written
    /// by [`Package::save`].
    pub fn create_with(url: &str, options: PackageOptions) -> Result<Self> {
        let package = if serialize::is_json_url(url) {
            let path = serialize::json_path(url)?;
            if path.exists() {
                return Err(ModelError::AlreadyExists(path.display().to_string()));
            }
            let package = Self::new_transient(&options)?;
            package.attach_json_file(path)?;
            package
        } else {
            let binding = registry().create(url, &options.config.storage)?;
            let package = Self::from_binding(binding, &options, false);
            register_open(&package);
            package
        };
        package.inner.rules.package_created(&package)?;
        tracing::info!("created package {}", package.url());
        Ok(package)
    }

    /// Open an existing package with the core rules.
    pub fn open(url: &str) -> Result<Self> {
        Self::open_with(url, PackageOptions::default())
    }

    /// Open an existing package and load its imports. Imports that can not
    /// be opened are left unresolved.
    pub fn open_with(url: &str, options: PackageOptions) -> Result<Self> {
        let mut opening = Vec::new();
        Self::open_inner(url, &options, &mut opening)
    }

    pub fn open_or_create(url: &str) -> Result<Self> {
        Self::open_or_create_with(url, PackageOptions::default())
    }

    pub fn open_or_create_with(url: &str, options: PackageOptions) -> Result<Self> {
        match Self::open_with(url, options.clone()) {
            Err(e) if e.is_not_found() => Self::create_with(url, options),
            other => other,
        }
    }

    /// An in-memory package, deleted when closed.
    pub fn transient() -> Result<Self> {
        Self::transient_with(PackageOptions::default())
    }

    pub fn transient_with(options: PackageOptions) -> Result<Self> {
        let package = Self::new_transient(&options)?;
        package.inner.rules.package_created(&package)?;
        Ok(package)
    }

    fn new_transient(options: &PackageOptions) -> Result<Self> {
        let url = format!("sqlite::memory:;transient-{}", uuid::Uuid::new_v4().simple());
        let binding = registry().create(&url, &options.config.storage)?;
        let package = Self::from_binding(binding, options, true);
        register_open(&package);
        Ok(package)
    }

    fn open_inner(url: &str, options: &PackageOptions, opening: &mut Vec<String>) -> Result<Self> {
        let canonical = canonical_url(url);
        if opening.contains(&canonical) {
            return Err(ModelError::ImportCycle(canonical));
        }
        opening.push(canonical);
        let result = Self::load(url, options).map(|package| {
            package.load_imports(options, opening);
            package
        });
        opening.pop();
        result
    }

    fn load(url: &str, options: &PackageOptions) -> Result<Self> {
        if serialize::is_json_url(url) {
            let path = serialize::json_path(url)?;
            if !path.exists() {
                return Err(BackendError::NoSuchPackage(url.to_string()).into());
            }
            let dump = serialize::read_json(&path)?;
            let package = Self::new_transient(options)?;
            serialize::load(&package.binding()?, &dump)?;
            package.attach_json_file(path)?;
            tracing::info!("loaded package {}", package.url());
            Ok(package)
        } else {
            let binding = registry().open(url, &options.config.storage)?;
            let package = Self::from_binding(binding, options, false);
            register_open(&package);
            tracing::info!("opened package {}", package.url());
            Ok(package)
        }
    }

    fn attach_json_file(&self, path: PathBuf) -> Result<()> {
        let url = serialize::file_url(&path)?;
        let old = {
            let mut state = self.state();
            state.json_file = Some(path);
            std::mem::replace(&mut state.url, url)
        };
        unregister_open(&old, &self.inner);
        register_open(self);
        Ok(())
    }

    fn load_imports(&self, options: &PackageOptions, opening: &mut Vec<String>) {
        let rows = match self.binding().and_then(|b| {
            Ok(b.backend
                .iter_elements(&[b.package_id.as_str()], Some(ElementKind::Import))?)
        }) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("could not list imports of {}: {}", self.url(), e);
                return;
            }
        };
        for row in rows {
            let ElementData::Import { url, .. } = &row.data else {
                continue;
            };
            let canonical = canonical_url(url);
            let cyclic = opening.contains(&canonical)
                || find_open(&canonical).map_or(false, |p| p == *self || p.reaches(self));
            if cyclic {
                tracing::warn!("import {} of {} left unresolved: import cycle", row.id, self.url());
                self.state().imports.insert(row.id.clone(), None);
                continue;
            }
            let imported = match find_open(&canonical) {
                Some(package) => Some(package),
                None => match Self::open_inner(url, options, opening) {
                    Ok(package) => Some(package),
                    Err(e) => {
                        tracing::warn!("import {} of {} left unresolved: {}", row.id, self.url(), e);
                        None
                    }
                },
            };
            if let Some(package) = &imported {
                package.add_importer(self);
            }
            self.state().imports.insert(row.id.clone(), imported);
        }
    }

    /// Flush, then unbind from the backend. Transient packages are deleted.
    pub fn close(&self) -> Result<()> {
        let _cs = self.enter();
        if self.is_closed() {
            return Err(ModelError::PackageClosed);
        }
        if let Some(importer) = self.live_importer() {
            return Err(ModelError::ImportedBy {
                package: self.url(),
                importer: importer.url(),
            });
        }
        self.flush()?;
        let uri = self.uri().unwrap_or_default();
        let (binding, transient, imports, url) = {
            let mut state = self.state();
            state.elements.clear();
            state.dirty.clear();
            state.meta.clear();
            (
                state.binding.take(),
                state.transient,
                std::mem::take(&mut state.imports),
                state.url.clone(),
            )
        };
        for imported in imports.into_values().flatten() {
            imported.forget_importer(self);
        }
        if let Some(binding) = binding {
            release_binding(&binding, transient);
        }
        unregister_open(&url, &self.inner);
        tracing::info!("closed package {}", url);
        self.emit(PackageEvent::Closed { url, uri });
        Ok(())
    }

    /// Flush, and rewrite the JSON file the package was loaded from.
    pub fn save(&self) -> Result<()> {
        let _cs = self.enter();
        self.flush()?;
        let json_file = self.state().json_file.clone();
        if let Some(path) = json_file {
            if self.inner.readonly {
                return Err(ModelError::ReadOnly(self.url()));
            }
            let dump = serialize::dump(&self.binding()?)?;
            serialize::write_json(&path, &dump)?;
            tracing::info!("saved package to {}", path.display());
        }
        Ok(())
    }

    /// Copy the package to another SQLite package or to a JSON file.
    pub fn save_as(&self, target: &str, options: SaveOptions) -> Result<()> {
        let _cs = self.enter();
        self.flush()?;
        let dump = serialize::dump(&self.binding()?)?;
        let config = &self.inner.config.storage;

        if serialize::is_json_url(target) {
            let path = serialize::json_path(target)?;
            if path.exists() && !options.erase {
                return Err(ModelError::AlreadyExists(path.display().to_string()));
            }
            serialize::write_json(&path, &dump)?;
            tracing::info!("saved package {} to {}", self.url(), path.display());
            if options.change_url {
                let url = format!("sqlite::memory:;transient-{}", uuid::Uuid::new_v4().simple());
                let binding = registry().create(&url, config)?;
                serialize::load(&binding, &dump)?;
                self.rebind(binding, true);
                self.attach_json_file(path)?;
                self.record_url_in_importers()?;
            }
            return Ok(());
        }

        let binding = match registry().create(target, config) {
            Ok(binding) => binding,
            Err(ModelError::Backend(BackendError::PackageInUse(_))) if options.erase => {
                let binding = registry().open(target, config)?;
                binding.backend.clear_package(&binding.package_id)?;
                binding
            }
            Err(ModelError::Backend(BackendError::PackageInUse(url))) => {
                return Err(ModelError::AlreadyExists(url));
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = serialize::load(&binding, &dump) {
            binding.backend.release(&binding.package_id);
            return Err(e);
        }
        tracing::info!("saved package {} to {}", self.url(), binding.url);
        if options.change_url {
            self.rebind(binding, false);
            self.record_url_in_importers()?;
        } else {
            binding.backend.release(&binding.package_id);
        }
        Ok(())
    }

    fn rebind(&self, binding: Binding, transient: bool) {
        let url = binding.url.clone();
        let (old, was_transient, old_url) = {
            let mut state = self.state();
            let old = state.binding.replace(binding);
            let was_transient = std::mem::replace(&mut state.transient, transient);
            state.json_file = None;
            let old_url = std::mem::replace(&mut state.url, url);
            (old, was_transient, old_url)
        };
        if let Some(old) = old {
            release_binding(&old, was_transient);
        }
        unregister_open(&old_url, &self.inner);
        register_open(self);
    }

    /// Point the Import elements of open importers at the current URL.
    fn record_url_in_importers(&self) -> Result<()> {
        let url = self.url();
        for importer in self.importers() {
            if importer.inner.readonly {
                continue;
            }
            for alias in importer.aliases_of(self) {
                importer.get::<Import>(&alias)?.record_url(&url)?;
            }
        }
        Ok(())
    }

    // Properties

    pub fn url(&self) -> String {
        self.state().url.clone()
    }

    /// The package URI, empty if unset.
    pub fn uri(&self) -> Result<String> {
        let _cs = self.enter();
        if let Some(uri) = self.state().uri.clone() {
            return Ok(uri);
        }
        let binding = self.binding()?;
        let uri = binding.backend.get_uri(&binding.package_id)?;
        self.state().uri = Some(uri.clone());
        Ok(uri)
    }

    /// Set the URI. Import elements of open importers are updated too.
    pub fn set_uri(&self, uri: &str) -> Result<()> {
        let _cs = self.enter();
        self.check_writable()?;
        let binding = self.binding()?;
        binding.backend.update_uri(&binding.package_id, uri)?;
        self.state().uri = Some(uri.to_string());
        for importer in self.importers() {
            if importer.inner.readonly {
                continue;
            }
            for alias in importer.aliases_of(self) {
                importer.get::<Import>(&alias)?.record_uri(uri)?;
            }
        }
        Ok(())
    }

    /// The URI if set, else the URL. Base of element uri-references.
    pub fn base_uri(&self) -> String {
        match self.uri() {
            Ok(uri) if !uri.is_empty() => uri,
            _ => self.url(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state().binding.is_none()
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.readonly
    }

    pub fn is_transient(&self) -> bool {
        self.state().transient
    }

    pub fn rules(&self) -> Arc<dyn ModelRules> {
        Arc::clone(&self.inner.rules)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    /// Enter the package critical section until the guard is dropped.
    pub fn enter(&self) -> SectionGuard<'_> {
        self.inner.cs.enter()
    }

    /// Run `f` inside the package critical section.
    pub fn synchronized<R>(&self, f: impl FnOnce(&Package) -> R) -> R {
        let _cs = self.enter();
        f(self)
    }

    // Events

    /// Call `handler` for every event of `kind` raised by this package or
    /// its elements.
    pub fn connect(
        &self,
        kind: EventKind,
        handler: impl Fn(&PackageEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.events.connect(kind, Arc::new(handler))
    }

    /// Returns `false` if the handler was not connected.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        self.inner.events.disconnect(id)
    }

    pub fn has_handler(&self, id: HandlerId) -> bool {
        self.inner.events.has_handler(id)
    }

    /// Skip the handler until [`Package::unblock_handler`].
    pub fn block_handler(&self, id: HandlerId) -> bool {
        self.inner.events.set_blocked(id, true)
    }

    pub fn unblock_handler(&self, id: HandlerId) -> bool {
        self.inner.events.set_blocked(id, false)
    }

    pub(crate) fn emit(&self, event: PackageEvent) {
        self.inner.events.emit(&event);
    }

    pub(crate) fn binding(&self) -> Result<Binding> {
        self.state().binding.clone().ok_or(ModelError::PackageClosed)
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.is_closed() {
            Err(ModelError::PackageClosed)
        } else if self.inner.readonly {
            Err(ModelError::ReadOnly(self.url()))
        } else {
            Ok(())
        }
    }

    // Imports

    /// Aliases and resolved packages of every import.
    pub fn imports(&self) -> Vec<(String, Option<Package>)> {
        self.state()
            .imports
            .iter()
            .map(|(alias, package)| (alias.clone(), package.clone()))
            .collect()
    }

    pub(crate) fn imported(&self, alias: &str) -> Option<Package> {
        self.state().imports.get(alias).cloned().flatten()
    }

    fn aliases_of(&self, package: &Package) -> Vec<String> {
        self.state()
            .imports
            .iter()
            .filter(|(_, p)| p.as_ref() == Some(package))
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    fn add_importer(&self, importer: &Package) {
        let mut state = self.state();
        state.importers.retain(|w| w.strong_count() > 0);
        if !state.importers.iter().any(|w| importer.is_inner(w)) {
            state.importers.push(Arc::downgrade(&importer.inner));
        }
    }

    fn forget_importer(&self, importer: &Package) {
        self.state().importers.retain(|w| !importer.is_inner(w));
    }

    /// Open packages currently importing this one.
    pub fn importers(&self) -> Vec<Package> {
        let importers: Vec<_> = self.state().importers.iter().filter_map(Weak::upgrade).collect();
        importers
            .into_iter()
            .map(Package::from_inner)
            .filter(|p| !p.is_closed() && !p.aliases_of(self).is_empty())
            .collect()
    }

    fn live_importer(&self) -> Option<Package> {
        self.importers().into_iter().next()
    }

    /// Every package reachable through imports, this one first.
    pub fn reachable(&self) -> Vec<Package> {
        let mut seen: Vec<Package> = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(package) = stack.pop() {
            if package.is_closed() || seen.contains(&package) {
                continue;
            }
            let imports = package.imports();
            for (_, imported) in imports.into_iter().rev() {
                stack.extend(imported);
            }
            seen.push(package);
        }
        seen
    }

    fn reaches(&self, other: &Package) -> bool {
        self.reachable().contains(other)
    }

    /// Shortest id-reference from this package to element `id` of `owner`.
    pub fn make_id_for(&self, owner: &Package, id: &str) -> Result<String> {
        let mut queue = VecDeque::from([(self.clone(), Vec::<String>::new())]);
        let mut seen: Vec<Package> = Vec::new();
        while let Some((package, path)) = queue.pop_front() {
            if &package == owner {
                return Ok(idref::join(&path, id));
            }
            if seen.contains(&package) {
                continue;
            }
            for (alias, imported) in package.imports() {
                if let Some(imported) = imported {
                    let mut next = path.clone();
                    next.push(alias);
                    queue.push_back((imported, next));
                }
            }
            seen.push(package);
        }
        Err(ModelError::UnreachableReference {
            element: idref::uriref(&owner.base_uri(), id),
            package: self.url(),
        })
    }

    /// The package owning the element an id-reference designates, and its
    /// local id.
    pub(crate) fn resolve_target(&self, idref: &str) -> Result<(Package, String)> {
        let mut package = self.clone();
        let mut rest = idref;
        loop {
            match idref::split_first(rest) {
                (Some(alias), tail) => {
                    package = package.imported(alias).ok_or_else(|| ModelError::UnreachableImport {
                        alias: alias.to_string(),
                        package: package.url(),
                    })?;
                    rest = tail;
                }
                (None, id) => return Ok((package, id.to_string())),
            }
        }
    }

    // Elements

    pub(crate) fn instantiate(&self, row: ElementRow) -> Element {
        let mut state = self.state();
        if let Some(inner) = state.elements.get(&row.id).and_then(Weak::upgrade) {
            return Element::from_inner(inner);
        }
        if state.elements.len() >= state.prune_at {
            state.elements.retain(|_, w| w.strong_count() > 0);
            state.prune_at = (state.elements.len() * 2).max(64);
        }
        let element = Element::new(&self.inner, row.id.clone(), row.data, None);
        state.elements.insert(row.id, element.downgrade());
        element
    }

    fn own_element(&self, id: &str) -> Result<Option<Element>> {
        let _cs = self.enter();
        let cached = self.state().elements.get(id).and_then(Weak::upgrade);
        if let Some(inner) = cached {
            return Ok(Some(Element::from_inner(inner)));
        }
        let binding = self.binding()?;
        Ok(binding
            .backend
            .get_element(&binding.package_id, id)?
            .map(|row| self.instantiate(row)))
    }

    /// The element an id-reference designates, or `None` if absent.
    pub fn get_element_opt(&self, idref: &str) -> Result<Option<Element>> {
        let (owner, id) = self.resolve_target(idref)?;
        owner.own_element(&id)
    }

    pub fn get_element(&self, idref: &str) -> Result<Element> {
        self.get_element_opt(idref)?
            .ok_or_else(|| ModelError::NoSuchElement(idref.to_string()))
    }

    /// Typed lookup; fails with `WrongElementType` on a kind mismatch.
    pub fn get<T: TypedElement>(&self, idref: &str) -> Result<T> {
        self.get_element(idref)?.downcast()
    }

    /// Whether this package owns an element with the given id.
    pub fn has_element(&self, id: &str) -> Result<bool> {
        let binding = self.binding()?;
        Ok(binding.backend.has_element(&binding.package_id, id)?.is_some())
    }

    fn create_element(&self, id: &str, data: ElementData, content: Option<crate::content::Content>) -> Result<Element> {
        let _cs = self.enter();
        self.check_writable()?;
        idref::validate_id(id)?;
        let binding = self.binding()?;
        if binding.backend.has_element(&binding.package_id, id)?.is_some() {
            return Err(ModelError::DuplicateId(id.to_string()));
        }
        binding
            .backend
            .create_element(&binding.package_id, id, &data, content.as_ref())
            .map_err(|e| match e {
                BackendError::DuplicateId { id, .. } => ModelError::DuplicateId(id),
                e => e.into(),
            })?;
        let element = self.instantiate(ElementRow {
            package: binding.package_id.clone(),
            id: id.to_string(),
            data,
        });
        element.state().content = content;
        self.inner.rules.element_created(self, &element)?;
        Ok(element)
    }

    fn content_row(&self, content: Option<NewContent>) -> Result<crate::content::Content> {
        content.unwrap_or_default().to_row(self)
    }

    pub fn create_media(&self, id: &str, url: &str, frame_of_reference: Option<&str>) -> Result<Media> {
        let data = ElementData::Media {
            url: url.to_string(),
            frame_of_reference: frame_of_reference
                .unwrap_or(DEFAULT_FRAME_OF_REFERENCE)
                .to_string(),
        };
        self.announce(self.create_element(id, data, None)?)
    }

    /// The media must be reachable from this package.
    pub fn create_annotation(
        &self,
        id: &str,
        media: &Media,
        begin: i64,
        end: i64,
        content: Option<NewContent>,
    ) -> Result<Annotation> {
        let media = media.make_idref_for(self)?;
        let content = self.content_row(content)?;
        let data = ElementData::Annotation { media, begin, end };
        self.announce(self.create_element(id, data, Some(content))?)
    }

    pub fn create_relation(
        &self,
        id: &str,
        members: &[Annotation],
        content: Option<NewContent>,
    ) -> Result<Relation> {
        let members = members
            .iter()
            .map(|m| m.make_idref_for(self))
            .collect::<Result<Vec<_>>>()?;
        let content = self.content_row(content)?;
        let relation = self.create_element(id, ElementData::Relation, Some(content))?;
        self.insert_items(&relation, &members)?;
        self.announce(relation)
    }

    pub fn create_tag(&self, id: &str) -> Result<Tag> {
        self.announce(self.create_element(id, ElementData::Tag, None)?)
    }

    pub fn create_list(&self, id: &str, items: &[Element]) -> Result<List> {
        let items = items
            .iter()
            .map(|i| i.make_idref_for(self))
            .collect::<Result<Vec<_>>>()?;
        let list = self.create_element(id, ElementData::List, None)?;
        self.insert_items(&list, &items)?;
        self.announce(list)
    }

    /// Notify handlers of a finished creation.
    fn announce<T: TypedElement>(&self, element: Element) -> Result<T> {
        self.emit(PackageEvent::Created(element.clone()));
        element.downcast()
    }

    fn insert_items(&self, owner: &Element, items: &[String]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let binding = self.binding()?;
        for (position, item) in items.iter().enumerate() {
            binding
                .backend
                .insert_item(&binding.package_id, owner.id(), position, item)?;
        }
        Ok(())
    }

    pub fn create_view(&self, id: &str, content: Option<NewContent>) -> Result<View> {
        let content = self.content_row(content)?;
        self.announce(self.create_element(id, ElementData::View, Some(content))?)
    }

    pub fn create_query(&self, id: &str, content: Option<NewContent>) -> Result<Query> {
        let content = self.content_row(content)?;
        self.announce(self.create_element(id, ElementData::Query, Some(content))?)
    }

    pub fn create_resource(&self, id: &str, content: Option<NewContent>) -> Result<Resource> {
        let content = self.content_row(content)?;
        self.announce(self.create_element(id, ElementData::Resource, Some(content))?)
    }

    pub fn create_stream(&self, id: &str, url: &str) -> Result<Stream> {
        let data = ElementData::Stream {
            url: url.to_string(),
        };
        self.announce(self.create_element(id, data, None)?)
    }

    /// Import `package` under `alias`. Imports must form a DAG and a package
    /// can be imported only once.
    pub fn create_import(&self, alias: &str, package: &Package) -> Result<Import> {
        let _cs = self.enter();
        if package == self || package.reaches(self) {
            return Err(ModelError::ImportCycle(package.url()));
        }
        let url = package.url();
        let binding = self.binding()?;
        let already = binding
            .backend
            .iter_elements(&[binding.package_id.as_str()], Some(ElementKind::Import))?
            .into_iter()
            .any(|row| matches!(&row.data, ElementData::Import { url: u, .. } if canonical_url(u) == url));
        if already {
            return Err(ModelError::DuplicateImport(url));
        }
        let data = ElementData::Import {
            url,
            uri: package.uri()?,
        };
        let import = self.create_element(alias, data, None)?;
        self.state()
            .imports
            .insert(alias.to_string(), Some(package.clone()));
        package.add_importer(self);
        self.announce(import)
    }

    /// Delete an element of this package. Fails with `ElementInUse` while
    /// another element of this package references it.
    pub fn delete_element(&self, id: &str) -> Result<()> {
        let _cs = self.enter();
        self.check_writable()?;
        self.flush()?;
        let binding = self.binding()?;
        let kind = binding
            .backend
            .has_element(&binding.package_id, id)?
            .ok_or_else(|| ModelError::NoSuchElement(id.to_string()))?;
        if binding.backend.count_references(&binding.package_id, id)? > 0 {
            return Err(ModelError::ElementInUse(id.to_string()));
        }
        binding.backend.delete_element(&binding.package_id, id)?;

        let (cached, imported) = {
            let mut state = self.state();
            let cached = state.elements.remove(id).and_then(|w| w.upgrade());
            let imported = match kind {
                ElementKind::Import => state.imports.remove(id).flatten(),
                _ => None,
            };
            (cached, imported)
        };
        if let Some(inner) = cached {
            let element = Element::from_inner(inner);
            let mut state = element.state();
            state.deleted = true;
            state.dirty.discard();
        }
        if let Some(imported) = imported {
            if imported.aliases_of(self).is_empty() {
                imported.forget_importer(self);
            }
        }
        self.emit(PackageEvent::Deleted {
            id: id.to_string(),
            kind,
        });
        Ok(())
    }

    // Tags

    /// Declare that `element` is tagged with `tag`. Both must be reachable.
    pub fn associate_tag(&self, element: &impl PackageElement, tag: &Tag) -> Result<()> {
        let _cs = self.enter();
        self.check_writable()?;
        let element = element.make_idref_for(self)?;
        let tag = tag.make_idref_for(self)?;
        let binding = self.binding()?;
        Ok(binding
            .backend
            .associate_tag(&binding.package_id, &element, &tag)?)
    }

    pub fn dissociate_tag(&self, element: &impl PackageElement, tag: &Tag) -> Result<()> {
        let _cs = self.enter();
        self.check_writable()?;
        let element = element.make_idref_for(self)?;
        let tag = tag.make_idref_for(self)?;
        let binding = self.binding()?;
        Ok(binding
            .backend
            .dissociate_tag(&binding.package_id, &element, &tag)?)
    }

    /// Open packages sharing a backend, with their package ids.
    pub(crate) fn by_backend(packages: &[Package]) -> Result<Vec<(Arc<dyn Backend>, Vec<(String, Package)>)>> {
        let mut groups: Vec<(Arc<dyn Backend>, Vec<(String, Package)>)> = Vec::new();
        for package in packages {
            let binding = package.binding()?;
            match groups.iter_mut().find(|(b, _)| same_backend(b, &binding.backend)) {
                Some((_, members)) => members.push((binding.package_id, package.clone())),
                None => groups.push((binding.backend, vec![(binding.package_id, package.clone())])),
            }
        }
        Ok(groups)
    }

    fn scope(&self, inherited: bool) -> Vec<Package> {
        if inherited {
            self.reachable()
        } else {
            vec![self.clone()]
        }
    }

    /// Run a tag association query in every package of the scope and
    /// rewrite the results relative to this package.
    fn tag_query(&self, subject: &Element, inherited: bool, by_tag: bool) -> Result<Vec<String>> {
        let _cs = self.enter();
        let mut found = Vec::new();
        for (backend, members) in Self::by_backend(&self.scope(inherited))? {
            let mut pairs = Vec::new();
            for (package_id, package) in &members {
                match subject.make_idref_for(package) {
                    Ok(idref) => pairs.push((package_id.clone(), idref)),
                    Err(ModelError::UnreachableReference { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            if pairs.is_empty() {
                continue;
            }
            let rows = if by_tag {
                backend.iter_elements_with_tag(&pairs)?
            } else {
                backend.iter_tags_with_element(&pairs)?
            };
            for (package_id, other) in rows {
                let Some((_, package)) = members.iter().find(|(id, _)| *id == package_id) else {
                    continue;
                };
                let (owner, id) = match package.resolve_target(&other) {
                    Ok(target) => target,
                    Err(ModelError::UnreachableImport { .. }) => {
                        tracing::debug!("skipping unresolved tagging {} in {}", other, package.url());
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let idref = self.make_id_for(&owner, &id)?;
                if !found.contains(&idref) {
                    found.push(idref);
                }
            }
        }
        Ok(found)
    }

    pub(crate) fn element_ids_with_tag(&self, tag: &Tag, inherited: bool) -> Result<Vec<String>> {
        self.tag_query(tag.element(), inherited, true)
    }

    pub(crate) fn tag_ids_of(&self, element: &Element, inherited: bool) -> Result<Vec<String>> {
        self.tag_query(element, inherited, false)
    }

    // Groups

    /// Elements owned by this package.
    pub fn own(&self) -> OwnGroup {
        OwnGroup::new(self.clone())
    }

    /// Elements of this package and of every package it imports.
    pub fn all(&self) -> AllGroup {
        AllGroup::new(self.clone())
    }

    // Metadata

    pub fn get_meta(&self, key: &str) -> Result<Option<MetaValue>> {
        let _cs = self.enter();
        if let Some(value) = self.state().meta.cached(key).cloned() {
            return Ok(value);
        }
        let binding = self.binding()?;
        let value = binding.backend.get_meta(&binding.package_id, "", key)?;
        self.state().meta.remember(key, value.clone());
        Ok(value)
    }

    pub fn get_meta_text(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_meta(key)?
            .and_then(|v| v.as_text().map(str::to_string)))
    }

    pub fn get_meta_element(&self, key: &str) -> Result<Option<Element>> {
        match self.get_meta(key)? {
            Some(MetaValue::IdRef(idref)) => self.get_element_opt(&idref),
            _ => Ok(None),
        }
    }

    pub(crate) fn write_meta(&self, key: &str, value: Option<MetaValue>) -> Result<()> {
        let _cs = self.enter();
        self.check_writable()?;
        self.state().meta.set(key, value.clone());
        if self.inner.config.write_back.instant {
            self.flush()?;
        }
        self.emit(PackageEvent::ChangedMeta {
            element: None,
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    pub fn set_meta(&self, key: &str, value: impl Into<MetaValue>) -> Result<()> {
        self.write_meta(key, Some(value.into()))
    }

    pub fn set_meta_element(&self, key: &str, target: &impl PackageElement) -> Result<()> {
        let idref = target.make_idref_for(self)?;
        self.write_meta(key, Some(MetaValue::IdRef(idref)))
    }

    pub fn del_meta(&self, key: &str) -> Result<()> {
        self.write_meta(key, None)
    }

    pub fn iter_meta(&self) -> Result<Vec<(String, MetaValue)>> {
        let _cs = self.enter();
        let binding = self.binding()?;
        let stored = binding.backend.iter_meta(&binding.package_id, "")?;
        Ok(self.state().meta.overlay(stored))
    }

    // Dirty elements

    /// Keep `element` until its pending writes are flushed.
    pub(crate) fn note_dirty(&self, element: &Element) -> Result<()> {
        if element.is_dirty() {
            let mut state = self.state();
            if !state.dirty.contains(element) {
                state.dirty.push(element.clone());
            }
        }
        if self.inner.config.write_back.instant {
            self.flush_element(element)?;
        }
        Ok(())
    }

    pub(crate) fn flush_element(&self, element: &Element) -> Result<()> {
        let binding = self.binding()?;
        let result = element.flush_into(&binding);
        if !element.is_dirty() {
            self.state().dirty.retain(|e| e != element);
        }
        result
    }

    pub fn is_dirty(&self) -> bool {
        let state = self.state();
        !state.dirty.is_empty() || state.meta.is_dirty()
    }

    /// Write every pending change. Every element is attempted; failed
    /// operations stay pending and the first error is returned.
    pub fn flush(&self) -> Result<()> {
        let _cs = self.enter();
        let binding = self.binding()?;
        let dirty = self.state().dirty.clone();
        let mut first_error = None;
        for element in &dirty {
            if let Err(e) = self.flush_element(element) {
                first_error.get_or_insert(e);
            }
        }
        let backend = &binding.backend;
        let meta_result = self
            .state()
            .meta
            .flush(|key, value| backend.set_meta(&binding.package_id, "", key, value));
        if let Err(e) = meta_result {
            tracing::warn!("package metadata flush failed: {}", e);
            first_error.get_or_insert(e.into());
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
