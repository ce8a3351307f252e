//! Handler loading and lifecycle capability discovery.
//!
//! A handler is a Rhai script. Loading reads and compiles the script, runs its
//! top-level statements once as initialisation, and then inspects the compiled
//! functions to learn which lifecycle entry points it implements. Variables
//! left in scope by the top-level code become the handler's state map, which is
//! bound as `this` for every lifecycle call:
//!
//! ```text
//! let total = 0.0;
//!
//! fn on_receive(data) {
//!     this.total += parse_float(data.amount);
//!     #{ total: this.total }
//! }
//! ```
//!
//! Scripts may `import` sibling modules; module paths resolve against the
//! handler's directory. Rhai functions cannot see top-level imports, so an
//! entry point that needs a module imports it in its own body.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rhai::module_resolvers::FileModuleResolver;
use rhai::{AST, CallFnOptions, Dynamic, Engine, Position, Scope};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::LoadError;
use crate::executor::CallFailure;
use crate::interceptor;
use crate::protocol::{Lifecycle, Payload};
use crate::traceback::{EntryPoint, TracebackFilter, root_cause};

/// Tracing target for handler loading and invocation.
const LOADER_TARGET: &str = "lifecycle_host::loader";

/// Set of lifecycle entry points a handler implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    create: bool,
    receive: bool,
    destroy: bool,
}

impl Capabilities {
    /// Returns the set extended with `lifecycle`.
    #[must_use]
    pub const fn with(mut self, lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Create => self.create = true,
            Lifecycle::Receive => self.receive = true,
            Lifecycle::Destroy => self.destroy = true,
        }
        self
    }

    /// Whether `lifecycle` is implemented.
    #[must_use]
    pub const fn contains(self, lifecycle: Lifecycle) -> bool {
        match lifecycle {
            Lifecycle::Create => self.create,
            Lifecycle::Receive => self.receive,
            Lifecycle::Destroy => self.destroy,
        }
    }

    /// Whether no entry point is implemented.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !(self.create || self.receive || self.destroy)
    }
}

impl FromIterator<Lifecycle> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Lifecycle>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), Self::with)
    }
}

/// A loaded handler able to serve lifecycle calls.
pub trait LifecycleHandler: Send + Sync {
    /// Entry points the handler implements.
    fn capabilities(&self) -> Capabilities;

    /// Invokes the entry point for `lifecycle`.
    ///
    /// `payload` is ignored for entry points that take no argument. Returns
    /// `None` when the handler returned nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`CallFailure`] if the handler raises an error or returns a
    /// value that cannot be represented as JSON.
    fn invoke(
        &self,
        lifecycle: Lifecycle,
        payload: Option<Payload>,
    ) -> Result<Option<Value>, CallFailure>;
}

/// Source of the process's handler.
///
/// The dispatcher calls [`HandlerLoader::load`] from a call thread and keeps
/// the handler, or a failure that is not [retryable](LoadError::is_retryable),
/// for the rest of the process.
pub trait HandlerLoader {
    /// Loads the handler, running its initialisation.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the handler cannot be found, read, compiled
    /// or initialised.
    fn load(&self) -> Result<Arc<dyn LifecycleHandler>, LoadError>;
}

/// Loads a Rhai handler script from a fixed path.
#[derive(Debug, Clone)]
pub struct ScriptLoader {
    path: PathBuf,
}

impl ScriptLoader {
    /// Creates a loader for the script at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Script path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and initialises the script at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] when `path` is not a regular file, and
    /// the other [`LoadError`] variants when reading, compiling or running
    /// the top-level code fails.
    pub fn load_path(path: &Path) -> Result<ScriptHandler, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let script = fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let engine = build_engine(module_dir(path));
        let source = path.display().to_string();
        let mut ast = engine
            .compile(&script)
            .map_err(|error| LoadError::Compile {
                path: path.to_path_buf(),
                message: error.to_string(),
            })?;
        ast.set_source(source.as_str());
        let filter = TracebackFilter::new(source, &script);

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|error| LoadError::Initialise {
                path: path.to_path_buf(),
                message: root_cause(&error).to_string(),
                traceback: filter.filter(&error, EntryPoint::Initialisation),
            })?;

        let capabilities = discover_capabilities(&ast);
        let state = seed_state(&scope);
        info!(
            target: LOADER_TARGET,
            handler = %path.display(),
            ?capabilities,
            "handler loaded"
        );

        Ok(ScriptHandler {
            engine,
            ast,
            filter,
            capabilities,
            state: Mutex::new(state),
        })
    }
}

impl HandlerLoader for ScriptLoader {
    fn load(&self) -> Result<Arc<dyn LifecycleHandler>, LoadError> {
        Self::load_path(&self.path).map(|handler| Arc::new(handler) as Arc<dyn LifecycleHandler>)
    }
}

/// A compiled and initialised handler script.
///
/// The state map is copied out at the start of each call and written back
/// when the call returns. A call abandoned after its deadline therefore keeps
/// working on its own copy and overwrites the shared state if it finishes
/// later.
pub struct ScriptHandler {
    engine: Engine,
    ast: AST,
    filter: TracebackFilter,
    capabilities: Capabilities,
    state: Mutex<Dynamic>,
}

impl ScriptHandler {
    /// Copy of the current state map.
    #[must_use]
    pub fn state_snapshot(&self) -> Dynamic {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit(&self, state: Dynamic) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl fmt::Debug for ScriptHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandler")
            .field("source", &self.filter.source())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl LifecycleHandler for ScriptHandler {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn invoke(
        &self,
        lifecycle: Lifecycle,
        payload: Option<Payload>,
    ) -> Result<Option<Value>, CallFailure> {
        let mut this = self.state_snapshot();
        let mut scope = Scope::new();
        let name = lifecycle.function_name();
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut this);

        let returned = if lifecycle.takes_payload() {
            let argument = payload_to_dynamic(payload)?;
            self.engine
                .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, name, (argument,))
        } else {
            self.engine
                .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, name, ())
        };
        self.commit(this);

        let value = returned.map_err(|error| self.filter.failure(&error, name))?;
        dynamic_to_value(&value)
    }
}

fn build_engine(modules: &Path) -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(FileModuleResolver::new_with_path(modules));
    engine.on_print(interceptor::emit);
    engine.on_debug(|text, source, position: Position| {
        debug!(
            target: LOADER_TARGET,
            source = source.unwrap_or_default(),
            ?position,
            text,
            "handler debug output"
        );
    });
    engine
}

fn module_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn discover_capabilities(ast: &AST) -> Capabilities {
    ast.iter_functions()
        .filter_map(|function| {
            Lifecycle::ALL.into_iter().find(|lifecycle| {
                lifecycle.function_name() == function.name
                    && lifecycle.arity() == function.params.len()
            })
        })
        .collect()
}

fn seed_state(scope: &Scope) -> Dynamic {
    let state: rhai::Map = scope
        .iter()
        .map(|(name, _, value)| (name.into(), value))
        .collect();
    Dynamic::from_map(state)
}

fn payload_to_dynamic(payload: Option<Payload>) -> Result<Dynamic, CallFailure> {
    payload.map_or(Ok(Dynamic::UNIT), |map| {
        rhai::serde::to_dynamic(map)
            .map_err(|error| CallFailure::new(format!("failed to convert payload: {error}")))
    })
}

fn dynamic_to_value(value: &Dynamic) -> Result<Option<Value>, CallFailure> {
    if value.is_unit() {
        return Ok(None);
    }
    rhai::serde::from_dynamic::<Value>(value)
        .map(Some)
        .map_err(|error| CallFailure::new(format!("handler returned an unsupported value: {error}")))
}
