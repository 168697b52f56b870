//! CRUD module assembly.
//!
//! A [`CrudModule`] bundles what a store needs to host one REST resource: the
//! action table, the slice reducer, the initial slice and the task map.

use crate::call::TaskApi;
use crate::crud::{CrudReducer, CrudState, SliceFn};
use crate::resource::{ResourcePaths, ResourceTaskSet};
use crud_saga_core::action::Action;
use crud_saga_core::composition::{SliceReducer, Slices, scope_slice};
use crud_saga_core::error::SagaError;
use crud_saga_core::table::{ActionTable, Operation};
use crud_saga_core::taker::DispatchPolicies;
use crud_saga_core::task::TaskMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

type Extension = Box<dyn Fn(&ActionTable) -> TaskMap + Send + Sync>;

/// One CRUD resource, ready to be mounted in a store.
///
/// # Example
///
/// ```ignore
/// let apis = create_apis(TransportConfig::from_env()?)?;
/// let todos = CrudModule::builder("todos")
///     .task_api(apis.tasks.clone())
///     .dispatch_policies("supersede".parse()?)
///     .done_actions(true)
///     .build()?;
///
/// let store = Store::new(todos.initial_slices(), todos.slice_reducer());
/// store.run(todos.tasks());
/// store.send(todos.trigger(Operation::ReadAll, Value::Null)).await?;
/// ```
#[derive(Clone, Debug)]
pub struct CrudModule {
    table: ActionTable,
    reducer: CrudReducer,
    initial_state: CrudState,
    tasks: TaskMap,
}

impl CrudModule {
    /// Start assembling the module `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> CrudModuleBuilder {
        CrudModuleBuilder::new(name.into())
    }

    /// Module name, also the state scope it owns.
    #[must_use]
    pub fn name(&self) -> &str {
        self.table.module()
    }

    /// Action identifiers of this module.
    #[must_use]
    pub const fn actions(&self) -> &ActionTable {
        &self.table
    }

    /// Trigger action of `op` carrying `payload`.
    #[must_use]
    pub fn trigger(&self, op: Operation, payload: Value) -> Action {
        Action::new(self.table.trigger(op), payload)
    }

    /// Action `<module>/<name>` carrying `payload`, if `name` is registered.
    #[must_use]
    pub fn action(&self, name: &str, payload: Value) -> Option<Action> {
        self.table.action(name).map(|kind| Action::new(kind, payload))
    }

    /// Reducer of this module's slice.
    #[must_use]
    pub fn reducer(&self) -> CrudReducer {
        self.reducer.clone()
    }

    /// Reducer mounted on this module's scope of a [`Slices`] root state.
    #[must_use]
    pub fn slice_reducer(&self) -> SliceReducer<CrudReducer> {
        scope_slice(self.name(), self.reducer())
    }

    /// Initial slice.
    #[must_use]
    pub fn initial_state(&self) -> CrudState {
        self.initial_state.clone()
    }

    /// Root state holding only this module's initial slice.
    #[must_use]
    pub fn initial_slices(&self) -> Slices<CrudState> {
        let mut slices = Slices::new();
        slices.insert(self.name().to_string(), self.initial_state());
        slices
    }

    /// Task map keyed by trigger kind.
    #[must_use]
    pub fn tasks(&self) -> TaskMap {
        self.tasks.clone()
    }
}

/// Builder for [`CrudModule`].
pub struct CrudModuleBuilder {
    name: String,
    task_api: Option<TaskApi>,
    policies: DispatchPolicies,
    done: bool,
    initial_state: Option<Value>,
    reducers: BTreeMap<String, SliceFn>,
    extra_actions: Vec<String>,
    paths: Option<ResourcePaths>,
    extension: Option<Extension>,
}

impl CrudModuleBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            task_api: None,
            policies: DispatchPolicies::Default,
            done: false,
            initial_state: None,
            reducers: BTreeMap::new(),
            extra_actions: Vec::new(),
            paths: None,
            extension: None,
        }
    }

    /// Task API the module's requests go through. Required.
    #[must_use]
    pub fn task_api(mut self, api: TaskApi) -> Self {
        self.task_api = Some(api);
        self
    }

    /// Dispatch policies of the CRUD operations.
    #[must_use]
    pub fn dispatch_policies(mut self, policies: DispatchPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Generate `<op>Done` actions, emitted after every completed call.
    #[must_use]
    pub const fn done_actions(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Extra initial state fields. Must be a JSON object.
    #[must_use]
    pub fn initial_state(mut self, extra: Value) -> Self {
        self.initial_state = Some(extra);
        self
    }

    /// Register the action `<module>/<name>` and handle it with `reducer`.
    ///
    /// Overrides the default handling if `name` is a CRUD action.
    #[must_use]
    pub fn reducer<F>(mut self, name: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&mut CrudState, &Value) + Send + Sync + 'static,
    {
        self.reducers.insert(name.into(), Arc::new(reducer));
        self
    }

    /// Register the action `<module>/<name>` without a reducer, e.g. as a task trigger.
    #[must_use]
    pub fn extra_action(mut self, name: impl Into<String>) -> Self {
        self.extra_actions.push(name.into());
        self
    }

    /// Path templates. Defaults to [`ResourcePaths::named`] with the module name.
    #[must_use]
    pub fn paths(mut self, paths: ResourcePaths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Extra tasks, built from the module's action table. They win over the
    /// CRUD tasks on trigger collision.
    #[must_use]
    pub fn tasks<F>(mut self, extension: F) -> Self
    where
        F: Fn(&ActionTable) -> TaskMap + Send + Sync + 'static,
    {
        self.extension = Some(Box::new(extension));
        self
    }

    /// Assemble the module.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if the name is blank, no task
    /// API was given, the initial state is not an object, or the default
    /// paths cannot be derived from the name.
    pub fn build(self) -> Result<CrudModule, SagaError> {
        let mut table = ActionTable::new(self.name.as_str())?.with_done(self.done);
        for name in self.extra_actions.iter().chain(self.reducers.keys()) {
            table = table.with_action(name.as_str());
        }

        let api = self
            .task_api
            .ok_or_else(|| SagaError::invalid("must provide a valid task API"))?;

        let initial_state = match self.initial_state {
            None | Some(Value::Null) => CrudState::default(),
            Some(Value::Object(extra)) => CrudState::with_extra(extra),
            Some(_) => return Err(SagaError::invalid("initial state must be an object")),
        };

        let paths = match self.paths {
            Some(paths) => paths,
            None => ResourcePaths::named(&self.name)?,
        };

        let mut task_set = ResourceTaskSet::new(paths, api).with_policies(self.policies);
        if let Some(extension) = self.extension {
            task_set = task_set.with_extension(extension);
        }
        let tasks = task_set.build(&table);

        let reducer = self
            .reducers
            .into_iter()
            .fold(CrudReducer::new(table.clone()), |reducer, (name, f)| {
                reducer.with_reducer(&name, f)
            });

        tracing::info!(module = %self.name, tasks = tasks.len(), done = self.done, "Assembled CRUD module");

        Ok(CrudModule {
            table,
            reducer,
            initial_state,
            tasks,
        })
    }
}
