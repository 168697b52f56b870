//! Resource task set: the canonical CRUD task handlers of one REST resource.
//!
//! | Operation | Method | Path              | Body                 |
//! |-----------|--------|-------------------|----------------------|
//! | readAll   | GET    | collection        | none                 |
//! | readOne   | GET    | item (`payload`)  | none                 |
//! | create    | POST   | create            | `payload`            |
//! | update    | PUT    | item (`payload.id`) | `payload.changeset` |
//! | patch     | PATCH  | item (`payload.id`) | `payload.changeset` |
//! | delete    | DELETE | item (`payload`)  | `null`               |

use crate::call::{NotificationTriple, TaskApi, TaskCall};
use crud_saga_core::action::Action;
use crud_saga_core::error::SagaError;
use crud_saga_core::table::{ActionTable, Operation};
use crud_saga_core::taker::DispatchPolicies;
use crud_saga_core::task::{TaskContext, TaskEntry, TaskFn, TaskKey, TaskMap, task_fn};
use crud_saga_core::transport::{Method, RequestOptions, TransportError};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Placeholder substituted with the item id in item path templates.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Path templates of a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePaths {
    collection: String,
    create: String,
    item: String,
}

impl ResourcePaths {
    /// One name for every path: `/{name}` and `/{name}/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if `name` is blank.
    pub fn named(name: &str) -> Result<Self, SagaError> {
        let name = segment(name, "resource name")?;
        Ok(Self {
            collection: format!("/{name}"),
            create: format!("/{name}"),
            item: format!("/{name}/{ID_PLACEHOLDER}"),
        })
    }

    /// Listing under the plural, everything else under the singular:
    /// `/{plural}`, `/{singular}` and `/{singular}/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if either name is blank.
    pub fn singular_plural(singular: &str, plural: &str) -> Result<Self, SagaError> {
        let singular = segment(singular, "singular resource name")?;
        let plural = segment(plural, "plural resource name")?;
        Ok(Self {
            collection: format!("/{plural}"),
            create: format!("/{singular}"),
            item: format!("/{singular}/{ID_PLACEHOLDER}"),
        })
    }

    /// Explicit templates. `item` must contain `{id}`; creation posts to `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if a template is blank or `item`
    /// has no `{id}`.
    pub fn templates(collection: &str, item: &str) -> Result<Self, SagaError> {
        let collection = template(collection, "collection path")?;
        let item = template(item, "item path")?;
        if !item.contains(ID_PLACEHOLDER) {
            return Err(SagaError::invalid(format!(
                "item path {item:?} must contain {ID_PLACEHOLDER}"
            )));
        }
        Ok(Self {
            create: collection.clone(),
            collection,
            item,
        })
    }

    /// Path listing the resource.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Path new items are posted to.
    #[must_use]
    pub fn create(&self) -> &str {
        &self.create
    }

    /// Path of the item `id`.
    #[must_use]
    pub fn item(&self, id: &str) -> String {
        self.item.replace(ID_PLACEHOLDER, id)
    }
}

/// A bare path segment: surrounding whitespace and slashes removed.
fn segment<'a>(value: &'a str, what: &str) -> Result<&'a str, SagaError> {
    let trimmed = value.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(SagaError::invalid(format!("{what} is required")));
    }
    Ok(trimmed)
}

/// A full path template, always absolute.
fn template(value: &str, what: &str) -> Result<String, SagaError> {
    Ok(format!("/{}", segment(value, what)?))
}

/// Request derived from a trigger payload.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationRequest {
    /// HTTP method
    pub method: Method,
    /// Resolved path
    pub path: String,
    /// Body, `None` for GET
    pub body: Option<Value>,
}

impl ResourcePaths {
    /// Request `op` issues for a trigger carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the payload lacks the item id.
    pub fn request(&self, op: Operation, payload: &Value) -> Result<OperationRequest, TransportError> {
        let (method, path, body) = match op {
            Operation::ReadAll => (Method::Get, self.collection.clone(), None),
            Operation::ReadOne => (Method::Get, self.item(&item_id(op, payload)?), None),
            Operation::Create => (Method::Post, self.create.clone(), Some(payload.clone())),
            Operation::Update | Operation::Patch => {
                let id = payload.get("id").unwrap_or(&Value::Null);
                let changeset = payload.get("changeset").cloned().unwrap_or(Value::Null);
                let method = if op == Operation::Update { Method::Put } else { Method::Patch };
                (method, self.item(&item_id(op, id)?), Some(changeset))
            },
            Operation::Delete => (Method::Delete, self.item(&item_id(op, payload)?), Some(Value::Null)),
        };
        Ok(OperationRequest { method, path, body })
    }
}

/// Renders an id found in a trigger payload.
fn item_id(op: Operation, id: &Value) -> Result<String, TransportError> {
    match id {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(TransportError::InvalidRequest(format!(
            "{op} requires an item id, got {other}"
        ))),
    }
}

type Extension = Arc<dyn Fn(&ActionTable) -> TaskMap + Send + Sync>;

/// The CRUD task handlers of one resource, ready to be bound to an action table.
///
/// # Example
///
/// ```ignore
/// let tasks = ResourceTaskSet::named("todos", task_api)?
///     .with_policies("supersede".parse()?)
///     .with_extension(|table| {
///         TaskMap::new().with(
///             table.qualify("associationDone"),
///             refetch_task(table, "todos", None),
///         )
///     })
///     .build(&table);
/// store.run(tasks);
/// ```
#[derive(Clone)]
pub struct ResourceTaskSet {
    paths: ResourcePaths,
    api: TaskApi,
    policies: DispatchPolicies,
    extension: Option<Extension>,
}

impl fmt::Debug for ResourceTaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTaskSet")
            .field("paths", &self.paths)
            .field("policies", &self.policies)
            .field("extended", &self.extension.is_some())
            .finish_non_exhaustive()
    }
}

impl ResourceTaskSet {
    /// Task set over `paths`, queueing every invocation.
    #[must_use]
    pub fn new(paths: ResourcePaths, api: TaskApi) -> Self {
        Self {
            paths,
            api,
            policies: DispatchPolicies::Default,
            extension: None,
        }
    }

    /// Task set for the single-name path convention.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if `name` is blank.
    pub fn named(name: &str, api: TaskApi) -> Result<Self, SagaError> {
        Ok(Self::new(ResourcePaths::named(name)?, api))
    }

    /// Set the dispatch policies.
    #[must_use]
    pub fn with_policies(mut self, policies: DispatchPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Add caller tasks. They win over the canonical ones on trigger collision.
    #[must_use]
    pub fn with_extension<F>(mut self, extension: F) -> Self
    where
        F: Fn(&ActionTable) -> TaskMap + Send + Sync + 'static,
    {
        self.extension = Some(Arc::new(extension));
        self
    }

    /// Path templates in use.
    #[must_use]
    pub const fn paths(&self) -> &ResourcePaths {
        &self.paths
    }

    /// Bind the task set to `table`.
    #[must_use]
    pub fn build(&self, table: &ActionTable) -> TaskMap {
        let mut tasks = TaskMap::new();
        for op in Operation::ALL {
            tasks.insert(
                table.trigger(op),
                TaskEntry {
                    key: TaskKey::Operation(op),
                    handler: self.handler(table, op),
                    policy: self.policies.resolve(op),
                },
            );
        }

        if let Some(extension) = &self.extension {
            tasks.merge(extension(table));
        }

        tracing::debug!(module = table.module(), tasks = tasks.len(), "Built resource task set");
        tasks
    }

    fn handler(&self, table: &ActionTable, op: Operation) -> TaskFn {
        let api = self.api.clone();
        let paths = self.paths.clone();
        let notify = NotificationTriple::for_operation(table, op);

        task_fn(move |ctx, action| {
            let api = api.clone();
            let paths = paths.clone();
            let notify = notify.clone();
            async move { run_operation(&api, &paths, op, notify, ctx, action).await }
        })
    }
}

async fn run_operation(
    api: &TaskApi,
    paths: &ResourcePaths,
    op: Operation,
    notify: NotificationTriple,
    ctx: Arc<dyn TaskContext>,
    action: Action,
) {
    let issued = match paths.request(op, &action.payload) {
        Ok(request) => api
            .build(
                request.method,
                &request.path,
                request.body,
                RequestOptions::default(),
                notify,
            )
            .map(TaskCall::issue),
        Err(error) => {
            tracing::warn!(operation = %op, error = %error, "Trigger payload cannot be turned into a request");
            TaskApi::rejected(error, notify)
        },
    };

    match issued {
        Ok(call) => {
            call.settle(ctx.as_ref()).await;
        },
        Err(e) => tracing::error!(operation = %op, error = %e, "Task call could not be built"),
    }
}
