//! # Crud Saga API
//!
//! REST resource modules on top of the crud-saga store.
//!
//! ## Components
//!
//! - [`HttpApi`]: reqwest transport whose requests can be cancelled
//! - [`TaskApi`]: runs one call as a task step and reports it through
//!   success / failure / done actions
//! - [`ResourceTaskSet`]: the readAll, readOne, create, update, patch and
//!   delete tasks of one resource
//! - [`refetch_task`]: debounced refetch of the current item
//! - [`CrudModule`]: action table, reducer, initial state and tasks in one place
//!
//! ## Example
//!
//! ```ignore
//! use crud_saga_api::{CrudModule, TransportConfig, create_apis};
//!
//! let apis = create_apis(TransportConfig::default().with_base_url("https://api.example.com"))?;
//! apis.http.add_authorization("Bearer token")?;
//!
//! let todos = CrudModule::builder("todos").task_api(apis.tasks.clone()).build()?;
//! ```

pub mod call;
pub mod config;
pub mod crud;
pub mod http;
pub mod module;
pub mod refetch;
pub mod resource;

pub use call::{IssuedCall, NotificationTriple, TaskApi, TaskCall};
pub use config::TransportConfig;
pub use crud::{CrudReducer, CrudState};
pub use http::HttpApi;
pub use module::{CrudModule, CrudModuleBuilder};
pub use refetch::refetch_task;
pub use resource::{ResourcePaths, ResourceTaskSet};

use crud_saga_core::error::SagaError;
use std::sync::Arc;

/// The transport and the task API bound to it.
#[derive(Clone, Debug)]
pub struct Apis {
    /// Direct transport access, including header configuration
    pub http: Arc<HttpApi>,
    /// Task-level calls through `http`
    pub tasks: TaskApi,
}

/// Build an [`HttpApi`] from `config` and the [`TaskApi`] using it.
///
/// # Errors
///
/// See [`HttpApi::new`].
pub fn create_apis(config: TransportConfig) -> Result<Apis, SagaError> {
    let http = Arc::new(HttpApi::new(config)?);
    let tasks = TaskApi::new(Arc::clone(&http) as Arc<dyn crud_saga_core::transport::Transport>);
    tracing::debug!(base_url = http.base_url(), "Created transport APIs");
    Ok(Apis { http, tasks })
}
