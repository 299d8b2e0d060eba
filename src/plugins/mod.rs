//! Plugin system for batchdl
//!
//! A plugin turns a source URL into a lazy stream of download tasks. The
//! download manager pulls tasks from the generator and runs them on a
//! bounded pool of workers.
//!
//! ## Key Components
//!
//! - [`Plugin`] - Trait implemented by site plugins
//! - [`Task`] / [`TaskGenerator`] - Units of work and their producer
//! - [`OptionSpec`] / [`PluginOptions`] - Option schema and resolved values
//! - [`PluginRegistry`] - Registry for looking up plugins by name or URL
//! - [`DirectPlugin`] - Built-in plugin for plain HTTP(S) URLs
//!
//! ## Example
//!
//! ```rust,ignore
//! use batchdl::plugins::{PluginOptions, PluginRegistry};
//!
//! let registry = PluginRegistry::with_defaults();
//! let plugin = registry.find_for_url(url)?;
//! let options = PluginOptions::resolve(&plugin.options(), &provided)?;
//! let generation = plugin.download_generator(url, &options).await?;
//! ```

mod direct;
mod registry;
mod traits;
mod types;

pub use direct::{DirectPlugin, file_name_for};
pub use registry::{PluginRegistry, RegistryError};
pub use traits::{Generation, Plugin, PluginError, Task, TaskError, TaskGenerator, Total};
pub use types::{OptionKind, OptionSpec, PluginOptions};
