//! Tools: the registry offered to the model and the dispatcher that runs
//! its calls.
//!
//! Concrete providers (Google Workspace, web search, image generation) are
//! bound from outside the crate through [`ToolProvider`]; the only provider
//! shipped here is `document_search`, which sits on top of [`crate::retrieval`].

pub mod catalog;
pub mod dispatcher;
pub mod document_search;
pub mod errors;
pub mod registry;
pub mod types;

pub use dispatcher::ToolDispatcher;
pub use document_search::DocumentSearchProvider;
pub use errors::ToolError;
pub use registry::ToolRegistry;
pub use types::{ToolEvent, ToolProvider, ToolResult, ToolSpec, UserContext};
