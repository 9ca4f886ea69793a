use futures::future::BoxFuture;

pub mod azure_data_explorer;
pub mod util;

/// Resolves once the remote store has confirmed the sink can talk to it.
pub type Healthcheck = BoxFuture<'static, crate::Result<()>>;
