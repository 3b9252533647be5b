use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Event store error: {0:#}")]
    Store(anyhow::Error),

    #[error("Adapter error: {0}")]
    Adapter(#[from] agentwatch_adapters::AdapterError),

    #[error("Adapter scan aborted: {0}")]
    Scan(#[from] tokio::task::JoinError),

    #[error("File watcher error: {0}")]
    FileWatch(#[from] notify::Error),

    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error("No events found in {0}")]
    EmptyConversation(String),
}
