use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("No audio file named {file_name:?} in item {item_id}")]
    AudioFileNotFound {
        item_id: String,
        file_name: Option<String>,
    },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Storage error: {0}")]
    Store(#[from] core_store::StoreError),

    #[error("Archive error: {0}")]
    Archive(#[from] provider_archive::ArchiveError),

    #[error("Offline error: {0}")]
    Offline(#[from] core_offline::OfflineError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
