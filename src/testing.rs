use crate::MetadataStore;
use tempfile::NamedTempFile;

pub fn sqlite_uri(path: impl AsRef<std::path::Path>) -> String {
    format!(
        "sqlite://{}",
        path.as_ref()
            .to_str()
            .ok_or_else(|| format!("invalid path: {:?}", path.as_ref()))
            .unwrap()
    )
}

/// Opens a store backed by a fresh temporary SQLite file.
///
/// The file is removed when the returned handle is dropped.
pub async fn temp_store() -> (NamedTempFile, MetadataStore) {
    let file = NamedTempFile::new().expect("cannot create a temporary file");
    let store = MetadataStore::connect(&sqlite_uri(file.path()))
        .await
        .expect("cannot open the store");
    (file, store)
}
