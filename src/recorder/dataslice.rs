use super::{sha256_hex, Recorder};
use crate::errors::{Error, Result};
use crate::metadata::{names, Artifact, Direction, Execution, PropertyValues};
use indexmap::IndexMap;
use std::path::Path;

const PATH_COLUMN: &str = "Path";

/// A named subset of data files with per-file properties.
///
/// Rows are kept in insertion order so that the committed file, and hence
/// its content hash, is reproducible.
#[derive(Debug, Clone)]
pub struct DataSlice {
    name: String,
    rows: IndexMap<String, PropertyValues>,
}

impl DataSlice {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            rows: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Adds (or replaces) the file at `path`.
    pub fn add_data(&mut self, path: &str, custom_properties: PropertyValues) {
        self.rows.insert(path.to_owned(), custom_properties);
    }

    pub fn get(&self, path: &str) -> Option<&PropertyValues> {
        self.rows.get(path)
    }

    /// Merges `custom_properties` into the properties of the file at `path`.
    pub fn update_data(&mut self, path: &str, custom_properties: PropertyValues) -> Result<()> {
        let row = self.rows.get_mut(path).ok_or_else(|| {
            Error::NotFound(format!("record {:?} of dataslice {:?}", path, self.name))
        })?;
        row.extend(custom_properties);
        Ok(())
    }

    /// Loads a slice file written by [`DataSlice::commit`]; the slice is named after the file.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let rows: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_slice(&content)?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let mut slice = Self::new(name);
        for mut row in rows {
            let data_path = match row.remove(PATH_COLUMN) {
                Some(serde_json::Value::String(data_path)) => data_path,
                _ => {
                    return Err(Error::SchemaMismatch(format!(
                        "dataslice {:?} has a record without {}",
                        path, PATH_COLUMN
                    )))
                }
            };
            let properties = row
                .into_iter()
                .map(|(k, v)| Ok((k, serde_json::from_value(v)?)))
                .collect::<Result<PropertyValues, serde_json::Error>>()?;
            slice.rows.insert(data_path, properties);
        }
        Ok(slice)
    }

    /// The file content: one JSON object per record, in insertion order.
    pub(crate) fn content(&self) -> Result<Vec<u8>> {
        let rows = self
            .rows
            .iter()
            .map(|(path, props)| {
                let mut object = serde_json::Map::new();
                object.insert(PATH_COLUMN.to_owned(), path.clone().into());
                for (k, v) in props {
                    object.insert(k.clone(), serde_json::to_value(v)?);
                }
                Ok(serde_json::Value::Object(object))
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        Ok(serde_json::to_vec_pretty(&rows)?)
    }

    /// Writes the slice under the work directory and logs it as a `Dataslice` output.
    ///
    /// A slice whose content is already known is linked as an input instead.
    pub async fn commit(
        &self,
        recorder: &mut Recorder<'_>,
        execution: &Execution,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        let content = self.content()?;
        let path = format!(
            "cmf_artifacts/{}/dataslice/{}",
            super::current_uuid(execution),
            self.name
        );
        recorder.write_artifact_file(&path, &content).await?;
        let hash = sha256_hex(&content);

        if let Some(existing) = recorder.find_artifact(names::DATASLICE, &hash).await? {
            recorder
                .link_execution_to_artifact(execution, existing.id, Direction::Input)
                .await?;
            return Ok(existing);
        }

        let mut custom = PropertyValues::new();
        custom.insert(names::COMMIT.to_owned(), hash.clone().into());
        custom.insert(
            names::ARTIFACT_GIT_REPO.to_owned(),
            recorder.options.git.repo.clone().into(),
        );
        custom.extend(custom_properties);
        recorder
            .merge_artifact(
                execution,
                names::DATASLICE,
                &format!("{}:{}", path, hash),
                &hash,
                PropertyValues::new(),
                custom,
                Direction::Output,
            )
            .await
    }

    /// Links the slice identified by `uri` as an input, or records it as an output.
    pub async fn commit_existing(
        &self,
        recorder: &mut Recorder<'_>,
        execution: &Execution,
        uri: &str,
        custom_properties: PropertyValues,
    ) -> Result<Artifact> {
        if let Some(existing) = recorder.find_artifact(names::DATASLICE, uri).await? {
            recorder
                .link_execution_to_artifact(execution, existing.id, Direction::Input)
                .await?;
            return Ok(existing);
        }
        recorder
            .merge_artifact(
                execution,
                names::DATASLICE,
                &self.name,
                uri,
                PropertyValues::new(),
                custom_properties,
                Direction::Output,
            )
            .await
    }
}
