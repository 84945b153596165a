// src/persistence.rs

//! On-disk model format: a tree of typed nodes written with bincode.

use crate::data_container::{DataContainer, StoredEntry};
use crate::error::{EofError, Result};
use crate::preprocessing::Preprocessor;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const ATTR_MODEL: &str = "model";
const ATTR_SOFTWARE: &str = "software";
const ATTR_VERSION: &str = "version";
const ATTR_PARAMS: &str = "params";

/// One serialized model: its metadata, result entries, preprocessors and nested models.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelTree {
    pub attrs: BTreeMap<String, String>,
    pub data_vars: BTreeMap<String, StoredEntry>,
    pub preprocessors: Vec<Preprocessor>,
    pub children: BTreeMap<String, ModelTree>,
}

impl ModelTree {
    /// A node for model `name` whose constructor parameters are stored as JSON.
    pub fn new<P: Serialize>(name: &str, params: &P) -> Result<Self> {
        let mut attrs = BTreeMap::new();
        attrs.insert(ATTR_MODEL.to_string(), name.to_string());
        attrs.insert(ATTR_SOFTWARE.to_string(), env!("CARGO_PKG_NAME").to_string());
        attrs.insert(ATTR_VERSION.to_string(), env!("CARGO_PKG_VERSION").to_string());
        attrs.insert(ATTR_PARAMS.to_string(), serde_json::to_string(params)?);
        Ok(Self {
            attrs,
            data_vars: BTreeMap::new(),
            preprocessors: Vec::new(),
            children: BTreeMap::new(),
        })
    }

    pub fn model_name(&self) -> Option<&str> {
        self.attrs.get(ATTR_MODEL).map(String::as_str)
    }

    /// Stores an extra JSON attribute next to the parameters.
    pub fn set_attr<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.attrs.insert(key.to_string(), serde_json::to_string(value)?);
        Ok(())
    }

    /// Parses a JSON attribute.
    pub fn attr<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self
            .attrs
            .get(key)
            .ok_or_else(|| EofError::Serialization(format!("model tree has no '{key}' attribute")))?;
        Ok(serde_json::from_str(raw)?)
    }

    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        self.attr(ATTR_PARAMS)
    }

    /// Fails unless this node was written by a model named `expected`.
    pub fn expect_model(&self, expected: &str) -> Result<()> {
        match self.model_name() {
            Some(name) if name == expected => Ok(()),
            found => Err(EofError::Serialization(format!(
                "expected a saved {expected} model, found {}",
                found.unwrap_or("an untagged tree")
            ))),
        }
    }

    /// Rebuilds the result container, warning about entries saved as placeholders.
    pub fn restore_container(&mut self) -> DataContainer {
        let stored = std::mem::take(&mut self.data_vars);
        let (container, placeholders) = DataContainer::restore(stored);
        for name in placeholders {
            warn!(
                "Entry '{}' was saved without data; accessing it will fail until the model is refitted",
                name
            );
        }
        container
    }

    pub fn take_child(&mut self, name: &str) -> Result<ModelTree> {
        self.children
            .remove(name)
            .ok_or_else(|| EofError::Serialization(format!("model tree has no '{name}' child")))
    }

    /// Writes the tree with bincode's standard configuration.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        writer.flush()?;
        info!("Saved {} model to {:?}", self.model_name().unwrap_or("unnamed"), path.as_ref());
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let tree: ModelTree = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(tree)
    }
}

/// Conversion of a model to and from a [`ModelTree`], plus file I/O on top of it.
pub trait Persist: Sized {
    /// Builds the tree. Raw input data is kept only when `save_data` is set;
    /// otherwise it is stored as a placeholder.
    fn serialize(&self, save_data: bool) -> Result<ModelTree>;

    fn deserialize(tree: ModelTree) -> Result<Self>;

    /// Saves the model to `path`. Deferred results are computed first.
    fn save<P: AsRef<Path>>(&self, path: P, save_data: bool) -> Result<()> {
        self.serialize(save_data)?.write(path)
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::deserialize(ModelTree::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_array::{Coordinate, DataArray};
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn tree_round_trips_through_a_file() {
        let mut container = DataContainer::new();
        container.add(
            "norms",
            DataArray::from_vector(array![2.0, 1.0], "mode", Coordinate::modes(2)).unwrap(),
            true,
        );
        container.add(
            "input_data",
            DataArray::from_vector(array![5.0], "sample", Coordinate::range(1)).unwrap(),
            false,
        );
        let mut tree = ModelTree::new("Eof", &serde_json::json!({"n_modes": 2})).unwrap();
        tree.data_vars = container.snapshot(false).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        tree.write(&path).unwrap();
        let mut loaded = ModelTree::read(&path).unwrap();
        loaded.expect_model("Eof").unwrap();
        assert!(loaded.expect_model("Mca").is_err());
        let params: serde_json::Value = loaded.params().unwrap();
        assert_eq!(params["n_modes"], 2);

        let restored = loaded.restore_container();
        assert_eq!(restored.get::<f64>("norms").unwrap().values()[[1]], 1.0);
        assert!(restored.is_placeholder("input_data"));
    }

    #[test]
    fn missing_attributes_and_children_are_errors() {
        let mut tree = ModelTree::new("Mca", &serde_json::json!({})).unwrap();
        assert!(matches!(tree.attr::<u32>("rotation"), Err(EofError::Serialization(_))));
        assert!(matches!(tree.take_child("model"), Err(EofError::Serialization(_))));
    }
}
