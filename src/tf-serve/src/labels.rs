use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of classes in the ImageNet-1k label set.
pub const IMAGENET_CLASSES: usize = 1000;

/// Human readable ImageNet category names, indexed by class id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLabelTable {
    names: Vec<String>,
}

impl ClassLabelTable {
    pub fn new(names: Vec<String>) -> Self {
        ClassLabelTable { names }
    }

    /// Flatten the published class index, `{"0": [wnid, name], ...}`, into a
    /// table where entry `i` is the name stored under key `"i"`.
    ///
    /// Keys must be exactly `"0"..n`; anything else is a shape error.
    pub fn from_class_index(raw: &[u8]) -> Result<Self> {
        let index: HashMap<String, (String, String)> = serde_json::from_slice(raw)
            .map_err(|e| Error::LabelShape(format!("expected {{\"<id>\": [wnid, name]}}: {}", e)))?;

        let mut names = Vec::with_capacity(index.len());
        for i in 0..index.len() {
            let (_, name) = index
                .get(&i.to_string())
                .ok_or_else(|| Error::LabelShape(format!("missing key \"{}\"", i)))?;
            names.push(name.clone());
        }

        debug!("Flattened class index with {} entries", names.len());

        Ok(ClassLabelTable { names })
    }

    /// Load a table previously written by [`ClassLabelTable::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let table: ClassLabelTable = serde_json::from_reader(BufReader::new(file))?;

        if table.is_empty() {
            return Err(Error::LabelShape(format!("{} is empty", path.display())));
        }

        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn ensure_len(&self, expected: usize) -> Result<()> {
        if self.len() != expected {
            return Err(Error::LabelShape(format!(
                "expected {} classes, found {}",
                expected,
                self.len()
            )));
        }
        Ok(())
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
