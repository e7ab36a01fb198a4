//! Plot Store - binary blobs keyed by (experiment UUID, plot name)
//!
//! Plots are opaque bytes. Uploading does not check that the experiment
//! exists: an entry may be added for any identifier.
//!
//! # Example
//!
//! ```rust
//! use labtrack_db::plot::PlotStore;
//!
//! let mut plots = PlotStore::new();
//! plots.upload("exp-1", "fit.png", b"\x89PNG".to_vec()).unwrap();
//! assert_eq!(plots.get("exp-1", "fit.png").unwrap(), b"\x89PNG");
//!
//! // A second upload under the same key conflicts; update replaces.
//! assert!(plots.upload("exp-1", "fit.png", vec![]).is_err());
//! let info = plots.update("exp-1", "fit.png", vec![0; 8]).unwrap();
//! assert_eq!(info.size, 8);
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{Error, Result};

/// Name and size of a stored plot, as reported after an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlotInfo {
    /// Plot name
    pub name: String,
    /// Content length in bytes
    pub size: usize,
}

/// In-memory blob map.
///
/// Plot names are unique per experiment. Experiments with no plots left have
/// no entry at all, so an emptied map equals a fresh one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlotStore {
    plots: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl PlotStore {
    /// Create an empty plot store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of plots across all experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plots.values().map(BTreeMap::len).sum()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }

    /// Store a new plot.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the key is taken, or `InvalidArgument` if either
    /// part of the key cannot be used as a file name.
    pub fn upload(&mut self, experiment_id: &str, plot_name: &str, content: Vec<u8>) -> Result<()> {
        validate_key_part("experiment id", experiment_id)?;
        validate_key_part("plot name", plot_name)?;
        let plots = self.plots.entry(experiment_id.to_string()).or_default();
        if plots.contains_key(plot_name) {
            return Err(Error::Conflict(format!("Figure {plot_name} already exists")));
        }
        plots.insert(plot_name.to_string(), content);
        Ok(())
    }

    /// Replace an existing plot, returning its previous content.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no plot is stored under the key.
    pub fn replace(
        &mut self,
        experiment_id: &str,
        plot_name: &str,
        content: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let slot = self
            .plots
            .get_mut(experiment_id)
            .and_then(|plots| plots.get_mut(plot_name))
            .ok_or_else(|| not_found(plot_name))?;
        Ok(std::mem::replace(slot, content))
    }

    /// Replace an existing plot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no plot is stored under the key.
    pub fn update(
        &mut self,
        experiment_id: &str,
        plot_name: &str,
        content: Vec<u8>,
    ) -> Result<PlotInfo> {
        let size = content.len();
        self.replace(experiment_id, plot_name, content)?;
        Ok(PlotInfo {
            name: plot_name.to_string(),
            size,
        })
    }

    /// Get a plot's content.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no plot is stored under the key.
    pub fn get(&self, experiment_id: &str, plot_name: &str) -> Result<&[u8]> {
        self.plots
            .get(experiment_id)
            .and_then(|plots| plots.get(plot_name))
            .map(Vec::as_slice)
            .ok_or_else(|| not_found(plot_name))
    }

    /// Remove a plot, returning its content.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no plot is stored under the key.
    pub fn delete(&mut self, experiment_id: &str, plot_name: &str) -> Result<Vec<u8>> {
        let plots = self
            .plots
            .get_mut(experiment_id)
            .ok_or_else(|| not_found(plot_name))?;
        let content = plots.remove(plot_name).ok_or_else(|| not_found(plot_name))?;
        if plots.is_empty() {
            self.plots.remove(experiment_id);
        }
        Ok(content)
    }

    /// Plot names stored for one experiment, in name order.
    #[must_use]
    pub fn names(&self, experiment_id: &str) -> Vec<&str> {
        self.plots
            .get(experiment_id)
            .map(|plots| plots.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every `(experiment id, plot name, content)` entry, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[u8])> {
        self.plots.iter().flat_map(|(experiment_id, plots)| {
            plots
                .iter()
                .map(move |(name, content)| (experiment_id.as_str(), name.as_str(), content.as_slice()))
        })
    }
}

fn not_found(plot_name: &str) -> Error {
    Error::NotFound(format!("Figure {plot_name} not found"))
}

/// Key parts become file names, so they must be non-empty and free of path
/// separators.
fn validate_key_part(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidArgument(format!(
            "Invalid {what} {value:?}: must be a non-empty name without path separators"
        )));
    }
    Ok(())
}
