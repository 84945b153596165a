// src/data_container.rs

use crate::data_array::{DataArray, Element};
use crate::error::{EofError, Result};
use log::{debug, info};
use ndarray_linalg::c64;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// A stored result: real or complex values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Real(DataArray<f64>),
    Complex(DataArray<c64>),
}

type Plan = Box<dyn Fn() -> Result<Payload> + Send + Sync>;

struct Entry {
    value: OnceCell<Payload>,
    plan: Option<Plan>,
    allow_compute: bool,
    placeholder: bool,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("computed", &self.value.get().is_some())
            .field("deferred", &self.plan.is_some())
            .field("allow_compute", &self.allow_compute)
            .field("placeholder", &self.placeholder)
            .finish()
    }
}

impl Entry {
    fn force(&self, name: &str) -> Result<&Payload> {
        if self.placeholder {
            return Err(EofError::Placeholder(name.to_string()));
        }
        self.value.get_or_try_init(|| match &self.plan {
            Some(plan) => plan(),
            None => Err(EofError::InvalidValue(format!("entry '{name}' has neither a value nor a plan"))),
        })
    }
}

/// One entry as written to disk by the persistence layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredEntry {
    pub payload: Option<Payload>,
    pub allow_compute: bool,
}

/// Named results of a fitted model.
///
/// Entries are either materialized values or deferred plans that run once, on
/// [`DataContainer::compute`] or on first access. Entries added with
/// `allow_compute = false` (the raw input data) are never forced by `compute`
/// and are replaced by placeholders when a model is saved without its data.
#[derive(Debug, Default)]
pub struct DataContainer {
    entries: BTreeMap<String, Entry>,
}

impl DataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an already computed array.
    pub fn add<A: Element>(&mut self, name: &str, array: DataArray<A>, allow_compute: bool) {
        let value = OnceCell::new();
        // A fresh cell cannot be occupied.
        let _ = value.set(A::into_payload(array.with_name(name)));
        self.entries.insert(
            name.to_string(),
            Entry {
                value,
                plan: None,
                allow_compute,
                placeholder: false,
            },
        );
    }

    /// Stores a plan that produces the array when the entry is first needed.
    pub fn add_deferred<A, F>(&mut self, name: &str, allow_compute: bool, plan: F)
    where
        A: Element,
        F: Fn() -> Result<DataArray<A>> + Send + Sync + 'static,
    {
        let entry_name = name.to_string();
        let plan: Plan = Box::new(move || Ok(A::into_payload(plan()?.with_name(entry_name.clone()))));
        self.entries.insert(
            name.to_string(),
            Entry {
                value: OnceCell::new(),
                plan: Some(plan),
                allow_compute,
                placeholder: false,
            },
        );
    }

    /// Runs `plan` now when `eager` is set, otherwise stores it as a deferred entry.
    /// Either way the entry is computable.
    pub fn add_computed<A, F>(&mut self, name: &str, eager: bool, plan: F) -> Result<()>
    where
        A: Element,
        F: Fn() -> Result<DataArray<A>> + Send + Sync + 'static,
    {
        if eager {
            self.add(name, plan()?, true);
        } else {
            self.add_deferred(name, true, plan);
        }
        Ok(())
    }

    /// Registers an entry that exists by name only.
    pub fn add_placeholder(&mut self, name: &str, allow_compute: bool) {
        self.entries.insert(
            name.to_string(),
            Entry {
                value: OnceCell::new(),
                plan: None,
                allow_compute,
                placeholder: true,
            },
        );
    }

    /// Returns the entry's values, running its plan first if needed.
    ///
    /// # Errors
    /// [`EofError::InvalidValue`] if the entry is unknown or holds the other element type,
    /// [`EofError::Placeholder`] for placeholder entries, and any error raised by the plan.
    pub fn get<A: Element>(&self, name: &str) -> Result<&DataArray<A>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| EofError::InvalidValue(format!("no entry named '{name}' in the model data")))?;
        let payload = entry.force(name)?;
        A::from_payload(payload).ok_or_else(|| {
            EofError::InvalidValue(format!(
                "entry '{name}' does not hold {} values",
                std::any::type_name::<A>()
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_computed(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.value.get().is_some())
    }

    pub fn is_placeholder(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.placeholder)
    }

    pub fn allow_compute(&self, name: &str) -> Option<bool> {
        self.entries.get(name).map(|e| e.allow_compute)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Materializes every computable entry. Calling it again is a no-op.
    pub fn compute(&self, verbose: bool) -> Result<()> {
        let start = Instant::now();
        let mut forced = 0usize;
        for (name, entry) in &self.entries {
            if !entry.allow_compute || entry.placeholder || entry.value.get().is_some() {
                continue;
            }
            let entry_start = Instant::now();
            entry.force(name)?;
            forced += 1;
            if verbose {
                info!("Computed '{}' in {:?}", name, entry_start.elapsed());
            } else {
                debug!("Computed '{}' in {:?}", name, entry_start.elapsed());
            }
        }
        if verbose && forced > 0 {
            info!("Materialized {} deferred entries in {:?}", forced, start.elapsed());
        }
        Ok(())
    }

    /// Forces the computable entries and returns a copy for saving. Entries that
    /// are not computable become placeholders unless `save_data` is set.
    pub(crate) fn snapshot(&self, save_data: bool) -> Result<BTreeMap<String, StoredEntry>> {
        let mut stored = BTreeMap::new();
        for (name, entry) in &self.entries {
            let keep = (entry.allow_compute || save_data) && !entry.placeholder;
            let payload = if keep { Some(entry.force(name)?.clone()) } else { None };
            stored.insert(
                name.clone(),
                StoredEntry {
                    payload,
                    allow_compute: entry.allow_compute,
                },
            );
        }
        Ok(stored)
    }

    /// Rebuilds a container from saved entries. Returns the names of placeholder entries.
    pub(crate) fn restore(stored: BTreeMap<String, StoredEntry>) -> (Self, Vec<String>) {
        let mut container = DataContainer::new();
        let mut placeholders = Vec::new();
        for (name, entry) in stored {
            match entry.payload {
                Some(payload) => {
                    let value = OnceCell::new();
                    let _ = value.set(payload);
                    container.entries.insert(
                        name,
                        Entry {
                            value,
                            plan: None,
                            allow_compute: entry.allow_compute,
                            placeholder: false,
                        },
                    );
                }
                None => {
                    container.add_placeholder(&name, entry.allow_compute);
                    placeholders.push(name);
                }
            }
        }
        (container, placeholders)
    }
}
