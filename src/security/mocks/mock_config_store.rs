// Copyright 2022, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory ConfigStore for use in test. Clones share the same sections, so
//! a test can keep a handle on a store it gave away.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::security::storage::{keys, ConfigStore};

/// Sections of key-value pairs, kept in memory
#[derive(Debug, Default, Clone)]
pub struct MockConfigStore {
    sections: Rc<RefCell<BTreeMap<String, BTreeMap<String, String>>>>,
}

impl MockConfigStore {
    /// Constructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sections, paired or not
    pub fn section_count(&self) -> usize {
        self.sections.borrow().len()
    }
}

impl ConfigStore for MockConfigStore {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        self.sections.borrow().get(section).and_then(|s| s.get(key)).cloned()
    }

    fn set(&mut self, section: &str, key: &str, value: String) {
        self.sections
            .borrow_mut()
            .entry(section.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
    }

    fn remove(&mut self, section: &str, key: &str) -> bool {
        let mut sections = self.sections.borrow_mut();
        let Some(entries) = sections.get_mut(section) else {
            return false;
        };
        let removed = entries.remove(key).is_some();
        if entries.is_empty() {
            sections.remove(section);
        }
        removed
    }

    fn exists(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some()
    }

    fn paired_device_sections(&self) -> Vec<String> {
        self.sections
            .borrow()
            .iter()
            .filter(|(_, entries)| {
                entries.contains_key(keys::LINK_KEY)
                    || entries.keys().any(|k| k.starts_with("LE_KEY_"))
            })
            .map(|(section, _)| section.clone())
            .collect()
    }
}
