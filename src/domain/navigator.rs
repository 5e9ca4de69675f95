//! Code-syntax navigator.
//!
//! Derives immediate children purely from the shape of code strings
//! (2-4-6-8-10 digit groups, dot separated after the first four digits). It
//! never consults the tree edges built by the store, so it also answers for
//! codes that do not sit anywhere in the tree.

use std::collections::BTreeSet;
use std::ops::Bound;

use regex::Regex;
use tracing::{debug, instrument};

use crate::domain::entities::CandidateOption;
use crate::domain::store::HierarchyStore;

/// Level of a parent code, judged by its shape alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLevel {
    /// Empty code: the top of the nomenclature
    Root,
    /// `dd`
    Chapter,
    /// `dddd`
    Heading,
    /// `dddd.dd`
    Subheading,
    /// `dddd.dd.dd`
    TariffItem,
    /// Anything else has no children
    Leaf,
}

pub struct HierarchyNavigator {
    codes: BTreeSet<String>,
    chapter: Regex,
    heading: Regex,
    subheading: Regex,
    tariff_item: Regex,
    bare_pair: Regex,
    dotted_pair: Regex,
}

impl HierarchyNavigator {
    /// Navigator over the codes indexed in `store`.
    pub fn new(store: &HierarchyStore) -> Self {
        Self::from_codes(store.codes())
    }

    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            codes: codes
                .into_iter()
                .map(|code| code.as_ref().trim().to_string())
                .filter(|code| !code.is_empty())
                .collect(),
            chapter: Regex::new(r"^[0-9]{2}$").unwrap(),
            heading: Regex::new(r"^[0-9]{4}$").unwrap(),
            subheading: Regex::new(r"^[0-9]{4}\.[0-9]{2}$").unwrap(),
            tariff_item: Regex::new(r"^[0-9]{4}\.[0-9]{2}\.[0-9]{2}$").unwrap(),
            bare_pair: Regex::new(r"^[0-9]{2}$").unwrap(),
            dotted_pair: Regex::new(r"^\.[0-9]{2}$").unwrap(),
        }
    }

    pub fn level_of(&self, code: &str) -> CodeLevel {
        let code = code.trim();
        if code.is_empty() {
            CodeLevel::Root
        } else if self.chapter.is_match(code) {
            CodeLevel::Chapter
        } else if self.heading.is_match(code) {
            CodeLevel::Heading
        } else if self.subheading.is_match(code) {
            CodeLevel::Subheading
        } else if self.tariff_item.is_match(code) {
            CodeLevel::TariffItem
        } else {
            CodeLevel::Leaf
        }
    }

    /// Immediate child codes of `parent`, ascending.
    #[instrument(level = "trace", skip(self))]
    pub fn child_codes_of(&self, parent: &str) -> Vec<String> {
        let parent = parent.trim();
        let suffix = match self.level_of(parent) {
            CodeLevel::Root => {
                return self
                    .codes
                    .iter()
                    .filter(|code| self.chapter.is_match(code))
                    .cloned()
                    .collect();
            }
            CodeLevel::Chapter => &self.bare_pair,
            CodeLevel::Heading | CodeLevel::Subheading | CodeLevel::TariffItem => {
                &self.dotted_pair
            }
            CodeLevel::Leaf => return Vec::new(),
        };

        self.codes
            .range::<str, _>((Bound::Excluded(parent), Bound::Unbounded))
            .take_while(|code| code.starts_with(parent))
            .filter(|code| suffix.is_match(&code[parent.len()..]))
            .cloned()
            .collect()
    }

    pub fn has_children(&self, parent: &str) -> bool {
        !self.child_codes_of(parent).is_empty()
    }

    /// Child codes of `parent` resolved to options through the store.
    ///
    /// A code that does not resolve is skipped rather than failing the list.
    pub fn options(&self, store: &HierarchyStore, parent: &str) -> Vec<CandidateOption> {
        self.child_codes_of(parent)
            .into_iter()
            .filter_map(|code| match store.lookup(&code) {
                Some(node) => Some(CandidateOption {
                    code: node.code.trim().to_string(),
                    description: node.description.clone(),
                    duty_rates: node.duty_rates.clone(),
                }),
                None => {
                    debug!("Skipping unresolvable option {:?}", code);
                    None
                }
            })
            .collect()
    }
}
