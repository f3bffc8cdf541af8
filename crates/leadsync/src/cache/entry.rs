//! Cache entry shapes and the shape-agnostic patch operations.

use crate::model::{Job, Lead};

/// An entity that can live in the cache.
pub trait Entity: Clone + std::fmt::Debug + PartialEq + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// True for locally generated stand-ins awaiting a store identity.
    fn is_placeholder(&self) -> bool {
        false
    }

    /// Whether `incoming` may overwrite this cached copy.
    fn accepts_replacement(&self, _incoming: &Self) -> bool {
        true
    }
}

impl Entity for Job {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_placeholder(&self) -> bool {
        Job::is_placeholder(self)
    }

    fn accepts_replacement(&self, incoming: &Self) -> bool {
        Job::accepts_replacement(self, incoming)
    }
}

impl Entity for Lead {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Paginated envelope: one page of rows plus the total row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<E> {
    pub data: Vec<E>,
    pub count: u64,
}

/// A materialized view, either a flat collection or a page envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry<E> {
    Collection(Vec<E>),
    Page(Page<E>),
}

impl<E: Entity> CacheEntry<E> {
    pub fn page(data: Vec<E>, count: u64) -> Self {
        CacheEntry::Page(Page { data, count })
    }

    pub fn items(&self) -> &[E] {
        match self {
            CacheEntry::Collection(items) => items,
            CacheEntry::Page(page) => &page.data,
        }
    }

    fn items_mut(&mut self) -> &mut Vec<E> {
        match self {
            CacheEntry::Collection(items) => items,
            CacheEntry::Page(page) => &mut page.data,
        }
    }

    /// Total row count: the envelope count for pages, the length otherwise.
    pub fn total(&self) -> u64 {
        match self {
            CacheEntry::Collection(items) => items.len() as u64,
            CacheEntry::Page(page) => page.count,
        }
    }

    pub fn find(&self, id: &str) -> Option<&E> {
        self.items().iter().find(|item| item.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Applies `f` to every matching row. Returns the number of rows touched.
    pub fn patch_where<P, F>(&mut self, mut pred: P, mut f: F) -> usize
    where
        P: FnMut(&E) -> bool,
        F: FnMut(&mut E),
    {
        let mut touched = 0;
        for item in self.items_mut().iter_mut() {
            if pred(item) {
                f(item);
                touched += 1;
            }
        }
        touched
    }

    /// Replaces the row with the same identity, if present and accepted.
    pub fn replace(&mut self, incoming: &E) -> bool {
        for item in self.items_mut().iter_mut() {
            if item.id() == incoming.id() {
                if !item.accepts_replacement(incoming) {
                    return false;
                }
                *item = incoming.clone();
                return true;
            }
        }
        false
    }

    /// Swaps the row identified by `id` for `incoming` in place.
    pub fn swap(&mut self, id: &str, incoming: E) -> bool {
        match self.items_mut().iter_mut().find(|item| item.id() == id) {
            Some(item) => {
                *item = incoming;
                true
            }
            None => false,
        }
    }

    /// Removes matching rows, keeping a page's count consistent.
    pub fn remove_where<P>(&mut self, mut pred: P) -> usize
    where
        P: FnMut(&E) -> bool,
    {
        let items = self.items_mut();
        let before = items.len();
        items.retain(|item| !pred(item));
        let removed = before - items.len();
        if let CacheEntry::Page(page) = self {
            page.count = page.count.saturating_sub(removed as u64);
        }
        removed
    }

    /// Inserts a row at the head of the view.
    pub fn prepend(&mut self, item: E) {
        self.items_mut().insert(0, item);
        if let CacheEntry::Page(page) = self {
            page.count += 1;
        }
    }

    /// Installs fetched rows, keeping what the cache must not lose: rows a
    /// refused replacement would regress, and in-flight placeholders.
    pub fn merge_fetched(&self, fetched: CacheEntry<E>) -> CacheEntry<E> {
        let mut merged = fetched;
        for item in merged.items_mut().iter_mut() {
            if let Some(cached) = self.find(item.id()) {
                if !cached.accepts_replacement(item) {
                    *item = cached.clone();
                }
            }
        }
        let placeholders: Vec<E> = self
            .items()
            .iter()
            .filter(|item| item.is_placeholder())
            .cloned()
            .collect();
        for placeholder in placeholders.into_iter().rev() {
            merged.prepend(placeholder);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::job::tests::sample_job;
    use crate::model::lead::tests::sample_lead;
    use crate::model::JobStatus;

    fn both_shapes() -> Vec<CacheEntry<Lead>> {
        let rows = vec![sample_lead("a"), sample_lead("b"), sample_lead("c")];
        vec![
            CacheEntry::Collection(rows.clone()),
            CacheEntry::page(rows[..2].to_vec(), 3),
        ]
    }

    #[test]
    fn test_patch_where_dispatches_on_shape() {
        for mut entry in both_shapes() {
            let touched = entry.patch_where(|l| l.id == "b", |l| l.current_step_index = 9);
            assert_eq!(touched, 1);
            assert_eq!(entry.find("b").unwrap().current_step_index, 9);
            assert_eq!(entry.find("a").unwrap().current_step_index, 3);
        }
    }

    #[test]
    fn test_remove_where_adjusts_page_count() {
        let mut shapes = both_shapes();
        let removed = shapes[1].remove_where(|l| l.id == "a");
        assert_eq!(removed, 1);
        assert_eq!(shapes[1].total(), 2);
        assert_eq!(shapes[1].items().len(), 1);

        shapes[0].remove_where(|l| l.id == "a" || l.id == "c");
        assert_eq!(shapes[0].total(), 1);
    }

    #[test]
    fn test_prepend_updates_count() {
        let mut entry = CacheEntry::page(vec![sample_lead("a")], 10);
        entry.prepend(sample_lead("z"));
        assert_eq!(entry.items()[0].id, "z");
        assert_eq!(entry.total(), 11);
    }

    #[test]
    fn test_replace_respects_monotonic_jobs() {
        let mut entry = CacheEntry::Collection(vec![sample_job("j1", JobStatus::Completed)]);
        assert!(!entry.replace(&sample_job("j1", JobStatus::Processing)));
        assert_eq!(entry.find("j1").unwrap().status, JobStatus::Completed);

        let mut entry = CacheEntry::Collection(vec![sample_job("j1", JobStatus::Pending)]);
        assert!(entry.replace(&sample_job("j1", JobStatus::Processing)));
        assert!(!entry.replace(&sample_job("missing", JobStatus::Processing)));
    }

    #[test]
    fn test_merge_fetched_keeps_terminal_and_placeholders() {
        let mut placeholder = sample_job("x", JobStatus::Pending);
        placeholder.id = format!("{}abc", crate::model::PLACEHOLDER_PREFIX);
        let cached = CacheEntry::Collection(vec![
            placeholder.clone(),
            sample_job("j1", JobStatus::Completed),
        ]);
        let fetched = CacheEntry::Collection(vec![
            sample_job("j1", JobStatus::Processing),
            sample_job("j2", JobStatus::Pending),
        ]);

        let merged = cached.merge_fetched(fetched);
        assert_eq!(merged.items().len(), 3);
        assert_eq!(merged.items()[0].id, placeholder.id);
        assert_eq!(merged.find("j1").unwrap().status, JobStatus::Completed);
        assert!(merged.contains("j2"));
    }
}
