use std::slice;

use serde::{Deserialize, Serialize};

use crate::link::Link;

/// The causal frontier of a clock: event links none of which is an
/// ancestor of another.
///
/// [`advance`](super::advance) keeps insertion order; [`Head::canonical`]
/// and [`Head::apply`] produce the sorted, de-duplicated form that is
/// persisted and compared across replicas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Head(Vec<Link>);

impl Head {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap links as given, without sorting.
    #[must_use]
    pub const fn from_links(links: Vec<Link>) -> Self {
        Self(links)
    }

    /// Sorted and de-duplicated.
    #[must_use]
    pub fn canonical(links: impl IntoIterator<Item = Link>) -> Self {
        let mut links: Vec<Link> = links.into_iter().collect();
        links.sort();
        links.dedup();
        Self(links)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Link] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, link: &Link) -> bool {
        self.0.contains(link)
    }

    pub fn iter(&self) -> slice::Iter<'_, Link> {
        self.0.iter()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Link> {
        self.0
    }

    /// Whether this head is already in canonical form.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.0.windows(2).all(|pair| pair[0] < pair[1])
    }

    /// Fold a writer's result into the current head.
    ///
    /// `prev` is the head the writer started from and `new` the head it
    /// produced. Links of `self` that the writer did not see survive, links
    /// it consumed are dropped, and `new` is unioned in. The result is
    /// canonical.
    #[must_use]
    pub fn apply(&self, new: &[Link], prev: &[Link]) -> Self {
        let kept = self.0.iter().filter(|link| !prev.contains(link)).cloned();
        Self::canonical(kept.chain(new.iter().cloned()))
    }
}

impl From<Vec<Link>> for Head {
    fn from(links: Vec<Link>) -> Self {
        Self(links)
    }
}

impl<'a> IntoIterator for &'a Head {
    type Item = &'a Link;
    type IntoIter = slice::Iter<'a, Link>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
