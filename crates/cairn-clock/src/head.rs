use std::fmt;

use cairn_types::Cid;
use serde::{Deserialize, Serialize};

/// The frontier of the event DAG: events with no known descendant.
///
/// Always sorted and free of duplicates, so equal sets compare, hash, and
/// serialize identically.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Cid>", into = "Vec<Cid>")]
pub struct Head(Vec<Cid>);

impl Head {
    pub fn new(tips: impl IntoIterator<Item = Cid>) -> Self {
        let mut tips: Vec<Cid> = tips.into_iter().collect();
        tips.sort();
        tips.dedup();
        Self(tips)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn single(tip: Cid) -> Self {
        Self(vec![tip])
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.0.binary_search(cid).is_ok()
    }

    pub fn insert(&mut self, cid: Cid) {
        if let Err(pos) = self.0.binary_search(&cid) {
            self.0.insert(pos, cid);
        }
    }

    pub fn remove(&mut self, cid: &Cid) -> bool {
        match self.0.binary_search(cid) {
            Ok(pos) => {
                self.0.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cid> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Cid] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<Cid> {
        self.0.clone()
    }
}

impl From<Vec<Cid>> for Head {
    fn from(tips: Vec<Cid>) -> Self {
        Self::new(tips)
    }
}

impl From<Head> for Vec<Cid> {
    fn from(head: Head) -> Self {
        head.0
    }
}

impl FromIterator<Cid> for Head {
    fn from_iter<I: IntoIterator<Item = Cid>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a Head {
    type Item = &'a Cid;
    type IntoIter = std::slice::Iter<'a, Cid>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Debug for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_insensitive() {
        let a = Cid::from_bytes(b"a");
        let b = Cid::from_bytes(b"b");
        assert_eq!(Head::new([a, b]), Head::new([b, a, b]));
        assert_eq!(Head::new([a, b]).len(), 2);
    }

    #[test]
    fn insert_remove_keep_sorted() {
        let ids: Vec<Cid> = (0u8..5).map(|i| Cid::from_bytes(&[i])).collect();
        let mut head = Head::empty();
        for id in ids.iter().rev() {
            head.insert(*id);
        }
        head.insert(ids[0]);
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(head.as_slice(), sorted.as_slice());
        assert!(head.remove(&ids[2]));
        assert!(!head.remove(&ids[2]));
        assert!(!head.contains(&ids[2]));
        assert_eq!(head.len(), 4);
    }
}
