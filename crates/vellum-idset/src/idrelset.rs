//! Full-text posting lists.
//!
//! One [`IdRel`] records every occurrence of a token inside one document:
//! a 64-bit mask of the fields it appears in and packed `(position, field)`
//! pairs. The [`IdRelSet`] is the per-word list of these, kept sorted by
//! row id after [`IdRelSet::commit`].

use vellum_types::RowId;

/// Packed word position: position in the high bits, field in the low 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PosField(u32);

impl PosField {
    const FIELD_BITS: u32 = 8;

    #[must_use]
    pub fn new(pos: u32, field: u8) -> Self {
        Self((pos << Self::FIELD_BITS) | u32::from(field))
    }

    #[must_use]
    pub const fn pos(self) -> u32 {
        self.0 >> Self::FIELD_BITS
    }

    #[must_use]
    pub const fn field(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

/// Occurrences of one token in one document.
#[derive(Debug, Clone, Default)]
pub struct IdRel {
    pub id: RowId,
    positions: Vec<PosField>,
}

impl IdRel {
    #[must_use]
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            positions: Vec::new(),
        }
    }

    pub fn add(&mut self, pos: u32, field: u8) {
        self.positions.push(PosField::new(pos, field));
    }

    #[must_use]
    pub fn positions(&self) -> &[PosField] {
        &self.positions
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.positions.len()
    }

    /// Bitmap of fields this token occurs in.
    #[must_use]
    pub fn used_fields_mask(&self) -> u64 {
        let mut mask = 0u64;
        for p in &self.positions {
            if p.field() < 64 {
                mask |= 1 << p.field();
            }
        }
        mask
    }

    /// Occurrence count within one field.
    #[must_use]
    pub fn words_in_field(&self, field: u8) -> usize {
        self.positions.iter().filter(|p| p.field() == field).count()
    }

    /// Smallest position within one field, or `u32::MAX` when absent.
    #[must_use]
    pub fn min_position_in_field(&self, field: u8) -> u32 {
        self.positions
            .iter()
            .filter(|p| p.field() == field)
            .map(|p| p.pos())
            .min()
            .unwrap_or(u32::MAX)
    }

    /// Minimum absolute distance between any of this token's positions and
    /// any of `other`'s, capped at `max`. Fields are ignored: adjacent
    /// terms in different fields never merge anyway (their ranks differ).
    #[must_use]
    pub fn distance(&self, other: &Self, max: u32) -> u32 {
        let mut best = max;
        for a in &self.positions {
            for b in &other.positions {
                if a.field() != b.field() {
                    continue;
                }
                let d = a.pos().abs_diff(b.pos());
                if d < best {
                    best = d;
                }
            }
        }
        best
    }
}

/// Per-word posting list.
#[derive(Debug, Clone, Default)]
pub struct IdRelSet {
    rels: Vec<IdRel>,
    max_id: RowId,
}

impl IdRelSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence; returns the token's new occurrence count in
    /// `field` for the document (the most-frequent-word tracker feeds on
    /// this).
    pub fn add(&mut self, id: RowId, pos: u32, field: u8) -> usize {
        match self.rels.last_mut() {
            Some(last) if last.id == id => {
                last.add(pos, field);
                last.words_in_field(field)
            }
            _ => {
                let mut rel = IdRel::new(id);
                rel.add(pos, field);
                self.rels.push(rel);
                if id > self.max_id {
                    self.max_id = id;
                }
                1
            }
        }
    }

    /// Sort by row id after a parallel build merged worker shards.
    pub fn commit(&mut self) {
        self.rels.sort_by_key(|r| r.id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IdRel> {
        self.rels.iter()
    }

    pub fn extend_from(&mut self, other: Self) {
        for rel in other.rels {
            if rel.id > self.max_id {
                self.max_id = rel.id;
            }
            self.rels.push(rel);
        }
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.rels.len() * std::mem::size_of::<IdRel>()
            + self
                .rels
                .iter()
                .map(|r| r.positions.len() * std::mem::size_of::<PosField>())
                .sum::<usize>()
    }
}

impl<'a> IntoIterator for &'a IdRelSet {
    type Item = &'a IdRel;
    type IntoIter = std::slice::Iter<'a, IdRel>;

    fn into_iter(self) -> Self::IntoIter {
        self.rels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posfield_pack() {
        let p = PosField::new(1234, 3);
        assert_eq!(p.pos(), 1234);
        assert_eq!(p.field(), 3);
    }

    #[test]
    fn test_add_tracks_per_field_count() {
        let mut set = IdRelSet::new();
        assert_eq!(set.add(1, 0, 0), 1);
        assert_eq!(set.add(1, 5, 0), 2);
        assert_eq!(set.add(1, 2, 1), 1);
        assert_eq!(set.add(2, 0, 0), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_fields_mask_and_min_pos() {
        let mut set = IdRelSet::new();
        set.add(1, 7, 0);
        set.add(1, 3, 2);
        let rel = set.iter().next().unwrap();
        assert_eq!(rel.used_fields_mask(), 0b101);
        assert_eq!(rel.min_position_in_field(0), 7);
        assert_eq!(rel.min_position_in_field(2), 3);
        assert_eq!(rel.min_position_in_field(5), u32::MAX);
    }

    #[test]
    fn test_distance() {
        let mut a = IdRel::new(1);
        a.add(10, 0);
        let mut b = IdRel::new(1);
        b.add(12, 0);
        b.add(100, 1);
        assert_eq!(a.distance(&b, u32::MAX), 2);
        let mut c = IdRel::new(1);
        c.add(5, 3);
        assert_eq!(a.distance(&c, 1000), 1000);
    }
}
