//! The static geometry of a grid (cells, entries, cell↔entry map) and the incremental state
//! of a partial fill (cell letters, per-entry candidate bitmaps, completion flags, per-entry
//! cost lower bounds). Entry extraction follows `examples/original_source/solver.py`'s
//! `Grid.__init__` (the across-then-down, row-major discovery order, and the
//! start-of-entry/maximality test) one for one; everything downstream of that — the
//! bitmap-backed candidate sets and the cost lower bound — is this spec's own addition over
//! that reference.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Direction, EntryId, WordId};
use crate::word_db::{Bitmap, WordDb};
use crate::MAX_ENTRY_LENGTH;

/// One cell of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// A fixed uppercase ASCII letter.
    Letter(u8),
    /// A block; never mutated after construction.
    Block,
    /// Not yet filled.
    Blank,
}

impl Cell {
    fn to_char(self) -> char {
        match self {
            Cell::Letter(b) => b as char,
            Cell::Block => '.',
            Cell::Blank => ' ',
        }
    }
}

/// Static, immutable-after-construction geometry for one entry.
#[derive(Debug)]
pub struct EntryInfo {
    pub id: EntryId,
    pub direction: Direction,
    /// Linear cell indices, in entry order (start to end).
    pub cells: SmallVec<[usize; MAX_ENTRY_LENGTH]>,
}

impl EntryInfo {
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false // an EntryInfo is never constructed with fewer than 2 cells
    }
}

/// Per-entry fields that change as the grid is filled.
#[derive(Debug, Clone)]
struct EntryState {
    bitmap: Bitmap,
    is_complete: bool,
    min_cost: f64,
}

/// Immutable geometry shared by every `GridModel` descended from the same template: which
/// cells belong to which entries, and the cell→entry lookup. Wrapped in `Rc` so children
/// derived by [`GridModel::with_entry_decided`] don't have to re-derive or deep-copy it.
struct Geometry {
    width: usize,
    height: usize,
    entries: Vec<EntryInfo>,
    /// `entries_by_cell[cell][direction.index()]` is `Some((entry_id, position))` if this
    /// cell belongs to an entry running in that direction.
    entries_by_cell: Vec<[Option<(EntryId, usize)>; 2]>,
}

/// A grid, either freshly parsed from a template or a descendant produced by committing one
/// more word via [`GridModel::with_entry_decided`].
#[derive(Clone)]
pub struct GridModel<'db> {
    db: &'db WordDb,
    geometry: Rc<Geometry>,
    cells: Vec<Cell>,
    entry_state: Vec<EntryState>,
    used_words: HashSet<Box<str>>,
}

fn is_block_char(c: u8) -> bool {
    c == b'.' || c == b'#'
}

fn validate_and_normalize_char(c: char) -> Result<u8> {
    if c.is_ascii_alphabetic() {
        Ok(c.to_ascii_uppercase() as u8)
    } else if c == ' ' || c == '.' || c == '#' {
        Ok(c as u8)
    } else {
        Err(Error::MalformedTemplate(format!(
            "character {c:?} is not one of A-Z, a-z, '.', '#', or a space"
        )))
    }
}

impl<'db> GridModel<'db> {
    /// Parse a grid template (§6 format) into a fresh `GridModel` with entries extracted and
    /// initial bitmaps computed. Fails with `InfeasibleTemplate` if any entry's initial
    /// bitmap is empty (including the case of a pre-filled word absent from the database).
    pub fn from_template(db: &'db WordDb, template: &str) -> Result<GridModel<'db>> {
        let trimmed = template.trim_matches('\n');
        if trimmed.is_empty() {
            return Err(Error::MalformedTemplate("template is empty".into()));
        }

        let raw_lines: Vec<&str> = trimmed.split('\n').collect();
        let width = raw_lines[0].chars().count();
        if width == 0 {
            return Err(Error::MalformedTemplate("template rows are empty".into()));
        }
        let height = raw_lines.len();

        let mut cells = Vec::with_capacity(width * height);
        for (row_idx, line) in raw_lines.iter().enumerate() {
            let chars: Vec<char> = line.chars().collect();
            if chars.len() != width {
                return Err(Error::MalformedTemplate(format!(
                    "row {row_idx} has width {}, expected {width}",
                    chars.len()
                )));
            }
            for c in chars {
                let normalized = validate_and_normalize_char(c)?;
                cells.push(match normalized {
                    b' ' => Cell::Blank,
                    b'.' | b'#' => Cell::Block,
                    letter => Cell::Letter(letter),
                });
            }
        }

        let is_block = |cells: &[Cell], x: usize, y: usize| -> bool {
            matches!(cells[y * width + x], Cell::Block)
        };

        let mut entries = Vec::new();
        let mut entries_by_cell: Vec<[Option<(EntryId, usize)>; 2]> = vec![[None, None]; width * height];

        for direction in [Direction::Across, Direction::Down] {
            let (xincr, yincr) = match direction {
                Direction::Across => (1usize, 0usize),
                Direction::Down => (0usize, 1usize),
            };

            for y in 0..height {
                for x in 0..width {
                    if is_block(&cells, x, y) {
                        continue;
                    }
                    let start_of_row = match direction {
                        Direction::Across => x == 0,
                        Direction::Down => y == 0,
                    };

                    let starts_here = if start_of_row {
                        true
                    } else {
                        is_block(&cells, x - xincr, y - yincr)
                    };
                    if !starts_here {
                        continue;
                    }

                    let extends = x + xincr < width && y + yincr < height && !is_block(&cells, x + xincr, y + yincr);
                    if !extends {
                        // Maximal run of length 1 (orphan cell): not recorded as an entry.
                        continue;
                    }

                    let mut entry_cells: SmallVec<[usize; MAX_ENTRY_LENGTH]> = SmallVec::new();
                    let (mut xt, mut yt) = (x, y);
                    while xt < width && yt < height && !is_block(&cells, xt, yt) {
                        entry_cells.push(yt * width + xt);
                        xt += xincr;
                        yt += yincr;
                    }

                    if entry_cells.len() > MAX_ENTRY_LENGTH {
                        return Err(Error::MalformedTemplate(format!(
                            "entry of length {} exceeds MAX_ENTRY_LENGTH ({MAX_ENTRY_LENGTH})",
                            entry_cells.len()
                        )));
                    }

                    let entry_id = EntryId(entries.len() as u32);
                    for (position, &cell_idx) in entry_cells.iter().enumerate() {
                        entries_by_cell[cell_idx][direction.index()] = Some((entry_id, position));
                    }
                    entries.push(EntryInfo {
                        id: entry_id,
                        direction,
                        cells: entry_cells,
                    });
                }
            }
        }

        let geometry = Rc::new(Geometry {
            width,
            height,
            entries,
            entries_by_cell,
        });

        let mut used_words = HashSet::new();
        let mut entry_state = Vec::with_capacity(geometry.entries.len());

        for entry in &geometry.entries {
            let pattern: String = entry
                .cells
                .iter()
                .map(|&cell_idx| match cells[cell_idx] {
                    Cell::Letter(b) => b as char,
                    Cell::Blank => ' ',
                    Cell::Block => unreachable!("block cell cannot be part of an entry"),
                })
                .collect();

            let bitmap = db.matching_bitmap_from_pattern(&pattern);
            if bitmap.is_empty_constrained() {
                return Err(Error::InfeasibleTemplate(format!(
                    "entry {} (pattern {pattern:?}) has no matching words",
                    entry.id
                )));
            }

            let is_complete = !pattern.contains(' ');
            if is_complete {
                if used_words.contains(pattern.as_str()) {
                    return Err(Error::InfeasibleTemplate(format!(
                        "word {pattern:?} is pre-filled more than once"
                    )));
                }
                used_words.insert(pattern.clone().into_boxed_str());
            }

            let min_cost = db
                .min_cost(entry.cells.len(), &bitmap)
                .expect("non-empty-constrained bitmap always has a cost");

            entry_state.push(EntryState {
                bitmap,
                is_complete,
                min_cost,
            });
        }

        debug!(
            width,
            height,
            num_entries = geometry.entries.len(),
            "parsed grid template"
        );

        Ok(GridModel {
            db,
            geometry,
            cells,
            entry_state,
            used_words,
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.geometry.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.geometry.height
    }

    #[must_use]
    pub fn entries(&self) -> &[EntryInfo] {
        &self.geometry.entries
    }

    #[must_use]
    pub fn entry_len(&self, entry_id: EntryId) -> usize {
        self.geometry.entries[entry_id.as_usize()].len()
    }

    #[must_use]
    pub fn entry_bitmap(&self, entry_id: EntryId) -> &Bitmap {
        &self.entry_state[entry_id.as_usize()].bitmap
    }

    #[must_use]
    pub fn is_complete(&self, entry_id: EntryId) -> bool {
        self.entry_state[entry_id.as_usize()].is_complete
    }

    #[must_use]
    pub fn entry_min_cost(&self, entry_id: EntryId) -> f64 {
        self.entry_state[entry_id.as_usize()].min_cost
    }

    #[must_use]
    pub fn used_words(&self) -> &HashSet<Box<str>> {
        &self.used_words
    }

    /// The cost lower bound for the whole grid: the sum of every entry's `min_cost`.
    #[must_use]
    pub fn min_cost(&self) -> f64 {
        self.entry_state.iter().map(|s| s.min_cost).sum()
    }

    /// Every entry index with at least one blank cell remaining.
    #[must_use]
    pub fn incomplete_entries(&self) -> Vec<EntryId> {
        self.geometry
            .entries
            .iter()
            .filter(|e| !self.entry_state[e.id.as_usize()].is_complete)
            .map(|e| e.id)
            .collect()
    }

    /// The current state of the cell at `position` within `entry_id`.
    #[must_use]
    pub fn entry_cell(&self, entry_id: EntryId, position: usize) -> Cell {
        let cell_idx = self.geometry.entries[entry_id.as_usize()].cells[position];
        self.cells[cell_idx]
    }

    /// The crossing entry and position for each cell of `entry_id`, in entry order. `None`
    /// where the cell has no entry in the other direction.
    #[must_use]
    pub fn crosses(&self, entry_id: EntryId) -> Vec<Option<(EntryId, usize)>> {
        let entry = &self.geometry.entries[entry_id.as_usize()];
        let other_direction = match entry.direction {
            Direction::Across => Direction::Down,
            Direction::Down => Direction::Across,
        };
        entry
            .cells
            .iter()
            .map(|&cell_idx| self.geometry.entries_by_cell[cell_idx][other_direction.index()])
            .collect()
    }

    /// Render the grid's current state back into the §6 template format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity((self.width() + 1) * self.height());
        for y in 0..self.height() {
            for x in 0..self.width() {
                out.push(self.cells[y * self.width() + x].to_char());
            }
            if y + 1 < self.height() {
                out.push('\n');
            }
        }
        out
    }

    /// Assign `word_id` to `entry_id`, propagating the new letters into every crossing
    /// entry. Returns `Ok(None)` if this drives some crossing bitmap to empty or duplicates
    /// an already-used word (spec property 5); `Err` only for a genuine invariant violation
    /// (a cell conflict between an existing letter and the word being committed).
    pub fn with_entry_decided(&self, entry_id: EntryId, word_id: WordId) -> Result<Option<GridModel<'db>>> {
        let entry = &self.geometry.entries[entry_id.as_usize()];
        let length = entry.len();
        let (word, score) = self.db.word(length, word_id);
        let word: Box<str> = word.into();

        if self.used_words.contains(&word) {
            return Ok(None);
        }

        let mut cells = self.cells.clone();
        let mut entry_state = self.entry_state.clone();
        let mut used_words = self.used_words.clone();

        let other_direction = match entry.direction {
            Direction::Across => Direction::Down,
            Direction::Down => Direction::Across,
        };

        for (position, &cell_idx) in entry.cells.iter().enumerate() {
            let letter = word.as_bytes()[position];

            match cells[cell_idx] {
                Cell::Block => {
                    return Err(Error::InternalConsistencyError {
                        entry: entry_id,
                        detail: "entry cell is a block".into(),
                    })
                }
                Cell::Letter(existing) if existing == letter => continue,
                Cell::Letter(existing) => {
                    return Err(Error::InternalConsistencyError {
                        entry: entry_id,
                        detail: format!(
                            "cell {cell_idx} already holds {} but committed word wants {}",
                            existing as char, letter as char
                        ),
                    })
                }
                Cell::Blank => {}
            }

            cells[cell_idx] = Cell::Letter(letter);

            let Some((cross_id, cross_pos)) = self.geometry.entries_by_cell[cell_idx][other_direction.index()]
            else {
                continue;
            };

            let cross_entry = &self.geometry.entries[cross_id.as_usize()];
            let cross_length = cross_entry.len();
            let cross_state = &mut entry_state[cross_id.as_usize()];
            cross_state.bitmap = self.db.update_bitmap(cross_length, &cross_state.bitmap, cross_pos, letter);

            if cross_state.bitmap.is_empty_constrained() {
                return Ok(None);
            }

            let cross_now_complete = cross_entry
                .cells
                .iter()
                .all(|&c| !matches!(cells[c], Cell::Blank));

            if cross_now_complete && !cross_state.is_complete {
                let (cross_word, cross_score) = self
                    .db
                    .highest_score(cross_length, &cross_state.bitmap)
                    .map(|(_, w, s)| (w.to_owned(), s))
                    .expect("non-empty bitmap has a highest-scoring word");

                if used_words.contains(cross_word.as_str()) {
                    return Ok(None);
                }

                cross_state.is_complete = true;
                cross_state.min_cost = 1.0 / f64::from(cross_score);
                used_words.insert(cross_word.into_boxed_str());
            }
        }

        let own_bitmap = Bitmap::singleton(word_id);
        entry_state[entry_id.as_usize()] = EntryState {
            bitmap: own_bitmap,
            is_complete: true,
            min_cost: 1.0 / f64::from(score),
        };
        used_words.insert(word);

        let child = GridModel {
            db: self.db,
            geometry: Rc::clone(&self.geometry),
            cells,
            entry_state,
            used_words,
        };

        #[cfg(feature = "check_invariants")]
        child.check_invariants();

        Ok(Some(child))
    }

    /// Recompute every entry's bitmap from its current cell letters and assert it matches the
    /// incrementally maintained one (testable property 1: bitmap/letters agreement).
    #[cfg(feature = "check_invariants")]
    fn check_invariants(&self) {
        for entry in &self.geometry.entries {
            let pattern: String = entry
                .cells
                .iter()
                .map(|&cell_idx| match self.cells[cell_idx] {
                    Cell::Letter(b) => b as char,
                    Cell::Blank => ' ',
                    Cell::Block => unreachable!("block cell cannot be part of an entry"),
                })
                .collect();
            let recomputed = self.db.matching_bitmap_from_pattern(&pattern);
            let state = &self.entry_state[entry.id.as_usize()];
            assert_eq!(
                self.db.num_matches(entry.len(), &recomputed),
                self.db.num_matches(entry.len(), &state.bitmap),
                "entry {} bitmap diverged from its letter pattern {pattern:?}",
                entry.id
            );
        }
    }

    /// The connected components of the incomplete-entry graph (two entries are connected if
    /// they share a currently-blank cell), restricted to `restrict` if given. Each component
    /// is an independent fill subproblem (§4.2).
    #[must_use]
    pub fn stable_subsets(&self, restrict: Option<&HashSet<EntryId>>) -> Vec<Vec<EntryId>> {
        let candidates: Vec<EntryId> = self
            .incomplete_entries()
            .into_iter()
            .filter(|id| restrict.map_or(true, |r| r.contains(id)))
            .collect();
        let candidate_set: HashSet<EntryId> = candidates.iter().copied().collect();

        let mut parent: HashMap<EntryId, EntryId> = candidates.iter().map(|&id| (id, id)).collect();

        fn find(parent: &mut HashMap<EntryId, EntryId>, x: EntryId) -> EntryId {
            if parent[&x] == x {
                x
            } else {
                let root = find(parent, parent[&x]);
                parent.insert(x, root);
                root
            }
        }

        let union = |parent: &mut HashMap<EntryId, EntryId>, a: EntryId, b: EntryId| {
            let ra = find(parent, a);
            let rb = find(parent, b);
            if ra != rb {
                parent.insert(ra, rb);
            }
        };

        for cell_idx in 0..self.cells.len() {
            if !matches!(self.cells[cell_idx], Cell::Blank) {
                continue;
            }
            let across = self.geometry.entries_by_cell[cell_idx][Direction::Across.index()];
            let down = self.geometry.entries_by_cell[cell_idx][Direction::Down.index()];
            if let (Some((a, _)), Some((d, _))) = (across, down) {
                if candidate_set.contains(&a) && candidate_set.contains(&d) {
                    union(&mut parent, a, d);
                }
            }
        }

        let mut groups: HashMap<EntryId, Vec<EntryId>> = HashMap::new();
        for &id in &candidates {
            let root = find(&mut parent, id);
            groups.entry(root).or_default().push(id);
        }

        // `HashMap` iteration order is randomized per process; returning it directly would make
        // which component gets solved first (and so which word a shared length bucket yields to
        // which component) nondeterministic across runs. Sort each component and order
        // components by their lowest entry id so the result is reproducible.
        let mut result: Vec<Vec<EntryId>> = groups.into_values().collect();
        for group in &mut result {
            group.sort();
        }
        result.sort_by_key(|group| group[0]);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word_db::tests::test_word_db;

    #[test]
    fn extracts_two_entries_from_2x2_grid() {
        let db = test_word_db();
        let grid = GridModel::from_template(&db, "CA\nAT").unwrap();
        assert_eq!(grid.entries().len(), 2);
        assert!(grid.entries().iter().all(|e| e.len() == 2));
    }

    #[test]
    fn block_only_grid_has_no_entries() {
        let db = test_word_db();
        let grid = GridModel::from_template(&db, "A.\n.B").unwrap();
        assert!(grid.entries().is_empty());
        assert_eq!(grid.min_cost(), 0.0);
    }

    #[test]
    fn blank_entry_starts_unconstrained_then_narrows() {
        let db = test_word_db();
        let grid = GridModel::from_template(&db, "H LLO").unwrap();
        assert_eq!(grid.entries().len(), 1);
        let entry_id = grid.entries()[0].id;
        assert!(!grid.is_complete(entry_id));
        assert_eq!(db.num_matches(5, grid.entry_bitmap(entry_id)), 1);
    }

    #[test]
    fn infeasible_template_is_rejected() {
        let db = test_word_db();
        let err = GridModel::from_template(&db, "ZZ\nZZ").unwrap_err();
        assert!(matches!(err, Error::InfeasibleTemplate(_)));
    }

    #[test]
    fn with_entry_decided_propagates_to_crossings() {
        let db = test_word_db();
        let grid = GridModel::from_template(&db, "  \n  ").unwrap();
        let across0 = grid
            .entries()
            .iter()
            .find(|e| matches!(e.direction, Direction::Across) && e.cells[0] == 0)
            .unwrap()
            .id;

        let (word_id, _, _) = db.highest_score(2, grid.entry_bitmap(across0)).unwrap();
        let child = grid.with_entry_decided(across0, word_id).unwrap().unwrap();
        assert!(child.is_complete(across0));

        // Both down entries should have narrowed.
        for entry in child.entries() {
            if matches!(entry.direction, Direction::Down) {
                assert!(db.num_matches(2, child.entry_bitmap(entry.id)) <= db.bucket_len(2));
            }
        }
    }

    #[test]
    fn committing_a_word_registers_it_as_used() {
        let db = test_word_db();
        let grid = GridModel::from_template(&db, "  ").unwrap();
        let entry0 = grid.entries()[0].id;
        let (word_id, word, _) = db.highest_score(2, grid.entry_bitmap(entry0)).unwrap();
        let word = word.to_owned();
        let child = grid.with_entry_decided(entry0, word_id).unwrap().unwrap();
        assert!(child.used_words().contains(word.as_str()));
    }

    #[test]
    fn reusing_a_word_across_entries_is_rejected() {
        let db = test_word_db();
        // Two 2-cell across entries separated by a block row; no down entries of length >=2.
        let grid = GridModel::from_template(&db, "  \n..\n  ").unwrap();
        let entries: Vec<EntryId> = grid.entries().iter().map(|e| e.id).collect();
        assert_eq!(entries.len(), 2);

        let (word_id, _, _) = db.highest_score(2, grid.entry_bitmap(entries[0])).unwrap();
        let grid = grid.with_entry_decided(entries[0], word_id).unwrap().unwrap();
        // Committing the exact same word to the other entry must be rejected.
        assert!(grid.with_entry_decided(entries[1], word_id).unwrap().is_none());
    }

    #[test]
    fn stable_subsets_splits_independent_regions() {
        let db = test_word_db();
        // Two 2-cell across entries separated by a block row; no shared crossings.
        let grid = GridModel::from_template(&db, "  \n..\n  ").unwrap();
        let subsets = grid.stable_subsets(None);
        assert_eq!(subsets.len(), 2);
    }
}
