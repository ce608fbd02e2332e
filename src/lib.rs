//! A crossword filling engine built as a constraint-satisfaction solver:
//! node and arc consistency over per-slot word domains, then backtracking
//! search with minimum-remaining-values and least-constraining-value
//! ordering, propagating constraints after every tentative assignment.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Formatter};

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::{debug, info};
use smallvec::SmallVec;
use thiserror::Error;

/// The expected maximum number of slots appearing in a grid.
pub const MAX_SLOT_COUNT: usize = 256;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// The character marking a blocked cell in a grid template. Every other
/// non-whitespace character marks a fillable cell.
pub const BLOCK: char = '#';

/// An identifier for a given slot, based on its index in the grid's `slots`
/// field, which also indexes the domain store and assignments.
pub type SlotId = usize;

/// An identifier for a given word, based on its index in the vocabulary.
pub type WordId = usize;

/// Zero-indexed row and column for a cell in the grid, row 0 at the top.
pub type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Across,
    Down,
}

/// A candidate word, with its letters split out so that overlap checks can
/// index a cell's letter directly instead of re-walking the string.
#[derive(Debug, Clone)]
pub struct Word {
    pub text: String,
    pub letters: SmallVec<[char; MAX_SLOT_LENGTH]>,
}

impl Word {
    fn new(text: String) -> Word {
        let letters = text.chars().collect();
        Word { text, letters }
    }
}

/// An immutable, deduplicated word list. Word ids are assigned in insertion
/// order, so the same input always produces the same ids.
pub struct Vocabulary {
    words: Vec<Word>,
}

impl Vocabulary {
    /// Build a vocabulary from raw strings, dropping empty strings and
    /// duplicates. Comparison is exact; no case folding is applied.
    pub fn new<I>(words: I) -> Vocabulary
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut result: Vec<Word> = vec![];

        for word in words {
            let word = word.into();
            if word.is_empty() || !seen.insert(word.clone()) {
                continue;
            }
            result.push(Word::new(word));
        }

        Vocabulary { words: result }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, id: WordId) -> &Word {
        &self.words[id]
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }
}

impl Debug for Vocabulary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary")
            .field("words", &(["(", &self.words.len().to_string(), " entries)"].join("")))
            .finish()
    }
}

/// A struct representing the static identity of a slot: where it starts,
/// which way it runs, and how many cells it covers. Two slots are distinct
/// even when they cover overlapping cells.
#[derive(Debug, Clone)]
pub struct SlotConfig {
    pub id: SlotId,
    pub row: usize,
    pub col: usize,
    pub direction: Direction,
    pub length: usize,
}

impl SlotConfig {
    /// Grid coordinate of the cell at the given offset into this slot.
    pub fn cell(&self, offset: usize) -> GridCoord {
        match self.direction {
            Direction::Across => (self.row, self.col + offset),
            Direction::Down => (self.row + offset, self.col),
        }
    }
}

/// Errors produced while deriving a grid from its textual layout.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("layout has no rows")]
    Empty,

    #[error("layout is not rectangular: row {row} has {found} cells, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("layout contains no slot of length 2 or more")]
    NoSlots,
}

/// The immutable structure of a puzzle: which cells are fillable, the slots
/// derived from them, and how those slots overlap. Nothing here changes once
/// `parse` succeeds.
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<bool>,
    slots: SmallVec<[SlotConfig; MAX_SLOT_COUNT]>,
    overlaps: Vec<Option<(usize, usize)>>,
    neighbors: Vec<BitSet>,
}

impl Debug for Grid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("slots", &self.slots)
            .finish()
    }
}

/// Collect the maximal runs of fillable cells with length 2 or more, first
/// across each row and then down each column. Slot ids follow this scan
/// order, which is what makes search tie-breaking reproducible.
fn find_slots(
    cells: &[bool],
    height: usize,
    width: usize,
) -> SmallVec<[SlotConfig; MAX_SLOT_COUNT]> {
    let mut slots: SmallVec<[SlotConfig; MAX_SLOT_COUNT]> = SmallVec::new();

    for row in 0..height {
        let mut run_start: Option<usize> = None;
        for col in 0..=width {
            let fillable = col < width && cells[row * width + col];
            match (run_start, fillable) {
                (None, true) => run_start = Some(col),
                (Some(start), false) => {
                    if col - start >= 2 {
                        slots.push(SlotConfig {
                            id: slots.len(),
                            row,
                            col: start,
                            direction: Direction::Across,
                            length: col - start,
                        });
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    for col in 0..width {
        let mut run_start: Option<usize> = None;
        for row in 0..=height {
            let fillable = row < height && cells[row * width + col];
            match (run_start, fillable) {
                (None, true) => run_start = Some(row),
                (Some(start), false) => {
                    if row - start >= 2 {
                        slots.push(SlotConfig {
                            id: slots.len(),
                            row: start,
                            col,
                            direction: Direction::Down,
                            length: row - start,
                        });
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    slots
}

impl Grid {
    /// Derive a grid from a textual layout, where `#` marks a blocked cell
    /// and any other character marks a fillable one. Lines are trimmed and
    /// blank lines skipped, so indented template literals work unchanged.
    pub fn parse(template: &str) -> Result<Grid, StructureError> {
        let rows: Vec<Vec<bool>> = template
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    None
                } else {
                    Some(line.chars().map(|c| c != BLOCK).collect())
                }
            })
            .collect();

        if rows.is_empty() {
            return Err(StructureError::Empty);
        }

        let width = rows[0].len();
        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != width {
                return Err(StructureError::RaggedRows {
                    row,
                    expected: width,
                    found: cells.len(),
                });
            }
        }

        let height = rows.len();
        let cells: Vec<bool> = rows.concat();

        let slots = find_slots(&cells, height, width);
        if slots.is_empty() {
            return Err(StructureError::NoSlots);
        }

        // Map each cell to the slots covering it, then read the overlap
        // table straight off the cells that two slots share. A cell is
        // covered by at most one slot per direction, so each pair shares at
        // most one cell.
        let mut slots_by_cell: HashMap<GridCoord, Vec<(SlotId, usize)>> = HashMap::new();
        for slot in &slots {
            for offset in 0..slot.length {
                slots_by_cell.entry(slot.cell(offset)).or_default().push((slot.id, offset));
            }
        }

        let slot_count = slots.len();
        let mut overlaps: Vec<Option<(usize, usize)>> = vec![None; slot_count * slot_count];
        let mut neighbors: Vec<BitSet> =
            (0..slot_count).map(|_| BitSet::with_capacity(slot_count)).collect();

        for entries in slots_by_cell.values() {
            for &(a, i) in entries {
                for &(b, j) in entries {
                    if a != b {
                        overlaps[a * slot_count + b] = Some((i, j));
                        neighbors[a].insert(b);
                    }
                }
            }
        }

        Ok(Grid {
            width,
            height,
            cells,
            slots,
            overlaps,
            neighbors,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_fillable(&self, row: usize, col: usize) -> bool {
        self.cells[row * self.width + col]
    }

    pub fn slots(&self) -> &[SlotConfig] {
        &self.slots
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The single cell two slots share, as (offset in `a`, offset in `b`),
    /// or `None` if the slots do not cross.
    pub fn overlap(&self, a: SlotId, b: SlotId) -> Option<(usize, usize)> {
        self.overlaps[a * self.slots.len() + b]
    }

    /// The slots sharing a cell with the given slot.
    pub fn neighbors(&self, slot: SlotId) -> &BitSet {
        &self.neighbors[slot]
    }

    /// Number of slots crossing the given slot.
    pub fn degree(&self, slot: SlotId) -> usize {
        self.neighbors[slot].len()
    }
}

/// A struct holding each slot's current candidate set. Domains only ever
/// shrink while propagation runs; removals made through the trail can be
/// undone exactly, which is what lets sibling search branches observe the
/// pre-branch domains.
pub struct DomainStore {
    domains: Vec<BitSet>,
    trail: Vec<(SlotId, WordId)>,
}

impl DomainStore {
    /// Start every slot's domain at the full vocabulary.
    pub fn new(grid: &Grid, vocabulary: &Vocabulary) -> DomainStore {
        let full: BitSet = (0..vocabulary.len()).collect();
        DomainStore {
            domains: (0..grid.slot_count()).map(|_| full.clone()).collect(),
            trail: vec![],
        }
    }

    /// Drop every candidate whose letter count differs from its slot's
    /// length. This is a one-time narrowing applied before search begins;
    /// it bypasses the trail because nothing ever backtracks past it.
    pub fn enforce_node_consistency(&mut self, grid: &Grid, vocabulary: &Vocabulary) {
        for slot in grid.slots() {
            let misfits: Vec<WordId> = self.domains[slot.id]
                .iter()
                .filter(|&id| vocabulary.word(id).letters.len() != slot.length)
                .collect();
            for id in misfits {
                self.domains[slot.id].remove(id);
            }
        }
    }

    /// Number of candidates still available for a slot.
    pub fn size(&self, slot: SlotId) -> usize {
        self.domains[slot].len()
    }

    pub fn is_empty(&self, slot: SlotId) -> bool {
        self.domains[slot].is_empty()
    }

    pub fn contains(&self, slot: SlotId, word: WordId) -> bool {
        self.domains[slot].contains(word)
    }

    /// Iterate a slot's candidates in ascending word id order.
    pub fn words(&self, slot: SlotId) -> impl Iterator<Item = WordId> + '_ {
        self.domains[slot].iter()
    }

    /// The single remaining candidate for a slot, if there is exactly one.
    pub fn sole_candidate(&self, slot: SlotId) -> Option<WordId> {
        if self.domains[slot].len() == 1 {
            self.domains[slot].iter().next()
        } else {
            None
        }
    }

    /// Mark the current trail position. A later `rollback` to this mark
    /// undoes every trailed removal made after it.
    pub fn checkpoint(&self) -> usize {
        self.trail.len()
    }

    /// Undo trailed removals back to `mark`, re-inserting the removed words
    /// in reverse order.
    pub fn rollback(&mut self, mark: usize) {
        for (slot, word) in self.trail.split_off(mark).into_iter().rev() {
            self.domains[slot].insert(word);
        }
    }

    /// Remove a candidate and record the removal on the trail.
    fn remove(&mut self, slot: SlotId, word: WordId) {
        if self.domains[slot].remove(word) {
            self.trail.push((slot, word));
        }
    }
}

/// Signal that propagation emptied a slot's domain. This aborts the current
/// propagation or search branch; it is never a user-facing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inconsistent {
    pub slot: SlotId,
}

/// Remove from `x`'s domain every word with no compatible partner in `y`'s
/// domain at the shared cell. Returns whether anything was removed; a no-op
/// when the slots do not cross.
pub fn revise(
    domains: &mut DomainStore,
    grid: &Grid,
    vocabulary: &Vocabulary,
    x: SlotId,
    y: SlotId,
) -> bool {
    let (i, j) = match grid.overlap(x, y) {
        Some(overlap) => overlap,
        None => return false,
    };

    // The set of letters y's remaining candidates can put in the shared
    // cell. An x candidate whose letter there isn't in this set has no
    // support in y.
    let mut supported: HashSet<char> = HashSet::new();
    for word_id in domains.words(y) {
        if let Some(&letter) = vocabulary.word(word_id).letters.get(j) {
            supported.insert(letter);
        }
    }

    // Candidates too short to reach the shared cell can never match.
    let doomed: Vec<WordId> = domains
        .words(x)
        .filter(|&word_id| match vocabulary.word(word_id).letters.get(i) {
            Some(letter) => !supported.contains(letter),
            None => true,
        })
        .collect();

    let revised = !doomed.is_empty();
    for word_id in doomed {
        domains.remove(x, word_id);
    }
    revised
}

/// AC-3 worklist propagation. With `arcs: None` the queue starts with both
/// orderings of every crossing pair; otherwise with the supplied arcs.
/// Whenever a revision narrows domain(x), every arc (z, x) into x is
/// re-enqueued, since z's support may have lived in the removed words.
/// Fails as soon as any domain empties; terminates because domains are
/// finite and only ever shrink.
pub fn enforce_arc_consistency(
    domains: &mut DomainStore,
    grid: &Grid,
    vocabulary: &Vocabulary,
    arcs: Option<&[(SlotId, SlotId)]>,
) -> Result<(), Inconsistent> {
    let mut queue: VecDeque<(SlotId, SlotId)> = match arcs {
        Some(arcs) => arcs.iter().copied().collect(),
        None => {
            let mut queue = VecDeque::new();
            for a in 0..grid.slot_count() {
                for b in grid.neighbors(a) {
                    queue.push_back((a, b));
                }
            }
            queue
        }
    };

    while let Some((x, y)) = queue.pop_front() {
        if revise(domains, grid, vocabulary, x, y) {
            if domains.is_empty(x) {
                return Err(Inconsistent { slot: x });
            }
            for z in grid.neighbors(x) {
                if z != y {
                    queue.push_back((z, x));
                }
            }
        }
    }

    Ok(())
}

/// A slot assignment chosen during search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub slot: SlotId,
    pub word: WordId,
}

/// A struct tracking statistics about a single solve.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// A complete, consistent fill: one choice per slot (in slot id order),
/// plus statistics about the search that found it.
#[derive(Debug, Clone)]
pub struct Solution {
    pub choices: Vec<Choice>,
    pub statistics: Statistics,
}

impl Solution {
    /// The word chosen for a slot.
    pub fn word_for(&self, slot: SlotId) -> WordId {
        self.choices[slot].word
    }
}

/// Ways a solve can end without producing a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveFailure {
    /// Every branch was exhausted; the grid has no consistent fill for this
    /// vocabulary. An expected outcome, not an error.
    NoSolution,

    /// The caller's state budget ran out before the search finished.
    StateLimitReached,
}

/// A struct tracking the live state of one backtracking search.
struct Search<'a> {
    grid: &'a Grid,
    vocabulary: &'a Vocabulary,
    domains: DomainStore,

    /// The partial assignment, indexed by slot id.
    assignment: Vec<Option<WordId>>,

    /// Word ids currently assigned to any slot, for the distinctness check.
    used_words: BitSet,

    state_limit: Option<u64>,
    statistics: Statistics,
}

impl<'a> Search<'a> {
    /// Whether `word` can extend the current assignment at `slot`: not used
    /// elsewhere, the right length, and agreeing with every assigned
    /// crossing slot on the shared letter.
    fn consistent(&self, slot: SlotId, word_id: WordId) -> bool {
        if self.used_words.contains(word_id) {
            return false;
        }

        let word = self.vocabulary.word(word_id);
        if word.letters.len() != self.grid.slots()[slot].length {
            return false;
        }

        for other in self.grid.neighbors(slot) {
            if let (Some(other_word_id), Some((i, j))) =
                (self.assignment[other], self.grid.overlap(slot, other))
            {
                if word.letters[i] != self.vocabulary.word(other_word_id).letters[j] {
                    return false;
                }
            }
        }

        true
    }

    /// Most constrained slot first: smallest remaining domain, ties broken
    /// by highest degree, then by lowest slot id so runs are reproducible.
    /// Returns `None` once every slot is assigned.
    fn select_unassigned_slot(&self) -> Option<SlotId> {
        (0..self.grid.slot_count())
            .filter(|&slot| self.assignment[slot].is_none())
            .min_by_key(|&slot| {
                (self.domains.size(slot), Reverse(self.grid.degree(slot)), slot)
            })
    }

    /// A slot's candidates ordered least-constraining first: ascending count
    /// of options the candidate would rule out across unassigned neighbors'
    /// domains, ties broken by word id.
    fn ordered_candidates(&self, slot: SlotId) -> Vec<WordId> {
        let mut candidates: Vec<(usize, WordId)> = self
            .domains
            .words(slot)
            .map(|word_id| {
                let word = self.vocabulary.word(word_id);
                let mut eliminated = 0;

                for neighbor in self.grid.neighbors(slot) {
                    if self.assignment[neighbor].is_some() {
                        continue;
                    }
                    let (i, j) = match self.grid.overlap(slot, neighbor) {
                        Some(overlap) => overlap,
                        None => continue,
                    };
                    eliminated += self
                        .domains
                        .words(neighbor)
                        .filter(|&other| self.vocabulary.word(other).letters[j] != word.letters[i])
                        .count();
                }

                (eliminated, word_id)
            })
            .collect();

        candidates.sort_unstable();
        candidates.into_iter().map(|(_, word_id)| word_id).collect()
    }

    /// Propagate the consequences of assigning `slot` by re-checking every
    /// (neighbor, slot) arc. On success, any unassigned slot whose domain
    /// narrowed to a single candidate comes back as a forced choice. An
    /// emptied domain aborts propagation without forcing anything; the
    /// branch keeps going on whatever tightening already happened, and dies
    /// later if the emptied slot really cannot be filled.
    fn infer(&mut self, slot: SlotId) -> Vec<Choice> {
        let arcs: Vec<(SlotId, SlotId)> =
            self.grid.neighbors(slot).iter().map(|neighbor| (neighbor, slot)).collect();

        if enforce_arc_consistency(&mut self.domains, self.grid, self.vocabulary, Some(&arcs))
            .is_err()
        {
            return vec![];
        }

        let mut forced: Vec<Choice> = vec![];
        for other in 0..self.grid.slot_count() {
            if self.assignment[other].is_none() {
                if let Some(word_id) = self.domains.sole_candidate(other) {
                    forced.push(Choice { slot: other, word: word_id });
                }
            }
        }
        forced
    }

    fn assign(&mut self, slot: SlotId, word: WordId) {
        self.assignment[slot] = Some(word);
        self.used_words.insert(word);
    }

    fn unassign(&mut self, slot: SlotId, word: WordId) {
        self.assignment[slot] = None;
        self.used_words.remove(word);
    }

    /// One step of the depth-first search: pick the most constrained open
    /// slot and try its candidates least-constraining first. Each candidate
    /// is checked against the assignment, recorded along with any forced
    /// choices from propagation, and fully undone (assignments and domain
    /// trail both) before the next candidate is tried.
    fn backtrack(&mut self) -> Result<bool, SolveFailure> {
        if let Some(limit) = self.state_limit {
            if self.statistics.states >= limit {
                return Err(SolveFailure::StateLimitReached);
            }
        }
        self.statistics.states += 1;

        let slot = match self.select_unassigned_slot() {
            Some(slot) => slot,
            None => return Ok(true),
        };

        for word_id in self.ordered_candidates(slot) {
            if !self.consistent(slot, word_id) {
                continue;
            }

            self.assign(slot, word_id);
            let mark = self.domains.checkpoint();

            // A forced choice is only taken when it can coexist with the
            // assignment as it stands. An unusable singleton stays open
            // instead, and the branch runs into it at selection time.
            let mut applied: Vec<Choice> = vec![];
            for choice in self.infer(slot) {
                if self.consistent(choice.slot, choice.word) {
                    self.assign(choice.slot, choice.word);
                    applied.push(choice);
                }
            }

            if self.backtrack()? {
                return Ok(true);
            }

            for choice in applied {
                self.unassign(choice.slot, choice.word);
            }
            self.unassign(slot, word_id);
            self.domains.rollback(mark);
        }

        self.statistics.backtracks += 1;
        Ok(false)
    }
}

/// Fill the grid from the vocabulary: node consistency, one global
/// arc-consistency pass, then backtracking search. Returns a complete fill
/// or an explicit failure; never a partial one.
pub fn solve(grid: &Grid, vocabulary: &Vocabulary) -> Result<Solution, SolveFailure> {
    solve_with_limit(grid, vocabulary, None)
}

/// Like `solve`, but giving up with `StateLimitReached` once the search has
/// expanded `state_limit` states. The limit is consulted at the top of each
/// search step.
pub fn solve_with_limit(
    grid: &Grid,
    vocabulary: &Vocabulary,
    state_limit: Option<u64>,
) -> Result<Solution, SolveFailure> {
    let start = Instant::now();

    let mut domains = DomainStore::new(grid, vocabulary);
    domains.enforce_node_consistency(grid, vocabulary);
    debug!(
        "domain sizes after node consistency: {:?}",
        (0..grid.slot_count()).map(|slot| domains.size(slot)).collect::<Vec<_>>()
    );

    // Preprocessing pass over every arc. If this already empties a domain
    // there is nothing left to search for.
    if let Err(Inconsistent { slot }) =
        enforce_arc_consistency(&mut domains, grid, vocabulary, None)
    {
        debug!("slot {} emptied during preprocessing", slot);
        return Err(SolveFailure::NoSolution);
    }

    let mut search = Search {
        grid,
        vocabulary,
        domains,
        assignment: vec![None; grid.slot_count()],
        used_words: BitSet::with_capacity(vocabulary.len()),
        state_limit,
        statistics: Statistics {
            states: 0,
            backtracks: 0,
            duration: Duration::from_millis(0),
        },
    };

    let solved = search.backtrack()?;
    search.statistics.duration = start.elapsed();

    if !solved {
        info!("search exhausted after {} states", search.statistics.states);
        return Err(SolveFailure::NoSolution);
    }

    info!(
        "filled {} slots in {} states ({} backtracks, {:?})",
        grid.slot_count(),
        search.statistics.states,
        search.statistics.backtracks,
        search.statistics.duration,
    );

    let choices: Vec<Choice> = search
        .assignment
        .iter()
        .copied()
        .enumerate()
        .filter_map(|(slot, word)| word.map(|word| Choice { slot, word }))
        .collect();

    Ok(Solution {
        choices,
        statistics: search.statistics,
    })
}

/// Check a set of choices against the grid and vocabulary: one choice per
/// slot, correct lengths, pairwise-distinct words, and agreement on every
/// shared cell.
pub fn verify_choices(grid: &Grid, vocabulary: &Vocabulary, choices: &[Choice]) -> bool {
    if choices.len() != grid.slot_count() {
        return false;
    }

    let mut used = BitSet::with_capacity(vocabulary.len());
    let mut seen_slots = BitSet::with_capacity(grid.slot_count());
    for choice in choices {
        if !seen_slots.insert(choice.slot) || !used.insert(choice.word) {
            return false;
        }
        if vocabulary.word(choice.word).letters.len() != grid.slots()[choice.slot].length {
            return false;
        }
    }

    for a in choices {
        for b in choices {
            if a.slot == b.slot {
                continue;
            }
            if let Some((i, j)) = grid.overlap(a.slot, b.slot) {
                if vocabulary.word(a.word).letters[i] != vocabulary.word(b.word).letters[j] {
                    return false;
                }
            }
        }
    }

    true
}

/// Turn the given grid and fill choices into a rendered string: blocked
/// cells as '█', unfilled fillable cells as spaces.
pub fn render_grid(grid: &Grid, vocabulary: &Vocabulary, choices: &[Choice]) -> String {
    let mut letters: Vec<Option<char>> = vec![None; grid.height() * grid.width()];
    for choice in choices {
        let slot = &grid.slots()[choice.slot];
        let word = vocabulary.word(choice.word);
        for (offset, &letter) in word.letters.iter().enumerate() {
            let (row, col) = slot.cell(offset);
            letters[row * grid.width() + col] = Some(letter);
        }
    }

    let rows: Vec<String> = (0..grid.height())
        .map(|row| {
            (0..grid.width())
                .map(|col| {
                    if grid.is_fillable(row, col) {
                        letters[row * grid.width() + col].unwrap_or(' ')
                    } else {
                        '█'
                    }
                })
                .collect()
        })
        .collect();

    rows.join("\n")
}

#[cfg(test)]
mod tests {
    use crate::{
        enforce_arc_consistency, render_grid, revise, solve, solve_with_limit, verify_choices,
        Direction, DomainStore, Grid, SlotId, Solution, SolveFailure, StructureError, Vocabulary,
    };

    fn vocab(words: &[&str]) -> Vocabulary {
        Vocabulary::new(words.iter().copied())
    }

    fn slot_at(grid: &Grid, row: usize, col: usize, direction: Direction) -> SlotId {
        grid.slots()
            .iter()
            .find(|slot| slot.row == row && slot.col == col && slot.direction == direction)
            .map(|slot| slot.id)
            .expect("no slot at the given position")
    }

    fn chosen<'a>(vocabulary: &'a Vocabulary, solution: &Solution, slot: SlotId) -> &'a str {
        &vocabulary.word(solution.word_for(slot)).text
    }

    fn domain_words(domains: &DomainStore, slot: SlotId) -> Vec<usize> {
        domains.words(slot).collect()
    }

    /// ...
    /// ##.
    /// ##.
    ///
    /// One across slot and one down slot sharing the top-right cell.
    fn crossing_grid() -> Grid {
        Grid::parse(
            "
            ...
            ##.
            ##.
            ",
        )
        .expect("crossing grid should parse")
    }

    /// ....
    /// .##.
    /// .##.
    /// ....
    ///
    /// Four length-4 slots forming a ring.
    fn ring_grid() -> Grid {
        Grid::parse(
            "
            ....
            .##.
            .##.
            ....
            ",
        )
        .expect("ring grid should parse")
    }

    #[test]
    fn test_parse_rejects_empty_layout() {
        assert_eq!(Grid::parse("").unwrap_err(), StructureError::Empty);
        assert_eq!(Grid::parse("  \n   \n").unwrap_err(), StructureError::Empty);
    }

    #[test]
    fn test_parse_rejects_ragged_layout() {
        assert_eq!(
            Grid::parse("...\n..").unwrap_err(),
            StructureError::RaggedRows {
                row: 1,
                expected: 3,
                found: 2,
            }
        );
    }

    #[test]
    fn test_parse_rejects_layout_without_slots() {
        assert_eq!(Grid::parse("#.\n.#").unwrap_err(), StructureError::NoSlots);
        assert_eq!(Grid::parse(".").unwrap_err(), StructureError::NoSlots);
        assert_eq!(Grid::parse("###\n###").unwrap_err(), StructureError::NoSlots);
    }

    #[test]
    fn test_slot_derivation_on_ring() {
        let grid = ring_grid();
        assert_eq!(grid.slot_count(), 4);
        assert!(grid.slots().iter().all(|slot| slot.length == 4));
        assert_eq!(
            grid.slots().iter().filter(|slot| slot.direction == Direction::Across).count(),
            2
        );
        assert_eq!(
            grid.slots().iter().filter(|slot| slot.direction == Direction::Down).count(),
            2
        );
    }

    #[test]
    fn test_overlaps_and_neighbors() {
        let grid = ring_grid();
        let top = slot_at(&grid, 0, 0, Direction::Across);
        let bottom = slot_at(&grid, 3, 0, Direction::Across);
        let left = slot_at(&grid, 0, 0, Direction::Down);
        let right = slot_at(&grid, 0, 3, Direction::Down);

        assert_eq!(grid.overlap(top, left), Some((0, 0)));
        assert_eq!(grid.overlap(left, top), Some((0, 0)));
        assert_eq!(grid.overlap(top, right), Some((3, 0)));
        assert_eq!(grid.overlap(right, top), Some((0, 3)));
        assert_eq!(grid.overlap(bottom, left), Some((0, 3)));
        assert_eq!(grid.overlap(bottom, right), Some((3, 3)));
        assert_eq!(grid.overlap(top, bottom), None);
        assert_eq!(grid.overlap(left, right), None);

        assert_eq!(grid.degree(top), 2);
        assert!(grid.neighbors(top).contains(left));
        assert!(grid.neighbors(top).contains(right));
        assert!(!grid.neighbors(top).contains(bottom));
    }

    #[test]
    fn test_vocabulary_dedups_and_drops_empties() {
        let vocabulary = vocab(&["CAT", "CAT", "", "DOG"]);
        assert_eq!(vocabulary.len(), 2);
        assert_eq!(vocabulary.word(0).text, "CAT");
        assert_eq!(vocabulary.word(1).text, "DOG");
    }

    #[test]
    fn test_node_consistency_is_idempotent() {
        let grid = Grid::parse("...").expect("grid should parse");
        let vocabulary = vocab(&["CAT", "DOG", "HOUSE", "AX"]);
        let mut domains = DomainStore::new(&grid, &vocabulary);
        assert_eq!(domains.size(0), 4);

        domains.enforce_node_consistency(&grid, &vocabulary);
        let once = domain_words(&domains, 0);
        assert_eq!(once.len(), 2);

        domains.enforce_node_consistency(&grid, &vocabulary);
        assert_eq!(domain_words(&domains, 0), once);
    }

    #[test]
    fn test_revise_removes_unsupported_words_and_is_monotone() {
        let grid = crossing_grid();
        let across = slot_at(&grid, 0, 0, Direction::Across);
        let down = slot_at(&grid, 0, 2, Direction::Down);
        let vocabulary = vocab(&["CAT", "CAR", "TIE"]);

        let mut domains = DomainStore::new(&grid, &vocabulary);
        domains.enforce_node_consistency(&grid, &vocabulary);
        let sizes_before: Vec<usize> = (0..grid.slot_count()).map(|s| domains.size(s)).collect();

        // Down words must start with some across word's last letter, which
        // only TIE does.
        assert!(revise(&mut domains, &grid, &vocabulary, down, across));
        assert_eq!(domain_words(&domains, down), vec![2]);

        // A second pass has nothing left to remove.
        assert!(!revise(&mut domains, &grid, &vocabulary, down, across));

        for slot in 0..grid.slot_count() {
            assert!(domains.size(slot) <= sizes_before[slot]);
        }
    }

    #[test]
    fn test_revise_without_overlap_is_a_no_op() {
        let grid = ring_grid();
        let top = slot_at(&grid, 0, 0, Direction::Across);
        let bottom = slot_at(&grid, 3, 0, Direction::Across);
        let vocabulary = vocab(&["AJQZ", "ZING", "DANG", "ARID"]);

        let mut domains = DomainStore::new(&grid, &vocabulary);
        domains.enforce_node_consistency(&grid, &vocabulary);
        assert!(!revise(&mut domains, &grid, &vocabulary, top, bottom));
        assert_eq!(domains.size(top), 4);
    }

    #[test]
    fn test_enforce_fails_when_a_domain_empties() {
        let grid = crossing_grid();
        let across = slot_at(&grid, 0, 0, Direction::Across);
        // No down word starts with T or G, so the across domain empties.
        let vocabulary = vocab(&["CAT", "DOG"]);

        let mut domains = DomainStore::new(&grid, &vocabulary);
        domains.enforce_node_consistency(&grid, &vocabulary);
        let result = enforce_arc_consistency(&mut domains, &grid, &vocabulary, None);
        assert_eq!(result.unwrap_err().slot, across);
    }

    #[test]
    fn test_propagation_narrows_a_chain_to_singletons() {
        // ...##
        // ##.##
        // ##...
        //
        // Two across slots joined by a down slot. The only words that fit
        // the chain are CAT -> TIN -> NIB.
        let grid = Grid::parse(
            "
            ...##
            ##.##
            ##...
            ",
        )
        .expect("chain grid should parse");
        let first = slot_at(&grid, 0, 0, Direction::Across);
        let link = slot_at(&grid, 0, 2, Direction::Down);
        let last = slot_at(&grid, 2, 2, Direction::Across);
        let vocabulary = vocab(&["CAT", "TIN", "NIB"]);

        let mut domains = DomainStore::new(&grid, &vocabulary);
        domains.enforce_node_consistency(&grid, &vocabulary);
        enforce_arc_consistency(&mut domains, &grid, &vocabulary, None)
            .expect("the chain is satisfiable");

        assert_eq!(domains.sole_candidate(first), Some(0));
        assert_eq!(domains.sole_candidate(link), Some(1));
        assert_eq!(domains.sole_candidate(last), Some(2));
    }

    #[test]
    fn test_rollback_restores_trailed_removals_exactly() {
        let grid = crossing_grid();
        let across = slot_at(&grid, 0, 0, Direction::Across);
        let down = slot_at(&grid, 0, 2, Direction::Down);
        let vocabulary = vocab(&["CAT", "CAR", "TIE"]);

        let mut domains = DomainStore::new(&grid, &vocabulary);
        domains.enforce_node_consistency(&grid, &vocabulary);
        let before: Vec<Vec<usize>> =
            (0..grid.slot_count()).map(|s| domain_words(&domains, s)).collect();

        let mark = domains.checkpoint();
        assert!(revise(&mut domains, &grid, &vocabulary, down, across));
        assert!(revise(&mut domains, &grid, &vocabulary, across, down));
        assert_ne!(domain_words(&domains, down), before[down]);

        domains.rollback(mark);
        for slot in 0..grid.slot_count() {
            assert_eq!(domain_words(&domains, slot), before[slot]);
        }
        assert!(domains.contains(down, 0));
        assert!(domains.contains(across, 1));
    }

    #[test]
    fn test_single_slot_grid_gets_a_length_matched_word() {
        let grid = Grid::parse("...").expect("grid should parse");
        let vocabulary = vocab(&["CAT", "DOG"]);

        let mut domains = DomainStore::new(&grid, &vocabulary);
        domains.enforce_node_consistency(&grid, &vocabulary);
        assert_eq!(domains.size(0), 2);

        let solution = solve(&grid, &vocabulary).expect("a fill exists");
        assert!(["CAT", "DOG"].contains(&chosen(&vocabulary, &solution, 0)));
    }

    #[test]
    fn test_crossing_pair_agrees_on_the_shared_letter() {
        let grid = crossing_grid();
        let across = slot_at(&grid, 0, 0, Direction::Across);
        let down = slot_at(&grid, 0, 2, Direction::Down);
        let vocabulary = vocab(&["CAT", "CAR", "TIE"]);

        let solution = solve(&grid, &vocabulary).expect("CAT/TIE share a T");
        assert_eq!(chosen(&vocabulary, &solution, across), "CAT");
        assert_eq!(chosen(&vocabulary, &solution, down), "TIE");

        let (i, j) = grid.overlap(across, down).expect("the slots cross");
        let across_word = vocabulary.word(solution.word_for(across));
        let down_word = vocabulary.word(solution.word_for(down));
        assert_eq!(across_word.letters[i], down_word.letters[j]);
    }

    #[test]
    fn test_no_word_of_the_required_length_means_no_solution() {
        let grid = Grid::parse("....").expect("grid should parse");
        let vocabulary = vocab(&["CAT", "DOG", "TIE"]);
        assert_eq!(solve(&grid, &vocabulary).unwrap_err(), SolveFailure::NoSolution);
    }

    #[test]
    fn test_incompatible_overlaps_mean_no_solution() {
        let grid = crossing_grid();
        // No down word can start with an across word's last letter.
        let vocabulary = vocab(&["CAT", "DOG"]);
        assert_eq!(solve(&grid, &vocabulary).unwrap_err(), SolveFailure::NoSolution);
    }

    #[test]
    fn test_distinctness_is_enforced() {
        // Every pairwise overlap agrees on 'A', but a word may only be used
        // once, and AA is the only length-2 word available.
        let grid = Grid::parse("..\n..").expect("grid should parse");
        let vocabulary = vocab(&["AA"]);
        assert_eq!(solve(&grid, &vocabulary).unwrap_err(), SolveFailure::NoSolution);
    }

    #[test]
    fn test_fully_open_square_is_filled_when_a_fill_exists() {
        let grid = Grid::parse("..\n..").expect("grid should parse");
        let vocabulary = vocab(&["AB", "CD", "AC", "BD"]);

        let solution = solve(&grid, &vocabulary).expect("rows AB/CD, columns AC/BD fit");
        assert!(verify_choices(&grid, &vocabulary, &solution.choices));
    }

    #[test]
    fn test_solutions_are_sound_despite_decoys() {
        let grid = ring_grid();
        let vocabulary = vocab(&["AJQZ", "ZING", "DANG", "ARID", "AAAA", "QQQQ", "ZZZZ"]);

        let solution = solve(&grid, &vocabulary).expect("the ring has a fill");
        assert!(verify_choices(&grid, &vocabulary, &solution.choices));
        assert!(solution.statistics.states >= 1);
    }

    #[test]
    fn test_state_limit_aborts_the_solve() {
        let grid = ring_grid();
        let vocabulary = vocab(&["AJQZ", "ZING", "DANG", "ARID"]);
        assert_eq!(
            solve_with_limit(&grid, &vocabulary, Some(0)).unwrap_err(),
            SolveFailure::StateLimitReached
        );
    }

    #[test]
    fn test_domains_left_intact_after_an_exhausted_search() {
        let grid = Grid::parse(
            "
            ...##
            ##.##
            ##...
            ",
        )
        .expect("chain grid should parse");
        // NIB is missing, so the chain cannot complete.
        let vocabulary = vocab(&["CAT", "TIN"]);
        assert_eq!(solve(&grid, &vocabulary).unwrap_err(), SolveFailure::NoSolution);

        // Reversibility at the store level: rolling a failed propagation
        // back to its checkpoint restores every domain exactly.
        let mut domains = DomainStore::new(&grid, &vocabulary);
        domains.enforce_node_consistency(&grid, &vocabulary);
        let before: Vec<Vec<usize>> =
            (0..grid.slot_count()).map(|s| domain_words(&domains, s)).collect();
        let mark = domains.checkpoint();
        let _ = enforce_arc_consistency(&mut domains, &grid, &vocabulary, None);
        domains.rollback(mark);
        for slot in 0..grid.slot_count() {
            assert_eq!(domain_words(&domains, slot), before[slot]);
        }
    }

    #[test]
    fn test_render_grid_places_letters_and_blocks() {
        let grid = crossing_grid();
        let vocabulary = vocab(&["CAT", "CAR", "TIE"]);
        let solution = solve(&grid, &vocabulary).expect("a fill exists");

        let rendered = render_grid(&grid, &vocabulary, &solution.choices);
        assert_eq!(rendered, "CAT\n██I\n██E");
    }
}
