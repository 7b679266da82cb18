//! Append-only history of submitted cells plus the cell being edited.

use std::collections::BTreeMap;

use crate::config::ModuleNaming;

/// Sequence number reserved for the setup cell.
pub const SETUP_SEQUENCE: i64 = -1;

/// Immutable snapshot of one unit of submitted (or in-progress) source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub sequence: i64,
    pub source: String,
    /// Addressable unit the tooling compiles; `None` if the source declares none.
    pub module_id: Option<String>,
}

impl Cell {
    fn new(sequence: i64, source: String, naming: &ModuleNaming) -> Self {
        let module_id = naming.module_id(sequence, &source);
        Self {
            sequence,
            source,
            module_id,
        }
    }

    pub fn is_setup(&self) -> bool {
        self.sequence == SETUP_SEQUENCE
    }
}

#[derive(Debug)]
pub struct CellStore {
    naming: ModuleNaming,
    submitted: BTreeMap<i64, Cell>,
    current: Cell,
    setup: Cell,
}

impl CellStore {
    pub fn new(naming: ModuleNaming, setup_source: &str) -> Self {
        let setup = Cell::new(SETUP_SEQUENCE, setup_source.to_string(), &naming);
        let current = Cell::new(0, String::new(), &naming);
        Self {
            naming,
            submitted: BTreeMap::new(),
            current,
            setup,
        }
    }

    /// Replace the text of the cell being edited. Last write wins.
    pub fn update(&mut self, text: &str) {
        if self.current.source != text {
            self.current = Cell::new(self.current.sequence, text.to_string(), &self.naming);
        }
    }

    /// Promote the current cell into the history and start the next one.
    pub fn submit_current(&mut self) -> Cell {
        let next = self.current.sequence + 1;
        let fresh = Cell::new(next, String::new(), &self.naming);
        let submitted = std::mem::replace(&mut self.current, fresh);
        self.submitted.insert(submitted.sequence, submitted.clone());
        submitted
    }

    pub fn current(&self) -> &Cell {
        &self.current
    }

    pub fn setup_cell(&self) -> &Cell {
        &self.setup
    }

    pub fn len(&self) -> usize {
        self.submitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submitted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CellStore {
        CellStore::new(ModuleNaming::default(), "export const helper = 1;")
    }

    #[test]
    fn only_last_update_is_visible() {
        let mut cells = store();
        cells.update("a");
        cells.update("ab");
        cells.update("abc");
        assert_eq!(cells.current().source, "abc");
        assert_eq!(cells.current().sequence, 0);
        assert!(cells.is_empty());
    }

    #[test]
    fn submissions_are_numbered_without_gaps() {
        let mut cells = store();
        let sequences: Vec<i64> = (0..5)
            .map(|i| {
                cells.update(&format!("cell {i}"));
                cells.submit_current().sequence
            })
            .collect();

        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(cells.current().sequence, 5);
        assert_eq!(cells.current().source, "");
        let history: Vec<i64> = cells.submitted.keys().copied().collect();
        assert_eq!(history, sequences);
    }

    #[test]
    fn submitted_cells_are_not_affected_by_later_updates() {
        let mut cells = store();
        cells.update("let x = 1");
        let first = cells.submit_current();
        cells.update("let y = 2");

        assert_eq!(cells.submitted[&first.sequence].source, "let x = 1");
        assert_eq!(cells.current().source, "let y = 2");
        assert_eq!(cells.current().module_id.as_deref(), Some("Cell1"));
    }

    #[test]
    fn setup_cell_is_a_sentinel() {
        let cells = store();
        let setup = cells.setup_cell();
        assert!(setup.is_setup());
        assert_eq!(setup.module_id.as_deref(), Some("CellSetup"));
        assert!(!cells.submitted.contains_key(&SETUP_SEQUENCE));
    }

    #[test]
    fn declared_naming_tracks_edits() {
        let naming = ModuleNaming::declared(r"^module ([^\s]+) where").unwrap();
        let mut cells = CellStore::new(naming, "");
        cells.update("x = 1");
        assert_eq!(cells.current().module_id, None);
        cells.update("module Scratch where\nx = 1");
        assert_eq!(cells.current().module_id.as_deref(), Some("Scratch"));
    }
}
