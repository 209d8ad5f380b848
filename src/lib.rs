#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::comparison_chain)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_on_vec_items)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod grid_model;
pub mod search_engine;
pub mod types;
pub mod word_db;

/// The expected maximum length for a single entry.
pub const MAX_ENTRY_LENGTH: usize = 21;

pub use error::{Error, Result};
pub use grid_model::GridModel;
pub use search_engine::SearchEngine;
pub use word_db::WordDb;

/// Parse `template` against `db` and search for its lowest-cost complete fill, using the
/// default discrepancy budget. Returns `Ok(None)` if the template is well-formed but no
/// complete fill exists.
pub fn solve_grid<'db>(db: &'db WordDb, template: &str) -> Result<Option<GridModel<'db>>> {
    let grid = GridModel::from_template(db, template)?;
    let engine = SearchEngine::new(db);
    engine.solve(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word_db::tests::test_word_db;

    #[test]
    fn solve_grid_end_to_end() {
        let db = test_word_db();
        let solved = solve_grid(&db, "H LLO").unwrap().unwrap();
        assert_eq!(solved.render(), "HELLO");
    }

    #[test]
    fn solve_grid_propagates_malformed_template() {
        let db = test_word_db();
        let err = solve_grid(&db, "AB\nCDE").unwrap_err();
        assert!(matches!(err, Error::MalformedTemplate(_)));
    }
}
