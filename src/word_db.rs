//! The read-only word database: per-length word buckets sorted by ascending score, and the
//! per-(length, letter, position) bitmap index used to enumerate candidates under partial
//! letter constraints. Bitmap algebra here follows `examples/original_source/word_db.py`
//! (`_matching_bitmap`, `update_bitmap`, `num_matches`, `highest_score`, `matching_words`)
//! one for one; the on-disk layout follows `generate_db.py`'s `write_db`, which persists both
//! the word buckets and the precomputed bitmaps rather than recomputing bitmaps at load time.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use roaring::RoaringBitmap;
use tracing::info;

use crate::error::{Error, Result};
use crate::types::WordId;
use crate::MAX_ENTRY_LENGTH;

/// Magic bytes at the start of a compiled database file.
const MAGIC: &[u8; 4] = b"GFDB";
const FORMAT_VERSION: u32 = 1;

/// A bitmap over word indices within one length bucket, with an explicit sentinel for "no
/// constraint yet" distinct from the empty bitmap ("no candidates remain"). The two must
/// never be confused: an unconstrained entry enumerates its whole bucket, an empty one
/// enumerates nothing.
#[derive(Debug, Clone)]
pub struct Bitmap(Option<RoaringBitmap>);

impl Bitmap {
    /// The sentinel representing "every word in the bucket is still a candidate".
    #[must_use]
    pub fn unconstrained() -> Bitmap {
        Bitmap(None)
    }

    /// A bitmap containing exactly one word.
    #[must_use]
    pub fn singleton(word_id: WordId) -> Bitmap {
        let mut bitmap = RoaringBitmap::new();
        bitmap.insert(word_id.0);
        Bitmap(Some(bitmap))
    }

    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.0.is_none()
    }

    /// True iff this bitmap is constrained and has no set bits (no candidates).
    #[must_use]
    pub fn is_empty_constrained(&self) -> bool {
        matches!(&self.0, Some(bitmap) if bitmap.is_empty())
    }

    /// Intersect in place with `other`. If this bitmap was unconstrained, it becomes a clone
    /// of `other` (mirroring `word_db.py::update_bitmap`'s `if bitmap is None: return other`).
    pub fn intersect_with(&mut self, other: &RoaringBitmap) {
        match &mut self.0 {
            None => self.0 = Some(other.clone()),
            Some(bitmap) => *bitmap &= other,
        }
    }

    #[must_use]
    pub fn contains(&self, word_id: WordId) -> bool {
        match &self.0 {
            None => true,
            Some(bitmap) => bitmap.contains(word_id.0),
        }
    }
}

/// The words and precomputed bitmaps for one word length.
struct LengthBucket {
    /// Words sorted by ascending score; the index into this vec is the `WordId`.
    words: Vec<(Box<str>, u32)>,
    /// `letter_bitmaps[letter - b'A'][position]` is the bitmap of word indices with `letter`
    /// at `position`.
    letter_bitmaps: Vec<Vec<RoaringBitmap>>,
}

impl LengthBucket {
    fn empty(length: usize) -> LengthBucket {
        LengthBucket {
            words: Vec::new(),
            letter_bitmaps: (0..26).map(|_| vec![RoaringBitmap::new(); length]).collect(),
        }
    }

    fn build(length: usize, mut words: Vec<(Box<str>, u32)>) -> LengthBucket {
        words.sort_by_key(|(_, score)| *score);

        let mut letter_bitmaps: Vec<Vec<RoaringBitmap>> =
            (0..26).map(|_| vec![RoaringBitmap::new(); length]).collect();

        for (word_idx, (word, _)) in words.iter().enumerate() {
            for (position, letter) in word.bytes().enumerate() {
                let letter_idx = (letter - b'A') as usize;
                letter_bitmaps[letter_idx][position].insert(word_idx as u32);
            }
        }

        LengthBucket { words, letter_bitmaps }
    }
}

/// The read-only word index, keyed by word length. Construct via [`WordDb::open`] (compiled
/// binary format) or [`WordDb::from_scored_words`] (in-memory, e.g. from the generator).
pub struct WordDb {
    buckets: Vec<LengthBucket>,
}

impl WordDb {
    /// Build a database directly from `(word, score)` pairs, e.g. the output of the offline
    /// generator before it's written to disk. Words must be uppercase ASCII of length
    /// `2..=MAX_ENTRY_LENGTH`; only positive scores are kept (mirrors `generate_db.py`, which
    /// drops every word whose accumulated score is not positive).
    #[must_use]
    pub fn from_scored_words(words: impl IntoIterator<Item = (String, u32)>) -> WordDb {
        let mut by_length: Vec<Vec<(Box<str>, u32)>> = (0..=MAX_ENTRY_LENGTH).map(|_| Vec::new()).collect();

        for (word, score) in words {
            if score == 0 || word.len() < 2 || word.len() > MAX_ENTRY_LENGTH {
                continue;
            }
            by_length[word.len()].push((word.into_boxed_str(), score));
        }

        let buckets = by_length
            .into_iter()
            .enumerate()
            .map(|(length, words)| {
                if words.is_empty() {
                    LengthBucket::empty(length)
                } else {
                    LengthBucket::build(length, words)
                }
            })
            .collect();

        WordDb { buckets }
    }

    /// Read a compiled database written by [`WordDb::write_to`] / `gridfill-gen-db`.
    pub fn open<R: Read>(mut reader: R) -> Result<WordDb> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| Error::MalformedDatabase(format!("truncated header: {e}")))?;
        if &magic != MAGIC {
            return Err(Error::MalformedDatabase("bad magic bytes".into()));
        }

        let version = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::MalformedDatabase(format!("truncated version: {e}")))?;
        if version != FORMAT_VERSION {
            return Err(Error::MalformedDatabase(format!(
                "unsupported format version {version}"
            )));
        }

        let num_lengths = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::MalformedDatabase(format!("truncated length count: {e}")))?;

        let mut buckets: Vec<LengthBucket> =
            (0..=MAX_ENTRY_LENGTH).map(LengthBucket::empty).collect();

        for _ in 0..num_lengths {
            let length = reader
                .read_u8()
                .map_err(|e| Error::MalformedDatabase(format!("truncated bucket length: {e}")))?
                as usize;
            if length > MAX_ENTRY_LENGTH {
                return Err(Error::MalformedDatabase(format!(
                    "bucket length {length} exceeds MAX_ENTRY_LENGTH"
                )));
            }

            let num_words = reader
                .read_u32::<LittleEndian>()
                .map_err(|e| Error::MalformedDatabase(format!("truncated word count: {e}")))?;

            let mut words = Vec::with_capacity(num_words as usize);
            let mut buf = vec![0u8; length];
            for _ in 0..num_words {
                reader
                    .read_exact(&mut buf)
                    .map_err(|e| Error::MalformedDatabase(format!("truncated word bytes: {e}")))?;
                let word = std::str::from_utf8(&buf)
                    .map_err(|e| Error::MalformedDatabase(format!("non-utf8 word: {e}")))?
                    .to_owned();
                let score = reader
                    .read_u32::<LittleEndian>()
                    .map_err(|e| Error::MalformedDatabase(format!("truncated score: {e}")))?;
                words.push((word.into_boxed_str(), score));
            }

            let mut letter_bitmaps: Vec<Vec<RoaringBitmap>> =
                (0..26).map(|_| vec![RoaringBitmap::new(); length]).collect();
            for letter_idx in 0..26 {
                for position in 0..length {
                    let byte_len = reader.read_u32::<LittleEndian>().map_err(|e| {
                        Error::MalformedDatabase(format!("truncated bitmap length: {e}"))
                    })? as usize;
                    let mut bitmap_bytes = vec![0u8; byte_len];
                    reader.read_exact(&mut bitmap_bytes).map_err(|e| {
                        Error::MalformedDatabase(format!("truncated bitmap bytes: {e}"))
                    })?;
                    let bitmap = RoaringBitmap::deserialize_from(&bitmap_bytes[..])
                        .map_err(|e| Error::MalformedDatabase(format!("bad bitmap: {e}")))?;
                    letter_bitmaps[letter_idx][position] = bitmap;
                }
            }

            buckets[length] = LengthBucket { words, letter_bitmaps };
        }

        let total_words: usize = buckets.iter().map(|b| b.words.len()).sum();
        info!(total_words, "loaded word database");

        Ok(WordDb { buckets })
    }

    /// Write this database out in the compiled binary format that [`WordDb::open`] reads.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;

        let non_empty: Vec<usize> = (0..self.buckets.len())
            .filter(|&length| !self.buckets[length].words.is_empty())
            .collect();
        writer.write_u32::<LittleEndian>(non_empty.len() as u32)?;

        for length in non_empty {
            let bucket = &self.buckets[length];
            writer.write_u8(length as u8)?;
            writer.write_u32::<LittleEndian>(bucket.words.len() as u32)?;
            for (word, score) in &bucket.words {
                debug_assert_eq!(word.len(), length);
                writer.write_all(word.as_bytes())?;
                writer.write_u32::<LittleEndian>(*score)?;
            }
            for letter_idx in 0..26 {
                for position in 0..length {
                    let mut buf = Vec::new();
                    bucket.letter_bitmaps[letter_idx][position]
                        .serialize_into(&mut buf)
                        .map_err(|e| Error::MalformedDatabase(format!("serialize failed: {e}")))?;
                    writer.write_u32::<LittleEndian>(buf.len() as u32)?;
                    writer.write_all(&buf)?;
                }
            }
        }

        Ok(())
    }

    fn bucket(&self, length: usize) -> Option<&LengthBucket> {
        self.buckets.get(length)
    }

    /// The number of words of this length in the database (the bitmap width for this length).
    #[must_use]
    pub fn bucket_len(&self, length: usize) -> usize {
        self.bucket(length).map_or(0, |b| b.words.len())
    }

    /// Population count of `bitmap`; the full bucket size if unconstrained.
    #[must_use]
    pub fn num_matches(&self, length: usize, bitmap: &Bitmap) -> usize {
        match &bitmap.0 {
            None => self.bucket_len(length),
            Some(bitmap) => bitmap.len() as usize,
        }
    }

    /// The word and score at a given `WordId`.
    #[must_use]
    pub fn word(&self, length: usize, word_id: WordId) -> (&str, u32) {
        let (word, score) = &self.bucket(length).expect("length bucket must exist").words[word_id.as_usize()];
        (word, *score)
    }

    /// Words whose indices are set in `bitmap`, iterated highest index (highest score) first.
    /// Unconstrained enumerates the whole bucket in score-descending order.
    #[must_use]
    pub fn matching_words(&self, length: usize, bitmap: &Bitmap) -> Vec<(WordId, &str, u32)> {
        let Some(bucket) = self.bucket(length) else {
            return Vec::new();
        };

        match &bitmap.0 {
            None => (0..bucket.words.len())
                .rev()
                .map(|idx| {
                    let (word, score) = &bucket.words[idx];
                    (WordId(idx as u32), word.as_ref(), *score)
                })
                .collect(),
            Some(bitmap) => {
                // RoaringBitmap iterates in ascending order; we need score-descending, i.e.
                // index-descending, so collect and reverse.
                let mut ids: Vec<u32> = bitmap.iter().collect();
                ids.reverse();
                ids.into_iter()
                    .map(|idx| {
                        let (word, score) = &bucket.words[idx as usize];
                        (WordId(idx), word.as_ref(), *score)
                    })
                    .collect()
            }
        }
    }

    /// The entry at the highest set bit, or `None` if the bitmap has no candidates.
    #[must_use]
    pub fn highest_score(&self, length: usize, bitmap: &Bitmap) -> Option<(WordId, &str, u32)> {
        let bucket = self.bucket(length)?;
        let idx = match &bitmap.0 {
            None => {
                if bucket.words.is_empty() {
                    return None;
                }
                (bucket.words.len() - 1) as u32
            }
            Some(bitmap) => bitmap.max()?,
        };
        let (word, score) = &bucket.words[idx as usize];
        Some((WordId(idx), word.as_ref(), *score))
    }

    /// The precomputed bitmap of words of `length` with `letter` at `position`.
    #[must_use]
    pub fn letter_bitmap(&self, length: usize, letter: u8, position: usize) -> &RoaringBitmap {
        let bucket = self.bucket(length).expect("length bucket must exist");
        &bucket.letter_bitmaps[(letter - b'A') as usize][position]
    }

    /// `bitmap & letter_bitmap(length, letter, position)`, or just the letter bitmap if
    /// `bitmap` was unconstrained.
    #[must_use]
    pub fn update_bitmap(&self, length: usize, bitmap: &Bitmap, position: usize, letter: u8) -> Bitmap {
        let mut result = bitmap.clone();
        result.intersect_with(self.letter_bitmap(length, letter, position));
        result
    }

    /// The conjunction of per-position letter bitmaps for every non-blank, non-`?` character
    /// in `pattern`; unconstrained if every position is blank.
    #[must_use]
    pub fn matching_bitmap_from_pattern(&self, pattern: &str) -> Bitmap {
        let length = pattern.len();
        let mut result = Bitmap::unconstrained();
        for (position, ch) in pattern.bytes().enumerate() {
            if ch == b' ' || ch == b'?' {
                continue;
            }
            result.intersect_with(self.letter_bitmap(length, ch, position));
        }
        result
    }

    /// The per-entry cost lower bound (§4.1 / glossary `min_cost`): `1 / highest score` for a
    /// non-empty bitmap, `None` if the bitmap is empty (infeasible), or the fixed penalty of 5
    /// if no word of this length exists in the database at all.
    #[must_use]
    pub fn min_cost(&self, length: usize, bitmap: &Bitmap) -> Option<f64> {
        if self.bucket_len(length) == 0 {
            return Some(5.0);
        }
        let (_, _, score) = self.highest_score(length, bitmap)?;
        Some(1.0 / f64::from(score))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// A small, fixed word database useful across module tests: every word mentioned in the
    /// spec's end-to-end scenarios (§8 S1-S6) plus enough filler to exercise a real search.
    pub fn test_word_db() -> WordDb {
        WordDb::from_scored_words(vec![
            ("CA".into(), 2),
            ("AT".into(), 3),
            ("CT".into(), 1),
            ("HELLO".into(), 10),
            ("HELPS".into(), 4),
            ("WORLD".into(), 8),
            ("ABC".into(), 5),
            ("ABD".into(), 6),
            ("XYZ".into(), 7),
        ])
    }

    #[test]
    fn unconstrained_enumerates_whole_bucket_descending() {
        let db = test_word_db();
        let words = db.matching_words(2, &Bitmap::unconstrained());
        let scores: Vec<u32> = words.iter().map(|(_, _, score)| *score).collect();
        assert_eq!(scores, vec![3, 2, 1]);
    }

    #[test]
    fn letter_bitmap_intersection_narrows_candidates() {
        let db = test_word_db();
        let bitmap = db.update_bitmap(2, &Bitmap::unconstrained(), 0, b'C');
        assert_eq!(db.num_matches(2, &bitmap), 2); // CA, CT
        let words: Vec<&str> = db
            .matching_words(2, &bitmap)
            .into_iter()
            .map(|(_, word, _)| word)
            .collect();
        assert_eq!(words, vec!["CA", "CT"]);
    }

    #[test]
    fn highest_score_picks_top_candidate() {
        let db = test_word_db();
        let (_, word, score) = db.highest_score(5, &Bitmap::unconstrained()).unwrap();
        assert_eq!(word, "HELLO");
        assert_eq!(score, 10);
    }

    #[test]
    fn empty_bucket_uses_fixed_penalty() {
        let db = test_word_db();
        assert_eq!(db.min_cost(9, &Bitmap::unconstrained()), Some(5.0));
    }

    #[test]
    fn empty_constrained_bitmap_has_no_cost() {
        let db = test_word_db();
        let bitmap = db.update_bitmap(2, &Bitmap::unconstrained(), 0, b'Z');
        assert!(bitmap.is_empty_constrained());
        assert_eq!(db.min_cost(2, &bitmap), None);
    }

    #[test]
    fn round_trips_through_compiled_format() {
        let db = test_word_db();
        let mut buf = Vec::new();
        db.write_to(&mut buf).unwrap();
        let reloaded = WordDb::open(&buf[..]).unwrap();
        assert_eq!(reloaded.bucket_len(2), db.bucket_len(2));
        assert_eq!(
            reloaded.highest_score(5, &Bitmap::unconstrained()).unwrap().1,
            "HELLO"
        );
    }
}
