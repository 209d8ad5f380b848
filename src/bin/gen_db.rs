//! Offline compiler from a raw scored-clue dataset (§6) to the compiled little-endian word
//! database `WordDb::open` reads. The Rust sibling of `examples/original_source/generate_db.py`;
//! reproduces its scoring rule (`COUNT * (5 if PUB==8 else 1)` for non-themed records) exactly.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use byteorder::{LittleEndian, ReadBytesExt};
use clap::Parser;
use gridfill_core::word_db::WordDb;

#[derive(Parser)]
#[command(about = "Compile a raw scored-clue dataset into a gridfill word database")]
struct Args {
    /// Path to the raw cluedata file (see §6 of the design spec for its layout).
    cluedata: PathBuf,

    /// Path to write the compiled little-endian word database to.
    output_db: PathBuf,
}

/// One entry read from the word block: the word itself, and its accumulated score.
struct ScoredWord {
    word: String,
    score: i64,
}

fn read_words<R: Read>(reader: &mut R) -> std::io::Result<Vec<ScoredWord>> {
    let num_words = reader.read_u32::<LittleEndian>()?;
    let mut words = Vec::with_capacity(num_words as usize);
    for _ in 0..num_words {
        let len = reader.read_u8()? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        let word = String::from_utf8_lossy(&buf).to_ascii_uppercase();
        words.push(ScoredWord { word, score: 0 });
    }
    Ok(words)
}

/// Skip the clue-text block (`NUMCLUES` × [length-prefixed text, trap list]); clue text and
/// traps are never consulted by the fill core.
fn skip_clue_block<R: Read>(reader: &mut R) -> std::io::Result<()> {
    let num_clues = reader.read_u32::<LittleEndian>()?;
    for _ in 0..num_clues {
        let len = reader.read_u8()? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        let num_traps = reader.read_u32::<LittleEndian>()?;
        for _ in 0..num_traps {
            reader.read_u32::<LittleEndian>()?;
        }
    }
    Ok(())
}

/// Apply every clue-usage record until EOF, accumulating scores in place.
fn apply_clue_usage_records<R: Read>(reader: &mut R, words: &mut [ScoredWord]) -> std::io::Result<()> {
    loop {
        let word_index = match reader.read_u32::<LittleEndian>() {
            Ok(idx) => idx,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        let count = reader.read_i16::<LittleEndian>()?;
        let _diff = reader.read_i16::<LittleEndian>()?;
        let _year = reader.read_i16::<LittleEndian>()?;
        let themed = reader.read_i8()?;
        let publication = reader.read_i8()?;
        let _clue_index = reader.read_u32::<LittleEndian>()?;

        let Some(word) = words.get_mut(word_index as usize) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("clue-usage record references out-of-range word index {word_index}"),
            ));
        };

        if themed == 0 {
            let multiplier = if publication == 8 { 5 } else { 1 };
            word.score += i64::from(count) * multiplier;
        }
    }
}

fn run(args: &Args) -> gridfill_core::Result<()> {
    let file = File::open(&args.cluedata)?;
    let mut reader = BufReader::new(file);

    let mut words = read_words(&mut reader)?;
    skip_clue_block(&mut reader)?;
    apply_clue_usage_records(&mut reader, &mut words)?;

    let scored_words = words
        .into_iter()
        .filter(|w| w.score > 0)
        .map(|w| (w.word, w.score as u32))
        .collect::<Vec<_>>();

    tracing::info!(num_words = scored_words.len(), "scored words with positive score");

    let db = WordDb::from_scored_words(scored_words);
    let output = File::create(&args.output_db)?;
    db.write_to(BufWriter::new(output))?;

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gridfill-gen-db: {e}");
            ExitCode::from(2)
        }
    }
}
