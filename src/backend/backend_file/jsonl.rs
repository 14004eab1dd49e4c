use std::io::{BufRead, BufReader, Read, Write};

use log::error;
use serde::{de::DeserializeOwned, Serialize};

/// One JSON document per line. Blank lines are skipped.
pub fn read<T: DeserializeOwned>(input: impl Read) -> Result<Vec<T>, ()> {
    let mut docs = vec![];

    for (i, line) in BufReader::new(input).lines().enumerate() {
        let line = line.map_err(|e| {
            error!("couldn't read line: {e}");
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let doc = serde_json::from_str(&line).map_err(|e| {
            error!("invalid document on line {}: {e}", i + 1);
        })?;
        docs.push(doc);
    }

    Ok(docs)
}

pub fn write<T: Serialize>(mut output: impl Write, docs: &[T]) -> Result<(), std::io::Error> {
    for doc in docs {
        serde_json::to_writer(&mut output, doc)?;
        writeln!(output)?;
    }
    output.flush()
}
