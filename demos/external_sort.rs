//! External sort demo for Spillway
//!
//! This example demonstrates the core pipeline:
//! - Writing shuffled records through a sorting writer
//! - Spilling runs to disk under a deliberately tiny memory budget
//! - Merging every run back into one globally sorted stream

use spillway::codec::KeyValueSerializer;
use spillway::io::DataWriter;
use spillway::sorter::ObjectWriter;
use spillway::stream::KeyValueCursor;
use spillway::{Engine, Options};
use std::sync::Arc;

/// Serializes `(String, u64)` pairs as utf-8 keys and little-endian values.
struct EventCodec;

impl KeyValueSerializer<(String, u64)> for EventCodec {
    fn serialize_key(
        &self,
        item: &(String, u64),
        writer: &mut dyn DataWriter,
    ) -> spillway::Result<()> {
        writer.write_fully(item.0.as_bytes())
    }

    fn serialize_value(
        &self,
        item: &(String, u64),
        writer: &mut dyn DataWriter,
    ) -> spillway::Result<()> {
        writer.write_fully(&item.1.to_le_bytes())
    }
}

fn main() -> Result<(), spillway::Error> {
    // Initialize logger
    env_logger::init();

    // A pool this small forces most runs onto disk
    let options = Options::default()
        .spill_dir("./spill_scratch")
        .pool_capacity(64 * 1024)
        .sort_record_limit(1000);

    let engine = Engine::open(options)?;
    println!("Engine opened, scratch tree at {:?}", engine.store().path());

    // Write records in scrambled key order
    println!("\n=== Writing 10000 Records ===");
    let mut writer = engine.group_writer::<(String, u64)>(Arc::new(EventCodec));
    for i in 0..10_000u64 {
        let scrambled = (i * 7919) % 10_000;
        writer.put(&(format!("event_{:05}", scrambled), scrambled))?;
    }
    writer.close()?;

    let runs = writer.stream().take_runs();
    println!(
        "{} runs finished, {} resident, {} spilled to disk",
        runs.len(),
        runs.resident(),
        runs.len() - runs.resident()
    );
    println!(
        "Pool holds {} of {} budgeted bytes",
        engine.pool().size(),
        engine.pool().capacity()
    );

    // Merge the runs back into one sorted stream
    println!("\n=== Merging ===");
    let mut merged = runs.merge(None)?;
    let mut count = 0u64;
    let mut previous = Vec::new();
    while merged.advance()? {
        if count < 3 {
            let value = u64::from_le_bytes(
                merged
                    .value()
                    .try_into()
                    .map_err(|_| spillway::Error::corruption("value is not eight bytes"))?,
            );
            println!("{} => {}", String::from_utf8_lossy(merged.key()), value);
        }
        assert!(merged.key() >= &previous[..], "merge must be sorted");
        previous = merged.key().to_vec();
        count += 1;
    }
    println!("... {} records total, all in key order", count);

    drop(merged);
    drop(runs);
    println!("\nPool drained to {} bytes", engine.pool().size());

    Ok(())
}
