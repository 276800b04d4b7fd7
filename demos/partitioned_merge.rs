//! Partitioned merge demo for Spillway
//!
//! This example demonstrates fanning one sorted stream out by key hash:
//! - Sorting samples that repeat a small set of metric names
//! - Merging runs with a value comparator
//! - Partitioning the merged stream so each metric lands in exactly one shard

use spillway::codec::{BytewiseComparator, KeyValueDeserializer, KeyValueSerializer};
use spillway::io::{BufferReader, BufferWriter, DataWriter};
use spillway::sorter::ObjectWriter;
use spillway::stream::{
    copy, key_value_cursor, BasicKeyValueSink, KeyValueCursor, KeyValuePartitioner, KeyValueSink,
};
use spillway::{Engine, Options};
use std::sync::Arc;

/// Serializes `(String, String)` pairs as raw utf-8 bytes.
struct MetricCodec;

impl KeyValueSerializer<(String, String)> for MetricCodec {
    fn serialize_key(
        &self,
        item: &(String, String),
        writer: &mut dyn DataWriter,
    ) -> spillway::Result<()> {
        writer.write_fully(item.0.as_bytes())
    }

    fn serialize_value(
        &self,
        item: &(String, String),
        writer: &mut dyn DataWriter,
    ) -> spillway::Result<()> {
        writer.write_fully(item.1.as_bytes())
    }
}

impl KeyValueDeserializer<(String, String)> for MetricCodec {
    fn deserialize_pair(&self, key: &[u8], value: &[u8]) -> spillway::Result<(String, String)> {
        let metric = std::str::from_utf8(key)
            .map_err(|e| spillway::Error::corruption(format!("invalid metric name: {}", e)))?;
        let sample = std::str::from_utf8(value)
            .map_err(|e| spillway::Error::corruption(format!("invalid sample: {}", e)))?;
        Ok((metric.to_string(), sample.to_string()))
    }
}

fn main() -> Result<(), spillway::Error> {
    // Initialize logger
    env_logger::init();

    let options = Options::default()
        .spill_dir("./spill_scratch")
        .pool_capacity(16 * 1024)
        .sort_record_limit(500);
    let engine = Engine::open(options)?;

    // Sort samples cycling through a handful of metric names
    println!("=== Writing 5000 Samples Across 8 Metrics ===");
    let comparator = Arc::new(BytewiseComparator);
    let mut writer = engine.group_writer_with_comparator::<(String, String)>(
        Arc::new(MetricCodec),
        comparator.clone(),
    );
    for i in 0..5000usize {
        let metric = format!("metric_{}", i % 8);
        let sample = format!("sample_{:06}", (i * 31) % 5000);
        writer.put(&(metric, sample))?;
    }
    writer.close()?;

    let runs = writer.stream().take_runs();
    println!(
        "{} runs, {} spilled to disk",
        runs.len(),
        runs.len() - runs.resident()
    );

    // Merge, then shard the stream by key hash
    println!("\n=== Partitioning Into 3 Shards ===");
    let mut merged = runs.merge(Some(comparator))?;
    let sinks: Vec<BasicKeyValueSink<BufferWriter>> = (0..3)
        .map(|_| BasicKeyValueSink::new(BufferWriter::new()))
        .collect();
    let mut partitioner = KeyValuePartitioner::new(sinks)?;
    let stats = copy(&mut *merged, &mut partitioner)?;
    partitioner.finish()?;
    println!(
        "Copied {} samples: {} key bytes after grouping, {} value bytes",
        stats.records, stats.key_bytes, stats.value_bytes
    );

    // Each shard is a well-formed stream holding whole metrics
    let codec = MetricCodec;
    for (index, sink) in partitioner.into_inner().into_iter().enumerate() {
        let mut cursor = key_value_cursor(BufferReader::new(sink.into_inner().freeze()));
        let mut metrics: Vec<String> = Vec::new();
        let mut samples = 0u64;
        while cursor.advance()? {
            let (metric, _sample) = codec.deserialize_pair(cursor.key(), cursor.value())?;
            if metrics.last() != Some(&metric) {
                metrics.push(metric);
            }
            samples += 1;
        }
        println!("Shard {}: {} samples, metrics {:?}", index, samples, metrics);
    }

    Ok(())
}
