// Concurrent Buffer Pool Tests for Spillway
// These tests verify thread-safety of reservation, registration, eviction,
// and reads under cross-thread spill pressure.

use bytes::Bytes;
use spillway::codec::KeyValueSerializer;
use spillway::io::{BufferProvider, DataWriter};
use spillway::shared::SharedBuffer;
use spillway::sorter::ObjectWriter;
use spillway::stream::KeyValueCursor;
use spillway::{Engine, Options};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn tiny_pool_engine(dir: &TempDir, pool_capacity: u64) -> Engine {
    let options = Options::default()
        .spill_dir(dir.path())
        .pool_capacity(pool_capacity)
        .sort_buffer_size(4096)
        .sort_record_limit(10);
    Engine::open(options).unwrap()
}

/// Test concurrent reserve/register/read/drop cycles under a pool far too
/// small for the combined load
#[test]
fn test_concurrent_register_and_read() {
    let dir = TempDir::new().unwrap();
    let engine = tiny_pool_engine(&dir, 64);

    let num_threads = 8;
    let iterations = 50;
    let barrier = Arc::new(Barrier::new(num_threads));

    let mut handles = vec![];

    for thread_id in 0..num_threads {
        let engine_clone = engine.clone();
        let barrier_clone = Arc::clone(&barrier);
        let handle = thread::spawn(move || {
            barrier_clone.wait();
            for i in 0..iterations {
                let payload = format!("thread_{}_iteration_{}_payload", thread_id, i);
                let bytes = Bytes::from(payload.clone());

                let ticket = engine_clone.pool().reserve(bytes.len() as u64).unwrap();
                let entry = engine_clone.pool().register(ticket, bytes).unwrap();

                // Another thread's reservation may spill this entry at
                // any point; the read must see the same content either way.
                let mut reader = entry.open().unwrap();
                let mut read_back = vec![0u8; payload.len()];
                reader.read_fully(&mut read_back).unwrap();
                assert_eq!(read_back, payload.as_bytes());
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // Every entry was dropped, so the pool accounts to zero.
    assert_eq!(engine.pool().size(), 0);
    assert_eq!(engine.pool().queued(), 0);
}

/// Test sorting from multiple threads sharing one engine and spilling into
/// one scratch tree
#[test]
fn test_concurrent_sorts_share_engine() {
    struct RawPairCodec;

    impl KeyValueSerializer<(Vec<u8>, Vec<u8>)> for RawPairCodec {
        fn serialize_key(
            &self,
            item: &(Vec<u8>, Vec<u8>),
            writer: &mut dyn DataWriter,
        ) -> spillway::Result<()> {
            writer.write_fully(&item.0)
        }

        fn serialize_value(
            &self,
            item: &(Vec<u8>, Vec<u8>),
            writer: &mut dyn DataWriter,
        ) -> spillway::Result<()> {
            writer.write_fully(&item.1)
        }
    }

    let dir = TempDir::new().unwrap();
    let engine = tiny_pool_engine(&dir, 2048);

    let num_threads = 4;
    let records_per_thread = 100;
    let barrier = Arc::new(Barrier::new(num_threads));

    let mut handles = vec![];

    for thread_id in 0..num_threads {
        let engine_clone = engine.clone();
        let barrier_clone = Arc::clone(&barrier);
        let handle = thread::spawn(move || {
            barrier_clone.wait();

            let mut writer =
                engine_clone.group_writer::<(Vec<u8>, Vec<u8>)>(Arc::new(RawPairCodec));
            for i in 0..records_per_thread {
                let scrambled = (i * 13) % records_per_thread;
                let key = format!("t{}_key_{:04}", thread_id, scrambled).into_bytes();
                let value = format!("t{}_val_{:04}", thread_id, scrambled).into_bytes();
                writer.put(&(key, value)).unwrap();
            }
            writer.close().unwrap();

            let runs = writer.stream().take_runs();
            assert_eq!(runs.len(), records_per_thread / 10);

            let mut merged = runs.merge(None).unwrap();
            let mut count = 0;
            let mut previous = Vec::new();
            while merged.advance().unwrap() {
                let key = merged.key().to_vec();
                assert!(key > previous, "keys must come back strictly ascending");
                assert!(key.starts_with(format!("t{}_", thread_id).as_bytes()));
                previous = key;
                count += 1;
            }
            assert_eq!(count, records_per_thread);
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.pool().size(), 0);
}

/// Test that an entry under eviction waits for its open reader, spilling
/// from the reader's thread once the last read finishes
#[test]
fn test_eviction_defers_to_cross_thread_reader() {
    let dir = TempDir::new().unwrap();
    let engine = tiny_pool_engine(&dir, 100);
    let pool = engine.pool();

    let content = vec![7u8; 80];
    let ticket = pool.reserve(80).unwrap();
    let entry = pool.register(ticket, Bytes::from(content.clone())).unwrap();

    let mut reader = entry.open().unwrap();

    let reserved = Arc::new(Barrier::new(2));
    let reserved_clone = Arc::clone(&reserved);
    let engine_clone = engine.clone();
    let presser = thread::spawn(move || {
        // Overflows the pool while the reader is open; the victim cannot
        // spill yet, so the claim succeeds past the soft limit.
        let ticket = engine_clone.pool().reserve(80).unwrap();
        reserved_clone.wait();
        ticket
    });

    reserved.wait();
    assert!(entry.is_resident(), "open reader must hold the buffer in memory");
    assert_eq!(pool.size(), 160);

    let mut read_back = vec![0u8; 80];
    reader.read_fully(&mut read_back).unwrap();
    assert_eq!(read_back, content);

    // The last reader performs the deferred spill as it closes.
    drop(reader);
    assert!(!entry.is_resident());

    let ticket = presser.join().unwrap();
    assert_eq!(pool.size(), 80);

    let mut reader = entry.open().unwrap();
    let mut read_back = vec![0u8; 80];
    reader.read_fully(&mut read_back).unwrap();
    assert_eq!(read_back, content);

    drop(reader);
    drop(ticket);
    drop(entry);
    assert_eq!(pool.size(), 0);
}

/// Test fan-out readers on one shared buffer from multiple threads
#[test]
fn test_shared_buffer_concurrent_consumers() {
    let dir = TempDir::new().unwrap();
    let engine = tiny_pool_engine(&dir, 1024);
    let pool = engine.pool();

    let content = b"shared fan-out payload".to_vec();
    let ticket = pool.reserve(content.len() as u64).unwrap();
    let entry = pool.register(ticket, Bytes::from(content.clone())).unwrap();

    let views = SharedBuffer::wrap(entry, 4).unwrap();
    let barrier = Arc::new(Barrier::new(views.len()));

    let mut handles = vec![];
    for view in views {
        let barrier_clone = Arc::clone(&barrier);
        let expected = content.clone();
        handles.push(thread::spawn(move || {
            barrier_clone.wait();
            let mut reader = view.open().unwrap();
            let mut read_back = vec![0u8; expected.len()];
            reader.read_fully(&mut read_back).unwrap();
            assert_eq!(read_back, expected);
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // The last view dropped with its thread, closing the pooled entry.
    assert_eq!(pool.size(), 0);
}

/// Test object writers on separate engine clones running in parallel and
/// reading back their own runs intact
#[test]
fn test_parallel_object_writers() {
    use spillway::codec::BincodeCodec;
    use spillway::sorter::{ObjectReader, StreamObjectReader};

    let dir = TempDir::new().unwrap();
    let engine = tiny_pool_engine(&dir, 512);

    let num_threads = 4;
    let barrier = Arc::new(Barrier::new(num_threads));

    let mut handles = vec![];
    for thread_id in 0..num_threads as u64 {
        let engine_clone = engine.clone();
        let barrier_clone = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier_clone.wait();

            let codec: Arc<BincodeCodec<u64>> = Arc::new(BincodeCodec::new());
            let mut writer = engine_clone.object_writer::<u64>(codec.clone());
            let base = thread_id * 1000;
            for i in base..base + 200 {
                writer.put(&i).unwrap();
            }
            writer.close().unwrap();

            let runs = writer.stream().take_runs();
            let mut reader = StreamObjectReader::<u64, _>::new(runs.into_source(), codec);
            let mut seen = Vec::new();
            while let Some(record) = reader.next().unwrap() {
                seen.push(record);
            }
            assert_eq!(seen, (base..base + 200).collect::<Vec<u64>>());
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.pool().size(), 0);
}
