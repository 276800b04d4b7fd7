//! Object-level reading over a sequence of record runs.

use crate::codec::Deserializer;
use crate::error::Result;
use crate::sorter::ObjectReader;
use crate::stream::RecordCursor;
use std::sync::Arc;

/// Lazy, forward-only reader deserializing objects from successive record
/// cursors.
///
/// The source function is asked for the next cursor only after the
/// previous one is exhausted and closed, so at most one run is open at a
/// time. The sequence is not restartable: once the source returns `None`
/// the reader stays exhausted.
pub struct StreamObjectReader<T, F> {
    source: F,
    deserializer: Arc<dyn Deserializer<T>>,
    current: Option<Box<dyn RecordCursor + Send>>,
    done: bool,
}

impl<T, F> StreamObjectReader<T, F>
where
    F: FnMut() -> Result<Option<Box<dyn RecordCursor + Send>>>,
{
    /// Creates a reader pulling cursors from `source`.
    pub fn new(source: F, deserializer: Arc<dyn Deserializer<T>>) -> Self {
        Self { source, deserializer, current: None, done: false }
    }
}

impl<T, F> ObjectReader<T> for StreamObjectReader<T, F>
where
    F: FnMut() -> Result<Option<Box<dyn RecordCursor + Send>>>,
{
    fn next(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if let Some(cursor) = &mut self.current {
                if cursor.advance()? {
                    return Ok(Some(self.deserializer.deserialize(cursor.record())?));
                }
                self.current = None;
            }
            match (self.source)()? {
                Some(cursor) => self.current = Some(cursor),
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}
