use scrollbulk_core::{Error, Result};

/// Ids per chunk when deleting by id.
pub const DEFAULT_DELETE_CHUNK_SIZE: usize = 20_000;

/// Operations per chunk for create/upsert batches.
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 1_000;

/// Splits `items` into consecutive chunks of `size`; only the last may be shorter.
pub fn chunk<T>(items: Vec<T>, size: usize) -> Result<Vec<Vec<T>>> {
    if size == 0 {
        return Err(Error::InvalidArgument("chunk size must be positive".into()));
    }
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    Ok(chunks)
}
