//! Database iterator for scanning key-value pairs.
//!
//! Walks the index in key order (or reverse order) and resolves values from
//! the data files lazily, one positional read per `value()` call.

use crate::config::IteratorOptions;
use crate::error::{Error, Result};
use crate::index::IndexIterator;
use crate::DB;

/// An iterator over the live key-value pairs of the database.
///
/// Keys not starting with the configured prefix are skipped. With the
/// in-memory indexes the iterator sees the keys present when it was created.
///
/// # Example
///
/// ```rust,no_run
/// use caskdb::{IteratorOptions, Options, DB};
///
/// # fn main() -> Result<(), caskdb::Error> {
/// let db = DB::open(Options::default().dir_path("./data"))?;
///
/// // Insert some data
/// db.put(b"user:1", b"alice")?;
/// db.put(b"user:2", b"bob")?;
/// db.put(b"order:1", b"book")?;
///
/// // Iterate through the users only
/// let mut iter = db.iter(IteratorOptions::default().prefix(b"user:"));
/// while iter.valid() {
///     println!("{:?} => {:?}", iter.key(), iter.value()?);
///     iter.next();
/// }
/// # Ok(())
/// # }
/// ```
pub struct DBIterator<'a> {
    /// Database the values are read from
    db: &'a DB,

    /// Cursor over the index
    index_iter: Box<dyn IndexIterator>,

    options: IteratorOptions,
}

impl<'a> DBIterator<'a> {
    pub(crate) fn new(db: &'a DB, options: IteratorOptions) -> Self {
        let index_iter = db.index.iterator(options.reverse);
        let mut iter = Self { db, index_iter, options };
        iter.skip_to_next();
        iter
    }

    /// Moves back to the first matching entry.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    /// Moves to the first matching key `>= key`, or `<= key` when reversed.
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next();
    }

    /// Moves to the next matching entry.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    /// Returns true if the iterator is positioned at a valid entry.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Returns the key at the current position.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid. Call `valid()` first to check.
    pub fn key(&self) -> &[u8] {
        assert!(self.valid(), "Iterator not valid");
        self.index_iter.key()
    }

    /// Reads the value at the current position from its data file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the record is a tombstone,
    /// [`Error::DatabaseClosed`] once the database was closed, or an error if
    /// the data file read fails.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn value(&self) -> Result<Vec<u8>> {
        assert!(self.valid(), "Iterator not valid");
        let pos = self.index_iter.value();
        let inner = self.db.inner.read();
        self.db.ensure_open()?;
        inner.value_at(&pos)?.ok_or(Error::KeyNotFound)
    }

    /// Releases the index cursor; the iterator becomes invalid.
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    fn skip_to_next(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() && !self.index_iter.key().starts_with(&self.options.prefix) {
            self.index_iter.next();
        }
    }
}

impl Drop for DBIterator<'_> {
    fn drop(&mut self) {
        self.index_iter.close();
    }
}

impl DB {
    /// Creates an iterator over the live key-value pairs.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use caskdb::{IteratorOptions, Options, DB};
    ///
    /// # fn main() -> Result<(), caskdb::Error> {
    /// let db = DB::open(Options::default().dir_path("./data"))?;
    ///
    /// let mut iter = db.iter(IteratorOptions::default().reverse(true));
    /// while iter.valid() {
    ///     println!("{:?} => {:?}", iter.key(), iter.value()?);
    ///     iter.next();
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn iter(&self, options: IteratorOptions) -> DBIterator<'_> {
        DBIterator::new(self, options)
    }
}
