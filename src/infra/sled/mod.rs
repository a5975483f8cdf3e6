//! Embedded ordered storage backed by sled
//!
//! Both key spaces live in one tree; they are separated by key prefix.

use std::ops::ControlFlow;
use std::path::Path;

use crate::infra::kv::{OrderedKv, ScanVisitor};
use crate::infra::Result;

/// Tree holding primary records and lookup entries
const RECEIPTS_TREE: &str = "receipts";

/// sled-backed [`OrderedKv`]
#[derive(Debug, Clone)]
pub struct SledKv {
    db: ::sled::Db,
    receipts: ::sled::Tree,
}

impl SledKv {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = ::sled::open(path)?;
        Self::from_db(db)
    }

    /// Database that is removed when dropped (tests, benchmarks)
    pub fn temporary() -> Result<Self> {
        let db = ::sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: ::sled::Db) -> Result<Self> {
        let receipts = db.open_tree(RECEIPTS_TREE)?;
        Ok(Self { db, receipts })
    }
}

impl OrderedKv for SledKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.receipts.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.receipts.insert(key, value)?;
        Ok(())
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let swapped = self
            .receipts
            .compare_and_swap(key, None::<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.receipts.remove(key)?;
        Ok(())
    }

    fn scan_rev(&self, lower: &[u8], upper: &[u8], visit: &mut ScanVisitor<'_>) -> Result<()> {
        if lower >= upper {
            return Ok(());
        }
        for entry in self.receipts.range(lower..upper).rev() {
            let (key, value) = entry?;
            if let ControlFlow::Break(()) = visit(&key, &value) {
                break;
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_rev(kv: &SledKv, lower: &[u8], upper: &[u8]) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        kv.scan_rev(lower, upper, &mut |k: &[u8], _: &[u8]| {
            keys.push(k.to_vec());
            ControlFlow::Continue(())
        })
        .unwrap();
        keys
    }

    #[test]
    fn test_put_if_absent() {
        let kv = SledKv::temporary().unwrap();
        assert!(kv.put_if_absent(b"l/a", b"1").unwrap());
        assert!(!kv.put_if_absent(b"l/a", b"2").unwrap());
        assert_eq!(kv.get(b"l/a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_reverse_scan_is_bounded_and_ordered() {
        let kv = SledKv::temporary().unwrap();
        for key in [b"r/1", b"r/2", b"r/3", b"s/0"] {
            kv.put(key, b"{}").unwrap();
        }
        kv.put(b"l/x", b"r/1").unwrap();

        assert_eq!(
            collect_rev(&kv, b"r/", b"r0"),
            vec![b"r/3".to_vec(), b"r/2".to_vec(), b"r/1".to_vec()]
        );
        assert_eq!(collect_rev(&kv, b"r/2", b"r/3"), vec![b"r/2".to_vec()]);
        assert!(collect_rev(&kv, b"r/3", b"r/1").is_empty());
    }

    #[test]
    fn test_scan_stops_on_break() {
        let kv = SledKv::temporary().unwrap();
        for key in [b"r/1", b"r/2", b"r/3"] {
            kv.put(key, b"{}").unwrap();
        }
        let mut seen = 0;
        kv.scan_rev(b"r/", b"r0", &mut |_: &[u8], _: &[u8]| {
            seen += 1;
            ControlFlow::Break(())
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = SledKv::open(dir.path()).unwrap();
            kv.put(b"r/1", b"{\"a\":1}").unwrap();
            kv.flush().unwrap();
        }
        let kv = SledKv::open(dir.path()).unwrap();
        assert_eq!(kv.get(b"r/1").unwrap(), Some(b"{\"a\":1}".to_vec()));
    }
}
