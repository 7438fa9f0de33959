//! Lazy cursor-based iteration
//!
//! Wraps a `cursor -> ScanPage` fetch function into an `Iterator` that
//! pulls one page at a time. The scan is restartable but not a snapshot:
//! items changed while scanning may be seen twice or not at all.

use std::collections::VecDeque;

use ttseries_core::{Result, ScanPage};

/// Iterator over a cursor scan
///
/// Yields `Err` once and then stops if a page fetch fails.
pub struct CursorScan<'a, T> {
    fetch: Box<dyn FnMut(u64) -> Result<ScanPage<T>> + 'a>,
    buffered: VecDeque<T>,
    cursor: u64,
    finished: bool,
}

impl<'a, T> CursorScan<'a, T> {
    /// Start a scan at cursor 0
    pub fn new(fetch: impl FnMut(u64) -> Result<ScanPage<T>> + 'a) -> Self {
        Self {
            fetch: Box::new(fetch),
            buffered: VecDeque::new(),
            cursor: 0,
            finished: false,
        }
    }
}

impl<'a, T> Iterator for CursorScan<'a, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(Ok(item));
            }
            if self.finished {
                return None;
            }
            match (self.fetch)(self.cursor) {
                Ok(page) => {
                    self.buffered.extend(page.items);
                    self.cursor = page.cursor;
                    self.finished = page.cursor == 0;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttseries_core::Error;

    #[test]
    fn test_walks_all_pages() {
        let pages = vec![vec![1, 2], vec![], vec![3]];
        let scan = CursorScan::new(move |cursor| {
            let i = cursor as usize;
            Ok(ScanPage {
                cursor: if i + 1 < pages.len() { (i + 1) as u64 } else { 0 },
                items: pages[i].clone(),
            })
        });
        let items: Vec<i32> = scan.collect::<Result<_>>().unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn test_error_stops_scan() {
        let mut scan: CursorScan<'_, i32> =
            CursorScan::new(|_| Err(Error::StoreConnection("down".into())));
        assert!(matches!(scan.next(), Some(Err(Error::StoreConnection(_)))));
        assert!(scan.next().is_none());
    }
}
