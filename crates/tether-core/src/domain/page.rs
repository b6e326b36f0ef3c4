/// Cursor over a paginated query.
///
/// Pass the same iterator back to the query until `has_next()` is false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageIterator {
    pub page_size: usize,
    pub marker: Option<String>,
    exhausted: bool,
}

impl PageIterator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            marker: None,
            exhausted: false,
        }
    }

    pub fn has_next(&self) -> bool {
        !self.exhausted
    }

    /// Record where the page just read ended.
    pub fn advance(&mut self, next: Option<String>) {
        self.exhausted = next.is_none();
        self.marker = next;
    }
}

impl Default for PageIterator {
    fn default() -> Self {
        Self::new(100)
    }
}
