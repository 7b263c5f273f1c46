//! Page windows for the list endpoints
//!
//! Both `/api/tasks` and `/api/webhook-logs` return 50 rows per page and
//! report the same page block alongside their rows.

use serde::Serialize;

/// Rows per page on every list endpoint
pub const PAGE_SIZE: i64 = 50;

/// Page block serialized next to a list response's rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    /// 1-based, always within `1..=max(total_pages, 1)`
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub total_results: i64,
}

impl PageWindow {
    /// Place the requested page over `total_results` rows.
    ///
    /// A missing, zero or negative page means the first page; a page past
    /// the end means the last one.
    ///
    /// ```
    /// use annomirror_web::pagination::PageWindow;
    ///
    /// let window = PageWindow::locate(120, Some(99));
    /// assert_eq!((window.page, window.total_pages), (3, 3));
    /// assert_eq!(window.offset(), 100);
    /// ```
    pub fn locate(total_results: i64, requested: Option<i64>) -> Self {
        let total_results = total_results.max(0);
        let total_pages = total_results / PAGE_SIZE + i64::from(total_results % PAGE_SIZE != 0);
        let page = requested.unwrap_or(1).clamp(1, total_pages.max(1));

        Self {
            page,
            page_size: PAGE_SIZE,
            total_pages,
            total_results,
        }
    }

    /// Rows to skip for SQL OFFSET
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}
