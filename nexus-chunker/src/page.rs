//! Page resolution for paginated documents.

use crate::model::PageInfo;

/// Resolve the page containing character `offset`.
///
/// Returns the page whose `[start_char, end_char)` range contains the offset.
/// Offsets at or past the end of the last page resolve to the last page.
/// Without a page table, with an empty one, or for offsets that fall in a gap
/// between pages, there is no page.
pub fn get_page_number(offset: usize, pages: Option<&[PageInfo]>) -> Option<u32> {
    let pages = pages?;
    if let Some(page) = pages
        .iter()
        .find(|p| p.start_char <= offset && offset < p.end_char)
    {
        return Some(page.page_number);
    }
    let last = pages.iter().max_by_key(|p| p.end_char)?;
    (offset >= last.end_char).then_some(last.page_number)
}
