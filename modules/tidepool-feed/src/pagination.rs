//! Offset pagination shared by the feed and pinned-events surfaces. Tokens
//! are base64 of the decimal offset; anything else is a validation error.

use tidepool_common::util::{decode_page_token, encode_page_token};
use tidepool_common::TidepoolError;

/// Slice a page out of `items`. Returns the page and the token for the next
/// one (None when the listing is exhausted).
pub fn paginate<T: Clone>(
    items: &[T],
    page_token: Option<&str>,
    page_size: usize,
) -> Result<(Vec<T>, Option<String>), TidepoolError> {
    let offset = match page_token {
        Some(token) => decode_page_token(token)
            .map_err(|_| TidepoolError::Validation("Invalid page token".to_string()))?,
        None => 0,
    };

    let page: Vec<T> = items.iter().skip(offset).take(page_size).cloned().collect();
    let next_offset = offset + page.len();
    let next_page_token = if next_offset < items.len() && !page.is_empty() {
        Some(encode_page_token(next_offset))
    } else {
        None
    };
    Ok((page, next_page_token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_concatenate_to_full_set() {
        let items: Vec<u32> = (0..5).collect();
        let (page1, token1) = paginate(&items, None, 2).unwrap();
        let (page2, token2) = paginate(&items, token1.as_deref(), 2).unwrap();
        let (page3, token3) = paginate(&items, token2.as_deref(), 2).unwrap();

        let mut all = page1;
        all.extend(page2);
        all.extend(page3);
        assert_eq!(all, items);
        assert!(token3.is_none());
    }

    #[test]
    fn exact_fit_has_no_next_token() {
        let items: Vec<u32> = (0..4).collect();
        let (_, token1) = paginate(&items, None, 2).unwrap();
        let (page2, token2) = paginate(&items, token1.as_deref(), 2).unwrap();
        assert_eq!(page2, vec![2, 3]);
        assert!(token2.is_none());
    }

    #[test]
    fn invalid_token_is_validation_error() {
        let items: Vec<u32> = (0..3).collect();
        let err = paginate(&items, Some("!!not-base64!!"), 2).unwrap_err();
        assert!(matches!(err, TidepoolError::Validation(_)));
    }

    #[test]
    fn offset_past_end_yields_empty_page() {
        let items: Vec<u32> = (0..3).collect();
        let token = tidepool_common::util::encode_page_token(10);
        let (page, next) = paginate(&items, Some(&token), 2).unwrap();
        assert!(page.is_empty());
        assert!(next.is_none());
    }
}
