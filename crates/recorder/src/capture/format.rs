//! Deterministic format selection.

use streamsaver_config::Quality;

use super::{CaptureError, StreamFormat};

/// Pick the format to record from `formats` (highest-ranked first).
///
/// A fixed resolution requires an exact height match. `Best` walks the fixed
/// resolutions from highest to lowest and takes the first one offered; when
/// none matches it falls back to the tool's top-ranked format.
pub fn select_format(
    requested: Quality,
    formats: &[StreamFormat],
) -> Result<StreamFormat, CaptureError> {
    let by_height = |h: u32| formats.iter().find(|f| f.height == Some(h));

    let chosen = match requested.height() {
        Some(h) => by_height(h),
        None => Quality::FIXED
            .iter()
            .filter_map(|q| q.height())
            .find_map(by_height)
            .or_else(|| formats.first()),
    };

    chosen.cloned().ok_or_else(|| CaptureError::FormatUnavailable {
        requested,
        available: available_heights(formats),
    })
}

/// Distinct heights on offer, in ranking order.
fn available_heights(formats: &[StreamFormat]) -> Vec<u32> {
    let mut heights = Vec::new();
    for h in formats.iter().filter_map(|f| f.height) {
        if !heights.contains(&h) {
            heights.push(h);
        }
    }
    heights
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn formats(heights: &[Option<u32>]) -> Vec<StreamFormat> {
        heights
            .iter()
            .enumerate()
            .map(|(i, h)| StreamFormat::new(format!("id{i}"), *h))
            .collect()
    }

    #[rstest]
    #[case(Quality::Best, &[Some(1080), Some(720), Some(480)], "id0")]
    #[case(Quality::Best, &[Some(480), Some(1080), Some(720)], "id1")]
    #[case(Quality::Best, &[Some(1000), Some(540)], "id0")]
    #[case(Quality::Best, &[None, Some(360)], "id1")]
    #[case(Quality::P720, &[Some(1080), Some(720), Some(720)], "id1")]
    #[case(Quality::P144, &[Some(240), Some(144)], "id1")]
    fn selects(#[case] q: Quality, #[case] heights: &[Option<u32>], #[case] expected: &str) {
        assert_eq!(select_format(q, &formats(heights)).unwrap().format_id, expected);
    }

    #[test]
    fn exact_height_required() {
        let err = select_format(Quality::P1080, &formats(&[Some(720), Some(480)])).unwrap_err();
        match err {
            CaptureError::FormatUnavailable {
                requested,
                available,
            } => {
                assert_eq!(requested, Quality::P1080);
                assert_eq!(available, vec![720, 480]);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_format_list_is_unavailable() {
        assert!(matches!(
            select_format(Quality::Best, &[]),
            Err(CaptureError::FormatUnavailable { .. })
        ));
    }

    #[test]
    fn selection_is_deterministic() {
        let offered = formats(&[Some(720), Some(1080), Some(1080), Some(480)]);
        let first = select_format(Quality::Best, &offered).unwrap();
        for _ in 0..10 {
            assert_eq!(select_format(Quality::Best, &offered).unwrap(), first);
        }
        assert_eq!(first.format_id, "id1");
    }
}
