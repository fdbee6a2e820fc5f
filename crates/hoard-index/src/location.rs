//! Resolving a permanode's location.
//!
//! A permanode is located by its explicit `latitude`/`longitude`
//! attributes (as of the query's `at` time), or failing that by the GPS
//! position of the file its `camliContent` points at.

use chrono::{DateTime, Utc};
use hoard_blob::BlobRef;
use hoard_query::LatLong;

use crate::{error::SearchError, matcher::MatchContext};

/// Resolves the permanode's location, if any. Returns `None` without a
/// corpus; callers that require a location must check for one first.
pub(crate) fn permanode_location(
    ctx: &MatchContext<'_>,
    pn: &BlobRef,
    at: Option<DateTime<Utc>>,
) -> Result<Option<LatLong>, SearchError> {
    let Some(corpus) = ctx.corpus else {
        return Ok(None);
    };
    let lat = corpus.permanode_attr_value(pn, "latitude", at, None);
    let long = corpus.permanode_attr_value(pn, "longitude", at, None);
    if let (Some(lat), Some(long)) = (lat, long)
        && let (Ok(latitude), Ok(longitude)) = (lat.parse(), long.parse())
    {
        return Ok(Some(LatLong {
            latitude,
            longitude,
        }));
    }
    if let Some(content) = corpus.permanode_attr_value(pn, "camliContent", at, None)
        && let Ok(file) = content.parse::<BlobRef>()
    {
        return ctx.index.file_lat_long(&file);
    }
    Ok(None)
}
