//! Geographic spread selection for map queries.
//!
//! When a map query matches more blobs than the limit, dropping the tail
//! would empty whole regions: a dense city would crowd out everything
//! else. Instead the accumulated area is divided into a grid and results
//! are taken round-robin across occupied cells.

use std::collections::{BTreeMap, HashMap, VecDeque};

use hoard_blob::BlobRef;
use hoard_query::{Area, LatLong};

/// Grid cell id: sub-grid (for dateline splits), row, column.
type Cell = (u8, usize, usize);

/// Reduces `results` to at most `limit` entries spread across the area's
/// grid cells. Results without a resolved location are dropped; they
/// cannot be placed on a map.
pub(crate) fn best_by_location(
    results: &mut Vec<BlobRef>,
    locations: &HashMap<BlobRef, LatLong>,
    area: Option<&Area>,
    limit: usize,
) {
    if results.len() <= limit {
        return;
    }
    let Some(area) = area else {
        results.truncate(limit);
        return;
    };
    let dim = grid_dimension(limit);

    let mut buckets: BTreeMap<Cell, VecDeque<BlobRef>> = BTreeMap::new();
    for blob in results.drain(..) {
        let Some(position) = locations.get(&blob) else {
            continue;
        };
        let bucket = buckets.entry(cell_of(area, dim, *position)).or_default();
        if bucket.len() < limit {
            bucket.push_back(blob);
        }
    }

    let mut selected = Vec::with_capacity(limit);
    let mut queues: Vec<VecDeque<BlobRef>> = buckets.into_values().collect();
    'select: loop {
        let mut took_any = false;
        for queue in &mut queues {
            if let Some(blob) = queue.pop_front() {
                selected.push(blob);
                took_any = true;
                if selected.len() == limit {
                    break 'select;
                }
            }
        }
        if !took_any {
            break;
        }
    }
    *results = selected;
}

/// Grid dimension for a limit: `round(sqrt(limit))` clamped to `[3, 100]`.
fn grid_dimension(limit: usize) -> usize {
    ((limit as f64).sqrt().round() as i64).clamp(3, 100) as usize
}

/// Buckets a point into the area's grid, splitting at the dateline when
/// the area wraps.
fn cell_of(area: &Area, dim: usize, position: LatLong) -> Cell {
    if area.crosses_dateline() {
        if position.longitude >= area.west {
            let (row, col) = cell_in(area.north, area.south, area.west, 180.0, dim, position);
            (0, row, col)
        } else {
            let (row, col) = cell_in(area.north, area.south, -180.0, area.east, dim, position);
            (1, row, col)
        }
    } else {
        let (row, col) = cell_in(area.north, area.south, area.west, area.east, dim, position);
        (0, row, col)
    }
}

/// Buckets a point into one `dim`x`dim` grid over the given bounds.
fn cell_in(
    north: f64,
    south: f64,
    west: f64,
    east: f64,
    dim: usize,
    position: LatLong,
) -> (usize, usize) {
    /// Maps a coordinate within `[low, high]` to a grid index.
    fn axis(low: f64, high: f64, dim: usize, value: f64) -> usize {
        let span = high - low;
        if span <= 0.0 {
            return 0;
        }
        let fraction = ((value - low) / span).clamp(0.0, 1.0);
        ((fraction * dim as f64) as usize).min(dim - 1)
    }

    (
        axis(south, north, dim, position.latitude),
        axis(west, east, dim, position.longitude),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic test refs.
    fn br(n: u8) -> BlobRef {
        format!("sha224-{:02x}{}", n, "00".repeat(27)).parse().unwrap()
    }

    /// A point location.
    fn at(latitude: f64, longitude: f64) -> LatLong {
        LatLong {
            latitude,
            longitude,
        }
    }

    #[test]
    fn dimension_clamps() {
        assert_eq!(grid_dimension(1), 3);
        assert_eq!(grid_dimension(25), 5);
        assert_eq!(grid_dimension(200), 14);
        assert_eq!(grid_dimension(1_000_000), 100);
    }

    #[test]
    fn under_limit_is_untouched() {
        let mut results = vec![br(1), br(2)];
        best_by_location(&mut results, &HashMap::new(), None, 5);
        assert_eq!(results, vec![br(1), br(2)]);
    }

    #[test]
    fn spreads_across_cells() {
        // Nine blobs in one corner, one in the opposite corner; a limit
        // of 4 must keep the outlier.
        let mut locations = HashMap::new();
        let mut results = Vec::new();
        for n in 1..=9 {
            locations.insert(br(n), at(1.0 + f64::from(n) * 0.01, 1.0));
            results.push(br(n));
        }
        locations.insert(br(10), at(49.0, 99.0));
        results.push(br(10));

        let area = Area {
            north: 50.0,
            south: 0.0,
            east: 100.0,
            west: 0.0,
        };
        best_by_location(&mut results, &locations, Some(&area), 4);

        assert_eq!(results.len(), 4);
        assert!(results.contains(&br(10)), "outlier was dropped: {results:?}");
    }

    #[test]
    fn unlocated_blobs_are_dropped() {
        let mut locations = HashMap::new();
        locations.insert(br(1), at(10.0, 10.0));
        let mut results = vec![br(1), br(2), br(3)];
        let area = Area {
            north: 20.0,
            south: 0.0,
            east: 20.0,
            west: 0.0,
        };
        best_by_location(&mut results, &locations, Some(&area), 2);
        assert_eq!(results, vec![br(1)]);
    }

    #[test]
    fn dateline_split_separates_hemisphere_edges() {
        let area = Area {
            north: 10.0,
            south: -10.0,
            east: -170.0,
            west: 170.0,
        };
        let west_side = cell_of(&area, 3, at(0.0, 175.0));
        let east_side = cell_of(&area, 3, at(0.0, -175.0));
        assert_eq!(west_side.0, 0);
        assert_eq!(east_side.0, 1);
    }

    #[test]
    fn never_exceeds_limit() {
        let mut locations = HashMap::new();
        let mut results = Vec::new();
        for n in 1..=50 {
            locations.insert(br(n), at(f64::from(n), f64::from(n)));
            results.push(br(n));
        }
        let area = Area {
            north: 51.0,
            south: 0.0,
            east: 51.0,
            west: 0.0,
        };
        best_by_location(&mut results, &locations, Some(&area), 7);
        assert_eq!(results.len(), 7);
    }
}
