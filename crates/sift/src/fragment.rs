//! Greedy one-to-one matching of two mass-sorted fragment lists

use crate::mass::Tolerance;

/// Compare mass-ascending `query` and `db` fragments, returning one entry per
/// database fragment: `q + 1` if it matched query fragment `q`, otherwise 0.
///
/// `offset` is added to every database fragment before comparison (negative
/// for neutral losses, the precursor mass difference for mirrored search).
pub fn compare_fragments(query: &[f32], db: &[f32], tolerance: Tolerance, offset: f32) -> Vec<u32> {
    let mut hits = vec![0; db.len()];
    compare_fragments_into(query, db, tolerance, offset, &mut hits);
    hits
}

/// Like [`compare_fragments`], but writes into a caller-provided buffer of
/// at least `db.len()` entries
///
/// # Invariants
///
/// * `query` and `db` are sorted in ascending order
/// * each query index appears at most once in `hits`, and each database
///   fragment records at most one query index
pub fn compare_fragments_into(
    query: &[f32],
    db: &[f32],
    tolerance: Tolerance,
    offset: f32,
    hits: &mut [u32],
) {
    let hits = &mut hits[..db.len()];
    hits.iter_mut().for_each(|h| *h = 0);
    scan(query, db, tolerance, offset, |q, d| hits[d] = q as u32 + 1);
}

/// Number of database fragments matched by [`compare_fragments`], without
/// allocating
pub fn count_matches(query: &[f32], db: &[f32], tolerance: Tolerance, offset: f32) -> usize {
    let mut count = 0;
    scan(query, db, tolerance, offset, |_, _| count += 1);
    count
}

#[inline]
fn scan<F: FnMut(usize, usize)>(query: &[f32], db: &[f32], tolerance: Tolerance, offset: f32, mut on_match: F) {
    let (mut q, mut d) = (0, 0);
    while q < query.len() && d < db.len() {
        let shifted = db[d] + offset;
        if tolerance.matches(query[q], shifted) {
            on_match(q, d);
            q += 1;
            d += 1;
        } else if query[q] < shifted {
            q += 1;
        } else {
            // Also taken for NaN masses, so the scan always terminates
            d += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn ascending_one_to_one() {
        let query = [100.0, 200.0, 300.1];
        let db = [100.0, 200.05, 300.0];
        let hits = compare_fragments(&query, &db, Tolerance::Da(0.2), 0.0);
        assert_eq!(hits, vec![1, 2, 3]);
        assert_eq!(count_matches(&query, &db, Tolerance::Da(0.2), 0.0), 3);
    }

    #[test]
    fn greedy_first_pair_wins() {
        // Both query fragments are within tolerance of the first db fragment,
        // only the first one may claim it
        let query = [100.0, 100.1];
        let db = [100.05, 250.0];
        let hits = compare_fragments(&query, &db, Tolerance::Da(0.2), 0.0);
        assert_eq!(hits, vec![1, 0]);
    }

    #[test]
    fn offsets_shift_database() {
        let query = [82.0, 182.0];
        let db = [100.0, 200.0];
        let none = compare_fragments(&query, &db, Tolerance::Da(0.05), 0.0);
        assert_eq!(none, vec![0, 0]);

        let water = compare_fragments(&query, &db, Tolerance::Da(0.05), -crate::mass::H2O);
        assert_eq!(water, vec![1, 2]);
    }

    #[test]
    fn ppm_tolerance() {
        let query = [1000.0, 2000.0];
        let db = [1000.005, 2000.1];
        let hits = compare_fragments(&query, &db, Tolerance::Ppm(10.0), 0.0);
        assert_eq!(hits, vec![1, 0]);
    }

    #[test]
    fn empty_inputs() {
        assert!(compare_fragments(&[], &[], Tolerance::Da(1.0), 0.0).is_empty());
        assert_eq!(compare_fragments(&[], &[1.0], Tolerance::Da(1.0), 0.0), vec![0]);
        assert_eq!(count_matches(&[1.0], &[], Tolerance::Da(1.0), 0.0), 0);
    }

    #[test]
    fn reused_buffer_is_cleared() {
        let mut buf = vec![9; 4];
        compare_fragments_into(&[100.0], &[50.0, 100.0], Tolerance::Da(0.1), 0.0, &mut buf);
        assert_eq!(&buf[..2], &[0, 1]);
    }

    #[quickcheck]
    fn one_to_one(query: Vec<u16>, db: Vec<u16>, dupes: Vec<u8>) -> bool {
        // Inject near-duplicate masses to provoke competing matches
        let mut query = query
            .into_iter()
            .map(|m| m as f32 / 10.0)
            .chain(dupes.iter().map(|&x| x as f32 / 10.0 + 0.01))
            .collect::<Vec<_>>();
        let mut db = db
            .into_iter()
            .map(|m| m as f32 / 10.0)
            .chain(dupes.iter().map(|&x| x as f32 / 10.0 - 0.01))
            .collect::<Vec<_>>();
        query.sort_by(|a, b| a.total_cmp(b));
        db.sort_by(|a, b| a.total_cmp(b));

        let tolerance = Tolerance::Da(0.05);
        let hits = compare_fragments(&query, &db, tolerance, 0.0);

        let matched = hits.iter().filter(|&&h| h > 0).collect::<Vec<_>>();
        let ascending = matched.windows(2).all(|w| w[0] < w[1]);
        let within = hits
            .iter()
            .enumerate()
            .filter(|(_, &h)| h > 0)
            .all(|(d, &h)| tolerance.matches(query[h as usize - 1], db[d]));

        hits.len() == db.len()
            && ascending
            && within
            && matched.len() == count_matches(&query, &db, tolerance, 0.0)
    }
}
