//! Page fixtures and reference models.
//!
//! Builders panic on failure; they are meant for tests and benchmarks
//! where a broken fixture should abort immediately.

use strata_codec::VarintCodec;
use strata_packed::{Config, FixedSequence, Page, TreeGeometry, VarSequence};

/// Values of the worked fixed-sequence example (VPB = BF = 4).
pub const SCENARIO_A_VALUES: [u64; 8] = [3, 1, 4, 1, 5, 9, 2, 6];

/// Values straddling the one-byte threshold of `Varint248`.
pub const SCENARIO_B_VALUES: [u64; 4] = [0, 125, 126, 16384];

/// Values per branch and branching factor of 4.
///
/// Small fan-in gives deep indexes with few values.
#[must_use]
pub fn small_geometry() -> TreeGeometry {
    TreeGeometry::new(4, 4).expect("4/4 is a valid geometry")
}

/// Sizes around every layout boundary of `geometry`:
/// `{0, 1, VPB-1, VPB, VPB+1, BF*VPB*3+7}`.
#[must_use]
pub fn boundary_sizes(geometry: TreeGeometry) -> Vec<usize> {
    let vpb = geometry.values_per_branch();
    let bf = geometry.branching_factor();
    vec![0, 1, vpb - 1, vpb, vpb + 1, bf * vpb * 3 + 7]
}

/// Page capacity comfortably holding `values` elements of `width` bytes
/// per column, plus indexes.
#[must_use]
pub fn page_capacity_for(values: usize, width: usize, columns: usize) -> usize {
    (4096 + values * width * columns * 3).next_multiple_of(8)
}

/// Builds a page whose root segment 0 holds a one-column fixed sequence.
///
/// # Panics
///
/// Panics if the sequence cannot be built.
#[must_use]
pub fn fixed_page(values: &[u64], geometry: TreeGeometry) -> Page {
    let mut page = Page::new(page_capacity_for(values.len(), 8, 1), 1).expect("page");
    {
        let mut root = page.root_mut();
        let mut seq = FixedSequence::<_, u64>::create(&mut root, 0, 1, values.len(), geometry).expect("create");
        let rows: Vec<[u64; 1]> = values.iter().map(|&v| [v]).collect();
        seq.insert(0, &rows).expect("insert");
    }
    page
}

/// Opens the fixed sequence built by [`fixed_page`].
///
/// # Panics
///
/// Panics if the page does not hold one.
#[must_use]
pub fn open_fixed(page: &Page, geometry: TreeGeometry) -> FixedSequence<&[u8], u64> {
    let region = page.root().into_child(0).expect("segment 0 is a sequence");
    FixedSequence::open(region, geometry).expect("open")
}

/// Builds a page whose root segment 0 holds a one-column variable sequence.
///
/// # Panics
///
/// Panics if the sequence cannot be built.
#[must_use]
pub fn var_page<C: VarintCodec>(values: &[C::Value], config: &Config) -> Page {
    let capacity = page_capacity_for(values.len(), C::MAX_LEN, 1);
    let mut page = Page::new(capacity, 1).expect("page");
    {
        let mut root = page.root_mut();
        let mut seq = VarSequence::<_, C>::create(&mut root, 0, 1, config.clone()).expect("create");
        let rows: Vec<[C::Value; 1]> = values.iter().map(|&v| [v]).collect();
        seq.insert(0, &rows).expect("insert");
    }
    page
}

/// Opens the variable sequence built by [`var_page`].
///
/// # Panics
///
/// Panics if the page does not hold one.
#[must_use]
pub fn open_var<'a, C: VarintCodec>(page: &'a Page, config: &Config) -> VarSequence<&'a [u8], C> {
    let region = page.root().into_child(0).expect("segment 0 is a sequence");
    VarSequence::open(region, config.clone()).expect("open")
}

/// Reference sum of `values[start..end]`.
#[must_use]
pub fn linear_sum(values: &[i64], start: usize, end: usize) -> i64 {
    values[start..end].iter().sum()
}

/// Reference forward search: first index from `start` whose running sum
/// reaches (`strict == false`) or exceeds (`strict == true`) `target`, or
/// `values.len()`. Returns the index and the sum before it.
#[must_use]
pub fn linear_find_fw(values: &[i64], start: usize, target: i64, strict: bool) -> (usize, i64) {
    let mut prefix = 0;
    for (i, &v) in values.iter().enumerate().skip(start) {
        let next = prefix + v;
        if (strict && next > target) || (!strict && next >= target) {
            return (i, prefix);
        }
        prefix = next;
    }
    (values.len(), prefix)
}

/// Reference backward search from `start` down to 0.
#[must_use]
pub fn linear_find_bw(values: &[i64], start: usize, target: i64, strict: bool) -> Option<(usize, i64)> {
    let mut prefix = 0;
    for i in (0..=start).rev() {
        let next = prefix + values[i];
        if (strict && next > target) || (!strict && next >= target) {
            return Some((i, prefix));
        }
        prefix = next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_codec::Varint248;

    #[test]
    fn scenario_pages_open() {
        let page = fixed_page(&SCENARIO_A_VALUES, small_geometry());
        let seq = open_fixed(&page, small_geometry());
        assert_eq!(seq.size(), 8);
        seq.check().unwrap();

        let page = var_page::<Varint248>(&SCENARIO_B_VALUES, &Config::new().geometry(small_geometry()));
        let seq = open_var::<Varint248>(&page, &Config::new().geometry(small_geometry()));
        assert_eq!(seq.data_size(0), 6);
    }

    #[test]
    fn reference_searches() {
        let values = [2, 0, 3, 1];
        assert_eq!(linear_find_fw(&values, 0, 5, false), (2, 2));
        assert_eq!(linear_find_fw(&values, 0, 5, true), (3, 5));
        assert_eq!(linear_find_fw(&values, 1, 100, false), (4, 4));
        assert_eq!(linear_find_bw(&values, 3, 4, false), Some((2, 1)));
        assert_eq!(linear_find_bw(&values, 1, 3, false), None);
    }

    #[test]
    fn boundary_sizes_for_small_geometry() {
        assert_eq!(boundary_sizes(small_geometry()), vec![0, 1, 3, 4, 5, 55]);
    }
}
