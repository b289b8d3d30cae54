//! Execution order heuristic for `skip_nonac` (§4.6).
//!
//! Testcases belonging to the largest number of subtasks run first: a failure there prunes the
//! most work. Layering: scan testdata ids by descending subtask-membership count; place each into
//! the lowest-numbered layer whose accumulated subtask set already a superset of its own subtasks
//! (or open a new layer), then union its subtasks into that layer. The final order ranks testdata
//! by ascending layer.

use std::collections::{HashMap, HashSet};

use crate::challenge::TestData;

/// Compute `testdata_id -> order` for a challenge's testdata set. With `skip_nonac == false`
/// every testdata keeps an order equal to its position in `testdatas`'s iteration (stable but
/// otherwise unconstrained, since §4.6 only prescribes the skip_nonac case).
pub fn compute_order(
    testdatas: &HashMap<u32, TestData>,
    skip_nonac: bool,
) -> HashMap<u32, u32> {
    let mut ids: Vec<u32> = testdatas.keys().copied().collect();
    ids.sort_unstable();

    if !skip_nonac {
        return ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i as u32))
            .collect();
    }

    let mut scan_order = ids.clone();
    scan_order.sort_by_key(|id| std::cmp::Reverse(testdatas[id].subtasks.len()));

    let mut layers: Vec<HashSet<u32>> = Vec::new();
    let mut testdata_layer: HashMap<u32, usize> = HashMap::new();

    for id in &scan_order {
        let subtasks = &testdatas[id].subtasks;
        let pos = first_superset_layer(&layers, subtasks);
        if pos == layers.len() {
            layers.push(HashSet::new());
        }
        layers[pos].extend(subtasks.iter().copied());
        testdata_layer.insert(*id, pos);
    }

    let mut by_layer = ids.clone();
    by_layer.sort_by_key(|id| testdata_layer[id]);

    by_layer
        .into_iter()
        .enumerate()
        .map(|(rank, id)| (id, rank as u32))
        .collect()
}

/// Smallest index of a layer that is already a superset of `subtasks`, or `layers.len()` if none
/// is. Which layers are supersets of a given testdata's subtasks is not monotonic in the layer
/// index (an earlier layer can easily hold an unrelated subtask set that isn't a superset while a
/// later one is, and vice versa), so this has to be a linear scan rather than a binary search.
fn first_superset_layer(layers: &[HashSet<u32>], subtasks: &HashSet<u32>) -> usize {
    layers
        .iter()
        .position(|layer| subtasks.iter().all(|s| layer.contains(s)))
        .unwrap_or(layers.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn td(id: u32, subtasks: &[u32]) -> TestData {
        let mut t = TestData::new(id, PathBuf::new(), PathBuf::new());
        t.subtasks = subtasks.iter().copied().collect();
        t
    }

    #[test]
    fn without_skip_nonac_order_follows_ascending_id() {
        let testdatas = HashMap::from([(3, td(3, &[])), (1, td(1, &[])), (2, td(2, &[]))]);
        let order = compute_order(&testdatas, false);
        assert_eq!(order[&1], 0);
        assert_eq!(order[&2], 1);
        assert_eq!(order[&3], 2);
    }

    #[test]
    fn wider_subtask_membership_never_ends_up_later_than_a_strict_subset() {
        // testdata 1 belongs to subtasks {1,2}, testdata 2 belongs to {1}: 1's membership is a
        // strict superset of 2's, so 1 must not be ordered after 2.
        let testdatas = HashMap::from([(1, td(1, &[1, 2])), (2, td(2, &[1]))]);
        let order = compute_order(&testdatas, true);
        assert!(order[&1] <= order[&2]);
    }

    #[test]
    fn disjoint_subtasks_each_get_their_own_layer() {
        let testdatas = HashMap::from([(1, td(1, &[1])), (2, td(2, &[2]))]);
        let order = compute_order(&testdatas, true);
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn reuses_an_earlier_layer_even_when_a_later_one_is_not_a_superset() {
        // Scan order (by descending membership size, ties broken by ascending id) visits:
        // 10 {5,6,7} -> layer 0 = {5,6,7}
        // 20 {1,2}   -> not a subset of layer 0 -> layer 1 = {1,2}
        // 30 {3,4}   -> not a subset of layer 0 or 1 -> layer 2 = {3,4}
        // 40 {1,2}   -> IS a subset of layer 1 but not of layer 2: a binary search over
        //               layer indices assuming "superset-ness" is monotonic would wrongly skip
        //               layer 1 and open a new layer 3. The correct placement is layer 1.
        let testdatas = HashMap::from([
            (10, td(10, &[5, 6, 7])),
            (20, td(20, &[1, 2])),
            (30, td(30, &[3, 4])),
            (40, td(40, &[1, 2])),
        ]);
        let order = compute_order(&testdatas, true);
        // 40 belongs in layer 1 alongside 20, strictly before layer 2's 30 — a binary search
        // bug would instead open a brand new layer 3 for 40, placing it *after* 30.
        assert!(order[&20] < order[&30]);
        assert!(order[&40] < order[&30]);
    }
}
