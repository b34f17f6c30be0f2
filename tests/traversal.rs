use std::collections::{BTreeSet, HashMap};

use aac_processors::model::{Button, Page, Tree};
use proptest::prelude::*;

fn page_id(index: usize) -> String {
    format!("p{index}")
}

/// Builds pages `p0..pN` where each edge `(from, to)` becomes a navigation
/// button. Targets past the last page dangle.
fn graph(pages: usize, edges: &[(usize, usize)]) -> Tree {
    let mut tree = Tree::new();
    for index in 0..pages {
        let mut page = Page::new(page_id(index), format!("Page {index}"));
        for (edge, (_, to)) in edges.iter().enumerate().filter(|(_, (from, _))| *from == index) {
            page.buttons
                .push(Button::navigate(format!("e{edge}"), format!("Go {to}"), page_id(*to)));
        }
        tree.add_page(page).expect("unique page");
    }
    tree.root_id = Some(page_id(0));
    tree
}

#[test]
fn three_cycle_visits_each_page_once() {
    let tree = graph(3, &[(0, 1), (1, 2), (2, 0)]);
    let mut visits: HashMap<String, usize> = HashMap::new();
    tree.traverse(|page| *visits.entry(page.id.clone()).or_default() += 1);

    assert_eq!(visits.len(), 3);
    assert!(visits.values().all(|count| *count == 1));
}

#[test]
fn unreachable_pages_are_not_visited() {
    let tree = graph(4, &[(0, 1), (1, 0), (2, 3)]);
    let reachable = tree.reachable_page_ids();
    assert_eq!(
        reachable,
        BTreeSet::from([page_id(0), page_id(1)]),
    );
}

#[test]
fn self_links_and_dangling_targets_are_tolerated() {
    let tree = graph(2, &[(0, 0), (0, 7), (0, 1)]);
    let mut order = Vec::new();
    tree.traverse(|page| order.push(page.id.clone()));
    assert_eq!(order, vec![page_id(0), page_id(1)]);
}

proptest! {
    #[test]
    fn traversal_visits_reachable_pages_exactly_once(
        pages in 1usize..12,
        edges in prop::collection::vec((0usize..12, 0usize..14), 0..40),
    ) {
        let tree = graph(pages, &edges);

        let mut visits: HashMap<String, usize> = HashMap::new();
        tree.traverse(|page| *visits.entry(page.id.clone()).or_default() += 1);
        prop_assert!(visits.values().all(|count| *count == 1));

        // Reference reachability by fixed-point iteration over the edge list.
        let mut expected = BTreeSet::from([0usize]);
        loop {
            let before = expected.len();
            for (from, to) in &edges {
                if expected.contains(from) && *to < pages {
                    expected.insert(*to);
                }
            }
            if expected.len() == before {
                break;
            }
        }
        let expected: BTreeSet<String> = expected.into_iter().map(page_id).collect();
        let visited: BTreeSet<String> = visits.into_keys().collect();
        prop_assert_eq!(visited, expected);
    }

    #[test]
    fn path_to_reachable_page_starts_at_root(
        pages in 1usize..10,
        edges in prop::collection::vec((0usize..10, 0usize..10), 0..30),
    ) {
        let tree = graph(pages, &edges);
        for id in tree.reachable_page_ids() {
            let path = tree.path_to_page(&id);
            prop_assert_eq!(path.first().map(String::as_str), Some("p0"));
            prop_assert_eq!(path.last(), Some(&id));
        }
    }
}
